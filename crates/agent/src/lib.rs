//! Helmsman agent runtime.
//!
//! Drives one conversational turn from user message to structured response:
//! history windowing and prompt assembly (from `helmsman-core`), completion
//! with bounded retry, capability extraction, missing-information follow-up
//! and next-step suggestions.
//!
//! # Key Types
//!
//! - [`runtime::AgentRuntime`] - turn orchestrator
//! - [`llm::CompletionProvider`] - pluggable chat-completion backend
//! - [`openai::OpenAiCompatibleProvider`] - OpenAI, Azure OpenAI and Ollama
//! - [`tools::CapabilityRegistry`] - capabilities offered to the model
//!
//! The model never mutates conversation state directly. Only completed turns
//! are written back to the store.

pub mod conversation;
pub mod followup;
pub mod guardrails;
pub mod interpreter;
pub mod invoker;
pub mod llm;
pub mod openai;
pub mod runtime;
pub mod testing;
pub mod tools;

pub use conversation::{AssistantResponse, TurnRequest, TurnStatus};
pub use runtime::{AgentRuntime, RuntimeSettings};
