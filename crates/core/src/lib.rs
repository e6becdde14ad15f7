pub mod config;
pub mod domain;
pub mod errors;
pub mod history;
pub mod missing_info;
pub mod prompt;
pub mod store;
pub mod suggestions;
pub mod tokens;

pub use domain::capability::{CapabilityCall, CapabilityDefinition, CapabilityParameter};
pub use domain::conversation::{
    ConversationContext, ConversationId, MessageRole, MessageSnapshot, MAX_HISTORY_MESSAGES,
};
pub use domain::followup::{FollowUpState, MissingInformationAnalysis};
pub use domain::usage::{PromptComponents, TokenUsageMetrics};
pub use errors::{ProviderError, StoreError, TurnError};
pub use history::{ChatHistoryResult, HistoryBuilder, HistoryOptions};
pub use missing_info::{MissingInfoPatterns, MissingInfoSignal};
pub use prompt::{AssembledPrompt, PromptAssembler, RagSnippet};
pub use store::{ConversationStore, StoreSettings};
pub use suggestions::{Suggestion, SuggestionEngine, SuggestionRequest};
pub use tokens::{HeuristicTokenCounter, TiktokenCounter, TokenCounter};
