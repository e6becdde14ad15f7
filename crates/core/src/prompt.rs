//! Prompt assembly with per-component token attribution.

use serde::{Deserialize, Serialize};

use crate::domain::usage::{PromptComponents, TokenUsageMetrics};
use crate::history::ChatHistoryResult;
use crate::tokens::TokenCounter;

pub const RETRIEVED_KNOWLEDGE_OPEN: &str = "=== RETRIEVED KNOWLEDGE (reference only) ===";
pub const RETRIEVED_KNOWLEDGE_CLOSE: &str = "=== END RETRIEVED KNOWLEDGE ===";
pub const CONVERSATION_CONTEXT_OPEN: &str = "=== RECENT CONVERSATION CONTEXT ===";
pub const CONVERSATION_CONTEXT_CLOSE: &str = "=== END CONVERSATION CONTEXT ===";

/// A retrieved knowledge passage handed in by the retrieval subsystem.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RagSnippet {
    pub source: String,
    pub content: String,
    #[serde(default)]
    pub score: Option<f32>,
}

impl RagSnippet {
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self { source: source.into(), content: content.into(), score: None }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssembledPrompt {
    pub system_text: String,
    pub user_text: String,
    pub usage: TokenUsageMetrics,
}

pub struct PromptAssembler<'a> {
    counter: &'a dyn TokenCounter,
    model: &'a str,
    retrieval_enabled: bool,
}

impl<'a> PromptAssembler<'a> {
    pub fn new(counter: &'a dyn TokenCounter, model: &'a str, retrieval_enabled: bool) -> Self {
        Self { counter, model, retrieval_enabled }
    }

    /// Builds the system and user texts. Each component is counted on its
    /// own; the concatenated texts are never counted.
    pub fn assemble(
        &self,
        system_prompt: &str,
        snippets: &[RagSnippet],
        history: &ChatHistoryResult,
        user_prompt: &str,
    ) -> AssembledPrompt {
        let mut system_text = system_prompt.to_string();
        let mut rag_tokens = 0;
        if self.retrieval_enabled && !snippets.is_empty() {
            let block = render_knowledge_block(snippets);
            rag_tokens = self.counter.count(&block, self.model);
            system_text.push_str("\n\n");
            system_text.push_str(&block);
        }

        let user_text = if history.formatted_history.is_empty() {
            user_prompt.to_string()
        } else {
            format!(
                "{CONVERSATION_CONTEXT_OPEN}\n{}\n{CONVERSATION_CONTEXT_CLOSE}\n\n{user_prompt}",
                history.formatted_history
            )
        };

        let components = PromptComponents {
            system_prompt: self.counter.count(system_prompt, self.model),
            rag_context: rag_tokens,
            history: history.token_count,
            user_prompt: self.counter.count(user_prompt, self.model),
        };
        let usage = TokenUsageMetrics::from_components(
            self.model,
            components,
            self.counter.max_context_window(self.model),
        );

        AssembledPrompt { system_text, user_text, usage }
    }
}

fn render_knowledge_block(snippets: &[RagSnippet]) -> String {
    let mut block = String::from(RETRIEVED_KNOWLEDGE_OPEN);
    for (index, snippet) in snippets.iter().enumerate() {
        block.push_str(&format!("\n[Source {}: {}]\n{}\n", index + 1, snippet.source, snippet.content));
    }
    block.push_str(RETRIEVED_KNOWLEDGE_CLOSE);
    block
}
