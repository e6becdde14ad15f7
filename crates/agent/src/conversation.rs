//! Turn request and response types exchanged with callers of the runtime.

use helmsman_core::{
    ConversationId, MissingInformationAnalysis, RagSnippet, Suggestion, TokenUsageMetrics,
    TurnError,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnRequest {
    /// A fresh conversation is started when absent.
    pub conversation_id: Option<ConversationId>,
    pub user_id: Option<String>,
    pub message: String,
    /// Knowledge passages retrieved for this turn by the caller.
    #[serde(default)]
    pub rag_snippets: Vec<RagSnippet>,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self { conversation_id: None, user_id: None, message: message.into(), rag_snippets: Vec::new() }
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<ConversationId>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn from_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_snippets(mut self, snippets: Vec<RagSnippet>) -> Self {
        self.rag_snippets = snippets;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    NeedsClarification,
    Cancelled,
    Failed,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::NeedsClarification => "needs_clarification",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

/// Everything the caller learns about one turn. Failures are reported here,
/// never as an `Err`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssistantResponse {
    pub success: bool,
    pub status: TurnStatus,
    pub message: String,
    pub conversation_id: ConversationId,
    pub capabilities_invoked: Vec<String>,
    pub analysis: MissingInformationAnalysis,
    pub suggestions: Vec<Suggestion>,
    pub usage: Option<TokenUsageMetrics>,
    pub duration_ms: u64,
    pub error_category: Option<String>,
}

impl AssistantResponse {
    pub fn failed(conversation_id: ConversationId, error: &TurnError, duration_ms: u64) -> Self {
        let status = if error.is_cancelled() { TurnStatus::Cancelled } else { TurnStatus::Failed };
        Self {
            success: false,
            status,
            message: error.user_message(),
            conversation_id,
            capabilities_invoked: Vec::new(),
            analysis: MissingInformationAnalysis::default(),
            suggestions: Vec::new(),
            usage: None,
            duration_ms,
            error_category: Some(error.category().to_string()),
        }
    }

    /// The follow-up question when one is needed, otherwise the answer text.
    pub fn display_text(&self) -> &str {
        match (&self.status, &self.analysis.follow_up_prompt) {
            (TurnStatus::NeedsClarification, Some(question)) => question,
            _ => &self.message,
        }
    }
}
