use async_trait::async_trait;
use helmsman_core::ProviderError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::CapabilityRegistry;

/// Whether the provider may call capabilities on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    Auto,
    None,
}

/// Per-request settings, passed through to the provider unchanged.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionSettings {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub dispatch_mode: DispatchMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Raw completion: text plus provider-shaped metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub usage: Option<ProviderUsage>,
}

impl CompletionResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), metadata: Value::Null, usage: None }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    /// True when every network request already carries its own deadline.
    /// The invoker then leaves `complete` unbounded, so capability execution
    /// inside a dispatch loop never counts against the attempt timeout.
    fn bounds_requests(&self) -> bool {
        false
    }

    async fn complete(
        &self,
        history: &[ChatTurn],
        settings: &CompletionSettings,
        capabilities: &CapabilityRegistry,
    ) -> Result<CompletionResponse, ProviderError>;
}
