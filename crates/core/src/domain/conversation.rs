use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on the message history kept per conversation.
pub const MAX_HISTORY_MESSAGES: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
            Self::System => "System",
        }
    }
}

/// One message of a conversation. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageSnapshot {
    role: MessageRole,
    content: String,
    timestamp: DateTime<Utc>,
    capability: Option<String>,
}

impl MessageSnapshot {
    pub fn new(
        role: MessageRole,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
        capability: Option<String>,
    ) -> Self {
        Self { role, content: content.into(), timestamp, capability }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content, Utc::now(), None)
    }

    pub fn assistant(content: impl Into<String>, capability: Option<String>) -> Self {
        Self::new(MessageRole::Assistant, content, Utc::now(), capability)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content, Utc::now(), None)
    }

    pub fn role(&self) -> MessageRole {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn capability(&self) -> Option<&str> {
        self.capability.as_deref()
    }
}

/// Per-conversation state owned by the conversation store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub id: ConversationId,
    pub user_id: Option<String>,
    pub started_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    messages: Vec<MessageSnapshot>,
    capabilities_used: Vec<String>,
    workflow_state: BTreeMap<String, serde_json::Value>,
    message_cap: usize,
}

impl ConversationContext {
    pub fn new(id: ConversationId, user_id: Option<String>, now: DateTime<Utc>) -> Self {
        Self::with_message_cap(id, user_id, now, MAX_HISTORY_MESSAGES)
    }

    /// `message_cap` is clamped to `1..=MAX_HISTORY_MESSAGES`.
    pub fn with_message_cap(
        id: ConversationId,
        user_id: Option<String>,
        now: DateTime<Utc>,
        message_cap: usize,
    ) -> Self {
        Self {
            id,
            user_id,
            started_at: now,
            last_activity_at: now,
            messages: Vec::new(),
            capabilities_used: Vec::new(),
            workflow_state: BTreeMap::new(),
            message_cap: message_cap.clamp(1, MAX_HISTORY_MESSAGES),
        }
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    pub fn messages(&self) -> &[MessageSnapshot] {
        &self.messages
    }

    pub fn capabilities_used(&self) -> &[String] {
        &self.capabilities_used
    }

    pub fn workflow_state(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.workflow_state
    }

    pub fn push_message(&mut self, message: MessageSnapshot) {
        if let Some(capability) = message.capability() {
            self.record_capability(capability);
        }
        self.touch(message.timestamp());
        self.messages.push(message);

        if self.messages.len() > self.message_cap {
            let overflow = self.messages.len() - self.message_cap;
            self.messages.drain(..overflow);
        }
    }

    /// Records a capability name once, keeping first-use order.
    pub fn record_capability(&mut self, name: &str) {
        if !self.capabilities_used.iter().any(|existing| existing == name) {
            self.capabilities_used.push(name.to_string());
        }
    }

    /// Advances `last_activity_at`; earlier timestamps are ignored.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_activity_at {
            self.last_activity_at = at;
        }
    }

    pub fn set_workflow_value(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.workflow_state.insert(key.into(), value);
    }

    pub fn remove_workflow_value(&mut self, key: &str) -> Option<serde_json::Value> {
        self.workflow_state.remove(key)
    }

    /// Capability names attached to messages, most recent first, without duplicates.
    pub fn recent_capabilities(&self, limit: usize) -> Vec<String> {
        let mut recent: Vec<String> = Vec::new();
        for message in self.messages.iter().rev() {
            let Some(capability) = message.capability() else {
                continue;
            };
            if !recent.iter().any(|seen| seen == capability) {
                recent.push(capability.to_string());
            }
            if recent.len() >= limit {
                break;
            }
        }
        recent
    }
}
