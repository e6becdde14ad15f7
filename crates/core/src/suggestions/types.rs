//! Types for the Suggestion Engine

use serde::{Deserialize, Serialize};

/// Priority of a suggestion; lower ordinal ranks first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionPriority {
    High,
    Medium,
    Low,
}

impl SuggestionPriority {
    pub fn label(&self) -> &'static str {
        match self {
            SuggestionPriority::High => "high",
            SuggestionPriority::Medium => "medium",
            SuggestionPriority::Low => "low",
        }
    }
}

/// Platform area a suggestion belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionCategory {
    Provisioning,
    Compliance,
    Cost,
    Deployment,
    Onboarding,
    Discovery,
}

impl SuggestionCategory {
    pub fn label(&self) -> &'static str {
        match self {
            SuggestionCategory::Provisioning => "provisioning",
            SuggestionCategory::Compliance => "compliance",
            SuggestionCategory::Cost => "cost",
            SuggestionCategory::Deployment => "deployment",
            SuggestionCategory::Onboarding => "onboarding",
            SuggestionCategory::Discovery => "discovery",
        }
    }
}

/// A recommended next step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Short title shown to the user
    pub title: String,
    /// Prompt the user can send as-is to act on the suggestion
    pub prompt: String,
    pub priority: SuggestionPriority,
    pub category: SuggestionCategory,
}

/// Input for one ranking pass
#[derive(Debug, Clone, Default)]
pub struct SuggestionRequest {
    /// Capability names, most recently used first
    pub recent_capabilities: Vec<String>,
    /// Latest user messages, oldest first
    pub recent_messages: Vec<String>,
    pub max_suggestions: usize,
}

impl SuggestionRequest {
    pub fn new(recent_capabilities: Vec<String>) -> Self {
        Self {
            recent_capabilities,
            recent_messages: Vec::new(),
            max_suggestions: super::DEFAULT_MAX_SUGGESTIONS,
        }
    }

    pub fn with_recent_messages(mut self, messages: Vec<String>) -> Self {
        self.recent_messages = messages;
        self
    }

    pub fn with_max_suggestions(mut self, max: usize) -> Self {
        self.max_suggestions = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_high_first() {
        let mut priorities =
            vec![SuggestionPriority::Low, SuggestionPriority::High, SuggestionPriority::Medium];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![SuggestionPriority::High, SuggestionPriority::Medium, SuggestionPriority::Low]
        );
    }

    #[test]
    fn request_defaults_to_three_suggestions() {
        let request = SuggestionRequest::new(vec!["estimate_cost".to_string()]);
        assert_eq!(request.max_suggestions, 3);
        assert!(request.recent_messages.is_empty());
    }
}
