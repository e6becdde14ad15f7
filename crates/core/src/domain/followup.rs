use serde::{Deserialize, Serialize};

/// Clarification state of a single turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpState {
    Satisfied,
    NeedsClarification,
}

/// Outcome of the missing-information analysis for one completion.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MissingInformationAnalysis {
    pub requires_follow_up: bool,
    pub missing_fields: Vec<String>,
    pub follow_up_prompt: Option<String>,
    pub capability: Option<String>,
}

impl MissingInformationAnalysis {
    pub fn satisfied(capability: Option<String>) -> Self {
        Self { requires_follow_up: false, missing_fields: Vec::new(), follow_up_prompt: None, capability }
    }

    pub fn needs_clarification(
        missing_fields: Vec<String>,
        follow_up_prompt: String,
        capability: Option<String>,
    ) -> Self {
        Self {
            requires_follow_up: true,
            missing_fields,
            follow_up_prompt: Some(follow_up_prompt),
            capability,
        }
    }

    pub fn state(&self) -> FollowUpState {
        if self.requires_follow_up {
            FollowUpState::NeedsClarification
        } else {
            FollowUpState::Satisfied
        }
    }

    pub fn most_critical_field(&self) -> Option<&str> {
        self.missing_fields.first().map(String::as_str)
    }
}
