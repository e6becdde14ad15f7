/// Outcome of checking a generated clarifying question.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow(String),
    Degrade { reason_code: &'static str, fallback_path: &'static str },
}

impl GuardrailDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }
}

/// Validates model-phrased clarifying questions before they reach the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClarificationGuardrail {
    pub max_question_chars: usize,
    pub max_question_marks: usize,
}

impl Default for ClarificationGuardrail {
    fn default() -> Self {
        Self { max_question_chars: 300, max_question_marks: 2 }
    }
}

impl ClarificationGuardrail {
    pub fn new(max_question_chars: usize) -> Self {
        Self { max_question_chars, ..Self::default() }
    }

    pub fn evaluate(&self, candidate: &str) -> GuardrailDecision {
        let question = candidate.trim().trim_matches('"').trim();

        if question.is_empty() {
            return degrade("empty_question");
        }
        if question.chars().count() > self.max_question_chars {
            return degrade("question_too_long");
        }
        if question.contains("===") {
            return degrade("delimiter_leak");
        }
        if question.matches('?').count() > self.max_question_marks {
            return degrade("multiple_questions");
        }

        GuardrailDecision::Allow(question.to_string())
    }
}

fn degrade(reason_code: &'static str) -> GuardrailDecision {
    GuardrailDecision::Degrade { reason_code, fallback_path: "templated_question" }
}
