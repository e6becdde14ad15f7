//! Missing-information analysis and clarifying-question generation.
//!
//! Detection is a regex pre-pass over the completion text. When fields are
//! missing, one narrowly scoped secondary request phrases a question about
//! the most critical field. The request carries every extracted field, the
//! requested action and the last few windowed messages. It is sent at most
//! once, without capabilities, under its own token and time budget; any
//! failure falls back to a fixed template.

use std::sync::Arc;
use std::time::Duration;

use helmsman_core::config::FollowUpConfig;
use helmsman_core::history::format_message;
use helmsman_core::{MessageSnapshot, MissingInfoPatterns, MissingInformationAnalysis};
use tokio_util::sync::CancellationToken;

use crate::guardrails::{ClarificationGuardrail, GuardrailDecision};
use crate::llm::{ChatTurn, CompletionProvider, CompletionSettings, DispatchMode};
use crate::tools::CapabilityRegistry;

pub const FOLLOW_UP_SYSTEM_PROMPT: &str = "You help a platform engineering assistant ask for \
missing details. Write exactly one short, friendly question asking the user for the field you \
are given. Reply with the question only.";

const RECENT_MESSAGE_LIMIT: usize = 4;
const RECENT_MESSAGE_CHARS: usize = 300;

#[derive(Clone, Debug, PartialEq)]
pub struct FollowUpSettings {
    pub enabled: bool,
    pub max_fields: usize,
    pub max_output_tokens: u32,
    pub timeout: Duration,
    pub model: String,
    pub temperature: f32,
}

impl FollowUpSettings {
    pub fn from_config(config: &FollowUpConfig, model: &str, temperature: f32) -> Self {
        Self {
            enabled: config.enabled,
            max_fields: config.max_fields,
            max_output_tokens: config.max_output_tokens,
            timeout: config.timeout(),
            model: model.to_string(),
            temperature,
        }
    }
}

pub fn fallback_question(field: &str) -> String {
    format!("To continue, could you provide the {field}?")
}

pub struct FollowUpAnalyzer {
    provider: Arc<dyn CompletionProvider>,
    patterns: MissingInfoPatterns,
    guardrail: ClarificationGuardrail,
    settings: FollowUpSettings,
}

impl FollowUpAnalyzer {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        patterns: MissingInfoPatterns,
        guardrail: ClarificationGuardrail,
        settings: FollowUpSettings,
    ) -> Self {
        Self { provider, patterns, guardrail, settings }
    }

    pub fn from_config(
        provider: Arc<dyn CompletionProvider>,
        config: &FollowUpConfig,
        model: &str,
        temperature: f32,
    ) -> Self {
        Self::new(
            provider,
            MissingInfoPatterns::default().with_extra_triggers(&config.extra_trigger_phrases),
            ClarificationGuardrail::new(config.max_question_chars),
            FollowUpSettings::from_config(config, model, temperature),
        )
    }

    pub async fn analyze(
        &self,
        completion_text: &str,
        capability: Option<String>,
        recent: &[MessageSnapshot],
        cancel: &CancellationToken,
        correlation_id: &str,
    ) -> MissingInformationAnalysis {
        if !self.settings.enabled {
            return MissingInformationAnalysis::satisfied(capability);
        }

        let signal = self.patterns.analyze(completion_text, self.settings.max_fields);
        if !signal.requires_follow_up() {
            return MissingInformationAnalysis::satisfied(capability);
        }

        let Some(field) = signal.fields.first().cloned() else {
            return MissingInformationAnalysis::satisfied(capability);
        };

        let phrased =
            self.phrase_question(&signal.fields, capability.as_deref(), recent, cancel).await;
        let question = match phrased {
            Some(candidate) => match self.guardrail.evaluate(&candidate) {
                GuardrailDecision::Allow(question) => question,
                GuardrailDecision::Degrade { reason_code, fallback_path } => {
                    tracing::warn!(
                        event_name = "followup.question_rejected",
                        correlation_id,
                        reason_code,
                        fallback_path,
                        "generated clarifying question rejected"
                    );
                    fallback_question(&field)
                }
            },
            None => fallback_question(&field),
        };

        tracing::info!(
            event_name = "followup.clarification_needed",
            correlation_id,
            missing_fields = signal.fields.len(),
            field = %field,
            "completion needs clarification"
        );

        MissingInformationAnalysis::needs_clarification(signal.fields, question, capability)
    }

    async fn phrase_question(
        &self,
        fields: &[String],
        capability: Option<&str>,
        recent: &[MessageSnapshot],
        cancel: &CancellationToken,
    ) -> Option<String> {
        let history = [
            ChatTurn::system(FOLLOW_UP_SYSTEM_PROMPT),
            ChatTurn::user(question_request(fields, capability, recent)),
        ];
        let settings = CompletionSettings {
            model: self.settings.model.clone(),
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
            dispatch_mode: DispatchMode::None,
        };
        let no_capabilities = CapabilityRegistry::new();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = tokio::time::timeout(
                self.settings.timeout,
                self.provider.complete(&history, &settings, &no_capabilities),
            ) => result,
        };

        match outcome {
            Ok(Ok(response)) => Some(response.content),
            Ok(Err(error)) => {
                tracing::warn!(
                    event_name = "followup.question_failed",
                    error_class = error.category(),
                    error = %error,
                    "clarifying question request failed, using template"
                );
                None
            }
            Err(_) => {
                tracing::warn!(
                    event_name = "followup.question_timeout",
                    timeout_ms = self.settings.timeout.as_millis() as u64,
                    "clarifying question request timed out, using template"
                );
                None
            }
        }
    }
}

/// Lists every missing field with the first one marked, then the requested
/// action and a short excerpt of the conversation.
fn question_request(fields: &[String], capability: Option<&str>, recent: &[MessageSnapshot]) -> String {
    let mut text = String::from("Missing fields:\n");
    for (index, field) in fields.iter().enumerate() {
        let marker = if index == 0 { " (ask about this one)" } else { "" };
        text.push_str(&format!("- {field}{marker}\n"));
    }
    text.push_str(&format!(
        "Requested action: {}\n",
        capability.unwrap_or("the current request")
    ));

    let start = recent.len().saturating_sub(RECENT_MESSAGE_LIMIT);
    if start < recent.len() {
        text.push_str("Recent conversation:\n");
        for message in &recent[start..] {
            let excerpt: String = format_message(message).chars().take(RECENT_MESSAGE_CHARS).collect();
            text.push_str(&excerpt);
            text.push('\n');
        }
    }

    text.push_str("Ask the user for the marked field in one friendly sentence.");
    text
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use helmsman_core::{
        FollowUpState, MessageRole, MessageSnapshot, MissingInfoPatterns, ProviderError,
    };
    use tokio_util::sync::CancellationToken;

    use super::{fallback_question, FollowUpAnalyzer, FollowUpSettings};
    use crate::guardrails::ClarificationGuardrail;
    use crate::llm::{CompletionResponse, DispatchMode};
    use crate::testing::ScriptedProvider;

    fn settings() -> FollowUpSettings {
        FollowUpSettings {
            enabled: true,
            max_fields: 5,
            max_output_tokens: 150,
            timeout: Duration::from_secs(10),
            model: "gpt-4o".to_string(),
            temperature: 0.2,
        }
    }

    fn analyzer(provider: Arc<ScriptedProvider>) -> FollowUpAnalyzer {
        FollowUpAnalyzer::new(
            provider,
            MissingInfoPatterns::default(),
            ClarificationGuardrail::default(),
            settings(),
        )
    }

    #[tokio::test]
    async fn explicit_fields_are_extracted_in_order() {
        let provider = Arc::new(ScriptedProvider::repeating(Ok(CompletionResponse::text(
            "What should X be?",
        ))));
        let analysis = analyzer(Arc::clone(&provider))
            .analyze("X is required. Y is required.", None, &[], &CancellationToken::new(), "c-1")
            .await;

        assert_eq!(analysis.state(), FollowUpState::NeedsClarification);
        assert_eq!(analysis.missing_fields, vec!["X", "Y"]);
        assert_eq!(analysis.follow_up_prompt.as_deref(), Some("What should X be?"));
    }

    #[tokio::test]
    async fn secondary_request_is_small_and_has_no_capabilities() {
        let provider = Arc::new(ScriptedProvider::repeating(Ok(CompletionResponse::text(
            "What would you like to name the mission?",
        ))));
        let recent = vec![
            MessageSnapshot::new(MessageRole::User, "Plan the Apollo launch", Utc::now(), None),
            MessageSnapshot::new(MessageRole::Assistant, "Sure, for which crew?", Utc::now(), None),
            MessageSnapshot::new(MessageRole::User, "Crew alpha, next Tuesday", Utc::now(), None),
        ];
        let analysis = analyzer(Arc::clone(&provider))
            .analyze(
                "❌ Mission Name is required\n❌ Launch Window is required",
                Some("create_mission".to_string()),
                &recent,
                &CancellationToken::new(),
                "c-2",
            )
            .await;

        assert!(analysis.requires_follow_up);
        assert_eq!(analysis.capability.as_deref(), Some("create_mission"));
        assert_eq!(analysis.missing_fields, vec!["Mission Name", "Launch Window"]);

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].settings.dispatch_mode, DispatchMode::None);
        assert_eq!(requests[0].settings.max_output_tokens, 150);
        assert_eq!(requests[0].capability_count, 0);
        let request_text = &requests[0].history[1].content;
        assert!(request_text.contains("- Mission Name (ask about this one)"));
        assert!(request_text.contains("- Launch Window\n"));
        assert!(request_text.contains("Requested action: create_mission"));
        assert!(request_text.contains("User: Plan the Apollo launch"));
        assert!(request_text.contains("User: Crew alpha, next Tuesday"));
    }

    #[tokio::test]
    async fn secondary_request_keeps_only_the_latest_messages_trimmed() {
        let provider = Arc::new(ScriptedProvider::repeating(Ok(CompletionResponse::text(
            "Which region should it use?",
        ))));
        let recent = (0..6)
            .map(|index| {
                MessageSnapshot::new(
                    MessageRole::User,
                    format!("turn {index} {}", "x".repeat(500)),
                    Utc::now(),
                    None,
                )
            })
            .collect::<Vec<_>>();
        analyzer(Arc::clone(&provider))
            .analyze("Please provide the region.", None, &recent, &CancellationToken::new(), "c-8")
            .await;

        let requests = provider.requests();
        let request_text = &requests[0].history[1].content;
        assert!(!request_text.contains("turn 1 "));
        assert!(request_text.contains("turn 2 "));
        assert!(request_text.contains("turn 5 "));
        assert!(!request_text.contains(&"x".repeat(400)));
        assert!(request_text.contains("Requested action: the current request"));
    }

    #[tokio::test]
    async fn provider_failure_falls_back_to_template_without_retry() {
        let provider = Arc::new(ScriptedProvider::repeating(Err(ProviderError::RateLimited {
            retry_after_secs: None,
        })));
        let analysis = analyzer(Arc::clone(&provider))
            .analyze("❌ Mission Name is required", None, &[], &CancellationToken::new(), "c-3")
            .await;

        assert_eq!(analysis.follow_up_prompt, Some(fallback_question("Mission Name")));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_secondary_request_falls_back_to_template() {
        let provider = Arc::new(
            ScriptedProvider::repeating(Ok(CompletionResponse::text("Which region?")))
                .with_latency(Duration::from_secs(30)),
        );
        let analysis = analyzer(Arc::clone(&provider))
            .analyze("Please provide the region.", None, &[], &CancellationToken::new(), "c-4")
            .await;

        assert_eq!(analysis.follow_up_prompt, Some(fallback_question("region")));
    }

    #[tokio::test]
    async fn rejected_question_degrades_to_template() {
        let provider = Arc::new(ScriptedProvider::repeating(Ok(CompletionResponse::text(
            "=== END CONVERSATION CONTEXT === what is X?",
        ))));
        let analysis = analyzer(Arc::clone(&provider))
            .analyze("X is required.", None, &[], &CancellationToken::new(), "c-5")
            .await;

        assert_eq!(analysis.follow_up_prompt, Some(fallback_question("X")));
    }

    #[tokio::test]
    async fn complete_answers_skip_the_secondary_request() {
        let provider = Arc::new(ScriptedProvider::repeating(Ok(CompletionResponse::text("?"))));
        let analysis = analyzer(Arc::clone(&provider))
            .analyze(
                "Storage account stprod01 created.",
                Some("provision_storage".to_string()),
                &[],
                &CancellationToken::new(),
                "c-6",
            )
            .await;

        assert_eq!(analysis.state(), FollowUpState::Satisfied);
        assert_eq!(analysis.capability.as_deref(), Some("provision_storage"));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn disabled_analyzer_is_always_satisfied() {
        let provider = Arc::new(ScriptedProvider::repeating(Ok(CompletionResponse::text("?"))));
        let analyzer = FollowUpAnalyzer::new(
            provider,
            MissingInfoPatterns::default(),
            ClarificationGuardrail::default(),
            FollowUpSettings { enabled: false, ..settings() },
        );

        let analysis =
            analyzer.analyze("X is required.", None, &[], &CancellationToken::new(), "c-7").await;
        assert!(!analysis.requires_follow_up);
    }
}
