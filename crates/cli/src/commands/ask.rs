use std::sync::Arc;

use anyhow::{Context, Result};
use helmsman_agent::openai::OpenAiCompatibleProvider;
use helmsman_agent::{AgentRuntime, AssistantResponse, TurnRequest, TurnStatus};
use helmsman_core::config::{AppConfig, LoadOptions};
use helmsman_core::{HeuristicTokenCounter, TiktokenCounter, TokenCounter};
use tokio_util::sync::CancellationToken;

use crate::commands::CommandResult;
use crate::logging::init_logging;

pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_SETUP: u8 = 3;
pub const EXIT_TURN_FAILED: u8 = 4;
pub const EXIT_CANCELLED: u8 = 130;

/// Runs one turn against the configured provider. Conversations live in
/// process memory, so `conversation` only labels the turn.
pub fn run(message: &str, conversation: Option<&str>, json_output: bool) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("ask", "config_validation", error.to_string(), EXIT_CONFIG)
        }
    };
    init_logging(&config);

    let mut request = TurnRequest::new(message);
    if let Some(conversation) = conversation {
        request = request.in_conversation(conversation);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "ask",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                EXIT_SETUP,
            )
        }
    };

    match runtime.block_on(ask(&config, request)) {
        Ok(response) => render(&response, json_output),
        Err(error) => CommandResult::failure("ask", "provider_setup", format!("{error:#}"), EXIT_SETUP),
    }
}

async fn ask(config: &AppConfig, request: TurnRequest) -> Result<AssistantResponse> {
    let provider = OpenAiCompatibleProvider::from_config(&config.llm)
        .context("could not configure the completion provider")?;
    let agent = AgentRuntime::from_config(config, Arc::new(provider), token_counter(config));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let response = agent.process_message(request, cancel).await;
    interrupt.abort();
    Ok(response)
}

fn token_counter(config: &AppConfig) -> Arc<dyn TokenCounter> {
    match TiktokenCounter::new() {
        Ok(counter) => Arc::new(counter.with_context_window(config.llm.context_window)),
        Err(error) => {
            tracing::warn!(
                event_name = "cli.token_counter.fallback",
                error = %error,
                "tokenizer unavailable, estimating tokens from character counts"
            );
            Arc::new(HeuristicTokenCounter::new().with_context_window(config.llm.context_window))
        }
    }
}

pub fn render(response: &AssistantResponse, json_output: bool) -> CommandResult {
    let exit_code = match response.status {
        TurnStatus::Completed | TurnStatus::NeedsClarification => 0,
        TurnStatus::Cancelled => EXIT_CANCELLED,
        TurnStatus::Failed => EXIT_TURN_FAILED,
    };

    let output = if json_output {
        match serde_json::to_string_pretty(response) {
            Ok(output) => output,
            Err(error) => {
                return CommandResult::failure("ask", "serialization", error.to_string(), EXIT_SETUP)
            }
        }
    } else {
        render_human(response)
    };

    CommandResult { exit_code, output }
}

fn render_human(response: &AssistantResponse) -> String {
    let mut lines = vec![response.display_text().to_string()];

    if response.analysis.requires_follow_up {
        lines.push(String::new());
        lines.push(format!("missing: {}", response.analysis.missing_fields.join(", ")));
    }

    if !response.suggestions.is_empty() {
        lines.push(String::new());
        lines.push("next steps:".to_string());
        for suggestion in &response.suggestions {
            lines.push(format!(
                "- [{}] {}: \"{}\"",
                suggestion.priority.label(),
                suggestion.title,
                suggestion.prompt
            ));
        }
    }

    if let Some(usage) = &response.usage {
        let mut line = format!(
            "tokens: {} prompt + {} completion ({:.1}% of {} window)",
            usage.total_prompt_tokens,
            usage.completion_tokens,
            usage.context_utilization * 100.0,
            usage.model
        );
        if let Some(cost) = usage.estimated_cost_usd {
            line.push_str(&format!(", est. ${cost:.4}"));
        }
        lines.push(String::new());
        lines.push(line);
    }

    lines.push(format!("conversation: {} ({} ms)", response.conversation_id, response.duration_ms));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use helmsman_agent::{AssistantResponse, TurnStatus};
    use helmsman_core::suggestions::{SuggestionCategory, SuggestionPriority};
    use helmsman_core::{
        ConversationId, MissingInformationAnalysis, ProviderError, Suggestion, TurnError,
    };

    use super::{render, EXIT_CANCELLED};

    fn clarification() -> AssistantResponse {
        AssistantResponse {
            success: true,
            status: TurnStatus::NeedsClarification,
            message: "❌ Mission Name is required".to_string(),
            conversation_id: ConversationId::from("conv-1"),
            capabilities_invoked: vec!["create_mission".to_string()],
            analysis: MissingInformationAnalysis::needs_clarification(
                vec!["Mission Name".to_string()],
                "What should the mission be called?".to_string(),
                Some("create_mission".to_string()),
            ),
            suggestions: vec![Suggestion {
                title: "Estimate cost".to_string(),
                prompt: "What will this cost per month?".to_string(),
                priority: SuggestionPriority::High,
                category: SuggestionCategory::Cost,
            }],
            usage: None,
            duration_ms: 12,
            error_category: None,
        }
    }

    #[test]
    fn human_output_leads_with_the_question() {
        let result = render(&clarification(), false);

        assert_eq!(result.exit_code, 0);
        assert!(result.output.starts_with("What should the mission be called?"));
        assert!(result.output.contains("missing: Mission Name"));
        assert!(result.output.contains("Estimate cost"));
    }

    #[test]
    fn json_output_is_the_full_response() {
        let result = render(&clarification(), true);
        let payload: serde_json::Value =
            serde_json::from_str(&result.output).unwrap_or(serde_json::Value::Null);

        assert_eq!(payload["status"], "needs_clarification");
        assert_eq!(payload["analysis"]["missing_fields"][0], "Mission Name");
    }

    #[test]
    fn cancelled_turn_uses_interrupt_exit_code() {
        let response = AssistantResponse::failed(
            ConversationId::from("conv-2"),
            &TurnError::Provider(ProviderError::Cancelled),
            5,
        );
        assert_eq!(render(&response, false).exit_code, EXIT_CANCELLED);
    }
}
