//! Turn orchestration.
//!
//! One call to [`AgentRuntime::process_message`] runs the full pipeline:
//! store lookup, history windowing, prompt assembly, completion with retry,
//! capability extraction, missing-information analysis, suggestions and the
//! final store update. Conversation state is only written when the turn
//! completes, so a failed or cancelled turn leaves history untouched.

use std::sync::Arc;

use chrono::Utc;
use helmsman_core::config::AppConfig;
use helmsman_core::suggestions::DEFAULT_MAX_SUGGESTIONS;
use helmsman_core::{
    ConversationId, ConversationStore, HistoryBuilder, HistoryOptions, MessageRole,
    MessageSnapshot, PromptAssembler, ProviderError, SuggestionEngine, SuggestionRequest,
    TokenCounter, TurnError,
};
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::conversation::{AssistantResponse, TurnRequest, TurnStatus};
use crate::followup::FollowUpAnalyzer;
use crate::interpreter::ResponseInterpreter;
use crate::invoker::CompletionInvoker;
use crate::llm::{ChatTurn, CompletionProvider, CompletionSettings, DispatchMode};
use crate::tools::CapabilityRegistry;

/// Workflow-state key holding the fields the last turn asked for.
pub const PENDING_FIELDS_KEY: &str = "pending_fields";
/// Workflow-state key holding the last capability the model invoked.
pub const LAST_CAPABILITY_KEY: &str = "last_capability";

#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeSettings {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub system_prompt: String,
    pub history: HistoryOptions,
    pub retrieval_enabled: bool,
    pub input_cost_per_1k: Option<f64>,
    pub output_cost_per_1k: Option<f64>,
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            max_output_tokens: config.llm.max_output_tokens,
            system_prompt: config.conversation.system_prompt.clone(),
            history: config.conversation.history_options(),
            retrieval_enabled: config.conversation.retrieval_enabled,
            input_cost_per_1k: config.llm.input_cost_per_1k,
            output_cost_per_1k: config.llm.output_cost_per_1k,
        }
    }
}

pub struct AgentRuntime {
    store: Arc<ConversationStore>,
    counter: Arc<dyn TokenCounter>,
    invoker: CompletionInvoker,
    interpreter: ResponseInterpreter,
    followup: FollowUpAnalyzer,
    suggestions: SuggestionEngine,
    capabilities: CapabilityRegistry,
    settings: RuntimeSettings,
}

/// What the completed part of a turn hands to the response builder.
struct CompletedTurn {
    content: String,
    capabilities_invoked: Vec<String>,
}

impl AgentRuntime {
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn CompletionProvider>,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            store: Arc::new(ConversationStore::new(config.conversation.store_settings())),
            counter,
            invoker: CompletionInvoker::from_config(Arc::clone(&provider), &config.llm),
            interpreter: ResponseInterpreter::new(config.llm.metadata_format),
            followup: FollowUpAnalyzer::from_config(
                provider,
                &config.followup,
                &config.llm.model,
                config.llm.temperature,
            ),
            suggestions: SuggestionEngine::new(),
            capabilities: CapabilityRegistry::new(),
            settings: RuntimeSettings::from_config(config),
        }
    }

    pub fn with_capabilities(mut self, capabilities: CapabilityRegistry) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Shares an existing store, e.g. between several runtimes in one process.
    pub fn with_store(mut self, store: Arc<ConversationStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_invoker(mut self, invoker: CompletionInvoker) -> Self {
        self.invoker = invoker;
        self
    }

    pub fn with_followup(mut self, followup: FollowUpAnalyzer) -> Self {
        self.followup = followup;
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Runs one turn. Never fails: errors become an unsuccessful response.
    pub async fn process_message(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> AssistantResponse {
        let started = Instant::now();
        let conversation_id =
            request.conversation_id.clone().unwrap_or_else(ConversationId::generate);

        match self.run_turn(&conversation_id, &request, &cancel, started).await {
            Ok(response) => response,
            Err(error) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                if error.is_cancelled() {
                    tracing::info!(
                        event_name = "agent.turn.cancelled",
                        correlation_id = %conversation_id,
                        duration_ms,
                        "turn cancelled"
                    );
                } else {
                    tracing::error!(
                        event_name = "agent.turn.failed",
                        correlation_id = %conversation_id,
                        error_class = error.category(),
                        error = %error,
                        duration_ms,
                        "turn failed"
                    );
                }
                AssistantResponse::failed(conversation_id, &error, duration_ms)
            }
        }
    }

    async fn run_turn(
        &self,
        conversation_id: &ConversationId,
        request: &TurnRequest,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<AssistantResponse, TurnError> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(TurnError::EmptyMessage);
        }
        let received_at = Utc::now();
        let correlation_id = conversation_id.as_str();
        let model = self.settings.model.as_str();

        self.store.evict_idle(received_at);
        let snapshot = self.store.get_or_create(conversation_id, request.user_id.as_deref())?;

        let history = HistoryBuilder::new(self.counter.as_ref(), model)
            .build(snapshot.messages(), &self.settings.history);
        tracing::debug!(
            event_name = "agent.history.built",
            correlation_id,
            included = history.included_message_count,
            truncated = history.truncated_message_count,
            history_tokens = history.token_count,
            "conversation history windowed"
        );

        let prompt = PromptAssembler::new(self.counter.as_ref(), model, self.settings.retrieval_enabled)
            .assemble(&self.settings.system_prompt, &request.rag_snippets, &history, message);
        let turns = [ChatTurn::system(prompt.system_text), ChatTurn::user(prompt.user_text)];
        let completion_settings = CompletionSettings {
            model: self.settings.model.clone(),
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
            dispatch_mode: DispatchMode::Auto,
        };

        let response = self
            .invoker
            .invoke(&turns, &completion_settings, &self.capabilities, cancel, correlation_id)
            .await?;

        let mut capabilities_invoked: Vec<String> = Vec::new();
        for call in self.interpreter.extract_capability_calls(&response).unwrap_or_default() {
            if !capabilities_invoked.contains(&call.name) {
                capabilities_invoked.push(call.name);
            }
        }
        let capability = capabilities_invoked.last().cloned();

        let mut usage = prompt.usage;
        let completion_tokens = response
            .usage
            .map(|reported| reported.completion_tokens as usize)
            .filter(|tokens| *tokens > 0)
            .unwrap_or_else(|| self.counter.count(&response.content, model));
        usage.record_completion(completion_tokens);
        usage.apply_pricing(self.settings.input_cost_per_1k, self.settings.output_cost_per_1k);

        let analysis = self
            .followup
            .analyze(
                &response.content,
                capability.clone(),
                &history.included_messages,
                cancel,
                correlation_id,
            )
            .await;

        if cancel.is_cancelled() {
            return Err(TurnError::Provider(ProviderError::Cancelled));
        }

        let completed = CompletedTurn { content: response.content, capabilities_invoked };
        let (recent_capabilities, recent_messages) =
            self.store.commit(&snapshot, |context| {
                context.push_message(MessageSnapshot::new(
                    MessageRole::User,
                    message,
                    received_at,
                    None,
                ));
                context.push_message(MessageSnapshot::new(
                    MessageRole::Assistant,
                    completed.content.as_str(),
                    Utc::now(),
                    capability.clone(),
                ));
                for name in &completed.capabilities_invoked {
                    context.record_capability(name);
                }
                if let Some(name) = &capability {
                    context.set_workflow_value(LAST_CAPABILITY_KEY, json!(name));
                }
                if analysis.requires_follow_up {
                    context.set_workflow_value(PENDING_FIELDS_KEY, json!(analysis.missing_fields));
                } else {
                    context.remove_workflow_value(PENDING_FIELDS_KEY);
                }

                let recent_messages = context
                    .messages()
                    .iter()
                    .filter(|snapshot| snapshot.role() == MessageRole::User)
                    .rev()
                    .take(DEFAULT_MAX_SUGGESTIONS)
                    .map(|snapshot| snapshot.content().to_string())
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect::<Vec<_>>();
                (context.recent_capabilities(DEFAULT_MAX_SUGGESTIONS), recent_messages)
            })?;

        let suggestions = self.suggestions.suggest(
            &SuggestionRequest::new(recent_capabilities).with_recent_messages(recent_messages),
        );

        let status = if analysis.requires_follow_up {
            TurnStatus::NeedsClarification
        } else {
            TurnStatus::Completed
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            event_name = "agent.turn.completed",
            correlation_id,
            status = status.as_str(),
            provider = self.invoker.provider_id(),
            capabilities = completed.capabilities_invoked.len(),
            total_tokens = usage.total_tokens,
            context_utilization = usage.context_utilization,
            duration_ms,
            "turn completed"
        );

        Ok(AssistantResponse {
            success: true,
            status,
            message: completed.content,
            conversation_id: conversation_id.clone(),
            capabilities_invoked: completed.capabilities_invoked,
            analysis,
            suggestions,
            usage: Some(usage),
            duration_ms,
            error_category: None,
        })
    }
}
