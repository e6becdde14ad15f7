//! Chat-completions provider for OpenAI, Azure OpenAI and Ollama.
//!
//! All three speak the same wire format and differ only in endpoint layout
//! and authentication. With [`DispatchMode::Auto`] the provider runs the
//! capability loop itself and reports every call it made in the returned
//! metadata under `tool_calls`.

use std::time::Duration;

use async_trait::async_trait;
use helmsman_core::config::{LlmConfig, LlmProvider};
use helmsman_core::{CapabilityDefinition, ProviderError};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::time::Instant;

use crate::llm::{
    ChatRole, ChatTurn, CompletionProvider, CompletionResponse, CompletionSettings, DispatchMode,
    ProviderUsage,
};
use crate::invoker::RetryPolicy;
use crate::tools::CapabilityRegistry;

pub const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const OLLAMA_DEFAULT_BASE_URL: &str = "http://localhost:11434";

const ERROR_BODY_PREVIEW_CHARS: usize = 200;

pub struct OpenAiCompatibleProvider {
    client: Client,
    kind: LlmProvider,
    endpoint: String,
    api_key: Option<SecretString>,
    max_dispatch_rounds: u32,
    round_retry: RetryPolicy,
}

impl std::fmt::Debug for OpenAiCompatibleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleProvider")
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("max_dispatch_rounds", &self.max_dispatch_rounds)
            .field("round_retry", &self.round_retry)
            .finish()
    }
}

impl OpenAiCompatibleProvider {
    pub fn from_config(llm: &LlmConfig) -> Result<Self, ProviderError> {
        let endpoint = endpoint_for(llm)?;
        let client = Client::builder()
            .timeout(llm.timeout())
            .build()
            .map_err(|error| ProviderError::Misconfigured(format!("http client: {error}")))?;

        if llm.provider.requires_api_key() && !llm.has_api_key() {
            return Err(ProviderError::Misconfigured(format!(
                "provider `{}` requires an api key",
                llm.provider.as_str()
            )));
        }

        Ok(Self {
            client,
            kind: llm.provider,
            endpoint,
            api_key: llm.api_key.clone(),
            max_dispatch_rounds: llm.max_dispatch_rounds,
            round_retry: RetryPolicy::from(llm.retry),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<ChatResponse, ProviderError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        builder = match (self.kind, &self.api_key) {
            (LlmProvider::AzureOpenAi, Some(key)) => builder.header("api-key", key.expose_secret()),
            (_, Some(key)) => builder.bearer_auth(key.expose_secret()),
            (_, None) => builder,
        };

        let started = Instant::now();
        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                ProviderError::Timeout { elapsed_ms: started.elapsed().as_millis() as u64 }
            } else {
                ProviderError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after_secs, started.elapsed(), &body));
        }

        response.json::<ChatResponse>().await.map_err(|error| {
            ProviderError::UnexpectedResponse(format!("could not decode chat completion: {error}"))
        })
    }

    /// Sends a round that follows capability execution. Retryable failures
    /// are retried here with the messages built so far; anything that still
    /// fails becomes [`ProviderError::DispatchInterrupted`].
    async fn send_after_dispatch(
        &self,
        request: &ChatRequest<'_>,
        capabilities_run: usize,
    ) -> Result<ChatResponse, ProviderError> {
        let mut attempt: u32 = 1;
        loop {
            let error = match self.send(request).await {
                Ok(reply) => return Ok(reply),
                Err(error) => error,
            };

            if !error.is_retryable() || attempt > self.round_retry.max_retries {
                return Err(ProviderError::DispatchInterrupted {
                    capabilities_run,
                    cause: Box::new(error),
                });
            }

            let delay = self.round_retry.delay_for(attempt);
            tracing::warn!(
                event_name = "agent.dispatch.round_retrying",
                provider = self.kind.as_str(),
                error_class = error.category(),
                capabilities_run,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying follow-up round in place"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn dispatch(&self, capabilities: &CapabilityRegistry, call: &WireToolCall) -> String {
        let name = call.function.name.as_str();
        let Some(capability) = capabilities.get(name) else {
            tracing::warn!(
                event_name = "agent.capability.unknown",
                capability = name,
                "model requested an unknown capability"
            );
            return json!({ "error": format!("unknown capability `{name}`") }).to_string();
        };

        let arguments = match call.function.arguments.trim() {
            "" => Value::Object(Map::new()),
            raw => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
        };

        match capability.invoke(arguments).await {
            Ok(output) => {
                tracing::info!(
                    event_name = "agent.capability.invoked",
                    capability = name,
                    "capability invoked"
                );
                output.to_string()
            }
            Err(error) => {
                tracing::warn!(
                    event_name = "agent.capability.failed",
                    capability = name,
                    error = %error,
                    "capability failed, reporting error to the model"
                );
                json!({ "error": error.to_string() }).to_string()
            }
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleProvider {
    fn provider_id(&self) -> &str {
        self.kind.as_str()
    }

    fn bounds_requests(&self) -> bool {
        true
    }

    async fn complete(
        &self,
        history: &[ChatTurn],
        settings: &CompletionSettings,
        capabilities: &CapabilityRegistry,
    ) -> Result<CompletionResponse, ProviderError> {
        let offer_tools = settings.dispatch_mode == DispatchMode::Auto && !capabilities.is_empty();
        let tools: Vec<WireTool> = if offer_tools {
            capabilities.definitions().iter().map(WireTool::from_definition).collect()
        } else {
            Vec::new()
        };

        let mut messages = history.iter().map(WireMessage::from_turn).collect::<Vec<_>>();
        let mut performed: Vec<Value> = Vec::new();
        let mut usage = ProviderUsage::default();
        let mut round: u32 = 0;

        loop {
            // The last permitted round goes out without tools so the model has to answer.
            let tools_this_round = offer_tools && round < self.max_dispatch_rounds;
            let request = ChatRequest {
                model: &settings.model,
                messages: &messages,
                temperature: settings.temperature,
                max_tokens: settings.max_output_tokens,
                tools: if tools_this_round { &tools[..] } else { &[] },
            };
            let reply = if performed.is_empty() {
                self.send(&request).await?
            } else {
                self.send_after_dispatch(&request, performed.len()).await?
            };

            if let Some(reported) = reply.usage {
                usage.prompt_tokens += reported.prompt_tokens;
                usage.completion_tokens += reported.completion_tokens;
            }
            let message = reply.choices.into_iter().next().map(|choice| choice.message).ok_or_else(
                || ProviderError::UnexpectedResponse("chat completion had no choices".to_string()),
            )?;

            let calls = message.tool_calls.clone().unwrap_or_default();
            if !tools_this_round || calls.is_empty() {
                let metadata = if performed.is_empty() {
                    Value::Null
                } else {
                    json!({ "tool_calls": performed })
                };
                return Ok(CompletionResponse {
                    content: message.content.unwrap_or_default(),
                    metadata,
                    usage: Some(usage),
                });
            }

            round += 1;
            messages.push(message);
            for call in calls {
                let output = self.dispatch(capabilities, &call).await;
                performed.push(json!({
                    "id": call.id,
                    "type": "function",
                    "function": { "name": call.function.name, "arguments": call.function.arguments },
                }));
                messages.push(WireMessage::tool_result(call.id, output));
            }
        }
    }
}

pub fn endpoint_for(llm: &LlmConfig) -> Result<String, ProviderError> {
    let base = llm.base_url.as_deref().map(|url| url.trim().trim_end_matches('/'));
    match llm.provider {
        LlmProvider::OpenAi => {
            Ok(format!("{}/chat/completions", base.unwrap_or(OPENAI_DEFAULT_BASE_URL)))
        }
        LlmProvider::AzureOpenAi => {
            let base = base.ok_or_else(|| {
                ProviderError::Misconfigured("azure_openai requires llm.base_url".to_string())
            })?;
            let version = llm.api_version.as_deref().ok_or_else(|| {
                ProviderError::Misconfigured("azure_openai requires llm.api_version".to_string())
            })?;
            Ok(format!(
                "{base}/openai/deployments/{}/chat/completions?api-version={version}",
                llm.model
            ))
        }
        LlmProvider::Ollama => {
            Ok(format!("{}/v1/chat/completions", base.unwrap_or(OLLAMA_DEFAULT_BASE_URL)))
        }
    }
}

pub fn classify_status(
    status: StatusCode,
    retry_after_secs: Option<u64>,
    elapsed: Duration,
    body: &str,
) -> ProviderError {
    let preview = body.chars().take(ERROR_BODY_PREVIEW_CHARS).collect::<String>();
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited { retry_after_secs },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            ProviderError::Timeout { elapsed_ms: elapsed.as_millis() as u64 }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            ProviderError::Misconfigured(format!("{status}: {preview}"))
        }
        _ => ProviderError::Transport(format!("{status}: {preview}")),
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [WireTool],
}

fn no_tools(tools: &&[WireTool]) -> bool {
    tools.is_empty()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn from_turn(turn: &ChatTurn) -> Self {
        let role = match turn.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        Self {
            role: role.to_string(),
            content: Some(turn.content.clone()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn tool_result(tool_call_id: String, output: String) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(output),
            tool_calls: None,
            tool_call_id: Some(tool_call_id),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireToolFunction,
}

impl WireTool {
    fn from_definition(definition: &CapabilityDefinition) -> Self {
        Self {
            kind: "function",
            function: WireToolFunction {
                name: definition.name.clone(),
                description: definition.description.clone(),
                parameters: definition.parameters_schema(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct WireToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use helmsman_core::config::{AppConfig, LlmProvider};
    use helmsman_core::ProviderError;
    use reqwest::StatusCode;

    use super::{classify_status, endpoint_for};

    #[test]
    fn endpoints_follow_provider_layout() {
        let mut llm = AppConfig::default().llm;

        llm.provider = LlmProvider::Ollama;
        llm.base_url = Some("http://localhost:11434/".to_string());
        assert_eq!(endpoint_for(&llm), Ok("http://localhost:11434/v1/chat/completions".to_string()));

        llm.provider = LlmProvider::OpenAi;
        llm.base_url = None;
        assert_eq!(endpoint_for(&llm), Ok("https://api.openai.com/v1/chat/completions".to_string()));

        llm.provider = LlmProvider::AzureOpenAi;
        llm.base_url = Some("https://contoso.openai.azure.com".to_string());
        llm.model = "gpt-4o".to_string();
        llm.api_version = Some("2024-06-01".to_string());
        assert_eq!(
            endpoint_for(&llm),
            Ok("https://contoso.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-06-01"
                .to_string())
        );

        llm.api_version = None;
        assert!(matches!(endpoint_for(&llm), Err(ProviderError::Misconfigured(_))));
    }

    #[test]
    fn status_codes_map_to_error_classes() {
        let elapsed = Duration::from_millis(1_500);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(12), elapsed, ""),
            ProviderError::RateLimited { retry_after_secs: Some(12) }
        );
        assert_eq!(
            classify_status(StatusCode::GATEWAY_TIMEOUT, None, elapsed, ""),
            ProviderError::Timeout { elapsed_ms: 1_500 }
        );
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None, elapsed, "bad key"),
            ProviderError::Misconfigured(message) if message.contains("bad key")
        ));
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, None, elapsed, &"x".repeat(500)),
            ProviderError::Transport(message) if message.len() < 300
        ));
    }
}
