use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use helmsman_agent::llm::{ChatTurn, CompletionProvider, CompletionSettings, DispatchMode};
use helmsman_agent::openai::OpenAiCompatibleProvider;
use helmsman_agent::tools::{Capability, CapabilityRegistry};
use helmsman_core::config::{AppConfig, LlmConfig, LlmProvider, RetryConfig};
use helmsman_core::{CapabilityDefinition, CapabilityParameter, ProviderError};
use secrecy::SecretString;
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

struct EstimateCost;

#[async_trait]
impl Capability for EstimateCost {
    fn definition(&self) -> CapabilityDefinition {
        CapabilityDefinition::new("estimate_cost", "Estimate the monthly cost of a resource group")
            .with_parameter(CapabilityParameter::required("resource_group", "string", "Resource group"))
    }

    async fn invoke(&self, arguments: Value) -> Result<Value> {
        Ok(json!({ "resource_group": arguments["resource_group"], "monthly_usd": 312.4 }))
    }
}

/// Side-effecting capability that counts how often it actually ran.
#[derive(Clone, Default)]
struct ProvisionCluster {
    invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl Capability for ProvisionCluster {
    fn definition(&self) -> CapabilityDefinition {
        CapabilityDefinition::new("provision_cluster", "Provision a Kubernetes cluster")
            .with_parameter(CapabilityParameter::required("name", "string", "Cluster name"))
    }

    async fn invoke(&self, arguments: Value) -> Result<Value> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "cluster": arguments["name"], "state": "created" }))
    }
}

fn openai_config(base_url: String) -> LlmConfig {
    let mut llm = AppConfig::default().llm;
    llm.provider = LlmProvider::OpenAi;
    llm.base_url = Some(base_url);
    llm.api_key = Some(SecretString::from("test-key".to_string()));
    llm.model = "gpt-4o".to_string();
    llm
}

fn settings(dispatch_mode: DispatchMode) -> CompletionSettings {
    CompletionSettings {
        model: "gpt-4o".to_string(),
        temperature: 0.2,
        max_output_tokens: 512,
        dispatch_mode,
    }
}

fn history() -> Vec<ChatTurn> {
    vec![ChatTurn::system("You are a platform assistant."), ChatTurn::user("What does rg-prod cost?")]
}

fn text_reply(content: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 40, "completion_tokens": 12, "total_tokens": 52 }
    })
}

fn tool_call_reply(name: &str, arguments: &str) -> Value {
    json!({
        "id": "chatcmpl-2",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": { "name": name, "arguments": arguments }
                }]
            },
            "finish_reason": "tool_calls"
        }],
        "usage": { "prompt_tokens": 30, "completion_tokens": 8, "total_tokens": 38 }
    })
}

#[tokio::test]
async fn plain_completion_returns_text_and_usage() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("Hello there!")))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiCompatibleProvider::from_config(&openai_config(server.uri()))?;
    let response = provider
        .complete(&history(), &settings(DispatchMode::Auto), &CapabilityRegistry::new())
        .await?;

    assert_eq!(response.content, "Hello there!");
    assert_eq!(response.metadata, Value::Null);
    assert_eq!(response.usage.map(|usage| usage.completion_tokens), Some(12));
    Ok(())
}

#[tokio::test]
async fn auto_dispatch_runs_capabilities_and_records_calls() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(tool_call_reply("estimate_cost", r#"{"resource_group":"rg-prod"}"#)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains(r#""role":"tool""#))
        .and(body_string_contains("312.4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("rg-prod costs about $312/month.")))
        .expect(1)
        .mount(&server)
        .await;

    let mut registry = CapabilityRegistry::new();
    registry.register(EstimateCost);
    let provider = OpenAiCompatibleProvider::from_config(&openai_config(server.uri()))?;

    let response = provider.complete(&history(), &settings(DispatchMode::Auto), &registry).await?;

    assert_eq!(response.content, "rg-prod costs about $312/month.");
    assert_eq!(response.metadata["tool_calls"][0]["function"]["name"], "estimate_cost");
    assert_eq!(response.usage.map(|usage| usage.completion_tokens), Some(20));
    Ok(())
}

#[tokio::test]
async fn unknown_capability_is_reported_back_to_the_model() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tool_call_reply("delete_everything", "{}")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("unknown capability"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("I can't do that.")))
        .expect(1)
        .mount(&server)
        .await;

    let mut registry = CapabilityRegistry::new();
    registry.register(EstimateCost);
    let provider = OpenAiCompatibleProvider::from_config(&openai_config(server.uri()))?;

    let response = provider.complete(&history(), &settings(DispatchMode::Auto), &registry).await?;
    assert_eq!(response.content, "I can't do that.");
    Ok(())
}

#[tokio::test]
async fn dispatch_mode_none_never_sends_tools() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(|request: &Request| !String::from_utf8_lossy(&request.body).contains("\"tools\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("Which region?")))
        .expect(1)
        .mount(&server)
        .await;

    let mut registry = CapabilityRegistry::new();
    registry.register(EstimateCost);
    let provider = OpenAiCompatibleProvider::from_config(&openai_config(server.uri()))?;

    let response = provider.complete(&history(), &settings(DispatchMode::None), &registry).await?;
    assert_eq!(response.content, "Which region?");
    Ok(())
}

#[tokio::test]
async fn rate_limit_carries_retry_after() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "7")
                .set_body_string("slow down"),
        )
        .mount(&server)
        .await;

    let provider = OpenAiCompatibleProvider::from_config(&openai_config(server.uri()))?;
    let result =
        provider.complete(&history(), &settings(DispatchMode::Auto), &CapabilityRegistry::new()).await;

    assert_eq!(result.err(), Some(ProviderError::RateLimited { retry_after_secs: Some(7) }));
    Ok(())
}

#[tokio::test]
async fn rejected_credentials_are_misconfiguration() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let provider = OpenAiCompatibleProvider::from_config(&openai_config(server.uri()))?;
    let result =
        provider.complete(&history(), &settings(DispatchMode::Auto), &CapabilityRegistry::new()).await;

    assert!(matches!(result, Err(ProviderError::Misconfigured(message)) if message.contains("invalid api key")));
    Ok(())
}

#[tokio::test]
async fn malformed_body_is_unexpected_response() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let provider = OpenAiCompatibleProvider::from_config(&openai_config(server.uri()))?;
    let result =
        provider.complete(&history(), &settings(DispatchMode::Auto), &CapabilityRegistry::new()).await;

    assert!(matches!(result, Err(ProviderError::UnexpectedResponse(_))));
    Ok(())
}

#[tokio::test]
async fn azure_uses_deployment_path_and_api_key_header() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/deployments/gpt-4o/chat/completions"))
        .and(query_param("api-version", "2024-06-01"))
        .and(header("api-key", "azure-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("from azure")))
        .expect(1)
        .mount(&server)
        .await;

    let mut llm = openai_config(server.uri());
    llm.provider = LlmProvider::AzureOpenAi;
    llm.api_key = Some(SecretString::from("azure-key".to_string()));
    llm.api_version = Some("2024-06-01".to_string());
    let provider = OpenAiCompatibleProvider::from_config(&llm)?;

    let response = provider
        .complete(&history(), &settings(DispatchMode::Auto), &CapabilityRegistry::new())
        .await?;
    assert_eq!(response.content, "from azure");
    assert_eq!(provider.provider_id(), "azure_openai");
    Ok(())
}

#[tokio::test]
async fn ollama_needs_no_api_key() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("local answer")))
        .expect(1)
        .mount(&server)
        .await;

    let mut llm = AppConfig::default().llm;
    llm.base_url = Some(server.uri());
    let provider = OpenAiCompatibleProvider::from_config(&llm)?;

    let response = provider
        .complete(&history(), &settings(DispatchMode::Auto), &CapabilityRegistry::new())
        .await?;
    assert_eq!(response.content, "local answer");
    Ok(())
}

#[tokio::test]
async fn rate_limit_after_dispatch_retries_the_round_without_rerunning_capabilities() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(tool_call_reply("provision_cluster", r#"{"name":"aks-prod"}"#)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains(r#""role":"tool""#))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("created")))
        .expect(1)
        .mount(&server)
        .await;

    let capability = ProvisionCluster::default();
    let mut registry = CapabilityRegistry::new();
    registry.register(capability.clone());
    let mut llm = openai_config(server.uri());
    llm.retry = RetryConfig { max_retries: 3, base_delay_ms: 10 };
    let provider = OpenAiCompatibleProvider::from_config(&llm)?;

    let response = provider.complete(&history(), &settings(DispatchMode::Auto), &registry).await?;

    assert_eq!(response.content, "created");
    assert_eq!(capability.invocations.load(Ordering::SeqCst), 1);
    assert_eq!(response.metadata["tool_calls"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn persistent_failure_after_dispatch_is_not_retryable() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(tool_call_reply("provision_cluster", r#"{"name":"aks-prod"}"#)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .expect(2)
        .mount(&server)
        .await;

    let capability = ProvisionCluster::default();
    let mut registry = CapabilityRegistry::new();
    registry.register(capability.clone());
    let mut llm = openai_config(server.uri());
    llm.retry = RetryConfig { max_retries: 1, base_delay_ms: 10 };
    let provider = OpenAiCompatibleProvider::from_config(&llm)?;

    let result = provider.complete(&history(), &settings(DispatchMode::Auto), &registry).await;

    let error = result.err();
    assert!(matches!(
        &error,
        Some(ProviderError::DispatchInterrupted { capabilities_run: 1, cause })
            if matches!(**cause, ProviderError::RateLimited { .. })
    ));
    assert!(error.is_some_and(|error| !error.is_retryable()));
    assert_eq!(capability.invocations.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn missing_api_key_is_rejected_up_front() {
    let mut llm = openai_config("http://127.0.0.1:9".to_string());
    llm.api_key = None;
    assert!(matches!(
        OpenAiCompatibleProvider::from_config(&llm),
        Err(ProviderError::Misconfigured(_))
    ));
}
