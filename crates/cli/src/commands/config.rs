use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use helmsman_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_FILE, NESTED_CONFIG_FILE};
use toml::Value;

/// One reported setting: dotted key, rendered value, env vars that can set it.
struct ConfigField {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

fn field(key: &'static str, value: impl ToString, env_keys: &'static [&'static str]) -> ConfigField {
    ConfigField { key, value: value.to_string(), env_keys }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<ConfigField> {
    let llm = &config.llm;
    let conversation = &config.conversation;
    let followup = &config.followup;

    vec![
        field("llm.provider", llm.provider.as_str(), &["HELMSMAN_LLM_PROVIDER"]),
        field("llm.model", &llm.model, &["HELMSMAN_LLM_MODEL"]),
        field("llm.base_url", llm.base_url.as_deref().unwrap_or("<unset>"), &["HELMSMAN_LLM_BASE_URL"]),
        field("llm.api_key", redact_secret(llm.has_api_key()), &["HELMSMAN_LLM_API_KEY"]),
        field(
            "llm.api_version",
            llm.api_version.as_deref().unwrap_or("<unset>"),
            &["HELMSMAN_LLM_API_VERSION"],
        ),
        field("llm.temperature", llm.temperature, &["HELMSMAN_LLM_TEMPERATURE"]),
        field("llm.max_output_tokens", llm.max_output_tokens, &["HELMSMAN_LLM_MAX_OUTPUT_TOKENS"]),
        field("llm.timeout_secs", llm.timeout_secs, &["HELMSMAN_LLM_TIMEOUT_SECS"]),
        field("llm.max_dispatch_rounds", llm.max_dispatch_rounds, &[]),
        field("llm.metadata_format", llm.metadata_format.as_str(), &["HELMSMAN_LLM_METADATA_FORMAT"]),
        field("llm.retry.max_retries", llm.retry.max_retries, &["HELMSMAN_LLM_MAX_RETRIES"]),
        field(
            "llm.retry.base_delay_ms",
            llm.retry.base_delay_ms,
            &["HELMSMAN_LLM_RETRY_BASE_DELAY_MS"],
        ),
        field("llm.input_cost_per_1k", optional(llm.input_cost_per_1k), &[]),
        field("llm.output_cost_per_1k", optional(llm.output_cost_per_1k), &[]),
        field(
            "conversation.history_max_tokens",
            conversation.history_max_tokens,
            &["HELMSMAN_CONVERSATION_HISTORY_MAX_TOKENS"],
        ),
        field("conversation.history_reserved_tokens", conversation.history_reserved_tokens, &[]),
        field("conversation.max_messages", conversation.max_messages, &[]),
        field(
            "conversation.idle_ttl_secs",
            conversation.idle_ttl_secs,
            &["HELMSMAN_CONVERSATION_IDLE_TTL_SECS"],
        ),
        field("conversation.max_conversations", conversation.max_conversations, &[]),
        field(
            "conversation.system_prompt",
            format!("<{} chars>", conversation.system_prompt.chars().count()),
            &["HELMSMAN_CONVERSATION_SYSTEM_PROMPT"],
        ),
        field("conversation.retrieval_enabled", conversation.retrieval_enabled, &[]),
        field("followup.enabled", followup.enabled, &["HELMSMAN_FOLLOWUP_ENABLED"]),
        field("followup.max_fields", followup.max_fields, &[]),
        field("followup.timeout_secs", followup.timeout_secs, &[]),
        field("logging.level", &config.logging.level, &["HELMSMAN_LOGGING_LEVEL", "HELMSMAN_LOG_LEVEL"]),
        field(
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["HELMSMAN_LOGGING_FORMAT", "HELMSMAN_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from(NESTED_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(present: bool) -> &'static str {
    if present {
        "<redacted>"
    } else {
        "<unset>"
    }
}

fn optional(value: Option<f64>) -> String {
    value.map(|value| value.to_string()).unwrap_or_else(|| "<unset>".to_string())
}
