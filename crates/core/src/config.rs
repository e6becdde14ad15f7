use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::conversation::MAX_HISTORY_MESSAGES;
use crate::history::HistoryOptions;
use crate::missing_info::MAX_MISSING_FIELDS;
use crate::store::StoreSettings;

pub const DEFAULT_CONFIG_FILE: &str = "helmsman.toml";
pub const NESTED_CONFIG_FILE: &str = "config/helmsman.toml";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Helmsman, a platform engineering assistant. \
Help users provision infrastructure, scan for compliance issues, and analyse cloud costs. \
Use the available tools when they fit the request, and ask for missing details instead of guessing.";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub conversation: ConversationConfig,
    pub followup: FollowUpConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    /// Azure OpenAI `api-version` query parameter.
    pub api_version: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
    pub max_dispatch_rounds: u32,
    pub metadata_format: MetadataFormat,
    pub input_cost_per_1k: Option<f64>,
    pub output_cost_per_1k: Option<f64>,
    /// Overrides the context window looked up from the model name.
    pub context_window: Option<usize>,
    pub retry: RetryConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ConversationConfig {
    pub history_max_tokens: usize,
    pub history_reserved_tokens: usize,
    pub history_min_messages: usize,
    pub include_system_messages: bool,
    pub max_messages: usize,
    pub idle_ttl_secs: u64,
    pub max_conversations: usize,
    pub system_prompt: String,
    pub retrieval_enabled: bool,
}

#[derive(Clone, Debug)]
pub struct FollowUpConfig {
    pub enabled: bool,
    pub max_fields: usize,
    pub max_question_chars: usize,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
    pub extra_trigger_phrases: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "azure_openai")]
    AzureOpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::AzureOpenAi => "azure_openai",
            Self::Ollama => "ollama",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::OpenAi | Self::AzureOpenAi)
    }
}

/// Shape of completion metadata expected from the provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataFormat {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Tolerant,
}

impl MetadataFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Tolerant => "tolerant",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_max_retries: Option<u32>,
    pub llm_retry_base_delay_ms: Option<u64>,
    pub followup_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                api_version: None,
                temperature: 0.2,
                max_output_tokens: 1_024,
                timeout_secs: 60,
                max_dispatch_rounds: 5,
                metadata_format: MetadataFormat::Tolerant,
                input_cost_per_1k: None,
                output_cost_per_1k: None,
                context_window: None,
                retry: RetryConfig { max_retries: 3, base_delay_ms: 10_000 },
            },
            conversation: ConversationConfig {
                history_max_tokens: 4_000,
                history_reserved_tokens: 1_000,
                history_min_messages: 1,
                include_system_messages: false,
                max_messages: MAX_HISTORY_MESSAGES,
                idle_ttl_secs: 3_600,
                max_conversations: 10_000,
                system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
                retrieval_enabled: true,
            },
            followup: FollowUpConfig {
                enabled: true,
                max_fields: MAX_MISSING_FIELDS,
                max_question_chars: 300,
                max_output_tokens: 150,
                timeout_secs: 10,
                extra_trigger_phrases: Vec::new(),
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "azure_openai" | "azure" => Ok(Self::AzureOpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|azure_openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for MetadataFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "tolerant" => Ok(Self::Tolerant),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm metadata format `{other}` (expected openai|anthropic|tolerant)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_ref().is_some_and(|key| !key.expose_secret().trim().is_empty())
    }
}

impl ConversationConfig {
    pub fn history_options(&self) -> HistoryOptions {
        HistoryOptions {
            max_tokens: self.history_max_tokens,
            reserved_tokens: self.history_reserved_tokens,
            minimum_messages: self.history_min_messages,
            include_system_messages: self.include_system_messages,
        }
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            max_messages: self.max_messages,
            idle_ttl: Duration::from_secs(self.idle_ttl_secs),
            max_conversations: self.max_conversations,
        }
    }
}

impl FollowUpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(api_version) = llm.api_version {
                self.llm.api_version = Some(api_version);
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(max_output_tokens) = llm.max_output_tokens {
                self.llm.max_output_tokens = max_output_tokens;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_dispatch_rounds) = llm.max_dispatch_rounds {
                self.llm.max_dispatch_rounds = max_dispatch_rounds;
            }
            if let Some(metadata_format) = llm.metadata_format {
                self.llm.metadata_format = metadata_format;
            }
            if let Some(input_cost_per_1k) = llm.input_cost_per_1k {
                self.llm.input_cost_per_1k = Some(input_cost_per_1k);
            }
            if let Some(output_cost_per_1k) = llm.output_cost_per_1k {
                self.llm.output_cost_per_1k = Some(output_cost_per_1k);
            }
            if let Some(context_window) = llm.context_window {
                self.llm.context_window = Some(context_window);
            }
            if let Some(retry) = llm.retry {
                if let Some(max_retries) = retry.max_retries {
                    self.llm.retry.max_retries = max_retries;
                }
                if let Some(base_delay_ms) = retry.base_delay_ms {
                    self.llm.retry.base_delay_ms = base_delay_ms;
                }
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(history_max_tokens) = conversation.history_max_tokens {
                self.conversation.history_max_tokens = history_max_tokens;
            }
            if let Some(history_reserved_tokens) = conversation.history_reserved_tokens {
                self.conversation.history_reserved_tokens = history_reserved_tokens;
            }
            if let Some(history_min_messages) = conversation.history_min_messages {
                self.conversation.history_min_messages = history_min_messages;
            }
            if let Some(include_system_messages) = conversation.include_system_messages {
                self.conversation.include_system_messages = include_system_messages;
            }
            if let Some(max_messages) = conversation.max_messages {
                self.conversation.max_messages = max_messages;
            }
            if let Some(idle_ttl_secs) = conversation.idle_ttl_secs {
                self.conversation.idle_ttl_secs = idle_ttl_secs;
            }
            if let Some(max_conversations) = conversation.max_conversations {
                self.conversation.max_conversations = max_conversations;
            }
            if let Some(system_prompt) = conversation.system_prompt {
                self.conversation.system_prompt = system_prompt;
            }
            if let Some(retrieval_enabled) = conversation.retrieval_enabled {
                self.conversation.retrieval_enabled = retrieval_enabled;
            }
        }

        if let Some(followup) = patch.followup {
            if let Some(enabled) = followup.enabled {
                self.followup.enabled = enabled;
            }
            if let Some(max_fields) = followup.max_fields {
                self.followup.max_fields = max_fields;
            }
            if let Some(max_question_chars) = followup.max_question_chars {
                self.followup.max_question_chars = max_question_chars;
            }
            if let Some(max_output_tokens) = followup.max_output_tokens {
                self.followup.max_output_tokens = max_output_tokens;
            }
            if let Some(timeout_secs) = followup.timeout_secs {
                self.followup.timeout_secs = timeout_secs;
            }
            if let Some(extra_trigger_phrases) = followup.extra_trigger_phrases {
                self.followup.extra_trigger_phrases = extra_trigger_phrases;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("HELMSMAN_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("HELMSMAN_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("HELMSMAN_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("HELMSMAN_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("HELMSMAN_LLM_API_VERSION") {
            self.llm.api_version = Some(value);
        }
        if let Some(value) = read_env("HELMSMAN_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("HELMSMAN_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("HELMSMAN_LLM_MAX_OUTPUT_TOKENS") {
            self.llm.max_output_tokens = parse_u32("HELMSMAN_LLM_MAX_OUTPUT_TOKENS", &value)?;
        }
        if let Some(value) = read_env("HELMSMAN_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("HELMSMAN_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("HELMSMAN_LLM_METADATA_FORMAT") {
            self.llm.metadata_format = value.parse()?;
        }
        if let Some(value) = read_env("HELMSMAN_LLM_MAX_RETRIES") {
            self.llm.retry.max_retries = parse_u32("HELMSMAN_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("HELMSMAN_LLM_RETRY_BASE_DELAY_MS") {
            self.llm.retry.base_delay_ms = parse_u64("HELMSMAN_LLM_RETRY_BASE_DELAY_MS", &value)?;
        }

        if let Some(value) = read_env("HELMSMAN_CONVERSATION_HISTORY_MAX_TOKENS") {
            self.conversation.history_max_tokens =
                parse_usize("HELMSMAN_CONVERSATION_HISTORY_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("HELMSMAN_CONVERSATION_IDLE_TTL_SECS") {
            self.conversation.idle_ttl_secs =
                parse_u64("HELMSMAN_CONVERSATION_IDLE_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("HELMSMAN_CONVERSATION_SYSTEM_PROMPT") {
            self.conversation.system_prompt = value;
        }

        if let Some(value) = read_env("HELMSMAN_FOLLOWUP_ENABLED") {
            self.followup.enabled = parse_bool("HELMSMAN_FOLLOWUP_ENABLED", &value)?;
        }

        let log_level =
            read_env("HELMSMAN_LOGGING_LEVEL").or_else(|| read_env("HELMSMAN_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("HELMSMAN_LOGGING_FORMAT").or_else(|| read_env("HELMSMAN_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(max_retries) = overrides.llm_max_retries {
            self.llm.retry.max_retries = max_retries;
        }
        if let Some(base_delay_ms) = overrides.llm_retry_base_delay_ms {
            self.llm.retry.base_delay_ms = base_delay_ms;
        }
        if let Some(enabled) = overrides.followup_enabled {
            self.followup.enabled = enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_conversation(&self.conversation)?;
        validate_followup(&self.followup)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from(NESTED_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if llm.max_output_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_output_tokens must be greater than zero".to_string(),
        ));
    }

    if llm.max_dispatch_rounds == 0 || llm.max_dispatch_rounds > 20 {
        return Err(ConfigError::Validation(
            "llm.max_dispatch_rounds must be in range 1..=20".to_string(),
        ));
    }

    if llm.retry.max_retries > 10 {
        return Err(ConfigError::Validation(
            "llm.retry.max_retries must be at most 10".to_string(),
        ));
    }

    let negative_price = [llm.input_cost_per_1k, llm.output_cost_per_1k]
        .into_iter()
        .flatten()
        .any(|price| price < 0.0);
    if negative_price {
        return Err(ConfigError::Validation(
            "llm.input_cost_per_1k and llm.output_cost_per_1k must not be negative".to_string(),
        ));
    }

    if llm.provider.requires_api_key() && !llm.has_api_key() {
        return Err(ConfigError::Validation(
            "llm.api_key is required for openai/azure_openai providers. \
             Set HELMSMAN_LLM_API_KEY or llm.api_key in helmsman.toml"
                .to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi => {}
        LlmProvider::AzureOpenAi => {
            if !has_text(llm.base_url.as_deref()) {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for azure_openai provider \
                     (e.g. https://<resource>.openai.azure.com)"
                        .to_string(),
                ));
            }
            if !has_text(llm.api_version.as_deref()) {
                return Err(ConfigError::Validation(
                    "llm.api_version is required for azure_openai provider (e.g. 2024-06-01)"
                        .to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            if !has_text(llm.base_url.as_deref()) {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if conversation.history_reserved_tokens >= conversation.history_max_tokens {
        return Err(ConfigError::Validation(
            "conversation.history_reserved_tokens must be lower than conversation.history_max_tokens"
                .to_string(),
        ));
    }

    if conversation.max_messages == 0 || conversation.max_messages > MAX_HISTORY_MESSAGES {
        return Err(ConfigError::Validation(format!(
            "conversation.max_messages must be in range 1..={MAX_HISTORY_MESSAGES}"
        )));
    }

    if conversation.idle_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "conversation.idle_ttl_secs must be greater than zero".to_string(),
        ));
    }

    if conversation.max_conversations == 0 {
        return Err(ConfigError::Validation(
            "conversation.max_conversations must be greater than zero".to_string(),
        ));
    }

    if conversation.system_prompt.trim().is_empty() {
        return Err(ConfigError::Validation(
            "conversation.system_prompt must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_followup(followup: &FollowUpConfig) -> Result<(), ConfigError> {
    if followup.max_fields == 0 || followup.max_fields > MAX_MISSING_FIELDS {
        return Err(ConfigError::Validation(format!(
            "followup.max_fields must be in range 1..={MAX_MISSING_FIELDS}"
        )));
    }

    if followup.max_question_chars < 20 {
        return Err(ConfigError::Validation(
            "followup.max_question_chars must be at least 20".to_string(),
        ));
    }

    if followup.max_output_tokens == 0 {
        return Err(ConfigError::Validation(
            "followup.max_output_tokens must be greater than zero".to_string(),
        ));
    }

    if followup.timeout_secs == 0 || followup.timeout_secs > 60 {
        return Err(ConfigError::Validation(
            "followup.timeout_secs must be in range 1..=60".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn has_text(value: Option<&str>) -> bool {
    value.is_some_and(|value| !value.trim().is_empty())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_env(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid_env(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid_env(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid_env(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.trim().parse::<f32>().map_err(|_| invalid_env(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().parse::<bool>().map_err(|_| invalid_env(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    conversation: Option<ConversationPatch>,
    followup: Option<FollowUpPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    api_version: Option<String>,
    temperature: Option<f32>,
    max_output_tokens: Option<u32>,
    timeout_secs: Option<u64>,
    max_dispatch_rounds: Option<u32>,
    metadata_format: Option<MetadataFormat>,
    input_cost_per_1k: Option<f64>,
    output_cost_per_1k: Option<f64>,
    context_window: Option<usize>,
    retry: Option<RetryPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct RetryPatch {
    max_retries: Option<u32>,
    base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    history_max_tokens: Option<usize>,
    history_reserved_tokens: Option<usize>,
    history_min_messages: Option<usize>,
    include_system_messages: Option<bool>,
    max_messages: Option<usize>,
    idle_ttl_secs: Option<u64>,
    max_conversations: Option<usize>,
    system_prompt: Option<String>,
    retrieval_enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct FollowUpPatch {
    enabled: Option<bool>,
    max_fields: Option<usize>,
    max_question_chars: Option<usize>,
    max_output_tokens: Option<u32>,
    timeout_secs: Option<u64>,
    extra_trigger_phrases: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
