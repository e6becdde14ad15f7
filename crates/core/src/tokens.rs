//! Token counting
//!
//! The orchestration core consumes token counts through the [`TokenCounter`]
//! trait. Two implementations ship with the crate:
//! - [`HeuristicTokenCounter`]: ~4 characters per token, no model data needed
//! - [`TiktokenCounter`]: BPE counting via `tiktoken-rs`

use thiserror::Error;
use tiktoken_rs::CoreBPE;

/// Context window assumed for models missing from [`KNOWN_CONTEXT_WINDOWS`].
pub const DEFAULT_CONTEXT_WINDOW: usize = 8_192;

/// Model name prefixes and their context windows. Longer prefixes win.
pub const KNOWN_CONTEXT_WINDOWS: &[(&str, usize)] = &[
    ("gpt-4o-mini", 128_000),
    ("gpt-4o", 128_000),
    ("gpt-4.1", 1_047_576),
    ("gpt-4-turbo", 128_000),
    ("gpt-4-32k", 32_768),
    ("gpt-4", 8_192),
    ("gpt-35-turbo-16k", 16_384),
    ("gpt-35-turbo", 16_385),
    ("gpt-3.5-turbo", 16_385),
    ("o1", 200_000),
    ("o3", 200_000),
    ("claude", 200_000),
    ("llama3.1", 131_072),
    ("llama3", 8_192),
    ("mistral", 32_768),
];

const CHARS_PER_TOKEN: usize = 4;

pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str, model: &str) -> usize;

    fn max_context_window(&self, model: &str) -> usize;
}

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("tokenizer model initialization failed: {0}")]
    ModelInit(String),
}

/// Resolves a model's context window from [`KNOWN_CONTEXT_WINDOWS`].
pub fn context_window_for(model: &str) -> usize {
    let normalized = model.trim().to_ascii_lowercase();
    KNOWN_CONTEXT_WINDOWS
        .iter()
        .filter(|(prefix, _)| normalized.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, window)| *window)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW)
}

#[derive(Clone, Debug, Default)]
pub struct HeuristicTokenCounter {
    context_window_override: Option<usize>,
}

impl HeuristicTokenCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context_window(mut self, window: Option<usize>) -> Self {
        self.context_window_override = window;
        self
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str, _model: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }

    fn max_context_window(&self, model: &str) -> usize {
        self.context_window_override.unwrap_or_else(|| context_window_for(model))
    }
}

pub struct TiktokenCounter {
    cl100k: CoreBPE,
    o200k: CoreBPE,
    context_window_override: Option<usize>,
}

impl TiktokenCounter {
    pub fn new() -> Result<Self, TokenizerError> {
        let cl100k = tiktoken_rs::cl100k_base()
            .map_err(|error| TokenizerError::ModelInit(format!("cl100k_base: {error}")))?;
        let o200k = tiktoken_rs::o200k_base()
            .map_err(|error| TokenizerError::ModelInit(format!("o200k_base: {error}")))?;
        Ok(Self { cl100k, o200k, context_window_override: None })
    }

    pub fn with_context_window(mut self, window: Option<usize>) -> Self {
        self.context_window_override = window;
        self
    }

    fn encoding_for(&self, model: &str) -> &CoreBPE {
        let normalized = model.trim().to_ascii_lowercase();
        let uses_o200k = ["gpt-4o", "gpt-4.1", "o1", "o3"]
            .iter()
            .any(|prefix| normalized.starts_with(prefix));
        if uses_o200k {
            &self.o200k
        } else {
            &self.cl100k
        }
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str, model: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.encoding_for(model).encode_with_special_tokens(text).len()
    }

    fn max_context_window(&self, model: &str) -> usize {
        self.context_window_override.unwrap_or_else(|| context_window_for(model))
    }
}

impl std::fmt::Debug for TiktokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenCounter")
            .field("context_window_override", &self.context_window_override)
            .finish_non_exhaustive()
    }
}
