use serde::{Deserialize, Serialize};

/// Percentage of the raw prompt segments added for structural formatting.
pub const FORMATTING_OVERHEAD_PERCENT: usize = 5;

/// Raw per-component prompt counts, measured independently.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PromptComponents {
    pub system_prompt: usize,
    pub rag_context: usize,
    pub history: usize,
    pub user_prompt: usize,
}

impl PromptComponents {
    pub fn raw_total(&self) -> usize {
        self.system_prompt + self.rag_context + self.history + self.user_prompt
    }
}

/// Fraction of the prompt each contributor is responsible for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentShares {
    pub system_prompt: f64,
    pub rag_context: f64,
    pub history: f64,
    pub user_prompt: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsageMetrics {
    pub model: String,
    pub system_prompt_tokens: usize,
    pub rag_context_tokens: usize,
    pub history_tokens: usize,
    pub user_prompt_tokens: usize,
    pub formatting_overhead_tokens: usize,
    pub total_prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
    pub max_context_window: usize,
    /// `total_tokens / max_context_window`, zero when the window is unknown.
    pub context_utilization: f64,
    pub estimated_cost_usd: Option<f64>,
}

impl TokenUsageMetrics {
    pub fn from_components(
        model: impl Into<String>,
        components: PromptComponents,
        max_context_window: usize,
    ) -> Self {
        let raw_total = components.raw_total();
        let formatting_overhead_tokens = formatting_overhead(raw_total);
        let total_prompt_tokens = raw_total + formatting_overhead_tokens;

        let mut metrics = Self {
            model: model.into(),
            system_prompt_tokens: components.system_prompt,
            rag_context_tokens: components.rag_context,
            history_tokens: components.history,
            user_prompt_tokens: components.user_prompt,
            formatting_overhead_tokens,
            total_prompt_tokens,
            completion_tokens: 0,
            total_tokens: total_prompt_tokens,
            max_context_window,
            context_utilization: 0.0,
            estimated_cost_usd: None,
        };
        metrics.refresh_utilization();
        metrics
    }

    pub fn record_completion(&mut self, completion_tokens: usize) {
        self.completion_tokens = completion_tokens;
        self.total_tokens = self.total_prompt_tokens + completion_tokens;
        self.refresh_utilization();
    }

    pub fn apply_pricing(&mut self, input_cost_per_1k: Option<f64>, output_cost_per_1k: Option<f64>) {
        if input_cost_per_1k.is_none() && output_cost_per_1k.is_none() {
            self.estimated_cost_usd = None;
            return;
        }
        let input = input_cost_per_1k.unwrap_or(0.0) * self.total_prompt_tokens as f64 / 1000.0;
        let output = output_cost_per_1k.unwrap_or(0.0) * self.completion_tokens as f64 / 1000.0;
        self.estimated_cost_usd = Some(input + output);
    }

    pub fn component_shares(&self) -> ComponentShares {
        if self.total_prompt_tokens == 0 {
            return ComponentShares::default();
        }
        let total = self.total_prompt_tokens as f64;
        ComponentShares {
            system_prompt: self.system_prompt_tokens as f64 / total,
            rag_context: self.rag_context_tokens as f64 / total,
            history: self.history_tokens as f64 / total,
            user_prompt: self.user_prompt_tokens as f64 / total,
        }
    }

    fn refresh_utilization(&mut self) {
        self.context_utilization = if self.max_context_window == 0 {
            0.0
        } else {
            self.total_tokens as f64 / self.max_context_window as f64
        };
    }
}

/// Overhead allowance for `raw_total` prompt tokens, rounded up.
pub fn formatting_overhead(raw_total: usize) -> usize {
    (raw_total * FORMATTING_OVERHEAD_PERCENT).div_ceil(100)
}
