//! Token-budgeted conversation history windowing.
//!
//! Messages are admitted newest first using per-message estimates. The final
//! window is re-joined and re-counted, because separators and role labels are
//! not additive per message. The re-measured count is the one reported.

use serde::Serialize;

use crate::domain::conversation::{MessageRole, MessageSnapshot};
use crate::tokens::TokenCounter;

pub const MESSAGE_SEPARATOR: &str = "\n\n";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryOptions {
    pub max_tokens: usize,
    /// Held back for the system prompt and user message of the current turn.
    pub reserved_tokens: usize,
    /// Messages admitted even when they break the token ceiling.
    pub minimum_messages: usize,
    pub include_system_messages: bool,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4_000,
            reserved_tokens: 1_000,
            minimum_messages: 1,
            include_system_messages: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ChatHistoryResult {
    pub formatted_history: String,
    /// Re-measured count of `formatted_history`.
    pub token_count: usize,
    pub included_message_count: usize,
    pub truncated_message_count: usize,
    pub model: String,
    pub max_tokens: usize,
    pub included_messages: Vec<MessageSnapshot>,
}

impl ChatHistoryResult {
    pub fn empty(model: impl Into<String>, max_tokens: usize, truncated_message_count: usize) -> Self {
        Self {
            formatted_history: String::new(),
            token_count: 0,
            included_message_count: 0,
            truncated_message_count,
            model: model.into(),
            max_tokens,
            included_messages: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.included_message_count == 0
    }
}

pub fn format_message(message: &MessageSnapshot) -> String {
    format!("{}: {}", message.role().label(), message.content())
}

pub struct HistoryBuilder<'a> {
    counter: &'a dyn TokenCounter,
    model: &'a str,
}

impl<'a> HistoryBuilder<'a> {
    pub fn new(counter: &'a dyn TokenCounter, model: &'a str) -> Self {
        Self { counter, model }
    }

    pub fn build(&self, messages: &[MessageSnapshot], options: &HistoryOptions) -> ChatHistoryResult {
        let available = options.max_tokens.saturating_sub(options.reserved_tokens);
        if available == 0 {
            return ChatHistoryResult::empty(self.model, options.max_tokens, messages.len());
        }

        let candidates = messages
            .iter()
            .filter(|message| {
                options.include_system_messages || message.role() != MessageRole::System
            })
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            return ChatHistoryResult::empty(self.model, options.max_tokens, messages.len());
        }

        let separator_tokens = self.counter.count(MESSAGE_SEPARATOR, self.model);
        let mut window: Vec<&MessageSnapshot> = Vec::new();
        let mut estimated = 0usize;

        for message in candidates.iter().rev() {
            let mut cost = self.counter.count(&format_message(message), self.model);
            if !window.is_empty() {
                cost += separator_tokens;
            }

            let exceeds = estimated + cost > available;
            if exceeds && window.len() >= options.minimum_messages {
                break;
            }
            estimated += cost;
            window.push(message);
        }
        window.reverse();

        let (formatted_history, token_count) = self.measure(&mut window, available, options);
        let included_messages = window.into_iter().cloned().collect::<Vec<_>>();

        ChatHistoryResult {
            formatted_history,
            token_count,
            included_message_count: included_messages.len(),
            truncated_message_count: messages.len() - included_messages.len(),
            model: self.model.to_string(),
            max_tokens: options.max_tokens,
            included_messages,
        }
    }

    /// Joins the window and re-counts it. Estimates can under-count with
    /// tokenizers that merge across separators, so the oldest messages are
    /// dropped until the measured total fits or the floor is reached. With a
    /// zero floor the window may drain to empty.
    fn measure(
        &self,
        window: &mut Vec<&MessageSnapshot>,
        available: usize,
        options: &HistoryOptions,
    ) -> (String, usize) {
        loop {
            let formatted = window
                .iter()
                .map(|message| format_message(message))
                .collect::<Vec<_>>()
                .join(MESSAGE_SEPARATOR);
            let token_count =
                if formatted.is_empty() { 0 } else { self.counter.count(&formatted, self.model) };

            if token_count <= available || window.len() <= options.minimum_messages {
                return (formatted, token_count);
            }
            window.remove(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{Duration, Utc};

    use super::{format_message, HistoryBuilder, HistoryOptions};
    use crate::domain::conversation::{MessageRole, MessageSnapshot};
    use crate::tokens::{HeuristicTokenCounter, TokenCounter};

    const MODEL: &str = "gpt-4o";

    fn conversation(count: usize) -> Vec<MessageSnapshot> {
        let start = Utc::now() - Duration::minutes(count as i64);
        (0..count)
            .map(|index| {
                let role = if index % 2 == 0 { MessageRole::User } else { MessageRole::Assistant };
                MessageSnapshot::new(
                    role,
                    format!("message number {index:02} about the staging cluster"),
                    start + Duration::minutes(index as i64),
                    None,
                )
            })
            .collect()
    }

    fn options(max_tokens: usize, minimum_messages: usize) -> HistoryOptions {
        HistoryOptions {
            max_tokens,
            reserved_tokens: 0,
            minimum_messages,
            include_system_messages: false,
        }
    }

    #[test]
    fn empty_input_keeps_budget_visible() {
        let counter = HeuristicTokenCounter::new();
        let result = HistoryBuilder::new(&counter, MODEL).build(&[], &options(500, 1));

        assert!(result.is_empty());
        assert_eq!(result.token_count, 0);
        assert_eq!(result.max_tokens, 500);
        assert_eq!(result.model, MODEL);
    }

    #[test]
    fn exhausted_budget_returns_explicit_empty_result() {
        let counter = HeuristicTokenCounter::new();
        let messages = conversation(4);
        let opts = HistoryOptions { reserved_tokens: 600, ..options(500, 2) };

        let result = HistoryBuilder::new(&counter, MODEL).build(&messages, &opts);
        assert_eq!(result.included_message_count, 0);
        assert_eq!(result.truncated_message_count, 4);
        assert!(result.formatted_history.is_empty());
    }

    #[test]
    fn keeps_latest_messages_when_budget_allows_only_six() {
        let counter = HeuristicTokenCounter::new();
        let messages = conversation(25);
        let per_message = counter.count(&format_message(&messages[0]), MODEL);
        let separator = counter.count(super::MESSAGE_SEPARATOR, MODEL);
        let ceiling = per_message * 6 + separator * 5;

        let result = HistoryBuilder::new(&counter, MODEL).build(&messages, &options(ceiling, 1));

        assert_eq!(result.included_message_count, 6);
        assert_eq!(result.truncated_message_count, messages.len() - 6);
        assert_eq!(result.included_messages.first(), messages.get(19));
        assert_eq!(result.included_messages.last(), messages.last());
    }

    #[test]
    fn reported_count_is_remeasured_joined_string() {
        let counter = HeuristicTokenCounter::new();
        let messages = conversation(5);
        let result = HistoryBuilder::new(&counter, MODEL).build(&messages, &options(10_000, 1));

        assert_eq!(result.included_message_count, 5);
        assert_eq!(result.token_count, counter.count(&result.formatted_history, MODEL));
        assert!(result.formatted_history.starts_with("User: message number 00"));
    }

    #[test]
    fn measured_count_never_exceeds_ceiling_with_single_message_floor() {
        let counter = HeuristicTokenCounter::new();
        let messages = conversation(12);

        for ceiling in [15, 40, 75, 120, 200, 333, 1_000] {
            let result =
                HistoryBuilder::new(&counter, MODEL).build(&messages, &options(ceiling, 0));
            assert!(
                result.token_count <= ceiling,
                "ceiling {ceiling} exceeded: {}",
                result.token_count
            );

            let result =
                HistoryBuilder::new(&counter, MODEL).build(&messages, &options(ceiling, 1));
            let single_message_over = result.included_message_count == 1;
            assert!(result.token_count <= ceiling || single_message_over);
        }
    }

    /// Charges more on every call, so a re-count always exceeds the estimate.
    struct DriftingCounter {
        calls: AtomicUsize,
    }

    impl TokenCounter for DriftingCounter {
        fn count(&self, text: &str, _model: &str) -> usize {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            text.len() / 4 + call * 20
        }

        fn max_context_window(&self, _model: &str) -> usize {
            128_000
        }
    }

    #[test]
    fn zero_floor_drains_window_when_remeasure_overshoots() {
        let counter = DriftingCounter { calls: AtomicUsize::new(0) };
        let messages = conversation(2);

        let result = HistoryBuilder::new(&counter, MODEL).build(&messages, &options(60, 0));

        assert!(result.token_count <= 60, "measured {} over ceiling", result.token_count);
        assert_eq!(result.included_message_count, 0);
        assert_eq!(result.truncated_message_count, 2);
        assert!(result.formatted_history.is_empty());
    }

    #[test]
    fn oversized_single_message_is_still_included_with_floor() {
        let counter = HeuristicTokenCounter::new();
        let messages = vec![MessageSnapshot::user("x".repeat(4_000))];

        let result = HistoryBuilder::new(&counter, MODEL).build(&messages, &options(100, 1));
        assert_eq!(result.included_message_count, 1);
        assert!(result.token_count > 100);

        let result = HistoryBuilder::new(&counter, MODEL).build(&messages, &options(100, 0));
        assert_eq!(result.included_message_count, 0);
    }

    #[test]
    fn newer_messages_are_never_displaced_by_older_ones() {
        let counter = HeuristicTokenCounter::new();
        let all = conversation(16);

        for ceiling in [30, 90, 160, 400] {
            let builder = HistoryBuilder::new(&counter, MODEL);
            let older = &all[..10];
            let from_older = builder.build(older, &options(ceiling, 1));
            let from_all = builder.build(&all, &options(ceiling, 1));

            // Anything from the older prefix kept in the larger window was also kept alone.
            for message in from_all.included_messages.iter().filter(|m| older.contains(m)) {
                assert!(from_older.included_messages.contains(message));
            }
            // The window is always a suffix of the input.
            let kept = from_all.included_messages.len();
            assert_eq!(from_all.included_messages.as_slice(), &all[all.len() - kept..]);
        }
    }

    #[test]
    fn system_messages_are_skipped_unless_requested() {
        let counter = HeuristicTokenCounter::new();
        let messages = vec![
            MessageSnapshot::system("internal routing note"),
            MessageSnapshot::user("create a storage account"),
        ];

        let result = HistoryBuilder::new(&counter, MODEL).build(&messages, &options(1_000, 1));
        assert_eq!(result.included_message_count, 1);
        assert!(!result.formatted_history.contains("System:"));

        let with_system = HistoryOptions { include_system_messages: true, ..options(1_000, 1) };
        let result = HistoryBuilder::new(&counter, MODEL).build(&messages, &with_system);
        assert_eq!(result.included_message_count, 2);
        assert!(result.formatted_history.starts_with("System: internal routing note"));
    }
}
