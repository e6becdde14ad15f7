//! Follow-on suggestions
//!
//! Deterministic recommendations for the next step of a platform workflow,
//! derived from the capabilities a conversation has already used.

mod engine;
mod types;

pub use engine::SuggestionEngine;
pub use types::*;

/// Maximum suggestions returned for one turn
pub const DEFAULT_MAX_SUGGESTIONS: usize = 3;

/// Follow-ons contributed by a single matching rule
pub const MAX_PER_RULE: usize = 2;
