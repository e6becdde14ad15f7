//! Suggestion Engine implementation

use std::collections::HashSet;

use super::types::*;
use super::{DEFAULT_MAX_SUGGESTIONS, MAX_PER_RULE};

#[derive(Debug, Clone, Copy)]
struct FollowOnSeed {
    title: &'static str,
    prompt: &'static str,
    priority: SuggestionPriority,
    category: SuggestionCategory,
}

#[derive(Debug, Clone, Copy)]
struct RuleSeed {
    /// Matched as substrings of capability names and user messages
    keywords: &'static [&'static str],
    follow_ons: &'static [FollowOnSeed],
}

const RULE_SEEDS: &[RuleSeed] = &[
    RuleSeed {
        keywords: &["provision", "infrastructure", "storage", "cluster", "create_resource"],
        follow_ons: &[
            FollowOnSeed {
                title: "Run a compliance scan",
                prompt: "Scan the new resources for compliance issues",
                priority: SuggestionPriority::High,
                category: SuggestionCategory::Compliance,
            },
            FollowOnSeed {
                title: "Estimate monthly cost",
                prompt: "Estimate the monthly cost of the resources I just created",
                priority: SuggestionPriority::Medium,
                category: SuggestionCategory::Cost,
            },
        ],
    },
    RuleSeed {
        keywords: &["compliance", "scan", "policy", "audit"],
        follow_ons: &[
            FollowOnSeed {
                title: "Remediate findings",
                prompt: "Show me how to fix the compliance findings",
                priority: SuggestionPriority::High,
                category: SuggestionCategory::Compliance,
            },
            FollowOnSeed {
                title: "Schedule recurring scans",
                prompt: "Schedule a weekly compliance scan for this subscription",
                priority: SuggestionPriority::Low,
                category: SuggestionCategory::Compliance,
            },
        ],
    },
    RuleSeed {
        keywords: &["cost", "budget", "billing", "spend"],
        follow_ons: &[
            FollowOnSeed {
                title: "Find savings opportunities",
                prompt: "Which resources could I resize or shut down to save money?",
                priority: SuggestionPriority::High,
                category: SuggestionCategory::Cost,
            },
            FollowOnSeed {
                title: "Set a budget alert",
                prompt: "Create a budget alert for this subscription",
                priority: SuggestionPriority::Medium,
                category: SuggestionCategory::Cost,
            },
        ],
    },
    RuleSeed {
        keywords: &["deploy", "release", "pipeline", "rollout"],
        follow_ons: &[
            FollowOnSeed {
                title: "Check deployment health",
                prompt: "Show the health of my latest deployment",
                priority: SuggestionPriority::High,
                category: SuggestionCategory::Deployment,
            },
            FollowOnSeed {
                title: "Plan a rollback",
                prompt: "What would a rollback of this deployment involve?",
                priority: SuggestionPriority::Medium,
                category: SuggestionCategory::Deployment,
            },
        ],
    },
    RuleSeed {
        keywords: &["onboard", "team", "access", "mission"],
        follow_ons: &[
            FollowOnSeed {
                title: "Provision a starter environment",
                prompt: "Provision a starter environment for the new team",
                priority: SuggestionPriority::High,
                category: SuggestionCategory::Provisioning,
            },
            FollowOnSeed {
                title: "Review access policies",
                prompt: "Review who has access to the new team's resources",
                priority: SuggestionPriority::Medium,
                category: SuggestionCategory::Compliance,
            },
        ],
    },
];

const DISCOVERY_SEEDS: &[FollowOnSeed] = &[
    FollowOnSeed {
        title: "See what I can do",
        prompt: "What can you help me with?",
        priority: SuggestionPriority::Medium,
        category: SuggestionCategory::Discovery,
    },
    FollowOnSeed {
        title: "Review your resources",
        prompt: "List the resources in my subscription",
        priority: SuggestionPriority::Medium,
        category: SuggestionCategory::Discovery,
    },
    FollowOnSeed {
        title: "Check compliance posture",
        prompt: "How compliant is my environment right now?",
        priority: SuggestionPriority::Low,
        category: SuggestionCategory::Discovery,
    },
];

/// Rule-table suggestion engine. Stateless and infallible.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuggestionEngine;

impl SuggestionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Ranks follow-ons for the most recently used capabilities. Falls back
    /// to keywords in recent messages, then to discovery suggestions.
    pub fn suggest(&self, request: &SuggestionRequest) -> Vec<Suggestion> {
        let max = match request.max_suggestions {
            0 => DEFAULT_MAX_SUGGESTIONS,
            max => max.min(DEFAULT_MAX_SUGGESTIONS),
        };

        let mut ranked = rank(request.recent_capabilities.iter().map(String::as_str));
        if ranked.is_empty() {
            ranked = rank(request.recent_messages.iter().rev().map(String::as_str));
        }
        if ranked.is_empty() {
            ranked = DISCOVERY_SEEDS.iter().map(to_suggestion).collect();
        }

        let mut seen = HashSet::new();
        ranked.retain(|suggestion| seen.insert(suggestion.title.clone()));
        ranked.truncate(max);
        ranked
    }
}

/// `signals` are ordered most relevant first. Each signal's follow-ons are
/// grouped together and sorted by priority within the group.
fn rank<'a>(signals: impl Iterator<Item = &'a str>) -> Vec<Suggestion> {
    let mut ranked = Vec::new();
    for signal in signals {
        let Some(rule) = matching_rule(signal) else {
            continue;
        };
        let mut group =
            rule.follow_ons.iter().take(MAX_PER_RULE).map(to_suggestion).collect::<Vec<_>>();
        group.sort_by_key(|suggestion| suggestion.priority);
        ranked.extend(group);
    }
    ranked
}

fn matching_rule(signal: &str) -> Option<&'static RuleSeed> {
    let normalized = signal.to_ascii_lowercase();
    RULE_SEEDS.iter().find(|rule| rule.keywords.iter().any(|keyword| normalized.contains(keyword)))
}

fn to_suggestion(seed: &FollowOnSeed) -> Suggestion {
    Suggestion {
        title: seed.title.to_string(),
        prompt: seed.prompt.to_string(),
        priority: seed.priority,
        category: seed.category,
    }
}
