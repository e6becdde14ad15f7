//! Missing-information heuristics over completion text.
//!
//! Detection is table-driven: every pattern is data in one of the tables
//! below, compiled once into a [`MissingInfoPatterns`]. Results are advisory.

use regex::Regex;
use serde::Serialize;

/// Upper bound on fields reported for one completion.
pub const MAX_MISSING_FIELDS: usize = 5;

/// Markers that the completion is blocked on user input.
pub const DEFAULT_TRIGGER_PATTERNS: &[&str] = &[
    r"❌",
    r"(?i)\bcannot\s+(?:proceed|submit|continue)\b",
    r"(?i)\bblocked\b",
    r"(?i)\b(?:is|are)\s+missing\b",
    r"(?i)\b(?:is|are)\s+required\b",
    r"(?i)\bplease\s+provide\b",
    r"(?i)\bneed\s+more\s+information\b",
    r"\?\s*$",
];

/// Explicit field declarations. Capture group 1 is the field name.
pub const DEFAULT_REQUIRED_FIELD_PATTERNS: &[&str] = &[
    r"(?:\*\*|`)([^*`\n]{1,60})(?:\*\*|`)[ \t]+(?:is|are)[ \t]+(?:required|missing)",
    r"\b([A-Z][\w-]*(?:[ \t]+[A-Z][\w-]*){0,4})[ \t]+(?:is|are)[ \t]+(?:required|missing)\b",
    r"(?im)^[ \t]*[-*•][ \t]+([^:(\n]{1,60}?)[ \t]*(?:\((?:required|missing)\)|:[ \t]*(?:required|missing)\b)",
    r"(?i)\bmissing(?:[ \t]+required)?[ \t]+(?:field|parameter|value)s?:[ \t]*([^\n.,;]{1,60})",
];

/// Generic questions, used only when no explicit field declaration matched.
pub const DEFAULT_QUESTION_PATTERNS: &[&str] = &[
    r"(?i)\bwhat\s+(?:is|are)\s+([^?\n]{1,60})\?",
    r"(?i)\bwhich\s+([^?\n]{1,60})\?",
    r"(?i)\bplease\s+provide\s+([^.?!\n]{1,60})",
];

const LEADING_WORDS: &[&str] = &["the ", "a ", "an ", "your ", "its "];
const TRAILING_CLAUSES: &[&str] = &[
    " should ", " would ", " do ", " does ", " will ", " can ", " to ", " for ", " you ",
    " is ", " are ", " so ",
];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MissingInfoSignal {
    pub triggered: bool,
    pub fields: Vec<String>,
}

impl MissingInfoSignal {
    pub fn requires_follow_up(&self) -> bool {
        self.triggered && !self.fields.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct MissingInfoPatterns {
    triggers: Vec<Regex>,
    required_fields: Vec<Regex>,
    questions: Vec<Regex>,
}

impl Default for MissingInfoPatterns {
    fn default() -> Self {
        Self {
            triggers: compile_lenient(DEFAULT_TRIGGER_PATTERNS),
            required_fields: compile_lenient(DEFAULT_REQUIRED_FIELD_PATTERNS),
            questions: compile_lenient(DEFAULT_QUESTION_PATTERNS),
        }
    }
}

impl MissingInfoPatterns {
    /// Builds a pattern set from caller-supplied tables, rejecting any invalid regex.
    pub fn from_tables(
        triggers: &[&str],
        required_fields: &[&str],
        questions: &[&str],
    ) -> Result<Self, regex::Error> {
        let compile = |patterns: &[&str]| {
            patterns.iter().map(|pattern| Regex::new(pattern)).collect::<Result<Vec<_>, _>>()
        };
        Ok(Self {
            triggers: compile(triggers)?,
            required_fields: compile(required_fields)?,
            questions: compile(questions)?,
        })
    }

    /// Adds literal trigger phrases, matched case-insensitively.
    pub fn with_extra_triggers<S: AsRef<str>>(mut self, phrases: &[S]) -> Self {
        let extra = phrases
            .iter()
            .map(AsRef::as_ref)
            .map(str::trim)
            .filter(|phrase| !phrase.is_empty())
            .filter_map(|phrase| Regex::new(&format!("(?i){}", regex::escape(phrase))).ok());
        self.triggers.extend(extra);
        self
    }

    pub fn is_triggered(&self, text: &str) -> bool {
        self.triggers.iter().any(|pattern| pattern.is_match(text))
    }

    /// Distinct field names in order of appearance, at most `max_fields`.
    /// Explicit declarations win; generic questions are the fallback.
    pub fn extract_fields(&self, text: &str, max_fields: usize) -> Vec<String> {
        let limit = max_fields.min(MAX_MISSING_FIELDS);
        let explicit = collect_ordered(&self.required_fields, text, limit);
        if !explicit.is_empty() {
            return explicit;
        }
        collect_ordered(&self.questions, text, limit)
    }

    pub fn analyze(&self, text: &str, max_fields: usize) -> MissingInfoSignal {
        if !self.is_triggered(text) {
            return MissingInfoSignal::default();
        }
        MissingInfoSignal { triggered: true, fields: self.extract_fields(text, max_fields) }
    }
}

fn compile_lenient(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(error) => {
                tracing::warn!(
                    event_name = "followup.pattern_invalid",
                    pattern = %pattern,
                    error = %error,
                    "skipping invalid missing-information pattern"
                );
                None
            }
        })
        .collect()
}

fn collect_ordered(patterns: &[Regex], text: &str, limit: usize) -> Vec<String> {
    let mut matches = patterns
        .iter()
        .flat_map(|pattern| pattern.captures_iter(text))
        .filter_map(|captures| {
            let group = captures.get(1)?;
            Some((group.start(), clean_field(group.as_str())?))
        })
        .collect::<Vec<_>>();
    matches.sort_by_key(|(position, _)| *position);

    let mut fields: Vec<String> = Vec::new();
    for (_, field) in matches {
        if fields.len() >= limit {
            break;
        }
        if !fields.iter().any(|existing| existing.eq_ignore_ascii_case(&field)) {
            fields.push(field);
        }
    }
    fields
}

fn clean_field(raw: &str) -> Option<String> {
    let mut field = raw.trim().trim_matches(|c: char| c == '*' || c == '`' || c == '"').trim();

    let lower = field.to_ascii_lowercase();
    if let Some(prefix) = LEADING_WORDS.iter().find(|prefix| lower.starts_with(*prefix)) {
        field = field[prefix.len()..].trim_start();
    }

    let padded = format!(" {} ", field.to_ascii_lowercase());
    if let Some(cut) = TRAILING_CLAUSES.iter().filter_map(|clause| padded.find(clause)).min() {
        // `padded` is shifted by one leading space.
        field = field[..cut.saturating_sub(1).min(field.len())].trim_end();
    }

    let field = field.trim_end_matches(|c: char| c.is_ascii_punctuation()).trim();
    if field.is_empty() {
        None
    } else {
        Some(field.to_string())
    }
}
