//! Capability-call extraction from completion metadata.
//!
//! Each provider family has an explicit adapter, selected from configuration.
//! Extraction never fails: absent or malformed metadata yields `None`.

use std::fmt::Debug;

use helmsman_core::config::MetadataFormat;
use helmsman_core::CapabilityCall;
use serde_json::{Map, Value};

use crate::llm::CompletionResponse;

pub trait MetadataAdapter: Send + Sync + Debug {
    fn format(&self) -> MetadataFormat;

    fn extract(&self, metadata: &Value) -> Option<Vec<CapabilityCall>>;
}

/// `tool_calls[].function.{name, arguments}` as returned by chat-completions APIs.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenAiAdapter;

impl MetadataAdapter for OpenAiAdapter {
    fn format(&self) -> MetadataFormat {
        MetadataFormat::OpenAi
    }

    fn extract(&self, metadata: &Value) -> Option<Vec<CapabilityCall>> {
        let metadata = normalize(metadata)?;
        let tool_calls = metadata
            .get("tool_calls")
            .or_else(|| metadata.pointer("/choices/0/message/tool_calls"))?
            .as_array()?;

        let calls = tool_calls
            .iter()
            .filter_map(|call| {
                let function = call.get("function")?;
                let name = non_empty_str(function.get("name")?)?;
                let arguments = function.get("arguments").map(decode_arguments).unwrap_or(Value::Null);
                Some(CapabilityCall::new(name, arguments))
            })
            .collect::<Vec<_>>();
        non_empty(calls)
    }
}

/// `content[]` blocks with `type == "tool_use"`.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnthropicAdapter;

impl MetadataAdapter for AnthropicAdapter {
    fn format(&self) -> MetadataFormat {
        MetadataFormat::Anthropic
    }

    fn extract(&self, metadata: &Value) -> Option<Vec<CapabilityCall>> {
        let metadata = normalize(metadata)?;
        let blocks = metadata.get("content")?.as_array()?;

        let calls = blocks
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
            .filter_map(|block| {
                let name = non_empty_str(block.get("name")?)?;
                let input = block.get("input").cloned().unwrap_or(Value::Null);
                Some(CapabilityCall::new(name, input))
            })
            .collect::<Vec<_>>();
        non_empty(calls)
    }
}

/// Container keys checked in order; the first yielding calls wins.
pub const CALL_KEY_ALIASES: &[&str] = &[
    "tool_calls",
    "ToolCalls",
    "function_calls",
    "FunctionCalls",
    "function_call",
    "FunctionCall",
    "tool_use",
];

/// Name fields checked in order within each entry. Dotted entries are paths.
pub const NAME_ALIASES: &[&str] =
    &["name", "Name", "function_name", "FunctionName", "function.name", "plugin_function"];

const ARGUMENT_ALIASES: &[&str] =
    &["arguments", "Arguments", "input", "parameters", "function.arguments"];

/// Tolerant adapter for providers whose metadata shape is not known up front.
#[derive(Clone, Copy, Debug, Default)]
pub struct TolerantAdapter;

impl MetadataAdapter for TolerantAdapter {
    fn format(&self) -> MetadataFormat {
        MetadataFormat::Tolerant
    }

    fn extract(&self, metadata: &Value) -> Option<Vec<CapabilityCall>> {
        let metadata = normalize(metadata)?;
        CALL_KEY_ALIASES.iter().find_map(|key| {
            let container = normalize(metadata.get(*key)?)?;
            let entries = match &container {
                Value::Array(entries) => entries.clone(),
                Value::Object(_) => vec![container.clone()],
                _ => return None,
            };
            let calls = entries.iter().filter_map(read_entry).collect::<Vec<_>>();
            non_empty(calls)
        })
    }
}

pub fn adapter_for(format: MetadataFormat) -> Box<dyn MetadataAdapter> {
    match format {
        MetadataFormat::OpenAi => Box::new(OpenAiAdapter),
        MetadataFormat::Anthropic => Box::new(AnthropicAdapter),
        MetadataFormat::Tolerant => Box::new(TolerantAdapter),
    }
}

#[derive(Debug)]
pub struct ResponseInterpreter {
    adapter: Box<dyn MetadataAdapter>,
}

impl Default for ResponseInterpreter {
    fn default() -> Self {
        Self::new(MetadataFormat::Tolerant)
    }
}

impl ResponseInterpreter {
    pub fn new(format: MetadataFormat) -> Self {
        Self { adapter: adapter_for(format) }
    }

    pub fn with_adapter(adapter: Box<dyn MetadataAdapter>) -> Self {
        Self { adapter }
    }

    pub fn format(&self) -> MetadataFormat {
        self.adapter.format()
    }

    pub fn extract_capability_calls(
        &self,
        response: &CompletionResponse,
    ) -> Option<Vec<CapabilityCall>> {
        self.adapter.extract(&response.metadata)
    }
}

fn read_entry(entry: &Value) -> Option<CapabilityCall> {
    let entry = normalize(entry)?;
    let object = entry.as_object()?;
    let name = NAME_ALIASES.iter().find_map(|alias| lookup(object, alias).and_then(non_empty_str))?;
    let arguments = ARGUMENT_ALIASES
        .iter()
        .find_map(|alias| lookup(object, alias))
        .map(decode_arguments)
        .unwrap_or(Value::Null);
    Some(CapabilityCall::new(name, arguments))
}

fn lookup<'a>(object: &'a Map<String, Value>, alias: &str) -> Option<&'a Value> {
    if let Some(value) = object.get(alias) {
        return Some(value);
    }
    let (head, rest) = alias.split_once('.')?;
    let nested = object.get(head)?.as_object()?;
    lookup(nested, rest)
}

/// Metadata sometimes arrives as a JSON-encoded string.
fn normalize(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(raw) => serde_json::from_str::<Value>(raw).ok().filter(|parsed| !parsed.is_null()),
        other => Some(other.clone()),
    }
}

fn decode_arguments(value: &Value) -> Value {
    match value {
        Value::String(raw) => {
            serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.clone()))
        }
        other => other.clone(),
    }
}

fn non_empty_str(value: &Value) -> Option<String> {
    let name = value.as_str()?.trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn non_empty(calls: Vec<CapabilityCall>) -> Option<Vec<CapabilityCall>> {
    (!calls.is_empty()).then_some(calls)
}
