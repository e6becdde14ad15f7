use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// A capability invocation observed in a completion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCall {
    pub name: String,
    pub arguments: Value,
}

impl CapabilityCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self { name: name.into(), arguments }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityParameter {
    pub name: String,
    pub description: String,
    /// JSON schema type name (`string`, `integer`, `boolean`, ...).
    pub kind: String,
    pub required: bool,
}

impl CapabilityParameter {
    pub fn required(
        name: impl Into<String>,
        kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self { name: name.into(), description: description.into(), kind: kind.into(), required: true }
    }

    pub fn optional(
        name: impl Into<String>,
        kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self { required: false, ..Self::required(name, kind, description) }
    }
}

/// Declared shape of an externally owned capability.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<CapabilityParameter>,
}

impl CapabilityDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), parameters: Vec::new() }
    }

    pub fn with_parameter(mut self, parameter: CapabilityParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Renders the parameter list as a JSON-schema object.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for parameter in &self.parameters {
            properties.insert(
                parameter.name.clone(),
                json!({ "type": parameter.kind, "description": parameter.description }),
            );
            if parameter.required {
                required.push(Value::String(parameter.name.clone()));
            }
        }

        json!({
            "type": "object",
            "properties": Value::Object(properties),
            "required": required,
        })
    }
}
