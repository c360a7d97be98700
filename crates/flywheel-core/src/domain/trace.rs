//! Normalized agent execution traces.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::{FlywheelError, Result};

/// Kind of action recorded in a trace step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ToolCall,
    ModelCall,
    Text,
}

/// Error metadata attached to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// One step of an agent execution.
///
/// `tool` is required for [`StepKind::ToolCall`] steps; validation happens
/// in [`NormalizedTrace::validate`] so a single bad step does not prevent the
/// rest of a batch from being parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub kind: Option<StepKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

impl TraceStep {
    pub fn tool_call(tool: impl Into<String>, input: Value, output: Value) -> Self {
        Self {
            kind: Some(StepKind::ToolCall),
            tool: Some(tool.into()),
            input,
            output,
            error: None,
        }
    }

    pub fn model_call(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            kind: Some(StepKind::ModelCall),
            tool: None,
            input: Value::String(input.into()),
            output: Value::String(output.into()),
            error: None,
        }
    }

    pub fn text(output: impl Into<String>) -> Self {
        Self {
            kind: Some(StepKind::Text),
            tool: None,
            input: Value::Null,
            output: Value::String(output.into()),
            error: None,
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(StepError {
            message: message.into(),
            code: None,
        });
        self
    }
}

/// Primitive parameter types a tool signature may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Any,
}

impl ParamType {
    /// Whether a JSON value conforms to this declared type.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        };
        write!(f, "{s}")
    }
}

/// A declared tool parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type", default = "default_param_type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
}

fn default_param_type() -> ParamType {
    ParamType::Any
}

/// A tool's declared signature, as exposed to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSignature {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
}

impl ToolSignature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    pub fn param(mut self, name: &str, param_type: ParamType, required: bool) -> Self {
        self.parameters.push(ToolParameter {
            name: name.to_string(),
            param_type,
            required,
        });
        self
    }
}

/// One agent execution, as emitted by a trace normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTrace {
    pub trace_id: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_hint: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolSignature>,
    pub steps: Vec<TraceStep>,
}

fn default_source() -> String {
    "generic".to_string()
}

impl NormalizedTrace {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            source: default_source(),
            scenario_hint: None,
            tools: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: TraceStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_tool(mut self, signature: ToolSignature) -> Self {
        self.tools.push(signature);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn tool_signature(&self, name: &str) -> Option<&ToolSignature> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Check that every step carries the fields the evaluator relies on.
    pub fn validate(&self) -> Result<()> {
        if self.trace_id.trim().is_empty() {
            return Err(FlywheelError::malformed("<unnamed>", 0, "trace_id"));
        }
        for (index, step) in self.steps.iter().enumerate() {
            let kind = step
                .kind
                .ok_or_else(|| FlywheelError::malformed(&self.trace_id, index, "kind"))?;
            if kind == StepKind::ToolCall
                && step.tool.as_deref().map_or(true, |t| t.trim().is_empty())
            {
                return Err(FlywheelError::malformed(&self.trace_id, index, "tool"));
            }
            if let Some(err) = &step.error {
                if err.message.trim().is_empty() {
                    return Err(FlywheelError::malformed(
                        &self.trace_id,
                        index,
                        "error.message",
                    ));
                }
            }
        }
        Ok(())
    }
}
