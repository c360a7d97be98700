//! Trace adapters.
//!
//! Raw agent output arrives in one of a closed set of shapes, each a
//! [`TraceFormat`] variant. [`TraceFormat::detect`] picks the variant and
//! [`TraceFormat::normalize`] converts the document into a
//! [`NormalizedTrace`]. Supporting another framework means adding a variant
//! here; nothing downstream changes.
//!
//! `StepList` documents look like:
//!
//! ```json
//! {
//!   "run_id": "r-1",
//!   "framework": "crewai",
//!   "tools": [{ "name": "search", "parameters": [{ "name": "query", "type": "string", "required": true }] }],
//!   "steps": [
//!     { "type": "tool", "name": "search", "arguments": { "query": "x" }, "result": [], "error": null },
//!     { "type": "llm", "prompt": "...", "completion": "..." },
//!     { "type": "message", "content": "..." }
//!   ]
//! }
//! ```

use serde::Deserialize;
use serde_json::Value;

use crate::domain::{
    FlywheelError, NormalizedTrace, Result, SkippedTrace, StepError, StepKind, ToolSignature,
    TraceStep,
};

/// Supported raw trace shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    /// Already normalized: `trace_id` plus `steps` with a `kind` field.
    Normalized,
    /// Framework step log: `run_id` plus `steps` with a `type` field.
    StepList,
}

impl TraceFormat {
    /// Identify the shape of a raw document.
    pub fn detect(raw: &Value) -> Option<Self> {
        let obj = raw.as_object()?;
        let steps = obj.get("steps")?.as_array()?;
        if obj.contains_key("trace_id") {
            return Some(Self::Normalized);
        }
        let typed = steps
            .first()
            .and_then(Value::as_object)
            .is_some_and(|s| s.contains_key("type"));
        if obj.contains_key("run_id") || typed {
            return Some(Self::StepList);
        }
        None
    }

    pub fn normalize(self, raw: Value) -> Result<NormalizedTrace> {
        match self {
            Self::Normalized => Ok(serde_json::from_value(raw)?),
            Self::StepList => {
                let doc: StepListDoc = serde_json::from_value(raw)?;
                Ok(doc.into_trace())
            }
        }
    }
}

/// Detect and normalize one raw document.
pub fn normalize(raw: Value) -> Result<NormalizedTrace> {
    let format = TraceFormat::detect(&raw).ok_or_else(|| FlywheelError::MalformedTrace {
        trace_id: raw
            .get("trace_id")
            .or_else(|| raw.get("run_id"))
            .and_then(Value::as_str)
            .unwrap_or("<unknown>")
            .to_string(),
        step_index: 0,
        field: "steps".to_string(),
    })?;
    format.normalize(raw)
}

/// Normalize a JSON document holding one trace or an array of traces.
/// Documents that cannot be normalized are returned as skipped entries.
pub fn normalize_all(raw: Value) -> (Vec<NormalizedTrace>, Vec<SkippedTrace>) {
    let items = match raw {
        Value::Array(items) => items,
        single => vec![single],
    };

    let mut traces = Vec::with_capacity(items.len());
    let mut skipped = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        let fallback_id = item
            .get("trace_id")
            .or_else(|| item.get("run_id"))
            .and_then(Value::as_str)
            .map_or_else(|| format!("#{index}"), str::to_string);
        match normalize(item) {
            Ok(trace) => traces.push(trace),
            Err(e) => skipped.push(SkippedTrace {
                trace_id: fallback_id,
                reason: e.to_string(),
            }),
        }
    }
    (traces, skipped)
}

#[derive(Deserialize)]
struct StepListDoc {
    run_id: String,
    #[serde(default)]
    framework: Option<String>,
    #[serde(default)]
    scenario_id: Option<String>,
    #[serde(default)]
    tools: Vec<ToolSignature>,
    steps: Vec<RawStep>,
}

#[derive(Deserialize)]
struct RawStep {
    #[serde(rename = "type", default)]
    step_type: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "args")]
    arguments: Value,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    prompt: Value,
    #[serde(default)]
    completion: Value,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    error: Option<Value>,
}

impl StepListDoc {
    fn into_trace(self) -> NormalizedTrace {
        NormalizedTrace {
            trace_id: self.run_id,
            source: self.framework.unwrap_or_else(|| "step_list".to_string()),
            scenario_hint: self.scenario_id,
            tools: self.tools,
            steps: self.steps.into_iter().map(RawStep::into_step).collect(),
        }
    }
}

impl RawStep {
    fn into_step(self) -> TraceStep {
        let kind = match self.step_type.as_deref() {
            Some("tool" | "tool_call" | "action") => Some(StepKind::ToolCall),
            Some("llm" | "model" | "model_call") => Some(StepKind::ModelCall),
            Some("message" | "text" | "final") => Some(StepKind::Text),
            // Unknown types are left unset and rejected at validation.
            _ => None,
        };
        let (input, output) = match kind {
            Some(StepKind::ToolCall) => (self.arguments, self.result),
            Some(StepKind::ModelCall) => (self.prompt, self.completion),
            _ => (Value::Null, self.content),
        };
        let error = self.error.and_then(|e| match e {
            Value::Null => None,
            Value::String(message) => Some(StepError {
                message,
                code: None,
            }),
            Value::Object(map) => Some(StepError {
                message: map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                code: map.get("code").map(|c| match c {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }),
            }),
            other => Some(StepError {
                message: other.to_string(),
                code: None,
            }),
        });
        TraceStep {
            kind,
            tool: self.name.filter(|_| kind == Some(StepKind::ToolCall)),
            input,
            output,
            error,
        }
    }
}
