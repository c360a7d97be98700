//! Failure-indicator matching over trace steps.
//!
//! Text indicators (keyword, pattern, PII) scan step inputs, outputs and
//! error messages case-insensitively. Structural indicators inspect tool
//! calls against the signatures the trace declares. Everything here is a
//! pure function of its inputs; JSON payloads are rendered with sorted keys
//! so evidence strings are byte-stable across runs.

use serde_json::Value;

use crate::domain::{
    FailureIndicator, MatchField, MatchedIndicator, NormalizedTrace, SchemaMismatchKind, StepKind,
    TraceStep,
};

const EXCERPT_CONTEXT: usize = 24;

/// All matches of one indicator against a trace, in step order.
pub fn match_indicator(indicator: &FailureIndicator, trace: &NormalizedTrace) -> Vec<MatchedIndicator> {
    match indicator {
        FailureIndicator::Keyword { needle } => scan_text(trace, indicator, |text| {
            let lowered = text.to_lowercase();
            lowered
                .find(needle.as_str())
                .map(|start| excerpt(&lowered, start, start + needle.len()))
        }),
        FailureIndicator::Pattern { regex, .. } | FailureIndicator::Pii { regex, .. } => {
            scan_text(trace, indicator, |text| {
                regex.find(text).map(|m| excerpt(text, m.start(), m.end()))
            })
        }
        FailureIndicator::SchemaMismatch => schema_mismatches(trace),
        FailureIndicator::ToolError => trace
            .steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind == Some(StepKind::ToolCall))
            .filter_map(|(i, s)| {
                s.error.as_ref().map(|e| MatchedIndicator {
                    indicator: indicator.label(),
                    step_index: i,
                    field: MatchField::Error,
                    evidence: e.message.clone(),
                    mismatch: None,
                })
            })
            .collect(),
    }
}

/// Render a payload as searchable text.
pub fn render_payload(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn scan_text<F>(trace: &NormalizedTrace, indicator: &FailureIndicator, find: F) -> Vec<MatchedIndicator>
where
    F: Fn(&str) -> Option<String>,
{
    let mut matches = Vec::new();
    for (index, step) in trace.steps.iter().enumerate() {
        for (field, text) in step_texts(step) {
            if text.is_empty() {
                continue;
            }
            if let Some(evidence) = find(&text) {
                matches.push(MatchedIndicator {
                    indicator: indicator.label(),
                    step_index: index,
                    field,
                    evidence,
                    mismatch: None,
                });
            }
        }
    }
    matches
}

fn step_texts(step: &TraceStep) -> [(MatchField, String); 3] {
    [
        (MatchField::Input, render_payload(&step.input)),
        (MatchField::Output, render_payload(&step.output)),
        (
            MatchField::Error,
            step.error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_default(),
        ),
    ]
}

fn excerpt(text: &str, start: usize, end: usize) -> String {
    let mut from = start.saturating_sub(EXCERPT_CONTEXT);
    while from > 0 && !text.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (end + EXCERPT_CONTEXT).min(text.len());
    while to < text.len() && !text.is_char_boundary(to) {
        to += 1;
    }
    text[from..to].to_string()
}

fn schema_mismatches(trace: &NormalizedTrace) -> Vec<MatchedIndicator> {
    let mut out = Vec::new();
    if trace.tools.is_empty() {
        // Nothing declared, nothing to check against.
        return out;
    }

    let mut push = |step_index: usize, kind: SchemaMismatchKind, evidence: String| {
        out.push(MatchedIndicator {
            indicator: FailureIndicator::SchemaMismatch.label(),
            step_index,
            field: MatchField::ToolCall,
            evidence: format!("{kind}: {evidence}"),
            mismatch: Some(kind),
        });
    };

    for (index, step) in trace.steps.iter().enumerate() {
        if step.kind != Some(StepKind::ToolCall) {
            continue;
        }
        let Some(tool) = step.tool.as_deref() else {
            continue;
        };
        let Some(signature) = trace.tool_signature(tool) else {
            push(
                index,
                SchemaMismatchKind::UndeclaredTool,
                format!("tool '{tool}' is not declared"),
            );
            continue;
        };

        let declared = || {
            signature
                .parameters
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };

        let args = match &step.input {
            Value::Object(map) => map,
            Value::Null => {
                for p in signature.parameters.iter().filter(|p| p.required) {
                    push(
                        index,
                        SchemaMismatchKind::MissingRequiredParameter,
                        format!("'{}' on tool '{tool}'", p.name),
                    );
                }
                continue;
            }
            other => {
                push(
                    index,
                    SchemaMismatchKind::ParameterTypeMismatch,
                    format!("tool '{tool}' arguments must be an object, got {other}"),
                );
                continue;
            }
        };

        for (name, value) in args {
            match signature.parameters.iter().find(|p| &p.name == name) {
                None => push(
                    index,
                    SchemaMismatchKind::ParameterNameMismatch,
                    format!("unexpected parameter '{name}' on tool '{tool}' (declared: {})", declared()),
                ),
                Some(p) if !p.param_type.accepts(value) => push(
                    index,
                    SchemaMismatchKind::ParameterTypeMismatch,
                    format!("parameter '{name}' on tool '{tool}' expects {}", p.param_type),
                ),
                Some(_) => {}
            }
        }

        for p in signature.parameters.iter().filter(|p| p.required) {
            if !args.contains_key(&p.name) {
                push(
                    index,
                    SchemaMismatchKind::MissingRequiredParameter,
                    format!("'{}' on tool '{tool}'", p.name),
                );
            }
        }
    }

    out
}
