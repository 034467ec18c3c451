//! Recursive Task Decomposition Pipeline
//!
//! The five-stage loop at the heart of the engine:
//!
//! ```text
//!             ┌──────────┐
//!   goal ───> │ Atomizer │──atomic──────────────> Executor ──┐
//!             └──────────┘                                   │
//!                  │ composite                               ▼
//!                  ▼                                   ┌────────────┐
//!             ┌─────────┐    per-subtask recursion     │ Aggregator │
//!             │ Planner │ ──────────────────────────>  └────────────┘
//!             └─────────┘                                    │
//!                                                            ▼
//!                                                       Verifier
//! ```
//!
//! Each stage is a [`StageSignature`] invoked through an [`LmBackend`];
//! this module defines the signatures, the typed views over their raw
//! output fields, and the lenient parsers that bridge free-form completions
//! into those views.

pub mod orchestrator;
pub mod task;

use crate::backend::{FieldMap, StageSignature};
use serde_json::Value;

pub use orchestrator::{
    CancellationToken, NodeFailure, Orchestrator, OrchestratorConfig, Outcome, PipelineError,
    PipelineMetrics, StagePolicy,
};
pub use task::{NodeId, TaskArena, TaskNode, TaskState};

/// Decides whether a goal is directly answerable or needs decomposition
pub const ATOMIZE: StageSignature = StageSignature {
    name: "atomize",
    inputs: &["goal"],
    outputs: &["is_atomic", "reasoning"],
};

/// Breaks a composite goal into an ordered list of subtasks
pub const PLAN: StageSignature = StageSignature {
    name: "plan",
    inputs: &["goal"],
    outputs: &["subtasks", "strategy"],
};

/// Answers an atomic task directly
pub const EXECUTE: StageSignature = StageSignature {
    name: "execute",
    inputs: &["task"],
    outputs: &["result"],
};

/// Synthesizes child results into one answer for the parent goal
pub const AGGREGATE: StageSignature = StageSignature {
    name: "aggregate",
    inputs: &["original_goal", "subtask_results"],
    outputs: &["synthesized_result"],
};

/// Checks a final result against the original goal
pub const VERIFY: StageSignature = StageSignature {
    name: "verify",
    inputs: &["goal", "result"],
    outputs: &["is_valid", "feedback"],
};

/// A stage produced output missing a required field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingField {
    pub stage: &'static str,
    pub field: &'static str,
}

impl std::fmt::Display for MissingField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Stage '{}' output missing required field '{}'",
            self.stage, self.field
        )
    }
}

impl std::error::Error for MissingField {}

fn require<'a>(
    fields: &'a FieldMap,
    stage: &'static str,
    field: &'static str,
) -> Result<&'a Value, MissingField> {
    fields.get(field).ok_or(MissingField { stage, field })
}

/// Lenient boolean reading of a stage output value
///
/// Model completions rarely produce a clean JSON boolean; any value whose
/// text contains "true" (case-insensitive) counts as true.
pub fn parse_lenient_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.to_lowercase().contains("true"),
        other => other.to_string().to_lowercase().contains("true"),
    }
}

/// Lenient string reading of a stage output value
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a planner subtask list from a stage output value
///
/// Accepts a JSON array directly, a string holding a JSON array, or
/// free-form text with one subtask per line (bullets and numbering
/// stripped). Blank entries are dropped.
pub fn parse_subtasks(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(value_to_string)
            .filter(|s| !s.trim().is_empty())
            .collect(),
        Value::String(text) => {
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(text.trim()) {
                return items
                    .iter()
                    .map(value_to_string)
                    .filter(|s| !s.trim().is_empty())
                    .collect();
            }
            text.lines()
                .map(strip_list_marker)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        }
        _ => Vec::new(),
    }
}

/// Remove a leading bullet or "1." style numbering from a line
fn strip_list_marker(line: &str) -> &str {
    let trimmed = line.trim();
    let trimmed = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
        .unwrap_or(trimmed);

    let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &trimmed[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim();
        }
    }
    trimmed
}

/// Typed view over the atomizer's output fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomizerOutput {
    pub is_atomic: bool,
    pub reasoning: String,
}

impl AtomizerOutput {
    pub fn from_fields(fields: &FieldMap) -> Result<Self, MissingField> {
        Ok(Self {
            is_atomic: parse_lenient_bool(require(fields, ATOMIZE.name, "is_atomic")?),
            reasoning: fields.get("reasoning").map(value_to_string).unwrap_or_default(),
        })
    }
}

/// Typed view over the planner's output fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerOutput {
    pub subtasks: Vec<String>,
    pub strategy: String,
}

impl PlannerOutput {
    pub fn from_fields(fields: &FieldMap) -> Result<Self, MissingField> {
        Ok(Self {
            subtasks: parse_subtasks(require(fields, PLAN.name, "subtasks")?),
            strategy: fields.get("strategy").map(value_to_string).unwrap_or_default(),
        })
    }
}

/// Typed view over the executor's output fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorOutput {
    pub result: String,
}

impl ExecutorOutput {
    pub fn from_fields(fields: &FieldMap) -> Result<Self, MissingField> {
        Ok(Self {
            result: value_to_string(require(fields, EXECUTE.name, "result")?),
        })
    }
}

/// Typed view over the aggregator's output fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorOutput {
    pub synthesized_result: String,
}

impl AggregatorOutput {
    pub fn from_fields(fields: &FieldMap) -> Result<Self, MissingField> {
        Ok(Self {
            synthesized_result: value_to_string(require(
                fields,
                AGGREGATE.name,
                "synthesized_result",
            )?),
        })
    }
}

/// Typed view over the verifier's output fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierOutput {
    pub is_valid: bool,
    pub feedback: String,
}

impl VerifierOutput {
    pub fn from_fields(fields: &FieldMap) -> Result<Self, MissingField> {
        Ok(Self {
            is_valid: parse_lenient_bool(require(fields, VERIFY.name, "is_valid")?),
            feedback: fields.get("feedback").map(value_to_string).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fields;
    use serde_json::json;

    // ==========================================
    // Signature Tests
    // ==========================================

    #[test]
    fn test_signatures_fields() {
        assert_eq!(ATOMIZE.outputs, &["is_atomic", "reasoning"]);
        assert_eq!(PLAN.outputs, &["subtasks", "strategy"]);
        assert_eq!(EXECUTE.inputs, &["task"]);
        assert_eq!(AGGREGATE.inputs, &["original_goal", "subtask_results"]);
        assert_eq!(VERIFY.outputs, &["is_valid", "feedback"]);
    }

    // ==========================================
    // Boolean Parsing Tests
    // ==========================================

    #[test]
    fn test_parse_lenient_bool_json_bool() {
        assert!(parse_lenient_bool(&json!(true)));
        assert!(!parse_lenient_bool(&json!(false)));
    }

    #[test]
    fn test_parse_lenient_bool_string_variants() {
        assert!(parse_lenient_bool(&json!("true")));
        assert!(parse_lenient_bool(&json!("True")));
        assert!(parse_lenient_bool(&json!("TRUE, the task is atomic")));
        assert!(!parse_lenient_bool(&json!("false")));
        assert!(!parse_lenient_bool(&json!("no")));
        assert!(!parse_lenient_bool(&json!("")));
    }

    #[test]
    fn test_parse_lenient_bool_non_string() {
        assert!(!parse_lenient_bool(&json!(1)));
        assert!(!parse_lenient_bool(&json!(null)));
    }

    // ==========================================
    // Subtask Parsing Tests
    // ==========================================

    #[test]
    fn test_parse_subtasks_json_array() {
        let subtasks = parse_subtasks(&json!(["first", "second", "third"]));
        assert_eq!(subtasks, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_parse_subtasks_string_holding_json_array() {
        let subtasks = parse_subtasks(&json!(r#"["alpha", "beta"]"#));
        assert_eq!(subtasks, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_parse_subtasks_bulleted_text() {
        let subtasks = parse_subtasks(&json!("- research topic\n* draft outline\nwrite summary"));
        assert_eq!(
            subtasks,
            vec!["research topic", "draft outline", "write summary"]
        );
    }

    #[test]
    fn test_parse_subtasks_numbered_text() {
        let subtasks = parse_subtasks(&json!("1. first step\n2) second step\n\n3. third step"));
        assert_eq!(subtasks, vec!["first step", "second step", "third step"]);
    }

    #[test]
    fn test_parse_subtasks_drops_blank_entries() {
        let subtasks = parse_subtasks(&json!(["keep", "", "   "]));
        assert_eq!(subtasks, vec!["keep"]);
    }

    #[test]
    fn test_parse_subtasks_non_list_value() {
        assert!(parse_subtasks(&json!(42)).is_empty());
        assert!(parse_subtasks(&json!(null)).is_empty());
    }

    // ==========================================
    // Typed Output Tests
    // ==========================================

    #[test]
    fn test_atomizer_output_from_fields() {
        let output = AtomizerOutput::from_fields(&fields(&[
            ("is_atomic", json!("True")),
            ("reasoning", json!("simple arithmetic")),
        ]))
        .unwrap();

        assert!(output.is_atomic);
        assert_eq!(output.reasoning, "simple arithmetic");
    }

    #[test]
    fn test_atomizer_output_missing_decision() {
        let err = AtomizerOutput::from_fields(&fields(&[("reasoning", json!("..."))])).unwrap_err();
        assert_eq!(err.field, "is_atomic");
        assert_eq!(err.stage, "atomize");
    }

    #[test]
    fn test_planner_output_from_fields() {
        let output = PlannerOutput::from_fields(&fields(&[
            ("subtasks", json!(["a", "b"])),
            ("strategy", json!("split by section")),
        ]))
        .unwrap();

        assert_eq!(output.subtasks, vec!["a", "b"]);
        assert_eq!(output.strategy, "split by section");
    }

    #[test]
    fn test_executor_output_missing_result() {
        let err = ExecutorOutput::from_fields(&FieldMap::new()).unwrap_err();
        assert_eq!(err.field, "result");
    }

    #[test]
    fn test_verifier_output_defaults_feedback() {
        let output = VerifierOutput::from_fields(&fields(&[("is_valid", json!(true))])).unwrap();
        assert!(output.is_valid);
        assert_eq!(output.feedback, "");
    }

    #[test]
    fn test_aggregator_output_stringifies_values() {
        let output =
            AggregatorOutput::from_fields(&fields(&[("synthesized_result", json!(42))])).unwrap();
        assert_eq!(output.synthesized_result, "42");
    }
}
