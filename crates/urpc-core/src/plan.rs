//! Execution plan types.
//!
//! A plan is produced by the language model, resolved once, then executed
//! step by step in ascending `order`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An ordered list of pseudo-code steps.
///
/// `total_steps` mirrors what the model claimed and is never trusted; the
/// executor always works from `steps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawPlan")]
pub struct ExecutionPlan {
    pub steps: Vec<Step>,
    pub total_steps: usize,
}

/// One unit of work, mapped to exactly one repository call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Human-readable description written by the model.
    #[serde(default)]
    pub description: String,

    /// `repo({entity: "...", source: "..."}).<operation>(<options>)`
    pub urpc_code: String,

    /// 1-based position; may be non-contiguous.
    pub order: i64,
}

/// Wire shape accepted from model output. Every field is optional so that
/// sloppy plans still load.
#[derive(Deserialize)]
struct RawPlan {
    #[serde(default)]
    steps: Vec<RawStep>,
    #[serde(default)]
    total_steps: Option<Value>,
}

#[derive(Deserialize)]
struct RawStep {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    urpc_code: String,
    #[serde(default)]
    order: Option<Value>,
}

fn lenient_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl From<RawPlan> for ExecutionPlan {
    fn from(raw: RawPlan) -> Self {
        let steps: Vec<Step> = raw
            .steps
            .into_iter()
            .enumerate()
            .map(|(index, step)| Step {
                description: step.description.unwrap_or_default(),
                urpc_code: step.urpc_code,
                order: step
                    .order
                    .as_ref()
                    .and_then(lenient_int)
                    .unwrap_or(index as i64 + 1),
            })
            .collect();

        let total_steps = raw
            .total_steps
            .as_ref()
            .and_then(lenient_int)
            .map(|n| n.max(0) as usize)
            .unwrap_or(steps.len());

        Self { steps, total_steps }
    }
}

impl ExecutionPlan {
    /// Create a plan whose `total_steps` matches its steps.
    pub fn new(steps: Vec<Step>) -> Self {
        let total_steps = steps.len();
        Self { steps, total_steps }
    }

    /// A plan with nothing to execute.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps sorted by ascending `order`; ties keep their array position.
    pub fn ordered_steps(&self) -> Vec<&Step> {
        let mut steps: Vec<&Step> = self.steps.iter().collect();
        steps.sort_by_key(|step| step.order);
        steps
    }

    /// Returns true if the claimed `total_steps` disagrees with `steps`.
    pub fn has_count_mismatch(&self) -> bool {
        self.total_steps != self.steps.len()
    }
}

impl Step {
    pub fn new(description: impl Into<String>, urpc_code: impl Into<String>, order: i64) -> Self {
        Self {
            description: description.into(),
            urpc_code: urpc_code.into(),
            order,
        }
    }
}

/// Outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub operation: String,
    pub entity: String,
    pub source: String,
    pub data: Value,
    pub message: String,
    pub success: bool,
    pub urpc_code: String,
}

impl StepOutput {
    /// A successful step carrying the repository's return value.
    pub fn succeeded(
        operation: impl Into<String>,
        entity: impl Into<String>,
        source: impl Into<String>,
        data: Value,
        urpc_code: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            entity: entity.into(),
            source: source.into(),
            data,
            message: String::new(),
            success: true,
            urpc_code: urpc_code.into(),
        }
    }

    /// A failed step; `data` is always null.
    pub fn failed(
        operation: impl Into<String>,
        entity: impl Into<String>,
        source: impl Into<String>,
        message: impl Into<String>,
        urpc_code: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            entity: entity.into(),
            source: source.into(),
            data: Value::Null,
            message: message.into(),
            success: false,
            urpc_code: urpc_code.into(),
        }
    }
}

/// Final response of one agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanOutput {
    pub execution_plan: ExecutionPlan,

    #[serde(default)]
    pub results: Vec<StepOutput>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<bool>,

    #[serde(
        default,
        rename = "summaryText",
        skip_serializing_if = "Option::is_none"
    )]
    pub summary_text: Option<String>,
}

impl PlanOutput {
    /// Wrap a plan with no results yet.
    pub fn from_plan(execution_plan: ExecutionPlan) -> Self {
        Self {
            execution_plan,
            results: Vec::new(),
            message: None,
            summary: None,
            summary_text: None,
        }
    }

    /// Set the diagnostic message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Returns true if a summary was asked for, by the model or the caller.
    pub fn wants_summary(&self) -> bool {
        self.summary.unwrap_or(false)
    }

    /// Number of successful steps.
    pub fn succeeded_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }
}
