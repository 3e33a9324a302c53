//! Progress records emitted by streamed invocations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plan::{ExecutionPlan, PlanOutput};
use crate::types::now_millis;

/// Kind of a streamed progress record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    /// A raw chunk of model output.
    AiResponse,
    /// The parsed and resolved plan.
    ExecutionPlan,
    /// A step is about to run, or has just failed.
    Executing,
    /// The natural-language summary.
    Summary,
    /// The summary call failed.
    SummaryError,
    /// A fatal failure; the stream closes after it.
    Error,
    /// The complete output; always the last record of a healthy stream.
    FinalResult,
}

impl StreamEventType {
    /// Returns true if no record follows this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEventType::Error | StreamEventType::FinalResult)
    }
}

/// One newline-delimited JSON record: `{type, content, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: StreamEventType,
    pub content: Value,
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl StreamEvent {
    pub fn new(event_type: StreamEventType, content: Value) -> Self {
        Self {
            event_type,
            content,
            timestamp: now_millis(),
        }
    }

    pub fn ai_response(chunk: impl Into<String>) -> Self {
        Self::new(StreamEventType::AiResponse, Value::String(chunk.into()))
    }

    pub fn execution_plan(plan: &ExecutionPlan) -> Self {
        Self::new(
            StreamEventType::ExecutionPlan,
            serde_json::to_value(plan).unwrap_or(Value::Null),
        )
    }

    pub fn executing(content: Value) -> Self {
        Self::new(StreamEventType::Executing, content)
    }

    pub fn summary(text: impl Into<String>) -> Self {
        Self::new(StreamEventType::Summary, Value::String(text.into()))
    }

    pub fn summary_error(text: impl Into<String>) -> Self {
        Self::new(StreamEventType::SummaryError, Value::String(text.into()))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(StreamEventType::Error, Value::String(message.into()))
    }

    pub fn final_result(output: &PlanOutput) -> Self {
        Self::new(
            StreamEventType::FinalResult,
            serde_json::to_value(output).unwrap_or(Value::Null),
        )
    }

    /// Encode as one NDJSON line, newline included.
    pub fn to_ndjson(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        line.push('\n');
        line
    }

    /// Decode the content of a `final_result` record.
    pub fn into_plan_output(self) -> Option<PlanOutput> {
        match self.event_type {
            StreamEventType::FinalResult => serde_json::from_value(self.content).ok(),
            _ => None,
        }
    }
}
