//! Plan parser.
//!
//! Pulls an execution plan out of raw model text. Never fails: anything
//! unusable degrades to an empty plan with a diagnostic message.

use serde_json::Value;
use tracing::{debug, info, warn};
use urpc_core::{ExecutionPlan, PlanOutput, Step};

use crate::decoder::call_prefix_len;
use crate::placeholder::PlaceholderResolver;

/// Diagnostic attached to the empty plan.
pub const NO_PLAN_MESSAGE: &str =
    "Could not extract an execution plan or repository call from the model response";

/// Description given to a plan recovered from a bare call.
pub const SINGLE_CALL_DESCRIPTION: &str = "Execute the requested operation";

const MAX_LOG_CHARS: usize = 2_000;

/// Opening braces tried as the start of a JSON plan.
const MAX_JSON_CANDIDATES: usize = 64;

#[derive(Clone, Default)]
pub struct PlanParser {
    resolver: PlaceholderResolver,
}

impl PlanParser {
    pub fn new(resolver: PlaceholderResolver) -> Self {
        Self { resolver }
    }

    /// Parse model output into a resolved plan with no results.
    pub fn parse(&self, text: &str) -> PlanOutput {
        if let Some(output) = self.parse_json_plan(text) {
            info!(
                steps = output.execution_plan.steps.len(),
                summary = output.wants_summary(),
                "parsed execution plan"
            );
            return output;
        }

        if let Some(code) = find_repo_call(text) {
            info!("model returned a single repository call");
            let plan = ExecutionPlan::new(vec![Step::new(SINGLE_CALL_DESCRIPTION, code, 1)]);
            return PlanOutput::from_plan(self.resolver.resolve(&plan));
        }

        warn!(
            response = %truncate_for_log(text, MAX_LOG_CHARS),
            "no execution plan in model response"
        );
        PlanOutput::from_plan(ExecutionPlan::empty()).with_message(NO_PLAN_MESSAGE)
    }

    fn parse_json_plan(&self, text: &str) -> Option<PlanOutput> {
        let candidates = text
            .match_indices('{')
            .take(MAX_JSON_CANDIDATES)
            .filter_map(|(start, _)| balanced_object(text, start))
            .chain(outer_object(text));

        for candidate in candidates {
            let Ok(value) = serde_json::from_str::<Value>(candidate) else {
                continue;
            };
            let plan_value = match value.get("execution_plan") {
                Some(plan) => plan.clone(),
                None if value.get("steps").map_or(false, Value::is_array) => value.clone(),
                None => continue,
            };

            match serde_json::from_value::<ExecutionPlan>(plan_value) {
                Ok(plan) => {
                    if plan.has_count_mismatch() {
                        debug!(
                            claimed = plan.total_steps,
                            actual = plan.steps.len(),
                            "total_steps disagrees with steps"
                        );
                    }
                    let mut output = PlanOutput::from_plan(self.resolver.resolve(&plan));
                    output.summary = value.get("summary").and_then(Value::as_bool);
                    return Some(output);
                }
                Err(err) => {
                    warn!(error = %err, "execution_plan present but malformed");
                }
            }
        }
        None
    }
}

/// The `{...}` starting at `start`, matched with awareness of JSON strings.
fn balanced_object(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// First `{` to last `}`.
fn outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// The first `repo(...).method(...)` expression in free text.
fn find_repo_call(text: &str) -> Option<&str> {
    text.match_indices("repo").find_map(|(start, _)| {
        let glued = text[..start]
            .chars()
            .next_back()
            .map_or(false, |c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.'));
        if glued {
            return None;
        }
        call_prefix_len(&text[start..]).map(|len| &text[start..start + len])
    })
}

fn truncate_for_log(input: &str, max_chars: usize) -> String {
    let char_count = input.chars().count();
    if char_count <= max_chars {
        return input.to_string();
    }
    let mut preview: String = input.chars().take(max_chars).collect();
    preview.push_str(&format!("... [truncated, total_chars={}]", char_count));
    preview
}
