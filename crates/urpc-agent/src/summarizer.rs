//! Natural-language summaries of executed plans.

use std::fmt::Write;
use std::sync::Arc;

use tracing::{debug, warn};
use urpc_core::{LlmClient, LlmRequest, StepOutput};

const SUMMARY_INSTRUCTION: &str = "You summarize the outcome of data operations for the person \
who requested them. Answer in plain prose, in at most a few sentences. Mention what succeeded, \
what failed and the key values returned. Do not output code, JSON or execution plans.";

/// Longest JSON rendering of one step's data included in the summary request.
const MAX_DATA_CHARS: usize = 1_500;

/// Secondary model call that explains step results in prose.
#[derive(Clone)]
pub struct Summarizer {
    client: Arc<dyn LlmClient>,
}

impl Summarizer {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    /// Summarize `results` for the original `input`.
    ///
    /// A failed model call comes back as `Err` with a readable message.
    pub async fn summarize(
        &self,
        input: &str,
        results: &[StepOutput],
        model: Option<String>,
    ) -> Result<String, String> {
        let request = LlmRequest::new(SUMMARY_INSTRUCTION, render_results(input, results)).with_model(model);

        match self.client.complete(request).await {
            Ok(text) if !text.trim().is_empty() => {
                debug!(chars = text.len(), "summary generated");
                Ok(text.trim().to_string())
            }
            Ok(_) => {
                warn!("summary model returned an empty response");
                Err("Summary unavailable: the model returned no text".to_string())
            }
            Err(err) => {
                warn!(error = %err, "summary model call failed");
                Err(format!("Summary unavailable: {}", err))
            }
        }
    }
}

fn render_results(input: &str, results: &[StepOutput]) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "Request: {}", input);
    let _ = writeln!(text, "Results:");
    for (index, result) in results.iter().enumerate() {
        let status = if result.success { "ok" } else { "failed" };
        let _ = write!(
            text,
            "{}. {} {} ({}): {}",
            index + 1,
            result.operation,
            result.entity,
            result.source,
            status
        );
        if result.success {
            let data = serde_json::to_string(&result.data).unwrap_or_default();
            let _ = write!(text, " data={}", clip(&data, MAX_DATA_CHARS));
        } else {
            let _ = write!(text, " message={}", result.message);
        }
        text.push('\n');
    }
    text
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max_chars).collect();
    clipped.push_str("...");
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use serde_json::json;

    fn results() -> Vec<StepOutput> {
        vec![
            StepOutput::succeeded("findMany", "user", "memory", json!([{"name": "John"}]), "code"),
            StepOutput::failed("create", "post", "memory", "Failed to create post in memory", "code"),
        ]
    }

    #[tokio::test]
    async fn test_summary_text_is_returned() {
        let client = Arc::new(MockLlmClient::new("  One user found; the post could not be created. "));
        let summarizer = Summarizer::new(client.clone());

        let text = summarizer.summarize("find users", &results(), None).await.unwrap();
        assert_eq!(text, "One user found; the post could not be created.");

        let request = &client.requests()[0];
        let prompt = request.last_user_message().unwrap();
        assert!(prompt.contains("Request: find users"));
        assert!(prompt.contains(r#"data=[{"name":"John"}]"#));
        assert!(prompt.contains("message=Failed to create post in memory"));
    }

    #[tokio::test]
    async fn test_failure_becomes_message() {
        let client = Arc::new(MockLlmClient::failing("quota exceeded"));
        let err = Summarizer::new(client)
            .summarize("find users", &results(), None)
            .await
            .unwrap_err();
        assert!(err.starts_with("Summary unavailable"));
        assert!(err.contains("quota exceeded"));
    }

    #[test]
    fn test_clip() {
        assert_eq!(clip("abcdef", 3), "abc...");
        assert_eq!(clip("abc", 3), "abc");
    }
}
