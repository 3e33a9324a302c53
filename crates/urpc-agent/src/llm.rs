//! Language-model clients.
//!
//! [`HttpLlmClient`] speaks the OpenAI-compatible chat-completions protocol,
//! with and without server-sent-event streaming. [`MockLlmClient`] replays
//! scripted responses for tests and offline runs.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use urpc_core::{ChatRole, LlmClient, LlmError, LlmRequest, TokenStream};

/// HTTP client config (OpenAI-compatible).
#[derive(Debug, Clone)]
pub struct HttpLlmClientConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for HttpLlmClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            timeout_secs: 60,
        }
    }
}

/// HTTP LLM client using an OpenAI-compatible API.
pub struct HttpLlmClient {
    client: reqwest::Client,
    config: HttpLlmClientConfig,
}

impl HttpLlmClient {
    pub fn new(config: HttpLlmClientConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpLlmClientConfig {
        &self.config
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.config.api_key {
            let value = format!("Bearer {}", key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&value).map_err(|e| LlmError::Http(e.to_string()))?,
            );
        }
        Ok(headers)
    }

    fn body(&self, request: LlmRequest, stream: bool) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(WireMessage {
            role: ChatRole::System,
            content: request.instruction,
        });
        messages.extend(request.messages.into_iter().map(|m| WireMessage {
            role: m.role,
            content: m.content,
        }));

        ChatRequest {
            model: request.model.unwrap_or_else(|| self.config.model.clone()),
            messages,
            temperature: self.config.temperature,
            stream,
        }
    }

    async fn send(&self, request: LlmRequest, stream: bool) -> Result<reqwest::Response, LlmError> {
        let body = self.body(request, stream);
        debug!(model = %body.model, messages = body.messages.len(), stream, "sending chat completion");

        let response = self
            .client
            .post(&self.config.endpoint)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Response(format!("HTTP {}: {}", status, text)));
        }
        Ok(response)
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: ChatRole,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError> {
        let response = self.send(request, false).await?;
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;
        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::Serialization(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Response("Missing choices".to_string()))
    }

    async fn complete_stream(&self, request: LlmRequest) -> Result<TokenStream, LlmError> {
        let response = self.send(request, true).await?;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(LlmError::Stream(e.to_string()))).await;
                        return;
                    }
                };
                for line in decoder.push(&chunk) {
                    if !forward(&tx, line).await {
                        return;
                    }
                }
            }

            if let Some(line) = decoder.finish() {
                forward(&tx, line).await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Send one decoded line on; false once the stream is over.
async fn forward(
    tx: &mpsc::Sender<Result<String, LlmError>>,
    line: Result<SseLine, LlmError>,
) -> bool {
    match line {
        Ok(SseLine::Delta(text)) => tx.send(Ok(text)).await.is_ok(),
        Ok(SseLine::Done) => false,
        Ok(SseLine::Ignore) => true,
        Err(err) => {
            warn!(error = %err, "malformed stream chunk");
            let _ = tx.send(Err(err)).await;
            false
        }
    }
}

/// Splits an SSE byte stream into lines.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<Result<SseLine, LlmError>> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            lines.push(parse_sse_line(String::from_utf8_lossy(&line).trim()));
        }
        lines
    }

    /// The unterminated tail, once the body has ended.
    fn finish(&mut self) -> Option<Result<SseLine, LlmError>> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = String::from_utf8_lossy(&rest);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| parse_sse_line(rest))
    }
}

/// One decoded server-sent-event line.
#[derive(Debug, Clone, PartialEq)]
enum SseLine {
    Delta(String),
    Done,
    Ignore,
}

fn parse_sse_line(line: &str) -> Result<SseLine, LlmError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Ignore);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if data.is_empty() {
        return Ok(SseLine::Ignore);
    }

    let value: Value =
        serde_json::from_str(data).map_err(|e| LlmError::Serialization(e.to_string()))?;
    if let Some(message) = value.pointer("/error/message").and_then(Value::as_str) {
        return Err(LlmError::Response(message.to_string()));
    }
    Ok(value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map_or(SseLine::Ignore, |text| SseLine::Delta(text.to_string())))
}

/// Scripted client for tests and offline runs.
///
/// Each call pops the next scripted response; once the script runs out the
/// last response is repeated. Streaming splits the response into chunks.
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    last: Mutex<Result<String, LlmError>>,
    chunk_chars: usize,
    stream_failure_after: Option<usize>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmClient {
    /// Always answer `response`.
    pub fn new(response: impl Into<String>) -> Self {
        Self::scripted(vec![Ok(response.into())])
    }

    /// Always fail with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::scripted(vec![Err(LlmError::Response(message.into()))])
    }

    /// Answer with each entry in turn.
    pub fn scripted(responses: Vec<Result<String, LlmError>>) -> Self {
        let last = responses
            .last()
            .cloned()
            .unwrap_or_else(|| Ok(String::new()));
        Self {
            script: Mutex::new(responses.into()),
            last: Mutex::new(last),
            chunk_chars: 16,
            stream_failure_after: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Size of streamed chunks, in characters.
    pub fn with_chunk_chars(mut self, chunk_chars: usize) -> Self {
        self.chunk_chars = chunk_chars.max(1);
        self
    }

    /// Make streams fail after emitting `chunks` chunks.
    pub fn with_stream_failure_after(mut self, chunks: usize) -> Self {
        self.stream_failure_after = Some(chunks);
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn next_response(&self, request: LlmRequest) -> Result<String, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match (scripted, self.last.lock()) {
            (Some(response), Ok(mut last)) => {
                *last = response.clone();
                response
            }
            (Some(response), Err(_)) => response,
            (None, Ok(last)) => last.clone(),
            (None, Err(_)) => Err(LlmError::Response("mock script poisoned".into())),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError> {
        self.next_response(request)
    }

    async fn complete_stream(&self, request: LlmRequest) -> Result<TokenStream, LlmError> {
        let text = self.next_response(request)?;
        let chars: Vec<char> = text.chars().collect();
        let mut items: Vec<Result<String, LlmError>> = chars
            .chunks(self.chunk_chars)
            .map(|chunk| Ok(chunk.iter().collect()))
            .collect();

        if let Some(after) = self.stream_failure_after {
            items.truncate(after);
            items.push(Err(LlmError::Stream("connection reset".into())));
        }
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use urpc_core::ChatMessage;

    #[test]
    fn test_parse_sse_lines() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap(),
            SseLine::Delta("Hel".into())
        );
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseLine::Ignore);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            SseLine::Ignore
        );
        assert!(parse_sse_line("data: {not json").is_err());
        assert!(matches!(
            parse_sse_line(r#"data: {"error":{"message":"rate limited"}}"#),
            Err(LlmError::Response(_))
        ));
    }

    #[test]
    fn test_sse_decoder_flushes_unterminated_tail() {
        let mut decoder = SseDecoder::default();
        let lines = decoder.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"A\"}}]}\n\nda");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].as_ref().unwrap(), &SseLine::Delta("A".into()));

        assert!(decoder
            .push(b"ta: {\"choices\":[{\"delta\":{\"content\":\"B\"}}]}")
            .is_empty());
        assert_eq!(decoder.finish().unwrap().unwrap(), SseLine::Delta("B".into()));
        assert!(decoder.finish().is_none());
    }

    #[tokio::test]
    async fn test_forward_stops_on_done_and_errors() {
        let (tx, mut rx) = mpsc::channel(4);
        assert!(forward(&tx, Ok(SseLine::Delta("x".into()))).await);
        assert!(forward(&tx, Ok(SseLine::Ignore)).await);
        assert!(!forward(&tx, Ok(SseLine::Done)).await);
        assert!(!forward(&tx, Err(LlmError::Stream("reset".into()))).await);
        drop(tx);

        assert_eq!(rx.recv().await.unwrap().unwrap(), "x");
        assert!(matches!(rx.recv().await, Some(Err(LlmError::Stream(_)))));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_request_body_shape() {
        let client = HttpLlmClient::new(HttpLlmClientConfig::default()).unwrap();
        let mut request = LlmRequest::new("instruction", "find users");
        request.messages.push(ChatMessage::assistant("ok"));

        let body = serde_json::to_value(client.body(request, false)).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "find users");
        assert_eq!(body["messages"][2]["role"], "assistant");
        assert!(body.get("stream").is_none());

        let request = LlmRequest::new("i", "x").with_model(Some("local".into()));
        let body = serde_json::to_value(client.body(request, true)).unwrap();
        assert_eq!(body["model"], "local");
        assert_eq!(body["stream"], true);
    }

    #[tokio::test]
    async fn test_mock_script_then_repeat() {
        let mock = MockLlmClient::scripted(vec![Ok("a".into()), Ok("b".into())]);
        assert_eq!(mock.complete(LlmRequest::new("", "1")).await.unwrap(), "a");
        assert_eq!(mock.complete(LlmRequest::new("", "2")).await.unwrap(), "b");
        assert_eq!(mock.complete(LlmRequest::new("", "3")).await.unwrap(), "b");
        assert_eq!(mock.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_stream_chunks_and_failure() {
        let mock = MockLlmClient::new("abcdefg").with_chunk_chars(3);
        let chunks: Vec<String> = mock
            .complete_stream(LlmRequest::new("", ""))
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["abc", "def", "g"]);

        let failing = MockLlmClient::new("abcdefg")
            .with_chunk_chars(3)
            .with_stream_failure_after(1);
        let items: Vec<Result<String, LlmError>> = failing
            .complete_stream(LlmRequest::new("", ""))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }
}
