//! NDJSON event stream.

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use urpc_core::{PlanOutput, Result, StreamEvent, StreamEventType, UrpcError};

/// Splits a byte stream into NDJSON lines.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<StreamEvent>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = decode_line(&line[..pos]) {
                events.push(event);
            }
        }
        events
    }

    /// Decode whatever is left once the body ends.
    pub fn finish(&mut self) -> Option<Result<StreamEvent>> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest)
    }
}

fn decode_line(line: &[u8]) -> Option<Result<StreamEvent>> {
    let line = std::str::from_utf8(line).map(str::trim);
    match line {
        Ok("") => None,
        Ok(line) => Some(
            serde_json::from_str(line).map_err(|e| UrpcError::SerializationError(e.to_string())),
        ),
        Err(e) => Some(Err(UrpcError::SerializationError(e.to_string()))),
    }
}

/// Events of one streamed agent request.
pub struct EventStream {
    receiver: mpsc::Receiver<Result<StreamEvent>>,
    _handle: tokio::task::JoinHandle<()>,
}

impl EventStream {
    /// Decode `body` on a background task.
    pub fn from_body<S, B, E>(body: S) -> Self
    where
        S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(100);

        let handle = tokio::spawn(async move {
            let mut body = Box::pin(body);
            let mut decoder = NdjsonDecoder::new();

            while let Some(chunk) = body.next().await {
                let events = match chunk {
                    Ok(bytes) => decoder.push(bytes.as_ref()),
                    Err(e) => {
                        warn!(error = %e, "event stream interrupted");
                        let _ = tx.send(Err(UrpcError::ConnectionError(e.to_string()))).await;
                        return;
                    }
                };
                for event in events {
                    if tx.send(event).await.is_err() {
                        debug!("event stream reader dropped");
                        return;
                    }
                }
            }

            if let Some(event) = decoder.finish() {
                let _ = tx.send(event).await;
            }
        });

        Self {
            receiver: rx,
            _handle: handle,
        }
    }

    /// Get the next event.
    pub async fn next(&mut self) -> Option<Result<StreamEvent>> {
        self.receiver.recv().await
    }

    /// Drain the stream and return the final output.
    ///
    /// An `error` event, or a body that ends without `final_result`, is an
    /// error.
    pub async fn final_output(mut self) -> Result<PlanOutput> {
        while let Some(event) = self.next().await {
            let event = event?;
            match event.event_type {
                StreamEventType::FinalResult => {
                    return event.into_plan_output().ok_or_else(|| {
                        UrpcError::SerializationError("malformed final_result".to_string())
                    });
                }
                StreamEventType::Error => {
                    let message = event.content.as_str().unwrap_or_default().to_string();
                    return Err(UrpcError::Internal(message));
                }
                _ => {}
            }
        }
        Err(UrpcError::ConnectionError(
            "stream ended without a final result".to_string(),
        ))
    }
}
