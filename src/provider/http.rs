//! Shared HTTP client, chunk framing, and in-flight request control.

use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::MoaiError;
use crate::types::{DoneReason, StreamEvent};
use crate::util::timeout::with_timeout;

use super::EventStream;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
///
/// No overall request timeout is set here: streamed answers can run for
/// minutes. Per-call limits come from [`super::SendOptions::timeout`].
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    })
}

/// Build default headers for a Bearer-token API.
pub fn bearer_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if !api_key.is_empty() {
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
            headers.insert(AUTHORIZATION, val);
        }
    }
    headers
}

/// Build Anthropic-style headers (x-api-key).
pub fn anthropic_headers(api_key: &str, version: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(api_key) {
        headers.insert("x-api-key", val);
    }
    if let Ok(val) = HeaderValue::from_str(version) {
        headers.insert("anthropic-version", val);
    }
    headers
}

/// Payload of one SSE line.
#[derive(Debug, PartialEq, Eq)]
pub enum SseLine<'a> {
    Data(&'a str),
    /// The `[DONE]` sentinel.
    Sentinel,
    /// Comments, `event:` names, ids, blank keep-alives.
    Other,
}

/// Classify an SSE line.
pub fn parse_sse_line(line: &str) -> SseLine<'_> {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Other;
    };
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data == "[DONE]" {
        SseLine::Sentinel
    } else if data.is_empty() {
        SseLine::Other
    } else {
        SseLine::Data(data)
    }
}

/// Map an HTTP error status to an error.
pub fn status_to_error(status: u16, body: &str) -> MoaiError {
    match status {
        401 | 403 => MoaiError::Authentication(body.to_string()),
        429 => MoaiError::RateLimited {
            retry_after_ms: extract_retry_after(body),
        },
        _ => MoaiError::api(status, body),
    }
}

fn extract_retry_after(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("retry_after"))
                .and_then(|r| r.as_f64())
                .map(|s| (s * 1000.0) as u64)
        })
}

/// Splits a byte stream into complete lines.
///
/// Bytes are buffered until a newline arrives, so multi-byte characters
/// split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every line they complete, without the newline.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let rest = self.pending.split_off(pos + 1);
            let raw = std::mem::replace(&mut self.pending, rest);
            let line = String::from_utf8_lossy(&raw[..pos]);
            lines.push(line.trim_end_matches('\r').to_string());
        }
        lines
    }

    /// Remaining bytes after the stream closed without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&raw).trim_end_matches('\r').to_string();
        Some(line)
    }
}

/// How a provider frames its streamed chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `data: <json>` lines, optionally ending in `data: [DONE]`.
    ServerSentEvents,
    /// One JSON object per line.
    JsonLines,
}

/// Converts one framed payload into canonical events.
///
/// Decoders are stateful: some providers announce the finish reason and the
/// end of the message in separate frames.
pub trait ChunkDecoder: Send + 'static {
    fn decode(&mut self, payload: &str) -> Result<Vec<StreamEvent>, MoaiError>;
}

/// Tracks the cancellation token of the call currently in flight.
#[derive(Debug, Default)]
pub struct InFlight {
    token: Mutex<CancellationToken>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a call: derive a child of the caller's token and remember it.
    pub fn begin(&self, parent: &CancellationToken) -> CancellationToken {
        let token = parent.child_token();
        *self.token.lock().unwrap_or_else(|p| p.into_inner()) = token.clone();
        token
    }

    /// Abort the current call, if any.
    pub fn cancel(&self) {
        self.token
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .cancel();
    }

    /// Whether the most recent call was aborted.
    pub fn is_cancelled(&self) -> bool {
        self.token
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_cancelled()
    }
}

/// Send a prepared request, honoring cancellation and the header timeout.
pub async fn send_request(
    request: reqwest::RequestBuilder,
    timeout: Option<Duration>,
    token: &CancellationToken,
) -> Result<reqwest::Response, MoaiError> {
    let call = async {
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status.as_u16(), &body));
        }
        Ok(resp)
    };

    tokio::select! {
        _ = token.cancelled() => Err(MoaiError::Cancelled),
        result = async {
            match timeout {
                Some(limit) => with_timeout(limit, call).await,
                None => call.await,
            }
        } => result,
    }
}

/// Human-readable message from a provider error object.
pub fn error_message(err: &serde_json::Value) -> String {
    err.get("message")
        .and_then(|m| m.as_str())
        .or_else(|| err.as_str())
        .unwrap_or("provider reported an error")
        .to_string()
}

/// A stream holding a single error event.
///
/// Cancellation is not an error: the stream is simply empty.
pub fn error_stream(error: &MoaiError) -> EventStream {
    if matches!(error, MoaiError::Cancelled) {
        return Box::pin(futures::stream::empty());
    }
    Box::pin(futures::stream::iter(vec![StreamEvent::error(error.to_string())]))
}

/// Stream a framed response body through a decoder.
///
/// Ends after the first terminal event. Malformed payloads are logged and
/// skipped. When `token` fires the stream ends without a terminal event;
/// callers observe cancellation on the token itself.
pub fn framed_events<D: ChunkDecoder>(
    resp: reqwest::Response,
    framing: Framing,
    mut decoder: D,
    idle_timeout: Option<Duration>,
    token: CancellationToken,
) -> EventStream {
    let byte_stream = resp.bytes_stream();

    let stream = async_stream::stream! {
        let mut lines = LineBuffer::new();
        futures::pin_mut!(byte_stream);

        'read: loop {
            let next = tokio::select! {
                _ = token.cancelled() => {
                    debug!("stream cancelled by caller");
                    break 'read;
                }
                next = async {
                    match idle_timeout {
                        Some(limit) => tokio::time::timeout(limit, byte_stream.next()).await.ok(),
                        None => Some(byte_stream.next().await),
                    }
                } => next,
            };

            let closed = matches!(next, Some(None));
            let produced = match next {
                None => {
                    let limit = idle_timeout.map(|d| d.as_millis()).unwrap_or_default();
                    yield StreamEvent::error(MoaiError::Timeout(limit as u64).to_string());
                    break 'read;
                }
                Some(None) => lines.finish().into_iter().collect::<Vec<_>>(),
                Some(Some(Err(e))) => {
                    yield StreamEvent::error(MoaiError::Network(e).to_string());
                    break 'read;
                }
                Some(Some(Ok(chunk))) => lines.push(&chunk),
            };

            for line in produced {
                let payload = match framing {
                    Framing::ServerSentEvents => match parse_sse_line(line.trim()) {
                        SseLine::Data(data) => data.to_string(),
                        SseLine::Sentinel => {
                            yield StreamEvent::done(DoneReason::Stop);
                            break 'read;
                        }
                        SseLine::Other => continue,
                    },
                    Framing::JsonLines => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        trimmed.to_string()
                    }
                };

                match decoder.decode(&payload) {
                    Ok(events) => {
                        for event in events {
                            let terminal = event.is_terminal();
                            yield event;
                            if terminal {
                                break 'read;
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "skipping malformed chunk"),
                }
            }

            if closed {
                yield StreamEvent::error("connection closed before the response completed");
                break 'read;
            }
        }
    };

    Box::pin(stream)
}
