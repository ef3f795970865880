//! Transcript accumulation and throttled flush notifications.
//!
//! The aggregator owns the authoritative text of one logical request. It
//! batches deltas into [`Flush`] notifications so a renderer can repaint at
//! its own pace, and it always emits a final flush when the transcript is
//! sealed.

use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::FlushSettings;
use crate::types::{DoneReason, StreamEvent};

/// How a transcript ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptStatus {
    Streaming,
    Completed,
    /// Still truncated after the continuation limit.
    Truncated,
    Cancelled,
    Errored(String),
}

/// The accumulated text of one logical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    text: String,
    status: TranscriptStatus,
}

impl Default for Transcript {
    fn default() -> Self {
        Self {
            text: String::new(),
            status: TranscriptStatus::Streaming,
        }
    }
}

impl Transcript {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn status(&self) -> &TranscriptStatus {
        &self.status
    }

    pub fn is_sealed(&self) -> bool {
        self.status != TranscriptStatus::Streaming
    }

    /// Whether the text is complete enough to scan for action blocks.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            TranscriptStatus::Completed | TranscriptStatus::Truncated
        )
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// When to notify the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Flush once this many characters are pending. `0` flushes every delta.
    pub min_chars: usize,
    /// Flush pending text at least this often while streaming.
    pub interval: Option<Duration>,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self::from(&FlushSettings::default())
    }
}

impl From<&FlushSettings> for FlushPolicy {
    fn from(settings: &FlushSettings) -> Self {
        Self {
            min_chars: settings.min_chars,
            interval: (settings.interval_ms > 0)
                .then(|| Duration::from_millis(settings.interval_ms)),
        }
    }
}

impl FlushPolicy {
    /// Flush on every delta.
    pub fn immediate() -> Self {
        Self {
            min_chars: 0,
            interval: None,
        }
    }
}

/// One repaint notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flush {
    /// Starts at 0 and increases by one per flush.
    pub seq: u64,
    /// Text added since the previous flush.
    pub appended: String,
    /// Transcript length in bytes after this flush.
    pub transcript_len: usize,
    /// Set on the flush that seals the transcript.
    pub is_final: bool,
}

/// Receives flushes in order.
pub type FlushSink = Box<dyn FnMut(&Flush) + Send>;

pub struct ChunkAggregator {
    policy: FlushPolicy,
    transcript: Transcript,
    pending: String,
    pending_chars: usize,
    seq: u64,
    sink: Option<FlushSink>,
}

impl ChunkAggregator {
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            policy,
            transcript: Transcript::default(),
            pending: String::new(),
            pending_chars: 0,
            seq: 0,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: FlushSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Apply one event. Returns the flush it triggered, if any.
    ///
    /// Events after the transcript is sealed are ignored.
    pub fn push(&mut self, event: StreamEvent) -> Option<Flush> {
        if self.transcript.is_sealed() {
            return None;
        }
        match event {
            StreamEvent::Delta { text } => {
                self.transcript.text.push_str(&text);
                self.pending_chars += text.chars().count();
                self.pending.push_str(&text);
                if self.pending_chars >= self.policy.min_chars.max(1) {
                    self.flush(false)
                } else {
                    None
                }
            }
            StreamEvent::Done {
                reason: DoneReason::Stop,
            } => self.seal(TranscriptStatus::Completed),
            StreamEvent::Done {
                reason: DoneReason::Truncated,
            } => self.seal(TranscriptStatus::Truncated),
            StreamEvent::Error { detail } => self.seal(TranscriptStatus::Errored(detail)),
        }
    }

    /// Flush pending text, if there is any. Driven by the flush interval.
    pub fn tick(&mut self) -> Option<Flush> {
        if self.transcript.is_sealed() || self.pending.is_empty() {
            return None;
        }
        self.flush(false)
    }

    /// Seal the transcript with `status` and emit the final flush.
    pub fn seal(&mut self, status: TranscriptStatus) -> Option<Flush> {
        if self.transcript.is_sealed() {
            return None;
        }
        debug!(status = ?status, len = self.transcript.text.len(), "transcript sealed");
        self.transcript.status = status;
        self.flush(true)
    }

    fn flush(&mut self, is_final: bool) -> Option<Flush> {
        let flush = Flush {
            seq: self.seq,
            appended: std::mem::take(&mut self.pending),
            transcript_len: self.transcript.text.len(),
            is_final,
        };
        self.pending_chars = 0;
        self.seq += 1;
        if let Some(sink) = self.sink.as_mut() {
            sink(&flush);
        }
        Some(flush)
    }

    /// Drive `stream` to completion and return the sealed transcript.
    ///
    /// Cancellation keeps the partial text and marks it cancelled. A stream
    /// that ends without a terminal event counts as cancelled when `cancel`
    /// has fired, and as an error otherwise.
    pub async fn consume<S>(mut self, stream: S, cancel: &CancellationToken) -> Transcript
    where
        S: Stream<Item = StreamEvent> + Send,
    {
        futures::pin_mut!(stream);
        let mut ticker = self.policy.interval.map(|period| {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        while !self.transcript.is_sealed() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.seal(TranscriptStatus::Cancelled);
                }
                next = stream.next() => match next {
                    Some(event) => {
                        self.push(event);
                    }
                    None if cancel.is_cancelled() => {
                        self.seal(TranscriptStatus::Cancelled);
                    }
                    None => {
                        self.seal(TranscriptStatus::Errored(
                            "stream ended without a terminal event".to_string(),
                        ));
                    }
                },
                _ = async {
                    match ticker.as_mut() {
                        Some(ticker) => {
                            ticker.tick().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    self.tick();
                }
            }
        }

        self.transcript
    }
}
