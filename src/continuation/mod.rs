//! Transparent recovery from length-truncated responses.
//!
//! [`ContinuationController`] wraps an adapter and turns a chain of physical
//! provider calls into one logical stream. When a call ends with
//! `done/truncated`, the controller takes the last few characters of what it
//! has so far as a splice anchor and asks the backend to carry on from
//! there. Deltas are spliced onto the running text so the caller never sees
//! the seam.

mod echo;

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::config::ContinuationSettings;
use crate::provider::http::InFlight;
use crate::provider::{EventStream, ProviderAdapter, SendOptions};
use crate::types::{ConversationTurn, DoneReason, StreamEvent};

use echo::EchoGuard;

/// Tuning for continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuationPolicy {
    /// Characters taken from the end of the buffer as splice anchor.
    pub anchor_chars: usize,
    /// Continuation calls allowed after the first call.
    pub max_steps: u32,
    /// Characters held back at the start of each continuation step for echo
    /// detection. `None` means four times `anchor_chars`.
    pub echo_window: Option<usize>,
}

impl Default for ContinuationPolicy {
    fn default() -> Self {
        Self::from(&ContinuationSettings::default())
    }
}

impl From<&ContinuationSettings> for ContinuationPolicy {
    fn from(settings: &ContinuationSettings) -> Self {
        Self {
            anchor_chars: settings.anchor_chars,
            max_steps: settings.max_steps,
            echo_window: settings.echo_window,
        }
    }
}

impl ContinuationPolicy {
    pub fn with_anchor_chars(mut self, anchor_chars: usize) -> Self {
        self.anchor_chars = anchor_chars;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    fn echo_window(&self) -> usize {
        self.echo_window.unwrap_or(self.anchor_chars * 4)
    }
}

/// The last `n` characters of `text`.
pub fn tail_chars(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match text.char_indices().rev().nth(n - 1) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// Splice anchor for `buffer`.
pub fn splice_anchor(buffer: &str, anchor_chars: usize) -> &str {
    tail_chars(buffer, anchor_chars)
}

/// The user turn asking the backend to resume after `anchor`.
pub fn continuation_instruction(anchor: &str) -> String {
    format!(
        "Your previous reply was cut off. Continue it exactly where it stopped. \
         The reply so far ends with the text between the markers:\n\
         <<<{anchor}>>>\n\
         Output only the text that comes next. Do not repeat the text between the \
         markers and do not add any commentary."
    )
}

/// Turns for a continuation call: the original conversation, the partial
/// reply as an assistant turn, then the instruction.
pub fn continuation_turns(
    turns: &[ConversationTurn],
    buffer: &str,
    anchor: &str,
) -> Vec<ConversationTurn> {
    let mut next = Vec::with_capacity(turns.len() + 2);
    next.extend_from_slice(turns);
    next.push(ConversationTurn::assistant(buffer));
    next.push(ConversationTurn::user(continuation_instruction(anchor)));
    next
}

/// Called with the step number before each continuation call.
pub type StepHook = Arc<dyn Fn(u32) + Send + Sync>;

/// Drives one logical request across as many provider calls as needed.
pub struct ContinuationController {
    adapter: Arc<dyn ProviderAdapter>,
    policy: ContinuationPolicy,
    on_step: Option<StepHook>,
    in_flight: InFlight,
}

impl ContinuationController {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, policy: ContinuationPolicy) -> Self {
        Self {
            adapter,
            policy,
            on_step: None,
            in_flight: InFlight::new(),
        }
    }

    pub fn with_step_hook(mut self, hook: StepHook) -> Self {
        self.on_step = Some(hook);
        self
    }

    pub fn policy(&self) -> &ContinuationPolicy {
        &self.policy
    }

    /// Start the logical request.
    ///
    /// Yields every accepted delta in order and finishes with exactly one
    /// terminal event, except on cancellation, where the stream simply ends.
    /// Cancellation comes from `options.cancel`, from [`ProviderAdapter::cancel`]
    /// on this controller, or from the wrapped adapter's own `cancel`.
    pub fn run(&self, turns: Vec<ConversationTurn>, mut options: SendOptions) -> EventStream {
        let adapter = self.adapter.clone();
        let policy = self.policy;
        let on_step = self.on_step.clone();
        let token = self.in_flight.begin(&options.cancel);
        options.cancel = token.clone();

        let stream = async_stream::stream! {
            let mut buffer = String::new();
            let mut step: u32 = 0;
            let mut step_turns = turns.clone();
            let mut guard: Option<EchoGuard> = None;

            loop {
                if token.is_cancelled() {
                    debug!(step, "continuation chain cancelled");
                    break;
                }

                let mut upstream = adapter.send(&step_turns, &options).await;
                let mut outcome: Option<Result<DoneReason, String>> = None;

                while let Some(event) = upstream.next().await {
                    match event {
                        StreamEvent::Delta { text } => {
                            let accepted = match guard.as_mut() {
                                Some(g) => g.push(&text),
                                None => text,
                            };
                            if !accepted.is_empty() {
                                buffer.push_str(&accepted);
                                yield StreamEvent::delta(accepted);
                            }
                        }
                        StreamEvent::Done { reason } => {
                            outcome = Some(Ok(reason));
                            break;
                        }
                        StreamEvent::Error { detail } => {
                            outcome = Some(Err(detail));
                            break;
                        }
                    }
                }

                if let Some(held) = guard.take().map(EchoGuard::finish) {
                    if !held.is_empty() {
                        buffer.push_str(&held);
                        yield StreamEvent::delta(held);
                    }
                }

                match outcome {
                    Some(Ok(DoneReason::Stop)) => {
                        yield StreamEvent::done(DoneReason::Stop);
                        break;
                    }
                    Some(Ok(DoneReason::Truncated)) => {
                        if step >= policy.max_steps {
                            warn!(steps = step, "continuation limit reached");
                            yield StreamEvent::done(DoneReason::Truncated);
                            break;
                        }
                        step += 1;
                        let anchor = splice_anchor(&buffer, policy.anchor_chars).to_string();
                        debug!(
                            step,
                            anchor = %anchor,
                            buffered = buffer.len(),
                            "continuing truncated response"
                        );
                        step_turns = continuation_turns(&turns, &buffer, &anchor);
                        guard = Some(EchoGuard::new(&buffer, &anchor, policy.echo_window()));
                        if let Some(hook) = &on_step {
                            hook(step);
                        }
                    }
                    Some(Err(detail)) => {
                        yield StreamEvent::error(detail);
                        break;
                    }
                    None if token.is_cancelled() || adapter.is_cancelled() => {
                        debug!(step, "provider call cancelled");
                        token.cancel();
                        break;
                    }
                    None => {
                        yield StreamEvent::error("provider stream ended without a terminal event");
                        break;
                    }
                }
            }
        };

        Box::pin(stream)
    }
}

#[async_trait]
impl ProviderAdapter for ContinuationController {
    fn provider_name(&self) -> &str {
        self.adapter.provider_name()
    }

    fn model_id(&self) -> &str {
        self.adapter.model_id()
    }

    async fn send(&self, turns: &[ConversationTurn], options: &SendOptions) -> EventStream {
        self.run(turns.to_vec(), options.clone())
    }

    fn cancel(&self) {
        self.in_flight.cancel();
        self.adapter.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.in_flight.is_cancelled()
    }
}
