//! Shared test helpers and mock adapter.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use moai::provider::{EventStream, ProviderAdapter, SendOptions};
use moai::types::*;

enum Script {
    Events(Vec<StreamEvent>),
    /// Yield the events, then stay open until the call is cancelled.
    Hang(Vec<StreamEvent>),
}

/// An adapter that replays scripted event sequences, one per call.
pub struct MockAdapter {
    model_id: String,
    scripts: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<Vec<ConversationTurn>>>,
    cancels: AtomicUsize,
    current: Mutex<CancellationToken>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            model_id: "mock-model".to_string(),
            scripts: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
            current: Mutex::new(CancellationToken::new()),
        }
    }

    /// Queue the events for the next call.
    pub fn script(self, events: Vec<StreamEvent>) -> Self {
        self.scripts.lock().unwrap().push_back(Script::Events(events));
        self
    }

    /// Queue events after which the next call never finishes on its own.
    pub fn hang_after(self, events: Vec<StreamEvent>) -> Self {
        self.scripts.lock().unwrap().push_back(Script::Hang(events));
        self
    }

    /// Turns received by each call so far.
    pub fn calls(&self) -> Vec<Vec<ConversationTurn>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn send(&self, turns: &[ConversationTurn], options: &SendOptions) -> EventStream {
        self.calls.lock().unwrap().push(turns.to_vec());
        let token = options.cancel.child_token();
        *self.current.lock().unwrap() = token.clone();
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::Events(vec![StreamEvent::done(DoneReason::Stop)]));

        match script {
            Script::Events(events) => futures::stream::iter(events).boxed(),
            Script::Hang(events) => {
                async_stream::stream! {
                    for event in events {
                        yield event;
                    }
                    token.cancelled().await;
                }
                .boxed()
            }
        }
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.current.lock().unwrap().cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.current.lock().unwrap().is_cancelled()
    }
}

/// `text` as deltas of `size` characters each.
pub fn deltas(text: &str, size: usize) -> Vec<StreamEvent> {
    text.chars()
        .collect::<Vec<_>>()
        .chunks(size.max(1))
        .map(|chunk| StreamEvent::delta(chunk.iter().collect::<String>()))
        .collect()
}

/// Deltas for `text` followed by `done` with `reason`.
pub fn reply(text: &str, reason: DoneReason) -> Vec<StreamEvent> {
    let mut events = deltas(text, 4);
    events.push(StreamEvent::done(reason));
    events
}

/// Concatenated text of every delta in `events`.
pub fn joined(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Delta { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}
