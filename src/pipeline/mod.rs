//! One conversation turn, end to end.
//!
//! ```text
//! idle -> sending -> streaming -> { continuing -> streaming | done | cancelled | errored }
//! done -> parsing -> dispatching -> completed
//! ```
//!
//! [`ChatPipeline::run`] sends the turn through a [`ContinuationController`],
//! accumulates it with a [`ChunkAggregator`], scans the finished transcript
//! for action blocks and dispatches them. The `stream-complete` signal is
//! cleared when the turn starts and raised once it has settled, whatever the
//! outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::actions::{ActionBlock, ActionDispatcher, ActionResult, OutputTagParser, Workspace};
use crate::aggregator::{ChunkAggregator, Flush, FlushPolicy, Transcript, TranscriptStatus};
use crate::config::MoaiConfig;
use crate::continuation::{ContinuationController, ContinuationPolicy};
use crate::error::MoaiError;
use crate::provider::{create_adapter, ModelRef, ProviderAdapter};
use crate::session::SessionContext;
use crate::signal::{SignalStore, STREAM_COMPLETE};
use crate::types::{ConversationTurn, StreamEvent};

/// Where a logical request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RequestState {
    Idle,
    Sending,
    Streaming,
    Continuing,
    Done,
    Parsing,
    Dispatching,
    Completed,
    Cancelled,
    Errored,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Cancelled | RequestState::Errored
        )
    }
}

/// Observer of state transitions.
pub type StateSink = Arc<dyn Fn(RequestState) + Send + Sync>;

/// Observer of transcript flushes.
pub type SharedFlushSink = Arc<dyn Fn(&Flush) + Send + Sync>;

/// Resolves the adapter for a turn.
pub type AdapterFactory = Arc<
    dyn Fn(&ModelRef, &MoaiConfig) -> Result<Arc<dyn ProviderAdapter>, MoaiError> + Send + Sync,
>;

/// Everything one turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Terminal state: completed, cancelled or errored.
    pub state: RequestState,
    pub transcript: Transcript,
    pub blocks: Vec<ActionBlock>,
    pub results: Vec<ActionResult>,
    /// Turn-level failure shown once to the user.
    pub error: Option<String>,
}

impl TurnOutcome {
    fn errored(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            state: RequestState::Errored,
            transcript: Transcript::default(),
            blocks: Vec::new(),
            results: Vec::new(),
            error: Some(error),
        }
    }

    /// The reply as a history turn for the next request.
    pub fn assistant_turn(&self) -> ConversationTurn {
        ConversationTurn::assistant(self.transcript.text())
    }
}

pub struct ChatPipeline {
    parser: Arc<OutputTagParser>,
    dispatcher: ActionDispatcher,
    signals: SignalStore,
    adapters: AdapterFactory,
    continuation: Option<ContinuationPolicy>,
    flush: Option<FlushPolicy>,
    dispatch_actions: bool,
    on_state: Option<StateSink>,
    on_flush: Option<SharedFlushSink>,
}

impl ChatPipeline {
    /// Pipeline with the built-in handlers acting on `workspace` and adapters
    /// from [`create_adapter`].
    pub fn new(workspace: Arc<dyn Workspace>) -> Result<Self, MoaiError> {
        let parser = Arc::new(OutputTagParser::new()?);
        let dispatcher = ActionDispatcher::with_builtins(parser.clone(), workspace);
        Ok(Self::with_dispatcher(parser, dispatcher))
    }

    /// Pipeline around an existing parser and dispatcher.
    pub fn with_dispatcher(parser: Arc<OutputTagParser>, dispatcher: ActionDispatcher) -> Self {
        Self {
            parser,
            dispatcher,
            signals: SignalStore::new(),
            adapters: Arc::new(create_adapter),
            continuation: None,
            flush: None,
            dispatch_actions: true,
            on_state: None,
            on_flush: None,
        }
    }

    pub fn with_adapter_factory(mut self, factory: AdapterFactory) -> Self {
        self.adapters = factory;
        self
    }

    /// Use one adapter for every turn.
    pub fn with_adapter(self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.with_adapter_factory(Arc::new(
            move |_: &ModelRef, _: &MoaiConfig| -> Result<Arc<dyn ProviderAdapter>, MoaiError> {
                Ok(adapter.clone())
            },
        ))
    }

    pub fn with_signals(mut self, signals: SignalStore) -> Self {
        self.signals = signals;
        self
    }

    /// Override the continuation policy from the settings file.
    pub fn with_continuation(mut self, policy: ContinuationPolicy) -> Self {
        self.continuation = Some(policy);
        self
    }

    /// Override the flush policy from the settings file.
    pub fn with_flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.flush = Some(policy);
        self
    }

    /// When `false`, blocks are parsed but never dispatched.
    pub fn with_dispatch_actions(mut self, dispatch: bool) -> Self {
        self.dispatch_actions = dispatch;
        self
    }

    pub fn with_state_sink(mut self, sink: StateSink) -> Self {
        self.on_state = Some(sink);
        self
    }

    pub fn with_flush_sink(mut self, sink: SharedFlushSink) -> Self {
        self.on_flush = Some(sink);
        self
    }

    pub fn signals(&self) -> &SignalStore {
        &self.signals
    }

    pub fn parser(&self) -> &OutputTagParser {
        &self.parser
    }

    fn emit(&self, state: RequestState) {
        debug!(state = %state, "request state");
        if let Some(sink) = &self.on_state {
            sink(state);
        }
    }

    /// Run one logical request for `turns`.
    pub async fn run(
        &self,
        session: &SessionContext,
        turns: Vec<ConversationTurn>,
    ) -> TurnOutcome {
        self.signals.set(STREAM_COMPLETE, false);
        let span = info_span!("turn", request_id = %Uuid::new_v4(), model = %session.model);
        let outcome = self.run_turn(session, turns).instrument(span.clone()).await;
        let _entered = span.enter();
        self.emit(outcome.state);
        info!(
            state = %outcome.state,
            chars = outcome.transcript.text().len(),
            blocks = outcome.blocks.len(),
            failed = outcome.results.iter().filter(|r| !r.is_success()).count(),
            "turn settled"
        );
        self.signals.set(STREAM_COMPLETE, true);
        outcome
    }

    async fn run_turn(
        &self,
        session: &SessionContext,
        turns: Vec<ConversationTurn>,
    ) -> TurnOutcome {
        self.emit(RequestState::Sending);

        let adapter = match (self.adapters)(&session.model, &session.config) {
            Ok(adapter) => adapter,
            Err(e) => return TurnOutcome::errored(e.to_string()),
        };

        let settings = session.config.settings();
        let policy = self
            .continuation
            .unwrap_or_else(|| ContinuationPolicy::from(&settings.continuation));
        let flush = self
            .flush
            .unwrap_or_else(|| FlushPolicy::from(&settings.flush));

        // Streaming is reported on the first delta of every provider call.
        let awaiting_delta = Arc::new(AtomicBool::new(true));
        let mut controller = ContinuationController::new(adapter, policy);
        if let Some(sink) = self.on_state.clone() {
            let awaiting = awaiting_delta.clone();
            controller = controller.with_step_hook(Arc::new(move |_step: u32| {
                awaiting.store(true, Ordering::SeqCst);
                sink(RequestState::Continuing);
            }));
        }

        let on_state = self.on_state.clone();
        let events = controller
            .run(turns, session.send_options())
            .inspect(move |event| {
                if matches!(event, StreamEvent::Delta { .. })
                    && awaiting_delta.swap(false, Ordering::SeqCst)
                {
                    if let Some(sink) = &on_state {
                        sink(RequestState::Streaming);
                    }
                }
            });

        let mut aggregator = ChunkAggregator::new(flush);
        if let Some(sink) = self.on_flush.clone() {
            aggregator = aggregator.with_sink(Box::new(move |f: &Flush| sink(f)));
        }
        let transcript = aggregator.consume(events, &session.cancel).await;

        match transcript.status().clone() {
            TranscriptStatus::Cancelled => {
                return TurnOutcome {
                    state: RequestState::Cancelled,
                    transcript,
                    blocks: Vec::new(),
                    results: Vec::new(),
                    error: None,
                }
            }
            TranscriptStatus::Errored(detail) => {
                return TurnOutcome {
                    state: RequestState::Errored,
                    transcript,
                    blocks: Vec::new(),
                    results: Vec::new(),
                    error: Some(detail),
                }
            }
            TranscriptStatus::Streaming
            | TranscriptStatus::Completed
            | TranscriptStatus::Truncated => {}
        }

        self.emit(RequestState::Done);
        self.emit(RequestState::Parsing);
        let blocks = self.parser.parse(transcript.text());
        debug!(blocks = blocks.len(), "transcript parsed");

        let mut results = Vec::new();
        if self.dispatch_actions && !blocks.is_empty() {
            self.emit(RequestState::Dispatching);
            results = self
                .dispatcher
                .dispatch(&blocks, transcript.text(), &session.cancel)
                .await;
        }

        let state = if session.cancel.is_cancelled() {
            RequestState::Cancelled
        } else {
            RequestState::Completed
        };
        TurnOutcome {
            state,
            transcript,
            blocks,
            results,
            error: None,
        }
    }
}
