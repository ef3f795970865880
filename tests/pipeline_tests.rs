//! End-to-end tests for a single chat turn.

mod common;

use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::{reply, MockAdapter};
use moai::actions::{ActionStatus, LocalWorkspace};
use moai::aggregator::{Flush, FlushPolicy, TranscriptStatus};
use moai::config::MoaiConfig;
use moai::pipeline::{ChatPipeline, RequestState};
use moai::provider::ModelRef;
use moai::session::SessionContext;
use moai::signal::STREAM_COMPLETE;
use moai::types::*;

fn session() -> SessionContext {
    let model: ModelRef = "openai:gpt-4o".parse().unwrap();
    SessionContext::new(model, MoaiConfig::new())
}

fn pipeline(dir: &TempDir, mock: Arc<MockAdapter>) -> ChatPipeline {
    let workspace = Arc::new(LocalWorkspace::new(dir.path()));
    ChatPipeline::new(workspace)
        .unwrap()
        .with_adapter(mock)
        .with_flush_policy(FlushPolicy::immediate())
}

fn record_states(pipeline: ChatPipeline) -> (ChatPipeline, Arc<Mutex<Vec<RequestState>>>) {
    let states = Arc::new(Mutex::new(Vec::new()));
    let seen = states.clone();
    let pipeline = pipeline.with_state_sink(Arc::new(move |state: RequestState| {
        seen.lock().unwrap().push(state)
    }));
    (pipeline, states)
}

#[tokio::test]
async fn plain_reply_completes_without_actions() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockAdapter::new().script(vec![
        StreamEvent::delta("Hel"),
        StreamEvent::delta("lo"),
        StreamEvent::done(DoneReason::Stop),
    ]));
    let (pipeline, states) = record_states(pipeline(&dir, mock));

    let outcome = pipeline
        .run(&session(), vec![ConversationTurn::user("hi")])
        .await;

    assert_eq!(outcome.state, RequestState::Completed);
    assert_eq!(outcome.transcript.text(), "Hello");
    assert_eq!(outcome.transcript.status(), &TranscriptStatus::Completed);
    assert!(outcome.blocks.is_empty());
    assert!(outcome.results.is_empty());
    assert_eq!(outcome.assistant_turn().text, "Hello");
    assert_eq!(
        *states.lock().unwrap(),
        vec![
            RequestState::Sending,
            RequestState::Streaming,
            RequestState::Done,
            RequestState::Parsing,
            RequestState::Completed,
        ]
    );
}

#[tokio::test]
async fn truncated_reply_is_continued_then_dispatched() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(
        MockAdapter::new()
            .script(reply("<mo-ai-file path=\"src/lib.rs\">pub fn an", DoneReason::Truncated))
            .script(reply("swer() -> u32 { 42 }</mo-ai-file>", DoneReason::Stop)),
    );
    let (pipeline, states) = record_states(pipeline(&dir, mock.clone()));

    let outcome = pipeline
        .run(&session(), vec![ConversationTurn::user("write it")])
        .await;

    assert_eq!(outcome.state, RequestState::Completed);
    assert_eq!(outcome.blocks.len(), 1);
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].status, ActionStatus::Success);
    let written = std::fs::read_to_string(dir.path().join("src/lib.rs")).unwrap();
    assert_eq!(written, "pub fn answer() -> u32 { 42 }");
    assert_eq!(mock.calls().len(), 2);
    assert_eq!(
        *states.lock().unwrap(),
        vec![
            RequestState::Sending,
            RequestState::Streaming,
            RequestState::Continuing,
            RequestState::Streaming,
            RequestState::Done,
            RequestState::Parsing,
            RequestState::Dispatching,
            RequestState::Completed,
        ]
    );
}

#[tokio::test]
async fn cancellation_keeps_partial_text_and_dispatches_nothing() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockAdapter::new().hang_after(vec![StreamEvent::delta(
        "<mo-ai-file path=\"a.txt\">x</mo-ai-file>",
    )]));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let pipeline = pipeline(&dir, mock)
        .with_flush_sink(Arc::new(move |_flush: &Flush| trigger.cancel()));

    let outcome = pipeline
        .run(
            &session().with_cancel(cancel),
            vec![ConversationTurn::user("go")],
        )
        .await;

    assert_eq!(outcome.state, RequestState::Cancelled);
    assert_eq!(outcome.transcript.status(), &TranscriptStatus::Cancelled);
    assert_eq!(
        outcome.transcript.text(),
        "<mo-ai-file path=\"a.txt\">x</mo-ai-file>"
    );
    assert!(outcome.results.is_empty());
    assert!(!dir.path().join("a.txt").exists());
    assert!(pipeline.signals().get(STREAM_COMPLETE));
}

#[tokio::test]
async fn stream_complete_is_cleared_during_the_turn() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockAdapter::new().script(reply("ok", DoneReason::Stop)));
    let pipeline = pipeline(&dir, mock);
    pipeline.signals().set(STREAM_COMPLETE, true);

    let signals = pipeline.signals().clone();
    let during = Arc::new(Mutex::new(Vec::new()));
    let seen = during.clone();
    let pipeline = pipeline.with_state_sink(Arc::new(move |state: RequestState| {
        if !state.is_terminal() {
            seen.lock().unwrap().push(signals.get(STREAM_COMPLETE));
        }
    }));

    pipeline
        .run(&session(), vec![ConversationTurn::user("hi")])
        .await;

    assert!(!during.lock().unwrap().is_empty());
    assert!(during.lock().unwrap().iter().all(|complete| !complete));
    assert!(pipeline.signals().get(STREAM_COMPLETE));
}

#[tokio::test]
async fn provider_error_is_reported_once() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockAdapter::new().script(vec![
        StreamEvent::delta("par"),
        StreamEvent::error("rate limited"),
    ]));
    let (pipeline, states) = record_states(pipeline(&dir, mock));

    let outcome = pipeline
        .run(&session(), vec![ConversationTurn::user("hi")])
        .await;

    assert_eq!(outcome.state, RequestState::Errored);
    assert_eq!(outcome.error.as_deref(), Some("rate limited"));
    assert_eq!(outcome.transcript.text(), "par");
    assert!(outcome.blocks.is_empty());
    let states = states.lock().unwrap();
    assert_eq!(
        states.iter().filter(|s| **s == RequestState::Errored).count(),
        1
    );
    assert_eq!(states.last(), Some(&RequestState::Errored));
}

#[tokio::test]
async fn parse_only_mode_leaves_the_workspace_alone() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockAdapter::new().script(reply(
        "<mo-ai-file path=\"b.txt\">y</mo-ai-file><mo-ai-bash>touch c.txt</mo-ai-bash>",
        DoneReason::Stop,
    )));
    let pipeline = pipeline(&dir, mock).with_dispatch_actions(false);

    let outcome = pipeline
        .run(&session(), vec![ConversationTurn::user("hi")])
        .await;

    assert_eq!(outcome.state, RequestState::Completed);
    assert_eq!(outcome.blocks.len(), 2);
    assert!(outcome.results.is_empty());
    assert!(!dir.path().join("b.txt").exists());
    assert!(!dir.path().join("c.txt").exists());
}

#[tokio::test]
async fn adapter_factory_failure_errors_the_turn() {
    let dir = TempDir::new().unwrap();
    let workspace = Arc::new(LocalWorkspace::new(dir.path()));
    let pipeline = ChatPipeline::new(workspace).unwrap();

    // No OPENAI_API_KEY in an empty config.
    let outcome = pipeline
        .run(&session(), vec![ConversationTurn::user("hi")])
        .await;

    assert_eq!(outcome.state, RequestState::Errored);
    assert!(outcome.error.unwrap().contains("OPENAI_API_KEY"));
    assert!(pipeline.signals().get(STREAM_COMPLETE));
}
