//! Tests for dispatching action blocks against a real workspace.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use moai::actions::workflow::step_results;
use moai::actions::{
    ActionDispatcher, ActionPayload, ActionStatus, LocalWorkspace, OutputTagParser,
};

fn dispatcher(dir: &TempDir) -> (Arc<OutputTagParser>, ActionDispatcher) {
    let parser = Arc::new(OutputTagParser::new().unwrap());
    let workspace = Arc::new(LocalWorkspace::new(dir.path()));
    let dispatcher = ActionDispatcher::with_builtins(parser.clone(), workspace);
    (parser, dispatcher)
}

#[tokio::test]
async fn failed_block_does_not_stop_the_batch() {
    let dir = TempDir::new().unwrap();
    let (parser, dispatcher) = dispatcher(&dir);
    let text = parser.render(&[
        ActionPayload::file("one.txt", "1"),
        ActionPayload::file("../escape.txt", "2"),
        ActionPayload::file("nested/three.txt", "3"),
    ]);
    let blocks = parser.parse(&text);

    let results = dispatcher
        .dispatch(&blocks, &text, &CancellationToken::new())
        .await;

    let statuses: Vec<ActionStatus> = results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![ActionStatus::Success, ActionStatus::Error, ActionStatus::Success]
    );
    assert!(results[1].detail.contains("escapes"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("nested/three.txt")).unwrap(),
        "3"
    );
    assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
}

#[tokio::test]
async fn bash_blocks_run_in_the_workspace_root() {
    let dir = TempDir::new().unwrap();
    let (parser, dispatcher) = dispatcher(&dir);
    let text = parser.render(&[
        ActionPayload::bash("echo hi > greeting.txt && cat greeting.txt"),
        ActionPayload::bash("echo oops >&2; exit 3"),
    ]);
    let blocks = parser.parse(&text);

    let results = dispatcher
        .dispatch(&blocks, &text, &CancellationToken::new())
        .await;

    assert_eq!(results[0].status, ActionStatus::Success);
    assert_eq!(results[0].detail, "hi");
    assert_eq!(results[1].status, ActionStatus::Error);
    assert!(results[1].detail.contains("exit 3"));
    assert!(results[1].detail.contains("oops"));
}

#[tokio::test]
async fn workflow_sequences_transcript_blocks() {
    let dir = TempDir::new().unwrap();
    let (parser, dispatcher) = dispatcher(&dir);
    let text = parser.render(&[
        ActionPayload::workflow("file\nbash"),
        ActionPayload::bash("cat made.txt"),
        ActionPayload::file("made.txt", "from workflow"),
    ]);
    let blocks = parser.parse(&text);

    let results = dispatcher
        .dispatch(&blocks, &text, &CancellationToken::new())
        .await;

    // Only the workflow is dispatched; it runs the file step before bash.
    assert_eq!(results.len(), 1);
    assert!(results[0].is_success(), "{}", results[0].detail);
    assert_eq!(results[0].steps.len(), 2);
    let inner: Vec<&str> = step_results(&results[0]).map(|r| r.detail.as_str()).collect();
    assert_eq!(inner.len(), 2);
    assert_eq!(inner[1], "from workflow");
}

#[tokio::test]
async fn blocks_outside_the_workflow_still_run() {
    let dir = TempDir::new().unwrap();
    let (parser, dispatcher) = dispatcher(&dir);
    let text = parser.render(&[
        ActionPayload::workflow("bash"),
        ActionPayload::file("a.txt", "A"),
        ActionPayload::bash("echo hi"),
    ]);
    let blocks = parser.parse(&text);
    assert_eq!(blocks.len(), 3);

    let results = dispatcher
        .dispatch(&blocks, &text, &CancellationToken::new())
        .await;

    // The workflow owns the bash block; the file block is dispatched on its own.
    let labels: Vec<String> = results.iter().map(|r| r.block.label()).collect();
    assert_eq!(labels, vec!["workflow".to_string(), "file a.txt".to_string()]);
    assert!(results.iter().all(|r| r.is_success()));
    assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "A");
    let inner: Vec<&str> = step_results(&results[0]).map(|r| r.detail.as_str()).collect();
    assert_eq!(inner, vec!["hi"]);
}

#[tokio::test]
async fn explicit_input_steps_do_not_claim_transcript_blocks() {
    let dir = TempDir::new().unwrap();
    let (parser, dispatcher) = dispatcher(&dir);
    let text = parser.render(&[
        ActionPayload::workflow("bash: echo from workflow"),
        ActionPayload::bash("echo standalone"),
    ]);
    let blocks = parser.parse(&text);

    let results = dispatcher
        .dispatch(&blocks, &text, &CancellationToken::new())
        .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[1].detail, "standalone");
}

#[tokio::test]
async fn workflow_step_with_unknown_handler_fails() {
    let dir = TempDir::new().unwrap();
    let (parser, dispatcher) = dispatcher(&dir);
    let text = parser.render(&[ActionPayload::workflow(
        r#"{"steps":[{"handler":"deploy"},{"handler":"bash","input":"echo after"}]}"#,
    )]);
    let blocks = parser.parse(&text);

    let results = dispatcher
        .dispatch(&blocks, &text, &CancellationToken::new())
        .await;

    assert_eq!(results[0].status, ActionStatus::Error);
    assert_eq!(results[0].steps[0].status, ActionStatus::Error);
    assert!(results[0].steps[0].detail.contains("unknown handler 'deploy'"));
    assert_eq!(results[0].steps[1].status, ActionStatus::Success);
    assert!(results[0].detail.starts_with("1 of 2 step(s) succeeded"));
}

#[tokio::test]
async fn abort_on_error_skips_remaining_steps() {
    let dir = TempDir::new().unwrap();
    let (parser, dispatcher) = dispatcher(&dir);
    let text = parser.render(&[ActionPayload::workflow(
        "bash abort-on-error\nfile: ignored",
    )]) + "\n<mo-ai-bash>false</mo-ai-bash>";
    let blocks = parser.parse(&text);

    let results = dispatcher
        .dispatch(&blocks, &text, &CancellationToken::new())
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].steps.len(), 1);
    assert!(results[0].detail.contains("aborted after step 1"));
}

#[tokio::test]
async fn cancelled_token_dispatches_nothing() {
    let dir = TempDir::new().unwrap();
    let (parser, dispatcher) = dispatcher(&dir);
    let text = parser.render(&[ActionPayload::file("never.txt", "x")]);
    let blocks = parser.parse(&text);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let results = dispatcher.dispatch(&blocks, &text, &cancel).await;

    assert!(results.is_empty());
    assert!(!dir.path().join("never.txt").exists());
}
