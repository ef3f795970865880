//! Sequential dispatch of parsed blocks to registered handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::MoaiError;

use super::handlers::{BashHandler, FileHandler};
use super::parser::{ActionBlock, ActionKind, OutputTagParser};
use super::workflow::{claimed_kinds, WorkflowComposer};
use super::workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Error,
}

/// Outcome of one workflow step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Position in the workflow program, starting at 0.
    pub index: usize,
    /// Handler name as written in the program.
    pub handler: String,
    pub status: ActionStatus,
    pub detail: String,
    /// Per-block results of the blocks this step ran.
    pub results: Vec<ActionResult>,
}

/// Outcome of one block. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub block: ActionBlock,
    pub status: ActionStatus,
    pub detail: String,
    /// Step results when the block was a workflow.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepResult>,
}

impl ActionResult {
    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }
}

/// What a handler reports for one block.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub status: ActionStatus,
    pub detail: String,
    pub steps: Vec<StepResult>,
}

impl ActionOutcome {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Success,
            detail: detail.into(),
            steps: Vec::new(),
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Error,
            detail: detail.into(),
            steps: Vec::new(),
        }
    }

    pub fn with_steps(mut self, steps: Vec<StepResult>) -> Self {
        self.steps = steps;
        self
    }
}

/// Everything a handler may consult besides its block.
pub struct ActionContext<'a> {
    /// The transcript the blocks were parsed from.
    pub transcript: &'a str,
    pub cancel: &'a CancellationToken,
    /// Registry access for handlers that compose others.
    pub dispatcher: &'a ActionDispatcher,
}

/// Performs the side effect of one block kind.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn kind(&self) -> ActionKind;

    /// An `Err` becomes an error result carrying the error's message.
    async fn handle(
        &self,
        block: &ActionBlock,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, MoaiError>;
}

/// Routes blocks to handlers, one at a time, in transcript order.
pub struct ActionDispatcher {
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
    parser: Arc<OutputTagParser>,
}

impl ActionDispatcher {
    /// Dispatcher with no handlers.
    pub fn new(parser: Arc<OutputTagParser>) -> Self {
        Self {
            handlers: HashMap::new(),
            parser,
        }
    }

    /// Dispatcher with the `file`, `bash` and `workflow` handlers.
    pub fn with_builtins(parser: Arc<OutputTagParser>, workspace: Arc<dyn Workspace>) -> Self {
        Self::new(parser)
            .register(Arc::new(FileHandler::new(workspace.clone())))
            .register(Arc::new(BashHandler::new(workspace)))
            .register(Arc::new(WorkflowComposer))
    }

    /// Register a handler, replacing any previous one for its kind.
    pub fn register(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    pub fn handler(&self, kind: ActionKind) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(&kind)
    }

    pub fn parser(&self) -> &OutputTagParser {
        &self.parser
    }

    /// Run `blocks` sequentially and collect one result per dispatched block.
    ///
    /// Blocks whose kind a workflow step runs from the transcript are left to
    /// that workflow; every other block is dispatched on its own. A failed
    /// block never stops the batch. `cancel` is checked before each block,
    /// and nothing is dispatched once it has fired.
    pub async fn dispatch(
        &self,
        blocks: &[ActionBlock],
        transcript: &str,
        cancel: &CancellationToken,
    ) -> Vec<ActionResult> {
        let claimed = claimed_kinds(blocks);
        let selected = blocks
            .iter()
            .filter(|b| b.kind() == ActionKind::Workflow || !claimed.contains(&b.kind()));

        let ctx = ActionContext {
            transcript,
            cancel,
            dispatcher: self,
        };

        let mut results = Vec::new();
        for block in selected {
            if cancel.is_cancelled() {
                info!(dispatched = results.len(), "dispatch cancelled");
                break;
            }
            results.push(self.dispatch_one(block, &ctx).await);
        }
        results
    }

    /// Run a single block through its handler.
    pub async fn dispatch_one(&self, block: &ActionBlock, ctx: &ActionContext<'_>) -> ActionResult {
        let kind = block.kind();
        let outcome = match self.handlers.get(&kind) {
            Some(handler) => {
                debug!(kind = %kind, label = %block.label(), "dispatching block");
                handler
                    .handle(block, ctx)
                    .await
                    .unwrap_or_else(|e| ActionOutcome::failure(e.to_string()))
            }
            None => ActionOutcome::failure(format!("no handler registered for '{kind}' blocks")),
        };

        if outcome.status == ActionStatus::Error {
            warn!(kind = %kind, label = %block.label(), detail = %outcome.detail, "action failed");
        }

        ActionResult {
            block: block.clone(),
            status: outcome.status,
            detail: outcome.detail,
            steps: outcome.steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::parser::ActionPayload;
    use std::sync::Mutex;

    struct Recorder {
        kind: ActionKind,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ActionHandler for Recorder {
        fn kind(&self) -> ActionKind {
            self.kind
        }

        async fn handle(
            &self,
            block: &ActionBlock,
            _ctx: &ActionContext<'_>,
        ) -> Result<ActionOutcome, MoaiError> {
            self.seen.lock().unwrap().push(block.label());
            match &block.payload {
                ActionPayload::Bash { command } if command == "fail" => {
                    Err(MoaiError::action("bash", "boom"))
                }
                _ => Ok(ActionOutcome::success("ok")),
            }
        }
    }

    fn dispatcher(seen: &Arc<Mutex<Vec<String>>>) -> ActionDispatcher {
        ActionDispatcher::new(Arc::new(OutputTagParser::new().unwrap())).register(Arc::new(
            Recorder {
                kind: ActionKind::Bash,
                seen: seen.clone(),
            },
        ))
    }

    fn bash(command: &str) -> ActionBlock {
        ActionBlock::new(ActionPayload::bash(command), 0..0)
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_batch() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let results = dispatcher(&seen)
            .dispatch(
                &[bash("one"), bash("fail"), bash("three")],
                "",
                &CancellationToken::new(),
            )
            .await;
        let statuses: Vec<_> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![ActionStatus::Success, ActionStatus::Error, ActionStatus::Success]
        );
        assert!(results[1].detail.contains("boom"));
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unregistered_kinds_fail_per_block() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let file = ActionBlock::new(ActionPayload::file("a", "b"), 0..0);
        let results = dispatcher(&seen)
            .dispatch(&[file, bash("x")], "", &CancellationToken::new())
            .await;
        assert_eq!(results[0].status, ActionStatus::Error);
        assert!(results[0].detail.contains("no handler"));
        assert!(results[1].is_success());
    }

    #[tokio::test]
    async fn cancelled_token_dispatches_nothing() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let results = dispatcher(&seen).dispatch(&[bash("x")], "", &cancel).await;
        assert!(results.is_empty());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_block_list_is_a_no_op() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let results = dispatcher(&seen)
            .dispatch(&[], "plain text", &CancellationToken::new())
            .await;
        assert!(results.is_empty());
    }
}
