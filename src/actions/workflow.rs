//! Declarative workflow blocks.
//!
//! A workflow body is a fixed-schema program naming other handlers in the
//! order they should run. It is interpreted against the dispatcher's
//! registry; nothing in it is ever evaluated as code.
//!
//! JSON form:
//!
//! ```json
//! {"steps": [
//!   {"handler": "file"},
//!   {"handler": "bash", "abort_on_error": true},
//!   {"handler": "bash", "input": "cargo test"}
//! ]}
//! ```
//!
//! Line form, one step per line (`#` starts a comment):
//!
//! ```text
//! file
//! bash abort-on-error
//! bash: cargo test
//! ```

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::MoaiError;

use super::dispatcher::{
    ActionContext, ActionHandler, ActionOutcome, ActionResult, ActionStatus, StepResult,
};
use super::parser::{ActionBlock, ActionKind, ActionPayload};

/// One step of a workflow program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Handler kind name, e.g. `file`.
    pub handler: String,
    /// Run the handler on every block of its kind in the transcript.
    /// Defaults to `true` unless `input` is given.
    #[serde(default)]
    pub use_transcript: Option<bool>,
    /// Stop the workflow if this step fails.
    #[serde(default)]
    pub abort_on_error: bool,
    /// Explicit payload: a command string for `bash`, `{path, content}` for `file`.
    #[serde(default)]
    pub input: Option<serde_json::Value>,
}

impl WorkflowStep {
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            use_transcript: None,
            abort_on_error: false,
            input: None,
        }
    }

    fn uses_transcript(&self) -> bool {
        self.use_transcript.unwrap_or(self.input.is_none())
    }
}

/// A parsed workflow body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowProgram {
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowProgram {
    /// Parse either the JSON or the line form.
    pub fn parse(text: &str) -> Result<Self, MoaiError> {
        let trimmed = text.trim();
        let program = if trimmed.starts_with('{') {
            serde_json::from_str(trimmed)
                .map_err(|e| MoaiError::Workflow(format!("invalid workflow JSON: {e}")))?
        } else {
            Self::parse_lines(trimmed)?
        };
        if program.steps.is_empty() {
            return Err(MoaiError::Workflow("workflow has no steps".into()));
        }
        Ok(program)
    }

    fn parse_lines(text: &str) -> Result<Self, MoaiError> {
        let mut steps = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((handler, input)) = line.split_once(':') {
                let mut step = WorkflowStep::new(handler.trim());
                step.input = Some(serde_json::Value::String(input.trim().to_string()));
                steps.push(step);
                continue;
            }

            let mut words = line.split_whitespace();
            let mut step = WorkflowStep::new(words.next().unwrap_or_default());
            for flag in words {
                match flag {
                    "abort-on-error" => step.abort_on_error = true,
                    "no-transcript" => step.use_transcript = Some(false),
                    other => {
                        return Err(MoaiError::Workflow(format!(
                            "line {}: unknown flag '{other}'",
                            lineno + 1
                        )))
                    }
                }
            }
            steps.push(step);
        }
        Ok(Self { steps })
    }
}

impl WorkflowProgram {
    /// Block kinds whose transcript blocks this program runs.
    pub fn claimed_kinds(&self) -> HashSet<ActionKind> {
        self.steps
            .iter()
            .filter(|step| step.uses_transcript())
            .filter_map(|step| step.handler.parse::<ActionKind>().ok())
            .filter(|kind| *kind != ActionKind::Workflow)
            .collect()
    }
}

/// Kinds claimed by the workflow blocks among `blocks`.
///
/// A workflow whose body does not parse claims nothing.
pub fn claimed_kinds(blocks: &[ActionBlock]) -> HashSet<ActionKind> {
    blocks
        .iter()
        .filter_map(|block| match &block.payload {
            ActionPayload::Workflow { program } => WorkflowProgram::parse(program).ok(),
            _ => None,
        })
        .flat_map(|program| program.claimed_kinds())
        .collect()
}

/// Handler for `workflow` blocks.
pub struct WorkflowComposer;

impl WorkflowComposer {
    async fn run_step(
        &self,
        index: usize,
        step: &WorkflowStep,
        used: &mut HashSet<ActionKind>,
        ctx: &ActionContext<'_>,
    ) -> StepResult {
        let mut result = StepResult {
            index,
            handler: step.handler.clone(),
            status: ActionStatus::Error,
            detail: String::new(),
            results: Vec::new(),
        };

        let kind = match step.handler.parse::<ActionKind>() {
            Ok(ActionKind::Workflow) => {
                result.detail = "workflows cannot run other workflows".into();
                return result;
            }
            Ok(kind) if ctx.dispatcher.handler(kind).is_some() => kind,
            _ => {
                result.detail = format!("unknown handler '{}'", step.handler);
                return result;
            }
        };
        if !used.insert(kind) {
            result.detail = format!("handler '{kind}' already used by an earlier step");
            return result;
        }

        let mut blocks = Vec::new();
        if step.uses_transcript() {
            blocks.extend(ctx.dispatcher.parser().parse_kind(ctx.transcript, kind));
        }
        if let Some(input) = &step.input {
            match payload_from_input(kind, input) {
                Ok(payload) => blocks.push(ActionBlock::new(payload, 0..0)),
                Err(e) => {
                    result.detail = e.to_string();
                    return result;
                }
            }
        }

        for block in &blocks {
            if ctx.cancel.is_cancelled() {
                result.detail = "cancelled".into();
                return result;
            }
            result.results.push(ctx.dispatcher.dispatch_one(block, ctx).await);
        }

        let failed = result.results.iter().filter(|r| !r.is_success()).count();
        result.status = if failed == 0 {
            ActionStatus::Success
        } else {
            ActionStatus::Error
        };
        result.detail = match (blocks.len(), failed) {
            (0, _) => format!("no {kind} blocks to run"),
            (n, 0) => format!("{n} {kind} block(s) succeeded"),
            (n, f) => format!("{f} of {n} {kind} block(s) failed"),
        };
        result
    }
}

fn payload_from_input(
    kind: ActionKind,
    input: &serde_json::Value,
) -> Result<ActionPayload, MoaiError> {
    match (kind, input) {
        (ActionKind::Bash, serde_json::Value::String(command)) => {
            Ok(ActionPayload::bash(command.clone()))
        }
        (ActionKind::File, serde_json::Value::Object(fields)) => {
            let field = |name: &str| {
                fields
                    .get(name)
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        MoaiError::Workflow(format!("file input needs a '{name}' string"))
                    })
            };
            Ok(ActionPayload::file(field("path")?, field("content")?))
        }
        _ => Err(MoaiError::Workflow(format!(
            "input is not valid for the '{kind}' handler"
        ))),
    }
}

#[async_trait]
impl ActionHandler for WorkflowComposer {
    fn kind(&self) -> ActionKind {
        ActionKind::Workflow
    }

    async fn handle(
        &self,
        block: &ActionBlock,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, MoaiError> {
        let ActionPayload::Workflow { program } = &block.payload else {
            return Err(MoaiError::action("workflow", "not a workflow block"));
        };
        let program = WorkflowProgram::parse(program)?;
        debug!(steps = program.steps.len(), "running workflow");

        let mut used = HashSet::new();
        let mut steps = Vec::with_capacity(program.steps.len());
        let mut aborted = None;

        for (index, step) in program.steps.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                aborted = Some(format!("cancelled before step {}", index + 1));
                break;
            }
            let result = self.run_step(index, step, &mut used, ctx).await;
            let stop = result.status == ActionStatus::Error && step.abort_on_error;
            steps.push(result);
            if stop {
                info!(step = index + 1, "workflow aborted");
                aborted = Some(format!("aborted after step {}", index + 1));
                break;
            }
        }

        let failed = steps
            .iter()
            .filter(|s| s.status == ActionStatus::Error)
            .count();
        let mut detail = format!(
            "{} of {} step(s) succeeded",
            steps.len() - failed,
            program.steps.len()
        );
        if let Some(reason) = &aborted {
            detail.push_str(&format!(" ({reason})"));
        }

        let outcome = if failed == 0 && aborted.is_none() {
            ActionOutcome::success(detail)
        } else {
            ActionOutcome::failure(detail)
        };
        Ok(outcome.with_steps(steps))
    }
}

/// Flattened results of a workflow, in execution order.
pub fn step_results(result: &ActionResult) -> impl Iterator<Item = &ActionResult> {
    result.steps.iter().flat_map(|step| step.results.iter())
}
