//! Built-in `file` and `bash` handlers.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MoaiError;

use super::dispatcher::{ActionContext, ActionHandler, ActionOutcome};
use super::parser::{ActionBlock, ActionKind, ActionPayload};
use super::workspace::Workspace;

/// Writes file blocks into the workspace, content untouched.
pub struct FileHandler {
    workspace: Arc<dyn Workspace>,
}

impl FileHandler {
    pub fn new(workspace: Arc<dyn Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl ActionHandler for FileHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::File
    }

    async fn handle(
        &self,
        block: &ActionBlock,
        _ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, MoaiError> {
        let ActionPayload::File { path, content } = &block.payload else {
            return Err(MoaiError::action("file", "not a file block"));
        };
        let resolved = self.workspace.resolve_path(path)?;
        self.workspace.write_file(&resolved, content).await?;
        Ok(ActionOutcome::success(format!(
            "wrote {} bytes to {path}",
            content.len()
        )))
    }
}

/// Runs bash blocks through the workspace shell.
pub struct BashHandler {
    workspace: Arc<dyn Workspace>,
}

impl BashHandler {
    pub fn new(workspace: Arc<dyn Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl ActionHandler for BashHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::Bash
    }

    async fn handle(
        &self,
        block: &ActionBlock,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, MoaiError> {
        let ActionPayload::Bash { command } = &block.payload else {
            return Err(MoaiError::action("bash", "not a bash block"));
        };
        if command.trim().is_empty() {
            return Err(MoaiError::action("bash", "empty command"));
        }

        let output = self.workspace.execute_command(command, ctx.cancel).await?;
        if output.success() {
            Ok(ActionOutcome::success(output.stdout.trim_end()))
        } else {
            let code = output
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let reason = if output.stderr.trim().is_empty() {
                output.stdout.trim_end()
            } else {
                output.stderr.trim_end()
            };
            Ok(ActionOutcome::failure(format!("exit {code}: {reason}")))
        }
    }
}
