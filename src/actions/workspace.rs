//! Filesystem and process collaborator used by the built-in handlers.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::MoaiError;

const OUTPUT_MAX_BYTES: usize = 32_768;
const DEFAULT_SHELL_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of one shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Set when either stream was cut at the output cap.
    pub truncated: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Where file writes land and commands run.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Map a block's path onto the project.
    fn resolve_path(&self, path: &str) -> Result<PathBuf, MoaiError>;

    async fn write_file(&self, path: &Path, content: &str) -> Result<(), MoaiError>;

    /// Run `command` to completion. Dropping the future or firing `cancel`
    /// stops the process.
    async fn execute_command(
        &self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, MoaiError>;
}

/// A project directory on the local machine.
#[derive(Debug, Clone)]
pub struct LocalWorkspace {
    root: PathBuf,
    shell_timeout: Duration,
}

impl LocalWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            shell_timeout: DEFAULT_SHELL_TIMEOUT,
        }
    }

    pub fn with_shell_timeout(mut self, timeout: Duration) -> Self {
        self.shell_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn truncate_utf8(s: &str, max_bytes: usize) -> (String, bool) {
    if s.len() <= max_bytes {
        return (s.to_string(), false);
    }
    let mut cutoff = max_bytes;
    while cutoff > 0 && !s.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    let mut cut = s[..cutoff].to_string();
    cut.push_str("\n... (truncated)");
    (cut, true)
}

#[async_trait]
impl Workspace for LocalWorkspace {
    fn resolve_path(&self, path: &str) -> Result<PathBuf, MoaiError> {
        let relative = Path::new(path.trim());
        if relative.as_os_str().is_empty() {
            return Err(MoaiError::action("file", "empty path"));
        }
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(MoaiError::action(
                        "file",
                        format!("{path}: path escapes the project root"),
                    ))
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(MoaiError::action(
                        "file",
                        format!("{path}: absolute paths are not allowed"),
                    ))
                }
            }
        }
        if resolved == self.root {
            return Err(MoaiError::action("file", format!("{path}: not a file path")));
        }
        Ok(resolved)
    }

    async fn write_file(&self, path: &Path, content: &str) -> Result<(), MoaiError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    MoaiError::action(
                        "file",
                        format!("failed to create directories for {}: {e}", path.display()),
                    )
                })?;
            }
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|e| MoaiError::action("file", format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), bytes = content.len(), "file written");
        Ok(())
    }

    async fn execute_command(
        &self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, MoaiError> {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .kill_on_drop(true);
        let run = cmd.output();

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(MoaiError::Cancelled),
            result = tokio::time::timeout(self.shell_timeout, run) => result,
        };

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(MoaiError::action("bash", e.to_string())),
            Err(_) => {
                return Err(MoaiError::action(
                    "bash",
                    format!("command timed out after {}s", self.shell_timeout.as_secs()),
                ))
            }
        };

        let (stdout, stdout_cut) =
            truncate_utf8(&String::from_utf8_lossy(&output.stdout), OUTPUT_MAX_BYTES);
        let (stderr, stderr_cut) =
            truncate_utf8(&String::from_utf8_lossy(&output.stderr), OUTPUT_MAX_BYTES);

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout,
            stderr,
            truncated: stdout_cut || stderr_cut,
        })
    }
}
