//! Node execution handlers
//!
//! Notes and empty instructions are skipped; every other instruction is
//! handed to a [`CommandRunner`] and awaited to completion.

use crate::flow::types::{Node, NodeKind, RunResult};
use async_trait::async_trait;
use std::{path::PathBuf, process::Stdio, sync::Arc};

/// What a command runner reports back
///
/// Failure is a value: a runner never propagates spawn errors or non-zero
/// exits as `Err`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// Failure message (spawn error or exit status)
    pub error: Option<String>,
}

impl CommandOutcome {
    pub fn ok(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: stderr.into(),
            error: None,
        }
    }

    pub fn failed(
        error: impl Into<String>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            stdout: stdout.into(),
            stderr: stderr.into(),
            error: Some(error.into()),
        }
    }
}

/// Command-execution collaborator
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion and capture its output
    async fn run(&self, command: &str) -> CommandOutcome;
}

/// Runs commands through `<shell> -c <command>`
#[derive(Debug, Clone)]
pub struct ShellCommandRunner {
    shell: String,
    working_dir: Option<PathBuf>,
}

impl ShellCommandRunner {
    pub fn new(shell: impl Into<String>, working_dir: Option<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            working_dir,
        }
    }
}

impl Default for ShellCommandRunner {
    fn default() -> Self {
        Self::new("sh", None)
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, command: &str) -> CommandOutcome {
        let mut cmd = tokio::process::Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        match cmd.output().await {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                if output.status.success() {
                    CommandOutcome::ok(stdout, stderr)
                } else {
                    CommandOutcome::failed(
                        format!("Command failed: {} ({})", command, output.status),
                        stdout,
                        stderr,
                    )
                }
            }
            Err(e) => CommandOutcome::failed(
                format!("Failed to spawn '{}': {}", self.shell, e),
                "",
                "",
            ),
        }
    }
}

/// Dispatches a single node to the command runner
pub struct NodeExecutor {
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for NodeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeExecutor").finish_non_exhaustive()
    }
}

impl NodeExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Execute one node
    ///
    /// Returns `None` for nodes with nothing to run (notes, empty commands).
    /// A whitespace-only command is still handed to the shell.
    pub async fn execute_node(&self, node: &Node) -> Option<RunResult> {
        let command = match &node.kind {
            NodeKind::Note(_) => {
                tracing::debug!("⏭️ Skipping note node '{}'", node.id);
                return None;
            }
            NodeKind::Instruction(data) if data.command.is_empty() => {
                tracing::debug!("⏭️ Skipping instruction '{}' with empty command", node.id);
                return None;
            }
            NodeKind::Instruction(data) => data.command.as_str(),
        };

        tracing::info!("🚀 Executing node '{}': {}", node.id, command);
        let start_time = std::time::Instant::now();
        let outcome = self.runner.run(command).await;
        let duration = start_time.elapsed();

        if outcome.success {
            tracing::info!("✅ Node '{}' completed in {:?}", node.id, duration);
        } else {
            tracing::error!(
                "❌ Node '{}' failed in {:?}: {}",
                node.id,
                duration,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
        if !outcome.stderr.is_empty() {
            tracing::debug!("📤 stderr of '{}': {}", node.id, outcome.stderr);
        }

        Some(RunResult {
            success: outcome.success,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            error: outcome.error,
            finished_at: chrono::Utc::now(),
        })
    }
}
