//! Out-of-process invocation of the external resume mechanism.
//!
//! The orchestrator never shells out directly: it hands a [`ResumeCommand`]
//! to a [`ProcessExecutor`], so tests can substitute a fake and the command
//! handling stays in one place.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// A fully-specified invocation of the resume mechanism.
#[derive(Debug, Clone)]
pub struct ResumeCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment on top of the inherited one
    pub env: Vec<(String, String)>,
    /// Hard bound; the process is killed when exceeded
    pub timeout: Duration,
}

/// What became of a resume invocation.
#[derive(Debug, Clone)]
pub enum ExecOutcome {
    /// The process exited on its own
    Completed {
        /// Exit code; None when terminated by a signal
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// The timeout fired and the process was killed
    TimedOut {
        /// Stderr captured up to the kill
        stderr: String,
    },
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExecOutcome::Completed { exit_code: Some(0), .. })
    }
}

/// Capability to run the resume mechanism.
///
/// Returns a boxed future so the trait stays object-safe: the orchestrator
/// holds an `Arc<dyn ProcessExecutor>`.
pub trait ProcessExecutor: Send + Sync {
    fn run(&self, cmd: ResumeCommand) -> BoxFuture<'static, std::io::Result<ExecOutcome>>;
}

/// Production executor backed by `tokio::process`.
pub struct CommandExecutor;

impl ProcessExecutor for CommandExecutor {
    fn run(&self, cmd: ResumeCommand) -> BoxFuture<'static, std::io::Result<ExecOutcome>> {
        run_command(cmd).boxed()
    }
}

async fn run_command(cmd: ResumeCommand) -> std::io::Result<ExecOutcome> {
    debug!(program = %cmd.program, args = ?cmd.args, "Invoking resume command");

    let mut child = Command::new(&cmd.program)
        .args(&cmd.args)
        .envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    // Drain both pipes concurrently with the wait so a chatty process
    // cannot deadlock on a full pipe buffer.
    let mut stdout_pipe = child.stdout.take().expect("stdout piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).into_owned()
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).into_owned()
    });

    match tokio::time::timeout(cmd.timeout, child.wait()).await {
        Ok(status) => {
            let status = status?;
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            debug!(code = ?status.code(), "Resume command exited");
            Ok(ExecOutcome::Completed {
                exit_code: status.code(),
                stdout,
                stderr,
            })
        }
        Err(_) => {
            warn!(
                program = %cmd.program,
                timeout_secs = cmd.timeout.as_secs(),
                "Resume command timed out, killing"
            );
            let _ = child.kill().await;
            // The kill closes the pipes, so the drain tasks finish promptly.
            let stderr = stderr_task.await.unwrap_or_default();
            Ok(ExecOutcome::TimedOut { stderr })
        }
    }
}
