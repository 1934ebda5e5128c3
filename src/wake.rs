//! Wake orchestration: deduplicated, bounded resumption of sleeping projects.
//!
//! The orchestrator owns the wake registry, the sole piece of shared mutable
//! state in the process. Every inbound request for a sleeping project calls
//! [`WakeOrchestrator::wake`]; the first caller for a name starts the resume
//! command, everyone else attaches to the same shared future, so at most one
//! resume invocation is in flight per project at any instant. A resolved
//! operation lingers in the registry for a short grace window so requests
//! arriving right after resolution reuse the result instead of re-invoking
//! the resume mechanism.

use crate::config::{resolve_project, Settings};
use crate::error::WakeError;
use crate::executor::{ExecOutcome, ProcessExecutor, ResumeCommand};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

pub type WakeResult = Result<u16, WakeError>;

type SharedWake = Shared<BoxFuture<'static, WakeResult>>;

/// Observable state of a wake operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeState {
    /// Resume command still running
    Waking,
    /// Resolved with a port
    Awake,
    /// Resolved with an error
    Failed,
}

/// One live wake per project name, shared by all concurrent callers.
pub struct WakeOperation {
    /// Distinguishes this operation from any successor under the same name,
    /// so a stale eviction task never removes a newer entry
    id: u64,
    result: SharedWake,
    started_at: Instant,
}

impl WakeOperation {
    pub fn state(&self) -> WakeState {
        match self.result.peek() {
            None => WakeState::Waking,
            Some(Ok(_)) => WakeState::Awake,
            Some(Err(_)) => WakeState::Failed,
        }
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }
}

/// Coordinates all wake operations.
///
/// Designed to be shared behind an `Arc` across request handlers; the
/// constructor returns `Arc<Self>` to enforce this. The registry is injected
/// state owned here, never ambient.
pub struct WakeOrchestrator {
    registry: DashMap<String, WakeOperation>,
    executor: Arc<dyn ProcessExecutor>,
    settings: Settings,
    next_id: AtomicU64,
}

impl WakeOrchestrator {
    pub fn new(settings: Settings, executor: Arc<dyn ProcessExecutor>) -> Arc<Self> {
        Arc::new(Self {
            registry: DashMap::new(),
            executor,
            settings,
            next_id: AtomicU64::new(1),
        })
    }

    /// Wake `project` and return the port it serves on.
    ///
    /// Attaches to an in-flight (or grace-window-retained) operation when
    /// one exists; otherwise starts a fresh one. The underlying wake runs in
    /// a detached task: a caller disconnecting does not cancel it, since
    /// other waiters may depend on the outcome.
    pub async fn wake(self: &Arc<Self>, project: &str) -> WakeResult {
        let result = match self.registry.entry(project.to_string()) {
            Entry::Occupied(entry) => {
                debug!(project, "Attaching to in-flight wake");
                entry.get().result.clone()
            }
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let result = self.begin_wake(id, project);
                entry.insert(WakeOperation {
                    id,
                    result: result.clone(),
                    started_at: Instant::now(),
                });
                result
            }
        };
        result.await
    }

    /// Current state of a project's wake operation, if one is registered.
    pub fn state(&self, project: &str) -> Option<WakeState> {
        self.registry.get(project).map(|op| op.state())
    }

    /// Number of registered wake operations (in flight or in grace window)
    pub fn registered(&self) -> usize {
        self.registry.len()
    }

    /// Spawn the driver task for a new operation and schedule its eviction.
    fn begin_wake(self: &Arc<Self>, id: u64, project: &str) -> SharedWake {
        let (tx, rx) = oneshot::channel::<WakeResult>();

        let executor = Arc::clone(&self.executor);
        let settings = self.settings.clone();
        let name = project.to_string();
        tokio::spawn(async move {
            let result = drive_wake(executor, &settings, &name).await;
            match &result {
                Ok(port) => info!(project = %name, port, "Project is awake"),
                Err(e) => error!(project = %name, error = %e, "Wake failed"),
            }
            let _ = tx.send(result);
        });

        let result: SharedWake = rx
            .map(|r| {
                r.unwrap_or_else(|_| {
                    Err(WakeError::WakeProcessFailure {
                        detail: "wake task aborted".to_string(),
                    })
                })
            })
            .boxed()
            .shared();

        // Evict the entry one grace window after resolution. The id check
        // keeps a slow cleanup from removing a successor operation.
        let this = Arc::clone(self);
        let name = project.to_string();
        let resolved = result.clone();
        tokio::spawn(async move {
            let _ = resolved.await;
            tokio::time::sleep(this.settings.grace_window).await;
            this.registry.remove_if(&name, |_, op| op.id == id);
            debug!(project = %name, "Wake operation evicted");
        });

        result
    }
}

/// Resolve config, run the resume command, and interpret its outcome.
async fn drive_wake(
    executor: Arc<dyn ProcessExecutor>,
    settings: &Settings,
    project: &str,
) -> WakeResult {
    // Fresh read on every attempt; the lifecycle tool may have rewritten it
    let config = resolve_project(&settings.config_dir, project)?;

    info!(project, port = config.port, "Waking project");

    let (program, base_args) = settings
        .resume_cmd
        .split_first()
        .expect("resume_cmd validated non-empty at startup");
    let mut args = base_args.to_vec();
    args.push(project.to_string());

    let outcome = executor
        .run(ResumeCommand {
            program: program.clone(),
            args,
            env: vec![
                (
                    "WAKEGATE_HOME".to_string(),
                    settings.home_dir.display().to_string(),
                ),
                (
                    "WAKEGATE_CONFIG_DIR".to_string(),
                    settings.config_dir.display().to_string(),
                ),
            ],
            timeout: settings.wake_timeout,
        })
        .await
        .map_err(|e| WakeError::WakeProcessFailure {
            detail: format!("failed to invoke resume command: {}", e),
        })?;

    match outcome {
        ExecOutcome::Completed {
            exit_code: Some(0),
            stdout,
            ..
        } => {
            // The resume command may report the actual port on its last
            // stdout line; fall back to the configured port otherwise.
            let port = stdout
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .and_then(|line| line.trim().parse::<u16>().ok())
                .unwrap_or(config.port);
            Ok(port)
        }
        ExecOutcome::Completed { stderr, .. } => Err(WakeError::WakeProcessFailure {
            detail: stderr.trim().to_string(),
        }),
        ExecOutcome::TimedOut { stderr } => Err(WakeError::WakeTimeout {
            detail: stderr.trim().to_string(),
        }),
    }
}
