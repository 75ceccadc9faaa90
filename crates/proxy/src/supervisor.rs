//! Subprocess supervision and the line-oriented stdio transport.
//!
//! Each stdio backend owns one child process and one supervisor task. The
//! supervisor drains stderr to the log, waits for process exit, and respawns
//! after a fixed backoff unless shutdown was requested. Requests to the child
//! are newline-delimited JSON, strictly serialized by a per-backend mutex
//! over the pipe pair.

use crate::error::{ProxyError, Result};
use crate::timeouts::{self, RESTART_BACKOFF, SHUTDOWN_GRACE};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Supervisor view of a stdio backend.
///
/// Transitions are driven by process exit, shutdown requests, and spawn
/// results; `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Starting,
    Running,
    Restarting,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Starting => write!(f, "starting"),
            SupervisorState::Running => write!(f, "running"),
            SupervisorState::Restarting => write!(f, "restarting"),
            SupervisorState::ShuttingDown => write!(f, "shutting_down"),
            SupervisorState::Stopped => write!(f, "stopped"),
        }
    }
}

struct StdioPipes {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// State shared between the transport handle and its supervisor task.
pub struct StdioShared {
    name: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    /// The pipe pair. This mutex is the serialization point: at most one
    /// request is in flight on the child's stdin at any time.
    pipes: Mutex<Option<StdioPipes>>,
    state: parking_lot::Mutex<SupervisorState>,
    restart_count: AtomicU32,
    /// Cancelled exactly once, during shutdown.
    shutdown: CancellationToken,
    read_timeout: Duration,
}

impl StdioShared {
    fn set_state(&self, state: SupervisorState) {
        *self.state.lock() = state;
    }

    /// Send one request line and read one response line.
    ///
    /// The pipes are taken out of their slot for the duration of the call and
    /// only put back on success: after a write failure, read failure, EOF, or
    /// deadline expiry the pipe may be desynchronized, so it is dropped
    /// instead (closing the child's stdin lets it exit). Errors here never
    /// restart the process directly; restart is the supervisor's sole
    /// decision and it reacts only to process exit.
    pub async fn request(&self, request: &[u8]) -> Result<Vec<u8>> {
        let mut guard = self.pipes.lock().await;
        let mut pipes = guard.take().ok_or_else(|| {
            ProxyError::BackendCommunication(format!("server '{}' is not running", self.name))
        })?;

        let write = async {
            pipes.stdin.write_all(request).await?;
            pipes.stdin.write_all(b"\n").await?;
            pipes.stdin.flush().await
        };
        if let Err(e) = write.await {
            return Err(ProxyError::BackendCommunication(format!(
                "failed to write to server '{}': {e}",
                self.name
            )));
        }

        let mut response = Vec::new();
        match tokio::time::timeout(
            self.read_timeout,
            pipes.stdout.read_until(b'\n', &mut response),
        )
        .await
        {
            Err(_) => Err(ProxyError::BackendCommunication(format!(
                "timed out waiting for server '{}' after {}s",
                self.name,
                self.read_timeout.as_secs()
            ))),
            Ok(Err(e)) => Err(ProxyError::BackendCommunication(format!(
                "failed to read from server '{}': {e}",
                self.name
            ))),
            Ok(Ok(0)) => Err(ProxyError::BackendCommunication(format!(
                "server '{}' closed its stdout",
                self.name
            ))),
            Ok(Ok(_)) => {
                *guard = Some(pipes);
                Ok(response)
            }
        }
    }
}

/// Stdio transport: a supervised child process plus the serialized line
/// protocol to it.
pub struct StdioTransport {
    shared: Arc<StdioShared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    pub fn new(
        name: String,
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> Self {
        Self {
            shared: Arc::new(StdioShared {
                name,
                command,
                args,
                env,
                pipes: Mutex::new(None),
                state: parking_lot::Mutex::new(SupervisorState::Starting),
                restart_count: AtomicU32::new(0),
                shutdown: CancellationToken::new(),
                read_timeout: timeouts::stdio_read_timeout(),
            }),
            supervisor: Mutex::new(None),
        }
    }

    pub fn shared(&self) -> Arc<StdioShared> {
        Arc::clone(&self.shared)
    }

    pub fn state(&self) -> SupervisorState {
        *self.shared.state.lock()
    }

    pub fn restart_count(&self) -> u32 {
        self.shared.restart_count.load(Ordering::Relaxed)
    }

    /// Spawn the child process and register the supervisor task.
    pub async fn start(&self) -> Result<()> {
        self.shared.set_state(SupervisorState::Starting);
        let child = spawn_process(&self.shared).await?;
        self.shared.set_state(SupervisorState::Running);

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(supervise(shared, child));
        *self.supervisor.lock().await = Some(handle);
        Ok(())
    }

    /// Cancel supervision, close the pipes, and wait for the supervisor to
    /// finish (it force-kills the child after the grace period).
    pub async fn shutdown(&self) {
        tracing::info!("Stopping MCP server '{}'", self.shared.name);
        self.shared.shutdown.cancel();

        // Closing stdin gives a well-behaved server the chance to exit
        // before the kill deadline.
        self.shared.pipes.lock().await.take();

        let handle = self.supervisor.lock().await.take();
        if let Some(handle) = handle {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                tracing::warn!(
                    "Supervisor for '{}' did not stop within {}s",
                    self.shared.name,
                    SHUTDOWN_GRACE.as_secs()
                );
            }
        }
    }
}

/// Spawn the configured command with piped standard streams.
///
/// The config environment is layered onto the proxy's own environment, config
/// winning. Stderr is drained line by line into the log, tagged with the
/// backend name.
async fn spawn_process(shared: &Arc<StdioShared>) -> Result<Child> {
    let mut cmd = Command::new(&shared.command);
    cmd.args(&shared.args)
        .envs(&shared.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        ProxyError::Startup(format!(
            "failed to spawn '{}' for server '{}': {e}",
            shared.command, shared.name
        ))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ProxyError::Internal("child stdin not piped".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ProxyError::Internal("child stdout not piped".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ProxyError::Internal("child stderr not piped".to_string()))?;

    let name = shared.name.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::info!(server = %name, "stderr: {line}");
        }
    });

    *shared.pipes.lock().await = Some(StdioPipes {
        stdin,
        stdout: BufReader::new(stdout),
    });

    tracing::info!("Started MCP server '{}' ({})", shared.name, shared.command);
    Ok(child)
}

/// Per-backend supervision loop.
///
/// Waits for process exit and respawns after [`RESTART_BACKOFF`] unless
/// shutdown was requested. On shutdown, waits up to [`SHUTDOWN_GRACE`] for
/// the child to exit before force-killing it.
async fn supervise(shared: Arc<StdioShared>, mut child: Child) {
    loop {
        let exit = tokio::select! {
            status = child.wait() => Some(status),
            () = shared.shutdown.cancelled() => None,
        };

        let Some(status) = exit else {
            // Shutdown requested while the process was still running.
            shared.set_state(SupervisorState::ShuttingDown);
            shared.pipes.lock().await.take();

            if tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await.is_err() {
                tracing::warn!("Force killing MCP server '{}'", shared.name);
                if let Err(e) = child.start_kill() {
                    tracing::warn!("Failed to kill MCP server '{}': {e}", shared.name);
                }
                let _ = child.wait().await;
            }

            shared.set_state(SupervisorState::Stopped);
            return;
        };

        match status {
            Ok(status) => tracing::warn!("MCP server '{}' exited: {status}", shared.name),
            Err(e) => tracing::warn!("MCP server '{}' wait failed: {e}", shared.name),
        }
        shared.pipes.lock().await.take();

        if shared.shutdown.is_cancelled() {
            shared.set_state(SupervisorState::Stopped);
            return;
        }

        shared.set_state(SupervisorState::Restarting);
        tracing::info!(
            "Waiting {}s before restarting MCP server '{}'",
            RESTART_BACKOFF.as_secs(),
            shared.name
        );
        tokio::select! {
            () = tokio::time::sleep(RESTART_BACKOFF) => {}
            () = shared.shutdown.cancelled() => {
                shared.set_state(SupervisorState::Stopped);
                return;
            }
        }

        match spawn_process(&shared).await {
            Ok(new_child) => {
                child = new_child;
                shared.restart_count.fetch_add(1, Ordering::Relaxed);
                shared.set_state(SupervisorState::Running);
            }
            Err(e) => {
                tracing::error!("Failed to restart MCP server '{}': {e}", shared.name);
                shared.set_state(SupervisorState::Stopped);
                return;
            }
        }
    }
}
