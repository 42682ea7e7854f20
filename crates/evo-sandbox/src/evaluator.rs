//! Sandboxed evaluation
//!
//! Every call to [`SandboxEvaluator::execute`] runs exactly one worker
//! process in a fresh temporary workspace with a cleared environment. The
//! worker's stdout is drained by a reader task that forwards the decoded
//! result over a bounded channel of capacity one. The caller waits on the
//! worker until a deadline; past it the worker is killed and reaped.
//!
//! # Guarantees
//! - No worker outlives the call (`kill_on_drop` plus explicit kill on timeout)
//! - The call returns within `timeout` plus the teardown grace period
//! - Every failure is an [`EvaluationError`], never a panic or host error

use crate::error::SandboxError;
use crate::runtime::{PythonRuntime, WorkerRuntime, WORKSPACE_ENV};
use crate::scores::{EvaluationError, EvaluationResult, WorkerMessage};
use evo_program::Program;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

/// Anything that can score a program
///
/// The controller depends on this seam rather than on the process sandbox.
#[async_trait::async_trait]
pub trait ProgramEvaluator: Send + Sync {
    /// Score a program
    async fn evaluate(&self, program: &Program) -> EvaluationResult;
}

/// Sandbox configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock budget per evaluation, in seconds; fractions allowed
    pub timeout_secs: f64,
    /// Grace period for collecting worker output after exit or kill, in milliseconds
    pub teardown_grace_ms: u64,
    /// Bytes of stdout/stderr retained per worker (the tail is kept)
    pub max_output_bytes: usize,
    /// Host environment variables passed through to the worker
    pub inherit_env: Vec<String>,
    /// Parent directory for worker workspaces (system temp dir if unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
}

impl SandboxConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs_f64();
        self
    }

    /// With workspace parent directory
    #[inline]
    #[must_use]
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Evaluation timeout
    ///
    /// Negative, NaN or overflowing values yield zero, so the worker times
    /// out at once.
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or(Duration::ZERO)
    }

    /// Teardown grace period
    #[inline]
    #[must_use]
    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300.0,
            teardown_grace_ms: 2_000,
            max_output_bytes: 1024 * 1024,
            inherit_env: ["PATH", "HOME", "LANG", "PYTHONPATH"]
                .into_iter()
                .map(String::from)
                .collect(),
            workdir: None,
        }
    }
}

/// Process-isolated, timeout-bounded evaluator
#[derive(Debug, Clone)]
pub struct SandboxEvaluator {
    runtime: Arc<dyn WorkerRuntime>,
    config: SandboxConfig,
}

impl SandboxEvaluator {
    /// Create evaluator
    #[inline]
    #[must_use]
    pub fn new(runtime: Arc<dyn WorkerRuntime>, config: SandboxConfig) -> Self {
        Self { runtime, config }
    }

    /// Python evaluator with default configuration
    #[must_use]
    pub fn python(eval_script: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(PythonRuntime::new(eval_script)), SandboxConfig::default())
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Evaluate with the configured timeout
    pub async fn execute(&self, program: &Program) -> EvaluationResult {
        self.execute_within(program, self.config.timeout()).await
    }

    /// Evaluate with an explicit timeout
    pub async fn execute_within(&self, program: &Program, timeout: Duration) -> EvaluationResult {
        let span = tracing::info_span!(
            "evaluate",
            origin = program.origin(),
            hash = %program.hash().short(),
            runtime = self.runtime.name(),
        );
        async move {
            let started = std::time::Instant::now();
            let result = match self.run_worker(program, timeout).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(error = %e, "sandbox failure");
                    Err(EvaluationError::Exception(e.to_string()))
                }
            };
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match &result {
                Ok(scores) => tracing::info!(%scores, elapsed_ms, "evaluation complete"),
                Err(EvaluationError::Timeout) => {
                    tracing::warn!(elapsed_ms, "evaluation timed out");
                }
                Err(EvaluationError::NoResult) => {
                    tracing::warn!(elapsed_ms, "evaluation failed with no result");
                }
                Err(EvaluationError::Exception(message)) => {
                    tracing::warn!(error = %message, elapsed_ms, "evaluation failed with error");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_worker(
        &self,
        program: &Program,
        timeout: Duration,
    ) -> Result<EvaluationResult, SandboxError> {
        let deadline = Instant::now() + timeout;
        // Removed on drop, on every path out of this function.
        let workspace = self.create_workspace(program)?;

        let mut command = self
            .runtime
            .stage(workspace.path(), program)?
            .env(WORKSPACE_ENV, workspace.path())
            .into_command(self.inherited_env());
        command
            .current_dir(workspace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| SandboxError::Spawn {
            runtime: self.runtime.name().to_string(),
            source,
        })?;
        tracing::debug!(pid = child.id(), workspace = %workspace.path().display(), "worker started");

        let limit = self.config.max_output_bytes;
        let (tx, mut rx) = mpsc::channel(1);
        let mut reader = tokio::spawn(forward_result(child.stdout.take(), limit, tx));
        let mut diagnostics = tokio::spawn(read_tail(child.stderr.take(), limit));

        let status = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(status) => status.map_err(SandboxError::Wait)?,
            Err(_) => {
                terminate(&mut child).await;
                reader.abort();
                diagnostics.abort();
                return Ok(Err(EvaluationError::Timeout));
            }
        };

        // A grandchild can keep the pipes open after the worker exits.
        let grace = self.config.teardown_grace();
        if tokio::time::timeout(grace, &mut reader).await.is_err() {
            tracing::debug!("worker stdout still open after exit");
            reader.abort();
        }
        let stderr_tail = collect(&mut diagnostics, grace).await;

        match rx.try_recv() {
            Ok(message) => Ok(message.into_result()),
            Err(_) => {
                log_silent_exit(status, &stderr_tail);
                Ok(Err(EvaluationError::NoResult))
            }
        }
    }

    fn create_workspace(&self, program: &Program) -> Result<tempfile::TempDir, SandboxError> {
        let prefix = format!("candidate_{}_", program.hash().short());
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        match &self.config.workdir {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        }
        .map_err(SandboxError::Workspace)
    }

    fn inherited_env(&self) -> Vec<(String, std::ffi::OsString)> {
        self.config
            .inherit_env
            .iter()
            .filter_map(|key| std::env::var_os(key).map(|value| (key.clone(), value)))
            .collect()
    }
}

#[async_trait::async_trait]
impl ProgramEvaluator for SandboxEvaluator {
    async fn evaluate(&self, program: &Program) -> EvaluationResult {
        self.execute(program).await
    }
}

/// Kill and reap the worker
async fn terminate(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "failed to kill timed-out worker");
    }
}

async fn forward_result<R>(stdout: Option<R>, limit: usize, tx: mpsc::Sender<WorkerMessage>)
where
    R: AsyncRead + Unpin,
{
    let output = read_tail(stdout, limit).await;
    if let Some(message) = WorkerMessage::decode(&output) {
        // Receiver only disappears once the caller has given up.
        let _ = tx.send(message).await;
    }
}

/// Drain a pipe to EOF, keeping at most the last `limit` bytes
async fn read_tail<R>(pipe: Option<R>, limit: usize) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return Vec::new();
    };
    let mut tail = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > limit {
                    let excess = tail.len() - limit;
                    tail.drain(..excess);
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "worker pipe read failed");
                break;
            }
        }
    }
    tail
}

async fn collect(task: &mut JoinHandle<Vec<u8>>, grace: Duration) -> String {
    match tokio::time::timeout(grace, &mut *task).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

fn log_silent_exit(status: ExitStatus, stderr_tail: &str) {
    let last_lines: Vec<&str> = stderr_tail.lines().rev().take(5).collect();
    tracing::debug!(
        %status,
        stderr = %last_lines.into_iter().rev().collect::<Vec<_>>().join("\n"),
        "worker exited without reporting a result"
    );
}
