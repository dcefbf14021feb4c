//! Execution sandbox: runs one untrusted script per call as a child process
//! confined to a throwaway working directory, under a wall-clock watchdog.
//!
//! What the sandbox guarantees:
//! - the child's working directory is a fresh directory that is removed
//!   before `execute` returns, whatever the outcome
//! - the child and every process in its group are killed when the timeout
//!   expires (Unix; elsewhere only the direct child)
//! - stdout and stderr are captured up to a fixed byte cap
//!
//! What it does not guarantee: network isolation, memory or CPU quotas, or
//! protection against code that opens absolute paths outside the workspace.

use crate::{
    capture::{read_bounded, CaptureBuffer, CapturedOutput},
    config::{AgentConfig, ArtifactPattern},
    errors::SandboxError,
    workspace::{IsolatedWorkspace, SCRIPT_NAME},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long to wait for both pipe readers once the child is gone. A
/// descendant that left the process group can hold the pipes open forever.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_millis(500);

/// One piece of code to run
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub code: String,
    /// Wall-clock bound enforced by the watchdog
    pub timeout: Duration,
    /// Directory under which the per-call working directory is created
    pub workspace_base: PathBuf,
    /// Identifies the call in exported artifact names
    pub label: String,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            timeout: Duration::from_secs(30),
            workspace_base: std::env::temp_dir().join("vizloop-workspaces"),
            label: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_workspace_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.workspace_base = base.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// Everything observed about one execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// `None` when the process never started, was killed by the watchdog or
    /// died from a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    /// Set only when the watchdog killed the process
    pub timed_out: bool,
    /// Durable copy of the produced artifact
    pub artifact_path: Option<PathBuf>,
    pub duration_ms: u64,
    /// Why the process could not be started
    pub launch_error: Option<String>,
}

/// Coarse classification of an [`ExecutionResult`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    LaunchFailed,
    TimedOut,
    Exited(i32),
    /// Terminated by a signal the watchdog did not send
    Killed,
}

impl ExecutionResult {
    pub fn launch_failure(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            launch_error: Some(message.into()),
            duration_ms: elapsed.as_millis() as u64,
            ..Default::default()
        }
    }

    pub fn outcome(&self) -> ExecutionOutcome {
        if self.launch_error.is_some() {
            ExecutionOutcome::LaunchFailed
        } else if self.timed_out {
            ExecutionOutcome::TimedOut
        } else {
            match self.exit_code {
                Some(code) => ExecutionOutcome::Exited(code),
                None => ExecutionOutcome::Killed,
            }
        }
    }

    /// Exited with status zero
    pub fn exited_cleanly(&self) -> bool {
        self.outcome() == ExecutionOutcome::Exited(0)
    }

    /// Exited with status zero and produced an artifact
    pub fn is_success(&self) -> bool {
        self.exited_cleanly() && self.artifact_path.is_some()
    }
}

/// Capability the control loop uses to run code
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run the request. Failures caused by the code, including failure to
    /// launch it, are reported inside the result.
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult;
}

/// Configuration for [`ProcessSandbox`]
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Path to the Python executable
    pub python_path: PathBuf,
    /// Durable directory artifacts are copied into
    pub output_dir: PathBuf,
    /// Cap on captured bytes per stream
    pub max_output_bytes: usize,
    pub artifact: ArtifactPattern,
    /// Thread cap for scientific libraries
    pub max_threads: u32,
    pub env_vars: HashMap<String, String>,
}

impl SandboxConfig {
    /// Use `python_path` as is; a bad path shows up as a launch failure
    pub fn with_python_path(python_path: PathBuf) -> Self {
        Self {
            python_path,
            output_dir: PathBuf::from("output"),
            max_output_bytes: 64 * 1024,
            artifact: ArtifactPattern::default(),
            max_threads: 4,
            env_vars: HashMap::new(),
        }
    }

    /// Find `python3` or `python` on PATH
    pub fn discover() -> Result<Self, SandboxError> {
        Ok(Self::with_python_path(discover_python()?))
    }

    pub fn from_agent_config(config: &AgentConfig) -> Result<Self, SandboxError> {
        let python_path = match &config.python_path {
            Some(path) => resolve_python(path)?,
            None => discover_python()?,
        };
        Ok(Self {
            python_path,
            output_dir: config.output_dir.clone(),
            max_output_bytes: config.max_output_bytes,
            artifact: config.artifact.clone(),
            max_threads: config.max_threads,
            env_vars: config.env_vars.clone(),
        })
    }
}

pub fn discover_python() -> Result<PathBuf, SandboxError> {
    which::which("python3")
        .or_else(|_| which::which("python"))
        .map_err(|_| SandboxError::PythonNotFound)
}

/// Accept an explicit path, or a bare name looked up on PATH
fn resolve_python(path: &Path) -> Result<PathBuf, SandboxError> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    which::which(path).map_err(|_| SandboxError::InterpreterMissing(path.display().to_string()))
}

/// Runs each request as a fresh interpreter process
pub struct ProcessSandbox {
    config: SandboxConfig,
}

impl ProcessSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, workspace: &IsolatedWorkspace) -> Command {
        let mut cmd = Command::new(&self.config.python_path);
        cmd.arg(SCRIPT_NAME)
            .current_dir(workspace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONIOENCODING", "utf-8")
            .env("MPLBACKEND", "Agg");

        let threads = self.config.max_threads.to_string();
        cmd.env("OMP_NUM_THREADS", &threads)
            .env("OPENBLAS_NUM_THREADS", &threads)
            .env("MKL_NUM_THREADS", &threads);
        for (key, value) in &self.config.env_vars {
            cmd.env(key, value);
        }

        // Own process group so the watchdog can take down descendants too
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }

    /// Launch, supervise and capture. Returns a result with `launch_error`
    /// set if the process never started.
    async fn run(&self, workspace: &IsolatedWorkspace, request: &ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();

        if let Err(e) = workspace.write_script(&request.code) {
            return ExecutionResult::launch_failure(
                format!("failed to write script: {e}"),
                started.elapsed(),
            );
        }

        let mut child = match self.build_command(workspace).spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = if e.kind() == std::io::ErrorKind::NotFound {
                    format!(
                        "interpreter not found: {}",
                        self.config.python_path.display()
                    )
                } else {
                    format!("failed to start interpreter: {e}")
                };
                warn!(label = %request.label, error = %e, "[SANDBOX] Launch failed");
                return ExecutionResult::launch_failure(message, started.elapsed());
            }
        };
        let pid = child.id();
        debug!(label = %request.label, ?pid, "[SANDBOX] Spawned interpreter");

        let max = self.config.max_output_bytes;
        let mut stdout_reader = StreamReader::spawn("stdout", child.stdout.take(), max);
        let mut stderr_reader = StreamReader::spawn("stderr", child.stderr.take(), max);

        let mut notes = Vec::new();
        let (exit_code, timed_out) = match tokio::time::timeout(request.timeout, child.wait()).await
        {
            Ok(Ok(status)) => (status.code(), false),
            Ok(Err(e)) => {
                warn!(label = %request.label, error = %e, "[SANDBOX] Failed to wait on child");
                notes.push(format!("sandbox lost track of the process: {e}"));
                kill_process_group(pid);
                if let Err(e) = child.kill().await {
                    warn!(label = %request.label, error = %e, "[SANDBOX] Failed to kill child");
                }
                (None, false)
            }
            Err(_) => {
                warn!(
                    label = %request.label,
                    timeout_secs = request.timeout.as_secs_f64(),
                    "[SANDBOX] Execution timed out; killing process group"
                );
                kill_process_group(pid);
                if let Err(e) = child.kill().await {
                    warn!(label = %request.label, error = %e, "[SANDBOX] Failed to kill timed-out child");
                }
                notes.push(format!(
                    "Execution timeout expired ({}s).",
                    request.timeout.as_secs_f64()
                ));
                (None, true)
            }
        };
        // Stragglers left in the group after a normal exit would otherwise
        // keep running and hold the pipes open
        if !timed_out {
            kill_process_group(pid);
        }

        let drained = tokio::time::timeout(IO_CAPTURE_TIMEOUT, async {
            tokio::join!(stdout_reader.wait(), stderr_reader.wait())
        })
        .await;
        if drained.is_err() {
            warn!(
                label = %request.label,
                "[SANDBOX] Output still open after exit; keeping what was captured"
            );
        }
        let stdout = stdout_reader.finish();
        let mut stderr = stderr_reader.finish();
        for note in notes {
            if !stderr.text.is_empty() && !stderr.text.ends_with('\n') {
                stderr.text.push('\n');
            }
            stderr.text.push_str(&note);
        }

        ExecutionResult {
            exit_code,
            stdout: stdout.text,
            stderr: stderr.text,
            stdout_truncated: stdout.truncated,
            stderr_truncated: stderr.truncated,
            timed_out,
            artifact_path: None,
            duration_ms: started.elapsed().as_millis() as u64,
            launch_error: None,
        }
    }

    /// Copy the artifact, if any, out of the workspace before it is removed
    fn collect_artifact(
        &self,
        workspace: &IsolatedWorkspace,
        request: &ExecutionRequest,
        result: &mut ExecutionResult,
    ) {
        let found = match workspace.find_artifact(&self.config.artifact) {
            Ok(found) => found,
            Err(e) => {
                warn!(label = %request.label, error = %e, "[SANDBOX] Failed to scan workspace");
                return;
            }
        };
        let Some(source) = found else {
            debug!(label = %request.label, "[SANDBOX] No artifact produced");
            return;
        };

        match workspace.export_artifact(&source, &self.config.output_dir, &request.label) {
            Ok(dest) => result.artifact_path = Some(dest),
            Err(e) => {
                warn!(label = %request.label, error = %e, "[SANDBOX] Failed to export artifact");
                if !result.stderr.is_empty() && !result.stderr.ends_with('\n') {
                    result.stderr.push('\n');
                }
                result
                    .stderr
                    .push_str(&format!("Generated artifact could not be saved: {e}"));
            }
        }
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();
        let workspace = match IsolatedWorkspace::new(&request.workspace_base) {
            Ok(workspace) => workspace,
            Err(e) => {
                warn!(label = %request.label, error = %e, "[SANDBOX] Failed to create workspace");
                return ExecutionResult::launch_failure(
                    format!("failed to create workspace: {e}"),
                    started.elapsed(),
                );
            }
        };

        let mut result = self.run(&workspace, request).await;
        if result.launch_error.is_none() {
            self.collect_artifact(&workspace, request, &mut result);
        }

        let workspace_path = workspace.path().to_path_buf();
        if let Err(e) = workspace.close() {
            warn!(
                "[SANDBOX] Failed to cleanup workspace {:?}: {}",
                workspace_path, e
            );
        }

        info!(
            label = %request.label,
            exit_code = ?result.exit_code,
            timed_out = result.timed_out,
            artifact = ?result.artifact_path,
            duration_ms = result.duration_ms,
            "[SANDBOX] Execution finished"
        );
        result
    }
}

/// Background reader for one child pipe
struct StreamReader {
    stream: &'static str,
    buffer: CaptureBuffer,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl StreamReader {
    fn spawn<R>(stream: &'static str, pipe: Option<R>, max_bytes: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = CaptureBuffer::new();
        let task = pipe.map(|pipe| tokio::spawn(read_bounded(pipe, max_bytes, buffer.clone())));
        Self {
            stream,
            buffer,
            task,
        }
    }

    /// Wait for EOF. The handle is only released once the reader is done,
    /// so a cancelled wait leaves it in place for `finish` to abort.
    async fn wait(&mut self) {
        let Some(task) = self.task.as_mut() else {
            return;
        };
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(stream = self.stream, error = %e, "[SANDBOX] Capture failed"),
            Err(e) => warn!(stream = self.stream, error = %e, "[SANDBOX] Capture task panicked"),
        }
        self.task = None;
    }

    /// Output read so far. A reader that never reached EOF is aborted and its
    /// stream marked as cut short.
    fn finish(self) -> CapturedOutput {
        let cut_short = match self.task {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        };
        self.buffer.snapshot(cut_short)
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => debug!(pid, "[SANDBOX] Killed process group"),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!(pid, error = %e, "[SANDBOX] Failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}
