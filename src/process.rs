//! Structured child-process invocation with timeouts and forced termination.
//!
//! Every stage runs as an explicit program plus argument list; nothing goes through a shell. Children are placed in
//! their own process group so that a timeout or cancellation can kill the whole tree, including grandchildren that
//! still hold the output pipes.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Errors that prevent a process from producing any result.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cancelled")]
    Cancelled,
}

// ============================================================================
// Invocation requests
// ============================================================================

/// A fully specified process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub current_dir: Option<PathBuf>,
    pub env: Vec<(OsString, OsString)>,
}

impl StageCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env.push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        command.envs(self.env.iter().map(|(k, v)| (k, v)));
        command
    }
}

impl fmt::Display for StageCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// What a finished (or killed) process left behind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessOutput {
    /// `None` when the process was killed or died from a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Triggers run-wide cancellation.
#[derive(Debug, Clone)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

/// Observes run-wide cancellation. Cheap to clone into every worker.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// A connected cancel source and token.
pub fn cancellation() -> (CancelSource, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelSource { tx }, CancelToken { rx })
}

impl CancelSource {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the source is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let source_dropped = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if source_dropped {
            std::future::pending::<()>().await;
        }
    }
}

// ============================================================================
// Runner
// ============================================================================

enum Ended {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Launches stage commands under a wall-clock budget.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    kill_grace: Duration,
    cancel: CancelToken,
}

impl ProcessRunner {
    pub fn new(kill_grace: Duration, cancel: CancelToken) -> Self {
        Self { kill_grace, cancel }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Run `command` to completion or until `timeout` elapses.
    ///
    /// ## Returns
    ///
    /// - `Ok` with `timed_out = true` and whatever output was captured if the budget ran out. The process group has
    ///   been killed by then.
    /// - `Err(ProcessError::Cancelled)` if run-wide cancellation fired; the process group has been killed.
    pub async fn run(&self, command: &StageCommand, timeout: Duration) -> Result<ProcessOutput, ProcessError> {
        if self.cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        let program = command.program.display().to_string();
        let mut cmd = command.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        tracing::debug!(command = %command, "spawning");
        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();

        let (stdout_task, stdout_rx) = spawn_reader(child.stdout.take());
        let (stderr_task, stderr_rx) = spawn_reader(child.stderr.take());

        let ended = tokio::select! {
            status = child.wait() => Ended::Exited(status),
            _ = tokio::time::sleep(timeout) => Ended::TimedOut,
            _ = self.cancel.cancelled() => Ended::Cancelled,
        };

        // Reap anything the stage left behind in its group, whether or not the leader exited.
        terminate_group(pid, &mut child);

        let (status, timed_out) = match ended {
            Ended::Exited(status) => {
                let status = status.map_err(|source| ProcessError::Wait {
                    program: program.clone(),
                    source,
                })?;
                (Some(status), false)
            }
            Ended::TimedOut => {
                tracing::warn!(program, ?timeout, "stage timed out, process group killed");
                self.reap(&mut child, &program).await;
                (None, true)
            }
            Ended::Cancelled => {
                tracing::debug!(program, "cancelled, process group killed");
                self.reap(&mut child, &program).await;
                return Err(ProcessError::Cancelled);
            }
        };

        let stdout = collect(stdout_task, stdout_rx, self.kill_grace).await;
        let stderr = collect(stderr_task, stderr_rx, self.kill_grace).await;

        Ok(ProcessOutput {
            exit_code: status.and_then(|s| s.code()),
            stdout,
            stderr,
            timed_out,
            elapsed: started.elapsed(),
        })
    }

    async fn reap(&self, child: &mut Child, program: &str) {
        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => tracing::warn!(program, error = %err, "failed to reap killed process"),
            Err(_) => tracing::warn!(program, grace = ?self.kill_grace, "killed process was not reaped in time"),
        }
    }

    /// Hand the terminal to `command` and wait for it. Used for interactive debugging sessions.
    pub async fn run_interactive(&self, command: &StageCommand) -> Result<Option<i32>, ProcessError> {
        let program = command.program.display().to_string();
        let mut cmd = command.to_command();
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        let status = cmd
            .status()
            .await
            .map_err(|source| ProcessError::Spawn { program, source })?;
        Ok(status.code())
    }
}

fn spawn_reader<R>(source: Option<R>) -> (JoinHandle<()>, mpsc::UnboundedReceiver<Vec<u8>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let Some(mut source) = source else { return };
        let mut buf = vec![0u8; 8192];
        loop {
            match source.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    (handle, rx)
}

/// Wait (bounded) for a reader to hit EOF, then take every chunk it managed to read.
async fn collect(mut handle: JoinHandle<()>, mut rx: mpsc::UnboundedReceiver<Vec<u8>>, grace: Duration) -> Vec<u8> {
    if tokio::time::timeout(grace, &mut handle).await.is_err() {
        tracing::debug!("output pipe still open after grace period, abandoning reader");
        handle.abort();
    }
    let mut out = Vec::new();
    while let Ok(chunk) = rx.try_recv() {
        out.extend_from_slice(&chunk);
    }
    out
}

#[cfg(unix)]
fn terminate_group(pid: Option<u32>, child: &mut Child) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Some(pgid) = pid.and_then(|p| i32::try_from(p).ok()) {
        match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => tracing::warn!(pgid, error = %err, "failed to kill process group"),
        }
    }
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn terminate_group(_pid: Option<u32>, child: &mut Child) {
    let _ = child.start_kill();
}
