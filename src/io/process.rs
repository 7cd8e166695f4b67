//! Process management layer
//!
//! Spawns the debuggee interpreter, forwards its stdout/stderr as they
//! arrive and reports its exit. Everything is delivered as [`ProcessEvent`]s
//! on a channel so the session loop can select on it.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{error, info, trace, warn};

// ============================================================================
// Process State Management
// ============================================================================

/// Process lifecycle states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Process is currently running
    Running { pid: u32 },
    /// Process has been killed by us
    Stopped,
}

impl ProcessState {
    /// Get the process ID if the process is running
    pub fn pid(&self) -> Option<u32> {
        match self {
            ProcessState::Running { pid } => Some(*pid),
            ProcessState::Stopped => None,
        }
    }
}

/// Which pipe a chunk of output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    /// Output event category for this stream
    pub fn category(self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// What the child process reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// One line of output, line terminator included
    Output { stream: OutputStream, text: String },
    /// The process is gone; always the last event. `None` when killed by a signal
    Exited { code: Option<i32> },
}

/// Error types for process management
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Stdout not available")]
    StdoutNotAvailable,

    #[error("Stderr not available")]
    StderrNotAvailable,

    #[error("Process not running")]
    NotRunning,
}

/// What to run and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

// ============================================================================
// Debuggee process
// ============================================================================

/// A running debuggee interpreter
pub struct DebuggeeProcess {
    state: ProcessState,
}

impl DebuggeeProcess {
    /// Spawn `spec`, delivering its output and exit on `events`
    pub fn spawn(
        spec: &ProcessSpec,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Result<Self, ProcessError> {
        info!("Starting debuggee: {} {:?}", spec.program, spec.args);

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(working_dir) = &spec.working_dir {
            command.current_dir(working_dir);
        }

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let stdout = child.stdout.take().ok_or(ProcessError::StdoutNotAvailable)?;
        let stderr = child.stderr.take().ok_or(ProcessError::StderrNotAvailable)?;

        let state = match child.id() {
            Some(pid) => {
                info!("Debuggee started with PID: {}", pid);
                ProcessState::Running { pid }
            }
            // Already reaped; the wait task reports the exit
            None => ProcessState::Stopped,
        };

        let stdout_task = tokio::spawn(forward_lines(stdout, OutputStream::Stdout, events.clone()));
        let stderr_task = tokio::spawn(forward_lines(stderr, OutputStream::Stderr, events.clone()));

        let pid = state.pid();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => {
                    info!("Debuggee PID {:?} exited with status: {}", pid, status);
                    status.code()
                }
                Err(e) => {
                    error!("Error waiting for debuggee process: {}", e);
                    None
                }
            };

            // Drain remaining output so it precedes the exit notification
            for task in [stdout_task, stderr_task] {
                if let Err(e) = task.await {
                    warn!("Output forwarder failed: {}", e);
                }
            }
            let _ = events.send(ProcessEvent::Exited { code });
            trace!("DebuggeeProcess: wait task finished for PID {:?}", pid);
        });

        Ok(Self { state })
    }

    pub fn pid(&self) -> Option<u32> {
        self.state.pid()
    }

    pub fn is_running(&self) -> bool {
        self.state.pid().is_some()
    }

    /// Force kill the process (SIGKILL); its exit is still reported
    pub fn kill(&mut self) -> Result<(), ProcessError> {
        let pid = self.state.pid().ok_or(ProcessError::NotRunning)?;
        info!("Force killing debuggee with PID: {}", pid);

        #[cfg(unix)]
        {
            // SAFETY: plain syscall on a pid we spawned
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGKILL);
            }
            info!("Sent SIGKILL to process {}", pid);
        }
        #[cfg(not(unix))]
        {
            warn!("Process termination not implemented on this platform");
        }

        self.state = ProcessState::Stopped;
        Ok(())
    }

    /// Record that the exit was observed so the pid is never signalled again
    pub fn mark_exited(&mut self) {
        self.state = ProcessState::Stopped;
    }
}

impl Drop for DebuggeeProcess {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.kill();
        }
    }
}

/// Forward `reader` line by line until EOF
async fn forward_lines<R>(reader: R, stream: OutputStream, events: mpsc::UnboundedSender<ProcessEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => {
                trace!("DebuggeeProcess: {} EOF reached", stream.category());
                break;
            }
            Ok(_) => {
                let text = String::from_utf8_lossy(&line).into_owned();
                if events.send(ProcessEvent::Output { stream, text }).is_err() {
                    // Nobody listens any more; keep draining so the child never blocks
                    trace!("DebuggeeProcess: {} receiver dropped", stream.category());
                }
            }
            Err(e) => {
                error!("Failed to read from debuggee {}: {}", stream.category(), e);
                break;
            }
        }
    }
}
