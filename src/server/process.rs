use crate::error::{Error, Result};
use crate::server::command::CommandLine;
use crate::server::output::{OutputPolicy, forward_stderr};
use async_process::{Child, ExitStatus, Stdio};
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique identifier for a server handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerId(Uuid);

impl ServerId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A launched server process.
///
/// The child is killed if this value is dropped while it is still running.
pub struct ServerProcess {
    /// OS process id
    pid: u32,
    /// Child process
    child: Child,
    /// Pump copying standard error, when output is inherited
    stderr_pump: Option<JoinHandle<()>>,
    /// Exit status, once observed
    exit_status: Option<ExitStatus>,
}

impl ServerProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Non-blocking exit check
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }
        let status = self
            .child
            .try_status()
            .map_err(|e| Error::Process(format!("Failed to query process status: {}", e)))?;
        if status.is_some() {
            self.exit_status = status;
            self.stop_pump();
        }
        Ok(status)
    }

    /// Waits up to `timeout` for the process to exit
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }
        match tokio::time::timeout(timeout, self.child.status()).await {
            Ok(Ok(status)) => {
                self.exit_status = Some(status);
                self.stop_pump();
                Ok(Some(status))
            }
            Ok(Err(e)) => Err(Error::Process(format!("Failed to wait for process: {}", e))),
            Err(_) => Ok(None),
        }
    }

    /// Asks the process to stop: SIGTERM on Unix, a kill elsewhere.
    pub fn request_stop(&mut self) -> Result<()> {
        if self.exit_status.is_some() {
            return Ok(());
        }
        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            let pid = i32::try_from(self.pid)
                .map_err(|_| Error::Process(format!("Invalid pid {}", self.pid)))?;
            match kill(Pid::from_raw(pid), Signal::SIGTERM) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
                Err(e) => Err(Error::Process(format!("Failed to send SIGTERM: {}", e))),
            }
        }
        #[cfg(not(unix))]
        {
            self.force_kill()
        }
    }

    fn force_kill(&mut self) -> Result<()> {
        match self.child.kill() {
            Ok(()) => Ok(()),
            // Already exited.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(Error::Process(format!("Failed to kill process: {}", e))),
        }
    }

    fn stop_pump(&mut self) {
        // The pump ends by itself on EOF; only detach it here.
        self.stderr_pump.take();
    }
}

impl fmt::Debug for ServerProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerProcess")
            .field("pid", &self.pid)
            .field("exit_status", &self.exit_status)
            .finish()
    }
}

/// Output of a helper process run to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedProcess {
    /// Exit code; `None` when killed by a signal
    pub code: Option<i32>,
    /// Standard output, split into lines
    pub stdout: Vec<String>,
    /// Standard error, verbatim
    pub stderr: String,
}

impl CompletedProcess {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Launches and terminates processes.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    /// How long a killed process may take to exit
    kill_grace: Duration,
}

impl ProcessSupervisor {
    pub fn new(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }

    pub fn kill_grace(&self) -> Duration {
        self.kill_grace
    }

    /// Spawns `command` with its output handled per `output`.
    #[tracing::instrument(skip(self, command), fields(program = %command.program.display()))]
    pub fn launch(&self, command: &CommandLine, output: &OutputPolicy) -> Result<ServerProcess> {
        let stdio = output.stdio()?;

        let mut process = command.to_command();
        process
            .stdin(Stdio::null())
            .stdout(stdio.stdout)
            .stderr(stdio.stderr)
            .kill_on_drop(true);

        let mut child = process.spawn().map_err(|e| {
            tracing::error!(error = %e, "Failed to spawn server process");
            Error::Process(format!(
                "Failed to start {}: {}",
                command.program.display(),
                e
            ))
        })?;
        // `process` still holds the redirect file handles.
        drop(process);

        let stderr_pump = if stdio.forward_stderr {
            child.stderr.take().map(forward_stderr)
        } else {
            None
        };

        let pid = child.id();
        tracing::info!(pid, "Launched server process");
        Ok(ServerProcess {
            pid,
            child,
            stderr_pump,
            exit_status: None,
        })
    }

    /// Ends `process`.
    ///
    /// When `graceful`, the process is given `timeout` to exit on its own
    /// (the caller has already asked it to stop). Otherwise, or when that
    /// wait runs out, it is killed and given the kill grace period.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownTimeout`] if the process is still alive after
    /// the kill grace period.
    pub async fn terminate(
        &self,
        process: &mut ServerProcess,
        graceful: bool,
        timeout: Duration,
    ) -> Result<ExitStatus> {
        self.terminate_or_cancel(process, graceful, timeout, &CancellationToken::new())
            .await
    }

    /// Like [`ProcessSupervisor::terminate`]; `cancel` cuts the graceful
    /// wait short and goes straight to the kill.
    #[tracing::instrument(skip(self, process, cancel), fields(pid = process.pid))]
    pub async fn terminate_or_cancel(
        &self,
        process: &mut ServerProcess,
        graceful: bool,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExitStatus> {
        if let Some(status) = process.try_wait()? {
            return Ok(status);
        }

        if graceful {
            let exited = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::warn!("Shutdown interrupted, killing process");
                    None
                }
                exited = process.wait_timeout(timeout) => exited?,
            };
            if let Some(status) = exited {
                tracing::debug!(%status, "Process exited");
                return Ok(status);
            }
            if !cancel.is_cancelled() {
                tracing::warn!(?timeout, "Process did not stop in time, killing it");
            }
        }

        process.force_kill()?;
        match process.wait_timeout(self.kill_grace).await? {
            Some(status) => {
                tracing::debug!(%status, "Process killed");
                Ok(status)
            }
            None => {
                tracing::error!(grace = ?self.kill_grace, "Process survived kill");
                Err(Error::ShutdownTimeout {
                    timeout: self.kill_grace,
                })
            }
        }
    }

    /// Runs a short-lived helper process and collects its output.
    #[tracing::instrument(skip(self, command), fields(program = %command.program.display()))]
    pub async fn run_to_completion(&self, command: &CommandLine) -> Result<CompletedProcess> {
        let output = command
            .to_command()
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                Error::Process(format!(
                    "Failed to run {}: {}",
                    command.program.display(),
                    e
                ))
            })?;

        let completed = CompletedProcess {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::to_string)
                .collect(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!(code = ?completed.code, lines = completed.stdout.len(), "Helper process finished");
        Ok(completed)
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}
