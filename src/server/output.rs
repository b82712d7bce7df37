use crate::error::{Error, Result};
use async_process::{ChildStderr, Stdio};
use futures_lite::io::{AsyncBufReadExt, BufReader};
use futures_lite::StreamExt;
use std::fs::OpenOptions;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

/// How a launched process's standard streams are consumed.
///
/// Standard error is merged into standard output unless the policy is
/// [`OutputPolicy::Discard`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OutputPolicy {
    /// Pass output through to the runner's own standard output
    #[default]
    Inherit,
    /// Drop all output
    Discard,
    /// Write output to a file
    RedirectToFile {
        path: PathBuf,
        /// Append instead of truncating an existing file
        append: bool,
    },
}

impl OutputPolicy {
    /// Parses the textual `stdout` setting.
    ///
    /// `none` discards, unset or `System.out`/`System.err` inherits, anything
    /// else names a file that is truncated on launch.
    ///
    /// ```
    /// use appserver_runner::server::OutputPolicy;
    ///
    /// assert_eq!(OutputPolicy::parse(Some("none")), OutputPolicy::Discard);
    /// assert_eq!(OutputPolicy::parse(Some("System.err")), OutputPolicy::Inherit);
    /// ```
    pub fn parse(setting: Option<&str>) -> Self {
        match setting.map(str::trim) {
            None | Some("") => OutputPolicy::Inherit,
            Some(s) if s.eq_ignore_ascii_case("none") => OutputPolicy::Discard,
            Some(s) if s.eq_ignore_ascii_case("System.out") || s.eq_ignore_ascii_case("System.err") => {
                OutputPolicy::Inherit
            }
            Some(path) => OutputPolicy::RedirectToFile {
                path: PathBuf::from(path),
                append: false,
            },
        }
    }

    /// Opens whatever the policy needs and returns the child's stdio.
    ///
    /// A redirect file is owned by the returned [`Stdio`] handles; it is
    /// closed when the spawn fails or, after a spawn, when the child exits.
    pub(crate) fn stdio(&self) -> Result<ProcessStdio> {
        match self {
            OutputPolicy::Inherit => Ok(ProcessStdio {
                stdout: Stdio::inherit(),
                stderr: Stdio::piped(),
                forward_stderr: true,
            }),
            OutputPolicy::Discard => Ok(ProcessStdio {
                stdout: Stdio::null(),
                stderr: Stdio::null(),
                forward_stderr: false,
            }),
            OutputPolicy::RedirectToFile { path, append } => {
                let file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .append(*append)
                    .truncate(!*append)
                    .open(path)
                    .map_err(|e| {
                        Error::Process(format!(
                            "Failed to open output file {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
                let stderr = file.try_clone().map_err(|e| {
                    Error::Process(format!("Failed to duplicate output file handle: {}", e))
                })?;
                Ok(ProcessStdio {
                    stdout: Stdio::from(file),
                    stderr: Stdio::from(stderr),
                    forward_stderr: false,
                })
            }
        }
    }
}

pub(crate) struct ProcessStdio {
    pub stdout: Stdio,
    pub stderr: Stdio,
    /// Standard error is piped and must be pumped into our standard output
    pub forward_stderr: bool,
}

/// Copies a child's standard error into the runner's standard output, line by line.
pub(crate) fn forward_stderr(stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut stdout = tokio::io::stdout();
        while let Some(line) = lines.next().await {
            let Ok(mut line) = line else { break };
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
        let _ = stdout.flush().await;
    })
}
