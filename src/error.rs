/// Error handling module for appserver-runner.
///
/// This module defines the error types used throughout the library.
/// Each failure class the orchestrator can hit has its own variant, carrying
/// enough context (command index, matched names, timeout value) to diagnose
/// a failed build without re-running it.
///
/// # Example
///
/// ```
/// use appserver_runner::error::{Error, Result};
///
/// fn handle_error(result: Result<()>) {
///     match result {
///         Ok(_) => println!("Operation succeeded"),
///         Err(Error::StartupTimeout { timeout }) => {
///             println!("Server not ready after {:?}", timeout)
///         }
///         Err(Error::AmbiguousMatch { pattern, candidates }) => {
///             println!("'{}' matched {:?}", pattern, candidates)
///         }
///         Err(e) => println!("Other error: {}", e),
///     }
/// }
/// ```
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the appserver-runner library.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to parse configuration from a file or string.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration parsed but contains invalid values.
    ///
    /// This error occurs when:
    /// - A timeout is zero
    /// - Domain config names are given for a standalone server
    /// - A match policy or user definition is malformed
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The installation root does not have the expected layout.
    ///
    /// Fatal and never retried.
    #[error("Invalid installation at {path}: {reason}")]
    InvalidInstallation {
        /// Installation root that was checked
        path: PathBuf,
        /// What was missing
        reason: String,
    },

    /// The server did not report ready within the startup timeout.
    ///
    /// The launched process has been force-killed when this is returned.
    #[error("Server did not become ready within {timeout:?}")]
    StartupTimeout {
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// Readiness polling hit an unrecoverable error or the process died.
    #[error("Server failed to start: {0}")]
    Startup(String),

    /// The process was still alive after the forced-kill grace period.
    #[error("Server process did not exit within {timeout:?} after being killed")]
    ShutdownTimeout {
        /// Grace period that elapsed after the kill signal
        timeout: Duration,
    },

    /// A command could not be parsed.
    ///
    /// `index` is the zero-based position of the command in its unit; `line`
    /// is the one-based line number when the command came from a script.
    #[error("Invalid command #{index}{}: {message}", line.map(|l| format!(" (line {})", l)).unwrap_or_default())]
    CommandSyntax {
        /// Position of the command in the unit
        index: usize,
        /// Script line, if any
        line: Option<usize>,
        /// What is wrong with it
        message: String,
    },

    /// The server rejected a command.
    ///
    /// `index` is `None` when an atomic unit failed without identifying the
    /// failing step.
    #[error("Command{} failed: {message}", index.map(|i| format!(" #{}", i)).unwrap_or_default())]
    CommandExecution {
        /// Position of the failing command in the unit
        index: Option<usize>,
        /// Failure description reported by the server
        message: String,
    },

    /// The forked helper process exited with a non-zero code.
    #[error("Forked command process exited with {}: {stderr}", code.map(|c| format!("code {}", c)).unwrap_or_else(|| "a signal".to_string()))]
    ForkedExecution {
        /// Exit code, if the process was not killed by a signal
        code: Option<i32>,
        /// Captured standard error
        stderr: String,
    },

    /// A match policy of FAIL saw more than one candidate.
    #[error("Pattern '{pattern}' matched multiple deployments: {}", candidates.join(", "))]
    AmbiguousMatch {
        /// Pattern that was resolved
        pattern: String,
        /// Every deployment that matched, in lexicographic order
        candidates: Vec<String>,
    },

    /// A named deployment does not exist on the server.
    #[error("Deployment not found: {0}")]
    DeploymentNotFound(String),

    /// Error when starting, stopping, or waiting on a server process.
    #[error("Server process error: {0}")]
    Process(String),

    /// Error in the JSON-RPC framing.
    #[error("JSON-RPC error: {0}")]
    JsonRpc(String),

    /// Error in the transport layer.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The management endpoint refused the connection.
    ///
    /// This is the only condition retried while waiting for startup.
    #[error("Connection refused by {0}")]
    ConnectionRefused(String),

    /// Authentication was required but failed or could not be supplied.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A management operation returned a failed outcome.
    #[error("Operation '{operation}' failed: {message}")]
    OperationFailed {
        /// Operation name
        operation: String,
        /// Failure description reported by the server
        message: String,
    },

    /// Operation timed out.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The operation was cancelled.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The server is already running.
    ///
    /// This error occurs when:
    /// - Launching against a handle that already owns a process
    /// - The management endpoint already answers as running
    #[error("Already running")]
    AlreadyRunning,

    /// The server is not running.
    #[error("Not running")]
    NotRunning,

    /// The handle is in a state that does not allow the request.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Error in serializing or deserializing data.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error not covered by the above categories.
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Whether readiness polling may retry after this error.
    pub fn is_retryable_during_startup(&self) -> bool {
        matches!(self, Error::ConnectionRefused(_))
    }
}

/// Result type for appserver-runner operations.
pub type Result<T> = std::result::Result<T, Error>;
