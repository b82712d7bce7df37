use crate::commands::{Command, ExecutionUnit};
use crate::error::{Error, Result};
use crate::server::{CommandLine, ProcessSupervisor};
use std::path::PathBuf;

/// Where the commands of a unit come from.
#[derive(Debug, Clone)]
pub enum CommandSource {
    /// Commands given directly
    Inline(Vec<Command>),
    /// A script file, one command per line
    Script(PathBuf),
    /// A helper process whose standard output is the command stream
    Forked(CommandLine),
}

impl CommandSource {
    /// Reads the commands and wraps them into a unit.
    ///
    /// # Errors
    ///
    /// * [`Error::Io`] if a script cannot be read
    /// * [`Error::ForkedExecution`] if the helper exits non-zero
    #[tracing::instrument(skip(self, supervisor))]
    pub async fn load(&self, supervisor: &ProcessSupervisor, atomic: bool) -> Result<ExecutionUnit> {
        let unit = match self {
            CommandSource::Inline(commands) => ExecutionUnit::new(commands.clone(), atomic),
            CommandSource::Script(path) => {
                let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                    tracing::error!(path = %path.display(), error = %e, "Failed to read script");
                    e
                })?;
                ExecutionUnit::from_lines(parse_script(&content), atomic)
            }
            CommandSource::Forked(command) => {
                let completed = supervisor.run_to_completion(command).await?;
                if !completed.success() {
                    tracing::error!(code = ?completed.code, "Command helper failed");
                    return Err(Error::ForkedExecution {
                        code: completed.code,
                        stderr: completed.stderr.trim().to_string(),
                    });
                }
                ExecutionUnit::from_lines(parse_script(&completed.stdout.join("\n")), atomic)
            }
        };
        tracing::debug!(commands = unit.len(), atomic, "Loaded commands");
        Ok(unit)
    }
}

/// Splits a script into numbered commands.
///
/// Blank lines and lines starting with `#` are skipped. Line numbers are
/// one-based.
///
/// ```
/// use appserver_runner::commands::parse_script;
///
/// let commands = parse_script("# setup\n:read-resource\n\n  /system-property=a:add(value=1)\n");
/// assert_eq!(
///     commands,
///     vec![
///         (2, ":read-resource".to_string()),
///         (4, "/system-property=a:add(value=1)".to_string()),
///     ]
/// );
/// ```
pub fn parse_script(content: &str) -> Vec<(usize, String)> {
    content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                None
            } else {
                Some((index + 1, line.to_string()))
            }
        })
        .collect()
}
