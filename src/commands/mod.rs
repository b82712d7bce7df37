//! Configuration commands applied to a server.
//!
//! Commands come from a [`CommandSource`] (inline list, script file or the
//! output of a forked helper), are gathered into an [`ExecutionUnit`] and run
//! by a [`CommandExecutor`] either one by one or as a single composite
//! operation.
//!
//! # Examples
//!
//! ```
//! use appserver_runner::commands::{Command, ExecutionUnit};
//!
//! let unit = ExecutionUnit::new(
//!     vec![
//!         Command::from("/system-property=a:add(value=1)"),
//!         Command::from("/system-property=b:add(value=2)"),
//!     ],
//!     true,
//! );
//! let operations = unit.operations().unwrap();
//! assert_eq!(operations.len(), 2);
//! assert!(unit.is_atomic());
//! ```
mod executor;
mod parser;
mod source;

pub use executor::{CommandExecutor, CommandFailure, ExecutionReport, OfflineServer};
pub use parser::parse_operation;
pub use source::{CommandSource, parse_script};

use crate::error::{Error, Result};
use crate::transport::Operation;

/// One administrative operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Textual command, parsed before the unit is sent
    Raw(String),
    /// Structured operation
    Operation(Operation),
}

impl Command {
    /// The operation this command stands for
    pub fn to_operation(&self) -> std::result::Result<Operation, String> {
        match self {
            Command::Raw(text) => parse_operation(text),
            Command::Operation(operation) => Ok(operation.clone()),
        }
    }
}

impl From<&str> for Command {
    fn from(text: &str) -> Self {
        Command::Raw(text.to_string())
    }
}

impl From<String> for Command {
    fn from(text: String) -> Self {
        Command::Raw(text)
    }
}

impl From<Operation> for Command {
    fn from(operation: Operation) -> Self {
        Command::Operation(operation)
    }
}

/// Ordered commands executed together.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionUnit {
    commands: Vec<Command>,
    /// Script line of each command, when read from a script
    lines: Vec<Option<usize>>,
    atomic: bool,
}

impl ExecutionUnit {
    pub fn new(commands: Vec<Command>, atomic: bool) -> Self {
        let lines = vec![None; commands.len()];
        Self {
            commands,
            lines,
            atomic,
        }
    }

    /// Builds a unit from numbered script lines
    pub fn from_lines(lines: Vec<(usize, String)>, atomic: bool) -> Self {
        let (lines, commands) = lines
            .into_iter()
            .map(|(line, text)| (Some(line), Command::Raw(text)))
            .unzip();
        Self {
            commands,
            lines,
            atomic,
        }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Script line of the command at `index`
    pub fn line_of(&self, index: usize) -> Option<usize> {
        self.lines.get(index).copied().flatten()
    }

    /// Parses every command, in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandSyntax`] for the first command that does not
    /// parse; nothing has been sent at that point.
    pub fn operations(&self) -> Result<Vec<Operation>> {
        self.commands
            .iter()
            .enumerate()
            .map(|(index, command)| {
                command.to_operation().map_err(|message| Error::CommandSyntax {
                    index,
                    line: self.line_of(index),
                    message,
                })
            })
            .collect()
    }
}
