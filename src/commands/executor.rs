use crate::client::ManagementClient;
use crate::commands::ExecutionUnit;
use crate::error::{Error, Result};
use crate::server::{
    CommandBuilder, LaunchSpec, OutputPolicy, ProcessSupervisor, ServerHandle, ServerManager,
};
use crate::transport::{Connector, Operation};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A command that failed but did not stop a non-atomic unit
#[derive(Debug, Clone, PartialEq)]
pub struct CommandFailure {
    /// Zero-based position in the unit
    pub index: usize,
    pub message: String,
}

/// What an execution applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    /// Results of the operations sent, in order. An atomic unit has one
    /// composite result.
    pub results: Vec<Value>,
    /// Failures tolerated because `fail_on_error` was off
    pub failures: Vec<CommandFailure>,
}

/// Everything needed to boot a throwaway admin-only server.
#[derive(Clone)]
pub struct OfflineServer {
    pub spec: LaunchSpec,
    pub connector: Arc<dyn Connector>,
    pub supervisor: ProcessSupervisor,
    pub poll_interval: Duration,
    pub startup_timeout: Duration,
    pub shutdown_timeout: Duration,
}

/// Runs execution units against a server.
///
/// # Examples
///
/// ```no_run
/// use appserver_runner::commands::{Command, CommandExecutor, ExecutionUnit};
/// # async fn example(handle: &appserver_runner::server::ServerHandle) -> appserver_runner::Result<()> {
///
/// let unit = ExecutionUnit::new(vec![Command::from("/system-property=a:add(value=1)")], true);
/// let report = CommandExecutor::new().execute(handle, &unit).await?;
/// assert_eq!(report.results.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    fail_on_error: bool,
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self {
            fail_on_error: true,
        }
    }

    /// When off, a failing command of a non-atomic unit is logged and
    /// execution continues.
    pub fn with_fail_on_error(mut self, fail_on_error: bool) -> Self {
        self.fail_on_error = fail_on_error;
        self
    }

    /// Runs `unit` against a running server, holding its channel for the
    /// whole unit.
    ///
    /// # Errors
    ///
    /// * [`Error::CommandSyntax`] if any command does not parse; nothing is sent
    /// * [`Error::CommandExecution`] if the server rejects a command
    #[tracing::instrument(skip(self, handle, unit), fields(id = %handle.id(), commands = unit.len(), atomic = unit.is_atomic()))]
    pub async fn execute(&self, handle: &ServerHandle, unit: &ExecutionUnit) -> Result<ExecutionReport> {
        let operations = unit.operations()?;
        let guard = handle.lock_channel().await?;
        self.run(guard.client(), operations, unit.is_atomic()).await
    }

    /// Runs `unit` over a client without a handle.
    pub async fn execute_with_client(
        &self,
        client: &ManagementClient,
        unit: &ExecutionUnit,
    ) -> Result<ExecutionReport> {
        let operations = unit.operations()?;
        self.run(client, operations, unit.is_atomic()).await
    }

    async fn run(
        &self,
        client: &ManagementClient,
        operations: Vec<Operation>,
        atomic: bool,
    ) -> Result<ExecutionReport> {
        if operations.is_empty() {
            return Ok(ExecutionReport::default());
        }
        if atomic {
            self.run_atomic(client, operations).await
        } else {
            self.run_sequential(client, operations).await
        }
    }

    async fn run_atomic(
        &self,
        client: &ManagementClient,
        operations: Vec<Operation>,
    ) -> Result<ExecutionReport> {
        let count = operations.len();
        let result = client.execute(Operation::composite(operations)).await?;
        if !result.is_success() {
            let index = result.failed_step();
            let message = result.failure_message();
            tracing::error!(?index, %message, rolled_back = result.rolled_back, "Batch failed");
            return Err(Error::CommandExecution { index, message });
        }
        tracing::info!(count, "Batch applied");
        Ok(ExecutionReport {
            results: vec![result.result],
            failures: Vec::new(),
        })
    }

    async fn run_sequential(
        &self,
        client: &ManagementClient,
        operations: Vec<Operation>,
    ) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::default();
        for (index, operation) in operations.into_iter().enumerate() {
            tracing::debug!(index, %operation, "Executing command");
            let result = client.execute(operation).await?;
            if result.is_success() {
                report.results.push(result.result);
                continue;
            }

            let message = result.failure_message();
            if self.fail_on_error {
                tracing::error!(index, %message, "Command failed");
                return Err(Error::CommandExecution {
                    index: Some(index),
                    message,
                });
            }
            tracing::warn!(index, %message, "Command failed, continuing");
            report.failures.push(CommandFailure { index, message });
        }
        tracing::info!(
            applied = report.results.len(),
            failed = report.failures.len(),
            "Commands executed"
        );
        Ok(report)
    }

    /// Applies `unit` to a throwaway admin-only server.
    ///
    /// The unit is parsed first, then the server is launched with its output
    /// discarded, `unit` runs once it is ready, and the server is shut down
    /// whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] if something already answers on the
    /// endpoint, besides the errors of [`CommandExecutor::execute`] and of
    /// startup.
    #[tracing::instrument(skip(self, offline, unit, cancel), fields(commands = unit.len()))]
    pub async fn execute_offline(
        &self,
        offline: &OfflineServer,
        unit: &ExecutionUnit,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport> {
        unit.operations()?;

        let manager = ServerManager::new(
            ManagementClient::new(Arc::clone(&offline.connector)),
            offline.spec.topology(),
        );
        if manager.is_reachable().await {
            tracing::error!(endpoint = %offline.connector.endpoint(), "A server is already running");
            return Err(Error::AlreadyRunning);
        }

        let command = CommandBuilder::build_admin_only(&offline.spec)?;
        let process = offline.supervisor.launch(&command, &OutputPolicy::Discard)?;
        let handle = ServerHandle::launched(process, manager, offline.supervisor.clone());

        let outcome = match handle
            .wait_for_ready(offline.poll_interval, offline.startup_timeout, cancel)
            .await
        {
            Ok(()) => self.execute(&handle, unit).await,
            Err(e) => Err(e),
        };

        if let Err(e) = handle
            .shutdown_or_cancel(true, offline.shutdown_timeout, None, cancel)
            .await {
            tracing::error!(error = %e, "Failed to stop offline server");
            if outcome.is_ok() {
                return Err(e);
            }
        }
        outcome
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}
