/// Server management module for appserver-runner.
///
/// This module launches server processes and drives their lifecycle from
/// launch to shutdown. All public components are instrumented with `tracing`
/// spans.
///
/// # Components
///
/// * `command` - Builds the server command line from a [`LaunchSpec`]
/// * `output` - Where a launched process's output goes
/// * `process` - Launching, terminating and running helper processes
/// * `lifecycle` - The handle state machine and its event history
/// * `manager` - Readiness checks, introspection and shutdown requests
/// * `handle` - One server under management
/// * `users` - Pre-start user provisioning
///
/// # Examples
///
/// Launching a server and waiting for it:
///
/// ```no_run
/// use appserver_runner::client::ManagementClient;
/// use appserver_runner::server::{
///     CommandBuilder, LaunchSpec, OutputPolicy, ProcessSupervisor, ServerHandle, ServerManager,
///     Topology,
/// };
/// use appserver_runner::transport::TcpConnector;
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> appserver_runner::Result<()> {
/// let spec = LaunchSpec::builder("/opt/wildfly", Topology::Standalone).build();
/// let command = CommandBuilder::build(&spec)?;
///
/// let supervisor = ProcessSupervisor::new(Duration::from_secs(10));
/// let process = supervisor.launch(&command, &OutputPolicy::Discard)?;
///
/// let connector = TcpConnector::new("127.0.0.1:9990", Duration::from_secs(30));
/// let manager = ServerManager::new(ManagementClient::new(Arc::new(connector)), Topology::Standalone);
/// let handle = ServerHandle::launched(process, manager, supervisor);
///
/// handle
///     .wait_for_ready(Duration::from_millis(500), Duration::from_secs(60), &CancellationToken::new())
///     .await?;
/// handle.shutdown(true, Duration::from_secs(30)).await?;
/// # Ok(())
/// # }
/// ```
pub mod command;
pub mod handle;
pub mod lifecycle;
pub mod manager;
pub mod output;
mod process;
pub mod users;

pub use command::{CommandBuilder, CommandLine, ConfigRole, LaunchSpec, LaunchSpecBuilder, Topology};
pub use handle::{ChannelGuard, ServerHandle};
pub use lifecycle::{ServerEvent, ServerLifecycle, ServerLifecycleEvent, ServerState};
pub use manager::{ServerManager, TopologyDescription};
pub use output::OutputPolicy;
pub use process::{CompletedProcess, ProcessSupervisor, ServerId, ServerProcess};
pub use users::{UserProvisioner, UserSpec};
