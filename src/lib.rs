/*!
 # appserver-runner

 A Rust library for driving the lifecycle of a Java application server
 (standalone or managed domain) from a build or deployment pipeline.

 ## Overview

 appserver-runner provides functionality to:
 - Build the server command line from an installation and a topology
 - Launch the server process and route its output
 - Wait for the server to report ready over its management channel
 - Apply configuration commands, one by one or as one atomic batch
 - Undeploy artifacts by name or pattern
 - Shut the server down gracefully, or forcibly when it does not cooperate

 ## Basic Usage

 ```no_run
 use appserver_runner::{Result, ServerRunner};

 #[tokio::main]
 async fn main() -> Result<()> {
     let mut runner = ServerRunner::from_config_file("runner.yaml")?;

     // Launch and wait until the server reports running
     let handle = runner.start_server().await?;
     println!("Server {} is {}", handle.id(), handle.state()?);

     // Apply the configured commands and undeploys
     runner.execute_commands().await?;
     runner.undeploy().await?;

     // Inspect the running server
     let description = runner.client().await?.container_description().await?;
     println!("Running {:?} {:?}", description.product_name, description.product_version);

     runner.shutdown_server(true).await
 }
 ```

 ## Features

 - **Topologies**: standalone servers and managed domains
 - **Readiness**: bounded, cancellable polling of the management channel
 - **Commands**: inline lists, script files, or the output of a helper process
 - **Deployments**: exact, glob or regex matching with ALL/FIRST/FAIL policies
 - **Configuration**: JSON or YAML files
 - **Async Support**: Full async/await support on tokio
*/

pub mod client;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod deployment;
pub mod error;
pub mod server;
pub mod transport;

pub use client::ManagementClient;
pub use config::Config;
pub use error::{Error, Result};
pub use server::{ServerHandle, ServerId, ServerState, Topology};

use commands::{Command, CommandExecutor, CommandSource, ExecutionReport, ExecutionUnit, OfflineServer};
use credentials::{CredentialSource, PromptingCredentials, StaticCredentials};
use deployment::{DeploymentManager, ManagementRegistry, MatchPattern};
use server::{CommandBuilder, CommandLine, ProcessSupervisor, ServerManager, UserProvisioner, UserSpec};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use transport::{Connector, TcpConnector};

/// Drives one server from a [`Config`].
///
/// This struct is the main entry point: it launches the server, applies
/// commands and undeploys, and shuts it down again.
/// All public methods are instrumented with `tracing` spans.
pub struct ServerRunner {
    /// Configuration
    config: Config,
    /// Opens management channels to the configured endpoint
    connector: Arc<dyn Connector>,
    /// Launches and terminates processes
    supervisor: ProcessSupervisor,
    /// The managed server, once started or attached
    handle: Option<ServerHandle>,
    /// Cancels readiness and graceful-shutdown waits
    cancel: CancellationToken,
}

impl ServerRunner {
    /// Create a new runner from a configuration file path
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(path), fields(config_path = ?path.as_ref()))]
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        tracing::info!("Loading configuration from file");
        let config = Config::from_file(path)?;
        Self::new(config)
    }

    /// Create a new runner from a JSON configuration string
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(config))]
    pub fn from_config_str(config: &str) -> Result<Self> {
        tracing::info!("Loading configuration from string");
        let config = Config::parse_from_str(config)?;
        Self::new(config)
    }

    /// Create a new runner from a configuration
    ///
    /// The configuration is validated; the management connector is built
    /// from its `management` section.
    #[tracing::instrument(skip(config), fields(jboss_home = %config.server.jboss_home.display(), topology = %config.server.server_type))]
    pub fn new(config: Config) -> Result<Self> {
        config::validate_config(&config)?;
        tracing::info!("Creating new ServerRunner");

        let mut connector = TcpConnector::new(
            config.management.address(),
            config.timeouts.request_timeout(),
        )
        .with_connect_timeout(config.timeouts.connect_timeout());
        if let Some(credentials) = credential_source(&config) {
            connector = connector.with_credentials(credentials);
        }

        Ok(Self {
            supervisor: ProcessSupervisor::new(config.timeouts.kill_grace()),
            connector: Arc::new(connector),
            config,
            handle: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the management connector
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Token that cancels a readiness wait in progress, and cuts a graceful
    /// shutdown short
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The managed server, if started or attached
    pub fn handle(&self) -> Option<&ServerHandle> {
        self.handle.as_ref()
    }

    fn manager(&self) -> ServerManager {
        ServerManager::new(
            ManagementClient::new(Arc::clone(&self.connector)),
            self.config.server.server_type,
        )
    }

    fn require_handle(&self) -> Result<&ServerHandle> {
        self.handle.as_ref().ok_or(Error::NotRunning)
    }

    /// Client for the managed server
    pub async fn client(&self) -> Result<ManagementClient> {
        self.require_handle()?.client().await
    }

    /// Create the configured users with the installation's add-user tool
    #[tracing::instrument(skip(self), fields(count = self.config.users.len()))]
    pub async fn add_users(&self) -> Result<()> {
        if self.config.users.is_empty() {
            return Ok(());
        }
        let users = self
            .config
            .users
            .iter()
            .map(|user| UserSpec::parse(user))
            .collect::<Result<Vec<_>>>()?;
        UserProvisioner::new(
            &self.config.server.jboss_home,
            self.config.server.java_home.clone(),
            self.config.server.server_type,
            self.supervisor.clone(),
        )
        .add_users(&users)
        .await
    }

    /// Launch the configured server and wait until it is ready
    ///
    /// # Errors
    ///
    /// * [`Error::AlreadyRunning`] if this runner's server is live, or
    ///   anything already answers on the management endpoint
    /// * [`Error::InvalidInstallation`] for a bad installation root
    /// * [`Error::StartupTimeout`] / [`Error::Startup`] when the server
    ///   does not come up; the process has been killed
    #[tracing::instrument(skip(self), fields(topology = %self.config.server.server_type))]
    pub async fn start_server(&mut self) -> Result<&ServerHandle> {
        if let Some(handle) = &self.handle {
            if !handle.refresh().await?.is_terminal() {
                tracing::warn!(id = %handle.id(), "Server already started");
                return Err(Error::AlreadyRunning);
            }
        }

        let manager = self.manager();
        if manager.is_reachable().await {
            tracing::error!(endpoint = %self.connector.endpoint(), "A server is already running");
            return Err(Error::AlreadyRunning);
        }

        tracing::info!("Attempting to start server");
        let spec = self.config.server.launch_spec();
        let command = CommandBuilder::build(&spec)?;
        let process = self
            .supervisor
            .launch(&command, &self.config.server.output_policy())?;

        let handle = ServerHandle::launched(process, manager, self.supervisor.clone());
        let timeouts = &self.config.timeouts;
        let ready = handle
            .wait_for_ready(timeouts.poll_interval(), timeouts.startup_timeout(), &self.cancel)
            .await;
        let handle = self.handle.insert(handle);

        ready.inspect_err(|e| tracing::error!(error = %e, "Server failed to start"))?;
        tracing::info!(id = %handle.id(), "Server started");
        Ok(handle)
    }

    /// Take over a server that is already running at the configured endpoint
    #[tracing::instrument(skip(self))]
    pub async fn attach(&mut self) -> Result<&ServerHandle> {
        if let Some(handle) = &self.handle {
            if !handle.refresh().await?.is_terminal() {
                return Err(Error::AlreadyRunning);
            }
        }
        let handle = ServerHandle::attach(
            ManagementClient::new(Arc::clone(&self.connector)),
            self.config.server.server_type,
            self.supervisor.clone(),
        )
        .await?;
        Ok(self.handle.insert(handle))
    }

    /// The command source described by the `commands` section
    fn command_source(&self) -> Option<CommandSource> {
        let commands = self.config.commands.as_ref()?;
        Some(if let Some(script) = &commands.script {
            CommandSource::Script(script.clone())
        } else if let Some(fork) = &commands.fork {
            let command = fork
                .env
                .iter()
                .fold(CommandLine::new(&fork.program).args(fork.args.iter().cloned()), |command, (k, v)| {
                    command.env(k.clone(), v.clone())
                });
            CommandSource::Forked(command)
        } else {
            CommandSource::Inline(commands.commands.iter().map(|c| Command::from(c.as_str())).collect())
        })
    }

    /// Apply the configured commands, if any
    ///
    /// Offline commands run against a throwaway admin-only instance and need
    /// no started server; online commands need one.
    #[tracing::instrument(skip(self))]
    pub async fn execute_commands(&self) -> Result<Option<ExecutionReport>> {
        let (Some(commands), Some(source)) = (&self.config.commands, self.command_source()) else {
            return Ok(None);
        };

        let unit = source.load(&self.supervisor, commands.batch).await?;
        let executor = CommandExecutor::new().with_fail_on_error(commands.fail_on_error);

        let report = if commands.offline {
            let timeouts = &self.config.timeouts;
            let offline = OfflineServer {
                spec: self.config.server.launch_spec(),
                connector: Arc::clone(&self.connector),
                supervisor: self.supervisor.clone(),
                poll_interval: timeouts.poll_interval(),
                startup_timeout: timeouts.startup_timeout(),
                shutdown_timeout: timeouts.shutdown_timeout(),
            };
            executor.execute_offline(&offline, &unit, &self.cancel).await?
        } else {
            executor.execute(self.require_handle()?, &unit).await?
        };
        Ok(Some(report))
    }

    /// Run `unit` against the managed server
    pub async fn execute(&self, unit: &ExecutionUnit) -> Result<ExecutionReport> {
        CommandExecutor::new()
            .execute(self.require_handle()?, unit)
            .await
    }

    /// Deployment manager for the managed server
    pub async fn deployments(&self) -> Result<DeploymentManager> {
        let client = self.client().await?;
        Ok(DeploymentManager::new(Arc::new(ManagementRegistry::new(
            client,
            self.config.server.server_type,
        ))))
    }

    /// Apply the configured undeploy, if any
    ///
    /// Returns the removed deployment names.
    #[tracing::instrument(skip(self))]
    pub async fn undeploy(&self) -> Result<Vec<String>> {
        let Some(undeploy) = &self.config.undeploy else {
            return Ok(Vec::new());
        };
        let deployments = self.deployments().await?;
        match (&undeploy.name, &undeploy.match_pattern) {
            (_, Some(pattern)) => {
                let pattern = MatchPattern::parse(pattern)?;
                deployments
                    .undeploy_matching(&pattern, undeploy.match_pattern_strategy)
                    .await
            }
            (Some(name), None) => deployments.undeploy(name, undeploy.ignore_missing).await,
            (None, None) => Ok(Vec::new()),
        }
    }

    /// Stop the managed server
    ///
    /// Does nothing when no server was started or it is already stopped.
    /// Once [`ServerRunner::cancellation_token`] fires, a graceful shutdown
    /// stops waiting and is forced.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown_server(&mut self, graceful: bool) -> Result<()> {
        let Some(handle) = &self.handle else {
            tracing::debug!("No server to stop");
            return Ok(());
        };
        handle
            .shutdown_or_cancel(
                graceful,
                self.config.timeouts.shutdown_timeout(),
                None,
                &self.cancel,
            )
            .await
    }

    /// The whole sequence: users, offline commands, start, online commands,
    /// undeploy, shutdown
    ///
    /// The server is shut down even when a step in between fails.
    #[tracing::instrument(skip(self))]
    pub async fn run(&mut self) -> Result<()> {
        self.add_users().await?;

        let offline = self.config.commands.as_ref().is_some_and(|c| c.offline);
        if offline {
            self.execute_commands().await?;
        }

        self.start_server().await?;

        let steps = async {
            if !offline {
                self.execute_commands().await?;
            }
            self.undeploy().await.map(|_| ())
        }
        .await;

        let shutdown = self.shutdown_server(true).await;
        steps.and(shutdown)
    }
}

fn credential_source(config: &Config) -> Option<Arc<dyn CredentialSource>> {
    let management = &config.management;
    let source: Arc<dyn CredentialSource> = match (&management.username, &management.password) {
        (Some(username), Some(password)) => {
            Arc::new(StaticCredentials::new(username.clone(), password.clone()))
        }
        _ if management.prompt => Arc::new(PromptingCredentials::new(
            management.username.clone(),
            management.password.clone(),
        )),
        _ => return None,
    };
    Some(source)
}
