use crate::client::ManagementClient;
use crate::error::{Error, Result};
use crate::server::lifecycle::{ServerEvent, ServerLifecycle, ServerLifecycleEvent, ServerState};
use crate::server::manager::{ServerManager, TopologyDescription};
use crate::server::process::{ProcessSupervisor, ServerProcess};
use crate::server::{ServerId, Topology};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Grace given to a server on cancellation before it is killed
const CANCEL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval used while waiting for a remote server to go away
const UNREACHABLE_POLL: Duration = Duration::from_millis(200);

/// One server under management.
///
/// Owns the launched process, if any, and the management channel. Status
/// queries may run concurrently; command execution holds the channel
/// exclusively through [`ServerHandle::lock_channel`].
pub struct ServerHandle {
    id: ServerId,
    process: Mutex<Option<ServerProcess>>,
    manager: ServerManager,
    supervisor: ProcessSupervisor,
    lifecycle: ServerLifecycle,
    exclusive: Mutex<()>,
}

/// Exclusive access to a running server's channel.
pub struct ChannelGuard<'a> {
    _lock: MutexGuard<'a, ()>,
    client: ManagementClient,
}

impl ChannelGuard<'_> {
    pub fn client(&self) -> &ManagementClient {
        &self.client
    }
}

impl ServerHandle {
    /// Wraps a freshly launched process; the handle starts in Starting.
    pub fn launched(process: ServerProcess, manager: ServerManager, supervisor: ProcessSupervisor) -> Self {
        let id = ServerId::new();
        let details = format!("pid {}", process.pid());
        Self {
            id,
            process: Mutex::new(Some(process)),
            manager,
            supervisor,
            lifecycle: ServerLifecycle::new(id, ServerLifecycleEvent::Launched, Some(details)),
            exclusive: Mutex::new(()),
        }
    }

    /// Builds a handle for a server this runner did not launch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRunning`] unless the endpoint reports running.
    #[tracing::instrument(skip(client, supervisor), fields(endpoint = %client.endpoint()))]
    pub async fn attach(
        client: ManagementClient,
        topology: Topology,
        supervisor: ProcessSupervisor,
    ) -> Result<Self> {
        let manager = ServerManager::new(client, topology);
        match manager.is_running().await {
            Ok(true) => {}
            Ok(false) => return Err(Error::NotRunning),
            Err(e) if e.is_retryable_during_startup() => return Err(Error::NotRunning),
            Err(e) => return Err(e),
        }

        let id = ServerId::new();
        tracing::info!(%id, "Attached to running server");
        Ok(Self {
            id,
            process: Mutex::new(None),
            manager,
            supervisor,
            lifecycle: ServerLifecycle::new(
                id,
                ServerLifecycleEvent::Attached,
                Some(topology.to_string()),
            ),
            exclusive: Mutex::new(()),
        })
    }

    pub fn id(&self) -> ServerId {
        self.id
    }

    pub fn topology(&self) -> Topology {
        self.manager.topology()
    }

    pub fn state(&self) -> Result<ServerState> {
        self.lifecycle.state()
    }

    /// Recent lifecycle events, newest first
    pub fn events(&self, limit: Option<usize>) -> Result<Vec<ServerEvent>> {
        self.lifecycle.events(limit)
    }

    /// Whether the handle launched and still owns a process
    pub async fn owns_process(&self) -> bool {
        self.process.lock().await.is_some()
    }

    /// Pid of the owned process
    pub async fn pid(&self) -> Option<u32> {
        self.process.lock().await.as_ref().map(ServerProcess::pid)
    }

    /// Waits until the server reports running.
    ///
    /// Polls every `poll_interval`, yielding in between. Connection refused
    /// is retried; any other error fails the wait. On failure, timeout or
    /// cancellation the owned process is not left running.
    ///
    /// # Errors
    ///
    /// * [`Error::StartupTimeout`] when `timeout` elapses
    /// * [`Error::Startup`] when the process exits or a check fails
    /// * [`Error::Cancelled`] when `cancel` fires
    #[tracing::instrument(skip(self, cancel), fields(id = %self.id))]
    pub async fn wait_for_ready(
        &self,
        poll_interval: Duration,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match self.state()? {
            ServerState::Running => return Ok(()),
            ServerState::Starting => {}
            other => {
                return Err(Error::InvalidState(format!(
                    "Cannot wait for readiness in state {}",
                    other
                )));
            }
        }

        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;
        loop {
            attempts += 1;

            if let Some(status) = self.exited().await? {
                let message = format!("Server process exited with {} before becoming ready", status);
                tracing::error!(%status, "Server process exited during startup");
                self.manager.client().seal().await.ok();
                self.lifecycle.fail(message.clone())?;
                return Err(Error::Startup(message));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let check = tokio::select! {
                _ = cancel.cancelled() => return self.abort_startup().await,
                check = tokio::time::timeout(remaining, self.manager.is_running()) => check,
            };

            match check {
                Ok(Ok(true)) => {
                    self.lifecycle.record_event(
                        ServerLifecycleEvent::Ready,
                        Some(format!("ready after {} checks", attempts)),
                    )?;
                    tracing::info!(attempts, "Server is running");
                    return Ok(());
                }
                Ok(Ok(false)) => tracing::debug!(attempts, "Server still starting"),
                Ok(Err(e)) if e.is_retryable_during_startup() => {
                    tracing::trace!(attempts, "Management endpoint not bound yet")
                }
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Readiness check failed");
                    self.kill_after_failure(format!("readiness check failed: {}", e))
                        .await;
                    return Err(Error::Startup(e.to_string()));
                }
                // The check itself ran past the deadline.
                Err(_) => {}
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::error!(?timeout, attempts, "Server did not become ready");
                self.kill_after_failure(format!("not ready within {:?}", timeout))
                    .await;
                return Err(Error::StartupTimeout { timeout });
            }

            tokio::select! {
                _ = cancel.cancelled() => return self.abort_startup().await,
                _ = tokio::time::sleep(poll_interval.min(deadline - now)) => {}
            }
        }
    }

    async fn exited(&self) -> Result<Option<async_process::ExitStatus>> {
        match self.process.lock().await.as_mut() {
            Some(process) => process.try_wait(),
            None => Ok(None),
        }
    }

    async fn kill_after_failure(&self, reason: String) {
        if let Some(process) = self.process.lock().await.as_mut() {
            if let Err(e) = self
                .supervisor
                .terminate(process, false, Duration::ZERO)
                .await
            {
                tracing::error!(error = %e, "Failed to kill server process");
            }
        }
        self.manager.client().seal().await.ok();
        if let Err(e) = self.lifecycle.fail(reason) {
            tracing::warn!(error = %e, "Failed to record failure");
        }
    }

    async fn abort_startup(&self) -> Result<()> {
        tracing::warn!("Startup cancelled, stopping server");
        self.lifecycle
            .record_event(ServerLifecycleEvent::ShutdownRequested, Some("cancelled".to_string()))?;

        if let Some(process) = self.process.lock().await.as_mut() {
            process.request_stop()?;
            self.supervisor
                .terminate(process, true, CANCEL_SHUTDOWN_TIMEOUT)
                .await?;
        }
        self.manager.client().seal().await.ok();
        self.lifecycle
            .record_event(ServerLifecycleEvent::Stopped, Some("cancelled".to_string()))?;
        Err(Error::Cancelled("Startup was cancelled".to_string()))
    }

    /// Notices an owned process that exited while Running.
    pub async fn refresh(&self) -> Result<ServerState> {
        let state = self.state()?;
        if state == ServerState::Running {
            if let Some(status) = self.exited().await? {
                tracing::error!(%status, "Server process exited unexpectedly");
                self.manager.client().seal().await.ok();
                self.lifecycle
                    .fail(format!("process exited with {}", status))?;
                return self.state();
            }
        }
        Ok(state)
    }

    /// Client for status queries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the handle is Running.
    pub async fn client(&self) -> Result<ManagementClient> {
        match self.refresh().await? {
            ServerState::Running => Ok(self.manager.client().clone()),
            state => Err(Error::InvalidState(format!(
                "No operations may be issued while the server is {}",
                state
            ))),
        }
    }

    /// Exclusive access to the channel for a whole execution unit
    pub async fn lock_channel(&self) -> Result<ChannelGuard<'_>> {
        let lock = self.exclusive.lock().await;
        let client = self.client().await?;
        Ok(ChannelGuard {
            _lock: lock,
            client,
        })
    }

    /// Whether the server is a domain and which hosts it has. Running only.
    pub async fn topology_description(&self) -> Result<TopologyDescription> {
        self.client().await?;
        self.manager.topology_description().await
    }

    /// Stops the server.
    ///
    /// Graceful shutdown asks the server through the management channel and
    /// waits up to `timeout`; a process still alive after that is killed.
    /// Forced shutdown kills an owned process right away, or sends an
    /// unsuspended shutdown to a remote one. For a domain every host is shut
    /// down. Shutting down a Stopped handle does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownTimeout`] if the process survives the kill.
    pub async fn shutdown(&self, graceful: bool, timeout: Duration) -> Result<()> {
        self.shutdown_host(graceful, timeout, None).await
    }

    /// Like [`ServerHandle::shutdown`], limited to one host of a domain.
    ///
    /// For a server this runner did not launch, the wait ends once that host
    /// is no longer listed. A launched process is still waited for as a
    /// whole.
    pub async fn shutdown_host(
        &self,
        graceful: bool,
        timeout: Duration,
        target_host: Option<&str>,
    ) -> Result<()> {
        self.shutdown_or_cancel(graceful, timeout, target_host, &CancellationToken::new())
            .await
    }

    /// Like [`ServerHandle::shutdown_host`]. When `cancel` fires during a
    /// graceful wait, the shutdown is forced at once: an owned process is
    /// killed, a remote server gets an unsuspended shutdown.
    #[tracing::instrument(skip(self, cancel), fields(id = %self.id))]
    pub async fn shutdown_or_cancel(
        &self,
        graceful: bool,
        timeout: Duration,
        target_host: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let _exclusive = self.exclusive.lock().await;

        match self.state()? {
            ServerState::Stopped => {
                tracing::debug!("Already stopped");
                return Ok(());
            }
            ServerState::Failed => {
                // Only make sure nothing is left behind.
                if let Some(process) = self.process.lock().await.as_mut() {
                    self.supervisor
                        .terminate(process, false, Duration::ZERO)
                        .await?;
                }
                self.manager.client().seal().await.ok();
                return Ok(());
            }
            ServerState::ShuttingDown => {}
            ServerState::Starting | ServerState::Running => {
                self.lifecycle.record_event(
                    ServerLifecycleEvent::ShutdownRequested,
                    Some(if graceful { "graceful" } else { "forced" }.to_string()),
                )?;
            }
        }

        let mut process = self.process.lock().await;
        let result = match process.as_mut() {
            Some(process) => {
                self.stop_process(process, graceful, timeout, target_host, cancel)
                    .await
            }
            None => self.stop_remote(graceful, timeout, target_host, cancel).await,
        };

        self.manager.client().seal().await.ok();
        match result {
            Ok(()) => {
                self.lifecycle
                    .record_event(ServerLifecycleEvent::Stopped, None)?;
                tracing::info!("Server stopped");
                Ok(())
            }
            Err(e) => {
                self.lifecycle.fail(e.to_string())?;
                Err(e)
            }
        }
    }

    async fn stop_process(
        &self,
        process: &mut ServerProcess,
        graceful: bool,
        timeout: Duration,
        target_host: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if graceful {
            if let Err(e) = self.manager.request_shutdown(timeout, target_host).await {
                tracing::warn!(error = %e, "Management shutdown failed, signalling process");
                process.request_stop()?;
            }
        }
        let status = self
            .supervisor
            .terminate_or_cancel(process, graceful, timeout, cancel)
            .await?;
        tracing::info!(%status, "Server process exited");
        Ok(())
    }

    async fn stop_remote(
        &self,
        graceful: bool,
        timeout: Duration,
        target_host: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let suspend = if graceful { timeout } else { Duration::ZERO };
        self.manager.request_shutdown(suspend, target_host).await?;

        let waited = self
            .manager
            .wait_until_stopped(target_host, UNREACHABLE_POLL, timeout, cancel)
            .await;
        match waited {
            Err(Error::Cancelled(_)) if graceful => {
                tracing::warn!("Shutdown interrupted, forcing it");
                self.manager
                    .request_shutdown(Duration::ZERO, target_host)
                    .await?;
                self.manager
                    .wait_until_stopped(
                        target_host,
                        UNREACHABLE_POLL,
                        self.supervisor.kill_grace(),
                        &CancellationToken::new(),
                    )
                    .await
            }
            other => other,
        }
    }
}
