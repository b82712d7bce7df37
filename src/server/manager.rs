use crate::client::ManagementClient;
use crate::error::{Error, Result};
use crate::server::Topology;
use crate::transport::{Address, Operation};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Topology as reported by a running server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyDescription {
    pub is_domain: bool,
    /// Host identifiers; empty for a standalone server
    pub hosts: Vec<String>,
}

/// Protocol-level view of one server: status checks, introspection and
/// shutdown requests. Owns no process.
#[derive(Clone)]
pub struct ServerManager {
    client: ManagementClient,
    topology: Topology,
}

impl ServerManager {
    pub fn new(client: ManagementClient, topology: Topology) -> Self {
        Self { client, topology }
    }

    pub fn client(&self) -> &ManagementClient {
        &self.client
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// One readiness check.
    ///
    /// `Ok(false)` while the server reports `starting` or `stopping`. Any
    /// other reported state, including `reload-required`, counts as running.
    pub async fn is_running(&self) -> Result<bool> {
        match self.topology {
            Topology::Standalone => {
                let state = self
                    .client
                    .read_attribute_string(Address::root(), "server-state")
                    .await?;
                tracing::trace!(%state, "Read server-state");
                Ok(counts_as_running(&state))
            }
            Topology::Domain => {
                let hosts = self
                    .client
                    .read_children_names(Address::root(), "host")
                    .await?;
                if hosts.is_empty() {
                    return Ok(false);
                }
                let states = try_join_all(hosts.iter().map(|host| {
                    self.client
                        .read_attribute_string(Address::of("host", host.as_str()), "host-state")
                }))
                .await?;
                tracing::trace!(?hosts, ?states, "Read host-state");
                Ok(states.iter().all(|state| counts_as_running(state)))
            }
        }
    }

    /// Whether anything answers on the management endpoint.
    ///
    /// Only a failed connect or a connection dropped mid-check counts as
    /// unreachable. An endpoint that answers with an error, e.g. asks for
    /// authentication, is reachable.
    pub async fn is_reachable(&self) -> bool {
        // A dropped connection may be a stale channel; retry once on a fresh one.
        for _ in 0..2 {
            if let Err(e) = self.client.connect().await {
                tracing::trace!(error = %e, "Endpoint not reachable");
                return false;
            }
            match self.is_running().await {
                Ok(_) => return true,
                Err(Error::Transport(message)) => {
                    tracing::trace!(%message, "Connection dropped during the check")
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Endpoint answered with an error");
                    return true;
                }
            }
        }
        false
    }

    /// Whether `host` is still listed by a reachable domain controller
    async fn is_host_up(&self, host: &str) -> bool {
        if self.client.connect().await.is_err() {
            return false;
        }
        match self
            .client
            .read_children_names(Address::root(), "host")
            .await
        {
            Ok(hosts) => hosts.iter().any(|h| h == host),
            Err(Error::Transport(_)) => false,
            Err(e) => {
                tracing::debug!(error = %e, "Endpoint answered with an error");
                true
            }
        }
    }

    /// Reads whether the server is a domain and which hosts it has.
    #[tracing::instrument(skip(self))]
    pub async fn topology_description(&self) -> Result<TopologyDescription> {
        let description = self.client.container_description().await?;
        Ok(TopologyDescription {
            is_domain: description.is_domain,
            hosts: description.hosts,
        })
    }

    /// Sends the shutdown operation.
    ///
    /// For a domain every host is shut down unless `target_host` names one.
    /// A `suspend_timeout` of zero skips suspending. The server may drop the
    /// connection before answering; that counts as accepted.
    #[tracing::instrument(skip(self), fields(topology = %self.topology))]
    pub async fn request_shutdown(
        &self,
        suspend_timeout: Duration,
        target_host: Option<&str>,
    ) -> Result<()> {
        let addresses = match self.topology {
            Topology::Standalone => vec![Address::root()],
            Topology::Domain => {
                let hosts = match target_host {
                    Some(host) => vec![host.to_string()],
                    None => {
                        self.client
                            .read_children_names(Address::root(), "host")
                            .await?
                    }
                };
                hosts
                    .into_iter()
                    .map(|host| Address::of("host", host))
                    .collect()
            }
        };

        for address in addresses {
            let operation = Operation::new("shutdown", address.clone())
                .param("suspend-timeout", suspend_timeout.as_secs());
            match self.client.execute_checked(operation).await {
                Ok(_) => tracing::info!(%address, "Shutdown accepted"),
                Err(Error::Transport(message)) => {
                    tracing::debug!(%address, %message, "Connection dropped during shutdown")
                }
                Err(e) => {
                    tracing::error!(%address, error = %e, "Shutdown request failed");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Polls until the server is gone or `timeout` elapses.
    ///
    /// Gone means the endpoint stops answering, or, with `target_host`, that
    /// host is no longer listed.
    ///
    /// # Errors
    ///
    /// * [`Error::ShutdownTimeout`] when `timeout` elapses
    /// * [`Error::Cancelled`] when `cancel` fires
    pub async fn wait_until_stopped(
        &self,
        target_host: Option<&str>,
        poll_interval: Duration,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let up = match target_host {
                Some(host) => self.is_host_up(host).await,
                None => self.is_reachable().await,
            };
            if !up {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::error!(?timeout, "Server still answers after shutdown");
                return Err(Error::ShutdownTimeout { timeout });
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::Cancelled("Waiting for shutdown was cancelled".to_string()));
                }
                _ = tokio::time::sleep(poll_interval.min(deadline - now)) => {}
            }
        }
    }
}

fn counts_as_running(state: &str) -> bool {
    !matches!(state.to_ascii_lowercase().as_str(), "starting" | "stopping")
}
