/// Client module for administering a server over its management channel.
///
/// This module provides [`ManagementClient`], the typed interface the rest of
/// the crate uses instead of building raw operations. It allows callers to:
/// - Execute arbitrary operations
/// - Read attributes and child names
/// - Describe the running container (product, launch type, hosts)
/// - List and remove deployments
///
/// The client is transport-agnostic: it opens its channel lazily through any
/// [`Connector`], which is what lets readiness polling start before the
/// server has bound its management port.
use crate::error::{Error, Result};
use crate::transport::{Address, Connector, ManagementChannel, Operation, OperationResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Description of the server a client is connected to.
///
/// # Examples
///
/// ```
/// use appserver_runner::client::ContainerDescription;
///
/// let description = ContainerDescription {
///     product_name: Some("WildFly".to_string()),
///     product_version: Some("31.0.0.Final".to_string()),
///     release_version: Some("23.0.1.Final".to_string()),
///     launch_type: "STANDALONE".to_string(),
///     is_domain: false,
///     hosts: vec![],
/// };
/// assert!(!description.is_domain);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDescription {
    /// Product name, when the server reports one
    pub product_name: Option<String>,
    /// Product version, when the server reports one
    pub product_version: Option<String>,
    /// Version of the management core
    pub release_version: Option<String>,
    /// `STANDALONE`, `DOMAIN`, ...
    pub launch_type: String,
    /// Whether the server is a domain controller
    pub is_domain: bool,
    /// Host identifiers; empty for a standalone server
    pub hosts: Vec<String>,
}

/// A deployment known to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentDescription {
    /// Unique deployment name
    pub name: String,
    /// Name the deployment is known by at runtime
    pub runtime_name: String,
    /// Deployment status, e.g. `OK`, `FAILED`, `STOPPED`
    pub status: Option<String>,
    /// Whether the content is enabled
    pub enabled: bool,
    /// Server groups the deployment is assigned to (domain only)
    pub server_groups: Vec<String>,
}

/// A client for one management endpoint.
///
/// Cloning is cheap; clones share the same underlying channel.
///
/// # Examples
///
/// ```no_run
/// use appserver_runner::client::ManagementClient;
/// use appserver_runner::transport::{Address, TcpConnector};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> appserver_runner::Result<()> {
/// let connector = TcpConnector::new("127.0.0.1:9990", Duration::from_secs(30));
/// let client = ManagementClient::new(Arc::new(connector));
///
/// let state = client.read_attribute(Address::root(), "server-state").await?;
/// println!("server-state = {}", state);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ManagementClient {
    /// Opens the channel on first use
    connector: Arc<dyn Connector>,
    /// Channel, once connected
    channel: Arc<Mutex<Option<Arc<dyn ManagementChannel>>>>,
    /// Set once the server behind this client is gone; shared by all clones
    sealed: Arc<AtomicBool>,
}

impl ManagementClient {
    /// Creates a client that connects through `connector` on first use.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            channel: Arc::new(Mutex::new(None)),
            sealed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates a client over an already open channel.
    pub fn with_channel(connector: Arc<dyn Connector>, channel: Arc<dyn ManagementChannel>) -> Self {
        Self {
            connector,
            channel: Arc::new(Mutex::new(Some(channel))),
            sealed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Printable endpoint of the underlying connector
    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    /// Whether [`ManagementClient::seal`] was called on this client or a clone
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    async fn channel(&self) -> Result<Arc<dyn ManagementChannel>> {
        if self.is_sealed() {
            return Err(Error::InvalidState(format!(
                "The server at {} has been stopped; no further operations are allowed",
                self.connector.endpoint()
            )));
        }
        let mut slot = self.channel.lock().await;
        if let Some(channel) = slot.as_ref() {
            return Ok(Arc::clone(channel));
        }
        let channel = self.connector.connect().await?;
        tracing::debug!(endpoint = %self.connector.endpoint(), "Opened management channel");
        *slot = Some(Arc::clone(&channel));
        Ok(channel)
    }

    /// Opens the channel unless it is already open.
    ///
    /// Fails the way the connector fails, e.g. [`Error::ConnectionRefused`]
    /// while nothing listens on the endpoint.
    pub async fn connect(&self) -> Result<()> {
        self.channel().await.map(|_| ())
    }

    /// Executes an operation, returning the raw result including failed outcomes.
    ///
    /// A transport failure drops the cached channel so the next call reconnects.
    pub async fn execute(&self, operation: Operation) -> Result<OperationResult> {
        let channel = self.channel().await?;
        tracing::trace!(operation = %operation, "Executing operation");
        match channel.execute(operation).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if matches!(e, Error::Transport(_) | Error::Timeout(_)) {
                    self.channel.lock().await.take();
                }
                Err(e)
            }
        }
    }

    /// Executes an operation and fails on a failed outcome.
    pub async fn execute_checked(&self, operation: Operation) -> Result<Value> {
        let name = operation.name().to_string();
        self.execute(operation).await?.into_result(&name)
    }

    pub async fn read_attribute(&self, address: Address, attribute: &str) -> Result<Value> {
        self.execute_checked(Operation::read_attribute(address, attribute))
            .await
    }

    /// Reads an attribute expected to be a string
    pub async fn read_attribute_string(&self, address: Address, attribute: &str) -> Result<String> {
        match self.read_attribute(address, attribute).await? {
            Value::String(s) => Ok(s),
            Value::Null => Err(Error::Serialization(format!(
                "Attribute '{}' is undefined",
                attribute
            ))),
            other => Ok(other.to_string()),
        }
    }

    pub async fn read_children_names(&self, address: Address, child_type: &str) -> Result<Vec<String>> {
        let value = self
            .execute_checked(Operation::read_children_names(address, child_type))
            .await?;
        Ok(string_list(&value))
    }

    /// Describes the server: product, launch type and hosts.
    #[tracing::instrument(skip(self), fields(endpoint = %self.connector.endpoint()))]
    pub async fn container_description(&self) -> Result<ContainerDescription> {
        let launch_type = self
            .read_attribute_string(Address::root(), "launch-type")
            .await?;
        let is_domain = launch_type.eq_ignore_ascii_case("DOMAIN");
        let hosts = if is_domain {
            self.read_children_names(Address::root(), "host").await?
        } else {
            Vec::new()
        };

        let optional = |value: Result<String>| value.ok().filter(|s| !s.is_empty());
        Ok(ContainerDescription {
            product_name: optional(
                self.read_attribute_string(Address::root(), "product-name")
                    .await,
            ),
            product_version: optional(
                self.read_attribute_string(Address::root(), "product-version")
                    .await,
            ),
            release_version: optional(
                self.read_attribute_string(Address::root(), "release-version")
                    .await,
            ),
            launch_type,
            is_domain,
            hosts,
        })
    }

    /// Lists the live deployment registry.
    #[tracing::instrument(skip(self))]
    pub async fn list_deployments(&self) -> Result<Vec<DeploymentDescription>> {
        let value = self
            .execute_checked(Operation::read_children_resources(
                Address::root(),
                "deployment",
            ))
            .await?;

        let mut deployments = Vec::new();
        if let Value::Object(entries) = value {
            for (name, resource) in entries {
                let runtime_name = resource
                    .get("runtime-name")
                    .and_then(Value::as_str)
                    .unwrap_or(&name)
                    .to_string();
                deployments.push(DeploymentDescription {
                    runtime_name,
                    status: resource
                        .get("status")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    enabled: resource
                        .get("enabled")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    server_groups: Vec::new(),
                    name,
                });
            }
        }
        deployments.sort_by(|a, b| a.name.cmp(&b.name));
        tracing::debug!(count = deployments.len(), "Read deployment registry");
        Ok(deployments)
    }

    /// Server groups with the deployment assigned (domain only)
    pub async fn deployment_server_groups(&self, name: &str) -> Result<Vec<String>> {
        let mut groups = Vec::new();
        for group in self
            .read_children_names(Address::root(), "server-group")
            .await?
        {
            let assigned = self
                .read_children_names(Address::of("server-group", group.as_str()), "deployment")
                .await?;
            if assigned.iter().any(|d| d == name) {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    /// Closes the channel and refuses every later operation, on this client
    /// and all its clones, with [`Error::InvalidState`].
    pub async fn seal(&self) -> Result<()> {
        self.sealed.store(true, Ordering::SeqCst);
        self.close().await
    }

    /// Closes the channel if one is open. The next operation reconnects.
    pub async fn close(&self) -> Result<()> {
        let channel = self.channel.lock().await.take();
        if let Some(channel) = channel {
            channel.close().await?;
            tracing::debug!(endpoint = %self.connector.endpoint(), "Closed management channel");
        }
        Ok(())
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        _ => Vec::new(),
    }
}
