use crate::client::{DeploymentDescription, ManagementClient};
use crate::deployment::matcher::{DeploymentMatcher, MatchPattern, MatchPolicy};
use crate::error::{Error, Result};
use crate::server::Topology;
use crate::transport::{Address, Operation};
use async_trait::async_trait;
use std::sync::Arc;

/// A server's live deployment registry.
#[async_trait]
pub trait DeploymentRegistry: Send + Sync {
    /// Current deployments
    async fn list_deployments(&self) -> Result<Vec<DeploymentDescription>>;

    /// Undeploys and removes one deployment
    async fn remove_deployment(&self, name: &str) -> Result<()>;
}

/// [`DeploymentRegistry`] backed by the management channel.
#[derive(Clone)]
pub struct ManagementRegistry {
    client: ManagementClient,
    topology: Topology,
}

impl ManagementRegistry {
    pub fn new(client: ManagementClient, topology: Topology) -> Self {
        Self { client, topology }
    }

    /// The composite operation removing `name`.
    ///
    /// A domain deployment is first undeployed from and removed in every
    /// server group it is assigned to.
    async fn removal(&self, name: &str) -> Result<Operation> {
        let deployment = Address::of("deployment", name);
        let steps = match self.topology {
            Topology::Standalone => vec![
                Operation::new("undeploy", deployment.clone()),
                Operation::remove(deployment),
            ],
            Topology::Domain => {
                let mut steps = Vec::new();
                for group in self.client.deployment_server_groups(name).await? {
                    let assigned = Address::of("server-group", group).append("deployment", name);
                    steps.push(Operation::new("undeploy", assigned.clone()));
                    steps.push(Operation::remove(assigned));
                }
                steps.push(Operation::remove(deployment));
                steps
            }
        };
        Ok(Operation::composite(steps))
    }
}

#[async_trait]
impl DeploymentRegistry for ManagementRegistry {
    async fn list_deployments(&self) -> Result<Vec<DeploymentDescription>> {
        self.client.list_deployments().await
    }

    async fn remove_deployment(&self, name: &str) -> Result<()> {
        let operation = self.removal(name).await?;
        self.client.execute_checked(operation).await.map(|_| ())
    }
}

/// Undeploys by name or by pattern.
///
/// The registry is read fresh for every call and never cached.
pub struct DeploymentManager {
    registry: Arc<dyn DeploymentRegistry>,
}

impl DeploymentManager {
    pub fn new(registry: Arc<dyn DeploymentRegistry>) -> Self {
        Self { registry }
    }

    /// Undeploys what `pattern` resolves to under `policy`.
    ///
    /// The policy is applied to the full candidate set before anything is
    /// removed, so a FAIL policy never leaves a partial undeploy behind.
    ///
    /// Returns the removed names in removal order.
    #[tracing::instrument(skip(self, pattern), fields(pattern = %pattern))]
    pub async fn undeploy_matching(&self, pattern: &MatchPattern, policy: MatchPolicy) -> Result<Vec<String>> {
        let deployments = self.registry.list_deployments().await?;
        let targets = DeploymentMatcher::resolve(
            pattern,
            policy,
            deployments.iter().map(|d| d.name.as_str()),
        )
        .inspect_err(|e| tracing::error!(error = %e, "Refusing to undeploy"))?;

        if targets.is_empty() {
            tracing::info!("No deployment matched");
            return Ok(targets);
        }
        for name in &targets {
            self.registry.remove_deployment(name).await?;
            tracing::info!(deployment = %name, "Undeployed");
        }
        Ok(targets)
    }

    /// Undeploys the deployment called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeploymentNotFound`] if there is no such deployment,
    /// unless `ignore_missing` is set, in which case nothing is removed.
    #[tracing::instrument(skip(self))]
    pub async fn undeploy(&self, name: &str, ignore_missing: bool) -> Result<Vec<String>> {
        let deployments = self.registry.list_deployments().await?;
        if !deployments.iter().any(|d| d.name == name) {
            if ignore_missing {
                tracing::info!("Deployment not present, nothing to undeploy");
                return Ok(Vec::new());
            }
            return Err(Error::DeploymentNotFound(name.to_string()));
        }
        self.registry.remove_deployment(name).await?;
        tracing::info!("Undeployed");
        Ok(vec![name.to_string()])
    }
}
