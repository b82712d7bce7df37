mod common;

use appserver_runner::client::{DeploymentDescription, ManagementClient};
use appserver_runner::deployment::{
    DeploymentManager, DeploymentRegistry, ManagementRegistry, MatchPattern, MatchPolicy,
};
use appserver_runner::error::{Error, Result};
use appserver_runner::server::Topology;
use async_trait::async_trait;
use common::FakeServer;
use mockall::mock;
use mockall::predicate::eq;
use std::sync::Arc;

// Define a mock for the DeploymentRegistry trait
mock! {
    pub RegistryMock {}

    #[async_trait]
    impl DeploymentRegistry for RegistryMock {
        async fn list_deployments(&self) -> Result<Vec<DeploymentDescription>>;
        async fn remove_deployment(&self, name: &str) -> Result<()>;
    }
}

fn deployment(name: &str) -> DeploymentDescription {
    DeploymentDescription {
        name: name.to_string(),
        runtime_name: name.to_string(),
        status: Some("OK".to_string()),
        enabled: true,
        server_groups: Vec::new(),
    }
}

// A registry holding `ab.war` and `a.war`, listed out of order
fn registry() -> MockRegistryMock {
    let mut registry = MockRegistryMock::new();
    registry
        .expect_list_deployments()
        .returning(|| Ok(vec![deployment("ab.war"), deployment("a.war")]));
    registry
}

#[tokio::test]
async fn test_fail_policy_refuses_ambiguous_pattern() {
    let mut registry = registry();
    registry.expect_remove_deployment().never();
    let manager = DeploymentManager::new(Arc::new(registry));

    let pattern = MatchPattern::parse("a*").unwrap();
    let result = manager.undeploy_matching(&pattern, MatchPolicy::Fail).await;

    match result {
        Err(Error::AmbiguousMatch { pattern, candidates }) => {
            assert_eq!(pattern, "a*");
            assert_eq!(candidates, vec!["a.war", "ab.war"]);
        }
        other => panic!("Expected AmbiguousMatch, got {:?}", other),
    }
}

#[tokio::test]
async fn test_first_policy_removes_lexicographic_first() -> Result<()> {
    let mut registry = registry();
    registry
        .expect_remove_deployment()
        .with(eq("a.war"))
        .times(1)
        .returning(|_| Ok(()));
    let manager = DeploymentManager::new(Arc::new(registry));

    let pattern = MatchPattern::parse("a*").unwrap();
    let removed = manager.undeploy_matching(&pattern, MatchPolicy::First).await?;

    assert_eq!(removed, vec!["a.war"]);
    Ok(())
}

#[tokio::test]
async fn test_all_policy_removes_every_match() -> Result<()> {
    let mut registry = registry();
    registry
        .expect_remove_deployment()
        .times(2)
        .returning(|_| Ok(()));
    let manager = DeploymentManager::new(Arc::new(registry));

    let pattern = MatchPattern::parse("a*").unwrap();
    let removed = manager.undeploy_matching(&pattern, MatchPolicy::All).await?;

    assert_eq!(removed, vec!["a.war", "ab.war"]);
    Ok(())
}

#[tokio::test]
async fn test_no_match_removes_nothing() -> Result<()> {
    let mut registry = registry();
    registry.expect_remove_deployment().never();
    let manager = DeploymentManager::new(Arc::new(registry));

    let pattern = MatchPattern::parse("regex:b.*\\.ear").unwrap();
    for policy in [MatchPolicy::All, MatchPolicy::First, MatchPolicy::Fail] {
        assert!(manager.undeploy_matching(&pattern, policy).await?.is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn test_undeploy_by_name() -> Result<()> {
    let mut registry = registry();
    registry
        .expect_remove_deployment()
        .with(eq("ab.war"))
        .times(1)
        .returning(|_| Ok(()));
    let manager = DeploymentManager::new(Arc::new(registry));

    assert_eq!(manager.undeploy("ab.war", false).await?, vec!["ab.war"]);

    // Missing deployments
    assert!(manager.undeploy("gone.war", true).await?.is_empty());
    assert!(matches!(
        manager.undeploy("gone.war", false).await,
        Err(Error::DeploymentNotFound(name)) if name == "gone.war"
    ));
    Ok(())
}

#[tokio::test]
async fn test_standalone_removal_over_management() -> Result<()> {
    let server = FakeServer::standalone()
        .with_deployment("a.war", &[])
        .with_deployment("b.war", &[]);
    let client = ManagementClient::new(Arc::new(server.clone()));
    let manager = DeploymentManager::new(Arc::new(ManagementRegistry::new(
        client,
        Topology::Standalone,
    )));

    let removed = manager
        .undeploy_matching(&MatchPattern::parse("a.war")?, MatchPolicy::Fail)
        .await?;

    assert_eq!(removed, vec!["a.war"]);
    assert_eq!(server.deployments(), vec!["b.war"]);

    // Undeploy and remove travel as one composite
    let writes = server.writes();
    assert_eq!(writes.len(), 1);
    let steps = writes[0].steps().unwrap()?;
    let names: Vec<&str> = steps.iter().map(|s| s.name()).collect();
    assert_eq!(names, vec!["undeploy", "remove"]);
    Ok(())
}

#[tokio::test]
async fn test_domain_removal_covers_server_groups() -> Result<()> {
    let server = FakeServer::domain(&["primary"])
        .with_deployment("app.war", &["main-server-group", "other-server-group"])
        .with_deployment("keep.war", &["main-server-group"]);
    let client = ManagementClient::new(Arc::new(server.clone()));
    let manager = DeploymentManager::new(Arc::new(ManagementRegistry::new(
        client,
        Topology::Domain,
    )));

    let removed = manager.undeploy("app.war", false).await?;

    assert_eq!(removed, vec!["app.war"]);
    assert_eq!(server.deployments(), vec!["keep.war"]);

    let writes = server.writes();
    assert_eq!(writes.len(), 1);
    let steps = writes[0].steps().unwrap()?;
    let addresses: Vec<String> = steps
        .iter()
        .map(|s| format!("{}:{}", s.address(), s.name()))
        .collect();
    assert_eq!(
        addresses,
        vec![
            "/server-group=main-server-group/deployment=app.war:undeploy",
            "/server-group=main-server-group/deployment=app.war:remove",
            "/server-group=other-server-group/deployment=app.war:undeploy",
            "/server-group=other-server-group/deployment=app.war:remove",
            "/deployment=app.war:remove",
        ]
    );
    Ok(())
}
