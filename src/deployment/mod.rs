//! Deployment removal by name or pattern.
//!
//! [`DeploymentMatcher`] is pure: it turns a [`MatchPattern`], a
//! [`MatchPolicy`] and the current deployment names into the set to remove.
//! [`DeploymentManager`] reads the live registry, resolves, and removes.
mod manager;
mod matcher;

pub use manager::{DeploymentManager, DeploymentRegistry, ManagementRegistry};
pub use matcher::{DeploymentMatcher, MatchPattern, MatchPolicy, PatternSyntax, REGEX_PREFIX};
