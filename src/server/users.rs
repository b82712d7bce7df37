//! Pre-start user provisioning through the installation's add-user tool.

use crate::error::{Error, Result};
use crate::server::command::CommandBuilder;
use crate::server::process::ProcessSupervisor;
use crate::server::Topology;
use std::fmt;
use std::path::PathBuf;

/// A user to create.
///
/// Written as `username:password[:groups[:realm[:application]]]`, where
/// `groups` is comma separated and `application` is `true` for an
/// application-realm user.
///
/// ```
/// use appserver_runner::server::users::UserSpec;
///
/// let user = UserSpec::parse("user:user.1234:user,mgmt::true").unwrap();
/// assert_eq!(user.groups, vec!["user", "mgmt"]);
/// assert!(user.realm.is_none());
/// assert!(user.application);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct UserSpec {
    pub username: String,
    pub password: String,
    pub groups: Vec<String>,
    pub realm: Option<String>,
    pub application: bool,
}

impl UserSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            Error::ConfigInvalid(format!(
                "Invalid user definition: {} (expected username:password[:groups[:realm[:application]]])",
                reason
            ))
        };

        let mut parts = spec.split(':');
        let username = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("missing username"))?;
        let password = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("missing password"))?;
        let groups = parts
            .next()
            .map(|groups| {
                groups
                    .split(',')
                    .map(str::trim)
                    .filter(|g| !g.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let realm = parts
            .next()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        let application = match parts.next().map(str::trim) {
            None | Some("") => false,
            Some(flag) => flag
                .parse::<bool>()
                .map_err(|_| invalid("application flag must be true or false"))?,
        };
        if parts.next().is_some() {
            return Err(invalid("too many fields"));
        }

        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
            groups,
            realm,
            application,
        })
    }

    /// Arguments for a silent add-user run
    pub fn args(&self, topology: Topology, installation_root: &std::path::Path) -> Vec<String> {
        let mut args = vec![
            "-u".to_string(),
            self.username.clone(),
            "-p".to_string(),
            self.password.clone(),
        ];
        if !self.groups.is_empty() {
            args.push("-g".to_string());
            args.push(self.groups.join(","));
        }
        if let Some(realm) = &self.realm {
            args.push("-r".to_string());
            args.push(realm.clone());
        }
        if self.application {
            args.push("-a".to_string());
        }
        match topology {
            Topology::Standalone => {
                args.push("-sc".to_string());
                args.push(
                    installation_root
                        .join("standalone")
                        .join("configuration")
                        .display()
                        .to_string(),
                );
            }
            Topology::Domain => {
                args.push("-dc".to_string());
                args.push(
                    installation_root
                        .join("domain")
                        .join("configuration")
                        .display()
                        .to_string(),
                );
            }
        }
        args.push("-s".to_string());
        args
    }
}

impl fmt::Debug for UserSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserSpec")
            .field("username", &self.username)
            .field("groups", &self.groups)
            .field("realm", &self.realm)
            .field("application", &self.application)
            .finish_non_exhaustive()
    }
}

/// Creates users before the server starts.
pub struct UserProvisioner {
    installation_root: PathBuf,
    java_home: Option<PathBuf>,
    topology: Topology,
    supervisor: ProcessSupervisor,
}

impl UserProvisioner {
    pub fn new(
        installation_root: impl Into<PathBuf>,
        java_home: Option<PathBuf>,
        topology: Topology,
        supervisor: ProcessSupervisor,
    ) -> Self {
        Self {
            installation_root: installation_root.into(),
            java_home,
            topology,
            supervisor,
        }
    }

    /// Runs add-user once per user, in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Process`] naming the user when the tool fails.
    #[tracing::instrument(skip(self, users), fields(count = users.len()))]
    pub async fn add_users(&self, users: &[UserSpec]) -> Result<()> {
        for user in users {
            let command = CommandBuilder::add_user(&self.installation_root, self.java_home.as_deref())?
                .args(user.args(self.topology, &self.installation_root));
            let completed = self.supervisor.run_to_completion(&command).await?;
            if !completed.success() {
                tracing::error!(user = %user.username, code = ?completed.code, "add-user failed");
                return Err(Error::Process(format!(
                    "Failed to add user '{}': {}",
                    user.username,
                    completed.stderr.trim()
                )));
            }
            tracing::info!(user = %user.username, application = user.application, "Added user");
        }
        Ok(())
    }
}
