use crate::config::{CommandsConfig, Config, ServerConfig, TimeoutConfig, UndeployConfig};
use crate::deployment::MatchPattern;
use crate::error::{Error, Result};
use crate::server::command::{BIN_DIR, MODULES_DIR, MODULES_JAR};
use crate::server::users::UserSpec;
use crate::server::Topology;
use std::path::Path;

/// Checks that `root` looks like a server installation.
///
/// The check is shallow: a `modules` directory, a `bin` directory and the
/// boot jar must exist.
pub fn validate_installation(root: &Path) -> Result<()> {
    let invalid = |reason: String| Error::InvalidInstallation {
        path: root.to_path_buf(),
        reason,
    };

    if !root.is_dir() {
        return Err(invalid("not a directory".to_string()));
    }
    for dir in [MODULES_DIR, BIN_DIR] {
        if !root.join(dir).is_dir() {
            return Err(invalid(format!("missing '{}' directory", dir)));
        }
    }
    if !root.join(MODULES_JAR).is_file() {
        return Err(invalid(format!("missing '{}'", MODULES_JAR)));
    }
    Ok(())
}

/// Validates the server section
pub fn validate_server_config(config: &ServerConfig) -> Result<()> {
    if config.jboss_home.as_os_str().is_empty() {
        return Err(Error::ConfigInvalid("jbossHome is empty".to_string()));
    }

    match config.server_type {
        Topology::Standalone => {
            if config.domain_config.is_some() || config.host_config.is_some() {
                return Err(Error::ConfigInvalid(
                    "domainConfig and hostConfig only apply to a DOMAIN server".to_string(),
                ));
            }
        }
        Topology::Domain => {
            if config.server_config.is_some() {
                return Err(Error::ConfigInvalid(
                    "serverConfig only applies to a STANDALONE server".to_string(),
                ));
            }
        }
    }

    Ok(())
}

/// Validates the timeouts section
pub fn validate_timeouts(timeouts: &TimeoutConfig) -> Result<()> {
    let checks = [
        ("startupTimeoutSecs", timeouts.startup_timeout_secs),
        ("pollIntervalMillis", timeouts.poll_interval_millis),
        ("shutdownTimeoutSecs", timeouts.shutdown_timeout_secs),
        ("killGraceSecs", timeouts.kill_grace_secs),
        ("requestTimeoutSecs", timeouts.request_timeout_secs),
        ("connectTimeoutSecs", timeouts.connect_timeout_secs),
    ];
    for (name, value) in checks {
        if value == 0 {
            return Err(Error::ConfigInvalid(format!("{} must be greater than zero", name)));
        }
    }
    Ok(())
}

/// Validates the commands section
pub fn validate_commands(commands: &CommandsConfig) -> Result<()> {
    let sources = [
        !commands.commands.is_empty(),
        commands.script.is_some(),
        commands.fork.is_some(),
    ]
    .into_iter()
    .filter(|present| *present)
    .count();

    if sources != 1 {
        return Err(Error::ConfigInvalid(
            "Exactly one of commands, script and fork must be given".to_string(),
        ));
    }
    if commands.batch && !commands.fail_on_error {
        tracing::warn!("failOnError has no effect on a batch");
    }
    Ok(())
}

/// Validates the undeploy section; a match pattern must compile.
pub fn validate_undeploy(undeploy: &UndeployConfig) -> Result<()> {
    match (&undeploy.name, &undeploy.match_pattern) {
        (Some(_), Some(_)) => Err(Error::ConfigInvalid(
            "undeploy takes either name or matchPattern, not both".to_string(),
        )),
        (None, None) => Err(Error::ConfigInvalid(
            "undeploy needs a name or a matchPattern".to_string(),
        )),
        (Some(name), None) if name.trim().is_empty() => {
            Err(Error::ConfigInvalid("undeploy name is empty".to_string()))
        }
        (None, Some(pattern)) => MatchPattern::parse(pattern).map(|_| ()),
        (Some(_), None) => Ok(()),
    }
}

/// Full configuration validation
pub fn validate_config(config: &Config) -> Result<()> {
    validate_server_config(&config.server)?;
    validate_timeouts(&config.timeouts)?;

    if let Some(commands) = &config.commands {
        validate_commands(commands)?;
    }
    if let Some(undeploy) = &config.undeploy {
        validate_undeploy(undeploy)?;
    }
    for user in &config.users {
        UserSpec::parse(user)?;
    }

    Ok(())
}
