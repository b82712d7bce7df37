use appserver_runner::config::{Config, TimeoutConfig, validate_config, validator};
use appserver_runner::deployment::MatchPolicy;
use appserver_runner::error::{Error, Result};
use appserver_runner::server::{ConfigRole, OutputPolicy, Topology};
use assert_fs::prelude::*;
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn test_parse_config() -> Result<()> {
    let config_str = r#"{
        "server": {
            "jbossHome": "/opt/wildfly",
            "serverConfig": "standalone-full.xml",
            "javaOpts": ["-Xmx1g"],
            "serverArgs": ["-b", "0.0.0.0"],
            "env": {"APP_ENV": "test"},
            "stdout": "none"
        },
        "management": {"hostname": "10.0.0.5", "port": 10090, "username": "admin", "password": "secret"},
        "timeouts": {"startupTimeoutSecs": 5, "pollIntervalMillis": 100},
        "commands": {
            "commands": ["/system-property=a:add(value=1)", "/system-property=b:add(value=2)"],
            "batch": true
        },
        "undeploy": {"matchPattern": "app-*.war", "matchPatternStrategy": "FIRST"},
        "users": ["admin:admin.1234:admin"]
    }"#;

    let config = Config::parse_from_str(config_str)?;

    assert_eq!(config.server.jboss_home, PathBuf::from("/opt/wildfly"));
    assert_eq!(config.server.server_type, Topology::Standalone);
    assert!(matches!(config.server.output_policy(), OutputPolicy::Discard));
    assert_eq!(config.management.address(), "10.0.0.5:10090");
    assert_eq!(config.management.username.as_deref(), Some("admin"));
    assert_eq!(config.timeouts.startup_timeout(), Duration::from_secs(5));
    assert_eq!(config.timeouts.poll_interval(), Duration::from_millis(100));
    // Unset timeouts keep their defaults
    assert_eq!(config.timeouts.shutdown_timeout(), Duration::from_secs(30));

    let commands = config.commands.as_ref().unwrap();
    assert_eq!(commands.commands.len(), 2);
    assert!(commands.batch);
    assert!(!commands.offline);
    assert!(commands.fail_on_error);

    let undeploy = config.undeploy.as_ref().unwrap();
    assert_eq!(undeploy.match_pattern.as_deref(), Some("app-*.war"));
    assert_eq!(undeploy.match_pattern_strategy, MatchPolicy::First);

    let spec = config.server.launch_spec();
    assert_eq!(spec.config_file(ConfigRole::Server), Some("standalone-full.xml"));
    assert_eq!(spec.extra_args(), ["-b", "0.0.0.0"]);
    assert_eq!(spec.env().get("APP_ENV").map(String::as_str), Some("test"));

    validate_config(&config)?;
    Ok(())
}

#[test]
fn test_load_config_from_json_file() -> Result<()> {
    let temp = assert_fs::TempDir::new().unwrap();
    let file = temp.child("runner.json");
    file.write_str(r#"{"server": {"jbossHome": "/opt/wildfly", "serverType": "DOMAIN"}}"#)
        .unwrap();

    let config = Config::from_file(file.path())?;
    assert_eq!(config.server.server_type, Topology::Domain);
    assert!(config.undeploy.is_none());
    Ok(())
}

#[test]
fn test_load_config_from_yaml_file() -> Result<()> {
    let temp = assert_fs::TempDir::new().unwrap();
    let file = temp.child("runner.yml");
    file.write_str(
        r#"
server:
  jbossHome: /opt/wildfly
  serverType: DOMAIN
  domainConfig: domain-ha.xml
  hostConfig: host-primary.xml
  stdout: target/server.log
commands:
  script: setup.cli
  failOnError: false
undeploy:
  name: legacy.war
  ignoreMissing: true
"#,
    )
    .unwrap();

    let config = Config::from_file(file.path())?;

    let spec = config.server.launch_spec();
    assert_eq!(spec.topology(), Topology::Domain);
    assert_eq!(spec.config_file(ConfigRole::Domain), Some("domain-ha.xml"));
    assert_eq!(spec.config_file(ConfigRole::Host), Some("host-primary.xml"));
    assert!(spec.config_file(ConfigRole::Server).is_none());
    assert!(matches!(
        config.server.output_policy(),
        OutputPolicy::RedirectToFile { .. }
    ));

    let commands = config.commands.as_ref().unwrap();
    assert_eq!(commands.script, Some(PathBuf::from("setup.cli")));
    assert!(!commands.fail_on_error);

    let undeploy = config.undeploy.as_ref().unwrap();
    assert_eq!(undeploy.name.as_deref(), Some("legacy.war"));
    assert!(undeploy.ignore_missing);
    assert_eq!(undeploy.match_pattern_strategy, MatchPolicy::Fail);

    validate_config(&config)?;
    Ok(())
}

#[test]
fn test_missing_file() {
    let result = Config::from_file("/nonexistent/runner.json");
    assert!(matches!(result, Err(Error::ConfigParse(_))));
}

#[test]
fn test_invalid_json() {
    let result = Config::parse_from_str(r#"{"server": {"jbossHome": "/opt/wildfly""#);
    assert!(matches!(result, Err(Error::ConfigParse(_))));

    // jbossHome is required
    let result = Config::parse_from_str(r#"{"server": {}}"#);
    assert!(matches!(result, Err(Error::ConfigParse(_))));
}

#[test]
fn test_reject_unknown_match_policy() {
    let result = Config::parse_from_str(
        r#"{"server": {"jbossHome": "/opt/wildfly"}, "undeploy": {"matchPattern": "*", "matchPatternStrategy": "SOME"}}"#,
    );
    assert!(matches!(result, Err(Error::ConfigParse(_))));
}

#[test]
fn test_validate_rejects_topology_mismatch() -> Result<()> {
    let config = Config::parse_from_str(
        r#"{"server": {"jbossHome": "/opt/wildfly", "domainConfig": "domain.xml"}}"#,
    )?;
    assert!(matches!(validate_config(&config), Err(Error::ConfigInvalid(_))));

    let config = Config::parse_from_str(
        r#"{"server": {"jbossHome": "/opt/wildfly", "serverType": "DOMAIN", "serverConfig": "standalone.xml"}}"#,
    )?;
    assert!(matches!(validate_config(&config), Err(Error::ConfigInvalid(_))));
    Ok(())
}

#[test]
fn test_validate_rejects_zero_timeout() -> Result<()> {
    let config = Config::parse_from_str(
        r#"{"server": {"jbossHome": "/opt/wildfly"}, "timeouts": {"startupTimeoutSecs": 0}}"#,
    )?;
    match validate_config(&config) {
        Err(Error::ConfigInvalid(message)) => assert!(message.contains("startupTimeoutSecs")),
        other => panic!("Expected ConfigInvalid, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_validate_command_sources() -> Result<()> {
    let none = Config::parse_from_str(
        r#"{"server": {"jbossHome": "/opt/wildfly"}, "commands": {"batch": true}}"#,
    )?;
    assert!(matches!(validate_config(&none), Err(Error::ConfigInvalid(_))));

    let both = Config::parse_from_str(
        r#"{"server": {"jbossHome": "/opt/wildfly"}, "commands": {"commands": [":read-resource"], "script": "setup.cli"}}"#,
    )?;
    assert!(matches!(validate_config(&both), Err(Error::ConfigInvalid(_))));
    Ok(())
}

#[test]
fn test_validate_undeploy_and_users() -> Result<()> {
    let both = Config::parse_from_str(
        r#"{"server": {"jbossHome": "/opt/wildfly"}, "undeploy": {"name": "a.war", "matchPattern": "a*"}}"#,
    )?;
    assert!(matches!(validate_config(&both), Err(Error::ConfigInvalid(_))));

    let bad_user = Config::parse_from_str(
        r#"{"server": {"jbossHome": "/opt/wildfly"}, "users": ["admin"]}"#,
    )?;
    assert!(validate_config(&bad_user).is_err());
    Ok(())
}

#[test]
fn test_validate_rejects_bad_undeploy_pattern() -> Result<()> {
    let config = Config::parse_from_str(
        r#"{"server": {"jbossHome": "/opt/wildfly"}, "undeploy": {"matchPattern": "regex:app-(\\d+.war"}}"#,
    )?;
    match validate_config(&config) {
        Err(Error::ConfigInvalid(message)) => assert!(message.contains("app-(")),
        other => panic!("Expected ConfigInvalid, got {:?}", other),
    }

    let config = Config::parse_from_str(
        r#"{"server": {"jbossHome": "/opt/wildfly"}, "undeploy": {"matchPattern": "regex:app-\\d+\\.war"}}"#,
    )?;
    validate_config(&config)?;
    Ok(())
}

#[test]
fn test_validate_rejects_zero_connect_timeout() -> Result<()> {
    let config = Config::parse_from_str(
        r#"{"server": {"jbossHome": "/opt/wildfly"}, "timeouts": {"connectTimeoutSecs": 0}}"#,
    )?;
    match validate_config(&config) {
        Err(Error::ConfigInvalid(message)) => assert!(message.contains("connectTimeoutSecs")),
        other => panic!("Expected ConfigInvalid, got {:?}", other),
    }
    assert_eq!(TimeoutConfig::default().connect_timeout(), Duration::from_secs(10));
    Ok(())
}

#[test]
fn test_validate_installation() {
    let temp = assert_fs::TempDir::new().unwrap();
    assert!(matches!(
        validator::validate_installation(temp.path()),
        Err(Error::InvalidInstallation { .. })
    ));

    temp.child("modules").create_dir_all().unwrap();
    temp.child("bin").create_dir_all().unwrap();
    match validator::validate_installation(temp.path()) {
        Err(Error::InvalidInstallation { reason, .. }) => {
            assert!(reason.contains("jboss-modules.jar"))
        }
        other => panic!("Expected InvalidInstallation, got {:?}", other),
    }

    temp.child("jboss-modules.jar").touch().unwrap();
    assert!(validator::validate_installation(temp.path()).is_ok());
}
