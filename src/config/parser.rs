use crate::deployment::MatchPolicy;
use crate::error::{Error, Result};
use crate::server::{ConfigRole, LaunchSpec, OutputPolicy, Topology};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How to launch the server.
///
/// # Examples
///
/// ```
/// use appserver_runner::config::ServerConfig;
/// use appserver_runner::server::{ConfigRole, Topology};
///
/// let server: ServerConfig = serde_json::from_str(r#"{
///     "jbossHome": "/opt/wildfly",
///     "serverConfig": "standalone-full.xml",
///     "javaOpts": ["-Xmx1g"]
/// }"#).unwrap();
///
/// let spec = server.launch_spec();
/// assert_eq!(spec.topology(), Topology::Standalone);
/// assert_eq!(spec.config_file(ConfigRole::Server), Some("standalone-full.xml"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Installation root
    pub jboss_home: PathBuf,

    /// `STANDALONE` (default) or `DOMAIN`
    #[serde(default)]
    pub server_type: Topology,

    /// Server configuration file name; standalone only
    #[serde(default)]
    pub server_config: Option<String>,

    /// Domain configuration file name; domain only
    #[serde(default)]
    pub domain_config: Option<String>,

    /// Host configuration file name; domain only
    #[serde(default)]
    pub host_config: Option<String>,

    /// Java installation; `java` on the PATH when unset
    #[serde(default)]
    pub java_home: Option<PathBuf>,

    /// Explicit java binary, overrides `javaHome`
    #[serde(default)]
    pub java: Option<PathBuf>,

    /// JVM options
    #[serde(default)]
    pub java_opts: Vec<String>,

    /// Arguments appended to the server command line
    #[serde(default)]
    pub server_args: Vec<String>,

    /// Environment variables added to the server process
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Where server output goes: `none`, `System.out`, `System.err` or a file path.
    /// Inherited when unset.
    #[serde(default)]
    pub stdout: Option<String>,
}

impl ServerConfig {
    /// The immutable launch description for this server
    pub fn launch_spec(&self) -> LaunchSpec {
        let builder = LaunchSpec::builder(&self.jboss_home, self.server_type)
            .java_home(self.java_home.clone())
            .java_executable(self.java.clone())
            .java_opts(self.java_opts.iter().cloned())
            .args(self.server_args.iter().cloned());

        let builder = match self.server_type {
            Topology::Standalone => {
                builder.config_file(ConfigRole::Server, self.server_config.clone())
            }
            Topology::Domain => builder
                .config_file(ConfigRole::Domain, self.domain_config.clone())
                .config_file(ConfigRole::Host, self.host_config.clone()),
        };

        self.env
            .iter()
            .fold(builder, |builder, (key, value)| {
                builder.env(key.clone(), value.clone())
            })
            .build()
    }

    /// Output handling for the server process
    pub fn output_policy(&self) -> OutputPolicy {
        OutputPolicy::parse(self.stdout.as_deref())
    }
}

/// Where and how to reach the management endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Prompt on the console for credentials that are not configured
    #[serde(default)]
    pub prompt: bool,
}

impl ManagementConfig {
    /// `host:port` of the management endpoint
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            port: default_port(),
            username: None,
            password: None,
            prompt: false,
        }
    }
}

fn default_hostname() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9990
}

/// Every wait the runner performs is bounded by one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    /// Upper bound on waiting for the server to report ready
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Delay between readiness checks
    #[serde(default = "default_poll_interval_millis")]
    pub poll_interval_millis: u64,

    /// Upper bound on a graceful shutdown before the process is killed
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// How long a killed process may take to exit
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,

    /// Upper bound on a single management request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Upper bound on opening a management connection
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl TimeoutConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            startup_timeout_secs: default_startup_timeout_secs(),
            poll_interval_millis: default_poll_interval_millis(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            kill_grace_secs: default_kill_grace_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_startup_timeout_secs() -> u64 {
    60
}

fn default_poll_interval_millis() -> u64 {
    500
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_kill_grace_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

/// A helper process whose standard output is a command stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkConfig {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Configuration changes to apply once the server is ready.
///
/// Exactly one of `commands`, `script` and `fork` supplies the commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandsConfig {
    #[serde(default)]
    pub commands: Vec<String>,

    #[serde(default)]
    pub script: Option<PathBuf>,

    #[serde(default)]
    pub fork: Option<ForkConfig>,

    /// Submit all commands as one composite operation
    #[serde(default)]
    pub batch: bool,

    /// Apply against a throwaway admin-only instance instead of the running server
    #[serde(default)]
    pub offline: bool,

    /// Stop at the first failing command (non-batch only)
    #[serde(default = "default_fail_on_error")]
    pub fail_on_error: bool,
}

fn default_fail_on_error() -> bool {
    true
}

/// Deployments to remove once the server is ready.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndeployConfig {
    /// Exact deployment name
    #[serde(default)]
    pub name: Option<String>,

    /// Glob (`*`, `?`) or `regex:` pattern
    #[serde(default)]
    pub match_pattern: Option<String>,

    #[serde(default)]
    pub match_pattern_strategy: MatchPolicy,

    /// A missing named deployment is not an error
    #[serde(default)]
    pub ignore_missing: bool,
}

/// Main configuration for the runner.
///
/// # JSON Schema
///
/// ```json
/// {
///   "server": {
///     "jbossHome": "/opt/wildfly",
///     "serverType": "STANDALONE",
///     "serverConfig": "standalone.xml",
///     "stdout": "none"
///   },
///   "management": { "hostname": "127.0.0.1", "port": 9990 },
///   "timeouts": { "startupTimeoutSecs": 120 },
///   "commands": {
///     "commands": ["/system-property=foo:add(value=bar)"],
///     "batch": true
///   },
///   "undeploy": { "matchPattern": "app-*.war", "matchPatternStrategy": "FIRST" },
///   "users": ["admin:admin.1234:admin"]
/// }
/// ```
///
/// YAML files (`.yaml`/`.yml`) use the same keys.
///
/// # Examples
///
/// ```
/// use appserver_runner::config::Config;
///
/// let config = Config::parse_from_str(r#"{"server": {"jbossHome": "/opt/wildfly"}}"#).unwrap();
/// assert_eq!(config.management.port, 9990);
/// assert!(config.commands.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub server: ServerConfig,

    #[serde(default)]
    pub management: ManagementConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub commands: Option<CommandsConfig>,

    #[serde(default)]
    pub undeploy: Option<UndeployConfig>,

    /// Users to create before starting, as `user:password[:groups[:application]]`
    #[serde(default)]
    pub users: Vec<String>,
}

impl Config {
    /// Loads a configuration from a file path.
    ///
    /// Files ending in `.yaml` or `.yml` are read as YAML, anything else as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be read
    /// * The contents do not parse
    /// * The document does not conform to the expected schema
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

        if is_yaml {
            Self::parse_from_yaml_str(&content)
        } else {
            Self::parse_from_str(&content)
        }
    }

    /// Parses a configuration from a JSON string.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
    }

    /// Parses a configuration from a YAML string.
    pub fn parse_from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse YAML config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config = Config::parse_from_str(r#"{"server": {"jbossHome": "/opt/wildfly"}}"#).unwrap();

        assert_eq!(config.server.jboss_home, PathBuf::from("/opt/wildfly"));
        assert_eq!(config.server.server_type, Topology::Standalone);
        assert_eq!(config.management.address(), "127.0.0.1:9990");
        assert_eq!(config.timeouts.startup_timeout(), Duration::from_secs(60));
        assert_eq!(config.timeouts.poll_interval(), Duration::from_millis(500));
        assert!(config.users.is_empty());
        assert!(matches!(config.server.output_policy(), OutputPolicy::Inherit));
    }

    #[test]
    fn test_parse_domain_yaml() {
        let yaml = r#"
server:
  jbossHome: /opt/wildfly
  serverType: DOMAIN
  domainConfig: domain-ha.xml
  serverConfig: ignored.xml
  stdout: none
undeploy:
  matchPattern: "app-*.war"
  matchPatternStrategy: FIRST
"#;
        let config = Config::parse_from_yaml_str(yaml).unwrap();
        let spec = config.server.launch_spec();

        assert_eq!(spec.topology(), Topology::Domain);
        assert_eq!(spec.config_file(ConfigRole::Domain), Some("domain-ha.xml"));
        assert_eq!(spec.config_file(ConfigRole::Host), None);
        assert_eq!(spec.config_file(ConfigRole::Server), None);
        assert!(matches!(config.server.output_policy(), OutputPolicy::Discard));

        let undeploy = config.undeploy.unwrap();
        assert_eq!(undeploy.match_pattern_strategy, MatchPolicy::First);
        assert!(!undeploy.ignore_missing);
    }

    #[test]
    fn test_commands_defaults() {
        let config = Config::parse_from_str(
            r#"{
                "server": {"jbossHome": "/opt/wildfly"},
                "commands": {"commands": [":read-resource"]}
            }"#,
        )
        .unwrap();

        let commands = config.commands.unwrap();
        assert!(commands.fail_on_error);
        assert!(!commands.batch);
        assert!(!commands.offline);
    }

    #[test]
    fn test_unknown_match_policy_is_rejected() {
        let result = Config::parse_from_str(
            r#"{
                "server": {"jbossHome": "/opt/wildfly"},
                "undeploy": {"matchPattern": "*", "matchPatternStrategy": "SOME"}
            }"#,
        );
        assert!(matches!(result, Err(Error::ConfigParse(_))));
    }
}
