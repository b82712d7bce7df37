//! Configuration module for appserver-runner.
//!
//! This module handles parsing, validation, and access to the runner's
//! configuration. It supports loading configurations from files or strings in
//! JSON or YAML format.
//!
//! # Examples
//!
//! Loading a configuration from a file:
//!
//! ```no_run
//! use appserver_runner::config::Config;
//!
//! let config = Config::from_file("runner.yaml").unwrap();
//! println!("Installation at {}", config.server.jboss_home.display());
//! ```
//!
//! Creating a configuration programmatically:
//!
//! ```
//! use appserver_runner::config::{Config, ManagementConfig, ServerConfig, TimeoutConfig};
//! use appserver_runner::server::Topology;
//! use std::collections::BTreeMap;
//! use std::path::PathBuf;
//!
//! let config = Config {
//!     server: ServerConfig {
//!         jboss_home: PathBuf::from("/opt/wildfly"),
//!         server_type: Topology::Standalone,
//!         server_config: Some("standalone.xml".to_string()),
//!         domain_config: None,
//!         host_config: None,
//!         java_home: None,
//!         java: None,
//!         java_opts: vec![],
//!         server_args: vec![],
//!         env: BTreeMap::new(),
//!         stdout: None,
//!     },
//!     management: ManagementConfig::default(),
//!     timeouts: TimeoutConfig::default(),
//!     commands: None,
//!     undeploy: None,
//!     users: vec![],
//! };
//! assert!(appserver_runner::config::validate_config(&config).is_ok());
//! ```
mod parser;
pub mod validator;

pub use parser::{
    CommandsConfig, Config, ForkConfig, ManagementConfig, ServerConfig, TimeoutConfig,
    UndeployConfig,
};
pub use validator::validate_config;
