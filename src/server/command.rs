//! Server command-line construction.
//!
//! [`CommandBuilder`] turns an immutable [`LaunchSpec`] into the exact
//! [`CommandLine`] that boots the server. It performs no I/O beyond
//! validating the installation layout, so two calls with the same spec
//! always produce the same argument vector.

use crate::config::validator::validate_installation;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Name of the boot jar at the installation root
pub const MODULES_JAR: &str = "jboss-modules.jar";
/// Module repository directory at the installation root
pub const MODULES_DIR: &str = "modules";
/// Scripts directory at the installation root
pub const BIN_DIR: &str = "bin";

/// Server topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Topology {
    /// Single process with one configuration file
    #[default]
    Standalone,
    /// Process controller, host controller and managed servers
    Domain,
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topology::Standalone => write!(f, "STANDALONE"),
            Topology::Domain => write!(f, "DOMAIN"),
        }
    }
}

/// Which configuration file an override names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigRole {
    /// `standalone.xml` and friends; standalone only
    Server,
    /// `domain.xml`; domain only
    Domain,
    /// `host.xml`; domain only
    Host,
}

/// Everything needed to launch one server. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    installation_root: PathBuf,
    topology: Topology,
    config_files: BTreeMap<ConfigRole, String>,
    extra_args: Vec<String>,
    java_opts: Vec<String>,
    env: BTreeMap<String, String>,
    java_home: Option<PathBuf>,
    java_executable: Option<PathBuf>,
}

impl LaunchSpec {
    /// Start building a spec for the installation at `installation_root`
    pub fn builder(installation_root: impl Into<PathBuf>, topology: Topology) -> LaunchSpecBuilder {
        LaunchSpecBuilder {
            spec: LaunchSpec {
                installation_root: installation_root.into(),
                topology,
                config_files: BTreeMap::new(),
                extra_args: Vec::new(),
                java_opts: Vec::new(),
                env: BTreeMap::new(),
                java_home: None,
                java_executable: None,
            },
        }
    }

    pub fn installation_root(&self) -> &Path {
        &self.installation_root
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Configuration file override for `role`; `None` means the server default
    pub fn config_file(&self, role: ConfigRole) -> Option<&str> {
        self.config_files.get(&role).map(String::as_str)
    }

    pub fn extra_args(&self) -> &[String] {
        &self.extra_args
    }

    pub fn java_opts(&self) -> &[String] {
        &self.java_opts
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// The java binary used to boot the server
    pub fn java_executable(&self) -> PathBuf {
        if let Some(java) = &self.java_executable {
            return java.clone();
        }
        match &self.java_home {
            Some(home) => home.join("bin").join(if cfg!(windows) { "java.exe" } else { "java" }),
            None => PathBuf::from("java"),
        }
    }

    /// A copy of this spec with `args` appended to the server arguments
    pub fn with_extra_args<I, S>(&self, args: I) -> LaunchSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = self.clone();
        spec.extra_args.extend(args.into_iter().map(Into::into));
        spec
    }
}

/// Builder for [`LaunchSpec`]
#[derive(Debug, Clone)]
pub struct LaunchSpecBuilder {
    spec: LaunchSpec,
}

impl LaunchSpecBuilder {
    /// Override a configuration file; `None` keeps the default
    pub fn config_file(mut self, role: ConfigRole, name: Option<impl Into<String>>) -> Self {
        match name {
            Some(name) => {
                self.spec.config_files.insert(role, name.into());
            }
            None => {
                self.spec.config_files.remove(&role);
            }
        }
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.spec.extra_args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn java_opts<I, S>(mut self, opts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.java_opts.extend(opts.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.env.insert(key.into(), value.into());
        self
    }

    pub fn java_home(mut self, java_home: Option<PathBuf>) -> Self {
        self.spec.java_home = java_home;
        self
    }

    pub fn java_executable(mut self, java: Option<PathBuf>) -> Self {
        self.spec.java_executable = java;
        self
    }

    pub fn build(self) -> LaunchSpec {
        self.spec
    }
}

/// A fully resolved process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Executable
    pub program: PathBuf,
    /// Arguments, in order
    pub args: Vec<String>,
    /// Working directory; inherits the caller's when `None`
    pub working_dir: Option<PathBuf>,
    /// Variables added to the inherited environment
    pub env: BTreeMap<String, String>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Program followed by its arguments
    pub fn argv(&self) -> Vec<OsString> {
        std::iter::once(self.program.clone().into_os_string())
            .chain(self.args.iter().map(OsString::from))
            .collect()
    }

    pub(crate) fn to_command(&self) -> async_process::Command {
        let mut command = async_process::Command::new(&self.program);
        command.args(&self.args);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

/// Builds server command lines from a [`LaunchSpec`].
pub struct CommandBuilder;

impl CommandBuilder {
    /// Builds the command line that boots the server described by `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInstallation`] if the installation root
    /// does not have the `modules`/`bin`/boot-jar layout.
    pub fn build(spec: &LaunchSpec) -> Result<CommandLine> {
        validate_installation(spec.installation_root())?;
        Ok(match spec.topology() {
            Topology::Standalone => Self::standalone(spec),
            Topology::Domain => Self::domain(spec),
        })
    }

    /// Like [`CommandBuilder::build`] but boots in admin-only mode, which
    /// starts the management layer without opening application services.
    pub fn build_admin_only(spec: &LaunchSpec) -> Result<CommandLine> {
        Self::build(&spec.with_extra_args(["--admin-only"]))
    }

    fn standalone(spec: &LaunchSpec) -> CommandLine {
        let root = spec.installation_root();
        let base_dir = root.join("standalone");
        let java = spec.java_executable();

        let mut command = CommandLine::new(&java)
            .args(spec.java_opts().iter().cloned())
            .arg(format!("-Djboss.home.dir={}", root.display()))
            .arg(format!(
                "-Dorg.jboss.boot.log.file={}",
                base_dir.join("log").join("server.log").display()
            ))
            .arg(format!(
                "-Dlogging.configuration=file:{}",
                base_dir
                    .join("configuration")
                    .join("logging.properties")
                    .display()
            ))
            .arg("-jar")
            .arg(root.join(MODULES_JAR).display().to_string())
            .arg("-mp")
            .arg(root.join(MODULES_DIR).display().to_string())
            .arg("org.jboss.as.standalone")
            .arg(format!("-Djboss.home.dir={}", root.display()))
            .arg(format!("-Djboss.server.base.dir={}", base_dir.display()));

        if let Some(config) = spec.config_file(ConfigRole::Server) {
            command = command.arg("-c").arg(config);
        }

        Self::finish(command.args(spec.extra_args().iter().cloned()), spec)
    }

    fn domain(spec: &LaunchSpec) -> CommandLine {
        let root = spec.installation_root();
        let base_dir = root.join("domain");
        let java = spec.java_executable();
        let logging = format!(
            "-Dlogging.configuration=file:{}",
            base_dir
                .join("configuration")
                .join("logging.properties")
                .display()
        );

        let mut command = CommandLine::new(&java)
            .arg("-D[Process Controller]")
            .arg(format!("-Djboss.home.dir={}", root.display()))
            .arg(format!(
                "-Dorg.jboss.boot.log.file={}",
                base_dir.join("log").join("process-controller.log").display()
            ))
            .arg(logging.clone())
            .arg("-jar")
            .arg(root.join(MODULES_JAR).display().to_string())
            .arg("-mp")
            .arg(root.join(MODULES_DIR).display().to_string())
            .arg("org.jboss.as.process-controller")
            .arg("-jboss-home")
            .arg(root.display().to_string())
            .arg("-jvm")
            .arg(java.display().to_string())
            .arg("-mp")
            .arg(root.join(MODULES_DIR).display().to_string())
            .arg("--")
            .arg(format!(
                "-Dorg.jboss.boot.log.file={}",
                base_dir.join("log").join("host-controller.log").display()
            ))
            .arg(logging)
            .args(spec.java_opts().iter().cloned())
            .arg("--")
            .arg("-default-jvm")
            .arg(java.display().to_string());

        if let Some(config) = spec.config_file(ConfigRole::Domain) {
            command = command.arg(format!("--domain-config={}", config));
        }
        if let Some(config) = spec.config_file(ConfigRole::Host) {
            command = command.arg(format!("--host-config={}", config));
        }

        Self::finish(command.args(spec.extra_args().iter().cloned()), spec)
    }

    fn finish(mut command: CommandLine, spec: &LaunchSpec) -> CommandLine {
        let root = spec.installation_root();
        command = command
            .env("JBOSS_HOME", root.display().to_string())
            .current_dir(root);
        if let Some(home) = &spec.java_home {
            command = command.env("JAVA_HOME", home.display().to_string());
        }
        for (key, value) in spec.env() {
            command = command.env(key.clone(), value.clone());
        }
        command
    }

    /// Command line of the installation's add-user tool
    pub fn add_user(installation_root: &Path, java_home: Option<&Path>) -> Result<CommandLine> {
        validate_installation(installation_root)?;
        let script = installation_root.join(BIN_DIR).join(if cfg!(windows) {
            "add-user.bat"
        } else {
            "add-user.sh"
        });
        let mut command = CommandLine::new(script)
            .env("JBOSS_HOME", installation_root.display().to_string())
            .current_dir(installation_root);
        if let Some(home) = java_home {
            command = command.env("JAVA_HOME", home.display().to_string());
        }
        Ok(command)
    }
}
