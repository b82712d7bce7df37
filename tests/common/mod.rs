//! In-memory management endpoint shared by the integration tests.
#![allow(dead_code)]

use appserver_runner::error::{Error, Result};
use appserver_runner::transport::{Address, Connector, ManagementChannel, Operation, OperationResult};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Model {
    properties: BTreeMap<String, String>,
    /// Deployment name -> server groups it is assigned to
    deployments: BTreeMap<String, BTreeSet<String>>,
    server_groups: BTreeSet<String>,
}

struct State {
    launch_type: String,
    hosts: Vec<String>,
    model: Model,
    refuse_connections: usize,
    starting_checks: usize,
    stopped: bool,
    ignore_shutdown: bool,
    unauthorized: bool,
    kill_on_shutdown: Option<u32>,
    connects: usize,
    executed: Vec<Operation>,
    shutdowns: Vec<Address>,
}

/// A fake server speaking the management protocol in memory.
///
/// Cloning shares the same state.
#[derive(Clone)]
pub struct FakeServer {
    state: Arc<Mutex<State>>,
}

impl FakeServer {
    pub fn standalone() -> Self {
        Self::with_launch_type("STANDALONE", Vec::new())
    }

    pub fn domain(hosts: &[&str]) -> Self {
        Self::with_launch_type("DOMAIN", hosts.iter().map(|h| h.to_string()).collect())
    }

    fn with_launch_type(launch_type: &str, hosts: Vec<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                launch_type: launch_type.to_string(),
                hosts,
                model: Model::default(),
                refuse_connections: 0,
                starting_checks: 0,
                stopped: false,
                ignore_shutdown: false,
                unauthorized: false,
                kill_on_shutdown: None,
                connects: 0,
                executed: Vec::new(),
                shutdowns: Vec::new(),
            })),
        }
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse_connections(self, count: usize) -> Self {
        self.state.lock().unwrap().refuse_connections = count;
        self
    }

    /// Report `starting` for the next `count` state checks
    pub fn starting_for(self, count: usize) -> Self {
        self.state.lock().unwrap().starting_checks = count;
        self
    }

    /// Accept shutdown operations without ever stopping
    pub fn ignore_shutdown(self) -> Self {
        self.state.lock().unwrap().ignore_shutdown = true;
        self
    }

    /// Accept connections but reject every operation as unauthenticated
    pub fn unauthorized(self) -> Self {
        self.state.lock().unwrap().unauthorized = true;
        self
    }

    pub fn with_deployment(self, name: &str, groups: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let groups: BTreeSet<String> = groups.iter().map(|g| g.to_string()).collect();
            state.model.server_groups.extend(groups.iter().cloned());
            state.model.deployments.insert(name.to_string(), groups);
        }
        self
    }

    pub fn with_property(self, name: &str, value: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .model
            .properties
            .insert(name.to_string(), value.to_string());
        self
    }

    /// SIGTERM `pid` when a shutdown operation arrives
    pub fn kill_on_shutdown(&self, pid: u32) {
        self.state.lock().unwrap().kill_on_shutdown = Some(pid);
    }

    pub fn property(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().model.properties.get(name).cloned()
    }

    pub fn properties(&self) -> BTreeMap<String, String> {
        self.state.lock().unwrap().model.properties.clone()
    }

    pub fn deployments(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .model
            .deployments
            .keys()
            .cloned()
            .collect()
    }

    /// Every top-level operation received, in order
    pub fn executed(&self) -> Vec<Operation> {
        self.state.lock().unwrap().executed.clone()
    }

    /// Top-level operations received that are not reads
    pub fn writes(&self) -> Vec<Operation> {
        self.executed()
            .into_iter()
            .filter(|op| !op.name().starts_with("read-"))
            .collect()
    }

    pub fn shutdowns(&self) -> Vec<Address> {
        self.state.lock().unwrap().shutdowns.clone()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }

    /// Hosts still up
    pub fn hosts(&self) -> Vec<String> {
        self.state.lock().unwrap().hosts.clone()
    }

    fn handle(&self, operation: &Operation) -> Result<OperationResult> {
        let mut state = self.state.lock().unwrap();
        if state.stopped {
            return Err(Error::Transport("Connection closed".to_string()));
        }
        if state.unauthorized {
            return Err(Error::Unauthorized("Authentication required".to_string()));
        }
        state.executed.push(operation.clone());

        if operation.name() == "shutdown" {
            state.shutdowns.push(operation.address().clone());
            if state.ignore_shutdown {
                return Ok(OperationResult::success(Value::Null));
            }
            // A domain goes away with its last host.
            if let [(kind, host)] = operation.address().segments() {
                if kind == "host" {
                    let host = host.clone();
                    state.hosts.retain(|h| *h != host);
                }
            }
            if state.launch_type == "STANDALONE" || state.hosts.is_empty() {
                state.stopped = true;
                if let Some(pid) = state.kill_on_shutdown.take() {
                    terminate(pid);
                }
            }
            return Ok(OperationResult::success(Value::Null));
        }

        if let Some(steps) = operation.steps() {
            let steps = steps?;
            let mut model = state.model.clone();
            let mut results = Map::new();
            let mut failed = false;
            for (index, step) in steps.iter().enumerate() {
                let key = format!("step-{}", index + 1);
                match apply(&mut model, &state, step) {
                    Ok(value) => {
                        results.insert(key, json!({"outcome": "success", "result": value}));
                    }
                    Err(message) => {
                        results.insert(
                            key,
                            json!({"outcome": "failed", "failure-description": message}),
                        );
                        failed = true;
                        break;
                    }
                }
            }
            if failed {
                let mut result = OperationResult::failed(
                    "Composite operation failed and was rolled back",
                );
                result.result = Value::Object(results);
                result.rolled_back = true;
                return Ok(result);
            }
            state.model = model;
            return Ok(OperationResult::success(Value::Object(results)));
        }

        let mut model = state.model.clone();
        match apply(&mut model, &state, operation) {
            Ok(value) => {
                state.model = model;
                Ok(OperationResult::success(value))
            }
            Err(message) => Ok(OperationResult::failed(message)),
        }
    }
}

fn apply(model: &mut Model, state: &State, op: &Operation) -> std::result::Result<Value, String> {
    let address = op.address();
    let param = |name: &str| op.get_param(name).cloned().unwrap_or(Value::Null);
    let text = |value: Value| match value {
        Value::String(s) => s,
        other => other.to_string(),
    };

    match (op.name(), address.segments()) {
        ("read-attribute", []) => match text(param("name")).as_str() {
            "server-state" => Ok(json!("running")),
            "launch-type" => Ok(json!(state.launch_type)),
            "product-name" => Ok(json!("WildFly")),
            "product-version" => Ok(json!("31.0.0.Final")),
            "release-version" => Ok(json!("23.0.3.Final")),
            other => Err(format!("Unknown attribute '{}'", other)),
        },
        ("read-attribute", [(kind, host)]) if kind == "host" => {
            if state.hosts.contains(host) {
                Ok(json!("running"))
            } else {
                Err(format!("Host '{}' not found", host))
            }
        }
        ("read-attribute", [(kind, name)]) if kind == "system-property" => model
            .properties
            .get(name)
            .map(|v| json!(v))
            .ok_or_else(|| format!("Resource /system-property={} not found", name)),
        ("read-children-names", []) => match text(param("child-type")).as_str() {
            "host" => Ok(json!(state.hosts)),
            "server-group" => Ok(json!(model.server_groups)),
            "deployment" => Ok(json!(model.deployments.keys().collect::<Vec<_>>())),
            "system-property" => Ok(json!(model.properties.keys().collect::<Vec<_>>())),
            other => Err(format!("Unknown child type '{}'", other)),
        },
        ("read-children-names", [(kind, group)]) if kind == "server-group" => Ok(json!(
            model
                .deployments
                .iter()
                .filter(|(_, groups)| groups.contains(group))
                .map(|(name, _)| name)
                .collect::<Vec<_>>()
        )),
        ("read-children-resources", []) if text(param("child-type")) == "deployment" => {
            let mut resources = Map::new();
            for name in model.deployments.keys() {
                resources.insert(
                    name.clone(),
                    json!({"runtime-name": name, "enabled": true, "status": "OK"}),
                );
            }
            Ok(Value::Object(resources))
        }
        ("add", [(kind, name)]) if kind == "system-property" => {
            if model.properties.contains_key(name) {
                return Err(format!("Duplicate resource /system-property={}", name));
            }
            let value = param("value");
            if value.is_null() {
                return Err("Missing required parameter 'value'".to_string());
            }
            model.properties.insert(name.clone(), text(value));
            Ok(Value::Null)
        }
        ("write-attribute", [(kind, name)]) if kind == "system-property" => {
            let slot = model
                .properties
                .get_mut(name)
                .ok_or_else(|| format!("Resource /system-property={} not found", name))?;
            *slot = text(param("value"));
            Ok(Value::Null)
        }
        ("remove", [(kind, name)]) if kind == "system-property" => model
            .properties
            .remove(name)
            .map(|_| Value::Null)
            .ok_or_else(|| format!("Resource /system-property={} not found", name)),
        ("undeploy", [(kind, name)]) if kind == "deployment" => model
            .deployments
            .get(name)
            .map(|_| Value::Null)
            .ok_or_else(|| format!("Deployment {} not found", name)),
        ("remove", [(kind, name)]) if kind == "deployment" => {
            match model.deployments.get(name) {
                None => Err(format!("Deployment {} not found", name)),
                Some(groups) if !groups.is_empty() => {
                    Err(format!("Deployment {} is still assigned to {:?}", name, groups))
                }
                Some(_) => {
                    model.deployments.remove(name);
                    Ok(Value::Null)
                }
            }
        }
        ("undeploy", [(g, group), (d, name)]) if g == "server-group" && d == "deployment" => {
            match model.deployments.get(name) {
                Some(groups) if groups.contains(group) => Ok(Value::Null),
                _ => Err(format!("Deployment {} not in {}", name, group)),
            }
        }
        ("remove", [(g, group), (d, name)]) if g == "server-group" && d == "deployment" => {
            match model.deployments.get_mut(name).map(|groups| groups.remove(group)) {
                Some(true) => Ok(Value::Null),
                _ => Err(format!("Deployment {} not in {}", name, group)),
            }
        }
        (name, _) => Err(format!("No operation named '{}' exists at {}", name, address)),
    }
}

#[cfg(unix)]
fn terminate(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}

struct FakeChannel {
    server: FakeServer,
    closed: AtomicBool,
}

#[async_trait]
impl ManagementChannel for FakeChannel {
    async fn execute(&self, operation: Operation) -> Result<OperationResult> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Transport("Channel closed".to_string()));
        }
        let result = self.server.handle(&operation);
        // Answer `starting` to state checks while booting.
        if let Ok(result) = &result {
            let check = operation.name() == "read-attribute"
                && matches!(
                    operation.get_param("name").and_then(Value::as_str),
                    Some("server-state") | Some("host-state")
                );
            if check {
                let mut state = self.server.state.lock().unwrap();
                if state.starting_checks > 0 && result.is_success() {
                    state.starting_checks -= 1;
                    return Ok(OperationResult::success(json!("starting")));
                }
            }
        }
        result
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Connector for FakeServer {
    async fn connect(&self) -> Result<Arc<dyn ManagementChannel>> {
        {
            let mut state = self.state.lock().unwrap();
            if state.stopped {
                return Err(Error::ConnectionRefused(self.endpoint()));
            }
            if state.refuse_connections > 0 {
                state.refuse_connections -= 1;
                return Err(Error::ConnectionRefused(self.endpoint()));
            }
            state.connects += 1;
        }
        Ok(Arc::new(FakeChannel {
            server: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn endpoint(&self) -> String {
        "fake:9990".to_string()
    }
}

/// A directory laid out like a server installation, with a stand-in `java`
/// that runs until it receives SIGTERM.
pub struct FakeInstallation {
    pub dir: assert_fs::TempDir,
}

impl FakeInstallation {
    pub fn new() -> Self {
        Self::with_java_script("trap 'exit 0' TERM\nwhile true; do sleep 0.1; done\n")
    }

    /// `script` is the body of the fake java launcher
    pub fn with_java_script(script: &str) -> Self {
        use assert_fs::prelude::*;

        let dir = assert_fs::TempDir::new().unwrap();
        dir.child("modules").create_dir_all().unwrap();
        dir.child("bin").create_dir_all().unwrap();
        dir.child("jboss-modules.jar").touch().unwrap();
        dir.child("standalone/configuration").create_dir_all().unwrap();
        dir.child("standalone/configuration/standalone.xml")
            .write_str("<server/>")
            .unwrap();

        let java = dir.child("fake-java");
        java.write_str(&format!("#!/bin/sh\n{}", script)).unwrap();
        make_executable(java.path());

        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn java(&self) -> PathBuf {
        self.dir.path().join("fake-java")
    }

    /// Writes an executable script under `bin/`
    pub fn bin_script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join("bin").join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        make_executable(&path);
        path
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = std::fs::metadata(path).unwrap().permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(path, permissions).unwrap();
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) {}

/// Whether a process with `pid` still exists
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None::<Signal>).is_ok()
}
