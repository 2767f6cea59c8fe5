use crate::backend::{
    ContainerEngine, ContainerHandle, ContainerSpec, ContainerState, ContainerSummary, ExecOutput,
};
use crate::EngineError;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct MockContainer {
    id: String,
    image: String,
    network: Option<String>,
    running: bool,
    address: String,
    env: BTreeMap<String, String>,
    files: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
struct MockState {
    containers: BTreeMap<String, MockContainer>,
    networks: BTreeSet<String>,
    images: BTreeSet<String>,
    log: Vec<String>,
    /// Operation name -> remaining injected failures (`None` = every call).
    failures: BTreeMap<String, Option<usize>>,
    /// Exec commands containing the needle fail (`None` = every call).
    exec_failures: Vec<(String, Option<usize>)>,
    next_id: u64,
}

impl MockState {
    fn record(&mut self, op: &str, target: &str) -> Result<(), EngineError> {
        self.log.push(format!("{op} {target}"));
        let Some(remaining) = self.failures.get_mut(op) else {
            return Ok(());
        };
        match remaining {
            None => {}
            Some(0) => return Ok(()),
            Some(n) => *n -= 1,
        }
        Err(EngineError::Rejected {
            operation: format!("{op} {target}"),
            reason: "injected failure".to_owned(),
        })
    }

    fn container_mut(&mut self, name: &str) -> Result<&mut MockContainer, EngineError> {
        self.containers
            .get_mut(name)
            .ok_or_else(|| EngineError::NotFound(name.to_owned()))
    }

    fn take_exec_failure(&mut self, joined: &str) -> bool {
        for (needle, remaining) in &mut self.exec_failures {
            if !joined.contains(needle.as_str()) {
                continue;
            }
            match remaining {
                None => return true,
                Some(0) => {}
                Some(n) => {
                    *n -= 1;
                    return true;
                }
            }
        }
        false
    }

    fn fresh_id(&mut self, name: &str) -> String {
        self.next_id += 1;
        blake3::hash(format!("mock-container:{name}:{}", self.next_id).as_bytes())
            .to_hex()[..12]
            .to_owned()
    }

    fn fresh_address(&self) -> String {
        format!("172.28.{}.{}", self.next_id / 250, self.next_id % 250 + 2)
    }
}

/// In-memory engine used by tests and `--engine mock`.
///
/// Every call is appended to an operation log as `"<op> <target>"`, and any
/// operation can be made to fail on demand. Exec understands two commands:
/// `cat <path>` reads files copied in with `copy_into`, and `hostname -i`
/// prints the container's fake address. Anything else succeeds and echoes
/// the command line.
pub struct MockEngine {
    state: Mutex<MockState>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every future call of `op` fail.
    pub fn fail_operation(&self, op: &str) {
        self.state().failures.insert(op.to_owned(), None);
    }

    /// Make the next `times` calls of `op` fail.
    pub fn fail_operation_times(&self, op: &str, times: usize) {
        self.state().failures.insert(op.to_owned(), Some(times));
    }

    /// Exec commands whose joined argv contains `needle` exit with code 1.
    pub fn fail_exec_containing(&self, needle: &str, times: Option<usize>) {
        self.state()
            .exec_failures
            .push((needle.to_owned(), times));
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failures.clear();
        state.exec_failures.clear();
    }

    /// Insert a container that was not created through this engine.
    pub fn seed_container(&self, name: &str, image: &str, running: bool) {
        let mut state = self.state();
        let id = state.fresh_id(name);
        let address = state.fresh_address();
        state.containers.insert(
            name.to_owned(),
            MockContainer {
                id,
                image: image.to_owned(),
                network: None,
                running,
                address,
                env: BTreeMap::new(),
                files: BTreeMap::new(),
            },
        );
    }

    pub fn operations(&self) -> Vec<String> {
        self.state().log.clone()
    }

    pub fn clear_operations(&self) {
        self.state().log.clear();
    }

    pub fn container_names(&self) -> Vec<String> {
        self.state().containers.keys().cloned().collect()
    }

    pub fn container_id(&self, name: &str) -> Option<String> {
        self.state().containers.get(name).map(|c| c.id.clone())
    }

    pub fn container_env(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.state().containers.get(name).map(|c| c.env.clone())
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.state()
            .containers
            .get(name)
            .is_some_and(|c| c.running)
    }

    pub fn networks(&self) -> Vec<String> {
        self.state().networks.iter().cloned().collect()
    }

    pub fn pulled_images(&self) -> Vec<String> {
        self.state().images.iter().cloned().collect()
    }

    pub fn address(&self, name: &str) -> Option<String> {
        self.state().containers.get(name).map(|c| c.address.clone())
    }

    pub fn file(&self, container: &str, path: &str) -> Option<Vec<u8>> {
        self.state()
            .containers
            .get(container)
            .and_then(|c| c.files.get(path).cloned())
    }
}

impl ContainerEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn list_containers(&self) -> Result<Vec<ContainerSummary>, EngineError> {
        let mut state = self.state();
        state.record("list_containers", "*")?;
        Ok(state
            .containers
            .iter()
            .map(|(name, c)| ContainerSummary {
                id: c.id.clone(),
                // Match the engine API convention of a leading slash.
                name: format!("/{name}"),
                image: c.image.clone(),
                state: if c.running {
                    ContainerState::Running
                } else {
                    ContainerState::Exited
                },
            })
            .collect())
    }

    fn create_network(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.record("create_network", name)?;
        if !state.networks.insert(name.to_owned()) {
            return Err(EngineError::Conflict(name.to_owned()));
        }
        Ok(())
    }

    fn remove_network(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.record("remove_network", name)?;
        if !state.networks.remove(name) {
            return Err(EngineError::NotFound(name.to_owned()));
        }
        Ok(())
    }

    fn pull_image(&self, reference: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.record("pull_image", reference)?;
        state.images.insert(reference.to_owned());
        Ok(())
    }

    fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle, EngineError> {
        let mut state = self.state();
        state.record("create_container", &spec.name)?;
        if state.containers.contains_key(&spec.name) {
            return Err(EngineError::Conflict(spec.name.clone()));
        }
        if let Some(network) = &spec.network {
            if !state.networks.contains(network) {
                return Err(EngineError::NotFound(network.clone()));
            }
        }
        let id = state.fresh_id(&spec.name);
        let address = state.fresh_address();
        state.containers.insert(
            spec.name.clone(),
            MockContainer {
                id: id.clone(),
                image: spec.image.clone(),
                network: spec.network.clone(),
                running: false,
                address,
                env: spec.env.clone(),
                files: BTreeMap::new(),
            },
        );
        Ok(ContainerHandle {
            id,
            name: spec.name.clone(),
        })
    }

    fn start_container(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.record("start_container", name)?;
        let container = state.container_mut(name)?;
        if let Some(network) = container.network.clone() {
            if !state.networks.contains(&network) {
                return Err(EngineError::NotFound(network));
            }
        }
        state.container_mut(name)?.running = true;
        Ok(())
    }

    fn stop_container(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.record("stop_container", name)?;
        state.container_mut(name)?.running = false;
        Ok(())
    }

    fn remove_container(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.record("remove_container", name)?;
        if state.containers.remove(name).is_none() {
            return Err(EngineError::NotFound(name.to_owned()));
        }
        Ok(())
    }

    fn exec(&self, container: &str, command: &[String]) -> Result<ExecOutput, EngineError> {
        let mut state = self.state();
        let joined = command.join(" ");
        state.record("exec", &format!("{container} {joined}"))?;
        if !state.container_mut(container)?.running {
            return Err(EngineError::Rejected {
                operation: format!("exec {container}"),
                reason: "container is not running".to_owned(),
            });
        }
        if state.take_exec_failure(&joined) {
            return Ok(ExecOutput {
                code: 1,
                stdout: Vec::new(),
                stderr: b"mock exec failure".to_vec(),
            });
        }

        let target = state.container_mut(container)?;
        if let [cmd, arg] = command {
            if cmd == "hostname" && arg == "-i" {
                return Ok(ExecOutput {
                    code: 0,
                    stdout: format!("{}\n", target.address).into_bytes(),
                    stderr: Vec::new(),
                });
            }
        }
        if let [cmd, path] = command {
            if cmd == "cat" {
                return Ok(match target.files.get(path) {
                    Some(data) => ExecOutput {
                        code: 0,
                        stdout: data.clone(),
                        stderr: Vec::new(),
                    },
                    None => ExecOutput {
                        code: 1,
                        stdout: Vec::new(),
                        stderr: format!("cat: {path}: No such file or directory").into_bytes(),
                    },
                });
            }
        }

        Ok(ExecOutput {
            code: 0,
            stdout: format!("mock-exec: {joined}\n").into_bytes(),
            stderr: Vec::new(),
        })
    }

    fn copy_into(
        &self,
        container: &str,
        dest_dir: &str,
        archive: &[u8],
    ) -> Result<(), EngineError> {
        let mut state = self.state();
        state.record("copy_into", &format!("{container}:{dest_dir}"))?;
        let target = state.container_mut(container)?;

        let base = dest_dir.trim_end_matches('/');
        let mut ar = tar::Archive::new(archive);
        for entry in ar.entries()? {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let rel = entry.path()?.to_string_lossy().into_owned();
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            target.files.insert(format!("{base}/{rel}"), data);
        }
        Ok(())
    }
}
