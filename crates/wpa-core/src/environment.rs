use crate::archive;
use crate::cache::CachedStack;
use crate::lifecycle::{validate_transition, LifecycleState};
use crate::pipeline::{ProvisionReport, Step, Strategy};
use crate::snapshot::fetch_snapshot;
use crate::CoreError;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wpa_engine::{ContainerEngine, ContainerHandle, ContainerSpec, ExecOutput};
use wpa_schema::{
    container_name, network_name, parse_container_name, EnvironmentId, Fingerprint,
    NormalizedConfig, Role, StackMeta, META_FILE_NAME,
};

/// Directory inside the database container that receives the snapshot.
const SNAPSHOT_DIR: &str = "/wpa";
const SNAPSHOT_FILE: &str = "snapshot.sql";

/// Per-environment knobs resolved by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentOptions {
    pub cache_eligible: bool,
    pub db_wait: Duration,
    pub poll_interval: Duration,
}

impl Default for EnvironmentOptions {
    fn default() -> Self {
        Self {
            cache_eligible: false,
            db_wait: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
struct EnvState {
    lifecycle: LifecycleState,
    network: Option<String>,
    containers: BTreeMap<Role, ContainerHandle>,
    snapshot_pending: bool,
    report: Option<ProvisionReport>,
}

/// One provisioned stack: network plus application, database and driver
/// containers, all named after the environment id.
///
/// Every stack operation is a separate method so the pipeline can run them
/// one at a time. An environment built with [`Environment::detached`] knows
/// only its id and can do nothing but [`Environment::destroy`].
pub struct Environment {
    engine: Arc<dyn ContainerEngine>,
    id: EnvironmentId,
    config: Option<NormalizedConfig>,
    fingerprint: Option<Fingerprint>,
    options: EnvironmentOptions,
    state: Mutex<EnvState>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("id", &self.id)
            .field("engine", &self.engine.name())
            .field("fingerprint", &self.fingerprint)
            .field("options", &self.options)
            .field("state", &*self.state())
            .finish_non_exhaustive()
    }
}

impl Environment {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        id: EnvironmentId,
        config: NormalizedConfig,
        fingerprint: Fingerprint,
        options: EnvironmentOptions,
    ) -> Self {
        Self {
            engine,
            id,
            config: Some(config),
            fingerprint: Some(fingerprint),
            options,
            state: Mutex::new(EnvState {
                lifecycle: LifecycleState::Unprovisioned,
                network: None,
                containers: BTreeMap::new(),
                snapshot_pending: false,
                report: None,
            }),
        }
    }

    /// A handle for tearing down an environment by id alone, possibly one
    /// created by another process.
    pub fn detached(engine: Arc<dyn ContainerEngine>, id: EnvironmentId) -> Self {
        Self {
            engine,
            id,
            config: None,
            fingerprint: None,
            options: EnvironmentOptions::default(),
            state: Mutex::new(EnvState {
                lifecycle: LifecycleState::Unprovisioned,
                network: None,
                containers: BTreeMap::new(),
                snapshot_pending: false,
                report: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, EnvState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &EnvironmentId {
        &self.id
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn config(&self) -> Option<&NormalizedConfig> {
        self.config.as_ref()
    }

    pub fn cache_eligible(&self) -> bool {
        self.options.cache_eligible
    }

    pub fn options(&self) -> EnvironmentOptions {
        self.options
    }

    pub fn is_detached(&self) -> bool {
        self.config.is_none()
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.state().lifecycle
    }

    pub fn network(&self) -> Option<String> {
        self.state().network.clone()
    }

    /// Managed containers keyed by role.
    pub fn containers(&self) -> BTreeMap<Role, ContainerHandle> {
        self.state().containers.clone()
    }

    /// Outcome of the pipeline that provisioned this environment, once it
    /// has finished successfully.
    pub fn report(&self) -> Option<ProvisionReport> {
        self.state().report.clone()
    }

    pub fn container_name(&self, role: Role) -> String {
        container_name(&self.id, role)
    }

    fn require_config(&self) -> Result<&NormalizedConfig, CoreError> {
        self.config.as_ref().ok_or_else(|| {
            CoreError::NotFound(format!("configuration of detached environment '{}'", self.id))
        })
    }

    fn advance(&self, to: LifecycleState) -> Result<(), CoreError> {
        let mut state = self.state();
        validate_transition(state.lifecycle, to)?;
        state.lifecycle = to;
        Ok(())
    }

    /// Move forward to `to` unless already there or past it.
    fn advance_at_least(&self, to: LifecycleState) -> Result<(), CoreError> {
        let current = self.state().lifecycle;
        if current == LifecycleState::Destroyed || current < to {
            self.advance(to)
        } else {
            Ok(())
        }
    }

    /// Take over the network and containers of a cached stack.
    pub fn adopt_cached(&self, cached: &CachedStack) -> Result<(), CoreError> {
        {
            let mut state = self.state();
            state.network = Some(cached.meta.network.clone());
            for (role, summary) in &cached.containers {
                state.containers.insert(
                    *role,
                    ContainerHandle {
                        id: summary.id.clone(),
                        name: container_name(&self.id, *role),
                    },
                );
            }
        }
        self.advance(LifecycleState::NetworkReady)
    }

    /// Run one pipeline step.
    pub fn apply(&self, step: Step, strategy: Strategy) -> Result<(), CoreError> {
        match step {
            Step::CreateNetwork => self.create_network(),
            Step::DownloadImages => self.download_images(),
            Step::CreateContainers => self.create_containers(&Role::ALL),
            Step::StartContainers => self.start_containers(&Role::ALL),
            Step::PullSnapshot => self.pull_snapshot(),
            Step::SetupHosts => match strategy {
                Strategy::Build => self.setup_hosts(true, false),
                Strategy::Refresh => self.setup_hosts(false, true),
            },
            Step::SetupDatabase => self.setup_database(self.options.db_wait),
            Step::InsertRepo => self.insert_repo(),
            Step::WriteMeta => self.write_meta_to_container(),
            Step::RunBeforeScripts => self.run_before_scripts(),
            Step::StopDriver => self.stop_containers(&[Role::Driver], true),
            Step::RemoveDriver => self.delete_containers(&[Role::Driver], true),
            Step::CreateDriver => self.create_containers(&[Role::Driver]),
            Step::StartDriver => self.start_containers(&[Role::Driver]),
        }
    }

    /// Record a finished pipeline and move to `ReadyForTests`.
    pub fn mark_ready(&self, report: ProvisionReport) -> Result<(), CoreError> {
        self.advance(LifecycleState::ReadyForTests)?;
        self.state().report = Some(report);
        info!("environment {} ready for tests", self.id);
        Ok(())
    }

    pub fn create_network(&self) -> Result<(), CoreError> {
        let name = network_name(&self.id);
        info!("creating network {name}");
        self.engine.create_network(&name)?;
        self.state().network = Some(name);
        self.advance(LifecycleState::NetworkReady)
    }

    /// Pull every distinct image of the stack once.
    pub fn download_images(&self) -> Result<(), CoreError> {
        let config = self.require_config()?;
        let images: BTreeSet<&str> = Role::ALL.iter().map(|r| config.image(*r)).collect();
        for image in images {
            info!("pulling image {image}");
            self.engine.pull_image(image)?;
        }
        Ok(())
    }

    fn container_spec(&self, config: &NormalizedConfig, role: Role) -> ContainerSpec {
        let mut env = BTreeMap::new();
        match role {
            Role::Database => {
                env.insert("MYSQL_DATABASE".to_owned(), config.db_name.clone());
                env.insert("MYSQL_USER".to_owned(), config.db_user.clone());
                env.insert("MYSQL_PASSWORD".to_owned(), config.db_password.clone());
                env.insert("MYSQL_ROOT_PASSWORD".to_owned(), config.db_password.clone());
            }
            Role::App => {
                env.insert(
                    "WORDPRESS_DB_HOST".to_owned(),
                    Role::Database.suffix().to_owned(),
                );
                env.insert("WORDPRESS_DB_NAME".to_owned(), config.db_name.clone());
                env.insert("WORDPRESS_DB_USER".to_owned(), config.db_user.clone());
                env.insert("WORDPRESS_DB_PASSWORD".to_owned(), config.db_password.clone());
                env.extend(config.env.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Role::Driver => {}
        }

        ContainerSpec {
            name: container_name(&self.id, role),
            image: config.image(role).to_owned(),
            network: Some(network_name(&self.id)),
            aliases: vec![role.suffix().to_owned()],
            env,
            labels: BTreeMap::from([
                ("wpa.environment".to_owned(), self.id.to_string()),
                ("wpa.role".to_owned(), role.suffix().to_owned()),
            ]),
            command: Vec::new(),
        }
    }

    pub fn create_containers(&self, roles: &[Role]) -> Result<(), CoreError> {
        let config = self.require_config()?;
        for role in roles {
            let spec = self.container_spec(config, *role);
            info!("creating container {} ({})", spec.name, spec.image);
            let handle = self.engine.create_container(&spec)?;
            debug!("container {} has id {}", handle.name, handle.id);
            self.state().containers.insert(*role, handle);
        }
        Ok(())
    }

    pub fn start_containers(&self, roles: &[Role]) -> Result<(), CoreError> {
        for role in roles {
            let name = container_name(&self.id, *role);
            info!("starting container {name}");
            self.engine.start_container(&name)?;
        }
        self.advance_at_least(LifecycleState::ContainersRunning)
    }

    /// Stop containers. With `tolerate_missing`, a container that does not
    /// exist counts as stopped.
    pub fn stop_containers(&self, roles: &[Role], tolerate_missing: bool) -> Result<(), CoreError> {
        for role in roles {
            let name = container_name(&self.id, *role);
            info!("stopping container {name}");
            match self.engine.stop_container(&name) {
                Err(e) if tolerate_missing && e.is_not_found() => {
                    debug!("container {name} already gone");
                }
                other => other?,
            }
        }
        Ok(())
    }

    pub fn delete_containers(
        &self,
        roles: &[Role],
        tolerate_missing: bool,
    ) -> Result<(), CoreError> {
        for role in roles {
            let name = container_name(&self.id, *role);
            info!("removing container {name}");
            match self.engine.remove_container(&name) {
                Err(e) if tolerate_missing && e.is_not_found() => {
                    debug!("container {name} already gone");
                }
                other => other?,
            }
            self.state().containers.remove(role);
        }
        Ok(())
    }

    /// Copy the configured snapshot into the database container. It is
    /// imported by [`Environment::setup_database`] once the server is up.
    pub fn pull_snapshot(&self) -> Result<(), CoreError> {
        let config = self.require_config()?;
        let Some(source) = &config.snapshot else {
            debug!("no snapshot configured");
            return Ok(());
        };

        let data = fetch_snapshot(source)?;
        info!("copying {} byte snapshot into database container", data.len());
        let tar = archive::single_file(SNAPSHOT_FILE, &data, 0o644)?;
        self.engine
            .copy_into(&self.container_name(Role::Database), SNAPSHOT_DIR, &tar)?;
        self.state().snapshot_pending = true;
        Ok(())
    }

    fn exec(&self, role: Role, command: &[String]) -> Result<ExecOutput, CoreError> {
        Ok(self.engine.exec(&self.container_name(role), command)?)
    }

    fn exec_checked(&self, role: Role, command: &[String]) -> Result<ExecOutput, CoreError> {
        let output = self.exec(role, command)?;
        if output.success() {
            Ok(output)
        } else {
            Err(CoreError::CommandFailed {
                container: self.container_name(role),
                command: command.join(" "),
                code: output.code,
                stderr: output.stderr_lossy().trim().to_owned(),
            })
        }
    }

    fn shell(script: &str) -> Vec<String> {
        vec!["sh".to_owned(), "-c".to_owned(), script.to_owned()]
    }

    fn mysql_root(config: &NormalizedConfig) -> String {
        format!("mysql -uroot {}", quote(&format!("-p{}", config.db_password)))
    }

    fn app_address(&self) -> Result<String, CoreError> {
        let command = vec!["hostname".to_owned(), "-i".to_owned()];
        let output = self.exec_checked(Role::App, &command)?;
        output
            .stdout_lossy()
            .split_whitespace()
            .next()
            .map(str::to_owned)
            .ok_or_else(|| CoreError::CommandFailed {
                container: self.container_name(Role::App),
                command: command.join(" "),
                code: output.code,
                stderr: "no address reported".to_owned(),
            })
    }

    /// Point the site host name at the application container.
    ///
    /// The driver is always updated. The application container is skipped
    /// with `refresh_only`, since it kept its entry from the original build.
    /// `full_rebuild` drops existing entries for the host before adding the
    /// new one; otherwise a present entry is left alone.
    pub fn setup_hosts(&self, full_rebuild: bool, refresh_only: bool) -> Result<(), CoreError> {
        let config = self.require_config()?;
        let address = self.app_address()?;
        let line = format!("{address} {}", config.site_host);

        let mut targets = vec![Role::Driver];
        if !refresh_only {
            targets.push(Role::App);
        }

        let quoted = quote(&line);
        let append = format!("grep -qxF {quoted} /etc/hosts || echo {quoted} >> /etc/hosts");
        let script = if full_rebuild {
            let pattern = quote(&format!(
                "[[:space:]]{}$",
                config.site_host.replace('.', "\\.")
            ));
            // /etc/hosts is usually a bind mount, so rewrite it in place.
            format!(
                "grep -v {pattern} /etc/hosts > /tmp/wpa-hosts; \
                 cat /tmp/wpa-hosts > /etc/hosts; rm -f /tmp/wpa-hosts; {append}"
            )
        } else {
            append
        };

        for role in targets {
            info!("mapping {} to {address} in {role} container", config.site_host);
            self.exec_checked(role, &Self::shell(&script))?;
        }
        self.advance_at_least(LifecycleState::HostsConfigured)
    }

    /// Wait for the database server, make sure the schema exists, and import
    /// a pending snapshot.
    pub fn setup_database(&self, wait: Duration) -> Result<(), CoreError> {
        let config = self.require_config()?;
        self.wait_for_database(config, wait)?;

        let statement = format!(
            "CREATE DATABASE IF NOT EXISTS `{}`",
            config.db_name.replace('`', "``")
        );
        let create = format!("{} -e {}", Self::mysql_root(config), quote(&statement));
        self.exec_checked(Role::Database, &Self::shell(&create))?;

        if self.state().snapshot_pending {
            info!("importing snapshot into {}", config.db_name);
            let import = format!(
                "{} {} < {SNAPSHOT_DIR}/{SNAPSHOT_FILE}",
                Self::mysql_root(config),
                quote(&config.db_name)
            );
            self.exec_checked(Role::Database, &Self::shell(&import))?;
            self.state().snapshot_pending = false;
        }

        self.advance_at_least(LifecycleState::DataLoaded)
    }

    fn wait_for_database(&self, config: &NormalizedConfig, wait: Duration) -> Result<(), CoreError> {
        let ping = vec![
            "mysqladmin".to_owned(),
            "ping".to_owned(),
            "-h127.0.0.1".to_owned(),
            "-uroot".to_owned(),
            format!("-p{}", config.db_password),
            "--silent".to_owned(),
        ];
        let deadline = Instant::now() + wait;
        info!("waiting up to {}s for the database", wait.as_secs());
        loop {
            if self.exec(Role::Database, &ping)?.success() {
                debug!("database is accepting connections");
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CoreError::Timeout {
                    what: format!("database in {}", self.container_name(Role::Database)),
                    seconds: wait.as_secs(),
                });
            }
            std::thread::sleep(self.options.poll_interval.min(deadline - now));
        }
    }

    /// Copy the repository into the application container.
    pub fn insert_repo(&self) -> Result<(), CoreError> {
        let config = self.require_config()?;
        let Some(repo) = &config.repo else {
            debug!("no repository configured");
            return Ok(());
        };

        let tar = archive::pack_directory(Path::new(&repo.host_path), &repo.exclude)?;
        info!(
            "copying {} into {}:{} ({} bytes)",
            repo.host_path,
            self.container_name(Role::App),
            repo.container_path,
            tar.len()
        );
        self.engine
            .copy_into(&self.container_name(Role::App), &repo.container_path, &tar)?;
        Ok(())
    }

    pub fn stack_meta(&self) -> Result<StackMeta, CoreError> {
        let config = self.require_config()?;
        let fingerprint = self.fingerprint.clone().ok_or_else(|| {
            CoreError::NotFound(format!("fingerprint of environment '{}'", self.id))
        })?;
        Ok(StackMeta {
            env_id: self.id.clone(),
            fingerprint,
            cacheable: self.options.cache_eligible,
            created_at: chrono::Utc::now().to_rfc3339(),
            network: network_name(&self.id),
            containers: Role::ALL
                .iter()
                .map(|r| (*r, container_name(&self.id, *r)))
                .collect(),
            images: Role::ALL
                .iter()
                .map(|r| (*r, config.image(*r).to_owned()))
                .collect(),
        })
    }

    /// Persist the stack metadata into the application container, where
    /// cache lookup finds it.
    pub fn write_meta_to_container(&self) -> Result<(), CoreError> {
        let json = self.stack_meta()?.to_json()?;
        let tar = archive::single_file(META_FILE_NAME, json.as_bytes(), 0o644)?;
        info!("writing stack metadata to {}", self.container_name(Role::App));
        self.engine
            .copy_into(&self.container_name(Role::App), "/", &tar)?;
        Ok(())
    }

    /// Run the configured scripts in the application container, in order.
    pub fn run_before_scripts(&self) -> Result<(), CoreError> {
        let config = self.require_config()?;
        for script in &config.before_scripts {
            info!("running before-script: {script}");
            let output = self.exec(Role::App, &Self::shell(script))?;
            if !output.success() {
                return Err(CoreError::CommandFailed {
                    container: self.container_name(Role::App),
                    command: script.clone(),
                    code: output.code,
                    stderr: output.stderr_lossy().trim().to_owned(),
                });
            }
        }
        Ok(())
    }

    /// Tear down everything named after this environment's id.
    ///
    /// Containers are found through the engine listing, not through local
    /// state, so this also cleans up stacks created by other processes.
    /// Missing resources are ignored, which makes repeated calls succeed.
    pub fn destroy(&self) -> Result<(), CoreError> {
        info!("destroying environment {}", self.id);
        let mut names: Vec<String> = self
            .engine
            .list_containers()?
            .into_iter()
            .filter_map(|c| {
                let parsed = parse_container_name(&c.name)?;
                (parsed.env_id == self.id)
                    .then(|| c.name.trim_start_matches('/').to_owned())
            })
            .collect();
        names.sort();

        let mut first_error: Option<CoreError> = None;
        for name in &names {
            if let Err(e) = self.engine.stop_container(name) {
                if !e.is_not_found() {
                    warn!("failed to stop {name}: {e}");
                }
            }
            match self.engine.remove_container(name) {
                Ok(()) => debug!("removed container {name}"),
                Err(e) if e.is_not_found() => debug!("container {name} already gone"),
                Err(e) => {
                    warn!("failed to remove {name}: {e}");
                    first_error.get_or_insert(e.into());
                }
            }
        }

        let network = network_name(&self.id);
        match self.engine.remove_network(&network) {
            Ok(()) => debug!("removed network {network}"),
            Err(e) if e.is_not_found() => debug!("network {network} already gone"),
            Err(e) => {
                warn!("failed to remove network {network}: {e}");
                first_error.get_or_insert(e.into());
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        {
            let mut state = self.state();
            state.containers.clear();
            state.network = None;
            state.snapshot_pending = false;
        }
        self.advance(LifecycleState::Destroyed)
    }
}

/// Quote `value` as a single POSIX shell word.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wpa_engine::MockEngine;
    use wpa_schema::{compute_fingerprint, parse_config_str};

    fn config(extra: &str) -> NormalizedConfig {
        let toml = format!(
            "config_version = 1\n[stack]\napp_image = \"wp:latest\"\ndb_image = \"mysql:5.7\"\n{extra}"
        );
        parse_config_str(&toml)
            .unwrap()
            .normalize(Path::new("/suite"))
            .unwrap()
    }

    fn environment(mock: &Arc<MockEngine>, id: &str, cfg: NormalizedConfig) -> Environment {
        let fp = compute_fingerprint(&cfg).unwrap();
        Environment::new(
            mock.clone(),
            EnvironmentId::parse(id).unwrap(),
            cfg,
            fp,
            EnvironmentOptions {
                cache_eligible: true,
                db_wait: Duration::from_secs(1),
                poll_interval: Duration::from_millis(5),
            },
        )
    }

    fn provision(env: &Environment) {
        for step in Strategy::Build.steps() {
            env.apply(*step, Strategy::Build).unwrap();
        }
    }

    #[test]
    fn container_specs_carry_role_settings() {
        let mock = Arc::new(MockEngine::new());
        let env = environment(&mock, "spec", config("[env]\nWP_DEBUG = \"1\"\n"));
        let cfg = env.config().unwrap().clone();

        let app = env.container_spec(&cfg, Role::App);
        assert_eq!(app.name, "spec-wpa-app");
        assert_eq!(app.network.as_deref(), Some("spec-wpa-network"));
        assert_eq!(app.aliases, ["app"]);
        assert_eq!(app.env["WORDPRESS_DB_HOST"], "db");
        assert_eq!(app.env["WP_DEBUG"], "1");
        assert_eq!(app.labels["wpa.environment"], "spec");

        let db = env.container_spec(&cfg, Role::Database);
        assert_eq!(db.image, "mysql:5.7");
        assert_eq!(db.env["MYSQL_DATABASE"], "wordpress");
        assert_eq!(db.labels["wpa.role"], "db");

        let driver = env.container_spec(&cfg, Role::Driver);
        assert!(driver.env.is_empty());
        assert_eq!(driver.image, "selenium/standalone-chrome:3.141");
    }

    #[test]
    fn download_images_pulls_each_image_once() {
        let mock = Arc::new(MockEngine::new());
        let cfg = config("");
        let mut same = cfg.clone();
        same.driver_image = same.app_image.clone();
        let env = environment(&mock, "imgs", same);
        env.download_images().unwrap();
        assert_eq!(mock.pulled_images(), vec!["mysql:5.7", "wp:latest"]);
    }

    #[test]
    fn build_steps_walk_the_lifecycle() {
        let mock = Arc::new(MockEngine::new());
        let env = environment(&mock, "walk", config(""));
        assert_eq!(env.lifecycle(), LifecycleState::Unprovisioned);
        env.create_network().unwrap();
        assert_eq!(env.lifecycle(), LifecycleState::NetworkReady);
        env.download_images().unwrap();
        env.create_containers(&Role::ALL).unwrap();
        env.start_containers(&Role::ALL).unwrap();
        assert_eq!(env.lifecycle(), LifecycleState::ContainersRunning);
        env.setup_hosts(true, false).unwrap();
        assert_eq!(env.lifecycle(), LifecycleState::HostsConfigured);
        env.setup_database(Duration::from_secs(1)).unwrap();
        assert_eq!(env.lifecycle(), LifecycleState::DataLoaded);
        assert_eq!(env.containers().len(), 3);
    }

    #[test]
    fn setup_hosts_targets_driver_and_app() {
        let mock = Arc::new(MockEngine::new());
        let env = environment(&mock, "hosts", config(""));
        provision(&env);
        let ip = mock.address("hosts-wpa-app").unwrap();

        mock.clear_operations();
        env.setup_hosts(false, true).unwrap();
        let execs: Vec<String> = mock
            .operations()
            .into_iter()
            .filter(|op| op.contains("/etc/hosts"))
            .collect();
        assert_eq!(execs.len(), 1);
        assert!(execs[0].starts_with("exec hosts-wpa-driver"));
        assert!(execs[0].contains(&format!("{ip} wpa.test")));

        mock.clear_operations();
        env.setup_hosts(false, false).unwrap();
        let targets: Vec<String> = mock
            .operations()
            .into_iter()
            .filter(|op| op.contains("/etc/hosts"))
            .collect();
        assert_eq!(targets.len(), 2);
        assert!(targets[1].starts_with("exec hosts-wpa-app"));
    }

    #[test]
    fn quoted_words_survive_the_shell() {
        for value in ["plain", "it's-secret", "a b", "'", "$HOME `x`"] {
            let output = std::process::Command::new("sh")
                .arg("-c")
                .arg(format!("printf %s {}", quote(value)))
                .output()
                .unwrap();
            assert!(output.status.success());
            assert_eq!(String::from_utf8_lossy(&output.stdout), value);
        }
    }

    #[test]
    fn database_scripts_parse_with_quotes_in_credentials() {
        let cfg = config("[database]\nname = \"shop's\"\npassword = \"it's-secret\"\n");
        let mock = Arc::new(MockEngine::new());
        let env = environment(&mock, "quoted", cfg);
        provision(&env);

        let prefix = "exec quoted-wpa-db sh -c ";
        let scripts: Vec<String> = mock
            .operations()
            .into_iter()
            .filter_map(|op| op.strip_prefix(prefix).map(str::to_owned))
            .collect();
        assert!(scripts.iter().any(|s| s.contains("CREATE DATABASE")));
        for script in &scripts {
            assert!(script.contains(r"'-pit'\''s-secret'"), "{script}");
            let check = std::process::Command::new("sh")
                .args(["-n", "-c", script])
                .status()
                .unwrap();
            assert!(check.success(), "sh cannot parse: {script}");
        }
    }

    #[test]
    fn database_wait_times_out() {
        let mock = Arc::new(MockEngine::new());
        let env = environment(&mock, "slowdb", config(""));
        env.create_network().unwrap();
        env.create_containers(&Role::ALL).unwrap();
        env.start_containers(&Role::ALL).unwrap();

        mock.fail_exec_containing("mysqladmin", None);
        let err = env.setup_database(Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, CoreError::Timeout { .. }));
        let pings = mock
            .operations()
            .iter()
            .filter(|op| op.contains("mysqladmin"))
            .count();
        assert!(pings >= 2, "expected repeated pings, got {pings}");
    }

    #[test]
    fn database_wait_retries_until_ready() {
        let mock = Arc::new(MockEngine::new());
        let env = environment(&mock, "retry", config(""));
        env.create_network().unwrap();
        env.create_containers(&Role::ALL).unwrap();
        env.start_containers(&Role::ALL).unwrap();

        mock.fail_exec_containing("mysqladmin", Some(3));
        env.setup_database(Duration::from_secs(5)).unwrap();
        let pings = mock
            .operations()
            .iter()
            .filter(|op| op.contains("mysqladmin"))
            .count();
        assert_eq!(pings, 4);
    }

    #[test]
    fn snapshot_is_copied_then_imported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dump.sql"), "INSERT 1;").unwrap();
        let cfg = parse_config_str(
            "config_version = 1\n[stack]\napp_image = \"wp\"\ndb_image = \"db\"\n\
             [snapshot]\nsource = \"dump.sql\"\n",
        )
        .unwrap()
        .normalize(dir.path())
        .unwrap();

        let mock = Arc::new(MockEngine::new());
        let env = environment(&mock, "snap", cfg);
        provision(&env);
        assert_eq!(
            mock.file("snap-wpa-db", "/wpa/snapshot.sql").unwrap(),
            b"INSERT 1;"
        );
        assert!(mock
            .operations()
            .iter()
            .any(|op| op.contains("< /wpa/snapshot.sql")));
    }

    #[test]
    fn repo_is_copied_into_app_container() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("plugin/.git")).unwrap();
        std::fs::write(dir.path().join("plugin/main.php"), "<?php").unwrap();
        std::fs::write(dir.path().join("plugin/.git/HEAD"), "x").unwrap();
        let cfg = parse_config_str(
            "config_version = 1\n[stack]\napp_image = \"wp\"\ndb_image = \"db\"\n\
             [repo]\npath = \"plugin\"\ncontainer_path = \"/var/www/html/wp-content/plugins/p\"\n\
             exclude = [\".git\"]\n",
        )
        .unwrap()
        .normalize(dir.path())
        .unwrap();

        let mock = Arc::new(MockEngine::new());
        let env = environment(&mock, "repo", cfg);
        provision(&env);
        let app = "repo-wpa-app";
        assert_eq!(
            mock.file(app, "/var/www/html/wp-content/plugins/p/main.php")
                .unwrap(),
            b"<?php"
        );
        assert!(mock
            .file(app, "/var/www/html/wp-content/plugins/p/.git/HEAD")
            .is_none());
    }

    #[test]
    fn meta_is_written_to_app_container() {
        let mock = Arc::new(MockEngine::new());
        let env = environment(&mock, "meta", config(""));
        provision(&env);
        let raw = mock.file("meta-wpa-app", "/wpa-meta.json").unwrap();
        let meta = StackMeta::from_json(&raw).unwrap();
        assert_eq!(meta.env_id, "meta");
        assert_eq!(Some(&meta.fingerprint), env.fingerprint());
        assert!(meta.cacheable);
        assert_eq!(meta.containers[&Role::Driver], "meta-wpa-driver");
        assert_eq!(meta.images[&Role::Database], "mysql:5.7");
    }

    #[test]
    fn failing_script_reports_command() {
        let mock = Arc::new(MockEngine::new());
        let env = environment(
            &mock,
            "scripts",
            config("[scripts]\nbefore = [\"wp plugin activate x\", \"echo after\"]\n"),
        );
        env.create_network().unwrap();
        env.create_containers(&Role::ALL).unwrap();
        env.start_containers(&Role::ALL).unwrap();

        mock.fail_exec_containing("wp plugin activate", Some(1));
        let err = env.run_before_scripts().unwrap_err();
        assert!(matches!(
            &err,
            CoreError::CommandFailed { container, command, code: 1, .. }
                if container == "scripts-wpa-app" && command == "wp plugin activate x"
        ));
        assert!(!mock.operations().iter().any(|op| op.contains("echo after")));
    }

    #[test]
    fn destroy_is_idempotent_and_scoped() {
        let mock = Arc::new(MockEngine::new());
        let env = environment(&mock, "gone", config(""));
        provision(&env);
        mock.seed_container("gone2-wpa-app", "wp", true);
        mock.seed_container("unrelated", "nginx", true);

        env.destroy().unwrap();
        assert_eq!(env.lifecycle(), LifecycleState::Destroyed);
        assert!(env.containers().is_empty());
        assert_eq!(mock.container_names(), vec!["gone2-wpa-app", "unrelated"]);
        assert!(mock.networks().is_empty());

        env.destroy().unwrap();
        assert_eq!(env.lifecycle(), LifecycleState::Destroyed);
    }

    #[test]
    fn detached_environment_can_only_destroy() {
        let mock = Arc::new(MockEngine::new());
        let live = environment(&mock, "other", config(""));
        provision(&live);

        let detached = Environment::detached(mock.clone(), EnvironmentId::parse("other").unwrap());
        assert!(detached.is_detached());
        assert!(matches!(detached.download_images(), Err(CoreError::NotFound(_))));
        detached.destroy().unwrap();
        assert!(mock.container_names().is_empty());
    }

    #[test]
    fn refresh_driver_steps_tolerate_missing_driver() {
        let mock = Arc::new(MockEngine::new());
        let env = environment(&mock, "nodriver", config(""));
        provision(&env);
        mock.remove_container("nodriver-wpa-driver").unwrap();
        env.apply(Step::StopDriver, Strategy::Refresh).unwrap();
        env.apply(Step::RemoveDriver, Strategy::Refresh).unwrap();
        env.apply(Step::CreateDriver, Strategy::Refresh).unwrap();
        env.apply(Step::StartDriver, Strategy::Refresh).unwrap();
        assert!(mock.is_running("nodriver-wpa-driver"));
    }
}
