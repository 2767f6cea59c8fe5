use crate::cache::lookup_cached;
use crate::concurrency::{install_signal_handler, shutdown_requested};
use crate::environment::{Environment, EnvironmentOptions};
use crate::pipeline::{choose_strategy, run_pipeline, CacheFlags, Step, StepRunner, Strategy};
use crate::settings::OrchestratorSettings;
use crate::CoreError;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, Once, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};
use wpa_engine::ContainerEngine;
use wpa_schema::{compute_fingerprint, parse_container_name, EnvironmentId, NormalizedConfig};

/// Caller choices for one [`Orchestrator::create`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Reuse a matching cached stack, and make the result reusable.
    pub cache_environment: bool,
    /// Build from scratch even when a cached stack matches.
    pub skip_cache: bool,
    /// Use this id instead of a generated one. With caching enabled, only a
    /// cached stack with this id can be reused.
    pub environment_id: Option<EnvironmentId>,
    /// Overrides the suite's database wait threshold.
    pub db_wait_seconds: Option<u64>,
}

impl CreateOptions {
    pub fn flags(&self) -> CacheFlags {
        CacheFlags {
            cache_environment: self.cache_environment,
            skip_cache: self.skip_cache,
        }
    }
}

#[derive(Default)]
struct Registry {
    /// Live environments in creation order.
    environments: Vec<Arc<Environment>>,
    closed: bool,
}

/// Registry of the environments this process provisioned, and the entry
/// point for creating and destroying them.
///
/// Shared by `Arc`. Environments still registered when the orchestrator
/// shuts down (explicitly, on Ctrl-C, or on drop) are destroyed.
pub struct Orchestrator {
    engine: Arc<dyn ContainerEngine>,
    settings: OrchestratorSettings,
    registry: Mutex<Registry>,
    signal_hook: Once,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn ContainerEngine>, settings: OrchestratorSettings) -> Arc<Self> {
        Arc::new(Self {
            engine,
            settings,
            registry: Mutex::new(Registry::default()),
            signal_hook: Once::new(),
        })
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether [`Orchestrator::shutdown`] has run.
    pub fn is_closed(&self) -> bool {
        self.registry().closed
    }

    /// Provision an environment for `config`.
    ///
    /// Reuses a cached stack when caching is enabled and one matches,
    /// replacing only its driver container; otherwise builds everything.
    /// The first failing step aborts the pipeline and is reported as
    /// [`CoreError::StepFailed`]. Nothing is rolled back: a partially built
    /// environment stays registered and is reclaimed by `destroy`,
    /// `destroy_all` or shutdown.
    pub fn create(
        self: &Arc<Self>,
        config: NormalizedConfig,
        options: CreateOptions,
    ) -> Result<Arc<Environment>, CoreError> {
        if self.is_closed() || shutdown_requested() {
            return Err(CoreError::ShuttingDown);
        }
        if self.settings.install_signal_handler {
            self.signal_hook
                .call_once(|| install_signal_handler(Arc::downgrade(self)));
        }

        let flags = options.flags();
        let fingerprint = compute_fingerprint(&config)?;
        let cached = if flags.cache_environment {
            lookup_cached(
                self.engine.as_ref(),
                &fingerprint,
                options.environment_id.as_ref(),
            )?
        } else {
            None
        };
        let strategy = choose_strategy(flags, cached.as_ref());

        let id = match (&cached, strategy) {
            (Some(hit), Strategy::Refresh) => hit.env_id.clone(),
            (Some(hit), Strategy::Build) => {
                info!("ignoring cached environment {} (cache skipped)", hit.env_id);
                options
                    .environment_id
                    .clone()
                    .unwrap_or_else(EnvironmentId::generate)
            }
            (None, _) => options
                .environment_id
                .clone()
                .unwrap_or_else(EnvironmentId::generate),
        };

        if strategy == Strategy::Build && self.find(&id).is_some() {
            return Err(CoreError::DuplicateEnvironment(id.to_string()));
        }

        let db_wait = options
            .db_wait_seconds
            .or(config.db_wait_seconds)
            .unwrap_or(self.settings.default_db_wait_seconds);
        let env = Arc::new(Environment::new(
            Arc::clone(&self.engine),
            id,
            config,
            fingerprint,
            EnvironmentOptions {
                cache_eligible: flags.cache_eligible(),
                db_wait: Duration::from_secs(db_wait),
                poll_interval: self.settings.poll_interval(),
            },
        ));
        info!(
            "provisioning environment {} ({strategy}, fingerprint {})",
            env.id(),
            env.fingerprint().map_or("-", |f| f.short())
        );

        if let (Some(hit), Strategy::Refresh) = (&cached, strategy) {
            env.adopt_cached(hit)?;
        }
        if strategy.registers_after().is_none() {
            self.register(&env, strategy)?;
        }

        let mut run = ProvisionRun {
            orchestrator: self,
            env: &env,
            strategy,
        };
        let report = run_pipeline(strategy, &mut run).inspect_err(|e| {
            warn!("provisioning {} failed: {e}", env.id());
        })?;
        env.mark_ready(report)?;
        Ok(env)
    }

    fn register(&self, env: &Arc<Environment>, strategy: Strategy) -> Result<(), CoreError> {
        let mut registry = self.registry();
        if registry.closed {
            drop(registry);
            warn!("shut down while provisioning {}, destroying it", env.id());
            if let Err(e) = env.destroy() {
                warn!("failed to destroy {}: {e}", env.id());
            }
            return Err(CoreError::ShuttingDown);
        }

        match registry
            .environments
            .iter()
            .position(|e| e.id() == env.id())
        {
            Some(pos) if strategy == Strategy::Refresh => {
                debug!("replacing registered environment {}", env.id());
                registry.environments[pos] = Arc::clone(env);
            }
            Some(_) => return Err(CoreError::DuplicateEnvironment(env.id().to_string())),
            None => {
                debug!("registered environment {}", env.id());
                registry.environments.push(Arc::clone(env));
            }
        }
        Ok(())
    }

    /// The `index`-th registered environment, in creation order.
    pub fn get(&self, index: usize) -> Result<Arc<Environment>, CoreError> {
        self.registry()
            .environments
            .get(index)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("no environment at index {index}")))
    }

    pub fn find(&self, id: &EnvironmentId) -> Option<Arc<Environment>> {
        self.registry()
            .environments
            .iter()
            .find(|e| e.id() == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.registry().environments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry().environments.is_empty()
    }

    /// Snapshot of the registry in creation order.
    pub fn environments(&self) -> Vec<Arc<Environment>> {
        self.registry().environments.clone()
    }

    /// Destroy the environment with `id`, whether or not this process
    /// created it. Succeeds when nothing is left to destroy.
    pub fn destroy(&self, id: &EnvironmentId) -> Result<(), CoreError> {
        let env = self.find(id).unwrap_or_else(|| {
            Arc::new(Environment::detached(Arc::clone(&self.engine), id.clone()))
        });
        env.destroy()?;
        self.registry()
            .environments
            .retain(|e| !Arc::ptr_eq(e, &env));
        Ok(())
    }

    /// Destroy every environment that has containers following the naming
    /// convention, whichever process created it. Returns the ids destroyed.
    pub fn destroy_all(&self) -> Result<Vec<EnvironmentId>, CoreError> {
        let ids: BTreeSet<EnvironmentId> = self
            .engine
            .list_containers()?
            .iter()
            .filter_map(|c| parse_container_name(&c.name))
            .map(|parsed| parsed.env_id)
            .collect();
        if ids.is_empty() {
            debug!("no managed containers found");
        }

        let mut first_error = None;
        for id in &ids {
            if let Err(e) = self.destroy(id) {
                warn!("failed to destroy {id}: {e}");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(ids.into_iter().collect()),
        }
    }

    /// Remove `id` from the registry without destroying it, so it outlives
    /// this orchestrator.
    pub fn release(&self, id: &EnvironmentId) -> Option<Arc<Environment>> {
        let mut registry = self.registry();
        let pos = registry.environments.iter().position(|e| e.id() == id)?;
        Some(registry.environments.remove(pos))
    }

    /// Destroy every registered environment in creation order and refuse
    /// further registrations. Runs at most once; later calls return 0.
    /// Returns the number of environments destroyed.
    pub fn shutdown(&self) -> usize {
        let environments = {
            let mut registry = self.registry();
            if registry.closed {
                return 0;
            }
            registry.closed = true;
            std::mem::take(&mut registry.environments)
        };

        let mut destroyed = 0;
        for env in environments {
            if self.settings.preserve_cached_on_shutdown && env.cache_eligible() {
                info!("keeping cached environment {}", env.id());
                continue;
            }
            match env.destroy() {
                Ok(()) => destroyed += 1,
                Err(e) => warn!("failed to destroy {} during shutdown: {e}", env.id()),
            }
        }
        destroyed
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        let destroyed = self.shutdown();
        if destroyed > 0 {
            debug!("destroyed {destroyed} environment(s) on drop");
        }
    }
}

struct ProvisionRun<'a> {
    orchestrator: &'a Orchestrator,
    env: &'a Arc<Environment>,
    strategy: Strategy,
}

impl StepRunner for ProvisionRun<'_> {
    fn run_step(&mut self, step: Step) -> Result<(), CoreError> {
        self.env.apply(step, self.strategy)
    }

    fn step_completed(&mut self, step: Step) -> Result<(), CoreError> {
        if self.strategy.registers_after() == Some(step) {
            self.orchestrator.register(self.env, self.strategy)?;
        }
        Ok(())
    }

    fn cancelled(&self) -> bool {
        shutdown_requested() || self.orchestrator.is_closed()
    }
}
