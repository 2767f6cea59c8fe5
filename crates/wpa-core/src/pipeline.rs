//! Ordered provisioning steps and the cache-or-build decision.

use crate::cache::CachedStack;
use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// One named provisioning step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    CreateNetwork,
    DownloadImages,
    CreateContainers,
    StartContainers,
    PullSnapshot,
    SetupHosts,
    SetupDatabase,
    InsertRepo,
    WriteMeta,
    RunBeforeScripts,
    StopDriver,
    RemoveDriver,
    CreateDriver,
    StartDriver,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::CreateNetwork => "create-network",
            Step::DownloadImages => "download-images",
            Step::CreateContainers => "create-containers",
            Step::StartContainers => "start-containers",
            Step::PullSnapshot => "pull-snapshot",
            Step::SetupHosts => "setup-hosts",
            Step::SetupDatabase => "setup-database",
            Step::InsertRepo => "insert-repo",
            Step::WriteMeta => "write-meta",
            Step::RunBeforeScripts => "run-before-scripts",
            Step::StopDriver => "stop-driver",
            Step::RemoveDriver => "remove-driver",
            Step::CreateDriver => "create-driver",
            Step::StartDriver => "start-driver",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const REFRESH_STEPS: &[Step] = &[
    Step::StopDriver,
    Step::RemoveDriver,
    Step::CreateDriver,
    Step::StartDriver,
    Step::SetupHosts,
    Step::InsertRepo,
    Step::SetupDatabase,
    Step::RunBeforeScripts,
];

const BUILD_STEPS: &[Step] = &[
    Step::CreateNetwork,
    Step::DownloadImages,
    Step::CreateContainers,
    Step::StartContainers,
    Step::PullSnapshot,
    Step::SetupHosts,
    Step::SetupDatabase,
    Step::InsertRepo,
    Step::WriteMeta,
    Step::RunBeforeScripts,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Reuse a cached stack, replacing only the driver container.
    Refresh,
    /// Provision everything from scratch.
    Build,
}

impl Strategy {
    pub fn steps(self) -> &'static [Step] {
        match self {
            Strategy::Refresh => REFRESH_STEPS,
            Strategy::Build => BUILD_STEPS,
        }
    }

    /// The step after which the environment joins the registry. `None`
    /// means before the first step.
    pub fn registers_after(self) -> Option<Step> {
        match self {
            Strategy::Refresh => None,
            Strategy::Build => Some(Step::CreateNetwork),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::Refresh => "refresh",
            Strategy::Build => "build",
        })
    }
}

/// Caller-controlled caching switches for one `create`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheFlags {
    /// Allow reusing a cached stack and mark the result as reusable.
    pub cache_environment: bool,
    /// Ignore any cached stack for this call.
    pub skip_cache: bool,
}

impl CacheFlags {
    /// Whether the environment built by this call may be reused later.
    pub fn cache_eligible(self) -> bool {
        self.cache_environment && !self.skip_cache
    }
}

pub fn choose_strategy(flags: CacheFlags, cached: Option<&CachedStack>) -> Strategy {
    match cached {
        Some(_) if flags.cache_environment && !flags.skip_cache => Strategy::Refresh,
        _ => Strategy::Build,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionReport {
    pub strategy: Strategy,
    pub completed: Vec<Step>,
}

/// Executes the steps of a pipeline on behalf of [`run_pipeline`].
pub trait StepRunner {
    fn run_step(&mut self, step: Step) -> Result<(), CoreError>;

    /// Called after `step` succeeded. An error here aborts the pipeline as is,
    /// without being attributed to the step.
    fn step_completed(&mut self, _step: Step) -> Result<(), CoreError> {
        Ok(())
    }

    /// Checked before every step.
    fn cancelled(&self) -> bool {
        false
    }
}

/// Run every step of `strategy` in order, stopping at the first failure.
///
/// Nothing is undone on failure; the caller decides what to clean up.
pub fn run_pipeline(
    strategy: Strategy,
    runner: &mut impl StepRunner,
) -> Result<ProvisionReport, CoreError> {
    let steps = strategy.steps();
    let mut completed = Vec::with_capacity(steps.len());
    for (n, &step) in steps.iter().enumerate() {
        if runner.cancelled() {
            return Err(CoreError::ShuttingDown);
        }
        info!("[{strategy} {}/{}] {step}", n + 1, steps.len());
        runner
            .run_step(step)
            .map_err(|e| CoreError::StepFailed {
                step,
                source: Box::new(e),
            })?;
        completed.push(step);
        runner.step_completed(step)?;
    }
    Ok(ProvisionReport {
        strategy,
        completed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use wpa_schema::{EnvironmentId, Fingerprint, StackMeta};

    #[derive(Default)]
    struct Recorder {
        ran: Vec<Step>,
        completed: Vec<Step>,
        fail_at: Option<Step>,
        cancel_after: Option<usize>,
    }

    impl StepRunner for Recorder {
        fn run_step(&mut self, step: Step) -> Result<(), CoreError> {
            self.ran.push(step);
            if self.fail_at == Some(step) {
                return Err(CoreError::NotFound("boom".to_owned()));
            }
            Ok(())
        }

        fn step_completed(&mut self, step: Step) -> Result<(), CoreError> {
            self.completed.push(step);
            Ok(())
        }

        fn cancelled(&self) -> bool {
            self.cancel_after.is_some_and(|n| self.ran.len() >= n)
        }
    }

    fn cached() -> CachedStack {
        let id = EnvironmentId::parse("cached").unwrap();
        CachedStack {
            env_id: id.clone(),
            meta: StackMeta {
                env_id: id,
                fingerprint: Fingerprint::new("f".repeat(64)),
                cacheable: true,
                created_at: String::new(),
                network: "cached-wpa-network".to_owned(),
                containers: BTreeMap::new(),
                images: BTreeMap::new(),
            },
            containers: BTreeMap::new(),
        }
    }

    #[test]
    fn strategy_decision_table() {
        let hit = cached();
        let flags = |cache_environment, skip_cache| CacheFlags {
            cache_environment,
            skip_cache,
        };
        assert_eq!(choose_strategy(flags(true, false), Some(&hit)), Strategy::Refresh);
        assert_eq!(choose_strategy(flags(true, true), Some(&hit)), Strategy::Build);
        assert_eq!(choose_strategy(flags(false, false), Some(&hit)), Strategy::Build);
        assert_eq!(choose_strategy(flags(true, false), None), Strategy::Build);
    }

    #[test]
    fn cache_eligibility_requires_cache_without_skip() {
        assert!(CacheFlags {
            cache_environment: true,
            skip_cache: false
        }
        .cache_eligible());
        assert!(!CacheFlags {
            cache_environment: true,
            skip_cache: true
        }
        .cache_eligible());
        assert!(!CacheFlags::default().cache_eligible());
    }

    #[test]
    fn build_order_matches_provisioning_sequence() {
        let names: Vec<&str> = Strategy::Build.steps().iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            [
                "create-network",
                "download-images",
                "create-containers",
                "start-containers",
                "pull-snapshot",
                "setup-hosts",
                "setup-database",
                "insert-repo",
                "write-meta",
                "run-before-scripts",
            ]
        );
        assert_eq!(Strategy::Build.registers_after(), Some(Step::CreateNetwork));
        assert_eq!(Strategy::Refresh.registers_after(), None);
    }

    #[test]
    fn refresh_touches_only_the_driver() {
        let steps = Strategy::Refresh.steps();
        assert!(!steps.contains(&Step::CreateNetwork));
        assert!(!steps.contains(&Step::CreateContainers));
        assert!(!steps.contains(&Step::StartContainers));
        assert!(!steps.contains(&Step::WriteMeta));
        assert_eq!(steps[..4], [
            Step::StopDriver,
            Step::RemoveDriver,
            Step::CreateDriver,
            Step::StartDriver
        ]);
    }

    #[test]
    fn runs_all_steps_in_order() {
        let mut rec = Recorder::default();
        let report = run_pipeline(Strategy::Build, &mut rec).unwrap();
        assert_eq!(report.strategy, Strategy::Build);
        assert_eq!(report.completed, Strategy::Build.steps());
        assert_eq!(rec.completed, Strategy::Build.steps());
    }

    #[test]
    fn stops_at_first_failure() {
        let mut rec = Recorder {
            fail_at: Some(Step::StartContainers),
            ..Recorder::default()
        };
        let err = run_pipeline(Strategy::Build, &mut rec).unwrap_err();
        assert_eq!(err.failed_step(), Some(Step::StartContainers));
        assert_eq!(rec.ran.last(), Some(&Step::StartContainers));
        assert_eq!(rec.ran.len(), 4);
        assert!(!rec.completed.contains(&Step::StartContainers));
    }

    #[test]
    fn cancellation_is_checked_between_steps() {
        let mut rec = Recorder {
            cancel_after: Some(2),
            ..Recorder::default()
        };
        let err = run_pipeline(Strategy::Refresh, &mut rec).unwrap_err();
        assert!(matches!(err, CoreError::ShuttingDown));
        assert_eq!(rec.ran, [Step::StopDriver, Step::RemoveDriver]);
    }

    #[test]
    fn steps_serialize_kebab_case() {
        let json = serde_json::to_string(&Step::RunBeforeScripts).unwrap();
        assert_eq!(json, "\"run-before-scripts\"");
        assert_eq!(Step::SetupHosts.to_string(), "setup-hosts");
    }
}
