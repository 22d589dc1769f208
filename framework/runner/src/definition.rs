use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::cli::{ReporterOpt, SurgeScenarioCli};
use crate::config::{RunConfig, RunOptions, DEFAULT_SCHEDULER_TICK};
use crate::context::{RunnerContext, UserValuesConstraint, VuContext};
use crate::init::init;

pub type HookResult = anyhow::Result<()>;

pub type GlobalHookMut<RV> = Arc<dyn Fn(&mut RunnerContext<RV>) -> HookResult + Send + Sync>;
pub type GlobalHook<RV> = Arc<dyn Fn(Arc<RunnerContext<RV>>) -> HookResult + Send + Sync>;
pub type VuHookMut<RV, V> = Arc<dyn Fn(&mut VuContext<RV, V>) -> HookResult + Send + Sync>;

/// The builder for a scenario definition.
///
/// This must be used at the start of a test to define the scenario that you want to run.
pub struct ScenarioDefinitionBuilder<RV: UserValuesConstraint, V: UserValuesConstraint> {
    /// The name of the scenario, which should be unique within the test suite.
    ///
    /// Recommended value is `env!("CARGO_PKG_NAME")`.
    name: String,
    cli: SurgeScenarioCli,
    /// The options this scenario runs with unless the config file or command line override them.
    default_options: RunOptions,
    scheduler_tick: Duration,
    /// Global setup hook for this scenario. It will be run once, before any virtual users are started.
    setup_fn: Option<GlobalHookMut<RV>>,
    /// Setup hook for a virtual user, which will be run once for each virtual user as it starts.
    ///
    /// If it fails, the virtual user exits without running any iterations.
    setup_vu_fn: Option<VuHookMut<RV, V>>,
    /// The behaviour run once per iteration by every virtual user.
    vu_behaviour: Option<VuHookMut<RV, V>>,
    /// Teardown hook for a virtual user, run once it has retired. Best effort.
    teardown_vu_fn: Option<VuHookMut<RV, V>>,
    /// Global teardown hook, run once all virtual users have retired. Best effort.
    teardown_fn: Option<GlobalHook<RV>>,
}

pub(crate) struct ScenarioDefinition<RV: UserValuesConstraint, V: UserValuesConstraint> {
    pub(crate) name: String,
    pub(crate) config: RunConfig,
    pub(crate) base_url: Option<String>,
    pub(crate) no_progress: bool,
    pub(crate) reporter: ReporterOpt,
    pub(crate) summary_file: Option<PathBuf>,
    pub(crate) run_id: Option<String>,
    pub(crate) setup_fn: Option<GlobalHookMut<RV>>,
    pub(crate) hooks: VuHooks<RV, V>,
    pub(crate) teardown_fn: Option<GlobalHook<RV>>,
}

/// The hooks each virtual user runs, shared between their threads.
pub(crate) struct VuHooks<RV: UserValuesConstraint, V: UserValuesConstraint> {
    pub(crate) setup: Option<VuHookMut<RV, V>>,
    pub(crate) behaviour: VuHookMut<RV, V>,
    pub(crate) teardown: Option<VuHookMut<RV, V>>,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> ScenarioDefinitionBuilder<RV, V> {
    /// Initialise a new scenario definition from the scenario name and parsed command line
    /// arguments. See the [ScenarioDefinitionBuilder::name] for more information about the name.
    pub fn new(name: &str, cli: SurgeScenarioCli) -> Self {
        Self {
            name: name.to_string(),
            cli,
            default_options: RunOptions::default(),
            scheduler_tick: DEFAULT_SCHEDULER_TICK,
            setup_fn: None,
            setup_vu_fn: None,
            vu_behaviour: None,
            teardown_vu_fn: None,
            teardown_fn: None,
        }
    }

    /// Like [ScenarioDefinitionBuilder::new], but initialises logging and parses the command
    /// line for you. Use this in a scenario's `main`.
    pub fn new_with_init(name: &str) -> Self {
        Self::new(name, init())
    }

    /// Set the options this scenario runs with when nothing else is configured.
    pub fn with_default_options(mut self, options: RunOptions) -> Self {
        self.default_options = options;
        self
    }

    /// How often the driver compares the number of live virtual users to the target.
    pub fn with_scheduler_tick(mut self, tick: Duration) -> Self {
        self.scheduler_tick = tick;
        self
    }

    /// Set the global setup hook [ScenarioDefinitionBuilder::setup_fn] for this scenario.
    pub fn use_setup(
        mut self,
        setup_fn: impl Fn(&mut RunnerContext<RV>) -> HookResult + Send + Sync + 'static,
    ) -> Self {
        self.setup_fn = Some(Arc::new(setup_fn));
        self
    }

    /// Set the virtual user setup hook [ScenarioDefinitionBuilder::setup_vu_fn] for this scenario.
    pub fn use_vu_setup(
        mut self,
        setup_vu_fn: impl Fn(&mut VuContext<RV, V>) -> HookResult + Send + Sync + 'static,
    ) -> Self {
        self.setup_vu_fn = Some(Arc::new(setup_vu_fn));
        self
    }

    /// Set the behaviour [ScenarioDefinitionBuilder::vu_behaviour] for this scenario.
    pub fn use_vu_behaviour(
        mut self,
        behaviour: impl Fn(&mut VuContext<RV, V>) -> HookResult + Send + Sync + 'static,
    ) -> Self {
        self.vu_behaviour = Some(Arc::new(behaviour));
        self
    }

    /// Set the virtual user teardown hook [ScenarioDefinitionBuilder::teardown_vu_fn] for this scenario.
    pub fn use_vu_teardown(
        mut self,
        teardown_vu_fn: impl Fn(&mut VuContext<RV, V>) -> HookResult + Send + Sync + 'static,
    ) -> Self {
        self.teardown_vu_fn = Some(Arc::new(teardown_vu_fn));
        self
    }

    /// Set the global teardown hook [ScenarioDefinitionBuilder::teardown_fn] for this scenario.
    pub fn use_teardown(
        mut self,
        teardown_fn: impl Fn(Arc<RunnerContext<RV>>) -> HookResult + Send + Sync + 'static,
    ) -> Self {
        self.teardown_fn = Some(Arc::new(teardown_fn));
        self
    }

    /// Resolve the run options, in increasing precedence: scenario defaults, the config file,
    /// command line flags.
    fn resolve_options(&self) -> anyhow::Result<RunOptions> {
        let mut options = self.default_options.clone();
        if let Some(path) = &self.cli.config {
            options = options.merge(RunOptions::from_toml_file(path)?);
        }

        Ok(options.merge(self.cli.run_options()))
    }

    pub(crate) fn build(self) -> anyhow::Result<ScenarioDefinition<RV, V>> {
        let options = self.resolve_options()?;
        log::debug!("Resolved run options for {}: {:?}", self.name, options);

        let config = RunConfig::try_from(options)?.with_scheduler_tick(self.scheduler_tick);
        let behaviour = self
            .vu_behaviour
            .context("No virtual user behaviour has been set for this scenario")?;

        Ok(ScenarioDefinition {
            name: self.name,
            config,
            base_url: self.cli.base_url,
            no_progress: self.cli.no_progress,
            reporter: self.cli.reporter,
            summary_file: self.cli.summary_file,
            run_id: self.cli.run_id,
            setup_fn: self.setup_fn,
            hooks: VuHooks {
                setup: self.setup_vu_fn,
                behaviour,
                teardown: self.teardown_vu_fn,
            },
            teardown_fn: self.teardown_fn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigError, LoadProfile};
    use clap::Parser;
    use std::io::Write;

    fn cli(args: &[&str]) -> SurgeScenarioCli {
        SurgeScenarioCli::try_parse_from(std::iter::once("test").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn defaults_apply_without_overrides() {
        let definition = ScenarioDefinitionBuilder::<(), ()>::new("defaults", cli(&[]))
            .with_default_options(RunOptions::fixed(100, 100))
            .use_vu_behaviour(|_| Ok(()))
            .build()
            .unwrap();

        assert_eq!(
            LoadProfile::Fixed {
                virtual_users: 100,
                iterations: 100
            },
            definition.config.load_profile
        );
    }

    #[test]
    fn command_line_overrides_config_file_and_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "vus = 2\niterations = 4\n[thresholds]\nhttp_req_failed = \"rate<0.5\""
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let definition = ScenarioDefinitionBuilder::<(), ()>::new(
            "precedence",
            cli(&["--config", path.as_str(), "--stage", "1s:3"]),
        )
        .with_default_options(RunOptions::fixed(100, 100))
        .use_vu_behaviour(|_| Ok(()))
        .build()
        .unwrap();

        assert_eq!(
            LoadProfile::Ramping {
                stages: vec![crate::config::Stage {
                    duration: Duration::from_secs(1),
                    target: 3
                }]
            },
            definition.config.load_profile
        );
        assert!(!definition.config.thresholds.is_empty());
    }

    #[test]
    fn config_error_is_returned_before_run() {
        let mut options = RunOptions::stages([("1s", 1)]);
        options.iterations = Some(10);

        let err = ScenarioDefinitionBuilder::<(), ()>::new("conflict", cli(&[]))
            .with_default_options(options)
            .use_vu_behaviour(|_| Ok(()))
            .build()
            .err()
            .unwrap();

        assert_eq!(
            Some(&ConfigError::ConflictingModes),
            err.downcast_ref::<ConfigError>()
        );
    }

    #[test]
    fn behaviour_is_required() {
        let result = ScenarioDefinitionBuilder::<(), ()>::new("no_behaviour", cli(&[]))
            .with_default_options(RunOptions::fixed(1, 1))
            .build();

        assert!(result.is_err());
    }
}
