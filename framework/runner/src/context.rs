use std::{fmt::Debug, sync::Arc};

use surge_core::prelude::{CheckResult, DelegatedShutdownListener, ShutdownHandle};
use surge_instruments::Reporter;

use crate::executor::Executor;

pub trait UserValuesConstraint: Default + Debug + Send + Sync + 'static {}

impl UserValuesConstraint for () {}

/// State shared by every virtual user in a run.
///
/// The global setup hook gets mutable access to it, after which it is shared read-only.
#[derive(Debug)]
pub struct RunnerContext<RV: UserValuesConstraint> {
    executor: Arc<Executor>,
    reporter: Arc<Reporter>,
    shutdown_handle: ShutdownHandle,
    base_url: Option<String>,
    run_id: String,
    value: RV,
}

impl<RV: UserValuesConstraint> RunnerContext<RV> {
    pub(crate) fn new(
        executor: Arc<Executor>,
        reporter: Arc<Reporter>,
        shutdown_handle: ShutdownHandle,
        base_url: Option<String>,
        run_id: String,
    ) -> Self {
        Self {
            executor,
            reporter,
            shutdown_handle,
            base_url,
            run_id,
            value: Default::default(),
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn reporter(&self) -> Arc<Reporter> {
        self.reporter.clone()
    }

    /// The base URL of the service under test, if one was given on the command line.
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Ask every virtual user to retire after its current iteration. The run finishes once they
    /// all have.
    pub fn force_stop_scenario(&self) {
        log::info!("Stop requested for run {}", self.run_id);
        self.shutdown_handle.shutdown();
    }

    pub fn get_mut(&mut self) -> &mut RV {
        &mut self.value
    }

    pub fn get(&self) -> &RV {
        &self.value
    }
}

/// The context of one virtual user, passed to its hooks.
///
/// The `vu_id` is unique among live virtual users and may be given to a new virtual user once
/// this one has retired. The `iter_id` counts this virtual user's iterations from zero.
pub struct VuContext<RV: UserValuesConstraint, V: UserValuesConstraint> {
    vu_id: usize,
    iter_id: u64,
    runner_context: Arc<RunnerContext<RV>>,
    shutdown_listener: DelegatedShutdownListener,
    checks: Vec<CheckResult>,
    value: V,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> VuContext<RV, V> {
    pub(crate) fn new(
        vu_id: usize,
        runner_context: Arc<RunnerContext<RV>>,
        shutdown_listener: DelegatedShutdownListener,
    ) -> Self {
        Self {
            vu_id,
            iter_id: 0,
            runner_context,
            shutdown_listener,
            checks: Vec::new(),
            value: Default::default(),
        }
    }

    pub fn vu_id(&self) -> usize {
        self.vu_id
    }

    pub fn iter_id(&self) -> u64 {
        self.iter_id
    }

    pub fn runner_context(&self) -> &Arc<RunnerContext<RV>> {
        &self.runner_context
    }

    /// Lets a behaviour notice that the run is stopping, for example to cut a long wait short.
    pub fn shutdown_listener(&mut self) -> &mut DelegatedShutdownListener {
        &mut self.shutdown_listener
    }

    /// Record a named assertion for the current iteration and return its outcome.
    pub fn check(&mut self, name: &str, passed: bool) -> bool {
        if !passed {
            log::debug!(
                "Check `{name}` failed for virtual user {} on iteration {}",
                self.vu_id,
                self.iter_id
            );
        }
        self.checks.push(CheckResult {
            name: name.to_string(),
            passed,
        });
        passed
    }

    pub(crate) fn take_checks(&mut self) -> Vec<CheckResult> {
        std::mem::take(&mut self.checks)
    }

    pub(crate) fn advance_iteration(&mut self) {
        self.iter_id += 1;
    }

    pub fn get_mut(&mut self) -> &mut V {
        &mut self.value
    }

    pub fn get(&self) -> &V {
        &self.value
    }
}
