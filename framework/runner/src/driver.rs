use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use surge_core::prelude::{
    panic_message, DelegatedShutdownListener, IterationResult, ScenarioError, ShutdownHandle,
};

use crate::config::{LoadProfile, RunConfig};
use crate::context::{RunnerContext, UserValuesConstraint, VuContext};
use crate::definition::{HookResult, VuHooks};
use crate::permits::IterationPermits;
use crate::schedule::Schedule;

/// Counts of finished iterations, shared by every virtual user in the run.
#[derive(Debug, Default)]
pub(crate) struct IterationTally {
    completed: AtomicU64,
    failed: AtomicU64,
}

impl IterationTally {
    fn record(&self, iteration: &IterationResult) {
        if iteration.is_success() {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub(crate) fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DriverOutcome {
    pub(crate) completed: u64,
    pub(crate) failed: u64,
    pub(crate) duration: Duration,
    pub(crate) peak_vus: usize,
}

/// A virtual user thread that has been started and not yet joined.
struct LiveVu {
    vu_id: usize,
    retire: ShutdownHandle,
    handle: JoinHandle<()>,
}

/// Starts and retires virtual users so that the number alive follows the load profile.
pub(crate) struct WorkloadDriver<RV: UserValuesConstraint, V: UserValuesConstraint> {
    config: RunConfig,
    runner_context: Arc<RunnerContext<RV>>,
    hooks: Arc<VuHooks<RV, V>>,
    stop: ShutdownHandle,
    tally: Arc<IterationTally>,
    permits: Arc<IterationPermits>,
    live: Vec<LiveVu>,
    free_ids: BTreeSet<usize>,
    next_id: usize,
    peak_vus: usize,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> WorkloadDriver<RV, V> {
    pub(crate) fn new(
        config: RunConfig,
        runner_context: Arc<RunnerContext<RV>>,
        hooks: VuHooks<RV, V>,
        stop: ShutdownHandle,
        tally: Arc<IterationTally>,
    ) -> Self {
        let permits = match &config.load_profile {
            LoadProfile::Fixed { iterations, .. } => IterationPermits::bounded(*iterations),
            LoadProfile::Ramping { .. } => IterationPermits::unbounded(),
        };

        Self {
            config,
            runner_context,
            hooks: Arc::new(hooks),
            stop,
            tally,
            permits: Arc::new(permits),
            live: Vec::new(),
            free_ids: BTreeSet::new(),
            next_id: 1,
            peak_vus: 0,
        }
    }

    /// Drive the run to completion. Blocks until every virtual user has retired.
    pub(crate) fn run(mut self) -> DriverOutcome {
        let schedule = Schedule::from(&self.config.load_profile);
        let deadline = match (schedule.total_duration(), self.config.max_duration) {
            (Some(schedule_end), Some(max)) => Some(schedule_end.min(max)),
            (schedule_end, max) => schedule_end.or(max),
        };
        log::debug!(
            "Driving {:?} until {:?}, peak target {}",
            schedule,
            deadline,
            schedule.peak_target()
        );

        let start = Instant::now();
        let fixed = matches!(self.config.load_profile, LoadProfile::Fixed { .. });
        if fixed {
            let target = schedule.target_at(Duration::ZERO);
            self.spawn_virtual_users(target);
        }

        loop {
            self.reap_finished();

            if self.stop.is_shutdown() {
                log::info!("Stop requested, retiring {} virtual users", self.live.len());
                break;
            }

            let elapsed = start.elapsed();
            if deadline.is_some_and(|deadline| elapsed >= deadline) {
                log::debug!("Run deadline reached after {:?}", elapsed);
                break;
            }

            if fixed {
                // Virtual users in a fixed run exit once the iteration pool is empty and are
                // never replaced.
                if self.live.is_empty() {
                    break;
                }
            } else {
                let target = schedule.target_at(elapsed);
                self.retire_above(target);
                // Retiring users still count as live, so they are not replaced until they exit.
                let missing = target.saturating_sub(self.live.len());
                self.spawn_virtual_users(missing);
            }

            std::thread::sleep(self.config.scheduler_tick);
        }

        for vu in &self.live {
            vu.retire.shutdown();
        }
        for vu in self.live.drain(..) {
            join_virtual_user(vu);
        }

        DriverOutcome {
            completed: self.tally.completed(),
            failed: self.tally.failed(),
            duration: start.elapsed(),
            peak_vus: self.peak_vus,
        }
    }

    fn reap_finished(&mut self) {
        let (finished, live): (Vec<_>, Vec<_>) =
            self.live.drain(..).partition(|vu| vu.handle.is_finished());
        self.live = live;

        for vu in finished {
            self.free_ids.insert(vu.vu_id);
            join_virtual_user(vu);
        }
    }

    /// Ask the most recently started virtual users to retire until no more than `target` remain
    /// that have not been asked.
    fn retire_above(&mut self, target: usize) {
        let active = self
            .live
            .iter()
            .filter(|vu| !vu.retire.is_shutdown())
            .count();
        if active <= target {
            return;
        }

        self.live
            .iter()
            .rev()
            .filter(|vu| !vu.retire.is_shutdown())
            .take(active - target)
            .for_each(|vu| {
                log::trace!("Retiring virtual user {}", vu.vu_id);
                vu.retire.shutdown();
            });
    }

    fn spawn_virtual_users(&mut self, count: usize) {
        for _ in 0..count {
            let vu_id = self.take_vu_id();
            let retire = ShutdownHandle::new();

            let runner_context = self.runner_context.clone();
            let hooks = self.hooks.clone();
            let permits = self.permits.clone();
            let tally = self.tally.clone();
            let retire_listener = retire.new_listener();
            let stop_listener = self.stop.new_listener();

            let spawned = std::thread::Builder::new()
                .name(format!("vu-{vu_id}"))
                .spawn(move || {
                    run_virtual_user(
                        VuContext::new(vu_id, runner_context, retire_listener),
                        &hooks,
                        &permits,
                        &tally,
                        stop_listener,
                    )
                });

            match spawned {
                Ok(handle) => self.live.push(LiveVu {
                    vu_id,
                    retire,
                    handle,
                }),
                Err(e) => {
                    log::error!("Failed to start thread for virtual user {vu_id}: {e:?}");
                    self.free_ids.insert(vu_id);
                    break;
                }
            }
        }

        self.peak_vus = self.peak_vus.max(self.live.len());
    }

    /// The smallest id not held by a live virtual user.
    fn take_vu_id(&mut self) -> usize {
        self.free_ids.pop_first().unwrap_or_else(|| {
            let id = self.next_id;
            self.next_id += 1;
            id
        })
    }
}

fn join_virtual_user(vu: LiveVu) {
    if let Err(e) = vu.handle.join() {
        log::error!("Thread for virtual user {} panicked: {:?}", vu.vu_id, e);
    }
}

fn run_virtual_user<RV: UserValuesConstraint, V: UserValuesConstraint>(
    mut context: VuContext<RV, V>,
    hooks: &VuHooks<RV, V>,
    permits: &IterationPermits,
    tally: &IterationTally,
    stop_listener: DelegatedShutdownListener,
) {
    let vu_id = context.vu_id();

    if let Some(setup) = &hooks.setup {
        if let Err(e) = run_hook(|| setup(&mut context)) {
            log::error!("Setup failed for virtual user {vu_id}: {e:?}");
            return;
        }
    }

    let reporter = context.runner_context().reporter();
    loop {
        if context.shutdown_listener().should_shutdown() || stop_listener.should_shutdown() {
            log::debug!("Retiring virtual user {vu_id}");
            break;
        }
        if !permits.try_claim() {
            log::debug!("No iterations left for virtual user {vu_id}");
            break;
        }

        let iter_id = context.iter_id();
        let started = Instant::now();
        let outcome = match catch_unwind(AssertUnwindSafe(|| (hooks.behaviour)(&mut context))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ScenarioError::new(vu_id, iter_id, format!("{e:#}"))),
            Err(payload) => Err(ScenarioError::from_panic(vu_id, iter_id, payload.as_ref())),
        };
        if let Err(e) = &outcome {
            log::warn!("{e}");
        }

        let iteration = IterationResult {
            vu_id,
            iter_id,
            duration: started.elapsed(),
            outcome,
            checks: context.take_checks(),
        };
        tally.record(&iteration);
        reporter.add_iteration(&iteration);

        context.advance_iteration();
    }

    if let Some(teardown) = &hooks.teardown {
        if let Err(e) = run_hook(|| teardown(&mut context)) {
            log::error!("Teardown failed for virtual user {vu_id}: {e:?}");
        }
    }
}

/// Run a hook, turning a panic into an error.
fn run_hook(hook: impl FnOnce() -> HookResult) -> HookResult {
    catch_unwind(AssertUnwindSafe(hook))
        .unwrap_or_else(|payload| Err(anyhow::anyhow!(panic_message(payload.as_ref()))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use surge_core::prelude::CheckResult;

    fn iteration(outcome: Result<(), ScenarioError>) -> IterationResult {
        IterationResult {
            vu_id: 1,
            iter_id: 0,
            duration: Duration::from_millis(1),
            outcome,
            checks: vec![CheckResult {
                name: "ok".to_string(),
                passed: true,
            }],
        }
    }

    #[test]
    fn tally_counts_by_outcome() {
        let tally = IterationTally::default();
        tally.record(&iteration(Ok(())));
        tally.record(&iteration(Ok(())));
        tally.record(&iteration(Err(ScenarioError::new(1, 0, "bad"))));

        assert_eq!(2, tally.completed());
        assert_eq!(1, tally.failed());
    }

    #[test]
    fn hook_panic_becomes_error() {
        let result = run_hook(|| panic!("setup exploded"));

        assert_eq!("panicked: setup exploded", result.unwrap_err().to_string());
    }

    #[test]
    fn hook_error_is_passed_through() {
        let result = run_hook(|| anyhow::bail!("no account"));

        assert_eq!("no account", result.unwrap_err().to_string());
    }
}
