use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use surge_runner::prelude::{
    run, ReporterOpt, RunOptions, ScenarioDefinitionBuilder, Schedule, Stage, SurgeScenarioCli,
};
use surge_summary_model::{load_summary_runs, MetricStats};

fn sample_cli_cfg() -> SurgeScenarioCli {
    SurgeScenarioCli {
        base_url: None,
        vus: None,
        iterations: None,
        stages: vec![],
        duration: None,
        config: None,
        no_progress: true,
        reporter: ReporterOpt::Noop,
        summary_file: None,
        run_id: None,
    }
}

/// Tracks how many behaviours are running at once.
#[derive(Default)]
struct InFlight {
    current: AtomicUsize,
    max: AtomicUsize,
    invocations: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[test]
fn fixed_run_executes_exact_iteration_count() {
    let in_flight = Arc::new(InFlight::default());

    let scenario = ScenarioDefinitionBuilder::<(), ()>::new(
        "fixed_run_executes_exact_iteration_count",
        sample_cli_cfg(),
    )
    .with_default_options(RunOptions::fixed(200, 200))
    .use_vu_behaviour({
        let in_flight = in_flight.clone();
        move |_| {
            in_flight.enter();
            std::thread::sleep(Duration::from_millis(1));
            in_flight.exit();
            Ok(())
        }
    });

    let summary = run(scenario).unwrap();

    assert_eq!(200, summary.completed_iterations);
    assert_eq!(0, summary.failed_iterations);
    assert_eq!(200, in_flight.invocations.load(Ordering::SeqCst));
    assert!(in_flight.max.load(Ordering::SeqCst) <= 200);
    assert_eq!(200, summary.peak_vus);
    assert!(matches!(
        summary.metrics.get("iterations"),
        Some(MetricStats::Counter { count: 200, .. })
    ));
}

#[test]
fn failing_behaviour_counts_every_iteration_as_failed() {
    let scenario = ScenarioDefinitionBuilder::<(), ()>::new(
        "failing_behaviour_counts_every_iteration_as_failed",
        sample_cli_cfg(),
    )
    .with_default_options(
        RunOptions::fixed(5, 50).with_threshold("iterations_failed", "rate<0.01"),
    )
    .use_vu_behaviour(|_| Err(anyhow::anyhow!("Service unavailable")));

    let summary = run(scenario).unwrap();

    assert_eq!(0, summary.completed_iterations);
    assert_eq!(50, summary.failed_iterations);
    assert!(!summary.thresholds_passed());
}

#[test]
fn zero_iterations_finishes_without_running_behaviour() {
    let in_flight = Arc::new(InFlight::default());

    let scenario = ScenarioDefinitionBuilder::<(), ()>::new(
        "zero_iterations_finishes_without_running_behaviour",
        sample_cli_cfg(),
    )
    .with_default_options(RunOptions::fixed(3, 0))
    .use_vu_behaviour({
        let in_flight = in_flight.clone();
        move |_| {
            in_flight.enter();
            in_flight.exit();
            Ok(())
        }
    });

    let summary = run(scenario).unwrap();

    assert_eq!(0, summary.total_iterations());
    assert_eq!(0, in_flight.invocations.load(Ordering::SeqCst));
}

#[test]
fn iteration_ids_count_up_per_virtual_user() {
    let seen = Arc::new(Mutex::new(BTreeMap::<usize, Vec<u64>>::new()));

    let scenario = ScenarioDefinitionBuilder::<(), ()>::new(
        "iteration_ids_count_up_per_virtual_user",
        sample_cli_cfg(),
    )
    .with_default_options(RunOptions::fixed(4, 100))
    .use_vu_behaviour({
        let seen = seen.clone();
        move |ctx| {
            seen.lock()
                .entry(ctx.vu_id())
                .or_default()
                .push(ctx.iter_id());
            Ok(())
        }
    });

    let summary = run(scenario).unwrap();
    assert_eq!(100, summary.completed_iterations);

    let seen = seen.lock();
    assert!(seen.keys().all(|vu_id| (1..=4).contains(vu_id)));
    assert_eq!(100, seen.values().map(|iters| iters.len()).sum::<usize>());
    for iters in seen.values() {
        let expected = (0..iters.len() as u64).collect::<Vec<_>>();
        assert_eq!(&expected, iters);
    }
}

#[test]
fn ramp_never_exceeds_stage_targets() {
    let in_flight = Arc::new(InFlight::default());

    let scenario = ScenarioDefinitionBuilder::<(), ()>::new(
        "ramp_never_exceeds_stage_targets",
        sample_cli_cfg(),
    )
    .with_default_options(RunOptions::stages([("300ms", 4), ("300ms", 4), ("200ms", 0)]))
    .with_scheduler_tick(Duration::from_millis(10))
    .use_vu_behaviour({
        let in_flight = in_flight.clone();
        move |_| {
            in_flight.enter();
            std::thread::sleep(Duration::from_millis(5));
            in_flight.exit();
            Ok(())
        }
    });

    let started = Instant::now();
    let summary = run(scenario).unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(summary.peak_vus >= 1);
    assert!(summary.peak_vus <= 4);
    assert!(in_flight.max.load(Ordering::SeqCst) <= 4);
    assert!(summary.completed_iterations > 0);
    assert_eq!(
        summary.total_iterations(),
        in_flight.invocations.load(Ordering::SeqCst) as u64
    );
}

#[test]
fn ramp_follows_interpolated_target() {
    let tick = Duration::from_millis(10);
    let schedule = Schedule::Ramp(vec![Stage {
        duration: Duration::from_millis(500),
        target: 10,
    }]);
    let live = Arc::new(AtomicUsize::new(0));
    let samples = Arc::new(Mutex::new(Vec::<(Duration, usize)>::new()));
    let started = Instant::now();

    let scenario = ScenarioDefinitionBuilder::<(), ()>::new(
        "ramp_follows_interpolated_target",
        sample_cli_cfg(),
    )
    .with_default_options(RunOptions::stages([("500ms", 10)]))
    .with_scheduler_tick(tick)
    .use_vu_setup({
        let live = live.clone();
        move |_| {
            live.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
    .use_vu_behaviour({
        let live = live.clone();
        let samples = samples.clone();
        move |_| {
            let count = live.load(Ordering::SeqCst);
            samples.lock().push((started.elapsed(), count));
            std::thread::sleep(Duration::from_millis(5));
            Ok(())
        }
    })
    .use_vu_teardown({
        let live = live.clone();
        move |_| {
            live.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    });

    let summary = run(scenario).unwrap();

    let samples = samples.lock();
    assert!(!samples.is_empty());
    // The run clock starts after `started`, so the target seen by the driver is never above the
    // target at the sample time. One tick covers the spawn that raced the sample.
    for (elapsed, count) in samples.iter() {
        let allowed = schedule.target_at(*elapsed + tick);
        assert!(
            *count <= allowed,
            "{count} live virtual users at {elapsed:?}, target was {allowed}"
        );
    }
    assert!(samples.iter().any(|(_, count)| *count >= 5));
    assert!(summary.peak_vus <= 10);
}

#[test]
fn vu_ids_are_unique_and_reused() {
    #[derive(Default)]
    struct VuIds {
        live: BTreeSet<usize>,
        seen: BTreeSet<usize>,
        setups: usize,
        duplicates: Vec<usize>,
    }

    let ids = Arc::new(Mutex::new(VuIds::default()));

    let scenario = ScenarioDefinitionBuilder::<(), ()>::new(
        "vu_ids_are_unique_and_reused",
        sample_cli_cfg(),
    )
    .with_default_options(RunOptions::stages([
        ("0s", 4),
        ("200ms", 4),
        ("0s", 1),
        ("200ms", 1),
        ("0s", 4),
        ("200ms", 4),
    ]))
    .with_scheduler_tick(Duration::from_millis(10))
    .use_vu_setup({
        let ids = ids.clone();
        move |ctx| {
            let mut ids = ids.lock();
            ids.setups += 1;
            ids.seen.insert(ctx.vu_id());
            if !ids.live.insert(ctx.vu_id()) {
                ids.duplicates.push(ctx.vu_id());
            }
            Ok(())
        }
    })
    .use_vu_behaviour(|_| {
        std::thread::sleep(Duration::from_millis(5));
        Ok(())
    })
    .use_vu_teardown({
        let ids = ids.clone();
        move |ctx| {
            ids.lock().live.remove(&ctx.vu_id());
            Ok(())
        }
    });

    let summary = run(scenario).unwrap();

    let ids = ids.lock();
    assert!(ids.duplicates.is_empty(), "duplicate ids {:?}", ids.duplicates);
    assert!(ids.live.is_empty());
    // Three users retire in the middle stage and their ids are handed out again.
    assert!(ids.setups > 4);
    assert_eq!(BTreeSet::from([1, 2, 3, 4]), ids.seen);
    assert_eq!(4, summary.peak_vus);
}

#[test]
fn max_duration_caps_a_ramp() {
    let scenario = ScenarioDefinitionBuilder::<(), ()>::new(
        "max_duration_caps_a_ramp",
        sample_cli_cfg(),
    )
    .with_default_options(RunOptions::stages([("1h", 2)]).with_duration("300ms"))
    .with_scheduler_tick(Duration::from_millis(10))
    .use_vu_behaviour(|_| {
        std::thread::sleep(Duration::from_millis(5));
        Ok(())
    });

    let started = Instant::now();
    let summary = run(scenario).unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(Some(300), summary.max_duration_ms);
}

#[test]
fn stop_lets_in_flight_iterations_finish() {
    let in_flight = Arc::new(InFlight::default());

    let scenario = ScenarioDefinitionBuilder::<(), ()>::new(
        "stop_lets_in_flight_iterations_finish",
        sample_cli_cfg(),
    )
    .with_default_options(RunOptions::stages([("10ms", 5), ("1h", 5)]))
    .with_scheduler_tick(Duration::from_millis(10))
    .use_vu_behaviour({
        let in_flight = in_flight.clone();
        move |ctx| {
            in_flight.enter();
            if ctx.iter_id() >= 3 {
                ctx.runner_context().force_stop_scenario();
            }
            std::thread::sleep(Duration::from_millis(20));
            in_flight.exit();
            Ok(())
        }
    });

    let started = Instant::now();
    let summary = run(scenario).unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    // Every behaviour that started was allowed to finish and was counted.
    assert_eq!(0, in_flight.current.load(Ordering::SeqCst));
    assert_eq!(
        summary.total_iterations(),
        in_flight.invocations.load(Ordering::SeqCst) as u64
    );
    assert_eq!(0, summary.failed_iterations);
}

#[test]
fn summary_is_appended_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.jsonl");

    for run_id in ["first", "second"] {
        let mut cli = sample_cli_cfg();
        cli.summary_file = Some(path.clone());
        cli.run_id = Some(run_id.to_string());

        let scenario =
            ScenarioDefinitionBuilder::<(), ()>::new("summary_is_appended_to_file", cli)
                .with_default_options(RunOptions::fixed(1, 3))
                .use_vu_behaviour(|ctx| {
                    ctx.check("always", true);
                    Ok(())
                });
        run(scenario).unwrap();
    }

    let runs = load_summary_runs(path).unwrap();

    assert_eq!(2, runs.len());
    assert_eq!("first", runs[0].run_id);
    assert_eq!("second", runs[1].run_id);
    assert_eq!(3, runs[1].completed_iterations);
    assert!(matches!(
        runs[1].metrics.get("checks"),
        Some(MetricStats::Rate { passes: 3, fails: 0, .. })
    ));
}
