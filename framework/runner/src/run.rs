use std::sync::Arc;

use anyhow::Context;
use surge_core::prelude::ShutdownHandle;
use surge_instruments::ReportConfig;
use surge_summary_model::{append_run_summary, RunSummary, ThresholdOutcome};

use crate::cli::ReporterOpt;
use crate::config::LoadProfile;
use crate::driver::{IterationTally, WorkloadDriver};
use crate::progress::{start_progress, ProgressPlan};
use crate::schedule::Schedule;
use crate::{
    context::{RunnerContext, UserValuesConstraint},
    definition::ScenarioDefinitionBuilder,
    executor::Executor,
    shutdown::start_shutdown_listener,
};

/// Run a scenario to completion and return its summary.
///
/// An error is returned if the options are invalid or the global setup hook fails, in which case
/// no virtual users are started. Failed iterations and failed thresholds do not make this return
/// an error; inspect the returned [RunSummary] for those.
pub fn run<RV: UserValuesConstraint, V: UserValuesConstraint>(
    definition: ScenarioDefinitionBuilder<RV, V>,
) -> anyhow::Result<RunSummary> {
    let definition = definition.build()?;

    log::info!("Running scenario: {}", definition.name);

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown_handle = start_shutdown_listener(&runtime);
    let executor = Arc::new(Executor::new(runtime));
    let reporter = Arc::new(match definition.reporter {
        ReporterOpt::Summary => ReportConfig::default().enable_summary().init(),
        ReporterOpt::Noop => ReportConfig::default().init(),
    });

    let run_id = definition
        .run_id
        .clone()
        .unwrap_or_else(|| nanoid::nanoid!());
    let started_at = chrono::Utc::now().timestamp();
    let config = definition.config.clone();

    let mut runner_context = RunnerContext::new(
        executor,
        reporter.clone(),
        shutdown_handle.clone(),
        definition.base_url.clone(),
        run_id.clone(),
    );

    if let Some(setup_fn) = &definition.setup_fn {
        setup_fn(&mut runner_context)?;
    }

    let runner_context = Arc::new(runner_context);
    let tally = Arc::new(IterationTally::default());

    let progress_handle = ShutdownHandle::new();
    let progress = if definition.no_progress {
        None
    } else {
        let plan = match &config.load_profile {
            LoadProfile::Fixed { iterations, .. } => ProgressPlan::Iterations(*iterations),
            LoadProfile::Ramping { .. } => {
                let schedule_end = Schedule::from(&config.load_profile)
                    .total_duration()
                    .unwrap_or_default();
                ProgressPlan::Timed(
                    config
                        .max_duration
                        .map_or(schedule_end, |max| max.min(schedule_end)),
                )
            }
        };
        start_progress(plan, tally.clone(), progress_handle.new_listener())
    };

    let outcome = WorkloadDriver::new(
        config.clone(),
        runner_context.clone(),
        definition.hooks,
        shutdown_handle,
        tally,
    )
    .run();

    progress_handle.shutdown();
    if let Some(progress) = progress {
        if progress.join().is_err() {
            log::warn!("Progress thread panicked");
        }
    }

    log::info!(
        "Scenario {} finished after {:?}: {} iterations completed, {} failed, peak of {} virtual users",
        definition.name,
        outcome.duration,
        outcome.completed,
        outcome.failed,
        outcome.peak_vus
    );

    if let Some(teardown_fn) = definition.teardown_fn {
        // Don't crash the runner if the teardown fails. We still want the reporting to happen
        // cleanly. The hook is documented as 'best effort'
        if let Err(e) = teardown_fn(runner_context.clone()) {
            log::error!("Teardown failed: {:?}", e);
        }
    }

    let metrics = reporter.metric_stats(outcome.duration);
    let thresholds = reporter.evaluate_thresholds(&config.thresholds, outcome.duration);
    reporter.finalize(&metrics);
    if definition.reporter == ReporterOpt::Summary {
        print_thresholds(&thresholds);
    }

    let mut summary = RunSummary::new(
        run_id,
        definition.name,
        started_at,
        config.load_profile.summary(),
        config.max_duration.map(|d| d.as_millis() as u64),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    summary.set_iterations(
        outcome.completed,
        outcome.failed,
        outcome.duration.as_millis() as u64,
        outcome.peak_vus,
    );
    summary.set_metrics(metrics);
    summary.set_thresholds(thresholds);

    for failed in summary.thresholds.iter().filter(|t| !t.passed) {
        log::warn!(
            "Threshold `{}` on {} failed, observed {:?}",
            failed.expression,
            failed.metric,
            failed.observed
        );
    }

    if let Some(path) = definition.summary_file {
        append_run_summary(&summary, path.clone())
            .with_context(|| format!("Failed to write run summary to {}", path.display()))?;
    }

    Ok(summary)
}

fn print_thresholds(thresholds: &[ThresholdOutcome]) {
    if thresholds.is_empty() {
        return;
    }

    println!("\nThresholds");
    for threshold in thresholds {
        let observed = threshold
            .observed
            .map_or_else(|| "-".to_string(), |v| format!("{v:.2}"));
        println!(
            "  {} {}: {} (observed {})",
            if threshold.passed { "✓" } else { "✗" },
            threshold.metric,
            threshold.expression,
            observed
        );
    }
}
