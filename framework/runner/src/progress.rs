use std::cmp::min;
use std::fmt::Write;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use surge_core::prelude::DelegatedShutdownListener;

use crate::driver::IterationTally;

/// What the progress bar measures the run against.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ProgressPlan {
    /// A run with a known end time.
    Timed(Duration),
    /// A fixed run, measured by finished iterations.
    Iterations(u64),
}

/// Displays a progress bar while the run is going to show the user how much is left.
///
/// The bar is cleared once the listener observes shutdown. Join the returned handle to make sure
/// it has been cleared before printing anything else.
pub(crate) fn start_progress(
    plan: ProgressPlan,
    tally: Arc<IterationTally>,
    shutdown_listener: DelegatedShutdownListener,
) -> Option<JoinHandle<()>> {
    let spawned = std::thread::Builder::new()
        .name("progress".to_string())
        .spawn(move || {
            let start_time = Instant::now();
            let pb = match plan {
                ProgressPlan::Timed(planned_runtime) => timed_bar(planned_runtime),
                ProgressPlan::Iterations(total) => iterations_bar(total),
            };

            loop {
                if shutdown_listener.should_shutdown() {
                    log::trace!("Progress thread shutting down");
                    pb.finish_and_clear();
                    break;
                }

                let position = match plan {
                    ProgressPlan::Timed(planned_runtime) => {
                        min(start_time.elapsed().as_secs(), planned_runtime.as_secs())
                    }
                    ProgressPlan::Iterations(total) => {
                        min(tally.completed() + tally.failed(), total)
                    }
                };
                pb.set_position(position);
                std::thread::sleep(Duration::from_millis(250));
            }
        });

    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            log::warn!("Failed to start progress thread: {e:?}");
            None
        }
    }
}

fn timed_bar(planned_runtime: Duration) -> ProgressBar {
    let total_secs = planned_runtime.as_secs();
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{wide_bar:.cyan/blue}] [{elapsed_precise} / {planned_runtime}]",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .with_key(
        "planned_runtime",
        move |_state: &ProgressState, w: &mut dyn Write| {
            let _ = write!(
                w,
                "{:02}:{:02}:{:02}",
                total_secs / 3600,
                (total_secs % 3600) / 60,
                total_secs % 60
            );
        },
    )
    .progress_chars("#>-");

    ProgressBar::new(total_secs).with_style(style)
}

fn iterations_bar(total: u64) -> ProgressBar {
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{wide_bar:.cyan/blue}] {pos}/{len} iterations [{elapsed_precise}]",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");

    ProgressBar::new(total).with_style(style)
}
