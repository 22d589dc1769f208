use std::collections::BTreeMap;
use std::time::Duration;

use surge_core::prelude::IterationResult;
use surge_summary_model::MetricStats;

use crate::OperationRecord;

pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const ITERATIONS_FAILED: &str = "iterations_failed";
pub const CHECKS: &str = "checks";

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MetricSamples {
    Trend(Vec<f64>),
    Rate { passes: u64, fails: u64 },
    Counter(u64),
}

impl MetricSamples {
    fn kind(&self) -> &'static str {
        match self {
            MetricSamples::Trend(_) => "trend",
            MetricSamples::Rate { .. } => "rate",
            MetricSamples::Counter(_) => "counter",
        }
    }
}

/// Raw samples for every metric seen during a run.
///
/// Trends keep every value so that any percentile can be computed after the run.
#[derive(Debug, Default)]
pub struct MetricStore {
    metrics: BTreeMap<String, MetricSamples>,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_trend(&mut self, name: &str, value: f64) {
        match self
            .metrics
            .entry(name.to_string())
            .or_insert_with(|| MetricSamples::Trend(Vec::new()))
        {
            MetricSamples::Trend(values) => values.push(value),
            other => mismatched(name, "trend", other),
        }
    }

    pub fn add_rate(&mut self, name: &str, value: bool) {
        match self
            .metrics
            .entry(name.to_string())
            .or_insert(MetricSamples::Rate {
                passes: 0,
                fails: 0,
            }) {
            MetricSamples::Rate { passes, fails } => {
                if value {
                    *passes += 1;
                } else {
                    *fails += 1;
                }
            }
            other => mismatched(name, "rate", other),
        }
    }

    pub fn add_counter(&mut self, name: &str, value: u64) {
        match self
            .metrics
            .entry(name.to_string())
            .or_insert(MetricSamples::Counter(0))
        {
            MetricSamples::Counter(count) => *count += value,
            other => mismatched(name, "counter", other),
        }
    }

    pub fn add_operation(&mut self, record: &OperationRecord) {
        let prefix = &record.metric_prefix;
        if let Some(elapsed) = record.duration() {
            self.add_trend(&format!("{prefix}_duration"), as_millis(elapsed));
        }
        self.add_rate(&format!("{prefix}_failed"), record.is_error);
        self.add_counter(&format!("{prefix}s"), 1);
    }

    pub fn add_iteration(&mut self, result: &IterationResult) {
        self.add_counter(ITERATIONS, 1);
        self.add_trend(ITERATION_DURATION, as_millis(result.duration));
        self.add_rate(ITERATIONS_FAILED, !result.is_success());
        for check in &result.checks {
            self.add_rate(CHECKS, check.passed);
        }
    }

    pub(crate) fn samples(&self, name: &str) -> Option<&MetricSamples> {
        self.metrics.get(name)
    }

    /// Aggregate every metric. Counters are divided by `elapsed` to give a per second rate.
    pub fn stats(&self, elapsed: Duration) -> BTreeMap<String, MetricStats> {
        self.metrics
            .iter()
            .filter_map(|(name, samples)| {
                let stats = match samples {
                    MetricSamples::Trend(values) => trend_stats(values)?,
                    MetricSamples::Rate { passes, fails } => MetricStats::Rate {
                        passes: *passes,
                        fails: *fails,
                        rate: rate(*passes, *fails)?,
                    },
                    MetricSamples::Counter(count) => MetricStats::Counter {
                        count: *count,
                        per_second: per_second(*count, elapsed),
                    },
                };
                Some((name.clone(), stats))
            })
            .collect()
    }
}

fn mismatched(name: &str, wanted: &str, existing: &MetricSamples) {
    log::warn!(
        "Dropping {wanted} sample for metric `{name}` which is already recorded as a {}",
        existing.kind()
    );
}

pub(crate) fn as_millis(duration: Duration) -> f64 {
    duration.as_micros() as f64 / 1000.0
}

pub(crate) fn rate(passes: u64, fails: u64) -> Option<f64> {
    let total = passes + fails;
    if total == 0 {
        return None;
    }
    Some(passes as f64 / total as f64)
}

pub(crate) fn per_second(count: u64, elapsed: Duration) -> f64 {
    if elapsed.is_zero() {
        return 0.0;
    }
    count as f64 / elapsed.as_secs_f64()
}

fn trend_stats(values: &[f64]) -> Option<MetricStats> {
    if values.is_empty() {
        return None;
    }
    let sorted = sorted(values);
    let count = sorted.len() as u64;
    Some(MetricStats::Trend {
        count,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        avg: sorted.iter().sum::<f64>() / count as f64,
        med: percentile(&sorted, 50.0),
        p90: percentile(&sorted, 90.0),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
    })
}

pub(crate) fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Percentile by linear interpolation between the closest ranks. `sorted` must be non-empty and
/// in ascending order, `p` is in the range 0 to 100.
pub(crate) fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (rank - lower as f64)
}
