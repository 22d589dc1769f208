mod summary_report;

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;
use surge_core::prelude::IterationResult;
use surge_summary_model::{MetricStats, ThresholdOutcome};

use crate::{MetricStore, OperationRecord, Thresholds};

pub use summary_report::SummaryReportCollector;

/// An output for run results, fed as the run progresses and finalized once it is over.
pub trait ReportCollector {
    fn add_operation(&mut self, operation_record: &OperationRecord);

    fn add_iteration(&mut self, iteration: &IterationResult);

    /// Called once the run has finished, with the aggregated metrics.
    fn finalize(&self, metrics: &BTreeMap<String, MetricStats>);
}

#[derive(Default)]
pub struct ReportConfig {
    enable_summary: bool,
}

impl ReportConfig {
    /// Print tables summarising operations, metrics and checks when the run is finalized.
    pub fn enable_summary(mut self) -> Self {
        self.enable_summary = true;
        self
    }

    pub fn init(self) -> Reporter {
        let mut collectors: Vec<Box<dyn ReportCollector + Send>> = Vec::new();
        if self.enable_summary {
            collectors.push(Box::new(SummaryReportCollector::new()));
        }

        Reporter {
            store: Mutex::new(MetricStore::new()),
            collectors: Mutex::new(collectors),
        }
    }
}

/// Receives results from every virtual user.
///
/// Samples always go into the metric store, which thresholds and the run summary are computed
/// from. Configured collectors receive the same data for output.
pub struct Reporter {
    store: Mutex<MetricStore>,
    collectors: Mutex<Vec<Box<dyn ReportCollector + Send>>>,
}

impl Reporter {
    pub fn add_operation(&self, operation_record: &OperationRecord) {
        self.store.lock().add_operation(operation_record);
        for collector in self.collectors.lock().iter_mut() {
            collector.add_operation(operation_record);
        }
    }

    pub fn add_iteration(&self, iteration: &IterationResult) {
        self.store.lock().add_iteration(iteration);
        for collector in self.collectors.lock().iter_mut() {
            collector.add_iteration(iteration);
        }
    }

    pub fn add_trend(&self, name: &str, value: f64) {
        self.store.lock().add_trend(name, value);
    }

    pub fn add_rate(&self, name: &str, value: bool) {
        self.store.lock().add_rate(name, value);
    }

    pub fn add_counter(&self, name: &str, value: u64) {
        self.store.lock().add_counter(name, value);
    }

    pub fn metric_stats(&self, elapsed: Duration) -> BTreeMap<String, MetricStats> {
        self.store.lock().stats(elapsed)
    }

    pub fn evaluate_thresholds(
        &self,
        thresholds: &Thresholds,
        elapsed: Duration,
    ) -> Vec<ThresholdOutcome> {
        thresholds.evaluate(&self.store.lock(), elapsed)
    }

    pub fn finalize(&self, metrics: &BTreeMap<String, MetricStats>) {
        for collector in self.collectors.lock().iter() {
            collector.finalize(metrics);
        }
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("collectors", &self.collectors.lock().len())
            .finish()
    }
}
