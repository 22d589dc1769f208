mod metric_store;
mod report;
mod threshold;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

pub use metric_store::MetricStore;
pub use report::{ReportCollector, ReportConfig, Reporter, SummaryReportCollector};
pub use threshold::{Aggregate, Comparison, ThresholdExpr, ThresholdParseError, Thresholds};

/// A single timed operation, such as one HTTP request.
///
/// Operations are aggregated into three metrics named after the `metric_prefix`: a
/// `<prefix>_duration` trend, a `<prefix>_failed` rate and a `<prefix>s` counter.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub operation_id: String,
    pub metric_prefix: String,
    started: Instant,
    pub elapsed: Option<Duration>,
    pub is_error: bool,
    pub attr: BTreeMap<String, String>,
}

impl OperationRecord {
    pub fn new(operation_id: impl Into<String>, metric_prefix: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            metric_prefix: metric_prefix.into(),
            started: Instant::now(),
            elapsed: None,
            is_error: false,
            attr: BTreeMap::new(),
        }
    }

    pub fn add_attr(&mut self, key: impl Into<String>, value: impl ToString) {
        self.attr.insert(key.into(), value.to_string());
    }

    /// Stop the clock on this operation.
    pub fn finish(&mut self, is_error: bool) {
        self.elapsed = Some(self.started.elapsed());
        self.is_error = is_error;
    }

    pub fn duration(&self) -> Option<Duration> {
        self.elapsed
    }
}

/// Finish the record based on whether the operation returned an error, and hand it to the
/// reporter.
pub fn report_operation<T, E>(
    reporter: &Reporter,
    mut operation_record: OperationRecord,
    response: &Result<T, E>,
) {
    operation_record.finish(response.is_err());
    reporter.add_operation(&operation_record);
}
