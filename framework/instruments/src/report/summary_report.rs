mod operations_table;

use std::collections::BTreeMap;

use surge_core::prelude::IterationResult;
use surge_summary_model::MetricStats;
use tabled::settings::Style;
use tabled::Table;

use crate::report::summary_report::operations_table::{CheckRow, MetricRow, OperationRow};
use crate::report::ReportCollector;
use crate::OperationRecord;

/// Running totals for one operation id.
#[derive(Debug, Clone, Copy)]
struct OperationTally {
    count: usize,
    errors: usize,
    min_ms: f64,
    max_ms: f64,
    total_ms: f64,
}

impl Default for OperationTally {
    fn default() -> Self {
        Self {
            count: 0,
            errors: 0,
            min_ms: f64::INFINITY,
            max_ms: 0.0,
            total_ms: 0.0,
        }
    }
}

impl OperationTally {
    fn add(&mut self, duration_ms: f64, is_error: bool) {
        self.count += 1;
        if is_error {
            self.errors += 1;
        }
        self.min_ms = self.min_ms.min(duration_ms);
        self.max_ms = self.max_ms.max(duration_ms);
        self.total_ms += duration_ms;
    }
}

/// Tallies operations and checks as they arrive and prints tables of them when the run is
/// finalized. Memory use depends on the number of distinct operation ids and check names, not
/// on the number of operations.
pub struct SummaryReportCollector {
    operations: BTreeMap<String, OperationTally>,
    checks: BTreeMap<String, (u64, u64)>,
}

impl Default for SummaryReportCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl SummaryReportCollector {
    pub fn new() -> Self {
        Self {
            operations: BTreeMap::new(),
            checks: BTreeMap::new(),
        }
    }

    fn operation_rows(&self) -> Vec<OperationRow> {
        self.operations
            .iter()
            .map(|(operation_id, tally)| OperationRow {
                operation_id: operation_id.clone(),
                total_operations: tally.count,
                errors: tally.errors,
                avg_time_ms: tally.total_ms / tally.count as f64,
                min_time_ms: tally.min_ms,
                max_time_ms: tally.max_ms,
                total_duration_ms: tally.total_ms,
            })
            .collect()
    }

    fn print_summary_of_operations(&self) {
        let rows = self.operation_rows();
        if rows.is_empty() {
            return;
        }

        println!("\nSummary of operations");
        let mut table = Table::new(&rows);
        table.with(Style::modern());
        println!("{table}");
    }

    fn print_summary_of_checks(&self) {
        if self.checks.is_empty() {
            return;
        }

        println!("\nSummary of checks");
        let rows = self
            .checks
            .iter()
            .map(|(name, (passes, fails))| CheckRow {
                name: name.clone(),
                passes: *passes,
                fails: *fails,
            })
            .collect::<Vec<_>>();
        let mut table = Table::new(&rows);
        table.with(Style::modern());
        println!("{table}");
    }

    fn print_summary_of_metrics(&self, metrics: &BTreeMap<String, MetricStats>) {
        if metrics.is_empty() {
            return;
        }

        println!("\nSummary of metrics");
        let rows = metrics
            .iter()
            .map(|(name, stats)| MetricRow::new(name, stats))
            .collect::<Vec<_>>();
        let mut table = Table::new(&rows);
        table.with(Style::modern());
        println!("{table}");
    }
}

impl ReportCollector for SummaryReportCollector {
    fn add_operation(&mut self, operation_record: &OperationRecord) {
        // Unfinished records carry no timing.
        let Some(duration) = operation_record.duration() else {
            return;
        };
        let duration_ms = duration.as_micros() as f64 / 1000.0;

        match self.operations.get_mut(&operation_record.operation_id) {
            Some(tally) => tally.add(duration_ms, operation_record.is_error),
            None => {
                let mut tally = OperationTally::default();
                tally.add(duration_ms, operation_record.is_error);
                self.operations.insert(operation_record.operation_id.clone(), tally);
            }
        }
    }

    fn add_iteration(&mut self, iteration: &IterationResult) {
        for check in &iteration.checks {
            let (passes, fails) = self.checks.entry(check.name.clone()).or_default();
            if check.passed {
                *passes += 1;
            } else {
                *fails += 1;
            }
        }
    }

    fn finalize(&self, metrics: &BTreeMap<String, MetricStats>) {
        self.print_summary_of_operations();
        self.print_summary_of_checks();
        self.print_summary_of_metrics(metrics);
    }
}
