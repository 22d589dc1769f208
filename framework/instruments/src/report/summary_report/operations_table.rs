use surge_summary_model::MetricStats;
use tabled::Tabled;

#[derive(Tabled)]
pub struct OperationRow {
    pub operation_id: String,
    #[tabled(display = "float2")]
    pub avg_time_ms: f64,
    #[tabled(display = "float2")]
    pub min_time_ms: f64,
    #[tabled(display = "float2")]
    pub max_time_ms: f64,
    pub total_operations: usize,
    pub errors: usize,
    #[tabled(display = "float2")]
    pub total_duration_ms: f64,
}

#[derive(Tabled)]
pub struct CheckRow {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

#[derive(Tabled)]
pub struct MetricRow {
    pub metric: String,
    pub kind: &'static str,
    pub values: String,
}

impl MetricRow {
    pub fn new(name: &str, stats: &MetricStats) -> Self {
        let (kind, values) = match stats {
            MetricStats::Trend {
                count,
                min,
                max,
                avg,
                med,
                p90,
                p95,
                p99,
            } => (
                "trend",
                format!(
                    "avg={avg:.2} min={min:.2} med={med:.2} max={max:.2} p(90)={p90:.2} p(95)={p95:.2} p(99)={p99:.2} count={count}"
                ),
            ),
            MetricStats::Rate { passes, fails, rate } => (
                "rate",
                format!("{:.2}% ({passes} of {})", rate * 100.0, passes + fails),
            ),
            MetricStats::Counter { count, per_second } => {
                ("counter", format!("{count} ({per_second:.2}/s)"))
            }
        };

        Self {
            metric: name.to_string(),
            kind,
            values,
        }
    }
}

fn float2(n: &f64) -> String {
    format!("{:.2}", n)
}
