use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha3::Digest;
use std::collections::BTreeMap;
use std::io::{BufRead, Read, Write};
use std::path::PathBuf;

/// The load profile a run was configured with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LoadProfileSummary {
    /// Concurrency ramped through a list of stages
    Ramping { stages: Vec<StageSummary> },
    /// A fixed number of virtual users sharing a total iteration count
    Fixed {
        virtual_users: usize,
        iterations: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageSummary {
    pub duration_ms: u64,
    pub target: usize,
}

/// Aggregated statistics for one metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricStats {
    /// Distribution of sampled values, in milliseconds for durations.
    Trend {
        count: u64,
        min: f64,
        max: f64,
        avg: f64,
        med: f64,
        p90: f64,
        p95: f64,
        p99: f64,
    },
    /// Fraction of samples that were `true`. For a metric like `http_req_failed` a `true`
    /// sample means a failed request.
    Rate { passes: u64, fails: u64, rate: f64 },
    /// A running total, with the average per second over the run.
    Counter { count: u64, per_second: f64 },
}

/// The result of evaluating one threshold expression after a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub expression: String,
    /// The value the expression was compared against. Not set if the metric was never sampled
    /// or the aggregate does not apply to the metric.
    pub observed: Option<f64>,
    pub passed: bool,
}

/// Summary of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// The unique run id
    ///
    /// Chosen by the runner unless one is given on the command line.
    pub run_id: String,
    /// The name of the scenario that was run
    pub scenario_name: String,
    /// The time the run started
    ///
    /// This is a Unix timestamp in seconds.
    pub started_at: i64,
    /// How virtual users were scheduled
    pub load_profile: LoadProfileSummary,
    /// Hard cap on the run time, if one was configured
    pub max_duration_ms: Option<u64>,
    /// Wall clock duration of the run, from the first virtual user being scheduled until the
    /// last one retired
    pub duration_ms: u64,
    /// Iterations whose behaviour returned successfully
    pub completed_iterations: u64,
    /// Iterations whose behaviour returned an error or panicked
    pub failed_iterations: u64,
    /// The highest number of virtual users alive at the same time
    pub peak_vus: usize,
    /// Per metric statistics, keyed by metric name
    pub metrics: BTreeMap<String, MetricStats>,
    /// Outcome of every configured threshold
    pub thresholds: Vec<ThresholdOutcome>,
    /// The version of Surge that was used for this run
    pub surge_version: String,
}

impl RunSummary {
    /// Create a new run summary, before any results are known
    pub fn new(
        run_id: String,
        scenario_name: String,
        started_at: i64,
        load_profile: LoadProfileSummary,
        max_duration_ms: Option<u64>,
        surge_version: String,
    ) -> Self {
        Self {
            run_id,
            scenario_name,
            started_at,
            load_profile,
            max_duration_ms,
            duration_ms: 0,
            completed_iterations: 0,
            failed_iterations: 0,
            peak_vus: 0,
            metrics: BTreeMap::new(),
            thresholds: Vec::with_capacity(0),
            surge_version,
        }
    }

    /// Record the iteration counts and timing reported by the driver
    pub fn set_iterations(&mut self, completed: u64, failed: u64, duration_ms: u64, peak_vus: usize) {
        self.completed_iterations = completed;
        self.failed_iterations = failed;
        self.duration_ms = duration_ms;
        self.peak_vus = peak_vus;
    }

    pub fn set_metrics(&mut self, metrics: BTreeMap<String, MetricStats>) {
        self.metrics = metrics;
    }

    pub fn set_thresholds(&mut self, thresholds: Vec<ThresholdOutcome>) {
        self.thresholds = thresholds;
    }

    /// Total number of iterations that ran, whether they succeeded or not
    pub fn total_iterations(&self) -> u64 {
        self.completed_iterations + self.failed_iterations
    }

    /// True when every threshold passed. A run without thresholds always passes.
    pub fn thresholds_passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed)
    }

    /// Compute a fingerprint for this run summary
    ///
    /// The fingerprint is intended to uniquely identify the configuration used to run the scenario.
    /// It uses the
    ///     - Scenario name
    ///     - Load profile
    ///     - Max duration
    ///     - Threshold expressions
    ///     - Surge version
    ///
    /// The fingerprint is computed using [sha3::Sha3_256].
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.scenario_name.as_bytes());
        match &self.load_profile {
            LoadProfileSummary::Ramping { stages } => {
                Digest::update(&mut hasher, b"ramping");
                for stage in stages {
                    Digest::update(&mut hasher, stage.duration_ms.to_le_bytes());
                    Digest::update(&mut hasher, stage.target.to_le_bytes());
                }
            }
            LoadProfileSummary::Fixed {
                virtual_users,
                iterations,
            } => {
                Digest::update(&mut hasher, b"fixed");
                Digest::update(&mut hasher, virtual_users.to_le_bytes());
                Digest::update(&mut hasher, iterations.to_le_bytes());
            }
        }
        if let Some(max_duration_ms) = self.max_duration_ms {
            Digest::update(&mut hasher, max_duration_ms.to_le_bytes());
        }
        self.thresholds
            .iter()
            .sorted_by(|a, b| (&a.metric, &a.expression).cmp(&(&b.metric, &b.expression)))
            .for_each(|t| {
                Digest::update(&mut hasher, t.metric.as_bytes());
                Digest::update(&mut hasher, t.expression.as_bytes());
            });
        Digest::update(&mut hasher, self.surge_version.as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// Append the run summary to a file
///
/// The summary will be serialized to JSON and output as a single line followed by a newline. The
/// recommended file extension is `.jsonl`.
pub fn append_run_summary(run_summary: &RunSummary, path: PathBuf) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    store_run_summary(run_summary, &mut file)?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Serialize the run summary to a writer
pub fn store_run_summary<W: Write>(run_summary: &RunSummary, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer(writer, run_summary)?;
    Ok(())
}

/// Load a run summary from a reader
pub fn load_run_summary<R: Read>(reader: R) -> anyhow::Result<RunSummary> {
    let reader = std::io::BufReader::new(reader);
    let run_summary: RunSummary = serde_json::from_reader(reader)?;
    Ok(run_summary)
}

/// Load run summaries from a file
///
/// The file should contain one JSON object per line. This is the format produced by
/// [append_run_summary].
pub fn load_summary_runs(path: PathBuf) -> anyhow::Result<Vec<RunSummary>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut runs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let run: RunSummary = serde_json::from_str(&line)?;
        runs.push(run);
    }
    Ok(runs)
}
