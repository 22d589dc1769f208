use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use surge_summary_model::ThresholdOutcome;

use crate::metric_store::{per_second, percentile, rate, sorted, MetricSamples};
use crate::MetricStore;

/// The statistic a threshold expression is compared against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregate {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    Percentile(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    fn holds(self, observed: f64, limit: f64) -> bool {
        match self {
            Comparison::Lt => observed < limit,
            Comparison::Le => observed <= limit,
            Comparison::Gt => observed > limit,
            Comparison::Ge => observed >= limit,
            Comparison::Eq => observed == limit,
            Comparison::Ne => observed != limit,
        }
    }
}

#[derive(derive_more::Error, derive_more::Display, Debug, Clone, PartialEq, Eq)]
#[display("{reason}")]
pub struct ThresholdParseError {
    reason: String,
}

impl ThresholdParseError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A single pass/fail expression such as `p(95)<500` or `rate<0.01`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub aggregate: Aggregate,
    pub comparison: Comparison,
    pub limit: f64,
    source: String,
}

// Longest operators first so that `<=` is not read as `<`.
const OPERATORS: [(&str, Comparison); 7] = [
    ("===", Comparison::Eq),
    ("==", Comparison::Eq),
    ("!=", Comparison::Ne),
    ("<=", Comparison::Le),
    (">=", Comparison::Ge),
    ("<", Comparison::Lt),
    (">", Comparison::Gt),
];

impl FromStr for ThresholdExpr {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let source = s.trim();
        let op_start = source
            .find(['<', '>', '=', '!'])
            .ok_or_else(|| ThresholdParseError::new("missing comparison operator"))?;
        let (aggregate, rest) = source.split_at(op_start);
        let (operator, comparison) = OPERATORS
            .iter()
            .find(|(operator, _)| rest.starts_with(operator))
            .ok_or_else(|| ThresholdParseError::new(format!("unknown operator in `{rest}`")))?;
        let limit = rest[operator.len()..].trim();
        let limit = limit
            .parse::<f64>()
            .map_err(|_| ThresholdParseError::new(format!("`{limit}` is not a number")))?;

        Ok(Self {
            aggregate: parse_aggregate(aggregate.trim())?,
            comparison: *comparison,
            limit,
            source: source.to_string(),
        })
    }
}

fn parse_aggregate(s: &str) -> Result<Aggregate, ThresholdParseError> {
    let aggregate = match s {
        "avg" => Aggregate::Avg,
        "min" => Aggregate::Min,
        "max" => Aggregate::Max,
        "med" => Aggregate::Med,
        "count" => Aggregate::Count,
        "rate" => Aggregate::Rate,
        _ => {
            let p = s
                .strip_prefix("p(")
                .and_then(|s| s.strip_suffix(')'))
                .ok_or_else(|| ThresholdParseError::new(format!("unknown aggregate `{s}`")))?;
            let p = p
                .trim()
                .parse::<f64>()
                .map_err(|_| ThresholdParseError::new(format!("bad percentile `{p}`")))?;
            if !(0.0..=100.0).contains(&p) {
                return Err(ThresholdParseError::new(format!(
                    "percentile {p} is outside 0 to 100"
                )));
            }
            Aggregate::Percentile(p)
        }
    };

    Ok(aggregate)
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl ThresholdExpr {
    /// The observed value for this expression's aggregate, or `None` if the aggregate does not
    /// apply to this kind of metric.
    fn observe(&self, samples: &MetricSamples, elapsed: Duration) -> Option<f64> {
        match (samples, self.aggregate) {
            (MetricSamples::Trend(values), aggregate) if !values.is_empty() => {
                let sorted = sorted(values);
                match aggregate {
                    Aggregate::Avg => Some(sorted.iter().sum::<f64>() / sorted.len() as f64),
                    Aggregate::Min => sorted.first().copied(),
                    Aggregate::Max => sorted.last().copied(),
                    Aggregate::Med => Some(percentile(&sorted, 50.0)),
                    Aggregate::Percentile(p) => Some(percentile(&sorted, p)),
                    Aggregate::Count => Some(sorted.len() as f64),
                    Aggregate::Rate => None,
                }
            }
            (MetricSamples::Rate { passes, fails }, Aggregate::Rate) => rate(*passes, *fails),
            (MetricSamples::Counter(count), Aggregate::Count) => Some(*count as f64),
            (MetricSamples::Counter(count), Aggregate::Rate) => Some(per_second(*count, elapsed)),
            _ => None,
        }
    }
}

/// Threshold expressions for a run, grouped by the metric they apply to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Thresholds {
    by_metric: BTreeMap<String, Vec<ThresholdExpr>>,
}

impl Thresholds {
    /// Parse every expression, reporting the first one that fails along with its metric.
    pub fn parse(
        raw: &BTreeMap<String, Vec<String>>,
    ) -> Result<Self, (String, String, ThresholdParseError)> {
        let mut by_metric = BTreeMap::new();
        for (metric, expressions) in raw {
            let parsed = expressions
                .iter()
                .map(|expr| {
                    expr.parse::<ThresholdExpr>()
                        .map_err(|e| (metric.clone(), expr.clone(), e))
                })
                .collect::<Result<Vec<_>, _>>()?;
            by_metric.insert(metric.clone(), parsed);
        }

        Ok(Self { by_metric })
    }

    pub fn is_empty(&self) -> bool {
        self.by_metric.is_empty()
    }

    /// Evaluate every expression against the samples collected during the run.
    ///
    /// A metric that was never sampled passes, since nothing was observed that could breach it.
    pub fn evaluate(&self, store: &MetricStore, elapsed: Duration) -> Vec<ThresholdOutcome> {
        self.by_metric
            .iter()
            .flat_map(|(metric, expressions)| {
                expressions.iter().map(move |expr| {
                    let (observed, passed) = match store.samples(metric) {
                        None => (None, true),
                        Some(samples) => match expr.observe(samples, elapsed) {
                            Some(observed) => {
                                (Some(observed), expr.comparison.holds(observed, expr.limit))
                            }
                            None => {
                                log::warn!(
                                    "Threshold `{expr}` cannot be applied to metric `{metric}`"
                                );
                                (None, false)
                            }
                        },
                    };

                    ThresholdOutcome {
                        metric: metric.clone(),
                        expression: expr.to_string(),
                        observed,
                        passed,
                    }
                })
            })
            .collect()
    }
}
