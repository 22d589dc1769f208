use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use surge_instruments::Thresholds;
use surge_summary_model::{LoadProfileSummary, StageSummary};

/// Default interval between scheduling decisions.
pub const DEFAULT_SCHEDULER_TICK: Duration = Duration::from_millis(100);

/// The reasons a run configuration can be rejected. The run never starts if one of these is
/// returned.
#[derive(derive_more::Error, derive_more::Display, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[display("Both stages and a fixed vus/iterations pair are configured, choose one")]
    ConflictingModes,
    #[display("No load profile is configured, set either stages or vus and iterations")]
    NoLoadProfile,
    #[display("The stage list is empty")]
    EmptyStages,
    #[display("Stage {index} has a negative target: {target}")]
    NegativeTarget { index: usize, target: i64 },
    #[display("Invalid duration `{value}`: {reason}")]
    InvalidDuration { value: String, reason: String },
    #[display("A fixed run needs at least one virtual user, got {vus}")]
    InvalidVirtualUsers { vus: i64 },
    #[display("The iteration count must not be negative, got {iterations}")]
    NegativeIterations { iterations: i64 },
    #[display("`vus` is set without `iterations`")]
    MissingIterations,
    #[display("`iterations` is set without `vus`")]
    MissingVirtualUsers,
    #[display("Invalid threshold `{expression}` for metric `{metric}`: {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },
}

/// A ramp segment, as written in options before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOptions {
    /// How long the stage lasts, e.g. `30s`, `5m` or `1m30s`. A bare integer is seconds.
    #[serde(deserialize_with = "deserialize_duration")]
    pub duration: String,
    /// Concurrency to reach by the end of the stage
    pub target: i64,
}

impl StageOptions {
    pub fn new(duration: &str, target: i64) -> Self {
        Self {
            duration: duration.to_string(),
            target,
        }
    }
}

/// A duration in a config file, either text or a whole number of seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum DurationOption {
    Secs(u64),
    Text(String),
}

impl From<DurationOption> for String {
    fn from(value: DurationOption) -> Self {
        match value {
            DurationOption::Secs(secs) => secs.to_string(),
            DurationOption::Text(text) => text,
        }
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    DurationOption::deserialize(deserializer).map(String::from)
}

fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<DurationOption>::deserialize(deserializer)?.map(String::from))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ThresholdExprOptions {
    One(String),
    Many(Vec<String>),
}

fn deserialize_thresholds<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, ThresholdExprOptions>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(metric, exprs)| match exprs {
            ThresholdExprOptions::One(expr) => (metric, vec![expr]),
            ThresholdExprOptions::Many(exprs) => (metric, exprs),
        })
        .collect())
}

/// Unvalidated run options, as set by scenario defaults, a config file or the command line.
///
/// ```toml
/// stages = [
///     { duration = "30s", target = 100 },
///     { duration = "2m", target = 500 },
/// ]
///
/// [thresholds]
/// http_req_duration = ["p(95)<500"]
/// http_req_failed = "rate<0.01"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<StageOptions>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vus: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<i64>,
    /// Hard cap on the wall clock time of the run
    #[serde(
        default,
        deserialize_with = "deserialize_optional_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<String>,
    #[serde(default, deserialize_with = "deserialize_thresholds")]
    pub thresholds: BTreeMap<String, Vec<String>>,
}

impl RunOptions {
    /// Options for a ramping run, from `(duration, target)` pairs.
    pub fn stages<'a>(stages: impl IntoIterator<Item = (&'a str, i64)>) -> Self {
        Self {
            stages: Some(
                stages
                    .into_iter()
                    .map(|(duration, target)| StageOptions::new(duration, target))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    /// Options for a fixed number of virtual users sharing a total number of iterations.
    pub fn fixed(vus: i64, iterations: i64) -> Self {
        Self {
            vus: Some(vus),
            iterations: Some(iterations),
            ..Default::default()
        }
    }

    pub fn with_duration(mut self, duration: &str) -> Self {
        self.duration = Some(duration.to_string());
        self
    }

    pub fn with_threshold(mut self, metric: &str, expression: &str) -> Self {
        self.thresholds
            .entry(metric.to_string())
            .or_default()
            .push(expression.to_string());
        self
    }

    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn has_load_profile(&self) -> bool {
        self.stages.is_some() || self.vus.is_some() || self.iterations.is_some()
    }

    /// Layer `over` on top of these options.
    ///
    /// If `over` sets any part of a load profile then it replaces the whole load profile here.
    /// The duration is replaced if set and thresholds are replaced per metric.
    pub fn merge(mut self, over: RunOptions) -> Self {
        if over.has_load_profile() {
            self.stages = over.stages;
            self.vus = over.vus;
            self.iterations = over.iterations;
        }
        if over.duration.is_some() {
            self.duration = over.duration;
        }
        self.thresholds.extend(over.thresholds);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadProfile {
    Ramping { stages: Vec<Stage> },
    Fixed { virtual_users: usize, iterations: u64 },
}

impl LoadProfile {
    pub fn summary(&self) -> LoadProfileSummary {
        match self {
            LoadProfile::Ramping { stages } => LoadProfileSummary::Ramping {
                stages: stages
                    .iter()
                    .map(|stage| StageSummary {
                        duration_ms: stage.duration.as_millis() as u64,
                        target: stage.target,
                    })
                    .collect(),
            },
            LoadProfile::Fixed {
                virtual_users,
                iterations,
            } => LoadProfileSummary::Fixed {
                virtual_users: *virtual_users,
                iterations: *iterations,
            },
        }
    }
}

/// A validated run configuration. Immutable once the run starts.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub load_profile: LoadProfile,
    pub max_duration: Option<Duration>,
    pub thresholds: Thresholds,
    pub scheduler_tick: Duration,
}

impl TryFrom<RunOptions> for RunConfig {
    type Error = ConfigError;

    fn try_from(options: RunOptions) -> Result<Self, Self::Error> {
        let load_profile = match (options.stages, options.vus, options.iterations) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(ConfigError::ConflictingModes)
            }
            (Some(stages), None, None) => {
                if stages.is_empty() {
                    return Err(ConfigError::EmptyStages);
                }
                let stages = stages
                    .iter()
                    .enumerate()
                    .map(|(index, stage)| {
                        if stage.target < 0 {
                            return Err(ConfigError::NegativeTarget {
                                index,
                                target: stage.target,
                            });
                        }
                        Ok(Stage {
                            duration: parse_duration(&stage.duration)?,
                            target: stage.target as usize,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                LoadProfile::Ramping { stages }
            }
            (None, Some(vus), Some(iterations)) => {
                if vus < 1 {
                    return Err(ConfigError::InvalidVirtualUsers { vus });
                }
                if iterations < 0 {
                    return Err(ConfigError::NegativeIterations { iterations });
                }
                LoadProfile::Fixed {
                    virtual_users: vus as usize,
                    iterations: iterations as u64,
                }
            }
            (None, Some(_), None) => return Err(ConfigError::MissingIterations),
            (None, None, Some(_)) => return Err(ConfigError::MissingVirtualUsers),
            (None, None, None) => return Err(ConfigError::NoLoadProfile),
        };

        let max_duration = options.duration.as_deref().map(parse_duration).transpose()?;

        let thresholds = Thresholds::parse(&options.thresholds).map_err(
            |(metric, expression, e)| ConfigError::InvalidThreshold {
                metric,
                expression,
                reason: e.to_string(),
            },
        )?;

        Ok(Self {
            load_profile,
            max_duration,
            thresholds,
            scheduler_tick: DEFAULT_SCHEDULER_TICK,
        })
    }
}

impl RunConfig {
    pub fn with_scheduler_tick(mut self, tick: Duration) -> Self {
        self.scheduler_tick = tick.max(Duration::from_millis(1));
        self
    }
}

/// Parse a duration like `30s`, `5m`, `1m30s` or `500ms`. A bare number is taken as seconds.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let trimmed = value.trim();
    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    humantime::parse_duration(trimmed).map_err(|e| ConfigError::InvalidDuration {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_durations() {
        assert_eq!(Duration::from_secs(30), parse_duration("30s").unwrap());
        assert_eq!(Duration::from_secs(300), parse_duration("5m").unwrap());
        assert_eq!(Duration::from_secs(90), parse_duration("1m30s").unwrap());
        assert_eq!(Duration::from_millis(500), parse_duration("500ms").unwrap());
        assert_eq!(Duration::from_secs(12), parse_duration("12").unwrap());
        assert_eq!(Duration::ZERO, parse_duration("0s").unwrap());
    }

    #[test]
    fn reject_negative_duration() {
        assert!(matches!(
            parse_duration("-30s"),
            Err(ConfigError::InvalidDuration { .. })
        ));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn ramping_profile() {
        let config = RunConfig::try_from(RunOptions::stages([("30s", 100), ("2m", 500)])).unwrap();

        assert_eq!(
            LoadProfile::Ramping {
                stages: vec![
                    Stage {
                        duration: Duration::from_secs(30),
                        target: 100
                    },
                    Stage {
                        duration: Duration::from_secs(120),
                        target: 500
                    },
                ]
            },
            config.load_profile
        );
        assert_eq!(DEFAULT_SCHEDULER_TICK, config.scheduler_tick);
        assert!(config.thresholds.is_empty());
    }

    #[test]
    fn fixed_profile() {
        let config = RunConfig::try_from(RunOptions::fixed(200, 200)).unwrap();

        assert_eq!(
            LoadProfile::Fixed {
                virtual_users: 200,
                iterations: 200
            },
            config.load_profile
        );
    }

    #[test]
    fn both_modes_conflict() {
        let mut options = RunOptions::stages([("30s", 100)]);
        options.iterations = Some(10);
        assert_eq!(
            ConfigError::ConflictingModes,
            RunConfig::try_from(options).unwrap_err()
        );

        let mut options = RunOptions::fixed(10, 10);
        options.stages = Some(vec![StageOptions::new("30s", 100)]);
        assert_eq!(
            ConfigError::ConflictingModes,
            RunConfig::try_from(options).unwrap_err()
        );
    }

    #[test]
    fn neither_mode_is_rejected() {
        assert_eq!(
            ConfigError::NoLoadProfile,
            RunConfig::try_from(RunOptions::default()).unwrap_err()
        );
    }

    #[test]
    fn half_a_fixed_profile_is_rejected() {
        let options = RunOptions {
            vus: Some(10),
            ..Default::default()
        };
        assert_eq!(
            ConfigError::MissingIterations,
            RunConfig::try_from(options).unwrap_err()
        );

        let options = RunOptions {
            iterations: Some(10),
            ..Default::default()
        };
        assert_eq!(
            ConfigError::MissingVirtualUsers,
            RunConfig::try_from(options).unwrap_err()
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert_eq!(
            ConfigError::NegativeTarget {
                index: 1,
                target: -5
            },
            RunConfig::try_from(RunOptions::stages([("30s", 10), ("30s", -5)])).unwrap_err()
        );
        assert_eq!(
            ConfigError::EmptyStages,
            RunConfig::try_from(RunOptions::stages([])).unwrap_err()
        );
        assert_eq!(
            ConfigError::InvalidVirtualUsers { vus: 0 },
            RunConfig::try_from(RunOptions::fixed(0, 10)).unwrap_err()
        );
        assert_eq!(
            ConfigError::NegativeIterations { iterations: -1 },
            RunConfig::try_from(RunOptions::fixed(1, -1)).unwrap_err()
        );
        assert!(matches!(
            RunConfig::try_from(RunOptions::stages([("a while", 10)])).unwrap_err(),
            ConfigError::InvalidDuration { .. }
        ));
    }

    #[test]
    fn invalid_threshold_is_rejected() {
        let options =
            RunOptions::fixed(1, 1).with_threshold("http_req_duration", "p(95) under 500");

        match RunConfig::try_from(options).unwrap_err() {
            ConfigError::InvalidThreshold {
                metric, expression, ..
            } => {
                assert_eq!("http_req_duration", metric);
                assert_eq!("p(95) under 500", expression);
            }
            e => panic!("Unexpected error: {e}"),
        }
    }

    #[test]
    fn merge_replaces_whole_load_profile() {
        let defaults = RunOptions::stages([("30s", 100)])
            .with_threshold("http_req_duration", "p(95)<500")
            .with_threshold("http_req_failed", "rate<0.01");
        let over = RunOptions::fixed(5, 5).with_threshold("http_req_failed", "rate<0.5");

        let merged = defaults.merge(over);

        assert_eq!(None, merged.stages);
        assert_eq!(Some(5), merged.vus);
        assert_eq!(Some(5), merged.iterations);
        assert_eq!(
            vec!["p(95)<500".to_string()],
            merged.thresholds["http_req_duration"]
        );
        assert_eq!(
            vec!["rate<0.5".to_string()],
            merged.thresholds["http_req_failed"]
        );
    }

    #[test]
    fn merge_keeps_profile_when_not_overridden() {
        let defaults = RunOptions::fixed(100, 100);
        let over = RunOptions::default().with_duration("10m");

        let merged = defaults.clone().merge(over);

        assert_eq!(defaults.vus, merged.vus);
        assert_eq!(defaults.iterations, merged.iterations);
        assert_eq!(Some("10m".to_string()), merged.duration);
    }

    #[test]
    fn options_from_toml() {
        let options: RunOptions = toml::from_str(
            r#"
            stages = [
                { duration = "1m", target = 20 },
                { duration = "1m", target = 0 },
            ]
            duration = "10m"

            [thresholds]
            http_req_duration = ["p(95)<500", "max<2000"]
            http_req_failed = "rate<0.01"
            "#,
        )
        .unwrap();

        assert_eq!(
            RunOptions::stages([("1m", 20), ("1m", 0)])
                .with_duration("10m")
                .with_threshold("http_req_duration", "p(95)<500")
                .with_threshold("http_req_duration", "max<2000")
                .with_threshold("http_req_failed", "rate<0.01"),
            options
        );
    }

    #[test]
    fn integer_durations_from_toml_are_seconds() {
        let options: RunOptions = toml::from_str(
            r#"
            stages = [{ duration = 30, target = 5 }, { duration = "1m", target = 0 }]
            duration = 60
            "#,
        )
        .unwrap();

        assert_eq!(
            RunOptions::stages([("30", 5), ("1m", 0)]).with_duration("60"),
            options
        );

        let config = RunConfig::try_from(options).unwrap();
        assert_eq!(Some(Duration::from_secs(60)), config.max_duration);
        assert_eq!(
            LoadProfile::Ramping {
                stages: vec![
                    Stage {
                        duration: Duration::from_secs(30),
                        target: 5
                    },
                    Stage {
                        duration: Duration::from_secs(60),
                        target: 0
                    },
                ]
            },
            config.load_profile
        );
    }

    #[test]
    fn negative_integer_duration_is_rejected() {
        let result = toml::from_str::<RunOptions>("stages = [{ duration = -5, target = 1 }]");

        assert!(result.is_err());
    }

    #[test]
    fn unknown_option_is_rejected() {
        assert!(toml::from_str::<RunOptions>("vu = 10").is_err());
    }
}
