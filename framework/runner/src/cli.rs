use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::{RunOptions, StageOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReporterOpt {
    /// Print summary tables of operations, checks and metrics at the end of the run
    Summary,
    /// Only produce the run summary, print nothing
    Noop,
}

#[derive(Debug, Clone, Parser)]
#[command(about, long_about = None)]
pub struct SurgeScenarioCli {
    /// Base URL of the service to test
    #[clap(short = 'u', long)]
    pub base_url: Option<String>,

    /// The number of virtual users for a fixed run. Must be used together with `--iterations`
    #[clap(long, allow_negative_numbers = true)]
    pub vus: Option<i64>,

    /// The total number of iterations, shared between all virtual users, for a fixed run
    #[clap(long, allow_negative_numbers = true)]
    pub iterations: Option<i64>,

    /// Add a ramp stage in the format `duration:target`. For example `--stage 30s:100`.
    ///
    /// Stages run in the order given. Each stage ramps linearly from the previous stage's target,
    /// or from zero for the first stage. Cannot be combined with `--vus` or `--iterations`.
    #[clap(long = "stage", value_parser = parse_stage)]
    pub stages: Vec<StageOptions>,

    /// Hard cap on the run time, for example `10m`
    #[clap(long)]
    pub duration: Option<String>,

    /// A TOML file of run options. Flags given on the command line take precedence over it
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,

    /// How to report results at the end of the run
    #[clap(long, value_enum, default_value_t = ReporterOpt::Summary)]
    pub reporter: ReporterOpt,

    /// Append the run summary as a JSON line to this file
    #[clap(long)]
    pub summary_file: Option<PathBuf>,

    /// Use this run id instead of generating one
    #[clap(long)]
    pub run_id: Option<String>,
}

impl SurgeScenarioCli {
    /// The run options set by command line flags.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            stages: if self.stages.is_empty() {
                None
            } else {
                Some(self.stages.clone())
            },
            vus: self.vus,
            iterations: self.iterations,
            duration: self.duration.clone(),
            ..Default::default()
        }
    }
}

fn parse_stage(s: &str) -> anyhow::Result<StageOptions> {
    let (duration, target) = s
        .split_once(':')
        .ok_or(anyhow::anyhow!("Stage must be in the format `duration:target`"))?;
    let target = target
        .trim()
        .parse::<i64>()
        .map_err(|e| anyhow::anyhow!("Invalid stage target `{target}`: {e}"))?;

    Ok(StageOptions::new(duration.trim(), target))
}
