mod cli;
mod config;
mod context;
mod definition;
mod driver;
mod executor;
mod init;
mod permits;
mod progress;
mod run;
mod schedule;
mod shutdown;
mod types;

pub mod prelude {
    pub use crate::cli::{ReporterOpt, SurgeScenarioCli};
    pub use crate::config::{
        parse_duration, ConfigError, LoadProfile, RunConfig, RunOptions, Stage, StageOptions,
    };
    pub use crate::context::UserValuesConstraint;
    pub use crate::context::{RunnerContext, VuContext};
    pub use crate::definition::{HookResult, ScenarioDefinitionBuilder};
    pub use crate::executor::Executor;
    pub use crate::init::init;
    pub use crate::permits::IterationPermits;
    pub use crate::run::run;
    pub use crate::schedule::Schedule;
    pub use crate::types::SurgeResult;
    pub use surge_summary_model::RunSummary;
}
