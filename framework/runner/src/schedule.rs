use std::time::Duration;

use crate::config::{LoadProfile, Stage};

/// Target concurrency over elapsed run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Linear interpolation between stage boundaries, starting from zero.
    Ramp(Vec<Stage>),
    Constant(usize),
}

impl From<&LoadProfile> for Schedule {
    fn from(profile: &LoadProfile) -> Self {
        match profile {
            LoadProfile::Ramping { stages } => Schedule::Ramp(stages.clone()),
            LoadProfile::Fixed { virtual_users, .. } => Schedule::Constant(*virtual_users),
        }
    }
}

impl Schedule {
    /// The number of virtual users that should be alive after `elapsed`.
    ///
    /// Rounds down so the interpolated target is never exceeded. A stage with no duration
    /// jumps straight to its target. After the last stage the last target holds.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        let stages = match self {
            Schedule::Ramp(stages) => stages,
            Schedule::Constant(target) => return *target,
        };

        let mut stage_start = Duration::ZERO;
        let mut previous = 0usize;
        for stage in stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                let into_stage = (elapsed - stage_start).as_nanos() as i128;
                let length = stage.duration.as_nanos() as i128;
                let delta = stage.target as i128 - previous as i128;
                let target = previous as i128 + (delta * into_stage).div_euclid(length);
                return target.max(0) as usize;
            }
            stage_start = stage_end;
            previous = stage.target;
        }

        previous
    }

    /// How long the schedule runs for. A constant schedule has no end of its own.
    pub fn total_duration(&self) -> Option<Duration> {
        match self {
            Schedule::Ramp(stages) => Some(stages.iter().map(|s| s.duration).sum()),
            Schedule::Constant(_) => None,
        }
    }

    /// The highest target the schedule ever asks for.
    pub fn peak_target(&self) -> usize {
        match self {
            Schedule::Ramp(stages) => stages.iter().map(|s| s.target).max().unwrap_or(0),
            Schedule::Constant(target) => *target,
        }
    }
}
