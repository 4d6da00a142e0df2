//! Top-level controller configuration.
//!
//! One value carries every calibration table and tuning constant. `Default`
//! reproduces the calibrated values of the reference arena; hosts override
//! fields with struct-update syntax or load the whole thing through `serde`.

use core::time::Duration;

use crate::arbiter::ArbiterConfig;
use crate::bearing::ServoConfig;
use crate::behaviors::BehaviorConfig;
use crate::error::{ensure_nonzero, ConfigError, ConfigResult};
use crate::goal::GoalConfig;
use crate::maneuver::MotionConfig;
use crate::perception::PerceptionConfig;
use crate::pid::PidConfig;

/// Everything needed to build a [`crate::control::ControlLoop`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ControllerConfig {
    /// Color tables and distance thresholds.
    pub perception: PerceptionConfig,
    /// Line follower gains.
    pub pid: PidConfig,
    /// Bearing servo bounds.
    pub servo: ServoConfig,
    /// Goal machine thresholds and home zones.
    pub goal: GoalConfig,
    /// Scripted maneuver speeds and durations.
    pub motion: MotionConfig,
    /// Stock behavior tuning.
    pub behaviors: BehaviorConfig,
    /// Safety band for preemption.
    pub arbiter: ArbiterConfig,
    /// Pause between ticks in [`crate::control::ControlLoop::run_until`].
    pub tick_period_ms: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            perception: PerceptionConfig::default(),
            pid: PidConfig::default(),
            servo: ServoConfig::default(),
            goal: GoalConfig::default(),
            motion: MotionConfig::default(),
            behaviors: BehaviorConfig::default(),
            arbiter: ArbiterConfig::default(),
            tick_period_ms: 100,
        }
    }
}

impl ControllerConfig {
    /// Validate every section.
    pub fn validate(&self) -> ConfigResult<()> {
        self.perception.validate()?;
        self.pid.validate()?;
        self.servo.validate()?;
        self.goal.validate()?;
        self.motion.validate()?;
        self.behaviors.validate()?;
        let (close, grab) = (self.perception.close_range_mm, self.goal.grab_threshold_mm);
        if close < grab {
            return Err(ConfigError::CloseRangeBelowGrab {
                close_range_mm: close,
                grab_threshold_mm: grab,
            });
        }
        ensure_nonzero("tick_period_ms", self.tick_period_ms)
    }

    /// Tick period as a duration.
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms as u64)
    }
}
