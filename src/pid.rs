//! PID line follower: reflectance error in, differential wheel speeds out.
//!
//! # Invariants
//!
//! - `integral` stays finite and inside `[-i_max, i_max]` no matter how long the
//!   error persists (anti-windup clamp is applied on every step).
//! - State persists across steps until [`LineFollowController::reset`].
//! - Non-finite input is refused: the step returns `(base, base)` and leaves the
//!   state untouched.

use crate::error::{ensure_finite, ensure_non_negative, ConfigError, ConfigResult};

// ─── Config ─────────────────────────────────────────────────────────────────

/// Which wheel receives `base + update`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WheelLayout {
    /// `left = base + update`, `right = base - update`.
    #[default]
    Standard,
    /// Motors mounted the other way round: `left = base - update`,
    /// `right = base + update`.
    Mirrored,
    /// As [`WheelLayout::Mirrored`], with the left motor wired backwards so its
    /// clamped command is negated (hub-style drive bases).
    InvertedLeft,
}

/// Gains and output limits.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PidConfig {
    /// Proportional gain.
    pub kp: f64,
    /// Integral gain.
    pub ki: f64,
    /// Derivative gain.
    pub kd: f64,
    /// Anti-windup bound on the accumulated error.
    pub i_max: f64,
    /// Speed of both wheels at zero error.
    pub base_speed: f32,
    /// Lower wheel speed clamp.
    pub min_speed: f32,
    /// Upper wheel speed clamp.
    pub max_speed: f32,
    /// Motor orientation.
    pub layout: WheelLayout,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 9.0,
            ki: 0.0001,
            kd: 4.5,
            i_max: 10_000.0,
            base_speed: 200.0,
            min_speed: 0.0,
            max_speed: 1000.0,
            layout: WheelLayout::Standard,
        }
    }
}

impl PidConfig {
    /// Reject non-finite gains, negative bounds, and inverted speed limits.
    pub fn validate(&self) -> ConfigResult<()> {
        ensure_finite("pid.kp", self.kp)?;
        ensure_finite("pid.ki", self.ki)?;
        ensure_finite("pid.kd", self.kd)?;
        ensure_non_negative("pid.i_max", self.i_max)?;
        ensure_finite("pid.base_speed", self.base_speed as f64)?;
        ensure_finite("pid.min_speed", self.min_speed as f64)?;
        ensure_finite("pid.max_speed", self.max_speed as f64)?;
        if self.min_speed > self.max_speed {
            return Err(ConfigError::SpeedBounds {
                min: self.min_speed,
                max: self.max_speed,
            });
        }
        Ok(())
    }
}

// ─── State ──────────────────────────────────────────────────────────────────

/// Memory carried between steps.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PidState {
    /// Clamped running sum of the error.
    pub integral: f64,
    /// Error seen on the previous step.
    pub previous_error: f64,
}

// ─── Controller ─────────────────────────────────────────────────────────────

/// Line-follow PID on downward reflectance.
#[derive(Clone, Debug, Default)]
pub struct LineFollowController {
    config: PidConfig,
    state: PidState,
    last_update: f64,
}

impl LineFollowController {
    /// Controller with fresh state.
    pub fn new(config: PidConfig) -> Self {
        Self {
            config,
            state: PidState::default(),
            last_update: 0.0,
        }
    }

    /// One control step.
    ///
    /// ```text
    /// error      = setpoint - reflectance
    /// derivative = error - previous_error
    /// integral   = clamp(integral + error, -i_max, i_max)
    /// update     = kp*error + kd*derivative + ki*integral
    /// ```
    pub fn step(&mut self, reflectance: f32, setpoint: f32) -> (f32, f32) {
        let base = self.config.base_speed;
        if !reflectance.is_finite() || !setpoint.is_finite() {
            tracing::warn!(reflectance, setpoint, "refusing non-finite line sensor input");
            return (base, base);
        }

        let error = setpoint as f64 - reflectance as f64;
        let derivative = error - self.state.previous_error;
        let i_max = self.config.i_max;
        self.state.integral = (self.state.integral + error).max(-i_max).min(i_max);
        self.state.previous_error = error;

        let c = &self.config;
        let update = c.kp * error + c.kd * derivative + c.ki * self.state.integral;
        self.last_update = update;

        let update = update as f32;
        match c.layout {
            WheelLayout::Standard => (self.clamp_speed(base + update), self.clamp_speed(base - update)),
            WheelLayout::Mirrored => (self.clamp_speed(base - update), self.clamp_speed(base + update)),
            WheelLayout::InvertedLeft => (-self.clamp_speed(base - update), self.clamp_speed(base + update)),
        }
    }

    /// Zero the integral and the remembered error.
    pub fn reset(&mut self) {
        self.state = PidState::default();
        self.last_update = 0.0;
    }

    /// Current state.
    pub fn state(&self) -> PidState {
        self.state
    }

    /// Gains and limits.
    pub fn config(&self) -> &PidConfig {
        &self.config
    }

    /// Unclamped correction from the last accepted step.
    pub fn last_update(&self) -> f64 {
        self.last_update
    }

    fn clamp_speed(&self, v: f32) -> f32 {
        v.max(self.config.min_speed).min(self.config.max_speed)
    }
}
