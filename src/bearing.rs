//! Bearing servo: rotate in place until facing a target heading.
//!
//! The loop is exposed two ways:
//!
//! - [`BearingTask`] runs one iteration per [`BearingTask::poll`] and yields back
//!   to the caller in between, so the control loop can let a safety behavior
//!   drive for a tick or cancel the maneuver outright.
//! - [`BearingServo::turn_to`] drives the same task to completion against
//!   heading/rotation callbacks for hosts that want a blocking call.
//!
//! Either way the loop is bounded by `max_iterations` and, when a clock is
//! supplied, by a wall-clock `timeout`. Non-convergence is reported as
//! [`ServoOutcome::TimedOut`]; it is never an endless spin.
//!
//! Headings grow clockwise and live in `[0, 360)`.

use core::time::Duration;

use crate::error::{ensure_non_negative, ensure_nonzero, ConfigResult};
use crate::port::{CancelToken, Clock};

// ─── Angle helpers ──────────────────────────────────────────────────────────

/// Wrap any finite angle into `[0, 360)`.
pub fn wrap_degrees(deg: f32) -> f32 {
    let r = deg % 360.0;
    let r = if r < 0.0 { r + 360.0 } else { r };
    // -1e-7 % 360 + 360 rounds to exactly 360.0
    if r >= 360.0 {
        0.0
    } else {
        r
    }
}

/// Signed shortest rotation from `current` to `target`, in `(-180, 180]`.
///
/// Positive means turn clockwise.
pub fn shortest_error(target: f32, current: f32) -> f32 {
    let diff = wrap_degrees(target - current);
    if diff > 180.0 {
        diff - 360.0
    } else {
        diff
    }
}

pub(crate) fn abs_f32(x: f32) -> f32 {
    if x < 0.0 {
        -x
    } else {
        x
    }
}

// ─── Rotation ───────────────────────────────────────────────────────────────

/// Direction of an in-place turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Rotation {
    /// Heading increases.
    Clockwise,
    /// Heading decreases.
    CounterClockwise,
}

impl Rotation {
    /// Rotation that reduces a signed [`shortest_error`].
    pub fn toward(error_deg: f32) -> Self {
        if error_deg >= 0.0 {
            Rotation::Clockwise
        } else {
            Rotation::CounterClockwise
        }
    }

    /// Differential wheel speeds `(left, right)` for an in-place turn.
    pub fn wheel_speeds(self, speed: f32) -> (f32, f32) {
        match self {
            Rotation::Clockwise => (speed, -speed),
            Rotation::CounterClockwise => (-speed, speed),
        }
    }
}

// ─── Config ─────────────────────────────────────────────────────────────────

/// Tolerances and bounds for the bearing servo.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServoConfig {
    /// Stop once `|error|` is at or below this many degrees.
    pub tolerance_deg: f32,
    /// Nominal rotation per iteration, in degrees.
    pub increment_deg: f32,
    /// Wheel speed used for one turning increment.
    pub turn_speed: f32,
    /// Hard bound on iterations.
    pub max_iterations: u32,
    /// Optional wall-clock bound, checked when a clock is available.
    pub timeout: Option<Duration>,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            tolerance_deg: 1.0,
            increment_deg: 1.0,
            turn_speed: 80.0,
            max_iterations: 720,
            timeout: Some(Duration::from_secs(15)),
        }
    }
}

impl ServoConfig {
    /// Check tolerances and bounds.
    pub fn validate(&self) -> ConfigResult<()> {
        ensure_non_negative("servo.tolerance_deg", self.tolerance_deg as f64)?;
        ensure_non_negative("servo.increment_deg", self.increment_deg as f64)?;
        ensure_non_negative("servo.turn_speed", self.turn_speed as f64)?;
        ensure_nonzero("servo.max_iterations", self.max_iterations)
    }
}

// ─── Outcomes ───────────────────────────────────────────────────────────────

/// How a turn ended.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ServoOutcome {
    /// Within tolerance.
    Converged {
        /// Rotation increments issued.
        iterations: u32,
    },
    /// Iteration or wall-clock bound hit first.
    TimedOut {
        /// Rotation increments issued.
        iterations: u32,
        /// Last known signed error, if any heading was read.
        last_error_deg: Option<f32>,
    },
    /// Cancelled from outside.
    Cancelled {
        /// Rotation increments issued.
        iterations: u32,
    },
}

impl ServoOutcome {
    /// Whether the target heading was reached.
    pub fn converged(&self) -> bool {
        matches!(self, ServoOutcome::Converged { .. })
    }
}

/// Result of one [`BearingTask::poll`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TaskPoll {
    /// Turn one increment this way, then poll again.
    Rotate(Rotation),
    /// Heading unreadable this iteration; hold still and poll again.
    Hold,
    /// Finished.
    Done(ServoOutcome),
}

// ─── Task ───────────────────────────────────────────────────────────────────

/// One in-progress turn, advanced cooperatively.
#[derive(Clone, Debug, PartialEq)]
pub struct BearingTask {
    target_deg: f32,
    tolerance_deg: f32,
    max_iterations: u32,
    timeout: Option<Duration>,
    started_at: Option<Duration>,
    iterations: u32,
    last_error_deg: Option<f32>,
}

impl BearingTask {
    /// Heading this task turns toward.
    pub fn target_deg(&self) -> f32 {
        self.target_deg
    }

    /// Iterations used so far.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Advance by one iteration.
    ///
    /// - `heading`: current heading, `None` if unreadable.
    /// - `now`: clock reading, `None` if no clock; the first reading starts the
    ///   timeout window.
    /// - `cancelled`: abort request.
    pub fn poll(&mut self, heading: Option<f32>, now: Option<Duration>, cancelled: bool) -> TaskPoll {
        if cancelled {
            return TaskPoll::Done(ServoOutcome::Cancelled {
                iterations: self.iterations,
            });
        }

        let error = heading.filter(|h| h.is_finite()).map(|h| shortest_error(self.target_deg, h));
        if let Some(e) = error {
            self.last_error_deg = Some(e);
            if abs_f32(e) <= self.tolerance_deg {
                return TaskPoll::Done(ServoOutcome::Converged {
                    iterations: self.iterations,
                });
            }
        }

        if self.iterations >= self.max_iterations || self.deadline_passed(now) {
            return TaskPoll::Done(ServoOutcome::TimedOut {
                iterations: self.iterations,
                last_error_deg: self.last_error_deg,
            });
        }

        self.iterations += 1;
        match error {
            Some(e) => TaskPoll::Rotate(Rotation::toward(e)),
            None => TaskPoll::Hold,
        }
    }

    fn deadline_passed(&mut self, now: Option<Duration>) -> bool {
        let (Some(limit), Some(now)) = (self.timeout, now) else {
            return false;
        };
        let start = *self.started_at.get_or_insert(now);
        now.saturating_sub(start) >= limit
    }
}

// ─── Servo ──────────────────────────────────────────────────────────────────

/// Closed-loop "turn until facing" routine.
#[derive(Clone, Debug, Default)]
pub struct BearingServo {
    config: ServoConfig,
}

impl BearingServo {
    /// Servo with the given tolerances.
    pub fn new(config: ServoConfig) -> Self {
        Self { config }
    }

    /// The configuration in use.
    pub fn config(&self) -> &ServoConfig {
        &self.config
    }

    /// Single-step decision: which way to turn, or `None` if already facing
    /// `target_deg` within tolerance.
    pub fn correction(&self, target_deg: f32, current_deg: f32) -> Option<Rotation> {
        let e = shortest_error(target_deg, current_deg);
        if abs_f32(e) <= self.config.tolerance_deg {
            None
        } else {
            Some(Rotation::toward(e))
        }
    }

    /// Begin a cooperative turn toward `target_deg`.
    pub fn start(&self, target_deg: f32) -> BearingTask {
        BearingTask {
            target_deg: wrap_degrees(target_deg),
            tolerance_deg: self.config.tolerance_deg,
            max_iterations: self.config.max_iterations,
            timeout: self.config.timeout,
            started_at: None,
            iterations: 0,
            last_error_deg: None,
        }
    }

    /// Turn until facing `target_deg`, the blocking way.
    ///
    /// `heading` is sampled once per iteration (non-finite readings hold still);
    /// `rotate` is asked to turn one increment of `increment_deg`. Returns when
    /// converged, cancelled, or out of budget.
    pub fn turn_to<H, R>(
        &self,
        target_deg: f32,
        mut heading: H,
        mut rotate: R,
        cancel: &CancelToken,
        clock: Option<&dyn Clock>,
    ) -> ServoOutcome
    where
        H: FnMut() -> f32,
        R: FnMut(Rotation, f32),
    {
        let mut task = self.start(target_deg);
        loop {
            let now = clock.map(|c| c.now());
            match task.poll(Some(heading()), now, cancel.is_cancelled()) {
                TaskPoll::Rotate(dir) => rotate(dir, self.config.increment_deg),
                TaskPoll::Hold => {}
                TaskPoll::Done(outcome) => {
                    if let ServoOutcome::TimedOut { iterations, last_error_deg } = outcome {
                        tracing::warn!(target_deg, iterations, ?last_error_deg, "bearing servo did not converge");
                    }
                    return outcome;
                }
            }
        }
    }
}
