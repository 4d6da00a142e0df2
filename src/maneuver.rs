//! Cooperative multi-tick sub-routines.
//!
//! A [`Maneuver`] is a short fixed script of steps (arm moves, timed drives,
//! bearing turns, a forward line probe). The control loop polls it once per
//! tick and it answers with exactly one [`Command`] or with its outcome. Between
//! polls the loop is free to let a safety behavior drive instead, or to cancel.
//!
//! Turns are executed by a [`BearingTask`], so they inherit the servo's
//! iteration and wall-clock bounds.

use core::time::Duration;

use heapless::Vec as HVec;

use crate::bearing::{wrap_degrees, BearingServo, BearingTask, ServoOutcome, TaskPoll};
use crate::behavior::{ArmCommand, Command};
use crate::error::{ensure_finite, ensure_non_negative, ConfigResult};
use crate::perception::PerceptionSnapshot;

/// Longest step script a maneuver can hold.
pub const MAX_STEPS: usize = 4;

// ─── Requests and outcomes ──────────────────────────────────────────────────

/// What the goal machine asks for.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ManeuverRequest {
    /// Drive clear of the boundary line, then face `heading_deg`.
    Reorient {
        /// Absolute heading to face.
        heading_deg: f32,
    },
    /// Put the block down, back off, turn away.
    DropSequence {
        /// Press the block down instead of releasing it.
        compress: bool,
    },
    /// Fixed turn to break out after losing a block or a failed turn.
    RecoveryTurn,
    /// Drive straight ahead until a line shows up or the probe runs out.
    ProbeForward,
}

impl ManeuverRequest {
    /// The kind tag of this request.
    pub fn kind(&self) -> ManeuverKind {
        match self {
            ManeuverRequest::Reorient { .. } => ManeuverKind::Reorient,
            ManeuverRequest::DropSequence { .. } => ManeuverKind::DropSequence,
            ManeuverRequest::RecoveryTurn => ManeuverKind::RecoveryTurn,
            ManeuverRequest::ProbeForward => ManeuverKind::ProbeForward,
        }
    }
}

/// [`ManeuverRequest`] without its parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ManeuverKind {
    /// See [`ManeuverRequest::Reorient`].
    Reorient,
    /// See [`ManeuverRequest::DropSequence`].
    DropSequence,
    /// See [`ManeuverRequest::RecoveryTurn`].
    RecoveryTurn,
    /// See [`ManeuverRequest::ProbeForward`].
    ProbeForward,
}

/// How a maneuver ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManeuverOutcome {
    /// Every step ran.
    Completed,
    /// A turn did not converge within its bounds.
    TimedOut,
    /// Aborted from outside.
    Cancelled,
}

impl From<ServoOutcome> for ManeuverOutcome {
    fn from(outcome: ServoOutcome) -> Self {
        match outcome {
            ServoOutcome::Converged { .. } => ManeuverOutcome::Completed,
            ServoOutcome::TimedOut { .. } => ManeuverOutcome::TimedOut,
            ServoOutcome::Cancelled { .. } => ManeuverOutcome::Cancelled,
        }
    }
}

/// Result of one [`Maneuver::poll`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ManeuverPoll {
    /// Issue this command and poll again next tick.
    Command(Command),
    /// Done; nothing to issue from this maneuver.
    Finished(ManeuverOutcome),
}

// ─── Config ─────────────────────────────────────────────────────────────────

/// Speeds, durations and angles of the scripted motions.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotionConfig {
    /// Forward speed for crossing and probing.
    pub drive_speed: f32,
    /// Reverse speed when backing off a dropped block.
    pub reverse_speed: f32,
    /// Ticks spent backing off.
    pub back_off_ticks: u32,
    /// Ticks spent driving clear of the line before reorienting.
    pub cross_ticks: u32,
    /// Forward ticks for a line probe.
    pub probe_ticks: u32,
    /// Relative turn of the recovery maneuver, degrees (negative turns left).
    pub recovery_turn_deg: f32,
    /// Relative turn after a drop, degrees.
    pub turn_away_deg: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            drive_speed: 200.0,
            reverse_speed: 200.0,
            back_off_ticks: 20,
            cross_ticks: 16,
            probe_ticks: 50,
            recovery_turn_deg: -28.0,
            turn_away_deg: 180.0,
        }
    }
}

impl MotionConfig {
    /// Check speeds and angles.
    pub fn validate(&self) -> ConfigResult<()> {
        ensure_non_negative("motion.drive_speed", self.drive_speed as f64)?;
        ensure_non_negative("motion.reverse_speed", self.reverse_speed as f64)?;
        ensure_finite("motion.recovery_turn_deg", self.recovery_turn_deg as f64)?;
        ensure_finite("motion.turn_away_deg", self.turn_away_deg as f64)
    }
}

// ─── Steps ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
enum Step {
    Arm(ArmCommand),
    Drive { left: f32, right: f32, ticks: u32 },
    TurnTo(f32),
    /// Relative turn, resolved against the first valid heading.
    TurnBy { delta_deg: f32, waited: u32 },
    ProbeLine { ticks: u32 },
}

enum StepPoll {
    Emit(Command),
    Next,
    Finish(ManeuverOutcome),
}

// ─── Maneuver ───────────────────────────────────────────────────────────────

/// One running sub-routine.
#[derive(Clone, Debug, PartialEq)]
pub struct Maneuver {
    kind: ManeuverKind,
    steps: HVec<Step, MAX_STEPS>,
    cursor: usize,
    turn: Option<BearingTask>,
    drive_speed: f32,
}

impl Maneuver {
    /// Script for `request`.
    pub fn plan(request: ManeuverRequest, motion: &MotionConfig) -> Self {
        let fwd = motion.drive_speed;
        let back = -motion.reverse_speed;
        let script: &[Step] = match request {
            ManeuverRequest::Reorient { heading_deg } => &[
                Step::Drive {
                    left: fwd,
                    right: fwd,
                    ticks: motion.cross_ticks,
                },
                Step::TurnTo(heading_deg),
            ],
            ManeuverRequest::DropSequence { compress } => &[
                Step::Arm(if compress {
                    ArmCommand::Compress
                } else {
                    ArmCommand::Release
                }),
                Step::Arm(ArmCommand::Raise),
                Step::Drive {
                    left: back,
                    right: back,
                    ticks: motion.back_off_ticks,
                },
                Step::TurnBy {
                    delta_deg: motion.turn_away_deg,
                    waited: 0,
                },
            ],
            ManeuverRequest::RecoveryTurn => &[Step::TurnBy {
                delta_deg: motion.recovery_turn_deg,
                waited: 0,
            }],
            ManeuverRequest::ProbeForward => &[Step::ProbeLine {
                ticks: motion.probe_ticks,
            }],
        };
        Self {
            kind: request.kind(),
            steps: script.iter().copied().take(MAX_STEPS).collect(),
            cursor: 0,
            turn: None,
            drive_speed: fwd,
        }
    }

    /// Which maneuver this is.
    pub fn kind(&self) -> ManeuverKind {
        self.kind
    }

    /// Index of the step in progress.
    pub fn step_index(&self) -> usize {
        self.cursor
    }

    /// Number of steps in the script.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Advance by one tick.
    pub fn poll(
        &mut self,
        snapshot: &PerceptionSnapshot,
        servo: &BearingServo,
        now: Option<Duration>,
        cancelled: bool,
    ) -> ManeuverPoll {
        if cancelled {
            return ManeuverPoll::Finished(ManeuverOutcome::Cancelled);
        }
        while self.cursor < self.steps.len() {
            match self.poll_step(snapshot, servo, now) {
                StepPoll::Emit(cmd) => return ManeuverPoll::Command(cmd),
                StepPoll::Next => {
                    self.cursor += 1;
                    self.turn = None;
                }
                StepPoll::Finish(outcome) => return ManeuverPoll::Finished(outcome),
            }
        }
        ManeuverPoll::Finished(ManeuverOutcome::Completed)
    }

    fn poll_step(&mut self, snapshot: &PerceptionSnapshot, servo: &BearingServo, now: Option<Duration>) -> StepPoll {
        let drive_speed = self.drive_speed;
        let Some(step) = self.steps.get_mut(self.cursor) else {
            return StepPoll::Next;
        };
        match step {
            Step::Arm(arm) => {
                let cmd = Command::stop().with_arm(*arm);
                // consumed by this emit
                self.cursor += 1;
                StepPoll::Emit(cmd)
            }
            Step::Drive { left, right, ticks } => {
                if *ticks == 0 {
                    return StepPoll::Next;
                }
                *ticks -= 1;
                StepPoll::Emit(Command::drive(*left, *right))
            }
            Step::ProbeLine { ticks } => {
                if *ticks == 0 || snapshot.on_boundary_line {
                    return StepPoll::Next;
                }
                *ticks -= 1;
                StepPoll::Emit(Command::drive(drive_speed, drive_speed))
            }
            Step::TurnTo(target) => {
                let target = *target;
                self.poll_turn(target, snapshot, servo, now)
            }
            Step::TurnBy { delta_deg, waited } => {
                if self.turn.is_none() {
                    match snapshot.heading() {
                        Some(h) => {
                            let target = wrap_degrees(h + *delta_deg);
                            *step = Step::TurnTo(target);
                            return self.poll_turn(target, snapshot, servo, now);
                        }
                        None if *waited >= servo.config().max_iterations => {
                            return StepPoll::Finish(ManeuverOutcome::TimedOut);
                        }
                        None => {
                            *waited += 1;
                            return StepPoll::Emit(Command::stop());
                        }
                    }
                }
                StepPoll::Next
            }
        }
    }

    fn poll_turn(
        &mut self,
        target: f32,
        snapshot: &PerceptionSnapshot,
        servo: &BearingServo,
        now: Option<Duration>,
    ) -> StepPoll {
        let task = self.turn.get_or_insert_with(|| servo.start(target));
        match task.poll(snapshot.heading(), now, false) {
            TaskPoll::Rotate(dir) => StepPoll::Emit(Command::rotate(dir, servo.config().turn_speed)),
            TaskPoll::Hold => StepPoll::Emit(Command::stop()),
            TaskPoll::Done(ServoOutcome::Converged { .. }) => StepPoll::Next,
            TaskPoll::Done(other) => {
                if let ServoOutcome::TimedOut { iterations, last_error_deg } = other {
                    tracing::warn!(maneuver = ?self.kind, target_deg = target, iterations, ?last_error_deg, "turn did not converge");
                }
                StepPoll::Finish(other.into())
            }
        }
    }
}
