//! Candidate actions and the command they produce.
//!
//! A [`Behavior`] pairs a fixed priority with an applicability predicate and an
//! action. Predicates read the per-tick [`PerceptionSnapshot`] and the
//! [`GoalState`] but cannot change either; actions get a [`BehaviorContext`]
//! with mutable access only to the controller state they own (the PID).
//!
//! Lower priority number wins. Priorities are unique within one arbiter.

use crate::bearing::{BearingServo, Rotation};
use crate::goal::GoalState;
use crate::perception::PerceptionSnapshot;
use crate::pid::LineFollowController;

// ─── Actuator vocabulary ────────────────────────────────────────────────────

/// Gripper arm positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ArmCommand {
    /// Grip the block in front.
    Close,
    /// Open and let go.
    Release,
    /// Lift clear of the floor.
    Raise,
    /// Press the held block down in place.
    Compress,
}

/// Audible cues. Playback is fire and forget.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SoundEvent {
    /// A block came into view.
    BlockSpotted,
    /// A block of known color was gripped.
    BlockAcquired,
    /// A block of unknown color was released.
    BlockRejected,
    /// A zone boundary was crossed.
    ZoneCrossed,
    /// A block was dropped at home.
    Delivered,
    /// The bearing servo gave up.
    ServoTimeout,
}

/// What the robot does this tick.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Command {
    /// Left wheel speed.
    pub left_speed: f32,
    /// Right wheel speed.
    pub right_speed: f32,
    /// Optional arm movement.
    pub arm: Option<ArmCommand>,
    /// Optional sound.
    pub sound: Option<SoundEvent>,
}

impl Command {
    /// Drive the wheels and nothing else.
    pub fn drive(left_speed: f32, right_speed: f32) -> Self {
        Self {
            left_speed,
            right_speed,
            arm: None,
            sound: None,
        }
    }

    /// Both wheels stopped.
    pub fn stop() -> Self {
        Self::default()
    }

    /// In-place turn.
    pub fn rotate(direction: Rotation, speed: f32) -> Self {
        let (l, r) = direction.wheel_speeds(speed);
        Self::drive(l, r)
    }

    /// Attach an arm movement.
    pub fn with_arm(mut self, arm: ArmCommand) -> Self {
        self.arm = Some(arm);
        self
    }

    /// Attach a sound.
    pub fn with_sound(mut self, sound: SoundEvent) -> Self {
        self.sound = Some(sound);
        self
    }

    /// Both wheels at zero.
    pub fn is_stationary(&self) -> bool {
        self.left_speed == 0.0 && self.right_speed == 0.0
    }
}

// ─── Behavior ───────────────────────────────────────────────────────────────

/// Everything an action may look at or drive.
pub struct BehaviorContext<'a> {
    /// This tick's predicates.
    pub snapshot: &'a PerceptionSnapshot,
    /// Task progress, read-only.
    pub goal: &'a GoalState,
    /// Line follower state.
    pub pid: &'a mut LineFollowController,
    /// Heading servo for single-step corrections.
    pub servo: &'a BearingServo,
}

/// A prioritized candidate action.
pub trait Behavior {
    /// Stable name for logs and activation counters.
    fn name(&self) -> &'static str;

    /// Fixed priority; lower wins.
    fn priority(&self) -> u32;

    /// Applicability predicate. Must be cheap and side-effect free.
    fn should_run(&self, snapshot: &PerceptionSnapshot, goal: &GoalState) -> bool;

    /// Produce this tick's command.
    fn run(&mut self, ctx: &mut BehaviorContext<'_>) -> Command;
}

/// Predicate signature for [`FnBehavior`].
pub type Predicate = fn(&PerceptionSnapshot, &GoalState) -> bool;

/// Action signature for [`FnBehavior`].
pub type Action = fn(&mut BehaviorContext<'_>) -> Command;

/// Stateless behavior assembled from two function pointers.
#[derive(Clone, Copy)]
pub struct FnBehavior {
    name: &'static str,
    priority: u32,
    predicate: Predicate,
    action: Action,
}

impl FnBehavior {
    /// Wrap a predicate and an action.
    pub const fn new(name: &'static str, priority: u32, predicate: Predicate, action: Action) -> Self {
        Self {
            name,
            priority,
            predicate,
            action,
        }
    }
}

impl core::fmt::Debug for FnBehavior {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FnBehavior")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish()
    }
}

impl Behavior for FnBehavior {
    fn name(&self) -> &'static str {
        self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn should_run(&self, snapshot: &PerceptionSnapshot, goal: &GoalState) -> bool {
        (self.predicate)(snapshot, goal)
    }

    fn run(&mut self, ctx: &mut BehaviorContext<'_>) -> Command {
        (self.action)(ctx)
    }
}
