//! The stock behavior sets.
//!
//! | Priority | Behavior | Applies when | Does |
//! |---|---|---|---|
//! | 1 | [`AvoidHazard`] | zone marker ahead, empty-handed | edge back; spin free if stuck |
//! | 2 | [`AvoidWall`] | wall close ahead | reverse |
//! | 3 | [`SeekCharger`] | battery low | drive at the pad, or wander |
//! | 5 | [`Transport`] | phase is `Transporting` | hold the home heading |
//! | 6 | [`Approach`] | phase is `Approaching` | drive forward |
//! | 7 | [`Search`] | phase is `Searching` | pivot |
//! | 10 | [`FollowLine`] | always | PID on reflectance |
//!
//! [`sorting_behaviors`] assembles priorities 1 through 7;
//! [`line_following_behaviors`] assembles wall avoidance plus the line follower.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use crate::behavior::{Behavior, BehaviorContext, Command};
use crate::error::{ensure_fraction, ensure_non_negative, ensure_nonzero, ConfigResult};
use crate::goal::{GoalState, Phase};
use crate::perception::PerceptionSnapshot;

/// Tuning shared by the stock behaviors.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BehaviorConfig {
    /// Cruise speed.
    pub base_speed: f32,
    /// Outer wheel speed when pivoting.
    pub turn_speed: f32,
    /// Below this battery fraction the robot goes looking for the charger.
    pub low_battery_frac: f32,
    /// Hazard ticks before the escape spin.
    pub hazard_stuck_ticks: u32,
    /// Upper bound of the inner wheel speed while wandering.
    pub wander_max_speed: f32,
    /// Seed of the wander sequence.
    pub wander_seed: u32,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            base_speed: 200.0,
            turn_speed: 200.0,
            low_battery_frac: 0.25,
            hazard_stuck_ticks: 10,
            wander_max_speed: 130.0,
            wander_seed: 0x9E37_79B9,
        }
    }
}

impl BehaviorConfig {
    /// Check speeds and thresholds.
    pub fn validate(&self) -> ConfigResult<()> {
        ensure_non_negative("behaviors.base_speed", self.base_speed as f64)?;
        ensure_non_negative("behaviors.turn_speed", self.turn_speed as f64)?;
        ensure_non_negative("behaviors.wander_max_speed", self.wander_max_speed as f64)?;
        ensure_fraction("behaviors.low_battery_frac", self.low_battery_frac)?;
        ensure_nonzero("behaviors.hazard_stuck_ticks", self.hazard_stuck_ticks)
    }
}

// ─── Safety ─────────────────────────────────────────────────────────────────

/// Keep out of the drop-off zones unless carrying something to drop there.
#[derive(Clone, Debug)]
pub struct AvoidHazard {
    speed: f32,
    stuck_after: u32,
    stuck_counter: u32,
}

impl AvoidHazard {
    /// Priority 1.
    pub const PRIORITY: u32 = 1;

    /// Build from shared tuning.
    pub fn new(config: &BehaviorConfig) -> Self {
        Self {
            speed: config.base_speed,
            stuck_after: config.hazard_stuck_ticks,
            stuck_counter: 0,
        }
    }

    /// Consecutive runs since the last escape spin.
    pub fn stuck_counter(&self) -> u32 {
        self.stuck_counter
    }
}

impl Behavior for AvoidHazard {
    fn name(&self) -> &'static str {
        "avoid_hazard"
    }

    fn priority(&self) -> u32 {
        Self::PRIORITY
    }

    fn should_run(&self, snapshot: &PerceptionSnapshot, goal: &GoalState) -> bool {
        snapshot.facing_hazard && !goal.is_carrying()
    }

    fn run(&mut self, _ctx: &mut BehaviorContext<'_>) -> Command {
        self.stuck_counter += 1;
        if self.stuck_counter > self.stuck_after {
            self.stuck_counter = 0;
            return Command::drive(self.speed, -self.speed);
        }
        // reverse while yawing off the corner
        Command::drive(-self.speed, -self.speed / 2.0)
    }
}

/// Back away from walls.
#[derive(Clone, Debug)]
pub struct AvoidWall {
    speed: f32,
}

impl AvoidWall {
    /// Priority 2.
    pub const PRIORITY: u32 = 2;

    /// Build from shared tuning.
    pub fn new(config: &BehaviorConfig) -> Self {
        Self {
            speed: config.base_speed,
        }
    }
}

impl Behavior for AvoidWall {
    fn name(&self) -> &'static str {
        "avoid_wall"
    }

    fn priority(&self) -> u32 {
        Self::PRIORITY
    }

    fn should_run(&self, snapshot: &PerceptionSnapshot, _goal: &GoalState) -> bool {
        snapshot.facing_wall
    }

    fn run(&mut self, _ctx: &mut BehaviorContext<'_>) -> Command {
        Command::drive(-self.speed, -self.speed)
    }
}

// ─── Housekeeping ───────────────────────────────────────────────────────────

/// Head for the charging pad when the battery runs low.
#[derive(Clone, Debug)]
pub struct SeekCharger {
    threshold: f32,
    speed: f32,
    turn_speed: f32,
    wander_max: f32,
    rng: u32,
}

impl SeekCharger {
    /// Priority 3.
    pub const PRIORITY: u32 = 3;

    /// Build from shared tuning.
    pub fn new(config: &BehaviorConfig) -> Self {
        Self {
            threshold: config.low_battery_frac,
            speed: config.base_speed,
            turn_speed: config.turn_speed,
            wander_max: config.wander_max_speed,
            // xorshift has a fixed point at zero
            rng: config.wander_seed.max(1),
        }
    }

    fn next_unit(&mut self) -> f32 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        (x >> 8) as f32 / (1u32 << 24) as f32
    }
}

impl Behavior for SeekCharger {
    fn name(&self) -> &'static str {
        "seek_charger"
    }

    fn priority(&self) -> u32 {
        Self::PRIORITY
    }

    fn should_run(&self, snapshot: &PerceptionSnapshot, _goal: &GoalState) -> bool {
        snapshot.battery_frac < self.threshold
    }

    fn run(&mut self, ctx: &mut BehaviorContext<'_>) -> Command {
        if ctx.snapshot.seeing_charger {
            return Command::drive(self.speed, self.speed);
        }
        let inner = 1.0 + self.next_unit() * (self.wander_max - 1.0).max(0.0);
        Command::drive(self.turn_speed, inner)
    }
}

// ─── Task ───────────────────────────────────────────────────────────────────

/// Carry the block along the heading toward its home zone.
#[derive(Clone, Debug)]
pub struct Transport {
    speed: f32,
}

impl Transport {
    /// Priority 5.
    pub const PRIORITY: u32 = 5;

    /// Build from shared tuning.
    pub fn new(config: &BehaviorConfig) -> Self {
        Self {
            speed: config.base_speed,
        }
    }
}

impl Behavior for Transport {
    fn name(&self) -> &'static str {
        "transport"
    }

    fn priority(&self) -> u32 {
        Self::PRIORITY
    }

    fn should_run(&self, _snapshot: &PerceptionSnapshot, goal: &GoalState) -> bool {
        goal.phase == Phase::Transporting
    }

    fn run(&mut self, ctx: &mut BehaviorContext<'_>) -> Command {
        let correction = match (ctx.goal.target_heading_deg, ctx.snapshot.heading()) {
            (Some(target), Some(heading)) => ctx.servo.correction(target, heading),
            _ => None,
        };
        match correction {
            Some(dir) => Command::rotate(dir, ctx.servo.config().turn_speed),
            None => Command::drive(self.speed, self.speed),
        }
    }
}

/// Close in on the block in view.
#[derive(Clone, Debug)]
pub struct Approach {
    speed: f32,
}

impl Approach {
    /// Priority 6.
    pub const PRIORITY: u32 = 6;

    /// Build from shared tuning.
    pub fn new(config: &BehaviorConfig) -> Self {
        Self {
            speed: config.base_speed,
        }
    }
}

impl Behavior for Approach {
    fn name(&self) -> &'static str {
        "approach"
    }

    fn priority(&self) -> u32 {
        Self::PRIORITY
    }

    fn should_run(&self, _snapshot: &PerceptionSnapshot, goal: &GoalState) -> bool {
        goal.phase == Phase::Approaching
    }

    fn run(&mut self, _ctx: &mut BehaviorContext<'_>) -> Command {
        Command::drive(self.speed, self.speed)
    }
}

/// Pivot on the right wheel until something shows up.
#[derive(Clone, Debug)]
pub struct Search {
    turn_speed: f32,
}

impl Search {
    /// Priority 7.
    pub const PRIORITY: u32 = 7;

    /// Build from shared tuning.
    pub fn new(config: &BehaviorConfig) -> Self {
        Self {
            turn_speed: config.turn_speed,
        }
    }
}

impl Behavior for Search {
    fn name(&self) -> &'static str {
        "search"
    }

    fn priority(&self) -> u32 {
        Self::PRIORITY
    }

    fn should_run(&self, _snapshot: &PerceptionSnapshot, goal: &GoalState) -> bool {
        goal.phase == Phase::Searching
    }

    fn run(&mut self, _ctx: &mut BehaviorContext<'_>) -> Command {
        Command::drive(self.turn_speed, 0.0)
    }
}

/// PID line follower as a behavior of last resort.
#[derive(Clone, Debug)]
pub struct FollowLine {
    setpoint: f32,
}

impl FollowLine {
    /// Priority 10.
    pub const PRIORITY: u32 = 10;

    /// Follow the edge where reflectance equals `setpoint`.
    pub fn new(setpoint: f32) -> Self {
        Self { setpoint }
    }
}

impl Behavior for FollowLine {
    fn name(&self) -> &'static str {
        "follow_line"
    }

    fn priority(&self) -> u32 {
        Self::PRIORITY
    }

    fn should_run(&self, _snapshot: &PerceptionSnapshot, _goal: &GoalState) -> bool {
        true
    }

    fn run(&mut self, ctx: &mut BehaviorContext<'_>) -> Command {
        let (left, right) = ctx.pid.step(ctx.snapshot.reflectance, self.setpoint);
        Command::drive(left, right)
    }
}

// ─── Sets ───────────────────────────────────────────────────────────────────

/// Behaviors for the block-sorting task.
pub fn sorting_behaviors(config: &BehaviorConfig) -> Vec<Box<dyn Behavior>> {
    vec![
        Box::new(AvoidHazard::new(config)),
        Box::new(AvoidWall::new(config)),
        Box::new(SeekCharger::new(config)),
        Box::new(Transport::new(config)),
        Box::new(Approach::new(config)),
        Box::new(Search::new(config)),
    ]
}

/// Behaviors for plain line following.
pub fn line_following_behaviors(config: &BehaviorConfig, setpoint: f32) -> Vec<Box<dyn Behavior>> {
    vec![Box::new(AvoidWall::new(config)), Box::new(FollowLine::new(setpoint))]
}
