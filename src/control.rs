//! The closed loop: one tick reads the sensors, classifies, lets the goal
//! machine react, picks one source of motion, and writes the actuators.
//!
//! ```text
//! SensorPort ─► classify ─► GoalStateMachine ─┬─► safety behavior (preempts)
//!                                             ├─► active Maneuver step
//!                                             └─► Arbiter winner ─► ActuatorPort
//! ```
//!
//! # Invariants
//!
//! - Exactly one of {safety behavior, maneuver step, arbiter winner, idle}
//!   drives the wheels per tick.
//! - A safety behavior pauses an active maneuver for that tick only; the
//!   maneuver resumes on the next tick.
//! - A raised [`CancelToken`] ends the active maneuver with
//!   [`ManeuverOutcome::Cancelled`](crate::maneuver::ManeuverOutcome::Cancelled).
//! - An idle tick issues no actuator call.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::arbiter::Arbiter;
use crate::bearing::BearingServo;
use crate::behavior::{Behavior, BehaviorContext, Command};
use crate::behaviors::{line_following_behaviors, sorting_behaviors};
use crate::config::ControllerConfig;
use crate::error::ConfigResult;
use crate::goal::{GoalEffects, GoalState, GoalStateMachine, Phase, PhaseChange, Zone};
use crate::maneuver::{Maneuver, ManeuverKind, ManeuverPoll, MotionConfig};
use crate::perception::{PerceptionClassifier, PerceptionSnapshot, RawFrame};
use crate::pid::LineFollowController;
use crate::port::{ActuatorPort, CancelToken, Clock, SensorPort};

/// Who drove the wheels on a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandSource {
    /// An arbitrated behavior, by name.
    Behavior(&'static str),
    /// A step of the active maneuver.
    Maneuver(ManeuverKind),
    /// Nothing applied.
    Idle,
}

/// What happened on one tick.
#[derive(Clone, Debug, PartialEq)]
pub struct TickReport {
    /// 1-based tick number.
    pub tick: u64,
    /// The snapshot the tick acted on.
    pub snapshot: PerceptionSnapshot,
    /// Phase after the tick.
    pub phase: Phase,
    /// Zone after the tick.
    pub zone: Zone,
    /// Phase change made this tick, if any.
    pub transition: Option<PhaseChange>,
    /// The zone flipped this tick.
    pub zone_flipped: bool,
    /// Source of the command.
    pub source: CommandSource,
    /// A safety behavior paused the active maneuver.
    pub preempted: bool,
    /// The command issued, `None` when idle.
    pub command: Option<Command>,
}

/// Owns every controller component and the two ports.
pub struct ControlLoop<S, A> {
    classifier: PerceptionClassifier,
    goal_machine: GoalStateMachine,
    goal: GoalState,
    pid: LineFollowController,
    servo: BearingServo,
    arbiter: Arbiter,
    motion: MotionConfig,
    maneuver: Option<Maneuver>,
    sensors: S,
    actuators: A,
    clock: Option<Box<dyn Clock>>,
    cancel: CancelToken,
    tick_period_ms: u32,
    ticks: u64,
}

impl<S: SensorPort, A: ActuatorPort> ControlLoop<S, A> {
    /// Validate `config` and assemble a loop around `behaviors`.
    pub fn new(
        config: ControllerConfig,
        behaviors: Vec<Box<dyn Behavior>>,
        sensors: S,
        actuators: A,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let arbiter = Arbiter::new(behaviors, &config.arbiter)?;
        tracing::info!(
            behaviors = arbiter.len(),
            tick_period_ms = config.tick_period_ms,
            "control loop ready"
        );
        Ok(Self {
            classifier: PerceptionClassifier::new(config.perception),
            goal_machine: GoalStateMachine::new(config.goal),
            goal: GoalState::default(),
            pid: LineFollowController::new(config.pid),
            servo: BearingServo::new(config.servo),
            arbiter,
            motion: config.motion,
            maneuver: None,
            sensors,
            actuators,
            clock: None,
            cancel: CancelToken::new(),
            tick_period_ms: config.tick_period_ms,
            ticks: 0,
        })
    }

    /// Loop with the block-sorting behavior set.
    pub fn sorting(config: ControllerConfig, sensors: S, actuators: A) -> ConfigResult<Self> {
        let behaviors = sorting_behaviors(&config.behaviors);
        Self::new(config, behaviors, sensors, actuators)
    }

    /// Loop with the line-following behavior set.
    pub fn line_following(config: ControllerConfig, sensors: S, actuators: A) -> ConfigResult<Self> {
        let behaviors = line_following_behaviors(&config.behaviors, config.perception.line_setpoint);
        Self::new(config, behaviors, sensors, actuators)
    }

    /// Enable wall-clock bounds on turns.
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Start from a given goal state instead of searching in zone A.
    pub fn with_goal(mut self, goal: GoalState) -> Self {
        self.goal = goal;
        self
    }

    /// Share an existing cancellation flag.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Handle that cancels the active maneuver when raised.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run one sense-decide-act cycle.
    pub fn tick(&mut self) -> TickReport {
        self.ticks += 1;
        let raw = RawFrame {
            reflectance: self.sensors.read_reflectance(),
            color: self.sensors.read_color_frame(),
            distance_mm: self.sensors.read_distance_mm(),
            heading_deg: self.sensors.read_heading_deg(),
            battery_frac: self.sensors.read_battery_frac(),
        };
        let snapshot = self.classifier.classify(&raw);
        let now = self.clock.as_ref().map(|c| c.now());
        let cancelled = self.cancel.is_cancelled();

        let fx = self.goal_machine.evaluate(&mut self.goal, &snapshot);
        let mut transition = fx.transition;
        let zone_flipped = fx.zone_flipped;
        self.apply(fx);

        let mut issued: Option<(CommandSource, Command)> = None;
        let mut preempted = false;

        if self.maneuver.is_some() && !cancelled {
            let mut ctx = BehaviorContext {
                snapshot: &snapshot,
                goal: &self.goal,
                pid: &mut self.pid,
                servo: &self.servo,
            };
            if let Some(win) = self.arbiter.step_safety(&mut ctx) {
                issued = Some((CommandSource::Behavior(win.name), win.command));
                preempted = true;
            }
        }

        if issued.is_none() {
            if let Some(m) = self.maneuver.as_mut() {
                let kind = m.kind();
                match m.poll(&snapshot, &self.servo, now, cancelled) {
                    ManeuverPoll::Command(cmd) => issued = Some((CommandSource::Maneuver(kind), cmd)),
                    ManeuverPoll::Finished(outcome) => {
                        self.maneuver = None;
                        tracing::debug!(maneuver = ?kind, ?outcome, "maneuver finished");
                        let fx = self.goal_machine.on_maneuver_finished(&mut self.goal, kind, outcome);
                        transition = fx.transition.or(transition);
                        self.apply(fx);
                    }
                }
            }
        }

        if issued.is_none() {
            let mut ctx = BehaviorContext {
                snapshot: &snapshot,
                goal: &self.goal,
                pid: &mut self.pid,
                servo: &self.servo,
            };
            if let Some(win) = self.arbiter.step(&mut ctx) {
                issued = Some((CommandSource::Behavior(win.name), win.command));
            }
        }

        let (source, command) = match issued {
            Some((source, cmd)) => {
                self.issue(&cmd);
                (source, Some(cmd))
            }
            None => (CommandSource::Idle, None),
        };

        tracing::trace!(
            tick = self.ticks,
            phase = ?self.goal.phase,
            zone = ?self.goal.current_zone,
            ?source,
            preempted,
            "tick"
        );

        TickReport {
            tick: self.ticks,
            snapshot,
            phase: self.goal.phase,
            zone: self.goal.current_zone,
            transition,
            zone_flipped,
            source,
            preempted,
            command,
        }
    }

    /// Run `ticks` cycles back to back and collect their reports.
    pub fn run_for(&mut self, ticks: usize) -> Vec<TickReport> {
        (0..ticks).map(|_| self.tick()).collect()
    }

    /// Tick every `tick_period_ms` until `stop` is raised. Returns the number
    /// of ticks run.
    #[cfg(feature = "std")]
    pub fn run_until(&mut self, stop: &CancelToken) -> u64 {
        let period = self.tick_period();
        let mut ran = 0;
        while !stop.is_cancelled() {
            self.tick();
            ran += 1;
            std::thread::sleep(period);
        }
        tracing::info!(ticks = ran, "control loop stopped");
        self.actuators.set_wheel_speeds(0.0, 0.0);
        ran
    }

    fn apply(&mut self, fx: GoalEffects) {
        if let Some(request) = fx.maneuver {
            if let Some(old) = &self.maneuver {
                tracing::debug!(superseded = ?old.kind(), "maneuver replaced");
            }
            tracing::debug!(?request, "maneuver started");
            self.maneuver = Some(Maneuver::plan(request, &self.motion));
        }
        if fx.reset_pid {
            self.pid.reset();
        }
        if let Some(arm) = fx.arm {
            self.actuators.set_arm(arm);
        }
        if let Some(sound) = fx.sound {
            self.actuators.play_sound(sound);
        }
    }

    fn issue(&mut self, cmd: &Command) {
        self.actuators.set_wheel_speeds(cmd.left_speed, cmd.right_speed);
        if let Some(arm) = cmd.arm {
            self.actuators.set_arm(arm);
        }
        if let Some(sound) = cmd.sound {
            self.actuators.play_sound(sound);
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    /// Task progress.
    pub fn goal(&self) -> &GoalState {
        &self.goal
    }

    /// Line follower.
    pub fn pid(&self) -> &LineFollowController {
        &self.pid
    }

    /// Behavior arbiter.
    pub fn arbiter(&self) -> &Arbiter {
        &self.arbiter
    }

    /// Kind of the maneuver in progress.
    pub fn active_maneuver(&self) -> Option<ManeuverKind> {
        self.maneuver.as_ref().map(Maneuver::kind)
    }

    /// Pause between ticks in [`ControlLoop::run_until`].
    pub fn tick_period(&self) -> core::time::Duration {
        core::time::Duration::from_millis(self.tick_period_ms as u64)
    }

    /// Ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Sensor port.
    pub fn sensors(&self) -> &S {
        &self.sensors
    }

    /// Sensor port, mutably (for scripted inputs).
    pub fn sensors_mut(&mut self) -> &mut S {
        &mut self.sensors
    }

    /// Actuator port.
    pub fn actuators(&self) -> &A {
        &self.actuators
    }

    /// Actuator port, mutably.
    pub fn actuators_mut(&mut self) -> &mut A {
        &mut self.actuators
    }
}

impl<S, A> core::fmt::Debug for ControlLoop<S, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("ticks", &self.ticks)
            .field("goal", &self.goal)
            .field("maneuver", &self.maneuver.as_ref().map(Maneuver::kind))
            .field("arbiter", &self.arbiter)
            .finish()
    }
}
