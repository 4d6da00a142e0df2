//! Task goal: which phase of the sort the robot is in and which zone it is in.
//!
//! The [`GoalStateMachine`] is evaluated once per tick, before arbitration. It is
//! the only code that changes [`GoalState::phase`] or [`GoalState::current_zone`];
//! behaviors see the state read-only.
//!
//! ```text
//! Searching ──see block──► Approaching ──close, known color──► Acquired
//!     ▲                        │                                  │
//!     │                  lost / unknown                 home here │ home elsewhere
//!     │                        ▼                                  ▼
//!     └──recovery turn──── Lost                 Delivering ◄── Transporting
//!     ▲                                              │       (crossing)
//!     └──────────────── drop sequence done ──────────┘
//! ```
//!
//! # Invariants
//!
//! - At most one phase change per evaluation. `Acquired` and `Lost` resolve on
//!   the following evaluation.
//! - A block whose color is `Unknown` at grab distance is never acquired.
//! - The zone flips exactly once per confirmed boundary crossing: crossings are
//!   latched on the rising edge of `on_boundary_line` and the latch only
//!   releases once the line is gone.

use heapless::Vec as HVec;

use crate::behavior::{ArmCommand, SoundEvent};
use crate::bearing::{abs_f32, shortest_error, wrap_degrees};
use crate::color::Color;
use crate::error::{ensure_finite, ensure_non_negative, ensure_nonzero, ConfigError, ConfigResult};
use crate::maneuver::{ManeuverKind, ManeuverOutcome, ManeuverRequest};
use crate::perception::PerceptionSnapshot;

/// Maximum number of entries in [`GoalConfig::home_zones`].
pub const MAX_HOME_ZONES: usize = 8;

// ─── Phase and zone ─────────────────────────────────────────────────────────

/// Where the robot is in the pick-and-sort cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Phase {
    /// Wandering, looking for a block.
    #[default]
    Searching,
    /// Driving toward a block in view.
    Approaching,
    /// The block disappeared or was rejected.
    Lost,
    /// A block of known color is in the gripper.
    Acquired,
    /// Carrying the block toward its home zone.
    Transporting,
    /// Dropping the block.
    Delivering,
}

/// One half of the arena, separated by a boundary line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Zone {
    /// Starting zone.
    #[default]
    A,
    /// The far side of the boundary.
    B,
}

impl Zone {
    /// The zone across the line.
    pub fn other(self) -> Self {
        match self {
            Zone::A => Zone::B,
            Zone::B => Zone::A,
        }
    }
}

/// Where a block of a given color belongs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HomeZone {
    /// Carry it into this zone.
    Zone(Zone),
    /// Compress it where it was picked up.
    InPlace,
}

// ─── Config ─────────────────────────────────────────────────────────────────

/// Thresholds and the color-to-zone table.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GoalConfig {
    /// Grab when a block is closer than this.
    pub grab_threshold_mm: i32,
    /// Consecutive line ticks before a crossing counts.
    pub boundary_confirm_ticks: u32,
    /// Heading change while searching before a line probe is requested.
    pub sweep_limit_deg: u32,
    /// Heading that points from zone A into zone B.
    pub toward_b_heading_deg: f32,
    /// Home of each color. Colors missing here are delivered in place.
    ///
    /// The stock perception tables only recognize black, green and brown
    /// blocks; the red and blue entries take effect once a custom
    /// `seeing_block` table adds hypotheses for those colors.
    pub home_zones: HVec<(Color, HomeZone), MAX_HOME_ZONES>,
}

impl Default for GoalConfig {
    fn default() -> Self {
        let mut home_zones = HVec::new();
        for entry in [
            (Color::Black, HomeZone::Zone(Zone::A)),
            (Color::Red, HomeZone::Zone(Zone::A)),
            (Color::Green, HomeZone::Zone(Zone::B)),
            (Color::Blue, HomeZone::Zone(Zone::B)),
            (Color::Brown, HomeZone::InPlace),
        ] {
            // five entries always fit
            let _ = home_zones.push(entry);
        }
        Self {
            grab_threshold_mm: 43,
            boundary_confirm_ticks: 1,
            sweep_limit_deg: 360,
            toward_b_heading_deg: 0.0,
            home_zones,
        }
    }
}

impl GoalConfig {
    /// Check bounds.
    pub fn validate(&self) -> ConfigResult<()> {
        ensure_non_negative("goal.grab_threshold_mm", self.grab_threshold_mm as f64)?;
        ensure_nonzero("goal.boundary_confirm_ticks", self.boundary_confirm_ticks)?;
        ensure_nonzero("goal.sweep_limit_deg", self.sweep_limit_deg)?;
        ensure_finite("goal.toward_b_heading_deg", self.toward_b_heading_deg as f64)?;
        if self.home_zones.iter().any(|(c, _)| !c.is_known()) {
            return Err(ConfigError::UnknownHome);
        }
        Ok(())
    }

    /// Home of `color`. Unlisted known colors stay in place; `Unknown` has none.
    pub fn home_of(&self, color: Color) -> Option<HomeZone> {
        if !color.is_known() {
            return None;
        }
        let home = self
            .home_zones
            .iter()
            .find(|(c, _)| *c == color)
            .map(|(_, h)| *h)
            .unwrap_or(HomeZone::InPlace);
        Some(home)
    }

    /// Heading that leads into `zone` from the other side.
    pub fn heading_toward(&self, zone: Zone) -> f32 {
        match zone {
            Zone::B => wrap_degrees(self.toward_b_heading_deg),
            Zone::A => wrap_degrees(self.toward_b_heading_deg + 180.0),
        }
    }
}

// ─── State ──────────────────────────────────────────────────────────────────

/// Task progress carried across ticks.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GoalState {
    /// Current phase.
    pub phase: Phase,
    /// Zone the robot is in.
    pub current_zone: Zone,
    /// Color of the block being handled, once acquired.
    pub target_color: Option<Color>,
    /// Heading change accumulated while searching, whole degrees.
    pub degrees_turned_searching: u32,
    /// Heading toward the home zone while transporting.
    pub target_heading_deg: Option<f32>,
    line_ticks: u32,
    line_latched: bool,
    last_heading: Option<f32>,
    sweep_accum: f32,
}

impl Default for GoalState {
    fn default() -> Self {
        Self::new(Zone::A)
    }
}

impl GoalState {
    /// Searching, empty-handed, in `zone`.
    pub fn new(zone: Zone) -> Self {
        Self {
            phase: Phase::Searching,
            current_zone: zone,
            target_color: None,
            degrees_turned_searching: 0,
            target_heading_deg: None,
            line_ticks: 0,
            line_latched: false,
            last_heading: None,
            sweep_accum: 0.0,
        }
    }

    /// Same state with a different phase. Handy for setting up scenarios.
    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    /// Same state with a block color assigned.
    pub fn with_target(mut self, color: Color) -> Self {
        self.target_color = Some(color);
        self
    }

    /// Whether a block is held.
    pub fn is_carrying(&self) -> bool {
        self.target_color.is_some()
    }

    /// Whether the boundary latch is currently set.
    pub fn on_line_latched(&self) -> bool {
        self.line_latched
    }

    fn reset_sweep(&mut self) {
        self.degrees_turned_searching = 0;
        self.sweep_accum = 0.0;
        self.last_heading = None;
    }
}

// ─── Effects ────────────────────────────────────────────────────────────────

/// A phase change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseChange {
    /// Phase before.
    pub from: Phase,
    /// Phase after.
    pub to: Phase,
}

/// Side effects requested by one evaluation, applied by the control loop.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GoalEffects {
    /// Phase change, if any.
    pub transition: Option<PhaseChange>,
    /// The zone flipped.
    pub zone_flipped: bool,
    /// Arm movement to issue immediately.
    pub arm: Option<ArmCommand>,
    /// Sound to play.
    pub sound: Option<SoundEvent>,
    /// Maneuver to start, superseding any active one.
    pub maneuver: Option<ManeuverRequest>,
    /// Clear the line follower's memory.
    pub reset_pid: bool,
}

impl GoalEffects {
    /// Nothing to do.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ─── Machine ────────────────────────────────────────────────────────────────

/// Applies the transition table.
#[derive(Clone, Debug, Default)]
pub struct GoalStateMachine {
    config: GoalConfig,
}

impl GoalStateMachine {
    /// Machine with the given thresholds.
    pub fn new(config: GoalConfig) -> Self {
        Self { config }
    }

    /// Thresholds in use.
    pub fn config(&self) -> &GoalConfig {
        &self.config
    }

    /// Advance `state` from this tick's snapshot.
    pub fn evaluate(&self, state: &mut GoalState, snapshot: &PerceptionSnapshot) -> GoalEffects {
        let mut fx = GoalEffects::default();
        let crossing = self.track_boundary(state, snapshot);
        self.track_sweep(state, snapshot);

        match state.phase {
            Phase::Searching => {
                if crossing {
                    self.cross(state, &mut fx);
                } else if snapshot.seeing_block.is_some() {
                    enter(state, Phase::Approaching, &mut fx);
                    fx.sound = Some(SoundEvent::BlockSpotted);
                } else if state.degrees_turned_searching >= self.config.sweep_limit_deg {
                    tracing::debug!(degrees = state.degrees_turned_searching, "full sweep without a block");
                    state.reset_sweep();
                    fx.maneuver = Some(ManeuverRequest::ProbeForward);
                }
            }
            Phase::Approaching => {
                if crossing {
                    self.cross(state, &mut fx);
                } else {
                    match snapshot.seeing_block {
                        None => enter(state, Phase::Lost, &mut fx),
                        Some(color) if snapshot.closer_than(self.config.grab_threshold_mm) => {
                            if color.is_known() {
                                state.target_color = Some(color);
                                enter(state, Phase::Acquired, &mut fx);
                                fx.arm = Some(ArmCommand::Close);
                                fx.sound = Some(SoundEvent::BlockAcquired);
                            } else {
                                enter(state, Phase::Lost, &mut fx);
                                fx.arm = Some(ArmCommand::Release);
                                fx.sound = Some(SoundEvent::BlockRejected);
                            }
                        }
                        Some(_) => {}
                    }
                }
            }
            Phase::Lost => {
                enter(state, Phase::Searching, &mut fx);
                fx.maneuver = Some(ManeuverRequest::RecoveryTurn);
            }
            Phase::Acquired => {
                let home = state.target_color.and_then(|c| self.config.home_of(c));
                match home {
                    Some(HomeZone::Zone(zone)) if zone != state.current_zone => {
                        state.target_heading_deg = Some(self.config.heading_toward(zone));
                        enter(state, Phase::Transporting, &mut fx);
                    }
                    _ => {
                        enter(state, Phase::Delivering, &mut fx);
                        fx.maneuver = Some(self.drop_request(state));
                    }
                }
            }
            Phase::Transporting => {
                if crossing {
                    self.cross(state, &mut fx);
                    if state.is_carrying() {
                        enter(state, Phase::Delivering, &mut fx);
                        fx.maneuver = Some(self.drop_request(state));
                    }
                }
            }
            Phase::Delivering => {}
        }
        fx
    }

    /// Feed a finished maneuver back into the goal.
    pub fn on_maneuver_finished(
        &self,
        state: &mut GoalState,
        kind: ManeuverKind,
        outcome: ManeuverOutcome,
    ) -> GoalEffects {
        let mut fx = GoalEffects::default();
        match (kind, outcome) {
            (ManeuverKind::DropSequence, ManeuverOutcome::Cancelled) => {
                if state.phase == Phase::Delivering {
                    tracing::debug!("drop sequence interrupted, restarting");
                    fx.maneuver = Some(self.drop_request(state));
                }
            }
            (ManeuverKind::DropSequence, done) => {
                if state.phase == Phase::Delivering {
                    state.target_color = None;
                    state.target_heading_deg = None;
                    enter(state, Phase::Searching, &mut fx);
                    fx.reset_pid = true;
                    fx.sound = Some(SoundEvent::Delivered);
                    if done == ManeuverOutcome::TimedOut {
                        fx.maneuver = Some(ManeuverRequest::RecoveryTurn);
                    }
                }
            }
            (ManeuverKind::RecoveryTurn, ManeuverOutcome::TimedOut) => {
                tracing::warn!("recovery turn timed out; resuming without fallback");
            }
            (other, ManeuverOutcome::TimedOut) => {
                tracing::warn!(maneuver = ?other, "maneuver timed out, falling back to recovery turn");
                fx.maneuver = Some(ManeuverRequest::RecoveryTurn);
                fx.sound = Some(SoundEvent::ServoTimeout);
            }
            _ => {}
        }
        fx
    }

    fn drop_request(&self, state: &GoalState) -> ManeuverRequest {
        let compress = matches!(
            state.target_color.and_then(|c| self.config.home_of(c)),
            Some(HomeZone::InPlace)
        );
        ManeuverRequest::DropSequence { compress }
    }

    fn cross(&self, state: &mut GoalState, fx: &mut GoalEffects) {
        let from = state.current_zone;
        state.current_zone = from.other();
        fx.zone_flipped = true;
        fx.sound = Some(SoundEvent::ZoneCrossed);
        tracing::info!(from = ?from, to = ?state.current_zone, phase = ?state.phase, "zone boundary crossed");
        if !state.is_carrying() {
            fx.maneuver = Some(ManeuverRequest::Reorient {
                heading_deg: self.config.heading_toward(state.current_zone),
            });
            fx.reset_pid = true;
        }
    }

    /// Rising-edge latch on the boundary line. Returns true on a confirmed
    /// crossing.
    fn track_boundary(&self, state: &mut GoalState, snapshot: &PerceptionSnapshot) -> bool {
        if !snapshot.on_boundary_line {
            state.line_ticks = 0;
            state.line_latched = false;
            return false;
        }
        state.line_ticks = state.line_ticks.saturating_add(1);
        if state.line_latched || state.line_ticks < self.config.boundary_confirm_ticks {
            return false;
        }
        state.line_latched = true;
        matches!(
            state.phase,
            Phase::Searching | Phase::Approaching | Phase::Transporting
        )
    }

    fn track_sweep(&self, state: &mut GoalState, snapshot: &PerceptionSnapshot) {
        if state.phase != Phase::Searching {
            state.last_heading = None;
            return;
        }
        let Some(heading) = snapshot.heading() else {
            state.last_heading = None;
            return;
        };
        if let Some(prev) = state.last_heading {
            state.sweep_accum += abs_f32(shortest_error(heading, prev));
            state.degrees_turned_searching = state.sweep_accum as u32;
        }
        state.last_heading = Some(heading);
    }
}

fn enter(state: &mut GoalState, to: Phase, fx: &mut GoalEffects) {
    let from = state.phase;
    state.phase = to;
    if to == Phase::Searching {
        state.reset_sweep();
    }
    fx.transition = Some(PhaseChange { from, to });
    tracing::info!(from = ?from, to = ?to, zone = ?state.current_zone, target = ?state.target_color, "phase change");
}
