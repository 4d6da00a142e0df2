//! Fixed-priority, winner-take-all arbitration.
//!
//! Behaviors are sorted ascending by priority once, at construction. Each tick
//! the first behavior whose predicate holds is the only one whose action runs.
//! If none applies the tick is idle.
//!
//! # Invariants
//!
//! - Priorities are unique; duplicates are rejected at construction.
//! - Selection is a pure function of `(snapshot, goal)`: same inputs, same winner.
//! - At most one action runs per [`Arbiter::step`].

use alloc::boxed::Box;
use alloc::vec::Vec;

use hashbrown::HashMap;

use crate::behavior::{Behavior, BehaviorContext, Command};
use crate::error::{ConfigError, ConfigResult};
use crate::goal::GoalState;
use crate::perception::PerceptionSnapshot;

/// Arbitration settings.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArbiterConfig {
    /// Behaviors at or below this priority are safety behaviors and may preempt
    /// an active maneuver.
    pub safety_priority_max: u32,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            safety_priority_max: 2,
        }
    }
}

/// The winner of one arbitration round.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Arbitration {
    /// Name of the behavior that ran.
    pub name: &'static str,
    /// Its priority.
    pub priority: u32,
    /// What it asked for.
    pub command: Command,
}

/// Owns the behavior list and picks one per tick.
pub struct Arbiter {
    behaviors: Vec<Box<dyn Behavior>>,
    activations: HashMap<&'static str, u64>,
    safety_priority_max: u32,
}

impl core::fmt::Debug for Arbiter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Arbiter")
            .field("priorities", &self.priorities())
            .field("safety_priority_max", &self.safety_priority_max)
            .finish()
    }
}

impl Arbiter {
    /// Sort `behaviors` by priority and reject duplicates.
    pub fn new(mut behaviors: Vec<Box<dyn Behavior>>, config: &ArbiterConfig) -> ConfigResult<Self> {
        behaviors.sort_by_key(|b| b.priority());
        if let Some(pair) = behaviors.windows(2).find(|w| w[0].priority() == w[1].priority()) {
            return Err(ConfigError::DuplicatePriority(pair[0].priority()));
        }
        Ok(Self {
            behaviors,
            activations: HashMap::new(),
            safety_priority_max: config.safety_priority_max,
        })
    }

    /// Highest-priority applicable behavior, if any.
    pub fn select(&self, snapshot: &PerceptionSnapshot, goal: &GoalState) -> Option<&dyn Behavior> {
        self.winner(snapshot, goal, u32::MAX).map(|i| &*self.behaviors[i])
    }

    /// Run the winning behavior's action.
    pub fn step(&mut self, ctx: &mut BehaviorContext<'_>) -> Option<Arbitration> {
        let idx = self.winner(ctx.snapshot, ctx.goal, u32::MAX)?;
        Some(self.run_at(idx, ctx))
    }

    /// Like [`Arbiter::step`] but only safety behaviors are eligible.
    pub fn step_safety(&mut self, ctx: &mut BehaviorContext<'_>) -> Option<Arbitration> {
        let idx = self.winner(ctx.snapshot, ctx.goal, self.safety_priority_max)?;
        Some(self.run_at(idx, ctx))
    }

    /// Whether `priority` falls in the safety band.
    pub fn is_safety(&self, priority: u32) -> bool {
        priority <= self.safety_priority_max
    }

    /// How many times the named behavior has run.
    pub fn activations(&self, name: &str) -> u64 {
        self.activations.get(name).copied().unwrap_or(0)
    }

    /// Registered priorities, ascending.
    pub fn priorities(&self) -> Vec<u32> {
        self.behaviors.iter().map(|b| b.priority()).collect()
    }

    /// Number of behaviors.
    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    /// Whether no behavior is registered.
    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    fn winner(&self, snapshot: &PerceptionSnapshot, goal: &GoalState, max_priority: u32) -> Option<usize> {
        self.behaviors
            .iter()
            .take_while(|b| b.priority() <= max_priority)
            .position(|b| b.should_run(snapshot, goal))
    }

    fn run_at(&mut self, idx: usize, ctx: &mut BehaviorContext<'_>) -> Arbitration {
        let behavior = &mut self.behaviors[idx];
        let name = behavior.name();
        let priority = behavior.priority();
        let command = behavior.run(ctx);
        *self.activations.entry(name).or_insert(0) += 1;
        tracing::debug!(behavior = name, priority, ?command, "arbitration winner");
        Arbitration {
            name,
            priority,
            command,
        }
    }
}
