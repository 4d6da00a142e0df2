//! # sortbot-core
//!
//! Perception-gated behavior arbitration and goal-state control for small
//! differential-drive robots that follow lines and sort colored blocks.
//!
//! ---
//!
//! ## The loop
//!
//! Every tick the robot reads its sensors once, turns the readings into a small
//! set of named predicates, lets an explicit task state machine react, and then
//! lets exactly one thing drive the wheels:
//!
//! ```text
//! SensorPort → PerceptionClassifier → PerceptionSnapshot
//!                                           │
//!                                           ▼
//!                                   GoalStateMachine ──► Maneuver (reorient, drop, recovery, probe)
//!                                           │                 ▲ paused by safety behaviors
//!                                           ▼                 │
//!                                  Arbiter(Behaviors) ────────┴──► ActuatorPort
//!                                    ↑             ↑
//!                          LineFollowController  BearingServo
//! ```
//!
//! Arbitration is subsumption-style: behaviors carry a fixed, unique priority and
//! the first one whose predicate holds is the only one that acts. When nothing
//! applies the tick is idle.
//!
//! ## Module overview
//!
//! | Module | Key types | What it does |
//! |--------|-----------|--------------|
//! | [`color`] | [`Color`], [`RgbRange`], [`RegionDetector`] | Per-channel range tables and crop coverage |
//! | [`perception`] | [`PerceptionClassifier`], [`PerceptionSnapshot`] | Raw frame → predicates, with sentinel normalization |
//! | [`pid`] | [`LineFollowController`], [`PidState`] | Reflectance PID → differential wheel speeds |
//! | [`bearing`] | [`BearingServo`], [`BearingTask`] | Turn until facing a heading, bounded |
//! | [`behavior`] | [`Behavior`], [`Command`] | Prioritized candidate actions |
//! | [`arbiter`] | [`Arbiter`] | Winner-take-all selection |
//! | [`goal`] | [`GoalStateMachine`], [`GoalState`] | Searching → Approaching → Acquired → Transporting → Delivering |
//! | [`maneuver`] | [`Maneuver`] | Cooperative multi-tick sub-routines |
//! | [`behaviors`] | [`sorting_behaviors`], [`line_following_behaviors`] | Stock behavior sets |
//! | [`port`] | [`SensorPort`], [`ActuatorPort`], [`CancelToken`] | The only I/O seams |
//! | [`control`] | [`ControlLoop`] | One sense-decide-act cycle per tick |
//! | [`config`] | [`ControllerConfig`] | All calibration in one value |
//! | [`testing`] | [`testing::ScriptedSensors`] | In-memory ports |
//!
//! ## `no_std`
//!
//! The crate is `#![no_std]` by default and needs `alloc`. Enable `std` for
//! [`port::StdClock`] and [`ControlLoop::run_until`]. Enable `serde` to load
//! [`ControllerConfig`] from JSON or any other serde format.
//!
//! ## License
//!
//! Dual-licensed under MIT or Apache License 2.0, at your option.

#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

pub mod arbiter;
pub mod bearing;
pub mod behavior;
pub mod behaviors;
pub mod color;
pub mod config;
pub mod control;
pub mod error;
pub mod goal;
pub mod maneuver;
pub mod perception;
pub mod pid;
pub mod port;
pub mod testing;

pub use arbiter::{Arbiter, ArbiterConfig, Arbitration};
pub use bearing::{BearingServo, BearingTask, Rotation, ServoConfig, ServoOutcome};
pub use behavior::{ArmCommand, Behavior, BehaviorContext, Command, FnBehavior, SoundEvent};
pub use behaviors::{line_following_behaviors, sorting_behaviors, BehaviorConfig};
pub use color::{Color, ColorFrame, Crop, RegionDetector, RgbRange};
pub use config::ControllerConfig;
pub use control::{CommandSource, ControlLoop, TickReport};
pub use error::{ConfigError, ConfigResult};
pub use goal::{GoalConfig, GoalEffects, GoalState, GoalStateMachine, HomeZone, Phase, Zone};
pub use maneuver::{Maneuver, ManeuverKind, ManeuverOutcome, ManeuverRequest, MotionConfig};
pub use perception::{PerceptionClassifier, PerceptionConfig, PerceptionSnapshot, RawFrame};
pub use pid::{LineFollowController, PidConfig, PidState, WheelLayout};
pub use port::{ActuatorPort, CancelToken, Clock, SensorPort};
