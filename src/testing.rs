//! In-memory ports for driving a [`ControlLoop`](crate::control::ControlLoop)
//! without a simulator or hardware.
//!
//! - [`ScriptedSensors`] replays a queue of [`RawFrame`]s, one per tick, then
//!   keeps returning the last one.
//! - [`RecordingActuators`] records every call in order.
//!
//! ```
//! use sortbot_core::control::ControlLoop;
//! use sortbot_core::config::ControllerConfig;
//! use sortbot_core::perception::RawFrame;
//! use sortbot_core::testing::{RecordingActuators, ScriptedSensors};
//!
//! let sensors = ScriptedSensors::new(RawFrame { reflectance: 40.0, ..RawFrame::default() });
//! let mut cl = ControlLoop::line_following(
//!     ControllerConfig::default(),
//!     sensors,
//!     RecordingActuators::default(),
//! )
//! .unwrap();
//! cl.tick();
//! assert_eq!(cl.actuators().wheels, vec![(200.0, 200.0)]);
//! ```

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::behavior::{ArmCommand, SoundEvent};
use crate::color::ColorFrame;
use crate::perception::RawFrame;
use crate::port::{ActuatorPort, SensorPort};

/// Replays raw frames.
///
/// The queue advances on [`SensorPort::read_reflectance`], which the control
/// loop calls first on every tick; the other reads return fields of the same
/// frame.
#[derive(Clone, Debug, Default)]
pub struct ScriptedSensors {
    /// Frame currently being served.
    pub current: RawFrame,
    script: VecDeque<RawFrame>,
    frames_served: u64,
}

impl ScriptedSensors {
    /// Serve `frame` on every tick.
    pub fn new(frame: RawFrame) -> Self {
        Self {
            current: frame,
            script: VecDeque::new(),
            frames_served: 0,
        }
    }

    /// Serve `frames` in order, one per tick, then hold the last one.
    pub fn from_script<I: IntoIterator<Item = RawFrame>>(frames: I) -> Self {
        let mut s = Self::default();
        s.script.extend(frames);
        s
    }

    /// Queue another frame.
    pub fn push(&mut self, frame: RawFrame) {
        self.script.push_back(frame);
    }

    /// Queue `frame` for `ticks` consecutive ticks.
    pub fn push_repeated(&mut self, frame: RawFrame, ticks: usize) {
        self.script.extend(core::iter::repeat(frame).take(ticks));
    }

    /// Frames still queued.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    /// Ticks served so far.
    pub fn frames_served(&self) -> u64 {
        self.frames_served
    }
}

impl SensorPort for ScriptedSensors {
    fn read_reflectance(&mut self) -> f32 {
        if let Some(next) = self.script.pop_front() {
            self.current = next;
        }
        self.frames_served += 1;
        self.current.reflectance
    }

    fn read_color_frame(&mut self) -> ColorFrame {
        self.current.color.clone()
    }

    fn read_distance_mm(&mut self) -> i32 {
        self.current.distance_mm
    }

    fn read_heading_deg(&mut self) -> f32 {
        self.current.heading_deg
    }

    fn read_battery_frac(&mut self) -> f32 {
        self.current.battery_frac
    }
}

/// Records everything sent to the actuators.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordingActuators {
    /// Wheel speed pairs, in call order.
    pub wheels: Vec<(f32, f32)>,
    /// Arm commands, in call order.
    pub arms: Vec<ArmCommand>,
    /// Sounds, in call order.
    pub sounds: Vec<SoundEvent>,
}

impl RecordingActuators {
    /// Most recent wheel speeds.
    pub fn last_wheels(&self) -> Option<(f32, f32)> {
        self.wheels.last().copied()
    }
}

impl ActuatorPort for RecordingActuators {
    fn set_wheel_speeds(&mut self, left: f32, right: f32) {
        self.wheels.push((left, right));
    }

    fn set_arm(&mut self, position: ArmCommand) {
        self.arms.push(position);
    }

    fn play_sound(&mut self, event: SoundEvent) {
        self.sounds.push(event);
    }
}
