//! The two capability seams the core talks through, plus time and cancellation.
//!
//! Everything behind these traits (simulator sockets, hub ports, tone players)
//! is a collaborator supplied by the host. The core never learns how a reading
//! was obtained or how a command is delivered.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

use crate::behavior::{ArmCommand, SoundEvent};
use crate::color::ColorFrame;

/// Read side: raw sensor values, unprocessed.
pub trait SensorPort {
    /// Downward reflectance in percent.
    fn read_reflectance(&mut self) -> f32;
    /// Forward camera image.
    fn read_color_frame(&mut self) -> ColorFrame;
    /// Ultrasonic distance in millimetres, `-1` for no echo.
    fn read_distance_mm(&mut self) -> i32;
    /// Yaw in degrees.
    fn read_heading_deg(&mut self) -> f32;
    /// Battery level as a fraction of full.
    fn read_battery_frac(&mut self) -> f32;
}

/// Write side: wheels, gripper, speaker. All calls are fire and forget.
pub trait ActuatorPort {
    /// Set both wheel speeds.
    fn set_wheel_speeds(&mut self, left: f32, right: f32);
    /// Move the gripper arm.
    fn set_arm(&mut self, position: ArmCommand);
    /// Queue a sound; must not block.
    fn play_sound(&mut self, event: SoundEvent);
}

impl<T: SensorPort + ?Sized> SensorPort for &mut T {
    fn read_reflectance(&mut self) -> f32 {
        (**self).read_reflectance()
    }
    fn read_color_frame(&mut self) -> ColorFrame {
        (**self).read_color_frame()
    }
    fn read_distance_mm(&mut self) -> i32 {
        (**self).read_distance_mm()
    }
    fn read_heading_deg(&mut self) -> f32 {
        (**self).read_heading_deg()
    }
    fn read_battery_frac(&mut self) -> f32 {
        (**self).read_battery_frac()
    }
}

impl<T: ActuatorPort + ?Sized> ActuatorPort for &mut T {
    fn set_wheel_speeds(&mut self, left: f32, right: f32) {
        (**self).set_wheel_speeds(left, right)
    }
    fn set_arm(&mut self, position: ArmCommand) {
        (**self).set_arm(position)
    }
    fn play_sound(&mut self, event: SoundEvent) {
        (**self).play_sound(event)
    }
}

// ─── Time ───────────────────────────────────────────────────────────────────

/// Monotonic clock used for wall-clock bounds on sub-routines.
pub trait Clock {
    /// Time since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// [`Clock`] backed by `std::time::Instant`.
#[cfg(feature = "std")]
#[derive(Clone, Debug)]
pub struct StdClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdClock {
    /// Clock whose origin is the moment of construction.
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

// ─── Cancellation ───────────────────────────────────────────────────────────

/// Shared flag that aborts in-flight sub-routines and stops the run loop.
///
/// Cloning shares the flag; it can be raised from another thread.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that has not been raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether the flag is raised.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Lower the flag again.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
