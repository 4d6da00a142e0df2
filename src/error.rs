//! Construction-time configuration errors.
//!
//! Nothing in the per-tick path returns an error: sensor glitches are absorbed by
//! the classifier and servo non-convergence is an outcome, not a fault. The only
//! fallible step is building a controller from a calibration value, which is
//! validated once up front.

use thiserror::Error;

/// Result alias for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// A calibration or tuning value that cannot drive the controller.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// A channel range with `min > max` never matches any pixel.
    #[error("inverted range in {table}: channel {channel} has min {min} > max {max}")]
    InvertedRange {
        /// Table the range belongs to.
        table: &'static str,
        /// Channel index (0, 1 or 2).
        channel: usize,
        /// Lower bound.
        min: u8,
        /// Upper bound.
        max: u8,
    },

    /// A detector without any range can never fire.
    #[error("detector {table} has no ranges")]
    EmptyDetector {
        /// Table the detector belongs to.
        table: &'static str,
    },

    /// NaN or infinite gain, speed or threshold.
    #[error("{field} must be finite")]
    NonFinite {
        /// Offending field.
        field: &'static str,
    },

    /// A value that must be non-negative was negative.
    #[error("{field} must be non-negative, got {value}")]
    Negative {
        /// Offending field.
        field: &'static str,
        /// Value supplied.
        value: f64,
    },

    /// A coverage fraction or battery threshold outside `[0, 1]`.
    #[error("{field} must lie in [0, 1], got {value}")]
    FractionOutOfRange {
        /// Offending field.
        field: &'static str,
        /// Value supplied.
        value: f32,
    },

    /// Wheel speed clamp with `min > max`.
    #[error("speed bounds inverted: min {min} > max {max}")]
    SpeedBounds {
        /// Lower clamp.
        min: f32,
        /// Upper clamp.
        max: f32,
    },

    /// A loop bound or tick count that must be at least one.
    #[error("{field} must be at least 1")]
    ZeroBound {
        /// Offending field.
        field: &'static str,
    },

    /// Two behaviors registered with the same priority.
    #[error("duplicate behavior priority {0}")]
    DuplicatePriority(u32),

    /// Unexplained echoes stop being reported before the grab distance is
    /// reached, so an unidentified block could never be rejected.
    #[error("close range {close_range_mm} mm is shorter than the grab threshold {grab_threshold_mm} mm")]
    CloseRangeBelowGrab {
        /// `perception.close_range_mm`.
        close_range_mm: i32,
        /// `goal.grab_threshold_mm`.
        grab_threshold_mm: i32,
    },

    /// The color-to-zone table assigns a home to `Unknown`.
    #[error("home zone table lists the Unknown color")]
    UnknownHome,

    /// A fixed-capacity calibration table overflowed.
    #[error("table {table} is full")]
    TableFull {
        /// Table that overflowed.
        table: &'static str,
    },
}

/// Reject NaN and infinities.
pub(crate) fn ensure_finite(field: &'static str, value: f64) -> ConfigResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonFinite { field })
    }
}

/// Reject NaN, infinities and negative values.
pub(crate) fn ensure_non_negative(field: &'static str, value: f64) -> ConfigResult<()> {
    ensure_finite(field, value)?;
    if value < 0.0 {
        return Err(ConfigError::Negative { field, value });
    }
    Ok(())
}

/// Reject anything outside `[0, 1]`.
pub(crate) fn ensure_fraction(field: &'static str, value: f32) -> ConfigResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::FractionOutOfRange { field, value })
    }
}

/// Reject zero loop bounds.
pub(crate) fn ensure_nonzero(field: &'static str, value: u32) -> ConfigResult<()> {
    if value == 0 {
        Err(ConfigError::ZeroBound { field })
    } else {
        Ok(())
    }
}
