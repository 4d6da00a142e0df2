//! Color tags, calibrated RGB range tables and frame crops.
//!
//! Classification is table driven: a [`RegionDetector`] is a small set of
//! inclusive per-channel [`RgbRange`]s plus the [`Crop`] it inspects and the
//! coverage fraction that counts as "present". Recalibrating a camera means
//! editing a table, never the control logic.
//!
//! # Invariants
//!
//! - Range bounds are inclusive on all three channels.
//! - A malformed [`ColorFrame`] (pixel count ≠ width × height) matches nothing.
//! - Coverage is strictly greater-than the threshold; an empty crop has coverage 0.

use alloc::vec;
use alloc::vec::Vec;

use heapless::Vec as HVec;

use crate::error::{ensure_fraction, ConfigError, ConfigResult};

/// Maximum number of ranges a single detector may OR together.
pub const MAX_RANGES: usize = 4;

/// Maximum number of color hypotheses per table.
pub const MAX_HYPOTHESES: usize = 8;

// ─── Color ──────────────────────────────────────────────────────────────────

/// Semantic color tag for blocks and markers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Color {
    /// Red block or marker.
    Red,
    /// Green block.
    Green,
    /// Blue block or marker.
    Blue,
    /// Black block.
    Black,
    /// Brown block.
    Brown,
    /// Something is there, but no single calibrated color explains it.
    Unknown,
}

impl Color {
    /// `true` for every tag except [`Color::Unknown`].
    pub fn is_known(self) -> bool {
        !matches!(self, Color::Unknown)
    }
}

// ─── Ranges ─────────────────────────────────────────────────────────────────

/// Inclusive `[min, max]` bound on one 8-bit channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelRange {
    /// Lowest accepted value.
    pub min: u8,
    /// Highest accepted value.
    pub max: u8,
}

impl ChannelRange {
    /// Range covering `min..=max`.
    pub const fn new(min: u8, max: u8) -> Self {
        Self { min, max }
    }

    /// Range accepting exactly one value.
    pub const fn exact(value: u8) -> Self {
        Self { min: value, max: value }
    }

    /// Whether `value` lies inside the range.
    pub fn contains(&self, value: u8) -> bool {
        self.min <= value && value <= self.max
    }
}

/// Axis-aligned box in 3-channel color space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RgbRange {
    /// Bounds for channels 0, 1 and 2.
    pub channels: [ChannelRange; 3],
}

impl RgbRange {
    /// Build from `(min, max)` pairs per channel.
    pub const fn new(c0: (u8, u8), c1: (u8, u8), c2: (u8, u8)) -> Self {
        Self {
            channels: [
                ChannelRange::new(c0.0, c0.1),
                ChannelRange::new(c1.0, c1.1),
                ChannelRange::new(c2.0, c2.1),
            ],
        }
    }

    /// Box accepting exactly one pixel value.
    pub const fn exact(pixel: [u8; 3]) -> Self {
        Self {
            channels: [
                ChannelRange::exact(pixel[0]),
                ChannelRange::exact(pixel[1]),
                ChannelRange::exact(pixel[2]),
            ],
        }
    }

    /// Whether every channel of `pixel` is inside its bound.
    pub fn contains(&self, pixel: [u8; 3]) -> bool {
        self.channels
            .iter()
            .zip(pixel.iter())
            .all(|(range, &v)| range.contains(v))
    }

    fn validate(&self, table: &'static str) -> ConfigResult<()> {
        for (channel, range) in self.channels.iter().enumerate() {
            if range.min > range.max {
                return Err(ConfigError::InvertedRange {
                    table,
                    channel,
                    min: range.min,
                    max: range.max,
                });
            }
        }
        Ok(())
    }
}

// ─── Crop ───────────────────────────────────────────────────────────────────

/// Region of a frame a detector inspects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Crop {
    /// Every pixel.
    Full,
    /// Columns `[w/3, 2w/3)`: what is straight ahead.
    MiddleThird,
    /// Columns `[0, w/4)` and `[3w/4, w)`: the gripper jaws.
    OuterQuarters,
    /// Rows `[0, h/2)`.
    TopHalf,
}

impl Crop {
    /// Whether pixel `(x, y)` of a `width × height` frame belongs to the crop.
    pub fn contains(&self, x: usize, y: usize, width: usize, height: usize) -> bool {
        match self {
            Crop::Full => true,
            Crop::MiddleThird => x >= width / 3 && x < 2 * width / 3,
            Crop::OuterQuarters => x < width / 4 || x >= 3 * width / 4,
            Crop::TopHalf => y < height / 2,
        }
    }
}

// ─── ColorFrame ─────────────────────────────────────────────────────────────

/// Row-major 3-channel image as delivered by the camera collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ColorFrame {
    width: usize,
    height: usize,
    pixels: Vec<[u8; 3]>,
}

impl ColorFrame {
    /// Wrap raw pixels. No validation happens here; a frame whose pixel count
    /// disagrees with its dimensions is treated as unreadable by every detector.
    pub fn new(width: usize, height: usize, pixels: Vec<[u8; 3]>) -> Self {
        Self { width, height, pixels }
    }

    /// Frame with every pixel set to `pixel`. Dimensions whose product
    /// overflows yield an empty, malformed frame.
    pub fn filled(width: usize, height: usize, pixel: [u8; 3]) -> Self {
        let count = width.checked_mul(height).unwrap_or(0);
        Self::new(width, height, vec![pixel; count])
    }

    /// Frame from interleaved bytes (`r g b r g b …`). Trailing bytes that do not
    /// form a whole pixel are dropped, which leaves the frame malformed.
    pub fn from_rgb_bytes(width: usize, height: usize, bytes: &[u8]) -> Self {
        let pixels = bytes
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect();
        Self::new(width, height, pixels)
    }

    /// Zero-sized frame; a camera that returned nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Non-empty and pixel count matches the dimensions.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.width.checked_mul(self.height) == Some(self.pixels.len())
    }

    /// Pixel at `(x, y)`, if the frame is well formed and the point is inside.
    pub fn pixel(&self, x: usize, y: usize) -> Option<[u8; 3]> {
        if !self.is_well_formed() || x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get(y * self.width + x).copied()
    }

    /// Overwrite every pixel of `crop` with `pixel`.
    pub fn paint(&mut self, crop: Crop, pixel: [u8; 3]) {
        if !self.is_well_formed() {
            return;
        }
        let (w, h) = (self.width, self.height);
        for y in 0..h {
            for x in 0..w {
                if crop.contains(x, y, w, h) {
                    self.pixels[y * w + x] = pixel;
                }
            }
        }
    }

    /// Fraction of `crop` pixels that fall inside any of `ranges`.
    ///
    /// Returns 0.0 for malformed frames and empty crops.
    pub fn coverage(&self, ranges: &[RgbRange], crop: Crop) -> f32 {
        if !self.is_well_formed() || ranges.is_empty() {
            return 0.0;
        }
        let (w, h) = (self.width, self.height);
        let mut total: u32 = 0;
        let mut hits: u32 = 0;
        for (i, &px) in self.pixels.iter().enumerate() {
            if !crop.contains(i % w, i / w, w, h) {
                continue;
            }
            total += 1;
            if ranges.iter().any(|r| r.contains(px)) {
                hits += 1;
            }
        }
        if total == 0 {
            0.0
        } else {
            hits as f32 / total as f32
        }
    }
}

// ─── Detectors ──────────────────────────────────────────────────────────────

/// OR-combined ranges, the crop they apply to and the coverage that counts.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegionDetector {
    /// Accepted color boxes.
    pub ranges: HVec<RgbRange, MAX_RANGES>,
    /// Region inspected.
    pub crop: Crop,
    /// Coverage must be strictly above this fraction.
    pub min_fraction: f32,
}

impl RegionDetector {
    /// Build from a slice of ranges; fails if more than [`MAX_RANGES`] are given.
    pub fn new(ranges: &[RgbRange], crop: Crop, min_fraction: f32) -> ConfigResult<Self> {
        let ranges = HVec::from_slice(ranges).map_err(|_| ConfigError::TableFull {
            table: "detector ranges",
        })?;
        Ok(Self { ranges, crop, min_fraction })
    }

    /// Whether the detector fires on `frame`.
    pub fn detect(&self, frame: &ColorFrame) -> bool {
        frame.coverage(&self.ranges, self.crop) > self.min_fraction
    }

    /// Check bounds and threshold.
    pub fn validate(&self, table: &'static str) -> ConfigResult<()> {
        if self.ranges.is_empty() {
            return Err(ConfigError::EmptyDetector { table });
        }
        for range in &self.ranges {
            range.validate(table)?;
        }
        ensure_fraction(table, self.min_fraction)
    }
}

/// A detector labelled with the color it stands for.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ColorHypothesis {
    /// Color reported when the detector fires.
    pub color: Color,
    /// Detector for this color.
    pub detector: RegionDetector,
}

/// Ordered list of color hypotheses.
pub type ColorTable = HVec<ColorHypothesis, MAX_HYPOTHESES>;

/// Resolve which color a table sees in `frame`.
///
/// One distinct color firing yields that color; several distinct colors firing
/// at once are ambiguous and yield [`Color::Unknown`]; nothing firing yields `None`.
pub fn resolve(table: &ColorTable, frame: &ColorFrame) -> Option<Color> {
    let mut found: Option<Color> = None;
    for hypothesis in table.iter().filter(|h| h.detector.detect(frame)) {
        match found {
            None => found = Some(hypothesis.color),
            Some(c) if c == hypothesis.color => {}
            Some(_) => return Some(Color::Unknown),
        }
    }
    found
}

/// Validate every hypothesis of a table.
pub fn validate_table(table: &ColorTable, name: &'static str) -> ConfigResult<()> {
    for hypothesis in table {
        hypothesis.detector.validate(name)?;
    }
    Ok(())
}
