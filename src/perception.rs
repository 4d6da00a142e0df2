//! Perception: one raw sensor frame in, one immutable predicate snapshot out.
//!
//! [`PerceptionClassifier::classify`] is pure and total. It never blocks, never
//! fails and never panics. Every "no reading" condition is normalized here into a
//! defined value so that nothing downstream (goal machine, arbiter, PID) has to
//! reason about sensor glitches.
//!
//! | Raw input | Normalized to |
//! |---|---|
//! | distance `< 0` | `-1` (no echo) |
//! | non-finite reflectance | the line setpoint, `reflectance_valid = false` |
//! | non-finite heading | `0.0`, `heading_valid = false` |
//! | finite heading | wrapped into `[0, 360)` |
//! | non-finite battery | `1.0` (a glitch never reads as a flat battery) |
//! | finite battery | clamped to `[0, 1]` |
//! | malformed color frame | no color predicate fires |

use crate::bearing::wrap_degrees;
use crate::color::{
    resolve, validate_table, Color, ColorFrame, ColorHypothesis, ColorTable, Crop,
    RegionDetector, RgbRange,
};
use crate::error::{ensure_finite, ConfigResult};

/// Sentinel for "no distance reading".
pub const NO_DISTANCE: i32 = -1;

// ─── Raw input ──────────────────────────────────────────────────────────────

/// Everything the sensor port delivers for one tick, unprocessed.
#[derive(Clone, Debug, PartialEq)]
pub struct RawFrame {
    /// Downward reflectance, percent.
    pub reflectance: f32,
    /// Forward camera image.
    pub color: ColorFrame,
    /// Ultrasonic distance in millimetres, `-1` for no echo.
    pub distance_mm: i32,
    /// Yaw in degrees, any range.
    pub heading_deg: f32,
    /// Remaining battery as a fraction.
    pub battery_frac: f32,
}

impl Default for RawFrame {
    /// No echo, blank camera, dark floor, facing 0°, full battery.
    fn default() -> Self {
        Self {
            reflectance: 0.0,
            color: ColorFrame::empty(),
            distance_mm: NO_DISTANCE,
            heading_deg: 0.0,
            battery_frac: 1.0,
        }
    }
}

// ─── Snapshot ───────────────────────────────────────────────────────────────

/// The named predicates the rest of the controller reasons about.
///
/// Captured once per tick and never mutated afterwards.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PerceptionSnapshot {
    /// Block straight ahead, if any. `Some(Unknown)` when something is there but
    /// its color is ambiguous.
    pub seeing_block: Option<Color>,
    /// Block held in the gripper, if any.
    pub having_block: Option<Color>,
    /// A wall fills the view and is close.
    pub facing_wall: bool,
    /// A zone marker (planter) fills the view.
    pub facing_hazard: bool,
    /// Charging pad visible.
    pub seeing_charger: bool,
    /// The floor sensor is on the boundary line between zones.
    pub on_boundary_line: bool,
    /// Distance in millimetres, [`NO_DISTANCE`] if no reading.
    pub distance_mm: i32,
    /// Reflectance, percent.
    pub reflectance: f32,
    /// Whether `reflectance` came from the sensor.
    pub reflectance_valid: bool,
    /// Heading in `[0, 360)`.
    pub heading_deg: f32,
    /// Whether `heading_deg` came from the sensor.
    pub heading_valid: bool,
    /// Battery fraction in `[0, 1]`.
    pub battery_frac: f32,
}

impl PerceptionSnapshot {
    /// Snapshot of a robot that perceives nothing: no block, no wall, no line,
    /// full battery, facing 0°.
    pub fn idle() -> Self {
        Self {
            seeing_block: None,
            having_block: None,
            facing_wall: false,
            facing_hazard: false,
            seeing_charger: false,
            on_boundary_line: false,
            distance_mm: NO_DISTANCE,
            reflectance: 0.0,
            reflectance_valid: true,
            heading_deg: 0.0,
            heading_valid: true,
            battery_frac: 1.0,
        }
    }

    /// Distance if the sonar returned an echo.
    pub fn distance(&self) -> Option<i32> {
        (self.distance_mm >= 0).then_some(self.distance_mm)
    }

    /// Heading if the IMU produced one.
    pub fn heading(&self) -> Option<f32> {
        self.heading_valid.then_some(self.heading_deg)
    }

    /// Valid distance strictly below `threshold_mm`.
    pub fn closer_than(&self, threshold_mm: i32) -> bool {
        self.distance().is_some_and(|d| d < threshold_mm)
    }
}

impl Default for PerceptionSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}

// ─── Calibration ────────────────────────────────────────────────────────────

/// Calibrated color tables and thresholds.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PerceptionConfig {
    /// Hypotheses for a block ahead.
    pub seeing_block: ColorTable,
    /// Hypotheses for a block in the gripper.
    pub having_block: ColorTable,
    /// Wall surfaces.
    pub wall: RegionDetector,
    /// Zone markers the robot must not drive into.
    pub hazard: RegionDetector,
    /// Charging pad.
    pub charger: RegionDetector,
    /// Sonar range under which a visible wall counts as close.
    pub wall_distance_mm: i32,
    /// Sonar range beyond which a colored patch is not a block.
    pub block_cutoff_mm: i32,
    /// Sonar range under which an unexplained echo is reported as an
    /// `Unknown` block.
    pub close_range_mm: i32,
    /// Reflectance at or above which the floor sensor is on the boundary line.
    pub boundary_reflectance: f32,
    /// Reflectance reported when the sensor read is unusable.
    pub line_setpoint: f32,
}

/// Coverage above which a block ahead counts as seen.
const SEEING_FRACTION: f32 = 3.0 / 255.0;
/// Coverage above which a brown or green block counts as held.
const HAVING_FRACTION: f32 = 250.0 / 255.0;
/// Coverage of the gripper jaws above which a black block counts as held.
const HAVING_BLACK_FRACTION: f32 = 170.0 / 255.0;
/// Coverage above which a wall fills the view.
const WALL_FRACTION: f32 = 250.0 / 255.0;
/// Coverage above which a zone marker fills the view.
const HAZARD_FRACTION: f32 = 140.0 / 255.0;
/// Coverage above which the charger is visible.
const CHARGER_FRACTION: f32 = 1.0 / 255.0;

const BROWN: RgbRange = RgbRange::new((92, 130), (35, 67), (1, 16));
const GREEN: RgbRange = RgbRange::new((34, 56), (144, 182), (3, 15));
const BLACK_AHEAD: RgbRange = RgbRange::new((1, 13), (1, 8), (1, 11));
const BLACK_HELD: RgbRange = RgbRange::new((1, 30), (1, 30), (1, 30));

fn hypothesis(color: Color, ranges: &[RgbRange], crop: Crop, fraction: f32) -> ColorHypothesis {
    ColorHypothesis {
        color,
        detector: detector(ranges, crop, fraction),
    }
}

fn detector(ranges: &[RgbRange], crop: Crop, fraction: f32) -> RegionDetector {
    let mut d = RegionDetector {
        ranges: heapless::Vec::new(),
        crop,
        min_fraction: fraction,
    };
    for r in ranges {
        // Built-in tables never exceed MAX_RANGES.
        let _ = d.ranges.push(*r);
    }
    d
}

fn table(entries: &[ColorHypothesis]) -> ColorTable {
    let mut t = ColorTable::new();
    for e in entries {
        let _ = t.push(e.clone());
    }
    t
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            seeing_block: table(&[
                hypothesis(Color::Brown, &[BROWN], Crop::MiddleThird, SEEING_FRACTION),
                hypothesis(Color::Black, &[BLACK_AHEAD], Crop::MiddleThird, SEEING_FRACTION),
                hypothesis(Color::Green, &[GREEN], Crop::MiddleThird, SEEING_FRACTION),
            ]),
            having_block: table(&[
                hypothesis(Color::Brown, &[BROWN], Crop::Full, HAVING_FRACTION),
                hypothesis(Color::Black, &[BLACK_HELD], Crop::OuterQuarters, HAVING_BLACK_FRACTION),
                hypothesis(Color::Green, &[GREEN], Crop::Full, HAVING_FRACTION),
            ]),
            wall: detector(
                &[
                    RgbRange::new((123, 128), (123, 128), (145, 150)),
                    RgbRange::new((142, 150), (142, 150), (168, 173)),
                    RgbRange::new((129, 131), (129, 131), (152, 155)),
                    RgbRange::new((138, 141), (138, 141), (162, 165)),
                ],
                Crop::Full,
                WALL_FRACTION,
            ),
            hazard: detector(
                &[
                    RgbRange::new((115, 126), (0, 8), (0, 8)),
                    RgbRange::exact([206, 0, 0]),
                    RgbRange::exact([142, 0, 0]),
                    RgbRange::new((0, 8), (110, 120), (140, 150)),
                ],
                Crop::Full,
                HAZARD_FRACTION,
            ),
            charger: detector(
                &[
                    RgbRange::new((250, 255), (250, 255), (16, 24)),
                    RgbRange::new((152, 171), (100, 120), (21, 40)),
                ],
                Crop::Full,
                CHARGER_FRACTION,
            ),
            wall_distance_mm: 250,
            block_cutoff_mm: 500,
            close_range_mm: 43,
            boundary_reflectance: 90.0,
            line_setpoint: 40.0,
        }
    }
}

impl PerceptionConfig {
    /// Check every table and threshold.
    pub fn validate(&self) -> ConfigResult<()> {
        validate_table(&self.seeing_block, "perception.seeing_block")?;
        validate_table(&self.having_block, "perception.having_block")?;
        self.wall.validate("perception.wall")?;
        self.hazard.validate("perception.hazard")?;
        self.charger.validate("perception.charger")?;
        ensure_finite("perception.boundary_reflectance", self.boundary_reflectance as f64)?;
        ensure_finite("perception.line_setpoint", self.line_setpoint as f64)
    }
}

// ─── Classifier ─────────────────────────────────────────────────────────────

/// Stateless classifier holding the calibration tables.
#[derive(Clone, Debug, Default)]
pub struct PerceptionClassifier {
    config: PerceptionConfig,
}

impl PerceptionClassifier {
    /// Wrap a calibration. Call [`PerceptionConfig::validate`] first if the value
    /// came from outside.
    pub fn new(config: PerceptionConfig) -> Self {
        Self { config }
    }

    /// The calibration in use.
    pub fn config(&self) -> &PerceptionConfig {
        &self.config
    }

    /// Turn one raw frame into a snapshot.
    pub fn classify(&self, raw: &RawFrame) -> PerceptionSnapshot {
        classify(&self.config, raw)
    }
}

/// Free-function form of [`PerceptionClassifier::classify`].
pub fn classify(config: &PerceptionConfig, raw: &RawFrame) -> PerceptionSnapshot {
    let distance_mm = normalize_distance(raw.distance_mm);
    let (reflectance, reflectance_valid) = normalize_reflectance(raw.reflectance, config.line_setpoint);
    let (heading_deg, heading_valid) = normalize_heading(raw.heading_deg);
    let battery_frac = normalize_battery(raw.battery_frac);
    let frame = &raw.color;

    let seeing_block = seeing_block(config, frame, distance_mm);
    let having_block = resolve(&config.having_block, frame);

    // A held block occludes the sonar, so vision alone decides then.
    let wall_close = (distance_mm >= 0 && distance_mm < config.wall_distance_mm)
        || having_block.is_some();
    let facing_wall = config.wall.detect(frame) && wall_close;

    PerceptionSnapshot {
        seeing_block,
        having_block,
        facing_wall,
        facing_hazard: config.hazard.detect(frame),
        seeing_charger: config.charger.detect(frame),
        on_boundary_line: reflectance_valid && reflectance >= config.boundary_reflectance,
        distance_mm,
        reflectance,
        reflectance_valid,
        heading_deg,
        heading_valid,
        battery_frac,
    }
}

fn seeing_block(config: &PerceptionConfig, frame: &ColorFrame, distance_mm: i32) -> Option<Color> {
    if distance_mm > config.block_cutoff_mm {
        return None;
    }
    match resolve(&config.seeing_block, frame) {
        Some(color) => Some(color),
        None if distance_mm >= 0 && distance_mm < config.close_range_mm => Some(Color::Unknown),
        None => None,
    }
}

fn normalize_distance(raw: i32) -> i32 {
    if raw < 0 {
        NO_DISTANCE
    } else {
        raw
    }
}

fn normalize_reflectance(raw: f32, setpoint: f32) -> (f32, bool) {
    if raw.is_finite() {
        (raw.clamp(0.0, 100.0), true)
    } else {
        (setpoint, false)
    }
}

fn normalize_heading(raw: f32) -> (f32, bool) {
    if raw.is_finite() {
        (wrap_degrees(raw), true)
    } else {
        (0.0, false)
    }
}

fn normalize_battery(raw: f32) -> f32 {
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        1.0
    }
}

/// Parse a battery level delivered as a quoted string signal, e.g. `b'0.93'`.
///
/// Quotes are stripped and a single leading type tag is skipped. Returns `None`
/// for anything that does not leave a finite number.
pub fn parse_battery_signal(signal: &str) -> Option<f32> {
    let trimmed = signal.trim();
    let body = trimmed
        .strip_prefix('b')
        .unwrap_or(trimmed)
        .trim_matches(|c| c == '\'' || c == '"');
    body.trim().parse::<f32>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLOOR: [u8; 3] = [200, 200, 200];
    const BROWN_PX: [u8; 3] = [110, 50, 8];
    const BLACK_PX: [u8; 3] = [5, 4, 6];
    const GREEN_PX: [u8; 3] = [40, 160, 10];
    const WALL_PX: [u8; 3] = [125, 125, 147];

    fn raw(color: ColorFrame) -> RawFrame {
        RawFrame {
            reflectance: 50.0,
            color,
            distance_mm: 300,
            heading_deg: 10.0,
            battery_frac: 0.8,
        }
    }

    fn ahead(px: [u8; 3]) -> ColorFrame {
        let mut f = ColorFrame::filled(12, 8, FLOOR);
        f.paint(Crop::MiddleThird, px);
        f
    }

    fn classify_default(r: &RawFrame) -> PerceptionSnapshot {
        PerceptionClassifier::default().classify(r)
    }

    #[test]
    fn test_sees_brown_block_ahead() {
        let s = classify_default(&raw(ahead(BROWN_PX)));
        assert_eq!(s.seeing_block, Some(Color::Brown));
        assert_eq!(s.having_block, None);
    }

    #[test]
    fn test_sees_black_and_green() {
        assert_eq!(classify_default(&raw(ahead(BLACK_PX))).seeing_block, Some(Color::Black));
        assert_eq!(classify_default(&raw(ahead(GREEN_PX))).seeing_block, Some(Color::Green));
    }

    #[test]
    fn test_two_colors_ahead_is_unknown() {
        let mut f = ColorFrame::filled(12, 8, FLOOR);
        f.paint(Crop::MiddleThird, BROWN_PX);
        // Two columns of the middle band turn green.
        let mut pixels = alloc::vec::Vec::new();
        for y in 0..8 {
            for x in 0..12 {
                let px = if x == 5 || x == 6 { GREEN_PX } else { f.pixel(x, y).unwrap() };
                pixels.push(px);
            }
        }
        let s = classify_default(&raw(ColorFrame::new(12, 8, pixels)));
        assert_eq!(s.seeing_block, Some(Color::Unknown));
    }

    #[test]
    fn test_close_echo_without_color_is_unknown() {
        let mut r = raw(ColorFrame::filled(12, 8, FLOOR));
        r.distance_mm = 30;
        assert_eq!(classify_default(&r).seeing_block, Some(Color::Unknown));
        r.distance_mm = 200;
        assert_eq!(classify_default(&r).seeing_block, None);
    }

    #[test]
    fn test_far_echo_suppresses_block() {
        let mut r = raw(ahead(BROWN_PX));
        r.distance_mm = 900;
        assert_eq!(classify_default(&r).seeing_block, None);
        // No echo at all leaves vision in charge.
        r.distance_mm = -1;
        assert_eq!(classify_default(&r).seeing_block, Some(Color::Brown));
    }

    #[test]
    fn test_having_black_uses_gripper_jaws() {
        let mut f = ColorFrame::filled(12, 8, FLOOR);
        f.paint(Crop::OuterQuarters, BLACK_PX);
        let s = classify_default(&raw(f));
        assert_eq!(s.having_block, Some(Color::Black));
    }

    #[test]
    fn test_having_green_needs_full_coverage() {
        let s = classify_default(&raw(ColorFrame::filled(12, 8, GREEN_PX)));
        assert_eq!(s.having_block, Some(Color::Green));
        let partial = classify_default(&raw(ahead(GREEN_PX)));
        assert_eq!(partial.having_block, None);
    }

    #[test]
    fn test_wall_needs_proximity_unless_carrying() {
        let mut r = raw(ColorFrame::filled(12, 8, WALL_PX));
        r.distance_mm = 100;
        assert!(classify_default(&r).facing_wall);
        r.distance_mm = 400;
        assert!(!classify_default(&r).facing_wall);
        r.distance_mm = -1;
        assert!(!classify_default(&r).facing_wall);
    }

    #[test]
    fn test_hazard_and_charger() {
        let s = classify_default(&raw(ColorFrame::filled(12, 8, [206, 0, 0])));
        assert!(s.facing_hazard);
        let mut f = ColorFrame::filled(12, 8, FLOOR);
        f.paint(Crop::TopHalf, [252, 252, 20]);
        assert!(classify_default(&raw(f)).seeing_charger);
    }

    #[test]
    fn test_boundary_line_from_reflectance() {
        let mut r = raw(ColorFrame::filled(4, 4, FLOOR));
        r.reflectance = 95.0;
        assert!(classify_default(&r).on_boundary_line);
        r.reflectance = 40.0;
        assert!(!classify_default(&r).on_boundary_line);
    }

    #[test]
    fn test_unreadable_values_are_normalized() {
        let r = RawFrame {
            reflectance: f32::NAN,
            color: ColorFrame::new(3, 3, alloc::vec![FLOOR; 2]),
            distance_mm: -7,
            heading_deg: f32::INFINITY,
            battery_frac: f32::NAN,
        };
        let s = classify_default(&r);
        assert_eq!(s.distance_mm, NO_DISTANCE);
        assert!(!s.reflectance_valid);
        assert_eq!(s.reflectance, 40.0);
        assert!(!s.on_boundary_line);
        assert!(!s.heading_valid);
        assert_eq!(s.heading(), None);
        assert_eq!(s.battery_frac, 1.0);
        assert_eq!(s.seeing_block, None);
        assert!(!s.facing_wall);
    }

    #[test]
    fn test_heading_is_wrapped() {
        let mut r = raw(ColorFrame::empty());
        r.heading_deg = -90.0;
        assert!((classify_default(&r).heading_deg - 270.0).abs() < 1e-4);
        r.heading_deg = 725.0;
        assert!((classify_default(&r).heading_deg - 5.0).abs() < 1e-3);
    }

    #[test]
    fn test_battery_clamped() {
        let mut r = raw(ColorFrame::empty());
        r.battery_frac = 1.4;
        assert_eq!(classify_default(&r).battery_frac, 1.0);
        r.battery_frac = -0.2;
        assert_eq!(classify_default(&r).battery_frac, 0.0);
    }

    #[test]
    fn test_parse_battery_signal() {
        assert_eq!(parse_battery_signal("b'0.93'"), Some(0.93));
        assert_eq!(parse_battery_signal("'0.5'"), Some(0.5));
        assert_eq!(parse_battery_signal("0.25"), Some(0.25));
        assert_eq!(parse_battery_signal("b''"), None);
        assert_eq!(parse_battery_signal("garbage"), None);
    }

    #[test]
    fn test_default_config_validates() {
        assert!(PerceptionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_closer_than_ignores_missing_reading() {
        let mut s = PerceptionSnapshot::idle();
        assert!(!s.closer_than(43));
        s.distance_mm = 40;
        assert!(s.closer_than(43));
        s.distance_mm = 43;
        assert!(!s.closer_than(43));
    }
}
