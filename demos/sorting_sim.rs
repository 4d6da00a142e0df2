//! # Block-Sorting Arena Simulation
//!
//! Drives the stock sorting controller against a toy arena: blocks appear in
//! front of the robot after a short search, the gripper holds whatever it
//! closed on, and carrying a block forward eventually crosses the boundary line
//! into the other zone.
//!
//! Run with: `RUST_LOG=sortbot_core=debug cargo run --features std --example sorting_sim`

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use sortbot_core::{
    ActuatorPort, ArmCommand, Color, ColorFrame, CommandSource, ControlLoop, ControllerConfig, Crop, Phase,
    SensorPort, SoundEvent, Zone,
};

// ── Arena ────────────────────────────────────────────────────────────────────

const FLOOR: [u8; 3] = [200, 200, 200];
const PIVOT_TICKS_PER_BLOCK: u32 = 15;
const TICKS_TO_LINE: u32 = 25;
const STEP_MM: i32 = 20;
const BLOCKS: [Color; 5] = [Color::Black, Color::Green, Color::Brown, Color::Black, Color::Green];

fn pixel(color: Color) -> [u8; 3] {
    match color {
        Color::Black => [5, 4, 6],
        Color::Green => [40, 160, 10],
        Color::Brown => [110, 50, 8],
        _ => FLOOR,
    }
}

#[derive(Default)]
struct Arena {
    heading: f32,
    pending: VecDeque<Color>,
    ahead: Option<(Color, i32)>,
    held: Option<Color>,
    pivot_ticks: u32,
    carried_ticks: u32,
    on_line: bool,
    delivered: Vec<(Color, Zone)>,
    zone: Zone,
}

impl Arena {
    fn frame(&self) -> ColorFrame {
        let mut frame = ColorFrame::filled(12, 8, FLOOR);
        match (self.held, self.ahead) {
            (Some(Color::Black), _) => frame.paint(Crop::OuterQuarters, pixel(Color::Black)),
            (Some(c), _) => frame.paint(Crop::Full, pixel(c)),
            (None, Some((c, _))) => frame.paint(Crop::MiddleThird, pixel(c)),
            (None, None) => {}
        }
        frame
    }

    fn drive(&mut self, left: f32, right: f32) {
        self.on_line = false;
        if left != 0.0 && left == -right {
            let step = if left > 0.0 { 1.0 } else { -1.0 };
            self.heading = (self.heading + step).rem_euclid(360.0);
        } else if left > 0.0 && right > 0.0 {
            if let Some((_, d)) = self.ahead.as_mut() {
                *d = (*d - STEP_MM).max(0);
            }
            if self.held.is_some() {
                self.carried_ticks += 1;
                if self.carried_ticks >= TICKS_TO_LINE {
                    self.carried_ticks = 0;
                    self.on_line = true;
                    self.zone = self.zone.other();
                }
            }
        } else if left > 0.0 && right == 0.0 && self.ahead.is_none() {
            self.pivot_ticks += 1;
            if self.pivot_ticks >= PIVOT_TICKS_PER_BLOCK {
                self.pivot_ticks = 0;
                self.ahead = self.pending.pop_front().map(|c| (c, 300));
            }
        }
    }
}

type Shared = Rc<RefCell<Arena>>;

struct Sensors(Shared);
struct Actuators(Shared);

impl SensorPort for Sensors {
    fn read_reflectance(&mut self) -> f32 {
        if self.0.borrow().on_line {
            95.0
        } else {
            20.0
        }
    }
    fn read_color_frame(&mut self) -> ColorFrame {
        self.0.borrow().frame()
    }
    fn read_distance_mm(&mut self) -> i32 {
        let arena = self.0.borrow();
        match (arena.held, arena.ahead) {
            (None, Some((_, d))) => d,
            _ => -1,
        }
    }
    fn read_heading_deg(&mut self) -> f32 {
        self.0.borrow().heading
    }
    fn read_battery_frac(&mut self) -> f32 {
        0.8
    }
}

impl ActuatorPort for Actuators {
    fn set_wheel_speeds(&mut self, left: f32, right: f32) {
        self.0.borrow_mut().drive(left, right);
    }
    fn set_arm(&mut self, position: ArmCommand) {
        let mut arena = self.0.borrow_mut();
        match position {
            ArmCommand::Close => {
                arena.held = arena.ahead.take().map(|(c, _)| c);
                arena.carried_ticks = 0;
            }
            // a compressed block is pressed into the floor and leaves the jaws too
            ArmCommand::Release | ArmCommand::Compress => {
                if let Some(c) = arena.held.take() {
                    let zone = arena.zone;
                    arena.delivered.push((c, zone));
                }
            }
            ArmCommand::Raise => {}
        }
    }
    fn play_sound(&mut self, event: SoundEvent) {
        tracing::info!(?event, "beep");
    }
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sortbot_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let arena: Shared = Rc::new(RefCell::new(Arena {
        pending: BLOCKS.into(),
        ..Arena::default()
    }));
    let mut robot = match ControlLoop::sorting(
        ControllerConfig::default(),
        Sensors(arena.clone()),
        Actuators(arena.clone()),
    ) {
        Ok(robot) => robot,
        Err(e) => {
            eprintln!("bad configuration: {e}");
            std::process::exit(1);
        }
    };

    println!("=== Block-sorting arena ===\n");
    let mut last_phase = Phase::Searching;
    for report in robot.run_for(4_000) {
        if report.phase != last_phase || report.zone_flipped {
            let source = match report.source {
                CommandSource::Behavior(name) => name.to_string(),
                CommandSource::Maneuver(kind) => format!("{kind:?}"),
                CommandSource::Idle => "idle".to_string(),
            };
            println!(
                "tick {:>4}  {:<12} zone {:?}  heading {:>5.1}  via {}",
                report.tick,
                format!("{:?}", report.phase),
                report.zone,
                report.snapshot.heading_deg,
                source
            );
            last_phase = report.phase;
        }
    }

    let arena = arena.borrow();
    println!("\n=== Deliveries ===");
    for (color, zone) in &arena.delivered {
        println!("  {color:?} dropped in zone {zone:?}");
    }
    println!(
        "\n{} of {} blocks sorted; behavior activations: search {}, approach {}, transport {}",
        arena.delivered.len(),
        BLOCKS.len(),
        robot.arbiter().activations("search"),
        robot.arbiter().activations("approach"),
        robot.arbiter().activations("transport"),
    );
    if !arena.pending.is_empty() || arena.delivered.len() != BLOCKS.len() {
        eprintln!("simulation stalled with blocks left unsorted");
        std::process::exit(1);
    }
}
