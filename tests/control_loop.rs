//! End-to-end runs of the control loop against a tiny in-memory robot.
//!
//! The robot's heading follows the wheel commands: a pure in-place rotation
//! moves it one degree per tick in the commanded direction. Everything else the
//! sensors report comes from a scene the test edits between ticks.
//!
//! Run with: `cargo test --test control_loop`

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use sortbot_core::color::ColorHypothesis;
use sortbot_core::port::Clock;
use sortbot_core::{
    ActuatorPort, ArmCommand, Color, ColorFrame, CommandSource, ControlLoop, ControllerConfig, Crop, ManeuverKind,
    Phase, RawFrame, RegionDetector, RgbRange, SensorPort, SoundEvent, TickReport, Zone,
};

// ─── helpers ─────────────────────────────────────────────────────────────────

const FLOOR: [u8; 3] = [200, 200, 200];
const BLACK_PX: [u8; 3] = [5, 4, 6];
const GREEN_PX: [u8; 3] = [40, 160, 10];
const BROWN_PX: [u8; 3] = [110, 50, 8];
const RED_PX: [u8; 3] = [200, 30, 30];
const WALL_PX: [u8; 3] = [125, 125, 147];
const HAZARD_PX: [u8; 3] = [120, 4, 4];

#[derive(Default)]
struct World {
    scene: RawFrame,
    heading: f32,
    wheels: Vec<(f32, f32)>,
    arms: Vec<ArmCommand>,
    sounds: Vec<SoundEvent>,
}

type Shared = Rc<RefCell<World>>;

struct Sensors(Shared);
struct Actuators(Shared);

impl SensorPort for Sensors {
    fn read_reflectance(&mut self) -> f32 {
        self.0.borrow().scene.reflectance
    }
    fn read_color_frame(&mut self) -> ColorFrame {
        self.0.borrow().scene.color.clone()
    }
    fn read_distance_mm(&mut self) -> i32 {
        self.0.borrow().scene.distance_mm
    }
    fn read_heading_deg(&mut self) -> f32 {
        self.0.borrow().heading
    }
    fn read_battery_frac(&mut self) -> f32 {
        self.0.borrow().scene.battery_frac
    }
}

impl ActuatorPort for Actuators {
    fn set_wheel_speeds(&mut self, left: f32, right: f32) {
        let mut w = self.0.borrow_mut();
        if left != 0.0 && left == -right {
            let step = if left > 0.0 { 1.0 } else { -1.0 };
            w.heading = (w.heading + step).rem_euclid(360.0);
        }
        w.wheels.push((left, right));
    }
    fn set_arm(&mut self, position: ArmCommand) {
        self.0.borrow_mut().arms.push(position);
    }
    fn play_sound(&mut self, event: SoundEvent) {
        self.0.borrow_mut().sounds.push(event);
    }
}

/// A sorting loop wired to a fresh world.
fn sorting_robot(config: ControllerConfig) -> (ControlLoop<Sensors, Actuators>, Shared) {
    let world: Shared = Rc::new(RefCell::new(World::default()));
    let cl = ControlLoop::sorting(config, Sensors(world.clone()), Actuators(world.clone())).unwrap();
    (cl, world)
}

fn set_scene(world: &Shared, scene: RawFrame) {
    world.borrow_mut().scene = scene;
}

/// Camera shows `px` in the middle band; sonar reads `distance_mm`.
fn block_ahead(px: [u8; 3], distance_mm: i32) -> RawFrame {
    let mut color = ColorFrame::filled(12, 8, FLOOR);
    color.paint(Crop::MiddleThird, px);
    RawFrame {
        color,
        distance_mm,
        ..RawFrame::default()
    }
}

/// Black block sitting in the gripper jaws.
fn black_held() -> RawFrame {
    let mut color = ColorFrame::filled(12, 8, FLOOR);
    color.paint(Crop::OuterQuarters, BLACK_PX);
    RawFrame {
        color,
        ..RawFrame::default()
    }
}

/// Green block filling the camera.
fn green_held() -> RawFrame {
    RawFrame {
        color: ColorFrame::filled(12, 8, GREEN_PX),
        ..RawFrame::default()
    }
}

fn empty_floor() -> RawFrame {
    RawFrame {
        color: ColorFrame::filled(12, 8, FLOOR),
        ..RawFrame::default()
    }
}

/// Tick until `done` holds or `limit` ticks pass; returns the final report.
fn tick_until<A: ActuatorPort>(
    cl: &mut ControlLoop<Sensors, A>,
    limit: usize,
    done: impl Fn(&TickReport) -> bool,
) -> TickReport {
    for _ in 0..limit {
        let report = cl.tick();
        if done(&report) {
            return report;
        }
    }
    panic!("condition not reached within {} ticks", limit);
}

// ─── sorting ─────────────────────────────────────────────────────────────────

#[test]
fn black_block_is_picked_up_and_dropped_at_home() {
    let (mut cl, world) = sorting_robot(ControllerConfig::default());

    set_scene(&world, block_ahead(BLACK_PX, 300));
    let r = cl.tick();
    assert_eq!(r.phase, Phase::Approaching);
    assert_eq!(r.source, CommandSource::Behavior("approach"));
    assert_eq!(world.borrow().sounds, [SoundEvent::BlockSpotted]);

    set_scene(&world, block_ahead(BLACK_PX, 40));
    let r = cl.tick();
    assert_eq!(r.phase, Phase::Acquired);
    assert_eq!(r.source, CommandSource::Idle);
    assert_eq!(cl.goal().target_color, Some(Color::Black));

    set_scene(&world, black_held());
    let r = cl.tick();
    assert_eq!(r.phase, Phase::Delivering);
    assert_eq!(r.source, CommandSource::Maneuver(ManeuverKind::DropSequence));
    assert_eq!(r.command.and_then(|c| c.arm), Some(ArmCommand::Release));

    set_scene(&world, empty_floor());
    let r = tick_until(&mut cl, 400, |r| r.phase == Phase::Searching);
    assert_eq!(r.transition.map(|t| t.from), Some(Phase::Delivering));
    assert_eq!(cl.active_maneuver(), None);
    assert_eq!(cl.goal().target_color, None);

    let w = world.borrow();
    assert_eq!(w.arms, [ArmCommand::Close, ArmCommand::Release, ArmCommand::Raise]);
    assert!(w.sounds.contains(&SoundEvent::Delivered));
    // turned away by half a revolution, within servo tolerance
    assert!((w.heading - 180.0).abs() <= 1.0, "heading {}", w.heading);
    // twenty ticks of backing off
    assert_eq!(w.wheels.iter().filter(|&&wh| wh == (-200.0, -200.0)).count(), 20);
}

#[test]
fn unknown_block_is_rejected_and_search_resumes() {
    let (mut cl, world) = sorting_robot(ControllerConfig::default());

    // Echo at grab range but no color match.
    set_scene(
        &world,
        RawFrame {
            distance_mm: 30,
            ..empty_floor()
        },
    );
    assert_eq!(cl.tick().phase, Phase::Approaching);
    let r = cl.tick();
    assert_eq!(r.phase, Phase::Lost);
    assert_eq!(world.borrow().arms, [ArmCommand::Release]);
    assert!(world.borrow().sounds.contains(&SoundEvent::BlockRejected));

    set_scene(&world, empty_floor());
    let r = cl.tick();
    assert_eq!(r.phase, Phase::Searching);
    assert_eq!(r.source, CommandSource::Maneuver(ManeuverKind::RecoveryTurn));

    let r = tick_until(&mut cl, 100, |r| r.source == CommandSource::Behavior("search"));
    assert_eq!(r.phase, Phase::Searching);
    let heading = world.borrow().heading;
    assert!((heading - 332.0).abs() <= 1.0, "heading {}", heading);
}

#[test]
fn green_block_is_carried_across_the_line() {
    let (mut cl, world) = sorting_robot(ControllerConfig::default());

    set_scene(&world, block_ahead(GREEN_PX, 200));
    cl.tick();
    set_scene(&world, block_ahead(GREEN_PX, 35));
    assert_eq!(cl.tick().phase, Phase::Acquired);

    set_scene(&world, green_held());
    let r = cl.tick();
    assert_eq!(r.phase, Phase::Transporting);
    assert_eq!(r.source, CommandSource::Behavior("transport"));
    assert_eq!(r.command.map(|c| (c.left_speed, c.right_speed)), Some((200.0, 200.0)));

    set_scene(
        &world,
        RawFrame {
            reflectance: 95.0,
            ..green_held()
        },
    );
    let r = cl.tick();
    assert!(r.zone_flipped);
    assert_eq!(r.zone, Zone::B);
    assert_eq!(r.phase, Phase::Delivering);
    assert_eq!(r.command.and_then(|c| c.arm), Some(ArmCommand::Release));
}

#[test]
fn brown_block_is_compressed_in_place_and_the_next_block_is_taken() {
    let (mut cl, world) = sorting_robot(ControllerConfig::default());

    set_scene(&world, block_ahead(BROWN_PX, 200));
    cl.tick();
    set_scene(&world, block_ahead(BROWN_PX, 30));
    assert_eq!(cl.tick().phase, Phase::Acquired);

    set_scene(
        &world,
        RawFrame {
            color: ColorFrame::filled(12, 8, BROWN_PX),
            ..RawFrame::default()
        },
    );
    let r = cl.tick();
    assert_eq!(r.phase, Phase::Delivering);
    assert_eq!(r.command.and_then(|c| c.arm), Some(ArmCommand::Compress));

    set_scene(&world, empty_floor());
    tick_until(&mut cl, 400, |r| r.phase == Phase::Searching);
    assert_eq!(world.borrow().arms, [ArmCommand::Close, ArmCommand::Compress, ArmCommand::Raise]);

    // the next block is approached and grabbed as usual
    set_scene(&world, block_ahead(BLACK_PX, 300));
    assert_eq!(cl.tick().phase, Phase::Approaching);
    set_scene(&world, block_ahead(BLACK_PX, 40));
    let r = cl.tick();
    assert_eq!(r.phase, Phase::Acquired);
    assert_eq!(r.zone, Zone::A);
    assert_eq!(cl.goal().target_color, Some(Color::Black));
}

#[test]
fn custom_red_hypothesis_routes_red_blocks_home() {
    let mut config = ControllerConfig::default();
    let red = RegionDetector::new(&[RgbRange::new((180, 230), (10, 50), (10, 50))], Crop::MiddleThird, 3.0 / 255.0)
        .unwrap();
    config
        .perception
        .seeing_block
        .push(ColorHypothesis {
            color: Color::Red,
            detector: red,
        })
        .unwrap();
    let (mut cl, world) = sorting_robot(config);

    set_scene(&world, block_ahead(RED_PX, 300));
    assert_eq!(cl.tick().phase, Phase::Approaching);
    set_scene(&world, block_ahead(RED_PX, 40));
    assert_eq!(cl.tick().phase, Phase::Acquired);
    assert_eq!(cl.goal().target_color, Some(Color::Red));

    // red lives in zone A, where the robot already is
    set_scene(&world, empty_floor());
    let r = cl.tick();
    assert_eq!(r.phase, Phase::Delivering);
    assert_eq!(r.command.and_then(|c| c.arm), Some(ArmCommand::Release));
}

#[test]
fn crossing_while_searching_reorients_once() {
    let (mut cl, world) = sorting_robot(ControllerConfig::default());
    set_scene(
        &world,
        RawFrame {
            reflectance: 95.0,
            ..empty_floor()
        },
    );

    let r = cl.tick();
    assert!(r.zone_flipped);
    assert_eq!(r.zone, Zone::B);
    assert_eq!(r.phase, Phase::Searching);
    assert_eq!(r.source, CommandSource::Maneuver(ManeuverKind::Reorient));

    for _ in 0..5 {
        let r = cl.tick();
        assert!(!r.zone_flipped);
        assert_eq!(r.zone, Zone::B);
    }
}

// ─── preemption and cancellation ─────────────────────────────────────────────

#[test]
fn wall_preempts_a_maneuver_which_then_resumes() {
    let (mut cl, world) = sorting_robot(ControllerConfig::default());
    set_scene(
        &world,
        RawFrame {
            reflectance: 95.0,
            ..empty_floor()
        },
    );
    cl.tick();
    set_scene(&world, empty_floor());
    let before = cl.tick();
    assert_eq!(before.source, CommandSource::Maneuver(ManeuverKind::Reorient));

    set_scene(
        &world,
        RawFrame {
            color: ColorFrame::filled(12, 8, WALL_PX),
            distance_mm: 100,
            ..RawFrame::default()
        },
    );
    let r = cl.tick();
    assert!(r.preempted);
    assert_eq!(r.source, CommandSource::Behavior("avoid_wall"));
    assert_eq!(r.command.map(|c| (c.left_speed, c.right_speed)), Some((-200.0, -200.0)));
    assert_eq!(cl.active_maneuver(), Some(ManeuverKind::Reorient));

    set_scene(&world, empty_floor());
    let r = cl.tick();
    assert!(!r.preempted);
    assert_eq!(r.source, CommandSource::Maneuver(ManeuverKind::Reorient));
}

#[test]
fn cancel_token_ends_the_active_maneuver() {
    let (mut cl, world) = sorting_robot(ControllerConfig::default());
    set_scene(
        &world,
        RawFrame {
            reflectance: 95.0,
            ..empty_floor()
        },
    );
    cl.tick();
    assert_eq!(cl.active_maneuver(), Some(ManeuverKind::Reorient));

    set_scene(&world, empty_floor());
    cl.cancel_token().cancel();
    let r = cl.tick();
    assert_eq!(cl.active_maneuver(), None);
    assert_eq!(r.source, CommandSource::Behavior("search"));
}

#[test]
fn hazard_ahead_triggers_avoidance() {
    let (mut cl, world) = sorting_robot(ControllerConfig::default());
    set_scene(
        &world,
        RawFrame {
            color: ColorFrame::filled(12, 8, HAZARD_PX),
            ..RawFrame::default()
        },
    );
    let r = cl.tick();
    assert_eq!(r.source, CommandSource::Behavior("avoid_hazard"));
    assert_eq!(cl.arbiter().activations("avoid_hazard"), 1);
}

#[test]
fn low_battery_overrides_search() {
    let (mut cl, world) = sorting_robot(ControllerConfig::default());
    set_scene(
        &world,
        RawFrame {
            battery_frac: 0.1,
            ..empty_floor()
        },
    );
    let r = cl.tick();
    assert_eq!(r.source, CommandSource::Behavior("seek_charger"));
}

#[test]
fn stuck_heading_times_out_into_recovery() {
    struct Ticker(std::cell::Cell<u64>);
    impl Clock for Ticker {
        fn now(&self) -> Duration {
            let t = self.0.get();
            self.0.set(t + 100);
            Duration::from_millis(t)
        }
    }

    let mut config = ControllerConfig::default();
    config.servo.timeout = Some(Duration::from_millis(500));
    let world: Shared = Rc::new(RefCell::new(World::default()));

    // Actuators that never turn the robot.
    struct Frozen(Shared);
    impl ActuatorPort for Frozen {
        fn set_wheel_speeds(&mut self, left: f32, right: f32) {
            self.0.borrow_mut().wheels.push((left, right));
        }
        fn set_arm(&mut self, _: ArmCommand) {}
        fn play_sound(&mut self, event: SoundEvent) {
            self.0.borrow_mut().sounds.push(event);
        }
    }

    let mut cl = ControlLoop::sorting(config, Sensors(world.clone()), Frozen(world.clone()))
        .unwrap()
        .with_clock(Box::new(Ticker(std::cell::Cell::new(0))));
    world.borrow_mut().scene = RawFrame {
        reflectance: 95.0,
        ..empty_floor()
    };
    cl.tick();
    world.borrow_mut().scene = empty_floor();

    // zone B: reorient toward heading 0 is already satisfied, so point the robot away
    world.borrow_mut().heading = 90.0;
    tick_until(&mut cl, 200, |r| {
        r.source == CommandSource::Maneuver(ManeuverKind::RecoveryTurn)
    });
    assert!(world.borrow().sounds.contains(&SoundEvent::ServoTimeout));
}

// ─── line following ──────────────────────────────────────────────────────────

#[test]
fn line_follower_steers_back_toward_the_edge() {
    let world: Shared = Rc::new(RefCell::new(World::default()));
    let mut cl =
        ControlLoop::line_following(ControllerConfig::default(), Sensors(world.clone()), Actuators(world.clone()))
            .unwrap();

    set_scene(
        &world,
        RawFrame {
            reflectance: 40.0,
            ..RawFrame::default()
        },
    );
    assert_eq!(cl.tick().command.map(|c| (c.left_speed, c.right_speed)), Some((200.0, 200.0)));

    set_scene(
        &world,
        RawFrame {
            reflectance: 30.0,
            ..RawFrame::default()
        },
    );
    let r = cl.tick();
    let (left, right) = r.command.map(|c| (c.left_speed, c.right_speed)).unwrap();
    assert!(left > right, "left {} right {}", left, right);
    assert!(cl.pid().state().integral > 0.0);
}
