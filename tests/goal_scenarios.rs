//! Regression scenarios for the goal machine and the line-follow PID.
//!
//! Run with: `cargo test --test goal_scenarios`

use approx::assert_relative_eq;
use sortbot_core::goal::PhaseChange;
use sortbot_core::{
    ArmCommand, Color, GoalConfig, GoalState, GoalStateMachine, LineFollowController, ManeuverKind,
    ManeuverOutcome, ManeuverRequest, PerceptionSnapshot, Phase, PidConfig, WheelLayout, Zone,
};

// ─── helpers ─────────────────────────────────────────────────────────────────

/// Snapshot with a block of `color` at `distance_mm` straight ahead.
fn block_ahead(color: Color, distance_mm: i32) -> PerceptionSnapshot {
    PerceptionSnapshot {
        seeing_block: Some(color),
        distance_mm,
        ..PerceptionSnapshot::idle()
    }
}

/// Snapshot with the floor sensor on the boundary line.
fn on_line() -> PerceptionSnapshot {
    PerceptionSnapshot {
        on_boundary_line: true,
        reflectance: 95.0,
        ..PerceptionSnapshot::idle()
    }
}

fn approaching() -> GoalState {
    GoalState::default().with_phase(Phase::Approaching)
}

// ─── grab decisions ──────────────────────────────────────────────────────────

#[test]
fn black_block_in_reach_is_acquired() {
    let machine = GoalStateMachine::default();
    let mut goal = approaching();
    let fx = machine.evaluate(&mut goal, &block_ahead(Color::Black, 40));

    assert_eq!(goal.phase, Phase::Acquired);
    assert_eq!(goal.target_color, Some(Color::Black));
    assert_eq!(
        fx.transition,
        Some(PhaseChange {
            from: Phase::Approaching,
            to: Phase::Acquired
        })
    );
    assert_eq!(fx.arm, Some(ArmCommand::Close));
}

#[test]
fn unknown_block_in_reach_is_released() {
    let machine = GoalStateMachine::default();
    let mut goal = approaching();
    let fx = machine.evaluate(&mut goal, &block_ahead(Color::Unknown, 40));

    assert_eq!(goal.phase, Phase::Lost);
    assert_eq!(goal.target_color, None);
    assert_eq!(fx.arm, Some(ArmCommand::Release));
}

#[test]
fn grab_threshold_is_strict() {
    let machine = GoalStateMachine::default();
    let mut goal = approaching();
    machine.evaluate(&mut goal, &block_ahead(Color::Black, 43));
    assert_eq!(goal.phase, Phase::Approaching);
    machine.evaluate(&mut goal, &block_ahead(Color::Black, 42));
    assert_eq!(goal.phase, Phase::Acquired);
}

#[test]
fn missing_distance_never_grabs() {
    let machine = GoalStateMachine::default();
    let mut goal = approaching();
    for _ in 0..10 {
        machine.evaluate(&mut goal, &block_ahead(Color::Green, -1));
    }
    assert_eq!(goal.phase, Phase::Approaching);
}

#[test]
fn lost_resolves_to_search_with_recovery_turn() {
    let machine = GoalStateMachine::default();
    let mut goal = approaching();
    machine.evaluate(&mut goal, &PerceptionSnapshot::idle());
    assert_eq!(goal.phase, Phase::Lost);

    let fx = machine.evaluate(&mut goal, &PerceptionSnapshot::idle());
    assert_eq!(goal.phase, Phase::Searching);
    assert_eq!(fx.maneuver, Some(ManeuverRequest::RecoveryTurn));
}

// ─── zones ───────────────────────────────────────────────────────────────────

#[test]
fn two_crossings_restore_the_zone() {
    let machine = GoalStateMachine::default();
    let mut goal = GoalState::new(Zone::B);

    machine.evaluate(&mut goal, &on_line());
    machine.evaluate(&mut goal, &PerceptionSnapshot::idle());
    assert_eq!(goal.current_zone, Zone::A);

    machine.evaluate(&mut goal, &on_line());
    machine.evaluate(&mut goal, &PerceptionSnapshot::idle());
    assert_eq!(goal.current_zone, Zone::B);
}

#[test]
fn lingering_on_the_line_flips_once() {
    let machine = GoalStateMachine::default();
    let mut goal = GoalState::default();
    let flips = (0..20)
        .filter(|_| machine.evaluate(&mut goal, &on_line()).zone_flipped)
        .count();
    assert_eq!(flips, 1);
    assert_eq!(goal.current_zone, Zone::B);
}

#[test]
fn transport_then_deliver_across_the_line() {
    let machine = GoalStateMachine::default();
    let mut goal = approaching();

    machine.evaluate(&mut goal, &block_ahead(Color::Green, 30));
    assert_eq!(goal.phase, Phase::Acquired);

    machine.evaluate(&mut goal, &PerceptionSnapshot::idle());
    assert_eq!(goal.phase, Phase::Transporting);
    assert_eq!(goal.target_heading_deg, Some(0.0));

    let fx = machine.evaluate(&mut goal, &on_line());
    assert_eq!(goal.phase, Phase::Delivering);
    assert_eq!(goal.current_zone, Zone::B);
    assert_eq!(fx.maneuver, Some(ManeuverRequest::DropSequence { compress: false }));

    let fx = machine.on_maneuver_finished(&mut goal, ManeuverKind::DropSequence, ManeuverOutcome::Completed);
    assert_eq!(goal.phase, Phase::Searching);
    assert_eq!(goal.target_color, None);
    assert_eq!(goal.target_heading_deg, None);
    assert!(fx.reset_pid);
}

#[test]
fn custom_home_table_changes_routing() {
    let mut config = GoalConfig::default();
    config.home_zones.clear();
    config
        .home_zones
        .push((Color::Black, sortbot_core::HomeZone::Zone(Zone::B)))
        .unwrap();
    config.toward_b_heading_deg = 90.0;
    let machine = GoalStateMachine::new(config);

    let mut goal = GoalState::default()
        .with_phase(Phase::Acquired)
        .with_target(Color::Black);
    machine.evaluate(&mut goal, &PerceptionSnapshot::idle());
    assert_eq!(goal.phase, Phase::Transporting);
    assert_eq!(goal.target_heading_deg, Some(90.0));
}

// ─── PID regression ──────────────────────────────────────────────────────────

#[test]
fn pid_first_step_matches_formula() {
    let mut pid = LineFollowController::new(PidConfig::default());
    let (left, right) = pid.step(10.0, 40.0);

    // error 30, derivative 30, integral 30
    let expected = 9.0 * 30.0 + 4.5 * 30.0 + 0.0001 * 30.0;
    assert_relative_eq!(pid.last_update(), expected, epsilon = 1e-9);
    assert_relative_eq!(pid.last_update(), 405.003, epsilon = 1e-9);
    assert_relative_eq!(left, (200.0 + expected) as f32, epsilon = 1e-3);
    assert_eq!(right, 0.0);
}

#[test]
fn pid_hub_layout_negates_the_left_motor() {
    let mut pid = LineFollowController::new(PidConfig {
        layout: WheelLayout::InvertedLeft,
        ..PidConfig::default()
    });
    let (left, right) = pid.step(10.0, 40.0);

    // left = -clamp(200 - 405.003), right = clamp(200 + 405.003)
    assert_eq!(left, 0.0);
    assert_relative_eq!(right, 605.003, epsilon = 1e-3);
}

#[test]
fn pid_steady_state_holds_base_speed() {
    let mut pid = LineFollowController::default();
    for _ in 0..10_000 {
        assert_eq!(pid.step(40.0, 40.0), (200.0, 200.0));
    }
    assert_eq!(pid.last_update(), 0.0);
}
