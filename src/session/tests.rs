use std::sync::{Arc, Mutex};

use glam::Vec3;

use super::*;
use crate::types::Transform;

fn make_racers(count: usize) -> Vec<StartRacer> {
    (0..count)
        .map(|idx| StartRacer {
            id: format!("kart_{}", idx + 1),
            name: format!("K{}", idx + 1),
            owner_id: format!("player_{}", idx + 1),
        })
        .collect()
}

fn quick_config(laps: u32) -> SessionConfig {
    let mut config = SessionConfig::default();
    config.race.total_laps = laps;
    config.race.countdown_seconds = 0.0;
    config
}

fn racing_session(racers: usize, laps: u32) -> RaceSession {
    let mut session =
        RaceSession::new(quick_config(laps), make_racers(racers)).expect("valid session");
    assert!(session.start_countdown());
    session.step();
    assert_eq!(session.state(), RaceState::Racing);
    session
}

/// Puts kart `idx` just short of gate `checkpoint`, rolling through it, and
/// runs one tick.
fn drive_through(session: &mut RaceSession, idx: usize, checkpoint: usize) {
    let gate = session.track.checkpoints()[checkpoint].clone();
    let ground = Vec3::new(gate.position.x, 0.0, gate.position.z);
    let mut kinematics = KartKinematics::at(Transform::looking_along(
        ground - gate.forward * 1.2,
        gate.forward,
    ));
    kinematics.velocity = gate.forward * 18.0;
    session.karts[idx].kinematics = kinematics;
    session.step();
}

fn drive_lap(session: &mut RaceSession, idx: usize) {
    let total = session.track.len();
    for checkpoint in (1..total).chain(std::iter::once(0)) {
        drive_through(session, idx, checkpoint);
    }
}

#[test]
fn new_rejects_empty_and_duplicate_participants() {
    assert!(matches!(
        RaceSession::new(SessionConfig::default(), Vec::new()),
        Err(ConfigError::NoParticipants)
    ));

    let mut racers = make_racers(2);
    racers[1].id = racers[0].id.clone();
    assert!(matches!(
        RaceSession::new(SessionConfig::default(), racers),
        Err(ConfigError::DuplicateParticipant(_))
    ));

    let mut config = SessionConfig::default();
    config.vehicle.max_speed = -1.0;
    assert!(RaceSession::new(config, make_racers(1)).is_err());
}

#[test]
fn karts_start_on_distinct_grid_slots() {
    let session = RaceSession::new(SessionConfig::default(), make_racers(4)).expect("session");
    assert_eq!(session.state(), RaceState::Waiting);
    assert_eq!(session.participant_count(), 4);
    for (a_idx, a) in session.karts.iter().enumerate() {
        for b in session.karts.iter().skip(a_idx + 1) {
            assert!(a.kinematics.position.distance(b.kinematics.position) > 1.0);
        }
    }
}

#[test]
fn countdown_goes_green_at_deadline_and_resets_karts() {
    let mut session =
        RaceSession::new(SessionConfig::default(), make_racers(2)).expect("session");
    session.karts[0].progress.laps_completed = 2;
    session.karts[0].progress.finished = true;

    assert!(session.start_countdown());
    assert!(!session.start_countdown(), "second request is a no-op");
    assert_eq!(session.countdown_end_time(), 3.0);

    for _ in 0..149 {
        session.step();
    }
    assert_eq!(session.state(), RaceState::Countdown);
    session.step();
    assert_eq!(session.state(), RaceState::Racing);
    assert_eq!(session.race_start_time(), 3.0);

    let progress = session.kart_progress("kart_1").expect("kart exists");
    assert_eq!(progress.laps_completed, 0);
    assert!(!progress.finished);
    assert_eq!(progress.last_lap_start_time, 3.0);
}

#[test]
fn karts_do_not_move_before_the_green_light() {
    let mut session =
        RaceSession::new(SessionConfig::default(), make_racers(1)).expect("session");
    assert!(session.receive_input(
        "player_1",
        "kart_1",
        KartInput {
            throttle: 1.0,
            ..KartInput::default()
        }
    ));
    session.start_countdown();
    for _ in 0..100 {
        session.step();
    }
    let kinematics = session.kart_kinematics("kart_1").expect("kart exists");
    assert!(kinematics.velocity.x.abs() < 1e-6);
    assert!(kinematics.velocity.z.abs() < 1e-6);
}

#[test]
fn input_is_accepted_only_from_the_owner_and_is_sticky() {
    let mut session = racing_session(2, 3);
    let full_throttle = KartInput {
        throttle: 4.0,
        ..KartInput::default()
    };
    assert!(!session.receive_input("player_2", "kart_1", full_throttle));
    assert!(!session.receive_input("player_1", "kart_9", full_throttle));
    assert!(session.receive_input("player_1", "kart_1", full_throttle));
    assert_eq!(session.karts[0].input.throttle, 1.0);

    for _ in 0..25 {
        session.step();
    }
    let speed = session
        .kart_kinematics("kart_1")
        .expect("kart exists")
        .forward_speed();
    assert!(speed > 5.0, "sticky throttle keeps accelerating, got {speed}");
    let idle = session
        .kart_kinematics("kart_2")
        .expect("kart exists")
        .forward_speed();
    assert!(idle.abs() < 1e-3);

    session.clear_input("kart_1");
    assert_eq!(session.karts[0].input, KartInput::default());
}

#[test]
fn full_lap_completes_and_last_finisher_ends_the_race() {
    let mut session = racing_session(2, 1);
    drive_lap(&mut session, 0);

    let progress = session.kart_progress("kart_1").expect("kart exists");
    assert_eq!(progress.laps_completed, 1);
    assert!(progress.finished);
    assert!(progress.finish_time > 0.0);
    assert_eq!(session.ledger().len(), 1);
    assert_eq!(session.state(), RaceState::Racing);

    drive_lap(&mut session, 1);
    assert_eq!(session.ledger().len(), 2);
    assert_eq!(session.state(), RaceState::Finished);

    let ids: Vec<&str> = session
        .ledger()
        .entries()
        .iter()
        .map(|entry| entry.participant_id.as_str())
        .collect();
    assert_eq!(ids, vec!["kart_1", "kart_2"]);

    let summary = session.build_summary();
    assert_eq!(summary.results.len(), 2);
    assert_eq!(summary.results[0].position, 1);
    assert_eq!(summary.results[0].name, "K1");
    assert_eq!(summary.results[0].time_text, format_race_time(summary.results[0].time));
}

#[test]
fn finished_kart_never_appends_twice() {
    let mut session = racing_session(2, 1);
    drive_lap(&mut session, 0);
    let finish_time = session.kart_progress("kart_1").expect("kart").finish_time;
    drive_lap(&mut session, 0);
    assert_eq!(session.ledger().len(), 1);
    assert_eq!(
        session.kart_progress("kart_1").expect("kart").finish_time,
        finish_time
    );
}

#[test]
fn skipped_gate_does_not_count() {
    let mut session = racing_session(1, 3);
    drive_through(&mut session, 0, 1);
    drive_through(&mut session, 0, 3);
    assert_eq!(session.kart_progress("kart_1").expect("kart").last_checkpoint, 1);
    drive_through(&mut session, 0, 2);
    assert_eq!(session.kart_progress("kart_1").expect("kart").last_checkpoint, 2);
}

#[test]
fn one_tick_through_last_gate_and_start_counts_the_lap() {
    let mut config = quick_config(3);
    config.vehicle.max_speed = 2000.0;
    let mut session = RaceSession::new(config, make_racers(1)).expect("session");
    session.start_countdown();
    session.step();
    let last = session.track.len() - 1;
    session.karts[0].progress.last_checkpoint = last - 1;

    let gate = session.track.checkpoints()[last].clone();
    let ground = Vec3::new(gate.position.x, 0.0, gate.position.z);
    let mut kinematics = KartKinematics::at(Transform::looking_along(
        ground - gate.forward * 1.5,
        gate.forward,
    ));
    // Far enough in one tick to pass gate N-1 and then the start gate.
    let start = session.track.checkpoints()[0].position;
    let reach = Vec3::new(start.x - ground.x, 0.0, start.z - ground.z).length() + 3.0;
    kinematics.velocity = gate.forward * (reach / TICK_SECONDS);
    session.karts[0].kinematics = kinematics;
    session.build_snapshot(true);
    session.step();

    let progress = session.kart_progress("kart_1").expect("kart");
    assert_eq!(progress.laps_completed, 1);
    assert_eq!(progress.last_checkpoint, 0);
    let events = session.build_snapshot(true).events;
    let passed = events.iter().position(|event| {
        matches!(event, RuntimeEvent::CheckpointPassed { index, .. } if *index == last)
    });
    let lap = events
        .iter()
        .position(|event| matches!(event, RuntimeEvent::LapCompleted { lap: 1, .. }));
    assert!(passed.is_some());
    assert!(passed < lap);
}

#[test]
fn more_racers_than_grid_slots_is_rejected() {
    let mut config = quick_config(1);
    config.track.waypoints = Some(vec![
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(0.0, 0.0, 3.0),
        Vec3::new(3.0, 0.0, 0.0),
    ]);
    assert!(RaceSession::new(config.clone(), make_racers(2)).is_ok());
    assert!(matches!(
        RaceSession::new(config, make_racers(3)),
        Err(ConfigError::NoSpawnPoints(3))
    ));
}

#[test]
fn fallen_kart_is_respawned_after_delay() {
    let mut session = racing_session(2, 3);
    let gate_two = session.track.checkpoints()[2].position;
    session.karts[0].kinematics.position = Vec3::new(gate_two.x + 1.0, -6.0, gate_two.z);
    session.step();

    assert!(session.is_respawning("kart_1"));
    assert!(!session.is_respawning("kart_2"));
    let snapshot = session.build_snapshot(true);
    assert!(snapshot.events.iter().any(|event| matches!(
        event,
        RuntimeEvent::KartDown { kart_id, .. } if kart_id == "kart_1"
    )));

    for _ in 0..70 {
        session.step();
    }
    assert!(session.is_respawning("kart_1"), "delay has not elapsed yet");
    let mut extra_ticks = 0;
    while session.is_respawning("kart_1") && extra_ticks < 10 {
        session.step();
        extra_ticks += 1;
    }
    assert!(!session.is_respawning("kart_1"));

    let kinematics = session.kart_kinematics("kart_1").expect("kart");
    assert_eq!(kinematics.velocity, Vec3::ZERO);
    assert!((kinematics.position.y - (gate_two.y + 0.5)).abs() < 1e-4);
    assert_eq!(session.kart_progress("kart_1").expect("kart").last_checkpoint, 2);
}

#[test]
fn snapshot_drains_events_only_when_requested() {
    let mut session = racing_session(1, 3);
    let kept = session.build_snapshot(false);
    assert!(kept.events.is_empty());
    let first = session.build_snapshot(true);
    assert!(first
        .events
        .iter()
        .any(|event| matches!(event, RuntimeEvent::StateChanged { to: RaceState::Racing, .. })));
    let second = session.build_snapshot(true);
    assert!(second.events.is_empty());
    assert_eq!(first.karts.len(), 1);
    assert_eq!(first.karts[0].placement, 1);
}

#[test]
fn subscribers_hear_transitions_in_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut session = RaceSession::new(quick_config(1), make_racers(1)).expect("session");
    let sink = seen.clone();
    session.subscribe(Box::new(move |transition| {
        sink.lock().expect("lock").push((transition.from, transition.to));
    }));
    session.start_countdown();
    session.step();
    drive_lap(&mut session, 0);

    let seen = seen.lock().expect("lock").clone();
    assert_eq!(
        seen,
        vec![
            (RaceState::Waiting, RaceState::Countdown),
            (RaceState::Countdown, RaceState::Racing),
            (RaceState::Racing, RaceState::Finished),
        ]
    );
}

#[test]
fn teardown_stops_every_mutation() {
    let mut session = racing_session(1, 3);
    session.karts[0].kinematics.position.y = -20.0;
    session.step();
    assert!(session.is_respawning("kart_1"));

    session.teardown();
    assert!(session.is_torn_down());
    assert!(!session.is_respawning("kart_1"));

    let tick = session.tick();
    let before = session.kart_kinematics("kart_1").expect("kart");
    session.step();
    assert_eq!(session.tick(), tick);
    assert_eq!(session.kart_kinematics("kart_1").expect("kart"), before);
    assert!(!session.receive_input("player_1", "kart_1", KartInput::default()));
    assert!(!session.start_countdown());
}
