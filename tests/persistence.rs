use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::tempdir;
use trailtrack::config::AppConfig;
use trailtrack::database::{SqliteWorkoutStore, WorkoutStore};
use trailtrack::mirror::{JsonFileMirror, LocalMirror, LOCAL_ID_PREFIX};
use trailtrack::models::ProgramSlot;
use trailtrack::session::{SaveMode, SaveOutcome, Services, SessionTracker};
use trailtrack::simulation::SimulatedDevices;
use trailtrack::{SessionState, UserProfile, WorkoutType};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 3, 16, 45, 0).unwrap()
}

fn walk(tracker: &mut SessionTracker, sim: &SimulatedDevices, secs: i64) {
    for i in 0..=secs {
        let ms = i * 1000;
        sim.clock.set(sim.start() + Duration::milliseconds(ms));
        tracker.on_location(sim.sample_at(1.4 * i as f64, ms, 6.0));
    }
}

fn tracker_with(sim: &SimulatedDevices, services: Services, config: &AppConfig) -> SessionTracker {
    sim.location.push_fix_result(Ok(sim.sample_at(0.0, 0, 6.0)));
    let mut tracker = SessionTracker::new(
        WorkoutType::Walking,
        UserProfile::with_weight(64.0),
        config.tracker_settings(),
        sim.devices(),
        services,
    );
    tracker.initialize().unwrap();
    tracker.start().unwrap();
    tracker
}

#[test]
fn test_session_saved_to_sqlite() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("workouts.db");
    let config = AppConfig::default();
    let sim = SimulatedDevices::new(t0());

    let services = Services {
        store: Box::new(SqliteWorkoutStore::open(&db_path).unwrap()),
        mirror: Box::new(sim.mirror.clone()),
        identity: Box::new(sim.identity.clone()),
    };
    let mut tracker = tracker_with(&sim, services, &config);
    walk(&mut tracker, &sim, 90);
    tracker.finish().unwrap();

    let id = match tracker.save(SaveMode::Normal).unwrap() {
        SaveOutcome::Saved { id } => id,
        other => panic!("expected saved workout, got {:?}", other),
    };
    assert!(!id.starts_with(LOCAL_ID_PREFIX));
    drop(tracker);

    let store = SqliteWorkoutStore::open(&db_path).unwrap();
    let history = store.fetch_by_user("athlete-1").unwrap();
    assert_eq!(history.len(), 1);

    let saved = &history[0];
    assert_eq!(saved.id.as_deref(), Some(id.as_str()));
    assert_eq!(saved.workout_type, WorkoutType::Walking);
    assert_eq!(saved.duration_secs, 90);
    assert_eq!(saved.route.len(), 91);
    assert!((saved.distance_m - 126.0).abs() < 0.1);
    // 4.0 MET * 64 kg * 90 s
    assert!((saved.calories - 4.0 * 64.0 * 90.0 / 3600.0).abs() < 1e-9);
    assert_eq!(saved.started_at, t0());
}

#[test]
fn test_program_workout_skips_save_minimums() {
    let sim = SimulatedDevices::new(t0());
    let config = AppConfig::default();
    sim.location.push_fix_result(Ok(sim.sample_at(0.0, 0, 6.0)));
    let mut tracker = SessionTracker::new(
        WorkoutType::Walking,
        UserProfile::default(),
        config.tracker_settings(),
        sim.devices(),
        sim.services(),
    )
    .with_program(ProgramSlot {
        program_id: "walk-base".into(),
        user_program_id: "up-7".into(),
        week_index: 0,
        workout_index: 2,
    });
    tracker.initialize().unwrap();
    tracker.start().unwrap();

    walk(&mut tracker, &sim, 10);
    tracker.finish().unwrap();

    assert!(matches!(
        tracker.save(SaveMode::Normal).unwrap(),
        SaveOutcome::Saved { .. }
    ));
    let saved = sim.store.records();
    assert_eq!(saved[0].program.as_ref().map(|p| p.workout_index), Some(2));
}

#[test]
fn test_failed_save_lands_in_json_mirror() {
    let temp_dir = tempdir().unwrap();
    let mirror_path = temp_dir.path().join("cache").join("recent.json");
    let config = AppConfig::default();
    let sim = SimulatedDevices::new(t0());
    sim.store.fail_with("server returned 503");

    let services = Services {
        store: Box::new(sim.store.clone()),
        mirror: Box::new(JsonFileMirror::new(&mirror_path, config.storage.mirror_capacity)),
        identity: Box::new(sim.identity.clone()),
    };
    let mut tracker = tracker_with(&sim, services, &config);
    walk(&mut tracker, &sim, 80);
    tracker.finish().unwrap();

    let local_id = match tracker.save(SaveMode::Normal).unwrap() {
        SaveOutcome::Pending { local_id, .. } => local_id.unwrap(),
        other => panic!("expected pending save, got {:?}", other),
    };
    assert_eq!(tracker.state(), SessionState::Completed);

    let mirror = JsonFileMirror::new(&mirror_path, config.storage.mirror_capacity);
    let recent = mirror.recent(Some("athlete-1")).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id.as_deref(), Some(local_id.as_str()));
    assert_eq!(recent[0].route.len(), 81);

    // Retrying once the store is back replaces the local copy
    sim.store.recover();
    assert!(matches!(
        tracker.save(SaveMode::Normal).unwrap(),
        SaveOutcome::Saved { .. }
    ));
    let recent = mirror.recent(Some("athlete-1")).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id.as_deref(), Some("wk-1"));
    assert_eq!(sim.store.attempts(), 2);
}

#[test]
fn test_config_drives_tracker_thresholds() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        r#"
[tracking]
min_route_points = 3
min_save_duration_secs = 2
min_save_distance_m = 2.0

[profile]
default_weight_kg = 80.0
"#,
    )
    .unwrap();
    let config = AppConfig::load_from_file(&config_path).unwrap();

    let sim = SimulatedDevices::new(t0());
    sim.location.push_fix_result(Ok(sim.sample_at(0.0, 0, 6.0)));
    let mut tracker = SessionTracker::new(
        WorkoutType::Walking,
        UserProfile::default(),
        config.tracker_settings(),
        sim.devices(),
        sim.services(),
    );
    tracker.initialize().unwrap();
    tracker.start().unwrap();
    walk(&mut tracker, &sim, 2);

    // Three route points clear the lowered minimum
    tracker.finish().unwrap();
    assert_eq!(tracker.state(), SessionState::Finishing);
    assert!(matches!(
        tracker.save(SaveMode::Normal).unwrap(),
        SaveOutcome::Saved { .. }
    ));
    let saved = sim.store.records();
    assert!((saved[0].calories - 4.0 * 80.0 * 2.0 / 3600.0).abs() < 1e-9);
}
