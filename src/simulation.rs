//! Deterministic in-process collaborators
//!
//! Every provider is a cheap handle over shared state, so a test or the
//! replay driver can hand a boxed clone to the tracker and keep another
//! clone to script inputs and inspect what the tracker did.

use crate::database::WorkoutStore;
use crate::error::{Result, StorageError, TrailTrackError};
use crate::mirror::{LocalMirror, MemoryMirror};
use crate::models::{LocationSample, SessionState, SessionStats, UserProfile, WorkoutRecord, WorkoutType};
use crate::processor::GateCounters;
use crate::providers::{
    BatteryProvider, Clock, IdentityProvider, LocationAccuracy, LocationProvider,
    PedometerHandle, PedometerProvider, PermissionStatus, ProviderError, SubscriptionHandle,
    TickerProvider, TimerHandle,
};
use crate::sampler::TrackingConfig;
use crate::session::{
    Devices, FinishOutcome, PrematureFinishChoice, SaveMode, SaveOutcome, Services,
    SessionObserver, SessionTracker, TrackerSettings,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;
use tracing::info;

/// Meters per degree of latitude on a 6371 km sphere
const METERS_PER_DEGREE: f64 = 111_194.93;

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<DateTime<Utc>>>,
    slept: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
            slept: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.now.set(now);
    }

    pub fn advance_ms(&self, ms: i64) {
        self.now.set(self.now.get() + ChronoDuration::milliseconds(ms));
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance_ms(secs * 1000);
    }

    /// Total time spent in `sleep`
    pub fn slept(&self) -> Duration {
        self.slept.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.slept.set(self.slept.get() + duration);
        self.advance_ms(duration.as_millis() as i64);
    }
}

#[derive(Debug)]
struct LocationState {
    permission: std::result::Result<PermissionStatus, ProviderError>,
    fix_results: VecDeque<std::result::Result<LocationSample, ProviderError>>,
    fix_requests: Vec<LocationAccuracy>,
    last_known: Option<LocationSample>,
    subscribe_failures: usize,
    subscribe_attempts: usize,
    subscribed_configs: Vec<TrackingConfig>,
    active: HashSet<u64>,
    next_handle: u64,
}

/// Location provider answering from a script
#[derive(Debug, Clone)]
pub struct ScriptedLocation {
    state: Rc<RefCell<LocationState>>,
}

impl ScriptedLocation {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(LocationState {
                permission: Ok(PermissionStatus::Granted),
                fix_results: VecDeque::new(),
                fix_requests: Vec::new(),
                last_known: None,
                subscribe_failures: 0,
                subscribe_attempts: 0,
                subscribed_configs: Vec::new(),
                active: HashSet::new(),
                next_handle: 1,
            })),
        }
    }

    pub fn set_permission(&self, permission: std::result::Result<PermissionStatus, ProviderError>) {
        self.state.borrow_mut().permission = permission;
    }

    /// Queue the answer to the next `current_fix`; an empty queue times out
    pub fn push_fix_result(&self, result: std::result::Result<LocationSample, ProviderError>) {
        self.state.borrow_mut().fix_results.push_back(result);
    }

    pub fn set_last_known(&self, sample: Option<LocationSample>) {
        self.state.borrow_mut().last_known = sample;
    }

    pub fn fail_next_subscribes(&self, count: usize) {
        self.state.borrow_mut().subscribe_failures = count;
    }

    /// Drop every live subscription as an OS would when killing the app's updates
    pub fn kill_subscriptions(&self) {
        self.state.borrow_mut().active.clear();
    }

    pub fn fix_requests(&self) -> Vec<LocationAccuracy> {
        self.state.borrow().fix_requests.clone()
    }

    pub fn subscribe_attempts(&self) -> usize {
        self.state.borrow().subscribe_attempts
    }

    pub fn subscribed_configs(&self) -> Vec<TrackingConfig> {
        self.state.borrow().subscribed_configs.clone()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.state.borrow().active.len()
    }
}

impl Default for ScriptedLocation {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationProvider for ScriptedLocation {
    fn request_permission(&mut self) -> std::result::Result<PermissionStatus, ProviderError> {
        self.state.borrow().permission.clone()
    }

    fn current_fix(
        &mut self,
        accuracy: LocationAccuracy,
        timeout: Duration,
    ) -> std::result::Result<LocationSample, ProviderError> {
        let mut state = self.state.borrow_mut();
        state.fix_requests.push(accuracy);
        state.fix_results.pop_front().unwrap_or(Err(ProviderError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }))
    }

    fn last_known_fix(&mut self) -> std::result::Result<Option<LocationSample>, ProviderError> {
        Ok(self.state.borrow().last_known)
    }

    fn subscribe(
        &mut self,
        config: &TrackingConfig,
    ) -> std::result::Result<SubscriptionHandle, ProviderError> {
        let mut state = self.state.borrow_mut();
        state.subscribe_attempts += 1;
        if state.subscribe_failures > 0 {
            state.subscribe_failures -= 1;
            return Err(ProviderError::Failed("location updates refused".into()));
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        state.active.insert(handle);
        state.subscribed_configs.push(*config);
        Ok(SubscriptionHandle(handle))
    }

    fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        self.state.borrow_mut().active.remove(&handle.0);
    }

    fn is_subscription_alive(&self, handle: SubscriptionHandle) -> bool {
        self.state.borrow().active.contains(&handle.0)
    }
}

/// Battery reporting a settable level
#[derive(Debug, Clone)]
pub struct FixedBattery {
    level: Rc<RefCell<std::result::Result<f64, ProviderError>>>,
    reads: Rc<Cell<usize>>,
}

impl FixedBattery {
    pub fn new(level: f64) -> Self {
        Self {
            level: Rc::new(RefCell::new(Ok(level))),
            reads: Rc::new(Cell::new(0)),
        }
    }

    pub fn failing() -> Self {
        let battery = Self::new(0.0);
        battery.fail();
        battery
    }

    pub fn set_level(&self, level: f64) {
        *self.level.borrow_mut() = Ok(level);
    }

    pub fn fail(&self) {
        *self.level.borrow_mut() = Err(ProviderError::Unavailable("battery service".into()));
    }

    pub fn reads(&self) -> usize {
        self.reads.get()
    }
}

impl BatteryProvider for FixedBattery {
    fn level(&mut self) -> std::result::Result<f64, ProviderError> {
        self.reads.set(self.reads.get() + 1);
        self.level.borrow().clone()
    }
}

#[derive(Debug)]
struct PedometerState {
    available: std::result::Result<bool, ProviderError>,
    probe: std::result::Result<u64, ProviderError>,
    subscribe_fails: bool,
    active: HashSet<u64>,
    next_handle: u64,
}

/// Pedometer whose availability and failures are scripted.
///
/// Counts are pushed into the tracker directly via `on_step_count`.
#[derive(Debug, Clone)]
pub struct ScriptedPedometer {
    state: Rc<RefCell<PedometerState>>,
}

impl ScriptedPedometer {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(PedometerState {
                available: Ok(true),
                probe: Ok(0),
                subscribe_fails: false,
                active: HashSet::new(),
                next_handle: 1,
            })),
        }
    }

    pub fn set_available(&self, available: std::result::Result<bool, ProviderError>) {
        self.state.borrow_mut().available = available;
    }

    pub fn set_probe(&self, probe: std::result::Result<u64, ProviderError>) {
        self.state.borrow_mut().probe = probe;
    }

    pub fn fail_subscribe(&self) {
        self.state.borrow_mut().subscribe_fails = true;
    }

    pub fn active_subscriptions(&self) -> usize {
        self.state.borrow().active.len()
    }
}

impl Default for ScriptedPedometer {
    fn default() -> Self {
        Self::new()
    }
}

impl PedometerProvider for ScriptedPedometer {
    fn is_available(&mut self) -> std::result::Result<bool, ProviderError> {
        self.state.borrow().available.clone()
    }

    fn count_since(
        &mut self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> std::result::Result<u64, ProviderError> {
        self.state.borrow().probe.clone()
    }

    fn subscribe(&mut self) -> std::result::Result<PedometerHandle, ProviderError> {
        let mut state = self.state.borrow_mut();
        if state.subscribe_fails {
            return Err(ProviderError::Unavailable("step counter".into()));
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        state.active.insert(handle);
        Ok(PedometerHandle(handle))
    }

    fn unsubscribe(&mut self, handle: PedometerHandle) {
        self.state.borrow_mut().active.remove(&handle.0);
    }
}

/// Ticker that never fires on its own; the driver calls `on_tick`
#[derive(Debug, Clone, Default)]
pub struct ManualTicker {
    active: Rc<RefCell<HashSet<u64>>>,
    next_handle: Rc<Cell<u64>>,
}

impl ManualTicker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_timers(&self) -> usize {
        self.active.borrow().len()
    }
}

impl TickerProvider for ManualTicker {
    fn start(&mut self, _interval: Duration) -> TimerHandle {
        let handle = self.next_handle.get() + 1;
        self.next_handle.set(handle);
        self.active.borrow_mut().insert(handle);
        TimerHandle(handle)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.active.borrow_mut().remove(&handle.0);
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user_id: Rc<RefCell<Option<String>>>,
}

impl StaticIdentity {
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Rc::new(RefCell::new(Some(user_id.into()))),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn sign_out(&self) {
        *self.user_id.borrow_mut() = None;
    }

    pub fn sign_in(&self, user_id: impl Into<String>) {
        *self.user_id.borrow_mut() = Some(user_id.into());
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<String> {
        self.user_id.borrow().clone()
    }
}

/// Store keeping records in memory, optionally refusing every save
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Rc<RefCell<Vec<WorkoutRecord>>>,
    failure: Rc<RefCell<Option<String>>>,
    attempts: Rc<Cell<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.borrow_mut() = Some(reason.into());
    }

    pub fn recover(&self) {
        *self.failure.borrow_mut() = None;
    }

    pub fn records(&self) -> Vec<WorkoutRecord> {
        self.records.borrow().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.get()
    }
}

impl WorkoutStore for MemoryStore {
    fn save(&mut self, record: &WorkoutRecord) -> std::result::Result<String, StorageError> {
        self.attempts.set(self.attempts.get() + 1);
        if let Some(reason) = self.failure.borrow().clone() {
            return Err(StorageError::Unavailable(reason));
        }
        if record.user_id.is_none() {
            return Err(StorageError::NotAuthenticated);
        }

        let mut records = self.records.borrow_mut();
        let id = format!("wk-{}", records.len() + 1);
        records.push(record.with_id(id.clone()));
        Ok(id)
    }

    fn fetch_by_user(&self, user_id: &str) -> std::result::Result<Vec<WorkoutRecord>, StorageError> {
        let mut records: Vec<WorkoutRecord> = self
            .records
            .borrow()
            .iter()
            .filter(|r| r.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(records)
    }
}

/// Observer recording every notification it receives
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    transitions: Rc<RefCell<Vec<(SessionState, SessionState)>>>,
    stats: Rc<RefCell<Vec<SessionStats>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transitions(&self) -> Vec<(SessionState, SessionState)> {
        self.transitions.borrow().clone()
    }

    pub fn stats_updates(&self) -> Vec<SessionStats> {
        self.stats.borrow().clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_state_changed(&mut self, from: SessionState, to: SessionState) {
        self.transitions.borrow_mut().push((from, to));
    }

    fn on_stats_changed(&mut self, stats: &SessionStats) {
        self.stats.borrow_mut().push(*stats);
    }
}

/// One full set of simulated collaborators
#[derive(Debug, Clone)]
pub struct SimulatedDevices {
    pub clock: ManualClock,
    pub location: ScriptedLocation,
    pub battery: FixedBattery,
    pub pedometer: ScriptedPedometer,
    pub ticker: ManualTicker,
    pub identity: StaticIdentity,
    pub store: MemoryStore,
    pub mirror: MemoryMirror,
    origin: (f64, f64),
    start: DateTime<Utc>,
}

impl SimulatedDevices {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            clock: ManualClock::new(start),
            location: ScriptedLocation::new(),
            battery: FixedBattery::new(0.8),
            pedometer: ScriptedPedometer::new(),
            ticker: ManualTicker::new(),
            identity: StaticIdentity::signed_in("athlete-1"),
            store: MemoryStore::new(),
            mirror: MemoryMirror::default(),
            origin: (47.3769, 8.5417),
            start,
        }
    }

    /// Device bundle without a step sensor
    pub fn devices(&self) -> Devices {
        Devices {
            location: Box::new(self.location.clone()),
            battery: Box::new(self.battery.clone()),
            pedometer: None,
            ticker: Box::new(self.ticker.clone()),
            clock: Box::new(self.clock.clone()),
        }
    }

    pub fn devices_with_pedometer(&self) -> Devices {
        Devices {
            pedometer: Some(Box::new(self.pedometer.clone())),
            ..self.devices()
        }
    }

    pub fn services(&self) -> Services {
        Services {
            store: Box::new(self.store.clone()),
            mirror: Box::new(self.mirror.clone()),
            identity: Box::new(self.identity.clone()),
        }
    }

    /// Sample `north_m` meters north of the origin, `ms` after the simulation start
    pub fn sample_at(&self, north_m: f64, ms: i64, accuracy_m: f64) -> LocationSample {
        self.sample_offset(north_m, 0.0, ms, accuracy_m)
    }

    pub fn sample_offset(&self, north_m: f64, east_m: f64, ms: i64, accuracy_m: f64) -> LocationSample {
        let (lat0, lon0) = self.origin;
        let lat = lat0 + north_m / METERS_PER_DEGREE;
        let lon = lon0 + east_m / (METERS_PER_DEGREE * lat0.to_radians().cos());
        LocationSample::new(lat, lon, accuracy_m, self.start + ChronoDuration::milliseconds(ms))
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }
}

/// How a recorded track should be driven through the tracker
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub workout_type: WorkoutType,
    pub profile: UserProfile,
    pub battery_level: f64,
    pub use_pedometer: bool,
    /// Pause before the sample with this index
    pub pause_before: Option<usize>,
    /// Resume before the sample with this index
    pub resume_before: Option<usize>,
    /// Answer a short-route prompt with "finish anyway" instead of discarding
    pub force_finish: bool,
    pub save: bool,
    pub save_mode: SaveMode,
    pub user_id: Option<String>,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            workout_type: WorkoutType::Running,
            profile: UserProfile { weight_kg: None },
            battery_level: 1.0,
            use_pedometer: false,
            pause_before: None,
            resume_before: None,
            force_finish: false,
            save: false,
            save_mode: SaveMode::Normal,
            user_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub final_state: SessionState,
    pub stats: SessionStats,
    pub counters: GateCounters,
    pub route_points: usize,
    pub tracking_config: Option<TrackingConfig>,
    pub finish: FinishOutcome,
    pub save: Option<SaveOutcome>,
    pub record: Option<WorkoutRecord>,
}

/// Drive a whole session from a recorded track.
///
/// The simulated clock follows sample timestamps and the duration ticker
/// fires once per elapsed second in between.
pub fn replay_track(
    samples: &[LocationSample],
    options: &ReplayOptions,
    settings: TrackerSettings,
    store: Box<dyn WorkoutStore>,
    mirror: Box<dyn LocalMirror>,
) -> Result<ReplayReport> {
    let first = samples
        .first()
        .ok_or_else(|| TrailTrackError::Internal("cannot replay an empty track".into()))?;

    let sim = SimulatedDevices::new(first.timestamp);
    sim.battery.set_level(options.battery_level);
    sim.location.push_fix_result(Ok(*first));
    let identity = match &options.user_id {
        Some(user_id) => StaticIdentity::signed_in(user_id.clone()),
        None => StaticIdentity::anonymous(),
    };

    let devices = if options.use_pedometer {
        sim.devices_with_pedometer()
    } else {
        sim.devices()
    };
    let services = Services {
        store,
        mirror,
        identity: Box::new(identity),
    };

    let mut tracker = SessionTracker::new(
        options.workout_type,
        options.profile.clone(),
        settings,
        devices,
        services,
    );
    tracker.initialize()?;
    tracker.start()?;

    let step_base = 10_000u64;
    for (index, sample) in samples.iter().enumerate() {
        while sim.clock.now() + ChronoDuration::seconds(1) <= sample.timestamp {
            sim.clock.advance_secs(1);
            tracker.on_tick();
        }
        if sample.timestamp > sim.clock.now() {
            sim.clock.set(sample.timestamp);
        }

        if options.pause_before == Some(index) && tracker.state() == SessionState::Active {
            tracker.pause()?;
        }
        if options.resume_before == Some(index) && tracker.state() == SessionState::Paused {
            tracker.resume()?;
        }

        tracker.on_location(*sample);
        if options.use_pedometer {
            // Synthetic cadence of one step per 0.7 m credited
            let raw = step_base + (tracker.stats().distance_m / 0.7).round() as u64;
            tracker.on_step_count(raw);
        }
    }

    let mut finish = tracker.finish()?;
    if let FinishOutcome::NeedsDecision { route_points, .. } = finish {
        let choice = if options.force_finish {
            PrematureFinishChoice::FinishAnyway
        } else {
            PrematureFinishChoice::Discard
        };
        info!(route_points, ?choice, "Resolving short route");
        if let Some(resolved) = tracker.resolve_premature_finish(choice)? {
            finish = resolved;
        }
    }

    let save = if options.save && tracker.state() == SessionState::Finishing {
        Some(tracker.save(options.save_mode)?)
    } else {
        None
    };

    Ok(ReplayReport {
        final_state: tracker.state(),
        stats: tracker.stats(),
        counters: tracker.gate_counters(),
        route_points: tracker.route().len(),
        tracking_config: tracker.tracking_config(),
        finish,
        save,
        record: tracker.record().cloned(),
    })
}
