//! Session lifecycle controller
//!
//! `SessionTracker` owns one workout from bootstrap to persistence. Device
//! callbacks are delivered as method calls (`on_location`, `on_tick`,
//! `on_step_count`) and user intents as commands. Stream, ticker and
//! pedometer handles are acquired on entering `Active` and released on every
//! path out of `Active`/`Paused`, including drop.

use crate::bootstrap::{self, BootstrapConfig, InitialFix};
use crate::database::WorkoutStore;
use crate::error::{Result, TrailTrackError};
use crate::metrics;
use crate::mirror::LocalMirror;
use crate::models::{
    LocationSample, ProgramSlot, SessionState, SessionStats, UserProfile, WorkoutRecord,
    WorkoutType,
};
use crate::processor::{GateCounters, LocationStreamProcessor, ProcessorConfig, SampleOutcome};
use crate::providers::{
    BatteryProvider, Clock, IdentityProvider, LocationProvider, PedometerHandle,
    PedometerProvider, PermissionStatus, SubscriptionHandle, TickerProvider, TimerHandle,
};
use crate::sampler::{AdaptiveSampler, SamplerConfig, TrackingConfig};
use crate::steps::{StepCounter, StepStrategy};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle thresholds and gate settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Finishing below this many route points needs a user decision
    pub min_route_points: usize,
    pub min_save_duration_secs: u64,
    pub min_save_distance_m: f64,
    /// Treat the first post-resume sample as a fresh reference
    pub rebaseline_on_resume: bool,
    pub tick_interval_ms: u64,
    #[serde(flatten)]
    pub gates: ProcessorConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_route_points: 5,
            min_save_duration_secs: 30,
            min_save_distance_m: 100.0,
            rebaseline_on_resume: true,
            tick_interval_ms: 1_000,
            gates: ProcessorConfig::default(),
        }
    }
}

/// Everything the tracker needs to know before it starts
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    pub tracking: TrackerConfig,
    pub sampler: SamplerConfig,
    pub bootstrap: BootstrapConfig,
    pub default_weight_kg: f64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            tracking: TrackerConfig::default(),
            sampler: SamplerConfig::default(),
            bootstrap: BootstrapConfig::default(),
            default_weight_kg: 70.0,
        }
    }
}

/// Device-side collaborators
pub struct Devices {
    pub location: Box<dyn LocationProvider>,
    pub battery: Box<dyn BatteryProvider>,
    pub pedometer: Option<Box<dyn PedometerProvider>>,
    pub ticker: Box<dyn TickerProvider>,
    pub clock: Box<dyn Clock>,
}

/// Service-side collaborators
pub struct Services {
    pub store: Box<dyn WorkoutStore>,
    pub mirror: Box<dyn LocalMirror>,
    pub identity: Box<dyn IdentityProvider>,
}

/// Receives state and stats updates; each call sees a complete value
pub trait SessionObserver {
    fn on_state_changed(&mut self, _from: SessionState, _to: SessionState) {}

    fn on_stats_changed(&mut self, _stats: &SessionStats) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishOutcome {
    /// Session moved to `Finishing` and the record is assembled
    Finished { route_points: usize },
    /// Route too short; call `resolve_premature_finish`
    NeedsDecision {
        route_points: usize,
        min_required: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrematureFinishChoice {
    KeepGoing,
    Discard,
    FinishAnyway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    Normal,
    /// Skip the minimum duration/distance check
    Anyway,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved { id: String },
    /// Non-program workout below the save minimums; nothing was written
    TooShort { duration_secs: u64, distance_m: f64 },
    /// Store refused the record; it is held in memory and mirrored when possible
    Pending {
        local_id: Option<String>,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStatus {
    NotAttempted,
    Pending { local_id: Option<String> },
    Saved { id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Pause,
    Resume,
    Finish,
    ResolveFinish(PrematureFinishChoice),
    Discard,
    Save(SaveMode),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Done,
    Finish(FinishOutcome),
    Save(SaveOutcome),
}

#[derive(Debug, Default)]
struct ActiveResources {
    subscription: Option<SubscriptionHandle>,
    ticker: Option<TimerHandle>,
    pedometer: Option<PedometerHandle>,
}

pub struct SessionTracker {
    settings: TrackerSettings,
    workout_type: WorkoutType,
    profile: UserProfile,
    program: Option<ProgramSlot>,
    devices: Devices,
    services: Services,
    observers: Vec<Box<dyn SessionObserver>>,
    sampler: AdaptiveSampler,

    state: SessionState,
    stats: SessionStats,
    processor: LocationStreamProcessor,
    steps: StepCounter,
    initial_fix: Option<InitialFix>,
    tracking_config: Option<TrackingConfig>,
    resources: ActiveResources,

    started_at: Option<DateTime<Utc>>,
    segment_started_at: Option<DateTime<Utc>>,
    paused_at: Option<DateTime<Utc>>,
    carried_ms: i64,

    awaiting_finish_decision: bool,
    record: Option<WorkoutRecord>,
    save_status: SaveStatus,
}

impl SessionTracker {
    pub fn new(
        workout_type: WorkoutType,
        profile: UserProfile,
        settings: TrackerSettings,
        devices: Devices,
        services: Services,
    ) -> Self {
        let processor = LocationStreamProcessor::new(workout_type, settings.tracking.gates.clone());
        let sampler = AdaptiveSampler::new(settings.sampler.clone());

        Self {
            settings,
            workout_type,
            profile,
            program: None,
            devices,
            services,
            observers: Vec::new(),
            sampler,
            state: SessionState::Idle,
            stats: SessionStats::default(),
            processor,
            steps: StepCounter::new(StepStrategy::GpsStride),
            initial_fix: None,
            tracking_config: None,
            resources: ActiveResources::default(),
            started_at: None,
            segment_started_at: None,
            paused_at: None,
            carried_ms: 0,
            awaiting_finish_decision: false,
            record: None,
            save_status: SaveStatus::NotAttempted,
        }
    }

    /// Link the workout to a training-program slot
    pub fn with_program(mut self, program: ProgramSlot) -> Self {
        self.program = Some(program);
        self
    }

    pub fn add_observer(&mut self, observer: Box<dyn SessionObserver>) {
        self.observers.push(observer);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn workout_type(&self) -> WorkoutType {
        self.workout_type
    }

    pub fn route(&self) -> &[crate::models::RoutePoint] {
        self.processor.route()
    }

    pub fn gate_counters(&self) -> GateCounters {
        self.processor.counters()
    }

    pub fn step_strategy(&self) -> StepStrategy {
        self.steps.strategy()
    }

    pub fn initial_fix(&self) -> Option<&InitialFix> {
        self.initial_fix.as_ref()
    }

    pub fn tracking_config(&self) -> Option<TrackingConfig> {
        self.tracking_config
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn paused_at(&self) -> Option<DateTime<Utc>> {
        self.paused_at
    }

    pub fn record(&self) -> Option<&WorkoutRecord> {
        self.record.as_ref()
    }

    pub fn save_status(&self) -> &SaveStatus {
        &self.save_status
    }

    pub fn is_save_pending(&self) -> bool {
        matches!(self.save_status, SaveStatus::Pending { .. })
    }

    pub fn awaiting_finish_decision(&self) -> bool {
        self.awaiting_finish_decision
    }

    /// Whether any device handle is currently held
    pub fn holds_resources(&self) -> bool {
        self.resources.subscription.is_some()
            || self.resources.ticker.is_some()
            || self.resources.pedometer.is_some()
    }

    /// `Idle -> Initializing`: permission and initial fix.
    ///
    /// Falls back to `Idle` when permission is denied or no position exists.
    pub fn initialize(&mut self) -> Result<InitialFix> {
        self.expect_state("initialize", &[SessionState::Idle])?;
        self.transition(SessionState::Initializing);

        if let PermissionStatus::Denied(reason) =
            bootstrap::acquire_permission(self.devices.location.as_mut())
        {
            self.transition(SessionState::Idle);
            return Err(TrailTrackError::Permission(reason));
        }

        match bootstrap::acquire_initial_fix(
            self.devices.location.as_mut(),
            self.devices.clock.as_ref(),
            &self.settings.bootstrap,
        ) {
            Some(fix) => {
                self.initial_fix = Some(fix);
                Ok(fix)
            }
            None => {
                self.transition(SessionState::Idle);
                Err(TrailTrackError::NoFix {
                    attempts: self.settings.bootstrap.accuracy_ladder.len(),
                })
            }
        }
    }

    /// `Initializing -> Active`
    pub fn start(&mut self) -> Result<()> {
        self.expect_state("start", &[SessionState::Initializing])?;
        if self.initial_fix.is_none() {
            return Err(TrailTrackError::InvalidTransition {
                command: "start",
                state: self.state,
            });
        }

        let now = self.devices.clock.now();
        let selected = self.sampler.select(self.devices.battery.as_mut());
        let stream = self
            .sampler
            .start_stream(self.devices.location.as_mut(), selected)?;

        self.processor =
            LocationStreamProcessor::new(self.workout_type, self.settings.tracking.gates.clone());
        self.steps = StepCounter::new(self.probe_step_strategy(now));
        self.tracking_config = Some(stream.config);
        self.resources.subscription = Some(stream.handle);
        self.start_ticker();
        self.subscribe_pedometer();

        self.started_at = Some(now);
        self.segment_started_at = Some(now);
        self.paused_at = None;
        self.carried_ms = 0;
        self.stats = SessionStats::default();

        info!(
            workout_type = %self.workout_type,
            steps = ?self.steps.strategy(),
            fallback_config = stream.used_fallback,
            "Workout started"
        );
        self.transition(SessionState::Active);
        self.notify_stats();
        Ok(())
    }

    /// Feed one location sample. Ignored unless the session is `Active`.
    pub fn on_location(&mut self, sample: LocationSample) -> Option<SampleOutcome> {
        if self.state != SessionState::Active {
            debug!(state = %self.state, "Ignoring location sample outside active tracking");
            return None;
        }

        let outcome = self.processor.process(sample);
        if let SampleOutcome::Credited {
            distance_m,
            speed_kmh,
            ..
        } = outcome
        {
            self.steps
                .record_distance(self.workout_type, distance_m, speed_kmh);
            let now = self.devices.clock.now();
            self.recompute(now);
        }
        Some(outcome)
    }

    /// Duration ticker callback
    pub fn on_tick(&mut self) {
        if self.state != SessionState::Active {
            return;
        }
        let now = self.devices.clock.now();
        self.recompute(now);
    }

    /// Raw cumulative pedometer reading for the current subscription
    pub fn on_step_count(&mut self, raw: u64) {
        if self.state != SessionState::Active {
            return;
        }
        if self.steps.record_pedometer(raw) {
            let next = SessionStats {
                steps: self.steps.steps(),
                ..self.stats
            };
            self.publish(next);
        }
    }

    /// The pedometer stopped delivering; continue with GPS strides
    pub fn on_pedometer_error(&mut self, reason: &str) {
        if self.steps.strategy() == StepStrategy::Pedometer {
            warn!(reason, "Pedometer failed, falling back to GPS step estimation");
            self.release_pedometer();
            self.steps.downgrade_to_gps();
        }
    }

    /// `Active -> Paused`
    pub fn pause(&mut self) -> Result<()> {
        self.expect_state("pause", &[SessionState::Active])?;
        let now = self.devices.clock.now();

        self.recompute(now);
        self.carried_ms = self.active_duration_ms(now);
        self.segment_started_at = None;
        self.paused_at = Some(now);
        self.release_resources();

        info!(duration_secs = self.stats.duration_secs, "Workout paused");
        self.transition(SessionState::Paused);
        Ok(())
    }

    /// `Paused -> Active`, re-checking the battery tier
    pub fn resume(&mut self) -> Result<()> {
        self.expect_state("resume", &[SessionState::Paused])?;
        let now = self.devices.clock.now();

        let selected = self.sampler.select(self.devices.battery.as_mut());
        let stream = self
            .sampler
            .start_stream(self.devices.location.as_mut(), selected)?;

        self.tracking_config = Some(stream.config);
        self.resources.subscription = Some(stream.handle);
        self.start_ticker();
        self.subscribe_pedometer();
        if self.settings.tracking.rebaseline_on_resume {
            self.processor.rebaseline_next();
        }

        if let Some(paused_at) = self.paused_at.take() {
            info!(
                paused_secs = (now - paused_at).num_seconds(),
                "Workout resumed"
            );
        }
        self.segment_started_at = Some(now);
        self.transition(SessionState::Active);
        Ok(())
    }

    /// `Active|Paused -> Finishing`, unless the route is too short to save silently
    pub fn finish(&mut self) -> Result<FinishOutcome> {
        if !self.state.is_live() {
            return Err(TrailTrackError::InvalidTransition {
                command: "finish",
                state: self.state,
            });
        }

        let route_points = self.processor.route().len();
        let min_required = self.settings.tracking.min_route_points;
        if route_points < min_required {
            info!(route_points, min_required, "Route too short, asking before finishing");
            self.awaiting_finish_decision = true;
            return Ok(FinishOutcome::NeedsDecision {
                route_points,
                min_required,
            });
        }

        self.finalize();
        Ok(FinishOutcome::Finished { route_points })
    }

    /// Answer a `NeedsDecision` finish
    pub fn resolve_premature_finish(
        &mut self,
        choice: PrematureFinishChoice,
    ) -> Result<Option<FinishOutcome>> {
        if !self.awaiting_finish_decision {
            return Err(TrailTrackError::InvalidTransition {
                command: "resolve finish",
                state: self.state,
            });
        }
        self.awaiting_finish_decision = false;

        match choice {
            PrematureFinishChoice::KeepGoing => {
                debug!("Continuing workout after short-route prompt");
                Ok(None)
            }
            PrematureFinishChoice::Discard => {
                self.discard()?;
                Ok(None)
            }
            PrematureFinishChoice::FinishAnyway => {
                let route_points = self.processor.route().len();
                self.finalize();
                Ok(Some(FinishOutcome::Finished { route_points }))
            }
        }
    }

    /// Persist the finished workout, or retry a pending save
    pub fn save(&mut self, mode: SaveMode) -> Result<SaveOutcome> {
        match (self.state, &self.save_status) {
            (SessionState::Finishing, _) => {}
            (SessionState::Completed, SaveStatus::Pending { .. }) => {}
            (state, _) => {
                return Err(TrailTrackError::InvalidTransition {
                    command: "save",
                    state,
                })
            }
        }

        let record = self
            .record
            .clone()
            .ok_or_else(|| TrailTrackError::Internal("finished session has no record".into()))?;

        if self.state == SessionState::Finishing
            && mode == SaveMode::Normal
            && !record.is_program_workout()
            && (record.duration_secs < self.settings.tracking.min_save_duration_secs
                || record.distance_m < self.settings.tracking.min_save_distance_m)
        {
            info!(
                duration_secs = record.duration_secs,
                distance_m = record.distance_m,
                "Workout below save minimums"
            );
            return Ok(SaveOutcome::TooShort {
                duration_secs: record.duration_secs,
                distance_m: record.distance_m,
            });
        }

        let previous_local = match &self.save_status {
            SaveStatus::Pending { local_id } => local_id.clone(),
            _ => None,
        };

        // The pending copy stays filed under the owner it was finished with
        let mirrored_under = record.user_id.clone();
        let mut attempt = record.clone();
        if attempt.user_id.is_none() {
            attempt.user_id = self.services.identity.current_user_id();
        }

        let outcome = match self.services.store.save(&attempt) {
            Ok(id) => {
                info!(id = %id, distance_m = attempt.distance_m, "Workout saved");
                let saved = attempt.with_id(id.clone());
                if let Some(local_id) = previous_local {
                    if let Err(e) = self
                        .services
                        .mirror
                        .remove(mirrored_under.as_deref(), &local_id)
                    {
                        warn!(error = %e, "Failed to drop pending local copy");
                    }
                }
                if let Err(e) = self.services.mirror.store(&saved) {
                    warn!(error = %e, "Failed to mirror saved workout locally");
                }
                self.record = Some(saved);
                self.save_status = SaveStatus::Saved { id: id.clone() };
                SaveOutcome::Saved { id }
            }
            Err(e) => {
                warn!(error = %e, "Workout save failed, keeping record locally");
                let local_id = match previous_local {
                    Some(existing) => Some(existing),
                    None => match self.services.mirror.store(&record) {
                        Ok(local_id) => Some(local_id),
                        Err(mirror_err) => {
                            warn!(error = %mirror_err, "Local mirror write failed");
                            None
                        }
                    },
                };
                self.save_status = SaveStatus::Pending {
                    local_id: local_id.clone(),
                };
                SaveOutcome::Pending {
                    local_id,
                    reason: e.to_string(),
                }
            }
        };

        self.transition(SessionState::Completed);
        Ok(outcome)
    }

    /// Tear the session down without persisting anything.
    ///
    /// A completed session can only be discarded while its save is pending;
    /// the local copy is dropped with it.
    pub fn discard(&mut self) -> Result<()> {
        self.expect_state(
            "discard",
            &[
                SessionState::Initializing,
                SessionState::Active,
                SessionState::Paused,
                SessionState::Finishing,
                SessionState::Completed,
            ],
        )?;
        if self.state == SessionState::Completed && !self.is_save_pending() {
            return Err(TrailTrackError::InvalidTransition {
                command: "discard",
                state: self.state,
            });
        }

        if let SaveStatus::Pending {
            local_id: Some(local_id),
        } = &self.save_status
        {
            let user_id = self.record.as_ref().and_then(|r| r.user_id.clone());
            if let Err(e) = self.services.mirror.remove(user_id.as_deref(), local_id) {
                warn!(error = %e, local_id = %local_id, "Failed to drop local copy of discarded workout");
            }
        }

        self.release_resources();
        self.awaiting_finish_decision = false;
        self.segment_started_at = None;
        self.record = None;
        self.save_status = SaveStatus::NotAttempted;
        info!("Workout discarded");
        self.transition(SessionState::Discarded);
        Ok(())
    }

    /// Host app returned to the foreground. Returns true if the stream was restarted.
    pub fn on_foreground(&mut self) -> Result<bool> {
        if self.state != SessionState::Active {
            return Ok(false);
        }

        let alive = self
            .resources
            .subscription
            .map(|handle| self.devices.location.is_subscription_alive(handle))
            .unwrap_or(false);
        if alive {
            return Ok(false);
        }

        warn!("Location subscription lost while in background, restarting");
        if let Some(handle) = self.resources.subscription.take() {
            self.devices.location.unsubscribe(handle);
        }
        let config = self
            .tracking_config
            .unwrap_or_else(|| self.sampler.config().balanced);
        let stream = self
            .sampler
            .start_stream(self.devices.location.as_mut(), config)?;
        self.tracking_config = Some(stream.config);
        self.resources.subscription = Some(stream.handle);
        Ok(true)
    }

    /// Host app moved to the background; tracking continues
    pub fn on_background(&mut self) {
        debug!(state = %self.state, "App backgrounded, tracking continues");
    }

    pub fn execute(&mut self, command: Command) -> Result<CommandOutcome> {
        match command {
            Command::Start => self.start().map(|_| CommandOutcome::Done),
            Command::Pause => self.pause().map(|_| CommandOutcome::Done),
            Command::Resume => self.resume().map(|_| CommandOutcome::Done),
            Command::Finish => self.finish().map(CommandOutcome::Finish),
            Command::ResolveFinish(choice) => {
                self.resolve_premature_finish(choice).map(|outcome| match outcome {
                    Some(finish) => CommandOutcome::Finish(finish),
                    None => CommandOutcome::Done,
                })
            }
            Command::Discard => self.discard().map(|_| CommandOutcome::Done),
            Command::Save(mode) => self.save(mode).map(CommandOutcome::Save),
        }
    }

    fn finalize(&mut self) {
        let now = self.devices.clock.now();
        if self.state == SessionState::Active {
            self.recompute(now);
        }
        self.release_resources();
        self.segment_started_at = None;
        self.awaiting_finish_decision = false;
        self.transition(SessionState::Finishing);

        let stats = self.stats;
        let counters = self.processor.counters();
        info!(
            distance_m = stats.distance_m,
            duration_secs = stats.duration_secs,
            steps = stats.steps,
            calories = stats.calories,
            received = counters.received,
            credited = counters.credited,
            low_accuracy = counters.low_accuracy,
            implausible = counters.implausible,
            stationary = counters.stationary,
            "Workout finished"
        );

        self.record = Some(WorkoutRecord {
            id: None,
            user_id: self.services.identity.current_user_id(),
            workout_type: self.workout_type,
            distance_m: stats.distance_m,
            duration_secs: stats.duration_secs,
            pace_secs_per_km: stats.pace_secs_per_km,
            avg_speed_kmh: stats.avg_speed_kmh,
            calories: stats.calories,
            steps: stats.steps,
            route: self.processor.route().to_vec(),
            started_at: self.started_at.unwrap_or(now),
            finished_at: now,
            program: self.program.clone(),
            notes: String::new(),
        });
    }

    fn recompute(&mut self, now: DateTime<Utc>) {
        let duration_secs = ((self.active_duration_ms(now) / 1000) as u64)
            .max(self.stats.duration_secs);
        let weight_kg = self
            .profile
            .effective_weight_kg(self.settings.default_weight_kg);
        let next = metrics::derive_stats(
            self.workout_type,
            weight_kg,
            self.processor.total_distance_m(),
            duration_secs,
            self.steps.steps(),
        );
        self.publish(next);
    }

    fn active_duration_ms(&self, now: DateTime<Utc>) -> i64 {
        let segment = self
            .segment_started_at
            .map(|start| (now - start).num_milliseconds().max(0))
            .unwrap_or(0);
        self.carried_ms + segment
    }

    fn probe_step_strategy(&mut self, now: DateTime<Utc>) -> StepStrategy {
        let Some(pedometer) = self.devices.pedometer.as_mut() else {
            return StepStrategy::GpsStride;
        };

        match pedometer.is_available() {
            Ok(true) => {}
            Ok(false) => {
                info!("Pedometer not available, estimating steps from GPS");
                return StepStrategy::GpsStride;
            }
            Err(e) => {
                warn!(error = %e, "Pedometer availability check failed, estimating steps from GPS");
                return StepStrategy::GpsStride;
            }
        }

        match pedometer.count_since(now - ChronoDuration::hours(1), now) {
            Ok(recent) => {
                debug!(recent, "Pedometer responding");
                StepStrategy::Pedometer
            }
            Err(e) => {
                warn!(error = %e, "Pedometer probe failed, estimating steps from GPS");
                StepStrategy::GpsStride
            }
        }
    }

    fn subscribe_pedometer(&mut self) {
        if self.steps.strategy() != StepStrategy::Pedometer {
            return;
        }
        let Some(pedometer) = self.devices.pedometer.as_mut() else {
            self.steps.downgrade_to_gps();
            return;
        };
        match pedometer.subscribe() {
            Ok(handle) => self.resources.pedometer = Some(handle),
            Err(e) => {
                warn!(error = %e, "Pedometer subscription failed, estimating steps from GPS");
                self.steps.downgrade_to_gps();
            }
        }
    }

    fn start_ticker(&mut self) {
        let interval = Duration::from_millis(self.settings.tracking.tick_interval_ms);
        self.resources.ticker = Some(self.devices.ticker.start(interval));
    }

    fn release_pedometer(&mut self) {
        if let Some(handle) = self.resources.pedometer.take() {
            if let Some(pedometer) = self.devices.pedometer.as_mut() {
                pedometer.unsubscribe(handle);
            }
        }
        self.steps.end_segment();
    }

    fn release_resources(&mut self) {
        if let Some(handle) = self.resources.subscription.take() {
            self.devices.location.unsubscribe(handle);
        }
        if let Some(handle) = self.resources.ticker.take() {
            self.devices.ticker.cancel(handle);
        }
        self.release_pedometer();
    }

    fn expect_state(&self, command: &'static str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(TrailTrackError::InvalidTransition {
                command,
                state: self.state,
            })
        }
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        debug!(%from, %to, "Session state changed");
        for observer in self.observers.iter_mut() {
            observer.on_state_changed(from, to);
        }
    }

    fn publish(&mut self, next: SessionStats) {
        if next != self.stats {
            self.stats = next;
            self.notify_stats();
        }
    }

    fn notify_stats(&mut self) {
        for observer in self.observers.iter_mut() {
            observer.on_stats_changed(&self.stats);
        }
    }
}

impl Drop for SessionTracker {
    fn drop(&mut self) {
        self.release_resources();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SimulatedDevices;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 2, 18, 0, 0).unwrap()
    }

    fn tracker(sim: &SimulatedDevices, workout_type: WorkoutType) -> SessionTracker {
        SessionTracker::new(
            workout_type,
            UserProfile::with_weight(70.0),
            TrackerSettings::default(),
            sim.devices(),
            sim.services(),
        )
    }

    #[test]
    fn test_commands_rejected_in_wrong_state() {
        let sim = SimulatedDevices::new(t0());
        let mut tracker = tracker(&sim, WorkoutType::Running);

        assert!(matches!(
            tracker.pause(),
            Err(TrailTrackError::InvalidTransition { command: "pause", .. })
        ));
        assert!(tracker.start().is_err());
        assert!(tracker.save(SaveMode::Normal).is_err());
        assert!(tracker.discard().is_err());
        assert_eq!(tracker.state(), SessionState::Idle);
    }

    #[test]
    fn test_permission_denied_returns_to_idle() {
        let sim = SimulatedDevices::new(t0());
        sim.location.set_permission(Ok(PermissionStatus::Denied(
            crate::providers::DenialReason::DeniedByUser,
        )));
        let mut tracker = tracker(&sim, WorkoutType::Running);

        let err = tracker.initialize().unwrap_err();
        assert!(matches!(err, TrailTrackError::Permission(_)));
        assert_eq!(tracker.state(), SessionState::Idle);
    }

    #[test]
    fn test_no_fix_returns_to_idle() {
        let sim = SimulatedDevices::new(t0());
        let mut tracker = tracker(&sim, WorkoutType::Running);

        let err = tracker.initialize().unwrap_err();
        assert!(matches!(err, TrailTrackError::NoFix { attempts: 3 }));
        assert_eq!(tracker.state(), SessionState::Idle);
    }

    #[test]
    fn test_start_acquires_resources() {
        let sim = SimulatedDevices::new(t0());
        sim.location.push_fix_result(Ok(sim.sample_at(0.0, 0, 5.0)));
        let mut tracker = tracker(&sim, WorkoutType::Running);

        tracker.initialize().unwrap();
        tracker.start().unwrap();

        assert_eq!(tracker.state(), SessionState::Active);
        assert!(tracker.holds_resources());
        assert_eq!(sim.location.active_subscriptions(), 1);
        assert_eq!(sim.ticker.active_timers(), 1);
        assert_eq!(tracker.tracking_config(), Some(TrackingConfig::HIGH));
        // Initial fix does not seed the route
        assert!(tracker.route().is_empty());
    }

    #[test]
    fn test_stream_failure_keeps_initializing() {
        let sim = SimulatedDevices::new(t0());
        sim.location.push_fix_result(Ok(sim.sample_at(0.0, 0, 5.0)));
        sim.location.fail_next_subscribes(2);
        let mut tracker = tracker(&sim, WorkoutType::Running);

        tracker.initialize().unwrap();
        assert!(matches!(
            tracker.start(),
            Err(TrailTrackError::StreamStart(_))
        ));
        assert_eq!(tracker.state(), SessionState::Initializing);
        assert!(!tracker.holds_resources());
        assert_eq!(sim.ticker.active_timers(), 0);
    }

    #[test]
    fn test_ticker_advances_duration() {
        let sim = SimulatedDevices::new(t0());
        sim.location.push_fix_result(Ok(sim.sample_at(0.0, 0, 5.0)));
        let mut tracker = tracker(&sim, WorkoutType::Yoga);
        tracker.initialize().unwrap();
        tracker.start().unwrap();

        sim.clock.advance_secs(90);
        tracker.on_tick();

        let stats = tracker.stats();
        assert_eq!(stats.duration_secs, 90);
        assert_eq!(stats.pace_secs_per_km, None);
        // 3.0 MET * 70 kg * 0.025 h
        assert!((stats.calories - 5.25).abs() < 1e-9);
    }

    #[test]
    fn test_drop_releases_resources() {
        let sim = SimulatedDevices::new(t0());
        sim.location.push_fix_result(Ok(sim.sample_at(0.0, 0, 5.0)));
        {
            let mut tracker = tracker(&sim, WorkoutType::Running);
            tracker.initialize().unwrap();
            tracker.start().unwrap();
            assert_eq!(sim.location.active_subscriptions(), 1);
        }
        assert_eq!(sim.location.active_subscriptions(), 0);
        assert_eq!(sim.ticker.active_timers(), 0);
    }

    #[test]
    fn test_resolve_without_prompt_is_rejected() {
        let sim = SimulatedDevices::new(t0());
        let mut tracker = tracker(&sim, WorkoutType::Running);
        assert!(tracker
            .resolve_premature_finish(PrematureFinishChoice::FinishAnyway)
            .is_err());
    }
}
