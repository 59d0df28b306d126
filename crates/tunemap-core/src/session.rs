//! SessionController: single-owner event loop for the player session.
//!
//! A session plays one linear queue built from every nearby locality's
//! tracks.  The controller owns the locality list and the current position
//! exclusively; every input arrives as a `SessionEvent`:
//!
//! - commands from the host (toggle, skips, pause, radius, volume, route),
//! - `Loaded` results of track fetches, which run in spawned tasks,
//! - engine notifications (track changed, queue ended),
//! - timer expiries (movement check, pause timeout, radius debounce).
//!
//! All engine queue mutations happen inside this loop, so a skip can never
//! land in the middle of a refresh rewriting the queue.  Fetch results carry
//! the session id they were issued under and are dropped if the session has
//! moved on.
//!
//! After each mutation a `SessionSnapshot` is published on a `watch`
//! channel; user-facing notices go out on a `broadcast` channel.
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tunemap_proto::config::SessionConfig;
use tunemap_proto::notification::Notification;
use tunemap_proto::protocol::{Coordinates, Locality, Track};
use tunemap_proto::state::{Preferences, PreferencesStore};

use crate::api::LocalityApi;
use crate::engine::{AudioEngine, EngineEvent, RepeatMode};
use crate::error::SessionError;
use crate::location::LocationProvider;
use crate::queue::{
    calculate_flat_index, composite_id, create_queue, find_position, next_locality, next_track,
    previous_locality, previous_track, track_at, track_count,
    try_restore_position, QueueItem, QueuePosition,
};
use crate::timer::DelayedTask;

/// First path segments the host uses for sign-in screens.
const AUTH_ROUTES: &[&str] = &["auth", "(auth)", "login", "signup", "register"];

pub fn is_auth_route(path: &str) -> bool {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .is_some_and(|first| AUTH_ROUTES.contains(&first))
}

// ── SessionEvent ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    ToggleSession,
    SkipToNextTrack,
    SkipToPreviousTrack,
    SkipToNextLocality,
    SkipToPreviousLocality,
    Pause,
    Resume,
    SetRadius(f64),
    SetVolume(f32),
    /// The host navigated to `path`.
    RouteChanged(String),
}

/// What asked for a track fetch.  Decides the notice shown on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshTrigger {
    Start,
    Movement,
    Radius,
}

impl RefreshTrigger {
    fn failure_title(self) -> &'static str {
        match self {
            RefreshTrigger::Start => "Couldn't start session",
            RefreshTrigger::Movement => "Couldn't refresh tracks for your new location",
            RefreshTrigger::Radius => "Couldn't refresh tracks for the new radius",
        }
    }
}

/// All inputs into the SessionController loop.
#[derive(Debug)]
pub enum SessionEvent {
    Command(SessionCommand),
    /// A track fetch finished.
    Loaded {
        session_id: u64,
        load_seq: u64,
        trigger: RefreshTrigger,
        location: Coordinates,
        result: Result<Vec<Locality>, SessionError>,
    },
    /// Forwarded from the audio engine while a session is running.
    Engine(EngineEvent),
    MovementTick { session_id: u64 },
    PauseTimeout { session_id: u64 },
    RadiusSettled { session_id: u64 },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Inactive,
    Starting,
    Active,
    Ending,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub session_id: u64,
    pub localities: Vec<Locality>,
    pub position: QueuePosition,
    pub radius_km: f64,
    pub volume: f32,
    pub paused: bool,
    /// A track fetch is outstanding.
    pub refreshing: bool,
}

// ── SessionHandle ─────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionEvent>,
    snapshot: watch::Receiver<SessionSnapshot>,
    notify_tx: broadcast::Sender<Notification>,
}

impl SessionHandle {
    /// False once the controller has stopped.
    pub async fn send(&self, cmd: SessionCommand) -> bool {
        self.tx.send(SessionEvent::Command(cmd)).await.is_ok()
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(SessionEvent::Shutdown).await;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notify_tx.subscribe()
    }
}

// ── SessionController ─────────────────────────────────────────────────────────

pub struct SessionController {
    config: SessionConfig,
    engine: Arc<dyn AudioEngine>,
    api: Arc<dyn LocalityApi>,
    location: Arc<dyn LocationProvider>,
    prefs_store: Option<PreferencesStore>,
    event_tx: mpsc::Sender<SessionEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    notify_tx: broadcast::Sender<Notification>,

    status: SessionStatus,
    session_id: u64,
    localities: Vec<Locality>,
    position: QueuePosition,
    radius_km: f64,
    volume: f32,
    paused: bool,
    /// Where the last applied fetch was made from.
    last_location: Option<Coordinates>,
    /// Sequence number of the newest fetch still outstanding.
    pending_load: Option<u64>,
    load_seq: u64,
    ghost_seq: u64,
    /// Queue id we jumped to and whose track-change has not arrived yet.
    /// Earlier track-change events describe a queue we already left.
    awaiting_track: Option<String>,

    engine_listener: Option<JoinHandle<()>>,
    movement_check: Option<JoinHandle<()>>,
    pause_timer: DelayedTask,
    radius_timer: DelayedTask,
}

impl SessionController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SessionConfig,
        engine: Arc<dyn AudioEngine>,
        api: Arc<dyn LocalityApi>,
        location: Arc<dyn LocationProvider>,
        prefs: Preferences,
        prefs_store: Option<PreferencesStore>,
        event_tx: mpsc::Sender<SessionEvent>,
        notify_tx: broadcast::Sender<Notification>,
    ) -> Self {
        let initial = SessionSnapshot {
            status: SessionStatus::Inactive,
            session_id: 0,
            localities: Vec::new(),
            position: QueuePosition::default(),
            radius_km: prefs.radius_km,
            volume: prefs.volume,
            paused: false,
            refreshing: false,
        };
        let (snapshot_tx, _) = watch::channel(initial);
        Self {
            pause_timer: DelayedTask::new(config.pause_timeout()),
            radius_timer: DelayedTask::new(config.radius_debounce()),
            config,
            engine,
            api,
            location,
            prefs_store,
            event_tx,
            snapshot_tx,
            notify_tx,
            status: SessionStatus::Inactive,
            session_id: 0,
            localities: Vec::new(),
            position: QueuePosition::default(),
            radius_km: prefs.radius_km,
            volume: prefs.volume,
            paused: false,
            last_location: None,
            pending_load: None,
            load_seq: 0,
            ghost_seq: 0,
            awaiting_track: None,
            engine_listener: None,
            movement_check: None,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.event_tx.clone(),
            snapshot: self.snapshot_tx.subscribe(),
            notify_tx: self.notify_tx.clone(),
        }
    }

    /// Run the session loop.  Returns on `Shutdown` or when every sender is
    /// gone; a running session is torn down on the way out.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<SessionEvent>) {
        info!("SessionController: starting event loop");

        loop {
            let evt = event_rx.recv().await;
            match evt {
                None => {
                    info!("SessionController: event channel closed, shutting down");
                    break;
                }
                Some(SessionEvent::Shutdown) => {
                    info!("SessionController: shutdown requested");
                    break;
                }
                Some(evt) => self.handle_event(evt).await,
            }
        }

        self.end_session().await;
    }

    pub async fn handle_event(&mut self, evt: SessionEvent) {
        match evt {
            SessionEvent::Command(cmd) => {
                info!("SessionController: command {:?}", cmd);
                self.handle_command(cmd).await;
            }
            SessionEvent::Loaded {
                session_id,
                load_seq,
                trigger,
                location,
                result,
            } => {
                self.on_loaded(session_id, load_seq, trigger, location, result)
                    .await
            }
            SessionEvent::Engine(EngineEvent::TrackChanged { id }) => {
                self.on_track_changed(id).await
            }
            SessionEvent::Engine(EngineEvent::QueueEnded) => self.on_queue_ended().await,
            SessionEvent::MovementTick { session_id } => self.on_movement_tick(session_id).await,
            SessionEvent::PauseTimeout { session_id } => {
                if self.is_live(session_id) && self.paused {
                    info!("SessionController: paused too long, ending session");
                    self.notify(Notification::info(
                        "Session ended",
                        "Playback was paused for too long.",
                    ));
                    self.end_session().await;
                }
            }
            SessionEvent::RadiusSettled { session_id } => {
                if self.is_live(session_id) {
                    self.refresh(RefreshTrigger::Radius).await;
                }
            }
            SessionEvent::Shutdown => self.end_session().await,
        }
    }

    fn is_live(&self, session_id: u64) -> bool {
        session_id == self.session_id && self.status == SessionStatus::Active
    }

    // ── command handlers ──────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::ToggleSession => {
                if self.status == SessionStatus::Inactive {
                    self.start_session().await;
                } else {
                    self.end_session().await;
                }
            }
            SessionCommand::SkipToNextTrack => self.skip(next_track).await,
            SessionCommand::SkipToPreviousTrack => self.skip(previous_track).await,
            SessionCommand::SkipToNextLocality => self.skip(next_locality).await,
            SessionCommand::SkipToPreviousLocality => self.skip(previous_locality).await,
            SessionCommand::Pause => self.pause().await,
            SessionCommand::Resume => self.resume().await,
            SessionCommand::SetRadius(km) => self.set_radius(km).await,
            SessionCommand::SetVolume(volume) => self.set_volume(volume).await,
            SessionCommand::RouteChanged(path) => {
                if self.status != SessionStatus::Inactive && is_auth_route(&path) {
                    info!("SessionController: navigated to {:?}, ending session", path);
                    self.end_session().await;
                }
            }
        }
    }

    async fn start_session(&mut self) {
        self.session_id += 1;
        self.status = SessionStatus::Starting;
        info!("SessionController: starting session {}", self.session_id);
        self.listen_to_engine();
        self.publish();

        match self.location.current_position().await {
            Ok(at) => self.spawn_load(RefreshTrigger::Start, at),
            Err(e) => {
                error!("SessionController: no location for session start: {}", e);
                self.notify(Notification::error(
                    RefreshTrigger::Start.failure_title(),
                    SessionError::from(e).to_string(),
                ));
                self.end_session().await;
            }
        }
    }

    async fn skip(
        &mut self,
        target: fn(QueuePosition, &[Locality]) -> Option<QueuePosition>,
    ) {
        if self.status != SessionStatus::Active {
            debug!("SessionController: skip ignored, no active session");
            return;
        }
        let Some(dest) = target(self.position, &self.localities) else {
            return;
        };
        let flat = calculate_flat_index(dest.locality, dest.track, &self.localities);
        debug!(
            "SessionController: skip {:?} -> {:?} (flat {})",
            self.position, dest, flat
        );
        match self.engine.skip(flat).await {
            Ok(()) => {
                self.awaiting_track = self.composite_id_at(dest);
                self.position = dest;
                self.publish();
            }
            Err(e) => {
                error!("SessionController: skip failed: {}", e);
                self.notify(Notification::error("Couldn't skip", e.to_string()));
                self.end_session().await;
            }
        }
    }

    async fn pause(&mut self) {
        if self.status != SessionStatus::Active || self.paused {
            return;
        }
        if let Err(e) = self.engine.pause().await {
            warn!("SessionController: pause failed: {}", e);
            return;
        }
        self.paused = true;
        let tx = self.event_tx.clone();
        let session_id = self.session_id;
        self.pause_timer.arm(async move {
            let _ = tx.send(SessionEvent::PauseTimeout { session_id }).await;
        });
        self.publish();
    }

    async fn resume(&mut self) {
        if self.status != SessionStatus::Active || !self.paused {
            return;
        }
        if let Err(e) = self.engine.play().await {
            warn!("SessionController: resume failed: {}", e);
            return;
        }
        self.pause_timer.cancel();
        self.paused = false;
        self.publish();
    }

    async fn set_radius(&mut self, km: f64) {
        if !km.is_finite() || km <= 0.0 {
            warn!("SessionController: ignoring radius {}", km);
            return;
        }
        self.radius_km = km;
        self.save_preferences().await;
        self.publish();

        if self.status == SessionStatus::Active {
            let tx = self.event_tx.clone();
            let session_id = self.session_id;
            self.radius_timer.arm(async move {
                let _ = tx.send(SessionEvent::RadiusSettled { session_id }).await;
            });
        }
    }

    async fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if let Err(e) = self.engine.set_volume(self.volume).await {
            warn!("SessionController: set_volume failed: {}", e);
        }
        self.save_preferences().await;
        self.publish();
    }

    // ── track loading ─────────────────────────────────────────────────────────

    async fn on_movement_tick(&mut self, session_id: u64) {
        if !self.is_live(session_id) {
            return;
        }
        if self.pending_load.is_some() {
            debug!("SessionController: movement check skipped, refresh in flight");
            return;
        }
        let at = match self.location.current_position().await {
            Ok(at) => at,
            Err(e) => {
                warn!("SessionController: movement check without a fix: {}", e);
                return;
            }
        };
        let moved = self
            .last_location
            .map_or(true, |prev| prev.displacement(&at) > self.config.movement_threshold_deg);
        if moved {
            info!("SessionController: moved to {:?}, refreshing", at);
            self.spawn_load(RefreshTrigger::Movement, at);
        }
    }

    async fn refresh(&mut self, trigger: RefreshTrigger) {
        let at = match self.location.current_position().await {
            Ok(at) => Some(at),
            Err(e) => {
                warn!("SessionController: no fresh fix for {:?} refresh: {}", trigger, e);
                self.last_location
            }
        };
        match at {
            Some(at) => self.spawn_load(trigger, at),
            None => warn!("SessionController: {:?} refresh skipped, no location", trigger),
        }
    }

    fn spawn_load(&mut self, trigger: RefreshTrigger, location: Coordinates) {
        self.load_seq += 1;
        self.pending_load = Some(self.load_seq);
        let (session_id, load_seq, radius_km) = (self.session_id, self.load_seq, self.radius_km);
        debug!(
            "SessionController: fetch #{} ({:?}) near {:?} within {} km",
            load_seq, trigger, location, radius_km
        );

        let api = Arc::clone(&self.api);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = api
                .localities_with_tracks(location, radius_km)
                .await
                .map_err(SessionError::from);
            let _ = tx
                .send(SessionEvent::Loaded {
                    session_id,
                    load_seq,
                    trigger,
                    location,
                    result,
                })
                .await;
        });
        self.publish();
    }

    async fn on_loaded(
        &mut self,
        session_id: u64,
        load_seq: u64,
        trigger: RefreshTrigger,
        location: Coordinates,
        result: Result<Vec<Locality>, SessionError>,
    ) {
        if session_id != self.session_id || self.status == SessionStatus::Inactive {
            debug!(
                "SessionController: discarding fetch from session {} (now {})",
                session_id, self.session_id
            );
            return;
        }
        if self.pending_load != Some(load_seq) {
            debug!("SessionController: discarding superseded fetch #{}", load_seq);
            return;
        }
        self.pending_load = None;

        let applied = match result {
            Ok(fresh) => self.load_tracks(fresh).await,
            Err(e) => Err(e),
        };
        match applied {
            Ok(()) => {
                self.last_location = Some(location);
                if self.status == SessionStatus::Starting {
                    self.status = SessionStatus::Active;
                    self.arm_movement_check();
                    info!(
                        "SessionController: session {} active, {} tracks in {} localities",
                        self.session_id,
                        track_count(&self.localities),
                        self.localities.len()
                    );
                }
                if trigger == RefreshTrigger::Radius {
                    self.notify(Notification::info(
                        "Radius updated",
                        format!("Playing music within {} km.", self.radius_km),
                    ));
                }
                self.publish();
            }
            Err(e) => {
                error!("SessionController: {:?} fetch failed: {}", trigger, e);
                self.notify(Notification::error(trigger.failure_title(), e.to_string()));
                self.end_session().await;
            }
        }
    }

    /// Bring the local list and the engine queue in line with `fresh`.
    async fn load_tracks(&mut self, fresh: Vec<Locality>) -> Result<(), SessionError> {
        let fresh: Vec<Locality> = fresh.into_iter().filter(|l| !l.tracks.is_empty()).collect();
        let current = track_at(&self.localities, self.position).cloned();
        let was_ghost_only = self.is_ghost_only();

        match current {
            Some(track) if fresh.is_empty() => {
                debug!("SessionController: no nearby tracks, keeping current as ghost");
                let ghost = self.ghost_for(track.clone());
                let keep = QueueItem::new(&ghost, &track);
                self.rewrite_around_current(keep, Vec::new(), Vec::new()).await?;
                self.localities = vec![ghost];
                self.position = QueuePosition::default();
                // a looping engine would replay the ghost forever and never report the end
                self.engine.set_repeat_mode(RepeatMode::Off).await?;
            }
            Some(track) => match try_restore_position(&fresh, &track.track_id) {
                Some(pos) => {
                    debug!("SessionController: current track restored at {:?}", pos);
                    let mut queue = create_queue(&fresh);
                    let flat = calculate_flat_index(pos.locality, pos.track, &fresh);
                    let after = queue.split_off(flat + 1);
                    let keep = queue.pop().ok_or(SessionError::Desync {
                        expected: flat,
                        len: 0,
                    })?;
                    self.rewrite_around_current(keep, queue, after).await?;
                    self.localities = fresh;
                    self.position = pos;
                }
                None => {
                    debug!("SessionController: current track gone, prepending ghost");
                    let ghost = self.ghost_for(track.clone());
                    let keep = QueueItem::new(&ghost, &track);
                    let after = create_queue(&fresh);
                    self.rewrite_around_current(keep, Vec::new(), after).await?;
                    self.localities = std::iter::once(ghost).chain(fresh).collect();
                    self.position = QueuePosition::default();
                }
            },
            None if !fresh.is_empty() => {
                debug!("SessionController: cold start");
                self.engine.reset().await?;
                self.engine.add(create_queue(&fresh), None).await?;
                self.engine.set_repeat_mode(RepeatMode::Queue).await?;
                self.engine.set_volume(self.volume).await?;
                self.engine.skip(0).await?;
                self.engine.play().await?;
                self.localities = fresh;
                self.position = QueuePosition::default();
                self.awaiting_track = self.composite_id_at(self.position);
                self.paused = false;
            }
            None => return Err(SessionError::NoTracks),
        }
        if was_ghost_only && !self.is_ghost_only() {
            self.engine.set_repeat_mode(RepeatMode::Queue).await?;
        }

        let len = self.engine.queue().await?.len();
        let expected = track_count(&self.localities);
        if len != expected {
            return Err(SessionError::Desync { expected, len });
        }
        Ok(())
    }

    fn is_ghost_only(&self) -> bool {
        matches!(self.localities.as_slice(), [only] if only.is_ghost())
    }

    fn composite_id_at(&self, pos: QueuePosition) -> Option<String> {
        let locality = self.localities.get(pos.locality)?;
        let track = locality.tracks.get(pos.track)?;
        Some(composite_id(&locality.locality_id, &track.track_id))
    }

    fn ghost_for(&mut self, track: Track) -> Locality {
        self.ghost_seq += 1;
        let tag = format!(
            "{}-{}",
            chrono::Utc::now().timestamp_millis(),
            self.ghost_seq
        );
        Locality::ghost(track, tag)
    }

    /// Rebuild the engine queue as `before ++ [keep] ++ after` without
    /// touching the entry that is playing: every other entry is removed, the
    /// playing one is relabelled to `keep`, then the slices go in around it.
    async fn rewrite_around_current(
        &mut self,
        keep: QueueItem,
        before: Vec<QueueItem>,
        after: Vec<QueueItem>,
    ) -> Result<(), SessionError> {
        let current =
            calculate_flat_index(self.position.locality, self.position.track, &self.localities);
        let queue = self.engine.queue().await?;
        let expected_id = self.composite_id_at(self.position);
        if queue.get(current) != expected_id.as_ref() {
            return Err(SessionError::Desync {
                expected: current,
                len: queue.len(),
            });
        }

        for index in (current + 1..queue.len()).rev() {
            self.engine.remove(index).await?;
        }
        for index in (0..current).rev() {
            self.engine.remove(index).await?;
        }
        self.engine.update_item(0, keep).await?;
        if !before.is_empty() {
            self.engine.add(before, Some(0)).await?;
        }
        if !after.is_empty() {
            self.engine.add(after, None).await?;
        }
        // ids changed under any pending jump; its event may carry either label
        self.awaiting_track = None;
        Ok(())
    }

    // ── engine events ─────────────────────────────────────────────────────────

    async fn on_track_changed(&mut self, id: Option<String>) {
        if self.status == SessionStatus::Inactive {
            return;
        }
        let Some(id) = id else {
            return;
        };
        if let Some(expected) = &self.awaiting_track {
            if *expected != id {
                debug!("SessionController: ignoring stale track change to {:?}", id);
                return;
            }
            self.awaiting_track = None;
        }
        // unknown ids (stale labels, foreign entries) must not touch the queue
        let Some(pos) = find_position(&self.localities, &id) else {
            debug!("SessionController: track change to unknown {:?}", id);
            return;
        };

        let ghost_present = self.localities.first().is_some_and(Locality::is_ghost);
        if ghost_present && pos.locality > 0 {
            debug!("SessionController: left the ghost track, dropping it");
            if let Err(e) = self.engine.remove(0).await {
                error!("SessionController: removing ghost failed: {}", e);
                self.notify(Notification::error("Playback error", e.to_string()));
                self.end_session().await;
                return;
            }
            self.localities.remove(0);
            self.position = QueuePosition::new(pos.locality - 1, pos.track);
        } else {
            self.position = pos;
        }
        self.publish();
    }

    async fn on_queue_ended(&mut self) {
        if self.status != SessionStatus::Active {
            return;
        }
        if self.is_ghost_only() {
            info!("SessionController: queue ended with only the ghost left");
            self.notify(Notification::info(
                "Session ended",
                "There are no more tracks nearby.",
            ));
            self.end_session().await;
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    fn listen_to_engine(&mut self) {
        if let Some(old) = self.engine_listener.take() {
            old.abort();
        }
        let mut events = self.engine.subscribe();
        let tx = self.event_tx.clone();
        self.engine_listener = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(evt) => {
                        if tx.send(SessionEvent::Engine(evt)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("SessionController: missed {} engine events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    fn arm_movement_check(&mut self) {
        if let Some(old) = self.movement_check.take() {
            old.abort();
        }
        let period = self.config.movement_check_interval().max(Duration::from_millis(1));
        let tx = self.event_tx.clone();
        let session_id = self.session_id;
        self.movement_check = Some(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if tx.send(SessionEvent::MovementTick { session_id }).await.is_err() {
                    break;
                }
            }
        }));
    }

    /// Stop playback and drop all session state.  Safe to call when idle.
    async fn end_session(&mut self) {
        if self.status == SessionStatus::Inactive {
            return;
        }
        info!("SessionController: ending session {}", self.session_id);
        self.status = SessionStatus::Ending;
        self.publish();

        if let Some(task) = self.engine_listener.take() {
            task.abort();
        }
        if let Some(task) = self.movement_check.take() {
            task.abort();
        }
        self.pause_timer.cancel();
        self.radius_timer.cancel();
        self.pending_load = None;
        self.awaiting_track = None;

        if let Err(e) = self.engine.reset().await {
            warn!("SessionController: engine reset on teardown failed: {}", e);
        }

        self.localities.clear();
        self.position = QueuePosition::default();
        self.paused = false;
        self.last_location = None;
        self.status = SessionStatus::Inactive;
        self.publish();
    }

    async fn save_preferences(&self) {
        let Some(store) = &self.prefs_store else {
            return;
        };
        let prefs = Preferences {
            volume: self.volume,
            radius_km: self.radius_km,
        };
        if let Err(e) = store.save(&prefs).await {
            warn!("SessionController: saving preferences to {:?} failed: {:#}", store.path(), e);
        }
    }

    fn notify(&self, notification: Notification) {
        // no subscribers is fine
        let _ = self.notify_tx.send(notification);
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(SessionSnapshot {
            status: self.status,
            session_id: self.session_id,
            localities: self.localities.clone(),
            position: self.position,
            radius_km: self.radius_km,
            volume: self.volume,
            paused: self.paused,
            refreshing: self.pending_load.is_some(),
        });
    }
}
