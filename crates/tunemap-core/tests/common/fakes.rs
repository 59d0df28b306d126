//! In-memory stand-ins for the audio engine, the REST API and the geocoder.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{broadcast, Semaphore};
use tunemap_core::api::LocalityApi;
use tunemap_core::engine::{AudioEngine, EngineEvent, RepeatMode};
use tunemap_core::error::{ApiError, EngineError, GeocodeError};
use tunemap_core::geocode::Geocoder;
use tunemap_core::queue::QueueItem;
use tunemap_proto::protocol::{Coordinates, Locality, PointFeature, ViewportBounds};

// ── Gate ──────────────────────────────────────────────────────────────────────

/// Holds calls until released.  Permits are returned on drop, so one
/// release lets every later caller through too.
pub struct Gate(Semaphore);

impl Gate {
    pub fn open() -> Self {
        Self(Semaphore::new(1))
    }

    pub fn closed() -> Self {
        Self(Semaphore::new(0))
    }

    pub fn release(&self) {
        self.0.add_permits(1);
    }

    async fn pass(&self) {
        let _permit = self.0.acquire().await;
    }
}

// ── MemoryEngine ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct EngineState {
    pub queue: Vec<QueueItem>,
    pub current: Option<usize>,
    pub playing: bool,
    pub volume: Option<f32>,
    pub repeat: Option<RepeatMode>,
    pub resets: usize,
    pub skips: Vec<usize>,
    /// The playing entry was removed while it was playing.
    pub interrupted: bool,
    pub fail_skip: bool,
}

pub struct MemoryEngine {
    state: Mutex<EngineState>,
    events: broadcast::Sender<EngineEvent>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(EngineState::default()),
            events,
        }
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&mut EngineState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn ids(&self) -> Vec<String> {
        self.with_state(|s| s.queue.iter().map(|i| i.id.clone()).collect())
    }

    pub fn current_id(&self) -> Option<String> {
        self.with_state(|s| s.current.and_then(|c| s.queue.get(c)).map(|i| i.id.clone()))
    }

    pub fn fail_skips(&self) {
        self.with_state(|s| s.fail_skip = true);
    }

    pub fn emit(&self, evt: EngineEvent) {
        let _ = self.events.send(evt);
    }

    /// The playing track ran out: move on (looping the queue) and report it.
    pub fn finish_current(&self) {
        let id = self.with_state(|s| {
            let next = match s.current {
                Some(c) if !s.queue.is_empty() => (c + 1) % s.queue.len(),
                _ => 0,
            };
            s.current = s.queue.get(next).map(|_| next);
            s.current.map(|c| s.queue[c].id.clone())
        });
        self.emit(EngineEvent::TrackChanged { id });
    }
}

#[async_trait]
impl AudioEngine for MemoryEngine {
    async fn reset(&self) -> Result<(), EngineError> {
        self.with_state(|s| {
            s.queue.clear();
            s.current = None;
            s.playing = false;
            s.resets += 1;
        });
        Ok(())
    }

    async fn add(&self, items: Vec<QueueItem>, insert_before: Option<usize>) -> Result<(), EngineError> {
        self.with_state(|s| {
            let len = s.queue.len();
            let at = insert_before.unwrap_or(len);
            if at > len {
                return Err(EngineError::IndexOutOfRange { index: at, len });
            }
            let n = items.len();
            s.queue.splice(at..at, items);
            if let Some(c) = s.current.as_mut() {
                if at <= *c {
                    *c += n;
                }
            }
            Ok(())
        })
    }

    async fn remove(&self, index: usize) -> Result<(), EngineError> {
        self.with_state(|s| {
            let len = s.queue.len();
            if index >= len {
                return Err(EngineError::IndexOutOfRange { index, len });
            }
            s.queue.remove(index);
            match s.current {
                Some(c) if c == index => {
                    s.interrupted = true;
                    s.current = None;
                }
                Some(c) if c > index => s.current = Some(c - 1),
                _ => {}
            }
            Ok(())
        })
    }

    async fn update_item(&self, index: usize, item: QueueItem) -> Result<(), EngineError> {
        self.with_state(|s| {
            let len = s.queue.len();
            let slot = s
                .queue
                .get_mut(index)
                .ok_or(EngineError::IndexOutOfRange { index, len })?;
            *slot = item;
            Ok(())
        })
    }

    async fn queue(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.ids())
    }

    async fn skip(&self, index: usize) -> Result<(), EngineError> {
        let id = self.with_state(|s| {
            if s.fail_skip {
                return Err(EngineError::Rejected {
                    command: "skip".into(),
                    reason: "scripted failure".into(),
                });
            }
            let len = s.queue.len();
            let item = s
                .queue
                .get(index)
                .ok_or(EngineError::IndexOutOfRange { index, len })?;
            let id = item.id.clone();
            s.current = Some(index);
            s.skips.push(index);
            Ok(id)
        })?;
        self.emit(EngineEvent::TrackChanged { id: Some(id) });
        Ok(())
    }

    async fn play(&self) -> Result<(), EngineError> {
        self.with_state(|s| s.playing = true);
        Ok(())
    }

    async fn pause(&self) -> Result<(), EngineError> {
        self.with_state(|s| s.playing = false);
        Ok(())
    }

    async fn seek_to(&self, _seconds: f64) -> Result<(), EngineError> {
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> Result<(), EngineError> {
        self.with_state(|s| s.volume = Some(volume));
        Ok(())
    }

    async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<(), EngineError> {
        self.with_state(|s| s.repeat = Some(mode));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

// ── ScriptedApi ───────────────────────────────────────────────────────────────

/// `Err(status)` scripts an HTTP error.
pub type Scripted = Result<Vec<Locality>, u16>;

pub struct ScriptedApi {
    track_responses: Mutex<VecDeque<Scripted>>,
    last_tracks: Mutex<Scripted>,
    pub track_calls: AtomicUsize,
    pub tracks_gate: Gate,

    pins: Mutex<Vec<PointFeature>>,
    failing_pins: Mutex<bool>,
    pub bounds_calls: Mutex<Vec<ViewportBounds>>,
    pub pins_gate: Gate,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self {
            track_responses: Mutex::new(VecDeque::new()),
            last_tracks: Mutex::new(Ok(Vec::new())),
            track_calls: AtomicUsize::new(0),
            tracks_gate: Gate::open(),
            pins: Mutex::new(Vec::new()),
            failing_pins: Mutex::new(false),
            bounds_calls: Mutex::new(Vec::new()),
            pins_gate: Gate::open(),
        }
    }

    pub fn gated() -> Self {
        Self {
            tracks_gate: Gate::closed(),
            pins_gate: Gate::closed(),
            ..Self::new()
        }
    }

    /// Queue the response for the next track fetch.  Once the queue runs
    /// dry the last response repeats.
    pub fn push_tracks(&self, response: Scripted) {
        self.track_responses.lock().unwrap().push_back(response);
    }

    pub fn set_pins(&self, pins: Vec<PointFeature>) {
        *self.pins.lock().unwrap() = pins;
    }

    pub fn fail_pins(&self) {
        *self.failing_pins.lock().unwrap() = true;
    }

    pub fn track_calls(&self) -> usize {
        self.track_calls.load(Ordering::SeqCst)
    }

    pub fn bounds_calls(&self) -> usize {
        self.bounds_calls.lock().unwrap().len()
    }
}

fn scripted_error(status: u16) -> ApiError {
    ApiError::Status {
        status,
        url: "scripted".into(),
    }
}

fn contains(bounds: &ViewportBounds, at: Coordinates) -> bool {
    at.latitude >= bounds.south
        && at.latitude < bounds.north
        && at.longitude >= bounds.west
        && at.longitude < bounds.east
}

#[async_trait]
impl LocalityApi for ScriptedApi {
    async fn localities_in_bounds(&self, bounds: ViewportBounds) -> Result<Vec<PointFeature>, ApiError> {
        self.bounds_calls.lock().unwrap().push(bounds);
        self.pins_gate.pass().await;
        if *self.failing_pins.lock().unwrap() {
            return Err(scripted_error(502));
        }
        Ok(self
            .pins
            .lock()
            .unwrap()
            .iter()
            .filter(|p| contains(&bounds, p.coordinates()))
            .cloned()
            .collect())
    }

    async fn localities_with_tracks(
        &self,
        _at: Coordinates,
        _radius_km: f64,
    ) -> Result<Vec<Locality>, ApiError> {
        self.track_calls.fetch_add(1, Ordering::SeqCst);
        // pick the response before waiting so call order decides what each call gets
        let response = {
            let mut queue = self.track_responses.lock().unwrap();
            let mut last = self.last_tracks.lock().unwrap();
            if let Some(next) = queue.pop_front() {
                *last = next.clone();
            }
            last.clone()
        };
        self.tracks_gate.pass().await;
        response.map_err(scripted_error)
    }
}

// ── CannedGeocoder ────────────────────────────────────────────────────────────

pub struct CannedGeocoder {
    names: Mutex<Result<Vec<String>, u16>>,
    pub calls: AtomicUsize,
}

impl CannedGeocoder {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: Mutex::new(Ok(names.iter().map(|n| n.to_string()).collect())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            names: Mutex::new(Err(503)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Geocoder for CannedGeocoder {
    async fn reverse(&self, _at: Coordinates) -> Result<Vec<String>, GeocodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.names.lock().unwrap().clone().map_err(GeocodeError::Status)
    }
}
