//! The external audio engine: a linear queue the player session mirrors.
//!
//! The session controller is the only writer.  It assumes the engine queue
//! equals the flattened locality list after every synchronization point and
//! addresses items by flat index.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::EngineError;
use crate::queue::QueueItem;

pub mod mpv;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepeatMode {
    Off,
    Track,
    Queue,
}

/// Unsolicited notifications from the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The active queue entry changed.  `None` when nothing is active.
    TrackChanged { id: Option<String> },
    /// Playback ran off the end of the queue.
    QueueEnded,
}

#[async_trait]
pub trait AudioEngine: Send + Sync {
    /// Stop playback and empty the queue.
    async fn reset(&self) -> Result<(), EngineError>;

    /// Insert `items` before `insert_before`, or append when `None`.
    async fn add(
        &self,
        items: Vec<QueueItem>,
        insert_before: Option<usize>,
    ) -> Result<(), EngineError>;

    async fn remove(&self, index: usize) -> Result<(), EngineError>;

    /// Replace the metadata (including the id) of the entry at `index`
    /// without touching playback of that entry.
    async fn update_item(&self, index: usize, item: QueueItem) -> Result<(), EngineError>;

    /// Ids of the queued entries, in order.
    async fn queue(&self) -> Result<Vec<String>, EngineError>;

    /// Jump to the entry at `index`.
    async fn skip(&self, index: usize) -> Result<(), EngineError>;

    async fn play(&self) -> Result<(), EngineError>;

    async fn pause(&self) -> Result<(), EngineError>;

    async fn seek_to(&self, seconds: f64) -> Result<(), EngineError>;

    /// `volume` in `0.0..=1.0`.
    async fn set_volume(&self, volume: f32) -> Result<(), EngineError>;

    async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<(), EngineError>;

    /// Register for engine events.  Dropping the receiver deregisters.
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}
