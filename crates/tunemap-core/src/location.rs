//! Device location: a one-shot fix plus a live feed.

use async_trait::async_trait;
use tokio::sync::watch;
use tunemap_proto::protocol::Coordinates;

use crate::error::LocationError;

#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_position(&self) -> Result<Coordinates, LocationError>;

    /// Live updates.  `None` until the first fix arrives.
    fn subscribe(&self) -> watch::Receiver<Option<Coordinates>>;
}

/// Location fed from outside the process (the host app pushes fixes in).
pub struct SharedLocation {
    tx: watch::Sender<Option<Coordinates>>,
}

impl SharedLocation {
    pub fn new(initial: Option<Coordinates>) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn update(&self, at: Coordinates) {
        self.tx.send_replace(Some(at));
    }
}

impl Default for SharedLocation {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl LocationProvider for SharedLocation {
    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        (*self.tx.borrow()).ok_or(LocationError::NoFix)
    }

    fn subscribe(&self) -> watch::Receiver<Option<Coordinates>> {
        self.tx.subscribe()
    }
}
