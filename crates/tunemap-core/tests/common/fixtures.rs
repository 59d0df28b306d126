//! Builders and a running-controller harness shared by the integration suites.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tunemap_core::location::SharedLocation;
use tunemap_core::session::{SessionController, SessionHandle, SessionSnapshot};
use tunemap_proto::config::SessionConfig;
use tunemap_proto::notification::Notification;
use tunemap_proto::protocol::{Coordinates, Locality, Track};
use tunemap_proto::state::Preferences;

use super::fakes::{MemoryEngine, ScriptedApi};

pub const HOME: Coordinates = Coordinates {
    latitude: 52.52,
    longitude: 13.405,
};

pub fn track(id: &str) -> Track {
    Track {
        track_id: id.to_string(),
        name: format!("Track {id}"),
        artists: vec!["Artist".into()],
        preview_url: format!("https://previews.example/{id}.mp3"),
        ..Default::default()
    }
}

pub fn locality(id: &str, tracks: &[&str]) -> Locality {
    Locality {
        locality_id: id.to_string(),
        name: format!("Locality {id}"),
        tracks: tracks.iter().map(|t| track(t)).collect(),
    }
}

/// Wait (in paused time, at most a few virtual seconds) until `pred` holds.
pub async fn wait_for<T: Clone>(rx: &mut watch::Receiver<T>, pred: impl Fn(&T) -> bool) -> T {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let current = rx.borrow_and_update();
                if pred(&current) {
                    return current.clone();
                }
            }
            if rx.changed().await.is_err() {
                panic!("publisher dropped before the condition held");
            }
        }
    })
    .await;
    waited.expect("condition not reached in time")
}

pub struct SessionHarness {
    pub engine: Arc<MemoryEngine>,
    pub api: Arc<ScriptedApi>,
    pub location: Arc<SharedLocation>,
    pub handle: SessionHandle,
    pub snapshots: watch::Receiver<SessionSnapshot>,
    pub notifications: broadcast::Receiver<Notification>,
    pub task: JoinHandle<()>,
}

impl SessionHarness {
    pub fn start(api: ScriptedApi) -> Self {
        Self::start_with(api, SessionConfig::default())
    }

    pub fn start_with(api: ScriptedApi, config: SessionConfig) -> Self {
        let engine = Arc::new(MemoryEngine::new());
        let api = Arc::new(api);
        let location = Arc::new(SharedLocation::new(Some(HOME)));
        let (event_tx, event_rx) = mpsc::channel(64);
        let (notify_tx, notifications) = broadcast::channel(16);

        let controller = SessionController::new(
            config,
            engine.clone(),
            api.clone(),
            location.clone(),
            Preferences {
                volume: 0.7,
                radius_km: 2.0,
            },
            None,
            event_tx,
            notify_tx,
        );
        let handle = controller.handle();
        let snapshots = handle.subscribe();
        let task = tokio::spawn(controller.run(event_rx));

        Self {
            engine,
            api,
            location,
            handle,
            snapshots,
            notifications,
            task,
        }
    }

    pub async fn until(&mut self, pred: impl Fn(&SessionSnapshot) -> bool) -> SessionSnapshot {
        wait_for(&mut self.snapshots, pred).await
    }

    /// Drain notices published so far.
    pub fn notices(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            out.push(n);
        }
        out
    }
}

/// Let spawned tasks and forwarded events run to quiescence.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
