//! MapViewportController: single-owner event loop for the map camera.
//!
//! While locked to the user the camera follows live location fixes.  The
//! host reports every settled camera region back; a region that drifts from
//! the camera we asked for means the user panned or zoomed, which releases
//! the lock.  Settled regions are debounced into one grid fetch plus one
//! reverse geocode of the centre.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use tunemap_proto::config::MapConfig;
use tunemap_proto::protocol::{Coordinates, Region};

use crate::fetch::FetchCoordinator;
use crate::geocode::{area_name, Geocoder, FALLBACK_AREA_NAME};
use crate::location::LocationProvider;
use crate::timer::DelayedTask;

// ── ViewportEvent ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum ViewportCommand {
    /// The rendered camera settled on `Region`.
    RegionChanged(Region),
    /// Snap back to the user and re-engage the lock.
    Recenter,
}

/// All inputs into the viewport loop.
#[derive(Debug)]
pub enum ViewportEvent {
    Command(ViewportCommand),
    /// Live location fix (forwarded from the location provider).
    UserLocation(Coordinates),
    /// Debounce window for `region` elapsed.
    Settled(Region),
    /// Reverse geocode for settle number `seq` finished.
    AreaName { seq: u64, name: String },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewportSnapshot {
    /// Where the controller wants the camera.
    pub camera: Region,
    /// Last region the host reported as rendered.
    pub region: Option<Region>,
    pub locked_to_user: bool,
    pub area_name: String,
    pub zoom: i32,
}

// ── ViewportHandle ────────────────────────────────────────────────────────────

/// Cheap clonable front-end used by the host.
#[derive(Clone)]
pub struct ViewportHandle {
    tx: mpsc::Sender<ViewportEvent>,
    snapshot: watch::Receiver<ViewportSnapshot>,
}

impl ViewportHandle {
    pub async fn send(&self, cmd: ViewportCommand) -> bool {
        self.tx.send(ViewportEvent::Command(cmd)).await.is_ok()
    }

    pub async fn region_changed(&self, region: Region) -> bool {
        self.send(ViewportCommand::RegionChanged(region)).await
    }

    pub async fn recenter(&self) -> bool {
        self.send(ViewportCommand::Recenter).await
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(ViewportEvent::Shutdown).await;
    }

    pub fn snapshot(&self) -> ViewportSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewportSnapshot> {
        self.snapshot.clone()
    }
}

// ── MapViewportController ─────────────────────────────────────────────────────

pub struct MapViewportController {
    config: MapConfig,
    fetcher: Arc<FetchCoordinator>,
    geocoder: Arc<dyn Geocoder>,
    location: Arc<dyn LocationProvider>,
    event_tx: mpsc::Sender<ViewportEvent>,
    snapshot_tx: watch::Sender<ViewportSnapshot>,
    settle: DelayedTask,
    settle_seq: u64,
    last_fix: Option<Coordinates>,
    camera: Region,
    region: Option<Region>,
    locked_to_user: bool,
    area_name: String,
}

impl MapViewportController {
    pub fn new(
        config: MapConfig,
        fetcher: Arc<FetchCoordinator>,
        geocoder: Arc<dyn Geocoder>,
        location: Arc<dyn LocationProvider>,
        event_tx: mpsc::Sender<ViewportEvent>,
    ) -> Self {
        // whole-world view until the first fix arrives
        let camera = Region::centered(Coordinates::default(), 180.0, 360.0);
        let initial = ViewportSnapshot {
            camera,
            region: None,
            locked_to_user: true,
            area_name: FALLBACK_AREA_NAME.to_string(),
            zoom: camera.zoom_level(),
        };
        let (snapshot_tx, _) = watch::channel(initial);
        Self {
            settle: DelayedTask::new(config.region_debounce()),
            config,
            fetcher,
            geocoder,
            location,
            event_tx,
            snapshot_tx,
            settle_seq: 0,
            last_fix: None,
            camera,
            region: None,
            locked_to_user: true,
            area_name: FALLBACK_AREA_NAME.to_string(),
        }
    }

    pub fn handle(&self) -> ViewportHandle {
        ViewportHandle {
            tx: self.event_tx.clone(),
            snapshot: self.snapshot_tx.subscribe(),
        }
    }

    /// Run the viewport loop until `Shutdown` or until every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<ViewportEvent>) {
        info!("MapViewportController: starting event loop");

        let mut fixes = self.location.subscribe();
        let follow_tx = self.event_tx.clone();
        let follower = tokio::spawn(async move {
            loop {
                let fix = *fixes.borrow_and_update();
                if let Some(at) = fix {
                    if follow_tx.send(ViewportEvent::UserLocation(at)).await.is_err() {
                        break;
                    }
                }
                if fixes.changed().await.is_err() {
                    break;
                }
            }
        });

        while let Some(evt) = event_rx.recv().await {
            match evt {
                ViewportEvent::Shutdown => {
                    info!("MapViewportController: shutdown requested");
                    break;
                }
                ViewportEvent::Command(cmd) => {
                    debug!("MapViewportController: command {:?}", cmd);
                    match cmd {
                        ViewportCommand::RegionChanged(region) => self.on_region_changed(region),
                        ViewportCommand::Recenter => self.recenter().await,
                    }
                }
                ViewportEvent::UserLocation(at) => self.on_user_location(at),
                ViewportEvent::Settled(region) => self.on_settled(region).await,
                ViewportEvent::AreaName { seq, name } => {
                    if seq == self.settle_seq {
                        self.area_name = name;
                        self.publish();
                    } else {
                        debug!("MapViewportController: dropping stale area name {:?}", name);
                    }
                }
            }
        }

        follower.abort();
        self.settle.cancel();
        info!("MapViewportController: stopped");
    }

    fn user_region(&self, at: Coordinates) -> Region {
        Region::centered(at, self.config.user_zoom_delta, self.config.user_zoom_delta)
    }

    fn on_user_location(&mut self, at: Coordinates) {
        self.last_fix = Some(at);
        if self.locked_to_user {
            self.camera = self.user_region(at);
            self.publish();
        }
    }

    fn on_region_changed(&mut self, region: Region) {
        self.region = Some(region);
        if self.locked_to_user && !region.approx_eq(&self.camera, self.config.lock_tolerance_deg) {
            info!("MapViewportController: camera moved away from user, releasing lock");
            self.locked_to_user = false;
        }
        if !self.locked_to_user {
            self.camera = region;
        }
        self.publish();

        let tx = self.event_tx.clone();
        self.settle.arm(async move {
            let _ = tx.send(ViewportEvent::Settled(region)).await;
        });
    }

    async fn on_settled(&mut self, region: Region) {
        self.settle_seq += 1;
        let seq = self.settle_seq;

        // fetches outlive this pass; pins arrive through the coordinator's watch
        drop(self.fetcher.fetch_visible_grids(&region).await);

        let geocoder = Arc::clone(&self.geocoder);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let name = area_name(geocoder.as_ref(), region.center()).await;
            let _ = tx.send(ViewportEvent::AreaName { seq, name }).await;
        });
    }

    async fn recenter(&mut self) {
        self.locked_to_user = true;
        let at = match self.last_fix {
            Some(at) => Some(at),
            None => match self.location.current_position().await {
                Ok(at) => Some(at),
                Err(e) => {
                    warn!("MapViewportController: recenter without a fix: {}", e);
                    None
                }
            },
        };
        if let Some(at) = at {
            self.last_fix = Some(at);
            self.camera = self.user_region(at);
        }
        self.publish();
    }

    fn publish(&self) {
        let zoom = self.region.unwrap_or(self.camera).zoom_level();
        self.snapshot_tx.send_replace(ViewportSnapshot {
            camera: self.camera,
            region: self.region,
            locked_to_user: self.locked_to_user,
            area_name: self.area_name.clone(),
            zoom,
        });
    }
}
