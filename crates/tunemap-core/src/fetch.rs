//! Viewport → grid cells → deduplicated pin fetches.
//!
//! Each visible cell is served from the [`GridCache`] when fresh, otherwise
//! fetched at most once at a time: a cell already in flight is skipped and
//! its pins show up once the running fetch lands.  Fetches run as detached
//! tasks and are never cancelled; a cell that scrolled out of view still
//! fills the cache.  Pins outside the cells of the latest pass are dropped
//! from the visible set.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use tunemap_proto::config::MapConfig;
use tunemap_proto::protocol::{PointFeature, Region};

use crate::api::LocalityApi;
use crate::grid::{cells_covering, GridCache, GridCell};

struct Inner {
    cache: GridCache,
    in_flight: HashSet<GridCell>,
    /// Cells covered by the latest pass.
    visible_cells: HashSet<GridCell>,
    visible: Vec<PointFeature>,
    visible_keys: HashSet<String>,
}

impl Inner {
    /// Add `features` not already visible.  Returns true if anything changed.
    fn merge(&mut self, features: &[PointFeature]) -> bool {
        let before = self.visible.len();
        for feature in features {
            if self.visible_keys.insert(feature.dedup_key()) {
                self.visible.push(feature.clone());
            }
        }
        self.visible.len() != before
    }

    fn clear_visible(&mut self) {
        self.visible_cells.clear();
        self.visible.clear();
        self.visible_keys.clear();
    }

    /// Make `cells` the visible area and drop pins outside it.  Returns true
    /// if any pin went away.
    fn retain_cells(&mut self, cells: &[GridCell], grid_size: f64) -> bool {
        self.visible_cells = cells.iter().copied().collect();
        let before = self.visible.len();
        let Inner {
            visible,
            visible_keys,
            visible_cells,
            ..
        } = self;
        visible.retain(|feature| {
            let keep = visible_cells.contains(&GridCell::containing(feature.coordinates(), grid_size));
            if !keep {
                visible_keys.remove(&feature.dedup_key());
            }
            keep
        });
        self.visible.len() != before
    }
}

struct Shared {
    state: Mutex<Inner>,
    in_flight_tx: watch::Sender<usize>,
    features_tx: watch::Sender<Vec<PointFeature>>,
}

impl Shared {
    fn publish_features(&self, inner: &Inner) {
        self.features_tx.send_replace(inner.visible.clone());
    }

    fn publish_in_flight(&self, inner: &Inner) {
        self.in_flight_tx.send_replace(inner.in_flight.len());
    }
}

/// The cell fetches started by one [`FetchCoordinator::fetch_visible_grids`]
/// call.  Dropping it does not cancel them.
#[must_use = "drop the pass explicitly if its fetches need not be awaited"]
pub struct FetchPass {
    handles: Vec<JoinHandle<()>>,
}

impl FetchPass {
    /// Number of network fetches this pass issued.
    pub fn issued(&self) -> usize {
        self.handles.len()
    }

    /// Wait until every fetch this pass issued has landed (or failed).
    pub async fn finished(self) {
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                warn!("fetch: cell task ended abnormally: {}", e);
            }
        }
    }
}

pub struct FetchCoordinator {
    api: Arc<dyn LocalityApi>,
    grid_size: f64,
    min_fetch_zoom: i32,
    shared: Arc<Shared>,
}

impl FetchCoordinator {
    pub fn new(api: Arc<dyn LocalityApi>, config: &MapConfig) -> Self {
        let (in_flight_tx, _) = watch::channel(0);
        let (features_tx, _) = watch::channel(Vec::new());
        Self {
            api,
            grid_size: config.grid_size_deg,
            min_fetch_zoom: config.min_fetch_zoom,
            shared: Arc::new(Shared {
                state: Mutex::new(Inner {
                    cache: GridCache::new(config.cache_ttl()),
                    in_flight: HashSet::new(),
                    visible_cells: HashSet::new(),
                    visible: Vec::new(),
                    visible_keys: HashSet::new(),
                }),
                in_flight_tx,
                features_tx,
            }),
        }
    }

    /// Number of cell fetches currently outstanding.
    pub fn subscribe_in_flight(&self) -> watch::Receiver<usize> {
        self.shared.in_flight_tx.subscribe()
    }

    /// The merged, deduplicated pin set.
    pub fn subscribe_features(&self) -> watch::Receiver<Vec<PointFeature>> {
        self.shared.features_tx.subscribe()
    }

    pub fn visible_features(&self) -> Vec<PointFeature> {
        self.shared.features_tx.borrow().clone()
    }

    pub fn in_flight(&self) -> usize {
        *self.shared.in_flight_tx.borrow()
    }

    /// Drop cached cells and visible pins.  Fetches already running still
    /// complete and repopulate their cells.
    pub async fn reset(&self) {
        let mut inner = self.shared.state.lock().await;
        inner.cache.clear();
        inner.clear_visible();
        self.shared.publish_features(&inner);
    }

    pub async fn fetch_visible_grids(&self, region: &Region) -> FetchPass {
        let zoom = region.zoom_level();
        if zoom < self.min_fetch_zoom {
            debug!("fetch: zoom {} below {}, clearing pins", zoom, self.min_fetch_zoom);
            let mut inner = self.shared.state.lock().await;
            inner.clear_visible();
            self.shared.publish_features(&inner);
            return FetchPass { handles: Vec::new() };
        }

        let cells = cells_covering(&region.bounds(), self.grid_size);
        let mut to_fetch = Vec::new();
        {
            let mut inner = self.shared.state.lock().await;
            let mut changed = inner.retain_cells(&cells, self.grid_size);
            for cell in &cells {
                let cached = inner.cache.get(cell).map(<[PointFeature]>::to_vec);
                if let Some(cached) = cached {
                    changed |= inner.merge(&cached);
                } else if inner.in_flight.insert(*cell) {
                    to_fetch.push(*cell);
                }
            }
            if changed {
                self.shared.publish_features(&inner);
            }
            if !to_fetch.is_empty() {
                self.shared.publish_in_flight(&inner);
            }
        }
        debug!(
            "fetch: {} cells visible, {} to fetch",
            cells.len(),
            to_fetch.len()
        );

        let handles = to_fetch
            .into_iter()
            .map(|cell| {
                let api = Arc::clone(&self.api);
                let shared = Arc::clone(&self.shared);
                let bounds = cell.bounds(self.grid_size);
                tokio::spawn(async move {
                    let result = api.localities_in_bounds(bounds).await;
                    let mut inner = shared.state.lock().await;
                    match result {
                        Ok(features) => {
                            debug!("fetch: cell {} -> {} pins", cell, features.len());
                            // a cell that left the view only fills the cache
                            if inner.visible_cells.contains(&cell) && inner.merge(&features) {
                                shared.publish_features(&inner);
                            }
                            inner.cache.set(cell, features);
                        }
                        Err(e) => warn!("fetch: cell {} failed: {}", cell, e),
                    }
                    inner.in_flight.remove(&cell);
                    shared.publish_in_flight(&inner);
                })
            })
            .collect();

        FetchPass { handles }
    }
}
