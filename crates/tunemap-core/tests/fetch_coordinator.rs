mod common;

use std::sync::Arc;
use std::time::Duration;

use common::fakes::ScriptedApi;
use common::fixtures::{settle, HOME};
use tunemap_core::fetch::FetchCoordinator;
use tunemap_proto::config::MapConfig;
use tunemap_proto::protocol::{Coordinates, PointFeature, Region};

fn pins() -> Vec<PointFeature> {
    vec![
        PointFeature::new("1", "Tor", Coordinates::new(52.52, 13.41)),
        PointFeature::new("2", "Ufer", Coordinates::new(52.498, 13.38)),
    ]
}

/// Spans four 0.1° cells around HOME at zoom 13.
fn city_region() -> Region {
    Region::centered(HOME, 0.05, 0.05)
}

fn coordinator(api: &Arc<ScriptedApi>) -> FetchCoordinator {
    FetchCoordinator::new(api.clone(), &MapConfig::default())
}

#[tokio::test(start_paused = true)]
async fn overlapping_passes_fetch_each_cell_once() {
    let api = Arc::new(ScriptedApi::gated());
    api.set_pins(pins());
    let coordinator = coordinator(&api);

    let first = coordinator.fetch_visible_grids(&city_region()).await;
    assert_eq!(first.issued(), 4);
    assert_eq!(coordinator.in_flight(), 4);

    let nudged = Region::centered(Coordinates::new(HOME.latitude + 0.001, HOME.longitude), 0.05, 0.05);
    let second = coordinator.fetch_visible_grids(&nudged).await;
    assert_eq!(second.issued(), 0);
    settle().await;
    assert_eq!(api.bounds_calls(), 4);

    api.pins_gate.release();
    first.finished().await;
    second.finished().await;
    assert_eq!(coordinator.in_flight(), 0);
    assert_eq!(coordinator.visible_features().len(), 2);

    // everything cached now
    let third = coordinator.fetch_visible_grids(&city_region()).await;
    assert_eq!(third.issued(), 0);
    assert_eq!(api.bounds_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn refetch_after_ttl_does_not_duplicate_pins() {
    let api = Arc::new(ScriptedApi::new());
    api.set_pins(pins());
    let coordinator = coordinator(&api);
    let mut features = coordinator.subscribe_features();

    coordinator.fetch_visible_grids(&city_region()).await.finished().await;
    assert!(features.has_changed().unwrap());
    assert_eq!(features.borrow_and_update().len(), 2);

    tokio::time::advance(Duration::from_secs(301)).await;
    let pass = coordinator.fetch_visible_grids(&city_region()).await;
    assert_eq!(pass.issued(), 4);
    pass.finished().await;

    assert_eq!(api.bounds_calls(), 8);
    let mut ids: Vec<String> = coordinator.visible_features().into_iter().map(|f| f.id).collect();
    ids.sort();
    assert_eq!(ids, ["1", "2"]);
}

#[tokio::test(start_paused = true)]
async fn zoomed_out_view_clears_pins_and_fetches_nothing() {
    let api = Arc::new(ScriptedApi::new());
    api.set_pins(pins());
    let coordinator = coordinator(&api);
    coordinator.fetch_visible_grids(&city_region()).await.finished().await;
    assert_eq!(coordinator.visible_features().len(), 2);

    let world = Region::centered(HOME, 90.0, 180.0);
    assert!(world.zoom_level() < MapConfig::default().min_fetch_zoom);
    let pass = coordinator.fetch_visible_grids(&world).await;

    assert_eq!(pass.issued(), 0);
    assert!(coordinator.visible_features().is_empty());
    assert_eq!(api.bounds_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn failed_cells_are_not_cached() {
    let api = Arc::new(ScriptedApi::new());
    api.set_pins(pins());
    api.fail_pins();
    let coordinator = coordinator(&api);
    let mut in_flight = coordinator.subscribe_in_flight();

    coordinator.fetch_visible_grids(&city_region()).await.finished().await;
    assert!(coordinator.visible_features().is_empty());
    assert_eq!(*in_flight.borrow_and_update(), 0);

    let retry = coordinator.fetch_visible_grids(&city_region()).await;
    assert_eq!(retry.issued(), 4);
    retry.finished().await;
    assert_eq!(api.bounds_calls(), 8);
}

#[tokio::test(start_paused = true)]
async fn reset_gives_an_isolated_start() {
    let api = Arc::new(ScriptedApi::new());
    api.set_pins(pins());
    let coordinator = coordinator(&api);
    coordinator.fetch_visible_grids(&city_region()).await.finished().await;

    coordinator.reset().await;
    assert!(coordinator.visible_features().is_empty());
    let pass = coordinator.fetch_visible_grids(&city_region()).await;
    assert_eq!(pass.issued(), 4);
    pass.finished().await;
    assert_eq!(coordinator.visible_features().len(), 2);
}

/// One cell, north-east of HOME, holding only pin "1".
fn east_region() -> Region {
    Region::centered(Coordinates::new(52.55, 13.45), 0.04, 0.04)
}

fn visible_ids(coordinator: &FetchCoordinator) -> Vec<String> {
    let mut ids: Vec<String> = coordinator.visible_features().into_iter().map(|f| f.id).collect();
    ids.sort();
    ids
}

#[tokio::test(start_paused = true)]
async fn panning_away_drops_pins_outside_the_view() {
    let api = Arc::new(ScriptedApi::new());
    api.set_pins(pins());
    let coordinator = coordinator(&api);
    coordinator.fetch_visible_grids(&city_region()).await.finished().await;
    assert_eq!(visible_ids(&coordinator), ["1", "2"]);

    let pass = coordinator.fetch_visible_grids(&east_region()).await;
    assert_eq!(pass.issued(), 0);
    assert_eq!(visible_ids(&coordinator), ["1"]);

    // back again: served from the cache
    let pass = coordinator.fetch_visible_grids(&city_region()).await;
    assert_eq!(pass.issued(), 0);
    assert_eq!(visible_ids(&coordinator), ["1", "2"]);
    assert_eq!(api.bounds_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn late_fetch_for_cell_out_of_view_only_fills_cache() {
    let api = Arc::new(ScriptedApi::gated());
    api.set_pins(pins());
    let coordinator = coordinator(&api);

    let first = coordinator.fetch_visible_grids(&city_region()).await;
    assert_eq!(first.issued(), 4);
    let second = coordinator.fetch_visible_grids(&east_region()).await;
    assert_eq!(second.issued(), 0);

    api.pins_gate.release();
    first.finished().await;
    assert_eq!(visible_ids(&coordinator), ["1"]);

    let back = coordinator.fetch_visible_grids(&city_region()).await;
    assert_eq!(back.issued(), 0);
    assert_eq!(visible_ids(&coordinator), ["1", "2"]);
}
