mod http;
mod notices;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tunemap_core::api::HttpLocalityApi;
use tunemap_core::engine::mpv::MpvEngine;
use tunemap_core::fetch::FetchCoordinator;
use tunemap_core::geocode::NominatimGeocoder;
use tunemap_core::location::SharedLocation;
use tunemap_core::session::{SessionController, SessionEvent};
use tunemap_core::viewport::{MapViewportController, ViewportEvent};
use tunemap_proto::config::Config;
use tunemap_proto::state::{Preferences, PreferencesStore};

use crate::notices::NoticeLog;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = tunemap_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tunemap_core=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let store = PreferencesStore::new(config.daemon.state_file.clone());
    let prefs = store.load_or(Preferences {
        volume: config.mpv.default_volume,
        radius_km: config.session.default_radius_km,
    });
    info!("Preferences from {:?}: {:?}", store.path(), prefs);

    let engine = Arc::new(MpvEngine::spawn(prefs.volume).await?);
    let api = Arc::new(HttpLocalityApi::new(&config.api)?);
    let geocoder = Arc::new(NominatimGeocoder::new(&config.geocoder)?);
    let location = Arc::new(SharedLocation::default());
    let fetcher = Arc::new(FetchCoordinator::new(api.clone(), &config.map));

    // All session inputs funnel into one controller loop
    let (session_tx, session_rx) = mpsc::channel::<SessionEvent>(256);
    let (notify_tx, notify_rx) = broadcast::channel(100);
    let session = SessionController::new(
        config.session.clone(),
        engine.clone(),
        api,
        location.clone(),
        prefs,
        Some(store),
        session_tx,
        notify_tx,
    );
    let session_handle = session.handle();

    let (viewport_tx, viewport_rx) = mpsc::channel::<ViewportEvent>(256);
    let viewport = MapViewportController::new(
        config.map.clone(),
        fetcher.clone(),
        geocoder,
        location.clone(),
        viewport_tx,
    );
    let viewport_handle = viewport.handle();

    let notices = NoticeLog::default();
    let collector = notices.spawn_collector(notify_rx);

    let session_task = tokio::spawn(session.run(session_rx));
    let viewport_task = tokio::spawn(viewport.run(viewport_rx));

    let cancel = CancellationToken::new();
    let server = if config.http.enabled {
        let state = http::HttpState {
            session: session_handle.clone(),
            viewport: viewport_handle.clone(),
            fetcher,
            location,
            notices,
        };
        Some(http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            state,
            cancel.clone(),
        ))
    } else {
        info!("HTTP API disabled");
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    cancel.cancel();

    session_handle.shutdown().await;
    viewport_handle.shutdown().await;
    if let Err(e) = session_task.await {
        warn!("session controller ended abnormally: {}", e);
    }
    if let Err(e) = viewport_task.await {
        warn!("viewport controller ended abnormally: {}", e);
    }
    if let Some(server) = server {
        let _ = server.await;
    }
    collector.abort();
    engine.shutdown().await;

    Ok(())
}
