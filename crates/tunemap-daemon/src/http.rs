use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tunemap_core::fetch::FetchCoordinator;
use tunemap_core::location::SharedLocation;
use tunemap_core::session::{SessionCommand, SessionHandle, SessionSnapshot};
use tunemap_core::viewport::{ViewportHandle, ViewportSnapshot};
use tunemap_proto::notification::Notification;
use tunemap_proto::protocol::{Coordinates, PointFeature, Region};

use crate::notices::NoticeLog;

#[derive(Clone)]
pub struct HttpState {
    pub session: SessionHandle,
    pub viewport: ViewportHandle,
    pub fetcher: Arc<FetchCoordinator>,
    pub location: Arc<SharedLocation>,
    pub notices: NoticeLog,
}

#[derive(Serialize)]
struct ViewportStatus {
    #[serde(flatten)]
    snapshot: ViewportSnapshot,
    in_flight: usize,
}

#[derive(Deserialize)]
struct RouteBody {
    path: String,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/session", get(get_session))
        .route("/api/session/toggle", post(toggle_session))
        .route("/api/skip/:target", post(skip))
        .route("/api/pause", post(pause))
        .route("/api/resume", post(resume))
        .route("/api/radius/:km", post(set_radius))
        .route("/api/volume/:percent", post(set_volume))
        .route("/api/route", post(route_changed))
        .route("/api/location", post(update_location))
        .route("/api/viewport", get(get_viewport))
        .route("/api/viewport/region", post(region_changed))
        .route("/api/viewport/recenter", post(recenter))
        .route("/api/features", get(get_features))
        .route("/api/notifications", get(get_notifications))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state: HttpState,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn send(state: &HttpState, cmd: SessionCommand) -> StatusCode {
    if !state.session.send(cmd).await {
        error!("HTTP API: session controller is gone");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::ACCEPTED
}

async fn get_session(State(state): State<HttpState>) -> Json<SessionSnapshot> {
    Json(state.session.snapshot())
}

async fn toggle_session(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: toggle session");
    send(&state, SessionCommand::ToggleSession).await
}

async fn skip(State(state): State<HttpState>, Path(target): Path<String>) -> StatusCode {
    let cmd = match target.as_str() {
        "next-track" => SessionCommand::SkipToNextTrack,
        "previous-track" => SessionCommand::SkipToPreviousTrack,
        "next-locality" => SessionCommand::SkipToNextLocality,
        "previous-locality" => SessionCommand::SkipToPreviousLocality,
        _ => return StatusCode::NOT_FOUND,
    };
    info!("HTTP API: skip {}", target);
    send(&state, cmd).await
}

async fn pause(State(state): State<HttpState>) -> StatusCode {
    send(&state, SessionCommand::Pause).await
}

async fn resume(State(state): State<HttpState>) -> StatusCode {
    send(&state, SessionCommand::Resume).await
}

async fn set_radius(State(state): State<HttpState>, Path(km): Path<f64>) -> StatusCode {
    if !km.is_finite() || km <= 0.0 {
        return StatusCode::BAD_REQUEST;
    }
    info!("HTTP API: radius {} km", km);
    send(&state, SessionCommand::SetRadius(km)).await
}

async fn set_volume(State(state): State<HttpState>, Path(percent): Path<i32>) -> StatusCode {
    let volume = (percent as f32 / 100.0).clamp(0.0, 1.0);
    info!("HTTP API: volume {}%", percent);
    send(&state, SessionCommand::SetVolume(volume)).await
}

async fn route_changed(State(state): State<HttpState>, Json(body): Json<RouteBody>) -> StatusCode {
    send(&state, SessionCommand::RouteChanged(body.path)).await
}

async fn update_location(
    State(state): State<HttpState>,
    Json(at): Json<Coordinates>,
) -> StatusCode {
    state.location.update(at);
    StatusCode::NO_CONTENT
}

async fn get_viewport(State(state): State<HttpState>) -> Json<ViewportStatus> {
    Json(ViewportStatus {
        snapshot: state.viewport.snapshot(),
        in_flight: state.fetcher.in_flight(),
    })
}

async fn region_changed(State(state): State<HttpState>, Json(region): Json<Region>) -> StatusCode {
    if !state.viewport.region_changed(region).await {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::ACCEPTED
}

async fn recenter(State(state): State<HttpState>) -> StatusCode {
    if !state.viewport.recenter().await {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::ACCEPTED
}

async fn get_features(State(state): State<HttpState>) -> Json<Vec<PointFeature>> {
    Json(state.fetcher.visible_features())
}

async fn get_notifications(State(state): State<HttpState>) -> Json<Vec<Notification>> {
    Json(state.notices.recent().await)
}
