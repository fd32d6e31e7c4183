//! HTTP route definitions

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    services::ServeDir,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::app::AppState;
use crate::game::GameSnapshot;
use crate::matchmaking::RoomSummary;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Plain HTTP requests only; upgraded sockets outlive their response
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(state.config.client_origin.as_deref());
    let static_dir = state.config.static_dir.clone();

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/rooms", get(rooms_handler))
        .route("/rooms/:id", get(room_handler));

    let router = match static_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Serving static files");
            router.fallback_service(ServeDir::new(dir))
        }
        None => router,
    };

    router
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Comma-separated origins, or any origin when none are configured
fn cors_layer(client_origin: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    match client_origin {
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
                .collect();
            layer.allow_origin(allowed)
        }
        None => layer.allow_origin(Any),
    }
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_games: usize,
    running_games: usize,
    active_rooms: usize,
    waiting_rooms: usize,
    connected_players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_games: state.engine.game_count(),
        running_games: state.engine.running_count(),
        active_rooms: state.rooms.room_count(),
        waiting_rooms: state.rooms.waiting_count(),
        connected_players: state.sessions.len(),
    })
}

// ============================================================================
// Room endpoints
// ============================================================================

#[derive(Serialize)]
struct RoomsResponse {
    rooms: Vec<RoomSummary>,
}

async fn rooms_handler(State(state): State<AppState>) -> Json<RoomsResponse> {
    let mut rooms = state.rooms.rooms();
    rooms.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Json(RoomsResponse { rooms })
}

#[derive(Serialize)]
struct RoomDetail {
    #[serde(flatten)]
    room: RoomSummary,
    /// Absent until the room's game exists
    game: Option<GameSnapshot>,
}

async fn room_handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomDetail>, AppError> {
    let room = state
        .rooms
        .get_room(&room_id)
        .ok_or_else(|| AppError::NotFound(format!("Room {} does not exist", room_id)))?;
    let game = state.engine.snapshot(&room_id).ok();

    Ok(Json(RoomDetail { room, game }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
