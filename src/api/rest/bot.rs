use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::api::rest::guard::require_bot;
use crate::display::DisplayHandle;
use crate::engine::geofence::verify_position;
use crate::engine::queue;
use crate::error::AppError;
use crate::models::courier::{Courier, CourierId, GeoPoint};
use crate::models::geofence::PositionCheck;
use crate::models::queue::{JoinOutcome, QueueEntry};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bot/couriers", post(register_courier))
        .route("/bot/couriers/:id", get(get_courier))
        .route("/bot/couriers/:id/join", post(join_queue))
        .route("/bot/couriers/:id/leave", post(leave_queue))
        .route("/bot/couriers/:id/position", get(queue_position))
        .route("/bot/couriers/:id/location", post(report_location))
        .route(
            "/bot/couriers/:id/display",
            get(current_display)
                .put(remember_display)
                .delete(forget_display),
        )
        .route("/bot/queue", get(list_queue))
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub id: CourierId,
    pub name: String,
}

#[derive(Deserialize)]
pub struct LocationRequest {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Deserialize)]
pub struct DisplayRequest {
    pub message_id: i64,
}

#[derive(Serialize)]
pub struct LeaveResponse {
    pub removed: bool,
}

#[derive(Serialize)]
pub struct PositionResponse {
    pub position: u32,
}

#[derive(Serialize)]
pub struct DisplayResponse {
    pub display: Option<DisplayHandle>,
}

async fn register_courier(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<Courier>, AppError> {
    require_bot(&state, &headers)?;
    let courier = queue::register(&state, payload.id, &payload.name, Utc::now()).await?;
    Ok(Json(courier))
}

async fn get_courier(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<CourierId>,
) -> Result<Json<Courier>, AppError> {
    require_bot(&state, &headers)?;
    Ok(Json(queue::courier(&state, id).await?))
}

async fn join_queue(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<CourierId>,
) -> Result<Json<JoinOutcome>, AppError> {
    require_bot(&state, &headers)?;
    Ok(Json(queue::join(&state, id, Utc::now()).await?))
}

async fn leave_queue(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<CourierId>,
) -> Result<Json<LeaveResponse>, AppError> {
    require_bot(&state, &headers)?;
    let removed = queue::leave(&state, id).await?;
    Ok(Json(LeaveResponse { removed }))
}

async fn queue_position(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<CourierId>,
) -> Result<Json<PositionResponse>, AppError> {
    require_bot(&state, &headers)?;
    let position = queue::position(&state, id).await?;
    Ok(Json(PositionResponse { position }))
}

async fn report_location(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<CourierId>,
    Json(payload): Json<LocationRequest>,
) -> Result<Json<PositionCheck>, AppError> {
    require_bot(&state, &headers)?;
    let geofence = state
        .geofence
        .as_ref()
        .ok_or_else(|| AppError::BadRequest("geofence is not enabled".to_string()))?;

    let point = GeoPoint {
        lat: payload.lat,
        lon: payload.lon,
    };
    let check = verify_position(&state, geofence, id, point, Utc::now()).await?;
    Ok(Json(check))
}

async fn list_queue(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<QueueEntry>>, AppError> {
    require_bot(&state, &headers)?;
    Ok(Json(queue::list(&state).await?))
}

async fn current_display(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<CourierId>,
) -> Result<Json<DisplayResponse>, AppError> {
    require_bot(&state, &headers)?;
    Ok(Json(DisplayResponse {
        display: state.display.current(id),
    }))
}

async fn remember_display(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<CourierId>,
    Json(payload): Json<DisplayRequest>,
) -> Result<Json<DisplayResponse>, AppError> {
    require_bot(&state, &headers)?;
    state.display.remember(id, payload.message_id, Utc::now());
    Ok(Json(DisplayResponse {
        display: state.display.current(id),
    }))
}

async fn forget_display(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<CourierId>,
) -> Result<Json<DisplayResponse>, AppError> {
    require_bot(&state, &headers)?;
    state.display.forget(id);
    Ok(Json(DisplayResponse { display: None }))
}
