use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{delete, get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::api::rest::guard::require_operator;
use crate::engine::{assignment, queue};
use crate::error::AppError;
use crate::models::assignment::{AssignOutcome, Assignment, CourierStats};
use crate::models::courier::CourierId;
use crate::models::queue::QueueEntry;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/queue", get(list_queue))
        .route("/api/queue/names", get(list_names))
        .route("/api/queue/clear", post(clear_queue))
        .route("/api/assign", post(assign_order))
        .route("/api/stats", get(courier_stats))
        .route("/api/couriers/:id/assignments", get(courier_history))
        .route("/api/couriers/:id", delete(delete_courier))
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub courier_id: CourierId,
}

#[derive(Serialize)]
pub struct NameEntry {
    pub name: String,
}

#[derive(Serialize)]
pub struct ClearResponse {
    pub removed: u64,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

async fn list_queue(State(state): State<Arc<AppState>>) -> Result<Json<Vec<QueueEntry>>, AppError> {
    Ok(Json(queue::list(&state).await?))
}

/// Public board: names only, in queue order.
async fn list_names(State(state): State<Arc<AppState>>) -> Result<Json<Vec<NameEntry>>, AppError> {
    let names = queue::list(&state)
        .await?
        .into_iter()
        .map(|entry| NameEntry { name: entry.name })
        .collect();
    Ok(Json(names))
}

async fn clear_queue(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ClearResponse>, AppError> {
    require_operator(&state, &headers)?;
    let removed = queue::clear(&state).await?;
    Ok(Json(ClearResponse { removed }))
}

async fn assign_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<AssignOutcome>, AppError> {
    require_operator(&state, &headers)?;
    let outcome = assignment::assign(&state, payload.courier_id, Utc::now()).await?;
    Ok(Json(outcome))
}

async fn courier_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CourierStats>>, AppError> {
    Ok(Json(assignment::stats(&state, Utc::now()).await?))
}

async fn courier_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CourierId>,
) -> Result<Json<Vec<Assignment>>, AppError> {
    Ok(Json(assignment::history(&state, id).await?))
}

async fn delete_courier(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<CourierId>,
) -> Result<Json<DeleteResponse>, AppError> {
    require_operator(&state, &headers)?;
    let deleted = assignment::delete_courier(&state, id).await?;
    Ok(Json(DeleteResponse { deleted }))
}
