use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::service::{AuditReport, NewRequest};
use crate::error::AppError;
use crate::models::request::{DeliveryRequest, RequestEvent, RequestStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/requests", post(submit_request).get(list_requests))
        .route("/requests/:id", get(get_request))
        .route("/requests/:id/events", get(list_events))
        .route("/requests/:id/assign", post(assign_driver))
        .route("/requests/:id/status", post(advance_status))
        .route("/requests/:id/cancel", post(cancel_request))
        .route("/requests/:id/verify", get(verify_request))
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub driver_id: String,
}

#[derive(Deserialize)]
pub struct AdvanceRequest {
    pub status: String,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: String,
}

async fn submit_request(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewRequest>,
) -> Result<Json<DeliveryRequest>, AppError> {
    let request = state.service.submit(payload).await?;
    Ok(Json(request))
}

async fn list_requests(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DeliveryRequest>>, AppError> {
    Ok(Json(state.service.list().await?))
}

async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryRequest>, AppError> {
    Ok(Json(state.service.get(id).await?))
}

async fn list_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<RequestEvent>>, AppError> {
    Ok(Json(state.service.events(id).await?))
}

async fn assign_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<DeliveryRequest>, AppError> {
    Ok(Json(state.service.assign(id, &payload.driver_id).await?))
}

async fn advance_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdvanceRequest>,
) -> Result<Json<DeliveryRequest>, AppError> {
    let to = payload
        .status
        .parse::<RequestStatus>()
        .map_err(AppError::BadRequest)?;

    Ok(Json(state.service.advance(id, to).await?))
}

async fn cancel_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<DeliveryRequest>, AppError> {
    Ok(Json(state.service.cancel(id, &payload.reason).await?))
}

async fn verify_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<AuditReport>, AppError> {
    Ok(Json(state.service.verify(id).await?))
}
