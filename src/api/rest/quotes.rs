use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};

use crate::engine::lifecycle::can_transition_str;
use crate::engine::pricing::QuoteBreakdown;
use crate::error::AppError;
use crate::models::money::Money;
use crate::models::request::{MembershipTier, ServiceType};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/quotes", post(create_quote))
        .route("/transitions", get(check_transition))
}

#[derive(Deserialize)]
pub struct QuoteRequest {
    pub miles: f64,
    pub service_type: ServiceType,
    #[serde(default)]
    pub tier: MembershipTier,
}

#[derive(Serialize)]
pub struct QuoteResponse {
    pub amount: Money,
    pub breakdown: QuoteBreakdown,
}

#[derive(Deserialize)]
pub struct TransitionQuery {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
}

#[derive(Serialize)]
pub struct TransitionResponse {
    pub from: String,
    pub to: String,
    pub allowed: bool,
}

async fn create_quote(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<QuoteRequest>,
) -> Result<Json<QuoteResponse>, AppError> {
    let breakdown =
        state
            .service
            .quote_breakdown(payload.miles, payload.service_type, payload.tier)?;

    Ok(Json(QuoteResponse {
        amount: breakdown.delivery_fee,
        breakdown,
    }))
}

async fn check_transition(Query(query): Query<TransitionQuery>) -> Json<TransitionResponse> {
    let allowed = can_transition_str(&query.from, &query.to);
    Json(TransitionResponse {
        from: query.from,
        to: query.to,
        allowed,
    })
}
