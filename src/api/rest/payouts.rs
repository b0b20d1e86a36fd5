use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::payout::{CourierPayout, PayoutBatch};
use crate::payout::aggregator::batch_payouts;
use crate::payout::settlement::{
    manual_payout, mark_settled_manually, previous_settlement_date, run_settlement,
    ManualPayoutRequest, SettlementReport,
};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/payouts/settlements", post(settle))
        .route("/payouts/batches", get(list_batches))
        .route("/payouts/batches/:id", get(get_batch))
        .route("/payouts/manual", post(create_manual_payout))
        .route("/payouts/:id/mark-settled", post(mark_settled))
}

#[derive(Deserialize, Default)]
pub struct SettleRequest {
    pub date: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct MarkSettledRequest {
    pub reference: String,
}

#[derive(Serialize)]
pub struct BatchDetail {
    pub batch: PayoutBatch,
    pub payouts: Vec<CourierPayout>,
}

async fn settle(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<SettleRequest>>,
) -> Result<Json<SettlementReport>, AppError> {
    let now = Utc::now();
    let date = payload
        .and_then(|Json(request)| request.date)
        .unwrap_or_else(|| previous_settlement_date(now));

    let report = run_settlement(&state, date, now).await?;
    Ok(Json(report))
}

async fn list_batches(State(state): State<Arc<AppState>>) -> Json<Vec<PayoutBatch>> {
    let mut batches: Vec<PayoutBatch> = state
        .batches
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    batches.sort_by(|a, b| b.settlement_date.cmp(&a.settlement_date));

    Json(batches)
}

async fn get_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<BatchDetail>, AppError> {
    let batch = state
        .batches
        .get(&id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("batch {} not found", id)))?;

    Ok(Json(BatchDetail {
        payouts: batch_payouts(&state, batch.id),
        batch,
    }))
}

async fn create_manual_payout(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ManualPayoutRequest>,
) -> Result<Json<CourierPayout>, AppError> {
    let payout = manual_payout(&state, payload, Utc::now()).await?;
    Ok(Json(payout))
}

async fn mark_settled(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<MarkSettledRequest>,
) -> Result<Json<CourierPayout>, AppError> {
    let payout = mark_settled_manually(&state, id, payload.reference, Utc::now()).await?;
    Ok(Json(payout))
}
