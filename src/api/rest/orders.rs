use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::delivery::{confirm_delivery, confirm_order, confirm_pickup, OrderConfirmed};
use crate::engine::dispatch::{accept_assignment, assign_manually, cancel_order, decline_assignment};
use crate::error::AppError;
use crate::models::assignment::OrderAssignment;
use crate::models::courier::GeoPoint;
use crate::models::order::{DeliveryOrder, OrderStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/escalated", get(list_escalated))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/cancel", post(cancel))
        .route("/orders/:id/pickup", post(pickup))
        .route("/orders/:id/deliver", post(deliver))
        .route("/orders/:id/assign", post(assign))
        .route("/assignments", get(list_assignments))
        .route("/assignments/:id/accept", post(accept))
        .route("/assignments/:id/decline", post(decline))
}

#[derive(Deserialize)]
pub struct CourierActionRequest {
    pub courier_id: Uuid,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<OrderConfirmed>,
) -> Result<Json<DeliveryOrder>, AppError> {
    let order = confirm_order(&state, payload, Utc::now()).await?;
    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryOrder>, AppError> {
    let order = state
        .orders
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", id)))?;

    Ok(Json(order.value().clone()))
}

async fn list_escalated(State(state): State<Arc<AppState>>) -> Json<Vec<DeliveryOrder>> {
    let orders = state
        .orders
        .iter()
        .filter(|entry| {
            let order = entry.value();
            order.needs_manual_assignment && order.status == OrderStatus::Pending
        })
        .map(|entry| entry.value().clone())
        .collect();

    Json(orders)
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryOrder>, AppError> {
    let order = cancel_order(&state, id, Utc::now()).await?;
    Ok(Json(order))
}

async fn pickup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CourierActionRequest>,
) -> Result<Json<DeliveryOrder>, AppError> {
    let order = confirm_pickup(&state, id, payload.courier_id, payload.location, Utc::now()).await?;
    Ok(Json(order))
}

async fn deliver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CourierActionRequest>,
) -> Result<Json<DeliveryOrder>, AppError> {
    let order = confirm_delivery(&state, id, payload.courier_id, Utc::now()).await?;
    Ok(Json(order))
}

async fn assign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CourierActionRequest>,
) -> Result<Json<OrderAssignment>, AppError> {
    let assignment = assign_manually(&state, id, payload.courier_id, Utc::now()).await?;
    Ok(Json(assignment))
}

async fn list_assignments(State(state): State<Arc<AppState>>) -> Json<Vec<OrderAssignment>> {
    let mut assignments: Vec<OrderAssignment> = state
        .assignments
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    assignments.sort_by_key(|assignment| assignment.created_at);

    Json(assignments)
}

async fn accept(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CourierActionRequest>,
) -> Result<Json<OrderAssignment>, AppError> {
    let assignment = accept_assignment(&state, id, payload.courier_id, Utc::now()).await?;
    Ok(Json(assignment))
}

async fn decline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CourierActionRequest>,
) -> Result<Json<OrderAssignment>, AppError> {
    let assignment = decline_assignment(&state, id, payload.courier_id, Utc::now()).await?;
    Ok(Json(assignment))
}
