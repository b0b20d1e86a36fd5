use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::delivery::{courier_earnings, update_courier_location, LocationUpdate};
use crate::error::AppError;
use crate::models::courier::{Courier, CourierStatus, GeoPoint};
use crate::models::earning::EarningRecord;
use crate::models::payout::{PaymentMethod, PaymentType};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", post(create_courier).get(list_couriers))
        .route("/couriers/:id/status", patch(update_courier_status))
        .route("/couriers/:id/location", patch(update_location))
        .route(
            "/couriers/:id/payment-methods",
            post(add_payment_method).get(list_payment_methods),
        )
        .route("/couriers/:id/earnings", get(list_earnings))
}

#[derive(Deserialize)]
pub struct CreateCourierRequest {
    pub name: String,
    pub location: GeoPoint,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: CourierStatus,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

#[derive(Deserialize)]
pub struct AddPaymentMethodRequest {
    pub payment_type: PaymentType,
    pub account_identifier: String,
    #[serde(default)]
    pub is_primary: bool,
}

async fn create_courier(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateCourierRequest>,
) -> Result<Json<Courier>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    let courier = Courier::new(payload.name, payload.location, Utc::now());

    state.couriers.insert(courier.id, courier.clone());
    Ok(Json(courier))
}

async fn list_couriers(State(state): State<Arc<AppState>>) -> Json<Vec<Courier>> {
    let couriers = state
        .couriers
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    Json(couriers)
}

async fn update_courier_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Courier>, AppError> {
    let mut courier = state
        .couriers
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("courier {} not found", id)))?;

    courier.status = payload.status;
    courier.updated_at = Utc::now();

    Ok(Json(courier.clone()))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<LocationUpdate>, AppError> {
    let update = update_courier_location(&state, id, payload.location, Utc::now()).await?;
    Ok(Json(update))
}

async fn add_payment_method(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddPaymentMethodRequest>,
) -> Result<Json<PaymentMethod>, AppError> {
    if !state.couriers.contains_key(&id) {
        return Err(AppError::NotFound(format!("courier {} not found", id)));
    }
    if payload.account_identifier.trim().is_empty() {
        return Err(AppError::BadRequest("account_identifier cannot be empty".to_string()));
    }

    let has_primary = state
        .payment_methods
        .iter()
        .any(|entry| entry.value().courier_id == id && entry.value().is_primary);
    // A courier's first method becomes primary.
    let is_primary = payload.is_primary || !has_primary;

    if is_primary && has_primary {
        for mut entry in state.payment_methods.iter_mut() {
            if entry.courier_id == id {
                entry.is_primary = false;
            }
        }
    }

    let method = PaymentMethod {
        id: Uuid::new_v4(),
        courier_id: id,
        payment_type: payload.payment_type,
        account_identifier: payload
            .payment_type
            .normalize_identifier(&payload.account_identifier),
        is_primary,
        created_at: Utc::now(),
    };

    state.payment_methods.insert(method.id, method.clone());
    Ok(Json(method))
}

async fn list_payment_methods(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Json<Vec<PaymentMethod>> {
    let mut methods: Vec<PaymentMethod> = state
        .payment_methods
        .iter()
        .filter(|entry| entry.value().courier_id == id)
        .map(|entry| entry.value().clone())
        .collect();
    methods.sort_by_key(|method| method.created_at);
    Json(methods)
}

async fn list_earnings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Json<Vec<EarningRecord>> {
    Json(courier_earnings(&state, id))
}
