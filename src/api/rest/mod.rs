pub mod couriers;
pub mod orders;
pub mod payouts;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(couriers::router())
        .merge(orders::router())
        .merge(payouts::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    couriers: usize,
    idle_couriers: usize,
    orders: usize,
    escalated_orders: usize,
    assignments: usize,
    active_assignments: usize,
    batches: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let idle_couriers = state
        .couriers
        .iter()
        .filter(|entry| entry.value().is_eligible())
        .count();
    let escalated_orders = state
        .orders
        .iter()
        .filter(|entry| entry.value().needs_manual_assignment)
        .count();

    Json(HealthResponse {
        status: "ok",
        couriers: state.couriers.len(),
        idle_couriers,
        orders: state.orders.len(),
        escalated_orders,
        assignments: state.assignments.len(),
        active_assignments: state.active_assignments.len(),
        batches: state.batches.len(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
