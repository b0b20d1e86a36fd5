use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::dispatch::release_courier;
use crate::engine::queue::enqueue_order;
use crate::error::AppError;
use crate::geo::{self, is_near, ProximityChange};
use crate::models::assignment::AssignmentStatus;
use crate::models::courier::{Courier, GeoPoint};
use crate::models::earning::EarningRecord;
use crate::models::event::EngineEvent;
use crate::models::order::{DeliveryOrder, Location, OrderStatus, Stop};
use crate::state::AppState;

/// Upstream "order confirmed" event, sent once payment capture succeeds.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderConfirmed {
    pub order_id: Option<Uuid>,
    pub pickup: Location,
    pub dropoff: Location,
    pub payout_cents: i64,
    pub distance_km: f64,
}

/// Result of folding one courier position fix into their current order.
#[derive(Debug, Clone, Serialize)]
pub struct ProximityReport {
    pub order_id: Uuid,
    pub stop: Stop,
    pub distance_m: f64,
    pub near: bool,
    pub arrived: bool,
    /// The courier should be asked to confirm; the engine will not complete
    /// the stop on its own.
    pub prompt_confirmation: bool,
    pub order_status: OrderStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationUpdate {
    pub courier: Courier,
    pub proximity: Option<ProximityReport>,
}

fn validate_point(label: &str, point: &GeoPoint) -> Result<(), AppError> {
    let valid = point.lat.is_finite()
        && point.lng.is_finite()
        && (-90.0..=90.0).contains(&point.lat)
        && (-180.0..=180.0).contains(&point.lng);

    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("{label} coordinates are out of range")))
    }
}

/// Records a confirmed order and queues it for dispatch. A repeated event for
/// an order we already know returns the stored order untouched.
pub async fn confirm_order(
    state: &AppState,
    event: OrderConfirmed,
    now: DateTime<Utc>,
) -> Result<DeliveryOrder, AppError> {
    if event.payout_cents < 0 {
        return Err(AppError::BadRequest("payout_cents cannot be negative".to_string()));
    }
    if !event.distance_km.is_finite() || event.distance_km < 0.0 {
        return Err(AppError::BadRequest("distance_km must be a non-negative number".to_string()));
    }
    validate_point("pickup", &event.pickup.point)?;
    validate_point("dropoff", &event.dropoff.point)?;

    let order_id = event.order_id.unwrap_or_else(Uuid::new_v4);
    let order = match state.orders.entry(order_id) {
        Entry::Occupied(existing) => {
            info!(order_id = %order_id, "duplicate order confirmation ignored");
            return Ok(existing.get().clone());
        }
        Entry::Vacant(slot) => {
            let order = DeliveryOrder::confirmed(
                order_id,
                event.pickup,
                event.dropoff,
                event.payout_cents,
                event.distance_km,
                now,
            );
            slot.insert(order.clone());
            order
        }
    };

    info!(
        order_id = %order.id,
        payout_cents = order.payout_cents,
        distance_km = order.distance_km,
        "order confirmed"
    );
    enqueue_order(state, order.id).await?;

    Ok(order)
}

fn assigned_order(state: &AppState, order_id: Uuid, courier_id: Uuid) -> Result<DeliveryOrder, AppError> {
    let order = state
        .orders
        .get(&order_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if order.assigned_courier != Some(courier_id) {
        return Err(AppError::Conflict(format!(
            "order {order_id} is not assigned to courier {courier_id}"
        )));
    }

    Ok(order)
}

/// Courier reports the food is collected. With the pickup geofence enforced
/// the courier's position must be inside it.
pub async fn confirm_pickup(
    state: &AppState,
    order_id: Uuid,
    courier_id: Uuid,
    position: Option<GeoPoint>,
    now: DateTime<Utc>,
) -> Result<DeliveryOrder, AppError> {
    let _guard = state.order_locks.acquire(order_id).await;
    let mut order = assigned_order(state, order_id, courier_id)?;

    if state.config.enforce_pickup_geofence {
        let position = position.ok_or_else(|| {
            AppError::BadRequest("a current position is required to confirm pickup".to_string())
        })?;
        let target = order.pickup.point;
        if !is_near(position.lat, position.lng, target.lat, target.lng) {
            return Err(AppError::Conflict(format!(
                "courier {courier_id} is not at the pickup for order {order_id}"
            )));
        }
    }

    order.transition(OrderStatus::PickedUp, now)?;
    state.orders.insert(order_id, order.clone());
    state.publish(EngineEvent::PickedUp {
        order_id,
        courier_id,
    });
    info!(order_id = %order_id, courier_id = %courier_id, "order picked up");

    Ok(order)
}

/// Courier affirms the handoff. Observing the same delivery twice is
/// harmless: the order is returned as-is and no second earning appears.
pub async fn confirm_delivery(
    state: &AppState,
    order_id: Uuid,
    courier_id: Uuid,
    now: DateTime<Utc>,
) -> Result<DeliveryOrder, AppError> {
    let delivered = {
        let _guard = state.order_locks.acquire(order_id).await;
        let mut order = assigned_order(state, order_id, courier_id)?;

        if order.status == OrderStatus::Delivered {
            info!(order_id = %order_id, "duplicate delivery confirmation ignored");
            return Ok(order);
        }

        order.transition(OrderStatus::Delivered, now)?;
        state.orders.insert(order_id, order.clone());

        if let Some((_, assignment_id)) = state.active_assignments.remove(&order_id) {
            release_courier(state, courier_id, assignment_id, now);
        }
        if let Some(mut courier) = state.couriers.get_mut(&courier_id) {
            courier.last_dropoff_at = Some(now);
        }

        if record_earning(state, &order, courier_id, now) {
            state.metrics.deliveries_completed_total.inc();
            state.publish(EngineEvent::DeliveryCompleted {
                order_id,
                courier_id,
                amount_cents: order.payout_cents,
            });
        }
        info!(
            order_id = %order_id,
            courier_id = %courier_id,
            amount_cents = order.payout_cents,
            "order delivered"
        );

        order
    };

    state.order_locks.forget(order_id);
    Ok(delivered)
}

/// Inserts the earning for a delivered order. Returns false if the order has
/// already been earned.
pub fn record_earning(
    state: &AppState,
    order: &DeliveryOrder,
    courier_id: Uuid,
    now: DateTime<Utc>,
) -> bool {
    match state.earnings.entry(order.id) {
        Entry::Occupied(_) => {
            warn!(order_id = %order.id, "earning already recorded");
            false
        }
        Entry::Vacant(slot) => {
            slot.insert(EarningRecord {
                order_id: order.id,
                courier_id,
                amount_cents: order.payout_cents,
                completed_at: now,
                batch_id: None,
            });
            true
        }
    }
}

/// Applies a live position fix. If the courier is working an accepted order
/// the fix is checked against the geofence of the stop they are heading to.
pub async fn update_courier_location(
    state: &AppState,
    courier_id: Uuid,
    position: GeoPoint,
    now: DateTime<Utc>,
) -> Result<LocationUpdate, AppError> {
    validate_point("courier", &position)?;

    let (courier, assignment_id) = {
        let mut courier = state
            .couriers
            .get_mut(&courier_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;

        courier.location = position;
        courier.location_updated_at = now;
        courier.updated_at = now;
        (courier.clone(), courier.active_assignment)
    };

    let order_id = assignment_id.and_then(|id| {
        state
            .assignments
            .get(&id)
            .filter(|assignment| assignment.status == AssignmentStatus::Accepted)
            .map(|assignment| assignment.order_id)
    });

    let proximity = match order_id {
        Some(order_id) => track_proximity(state, order_id, courier_id, position, now).await?,
        None => None,
    };

    Ok(LocationUpdate { courier, proximity })
}

async fn track_proximity(
    state: &AppState,
    order_id: Uuid,
    courier_id: Uuid,
    position: GeoPoint,
    now: DateTime<Utc>,
) -> Result<Option<ProximityReport>, AppError> {
    let _guard = state.order_locks.acquire(order_id).await;
    let mut order = assigned_order(state, order_id, courier_id)?;

    let Some((stop, target)) = order.current_target() else {
        return Ok(None);
    };
    let target_point = target.point;

    let (proximity, change) = geo::observe(order.proximity, &position, &target_point);
    let arrived = change == ProximityChange::Arrived;
    let distance_m = proximity.distance_m.unwrap_or_default();
    order.proximity = proximity;

    let auto_pickup = arrived && stop == Stop::Pickup && state.config.auto_pickup_on_arrival;
    let prompt_confirmation = arrived && !auto_pickup;

    if arrived {
        state.publish(EngineEvent::ArrivalDetected {
            order_id,
            courier_id,
            stop,
            distance_m,
            requires_confirmation: prompt_confirmation,
        });
        info!(
            order_id = %order_id,
            courier_id = %courier_id,
            stop = ?stop,
            distance_m = distance_m.round(),
            "courier arrived"
        );
    }

    if auto_pickup {
        order.transition(OrderStatus::PickedUp, now)?;
        state.publish(EngineEvent::PickedUp {
            order_id,
            courier_id,
        });
        info!(order_id = %order_id, courier_id = %courier_id, "pickup confirmed by geofence");
    }

    let report = ProximityReport {
        order_id,
        stop,
        distance_m,
        near: proximity.near,
        arrived,
        prompt_confirmation,
        order_status: order.status,
    };
    state.orders.insert(order_id, order);

    Ok(Some(report))
}

pub fn courier_earnings(state: &AppState, courier_id: Uuid) -> Vec<EarningRecord> {
    let mut earnings: Vec<EarningRecord> = state
        .earnings
        .iter()
        .filter(|entry| entry.value().courier_id == courier_id)
        .map(|entry| entry.value().clone())
        .collect();
    earnings.sort_by_key(|earning| earning.completed_at);
    earnings
}
