use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::queue::requeue_after;
use crate::engine::selection::{eligible_couriers, idle_excluded_couriers};
use crate::error::AppError;
use crate::geo::haversine_m;
use crate::models::assignment::{AssignmentStatus, OrderAssignment};
use crate::models::event::EngineEvent;
use crate::models::order::{DeliveryOrder, OrderStatus};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Offered(OrderAssignment),
    NoEligibleCourier,
    /// Retry budget spent, or only couriers who already let the order lapse
    /// are free; the order waits for an operator.
    Escalated,
    /// Order is no longer waiting for a courier.
    Skipped,
}

impl DispatchOutcome {
    fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Offered(_) => "offered",
            DispatchOutcome::NoEligibleCourier => "no_courier",
            DispatchOutcome::Escalated => "escalated",
            DispatchOutcome::Skipped => "skipped",
        }
    }
}

pub async fn run_dispatch_engine(state: Arc<AppState>, mut order_rx: mpsc::Receiver<Uuid>) {
    info!("dispatch engine started");

    while let Some(order_id) = order_rx.recv().await {
        state.metrics.orders_in_queue.dec();

        let start = Instant::now();
        let result = dispatch_order(&state, order_id, Utc::now()).await;
        let elapsed = start.elapsed().as_secs_f64();

        match result {
            Ok(outcome) => {
                state
                    .metrics
                    .assignment_latency_seconds
                    .with_label_values(&[outcome.label()])
                    .observe(elapsed);

                if let DispatchOutcome::NoEligibleCourier = outcome {
                    schedule_retry(state.clone(), order_id);
                }
            }
            Err(err) => {
                state
                    .metrics
                    .assignment_latency_seconds
                    .with_label_values(&["error"])
                    .observe(elapsed);
                error!(order_id = %order_id, error = %err, "failed to dispatch order");
            }
        }
    }

    warn!("dispatch engine stopped: queue channel closed");
}

fn schedule_retry(state: Arc<AppState>, order_id: Uuid) {
    let delay = state.config.dispatch_retry_interval();
    requeue_after(state, order_id, delay);
}

/// One selection pass for a pending order: offers it to the best eligible
/// courier, escalates it when the retry budget is spent.
pub async fn dispatch_order(
    state: &AppState,
    order_id: Uuid,
    now: DateTime<Utc>,
) -> Result<DispatchOutcome, AppError> {
    let _guard = state.order_locks.acquire(order_id).await;

    let order = state
        .orders
        .get(&order_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if order.status != OrderStatus::Pending
        || order.needs_manual_assignment
        || state.active_assignments.contains_key(&order_id)
    {
        return Ok(DispatchOutcome::Skipped);
    }

    if order.dispatch_attempts >= state.config.max_dispatch_attempts {
        escalate(state, &order);
        return Ok(DispatchOutcome::Escalated);
    }

    let candidates = eligible_couriers(state, &order);
    let ranked = state.selector.rank(&order, &candidates);

    for candidate in ranked {
        // The courier may have been taken by another order since the snapshot.
        if let Some(assignment) =
            create_offer(state, &order, candidate.courier_id, candidate.distance_m, now)?
        {
            return Ok(DispatchOutcome::Offered(assignment));
        }
    }

    // Everyone free right now has already let this order lapse.
    if idle_excluded_couriers(state, &order) > 0 {
        escalate(state, &order);
        return Ok(DispatchOutcome::Escalated);
    }

    state.metrics.assignment_outcome("no_courier");
    warn!(order_id = %order_id, "no eligible couriers; will retry");
    Ok(DispatchOutcome::NoEligibleCourier)
}

/// Operator override: offers a pending order to a named courier, bypassing
/// the selector and the retry budget.
pub async fn assign_manually(
    state: &AppState,
    order_id: Uuid,
    courier_id: Uuid,
    now: DateTime<Utc>,
) -> Result<OrderAssignment, AppError> {
    let _guard = state.order_locks.acquire(order_id).await;

    let order = state
        .orders
        .get(&order_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if order.status != OrderStatus::Pending {
        return Err(AppError::Conflict(format!(
            "order {order_id} is {:?}, not pending",
            order.status
        )));
    }

    let location = state
        .couriers
        .get(&courier_id)
        .map(|courier| courier.location)
        .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;

    let distance_m = haversine_m(&location, &order.pickup.point);
    let assignment = create_offer(state, &order, courier_id, distance_m, now)?
        .ok_or_else(|| AppError::Conflict(format!("courier {courier_id} is not available")))?;

    // Only a placed offer takes the order off the escalation list.
    if let Some(mut stored) = state.orders.get_mut(&order_id) {
        stored.needs_manual_assignment = false;
        stored.excluded_couriers.retain(|id| *id != courier_id);
    }

    info!(order_id = %order_id, courier_id = %courier_id, "order manually assigned");
    Ok(assignment)
}

/// Creates a pending offer. Must be called with the order's lock held.
/// Returns `None` if the courier could not be reserved.
fn create_offer(
    state: &AppState,
    order: &DeliveryOrder,
    courier_id: Uuid,
    distance_m: f64,
    now: DateTime<Utc>,
) -> Result<Option<OrderAssignment>, AppError> {
    if state.active_assignments.contains_key(&order.id) {
        return Err(AppError::Conflict(format!(
            "order {} already has an active assignment",
            order.id
        )));
    }

    let attempt = order.dispatch_attempts + 1;
    let assignment = OrderAssignment::offer(
        order.id,
        courier_id,
        attempt,
        distance_m,
        now,
        state.config.offer_window(),
    );

    if !reserve_courier(state, courier_id, assignment.id, now) {
        return Ok(None);
    }

    state.assignments.insert(assignment.id, assignment.clone());
    state.active_assignments.insert(order.id, assignment.id);
    if let Some(mut stored) = state.orders.get_mut(&order.id) {
        stored.dispatch_attempts = attempt;
    }

    state.metrics.active_offers.inc();
    state.metrics.assignment_outcome("offered");
    state.publish(EngineEvent::AssignmentOffered {
        assignment_id: assignment.id,
        order_id: order.id,
        courier_id,
        pickup: order.pickup.clone(),
        dropoff: order.dropoff.clone(),
        payout_cents: order.payout_cents,
        distance_km: order.distance_km,
        expires_at: assignment.expires_at,
    });

    info!(
        order_id = %order.id,
        courier_id = %courier_id,
        assignment_id = %assignment.id,
        attempt,
        distance_m = distance_m.round(),
        "offer sent"
    );

    Ok(Some(assignment))
}

// The check and the claim happen under the courier's map entry lock, so two
// orders can never reserve the same courier.
fn reserve_courier(state: &AppState, courier_id: Uuid, assignment_id: Uuid, now: DateTime<Utc>) -> bool {
    match state.couriers.get_mut(&courier_id) {
        Some(mut courier) if courier.is_eligible() => {
            courier.active_assignment = Some(assignment_id);
            courier.updated_at = now;
            true
        }
        _ => false,
    }
}

pub(crate) fn release_courier(state: &AppState, courier_id: Uuid, assignment_id: Uuid, now: DateTime<Utc>) {
    if let Some(mut courier) = state.couriers.get_mut(&courier_id) {
        if courier.active_assignment == Some(assignment_id) {
            courier.active_assignment = None;
            courier.updated_at = now;
        }
    }
}

fn escalate(state: &AppState, order: &DeliveryOrder) {
    if let Some(mut stored) = state.orders.get_mut(&order.id) {
        stored.needs_manual_assignment = true;
    }

    state.metrics.assignment_outcome("escalated");
    state.publish(EngineEvent::OrderEscalated {
        order_id: order.id,
        attempts: order.dispatch_attempts,
    });
    warn!(
        order_id = %order.id,
        attempts = order.dispatch_attempts,
        excluded = order.excluded_couriers.len(),
        "order needs manual assignment"
    );
}

pub async fn accept_assignment(
    state: &Arc<AppState>,
    assignment_id: Uuid,
    courier_id: Uuid,
    now: DateTime<Utc>,
) -> Result<OrderAssignment, AppError> {
    let order_id = assignment_order(state, assignment_id)?;

    let lapsed = {
        let _guard = state.order_locks.acquire(order_id).await;
        let assignment = owned_assignment(state, assignment_id, courier_id)?;

        match assignment.status {
            AssignmentStatus::Accepted => return Ok(assignment),
            AssignmentStatus::Pending => {}
            AssignmentStatus::Cancelled => {
                return Err(AppError::Conflict(format!("order {order_id} was cancelled")));
            }
            AssignmentStatus::Declined | AssignmentStatus::Expired => {
                return Err(AppError::OfferExpired);
            }
        }

        if assignment.is_expired_at(now) {
            lapse_offer(state, assignment_id, AssignmentStatus::Expired, now)
        } else {
            return accept_locked(state, assignment, now);
        }
    };

    if lapsed.is_some() {
        after_lapse(state, order_id, now).await;
    }
    Err(AppError::OfferExpired)
}

fn accept_locked(
    state: &AppState,
    mut assignment: OrderAssignment,
    now: DateTime<Utc>,
) -> Result<OrderAssignment, AppError> {
    let mut order = state
        .orders
        .get(&assignment.order_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", assignment.order_id)))?;

    order.transition(OrderStatus::Assigned, now)?;
    order.assigned_courier = Some(assignment.courier_id);
    assignment.record_response(AssignmentStatus::Accepted, now);

    state.orders.insert(order.id, order.clone());
    state.assignments.insert(assignment.id, assignment.clone());
    state.active_assignments.insert(order.id, assignment.id);
    cancel_stray_offers(state, order.id, assignment.id, now);

    state.metrics.active_offers.dec();
    state.metrics.assignment_outcome("accepted");
    state.publish(EngineEvent::AssignmentAccepted {
        assignment_id: assignment.id,
        order_id: order.id,
        courier_id: assignment.courier_id,
    });

    info!(
        order_id = %order.id,
        courier_id = %assignment.courier_id,
        response_time_seconds = assignment.response_time_seconds.unwrap_or_default(),
        "offer accepted"
    );

    Ok(assignment)
}

// There should never be another pending offer here; if there is, it loses.
fn cancel_stray_offers(state: &AppState, order_id: Uuid, keep: Uuid, now: DateTime<Utc>) {
    let stray: Vec<Uuid> = state
        .assignments
        .iter()
        .filter(|entry| {
            let a = entry.value();
            a.order_id == order_id && a.id != keep && a.status == AssignmentStatus::Pending
        })
        .map(|entry| *entry.key())
        .collect();

    for id in stray {
        let courier_id = match state.assignments.get_mut(&id) {
            Some(mut assignment) => {
                assignment.status = AssignmentStatus::Cancelled;
                assignment.courier_id
            }
            None => continue,
        };
        release_courier(state, courier_id, id, now);
        state.metrics.active_offers.dec();
        warn!(order_id = %order_id, assignment_id = %id, "cancelled stray pending offer");
    }
}

pub async fn decline_assignment(
    state: &Arc<AppState>,
    assignment_id: Uuid,
    courier_id: Uuid,
    now: DateTime<Utc>,
) -> Result<OrderAssignment, AppError> {
    let order_id = assignment_order(state, assignment_id)?;

    let declined = {
        let _guard = state.order_locks.acquire(order_id).await;
        let assignment = owned_assignment(state, assignment_id, courier_id)?;

        if assignment.status != AssignmentStatus::Pending {
            return Err(AppError::Conflict(format!(
                "assignment {assignment_id} is {:?}",
                assignment.status
            )));
        }

        let status = if assignment.is_expired_at(now) {
            AssignmentStatus::Expired
        } else {
            AssignmentStatus::Declined
        };
        lapse_offer(state, assignment_id, status, now)
    };

    let declined = declined
        .ok_or_else(|| AppError::Conflict(format!("assignment {assignment_id} is no longer pending")))?;

    after_lapse(state, order_id, now).await;
    Ok(declined)
}

/// Expires every pending offer whose deadline has passed and re-dispatches
/// the affected orders. Returns the expired assignment ids.
pub async fn expire_due_assignments(state: &Arc<AppState>, now: DateTime<Utc>) -> Vec<Uuid> {
    let due: Vec<(Uuid, Uuid)> = state
        .assignments
        .iter()
        .filter(|entry| {
            let a = entry.value();
            a.status == AssignmentStatus::Pending && a.is_expired_at(now)
        })
        .map(|entry| (entry.value().id, entry.value().order_id))
        .collect();

    let mut expired = Vec::with_capacity(due.len());
    for (assignment_id, order_id) in due {
        let lapsed = {
            let _guard = state.order_locks.acquire(order_id).await;
            lapse_offer(state, assignment_id, AssignmentStatus::Expired, now)
        };

        if lapsed.is_some() {
            expired.push(assignment_id);
            after_lapse(state, order_id, now).await;
        }
    }

    expired
}

pub async fn run_expiry_sweeper(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(state.config.expiry_sweep_interval());
    info!(
        interval_ms = state.config.expiry_sweep_interval_ms,
        "offer expiry sweeper started"
    );

    loop {
        ticker.tick().await;
        let expired = expire_due_assignments(&state, Utc::now()).await;
        if !expired.is_empty() {
            debug!(count = expired.len(), "expired offers");
        }
    }
}

/// Moves a pending offer to `Expired` or `Declined` and frees the courier.
/// Must be called with the order's lock held. Returns `None` if the offer
/// was no longer pending.
fn lapse_offer(
    state: &AppState,
    assignment_id: Uuid,
    status: AssignmentStatus,
    now: DateTime<Utc>,
) -> Option<OrderAssignment> {
    let lapsed = {
        let mut assignment = state.assignments.get_mut(&assignment_id)?;
        if assignment.status != AssignmentStatus::Pending {
            return None;
        }

        match status {
            AssignmentStatus::Declined => assignment.record_response(status, now),
            _ => assignment.status = status,
        }
        assignment.clone()
    };

    state
        .active_assignments
        .remove_if(&lapsed.order_id, |_, active| *active == assignment_id);
    release_courier(state, lapsed.courier_id, assignment_id, now);

    if let Some(mut order) = state.orders.get_mut(&lapsed.order_id) {
        if !order.excluded_couriers.contains(&lapsed.courier_id) {
            order.excluded_couriers.push(lapsed.courier_id);
        }
    }

    let outcome = match status {
        AssignmentStatus::Declined => "declined",
        _ => "expired",
    };
    state.metrics.active_offers.dec();
    state.metrics.assignment_outcome(outcome);
    state.publish(EngineEvent::AssignmentLapsed {
        assignment_id,
        order_id: lapsed.order_id,
        courier_id: lapsed.courier_id,
    });

    info!(
        order_id = %lapsed.order_id,
        courier_id = %lapsed.courier_id,
        assignment_id = %assignment_id,
        outcome,
        "offer lapsed"
    );

    Some(lapsed)
}

// Re-runs selection right away; falls back to the retry interval when
// nobody is free.
async fn after_lapse(state: &Arc<AppState>, order_id: Uuid, now: DateTime<Utc>) {
    match dispatch_order(state, order_id, now).await {
        Ok(DispatchOutcome::NoEligibleCourier) => schedule_retry(state.clone(), order_id),
        Ok(_) => {}
        Err(err) => error!(order_id = %order_id, error = %err, "re-dispatch failed"),
    }
}

pub async fn cancel_order(
    state: &AppState,
    order_id: Uuid,
    now: DateTime<Utc>,
) -> Result<DeliveryOrder, AppError> {
    let cancelled = {
        let _guard = state.order_locks.acquire(order_id).await;

        let mut order = state
            .orders
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if order.status == OrderStatus::Cancelled {
            return Ok(order);
        }

        order.transition(OrderStatus::Cancelled, now)?;
        order.needs_manual_assignment = false;

        let mut notified_courier = order.assigned_courier;
        if let Some((_, assignment_id)) = state.active_assignments.remove(&order_id) {
            if let Some(mut assignment) = state.assignments.get_mut(&assignment_id) {
                if assignment.status == AssignmentStatus::Pending {
                    state.metrics.active_offers.dec();
                }
                assignment.status = AssignmentStatus::Cancelled;
                notified_courier = Some(assignment.courier_id);
            }
            if let Some(courier_id) = notified_courier {
                release_courier(state, courier_id, assignment_id, now);
            }
            state.metrics.assignment_outcome("cancelled");
        }

        state.orders.insert(order_id, order.clone());
        state.publish(EngineEvent::OrderCancelled {
            order_id,
            courier_id: notified_courier,
        });
        info!(order_id = %order_id, "order cancelled");

        order
    };

    state.order_locks.forget(order_id);
    Ok(cancelled)
}

fn assignment_order(state: &AppState, assignment_id: Uuid) -> Result<Uuid, AppError> {
    state
        .assignments
        .get(&assignment_id)
        .map(|assignment| assignment.order_id)
        .ok_or_else(|| AppError::NotFound(format!("assignment {assignment_id} not found")))
}

fn owned_assignment(
    state: &AppState,
    assignment_id: Uuid,
    courier_id: Uuid,
) -> Result<OrderAssignment, AppError> {
    let assignment = state
        .assignments
        .get(&assignment_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("assignment {assignment_id} not found")))?;

    if assignment.courier_id != courier_id {
        return Err(AppError::Conflict(format!(
            "assignment {assignment_id} was not offered to courier {courier_id}"
        )));
    }

    Ok(assignment)
}
