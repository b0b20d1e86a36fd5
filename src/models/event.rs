use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::order::{Location, Stop};
use crate::models::payout::BatchStatus;

/// Everything the engine tells the outside world about, fanned out over the
/// broadcast channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    AssignmentOffered {
        assignment_id: Uuid,
        order_id: Uuid,
        courier_id: Uuid,
        pickup: Location,
        dropoff: Location,
        payout_cents: i64,
        distance_km: f64,
        expires_at: DateTime<Utc>,
    },
    AssignmentAccepted {
        assignment_id: Uuid,
        order_id: Uuid,
        courier_id: Uuid,
    },
    AssignmentLapsed {
        assignment_id: Uuid,
        order_id: Uuid,
        courier_id: Uuid,
    },
    OrderEscalated {
        order_id: Uuid,
        attempts: u32,
    },
    ArrivalDetected {
        order_id: Uuid,
        courier_id: Uuid,
        stop: Stop,
        distance_m: f64,
        requires_confirmation: bool,
    },
    PickedUp {
        order_id: Uuid,
        courier_id: Uuid,
    },
    DeliveryCompleted {
        order_id: Uuid,
        courier_id: Uuid,
        amount_cents: i64,
    },
    OrderCancelled {
        order_id: Uuid,
        courier_id: Option<Uuid>,
    },
    BatchSettled {
        batch_id: Uuid,
        settlement_date: NaiveDate,
        status: BatchStatus,
        successful_payouts: usize,
        failed_payouts: usize,
    },
}

impl EngineEvent {
    pub fn courier_id(&self) -> Option<Uuid> {
        match self {
            EngineEvent::AssignmentOffered { courier_id, .. }
            | EngineEvent::AssignmentAccepted { courier_id, .. }
            | EngineEvent::AssignmentLapsed { courier_id, .. }
            | EngineEvent::ArrivalDetected { courier_id, .. }
            | EngineEvent::PickedUp { courier_id, .. }
            | EngineEvent::DeliveryCompleted { courier_id, .. } => Some(*courier_id),
            EngineEvent::OrderCancelled { courier_id, .. } => *courier_id,
            EngineEvent::OrderEscalated { .. } | EngineEvent::BatchSettled { .. } => None,
        }
    }
}
