use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AssignmentStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
    Cancelled,
}

impl AssignmentStatus {
    /// Pending and accepted assignments hold the order.
    pub fn is_active(self) -> bool {
        matches!(self, AssignmentStatus::Pending | AssignmentStatus::Accepted)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAssignment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub courier_id: Uuid,
    pub status: AssignmentStatus,
    /// Which offer this is for the order, starting at 1.
    pub attempt: u32,
    /// Distance from the courier to the pickup when the offer was made.
    pub distance_to_pickup_m: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub response_time_seconds: Option<i64>,
}

impl OrderAssignment {
    pub fn offer(
        order_id: Uuid,
        courier_id: Uuid,
        attempt: u32,
        distance_to_pickup_m: f64,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            courier_id,
            status: AssignmentStatus::Pending,
            attempt,
            distance_to_pickup_m,
            created_at: now,
            expires_at: now + window,
            responded_at: None,
            response_time_seconds: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn record_response(&mut self, status: AssignmentStatus, now: DateTime<Utc>) {
        self.status = status;
        self.responded_at = Some(now);
        self.response_time_seconds = Some((now - self.created_at).num_seconds());
    }
}
