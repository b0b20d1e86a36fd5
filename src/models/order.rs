use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::ProximityState;
use crate::models::courier::GeoPoint;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub address: String,
    #[serde(flatten)]
    pub point: GeoPoint,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Assigned,
    PickedUp,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        matches!(
            (self, next),
            (Pending, Assigned)
                | (Assigned, PickedUp)
                | (PickedUp, Delivered)
                | (Pending, Cancelled)
                | (Assigned, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOrder {
    pub id: Uuid,
    pub pickup: Location,
    pub dropoff: Location,
    pub payout_cents: i64,
    pub distance_km: f64,
    pub status: OrderStatus,
    pub assigned_courier: Option<Uuid>,
    /// Offers made so far, counted against the dispatch retry budget.
    pub dispatch_attempts: u32,
    /// Couriers whose offer for this order lapsed or was declined.
    pub excluded_couriers: Vec<Uuid>,
    pub needs_manual_assignment: bool,
    /// Geofence state for the stop the courier is currently heading to.
    #[serde(default)]
    pub proximity: ProximityState,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl DeliveryOrder {
    pub fn confirmed(
        id: Uuid,
        pickup: Location,
        dropoff: Location,
        payout_cents: i64,
        distance_km: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            pickup,
            dropoff,
            payout_cents,
            distance_km,
            status: OrderStatus::Pending,
            assigned_courier: None,
            dispatch_attempts: 0,
            excluded_couriers: Vec::new(),
            needs_manual_assignment: false,
            proximity: ProximityState::default(),
            created_at: now,
            assigned_at: None,
            picked_up_at: None,
            delivered_at: None,
            cancelled_at: None,
        }
    }

    /// The only place an order's status changes. Terminal states never move.
    pub fn transition(&mut self, next: OrderStatus, now: DateTime<Utc>) -> Result<(), AppError> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidTransition(format!(
                "order {} cannot move from {:?} to {:?}",
                self.id, self.status, next
            )));
        }

        self.status = next;
        self.proximity = ProximityState::default();
        match next {
            OrderStatus::Assigned => self.assigned_at = Some(now),
            OrderStatus::PickedUp => self.picked_up_at = Some(now),
            OrderStatus::Delivered => self.delivered_at = Some(now),
            OrderStatus::Cancelled => self.cancelled_at = Some(now),
            OrderStatus::Pending => {}
        }

        Ok(())
    }

    /// The stop the assigned courier is heading to, if any.
    pub fn current_target(&self) -> Option<(Stop, &Location)> {
        match self.status {
            OrderStatus::Assigned => Some((Stop::Pickup, &self.pickup)),
            OrderStatus::PickedUp => Some((Stop::Dropoff, &self.dropoff)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Stop {
    Pickup,
    Dropoff,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{DeliveryOrder, Location, OrderStatus};
    use crate::models::courier::GeoPoint;

    fn order() -> DeliveryOrder {
        let location = |name: &str, lat: f64, lng: f64| Location {
            name: name.to_string(),
            address: "1 Main St".to_string(),
            point: GeoPoint { lat, lng },
        };

        DeliveryOrder::confirmed(
            Uuid::new_v4(),
            location("Kitchen", 40.0, -73.0),
            location("Home", 40.01, -73.01),
            1299,
            2.4,
            Utc::now(),
        )
    }

    #[test]
    fn follows_the_happy_path() {
        let mut order = order();
        let now = Utc::now();

        order.transition(OrderStatus::Assigned, now).unwrap();
        order.transition(OrderStatus::PickedUp, now).unwrap();
        order.transition(OrderStatus::Delivered, now).unwrap();

        assert_eq!(order.status, OrderStatus::Delivered);
        assert!(order.delivered_at.is_some());
    }

    #[test]
    fn cannot_skip_pickup() {
        let mut order = order();
        let now = Utc::now();

        order.transition(OrderStatus::Assigned, now).unwrap();
        assert!(order.transition(OrderStatus::Delivered, now).is_err());
        assert_eq!(order.status, OrderStatus::Assigned);
    }

    #[test]
    fn cancel_is_only_reachable_before_pickup() {
        let mut pending = order();
        pending.transition(OrderStatus::Cancelled, Utc::now()).unwrap();

        let mut picked_up = order();
        picked_up.transition(OrderStatus::Assigned, Utc::now()).unwrap();
        picked_up.transition(OrderStatus::PickedUp, Utc::now()).unwrap();
        assert!(picked_up.transition(OrderStatus::Cancelled, Utc::now()).is_err());
    }

    #[test]
    fn terminal_states_are_immutable() {
        let mut order = order();
        order.transition(OrderStatus::Cancelled, Utc::now()).unwrap();

        for next in [
            OrderStatus::Pending,
            OrderStatus::Assigned,
            OrderStatus::PickedUp,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            assert!(order.transition(next, Utc::now()).is_err());
        }
    }
}
