use std::cmp::Ordering;

use serde::Serialize;
use uuid::Uuid;

use crate::geo::haversine_m;
use crate::models::courier::Courier;
use crate::models::order::DeliveryOrder;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub courier_id: Uuid,
    pub distance_m: f64,
}

/// Ranks couriers for an order, best first. Implementations only order the
/// couriers they are handed; eligibility is checked by the dispatcher.
pub trait CourierSelector: Send + Sync {
    fn rank(&self, order: &DeliveryOrder, couriers: &[Courier]) -> Vec<Candidate>;
}

/// Nearest courier to the pickup wins. Couriers at the same distance (to the
/// metre) are ordered by how long they have been idle.
#[derive(Debug, Default, Clone, Copy)]
pub struct NearestIdleSelector;

impl CourierSelector for NearestIdleSelector {
    fn rank(&self, order: &DeliveryOrder, couriers: &[Courier]) -> Vec<Candidate> {
        let mut ranked: Vec<(&Courier, f64)> = couriers
            .iter()
            .map(|courier| (courier, haversine_m(&courier.location, &order.pickup.point)))
            .collect();

        ranked.sort_by(|(a, a_dist), (b, b_dist)| {
            a_dist
                .round()
                .total_cmp(&b_dist.round())
                .then_with(|| idle_order(a, b))
        });

        ranked
            .into_iter()
            .map(|(courier, distance_m)| Candidate {
                courier_id: courier.id,
                distance_m,
            })
            .collect()
    }
}

// A courier that has never dropped off counts as idle the longest.
fn idle_order(a: &Courier, b: &Courier) -> Ordering {
    match (a.last_dropoff_at, b.last_dropoff_at) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a_at), Some(b_at)) => a_at.cmp(&b_at),
    }
}

/// Online couriers without an active assignment who have not already let
/// this order lapse.
pub fn eligible_couriers(state: &AppState, order: &DeliveryOrder) -> Vec<Courier> {
    state
        .couriers
        .iter()
        .filter_map(|entry| {
            let courier = entry.value();
            let excluded = order.excluded_couriers.contains(&courier.id);

            if courier.is_eligible() && !excluded {
                Some(courier.clone())
            } else {
                None
            }
        })
        .collect()
}

/// Free couriers this order has already been offered to without success.
pub fn idle_excluded_couriers(state: &AppState, order: &DeliveryOrder) -> usize {
    order
        .excluded_couriers
        .iter()
        .filter(|id| {
            state
                .couriers
                .get(*id)
                .is_some_and(|courier| courier.is_eligible())
        })
        .count()
}
