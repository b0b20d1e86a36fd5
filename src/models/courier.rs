use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CourierStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: Uuid,
    pub name: String,
    pub location: GeoPoint,
    pub status: CourierStatus,
    /// The pending or accepted assignment this courier currently holds.
    pub active_assignment: Option<Uuid>,
    pub last_dropoff_at: Option<DateTime<Utc>>,
    pub location_updated_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Courier {
    pub fn new(name: String, location: GeoPoint, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            location,
            status: CourierStatus::Online,
            active_assignment: None,
            last_dropoff_at: None,
            location_updated_at: now,
            updated_at: now,
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.status == CourierStatus::Online && self.active_assignment.is_none()
    }
}
