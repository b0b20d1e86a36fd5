#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use delivery_engine::config::{Config, ProviderCredentials, Secret};
use delivery_engine::engine::delivery::{confirm_order, OrderConfirmed};
use delivery_engine::models::courier::{Courier, CourierStatus, GeoPoint};
use delivery_engine::models::order::{DeliveryOrder, Location};
use delivery_engine::models::payout::{PaymentMethod, PaymentType};
use delivery_engine::payout::provider::{
    PayoutProvider, ProviderRegistry, TransferError, TransferReceipt, TransferRequest,
};
use delivery_engine::state::AppState;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const PICKUP: (f64, f64) = (40.7128, -74.0060);
pub const DROPOFF: (f64, f64) = (40.7306, -73.9866);

pub fn credentials() -> ProviderCredentials {
    ProviderCredentials {
        bank_api_key: Some(Secret::new("bank-key".to_string())),
        cashapp_api_key: Some(Secret::new("cashapp-key".to_string())),
        paypal_api_key: Some(Secret::new("paypal-key".to_string())),
        card_api_key: Some(Secret::new("card-key".to_string())),
    }
}

pub fn setup_with(config: Config, providers: ProviderRegistry) -> (Arc<AppState>, mpsc::Receiver<Uuid>) {
    let (state, rx) = AppState::new(config, providers);
    (Arc::new(state), rx)
}

pub fn setup() -> (Arc<AppState>, mpsc::Receiver<Uuid>) {
    setup_with(Config::default(), ProviderRegistry::from_credentials(&credentials()))
}

pub fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, hour, minute, second).unwrap()
}

pub fn location(name: &str, (lat, lng): (f64, f64)) -> Location {
    Location {
        name: name.to_string(),
        address: format!("{name}, New York, NY"),
        point: GeoPoint { lat, lng },
    }
}

/// A point `metres` north of `origin`.
pub fn north_of((lat, lng): (f64, f64), metres: f64) -> GeoPoint {
    GeoPoint {
        lat: lat + metres / 111_194.9,
        lng,
    }
}

pub fn add_courier(state: &AppState, name: &str, position: GeoPoint) -> Uuid {
    let courier = Courier::new(name.to_string(), position, at(8, 0, 0));
    let id = courier.id;
    state.couriers.insert(id, courier);
    id
}

pub fn set_offline(state: &AppState, courier_id: Uuid) {
    if let Some(mut courier) = state.couriers.get_mut(&courier_id) {
        courier.status = CourierStatus::Offline;
    }
}

pub fn add_primary_method(
    state: &AppState,
    courier_id: Uuid,
    payment_type: PaymentType,
    identifier: &str,
) -> PaymentMethod {
    let method = PaymentMethod {
        id: Uuid::new_v4(),
        courier_id,
        payment_type,
        account_identifier: payment_type.normalize_identifier(identifier),
        is_primary: true,
        created_at: at(8, 0, 0),
    };
    state.payment_methods.insert(method.id, method.clone());
    method
}

pub async fn confirm(state: &AppState, payout_cents: i64, now: DateTime<Utc>) -> DeliveryOrder {
    confirm_order(
        state,
        OrderConfirmed {
            order_id: None,
            pickup: location("Joe's Pizza", PICKUP),
            dropoff: location("Apartment 4B", DROPOFF),
            payout_cents,
            distance_km: 2.4,
        },
        now,
    )
    .await
    .unwrap()
}

/// Provider double that always rejects with the given text.
pub struct RejectingRail {
    pub payment_type: PaymentType,
    pub message: String,
    pub calls: AtomicUsize,
}

impl RejectingRail {
    pub fn new(payment_type: PaymentType, message: &str) -> Self {
        Self {
            payment_type,
            message: message.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PayoutProvider for RejectingRail {
    fn payment_type(&self) -> PaymentType {
        self.payment_type
    }

    async fn transfer(&self, _request: &TransferRequest) -> Result<TransferReceipt, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TransferError::Rejected(self.message.clone()))
    }
}
