use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, Mutex};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::locks::OrderLocks;
use crate::engine::selection::{CourierSelector, NearestIdleSelector};
use crate::models::assignment::OrderAssignment;
use crate::models::courier::Courier;
use crate::models::earning::EarningRecord;
use crate::models::event::EngineEvent;
use crate::models::order::DeliveryOrder;
use crate::models::payout::{CourierPayout, PaymentMethod, PayoutBatch};
use crate::observability::metrics::Metrics;
use crate::payout::provider::ProviderRegistry;

pub struct AppState {
    pub config: Config,
    pub couriers: DashMap<Uuid, Courier>,
    pub orders: DashMap<Uuid, DeliveryOrder>,
    pub assignments: DashMap<Uuid, OrderAssignment>,
    /// order id -> the single pending or accepted assignment holding it
    pub active_assignments: DashMap<Uuid, Uuid>,
    pub order_locks: OrderLocks,
    /// keyed by order id
    pub earnings: DashMap<Uuid, EarningRecord>,
    pub payment_methods: DashMap<Uuid, PaymentMethod>,
    pub batches: DashMap<Uuid, PayoutBatch>,
    pub batch_by_date: DashMap<NaiveDate, Uuid>,
    pub payouts: DashMap<Uuid, CourierPayout>,
    pub settlement_lock: Mutex<()>,
    pub providers: ProviderRegistry,
    pub selector: Arc<dyn CourierSelector>,
    pub order_tx: mpsc::Sender<Uuid>,
    pub events_tx: broadcast::Sender<EngineEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config, providers: ProviderRegistry) -> (Self, mpsc::Receiver<Uuid>) {
        let (order_tx, order_rx) = mpsc::channel(config.order_queue_size);
        let (events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size);

        (
            Self {
                config,
                couriers: DashMap::new(),
                orders: DashMap::new(),
                assignments: DashMap::new(),
                active_assignments: DashMap::new(),
                order_locks: OrderLocks::new(),
                earnings: DashMap::new(),
                payment_methods: DashMap::new(),
                batches: DashMap::new(),
                batch_by_date: DashMap::new(),
                payouts: DashMap::new(),
                settlement_lock: Mutex::new(()),
                providers,
                selector: Arc::new(NearestIdleSelector),
                order_tx,
                events_tx,
                metrics: Metrics::new(),
            },
            order_rx,
        )
    }

    pub fn with_selector(mut self, selector: Arc<dyn CourierSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn publish(&self, event: EngineEvent) {
        // no subscribers is fine
        let _ = self.events_tx.send(event);
    }
}
