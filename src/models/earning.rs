use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a courier is owed for one delivered order. Keyed by order id, so a
/// delivery can only ever be earned once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarningRecord {
    pub order_id: Uuid,
    pub courier_id: Uuid,
    pub amount_cents: i64,
    pub completed_at: DateTime<Utc>,
    /// Set once the earning has been folded into a payout batch.
    pub batch_id: Option<Uuid>,
}

impl EarningRecord {
    pub fn settlement_date(&self) -> NaiveDate {
        self.completed_at.date_naive()
    }
}
