use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    Bank,
    CashApp,
    PayPal,
    Venmo,
    Zelle,
    Card,
}

impl PaymentType {
    pub const ALL: [PaymentType; 6] = [
        PaymentType::Bank,
        PaymentType::CashApp,
        PaymentType::PayPal,
        PaymentType::Venmo,
        PaymentType::Zelle,
        PaymentType::Card,
    ];

    /// Rails with an API we can push money through. The others have to be
    /// paid by an operator.
    pub fn supports_push_payout(self) -> bool {
        !matches!(self, PaymentType::Venmo | PaymentType::Zelle)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentType::Bank => "bank",
            PaymentType::CashApp => "cashapp",
            PaymentType::PayPal => "paypal",
            PaymentType::Venmo => "venmo",
            PaymentType::Zelle => "zelle",
            PaymentType::Card => "card",
        }
    }

    pub fn normalize_identifier(self, identifier: &str) -> String {
        let identifier = identifier.trim();
        match self {
            PaymentType::CashApp if !identifier.starts_with('$') => format!("${identifier}"),
            PaymentType::Venmo if !identifier.starts_with('@') => format!("@{identifier}"),
            _ => identifier.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub courier_id: Uuid,
    pub payment_type: PaymentType,
    pub account_identifier: String,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BatchStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutBatch {
    pub id: Uuid,
    pub settlement_date: NaiveDate,
    pub status: BatchStatus,
    pub total_amount_cents: i64,
    pub total_couriers: usize,
    pub successful_payouts: usize,
    pub failed_payouts: usize,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PayoutStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierPayout {
    pub id: Uuid,
    /// `None` for ad-hoc payouts made outside the daily cycle.
    pub batch_id: Option<Uuid>,
    pub courier_id: Uuid,
    pub payment_method_id: Uuid,
    pub payment_type: PaymentType,
    pub account_identifier: String,
    pub amount_cents: i64,
    pub status: PayoutStatus,
    pub external_transaction_id: Option<String>,
    pub error_message: Option<String>,
    /// Set when the last failure can be fixed by simply trying again.
    pub retryable: bool,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl CourierPayout {
    pub fn pending(
        batch_id: Option<Uuid>,
        method: &PaymentMethod,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id,
            courier_id: method.courier_id,
            payment_method_id: method.id,
            payment_type: method.payment_type,
            account_identifier: method.account_identifier.clone(),
            amount_cents,
            status: PayoutStatus::Pending,
            external_transaction_id: None,
            error_message: None,
            retryable: false,
            attempts: 0,
            created_at: now,
            processed_at: None,
        }
    }

    /// Pending payouts, and failures on a push rail that may succeed on a
    /// later run.
    pub fn awaiting_transfer(&self) -> bool {
        match self.status {
            PayoutStatus::Pending => true,
            PayoutStatus::Failed => self.retryable,
            PayoutStatus::Completed => false,
        }
    }
}
