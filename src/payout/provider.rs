use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{ProviderCredentials, Secret};
use crate::error::AppError;
use crate::models::payout::PaymentType;

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub payout_id: Uuid,
    pub courier_id: Uuid,
    pub payment_type: PaymentType,
    pub account_identifier: String,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferReceipt {
    pub transaction_id: String,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransferError {
    /// Provider error text, kept verbatim for operators.
    #[error("{0}")]
    Rejected(String),

    #[error("{} payouts require manual processing", .0.as_str())]
    ManualProcessingRequired(PaymentType),

    #[error("provider did not respond within {0:?}")]
    Timeout(Duration),

    #[error("no payout provider configured for {}", .0.as_str())]
    NotConfigured(PaymentType),
}

impl TransferError {
    /// Whether a later run may succeed without anyone changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Rejected(_) | TransferError::Timeout(_))
    }
}

/// One external payment rail.
#[async_trait]
pub trait PayoutProvider: Send + Sync {
    fn payment_type(&self) -> PaymentType;

    /// False when credentials the rail needs are missing.
    fn is_configured(&self) -> bool {
        true
    }

    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, TransferError>;
}

/// Push-payout rail backed by an API key. Until a real client is wired for a
/// rail it settles every well-formed transfer and mints a transaction id.
pub struct ApiRail {
    payment_type: PaymentType,
    api_key: Option<Secret<String>>,
}

impl ApiRail {
    pub fn new(payment_type: PaymentType, api_key: Option<Secret<String>>) -> Self {
        Self {
            payment_type,
            api_key,
        }
    }
}

#[async_trait]
impl PayoutProvider for ApiRail {
    fn payment_type(&self) -> PaymentType {
        self.payment_type
    }

    fn is_configured(&self) -> bool {
        self.api_key
            .as_ref()
            .is_some_and(|key| !key.reveal().is_empty())
    }

    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, TransferError> {
        if !self.is_configured() {
            return Err(TransferError::NotConfigured(self.payment_type));
        }
        if request.amount_cents <= 0 {
            return Err(TransferError::Rejected(format!(
                "invalid amount: {} cents",
                request.amount_cents
            )));
        }
        if request.account_identifier.trim().is_empty() {
            return Err(TransferError::Rejected("invalid account identifier".to_string()));
        }

        Ok(TransferReceipt {
            transaction_id: format!("{}_{}", self.payment_type.as_str(), Uuid::new_v4().simple()),
        })
    }
}

/// Rail with no push-payout API. Every transfer fails at once and stays
/// failed until an operator pays it by hand.
pub struct ManualOnlyRail {
    payment_type: PaymentType,
}

impl ManualOnlyRail {
    pub fn new(payment_type: PaymentType) -> Self {
        Self { payment_type }
    }
}

#[async_trait]
impl PayoutProvider for ManualOnlyRail {
    fn payment_type(&self) -> PaymentType {
        self.payment_type
    }

    async fn transfer(&self, _request: &TransferRequest) -> Result<TransferReceipt, TransferError> {
        Err(TransferError::ManualProcessingRequired(self.payment_type))
    }
}

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<PaymentType, Arc<dyn PayoutProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_credentials(credentials: &ProviderCredentials) -> Self {
        Self::new()
            .with_provider(Arc::new(ApiRail::new(
                PaymentType::Bank,
                credentials.bank_api_key.clone(),
            )))
            .with_provider(Arc::new(ApiRail::new(
                PaymentType::CashApp,
                credentials.cashapp_api_key.clone(),
            )))
            .with_provider(Arc::new(ApiRail::new(
                PaymentType::PayPal,
                credentials.paypal_api_key.clone(),
            )))
            .with_provider(Arc::new(ApiRail::new(
                PaymentType::Card,
                credentials.card_api_key.clone(),
            )))
            .with_provider(Arc::new(ManualOnlyRail::new(PaymentType::Venmo)))
            .with_provider(Arc::new(ManualOnlyRail::new(PaymentType::Zelle)))
    }

    pub fn with_provider(mut self, provider: Arc<dyn PayoutProvider>) -> Self {
        self.providers.insert(provider.payment_type(), provider);
        self
    }

    pub fn get(&self, payment_type: PaymentType) -> Option<Arc<dyn PayoutProvider>> {
        self.providers.get(&payment_type).cloned()
    }

    /// Fails if any push rail in `payment_types` has no usable provider.
    /// Manual-only rails never block a run.
    pub fn ensure_ready<I>(&self, payment_types: I) -> Result<(), AppError>
    where
        I: IntoIterator<Item = PaymentType>,
    {
        let mut missing: Vec<&'static str> = payment_types
            .into_iter()
            .filter(|kind| kind.supports_push_payout())
            .filter(|kind| !self.get(*kind).is_some_and(|provider| provider.is_configured()))
            .map(PaymentType::as_str)
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        missing.sort_unstable();
        missing.dedup();
        Err(AppError::Misconfigured(format!(
            "missing payout provider credentials for: {}",
            missing.join(", ")
        )))
    }
}
