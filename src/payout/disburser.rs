use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::event::EngineEvent;
use crate::models::payout::{BatchStatus, CourierPayout, PayoutBatch, PayoutStatus};
use crate::payout::aggregator::batch_payouts;
use crate::payout::provider::{TransferError, TransferReceipt, TransferRequest};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch: PayoutBatch,
    /// Transfers attempted in this run.
    pub attempted: usize,
    pub payouts: Vec<CourierPayout>,
}

async fn send(state: &AppState, payout: &CourierPayout) -> Result<TransferReceipt, TransferError> {
    let request = TransferRequest {
        payout_id: payout.id,
        courier_id: payout.courier_id,
        payment_type: payout.payment_type,
        account_identifier: payout.account_identifier.clone(),
        amount_cents: payout.amount_cents,
    };

    let Some(provider) = state.providers.get(payout.payment_type) else {
        return Err(if payout.payment_type.supports_push_payout() {
            TransferError::NotConfigured(payout.payment_type)
        } else {
            TransferError::ManualProcessingRequired(payout.payment_type)
        });
    };

    let limit = state.config.provider_timeout();
    timeout(limit, provider.transfer(&request))
        .await
        .unwrap_or(Err(TransferError::Timeout(limit)))
}

/// Makes a single transfer attempt for one payout and records the result on
/// it. Transfer failures are recorded, not returned.
pub async fn disburse_payout(
    state: &AppState,
    payout_id: Uuid,
    now: DateTime<Utc>,
) -> Result<CourierPayout, AppError> {
    let payout = state
        .payouts
        .get(&payout_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("payout {payout_id} not found")))?;

    if !payout.awaiting_transfer() {
        return Ok(payout);
    }

    let result = send(state, &payout).await;

    let mut updated = payout;
    updated.attempts += 1;
    updated.processed_at = Some(now);
    match result {
        Ok(receipt) => {
            updated.status = PayoutStatus::Completed;
            updated.external_transaction_id = Some(receipt.transaction_id);
            updated.error_message = None;
            updated.retryable = false;

            state.metrics.payouts_total.with_label_values(&["completed"]).inc();
            state
                .metrics
                .payout_amount_cents_total
                .inc_by(updated.amount_cents.max(0) as u64);
            info!(
                payout_id = %updated.id,
                courier_id = %updated.courier_id,
                amount_cents = updated.amount_cents,
                rail = updated.payment_type.as_str(),
                "payout completed"
            );
        }
        Err(err) => {
            updated.status = PayoutStatus::Failed;
            updated.error_message = Some(err.to_string());
            updated.retryable = err.is_retryable();

            state.metrics.payouts_total.with_label_values(&["failed"]).inc();
            warn!(
                payout_id = %updated.id,
                courier_id = %updated.courier_id,
                amount_cents = updated.amount_cents,
                rail = updated.payment_type.as_str(),
                retryable = updated.retryable,
                error = %err,
                "payout failed"
            );
        }
    }

    state.payouts.insert(updated.id, updated.clone());
    Ok(updated)
}

/// Sends every outstanding payout of the batch concurrently, then derives the
/// batch status from all of its payouts.
pub async fn disburse_batch(
    state: &AppState,
    batch_id: Uuid,
    now: DateTime<Utc>,
) -> Result<BatchReport, AppError> {
    if !state.batches.contains_key(&batch_id) {
        return Err(AppError::NotFound(format!("batch {batch_id} not found")));
    }

    let outstanding: Vec<Uuid> = batch_payouts(state, batch_id)
        .into_iter()
        .filter(CourierPayout::awaiting_transfer)
        .map(|payout| payout.id)
        .collect();

    let results = join_all(
        outstanding
            .iter()
            .map(|payout_id| disburse_payout(state, *payout_id, now)),
    )
    .await;
    for result in results {
        if let Err(err) = result {
            warn!(batch_id = %batch_id, error = %err, "payout could not be processed");
        }
    }

    let batch = finalize_batch(state, batch_id, now)?;

    Ok(BatchReport {
        batch,
        attempted: outstanding.len(),
        payouts: batch_payouts(state, batch_id),
    })
}

/// Recomputes the batch's counters and status from its payouts. Completed
/// only when every payout completed.
pub fn finalize_batch(
    state: &AppState,
    batch_id: Uuid,
    now: DateTime<Utc>,
) -> Result<PayoutBatch, AppError> {
    let payouts = batch_payouts(state, batch_id);
    let successful = payouts
        .iter()
        .filter(|payout| payout.status == PayoutStatus::Completed)
        .count();
    let failed = payouts.len() - successful;

    let batch = {
        let mut batch = state
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| AppError::NotFound(format!("batch {batch_id} not found")))?;

        batch.successful_payouts = successful;
        batch.failed_payouts = failed;
        batch.total_couriers = payouts.len();
        batch.total_amount_cents = payouts.iter().map(|payout| payout.amount_cents).sum();
        batch.status = if failed == 0 {
            BatchStatus::Completed
        } else {
            BatchStatus::Failed
        };
        batch.processed_at = Some(now);
        batch.clone()
    };

    state.publish(EngineEvent::BatchSettled {
        batch_id,
        settlement_date: batch.settlement_date,
        status: batch.status,
        successful_payouts: successful,
        failed_payouts: failed,
    });
    info!(
        batch_id = %batch_id,
        settlement_date = %batch.settlement_date,
        status = ?batch.status,
        successful,
        failed,
        "payout batch finished"
    );

    Ok(batch)
}
