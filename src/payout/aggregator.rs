use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::payout::{
    BatchStatus, CourierPayout, PaymentMethod, PaymentType, PayoutBatch, PayoutStatus,
};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    NoPrimaryPaymentMethod,
    /// The courier's payout in this batch has already been attempted.
    PayoutAlreadyAttempted,
}

/// Earnings left out of a batch. They stay unbatched and are picked up by the
/// next run that can take them: a re-run of the same date while its batch is
/// open, otherwise the following day's batch.
#[derive(Debug, Clone, Serialize)]
pub struct ExcludedCourier {
    pub courier_id: Uuid,
    pub amount_cents: i64,
    pub earnings: usize,
    pub reason: ExclusionReason,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Aggregation {
    AlreadyCompleted {
        batch_id: Uuid,
    },
    NothingToSettle {
        excluded: Vec<ExcludedCourier>,
    },
    Ready {
        batch_id: Uuid,
        new_payouts: usize,
        excluded: Vec<ExcludedCourier>,
    },
}

#[derive(Debug, Default)]
struct CourierTotal {
    amount_cents: i64,
    orders: Vec<Uuid>,
}

pub fn primary_payment_method(state: &AppState, courier_id: Uuid) -> Option<PaymentMethod> {
    state
        .payment_methods
        .iter()
        .find(|entry| entry.value().courier_id == courier_id && entry.value().is_primary)
        .map(|entry| entry.value().clone())
}

pub fn batch_payouts(state: &AppState, batch_id: Uuid) -> Vec<CourierPayout> {
    let mut payouts: Vec<CourierPayout> = state
        .payouts
        .iter()
        .filter(|entry| entry.value().batch_id == Some(batch_id))
        .map(|entry| entry.value().clone())
        .collect();
    payouts.sort_by_key(|payout| payout.courier_id);
    payouts
}

/// Groups the unbatched earnings of `date` by courier and upserts the date's
/// batch with one payout per courier. Earnings of earlier days that were left
/// out of their own batch are carried into this one. Callers hold the
/// settlement lock.
pub fn aggregate(state: &AppState, date: NaiveDate, now: DateTime<Utc>) -> Result<Aggregation, AppError> {
    let existing = state
        .batch_by_date
        .get(&date)
        .and_then(|id| state.batches.get(id.value()).map(|batch| batch.value().clone()));

    if let Some(batch) = &existing {
        if batch.status == BatchStatus::Completed {
            info!(settlement_date = %date, batch_id = %batch.id, "batch already completed");
            return Ok(Aggregation::AlreadyCompleted { batch_id: batch.id });
        }
    }

    let mut totals: BTreeMap<Uuid, CourierTotal> = BTreeMap::new();
    for entry in state.earnings.iter() {
        let earning = entry.value();
        if earning.batch_id.is_none() && earning.settlement_date() <= date {
            let total = totals.entry(earning.courier_id).or_default();
            total.amount_cents += earning.amount_cents;
            total.orders.push(earning.order_id);
        }
    }

    let existing_payouts: BTreeMap<Uuid, CourierPayout> = existing
        .as_ref()
        .map(|batch| {
            batch_payouts(state, batch.id)
                .into_iter()
                .map(|payout| (payout.courier_id, payout))
                .collect()
        })
        .unwrap_or_default();

    // Payment targets are fixed here, not when the money moves.
    let mut included: Vec<(PaymentMethod, CourierTotal, Option<Uuid>)> = Vec::new();
    let mut excluded = Vec::new();
    for (courier_id, total) in totals {
        let amount_cents = total.amount_cents;
        let earnings = total.orders.len();
        let exclude = move |reason| ExcludedCourier {
            courier_id,
            amount_cents,
            earnings,
            reason,
        };

        match existing_payouts.get(&courier_id) {
            Some(payout) if payout.status != PayoutStatus::Pending => {
                excluded.push(exclude(ExclusionReason::PayoutAlreadyAttempted));
            }
            Some(payout) => {
                let method = state
                    .payment_methods
                    .get(&payout.payment_method_id)
                    .map(|entry| entry.value().clone());
                match method {
                    Some(method) => included.push((method, total, Some(payout.id))),
                    None => excluded.push(exclude(ExclusionReason::NoPrimaryPaymentMethod)),
                }
            }
            None => match primary_payment_method(state, courier_id) {
                Some(method) => included.push((method, total, None)),
                None => excluded.push(exclude(ExclusionReason::NoPrimaryPaymentMethod)),
            },
        }
    }

    for courier in &excluded {
        warn!(
            settlement_date = %date,
            courier_id = %courier.courier_id,
            amount_cents = courier.amount_cents,
            reason = ?courier.reason,
            "courier excluded from payout batch"
        );
    }

    if existing.is_none() && included.is_empty() {
        return Ok(Aggregation::NothingToSettle { excluded });
    }

    // Everything this run may push through has to be usable before we write.
    let rails: Vec<PaymentType> = included
        .iter()
        .map(|(method, _, _)| method.payment_type)
        .chain(
            existing_payouts
                .values()
                .filter(|payout| payout.awaiting_transfer())
                .map(|payout| payout.payment_type),
        )
        .collect();
    state.providers.ensure_ready(rails)?;

    let batch_id = match existing {
        Some(batch) => {
            if let Some(mut stored) = state.batches.get_mut(&batch.id) {
                stored.status = BatchStatus::Processing;
            }
            batch.id
        }
        None => {
            let batch = PayoutBatch {
                id: Uuid::new_v4(),
                settlement_date: date,
                status: BatchStatus::Processing,
                total_amount_cents: 0,
                total_couriers: 0,
                successful_payouts: 0,
                failed_payouts: 0,
                created_at: now,
                processed_at: None,
            };
            state.batches.insert(batch.id, batch.clone());
            state.batch_by_date.insert(date, batch.id);
            batch.id
        }
    };

    let mut new_payouts = 0;
    for (method, total, existing_payout) in included {
        match existing_payout {
            Some(payout_id) => {
                if let Some(mut payout) = state.payouts.get_mut(&payout_id) {
                    payout.amount_cents += total.amount_cents;
                }
            }
            None => {
                let payout = CourierPayout::pending(Some(batch_id), &method, total.amount_cents, now);
                state.payouts.insert(payout.id, payout);
                new_payouts += 1;
            }
        }

        for order_id in &total.orders {
            if let Some(mut earning) = state.earnings.get_mut(order_id) {
                earning.batch_id = Some(batch_id);
            }
        }
    }

    let payouts = batch_payouts(state, batch_id);
    if let Some(mut batch) = state.batches.get_mut(&batch_id) {
        batch.total_amount_cents = payouts.iter().map(|payout| payout.amount_cents).sum();
        batch.total_couriers = payouts.len();
    }

    info!(
        settlement_date = %date,
        batch_id = %batch_id,
        couriers = payouts.len(),
        new_payouts,
        excluded = excluded.len(),
        "payout batch aggregated"
    );

    Ok(Aggregation::Ready {
        batch_id,
        new_payouts,
        excluded,
    })
}
