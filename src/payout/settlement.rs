use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::payout::{CourierPayout, PayoutBatch, PayoutStatus};
use crate::payout::aggregator::{aggregate, batch_payouts, Aggregation, ExcludedCourier};
use crate::payout::disburser::{disburse_batch, disburse_payout, finalize_batch};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    AlreadyCompleted,
    NothingToSettle,
    Settled,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementReport {
    pub settlement_date: NaiveDate,
    pub outcome: SettlementOutcome,
    pub batch: Option<PayoutBatch>,
    pub attempted: usize,
    pub excluded: Vec<ExcludedCourier>,
    pub payouts: Vec<CourierPayout>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManualPayoutRequest {
    pub courier_id: Uuid,
    pub amount_cents: i64,
    pub payment_method_id: Uuid,
}

/// Aggregates and disburses one settlement date. Only days that have ended
/// can be settled, and only one settlement runs at a time.
pub async fn run_settlement(
    state: &AppState,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<SettlementReport, AppError> {
    let latest = previous_settlement_date(now);
    if date > latest {
        return Err(AppError::BadRequest(format!(
            "{date} is still open; the latest day that can be settled is {latest}"
        )));
    }

    let _guard = state.settlement_lock.lock().await;
    info!(settlement_date = %date, "settlement started");

    let report = match aggregate(state, date, now)? {
        Aggregation::AlreadyCompleted { batch_id } => SettlementReport {
            settlement_date: date,
            outcome: SettlementOutcome::AlreadyCompleted,
            batch: state.batches.get(&batch_id).map(|batch| batch.value().clone()),
            attempted: 0,
            excluded: Vec::new(),
            payouts: batch_payouts(state, batch_id),
        },
        Aggregation::NothingToSettle { excluded } => SettlementReport {
            settlement_date: date,
            outcome: SettlementOutcome::NothingToSettle,
            batch: None,
            attempted: 0,
            excluded,
            payouts: Vec::new(),
        },
        Aggregation::Ready {
            batch_id, excluded, ..
        } => {
            let report = disburse_batch(state, batch_id, now).await?;
            SettlementReport {
                settlement_date: date,
                outcome: SettlementOutcome::Settled,
                batch: Some(report.batch),
                attempted: report.attempted,
                excluded,
                payouts: report.payouts,
            }
        }
    };

    info!(
        settlement_date = %date,
        outcome = ?report.outcome,
        attempted = report.attempted,
        excluded = report.excluded.len(),
        "settlement finished"
    );
    Ok(report)
}

/// The calendar day a run at `now` settles.
pub fn previous_settlement_date(now: DateTime<Utc>) -> NaiveDate {
    (now - Duration::days(1)).date_naive()
}

/// Next time the daily trigger fires, strictly after `now`.
pub fn next_run_at(now: DateTime<Utc>, hour_utc: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour_utc, 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(time).and_utc();

    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

pub async fn run_daily_settlement(state: Arc<AppState>) {
    let hour = state.config.settlement_hour_utc;
    info!(settlement_hour_utc = hour, "daily settlement scheduler started");

    loop {
        let now = Utc::now();
        let fire_at = next_run_at(now, hour);
        let wait = (fire_at - now).to_std().unwrap_or_default();
        sleep(wait).await;

        let now = Utc::now();
        let date = previous_settlement_date(now);
        if let Err(err) = run_settlement(&state, date, now).await {
            error!(settlement_date = %date, error = %err, "daily settlement failed");
        }
    }
}

/// Operator-triggered payout outside the daily cycle, sent immediately. No
/// fee is taken and there is no daily limit.
pub async fn manual_payout(
    state: &AppState,
    request: ManualPayoutRequest,
    now: DateTime<Utc>,
) -> Result<CourierPayout, AppError> {
    if request.amount_cents <= 0 {
        return Err(AppError::BadRequest("amount_cents must be positive".to_string()));
    }

    let method = state
        .payment_methods
        .get(&request.payment_method_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| {
            AppError::NotFound(format!("payment method {} not found", request.payment_method_id))
        })?;

    if method.courier_id != request.courier_id {
        return Err(AppError::BadRequest(format!(
            "payment method {} does not belong to courier {}",
            method.id, request.courier_id
        )));
    }

    state.providers.ensure_ready([method.payment_type])?;

    let payout = CourierPayout::pending(None, &method, request.amount_cents, now);
    state.payouts.insert(payout.id, payout.clone());
    info!(
        payout_id = %payout.id,
        courier_id = %payout.courier_id,
        amount_cents = payout.amount_cents,
        "manual payout requested"
    );

    disburse_payout(state, payout.id, now).await
}

/// Records that an operator paid a failed payout by hand, e.g. over Zelle.
pub async fn mark_settled_manually(
    state: &AppState,
    payout_id: Uuid,
    reference: String,
    now: DateTime<Utc>,
) -> Result<CourierPayout, AppError> {
    if reference.trim().is_empty() {
        return Err(AppError::BadRequest("reference cannot be empty".to_string()));
    }

    let _guard = state.settlement_lock.lock().await;

    let payout = {
        let mut payout = state
            .payouts
            .get_mut(&payout_id)
            .ok_or_else(|| AppError::NotFound(format!("payout {payout_id} not found")))?;

        if payout.status != PayoutStatus::Failed {
            return Err(AppError::Conflict(format!(
                "payout {payout_id} is {:?}, only failed payouts can be settled by hand",
                payout.status
            )));
        }

        payout.status = PayoutStatus::Completed;
        payout.external_transaction_id = Some(reference);
        payout.retryable = false;
        payout.processed_at = Some(now);
        payout.clone()
    };

    info!(payout_id = %payout_id, courier_id = %payout.courier_id, "payout settled manually");

    if let Some(batch_id) = payout.batch_id {
        finalize_batch(state, batch_id, now)?;
    }

    Ok(payout)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::{next_run_at, previous_settlement_date};

    #[test]
    fn settles_the_previous_calendar_day() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();
        assert_eq!(
            previous_settlement_date(now),
            NaiveDate::from_ymd_opt(2026, 2, 28).unwrap()
        );
    }

    #[test]
    fn next_run_is_later_today_or_tomorrow() {
        let before = Utc.with_ymd_and_hms(2026, 3, 1, 1, 30, 0).unwrap();
        assert_eq!(
            next_run_at(before, 2),
            Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap()
        );

        let at = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();
        assert_eq!(
            next_run_at(at, 2),
            Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap()
        );
    }
}
