mod common;

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use delivery_engine::config::{Config, ProviderCredentials, Secret};
use delivery_engine::engine::delivery::{
    confirm_delivery, confirm_pickup, courier_earnings, update_courier_location,
};
use delivery_engine::engine::dispatch::{accept_assignment, dispatch_order, DispatchOutcome};
use delivery_engine::error::AppError;
use delivery_engine::models::order::{OrderStatus, Stop};
use delivery_engine::models::payout::{BatchStatus, PaymentType, PayoutStatus};
use delivery_engine::payout::aggregator::ExclusionReason;
use delivery_engine::payout::provider::ProviderRegistry;
use delivery_engine::payout::settlement::{
    manual_payout, mark_settled_manually, run_settlement, ManualPayoutRequest, SettlementOutcome,
};
use delivery_engine::state::AppState;
use uuid::Uuid;

use common::{
    add_courier, add_primary_method, at, confirm, credentials, north_of, setup, setup_with,
    RejectingRail, DROPOFF, PICKUP,
};

fn settlement_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
}

fn next_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 11, 2, 0, 0).unwrap()
}

/// Runs one order from confirmation to delivery for `courier_id`, who must be
/// the only idle courier.
async fn deliver(state: &Arc<AppState>, courier_id: Uuid, payout_cents: i64, now: DateTime<Utc>) -> Uuid {
    let order = confirm(state, payout_cents, now).await;
    let assignment = match dispatch_order(state, order.id, now).await.unwrap() {
        DispatchOutcome::Offered(assignment) => assignment,
        other => panic!("expected an offer, got {other:?}"),
    };
    assert_eq!(assignment.courier_id, courier_id);

    accept_assignment(state, assignment.id, courier_id, now + Duration::seconds(5))
        .await
        .unwrap();
    confirm_pickup(state, order.id, courier_id, None, now + Duration::minutes(10))
        .await
        .unwrap();
    confirm_delivery(state, order.id, courier_id, now + Duration::minutes(25))
        .await
        .unwrap();
    order.id
}

#[tokio::test]
async fn delivered_order_is_paid_out_the_next_day() {
    let (state, _rx) = setup();
    let courier = add_courier(&state, "Dana", north_of(PICKUP, 120.0));
    add_primary_method(&state, courier, PaymentType::CashApp, "dana");
    let now = at(18, 0, 0);

    let order = confirm(&state, 1299, now).await;
    let DispatchOutcome::Offered(assignment) = dispatch_order(&state, order.id, now).await.unwrap() else {
        panic!("expected an offer");
    };
    accept_assignment(&state, assignment.id, courier, now + Duration::seconds(8))
        .await
        .unwrap();
    confirm_pickup(&state, order.id, courier, None, now + Duration::minutes(9))
        .await
        .unwrap();

    // Far from the dropoff: no prompt yet.
    let en_route = update_courier_location(&state, courier, north_of(DROPOFF, 1_500.0), now + Duration::minutes(15))
        .await
        .unwrap();
    let report = en_route.proximity.unwrap();
    assert_eq!(report.stop, Stop::Dropoff);
    assert!(!report.prompt_confirmation);

    let arrived = update_courier_location(&state, courier, north_of(DROPOFF, 40.0), now + Duration::minutes(20))
        .await
        .unwrap();
    let report = arrived.proximity.unwrap();
    assert!(report.arrived);
    assert!(report.prompt_confirmation);
    assert_eq!(report.order_status, OrderStatus::PickedUp);

    let delivered = confirm_delivery(&state, order.id, courier, now + Duration::minutes(21))
        .await
        .unwrap();
    assert_eq!(delivered.status, OrderStatus::Delivered);

    let earnings = courier_earnings(&state, courier);
    assert_eq!(earnings.len(), 1);
    assert_eq!(earnings[0].amount_cents, 1299);

    let report = run_settlement(&state, settlement_day(), next_morning()).await.unwrap();
    assert_eq!(report.outcome, SettlementOutcome::Settled);
    assert_eq!(report.payouts.len(), 1);

    let payout = &report.payouts[0];
    assert_eq!(payout.courier_id, courier);
    assert_eq!(payout.amount_cents, 1299);
    assert_eq!(payout.account_identifier, "$dana");
    assert_eq!(payout.status, PayoutStatus::Completed);
    assert!(payout.external_transaction_id.is_some());

    let batch = report.batch.unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.total_amount_cents, 1299);
    assert_eq!(batch.successful_payouts, 1);
}

#[tokio::test]
async fn repeated_delivery_confirmation_earns_once() {
    let (state, _rx) = setup();
    let courier = add_courier(&state, "Dana", north_of(PICKUP, 120.0));
    let now = at(12, 0, 0);

    let order_id = deliver(&state, courier, 800, now).await;
    let again = confirm_delivery(&state, order_id, courier, now + Duration::minutes(30))
        .await
        .unwrap();

    assert_eq!(again.status, OrderStatus::Delivered);
    assert_eq!(courier_earnings(&state, courier).len(), 1);
    assert_eq!(state.earnings.len(), 1);
}

#[tokio::test]
async fn one_rejected_transfer_fails_the_batch_without_touching_the_others() {
    let rail = Arc::new(RejectingRail::new(PaymentType::PayPal, "account frozen"));
    let providers = ProviderRegistry::from_credentials(&credentials()).with_provider(rail.clone());
    let (state, _rx) = setup_with(Config::default(), providers);

    let dana = add_courier(&state, "Dana", north_of(PICKUP, 100.0));
    add_primary_method(&state, dana, PaymentType::PayPal, "dana@example.com");
    deliver(&state, dana, 1000, at(10, 0, 0)).await;

    let eli = add_courier(&state, "Eli", north_of(PICKUP, 100.0));
    add_primary_method(&state, eli, PaymentType::Bank, "021000021-1234");
    deliver(&state, eli, 2000, at(11, 0, 0)).await;

    let report = run_settlement(&state, settlement_day(), next_morning()).await.unwrap();
    let batch = report.batch.unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
    assert_eq!(batch.successful_payouts, 1);
    assert_eq!(batch.failed_payouts, 1);

    let failed = report.payouts.iter().find(|p| p.courier_id == dana).unwrap();
    assert_eq!(failed.status, PayoutStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("account frozen"));
    assert!(failed.retryable);

    let paid = report.payouts.iter().find(|p| p.courier_id == eli).unwrap();
    assert_eq!(paid.status, PayoutStatus::Completed);
    let paid_txn = paid.external_transaction_id.clone();

    // The re-run only retries the failed payout.
    let rerun = run_settlement(&state, settlement_day(), next_morning() + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(rerun.attempted, 1);
    assert_eq!(rail.calls(), 2);
    assert_eq!(rerun.payouts.len(), 2);

    let paid = rerun.payouts.iter().find(|p| p.courier_id == eli).unwrap();
    assert_eq!(paid.external_transaction_id, paid_txn);
    assert_eq!(paid.attempts, 1);
}

#[tokio::test]
async fn completed_batch_is_not_paid_twice() {
    let (state, _rx) = setup();
    let courier = add_courier(&state, "Dana", north_of(PICKUP, 100.0));
    add_primary_method(&state, courier, PaymentType::Card, "4242");
    deliver(&state, courier, 1500, at(9, 0, 0)).await;

    let first = run_settlement(&state, settlement_day(), next_morning()).await.unwrap();
    assert_eq!(first.outcome, SettlementOutcome::Settled);

    let second = run_settlement(&state, settlement_day(), next_morning() + Duration::hours(3))
        .await
        .unwrap();
    assert_eq!(second.outcome, SettlementOutcome::AlreadyCompleted);
    assert_eq!(second.attempted, 0);

    assert_eq!(state.batches.len(), 1);
    assert_eq!(state.payouts.len(), 1);
    assert_eq!(second.payouts[0].id, first.payouts[0].id);
}

#[tokio::test]
async fn manual_only_rail_fails_permanently_until_settled_by_hand() {
    let (state, _rx) = setup();
    let courier = add_courier(&state, "Dana", north_of(PICKUP, 100.0));
    add_primary_method(&state, courier, PaymentType::Zelle, "dana@example.com");
    deliver(&state, courier, 1100, at(14, 0, 0)).await;

    let report = run_settlement(&state, settlement_day(), next_morning()).await.unwrap();
    let payout = report.payouts[0].clone();
    assert_eq!(payout.status, PayoutStatus::Failed);
    assert!(!payout.retryable);
    assert_eq!(
        payout.error_message.as_deref(),
        Some("zelle payouts require manual processing")
    );
    assert_eq!(report.batch.unwrap().status, BatchStatus::Failed);

    let rerun = run_settlement(&state, settlement_day(), next_morning() + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(rerun.attempted, 0);
    assert_eq!(state.payouts.get(&payout.id).unwrap().attempts, 1);

    let settled = mark_settled_manually(&state, payout.id, "ZELLE-REF-42".to_string(), next_morning())
        .await
        .unwrap();
    assert_eq!(settled.status, PayoutStatus::Completed);
    assert_eq!(settled.external_transaction_id.as_deref(), Some("ZELLE-REF-42"));

    let batch_id = payout.batch_id.unwrap();
    assert_eq!(
        state.batches.get(&batch_id).unwrap().status,
        BatchStatus::Completed
    );

    let again = mark_settled_manually(&state, payout.id, "ZELLE-REF-43".to_string(), next_morning()).await;
    assert!(matches!(again, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn courier_without_primary_method_is_excluded_and_picked_up_later() {
    let (state, _rx) = setup();
    let courier = add_courier(&state, "Dana", north_of(PICKUP, 100.0));
    deliver(&state, courier, 900, at(16, 0, 0)).await;

    let report = run_settlement(&state, settlement_day(), next_morning()).await.unwrap();
    assert_eq!(report.outcome, SettlementOutcome::NothingToSettle);
    assert_eq!(report.excluded.len(), 1);
    assert_eq!(report.excluded[0].reason, ExclusionReason::NoPrimaryPaymentMethod);
    assert_eq!(report.excluded[0].amount_cents, 900);
    assert!(state.batches.is_empty());

    add_primary_method(&state, courier, PaymentType::Bank, "021000021-9999");
    let rerun = run_settlement(&state, settlement_day(), next_morning() + Duration::hours(5))
        .await
        .unwrap();
    assert_eq!(rerun.outcome, SettlementOutcome::Settled);
    assert_eq!(rerun.payouts.len(), 1);
    assert_eq!(rerun.payouts[0].amount_cents, 900);
}

#[tokio::test]
async fn missing_credentials_abort_the_run_without_writes() {
    let credentials = ProviderCredentials {
        bank_api_key: Some(Secret::new("bank-key".to_string())),
        ..ProviderCredentials::default()
    };
    let (state, _rx) = setup_with(Config::default(), ProviderRegistry::from_credentials(&credentials));

    let courier = add_courier(&state, "Dana", north_of(PICKUP, 100.0));
    add_primary_method(&state, courier, PaymentType::CashApp, "dana");
    deliver(&state, courier, 1200, at(13, 0, 0)).await;

    let result = run_settlement(&state, settlement_day(), next_morning()).await;
    match result {
        Err(AppError::Misconfigured(message)) => assert!(message.contains("cashapp")),
        other => panic!("expected a configuration error, got {other:?}"),
    }

    assert!(state.batches.is_empty());
    assert!(state.payouts.is_empty());
    assert!(state.earnings.iter().all(|earning| earning.batch_id.is_none()));
}

#[tokio::test]
async fn late_earning_for_an_attempted_payout_waits() {
    let rail = Arc::new(RejectingRail::new(PaymentType::PayPal, "insufficient funds"));
    let providers = ProviderRegistry::from_credentials(&credentials()).with_provider(rail);
    let (state, _rx) = setup_with(Config::default(), providers);

    let courier = add_courier(&state, "Dana", north_of(PICKUP, 100.0));
    add_primary_method(&state, courier, PaymentType::PayPal, "dana@example.com");
    deliver(&state, courier, 700, at(10, 0, 0)).await;
    run_settlement(&state, settlement_day(), next_morning()).await.unwrap();

    // Delivered on the same day, but recorded after the first run.
    deliver(&state, courier, 300, at(22, 0, 0)).await;
    let rerun = run_settlement(&state, settlement_day(), next_morning() + Duration::hours(1))
        .await
        .unwrap();

    assert_eq!(rerun.excluded.len(), 1);
    assert_eq!(rerun.excluded[0].reason, ExclusionReason::PayoutAlreadyAttempted);
    assert_eq!(rerun.payouts.len(), 1);
    assert_eq!(rerun.payouts[0].amount_cents, 700);

    // The waiting earning goes out with the following day's batch.
    let following_day = settlement_day().succ_opt().unwrap();
    let next = run_settlement(&state, following_day, next_morning() + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(next.payouts.len(), 1);
    assert_eq!(next.payouts[0].amount_cents, 300);
    assert!(next.excluded.is_empty());
}

#[tokio::test]
async fn manual_payout_is_sent_outside_the_batch() {
    let (state, _rx) = setup();
    let courier = add_courier(&state, "Dana", north_of(PICKUP, 100.0));
    let method = add_primary_method(&state, courier, PaymentType::CashApp, "$dana");

    let payout = manual_payout(
        &state,
        ManualPayoutRequest {
            courier_id: courier,
            amount_cents: 2500,
            payment_method_id: method.id,
        },
        at(15, 0, 0),
    )
    .await
    .unwrap();

    assert_eq!(payout.status, PayoutStatus::Completed);
    assert!(payout.batch_id.is_none());
    assert_eq!(payout.account_identifier, "$dana");
    assert!(state.batches.is_empty());

    let stranger = Uuid::new_v4();
    let result = manual_payout(
        &state,
        ManualPayoutRequest {
            courier_id: stranger,
            amount_cents: 2500,
            payment_method_id: method.id,
        },
        at(15, 0, 0),
    )
    .await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn earnings_left_out_of_a_completed_batch_are_paid_the_next_day() {
    let (state, _rx) = setup();
    let dana = add_courier(&state, "Dana", north_of(PICKUP, 100.0));
    add_primary_method(&state, dana, PaymentType::Bank, "021000021-1111");
    deliver(&state, dana, 500, at(10, 0, 0)).await;

    let eli = add_courier(&state, "Eli", north_of(PICKUP, 100.0));
    deliver(&state, eli, 500, at(11, 0, 0)).await;

    let first = run_settlement(&state, settlement_day(), next_morning()).await.unwrap();
    assert_eq!(first.outcome, SettlementOutcome::Settled);
    assert_eq!(first.batch.unwrap().status, BatchStatus::Completed);
    assert_eq!(first.excluded.len(), 1);
    assert_eq!(first.excluded[0].courier_id, eli);

    add_primary_method(&state, eli, PaymentType::Bank, "021000021-2222");

    // The closed day stays closed.
    let same_day = run_settlement(&state, settlement_day(), next_morning() + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(same_day.outcome, SettlementOutcome::AlreadyCompleted);

    let following_day = settlement_day().succ_opt().unwrap();
    let next = run_settlement(&state, following_day, next_morning() + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(next.outcome, SettlementOutcome::Settled);
    assert_eq!(next.payouts.len(), 1);
    assert_eq!(next.payouts[0].courier_id, eli);
    assert_eq!(next.payouts[0].amount_cents, 500);
    assert_eq!(next.payouts[0].status, PayoutStatus::Completed);

    assert!(state.earnings.iter().all(|earning| earning.batch_id.is_some()));
    let dana_paid: i64 = state
        .payouts
        .iter()
        .filter(|payout| payout.courier_id == dana)
        .map(|payout| payout.amount_cents)
        .sum();
    assert_eq!(dana_paid, 500);
}

#[tokio::test]
async fn a_day_that_has_not_ended_cannot_be_settled() {
    let (state, _rx) = setup();
    let courier = add_courier(&state, "Dana", north_of(PICKUP, 100.0));
    add_primary_method(&state, courier, PaymentType::Bank, "021000021-1111");
    deliver(&state, courier, 500, at(10, 0, 0)).await;

    let result = run_settlement(&state, settlement_day(), at(23, 0, 0)).await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));

    let tomorrow = settlement_day().succ_opt().unwrap();
    let result = run_settlement(&state, tomorrow, next_morning()).await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));

    assert!(state.batches.is_empty());
    assert!(state.earnings.iter().all(|earning| earning.batch_id.is_none()));
}
