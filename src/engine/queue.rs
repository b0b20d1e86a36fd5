use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// Hands an order id to the dispatch loop. The queue carries ids only; the
/// loop always reads the current order from state.
pub async fn enqueue_order(state: &AppState, order_id: Uuid) -> Result<(), AppError> {
    state
        .order_tx
        .send(order_id)
        .await
        .map_err(|err| AppError::Internal(format!("dispatch queue closed: {err}")))?;

    state.metrics.orders_in_queue.inc();
    debug!(order_id = %order_id, "order queued for dispatch");
    Ok(())
}

/// Puts the order back on the queue once `delay` has passed.
pub fn requeue_after(state: Arc<AppState>, order_id: Uuid, delay: Duration) {
    tokio::spawn(async move {
        sleep(delay).await;
        if let Err(err) = enqueue_order(&state, order_id).await {
            error!(order_id = %order_id, error = %err, "failed to re-queue order");
        }
    });
}
