use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per order id. Every read-modify-write of an order and its
/// assignments happens while holding the order's guard.
#[derive(Default)]
pub struct OrderLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, order_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(order_id).or_default().clone();
        lock.lock_owned().await
    }

    /// Drops the mutex of a finished order once nobody else holds or waits on it.
    pub fn forget(&self, order_id: Uuid) {
        self.locks
            .remove_if(&order_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use uuid::Uuid;

    use super::OrderLocks;

    #[tokio::test]
    async fn serializes_work_on_the_same_order() {
        let locks = Arc::new(OrderLocks::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let order_id = Uuid::new_v4();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let in_flight = in_flight.clone();
                tokio::spawn(async move {
                    let _guard = locks.acquire(order_id).await;
                    let concurrent = in_flight.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(concurrent, 0);
                    tokio::task::yield_now().await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn forget_keeps_locks_that_are_held() {
        let locks = OrderLocks::new();
        let order_id = Uuid::new_v4();

        let guard = locks.acquire(order_id).await;
        locks.forget(order_id);
        assert_eq!(locks.len(), 1);

        drop(guard);
        locks.forget(order_id);
        assert!(locks.is_empty());
    }
}
