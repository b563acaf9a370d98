//! Warm pool of sandbox slots with a bounded wait queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::SandboxError;

/// Caps concurrent sessions at the pool size; callers beyond the queue
/// limit fail fast with `Overloaded` instead of waiting unboundedly.
#[derive(Debug)]
pub struct SandboxPool {
    slots: Arc<Semaphore>,
    queue_limit: usize,
    waiting: Arc<AtomicUsize>,
}

/// Holding one of these is the right to run a session; dropping it frees
/// the slot.
#[derive(Debug)]
pub struct PoolSlot {
    _permit: OwnedSemaphorePermit,
}

impl SandboxPool {
    #[must_use]
    pub fn new(capacity: usize, queue_limit: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            queue_limit,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Take a slot, waiting in the bounded queue when the pool is busy.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Overloaded`] when the queue is full.
    pub async fn acquire(&self) -> Result<PoolSlot, SandboxError> {
        if let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() {
            return Ok(PoolSlot { _permit: permit });
        }
        if self.waiting.load(Ordering::Acquire) >= self.queue_limit {
            tracing::warn!("sandbox pool saturated, failing fast");
            return Err(SandboxError::Overloaded);
        }
        self.waiting.fetch_add(1, Ordering::AcqRel);
        let result = Arc::clone(&self.slots).acquire_owned().await;
        self.waiting.fetch_sub(1, Ordering::AcqRel);
        result
            .map(|permit| PoolSlot { _permit: permit })
            .map_err(|_| SandboxError::Overloaded)
    }

    #[must_use]
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn grants_up_to_capacity() {
        let pool = SandboxPool::new(2, 0);
        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);
        drop(a);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn overflow_fails_fast_with_empty_queue() {
        let pool = SandboxPool::new(1, 0);
        let _held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, SandboxError::Overloaded));
    }

    #[tokio::test]
    async fn queued_caller_gets_the_freed_slot() {
        let pool = Arc::new(SandboxPool::new(1, 1));
        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);
        let slot = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(slot.is_ok());
    }

    #[tokio::test]
    async fn queue_limit_bounds_waiters() {
        let pool = Arc::new(SandboxPool::new(1, 1));
        let _held = pool.acquire().await.unwrap();
        let _waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, SandboxError::Overloaded));
    }
}
