use crate::core::Result;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Fixed-capacity pool of admission slots.
///
/// `acquire` waits while every slot is out, which is how the dispatcher gets
/// backpressure. A slot goes back to the pool when its [`AdmissionSlot`] is
/// dropped, whichever way the holder exits.
#[derive(Clone)]
pub struct AdmissionPool {
    name: &'static str,
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

impl AdmissionPool {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<AdmissionSlot> {
        let permit = self.semaphore.clone().acquire_owned().await?;
        Ok(AdmissionSlot { _permit: permit })
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<AdmissionSlot> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| AdmissionSlot { _permit: permit })
    }

    /// Wake every waiter with [`crate::core::WorkloadError::PoolClosed`] and
    /// refuse further acquisitions. Held slots stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn stats(&self) -> AdmissionStats {
        let available = self.semaphore.available_permits();
        AdmissionStats {
            name: self.name,
            capacity: self.capacity,
            in_flight: self.capacity.saturating_sub(available),
            available,
        }
    }
}

/// A held slot. Dropping it releases the slot.
#[must_use = "the slot is released as soon as it is dropped"]
pub struct AdmissionSlot {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionStats {
    pub name: &'static str,
    pub capacity: usize,
    pub in_flight: usize,
    pub available: usize,
}

impl std::fmt::Display for AdmissionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} pool: {}/{} in flight, {} available",
            self.name, self.in_flight, self.capacity, self.available
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::WorkloadError;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let pool = AdmissionPool::new("primary", 2);

        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.in_flight(), 2);
        assert!(pool.try_acquire().is_none());

        drop(a);
        assert_eq!(pool.in_flight(), 1);
        assert!(pool.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_saturated_acquire_blocks_until_release() {
        let pool = AdmissionPool::new("primary", 1);
        let held = pool.acquire().await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(blocked.is_err());

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(held);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_close_fails_waiters() {
        let pool = AdmissionPool::new("rotation", 1);
        let _held = pool.acquire().await.unwrap();
        pool.close();
        assert!(matches!(pool.acquire().await, Err(WorkloadError::PoolClosed)));
    }

    async fn hold_and_panic(slot: AdmissionSlot) {
        let _slot = slot;
        panic!("worker failure");
    }

    #[tokio::test]
    async fn test_slot_released_when_task_panics() {
        let pool = AdmissionPool::new("primary", 1);
        let slot = pool.acquire().await.unwrap();
        let handle = tokio::spawn(hold_and_panic(slot));
        assert!(handle.await.unwrap_err().is_panic());
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_stats_display() {
        let pool = AdmissionPool::new("primary", 50);
        let _slot = pool.try_acquire().unwrap();
        assert_eq!(pool.stats().to_string(), "primary pool: 1/50 in flight, 49 available");
    }
}
