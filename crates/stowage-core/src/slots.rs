use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StowageError};

/// Fixed-capacity pool of upload tokens shared by every holder of a clone.
///
/// Acquisition order is not guaranteed to be FIFO.
#[derive(Debug, Clone)]
pub struct UploadSlots {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl UploadSlots {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tokens currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a token; it is returned to the pool when the permit drops.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StowageError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| StowageError::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn permits_return_on_drop() {
        let slots = UploadSlots::new(2);
        let cancel = CancellationToken::new();

        let a = slots.acquire(&cancel).await.unwrap();
        let _b = slots.acquire(&cancel).await.unwrap();
        assert_eq!(slots.available(), 0);

        drop(a);
        assert_eq!(slots.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_acquire_is_cancellable() {
        let slots = UploadSlots::new(1);
        let cancel = CancellationToken::new();
        let _held = slots.acquire(&cancel).await.unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        assert!(matches!(
            slots.acquire(&cancel).await,
            Err(StowageError::Cancelled)
        ));
    }

    #[test]
    fn capacity_is_at_least_one() {
        assert_eq!(UploadSlots::new(0).capacity(), 1);
    }
}
