//! Admission control: caps concurrent inference calls.

use std::sync::Arc;
use std::time::Duration;

use ragchat_core::error::{Classify, ErrorKind};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("No inference slot became available within {0:?}")]
    Timeout(Duration),

    #[error("Admission controller is closed")]
    Closed,
}

impl Classify for AdmissionError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) => ErrorKind::AdmissionTimeout,
            Self::Closed => ErrorKind::Internal,
        }
    }
}

/// A held inference slot. Dropping it releases the slot, so every exit path
/// of the guarded work (including cancellation) gives it back.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

/// Counting permit pool shared by every session.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    timeout: Option<Duration>,
}

impl AdmissionController {
    /// `timeout` of `None` waits indefinitely.
    pub fn new(capacity: usize, timeout: Option<Duration>) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            timeout,
        }
    }

    /// Wait for a slot, bounded by the configured timeout.
    pub async fn acquire(&self) -> Result<AdmissionPermit, AdmissionError> {
        self.acquire_with_timeout(self.timeout).await
    }

    pub async fn acquire_with_timeout(
        &self,
        timeout: Option<Duration>,
    ) -> Result<AdmissionPermit, AdmissionError> {
        let acquire = Arc::clone(&self.semaphore).acquire_owned();

        let permit = match timeout {
            Some(limit) => match tokio::time::timeout(limit, acquire).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        capacity = self.capacity,
                        timeout_ms = limit.as_millis() as u64,
                        "Admission timed out; inference capacity exhausted"
                    );
                    return Err(AdmissionError::Timeout(limit));
                }
            },
            None => acquire.await,
        }
        .map_err(|_| AdmissionError::Closed)?;

        debug!(in_flight = self.in_flight(), capacity = self.capacity, "Admission granted");
        Ok(AdmissionPermit { _permit: permit })
    }

    /// Give a slot back. Equivalent to dropping the permit.
    pub fn release(&self, permit: AdmissionPermit) {
        drop(permit);
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn acquire_up_to_capacity() {
        let admission = AdmissionController::new(2, None);
        let a = admission.acquire().await.unwrap();
        let _b = admission.acquire().await.unwrap();
        assert_eq!(admission.in_flight(), 2);
        assert_eq!(admission.available(), 0);

        admission.release(a);
        assert_eq!(admission.in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn extra_acquire_waits_for_release() {
        let admission = AdmissionController::new(1, None);
        let held = admission.acquire().await.unwrap();

        let waiter = {
            let admission = admission.clone();
            tokio::spawn(async move { admission.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!waiter.is_finished());

        admission.release(held);
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_times_out() {
        let admission = AdmissionController::new(1, Some(Duration::from_secs(5)));
        let _held = admission.acquire().await.unwrap();

        let err = admission.acquire().await.unwrap_err();
        assert_eq!(err, AdmissionError::Timeout(Duration::from_secs(5)));
        assert_eq!(err.kind(), ErrorKind::AdmissionTimeout);
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_leak_a_slot() {
        let admission = AdmissionController::new(1, None);
        let held = admission.acquire().await.unwrap();

        let waiter = {
            let admission = admission.clone();
            tokio::spawn(async move {
                let _permit = admission.acquire().await;
                std::future::pending::<()>().await;
            })
        };
        tokio::task::yield_now().await;
        admission.release(held);
        tokio::task::yield_now().await;
        waiter.abort();
        let _ = waiter.await;

        assert_eq!(admission.available(), 1);
    }

    #[tokio::test]
    async fn concurrent_holders_never_exceed_capacity() {
        let admission = AdmissionController::new(3, None);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let admission = admission.clone();
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _permit = admission.acquire().await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(admission.available(), 3);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        assert_eq!(AdmissionController::new(0, None).capacity(), 1);
    }
}
