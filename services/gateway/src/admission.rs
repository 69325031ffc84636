//! Process-wide admission control.
//!
//! A counting semaphore that only supports non-blocking acquisition. Callers
//! that cannot get a permit are rejected immediately so overload surfaces as
//! a fast, retryable error instead of a growing queue.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds how many operations may be in flight at once.
#[derive(Debug, Clone)]
pub struct AdmissionLimiter {
    name: &'static str,
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held admission slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionLimiter {
    /// Create a limiter with a fixed capacity.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take a permit if one is free. Never waits.
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| AdmissionPermit { _permit: permit })
    }

    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_up_to_capacity() {
        let limiter = AdmissionLimiter::new("assign", 2);

        let first = limiter.try_acquire();
        let second = limiter.try_acquire();
        assert!(first.is_some());
        assert!(second.is_some());
        assert_eq!(limiter.in_flight(), 2);

        assert!(limiter.try_acquire().is_none());
    }

    #[test]
    fn test_drop_releases() {
        let limiter = AdmissionLimiter::new("assign", 1);

        let permit = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());

        drop(permit);
        assert_eq!(limiter.available(), 1);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn test_clones_share_capacity() {
        let limiter = AdmissionLimiter::new("assign", 1);
        let clone = limiter.clone();

        let _permit = limiter.try_acquire().unwrap();
        assert!(clone.try_acquire().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_exceeds_capacity_under_contention() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let limiter = AdmissionLimiter::new("assign", 3);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let limiter = limiter.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    if let Some(_permit) = limiter.try_acquire() {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(limiter.available(), 3);
    }
}
