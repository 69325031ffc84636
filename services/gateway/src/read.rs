//! Read-only queries served straight from the store.
//!
//! Reads bypass the batch actors: each call loads its own snapshot, so they
//! never wait behind mutations and may observe a state one batch old.

use qsched_id::{RequestId, SchedulerId};
use rand::Rng;
use tracing::{debug, instrument};

use crate::collaborators::{Backend, Snapshot, StoreError};
use crate::model::Cancellation;

/// Per-item probabilities used when sampling callback hints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingRates {
    /// Probability of including each waiting request.
    pub waiting: f64,
    /// Probability of including each running request.
    pub running: f64,
}

impl SamplingRates {
    pub fn new(waiting: f64, running: f64) -> Self {
        Self {
            waiting: clamp_probability(waiting),
            running: clamp_probability(running),
        }
    }
}

impl Default for SamplingRates {
    fn default() -> Self {
        Self {
            waiting: 0.01,
            running: 0.05,
        }
    }
}

fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

/// Serves cancellations and callback hints.
pub struct ReadPath<S> {
    backend: Backend<S>,
    rates: SamplingRates,
}

impl<S: Snapshot> ReadPath<S> {
    pub fn new(backend: Backend<S>, rates: SamplingRates) -> Self {
        Self { backend, rates }
    }

    /// Assignments the reconciler says should no longer run.
    #[instrument(skip_all, fields(scheduler_id = %scheduler_id))]
    pub async fn get_cancellations(
        &self,
        scheduler_id: &SchedulerId,
    ) -> Result<Vec<Cancellation>, StoreError> {
        let snapshot = self.backend.store().load(scheduler_id).await?;
        let cancellations = self.backend.reconciler().cancellations(&snapshot);
        debug!(count = cancellations.len(), "Computed cancellations");
        Ok(cancellations)
    }

    /// A random sample of request ids the caller should re-notify.
    #[instrument(skip_all, fields(scheduler_id = %scheduler_id))]
    pub async fn get_callback_hints(
        &self,
        scheduler_id: &SchedulerId,
    ) -> Result<Vec<RequestId>, StoreError> {
        let snapshot = self.backend.store().load(scheduler_id).await?;
        let hints = sample_callbacks(&snapshot, self.rates, &mut rand::rng());
        debug!(count = hints.len(), "Sampled callback hints");
        Ok(hints)
    }
}

/// Independently include each waiting and running request with its rate.
pub fn sample_callbacks<S, R>(snapshot: &S, rates: SamplingRates, rng: &mut R) -> Vec<RequestId>
where
    S: Snapshot + ?Sized,
    R: Rng + ?Sized,
{
    let mut hints = Vec::new();
    for id in snapshot.waiting_requests() {
        if rng.random_bool(rates.waiting) {
            hints.push(id.clone());
        }
    }
    for id in snapshot.running_requests() {
        if rng.random_bool(rates.running) {
            hints.push(id.clone());
        }
    }
    hints
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use qsched_id::WorkerId;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::collaborators::memory::{
        memory_backend, MemoryStore, RunningRequest, SchedulerState, WaitingRequest,
    };
    use crate::collaborators::NodeStore;

    fn state(waiting: usize, running: usize) -> SchedulerState {
        let now = Utc::now();
        let mut state = SchedulerState::default();
        for i in 0..waiting {
            state.waiting.insert(
                RequestId::parse(&format!("wait-{i}")).unwrap(),
                WaitingRequest {
                    account_id: None,
                    labels: Default::default(),
                    enqueued_time: now,
                },
            );
        }
        for i in 0..running {
            state.running.insert(
                RequestId::parse(&format!("run-{i}")).unwrap(),
                RunningRequest {
                    worker_id: WorkerId::parse(&format!("bot-{i}")).unwrap(),
                    account_id: None,
                    assigned_time: now,
                },
            );
        }
        state
    }

    #[test]
    fn test_rates_are_clamped() {
        let rates = SamplingRates::new(-0.5, 7.0);
        assert_eq!(rates.waiting, 0.0);
        assert_eq!(rates.running, 1.0);
        assert_eq!(SamplingRates::new(f64::NAN, 0.2).waiting, 0.0);
    }

    #[test]
    fn test_empty_state_has_no_hints() {
        let mut rng = StdRng::seed_from_u64(7);
        let hints =
            sample_callbacks(&SchedulerState::default(), SamplingRates::default(), &mut rng);
        assert!(hints.is_empty());
    }

    #[test]
    fn test_full_rates_return_everything() {
        let mut rng = StdRng::seed_from_u64(7);
        let hints = sample_callbacks(&state(3, 2), SamplingRates::new(1.0, 1.0), &mut rng);
        assert_eq!(hints.len(), 5);
    }

    #[test]
    fn test_sampling_converges_to_rates() {
        let mut rng = StdRng::seed_from_u64(42);
        let snapshot = state(10_000, 10_000);
        let hints = sample_callbacks(&snapshot, SamplingRates::default(), &mut rng);

        let waiting = hints.iter().filter(|id| id.as_str().starts_with("wait-")).count();
        let running = hints.iter().filter(|id| id.as_str().starts_with("run-")).count();

        // 1% of 10k = 100 (sd ~10), 5% of 10k = 500 (sd ~22).
        assert!((50..=150).contains(&waiting), "waiting sampled {waiting}");
        assert!((400..=600).contains(&running), "running sampled {running}");
    }

    #[tokio::test]
    async fn test_read_path_loads_from_store() {
        let store = Arc::new(MemoryStore::new());
        let id = SchedulerId::parse("sched-1").unwrap();
        store.persist(&id, &state(4, 4)).await.unwrap();

        let read = ReadPath::new(memory_backend(store.clone()), SamplingRates::new(1.0, 0.0));
        let hints = read.get_callback_hints(&id).await.unwrap();
        assert_eq!(hints.len(), 4);
        assert!(hints.iter().all(|id| id.as_str().starts_with("wait-")));

        assert!(read.get_cancellations(&id).await.unwrap().is_empty());
        assert_eq!(store.loads(), 2);
    }

    #[tokio::test]
    async fn test_repeated_reads_converge_to_rates() {
        let store = Arc::new(MemoryStore::new());
        let id = SchedulerId::parse("sched-1").unwrap();
        store.persist(&id, &state(200, 200)).await.unwrap();
        let read = ReadPath::new(memory_backend(store), SamplingRates::default());

        let (mut waiting, mut running) = (0usize, 0usize);
        for _ in 0..500 {
            for hint in read.get_callback_hints(&id).await.unwrap() {
                if hint.as_str().starts_with("wait-") {
                    waiting += 1;
                } else {
                    running += 1;
                }
            }
        }

        // 100k draws each: 1% ~ 1000 (sd ~31), 5% ~ 5000 (sd ~69).
        assert!((800..=1200).contains(&waiting), "waiting sampled {waiting}");
        assert!((4600..=5400).contains(&running), "running sampled {running}");
    }

    #[tokio::test]
    async fn test_read_path_surfaces_store_errors() {
        let store = Arc::new(MemoryStore::new());
        store.set_fail_loads(true);
        let read = ReadPath::new(memory_backend(store), SamplingRates::default());

        let id = SchedulerId::parse("sched-1").unwrap();
        assert!(read.get_cancellations(&id).await.is_err());
        assert!(read.get_callback_hints(&id).await.is_err());
    }
}
