//! Shared helpers for gateway integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qsched_gateway::collaborators::memory::{
    FifoScheduler, MemoryStore, PendingCancellations, SchedulerState,
};
use qsched_gateway::collaborators::{Backend, NodeStore, StoreError};
use qsched_gateway::config::GatewayConfig;
use qsched_gateway::gateway::Gateway;
use qsched_gateway::model::{
    AssignRequest, IdleWorker, NotifyRequest, TaskNotification, TaskState,
};
use qsched_id::{RequestId, SchedulerId, WorkerId};
use tokio::sync::Semaphore;

/// A [`MemoryStore`] whose loads can be held at a gate per scheduler, and
/// which records how many persists overlap for the same scheduler.
#[derive(Default)]
pub struct GatedStore {
    pub inner: MemoryStore,
    gates: Mutex<HashMap<SchedulerId, Arc<Semaphore>>>,
    entered: AtomicU64,
    persisting: Mutex<HashMap<SchedulerId, usize>>,
    max_overlap: AtomicUsize,
}

impl GatedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hold every subsequent load for `id` until [`open`](Self::open).
    pub fn close(&self, id: &SchedulerId) {
        self.gates
            .lock()
            .unwrap()
            .insert(id.clone(), Arc::new(Semaphore::new(0)));
    }

    /// Release held and future loads for `id`.
    pub fn open(&self, id: &SchedulerId) {
        if let Some(gate) = self.gates.lock().unwrap().remove(id) {
            gate.close();
        }
    }

    /// Loads that have started, including ones waiting at a gate.
    pub fn entered(&self) -> u64 {
        self.entered.load(Ordering::SeqCst)
    }

    /// Loads that completed.
    pub fn loads(&self) -> u64 {
        self.inner.loads()
    }

    pub fn persists(&self) -> u64 {
        self.inner.persists()
    }

    /// Highest number of persists seen in flight for one scheduler.
    pub fn max_overlap(&self) -> usize {
        self.max_overlap.load(Ordering::SeqCst)
    }

    pub fn state(&self, id: &SchedulerId) -> SchedulerState {
        self.inner.peek(id).unwrap()
    }
}

#[async_trait]
impl NodeStore<SchedulerState> for GatedStore {
    async fn load(&self, scheduler_id: &SchedulerId) -> Result<SchedulerState, StoreError> {
        self.entered.fetch_add(1, Ordering::SeqCst);

        let gate = self.gates.lock().unwrap().get(scheduler_id).cloned();
        if let Some(gate) = gate {
            // Closed means the gate was opened.
            let _ = gate.acquire().await;
        }

        self.inner.load(scheduler_id).await
    }

    async fn persist(
        &self,
        scheduler_id: &SchedulerId,
        snapshot: &SchedulerState,
    ) -> Result<(), StoreError> {
        let overlap = {
            let mut persisting = self.persisting.lock().unwrap();
            let count = persisting.entry(scheduler_id.clone()).or_default();
            *count += 1;
            *count
        };
        self.max_overlap.fetch_max(overlap, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(1)).await;
        let result = self.inner.persist(scheduler_id, snapshot).await;

        if let Some(count) = self.persisting.lock().unwrap().get_mut(scheduler_id) {
            *count -= 1;
        }
        result
    }
}

pub fn backend(store: &Arc<GatedStore>) -> Backend<SchedulerState> {
    Backend::new(
        Arc::clone(store) as Arc<dyn NodeStore<SchedulerState>>,
        Arc::new(FifoScheduler),
        Arc::new(PendingCancellations),
    )
}

pub fn gateway(store: &Arc<GatedStore>, config: GatewayConfig) -> Arc<Gateway<SchedulerState>> {
    Arc::new(Gateway::new(backend(store), config).unwrap())
}

pub fn sched(id: &str) -> SchedulerId {
    SchedulerId::parse(id).unwrap()
}

pub fn waiting(id: &str, time: DateTime<Utc>) -> NotifyRequest {
    NotifyRequest {
        notifications: vec![TaskNotification {
            time,
            request_id: RequestId::parse(id).unwrap(),
            account_id: None,
            state: TaskState::Waiting,
            labels: Default::default(),
            enqueued_time: None,
        }],
    }
}

pub fn idle(workers: &[&str], time: DateTime<Utc>) -> AssignRequest {
    AssignRequest {
        time,
        idle_workers: workers
            .iter()
            .map(|id| IdleWorker {
                id: WorkerId::parse(id).unwrap(),
                labels: Default::default(),
            })
            .collect(),
    }
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Await `fut`, failing the test if it takes more than five seconds.
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("operation did not complete in time")
}
