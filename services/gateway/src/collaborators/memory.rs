//! In-process reference collaborators.
//!
//! - [`MemoryStore`] keeps every scheduler's state as encoded JSON, so a load
//!   always yields an independent copy, the way a real store would.
//! - [`FifoScheduler`] hands each idle worker the oldest waiting request whose
//!   labels it satisfies. It is not a quota algorithm; it exists so the
//!   gateway can run end to end.
//! - [`PendingCancellations`] reports the cancellations recorded in the state.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qsched_id::{AccountId, RequestId, SchedulerId, WorkerId};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{Backend, NodeStore, Reconciler, Scheduler, SchedulerError, Snapshot, StoreError};
use crate::model::{
    AssignRequest, AssignResponse, Assignment, Cancellation, NotifyRequest, NotifyResponse,
    TaskState,
};

// =============================================================================
// Scheduler State
// =============================================================================

/// A request waiting for a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingRequest {
    pub account_id: Option<AccountId>,
    pub labels: BTreeSet<String>,
    pub enqueued_time: DateTime<Utc>,
}

/// A request assigned to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningRequest {
    pub worker_id: WorkerId,
    pub account_id: Option<AccountId>,
    pub assigned_time: DateTime<Utc>,
}

/// Persistent state of one scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub waiting: BTreeMap<RequestId, WaitingRequest>,
    pub running: BTreeMap<RequestId, RunningRequest>,
    pub cancellations: BTreeSet<Cancellation>,
    pub last_update: Option<DateTime<Utc>>,
}

impl SchedulerState {
    fn check_time(&self, time: DateTime<Utc>) -> Result<(), SchedulerError> {
        match self.last_update {
            Some(last_update) if time < last_update => Err(SchedulerError::StaleUpdate {
                update_time: time,
                last_update,
            }),
            _ => Ok(()),
        }
    }

    fn advance(&mut self, time: DateTime<Utc>) {
        if self.last_update.is_none_or(|last| last < time) {
            self.last_update = Some(time);
        }
    }

    /// Oldest waiting request whose labels are all offered by the worker.
    fn best_match(&self, labels: &BTreeSet<String>) -> Option<RequestId> {
        self.waiting
            .iter()
            .filter(|(_, waiting)| waiting.labels.is_subset(labels))
            .min_by(|(a_id, a), (b_id, b)| {
                a.enqueued_time
                    .cmp(&b.enqueued_time)
                    .then_with(|| a_id.cmp(b_id))
            })
            .map(|(id, _)| id.clone())
    }
}

impl Snapshot for SchedulerState {
    fn waiting_requests(&self) -> Vec<&RequestId> {
        self.waiting.keys().collect()
    }

    fn running_requests(&self) -> Vec<&RequestId> {
        self.running.keys().collect()
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// In-memory [`NodeStore`] holding encoded snapshots.
#[derive(Default)]
pub struct MemoryStore {
    snapshots: Mutex<HashMap<SchedulerId, Vec<u8>>>,
    loads: AtomicU64,
    persists: AtomicU64,
    fail_loads: AtomicBool,
    fail_persists: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `load` calls served so far.
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of `persist` calls that succeeded so far.
    pub fn persists(&self) -> u64 {
        self.persists.load(Ordering::SeqCst)
    }

    /// Make subsequent loads fail (for exercising error paths).
    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent persists fail (for exercising error paths).
    pub fn set_fail_persists(&self, fail: bool) {
        self.fail_persists.store(fail, Ordering::SeqCst);
    }

    /// Decode the stored state without counting it as a load.
    pub fn peek(&self, scheduler_id: &SchedulerId) -> Result<SchedulerState, StoreError> {
        let snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        decode(scheduler_id, snapshots.get(scheduler_id))
    }
}

fn decode(
    scheduler_id: &SchedulerId,
    bytes: Option<&Vec<u8>>,
) -> Result<SchedulerState, StoreError> {
    match bytes {
        Some(bytes) => serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
            scheduler_id: scheduler_id.clone(),
            message: e.to_string(),
        }),
        None => Ok(SchedulerState::default()),
    }
}

#[async_trait]
impl NodeStore<SchedulerState> for MemoryStore {
    async fn load(&self, scheduler_id: &SchedulerId) -> Result<SchedulerState, StoreError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected load failure".to_string()));
        }

        self.loads.fetch_add(1, Ordering::SeqCst);
        let snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        let state = decode(scheduler_id, snapshots.get(scheduler_id))?;
        trace!(
            scheduler_id = %scheduler_id,
            waiting = state.waiting.len(),
            running = state.running.len(),
            "Loaded snapshot"
        );
        Ok(state)
    }

    async fn persist(
        &self,
        scheduler_id: &SchedulerId,
        snapshot: &SchedulerState,
    ) -> Result<(), StoreError> {
        if self.fail_persists.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "injected persist failure".to_string(),
            ));
        }

        let bytes = serde_json::to_vec(snapshot).map_err(|e| StoreError::Encode(e.to_string()))?;
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(scheduler_id.clone(), bytes);
        self.persists.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// FIFO Scheduler
// =============================================================================

/// Label-matching, oldest-first scheduler.
#[derive(Debug, Default)]
pub struct FifoScheduler;

impl Scheduler<SchedulerState> for FifoScheduler {
    fn assign(
        &self,
        state: &mut SchedulerState,
        request: &AssignRequest,
    ) -> Result<AssignResponse, SchedulerError> {
        state.check_time(request.time)?;

        let mut assignments = Vec::new();
        for worker in &request.idle_workers {
            // An idle worker is not running anything it was previously given.
            state
                .running
                .retain(|_, running| running.worker_id != worker.id);

            let Some(request_id) = state.best_match(&worker.labels) else {
                continue;
            };
            let Some(waiting) = state.waiting.remove(&request_id) else {
                continue;
            };

            state.running.insert(
                request_id.clone(),
                RunningRequest {
                    worker_id: worker.id.clone(),
                    account_id: waiting.account_id,
                    assigned_time: request.time,
                },
            );
            assignments.push(Assignment {
                worker_id: worker.id.clone(),
                request_id,
            });
        }

        state.advance(request.time);
        debug!(
            idle_workers = request.idle_workers.len(),
            assigned = assignments.len(),
            "Assigned tasks"
        );
        Ok(AssignResponse { assignments })
    }

    fn notify(
        &self,
        state: &mut SchedulerState,
        request: &NotifyRequest,
    ) -> Result<NotifyResponse, SchedulerError> {
        // Validate everything up front so a rejection leaves the state untouched.
        for notification in &request.notifications {
            state.check_time(notification.time)?;
            if let Some(enqueued) = notification.enqueued_time {
                if enqueued > notification.time {
                    return Err(SchedulerError::InvalidRequest(format!(
                        "request {} enqueued at {enqueued}, after notification time {}",
                        notification.request_id, notification.time
                    )));
                }
            }
        }

        for notification in &request.notifications {
            let request_id = &notification.request_id;
            match &notification.state {
                TaskState::Waiting => {
                    state.running.remove(request_id);
                    state
                        .waiting
                        .entry(request_id.clone())
                        .or_insert_with(|| WaitingRequest {
                            account_id: notification.account_id.clone(),
                            labels: notification.labels.clone(),
                            enqueued_time: notification.enqueued_time.unwrap_or(notification.time),
                        });
                }
                TaskState::Running(worker_id) => {
                    let known_elsewhere = state
                        .running
                        .get(request_id)
                        .is_some_and(|running| &running.worker_id != worker_id);
                    let unknown = !state.running.contains_key(request_id)
                        && !state.waiting.contains_key(request_id);

                    if known_elsewhere || unknown {
                        state.cancellations.insert(Cancellation {
                            worker_id: worker_id.clone(),
                            request_id: request_id.clone(),
                        });
                    } else if let Some(waiting) = state.waiting.remove(request_id) {
                        state.running.insert(
                            request_id.clone(),
                            RunningRequest {
                                worker_id: worker_id.clone(),
                                account_id: waiting.account_id,
                                assigned_time: notification.time,
                            },
                        );
                    }
                }
                TaskState::Absent => {
                    state.waiting.remove(request_id);
                    state.running.remove(request_id);
                    state
                        .cancellations
                        .retain(|cancellation| &cancellation.request_id != request_id);
                }
            }
            state.advance(notification.time);
        }

        Ok(NotifyResponse {
            applied: request.notifications.len(),
        })
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Reports the cancellations recorded in [`SchedulerState`].
#[derive(Debug, Default)]
pub struct PendingCancellations;

impl Reconciler<SchedulerState> for PendingCancellations {
    fn cancellations(&self, state: &SchedulerState) -> Vec<Cancellation> {
        state.cancellations.iter().cloned().collect()
    }
}

/// Build a backend from the reference collaborators around `store`.
pub fn memory_backend(store: Arc<MemoryStore>) -> Backend<SchedulerState> {
    Backend::new(store, Arc::new(FifoScheduler), Arc::new(PendingCancellations))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::model::{IdleWorker, TaskNotification};

    fn labels(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn waiting(id: &str, at: DateTime<Utc>, task_labels: &[&str]) -> TaskNotification {
        TaskNotification {
            time: at,
            request_id: RequestId::parse(id).unwrap(),
            account_id: None,
            state: TaskState::Waiting,
            labels: labels(task_labels),
            enqueued_time: None,
        }
    }

    fn running(id: &str, worker: &str, at: DateTime<Utc>) -> TaskNotification {
        TaskNotification {
            state: TaskState::Running(WorkerId::parse(worker).unwrap()),
            ..waiting(id, at, &[])
        }
    }

    fn idle(id: &str, worker_labels: &[&str]) -> IdleWorker {
        IdleWorker {
            id: WorkerId::parse(id).unwrap(),
            labels: labels(worker_labels),
        }
    }

    #[test]
    fn test_assign_oldest_matching_request() {
        let t0 = Utc::now();
        let mut state = SchedulerState::default();
        let scheduler = FifoScheduler;

        scheduler
            .notify(
                &mut state,
                &NotifyRequest {
                    notifications: vec![
                        waiting("req-gpu", t0, &["gpu"]),
                        waiting("req-old", t0 + Duration::seconds(1), &[]),
                        waiting("req-new", t0 + Duration::seconds(2), &[]),
                    ],
                },
            )
            .unwrap();

        let response = scheduler
            .assign(
                &mut state,
                &AssignRequest {
                    time: t0 + Duration::seconds(3),
                    idle_workers: vec![idle("bot-1", &["linux"])],
                },
            )
            .unwrap();

        assert_eq!(response.assignments.len(), 1);
        assert_eq!(response.assignments[0].request_id.as_str(), "req-old");
        assert!(state.running.contains_key("req-old"));
        assert!(state.waiting.contains_key("req-gpu"));
    }

    #[test]
    fn test_assign_stale_time_rejected_without_mutation() {
        let t0 = Utc::now();
        let mut state = SchedulerState::default();
        let scheduler = FifoScheduler;

        scheduler
            .notify(
                &mut state,
                &NotifyRequest {
                    notifications: vec![waiting("req-1", t0, &[])],
                },
            )
            .unwrap();
        let before = state.clone();

        let err = scheduler
            .assign(
                &mut state,
                &AssignRequest {
                    time: t0 - Duration::seconds(10),
                    idle_workers: vec![idle("bot-1", &[])],
                },
            )
            .unwrap_err();

        assert!(matches!(err, SchedulerError::StaleUpdate { .. }));
        assert_eq!(state, before);
    }

    #[test]
    fn test_idle_worker_drops_previous_assignment() {
        let t0 = Utc::now();
        let mut state = SchedulerState::default();
        let scheduler = FifoScheduler;

        scheduler
            .notify(
                &mut state,
                &NotifyRequest {
                    notifications: vec![waiting("req-1", t0, &[])],
                },
            )
            .unwrap();
        scheduler
            .assign(
                &mut state,
                &AssignRequest {
                    time: t0,
                    idle_workers: vec![idle("bot-1", &[])],
                },
            )
            .unwrap();
        assert!(state.running.contains_key("req-1"));

        let response = scheduler
            .assign(
                &mut state,
                &AssignRequest {
                    time: t0 + Duration::seconds(1),
                    idle_workers: vec![idle("bot-1", &[])],
                },
            )
            .unwrap();
        assert!(response.assignments.is_empty());
        assert!(state.running.is_empty());
    }

    #[test]
    fn test_running_elsewhere_creates_cancellation() {
        let t0 = Utc::now();
        let mut state = SchedulerState::default();
        let scheduler = FifoScheduler;

        scheduler
            .notify(
                &mut state,
                &NotifyRequest {
                    notifications: vec![waiting("req-1", t0, &[])],
                },
            )
            .unwrap();
        scheduler
            .assign(
                &mut state,
                &AssignRequest {
                    time: t0,
                    idle_workers: vec![idle("bot-1", &[])],
                },
            )
            .unwrap();

        scheduler
            .notify(
                &mut state,
                &NotifyRequest {
                    notifications: vec![
                        running("req-1", "bot-2", t0 + Duration::seconds(1)),
                        running("req-unknown", "bot-3", t0 + Duration::seconds(1)),
                    ],
                },
            )
            .unwrap();

        let cancellations = PendingCancellations.cancellations(&state);
        assert_eq!(cancellations.len(), 2);
        assert!(cancellations
            .iter()
            .any(|c| c.worker_id.as_str() == "bot-2" && c.request_id.as_str() == "req-1"));
        assert_eq!(state.running["req-1"].worker_id.as_str(), "bot-1");

        let mut absent = waiting("req-1", t0 + Duration::seconds(2), &[]);
        absent.state = TaskState::Absent;
        scheduler
            .notify(
                &mut state,
                &NotifyRequest {
                    notifications: vec![absent],
                },
            )
            .unwrap();
        assert_eq!(PendingCancellations.cancellations(&state).len(), 1);
        assert!(state.running.is_empty());
    }

    #[test]
    fn test_enqueued_after_notification_rejected() {
        let t0 = Utc::now();
        let mut state = SchedulerState::default();
        let mut notification = waiting("req-1", t0, &[]);
        notification.enqueued_time = Some(t0 + Duration::seconds(5));

        let err = FifoScheduler
            .notify(
                &mut state,
                &NotifyRequest {
                    notifications: vec![notification],
                },
            )
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidRequest(_)));
        assert!(state.waiting.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip_is_a_copy() {
        let store = MemoryStore::new();
        let id = SchedulerId::parse("sched-1").unwrap();

        let mut state = store.load(&id).await.unwrap();
        assert_eq!(state, SchedulerState::default());

        state.last_update = Some(Utc::now());
        store.persist(&id, &state).await.unwrap();

        let loaded = store.load(&id).await.unwrap();
        assert_eq!(loaded, state);
        assert_eq!(store.loads(), 2);
        assert_eq!(store.persists(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_injected_failures() {
        let store = MemoryStore::new();
        let id = SchedulerId::parse("sched-1").unwrap();

        store.set_fail_persists(true);
        let err = store
            .persist(&id, &SchedulerState::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.persists(), 0);

        store.set_fail_loads(true);
        assert!(store.load(&id).await.is_err());
    }
}
