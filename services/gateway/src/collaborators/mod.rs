//! Interfaces to the collaborators the gateway drives but does not implement.
//!
//! - [`NodeStore`]: loads and persists one scheduler's snapshot.
//! - [`Scheduler`]: the matching algorithm, applied to a loaded snapshot.
//! - [`Reconciler`]: derives cancellations from a snapshot.
//!
//! The gateway treats the snapshot as opaque apart from the [`Snapshot`]
//! accessors it needs for callback sampling.
//!
//! [`memory`] holds in-process reference implementations used by the binary
//! and by tests.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qsched_id::{RequestId, SchedulerId};
use thiserror::Error;

use crate::model::{AssignRequest, AssignResponse, Cancellation, NotifyRequest, NotifyResponse};

// =============================================================================
// Errors
// =============================================================================

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or returned an I/O failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The stored snapshot could not be decoded.
    #[error("corrupt snapshot for {scheduler_id}: {message}")]
    Corrupt {
        scheduler_id: SchedulerId,
        message: String,
    },

    /// The snapshot could not be encoded for persistence.
    #[error("failed to encode snapshot: {0}")]
    Encode(String),
}

/// Per-request rejections from the matching algorithm.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// The request describes a point in time before the scheduler's last update.
    #[error("update at {update_time} is older than last update at {last_update}")]
    StaleUpdate {
        update_time: DateTime<Utc>,
        last_update: DateTime<Utc>,
    },

    /// The request is well-formed but not acceptable to the algorithm.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

// =============================================================================
// Traits
// =============================================================================

/// Read access to the parts of a snapshot the gateway samples.
pub trait Snapshot: Send + Sync + 'static {
    /// Requests waiting for a worker.
    fn waiting_requests(&self) -> Vec<&RequestId>;

    /// Requests currently assigned to a worker.
    fn running_requests(&self) -> Vec<&RequestId>;
}

/// Durable storage for scheduler snapshots.
#[async_trait]
pub trait NodeStore<S>: Send + Sync + 'static {
    /// Load the current snapshot for a scheduler.
    async fn load(&self, scheduler_id: &SchedulerId) -> Result<S, StoreError>;

    /// Persist an updated snapshot.
    async fn persist(&self, scheduler_id: &SchedulerId, snapshot: &S) -> Result<(), StoreError>;
}

/// The task/worker matching algorithm.
///
/// Implementations must validate a request before mutating the snapshot: a
/// rejected request is expected to leave the snapshot untouched, because
/// other requests in the same batch are applied to it afterwards.
pub trait Scheduler<S>: Send + Sync + 'static {
    /// Match idle workers to waiting requests.
    fn assign(
        &self,
        snapshot: &mut S,
        request: &AssignRequest,
    ) -> Result<AssignResponse, SchedulerError>;

    /// Apply task lifecycle events.
    fn notify(
        &self,
        snapshot: &mut S,
        request: &NotifyRequest,
    ) -> Result<NotifyResponse, SchedulerError>;
}

/// Derives the assignments that should no longer run.
pub trait Reconciler<S>: Send + Sync + 'static {
    fn cancellations(&self, snapshot: &S) -> Vec<Cancellation>;
}

// =============================================================================
// Backend
// =============================================================================

/// The collaborators a gateway is built on, sharing one snapshot type.
pub struct Backend<S> {
    store: Arc<dyn NodeStore<S>>,
    scheduler: Arc<dyn Scheduler<S>>,
    reconciler: Arc<dyn Reconciler<S>>,
}

impl<S> Backend<S> {
    /// Create a backend from its collaborators.
    pub fn new(
        store: Arc<dyn NodeStore<S>>,
        scheduler: Arc<dyn Scheduler<S>>,
        reconciler: Arc<dyn Reconciler<S>>,
    ) -> Self {
        Self {
            store,
            scheduler,
            reconciler,
        }
    }

    pub fn store(&self) -> &dyn NodeStore<S> {
        self.store.as_ref()
    }

    pub fn scheduler(&self) -> &dyn Scheduler<S> {
        self.scheduler.as_ref()
    }

    pub fn reconciler(&self) -> &dyn Reconciler<S> {
        self.reconciler.as_ref()
    }
}

impl<S> Clone for Backend<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            scheduler: Arc::clone(&self.scheduler),
            reconciler: Arc::clone(&self.reconciler),
        }
    }
}
