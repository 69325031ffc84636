//! Per-scheduler batch actors.
//!
//! Each scheduler id gets one actor: a tokio task that owns that scheduler's
//! snapshot and is the only thing allowed to mutate it. Callers talk to it
//! through a [`BatchActorHandle`], which enqueues onto a bounded mailbox and
//! waits for a reply.
//!
//! ## Batch Cycle
//!
//! ```text
//! wait for first message ─► linger (optional) ─► drain mailbox (≤ max_batch_size)
//!        ▲                                                │
//!        │                                                ▼
//!  reply to callers ◄── persist ◄── apply in FIFO order ◄── load / reuse snapshot
//! ```
//!
//! - A store failure (load or persist) fails every op in the batch with the
//!   same error and discards the cached snapshot.
//! - A scheduler rejection fails only the op that caused it.
//! - A caller whose deadline elapses stops waiting; its op stays in the batch.

mod actor;
mod handle;
mod message;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::collaborators::{SchedulerError, StoreError};

pub use handle::BatchActorHandle;

/// Batch formation and mailbox limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Messages that may wait in a mailbox before submissions are rejected.
    pub queue_capacity: usize,

    /// Maximum ops applied in one load/persist cycle.
    pub max_batch_size: usize,

    /// How long to keep collecting after the first message of a batch.
    /// Zero means "take whatever is already queued".
    pub linger: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_batch_size: 512,
            linger: Duration::ZERO,
        }
    }
}

/// Errors returned to callers of a batch actor.
#[derive(Debug, Clone, Error)]
pub enum BatchError {
    /// The mailbox is at capacity.
    #[error("batch queue full")]
    QueueFull,

    /// The actor has stopped.
    #[error("batch actor stopped")]
    ActorStopped,

    /// The caller's deadline elapsed before its batch completed.
    #[error("deadline exceeded waiting for batch")]
    DeadlineExceeded,

    /// Loading or persisting the snapshot failed; shared by the whole batch.
    #[error("store error: {0}")]
    Store(Arc<StoreError>),

    /// The scheduler rejected this op.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}
