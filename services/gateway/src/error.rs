//! Gateway error type and its mapping onto gRPC status codes.

use std::sync::Arc;

use qsched_id::SchedulerId;
use thiserror::Error;
use tonic::Status;

use crate::batch::BatchError;
use crate::collaborators::{SchedulerError, StoreError};
use crate::model::FieldError;

/// Errors returned by [`Gateway`](crate::gateway::Gateway) operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request is malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The admission limiter has no free permits.
    #[error("{limiter} admission limit reached")]
    ResourceExhausted { limiter: &'static str },

    /// The scheduler's batch queue is full or its actor has stopped.
    #[error("scheduler {scheduler_id} unavailable: {reason}")]
    Unavailable {
        scheduler_id: SchedulerId,
        reason: &'static str,
    },

    /// The caller's deadline elapsed before its batch completed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The scheduler rejected the request against its current state.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// The store failed; the detail is logged, not returned.
    #[error("{op} failed for scheduler {scheduler_id}")]
    Internal {
        op: &'static str,
        scheduler_id: SchedulerId,
        #[source]
        source: Arc<StoreError>,
    },
}

impl GatewayError {
    /// Map a batch actor error for `op` against `scheduler_id`.
    pub fn from_batch(op: &'static str, scheduler_id: &SchedulerId, err: BatchError) -> Self {
        match err {
            BatchError::QueueFull => Self::Unavailable {
                scheduler_id: scheduler_id.clone(),
                reason: "batch queue full",
            },
            BatchError::ActorStopped => Self::Unavailable {
                scheduler_id: scheduler_id.clone(),
                reason: "batch actor stopped",
            },
            BatchError::DeadlineExceeded => Self::DeadlineExceeded,
            BatchError::Store(source) => Self::Internal {
                op,
                scheduler_id: scheduler_id.clone(),
                source,
            },
            BatchError::Scheduler(err) => err.into(),
        }
    }

    /// Map a store error from the read path.
    pub fn from_store(op: &'static str, scheduler_id: &SchedulerId, err: StoreError) -> Self {
        Self::Internal {
            op,
            scheduler_id: scheduler_id.clone(),
            source: Arc::new(err),
        }
    }
}

impl From<FieldError> for GatewayError {
    fn from(err: FieldError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

impl From<SchedulerError> for GatewayError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::StaleUpdate { .. } => Self::FailedPrecondition(err.to_string()),
            SchedulerError::InvalidRequest(message) => Self::InvalidArgument(message),
        }
    }
}

impl From<GatewayError> for Status {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidArgument(message) => Status::invalid_argument(message),
            GatewayError::ResourceExhausted { .. } => {
                Status::resource_exhausted("too many concurrent requests")
            }
            GatewayError::Unavailable { reason, .. } => Status::unavailable(reason),
            GatewayError::DeadlineExceeded => Status::deadline_exceeded("deadline exceeded"),
            GatewayError::FailedPrecondition(message) => Status::failed_precondition(message),
            GatewayError::Internal {
                op,
                scheduler_id,
                source,
            } => {
                tracing::error!(
                    op,
                    scheduler_id = %scheduler_id,
                    error = %source,
                    "Store operation failed"
                );
                Status::internal("internal error")
            }
        }
    }
}
