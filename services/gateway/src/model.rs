//! Domain requests and responses handled by the gateway.
//!
//! These are the validated forms of the protobuf messages. The gRPC layer
//! converts wire messages into these types (rejecting malformed ids and
//! timestamps), and the gateway calls [`AssignRequest::validate`] /
//! [`NotifyRequest::validate`] for the cross-field rules before a request is
//! allowed to take an admission permit or a queue slot.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use qsched_id::{AccountId, RequestId, WorkerId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of idle workers in one assign request.
pub const MAX_IDLE_WORKERS: usize = 1000;

/// Maximum number of notifications in one notify request.
pub const MAX_NOTIFICATIONS: usize = 1000;

/// Maximum number of provisionable labels on a worker or task.
pub const MAX_LABELS: usize = 64;

/// A request field that failed validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// Assignment
// =============================================================================

/// A worker offering capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleWorker {
    pub id: WorkerId,
    pub labels: BTreeSet<String>,
}

/// A caller's offer of idle workers.
#[derive(Debug, Clone)]
pub struct AssignRequest {
    /// Time at which the caller observed the workers idle.
    pub time: DateTime<Utc>,
    pub idle_workers: Vec<IdleWorker>,
}

impl AssignRequest {
    /// Checks cross-field rules the wire format cannot express.
    pub fn validate(&self) -> Result<(), FieldError> {
        if self.idle_workers.len() > MAX_IDLE_WORKERS {
            return Err(FieldError::new(
                "idle_workers",
                format!("at most {MAX_IDLE_WORKERS} workers per request"),
            ));
        }

        let mut seen = HashSet::with_capacity(self.idle_workers.len());
        for (i, worker) in self.idle_workers.iter().enumerate() {
            if !seen.insert(&worker.id) {
                return Err(FieldError::new(
                    format!("idle_workers[{i}].id"),
                    format!("duplicate worker {}", worker.id),
                ));
            }
            validate_labels(&format!("idle_workers[{i}].provisionable_labels"), &worker.labels)?;
        }

        Ok(())
    }
}

/// A task request assigned to a worker.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Assignment {
    pub worker_id: WorkerId,
    pub request_id: RequestId,
}

/// Result of applying one [`AssignRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignResponse {
    pub assignments: Vec<Assignment>,
}

// =============================================================================
// Notification
// =============================================================================

/// Lifecycle state reported for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for a worker.
    Waiting,
    /// Running on the given worker.
    Running(WorkerId),
    /// Finished, cancelled, or otherwise gone.
    Absent,
}

/// One task lifecycle event.
#[derive(Debug, Clone)]
pub struct TaskNotification {
    /// Time at which the caller observed the state.
    pub time: DateTime<Utc>,
    pub request_id: RequestId,
    pub account_id: Option<AccountId>,
    pub state: TaskState,
    pub labels: BTreeSet<String>,
    /// When the task was first enqueued; defaults to `time`.
    pub enqueued_time: Option<DateTime<Utc>>,
}

/// A batch of task lifecycle events, applied in order.
#[derive(Debug, Clone)]
pub struct NotifyRequest {
    pub notifications: Vec<TaskNotification>,
}

impl NotifyRequest {
    /// Checks cross-field rules the wire format cannot express.
    pub fn validate(&self) -> Result<(), FieldError> {
        if self.notifications.is_empty() {
            return Err(FieldError::new("notifications", "must not be empty"));
        }
        if self.notifications.len() > MAX_NOTIFICATIONS {
            return Err(FieldError::new(
                "notifications",
                format!("at most {MAX_NOTIFICATIONS} notifications per request"),
            ));
        }

        for (i, notification) in self.notifications.iter().enumerate() {
            validate_labels(
                &format!("notifications[{i}].provisionable_labels"),
                &notification.labels,
            )?;
        }

        Ok(())
    }
}

/// Acknowledgement of a [`NotifyRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyResponse {
    /// Number of notifications the scheduler applied.
    pub applied: usize,
}

// =============================================================================
// Cancellation
// =============================================================================

/// A previously assigned task the scheduler wants un-run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cancellation {
    pub worker_id: WorkerId,
    pub request_id: RequestId,
}

fn validate_labels(field: &str, labels: &BTreeSet<String>) -> Result<(), FieldError> {
    if labels.len() > MAX_LABELS {
        return Err(FieldError::new(
            field,
            format!("at most {MAX_LABELS} labels"),
        ));
    }
    if labels.iter().any(|label| label.trim().is_empty()) {
        return Err(FieldError::new(field, "labels must not be blank"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: &str, labels: &[&str]) -> IdleWorker {
        IdleWorker {
            id: WorkerId::parse(id).unwrap(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    fn notification(id: &str) -> TaskNotification {
        TaskNotification {
            time: Utc::now(),
            request_id: RequestId::parse(id).unwrap(),
            account_id: None,
            state: TaskState::Waiting,
            labels: BTreeSet::new(),
            enqueued_time: None,
        }
    }

    #[test]
    fn test_assign_duplicate_worker_rejected() {
        let request = AssignRequest {
            time: Utc::now(),
            idle_workers: vec![worker("bot-1", &[]), worker("bot-2", &[]), worker("bot-1", &[])],
        };
        let err = request.validate().unwrap_err();
        assert_eq!(err.field, "idle_workers[2].id");
    }

    #[test]
    fn test_assign_blank_label_rejected() {
        let request = AssignRequest {
            time: Utc::now(),
            idle_workers: vec![worker("bot-1", &["os:linux", " "])],
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_assign_empty_is_valid() {
        let request = AssignRequest {
            time: Utc::now(),
            idle_workers: vec![],
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_notify_empty_rejected() {
        let request = NotifyRequest {
            notifications: vec![],
        };
        assert_eq!(request.validate().unwrap_err().field, "notifications");
    }

    #[test]
    fn test_notify_too_many_rejected() {
        let request = NotifyRequest {
            notifications: (0..=MAX_NOTIFICATIONS)
                .map(|i| notification(&format!("req-{i}")))
                .collect(),
        };
        assert!(request.validate().is_err());
    }
}
