//! Mailbox messages and their replies.

use tokio::sync::oneshot;
use tracing::debug;

use super::BatchError;
use crate::collaborators::Scheduler;
use crate::model::{AssignRequest, AssignResponse, NotifyRequest, NotifyResponse};

type Reply<T> = oneshot::Sender<Result<T, BatchError>>;

/// A mutating op queued for the next batch.
#[derive(Debug)]
pub(crate) enum BatchMessage {
    Assign {
        request: AssignRequest,
        reply_to: Reply<AssignResponse>,
    },
    Notify {
        request: NotifyRequest,
        reply_to: Reply<NotifyResponse>,
    },
}

impl BatchMessage {
    /// Apply this op to the snapshot, keeping the result until the batch
    /// is persisted.
    pub(crate) fn apply<S: 'static>(self, scheduler: &dyn Scheduler<S>, snapshot: &mut S) -> Applied {
        match self {
            Self::Assign { request, reply_to } => Applied::Assign {
                result: scheduler.assign(snapshot, &request).map_err(BatchError::from),
                reply_to,
            },
            Self::Notify { request, reply_to } => Applied::Notify {
                result: scheduler.notify(snapshot, &request).map_err(BatchError::from),
                reply_to,
            },
        }
    }

    /// Reply with an error without applying.
    pub(crate) fn fail(self, error: BatchError) {
        match self {
            Self::Assign { reply_to, .. } => send(reply_to, Err(error)),
            Self::Notify { reply_to, .. } => send(reply_to, Err(error)),
        }
    }
}

/// An op that has been applied but not yet answered.
pub(crate) enum Applied {
    Assign {
        result: Result<AssignResponse, BatchError>,
        reply_to: Reply<AssignResponse>,
    },
    Notify {
        result: Result<NotifyResponse, BatchError>,
        reply_to: Reply<NotifyResponse>,
    },
}

impl Applied {
    pub(crate) fn is_err(&self) -> bool {
        match self {
            Self::Assign { result, .. } => result.is_err(),
            Self::Notify { result, .. } => result.is_err(),
        }
    }

    /// Deliver the op's own result.
    pub(crate) fn deliver(self) {
        match self {
            Self::Assign { result, reply_to } => send(reply_to, result),
            Self::Notify { result, reply_to } => send(reply_to, result),
        }
    }

    /// Discard the op's result and reply with a batch-wide error.
    pub(crate) fn fail(self, error: BatchError) {
        match self {
            Self::Assign { reply_to, .. } => send(reply_to, Err(error)),
            Self::Notify { reply_to, .. } => send(reply_to, Err(error)),
        }
    }
}

fn send<T>(reply_to: Reply<T>, result: Result<T, BatchError>) {
    if reply_to.send(result).is_err() {
        debug!("Caller stopped waiting before its batch completed");
    }
}
