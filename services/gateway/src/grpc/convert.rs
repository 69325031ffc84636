//! Conversions between protobuf messages and domain types.
//!
//! Everything coming off the wire is validated here: ids are parsed into
//! typed keys, timestamps into `DateTime<Utc>`, and enum values checked.
//! Failures become [`GatewayError::InvalidArgument`] naming the field.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use prost_types::Timestamp;
use qsched_id::{AccountId, RequestId, SchedulerId, WorkerId};
use qsched_proto::qscheduler::v1 as pb;

use crate::error::GatewayError;
use crate::model::{
    AssignRequest, AssignResponse, Cancellation, IdleWorker, NotifyRequest, TaskNotification,
    TaskState,
};

fn invalid(field: impl std::fmt::Display, message: impl std::fmt::Display) -> GatewayError {
    GatewayError::InvalidArgument(format!("{field}: {message}"))
}

pub(crate) fn scheduler_id(raw: &str) -> Result<SchedulerId, GatewayError> {
    SchedulerId::parse(raw).map_err(|e| invalid("scheduler_id", e))
}

fn timestamp(field: &str, ts: &Timestamp) -> Result<DateTime<Utc>, GatewayError> {
    u32::try_from(ts.nanos)
        .ok()
        .and_then(|nanos| DateTime::from_timestamp(ts.seconds, nanos))
        .ok_or_else(|| invalid(field, "timestamp out of range"))
}

fn required_timestamp(field: &str, ts: Option<&Timestamp>) -> Result<DateTime<Utc>, GatewayError> {
    match ts {
        Some(ts) => timestamp(field, ts),
        None => Err(invalid(field, "required")),
    }
}

/// Convert a domain time to its wire form.
pub fn to_timestamp(time: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: time.timestamp(),
        nanos: time.timestamp_subsec_nanos() as i32,
    }
}

fn labels(raw: Vec<String>) -> BTreeSet<String> {
    raw.into_iter().collect()
}

// =============================================================================
// Assign
// =============================================================================

pub(crate) fn assign_request(
    req: pb::AssignTasksRequest,
) -> Result<(SchedulerId, AssignRequest), GatewayError> {
    let scheduler_id = scheduler_id(&req.scheduler_id)?;
    let time = required_timestamp("time", req.time.as_ref())?;

    let idle_workers = req
        .idle_workers
        .into_iter()
        .enumerate()
        .map(|(i, worker)| {
            let id = WorkerId::parse(&worker.id)
                .map_err(|e| invalid(format!("idle_workers[{i}].id"), e))?;
            Ok(IdleWorker {
                id,
                labels: labels(worker.provisionable_labels),
            })
        })
        .collect::<Result<Vec<_>, GatewayError>>()?;

    Ok((scheduler_id, AssignRequest { time, idle_workers }))
}

pub(crate) fn assign_response(response: AssignResponse) -> pb::AssignTasksResponse {
    pb::AssignTasksResponse {
        assignments: response
            .assignments
            .into_iter()
            .map(|a| pb::TaskAssignment {
                worker_id: a.worker_id.into_inner(),
                request_id: a.request_id.into_inner(),
            })
            .collect(),
    }
}

// =============================================================================
// Notify
// =============================================================================

pub(crate) fn notify_request(
    req: pb::NotifyTasksRequest,
) -> Result<(SchedulerId, NotifyRequest), GatewayError> {
    let scheduler_id = scheduler_id(&req.scheduler_id)?;

    let notifications = req
        .notifications
        .into_iter()
        .enumerate()
        .map(|(i, n)| notification(i, n))
        .collect::<Result<Vec<_>, GatewayError>>()?;

    Ok((scheduler_id, NotifyRequest { notifications }))
}

fn notification(i: usize, n: pb::TaskNotification) -> Result<TaskNotification, GatewayError> {
    let field = |name: &str| format!("notifications[{i}].{name}");

    let time = required_timestamp(&field("time"), n.time.as_ref())?;
    let request_id = RequestId::parse(&n.request_id).map_err(|e| invalid(field("request_id"), e))?;

    let account_id = if n.account_id.is_empty() {
        None
    } else {
        Some(AccountId::parse(&n.account_id).map_err(|e| invalid(field("account_id"), e))?)
    };

    let state = match pb::TaskState::try_from(n.state) {
        Ok(pb::TaskState::Waiting) => TaskState::Waiting,
        Ok(pb::TaskState::Running) => {
            let worker_id = WorkerId::parse(&n.worker_id).map_err(|e| {
                invalid(field("worker_id"), format!("required for running tasks: {e}"))
            })?;
            TaskState::Running(worker_id)
        }
        Ok(pb::TaskState::Absent) => TaskState::Absent,
        Ok(pb::TaskState::Unspecified) => return Err(invalid(field("state"), "must be specified")),
        Err(_) => return Err(invalid(field("state"), format!("unknown value {}", n.state))),
    };

    let enqueued_time = n
        .enqueued_time
        .as_ref()
        .map(|ts| timestamp(&field("enqueued_time"), ts))
        .transpose()?;

    Ok(TaskNotification {
        time,
        request_id,
        account_id,
        state,
        labels: labels(n.provisionable_labels),
        enqueued_time,
    })
}

// =============================================================================
// Reads
// =============================================================================

pub(crate) fn cancellations_response(
    cancellations: Vec<Cancellation>,
) -> pb::GetCancellationsResponse {
    pb::GetCancellationsResponse {
        cancellations: cancellations
            .into_iter()
            .map(|c| pb::Cancellation {
                worker_id: c.worker_id.into_inner(),
                request_id: c.request_id.into_inner(),
            })
            .collect(),
    }
}

pub(crate) fn callbacks_response(request_ids: Vec<RequestId>) -> pb::GetCallbacksResponse {
    pb::GetCallbacksResponse {
        request_ids: request_ids.into_iter().map(RequestId::into_inner).collect(),
    }
}
