use std::sync::Arc;

use qsched_id::CallId;
use qsched_proto::qscheduler::v1::{self as pb, QuotaScheduler};
use tonic::{Request, Response, Status};
use tracing::{debug, field, instrument, Span};

use super::{convert, request_deadline};
use crate::collaborators::Snapshot;
use crate::gateway::Gateway;

/// gRPC service implementation.
///
/// Wraps a [`Gateway`] and implements the generated `QuotaScheduler` trait.
pub struct QuotaSchedulerService<S> {
    gateway: Arc<Gateway<S>>,
}

impl<S: Snapshot> QuotaSchedulerService<S> {
    pub fn new(gateway: Arc<Gateway<S>>) -> Self {
        Self { gateway }
    }
}

/// Mint a call id and attach it to the current span.
fn start_call() {
    Span::current().record("call_id", field::display(CallId::new()));
}

#[tonic::async_trait]
impl<S: Snapshot> QuotaScheduler for QuotaSchedulerService<S> {
    #[instrument(skip_all, fields(call_id = field::Empty, scheduler_id = field::Empty))]
    async fn assign_tasks(
        &self,
        request: Request<pb::AssignTasksRequest>,
    ) -> Result<Response<pb::AssignTasksResponse>, Status> {
        start_call();
        let deadline = request_deadline(request.metadata());
        let (scheduler_id, req) = convert::assign_request(request.into_inner())?;
        Span::current().record("scheduler_id", field::display(&scheduler_id));

        debug!(idle_workers = req.idle_workers.len(), ?deadline, "grpc: assign tasks");
        let response = self
            .gateway
            .assign_tasks(&scheduler_id, req, deadline)
            .await?;

        Ok(Response::new(convert::assign_response(response)))
    }

    #[instrument(skip_all, fields(call_id = field::Empty, scheduler_id = field::Empty))]
    async fn notify_tasks(
        &self,
        request: Request<pb::NotifyTasksRequest>,
    ) -> Result<Response<pb::NotifyTasksResponse>, Status> {
        start_call();
        let deadline = request_deadline(request.metadata());
        let (scheduler_id, req) = convert::notify_request(request.into_inner())?;
        Span::current().record("scheduler_id", field::display(&scheduler_id));

        debug!(notifications = req.notifications.len(), ?deadline, "grpc: notify tasks");
        self.gateway
            .notify_tasks(&scheduler_id, req, deadline)
            .await?;

        Ok(Response::new(pb::NotifyTasksResponse {}))
    }

    #[instrument(skip_all, fields(call_id = field::Empty, scheduler_id = field::Empty))]
    async fn get_cancellations(
        &self,
        request: Request<pb::GetCancellationsRequest>,
    ) -> Result<Response<pb::GetCancellationsResponse>, Status> {
        start_call();
        let scheduler_id = convert::scheduler_id(&request.into_inner().scheduler_id)?;
        Span::current().record("scheduler_id", field::display(&scheduler_id));

        let cancellations = self.gateway.get_cancellations(&scheduler_id).await?;
        debug!(count = cancellations.len(), "grpc: cancellations listed");

        Ok(Response::new(convert::cancellations_response(cancellations)))
    }

    #[instrument(skip_all, fields(call_id = field::Empty, scheduler_id = field::Empty))]
    async fn get_callbacks(
        &self,
        request: Request<pb::GetCallbacksRequest>,
    ) -> Result<Response<pb::GetCallbacksResponse>, Status> {
        start_call();
        let scheduler_id = convert::scheduler_id(&request.into_inner().scheduler_id)?;
        Span::current().record("scheduler_id", field::display(&scheduler_id));

        let request_ids = self.gateway.get_callbacks(&scheduler_id).await?;
        debug!(count = request_ids.len(), "grpc: callbacks sampled");

        Ok(Response::new(convert::callbacks_response(request_ids)))
    }
}
