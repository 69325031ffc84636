//! The gateway: admission, routing to batch actors, and the read path.
//!
//! ## Assign Flow
//!
//! ```text
//! validate ─► admission permit ─► effective deadline ─► registry.get_or_create
//!                                                               │
//!              permit dropped ◄── reply / timeout ◄── submit_assign
//! ```
//!
//! Notify follows the same path; its limiter is optional and off by default.
//! Reads go straight to the store and never touch a batch actor.

use std::time::Duration;

use qsched_id::{RequestId, SchedulerId};
use tracing::{debug, instrument, warn};

use crate::admission::{AdmissionLimiter, AdmissionPermit};
use crate::collaborators::{Backend, Snapshot};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::model::{AssignRequest, AssignResponse, Cancellation, NotifyRequest, NotifyResponse};
use crate::read::ReadPath;
use crate::registry::SchedulerRegistry;

/// Entry point for every gateway operation.
pub struct Gateway<S> {
    config: GatewayConfig,
    assign_limiter: AdmissionLimiter,
    notify_limiter: Option<AdmissionLimiter>,
    registry: SchedulerRegistry<S>,
    read: ReadPath<S>,
}

impl<S: Snapshot> Gateway<S> {
    /// Build a gateway, rejecting a `config` that fails
    /// [`GatewayConfig::validate`].
    pub fn new(backend: Backend<S>, config: GatewayConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let assign_limiter = AdmissionLimiter::new("assign", config.assign_concurrency);
        let notify_limiter = config
            .notify_concurrency
            .map(|capacity| AdmissionLimiter::new("notify", capacity));
        let registry = SchedulerRegistry::new(backend.clone(), config.batch.clone());
        let read = ReadPath::new(backend, config.sampling);

        Ok(Self {
            config,
            assign_limiter,
            notify_limiter,
            registry,
            read,
        })
    }

    /// The assign admission limiter.
    pub fn admission(&self) -> &AdmissionLimiter {
        &self.assign_limiter
    }

    pub fn notify_admission(&self) -> Option<&AdmissionLimiter> {
        self.notify_limiter.as_ref()
    }

    pub fn registry(&self) -> &SchedulerRegistry<S> {
        &self.registry
    }

    /// Match idle workers to waiting requests on one scheduler.
    #[instrument(
        skip_all,
        fields(scheduler_id = %scheduler_id, idle_workers = request.idle_workers.len())
    )]
    pub async fn assign_tasks(
        &self,
        scheduler_id: &SchedulerId,
        request: AssignRequest,
        deadline: Option<Duration>,
    ) -> Result<AssignResponse, GatewayError> {
        request.validate()?;

        let _permit = admit(&self.assign_limiter)?;
        let deadline = self.config.effective_deadline(deadline);

        let actor = self.registry.get_or_create(scheduler_id);
        let response = actor
            .submit_assign(request, deadline)
            .await
            .map_err(|e| GatewayError::from_batch("assign_tasks", scheduler_id, e))?;

        debug!(assigned = response.assignments.len(), "Assign complete");
        Ok(response)
    }

    /// Apply task lifecycle notifications to one scheduler.
    #[instrument(
        skip_all,
        fields(scheduler_id = %scheduler_id, notifications = request.notifications.len())
    )]
    pub async fn notify_tasks(
        &self,
        scheduler_id: &SchedulerId,
        request: NotifyRequest,
        deadline: Option<Duration>,
    ) -> Result<NotifyResponse, GatewayError> {
        request.validate()?;

        let _permit = self.notify_limiter.as_ref().map(admit).transpose()?;
        let deadline = self.config.effective_deadline(deadline);

        let actor = self.registry.get_or_create(scheduler_id);
        actor
            .submit_notify(request, deadline)
            .await
            .map_err(|e| GatewayError::from_batch("notify_tasks", scheduler_id, e))
    }

    /// Assignments the scheduler wants workers to abandon.
    pub async fn get_cancellations(
        &self,
        scheduler_id: &SchedulerId,
    ) -> Result<Vec<Cancellation>, GatewayError> {
        self.read
            .get_cancellations(scheduler_id)
            .await
            .map_err(|e| GatewayError::from_store("get_cancellations", scheduler_id, e))
    }

    /// A sample of request ids whose owners should re-notify.
    pub async fn get_callbacks(
        &self,
        scheduler_id: &SchedulerId,
    ) -> Result<Vec<RequestId>, GatewayError> {
        self.read
            .get_callback_hints(scheduler_id)
            .await
            .map_err(|e| GatewayError::from_store("get_callbacks", scheduler_id, e))
    }

    /// Stop every batch actor, waiting up to `timeout`.
    pub async fn shutdown(&self, timeout: Duration) {
        self.registry.shutdown(timeout).await;
    }
}

fn admit(limiter: &AdmissionLimiter) -> Result<AdmissionPermit, GatewayError> {
    limiter.try_acquire().ok_or_else(|| {
        warn!(
            limiter = limiter.name(),
            capacity = limiter.capacity(),
            "Admission limit reached"
        );
        GatewayError::ResourceExhausted {
            limiter: limiter.name(),
        }
    })
}
