//! Caller-side handle to a batch actor.

use std::time::{Duration, Instant};

use qsched_id::SchedulerId;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::actor::BatchActor;
use super::message::BatchMessage;
use super::{BatchConfig, BatchError};
use crate::collaborators::{Backend, Snapshot};
use crate::model::{AssignRequest, AssignResponse, NotifyRequest, NotifyResponse};

/// Handle for submitting ops to one scheduler's batch actor.
pub struct BatchActorHandle {
    scheduler_id: SchedulerId,

    /// Sender for the actor's mailbox.
    tx: mpsc::Sender<BatchMessage>,

    /// Shutdown sender.
    shutdown_tx: watch::Sender<bool>,

    /// Task running the actor loop.
    task: JoinHandle<()>,
}

impl BatchActorHandle {
    /// Spawn a new actor for `scheduler_id` on the current runtime.
    pub fn spawn<S: Snapshot>(
        scheduler_id: SchedulerId,
        backend: Backend<S>,
        config: BatchConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let actor = BatchActor::new(scheduler_id.clone(), backend, config);
        let task = tokio::spawn(actor.run(rx, shutdown_rx));

        Self {
            scheduler_id,
            tx,
            shutdown_tx,
            task,
        }
    }

    /// Enqueue an assign op and wait up to `deadline` for its batch.
    pub async fn submit_assign(
        &self,
        request: AssignRequest,
        deadline: Duration,
    ) -> Result<AssignResponse, BatchError> {
        let (reply_to, rx) = oneshot::channel();
        self.enqueue(BatchMessage::Assign { request, reply_to })?;
        wait(rx, deadline).await
    }

    /// Enqueue a notify op and wait up to `deadline` for its batch.
    pub async fn submit_notify(
        &self,
        request: NotifyRequest,
        deadline: Duration,
    ) -> Result<NotifyResponse, BatchError> {
        let (reply_to, rx) = oneshot::channel();
        self.enqueue(BatchMessage::Notify { request, reply_to })?;
        wait(rx, deadline).await
    }

    /// Messages waiting in the mailbox (not counting the batch in progress).
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Signal the actor to stop after its current batch.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Check if the actor task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Abort the actor task immediately.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Stop the actor and wait up to `timeout` for it to finish.
    pub async fn stop_and_wait(&self, timeout: Duration) {
        self.stop();

        let deadline = Instant::now() + timeout;
        while self.is_running() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        if self.is_running() {
            warn!(scheduler_id = %self.scheduler_id, "Force aborting batch actor");
            self.abort();
        } else {
            info!(scheduler_id = %self.scheduler_id, "Batch actor shut down");
        }
    }

    fn enqueue(&self, msg: BatchMessage) -> Result<(), BatchError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BatchError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => BatchError::ActorStopped,
        })
    }
}

async fn wait<T>(
    rx: oneshot::Receiver<Result<T, BatchError>>,
    deadline: Duration,
) -> Result<T, BatchError> {
    match tokio::time::timeout(deadline, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(BatchError::ActorStopped),
        Err(_) => Err(BatchError::DeadlineExceeded),
    }
}
