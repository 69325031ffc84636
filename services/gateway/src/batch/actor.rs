//! The batch actor run loop.

use std::sync::Arc;
use std::time::Instant;

use qsched_id::SchedulerId;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

use super::message::BatchMessage;
use super::{BatchConfig, BatchError};
use crate::collaborators::{Backend, Snapshot};

/// Owns one scheduler's snapshot and applies batches to it.
pub(crate) struct BatchActor<S> {
    scheduler_id: SchedulerId,
    backend: Backend<S>,
    config: BatchConfig,

    /// Snapshot left over from the last successful persist.
    snapshot: Option<S>,

    batches_processed: u64,
    messages_processed: u64,
}

impl<S: Snapshot> BatchActor<S> {
    pub(crate) fn new(scheduler_id: SchedulerId, backend: Backend<S>, config: BatchConfig) -> Self {
        Self {
            scheduler_id,
            backend,
            config,
            snapshot: None,
            batches_processed: 0,
            messages_processed: 0,
        }
    }

    /// Run until shutdown is signalled or every sender is dropped.
    pub(crate) async fn run(
        mut self,
        mut rx: mpsc::Receiver<BatchMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!(scheduler_id = %self.scheduler_id, "Batch actor started");

        loop {
            let first = tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(
                            scheduler_id = %self.scheduler_id,
                            "Batch actor received shutdown signal"
                        );
                        break;
                    }
                    continue;
                }

                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => {
                        debug!(scheduler_id = %self.scheduler_id, "Batch actor mailbox closed");
                        break;
                    }
                },
            };

            let batch = self.collect(first, &mut rx).await;
            self.process(batch).await;
        }

        // Anything still queued will never be applied.
        rx.close();
        let mut abandoned = 0usize;
        while let Ok(msg) = rx.try_recv() {
            msg.fail(BatchError::ActorStopped);
            abandoned += 1;
        }

        info!(
            scheduler_id = %self.scheduler_id,
            batches_processed = self.batches_processed,
            messages_processed = self.messages_processed,
            abandoned,
            "Batch actor stopped"
        );
    }

    /// Gather the messages that make up one batch.
    async fn collect(
        &self,
        first: BatchMessage,
        rx: &mut mpsc::Receiver<BatchMessage>,
    ) -> Vec<BatchMessage> {
        let max = self.config.max_batch_size.max(1);
        let mut batch = Vec::with_capacity(max.min(64));
        batch.push(first);

        if !self.config.linger.is_zero() {
            let deadline = tokio::time::Instant::now() + self.config.linger;
            while batch.len() < max {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Some(msg)) => batch.push(msg),
                    Ok(None) | Err(_) => break,
                }
            }
        }

        while batch.len() < max {
            match rx.try_recv() {
                Ok(msg) => batch.push(msg),
                Err(_) => break,
            }
        }

        batch
    }

    /// Run one load → apply → persist cycle and answer every caller.
    #[instrument(skip_all, fields(scheduler_id = %self.scheduler_id, batch_size = batch.len()))]
    async fn process(&mut self, batch: Vec<BatchMessage>) {
        let started = Instant::now();
        self.batches_processed += 1;
        self.messages_processed += batch.len() as u64;

        let mut snapshot = match self.snapshot.take() {
            Some(snapshot) => snapshot,
            None => match self.backend.store().load(&self.scheduler_id).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    error!(error = %e, "Failed to load snapshot, failing batch");
                    let e = Arc::new(e);
                    for msg in batch {
                        msg.fail(BatchError::Store(Arc::clone(&e)));
                    }
                    return;
                }
            },
        };

        let scheduler = self.backend.scheduler();
        let applied: Vec<_> = batch
            .into_iter()
            .map(|msg| msg.apply(scheduler, &mut snapshot))
            .collect();
        let rejected = applied.iter().filter(|a| a.is_err()).count();

        if let Err(e) = self
            .backend
            .store()
            .persist(&self.scheduler_id, &snapshot)
            .await
        {
            // The snapshot no longer matches the store; reload next time.
            error!(error = %e, "Failed to persist snapshot, failing batch");
            let e = Arc::new(e);
            for op in applied {
                op.fail(BatchError::Store(Arc::clone(&e)));
            }
            return;
        }

        self.snapshot = Some(snapshot);
        for op in applied {
            op.deliver();
        }

        if rejected > 0 {
            warn!(rejected, "Scheduler rejected ops in batch");
        }
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch complete"
        );
    }
}
