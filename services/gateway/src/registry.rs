//! Registry of per-scheduler batch actors.
//!
//! Actors are created lazily on the first request for a scheduler id and live
//! until [`SchedulerRegistry::shutdown`]. The map is guarded by a
//! `std::sync::RwLock`, which is never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use qsched_id::SchedulerId;
use tracing::info;

use crate::batch::{BatchActorHandle, BatchConfig};
use crate::collaborators::{Backend, Snapshot};

/// Maps each scheduler id to its single batch actor.
pub struct SchedulerRegistry<S> {
    backend: Backend<S>,
    config: BatchConfig,
    actors: RwLock<HashMap<SchedulerId, Arc<BatchActorHandle>>>,
}

impl<S: Snapshot> SchedulerRegistry<S> {
    pub fn new(backend: Backend<S>, config: BatchConfig) -> Self {
        Self {
            backend,
            config,
            actors: RwLock::new(HashMap::new()),
        }
    }

    /// Return the actor for `scheduler_id`, spawning it on first use.
    ///
    /// Concurrent callers for the same id always receive the same actor.
    pub fn get_or_create(&self, scheduler_id: &SchedulerId) -> Arc<BatchActorHandle> {
        if let Some(handle) = self.get(scheduler_id) {
            return handle;
        }

        let mut actors = self.actors.write().unwrap_or_else(PoisonError::into_inner);

        // Another caller may have created it while we waited for the lock.
        if let Some(handle) = actors.get(scheduler_id) {
            return Arc::clone(handle);
        }

        let handle = Arc::new(BatchActorHandle::spawn(
            scheduler_id.clone(),
            self.backend.clone(),
            self.config.clone(),
        ));
        actors.insert(scheduler_id.clone(), Arc::clone(&handle));

        info!(
            scheduler_id = %scheduler_id,
            actors = actors.len(),
            "Spawned batch actor"
        );
        handle
    }

    /// Return the actor for `scheduler_id` if one exists.
    pub fn get(&self, scheduler_id: &SchedulerId) -> Option<Arc<BatchActorHandle>> {
        self.actors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scheduler_id)
            .cloned()
    }

    /// Number of actors spawned so far.
    pub fn len(&self) -> usize {
        self.actors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every actor after its current batch, aborting any that have not
    /// finished within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) {
        let handles: Vec<_> = self
            .actors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        info!(actors = handles.len(), "Stopping batch actors");

        for handle in &handles {
            handle.stop();
        }

        let deadline = tokio::time::Instant::now() + timeout;
        for handle in &handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            handle.stop_and_wait(remaining).await;
        }

        info!("All batch actors stopped");
    }
}
