use crate::commands::{WorkerConfig, WorkerStatus};
use crate::live_log::live_log;
use crate::worker::WorkerActor;
use crate::worker_handle::WorkerHandle;
use anyhow::{bail, Context, Result};
use hedge_bot_core::{get_or, keys, put, CoordinationStore, Settings, VenueAdapter};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, RwLock};

/// Workers running in this process, plus the operator controls that act on
/// the shared store.
pub struct WorkerRegistry {
    store: Arc<dyn CoordinationStore>,
    workers: Arc<RwLock<HashMap<String, WorkerHandle>>>,
}

impl WorkerRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            workers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn CoordinationStore> {
        self.store.clone()
    }

    /// Spawns a worker driving `venue`.
    ///
    /// # Errors
    /// Returns an error if a worker with the same id is already registered.
    pub async fn spawn_worker(
        &self,
        config: WorkerConfig,
        venue: Arc<dyn VenueAdapter>,
    ) -> Result<WorkerHandle> {
        let mut workers = self.workers.write().await;
        if workers.contains_key(&config.worker_id) {
            bail!("Worker {} already exists", config.worker_id);
        }

        let (tx, rx) = mpsc::channel(32);
        let (event_tx, _event_rx) = broadcast::channel(256);
        let (status_tx, status_rx) = watch::channel(WorkerStatus::starting(config.worker_id.clone()));

        let handle = WorkerHandle::new(tx, event_tx.clone(), status_rx);

        let worker_id = config.worker_id.clone();
        let actor = WorkerActor::new(config, self.store.clone(), venue, rx, event_tx, status_tx);
        let worker_id_for_task = worker_id.clone();
        tokio::spawn(async move {
            if let Err(e) = actor.run().await {
                tracing::error!("Worker {} error: {:#}", worker_id_for_task, e);
            }
        });

        workers.insert(worker_id, handle.clone());
        Ok(handle)
    }

    #[must_use]
    pub async fn get_worker(&self, worker_id: &str) -> Option<WorkerHandle> {
        self.workers.read().await.get(worker_id).cloned()
    }

    /// Removes and shuts down the worker with the given ID.
    ///
    /// # Errors
    /// Returns an error if the shutdown command cannot be delivered.
    pub async fn remove_worker(&self, worker_id: &str) -> Result<()> {
        let removed = self.workers.write().await.remove(worker_id);
        if let Some(handle) = removed {
            if !handle.is_closed() {
                handle.shutdown().await?;
            }
        }
        Ok(())
    }

    /// Registered worker ids, sorted.
    #[must_use]
    pub async fn list_workers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Last published status of every worker, sorted by id.
    #[must_use]
    pub async fn statuses(&self) -> Vec<WorkerStatus> {
        let mut statuses: Vec<WorkerStatus> = self
            .workers
            .read()
            .await
            .values()
            .map(WorkerHandle::latest_status)
            .collect();
        statuses.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        statuses
    }

    /// Writes the settings snapshot every worker re-reads each tick.
    ///
    /// # Errors
    /// Returns an error if the store write fails.
    pub async fn publish_settings(&self, settings: &Settings) -> Result<()> {
        put(self.store.as_ref(), keys::SETTINGS, settings)
            .await
            .context("Failed to publish settings")?;
        tracing::info!("Settings published");
        Ok(())
    }

    /// Flips the shared run flag. Entries already in flight still complete.
    ///
    /// # Errors
    /// Returns an error if the store write fails.
    pub async fn set_running(&self, running: bool) -> Result<()> {
        put(self.store.as_ref(), keys::RUN_FLAG, &running)
            .await
            .context("Failed to write run flag")?;
        live_log(self.store.as_ref(), if running { "Trading started" } else { "Trading stopped" }).await;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the store read fails.
    pub async fn is_running(&self) -> Result<bool> {
        Ok(get_or(self.store.as_ref(), keys::RUN_FLAG, false).await?)
    }

    /// Wipes every session key: run flag, log, launch state, lock and all
    /// per-instrument state. The settings snapshot is kept.
    ///
    /// # Errors
    /// Returns an error if a store removal fails.
    pub async fn reset_state(&self) -> Result<usize> {
        let keys = keys::all_state_keys();
        for key in &keys {
            self.store
                .remove(key)
                .await
                .with_context(|| format!("Failed to remove {key}"))?;
        }
        tracing::warn!("Reset {} state keys", keys.len());
        Ok(keys.len())
    }

    /// Shuts down all workers in the registry.
    ///
    /// # Errors
    /// Returns an error if any shutdown command cannot be delivered.
    pub async fn shutdown_all(&self) -> Result<()> {
        let handles: Vec<_> = self.workers.read().await.values().cloned().collect();
        for handle in handles {
            if !handle.is_closed() {
                handle.shutdown().await?;
            }
        }
        Ok(())
    }
}
