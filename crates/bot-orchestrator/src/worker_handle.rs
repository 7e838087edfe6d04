use crate::commands::{WorkerCommand, WorkerStatus};
use crate::events::WorkerEvent;
use anyhow::Result;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerCommand>,
    event_tx: broadcast::Sender<WorkerEvent>,
    status_rx: watch::Receiver<WorkerStatus>,
}

impl WorkerHandle {
    #[must_use]
    pub const fn new(
        tx: mpsc::Sender<WorkerCommand>,
        event_tx: broadcast::Sender<WorkerEvent>,
        status_rx: watch::Receiver<WorkerStatus>,
    ) -> Self {
        Self {
            tx,
            event_tx,
            status_rx,
        }
    }

    /// Subscribes to the worker's events from now on.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Last published status, without a round trip to the actor.
    #[must_use]
    pub fn latest_status(&self) -> WorkerStatus {
        self.status_rx.borrow().clone()
    }

    /// Receiver for waiting on status changes.
    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<WorkerStatus> {
        self.status_rx.clone()
    }

    /// Asks the actor for its current status.
    ///
    /// # Errors
    /// Returns an error if the command cannot be sent or the response cannot be received.
    pub async fn get_status(&self) -> Result<WorkerStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(WorkerCommand::GetStatus(tx)).await?;
        let status = rx.await?;
        Ok(status)
    }

    /// Shuts down the worker.
    ///
    /// # Errors
    /// Returns an error if the command cannot be sent to the worker actor.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(WorkerCommand::Shutdown).await?;
        Ok(())
    }

    /// Whether the actor has exited.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
