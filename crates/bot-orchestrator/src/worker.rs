use crate::arbiter::GlobalOrderArbiter;
use crate::commands::{WorkerCommand, WorkerConfig, WorkerState, WorkerStatus};
use crate::events::WorkerEvent;
use crate::launch::LaunchCoordinator;
use crate::live_log::live_log;
use crate::machine::{now_ms, EntryExecutor, EntryPlan, LegOutcome, TickAction, TradingMachine};
use crate::martingale::Outcome;
use anyhow::{Context, Result};
use chrono::Utc;
use hedge_bot_core::{
    keys, CoordinationStore, DisplayState, Instrument, Settings, StoreError, VenueAdapter,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;

const RECENT_EVENTS: usize = 10;

/// Settings snapshot, re-parsed only when the stored value changes.
#[derive(Default)]
struct SettingsCache {
    raw: Option<Value>,
    current: Settings,
}

impl SettingsCache {
    async fn refresh(&mut self, store: &dyn CoordinationStore) -> Result<&Settings, StoreError> {
        let raw = store.get(keys::SETTINGS).await?;
        if raw != self.raw {
            self.current = raw.as_ref().map_or_else(Settings::default, Settings::from_value);
            self.raw = raw;
            tracing::debug!("Settings snapshot reloaded");
        }
        Ok(&self.current)
    }
}

/// One venue window's trading loop.
pub struct WorkerActor {
    config: WorkerConfig,
    store: Arc<dyn CoordinationStore>,
    venue: Arc<dyn VenueAdapter>,
    arbiter: Arc<GlobalOrderArbiter>,
    rx: mpsc::Receiver<WorkerCommand>,

    // Event streaming
    event_tx: broadcast::Sender<WorkerEvent>,
    status_tx: watch::Sender<WorkerStatus>,
    recent_events: VecDeque<WorkerEvent>,

    state: WorkerState,
    instrument: Option<Instrument>,
    ticks: u64,
    display: Option<DisplayState>,
    last_error: Option<String>,
    settings: SettingsCache,
}

impl WorkerActor {
    #[must_use]
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn CoordinationStore>,
        venue: Arc<dyn VenueAdapter>,
        rx: mpsc::Receiver<WorkerCommand>,
        event_tx: broadcast::Sender<WorkerEvent>,
        status_tx: watch::Sender<WorkerStatus>,
    ) -> Self {
        let arbiter = Arc::new(GlobalOrderArbiter::new(store.clone()));
        Self::with_arbiter(config, store, venue, arbiter, rx, event_tx, status_tx)
    }

    /// Same as [`WorkerActor::new`] with a caller-provided arbiter, for
    /// seeded wait draws.
    #[must_use]
    pub fn with_arbiter(
        config: WorkerConfig,
        store: Arc<dyn CoordinationStore>,
        venue: Arc<dyn VenueAdapter>,
        arbiter: Arc<GlobalOrderArbiter>,
        rx: mpsc::Receiver<WorkerCommand>,
        event_tx: broadcast::Sender<WorkerEvent>,
        status_tx: watch::Sender<WorkerStatus>,
    ) -> Self {
        Self {
            config,
            store,
            venue,
            arbiter,
            rx,
            event_tx,
            status_tx,
            recent_events: VecDeque::with_capacity(RECENT_EVENTS),
            state: WorkerState::Starting,
            instrument: None,
            ticks: 0,
            display: None,
            last_error: None,
            settings: SettingsCache::default(),
        }
    }

    /// Claims an instrument, then ticks until shut down.
    ///
    /// # Errors
    /// Returns an error if start-up cannot reach the store. Once ticking,
    /// failures are logged and reported as events and the loop keeps going.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!("Worker {} starting", self.config.worker_id);

        let instrument = match self.start_up().await {
            Ok(instrument) => instrument,
            Err(e) => {
                self.state = WorkerState::Error;
                self.emit_error_event(format!("Start-up failed: {e:#}"));
                self.publish_status();
                return Err(e);
            }
        };

        let machine = TradingMachine::new(instrument, self.store.clone(), self.venue.clone());
        let executor = machine.executor(self.arbiter.clone(), self.config.timing.clone());
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Vec<LegOutcome>>();

        self.state = WorkerState::Running;
        self.publish_status();

        let period = self.config.timing.tick_interval().max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some((plan, settings)) = self.on_tick(&machine).await {
                        Self::spawn_entry(&executor, plan, settings, done_tx.clone());
                    }
                }
                Some(outcomes) = done_rx.recv() => self.on_entry_done(instrument, outcomes),
                cmd = self.rx.recv() => match cmd {
                    Some(WorkerCommand::GetStatus(tx)) => {
                        let _ = tx.send(self.status());
                    }
                    Some(WorkerCommand::Shutdown) | None => break,
                },
            }
        }

        self.state = WorkerState::Stopped;
        self.publish_status();
        tracing::info!("Worker {} ({}) stopped", self.config.worker_id, instrument);
        Ok(())
    }

    async fn start_up(&mut self) -> Result<Instrument> {
        let coordinator = LaunchCoordinator::new(self.store.clone(), self.config.launch.clone());

        let assignment = coordinator
            .next_instrument(self.venue.as_ref())
            .await
            .context("Failed to claim an instrument")?;
        let instrument = assignment.instrument;

        let selected = coordinator
            .select_instrument_with_retry(self.venue.as_ref(), instrument)
            .await;
        let position = coordinator
            .window_position_of(instrument)
            .await
            .context("Failed to read window positions")?;

        self.instrument = Some(instrument);
        self.display = Some(DisplayState::waiting(instrument));
        live_log(self.store.as_ref(), format!("[{instrument}] Window ready")).await;
        self.add_event(WorkerEvent::Ready {
            instrument,
            source: assignment.source,
            position,
            selected,
        });
        Ok(instrument)
    }

    /// Runs one tick and returns the entry to start, if any.
    async fn on_tick(&mut self, machine: &TradingMachine) -> Option<(EntryPlan, Settings)> {
        self.ticks += 1;

        let refreshed = self.settings.refresh(self.store.as_ref()).await.cloned();
        let settings = match refreshed {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Worker {} keeps previous settings: {}", self.config.worker_id, e);
                self.settings.current.clone()
            }
        };

        let entry = match machine.tick(&settings, now_ms()).await {
            Ok(report) => {
                let entry = report.entry();
                for settlement in report.settlements {
                    if settlement.outcome != Outcome::BreakEven {
                        self.add_event(WorkerEvent::Settled {
                            settlement,
                            timestamp: Utc::now(),
                        });
                    }
                }
                if let TickAction::AutoClosed { pips } = report.action {
                    self.add_event(WorkerEvent::AutoClosed {
                        instrument: machine.instrument(),
                        pips,
                        timestamp: Utc::now(),
                    });
                }
                if report.display.is_some() {
                    self.display = report.display;
                }
                entry.map(|plan| (plan, settings))
            }
            Err(e) => {
                tracing::error!("Worker {} tick failed: {}", self.config.worker_id, e);
                self.emit_error_event(format!("Tick failed: {e}"));
                None
            }
        };

        self.publish_status();
        entry
    }

    fn spawn_entry(
        executor: &EntryExecutor,
        plan: EntryPlan,
        settings: Settings,
        done_tx: mpsc::UnboundedSender<Vec<LegOutcome>>,
    ) {
        let Some(guard) = executor.try_begin() else {
            return;
        };
        let executor = executor.clone();
        tokio::spawn(async move {
            let outcomes = executor.execute(guard, plan, &settings).await;
            let _ = done_tx.send(outcomes);
        });
    }

    fn on_entry_done(&mut self, instrument: Instrument, outcomes: Vec<LegOutcome>) {
        for outcome in outcomes {
            match outcome {
                LegOutcome::Submitted {
                    side,
                    order,
                    quantity,
                    step,
                } => self.add_event(WorkerEvent::OrderSubmitted {
                    instrument,
                    side,
                    order,
                    quantity,
                    step,
                    timestamp: Utc::now(),
                }),
                LegOutcome::Failed { side, reason } => {
                    self.emit_error_event(format!("{instrument} {side} order failed: {reason}"));
                }
                _ => {}
            }
        }
        self.publish_status();
    }

    fn status(&self) -> WorkerStatus {
        WorkerStatus {
            worker_id: self.config.worker_id.clone(),
            state: self.state,
            instrument: self.instrument,
            ticks: self.ticks,
            last_heartbeat: Utc::now(),
            display: self.display.clone(),
            recent_events: self.recent_events.iter().cloned().collect(),
            error: self.last_error.clone(),
        }
    }

    fn publish_status(&self) {
        let _ = self.status_tx.send(self.status());
    }

    fn emit_error_event(&mut self, message: String) {
        self.last_error = Some(message.clone());
        self.add_event(WorkerEvent::Error {
            message,
            timestamp: Utc::now(),
        });
    }

    /// Adds an event to recent events and broadcasts it
    fn add_event(&mut self, event: WorkerEvent) {
        if self.recent_events.len() >= RECENT_EVENTS {
            self.recent_events.pop_front();
        }
        self.recent_events.push_back(event.clone());

        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::{PaperVenue, PaperVenueConfig};
    use hedge_bot_core::{put, LaunchConfig, MemoryStore, MsRange, PositionState, WorkerTiming};
    use tokio::time::timeout;

    fn spawn(
        store: Arc<MemoryStore>,
        venue: Arc<PaperVenue>,
    ) -> (
        mpsc::Sender<WorkerCommand>,
        broadcast::Receiver<WorkerEvent>,
        watch::Receiver<WorkerStatus>,
        tokio::task::JoinHandle<Result<()>>,
    ) {
        let config = WorkerConfig::new("w-test")
            .with_timing(WorkerTiming::immediate())
            .with_launch(LaunchConfig::default().without_delays());
        let (tx, rx) = mpsc::channel(8);
        let (event_tx, event_rx) = broadcast::channel(64);
        let (status_tx, status_rx) = watch::channel(WorkerStatus::starting("w-test"));
        let arbiter = Arc::new(GlobalOrderArbiter::with_seed(store.clone(), 1));
        let actor = WorkerActor::with_arbiter(config, store, venue, arbiter, rx, event_tx, status_tx);
        (tx, event_rx, status_rx, tokio::spawn(actor.run()))
    }

    async fn fast_settings(store: &MemoryStore) {
        let settings = Settings {
            global_interval: MsRange::fixed(0),
            order_cooldown_ms: 0,
            ..Settings::default()
        };
        put(store, keys::SETTINGS, &settings).await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_claims_instrument_and_reports_ready() {
        let store = Arc::new(MemoryStore::new());
        put(store.as_ref(), keys::PENDING_INSTRUMENTS, &[Instrument::AudJpy]).await.unwrap();
        let venue = Arc::new(PaperVenue::new(Instrument::UsdJpy, PaperVenueConfig::frozen()));
        let (tx, mut events, _status, task) = spawn(store, venue.clone());

        let ready = timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
        match ready {
            WorkerEvent::Ready {
                instrument,
                selected,
                ..
            } => {
                assert_eq!(instrument, Instrument::AudJpy);
                assert!(selected);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(venue.instrument(), Instrument::AudJpy);

        let (status_tx, status_rx) = tokio::sync::oneshot::channel();
        tx.send(WorkerCommand::GetStatus(status_tx)).await.unwrap();
        let status = status_rx.await.unwrap();
        assert_eq!(status.state, WorkerState::Running);
        assert_eq!(status.instrument, Some(Instrument::AudJpy));

        tx.send(WorkerCommand::Shutdown).await.unwrap();
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_running_worker_opens_hedge_then_holds() {
        let store = Arc::new(MemoryStore::new());
        fast_settings(&store).await;
        put(store.as_ref(), keys::RUN_FLAG, &true).await.unwrap();
        let venue = Arc::new(PaperVenue::new(Instrument::UsdJpy, PaperVenueConfig::frozen()));
        let (tx, mut events, mut status, task) = spawn(store, venue.clone());

        let mut orders = Vec::new();
        while orders.len() < 2 {
            let event = timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
            if let WorkerEvent::OrderSubmitted { order, quantity, .. } = event {
                orders.push((order, quantity));
            }
        }
        assert_eq!(
            orders,
            vec![
                (hedge_bot_core::OrderSide::Buy, 1000),
                (hedge_bot_core::OrderSide::Sell, 1000)
            ]
        );

        timeout(
            Duration::from_secs(5),
            status.wait_for(|s| s.display.as_ref().is_some_and(|d| d.status == PositionState::Hedged)),
        )
        .await
        .unwrap()
        .unwrap();

        tx.send(WorkerCommand::Shutdown).await.unwrap();
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
        let snapshot = venue.read_position(Instrument::UsdJpy).await.unwrap();
        assert_eq!((snapshot.long_qty, snapshot.short_qty), (1000, 1000));
    }

    #[tokio::test]
    async fn test_worker_stops_when_handle_dropped() {
        let store = Arc::new(MemoryStore::new());
        let venue = Arc::new(PaperVenue::new(Instrument::UsdJpy, PaperVenueConfig::frozen()));
        let (tx, _events, status, task) = spawn(store, venue);

        drop(tx);
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
        assert_eq!(status.borrow().state, WorkerState::Stopped);
    }
}
