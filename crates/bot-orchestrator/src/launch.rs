//! Window launch and per-window instrument assignment.
//!
//! The operator side prepares an ordered instrument list, then opens one
//! venue window per instrument. Each window's worker claims the next list
//! entry on start-up. The cursor is read and written in two steps, so two
//! workers starting at the same instant can claim the same instrument; the
//! launch delay between windows is what keeps that from happening in
//! practice.

use crate::live_log::live_log;
use hedge_bot_core::{
    get_or, keys, put, CoordinationStore, GridLayout, Instrument, LaunchConfig, StoreError,
    VenueAdapter, WindowLauncher, WindowPosition,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Launch control not found after {attempts} attempts")]
    ControlNotFound { attempts: u32 },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Screen slot for the `index`-th window on `grid`.
#[must_use]
pub fn window_position_for(index: usize, instrument: Instrument, grid: &GridLayout) -> WindowPosition {
    let cols = grid.cols.max(1);
    let col = i32::try_from(index % cols).unwrap_or(i32::MAX);
    let row = i32::try_from(index / cols).unwrap_or(i32::MAX);
    WindowPosition {
        instrument,
        x: grid.start_x.saturating_add(col.saturating_mul(grid.width.saturating_add(grid.gap_x))),
        y: grid.start_y.saturating_add(row.saturating_mul(grid.height.saturating_add(grid.gap_y))),
    }
}

/// Where a worker's instrument came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentSource {
    Queue { index: usize },
    RenderedText,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub instrument: Instrument,
    pub source: AssignmentSource,
}

pub struct LaunchCoordinator {
    store: Arc<dyn CoordinationStore>,
    config: LaunchConfig,
}

impl LaunchCoordinator {
    #[must_use]
    pub fn new(store: Arc<dyn CoordinationStore>, config: LaunchConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub const fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Publishes the ordered instrument list, rewinds the cursor and stores
    /// each instrument's window slot.
    ///
    /// # Errors
    /// Returns an error if a store write fails.
    pub async fn prepare_assignment(
        &self,
        instruments: &[Instrument],
    ) -> Result<Vec<WindowPosition>, StoreError> {
        let store = self.store.as_ref();
        let positions: Vec<WindowPosition> = instruments
            .iter()
            .enumerate()
            .map(|(i, &instrument)| window_position_for(i, instrument, &self.config.grid))
            .collect();

        put(store, keys::PENDING_INSTRUMENTS, instruments).await?;
        put(store, keys::ASSIGNMENT_CURSOR, &0usize).await?;
        put(store, keys::WINDOW_POSITIONS, &positions).await?;

        info!("Prepared assignment for {} instruments", instruments.len());
        Ok(positions)
    }

    /// Claims the next pending instrument for the calling window.
    ///
    /// Once the list is used up, the window's own text is probed for an
    /// instrument name, then the configured fallback is used.
    ///
    /// # Errors
    /// Returns an error only if the store fails.
    pub async fn next_instrument(&self, venue: &dyn VenueAdapter) -> Result<Assignment, StoreError> {
        let store = self.store.as_ref();
        let pending: Vec<Instrument> = get_or(store, keys::PENDING_INSTRUMENTS, Vec::new()).await?;
        let cursor: usize = get_or(store, keys::ASSIGNMENT_CURSOR, 0).await?;

        if let Some(&instrument) = pending.get(cursor) {
            put(store, keys::ASSIGNMENT_CURSOR, &(cursor + 1)).await?;
            info!("Assigned {} from queue slot {}", instrument, cursor);
            return Ok(Assignment {
                instrument,
                source: AssignmentSource::Queue { index: cursor },
            });
        }

        let attempts = self.config.probe_attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(instrument) = venue.rendered_text().await.as_deref().and_then(Instrument::detect_in_text) {
                info!("Detected {} from window text", instrument);
                return Ok(Assignment {
                    instrument,
                    source: AssignmentSource::RenderedText,
                });
            }
            if attempt < attempts {
                pause(self.config.probe_delay_ms).await;
            }
        }

        warn!(
            "No instrument left to assign and none detected, using {}",
            self.config.fallback_instrument
        );
        Ok(Assignment {
            instrument: self.config.fallback_instrument,
            source: AssignmentSource::Fallback,
        })
    }

    /// Stored window slot of `instrument`, if one was prepared.
    ///
    /// # Errors
    /// Returns an error if the store read fails.
    pub async fn window_position_of(
        &self,
        instrument: Instrument,
    ) -> Result<Option<WindowPosition>, StoreError> {
        let positions: Vec<WindowPosition> =
            get_or(self.store.as_ref(), keys::WINDOW_POSITIONS, Vec::new()).await?;
        Ok(positions.into_iter().find(|p| p.instrument == instrument))
    }

    /// Selects `instrument` on the venue, retrying while the selector is
    /// missing. Returns whether selection succeeded.
    pub async fn select_instrument_with_retry(
        &self,
        venue: &dyn VenueAdapter,
        instrument: Instrument,
    ) -> bool {
        let attempts = self.config.selection_attempts.max(1);
        for attempt in 1..=attempts {
            if venue.select_instrument(instrument).await {
                debug!("Selected {} on attempt {}", instrument, attempt);
                return true;
            }
            if attempt < attempts {
                pause(self.config.selection_delay_ms).await;
            }
        }
        warn!("Could not select {} after {} attempts", instrument, attempts);
        false
    }
}

/// Outcome of one launch sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchReport {
    pub opened: Vec<WindowPosition>,
    pub failed: Vec<Instrument>,
}

pub struct LaunchSequencer {
    coordinator: LaunchCoordinator,
    launcher: Arc<dyn WindowLauncher>,
}

impl LaunchSequencer {
    #[must_use]
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        launcher: Arc<dyn WindowLauncher>,
        config: LaunchConfig,
    ) -> Self {
        Self {
            coordinator: LaunchCoordinator::new(store, config),
            launcher,
        }
    }

    /// Runs the launch sequence unless a previous one already completed.
    ///
    /// # Errors
    /// See [`LaunchSequencer::launch`].
    pub async fn launch_once(&self, instruments: &[Instrument]) -> Result<Option<LaunchReport>, LaunchError> {
        if get_or(self.coordinator.store.as_ref(), keys::HAS_LAUNCHED, false).await? {
            info!("Windows already launched, skipping auto-launch");
            return Ok(None);
        }
        self.launch(instruments).await.map(Some)
    }

    /// Finds the launch control, then prepares the assignment and opens one
    /// window per instrument. Nothing is written if the control never shows.
    ///
    /// A window that fails to open is logged and skipped.
    ///
    /// # Errors
    /// Returns [`LaunchError::ControlNotFound`] if the launch control never
    /// shows up, and [`LaunchError::Store`] on store failures.
    pub async fn launch(&self, instruments: &[Instrument]) -> Result<LaunchReport, LaunchError> {
        let store = self.coordinator.store.as_ref();
        let config = self.coordinator.config();
        live_log(store, format!("Launching {} windows", instruments.len())).await;

        if !self.discover_control().await {
            let attempts = config.discovery_attempts.max(1);
            live_log(store, "Launch control not found, aborting launch").await;
            return Err(LaunchError::ControlNotFound { attempts });
        }

        let positions = self.coordinator.prepare_assignment(instruments).await?;

        let mut report = LaunchReport::default();
        for (ordinal, position) in positions.iter().enumerate() {
            match self.launcher.open_window(position.instrument, position, ordinal).await {
                Ok(()) => {
                    live_log(store, format!("[{}] Window launched", position.instrument)).await;
                    report.opened.push(*position);
                }
                Err(e) => {
                    error!("[{}] Failed to launch window: {:#}", position.instrument, e);
                    report.failed.push(position.instrument);
                }
            }
            if ordinal + 1 < positions.len() {
                pause(config.trigger_delay_ms).await;
            }
        }

        put(store, keys::HAS_LAUNCHED, &true).await?;
        live_log(
            store,
            format!("Launch complete: {} opened, {} failed", report.opened.len(), report.failed.len()),
        )
        .await;
        Ok(report)
    }

    async fn discover_control(&self) -> bool {
        let attempts = self.coordinator.config().discovery_attempts.max(1);
        for attempt in 1..=attempts {
            if self.launcher.find_launch_control().await {
                return true;
            }
            debug!("Launch control not found (attempt {}/{})", attempt, attempts);
            if attempt < attempts {
                pause(self.coordinator.config().discovery_delay_ms).await;
            }
        }
        false
    }
}

async fn pause(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use hedge_bot_core::{MemoryStore, OrderSide, PositionSnapshot};
    use parking_lot::Mutex;

    struct TextVenue {
        text: Option<String>,
        selectable_after: u32,
        select_calls: Mutex<u32>,
    }

    impl TextVenue {
        fn new(text: Option<&str>) -> Self {
            Self {
                text: text.map(str::to_string),
                selectable_after: 1,
                select_calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl VenueAdapter for TextVenue {
        async fn read_position(&self, _instrument: Instrument) -> Option<PositionSnapshot> {
            None
        }
        async fn submit_order(&self, _side: OrderSide, _quantity: u64) -> Result<()> {
            Ok(())
        }
        async fn close_all(&self) -> Result<()> {
            Ok(())
        }
        async fn rendered_text(&self) -> Option<String> {
            self.text.clone()
        }
        async fn select_instrument(&self, _instrument: Instrument) -> bool {
            let mut calls = self.select_calls.lock();
            *calls += 1;
            *calls >= self.selectable_after
        }
    }

    struct RecordingLauncher {
        control: bool,
        fail_on: Option<Instrument>,
        opened: Mutex<Vec<(Instrument, usize)>>,
        probes: Mutex<u32>,
    }

    impl RecordingLauncher {
        fn new(control: bool) -> Self {
            Self {
                control,
                fail_on: None,
                opened: Mutex::new(Vec::new()),
                probes: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl WindowLauncher for RecordingLauncher {
        async fn find_launch_control(&self) -> bool {
            *self.probes.lock() += 1;
            self.control
        }
        async fn open_window(&self, instrument: Instrument, _position: &WindowPosition, ordinal: usize) -> Result<()> {
            if self.fail_on == Some(instrument) {
                bail!("popup blocked");
            }
            self.opened.lock().push((instrument, ordinal));
            Ok(())
        }
    }

    fn coordinator(store: Arc<MemoryStore>) -> LaunchCoordinator {
        LaunchCoordinator::new(store, LaunchConfig::default().without_delays())
    }

    #[test]
    fn test_window_positions_tile_two_columns() {
        let grid = GridLayout::default();
        let xs: Vec<(i32, i32)> = (0..4)
            .map(|i| {
                let p = window_position_for(i, Instrument::ALL[i], &grid);
                (p.x, p.y)
            })
            .collect();
        assert_eq!(xs, vec![(50, 50), (400, 50), (50, 600), (400, 600)]);
    }

    #[test]
    fn test_huge_grid_saturates_instead_of_overflowing() {
        let grid = GridLayout {
            width: i32::MAX,
            gap_x: 20,
            height: i32::MAX,
            gap_y: 50,
            ..GridLayout::default()
        };
        let p = window_position_for(3, Instrument::GbpJpy, &grid);
        assert_eq!((p.x, p.y), (i32::MAX, i32::MAX));
    }

    #[tokio::test]
    async fn test_next_instrument_hands_out_each_entry_once() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = coordinator(store);
        let venue = TextVenue::new(None);
        coordinator.prepare_assignment(&Instrument::ALL).await.unwrap();

        let mut claimed = Vec::new();
        for _ in 0..4 {
            claimed.push(coordinator.next_instrument(&venue).await.unwrap().instrument);
        }
        assert_eq!(claimed, Instrument::ALL.to_vec());

        let extra = coordinator.next_instrument(&venue).await.unwrap();
        assert_eq!(extra.source, AssignmentSource::Fallback);
        assert_eq!(extra.instrument, Instrument::UsdJpy);
    }

    #[tokio::test]
    async fn test_exhausted_queue_detects_instrument_from_text() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = coordinator(store);
        let venue = TextVenue::new(Some("ポンド/円 Bid 190.12"));

        let assignment = coordinator.next_instrument(&venue).await.unwrap();
        assert_eq!(
            assignment,
            Assignment {
                instrument: Instrument::GbpJpy,
                source: AssignmentSource::RenderedText,
            }
        );
    }

    #[tokio::test]
    async fn test_window_position_of_reads_prepared_slots() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = coordinator(store);
        coordinator
            .prepare_assignment(&[Instrument::EurUsd, Instrument::GbpJpy])
            .await
            .unwrap();

        let slot = coordinator.window_position_of(Instrument::GbpJpy).await.unwrap().unwrap();
        assert_eq!((slot.x, slot.y), (400, 50));
        assert!(coordinator.window_position_of(Instrument::AudJpy).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_select_instrument_retries_until_selector_appears() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = coordinator(store);
        let venue = TextVenue {
            selectable_after: 3,
            ..TextVenue::new(None)
        };
        assert!(coordinator.select_instrument_with_retry(&venue, Instrument::AudJpy).await);
        assert_eq!(*venue.select_calls.lock(), 3);

        let never = TextVenue {
            selectable_after: 100,
            ..TextVenue::new(None)
        };
        assert!(!coordinator.select_instrument_with_retry(&never, Instrument::AudJpy).await);
        assert_eq!(*never.select_calls.lock(), 5);
    }

    #[tokio::test]
    async fn test_launch_opens_every_window_and_sets_flag() {
        let store = Arc::new(MemoryStore::new());
        let launcher = Arc::new(RecordingLauncher {
            fail_on: Some(Instrument::AudJpy),
            ..RecordingLauncher::new(true)
        });
        let sequencer = LaunchSequencer::new(store.clone(), launcher.clone(), LaunchConfig::default().without_delays());

        let report = sequencer.launch(&Instrument::ALL).await.unwrap();

        assert_eq!(report.opened.len(), 3);
        assert_eq!(report.failed, vec![Instrument::AudJpy]);
        assert_eq!(
            *launcher.opened.lock(),
            vec![(Instrument::UsdJpy, 0), (Instrument::EurUsd, 1), (Instrument::GbpJpy, 3)]
        );
        assert!(get_or(store.as_ref(), keys::HAS_LAUNCHED, false).await.unwrap());

        // Second auto-launch is a no-op.
        assert!(sequencer.launch_once(&Instrument::ALL).await.unwrap().is_none());
        assert_eq!(launcher.opened.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_control_fails_without_touching_run_flag() {
        let store = Arc::new(MemoryStore::new());
        put(store.as_ref(), keys::RUN_FLAG, &true).await.unwrap();
        put(store.as_ref(), keys::PENDING_INSTRUMENTS, &[Instrument::AudJpy]).await.unwrap();
        put(store.as_ref(), keys::ASSIGNMENT_CURSOR, &1usize).await.unwrap();
        let launcher = Arc::new(RecordingLauncher::new(false));
        let sequencer = LaunchSequencer::new(store.clone(), launcher.clone(), LaunchConfig::default().without_delays());

        let err = sequencer.launch_once(&Instrument::ALL).await.unwrap_err();

        assert!(matches!(err, LaunchError::ControlNotFound { attempts: 10 }));
        assert_eq!(*launcher.probes.lock(), 10);
        assert!(launcher.opened.lock().is_empty());
        assert!(get_or(store.as_ref(), keys::RUN_FLAG, false).await.unwrap());
        assert!(!get_or(store.as_ref(), keys::HAS_LAUNCHED, false).await.unwrap());

        // The earlier assignment is left alone.
        let pending: Vec<Instrument> =
            get_or(store.as_ref(), keys::PENDING_INSTRUMENTS, Vec::new()).await.unwrap();
        assert_eq!(pending, vec![Instrument::AudJpy]);
        assert_eq!(get_or(store.as_ref(), keys::ASSIGNMENT_CURSOR, 0usize).await.unwrap(), 1);
        assert_eq!(store.get(keys::WINDOW_POSITIONS).await.unwrap(), None);
    }
}
