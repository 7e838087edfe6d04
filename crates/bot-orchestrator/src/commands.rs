use crate::events::WorkerEvent;
use chrono::{DateTime, Utc};
use hedge_bot_core::{DisplayState, Instrument, LaunchConfig, WorkerTiming};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

#[derive(Debug)]
pub enum WorkerCommand {
    GetStatus(oneshot::Sender<WorkerStatus>),
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub worker_id: String,
    #[serde(default)]
    pub timing: WorkerTiming,
    #[serde(default)]
    pub launch: LaunchConfig,
}

impl WorkerConfig {
    #[must_use]
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            timing: WorkerTiming::default(),
            launch: LaunchConfig::default(),
        }
    }

    #[must_use]
    pub fn with_timing(mut self, timing: WorkerTiming) -> Self {
        self.timing = timing;
        self
    }

    #[must_use]
    pub fn with_launch(mut self, launch: LaunchConfig) -> Self {
        self.launch = launch;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// Claiming an instrument and selecting it on the venue.
    Starting,
    Running,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub state: WorkerState,
    pub instrument: Option<Instrument>,
    pub ticks: u64,
    pub last_heartbeat: DateTime<Utc>,
    /// Last display state the machine published.
    pub display: Option<DisplayState>,
    /// Last 10 events.
    pub recent_events: Vec<WorkerEvent>,
    pub error: Option<String>,
}

impl WorkerStatus {
    #[must_use]
    pub fn starting(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            state: WorkerState::Starting,
            instrument: None,
            ticks: 0,
            last_heartbeat: Utc::now(),
            display: None,
            recent_events: Vec::new(),
            error: None,
        }
    }
}
