pub mod arbiter;
pub mod commands;
pub mod events;
pub mod launch;
pub mod live_log;
pub mod machine;
pub mod martingale;
pub mod paper;
pub mod registry;
pub mod worker;
pub mod worker_handle;

pub use arbiter::GlobalOrderArbiter;
pub use commands::{WorkerCommand, WorkerConfig, WorkerState, WorkerStatus};
pub use events::WorkerEvent;
pub use launch::{
    window_position_for, Assignment, AssignmentSource, LaunchCoordinator, LaunchError,
    LaunchReport, LaunchSequencer,
};
pub use live_log::live_log;
pub use machine::{
    auto_close_pips, now_ms, EntryExecutor, EntryPlan, LegOutcome, SkipReason, TickAction,
    TickReport, TradingMachine,
};
pub use martingale::{stake_for, MartingaleState, Outcome, Settlement};
pub use paper::{PaperLauncher, PaperVenue, PaperVenueConfig};
pub use registry::WorkerRegistry;
pub use worker::WorkerActor;
pub use worker_handle::WorkerHandle;
