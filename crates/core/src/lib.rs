pub mod config;
pub mod config_loader;
pub mod config_watcher;
pub mod events;
pub mod instrument;
pub mod keys;
pub mod store;
pub mod traits;

pub use config::{
    AppConfig, AutoCloseRule, GridLayout, LaunchConfig, MsRange, PerInstrument, Settings,
    StoreBackend, StoreConfig, WorkerTiming,
};
pub use config_loader::{ConfigLoader, DEFAULT_CONFIG_PATH};
pub use config_watcher::ConfigWatcher;
pub use events::{DisplayState, PositionSnapshot, PositionState, WindowPosition};
pub use instrument::{Instrument, OrderSide, Side};
pub use keys::InstrumentKey;
pub use store::{get_or, put, FileStore, MemoryStore, StoreError};
pub use traits::{CasOutcome, CoordinationStore, VenueAdapter, WindowLauncher};
