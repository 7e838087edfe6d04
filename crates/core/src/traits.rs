use crate::events::{PositionSnapshot, WindowPosition};
use crate::instrument::{Instrument, OrderSide};
use crate::store::StoreError;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The stored value matched `expected` and was replaced.
    Swapped,
    /// Another writer got there first; nothing was written.
    Conflict,
    /// The backend has no atomic read-modify-write.
    Unsupported,
}

/// Shared key/value store, the only channel between workers.
///
/// Writes from one worker reach the others only eventually. There are no
/// transactions and concurrent sets are last-write-wins.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Writes `new` only if the current value equals `expected` (`None` means
    /// absent). Backends without an atomic primitive keep the default.
    async fn compare_and_set(
        &self,
        _key: &str,
        _expected: Option<&Value>,
        _new: Value,
    ) -> Result<CasOutcome, StoreError> {
        Ok(CasOutcome::Unsupported)
    }
}

/// Capabilities a worker needs from its venue window.
///
/// How quotes are read or buttons pressed is the adapter's business.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Current legs and spread, or `None` when the venue shows nothing usable.
    async fn read_position(&self, instrument: Instrument) -> Option<PositionSnapshot>;

    /// Fire-and-forget submission. The next tick's read confirms the effect.
    async fn submit_order(&self, side: OrderSide, quantity: u64) -> Result<()>;

    async fn close_all(&self) -> Result<()>;

    /// Rendered window text, used to guess the instrument when no
    /// assignment is left.
    async fn rendered_text(&self) -> Option<String> {
        None
    }

    /// Switches the window to `instrument`. Returns false while the
    /// selection control cannot be found.
    async fn select_instrument(&self, _instrument: Instrument) -> bool {
        true
    }
}

/// Operator-side control that opens one venue window per instrument.
#[async_trait]
pub trait WindowLauncher: Send + Sync {
    async fn find_launch_control(&self) -> bool;

    async fn open_window(
        &self,
        instrument: Instrument,
        position: &WindowPosition,
        ordinal: usize,
    ) -> Result<()>;
}
