use crate::launch::AssignmentSource;
use crate::martingale::Settlement;
use chrono::{DateTime, Utc};
use hedge_bot_core::{Instrument, OrderSide, Side, WindowPosition};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerEvent {
    /// Instrument claimed and selected, ticking starts.
    Ready {
        instrument: Instrument,
        source: AssignmentSource,
        position: Option<WindowPosition>,
        selected: bool,
    },

    OrderSubmitted {
        instrument: Instrument,
        side: Side,
        order: OrderSide,
        quantity: u64,
        step: usize,
        timestamp: DateTime<Utc>,
    },

    /// A leg closed and the martingale state moved.
    Settled {
        settlement: Settlement,
        timestamp: DateTime<Utc>,
    },

    AutoClosed {
        instrument: Instrument,
        pips: Decimal,
        timestamp: DateTime<Utc>,
    },

    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}
