use crate::instrument::{Instrument, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Venue-sourced position view, refreshed every tick and never persisted
/// beyond what settlement detection needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub long_qty: u64,
    pub short_qty: u64,
    pub pl_long: Decimal,
    pub pl_short: Decimal,
    pub spread: Decimal,
}

impl PositionSnapshot {
    #[must_use]
    pub fn flat(spread: Decimal) -> Self {
        Self {
            long_qty: 0,
            short_qty: 0,
            pl_long: Decimal::ZERO,
            pl_short: Decimal::ZERO,
            spread,
        }
    }

    #[must_use]
    pub const fn qty(&self, side: Side) -> u64 {
        match side {
            Side::Long => self.long_qty,
            Side::Short => self.short_qty,
        }
    }

    #[must_use]
    pub const fn pl(&self, side: Side) -> Decimal {
        match side {
            Side::Long => self.pl_long,
            Side::Short => self.pl_short,
        }
    }

    #[must_use]
    pub const fn total_qty(&self) -> u64 {
        self.long_qty + self.short_qty
    }

    #[must_use]
    pub fn total_pl(&self) -> Decimal {
        self.pl_long + self.pl_short
    }

    #[must_use]
    pub const fn state(&self) -> PositionState {
        PositionState::from_quantities(self.long_qty, self.short_qty)
    }
}

/// Leg occupancy derived from the current quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Flat,
    LongOnly,
    ShortOnly,
    Hedged,
}

impl PositionState {
    #[must_use]
    pub const fn from_quantities(long_qty: u64, short_qty: u64) -> Self {
        match (long_qty > 0, short_qty > 0) {
            (false, false) => Self::Flat,
            (true, false) => Self::LongOnly,
            (false, true) => Self::ShortOnly,
            (true, true) => Self::Hedged,
        }
    }
}

/// Per-instrument state published every tick for external display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayState {
    pub instrument: Instrument,
    pub status: PositionState,
    pub ordering: bool,
    pub spread: Decimal,
    pub max_spread: Decimal,
    pub long_qty: u64,
    pub short_qty: u64,
    pub pl_long: Decimal,
    pub pl_short: Decimal,
    pub win_streak_long: u32,
    pub win_streak_short: u32,
    pub step_long: usize,
    pub step_short: usize,
    pub updated_at: DateTime<Utc>,
}

impl DisplayState {
    /// Placeholder published before the first successful venue read.
    #[must_use]
    pub fn waiting(instrument: Instrument) -> Self {
        Self {
            instrument,
            status: PositionState::Flat,
            ordering: false,
            spread: Decimal::ZERO,
            max_spread: Decimal::ZERO,
            long_qty: 0,
            short_qty: 0,
            pl_long: Decimal::ZERO,
            pl_short: Decimal::ZERO,
            win_streak_long: 0,
            win_streak_short: 0,
            step_long: 1,
            step_short: 1,
            updated_at: Utc::now(),
        }
    }
}

/// Screen slot assigned to an instrument's venue window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPosition {
    pub instrument: Instrument,
    pub x: i32,
    pub y: i32,
}
