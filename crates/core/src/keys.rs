//! Flat store key layout shared by workers and the operator side.

use crate::instrument::{Instrument, Side};

pub const PREFIX: &str = "hedgebot";

/// Global run flag gating new entries.
pub const RUN_FLAG: &str = "hedgebot_run";
/// Last live log line.
pub const LIVE_LOG: &str = "hedgebot_log";
/// Set once the launch sequence completed.
pub const HAS_LAUNCHED: &str = "hedgebot_has_launched";
/// Published settings snapshot.
pub const SETTINGS: &str = "hedgebot_settings";
/// Ordered instruments waiting to be claimed by workers.
pub const PENDING_INSTRUMENTS: &str = "hedgebot_pending_instruments";
/// Next index into the pending list.
pub const ASSIGNMENT_CURSOR: &str = "hedgebot_assignment_cursor";
/// Window positions laid out for the pending list.
pub const WINDOW_POSITIONS: &str = "hedgebot_window_positions";
/// Timestamp (ms) of the last order accepted by the arbiter.
pub const GLOBAL_ORDER_LOCK: &str = "hedgebot_global_last_order";

/// Per-instrument, per-concern keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKey {
    Step(Side),
    WinStreak(Side),
    SettledPl(Side),
    LastPl(Side),
    PrevQty(Side),
    LastOrder,
    Display,
}

impl InstrumentKey {
    #[must_use]
    pub fn for_instrument(self, instrument: Instrument) -> String {
        let code = instrument.code();
        match self {
            Self::Step(side) => format!("{PREFIX}_{code}_STEP_{}", side.key_suffix()),
            Self::WinStreak(side) => format!("{PREFIX}_{code}_STREAK_{}", side.key_suffix()),
            Self::SettledPl(side) => format!("{PREFIX}_{code}_SETTLED_PL_{}", side.key_suffix()),
            Self::LastPl(side) => format!("{PREFIX}_{code}_LAST_PL_{}", side.key_suffix()),
            Self::PrevQty(side) => format!("{PREFIX}_{code}_PREV_QTY_{}", side.key_suffix()),
            Self::LastOrder => format!("{PREFIX}_{code}_LAST_ORDER"),
            Self::Display => format!("{PREFIX}_UI_{code}"),
        }
    }

    /// Every per-instrument key.
    #[must_use]
    pub fn all() -> Vec<Self> {
        let mut keys = Vec::with_capacity(12);
        for side in [Side::Long, Side::Short] {
            keys.extend([
                Self::Step(side),
                Self::WinStreak(side),
                Self::SettledPl(side),
                Self::LastPl(side),
                Self::PrevQty(side),
            ]);
        }
        keys.push(Self::LastOrder);
        keys.push(Self::Display);
        keys
    }
}

/// Every key an operator reset wipes.
///
/// The settings snapshot is configuration, not session state, and survives.
#[must_use]
pub fn all_state_keys() -> Vec<String> {
    let mut keys: Vec<String> = [
        RUN_FLAG,
        LIVE_LOG,
        HAS_LAUNCHED,
        PENDING_INSTRUMENTS,
        ASSIGNMENT_CURSOR,
        WINDOW_POSITIONS,
        GLOBAL_ORDER_LOCK,
    ]
    .iter()
    .map(ToString::to_string)
    .collect();

    for instrument in Instrument::ALL {
        keys.extend(
            InstrumentKey::all()
                .into_iter()
                .map(|k| k.for_instrument(instrument)),
        );
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_instrument_keys_are_prefixed_per_pair_and_side() {
        assert_eq!(
            InstrumentKey::Step(Side::Long).for_instrument(Instrument::UsdJpy),
            "hedgebot_USDJPY_STEP_L"
        );
        assert_eq!(
            InstrumentKey::PrevQty(Side::Short).for_instrument(Instrument::EurUsd),
            "hedgebot_EURUSD_PREV_QTY_S"
        );
        assert_eq!(
            InstrumentKey::Display.for_instrument(Instrument::GbpJpy),
            "hedgebot_UI_GBPJPY"
        );
    }

    #[test]
    fn test_all_state_keys_are_unique_and_exclude_settings() {
        let keys = all_state_keys();
        let unique: HashSet<&String> = keys.iter().collect();

        assert_eq!(unique.len(), keys.len());
        assert_eq!(keys.len(), 7 + 4 * 12);
        assert!(!keys.iter().any(|k| k == SETTINGS));
    }
}
