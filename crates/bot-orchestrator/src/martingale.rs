//! Per-side martingale bookkeeping.
//!
//! A settled win moves the side one rung up the stake ladder and wraps back
//! to the first rung after the top; a loss drops it to the first rung and
//! clears the win streak. A settlement of exactly zero changes nothing.

use hedge_bot_core::{get_or, put, CoordinationStore, Instrument, InstrumentKey, Side, StoreError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Win,
    Loss,
    BreakEven,
}

impl Outcome {
    #[must_use]
    pub fn of(pl: Decimal) -> Self {
        if pl > Decimal::ZERO {
            Self::Win
        } else if pl < Decimal::ZERO {
            Self::Loss
        } else {
            Self::BreakEven
        }
    }
}

/// Step and streak of one side of one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MartingaleState {
    /// 1-based rung of the stake ladder.
    pub step: usize,
    pub win_streak: u32,
    pub last_settled_pl: Decimal,
}

impl Default for MartingaleState {
    fn default() -> Self {
        Self {
            step: 1,
            win_streak: 0,
            last_settled_pl: Decimal::ZERO,
        }
    }
}

impl MartingaleState {
    /// State after settling a leg at `pl` on a ladder of `ladder_len` rungs.
    #[must_use]
    pub fn settle(self, pl: Decimal, ladder_len: usize) -> Self {
        let top = ladder_len.max(1);
        match Outcome::of(pl) {
            Outcome::BreakEven => self,
            Outcome::Win => Self {
                step: if self.step >= top { 1 } else { self.step + 1 },
                win_streak: self.win_streak.saturating_add(1),
                last_settled_pl: pl,
            },
            Outcome::Loss => Self {
                step: 1,
                win_streak: 0,
                last_settled_pl: pl,
            },
        }
    }
}

/// Stake for `step` on `ladder`, falling back to the first rung when the
/// step is out of range.
#[must_use]
pub fn stake_for(step: usize, ladder: &[u64]) -> u64 {
    step.checked_sub(1)
        .and_then(|i| ladder.get(i))
        .or_else(|| ladder.first())
        .copied()
        .unwrap_or(0)
}

/// One settled leg and what it did to the side's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub instrument: Instrument,
    pub side: Side,
    pub pl: Decimal,
    pub outcome: Outcome,
    pub before: MartingaleState,
    pub after: MartingaleState,
}

/// Reads the side's state; missing or malformed entries fall back to the
/// initial state field by field.
///
/// # Errors
/// Returns an error if the store read fails.
pub async fn load(
    store: &dyn CoordinationStore,
    instrument: Instrument,
    side: Side,
) -> Result<MartingaleState, StoreError> {
    let initial = MartingaleState::default();
    let step: usize = get_or(store, &InstrumentKey::Step(side).for_instrument(instrument), initial.step).await?;
    Ok(MartingaleState {
        step: step.max(1),
        win_streak: get_or(
            store,
            &InstrumentKey::WinStreak(side).for_instrument(instrument),
            initial.win_streak,
        )
        .await?,
        last_settled_pl: get_or(
            store,
            &InstrumentKey::SettledPl(side).for_instrument(instrument),
            initial.last_settled_pl,
        )
        .await?,
    })
}

/// # Errors
/// Returns an error if a store write fails.
pub async fn save(
    store: &dyn CoordinationStore,
    instrument: Instrument,
    side: Side,
    state: &MartingaleState,
) -> Result<(), StoreError> {
    put(store, &InstrumentKey::Step(side).for_instrument(instrument), &state.step).await?;
    put(store, &InstrumentKey::WinStreak(side).for_instrument(instrument), &state.win_streak).await?;
    put(
        store,
        &InstrumentKey::SettledPl(side).for_instrument(instrument),
        &state.last_settled_pl,
    )
    .await
}

/// Applies a settlement of `pl` to the stored state of `instrument`/`side`.
///
/// Break-even settlements are reported but nothing is written.
///
/// # Errors
/// Returns an error if the store read or write fails.
pub async fn judge(
    store: &dyn CoordinationStore,
    instrument: Instrument,
    side: Side,
    pl: Decimal,
    ladder_len: usize,
) -> Result<Settlement, StoreError> {
    let before = load(store, instrument, side).await?;
    let after = before.settle(pl, ladder_len);
    let outcome = Outcome::of(pl);
    if outcome != Outcome::BreakEven {
        save(store, instrument, side, &after).await?;
    }
    Ok(Settlement {
        instrument,
        side,
        pl,
        outcome,
        before,
        after,
    })
}
