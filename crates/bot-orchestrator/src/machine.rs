//! Per-instrument trading state machine.
//!
//! Each tick reads the venue, books settlements, publishes display state,
//! applies auto-close, and finally decides whether an entry is due. Entries
//! are carried out by [`EntryExecutor`], which the worker spawns so ticks
//! keep flowing while orders are in flight.

use crate::arbiter::GlobalOrderArbiter;
use crate::live_log::live_log;
use crate::martingale::{self, stake_for, Outcome, Settlement};
use chrono::Utc;
use hedge_bot_core::{
    get_or, keys, put, AutoCloseRule, CoordinationStore, DisplayState, Instrument, InstrumentKey,
    MsRange, OrderSide, PositionSnapshot, PositionState, Settings, Side, StoreError, VenueAdapter,
    WorkerTiming,
};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Wall-clock milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ===== Tick decisions =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPlan {
    /// Flat: open long, then short.
    OpenBoth,
    /// One leg open: open the missing side.
    Hedge(Side),
}

impl EntryPlan {
    #[must_use]
    pub const fn for_state(state: PositionState) -> Option<Self> {
        match state {
            PositionState::Flat => Some(Self::OpenBoth),
            PositionState::LongOnly => Some(Self::Hedge(Side::Short)),
            PositionState::ShortOnly => Some(Self::Hedge(Side::Long)),
            PositionState::Hedged => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    Stopped,
    Disabled,
    InFlight,
    Cooldown,
    CloseFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickAction {
    /// Venue unreadable, nothing was touched.
    NoData,
    AutoClosed { pips: Decimal },
    Skipped(SkipReason),
    /// Both legs open, nothing to do.
    Hold,
    Enter(EntryPlan),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub display: Option<DisplayState>,
    pub settlements: Vec<Settlement>,
    pub action: TickAction,
}

impl TickReport {
    fn no_data() -> Self {
        Self {
            display: None,
            settlements: Vec::new(),
            action: TickAction::NoData,
        }
    }

    #[must_use]
    pub const fn entry(&self) -> Option<EntryPlan> {
        match self.action {
            TickAction::Enter(plan) => Some(plan),
            _ => None,
        }
    }
}

/// Average per-unit P/L in pips, when the rule says to close everything.
#[must_use]
pub fn auto_close_pips(
    instrument: Instrument,
    snapshot: &PositionSnapshot,
    rule: &AutoCloseRule,
) -> Option<Decimal> {
    let total_qty = snapshot.total_qty();
    if !rule.enabled || total_qty == 0 {
        return None;
    }
    let pips = snapshot.total_pl() / Decimal::from(total_qty) * instrument.pip_factor();
    (pips >= rule.take_profit_pips || pips <= -rule.stop_loss_pips).then_some(pips)
}

pub struct TradingMachine {
    instrument: Instrument,
    store: Arc<dyn CoordinationStore>,
    venue: Arc<dyn VenueAdapter>,
    in_flight: Arc<AtomicBool>,
}

impl TradingMachine {
    #[must_use]
    pub fn new(
        instrument: Instrument,
        store: Arc<dyn CoordinationStore>,
        venue: Arc<dyn VenueAdapter>,
    ) -> Self {
        Self {
            instrument,
            store,
            venue,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub const fn instrument(&self) -> Instrument {
        self.instrument
    }

    /// Whether an entry sequence is currently running.
    #[must_use]
    pub fn is_ordering(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Executor sharing this machine's in-flight flag.
    #[must_use]
    pub fn executor(&self, arbiter: Arc<GlobalOrderArbiter>, timing: WorkerTiming) -> EntryExecutor {
        EntryExecutor {
            instrument: self.instrument,
            store: self.store.clone(),
            venue: self.venue.clone(),
            arbiter,
            timing,
            in_flight: self.in_flight.clone(),
        }
    }

    /// Runs one tick at `now_ms`.
    ///
    /// The returned plan, if any, is not executed here.
    ///
    /// # Errors
    /// Returns an error if a store read or write fails. Venue failures never
    /// surface as errors.
    pub async fn tick(&self, settings: &Settings, now_ms: i64) -> Result<TickReport, StoreError> {
        let Some(snapshot) = self.venue.read_position(self.instrument).await else {
            debug!("[{}] No usable venue data, skipping tick", self.instrument);
            return Ok(TickReport::no_data());
        };

        let settlements = self.detect_settlements(&snapshot, settings).await?;
        self.cache_snapshot(&snapshot).await?;
        let display = self.publish_display(&snapshot, settings).await?;
        let action = self.decide(&snapshot, settings, now_ms).await?;

        Ok(TickReport {
            display: Some(display),
            settlements,
            action,
        })
    }

    async fn detect_settlements(
        &self,
        snapshot: &PositionSnapshot,
        settings: &Settings,
    ) -> Result<Vec<Settlement>, StoreError> {
        let store = self.store.as_ref();
        let mut settlements = Vec::new();

        for side in [Side::Long, Side::Short] {
            let prev_qty: u64 =
                get_or(store, &InstrumentKey::PrevQty(side).for_instrument(self.instrument), 0).await?;
            if prev_qty == 0 || snapshot.qty(side) > 0 {
                continue;
            }

            let pl: Decimal = get_or(
                store,
                &InstrumentKey::LastPl(side).for_instrument(self.instrument),
                Decimal::ZERO,
            )
            .await?;
            // Cleared before booking so a failed tick cannot book the same close twice.
            put(store, &InstrumentKey::PrevQty(side).for_instrument(self.instrument), &0u64).await?;
            let settlement =
                martingale::judge(store, self.instrument, side, pl, settings.bet_steps.len()).await?;

            if settlement.outcome != Outcome::BreakEven {
                live_log(
                    store,
                    format!(
                        "[{}] {} settled {} ({:?}), next Step{}",
                        self.instrument, side, pl, settlement.outcome, settlement.after.step
                    ),
                )
                .await;
            }
            settlements.push(settlement);
        }

        Ok(settlements)
    }

    async fn cache_snapshot(&self, snapshot: &PositionSnapshot) -> Result<(), StoreError> {
        let store = self.store.as_ref();
        for side in [Side::Long, Side::Short] {
            let qty = snapshot.qty(side);
            if qty > 0 {
                put(store, &InstrumentKey::LastPl(side).for_instrument(self.instrument), &snapshot.pl(side))
                    .await?;
            }
            put(store, &InstrumentKey::PrevQty(side).for_instrument(self.instrument), &qty).await?;
        }
        Ok(())
    }

    async fn publish_display(
        &self,
        snapshot: &PositionSnapshot,
        settings: &Settings,
    ) -> Result<DisplayState, StoreError> {
        let store = self.store.as_ref();
        let long = martingale::load(store, self.instrument, Side::Long).await?;
        let short = martingale::load(store, self.instrument, Side::Short).await?;

        let display = DisplayState {
            instrument: self.instrument,
            status: snapshot.state(),
            ordering: self.is_ordering(),
            spread: snapshot.spread,
            max_spread: settings.max_spread_for(self.instrument),
            long_qty: snapshot.long_qty,
            short_qty: snapshot.short_qty,
            pl_long: snapshot.pl_long,
            pl_short: snapshot.pl_short,
            win_streak_long: long.win_streak,
            win_streak_short: short.win_streak,
            step_long: long.step,
            step_short: short.step,
            updated_at: Utc::now(),
        };
        put(store, &InstrumentKey::Display.for_instrument(self.instrument), &display).await?;
        Ok(display)
    }

    async fn decide(
        &self,
        snapshot: &PositionSnapshot,
        settings: &Settings,
        now_ms: i64,
    ) -> Result<TickAction, StoreError> {
        let store = self.store.as_ref();

        if let Some(pips) = auto_close_pips(self.instrument, snapshot, settings.auto_close_for(self.instrument)) {
            return Ok(match self.venue.close_all().await {
                Ok(()) => {
                    live_log(store, format!("[{}] Auto-close at {} pips", self.instrument, pips.round_dp(1)))
                        .await;
                    TickAction::AutoClosed { pips }
                }
                Err(e) => {
                    error!("[{}] Auto-close failed: {:#}", self.instrument, e);
                    TickAction::Skipped(SkipReason::CloseFailed)
                }
            });
        }

        if !get_or(store, keys::RUN_FLAG, false).await? {
            return Ok(TickAction::Skipped(SkipReason::Stopped));
        }
        if !settings.is_enabled(self.instrument) {
            return Ok(TickAction::Skipped(SkipReason::Disabled));
        }
        if self.is_ordering() {
            return Ok(TickAction::Skipped(SkipReason::InFlight));
        }

        if settings.order_cooldown_ms > 0 {
            let last_order: Option<i64> =
                get_or(store, &InstrumentKey::LastOrder.for_instrument(self.instrument), None)
                    .await?;
            let cooldown = i64::try_from(settings.order_cooldown_ms).unwrap_or(i64::MAX);
            if last_order.is_some_and(|last| now_ms.saturating_sub(last) < cooldown) {
                debug!("[{}] Order cooldown active", self.instrument);
                return Ok(TickAction::Skipped(SkipReason::Cooldown));
            }
        }

        Ok(EntryPlan::for_state(snapshot.state()).map_or(TickAction::Hold, TickAction::Enter))
    }
}

// ===== Entry execution =====

/// Clears the in-flight flag when the entry sequence ends, however it ends.
pub struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegOutcome {
    Submitted {
        side: Side,
        order: OrderSide,
        quantity: u64,
        step: usize,
    },
    SpreadTooWide {
        side: Side,
        spread: Decimal,
        ceiling: Decimal,
    },
    Throttled {
        side: Side,
    },
    NoData {
        side: Side,
    },
    Failed {
        side: Side,
        reason: String,
    },
}

impl LegOutcome {
    #[must_use]
    pub const fn is_submitted(&self) -> bool {
        matches!(self, Self::Submitted { .. })
    }
}

/// Carries out an [`EntryPlan`] one leg at a time.
#[derive(Clone)]
pub struct EntryExecutor {
    instrument: Instrument,
    store: Arc<dyn CoordinationStore>,
    venue: Arc<dyn VenueAdapter>,
    arbiter: Arc<GlobalOrderArbiter>,
    timing: WorkerTiming,
    in_flight: Arc<AtomicBool>,
}

impl EntryExecutor {
    /// Claims the in-flight flag, or `None` if an entry is already running.
    #[must_use]
    pub fn try_begin(&self) -> Option<InFlightGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(self.in_flight.clone()))
    }

    /// Executes `plan` while holding `guard`.
    pub async fn execute(
        &self,
        guard: InFlightGuard,
        plan: EntryPlan,
        settings: &Settings,
    ) -> Vec<LegOutcome> {
        let outcomes = match plan {
            EntryPlan::OpenBoth => {
                let long = self.leg(Side::Long, settings).await;
                pause(self.timing.leg_delay_ms).await;
                let short = self.leg(Side::Short, settings).await;
                vec![long, short]
            }
            EntryPlan::Hedge(side) => vec![self.leg(side, settings).await],
        };
        drop(guard);
        outcomes
    }

    /// Claims the flag and executes `plan`; `None` if already in flight.
    pub async fn run(&self, plan: EntryPlan, settings: &Settings) -> Option<Vec<LegOutcome>> {
        let guard = self.try_begin()?;
        Some(self.execute(guard, plan, settings).await)
    }

    async fn leg(&self, side: Side, settings: &Settings) -> LegOutcome {
        match self.try_leg(side, settings).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("[{}] {} entry failed: {}", self.instrument, side, e);
                LegOutcome::Failed {
                    side,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn try_leg(&self, side: Side, settings: &Settings) -> Result<LegOutcome, StoreError> {
        let store = self.store.as_ref();

        pause(draw_jitter(self.timing.entry_jitter) + settings.entry_offset_for(self.instrument)).await;

        let Some(snapshot) = self.venue.read_position(self.instrument).await else {
            debug!("[{}] No venue data before {} entry", self.instrument, side);
            return Ok(LegOutcome::NoData { side });
        };

        let spread = snapshot.spread * self.instrument.spread_scale();
        let ceiling = settings.max_spread_for(self.instrument);
        if spread > ceiling {
            debug!("[{}] Spread {} above {}, skipping {} entry", self.instrument, spread, ceiling, side);
            return Ok(LegOutcome::SpreadTooWide { side, spread, ceiling });
        }

        if !self.arbiter.try_acquire(now_ms(), settings.global_interval).await? {
            debug!("[{}] Global order slot busy, skipping {} entry", self.instrument, side);
            return Ok(LegOutcome::Throttled { side });
        }

        let step = martingale::load(store, self.instrument, side).await?.step;
        let quantity = stake_for(step, &settings.bet_steps);
        let order = side.opening_order();

        pause(self.timing.quantity_settle_ms).await;
        let submitted = self.venue.submit_order(order, quantity).await;
        if let Err(e) =
            put(store, &InstrumentKey::LastOrder.for_instrument(self.instrument), &now_ms()).await
        {
            warn!("[{}] Failed to stamp last order time: {}", self.instrument, e);
        }

        match submitted {
            Ok(()) => {
                live_log(store, format!("[{}] {} {} (Step{})", self.instrument, order, quantity, step)).await;
                pause(self.timing.post_order_wait_ms).await;
                Ok(LegOutcome::Submitted {
                    side,
                    order,
                    quantity,
                    step,
                })
            }
            Err(e) => {
                warn!("[{}] {} {} not confirmed: {:#}", self.instrument, order, quantity, e);
                Ok(LegOutcome::Failed {
                    side,
                    reason: format!("{e:#}"),
                })
            }
        }
    }
}

fn draw_jitter(range: MsRange) -> u64 {
    let (lo, hi) = if range.is_valid() {
        (range.min_ms, range.max_ms)
    } else {
        (range.max_ms, range.min_ms)
    };
    if hi == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(lo..=hi)
}

async fn pause(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}
