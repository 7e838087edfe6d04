//! Shared fixtures for the orchestrator integration tests.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use hedge_bot_core::{
    keys, put, CoordinationStore, Instrument, MsRange, OrderSide, PositionSnapshot, Settings,
    VenueAdapter,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;

/// Venue whose legs only change when orders are submitted or the test says so.
pub struct FakeVenue {
    state: Mutex<FakeState>,
}

struct FakeState {
    snapshot: PositionSnapshot,
    available: bool,
    orders: Vec<(OrderSide, u64)>,
    closes: u32,
}

impl FakeVenue {
    pub fn flat(spread: Decimal) -> Self {
        Self {
            state: Mutex::new(FakeState {
                snapshot: PositionSnapshot::flat(spread),
                available: true,
                orders: Vec::new(),
                closes: 0,
            }),
        }
    }

    pub fn set_legs(&self, long_qty: u64, short_qty: u64, pl_long: Decimal, pl_short: Decimal) {
        let mut state = self.state.lock();
        state.snapshot.long_qty = long_qty;
        state.snapshot.short_qty = short_qty;
        state.snapshot.pl_long = pl_long;
        state.snapshot.pl_short = pl_short;
    }

    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    pub fn orders(&self) -> Vec<(OrderSide, u64)> {
        self.state.lock().orders.clone()
    }

    pub fn closes(&self) -> u32 {
        self.state.lock().closes
    }
}

#[async_trait]
impl VenueAdapter for FakeVenue {
    async fn read_position(&self, _instrument: Instrument) -> Option<PositionSnapshot> {
        let state = self.state.lock();
        state.available.then(|| state.snapshot.clone())
    }

    async fn submit_order(&self, side: OrderSide, quantity: u64) -> Result<()> {
        let mut state = self.state.lock();
        match side {
            OrderSide::Buy => state.snapshot.long_qty += quantity,
            OrderSide::Sell => state.snapshot.short_qty += quantity,
        }
        state.orders.push((side, quantity));
        Ok(())
    }

    async fn close_all(&self) -> Result<()> {
        let mut state = self.state.lock();
        let spread = state.snapshot.spread;
        state.snapshot = PositionSnapshot::flat(spread);
        state.closes += 1;
        Ok(())
    }
}

/// Defaults with no order spacing, so scenarios run back to back.
pub fn unthrottled_settings() -> Settings {
    Settings {
        global_interval: MsRange::fixed(0),
        order_cooldown_ms: 0,
        ..Settings::default()
    }
}

pub async fn set_run_flag(store: &dyn CoordinationStore, running: bool) {
    put(store, keys::RUN_FLAG, &running).await.unwrap();
}
