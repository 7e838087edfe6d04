//! Simulated venue windows for running the whole system without a broker.
//!
//! [`PaperVenue`] random-walks a mid price, quotes a spread around the
//! instrument's typical value, fills orders at the touch and closes legs
//! that reach its own take-profit or stop-loss, so the workers see the same
//! open/settle cycle a real venue produces. [`PaperLauncher`] stands in for
//! the operator's launch control.

use anyhow::{bail, Result};
use async_trait::async_trait;
use hedge_bot_core::{
    Instrument, OrderSide, PositionSnapshot, VenueAdapter, WindowLauncher, WindowPosition,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Yen per US dollar used to express EURUSD P/L in yen.
const JPY_PER_USD: Decimal = dec!(150);

fn pip_size(instrument: Instrument) -> Decimal {
    match instrument {
        Instrument::EurUsd => dec!(0.0001),
        _ => dec!(0.01),
    }
}

fn typical_spread_pips(instrument: Instrument) -> Decimal {
    match instrument {
        Instrument::UsdJpy => dec!(0.2),
        Instrument::EurUsd => dec!(0.3),
        Instrument::AudJpy => dec!(0.5),
        Instrument::GbpJpy => dec!(0.8),
    }
}

fn opening_mid(instrument: Instrument) -> Decimal {
    match instrument {
        Instrument::UsdJpy => dec!(150.00),
        Instrument::EurUsd => dec!(1.0800),
        Instrument::AudJpy => dec!(98.00),
        Instrument::GbpJpy => dec!(190.00),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperVenueConfig {
    /// Largest mid move per read, in pips.
    pub volatility_pips: Decimal,
    /// Spread varies by up to this fraction around the typical spread.
    pub spread_jitter: Decimal,
    /// Venue-side exit per leg, in pips. Zero disables.
    pub take_profit_pips: Decimal,
    pub stop_loss_pips: Decimal,
    /// Probability a read shows nothing usable.
    pub unavailable_rate: f64,
    pub seed: Option<u64>,
}

impl Default for PaperVenueConfig {
    fn default() -> Self {
        Self {
            volatility_pips: dec!(0.5),
            spread_jitter: dec!(0.5),
            take_profit_pips: dec!(8),
            stop_loss_pips: dec!(8),
            unavailable_rate: 0.0,
            seed: None,
        }
    }
}

impl PaperVenueConfig {
    /// Frozen market: no drift, constant spread, no venue-side exits.
    #[must_use]
    pub fn frozen() -> Self {
        Self {
            volatility_pips: Decimal::ZERO,
            spread_jitter: Decimal::ZERO,
            take_profit_pips: Decimal::ZERO,
            stop_loss_pips: Decimal::ZERO,
            unavailable_rate: 0.0,
            seed: Some(0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Leg {
    qty: u64,
    entry: Decimal,
}

impl Leg {
    fn add(leg: Option<Self>, qty: u64, price: Decimal) -> Self {
        match leg {
            None => Self { qty, entry: price },
            Some(leg) => {
                let total = leg.qty + qty;
                let entry = (leg.entry * Decimal::from(leg.qty) + price * Decimal::from(qty))
                    / Decimal::from(total);
                Self { qty: total, entry }
            }
        }
    }
}

struct Book {
    instrument: Instrument,
    mid: Decimal,
    spread_pips: Decimal,
    long: Option<Leg>,
    short: Option<Leg>,
    rng: StdRng,
}

impl Book {
    fn new(instrument: Instrument, rng: StdRng) -> Self {
        Self {
            instrument,
            mid: opening_mid(instrument),
            spread_pips: typical_spread_pips(instrument),
            long: None,
            short: None,
            rng,
        }
    }

    fn unit(&mut self) -> Decimal {
        let u: f64 = self.rng.gen_range(-1.0..=1.0);
        Decimal::from_f64_retain(u).unwrap_or_default().round_dp(4)
    }

    fn advance(&mut self, config: &PaperVenueConfig) {
        let pip = pip_size(self.instrument);
        if config.volatility_pips > Decimal::ZERO {
            let step = self.unit() * config.volatility_pips * pip;
            self.mid = (self.mid + step).max(pip);
        }
        let typical = typical_spread_pips(self.instrument);
        let jitter = if config.spread_jitter > Decimal::ZERO {
            self.unit() * config.spread_jitter
        } else {
            Decimal::ZERO
        };
        self.spread_pips = (typical * (Decimal::ONE + jitter)).round_dp(1).max(dec!(0.1));
    }

    fn bid(&self) -> Decimal {
        self.mid - self.spread_pips * pip_size(self.instrument) / dec!(2)
    }

    fn ask(&self) -> Decimal {
        self.mid + self.spread_pips * pip_size(self.instrument) / dec!(2)
    }

    /// Per-unit price gain of a leg, in quote currency.
    fn gain(&self, leg: Leg, long: bool) -> Decimal {
        if long {
            self.bid() - leg.entry
        } else {
            leg.entry - self.ask()
        }
    }

    fn pl_yen(&self, leg: Option<Leg>, long: bool) -> Decimal {
        let Some(leg) = leg else {
            return Decimal::ZERO;
        };
        let per_unit = self.gain(leg, long);
        let yen = match self.instrument {
            Instrument::EurUsd => per_unit * JPY_PER_USD,
            _ => per_unit,
        };
        (yen * Decimal::from(leg.qty)).round_dp(0)
    }

    fn apply_exits(&mut self, config: &PaperVenueConfig) {
        let pip = pip_size(self.instrument);
        let hit = |gain: Decimal| {
            let pips = gain / pip;
            (config.take_profit_pips > Decimal::ZERO && pips >= config.take_profit_pips)
                || (config.stop_loss_pips > Decimal::ZERO && pips <= -config.stop_loss_pips)
        };
        if self.long.is_some_and(|leg| hit(self.gain(leg, true))) {
            debug!("[{}] Paper long leg closed by venue", self.instrument);
            self.long = None;
        }
        if self.short.is_some_and(|leg| hit(self.gain(leg, false))) {
            debug!("[{}] Paper short leg closed by venue", self.instrument);
            self.short = None;
        }
    }

    fn snapshot(&self) -> PositionSnapshot {
        PositionSnapshot {
            long_qty: self.long.map_or(0, |leg| leg.qty),
            short_qty: self.short.map_or(0, |leg| leg.qty),
            pl_long: self.pl_yen(self.long, true),
            pl_short: self.pl_yen(self.short, false),
            spread: self.spread_pips,
        }
    }
}

/// One simulated venue window.
pub struct PaperVenue {
    config: PaperVenueConfig,
    book: Mutex<Book>,
}

impl PaperVenue {
    /// A window initially showing `instrument`.
    #[must_use]
    pub fn new(instrument: Instrument, config: PaperVenueConfig) -> Self {
        let rng = config.seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self {
            config,
            book: Mutex::new(Book::new(instrument, rng)),
        }
    }

    #[must_use]
    pub fn instrument(&self) -> Instrument {
        self.book.lock().instrument
    }

    /// Moves the mid by `pips` without touching anything else.
    pub fn shift_mid(&self, pips: Decimal) {
        let mut book = self.book.lock();
        let pip = pip_size(book.instrument);
        book.mid += pips * pip;
    }
}

#[async_trait]
impl VenueAdapter for PaperVenue {
    async fn read_position(&self, instrument: Instrument) -> Option<PositionSnapshot> {
        let mut book = self.book.lock();
        if book.instrument != instrument {
            return None;
        }
        let rate = self.config.unavailable_rate.clamp(0.0, 1.0);
        if rate > 0.0 && book.rng.gen_bool(rate) {
            return None;
        }
        book.advance(&self.config);
        book.apply_exits(&self.config);
        Some(book.snapshot())
    }

    async fn submit_order(&self, side: OrderSide, quantity: u64) -> Result<()> {
        if quantity == 0 {
            bail!("Order quantity must be positive");
        }
        let mut book = self.book.lock();
        match side {
            OrderSide::Buy => {
                let price = book.ask();
                book.long = Some(Leg::add(book.long, quantity, price));
            }
            OrderSide::Sell => {
                let price = book.bid();
                book.short = Some(Leg::add(book.short, quantity, price));
            }
        }
        debug!("[{}] Paper {} {} filled", book.instrument, side, quantity);
        Ok(())
    }

    async fn close_all(&self) -> Result<()> {
        let mut book = self.book.lock();
        book.long = None;
        book.short = None;
        Ok(())
    }

    async fn rendered_text(&self) -> Option<String> {
        let book = self.book.lock();
        Some(format!("{} Bid {} Ask {}", book.instrument.display_name(), book.bid(), book.ask()))
    }

    async fn select_instrument(&self, instrument: Instrument) -> bool {
        let mut book = self.book.lock();
        if book.instrument != instrument {
            book.instrument = instrument;
            book.mid = opening_mid(instrument);
            book.spread_pips = typical_spread_pips(instrument);
            book.long = None;
            book.short = None;
        }
        true
    }
}

/// Launch control that hands each opened window to whoever holds the
/// receiver.
pub struct PaperLauncher {
    control_visible: bool,
    opened_tx: mpsc::UnboundedSender<WindowPosition>,
}

impl PaperLauncher {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WindowPosition>) {
        Self::with_control(true)
    }

    /// A launcher whose control never shows up.
    #[must_use]
    pub fn without_control() -> (Self, mpsc::UnboundedReceiver<WindowPosition>) {
        Self::with_control(false)
    }

    fn with_control(control_visible: bool) -> (Self, mpsc::UnboundedReceiver<WindowPosition>) {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        let launcher = Self {
            control_visible,
            opened_tx,
        };
        (launcher, opened_rx)
    }
}

#[async_trait]
impl WindowLauncher for PaperLauncher {
    async fn find_launch_control(&self) -> bool {
        self.control_visible
    }

    async fn open_window(
        &self,
        instrument: Instrument,
        position: &WindowPosition,
        ordinal: usize,
    ) -> Result<()> {
        if self.opened_tx.send(*position).is_err() {
            bail!("No one is waiting for window {} ({})", ordinal, instrument);
        }
        debug!("Paper window {} opened for {} at ({}, {})", ordinal, instrument, position.x, position.y);
        Ok(())
    }
}
