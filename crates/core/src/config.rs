use crate::instrument::Instrument;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

// =============================================================================
// Application Config
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub worker: WorkerTiming,
    #[serde(default)]
    pub launch: LaunchConfig,
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process map; only workers inside one process can coordinate.
    Memory,
    /// Directory of JSON files shared between processes.
    #[default]
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: PathBuf::from("state"),
        }
    }
}

/// Inclusive millisecond range a random wait is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl MsRange {
    #[must_use]
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    #[must_use]
    pub const fn fixed(ms: u64) -> Self {
        Self::new(ms, ms)
    }

    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.min_ms <= self.max_ms
    }
}

/// Worker cadence and the fixed waits inside an order submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerTiming {
    pub tick_interval_ms: u64,
    /// Random pause before each order.
    pub entry_jitter: MsRange,
    /// Pause between setting the quantity and pressing the order button.
    pub quantity_settle_ms: u64,
    /// Wait for the venue to reflect a submitted order.
    pub post_order_wait_ms: u64,
    /// Gap between the long and short legs of an opening pair.
    pub leg_delay_ms: u64,
}

impl Default for WorkerTiming {
    fn default() -> Self {
        Self {
            tick_interval_ms: 200,
            entry_jitter: MsRange::new(1000, 3000),
            quantity_settle_ms: 200,
            post_order_wait_ms: 5000,
            leg_delay_ms: 2000,
        }
    }
}

impl WorkerTiming {
    /// No waits at all, for tests and replay.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            tick_interval_ms: 10,
            entry_jitter: MsRange::fixed(0),
            quantity_settle_ms: 0,
            post_order_wait_ms: 0,
            leg_delay_ms: 0,
        }
    }

    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Grid the venue windows are tiled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridLayout {
    pub cols: usize,
    pub width: i32,
    pub height: i32,
    pub gap_x: i32,
    pub gap_y: i32,
    pub start_x: i32,
    pub start_y: i32,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self {
            cols: 2,
            width: 330,
            height: 500,
            gap_x: 20,
            gap_y: 50,
            start_x: 50,
            start_y: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub grid: GridLayout,
    pub discovery_attempts: u32,
    pub discovery_delay_ms: u64,
    pub trigger_delay_ms: u64,
    pub probe_attempts: u32,
    pub probe_delay_ms: u64,
    pub selection_attempts: u32,
    pub selection_delay_ms: u64,
    pub fallback_instrument: Instrument,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            grid: GridLayout::default(),
            discovery_attempts: 10,
            discovery_delay_ms: 1000,
            trigger_delay_ms: 2000,
            probe_attempts: 5,
            probe_delay_ms: 500,
            selection_attempts: 5,
            selection_delay_ms: 1000,
            fallback_instrument: Instrument::UsdJpy,
        }
    }
}

impl LaunchConfig {
    /// Same attempt counts, no delays.
    #[must_use]
    pub fn without_delays(mut self) -> Self {
        self.discovery_delay_ms = 0;
        self.trigger_delay_ms = 0;
        self.probe_delay_ms = 0;
        self.selection_delay_ms = 0;
        self
    }
}

// =============================================================================
// Settings Snapshot
// =============================================================================

/// One value per tradable instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerInstrument<T> {
    #[serde(rename = "USDJPY")]
    pub usd_jpy: T,
    #[serde(rename = "EURUSD")]
    pub eur_usd: T,
    #[serde(rename = "AUDJPY")]
    pub aud_jpy: T,
    #[serde(rename = "GBPJPY")]
    pub gbp_jpy: T,
}

impl<T> PerInstrument<T> {
    #[must_use]
    pub fn from_fn(mut f: impl FnMut(Instrument) -> T) -> Self {
        Self {
            usd_jpy: f(Instrument::UsdJpy),
            eur_usd: f(Instrument::EurUsd),
            aud_jpy: f(Instrument::AudJpy),
            gbp_jpy: f(Instrument::GbpJpy),
        }
    }

    #[must_use]
    pub const fn get(&self, instrument: Instrument) -> &T {
        match instrument {
            Instrument::UsdJpy => &self.usd_jpy,
            Instrument::EurUsd => &self.eur_usd,
            Instrument::AudJpy => &self.aud_jpy,
            Instrument::GbpJpy => &self.gbp_jpy,
        }
    }

    pub fn get_mut(&mut self, instrument: Instrument) -> &mut T {
        match instrument {
            Instrument::UsdJpy => &mut self.usd_jpy,
            Instrument::EurUsd => &mut self.eur_usd,
            Instrument::AudJpy => &mut self.aud_jpy,
            Instrument::GbpJpy => &mut self.gbp_jpy,
        }
    }
}

/// Take-profit / stop-loss rule, in pips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoCloseRule {
    pub enabled: bool,
    pub take_profit_pips: Decimal,
    pub stop_loss_pips: Decimal,
}

impl Default for AutoCloseRule {
    fn default() -> Self {
        Self {
            enabled: false,
            take_profit_pips: dec!(10),
            stop_loss_pips: dec!(10),
        }
    }
}

/// Externally edited trading settings, re-read by every worker each tick.
///
/// Deserialization never fails: any missing or malformed field falls back
/// to its default on its own, see [`Settings::from_value`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub enabled_instruments: Vec<Instrument>,
    /// Stake ladder indexed by martingale step (1-based).
    pub bet_steps: Vec<u64>,
    /// Range the cross-worker order spacing is drawn from.
    pub global_interval: MsRange,
    /// Minimum spacing between orders of one instrument.
    pub order_cooldown_ms: u64,
    pub max_spread: PerInstrument<Decimal>,
    pub auto_close: PerInstrument<AutoCloseRule>,
    /// Extra per-instrument pause before each order, staggering workers.
    pub entry_offset_ms: PerInstrument<u64>,
    pub auto_launch: bool,
}

pub fn default_max_spread(instrument: Instrument) -> Decimal {
    match instrument {
        Instrument::UsdJpy => dec!(0.4),
        Instrument::EurUsd => dec!(0.00005),
        Instrument::AudJpy => dec!(0.7),
        Instrument::GbpJpy => dec!(1.0),
    }
}

const fn default_entry_offset_ms(instrument: Instrument) -> u64 {
    match instrument {
        Instrument::UsdJpy => 0,
        Instrument::EurUsd => 10,
        Instrument::AudJpy => 20,
        Instrument::GbpJpy => 30,
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled_instruments: Instrument::ALL.to_vec(),
            bet_steps: vec![1000, 2000, 4000],
            global_interval: MsRange::new(1500, 4000),
            order_cooldown_ms: 10_000,
            max_spread: PerInstrument::from_fn(default_max_spread),
            auto_close: PerInstrument::from_fn(|_| AutoCloseRule::default()),
            entry_offset_ms: PerInstrument::from_fn(default_entry_offset_ms),
            auto_launch: true,
        }
    }
}

impl Settings {
    /// Builds settings from a loosely structured JSON object.
    ///
    /// Each field is parsed on its own; a missing or malformed field keeps its
    /// default. Per-instrument tables are merged pair by pair.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let defaults = Self::default();
        let Some(obj) = value.as_object() else {
            warn!("Settings snapshot is not an object, using defaults");
            return defaults;
        };

        Self {
            enabled_instruments: field(obj, "enabled_instruments", defaults.enabled_instruments),
            bet_steps: field(obj, "bet_steps", defaults.bet_steps),
            global_interval: field(obj, "global_interval", defaults.global_interval),
            order_cooldown_ms: field(obj, "order_cooldown_ms", defaults.order_cooldown_ms),
            max_spread: per_instrument(obj, "max_spread", defaults.max_spread),
            auto_close: per_instrument(obj, "auto_close", defaults.auto_close),
            entry_offset_ms: per_instrument(obj, "entry_offset_ms", defaults.entry_offset_ms),
            auto_launch: field(obj, "auto_launch", defaults.auto_launch),
        }
        .validated()
    }

    /// Repairs values that parse but make no sense.
    #[must_use]
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();

        let mut seen = Vec::with_capacity(self.enabled_instruments.len());
        self.enabled_instruments.retain(|i| {
            let fresh = !seen.contains(i);
            seen.push(*i);
            fresh
        });

        if self.bet_steps.is_empty() || self.bet_steps.contains(&0) {
            warn!("Invalid bet ladder {:?}, using default", self.bet_steps);
            self.bet_steps = defaults.bet_steps;
        }

        if !self.global_interval.is_valid() {
            warn!(
                "Global interval min {}ms exceeds max {}ms, using default",
                self.global_interval.min_ms, self.global_interval.max_ms
            );
            self.global_interval = defaults.global_interval;
        }

        for instrument in Instrument::ALL {
            let ceiling = self.max_spread.get_mut(instrument);
            if *ceiling <= Decimal::ZERO {
                warn!("Non-positive spread ceiling for {}, using default", instrument);
                *ceiling = default_max_spread(instrument);
            }

            let rule = self.auto_close.get_mut(instrument);
            if rule.take_profit_pips < Decimal::ZERO || rule.stop_loss_pips < Decimal::ZERO {
                warn!("Negative auto-close threshold for {}, using default", instrument);
                *rule = AutoCloseRule::default();
            }
        }

        self
    }

    #[must_use]
    pub fn is_enabled(&self, instrument: Instrument) -> bool {
        self.enabled_instruments.contains(&instrument)
    }

    #[must_use]
    pub fn max_spread_for(&self, instrument: Instrument) -> Decimal {
        *self.max_spread.get(instrument)
    }

    #[must_use]
    pub fn auto_close_for(&self, instrument: Instrument) -> &AutoCloseRule {
        self.auto_close.get(instrument)
    }

    #[must_use]
    pub fn entry_offset_for(&self, instrument: Instrument) -> u64 {
        *self.entry_offset_ms.get(instrument)
    }
}

impl<'de> Deserialize<'de> for Settings {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

fn field<T: DeserializeOwned>(obj: &Map<String, Value>, name: &str, default: T) -> T {
    match obj.get(name) {
        None => default,
        Some(raw) => match serde_json::from_value(raw.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Malformed settings field {}: {}, using default", name, e);
                default
            }
        },
    }
}

fn per_instrument<T: DeserializeOwned>(
    obj: &Map<String, Value>,
    name: &str,
    mut defaults: PerInstrument<T>,
) -> PerInstrument<T> {
    let Some(raw) = obj.get(name) else {
        return defaults;
    };
    let Some(table) = raw.as_object() else {
        warn!("Settings field {} is not a table, using defaults", name);
        return defaults;
    };

    for instrument in Instrument::ALL {
        if let Some(entry) = table.get(instrument.code()) {
            match serde_json::from_value(entry.clone()) {
                Ok(parsed) => *defaults.get_mut(instrument) = parsed,
                Err(e) => warn!(
                    "Malformed {} entry for {}: {}, using default",
                    name, instrument, e
                ),
            }
        }
    }
    defaults
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_settings_default_values() {
        let settings = Settings::default();

        assert_eq!(settings.enabled_instruments.len(), 4);
        assert_eq!(settings.bet_steps, vec![1000, 2000, 4000]);
        assert_eq!(settings.global_interval, MsRange::new(1500, 4000));
        assert_eq!(settings.order_cooldown_ms, 10_000);
        assert_eq!(settings.max_spread_for(Instrument::UsdJpy), dec!(0.4));
        assert_eq!(settings.max_spread_for(Instrument::EurUsd), dec!(0.00005));
        assert!(!settings.auto_close_for(Instrument::GbpJpy).enabled);
        assert_eq!(settings.entry_offset_for(Instrument::GbpJpy), 30);
    }

    #[test]
    fn test_from_value_keeps_good_fields_and_defaults_bad_ones() {
        let value = json!({
            "bet_steps": "lots",
            "order_cooldown_ms": 15000,
            "global_interval": { "min_ms": 100, "max_ms": 200 },
            "max_spread": { "USDJPY": "0.3", "EURUSD": [1, 2] },
            "auto_close": { "AUDJPY": { "enabled": true, "take_profit_pips": "5", "stop_loss_pips": "8" } }
        });

        let settings = Settings::from_value(&value);

        assert_eq!(settings.bet_steps, vec![1000, 2000, 4000]);
        assert_eq!(settings.order_cooldown_ms, 15_000);
        assert_eq!(settings.global_interval, MsRange::new(100, 200));
        assert_eq!(settings.max_spread_for(Instrument::UsdJpy), dec!(0.3));
        assert_eq!(settings.max_spread_for(Instrument::EurUsd), dec!(0.00005));
        assert!(settings.auto_close_for(Instrument::AudJpy).enabled);
        assert_eq!(settings.auto_close_for(Instrument::AudJpy).take_profit_pips, dec!(5));
        assert!(!settings.auto_close_for(Instrument::UsdJpy).enabled);
    }

    #[test]
    fn test_from_value_non_object_is_default() {
        assert_eq!(Settings::from_value(&json!(42)), Settings::default());
        assert_eq!(Settings::from_value(&json!({})), Settings::default());
    }

    #[test]
    fn test_validated_repairs_nonsense() {
        let mut settings = Settings::default();
        settings.bet_steps = vec![1000, 0];
        settings.global_interval = MsRange::new(5000, 1000);
        settings.enabled_instruments = vec![Instrument::UsdJpy, Instrument::UsdJpy];
        *settings.max_spread.get_mut(Instrument::GbpJpy) = dec!(-1);

        let settings = settings.validated();

        assert_eq!(settings.bet_steps, vec![1000, 2000, 4000]);
        assert_eq!(settings.global_interval, MsRange::new(1500, 4000));
        assert_eq!(settings.enabled_instruments, vec![Instrument::UsdJpy]);
        assert_eq!(settings.max_spread_for(Instrument::GbpJpy), dec!(1.0));
    }

    #[test]
    fn test_settings_serde_roundtrip_through_store_format() {
        let mut settings = Settings::default();
        settings.bet_steps = vec![500, 1000, 2000, 4000];
        settings.auto_launch = false;

        let value = serde_json::to_value(&settings).unwrap();
        let back: Settings = serde_json::from_value(value).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn test_grid_layout_defaults() {
        let grid = GridLayout::default();
        assert_eq!(grid.cols, 2);
        assert_eq!(grid.width + grid.gap_x, 350);
        assert_eq!((grid.start_x, grid.start_y), (50, 50));
    }
}
