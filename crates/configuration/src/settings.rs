use chrono::{DateTime, Utc};
use core_types::{PromotionTieBreak, Timeframe};
use serde::Deserialize;
use std::path::PathBuf;

/// The root configuration structure for the entire application.
///
/// Every section has defaults, so an empty `config.toml` yields a runnable
/// (if universe-less) configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub data: DataConfig,
    pub simulation: Simulation,
    pub validator: ValidatorConfig,
    pub in_sample: InSampleConfig,
    pub out_of_sample: OutOfSampleConfig,
    pub workers: WorkerConfig,
    pub backpressure: BackpressureConfig,
    pub pool: PoolConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set.
    pub level: String,
    /// When set, logs are also written to a daily-rolling file in this directory.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "gauntlet.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { max_connections: 10, acquire_timeout_secs: 5 }
    }
}

/// Market-data universe and the IS/OOS split of its history.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Symbols every strategy is backtested on.
    pub symbols: Vec<String>,
    /// Total history considered, in days. IS is the earlier part, OOS the most recent.
    pub history_days: i64,
    /// The most recent days reserved for out-of-sample validation.
    pub oos_days: i64,
    pub min_valid_symbols: usize,
    /// Minimum bars a symbol needs in the IS window to count as valid.
    pub min_bars_is: usize,
    /// Minimum bars a symbol needs in the OOS window to count as valid.
    pub min_bars_oos: usize,
    pub fetch_timeout_secs: u64,
    /// Fixed end of history. Defaults to "now" floored to the strategy's timeframe.
    pub as_of: Option<DateTime<Utc>>,
    pub cache_capacity: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            history_days: 180,
            oos_days: 60,
            min_valid_symbols: 5,
            min_bars_is: 300,
            min_bars_oos: 150,
            fetch_timeout_secs: 30,
            as_of: None,
            cache_capacity: 256,
        }
    }
}

/// Contains parameters for the backtesting and simulation engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Simulation {
    /// The trading fees charged by the exchange for a "taker" order.
    /// 0.0004 corresponds to 0.04%.
    pub taker_fee_pct: f64,

    /// The assumed price slippage for market orders.
    /// This is a simple model where slippage is a percentage of the bar's high-low range.
    /// 0.1 means we assume we get a price that is 10% of the range worse than the close.
    pub slippage_pct: f64,

    /// Starting equity of every per-symbol simulation.
    pub initial_capital: f64,
}

impl Default for Simulation {
    fn default() -> Self {
        Self { taker_fee_pct: 0.0004, slippage_pct: 0.1, initial_capital: 10_000.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Largest indicator period or `bars_ago` a strategy may use.
    pub max_lookback: u32,
    /// Largest parameter grid an IS optimization may expand to.
    pub max_grid_size: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self { max_lookback: 500, max_grid_size: 512 }
    }
}

/// A value per timeframe, written in TOML as `{ "15m" = .., "30m" = .., "1h" = .., "2h" = .. }`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PerTimeframe<T> {
    #[serde(rename = "15m")]
    pub m15: T,
    #[serde(rename = "30m")]
    pub m30: T,
    #[serde(rename = "1h")]
    pub h1: T,
    #[serde(rename = "2h")]
    pub h2: T,
}

impl<T: Copy> PerTimeframe<T> {
    pub fn uniform(value: T) -> Self {
        Self { m15: value, m30: value, h1: value, h2: value }
    }

    pub fn get(&self, timeframe: Timeframe) -> T {
        match timeframe {
            Timeframe::M15 => self.m15,
            Timeframe::M30 => self.m30,
            Timeframe::H1 => self.h1,
            Timeframe::H2 => self.h2,
        }
    }
}

/// Gates the winning in-sample combination must clear before OOS is attempted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InSampleConfig {
    pub min_trades: PerTimeframe<u32>,
    /// The IS Sharpe must be strictly above this. Keeps the degradation ratio defined.
    pub min_sharpe: f64,
}

impl Default for InSampleConfig {
    fn default() -> Self {
        Self {
            min_trades: PerTimeframe { m15: 80, m30: 50, h1: 30, h2: 20 },
            min_sharpe: 0.0,
        }
    }
}

/// The OOS statistical gate. Lower-frequency timeframes get smaller trade minimums
/// but the same CI ceiling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutOfSampleConfig {
    pub min_trades: PerTimeframe<u32>,
    pub max_ci: PerTimeframe<f64>,
    pub min_sharpe: f64,
    pub min_win_rate: f64,
    pub min_expectancy: f64,
    pub max_drawdown: f64,
    pub max_degradation: f64,
}

impl Default for OutOfSampleConfig {
    fn default() -> Self {
        Self {
            min_trades: PerTimeframe { m15: 60, m30: 40, h1: 25, h2: 15 },
            max_ci: PerTimeframe::uniform(0.15),
            min_sharpe: 0.3,
            min_win_rate: 0.35,
            min_expectancy: 0.002,
            max_drawdown: 0.50,
            max_degradation: 0.50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
    /// How long a claim stays valid without renewal.
    pub lease_secs: u64,
    /// Concurrent strategies per stage process.
    pub per_stage: usize,
    /// Threads in the simulation pool. 0 means one per CPU.
    pub simulation_threads: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { poll_interval_ms: 1_000, lease_secs: 300, per_stage: 4, simulation_threads: 0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    /// Pause generation when the GENERATED queue grows beyond this.
    pub high_watermark: u64,
    /// Resume generation once the queue drains below this.
    pub low_watermark: u64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self { high_watermark: 80, low_watermark: 40 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub capacity: usize,
    pub max_live_slots: usize,
    pub tick_interval_secs: u64,
    pub tie_break: PromotionTieBreak,
    /// Execution account label per slot. Missing labels default to `slot-<n>`.
    pub accounts: Vec<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            max_live_slots: 6,
            tick_interval_secs: 60,
            tie_break: PromotionTieBreak::LiveStreak,
            accounts: Vec::new(),
        }
    }
}

impl PoolConfig {
    pub fn account_for_slot(&self, slot_id: i32) -> String {
        usize::try_from(slot_id)
            .ok()
            .and_then(|idx| self.accounts.get(idx))
            .cloned()
            .unwrap_or_else(|| format!("slot-{slot_id}"))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { enabled: false, bind: "127.0.0.1:8080".to_string() }
    }
}
