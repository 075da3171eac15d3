use crate::error::ConfigError;
use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use logging::init_tracing;
pub use settings::{
    BackpressureConfig, Config, DataConfig, DatabaseConfig, InSampleConfig, LoggingConfig,
    OutOfSampleConfig, PerTimeframe, PoolConfig, ServerConfig, Simulation, ValidatorConfig,
    WorkerConfig,
};

/// Prefix for environment overrides, e.g. `GAUNTLET__POOL__CAPACITY=40`.
pub const ENV_PREFIX: &str = "GAUNTLET";

/// Loads the application configuration from a TOML file plus environment overrides.
///
/// The file is optional: a missing file means "all defaults", so a stage process
/// can be started with environment variables alone.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from(path.as_ref()).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("data.symbols")
                .try_parsing(true),
        )
        .build()?;

    let config = builder.try_deserialize::<Config>()?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Rejects configurations that would break a pipeline invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.data.history_days <= 0 || self.data.oos_days <= 0 {
            return fail("data.history_days and data.oos_days must be positive".into());
        }
        if self.data.oos_days >= self.data.history_days {
            return fail(format!(
                "data.oos_days ({}) must be smaller than data.history_days ({}) so the in-sample window is not empty",
                self.data.oos_days, self.data.history_days
            ));
        }
        if self.data.min_valid_symbols == 0 {
            return fail("data.min_valid_symbols must be at least 1".into());
        }
        if self.data.min_bars_is < self.data.min_bars_oos {
            return fail("data.min_bars_is must be at least data.min_bars_oos".into());
        }
        if !(self.in_sample.min_sharpe >= 0.0) {
            return fail("in_sample.min_sharpe must be non-negative so OOS degradation stays defined".into());
        }
        if self.backpressure.low_watermark >= self.backpressure.high_watermark {
            return fail(format!(
                "backpressure.low_watermark ({}) must be below high_watermark ({})",
                self.backpressure.low_watermark, self.backpressure.high_watermark
            ));
        }
        if self.pool.capacity == 0 {
            return fail("pool.capacity must be positive".into());
        }
        if self.pool.max_live_slots == 0 || self.pool.max_live_slots > self.pool.capacity {
            return fail(format!(
                "pool.max_live_slots ({}) must be between 1 and pool.capacity ({})",
                self.pool.max_live_slots, self.pool.capacity
            ));
        }
        if self.workers.per_stage == 0 {
            return fail("workers.per_stage must be positive".into());
        }
        if self.workers.lease_secs == 0 {
            return fail("workers.lease_secs must be positive".into());
        }
        if !(0.0..1.0).contains(&self.simulation.taker_fee_pct) {
            return fail("simulation.taker_fee_pct must be in [0, 1)".into());
        }
        if self.simulation.initial_capital <= 0.0 {
            return fail("simulation.initial_capital must be positive".into());
        }
        Ok(())
    }
}
