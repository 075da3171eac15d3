use thiserror::Error;

/// Infrastructure failures. A stage that returns one of these releases its claim
/// and the strategy is retried; deterministic rejections never come through here.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(#[from] database::DbError),

    #[error("In-sample optimization error: {0}")]
    Optimizer(#[from] optimizer::OptimizerError),

    #[error("Out-of-sample validation error: {0}")]
    Wfo(#[from] wfo::WfoError),

    #[error("Rotator error: {0}")]
    Rotator(#[from] rotator::RotatorError),

    #[error("Market data fetch for {symbol} timed out after {secs}s")]
    FetchTimeout { symbol: String, secs: u64 },

    #[error("Simulation pool error: {0}")]
    SimulationPool(String),
}
