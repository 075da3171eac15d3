use thiserror::Error;

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Strategy execution error: {0}")]
    Strategy(#[from] strategies::StrategyError),

    #[error("Analytics calculation error: {0}")]
    Analytics(#[from] analytics::AnalyticsError),

    #[error("Bar at {0} carries a price that is not a positive finite number")]
    InvalidPrice(String),

    #[error("Historical data for the requested range is incomplete or missing.")]
    DataUnavailable,
}

impl BacktestError {
    /// True when re-running the same strategy on the same data would fail again.
    pub fn is_strategy_fault(&self) -> bool {
        matches!(self, BacktestError::Strategy(_) | BacktestError::Analytics(_))
    }
}
