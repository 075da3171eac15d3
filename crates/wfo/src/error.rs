use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum WfoError {
    #[error("Backtester error during out-of-sample validation: {0}")]
    Backtester(#[from] backtester::BacktestError),

    #[error("Window error: {0}")]
    Window(#[from] core_types::CoreError),

    #[error("Strategy {0} reached out-of-sample without in-sample parameters or metrics")]
    MissingInSample(Uuid),

    #[error("Date range or period error: {0}")]
    DateError(String),
}
