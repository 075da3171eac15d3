use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    #[error("Strategy received invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Parameter '{0}' is referenced but has no value")]
    MissingParameter(String),

    #[error("Operand reads {0} bars into the future")]
    Lookahead(i32),

    #[error("An error occurred during indicator calculation: {0}")]
    IndicatorError(String),
}
