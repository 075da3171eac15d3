use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid input for {0}: {1}")]
    InvalidInput(String, String),

    #[error("Unknown strategy status '{0}'")]
    UnknownStatus(String),

    #[error("Unknown timeframe '{0}'")]
    UnknownTimeframe(String),

    #[error("Illegal status transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("In-sample window {is_window} overlaps out-of-sample window {oos_window}")]
    WindowOverlap { is_window: String, oos_window: String },
}
