use thiserror::Error;

/// The first structural problem found in a strategy. Permanent: a rejected
/// strategy is never validated again.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Violation {
    #[error("strategy has no entry condition")]
    NoEntry,

    #[error("strategy has neither an exit condition nor a stop-loss")]
    NoExit,

    #[error("parameter range is invalid: {0}")]
    InvalidRange(String),

    #[error("parameter '{0}' is referenced but not declared")]
    UndeclaredParameter(String),

    #[error("operand reads {0} bars into the future")]
    Lookahead(i32),

    #[error("bars_ago {bars_ago} exceeds the maximum lookback of {max}")]
    LookbackTooLong { bars_ago: i32, max: u32 },

    #[error("indicator period {period} is not an integer in [1, {max}]")]
    InvalidPeriod { period: f64, max: u32 },

    #[error("crossover compares two constants")]
    ConstantCrossover,

    #[error("constant {0} is not finite")]
    NonFiniteConstant(f64),

    #[error("{which} distance {value} must be in (0, 1)")]
    InvalidStopDistance { which: &'static str, value: f64 },

    #[error("parameter grid has {size} combinations, above the limit of {max}")]
    GridTooLarge { size: usize, max: usize },
}

impl Violation {
    /// Stable code recorded as the rejection reason.
    pub fn code(&self) -> &'static str {
        match self {
            Violation::NoEntry => "no_entry",
            Violation::NoExit => "no_exit",
            Violation::InvalidRange(_) => "invalid_range",
            Violation::UndeclaredParameter(_) => "undeclared_parameter",
            Violation::Lookahead(_) => "lookahead",
            Violation::LookbackTooLong { .. } => "lookback_too_long",
            Violation::InvalidPeriod { .. } => "invalid_period",
            Violation::ConstantCrossover => "constant_crossover",
            Violation::NonFiniteConstant(_) => "non_finite_constant",
            Violation::InvalidStopDistance { .. } => "invalid_stop",
            Violation::GridTooLarge { .. } => "grid_too_large",
        }
    }
}
