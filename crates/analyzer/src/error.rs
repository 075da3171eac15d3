use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyzerError {
    #[error("Degradation is undefined for a non-positive in-sample Sharpe ({0})")]
    UndefinedDegradation(f64),

    #[error("Metrics for phase '{0}' were supplied where the other phase was expected")]
    PhaseMismatch(core_types::Phase),

    #[error("An internal calculation error occurred: {0}")]
    Calculation(String),
}
