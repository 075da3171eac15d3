use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A concrete assignment of values to a strategy's declared parameters.
pub type ParamSet = BTreeMap<String, f64>;

/// The declared search space of a strategy, keyed by parameter name.
pub type ParameterSpace = BTreeMap<String, ParameterRange>;

/// Represents a range of values for a single parameter to be tested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterRange {
    Discrete(Vec<f64>),
    Linear { start: f64, end: f64, step: f64 },
}

impl ParameterRange {
    /// Expands the range into the concrete list of values it covers.
    pub fn values(&self, name: &str) -> Result<Vec<f64>, CoreError> {
        match self {
            ParameterRange::Discrete(vals) => {
                if vals.is_empty() {
                    return Err(invalid(name, "value list is empty"));
                }
                if vals.iter().any(|v| !v.is_finite()) {
                    return Err(invalid(name, "value list contains a non-finite number"));
                }
                Ok(vals.clone())
            }
            ParameterRange::Linear { start, end, step } => {
                if !(start.is_finite() && end.is_finite() && step.is_finite()) {
                    return Err(invalid(name, "bounds must be finite"));
                }
                if *step <= 0.0 {
                    return Err(invalid(name, "step must be positive"));
                }
                if end < start {
                    return Err(invalid(name, "end is below start"));
                }
                // The epsilon keeps `end` inside the range when it is an exact multiple of `step`.
                let count = ((end - start) / step + 1e-9).floor() as usize + 1;
                Ok((0..count).map(|i| start + step * i as f64).collect())
            }
        }
    }

    pub fn len(&self, name: &str) -> Result<usize, CoreError> {
        self.values(name).map(|v| v.len())
    }
}

fn invalid(name: &str, reason: &str) -> CoreError {
    CoreError::InvalidInput(format!("parameter '{name}'"), reason.to_string())
}

/// Number of combinations in the cartesian product of a parameter space.
pub fn grid_size(space: &ParameterSpace) -> Result<usize, CoreError> {
    space
        .iter()
        .try_fold(1usize, |acc, (name, range)| Ok(acc.saturating_mul(range.len(name)?)))
}
