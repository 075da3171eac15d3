use crate::error::OptimizerError;
use core_types::{ParamSet, ParameterSpace};
use itertools::Itertools;

/// Generates every unique combination of parameters from the declared parameter space.
///
/// Names are visited in sorted order, so the grid order is the same on every run.
/// A strategy without parameters has exactly one (empty) combination.
pub fn generate_parameter_sets(space: &ParameterSpace) -> Result<Vec<ParamSet>, OptimizerError> {
    if space.is_empty() {
        return Ok(vec![ParamSet::new()]);
    }

    // 1. Convert all parameter ranges into concrete lists of values.
    let mut names = Vec::with_capacity(space.len());
    let mut value_lists = Vec::with_capacity(space.len());
    for (name, range) in space {
        let values = range
            .values(name)
            .map_err(|e| OptimizerError::ParameterGeneration(e.to_string()))?;
        names.push(name.clone());
        value_lists.push(values);
    }

    // 2. Use itertools::multi_cartesian_product to generate all combinations.
    let combinations = value_lists
        .into_iter()
        .multi_cartesian_product()
        .map(|product| names.iter().cloned().zip(product).collect::<ParamSet>())
        .collect();

    Ok(combinations)
}
