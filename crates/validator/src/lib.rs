//! Static acceptance checks for generated strategies.
//!
//! Nothing here touches market data: a strategy is accepted or rejected from its
//! logic and declared parameter space alone.

pub mod error;

pub use error::Violation;

use configuration::ValidatorConfig;
use core_types::{grid_size, Operand, ParameterSpace, StrategyLogic, Value};
use std::collections::BTreeMap;

/// Checks a strategy's structure. Returns the first violation found.
pub fn validate(
    logic: &StrategyLogic,
    space: &ParameterSpace,
    config: &ValidatorConfig,
) -> Result<(), Violation> {
    if logic.entry.is_empty() {
        return Err(Violation::NoEntry);
    }
    if logic.exit.is_empty() && logic.stop_loss.is_none() {
        return Err(Violation::NoExit);
    }

    let expanded = expand_space(space)?;

    for name in logic.param_refs() {
        if !expanded.contains_key(name) {
            return Err(Violation::UndeclaredParameter(name.to_string()));
        }
    }

    for condition in logic.conditions() {
        for operand in condition.operands() {
            check_operand(operand, &expanded, config)?;
        }
        if condition.op.is_crossover() && !condition.left.is_series() && !condition.right.is_series() {
            return Err(Violation::ConstantCrossover);
        }
    }

    for (which, value) in [("stop_loss", &logic.stop_loss), ("take_profit", &logic.take_profit)] {
        if let Some(value) = value {
            for v in candidates(value, &expanded)? {
                if !(v > 0.0 && v < 1.0) {
                    return Err(Violation::InvalidStopDistance { which, value: v });
                }
            }
        }
    }

    let size = grid_size(space).map_err(|e| Violation::InvalidRange(e.to_string()))?;
    if size > config.max_grid_size {
        return Err(Violation::GridTooLarge { size, max: config.max_grid_size });
    }
    Ok(())
}

fn expand_space(space: &ParameterSpace) -> Result<BTreeMap<&str, Vec<f64>>, Violation> {
    space
        .iter()
        .map(|(name, range)| {
            let values = range.values(name).map_err(|e| Violation::InvalidRange(e.to_string()))?;
            Ok((name.as_str(), values))
        })
        .collect()
}

/// Every value `value` can take across the grid.
fn candidates(value: &Value, expanded: &BTreeMap<&str, Vec<f64>>) -> Result<Vec<f64>, Violation> {
    match value {
        Value::Const(v) if !v.is_finite() => Err(Violation::NonFiniteConstant(*v)),
        Value::Const(v) => Ok(vec![*v]),
        Value::Param(name) => expanded
            .get(name.as_str())
            .cloned()
            .ok_or_else(|| Violation::UndeclaredParameter(name.clone())),
    }
}

fn check_operand(
    operand: &Operand,
    expanded: &BTreeMap<&str, Vec<f64>>,
    config: &ValidatorConfig,
) -> Result<(), Violation> {
    let bars_ago = operand.bars_ago();
    if bars_ago < 0 {
        return Err(Violation::Lookahead(-bars_ago));
    }
    if bars_ago as u32 > config.max_lookback {
        return Err(Violation::LookbackTooLong { bars_ago, max: config.max_lookback });
    }

    match operand {
        Operand::Price { .. } => Ok(()),
        Operand::Value { value } => candidates(value, expanded).map(|_| ()),
        Operand::Indicator { period, .. } => {
            let max = config.max_lookback;
            for p in candidates(period, expanded)? {
                if p.fract() != 0.0 || p < 1.0 || p > f64::from(max) {
                    return Err(Violation::InvalidPeriod { period: p, max });
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{Comparison, Condition, Direction, IndicatorKind, ParameterRange, PriceField};

    fn sma(period: Value, bars_ago: i32) -> Operand {
        Operand::Indicator { kind: IndicatorKind::Sma, period, field: PriceField::Close, bars_ago }
    }

    fn crossover_logic() -> StrategyLogic {
        StrategyLogic {
            direction: Direction::Long,
            entry: vec![Condition {
                left: sma(Value::Param("fast".into()), 0),
                op: Comparison::CrossAbove,
                right: sma(Value::Const(50.0), 0),
            }],
            exit: vec![],
            stop_loss: Some(Value::Param("stop".into())),
            take_profit: None,
        }
    }

    fn space() -> ParameterSpace {
        ParameterSpace::from([
            ("fast".to_string(), ParameterRange::Linear { start: 5.0, end: 20.0, step: 5.0 }),
            ("stop".to_string(), ParameterRange::Discrete(vec![0.01, 0.02])),
        ])
    }

    fn config() -> ValidatorConfig {
        ValidatorConfig { max_lookback: 200, max_grid_size: 64 }
    }

    #[test]
    fn accepts_well_formed_strategy() {
        assert_eq!(validate(&crossover_logic(), &space(), &config()), Ok(()));
    }

    #[test]
    fn rejects_future_reads() {
        let mut logic = crossover_logic();
        logic.entry[0].left = sma(Value::Const(10.0), -1);
        let err = validate(&logic, &space(), &config()).unwrap_err();
        assert_eq!(err, Violation::Lookahead(1));
        assert_eq!(err.code(), "lookahead");
    }

    #[test]
    fn rejects_undeclared_parameter() {
        let mut space = space();
        space.remove("fast");
        assert_eq!(
            validate(&crossover_logic(), &space, &config()),
            Err(Violation::UndeclaredParameter("fast".into()))
        );
    }

    #[test]
    fn every_period_in_the_range_must_be_an_integer() {
        let mut space = space();
        space.insert("fast".into(), ParameterRange::Discrete(vec![5.0, 7.5]));
        assert!(matches!(
            validate(&crossover_logic(), &space, &config()),
            Err(Violation::InvalidPeriod { period, .. }) if period == 7.5
        ));
    }

    #[test]
    fn rejects_constant_crossover_and_missing_exit() {
        let mut logic = crossover_logic();
        logic.entry[0].left = Operand::Value { value: Value::Const(1.0) };
        logic.entry[0].right = Operand::Value { value: Value::Const(2.0) };
        assert_eq!(validate(&logic, &space(), &config()), Err(Violation::ConstantCrossover));

        let mut logic = crossover_logic();
        logic.stop_loss = None;
        assert_eq!(validate(&logic, &space(), &config()), Err(Violation::NoExit));
    }

    #[test]
    fn rejects_oversized_grid() {
        let config = ValidatorConfig { max_lookback: 200, max_grid_size: 4 };
        assert_eq!(
            validate(&crossover_logic(), &space(), &config),
            Err(Violation::GridTooLarge { size: 8, max: 4 })
        );
    }
}
