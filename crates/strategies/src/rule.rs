use crate::error::StrategyError;
use crate::indicator::{Indicator, IndicatorKey};
use crate::{BarSignal, Strategy};
use core_types::{
    Comparison, Condition, Direction, Kline, Operand, ParamSet, PriceField, StrategyLogic, Value,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::VecDeque;

/// An operand with every parameter resolved.
#[derive(Debug, Clone, Copy)]
enum Compiled {
    Price { field: PriceField, bars_ago: usize },
    Indicator { slot: usize, bars_ago: usize },
    Const(f64),
}

#[derive(Debug, Clone, Copy)]
struct CompiledCondition {
    left: Compiled,
    op: Comparison,
    right: Compiled,
}

/// Everything a condition can read about one bar.
#[derive(Debug, Clone)]
struct BarValues {
    prices: [f64; 5],
    indicators: Vec<Option<f64>>,
}

impl BarValues {
    fn price(&self, field: PriceField) -> f64 {
        self.prices[field_index(field)]
    }
}

fn field_index(field: PriceField) -> usize {
    match field {
        PriceField::Open => 0,
        PriceField::High => 1,
        PriceField::Low => 2,
        PriceField::Close => 3,
        PriceField::Volume => 4,
    }
}

/// A generated strategy bound to one concrete parameter set.
///
/// Evaluation at bar `t` only ever reads the retained history of bars `<= t`;
/// negative `bars_ago` is refused when the strategy is built.
pub struct RuleStrategy {
    direction: Direction,
    entry: Vec<CompiledCondition>,
    exit: Vec<CompiledCondition>,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
    indicators: Vec<Indicator>,
    history: VecDeque<BarValues>,
    depth: usize,
}

impl RuleStrategy {
    pub fn new(logic: &StrategyLogic, params: &ParamSet) -> Result<Self, StrategyError> {
        if logic.entry.is_empty() {
            return Err(StrategyError::InvalidParameters("strategy has no entry condition".into()));
        }

        let mut indicators: Vec<Indicator> = Vec::new();
        let mut deepest = 0usize;
        let mut compile = |conditions: &[Condition]| -> Result<Vec<CompiledCondition>, StrategyError> {
            conditions
                .iter()
                .map(|c| {
                    let left = compile_operand(&c.left, params, &mut indicators)?;
                    let right = compile_operand(&c.right, params, &mut indicators)?;
                    // A crossover also reads the bar before its operands.
                    let extra = usize::from(c.op.is_crossover());
                    deepest = deepest.max(bars_ago(left) + extra).max(bars_ago(right) + extra);
                    Ok(CompiledCondition { left, op: c.op, right })
                })
                .collect()
        };
        let entry = compile(&logic.entry)?;
        let exit = compile(&logic.exit)?;

        let stop_loss = logic.stop_loss.as_ref().map(|v| resolve_fraction(v, params)).transpose()?;
        let take_profit = logic.take_profit.as_ref().map(|v| resolve_fraction(v, params)).transpose()?;

        Ok(Self {
            direction: logic.direction,
            entry,
            exit,
            stop_loss,
            take_profit,
            indicators,
            history: VecDeque::with_capacity(deepest + 1),
            depth: deepest + 1,
        })
    }

    fn read(&self, operand: Compiled, extra: usize) -> Option<f64> {
        let at = |bars_ago: usize| {
            let back = bars_ago + extra;
            self.history.len().checked_sub(back + 1).and_then(|i| self.history.get(i))
        };
        match operand {
            Compiled::Const(v) => Some(v),
            Compiled::Price { field, bars_ago } => at(bars_ago).map(|bar| bar.price(field)),
            Compiled::Indicator { slot, bars_ago } => at(bars_ago).and_then(|bar| bar.indicators[slot]),
        }
    }

    /// `None` while any operand is still warming up.
    fn holds(&self, condition: &CompiledCondition) -> Option<bool> {
        let left = self.read(condition.left, 0)?;
        let right = self.read(condition.right, 0)?;
        match condition.op {
            Comparison::Gt => Some(left > right),
            Comparison::Lt => Some(left < right),
            Comparison::CrossAbove | Comparison::CrossBelow => {
                let prev_left = self.read(condition.left, 1)?;
                let prev_right = self.read(condition.right, 1)?;
                Some(if condition.op == Comparison::CrossAbove {
                    prev_left <= prev_right && left > right
                } else {
                    prev_left >= prev_right && left < right
                })
            }
        }
    }
}

impl Strategy for RuleStrategy {
    fn evaluate(&mut self, kline: &Kline) -> Result<BarSignal, StrategyError> {
        let prices = [
            to_f64(kline.open)?,
            to_f64(kline.high)?,
            to_f64(kline.low)?,
            to_f64(kline.close)?,
            to_f64(kline.volume)?,
        ];
        let indicators = self
            .indicators
            .iter_mut()
            .map(|ind| ind.next(prices[field_index(ind.key().field)]))
            .collect();

        if self.history.len() == self.depth {
            self.history.pop_front();
        }
        self.history.push_back(BarValues { prices, indicators });

        let entry = self.entry.iter().all(|c| self.holds(c) == Some(true));
        let exit = self.exit.iter().any(|c| self.holds(c) == Some(true));
        Ok(BarSignal { entry, exit })
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn stop_loss(&self) -> Option<f64> {
        self.stop_loss
    }

    fn take_profit(&self) -> Option<f64> {
        self.take_profit
    }
}

fn bars_ago(operand: Compiled) -> usize {
    match operand {
        Compiled::Price { bars_ago, .. } | Compiled::Indicator { bars_ago, .. } => bars_ago,
        Compiled::Const(_) => 0,
    }
}

fn to_f64(value: Decimal) -> Result<f64, StrategyError> {
    value
        .to_f64()
        .ok_or_else(|| StrategyError::IndicatorError(format!("price {value} is not representable as f64")))
}

fn resolve(value: &Value, params: &ParamSet) -> Result<f64, StrategyError> {
    let v = match value {
        Value::Const(v) => *v,
        Value::Param(name) => *params
            .get(name)
            .ok_or_else(|| StrategyError::MissingParameter(name.clone()))?,
    };
    if !v.is_finite() {
        return Err(StrategyError::InvalidParameters(format!("non-finite value {v}")));
    }
    Ok(v)
}

fn resolve_fraction(value: &Value, params: &ParamSet) -> Result<f64, StrategyError> {
    let v = resolve(value, params)?;
    if v <= 0.0 {
        return Err(StrategyError::InvalidParameters(format!("stop distance {v} must be positive")));
    }
    Ok(v)
}

fn resolve_bars_ago(bars_ago: i32) -> Result<usize, StrategyError> {
    usize::try_from(bars_ago).map_err(|_| StrategyError::Lookahead(-bars_ago))
}

fn compile_operand(
    operand: &Operand,
    params: &ParamSet,
    indicators: &mut Vec<Indicator>,
) -> Result<Compiled, StrategyError> {
    match operand {
        Operand::Price { field, bars_ago } => Ok(Compiled::Price {
            field: *field,
            bars_ago: resolve_bars_ago(*bars_ago)?,
        }),
        Operand::Value { value } => Ok(Compiled::Const(resolve(value, params)?)),
        Operand::Indicator { kind, period, field, bars_ago } => {
            let raw = resolve(period, params)?;
            if raw < 1.0 || raw.fract() != 0.0 {
                return Err(StrategyError::InvalidParameters(format!(
                    "indicator period {raw} must be a positive integer"
                )));
            }
            let key = IndicatorKey { kind: *kind, period: raw as usize, field: *field };
            let slot = match indicators.iter().position(|i| i.key() == key) {
                Some(slot) => slot,
                None => {
                    indicators.push(Indicator::new(key)?);
                    indicators.len() - 1
                }
            };
            Ok(Compiled::Indicator { slot, bars_ago: resolve_bars_ago(*bars_ago)? })
        }
    }
}
