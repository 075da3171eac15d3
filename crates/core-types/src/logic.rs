//! The generated-logic representation a strategy carries through the pipeline.
//!
//! A strategy is a set of entry conditions (all must hold), exit conditions (any
//! may hold) and optional stop-loss / take-profit distances. Conditions compare
//! operands that read bar fields or indicator values a fixed number of bars back.
//! The logic is written once by the generator and never mutated afterwards.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceField {
    Open,
    High,
    Low,
    Close,
    Volume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Sma,
    Ema,
    Rsi,
    Roc,
    StdDev,
}

/// A literal or a reference to a declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Const(f64),
    Param(String),
}

impl Value {
    pub fn param_name(&self) -> Option<&str> {
        match self {
            Value::Param(name) => Some(name),
            Value::Const(_) => None,
        }
    }
}

/// An input to a comparison. `bars_ago` is relative to the bar being evaluated:
/// 0 is the current bar, 1 the previous one. Negative values would read the future.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operand {
    Price {
        field: PriceField,
        #[serde(default)]
        bars_ago: i32,
    },
    Indicator {
        kind: IndicatorKind,
        period: Value,
        #[serde(default = "default_field")]
        field: PriceField,
        #[serde(default)]
        bars_ago: i32,
    },
    Value {
        value: Value,
    },
}

fn default_field() -> PriceField {
    PriceField::Close
}

impl Operand {
    pub fn bars_ago(&self) -> i32 {
        match self {
            Operand::Price { bars_ago, .. } | Operand::Indicator { bars_ago, .. } => *bars_ago,
            Operand::Value { .. } => 0,
        }
    }

    /// True for operands that vary bar to bar.
    pub fn is_series(&self) -> bool {
        !matches!(self, Operand::Value { .. })
    }

    /// All parameter names this operand depends on.
    pub fn param_refs(&self) -> Vec<&str> {
        match self {
            Operand::Price { .. } => vec![],
            Operand::Indicator { period, .. } => period.param_name().into_iter().collect(),
            Operand::Value { value } => value.param_name().into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Lt,
    CrossAbove,
    CrossBelow,
}

impl Comparison {
    pub fn is_crossover(&self) -> bool {
        matches!(self, Comparison::CrossAbove | Comparison::CrossBelow)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub left: Operand,
    pub op: Comparison,
    pub right: Operand,
}

impl Condition {
    pub fn operands(&self) -> [&Operand; 2] {
        [&self.left, &self.right]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyLogic {
    pub direction: Direction,
    pub entry: Vec<Condition>,
    #[serde(default)]
    pub exit: Vec<Condition>,
    /// Distance from entry, as a fraction of the entry price.
    #[serde(default)]
    pub stop_loss: Option<Value>,
    #[serde(default)]
    pub take_profit: Option<Value>,
}

impl StrategyLogic {
    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.entry.iter().chain(self.exit.iter())
    }

    pub fn operands(&self) -> impl Iterator<Item = &Operand> {
        self.conditions().flat_map(|c| c.operands())
    }

    /// Every parameter name referenced anywhere in the logic.
    pub fn param_refs(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = self.operands().flat_map(|o| o.param_refs()).collect();
        refs.extend(self.stop_loss.iter().filter_map(|v| v.param_name()));
        refs.extend(self.take_profit.iter().filter_map(|v| v.param_name()));
        refs.sort_unstable();
        refs.dedup();
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_generated_logic() {
        let logic: StrategyLogic = serde_json::from_str(
            r#"{
                "direction": "long",
                "entry": [{
                    "left": {"type": "indicator", "kind": "sma", "period": {"param": "fast"}},
                    "op": "cross_above",
                    "right": {"type": "indicator", "kind": "sma", "period": {"const": 50}}
                }],
                "exit": [{
                    "left": {"type": "price", "field": "close", "bars_ago": 1},
                    "op": "lt",
                    "right": {"type": "value", "value": {"param": "floor"}}
                }],
                "stop_loss": {"param": "stop"}
            }"#,
        )
        .unwrap();
        assert_eq!(logic.param_refs(), vec!["fast", "floor", "stop"]);
        assert_eq!(logic.exit[0].left.bars_ago(), 1);
    }
}
