use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    InSample,
    OutOfSample,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::InSample => "in_sample",
            Phase::OutOfSample => "out_of_sample",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated backtest results for one strategy in one phase.
///
/// Written exactly once per (strategy, phase). The stores refuse a second write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub phase: Phase,
    /// Mean number of closed trades per valid symbol.
    pub trade_count: u32,
    pub sharpe: f64,
    pub win_rate: f64,
    pub expectancy: f64,
    pub max_drawdown: f64,
    /// Half-width of the 95% confidence interval on `win_rate`. OOS only.
    pub win_rate_ci: Option<f64>,
    pub symbols_used: u32,
}

/// Outcome of the OOS statistical gate and degradation check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub passed: bool,
    pub degradation: Option<f64>,
    pub adj: Option<f64>,
    pub reason: Option<String>,
}

impl ValidationRecord {
    pub fn passed(degradation: f64, adj: f64) -> Self {
        Self { passed: true, degradation: Some(degradation), adj: Some(adj), reason: None }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self { passed: false, degradation: None, adj: None, reason: Some(reason.into()) }
    }
}

/// The IS/OOS blended metrics and the composite score the pool ranks by.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinalMetrics {
    pub weighted_sharpe: f64,
    pub weighted_expectancy: f64,
    pub weighted_win_rate: f64,
    pub weighted_max_drawdown: f64,
    pub is_score: f64,
    pub oos_score: f64,
    pub adj: f64,
    pub final_score: f64,
}
