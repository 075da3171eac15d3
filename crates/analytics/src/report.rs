use serde::{Deserialize, Serialize};

/// Performance of one strategy on one symbol over one window.
///
/// Returns and drawdowns are fractions (0.02 is 2%).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SymbolReport {
    pub trade_count: usize,
    pub winning_trades: usize,
    /// Sum of net trade returns. Kept so expectancy can be pooled across symbols.
    pub total_trade_return: f64,
    pub win_rate: f64,
    /// Mean net return per trade.
    pub expectancy: f64,
    /// Annualized mean/std of per-bar equity returns.
    pub sharpe: f64,
    /// Largest peak-to-trough fall of the equity curve, as a fraction of the peak.
    pub max_drawdown: f64,
}
