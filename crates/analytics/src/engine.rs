use crate::error::AnalyticsError;
use crate::report::SymbolReport;

/// A stateless calculator for deriving performance metrics from trading activity.
#[derive(Debug, Clone, Copy)]
pub struct AnalyticsEngine {
    bars_per_year: f64,
}

impl AnalyticsEngine {
    /// `bars_per_year` annualizes the Sharpe ratio for the timeframe being simulated.
    pub fn new(bars_per_year: f64) -> Self {
        Self { bars_per_year }
    }

    /// The main entry point for calculating performance metrics.
    ///
    /// # Arguments
    ///
    /// * `trade_returns` - Net return of every closed trade, fees included.
    /// * `equity_curve` - Mark-to-market equity after every bar.
    pub fn calculate(&self, trade_returns: &[f64], equity_curve: &[f64]) -> Result<SymbolReport, AnalyticsError> {
        if let Some(bad) = trade_returns.iter().chain(equity_curve).find(|v| !v.is_finite()) {
            return Err(AnalyticsError::Calculation(format!("non-finite input {bad}")));
        }

        let mut report = SymbolReport::default();
        self.calculate_profitability(trade_returns, &mut report);
        report.max_drawdown = max_drawdown(equity_curve);
        report.sharpe = self.sharpe(equity_curve);
        Ok(report)
    }

    fn calculate_profitability(&self, trade_returns: &[f64], report: &mut SymbolReport) {
        report.trade_count = trade_returns.len();
        report.winning_trades = trade_returns.iter().filter(|r| **r > 0.0).count();
        report.total_trade_return = trade_returns.iter().sum();

        if report.trade_count > 0 {
            let n = report.trade_count as f64;
            report.win_rate = report.winning_trades as f64 / n;
            report.expectancy = report.total_trade_return / n;
        }
    }

    /// Annualized Sharpe of per-bar equity returns, risk-free rate zero.
    /// A flat curve has no dispersion and scores 0.
    fn sharpe(&self, equity_curve: &[f64]) -> f64 {
        // 1. Calculate periodic returns
        // Bars after a wipe-out have no defined return.
        let returns: Vec<f64> = equity_curve
            .windows(2)
            .filter(|w| w[0] > 0.0)
            .map(|w| (w[1] - w[0]) / w[0])
            .collect();
        if returns.len() < 2 {
            return 0.0;
        }

        // 2. Mean and population standard deviation of returns
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / n;
        let std_dev = variance.sqrt();
        if std_dev <= f64::EPSILON {
            return 0.0;
        }

        // 3. Annualize by sqrt(periods per year)
        mean / std_dev * self.bars_per_year.sqrt()
    }
}

/// Largest peak-to-trough fall as a fraction of the running peak.
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let Some(&first) = equity_curve.first() else {
        return 0.0;
    };
    let mut peak = first;
    let mut worst = 0.0f64;
    for &equity in equity_curve {
        peak = peak.max(equity);
        if peak > 0.0 {
            worst = worst.max((peak - equity) / peak);
        }
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn profitability_counts_only_positive_returns_as_wins() {
        let engine = AnalyticsEngine::new(8_760.0);
        let report = engine.calculate(&[0.02, -0.01, 0.0, 0.03], &[100.0, 101.0]).unwrap();
        assert_eq!(report.trade_count, 4);
        assert_eq!(report.winning_trades, 2);
        assert_relative_eq!(report.win_rate, 0.5);
        assert_relative_eq!(report.expectancy, 0.01, epsilon = 1e-12);
    }

    #[test]
    fn drawdown_is_measured_from_the_running_peak() {
        assert_relative_eq!(max_drawdown(&[100.0, 120.0, 90.0, 130.0, 117.0]), 0.25);
        assert_eq!(max_drawdown(&[]), 0.0);
    }

    #[test]
    fn flat_equity_has_zero_sharpe_and_no_trades() {
        let engine = AnalyticsEngine::new(8_760.0);
        let report = engine.calculate(&[], &[100.0; 50]).unwrap();
        assert_eq!(report.sharpe, 0.0);
        assert_eq!(report.win_rate, 0.0);
        assert_eq!(report.max_drawdown, 0.0);
    }

    #[test]
    fn sharpe_is_annualized_by_bars_per_year() {
        let curve = [100.0, 101.0, 100.5, 102.0, 101.0, 103.0];
        let hourly = AnalyticsEngine::new(8_760.0).calculate(&[], &curve).unwrap().sharpe;
        let bi_hourly = AnalyticsEngine::new(4_380.0).calculate(&[], &curve).unwrap().sharpe;
        assert!(hourly > 0.0);
        assert_relative_eq!(hourly / bi_hourly, 2f64.sqrt(), epsilon = 1e-12);
    }
}
