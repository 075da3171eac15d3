use crate::error::AnalyticsError;
use crate::report::SymbolReport;
use core_types::{BacktestMetrics, Phase};

/// z-score of a two-sided 95% interval.
pub const Z_95: f64 = 1.96;

/// Half-width of the 95% normal-approximation interval on a win rate:
/// `1.96 * sqrt(wr * (1 - wr) / n)`. Infinite when there are no trades.
pub fn win_rate_ci(win_rate: f64, trade_count: u32) -> f64 {
    if trade_count == 0 {
        return f64::INFINITY;
    }
    Z_95 * (win_rate * (1.0 - win_rate) / f64::from(trade_count)).sqrt()
}

/// Merges per-symbol reports into one phase's metrics.
///
/// Trade count is the rounded mean per symbol, win rate and expectancy are pooled
/// over all trades, Sharpe is the mean across symbols and drawdown the worst symbol.
/// The OOS confidence interval is computed from the aggregated trade count.
pub fn aggregate(phase: Phase, reports: &[SymbolReport]) -> Result<BacktestMetrics, AnalyticsError> {
    if reports.is_empty() {
        return Err(AnalyticsError::NotEnoughData("no symbol reports to aggregate".to_string()));
    }
    let symbols = reports.len() as f64;

    let total_trades: usize = reports.iter().map(|r| r.trade_count).sum();
    let total_wins: usize = reports.iter().map(|r| r.winning_trades).sum();
    let total_return: f64 = reports.iter().map(|r| r.total_trade_return).sum();

    let (win_rate, expectancy) = if total_trades > 0 {
        let n = total_trades as f64;
        (total_wins as f64 / n, total_return / n)
    } else {
        (0.0, 0.0)
    };

    let trade_count = (total_trades as f64 / symbols).round() as u32;
    let sharpe = reports.iter().map(|r| r.sharpe).sum::<f64>() / symbols;
    let max_drawdown = reports.iter().map(|r| r.max_drawdown).fold(0.0, f64::max);

    let win_rate_ci = match phase {
        Phase::OutOfSample => Some(win_rate_ci(win_rate, trade_count)),
        Phase::InSample => None,
    };

    Ok(BacktestMetrics {
        phase,
        trade_count,
        sharpe,
        win_rate,
        expectancy,
        max_drawdown,
        win_rate_ci,
        symbols_used: reports.len() as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn report(trades: usize, wins: usize, total_return: f64, sharpe: f64, dd: f64) -> SymbolReport {
        SymbolReport {
            trade_count: trades,
            winning_trades: wins,
            total_trade_return: total_return,
            win_rate: wins as f64 / trades.max(1) as f64,
            expectancy: total_return / trades.max(1) as f64,
            sharpe,
            max_drawdown: dd,
        }
    }

    #[test]
    fn ci_reference_points() {
        assert_relative_eq!(win_rate_ci(0.5, 50), 0.1386, epsilon = 1e-4);
        assert_relative_eq!(win_rate_ci(0.5, 30), 0.1789, epsilon = 1e-4);
        assert_relative_eq!(win_rate_ci(0.45, 70), 0.1165, epsilon = 1e-4);
        assert!(win_rate_ci(0.5, 50) <= 0.15);
        assert!(win_rate_ci(0.5, 30) > 0.15);
        assert!(win_rate_ci(0.5, 0).is_infinite());
    }

    #[test]
    fn pools_trades_and_takes_worst_drawdown() {
        let reports = [
            report(10, 6, 0.05, 1.0, 0.10),
            report(30, 12, 0.03, 0.5, 0.30),
        ];
        let m = aggregate(Phase::OutOfSample, &reports).unwrap();
        assert_eq!(m.trade_count, 20);
        assert_relative_eq!(m.win_rate, 18.0 / 40.0);
        assert_relative_eq!(m.expectancy, 0.08 / 40.0, epsilon = 1e-15);
        assert_relative_eq!(m.sharpe, 0.75);
        assert_relative_eq!(m.max_drawdown, 0.30);
        assert_eq!(m.symbols_used, 2);
        assert_relative_eq!(m.win_rate_ci.unwrap(), win_rate_ci(0.45, 20));
    }

    #[test]
    fn in_sample_carries_no_ci_and_empty_input_is_an_error() {
        let m = aggregate(Phase::InSample, &[report(4, 2, 0.0, 0.0, 0.0)]).unwrap();
        assert_eq!(m.win_rate_ci, None);
        assert!(aggregate(Phase::InSample, &[]).is_err());
    }

    proptest! {
        #[test]
        fn ci_strictly_decreases_with_more_trades(wr in 0.01f64..0.99, n in 1u32..10_000) {
            prop_assert!(win_rate_ci(wr, n + 1) < win_rate_ci(wr, n));
        }
    }
}
