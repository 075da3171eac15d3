use analytics::win_rate_ci;
use configuration::OutOfSampleConfig;
use core_types::{BacktestMetrics, FinalMetrics, StageName, StatusReason, Timeframe, ValidationRecord};

/// The verdict of the statistical gate for one strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum GateVerdict {
    Passed {
        validation: ValidationRecord,
        final_metrics: FinalMetrics,
    },
    Failed {
        validation: ValidationRecord,
        reason: StatusReason,
    },
}

impl GateVerdict {
    pub fn is_passed(&self) -> bool {
        matches!(self, GateVerdict::Passed { .. })
    }

    fn fail(code: &str, detail: String) -> Self {
        let reason = StatusReason::new(StageName::OutOfSample, code, detail);
        GateVerdict::Failed { validation: ValidationRecord::failed(reason.to_string()), reason }
    }
}

/// Applies the six OOS gates in order, then the degradation check, then scores.
///
/// The first failing gate decides; later gates are not evaluated.
pub fn evaluate(
    is: &BacktestMetrics,
    oos: &BacktestMetrics,
    timeframe: Timeframe,
    config: &OutOfSampleConfig,
) -> GateVerdict {
    // --- Gate 1: enough trades for the statistics to mean anything ---
    let min_trades = config.min_trades.get(timeframe);
    if oos.trade_count < min_trades {
        return GateVerdict::fail(
            "gate_1_trade_count",
            format!("{} trades, {} required on {}", oos.trade_count, min_trades, timeframe),
        );
    }

    // --- Gate 2: risk-adjusted return ---
    if !(oos.sharpe >= config.min_sharpe) {
        return GateVerdict::fail("gate_2_sharpe", format!("sharpe {:.4} below {}", oos.sharpe, config.min_sharpe));
    }

    // --- Gate 3: hit rate ---
    if !(oos.win_rate >= config.min_win_rate) {
        return GateVerdict::fail(
            "gate_3_win_rate",
            format!("win rate {:.4} below {}", oos.win_rate, config.min_win_rate),
        );
    }

    // --- Gate 4: edge per trade ---
    if !(oos.expectancy >= config.min_expectancy) {
        return GateVerdict::fail(
            "gate_4_expectancy",
            format!("expectancy {:.5} below {}", oos.expectancy, config.min_expectancy),
        );
    }

    // --- Gate 5: drawdown ---
    if !(oos.max_drawdown <= config.max_drawdown) {
        return GateVerdict::fail(
            "gate_5_max_drawdown",
            format!("max drawdown {:.4} above {}", oos.max_drawdown, config.max_drawdown),
        );
    }

    // --- Gate 6: confidence in the win rate ---
    let ci = oos.win_rate_ci.unwrap_or_else(|| win_rate_ci(oos.win_rate, oos.trade_count));
    let max_ci = config.max_ci.get(timeframe);
    if !(ci <= max_ci) {
        return GateVerdict::fail(
            "gate_6_confidence_interval",
            format!("win rate CI {ci:.4} wider than {max_ci} at N={}", oos.trade_count),
        );
    }

    // --- Degradation against IS ---
    let degradation = match analyzer::degradation(is.sharpe, oos.sharpe) {
        Ok(d) => d,
        Err(e) => return GateVerdict::fail("degradation_undefined", e.to_string()),
    };
    if degradation > config.max_degradation {
        return GateVerdict::fail(
            "overfitted",
            format!(
                "sharpe fell from {:.4} to {:.4}, degradation {:.4} above {}",
                is.sharpe, oos.sharpe, degradation, config.max_degradation
            ),
        );
    }

    match analyzer::final_metrics(is, oos) {
        Ok(final_metrics) => GateVerdict::Passed {
            validation: ValidationRecord::passed(degradation, final_metrics.adj),
            final_metrics,
        },
        Err(e) => GateVerdict::fail("scoring_failed", e.to_string()),
    }
}
