//! Walk-forward validation: the IS/OOS window split and the out-of-sample gate.
//!
//! The OOS run re-uses the parameters the in-sample optimizer chose. Nothing here
//! re-optimizes on out-of-sample data.

use backtester::{usable_series, Backtester, SymbolSeries};
use configuration::{Config, OutOfSampleConfig, Simulation};
use core_types::{BacktestMetrics, FinalMetrics, Phase, StageName, StatusReason, StrategyRecord, ValidationRecord};

pub mod error;
pub mod gate;
pub mod windows;

pub use error::WfoError;
pub use gate::{evaluate, GateVerdict};
pub use windows::WalkPeriod;

/// What the OOS stage decided about one strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum OosOutcome {
    Passed {
        metrics: BacktestMetrics,
        validation: ValidationRecord,
        final_metrics: FinalMetrics,
    },
    /// The strategy is deleted. `metrics` is present when the simulation ran.
    Rejected {
        metrics: Option<BacktestMetrics>,
        validation: ValidationRecord,
        reason: StatusReason,
    },
}

impl OosOutcome {
    fn rejected_without_metrics(code: &str, detail: String) -> Self {
        let reason = StatusReason::new(StageName::OutOfSample, code, detail);
        OosOutcome::Rejected { metrics: None, validation: ValidationRecord::failed(reason.to_string()), reason }
    }
}

/// The master engine for the out-of-sample phase.
pub struct WfoEngine {
    simulation: Simulation,
    gates: OutOfSampleConfig,
    min_bars: usize,
    min_valid_symbols: usize,
}

impl WfoEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            simulation: config.simulation.clone(),
            gates: config.out_of_sample.clone(),
            min_bars: config.data.min_bars_oos,
            min_valid_symbols: config.data.min_valid_symbols,
        }
    }

    /// Backtests `strategy` on its out-of-sample `universe` and applies the gate.
    ///
    /// CPU-bound: call from the simulation pool.
    pub fn run_oos(&self, strategy: &StrategyRecord, universe: &[SymbolSeries]) -> Result<OosOutcome, WfoError> {
        let (Some(parameters), Some(is_metrics)) = (&strategy.parameters, &strategy.is_metrics) else {
            return Err(WfoError::MissingInSample(strategy.id));
        };

        let valid = usable_series(universe, self.min_bars);
        if valid.len() < self.min_valid_symbols {
            return Ok(OosOutcome::rejected_without_metrics(
                "insufficient_data",
                format!(
                    "{} of {} symbols have at least {} out-of-sample bars, {} required",
                    valid.len(),
                    universe.len(),
                    self.min_bars,
                    self.min_valid_symbols
                ),
            ));
        }

        let backtester = Backtester::new(&self.simulation, strategy.timeframe);
        let metrics = match backtester.run_universe(&strategy.logic, parameters, &valid, Phase::OutOfSample) {
            Ok(metrics) => metrics,
            Err(e) if e.is_strategy_fault() => {
                return Ok(OosOutcome::rejected_without_metrics("simulation_failed", e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let outcome = match evaluate(is_metrics, &metrics, strategy.timeframe, &self.gates) {
            GateVerdict::Passed { validation, final_metrics } => {
                tracing::debug!(
                    strategy_id = %strategy.id,
                    final_score = final_metrics.final_score,
                    degradation = validation.degradation,
                    "Out-of-sample gate passed"
                );
                OosOutcome::Passed { metrics, validation, final_metrics }
            }
            GateVerdict::Failed { validation, reason } => {
                tracing::debug!(strategy_id = %strategy.id, reason = %reason, "Out-of-sample gate failed");
                OosOutcome::Rejected { metrics: Some(metrics), validation, reason }
            }
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use core_types::{
        Comparison, Condition, Direction, Kline, NewStrategy, Operand, ParamSet, ParameterSpace, PriceField,
        StrategyLogic, Timeframe, Value,
    };
    use rust_decimal::prelude::FromPrimitive;
    use rust_decimal::Decimal;

    fn flat(symbol: &str, bars: usize) -> SymbolSeries {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let price = Decimal::from_f64(50.0).unwrap();
        let klines = (0..bars)
            .map(|i| {
                let open_time = start + Duration::hours(i as i64);
                Kline {
                    open_time,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: Decimal::ONE,
                    close_time: open_time + Duration::hours(1),
                    interval: "1h".into(),
                }
            })
            .collect();
        SymbolSeries::new(symbol, klines)
    }

    fn strategy(with_is: bool) -> StrategyRecord {
        let close = Operand::Price { field: PriceField::Close, bars_ago: 0 };
        let logic = StrategyLogic {
            direction: Direction::Long,
            entry: vec![Condition {
                left: close,
                op: Comparison::Gt,
                right: Operand::Value { value: Value::Const(60.0) },
            }],
            exit: vec![],
            stop_loss: Some(Value::Const(0.05)),
            take_profit: None,
        };
        let mut record = StrategyRecord::generated(
            NewStrategy { logic, parameter_space: ParameterSpace::new(), timeframe: Timeframe::H1 },
            Utc::now(),
        );
        if with_is {
            record.parameters = Some(ParamSet::new());
            record.is_metrics = Some(BacktestMetrics {
                phase: Phase::InSample,
                trade_count: 40,
                sharpe: 1.2,
                win_rate: 0.5,
                expectancy: 0.004,
                max_drawdown: 0.2,
                win_rate_ci: None,
                symbols_used: 5,
            });
        }
        record
    }

    fn engine() -> WfoEngine {
        let mut config = Config::default();
        config.data.min_bars_oos = 10;
        config.data.min_valid_symbols = 2;
        WfoEngine::new(&config)
    }

    #[test]
    fn strategy_that_never_trades_fails_the_trade_count_gate_with_metrics_recorded() {
        let universe = [flat("AAAUSDT", 20), flat("BBBUSDT", 20)];
        match engine().run_oos(&strategy(true), &universe).unwrap() {
            OosOutcome::Rejected { metrics, reason, validation } => {
                assert_eq!(reason.code, "gate_1_trade_count");
                assert!(!validation.passed);
                let metrics = metrics.unwrap();
                assert_eq!(metrics.trade_count, 0);
                assert_eq!(metrics.win_rate_ci, Some(f64::INFINITY));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn too_few_valid_symbols_is_rejected_before_simulating() {
        let universe = [flat("AAAUSDT", 20), flat("BBBUSDT", 5)];
        match engine().run_oos(&strategy(true), &universe).unwrap() {
            OosOutcome::Rejected { metrics, reason, .. } => {
                assert_eq!(reason.code, "insufficient_data");
                assert!(metrics.is_none());
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn missing_in_sample_results_are_an_error_not_a_rejection() {
        let universe = [flat("AAAUSDT", 20), flat("BBBUSDT", 20)];
        assert!(matches!(
            engine().run_oos(&strategy(false), &universe),
            Err(WfoError::MissingInSample(_))
        ));
    }
}
