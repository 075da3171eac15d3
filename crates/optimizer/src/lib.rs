//! The in-sample backtester: grid search over a strategy's declared parameters.

use analyzer::rank_combinations;
use backtester::{usable_series, BacktestError, Backtester, SymbolSeries};
use configuration::{Config, InSampleConfig, Simulation};
use core_types::{BacktestMetrics, ParamSet, Phase, StageName, StatusReason, StrategyRecord};
use rayon::prelude::*;

pub mod error;
pub mod generator;

pub use error::OptimizerError;
pub use generator::generate_parameter_sets;

/// What the IS stage decided about one strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum IsOutcome {
    Passed {
        parameters: ParamSet,
        metrics: BacktestMetrics,
        combinations: usize,
    },
    /// Deterministic failure. The strategy is deleted with this reason.
    Rejected(StatusReason),
}

fn reject(code: &str, detail: impl Into<String>) -> IsOutcome {
    IsOutcome::Rejected(StatusReason::new(StageName::InSample, code, detail))
}

pub struct Optimizer {
    simulation: Simulation,
    gates: InSampleConfig,
    min_bars: usize,
    min_valid_symbols: usize,
}

impl Optimizer {
    pub fn new(config: &Config) -> Self {
        Self {
            simulation: config.simulation.clone(),
            gates: config.in_sample.clone(),
            min_bars: config.data.min_bars_is,
            min_valid_symbols: config.data.min_valid_symbols,
        }
    }

    /// Optimizes `strategy` over its in-sample `universe`.
    ///
    /// CPU-bound: call from the simulation pool. Returns `Err` only for faults that
    /// may succeed on retry (bad market data); anything the strategy itself causes is
    /// an `IsOutcome::Rejected`.
    pub fn run_is(&self, strategy: &StrategyRecord, universe: &[SymbolSeries]) -> Result<IsOutcome, OptimizerError> {
        let valid = usable_series(universe, self.min_bars);
        if valid.len() < self.min_valid_symbols {
            return Ok(reject(
                "insufficient_data",
                format!(
                    "{} of {} symbols have at least {} in-sample bars, {} required",
                    valid.len(),
                    universe.len(),
                    self.min_bars,
                    self.min_valid_symbols
                ),
            ));
        }

        let grid = match generate_parameter_sets(&strategy.parameter_space) {
            Ok(grid) => grid,
            Err(e) => return Ok(reject("invalid_parameter_space", e.to_string())),
        };
        let combinations = grid.len();
        tracing::debug!(strategy_id = %strategy.id, combinations, symbols = valid.len(), "Starting in-sample grid search");

        let backtester = Backtester::new(&self.simulation, strategy.timeframe);
        let evaluated = grid
            .into_par_iter()
            .map(|params| -> Result<_, BacktestError> {
                let metrics = backtester.run_universe(&strategy.logic, &params, &valid, Phase::InSample)?;
                Ok((params, metrics))
            })
            .collect::<Result<Vec<_>, _>>();
        let evaluated = match evaluated {
            Ok(evaluated) => evaluated,
            Err(e) if e.is_strategy_fault() => return Ok(reject("simulation_failed", e.to_string())),
            Err(e) => return Err(e.into()),
        };

        let Some(best) = rank_combinations(evaluated).into_iter().next() else {
            return Ok(reject("no_scorable_combination", "every combination produced a non-finite score"));
        };

        let min_trades = self.gates.min_trades.get(strategy.timeframe);
        if best.metrics.trade_count < min_trades {
            return Ok(reject(
                "is_trade_count",
                format!("{} trades per symbol, {} required on {}", best.metrics.trade_count, min_trades, strategy.timeframe),
            ));
        }
        if !(best.metrics.sharpe > self.gates.min_sharpe) {
            return Ok(reject(
                "is_sharpe",
                format!("sharpe {:.4} is not above {}", best.metrics.sharpe, self.gates.min_sharpe),
            ));
        }

        tracing::debug!(
            strategy_id = %strategy.id,
            score = best.score,
            sharpe = best.metrics.sharpe,
            trades = best.metrics.trade_count,
            "In-sample optimization passed"
        );
        Ok(IsOutcome::Passed { parameters: best.parameters, metrics: best.metrics, combinations })
    }
}
