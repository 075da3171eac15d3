//! Bar-by-bar simulation of a generated strategy over a universe of symbols.
//!
//! The IS and OOS stages share this engine. Each symbol is simulated independently
//! on the rayon pool and the per-symbol reports are merged by `analytics::aggregate`.

pub mod error;
pub mod fill;
pub mod simulator;

pub use error::BacktestError;
pub use fill::{Bar, FillModel, Side};
pub use simulator::{simulate, ClosedTrade, ExitReason, SymbolRun};

use analytics::{aggregate, AnalyticsEngine, SymbolReport};
use configuration::Simulation;
use core_types::{BacktestMetrics, Kline, ParamSet, Phase, StrategyLogic, Timeframe};
use rayon::prelude::*;
use std::sync::Arc;
use strategies::RuleStrategy;

/// One symbol's bars for a window, shared between the cache and the workers.
#[derive(Debug, Clone)]
pub struct SymbolSeries {
    pub symbol: String,
    pub klines: Arc<[Kline]>,
}

impl SymbolSeries {
    pub fn new(symbol: impl Into<String>, klines: Vec<Kline>) -> Self {
        Self { symbol: symbol.into(), klines: klines.into() }
    }

    pub fn len(&self) -> usize {
        self.klines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.klines.is_empty()
    }
}

/// The series with at least `min_bars` bars, in their original order.
pub fn usable_series(universe: &[SymbolSeries], min_bars: usize) -> Vec<SymbolSeries> {
    universe.iter().filter(|s| s.len() >= min_bars).cloned().collect()
}

/// The main backtesting engine for one timeframe.
#[derive(Debug, Clone, Copy)]
pub struct Backtester {
    fill: FillModel,
    initial_capital: f64,
    analytics_engine: AnalyticsEngine,
}

impl Backtester {
    pub fn new(simulation: &Simulation, timeframe: Timeframe) -> Self {
        Self {
            fill: FillModel::new(simulation),
            initial_capital: simulation.initial_capital,
            analytics_engine: AnalyticsEngine::new(timeframe.bars_per_year()),
        }
    }

    /// Simulates one parameter set on one symbol and reports its metrics.
    pub fn run_symbol(
        &self,
        logic: &StrategyLogic,
        params: &ParamSet,
        series: &SymbolSeries,
    ) -> Result<SymbolReport, BacktestError> {
        // Every run gets a fresh strategy so indicator state never leaks across symbols.
        let mut strategy = RuleStrategy::new(logic, params)?;
        let run = simulate(&mut strategy, &series.klines, &self.fill, self.initial_capital)?;
        let report = self.analytics_engine.calculate(&run.trade_returns(), &run.equity)?;
        tracing::trace!(symbol = %series.symbol, trades = report.trade_count, sharpe = report.sharpe, "Symbol backtested");
        Ok(report)
    }

    /// Simulates one parameter set across every series in parallel and aggregates.
    ///
    /// Must be called from a rayon context or a blocking thread, never directly on
    /// an async executor thread.
    pub fn run_universe(
        &self,
        logic: &StrategyLogic,
        params: &ParamSet,
        universe: &[SymbolSeries],
        phase: Phase,
    ) -> Result<BacktestMetrics, BacktestError> {
        let reports = universe
            .par_iter()
            .map(|series| self.run_symbol(logic, params, series))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(aggregate(phase, &reports)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use core_types::{Comparison, Condition, Direction, Operand, PriceField, Value};
    use rust_decimal::prelude::FromPrimitive;
    use rust_decimal::Decimal;

    fn series(symbol: &str, closes: &[f64]) -> SymbolSeries {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let klines = closes
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let open_time = start + Duration::hours(i as i64);
                let price = Decimal::from_f64(*c).unwrap();
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

    fn momentum() -> StrategyLogic {
        let close = |bars_ago| Operand::Price { field: PriceField::Close, bars_ago };
        StrategyLogic {
            direction: Direction::Long,
            entry: vec![Condition { left: close(0), op: Comparison::Gt, right: close(1) }],
            exit: vec![Condition { left: close(0), op: Comparison::Lt, right: close(1) }],
            stop_loss: Some(Value::Param("stop".into())),
            take_profit: None,
        }
    }

    #[test]
    fn universe_metrics_pool_trades_across_symbols() {
        let simulation = Simulation { taker_fee_pct: 0.0, slippage_pct: 0.0, initial_capital: 1_000.0 };
        let backtester = Backtester::new(&simulation, Timeframe::H1);
        let params = ParamSet::from([("stop".to_string(), 0.5)]);

        // Up, up, down: one winning trade. Down, up, down: one losing trade.
        let universe = [
            series("AAAUSDT", &[10.0, 11.0, 12.0, 11.5, 11.5]),
            series("BBBUSDT", &[10.0, 9.0, 10.0, 9.0, 9.0]),
        ];
        let metrics = backtester.run_universe(&momentum(), &params, &universe, Phase::OutOfSample).unwrap();

        assert_eq!(metrics.symbols_used, 2);
        assert_eq!(metrics.trade_count, 1);
        assert_eq!(metrics.win_rate, 0.5);
        assert!(metrics.win_rate_ci.is_some());
    }

    #[test]
    fn short_series_are_not_usable() {
        let universe = [series("AAAUSDT", &[1.0; 10]), series("BBBUSDT", &[1.0; 3])];
        let usable = usable_series(&universe, 5);
        assert_eq!(usable.len(), 1);
        assert_eq!(usable[0].symbol, "AAAUSDT");
    }

    #[test]
    fn missing_parameter_surfaces_as_a_strategy_error() {
        let simulation = Simulation { taker_fee_pct: 0.0, slippage_pct: 0.0, initial_capital: 1_000.0 };
        let backtester = Backtester::new(&simulation, Timeframe::H1);
        let universe = [series("AAAUSDT", &[1.0, 2.0, 3.0])];
        let err = backtester
            .run_universe(&momentum(), &ParamSet::new(), &universe, Phase::InSample)
            .unwrap_err();
        assert!(matches!(err, BacktestError::Strategy(_)));
    }
}
