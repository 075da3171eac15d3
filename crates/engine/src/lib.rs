//! # Gauntlet Engine Crate
//!
//! Runs the pipeline. Each stage is a [`Stage`] driven by a [`StageWorker`] that
//! claims from the stage's input queue in the store, processes, and commits the
//! resulting transition. The [`Supervisor`] wires stages, the shared market-data
//! cache, the simulation pool, backpressure and the rotator into one process.

pub mod backpressure;
pub mod error;
pub mod market_data;
pub mod simulation;
pub mod stages;
pub mod supervisor;
pub mod worker;

pub use backpressure::{next_pause_state, Backpressure};
pub use error::EngineError;
pub use market_data::MarketData;
pub use simulation::SimulationPool;
pub use stages::{InSampleStage, OutOfSampleStage, ScorerStage, Stage, ValidatorStage};
pub use supervisor::{RunPlan, Supervisor};
pub use worker::StageWorker;

#[cfg(test)]
mod test_support {
    use core_types::{
        BacktestMetrics, Comparison, Condition, Direction, NewStrategy, Operand, Phase, PriceField, StrategyLogic,
        Timeframe, Value,
    };

    pub fn new_strategy() -> NewStrategy {
        NewStrategy {
            logic: StrategyLogic {
                direction: Direction::Long,
                entry: vec![Condition {
                    left: Operand::Price { field: PriceField::Close, bars_ago: 0 },
                    op: Comparison::Gt,
                    right: Operand::Value { value: Value::Const(100.0) },
                }],
                exit: vec![],
                stop_loss: Some(Value::Const(0.02)),
                take_profit: None,
            },
            parameter_space: Default::default(),
            timeframe: Timeframe::H1,
        }
    }

    pub fn metrics(phase: Phase, sharpe: f64) -> BacktestMetrics {
        BacktestMetrics {
            phase,
            trade_count: 70,
            sharpe,
            win_rate: 0.45,
            expectancy: 0.003,
            max_drawdown: 0.3,
            win_rate_ci: None,
            symbols_used: 5,
        }
    }
}
