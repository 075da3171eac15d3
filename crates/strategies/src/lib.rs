//! # Gauntlet Strategy Library
//!
//! Turns a generated `StrategyLogic` plus one parameter set into a streaming,
//! bar-by-bar signal source.
//!
//! ## Architectural Principles
//!
//! - **Pure logic:** no knowledge of databases, stages or execution. It depends only
//!   on `core-types`.
//! - **Strategy agnostic engine:** the backtester drives anything implementing the
//!   `Strategy` trait without knowing its internals.
//! - **Causal by construction:** an evaluation at bar `t` can only read bars already
//!   pushed into the strategy.

// Declare all the modules that constitute this crate.
pub mod error;
pub mod indicator;
pub mod rule;

// Re-export the key components to create a clean, public-facing API.
pub use error::StrategyError;
pub use indicator::{Indicator, IndicatorKey};
pub use rule::RuleStrategy;

use core_types::{Direction, Kline};

/// What the strategy's conditions say about the bar just evaluated.
///
/// Whether either flag acts depends on the caller's position: `entry` only matters
/// when flat, `exit` only while a position is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BarSignal {
    pub entry: bool,
    pub exit: bool,
}

/// The core trait that all trading strategies must implement.
///
/// The `&mut self` in `evaluate` is crucial, as strategies maintain their own
/// internal state (indicator buffers and bar history).
/// The `Send` bound lets a strategy be built on one thread and simulated on a
/// worker of the parallel optimizer.
pub trait Strategy: Send {
    /// Feeds the next closed bar and evaluates the conditions on it.
    fn evaluate(&mut self, kline: &Kline) -> Result<BarSignal, StrategyError>;

    fn direction(&self) -> Direction;

    /// Stop distance as a fraction of the entry price.
    fn stop_loss(&self) -> Option<f64>;

    /// Target distance as a fraction of the entry price.
    fn take_profit(&self) -> Option<f64>;
}
