//! # Gauntlet Analytics Engine
//!
//! This crate provides the tools for conducting quantitative analysis of trading strategy
//! performance. It acts as the "unbiased judge" of the system.
//!
//! ## Architectural Principles
//!
//! - **Pure logic:** no knowledge of external systems. It depends only on `core-types`.
//! - **Stateless calculation:** `AnalyticsEngine` takes trade returns and an equity curve
//!   for one symbol and produces a `SymbolReport`. `aggregate` folds the reports of
//!   every valid symbol into the phase's `BacktestMetrics`.

// Declare the modules that constitute this crate.
pub mod aggregate;
pub mod engine;
pub mod error;
pub mod report;

// Re-export the key components to create a clean, public-facing API.
pub use aggregate::{aggregate, win_rate_ci, Z_95};
pub use engine::{max_drawdown, AnalyticsEngine};
pub use error::AnalyticsError;
pub use report::SymbolReport;
