pub mod error;
pub mod logic;
pub mod market;
pub mod metrics;
pub mod params;
pub mod pool;
pub mod status;
pub mod strategy;

// Re-export the core types to provide a clean public API.
pub use error::CoreError;
pub use logic::{Comparison, Condition, Direction, IndicatorKind, Operand, PriceField, StrategyLogic, Value};
pub use market::{ensure_disjoint, Kline, Timeframe, Window};
pub use metrics::{BacktestMetrics, FinalMetrics, Phase, ValidationRecord};
pub use params::{grid_size, ParamSet, ParameterRange, ParameterSpace};
pub use pool::{LiveSlot, PoolMember, PoolSnapshot, PoolStats, PromotionTieBreak, RiskState, RotationPlan};
pub use status::{StageName, StrategyStatus};
pub use strategy::{NewStrategy, StatusReason, StatusTransition, StrategyRecord, Transition, WorkerId};
