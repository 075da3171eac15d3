use crate::logic::StrategyLogic;
use crate::market::Timeframe;
use crate::metrics::{BacktestMetrics, FinalMetrics, ValidationRecord};
use crate::params::{ParamSet, ParameterSpace};
use crate::status::{StageName, StrategyStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A candidate as handed over by the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStrategy {
    pub logic: StrategyLogic,
    pub parameter_space: ParameterSpace,
    pub timeframe: Timeframe,
}

/// Why a strategy left the pipeline (or the pool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReason {
    pub stage: StageName,
    /// Stable machine-readable code, e.g. `gate_1_trade_count` or `overfitted`.
    pub code: String,
    pub detail: String,
}

impl StatusReason {
    pub fn new(stage: StageName, code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { stage, code: code.into(), detail: detail.into() }
    }
}

impl fmt::Display for StatusReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.stage, self.code, self.detail)
    }
}

/// The durable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub id: Uuid,
    pub logic: StrategyLogic,
    pub parameter_space: ParameterSpace,
    /// The combination chosen by in-sample optimization.
    pub parameters: Option<ParamSet>,
    pub timeframe: Timeframe,
    pub status: StrategyStatus,
    pub is_metrics: Option<BacktestMetrics>,
    pub oos_metrics: Option<BacktestMetrics>,
    pub validation: Option<ValidationRecord>,
    pub final_metrics: Option<FinalMetrics>,
    pub final_score: Option<f64>,
    /// Live re-score reported by the execution side. Falls back to `final_score`.
    pub rolling_score: Option<f64>,
    pub reason: Option<StatusReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub live_since: Option<DateTime<Utc>>,
    pub version: i64,
}

impl StrategyRecord {
    /// A freshly generated record, as the stores create it on insert.
    pub fn generated(new: NewStrategy, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            logic: new.logic,
            parameter_space: new.parameter_space,
            parameters: None,
            timeframe: new.timeframe,
            status: StrategyStatus::Generated,
            is_metrics: None,
            oos_metrics: None,
            validation: None,
            final_metrics: None,
            final_score: None,
            rolling_score: None,
            reason: None,
            created_at: now,
            updated_at: now,
            claimed_by: None,
            lease_expires_at: None,
            live_since: None,
            version: 0,
        }
    }

    /// The score the rotator ranks by.
    pub fn ranking_score(&self) -> Option<f64> {
        self.rolling_score.or(self.final_score)
    }

    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match (&self.claimed_by, self.lease_expires_at) {
            (None, _) => true,
            (Some(_), Some(expires)) => expires <= now,
            (Some(_), None) => true,
        }
    }
}

/// Everything a stage writes when it hands a strategy to the next queue.
///
/// Applied atomically: status, metrics and the history row commit together or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub to: StrategyStatus,
    pub reason: Option<StatusReason>,
    pub parameters: Option<ParamSet>,
    pub metrics: Option<BacktestMetrics>,
    pub validation: Option<ValidationRecord>,
    pub final_metrics: Option<FinalMetrics>,
}

impl Transition {
    pub fn advance(to: StrategyStatus) -> Self {
        Self {
            to,
            reason: None,
            parameters: None,
            metrics: None,
            validation: None,
            final_metrics: None,
        }
    }

    pub fn reject(to: StrategyStatus, reason: StatusReason) -> Self {
        Self { reason: Some(reason), ..Self::advance(to) }
    }

    pub fn with_parameters(mut self, parameters: ParamSet) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_metrics(mut self, metrics: BacktestMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_validation(mut self, validation: ValidationRecord) -> Self {
        self.validation = Some(validation);
        self
    }

    pub fn with_final_metrics(mut self, final_metrics: FinalMetrics) -> Self {
        self.final_metrics = Some(final_metrics);
        self
    }
}

/// One row of a strategy's status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub strategy_id: Uuid,
    pub from_status: StrategyStatus,
    pub to_status: StrategyStatus,
    pub at: DateTime<Utc>,
    pub actor: String,
    pub reason: Option<String>,
}

/// Identifies the worker holding a claim. Unique per process and stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new(stage: StageName) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", stage.as_str(), &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
