use crate::error::EngineError;
use crate::market_data::MarketData;
use crate::simulation::SimulationPool;
use async_trait::async_trait;
use chrono::Utc;
use configuration::{DataConfig, ValidatorConfig};
use core_types::{StageName, StatusReason, StrategyRecord, StrategyStatus, Transition};
use optimizer::{IsOutcome, Optimizer};
use std::sync::Arc;
use wfo::{OosOutcome, WalkPeriod, WfoEngine};

/// One step of the pipeline.
///
/// `process` turns a claimed strategy into the transition to commit. Deterministic
/// failures are rejection transitions; an `Err` means the claim is released and the
/// strategy retried later.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    async fn process(&self, strategy: &StrategyRecord) -> Result<Transition, EngineError>;
}

/// The IS/OOS split for the strategy's timeframe, ending at the configured `as_of`
/// or now.
fn walk_period(data: &DataConfig, strategy: &StrategyRecord) -> Result<WalkPeriod, EngineError> {
    let as_of = data.as_of.unwrap_or_else(Utc::now);
    Ok(WalkPeriod::split(as_of, strategy.timeframe, data.history_days, data.oos_days)?)
}

// ============================================================================
// Validator
// ============================================================================

pub struct ValidatorStage {
    config: ValidatorConfig,
}

impl ValidatorStage {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Stage for ValidatorStage {
    fn name(&self) -> StageName {
        StageName::Validator
    }

    async fn process(&self, strategy: &StrategyRecord) -> Result<Transition, EngineError> {
        let transition = match validator::validate(&strategy.logic, &strategy.parameter_space, &self.config) {
            Ok(()) => Transition::advance(StrategyStatus::Validated),
            Err(violation) => Transition::reject(
                StrategyStatus::Rejected,
                StatusReason::new(StageName::Validator, violation.code(), violation.to_string()),
            ),
        };
        Ok(transition)
    }
}

// ============================================================================
// In-sample
// ============================================================================

pub struct InSampleStage {
    optimizer: Arc<Optimizer>,
    data: Arc<MarketData>,
    pool: SimulationPool,
    data_config: DataConfig,
}

impl InSampleStage {
    pub fn new(optimizer: Optimizer, data: Arc<MarketData>, pool: SimulationPool, data_config: DataConfig) -> Self {
        Self { optimizer: Arc::new(optimizer), data, pool, data_config }
    }
}

#[async_trait]
impl Stage for InSampleStage {
    fn name(&self) -> StageName {
        StageName::InSample
    }

    async fn process(&self, strategy: &StrategyRecord) -> Result<Transition, EngineError> {
        let period = walk_period(&self.data_config, strategy)?;
        let universe = self.data.universe(strategy.timeframe, period.in_sample).await?;

        let optimizer = Arc::clone(&self.optimizer);
        let record = strategy.clone();
        let outcome = self.pool.run(move || optimizer.run_is(&record, &universe)).await??;

        Ok(match outcome {
            IsOutcome::Passed { parameters, metrics, combinations } => {
                tracing::debug!(
                    strategy_id = %strategy.id,
                    combinations,
                    trade_count = metrics.trade_count,
                    sharpe = metrics.sharpe,
                    "In-sample optimization chose parameters"
                );
                Transition::advance(StrategyStatus::IsBacktested).with_parameters(parameters).with_metrics(metrics)
            }
            IsOutcome::Rejected(reason) => Transition::reject(StrategyStatus::Deleted, reason),
        })
    }
}

// ============================================================================
// Out-of-sample
// ============================================================================

pub struct OutOfSampleStage {
    engine: Arc<WfoEngine>,
    data: Arc<MarketData>,
    pool: SimulationPool,
    data_config: DataConfig,
}

impl OutOfSampleStage {
    pub fn new(engine: WfoEngine, data: Arc<MarketData>, pool: SimulationPool, data_config: DataConfig) -> Self {
        Self { engine: Arc::new(engine), data, pool, data_config }
    }
}

#[async_trait]
impl Stage for OutOfSampleStage {
    fn name(&self) -> StageName {
        StageName::OutOfSample
    }

    async fn process(&self, strategy: &StrategyRecord) -> Result<Transition, EngineError> {
        let period = walk_period(&self.data_config, strategy)?;
        let universe = self.data.universe(strategy.timeframe, period.out_of_sample).await?;

        let engine = Arc::clone(&self.engine);
        let record = strategy.clone();
        let outcome = self.pool.run(move || engine.run_oos(&record, &universe)).await??;

        Ok(match outcome {
            OosOutcome::Passed { metrics, validation, final_metrics } => Transition::advance(StrategyStatus::OosValidated)
                .with_metrics(metrics)
                .with_validation(validation)
                .with_final_metrics(final_metrics),
            OosOutcome::Rejected { metrics, validation, reason } => {
                let transition = Transition::reject(StrategyStatus::Deleted, reason).with_validation(validation);
                match metrics {
                    Some(metrics) => transition.with_metrics(metrics),
                    None => transition,
                }
            }
        })
    }
}

// ============================================================================
// Scorer
// ============================================================================

/// Recomputes the blend from the persisted IS and OOS metrics.
pub struct ScorerStage;

#[async_trait]
impl Stage for ScorerStage {
    fn name(&self) -> StageName {
        StageName::Scorer
    }

    async fn process(&self, strategy: &StrategyRecord) -> Result<Transition, EngineError> {
        let reject = |code: &str, detail: String| {
            Transition::reject(StrategyStatus::Deleted, StatusReason::new(StageName::Scorer, code, detail))
        };

        let (Some(is), Some(oos)) = (&strategy.is_metrics, &strategy.oos_metrics) else {
            return Ok(reject("missing_metrics", "in-sample or out-of-sample metrics were never recorded".into()));
        };
        Ok(match analyzer::final_metrics(is, oos) {
            Ok(final_metrics) => Transition::advance(StrategyStatus::Scored).with_final_metrics(final_metrics),
            Err(e) => reject("scoring_failed", e.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{metrics, new_strategy};
    use configuration::Config;
    use core_types::{NewStrategy, Phase};
    use database::MemoryStore;

    fn record(new: NewStrategy) -> StrategyRecord {
        StrategyRecord::generated(new, Utc::now())
    }

    #[tokio::test]
    async fn validator_rejects_structural_faults_permanently() {
        let stage = ValidatorStage::new(ValidatorConfig::default());

        let ok = stage.process(&record(new_strategy())).await.unwrap();
        assert_eq!(ok.to, StrategyStatus::Validated);

        let mut broken = new_strategy();
        broken.logic.entry.clear();
        let rejected = stage.process(&record(broken)).await.unwrap();
        assert_eq!(rejected.to, StrategyStatus::Rejected);
        assert_eq!(rejected.reason.unwrap().code, "no_entry");
    }

    #[tokio::test]
    async fn in_sample_without_market_data_deletes_the_strategy() {
        let config = Config::default();
        let store = Arc::new(MemoryStore::new());
        let data = Arc::new(MarketData::new(store, &config.data));
        let stage = InSampleStage::new(
            Optimizer::new(&config),
            data,
            SimulationPool::new(1).unwrap(),
            config.data.clone(),
        );

        let transition = stage.process(&record(new_strategy())).await.unwrap();
        assert_eq!(transition.to, StrategyStatus::Deleted);
        assert_eq!(transition.reason.unwrap().code, "insufficient_data");
        assert!(transition.metrics.is_none());
    }

    #[tokio::test]
    async fn scorer_persists_the_recomputed_blend() {
        let mut strategy = record(new_strategy());
        strategy.is_metrics = Some(metrics(Phase::InSample, 0.8));
        strategy.oos_metrics = Some(metrics(Phase::OutOfSample, 0.6));

        let transition = ScorerStage.process(&strategy).await.unwrap();
        assert_eq!(transition.to, StrategyStatus::Scored);
        let expected = analyzer::final_metrics(
            strategy.is_metrics.as_ref().unwrap(),
            strategy.oos_metrics.as_ref().unwrap(),
        )
        .unwrap();
        assert_eq!(transition.final_metrics, Some(expected));
    }

    #[tokio::test]
    async fn scorer_deletes_a_strategy_without_metrics() {
        let transition = ScorerStage.process(&record(new_strategy())).await.unwrap();
        assert_eq!(transition.to, StrategyStatus::Deleted);
        assert_eq!(transition.reason.unwrap().code, "missing_metrics");
    }
}
