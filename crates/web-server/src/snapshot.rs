use core_types::{LiveSlot, PoolSnapshot, PoolStats, RiskState, StatusTransition, StrategyRecord, StrategyStatus};
use database::{DbError, StrategyStore};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Point-in-time view of the whole pipeline. Reads are not taken in one
/// transaction, so counts may be off by a strategy in flight.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub queue_depths: BTreeMap<StrategyStatus, u64>,
    pub generation_paused: bool,
    pub risk: RiskState,
    pub pool: PoolStats,
    pub slots: Vec<LiveSlot>,
}

impl PipelineSnapshot {
    pub async fn collect(store: &dyn StrategyStore) -> Result<Self, DbError> {
        Ok(Self {
            queue_depths: store.queue_depths().await?,
            generation_paused: store.generation_paused().await?,
            risk: store.risk_state().await?,
            pool: store.pool_stats().await?,
            slots: store.pool_snapshot().await?.slots,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolView {
    #[serde(flatten)]
    pub snapshot: PoolSnapshot,
    pub stats: PoolStats,
}

impl PoolView {
    pub async fn collect(store: &dyn StrategyStore) -> Result<Self, DbError> {
        Ok(Self { snapshot: store.pool_snapshot().await?, stats: store.pool_stats().await? })
    }
}

/// A strategy with its full status history, oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyDetail {
    pub strategy: StrategyRecord,
    pub history: Vec<StatusTransition>,
}

impl StrategyDetail {
    pub async fn collect(store: &dyn StrategyStore, id: Uuid) -> Result<Self, DbError> {
        let strategy = store.get_strategy(id).await?;
        let history = store.transitions(id).await?;
        Ok(Self { strategy, history })
    }
}
