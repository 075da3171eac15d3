use crate::error::DbError;
use async_trait::async_trait;
use core_types::{
    Kline, NewStrategy, PoolSnapshot, PoolStats, RiskState, RotationPlan, StatusTransition,
    StrategyRecord, StrategyStatus, Timeframe, Transition, WorkerId, Window,
};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Actor recorded on transitions written by the pool control loop.
pub const ROTATOR_ACTOR: &str = "rotator";

/// Durable home of strategies, their metrics, the transition history, the pool
/// aggregate and the process-wide flags.
///
/// Every implementation enforces the same rules: claims are compare-and-swap on
/// status plus lease, `commit_transition` checks ownership and the legal-transition
/// table and writes everything in one unit, metrics are write-once per phase, and
/// `apply_rotation` fails when the pool version moved.
#[async_trait]
pub trait StrategyStore: Send + Sync {
    async fn insert_strategy(&self, new: NewStrategy) -> Result<StrategyRecord, DbError>;

    async fn get_strategy(&self, id: Uuid) -> Result<StrategyRecord, DbError>;

    /// Newest first. `None` lists every status.
    async fn list_strategies(
        &self,
        status: Option<StrategyStatus>,
        limit: i64,
    ) -> Result<Vec<StrategyRecord>, DbError>;

    /// Claims the oldest strategy in `status` that is unclaimed or whose lease expired.
    async fn claim_next(
        &self,
        status: StrategyStatus,
        worker: &WorkerId,
        lease: Duration,
    ) -> Result<Option<StrategyRecord>, DbError>;

    async fn renew_lease(&self, id: Uuid, worker: &WorkerId, lease: Duration) -> Result<(), DbError>;

    /// Gives a claim back without changing status, so another worker can retry it.
    async fn release_claim(&self, id: Uuid, worker: &WorkerId) -> Result<(), DbError>;

    /// Moves a claimed strategy to `transition.to`, writing metrics, validation,
    /// score, reason and a history row together, and releases the claim.
    async fn commit_transition(
        &self,
        id: Uuid,
        worker: &WorkerId,
        transition: &Transition,
    ) -> Result<StrategyRecord, DbError>;

    /// Oldest first.
    async fn transitions(&self, id: Uuid) -> Result<Vec<StatusTransition>, DbError>;

    /// Number of strategies per status. Every status is present, zero included.
    async fn queue_depths(&self) -> Result<BTreeMap<StrategyStatus, u64>, DbError>;

    async fn pool_snapshot(&self) -> Result<PoolSnapshot, DbError>;

    /// Applies a rotation plan if the pool is still at `expected_version`.
    /// Returns the new version.
    async fn apply_rotation(&self, expected_version: i64, plan: &RotationPlan) -> Result<i64, DbError>;

    async fn pool_stats(&self) -> Result<PoolStats, DbError>;

    /// Makes slot `i` map to `accounts[i]`. Free slots beyond the list are removed.
    async fn configure_slots(&self, accounts: &[String]) -> Result<(), DbError>;

    /// Live re-score reported by the execution side. Only pool members accept one.
    async fn record_rolling_score(&self, id: Uuid, score: f64) -> Result<(), DbError>;

    async fn risk_state(&self) -> Result<RiskState, DbError>;

    async fn set_risk_state(&self, state: &RiskState) -> Result<(), DbError>;

    async fn generation_paused(&self) -> Result<bool, DbError>;

    async fn set_generation_paused(&self, paused: bool) -> Result<(), DbError>;
}

/// Read access to historical bars. Windows are half-open.
#[async_trait]
pub trait KlineStore: Send + Sync {
    async fn klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: &Window,
    ) -> Result<Vec<Kline>, DbError>;
}

/// Converts a std lease length into the chrono delta the stores compare against.
pub(crate) fn lease_delta(lease: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(lease.as_millis()).unwrap_or(i64::MAX / 1_000))
}
