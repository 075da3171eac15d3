use crate::error::DbError;
use crate::store::{lease_delta, KlineStore, StrategyStore, ROTATOR_ACTOR};
use async_trait::async_trait;
use chrono::Utc;
use core_types::{
    Kline, LiveSlot, NewStrategy, Phase, PoolMember, PoolSnapshot, PoolStats, RiskState,
    RotationPlan, StatusReason, StatusTransition, StrategyRecord, StrategyStatus, Timeframe,
    Transition, WorkerId, Window,
};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// A process-local store with the same semantics as [`crate::DbRepository`].
///
/// Every operation runs under one lock, which makes each of them trivially atomic.
/// Backs the test suites of every crate that needs a store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    klines: RwLock<HashMap<(String, Timeframe), Vec<Kline>>>,
}

#[derive(Debug, Default, Clone)]
struct MemoryState {
    strategies: HashMap<Uuid, StrategyRecord>,
    history: Vec<StatusTransition>,
    pool_version: i64,
    pool_stats: PoolStats,
    slots: BTreeMap<i32, LiveSlot>,
    risk: RiskState,
    generation_paused: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads bars for one symbol. Kept sorted by open time.
    pub async fn insert_klines(&self, symbol: &str, timeframe: Timeframe, klines: Vec<Kline>) {
        let mut klines_by_series = self.klines.write().await;
        let series = klines_by_series.entry((symbol.to_string(), timeframe)).or_default();
        series.extend(klines);
        series.sort_by_key(|k| k.open_time);
        series.dedup_by_key(|k| k.open_time);
    }
}

impl MemoryState {
    fn record_mut(&mut self, id: Uuid) -> Result<&mut StrategyRecord, DbError> {
        self.strategies.get_mut(&id).ok_or(DbError::NotFound)
    }

    fn claimed_by<'a>(&'a mut self, id: Uuid, worker: &WorkerId) -> Result<&'a mut StrategyRecord, DbError> {
        let record = self.record_mut(id)?;
        if record.claimed_by.as_deref() != Some(worker.as_str()) {
            return Err(DbError::LeaseLost(id));
        }
        Ok(record)
    }

    fn push_history(&mut self, id: Uuid, from: StrategyStatus, to: StrategyStatus, actor: &str, reason: Option<String>) {
        self.history.push(StatusTransition {
            strategy_id: id,
            from_status: from,
            to_status: to,
            at: Utc::now(),
            actor: actor.to_string(),
            reason,
        });
    }

    fn rotate(
        &mut self,
        id: Uuid,
        from: &[StrategyStatus],
        to: StrategyStatus,
        reason: Option<&StatusReason>,
    ) -> Result<(), DbError> {
        let now = Utc::now();
        let record = self.record_mut(id)?;
        let current = record.status;
        if !from.contains(&current) || !current.can_transition_to(to) {
            return Err(DbError::IllegalTransition { id, from: current.to_string(), to: to.to_string() });
        }
        record.status = to;
        if let Some(reason) = reason {
            record.reason = Some(reason.clone());
        }
        record.live_since = (to == StrategyStatus::Live).then_some(now);
        record.version += 1;
        record.updated_at = now;

        if to != StrategyStatus::Live {
            for slot in self.slots.values_mut().filter(|s| s.strategy_id == Some(id)) {
                slot.strategy_id = None;
                slot.assigned_at = None;
            }
        }
        self.push_history(id, current, to, ROTATOR_ACTOR, reason.map(|r| r.to_string()));
        Ok(())
    }

    fn members(&self, statuses: &[StrategyStatus]) -> Vec<PoolMember> {
        let mut members: Vec<PoolMember> = self
            .strategies
            .values()
            .filter(|r| statuses.contains(&r.status))
            .map(|r| PoolMember {
                id: r.id,
                status: r.status,
                final_score: r.final_score.unwrap_or(0.0),
                rolling_score: r.rolling_score,
                created_at: r.created_at,
                live_since: r.live_since,
            })
            .collect();
        members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        members
    }
}

#[async_trait]
impl StrategyStore for MemoryStore {
    async fn insert_strategy(&self, new: NewStrategy) -> Result<StrategyRecord, DbError> {
        let record = StrategyRecord::generated(new, Utc::now());
        let mut state = self.state.lock().await;
        state.strategies.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_strategy(&self, id: Uuid) -> Result<StrategyRecord, DbError> {
        let state = self.state.lock().await;
        state.strategies.get(&id).cloned().ok_or(DbError::NotFound)
    }

    async fn list_strategies(
        &self,
        status: Option<StrategyStatus>,
        limit: i64,
    ) -> Result<Vec<StrategyRecord>, DbError> {
        let state = self.state.lock().await;
        let mut records: Vec<StrategyRecord> = state
            .strategies
            .values()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(records)
    }

    async fn claim_next(
        &self,
        status: StrategyStatus,
        worker: &WorkerId,
        lease: Duration,
    ) -> Result<Option<StrategyRecord>, DbError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let next = state
            .strategies
            .values_mut()
            .filter(|r| r.status == status && r.is_claimable(now))
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        Ok(next.map(|record| {
            record.claimed_by = Some(worker.as_str().to_string());
            record.lease_expires_at = Some(now + lease_delta(lease));
            record.version += 1;
            record.updated_at = now;
            record.clone()
        }))
    }

    async fn renew_lease(&self, id: Uuid, worker: &WorkerId, lease: Duration) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        let record = state.claimed_by(id, worker)?;
        record.lease_expires_at = Some(Utc::now() + lease_delta(lease));
        Ok(())
    }

    async fn release_claim(&self, id: Uuid, worker: &WorkerId) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        let record = state.claimed_by(id, worker)?;
        record.claimed_by = None;
        record.lease_expires_at = None;
        record.version += 1;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn commit_transition(
        &self,
        id: Uuid,
        worker: &WorkerId,
        transition: &Transition,
    ) -> Result<StrategyRecord, DbError> {
        let mut state = self.state.lock().await;
        let record = state.claimed_by(id, worker)?;
        let from = record.status;
        if !from.can_transition_to(transition.to) {
            return Err(DbError::IllegalTransition { id, from: from.to_string(), to: transition.to.to_string() });
        }

        if let Some(metrics) = &transition.metrics {
            let slot = match metrics.phase {
                Phase::InSample => &mut record.is_metrics,
                Phase::OutOfSample => &mut record.oos_metrics,
            };
            if slot.is_some() {
                return Err(DbError::MetricsAlreadyWritten { id, phase: metrics.phase });
            }
            *slot = Some(metrics.clone());
        }
        if let Some(parameters) = &transition.parameters {
            record.parameters = Some(parameters.clone());
        }
        if let Some(validation) = &transition.validation {
            record.validation = Some(validation.clone());
        }
        if let Some(final_metrics) = transition.final_metrics {
            record.final_metrics = Some(final_metrics);
            record.final_score = Some(final_metrics.final_score);
        }
        if let Some(reason) = &transition.reason {
            record.reason = Some(reason.clone());
        }
        record.status = transition.to;
        record.claimed_by = None;
        record.lease_expires_at = None;
        record.version += 1;
        record.updated_at = Utc::now();
        let committed = record.clone();

        let reason = transition.reason.as_ref().map(|r| r.to_string());
        state.push_history(id, from, transition.to, worker.as_str(), reason);
        Ok(committed)
    }

    async fn transitions(&self, id: Uuid) -> Result<Vec<StatusTransition>, DbError> {
        let state = self.state.lock().await;
        Ok(state.history.iter().filter(|t| t.strategy_id == id).cloned().collect())
    }

    async fn queue_depths(&self) -> Result<BTreeMap<StrategyStatus, u64>, DbError> {
        let state = self.state.lock().await;
        let mut depths: BTreeMap<StrategyStatus, u64> =
            StrategyStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for record in state.strategies.values() {
            *depths.entry(record.status).or_default() += 1;
        }
        Ok(depths)
    }

    async fn pool_snapshot(&self) -> Result<PoolSnapshot, DbError> {
        let state = self.state.lock().await;
        Ok(PoolSnapshot {
            version: state.pool_version,
            members: state.members(&[StrategyStatus::Active, StrategyStatus::Live]),
            candidates: state.members(&[StrategyStatus::Scored]),
            slots: state.slots.values().cloned().collect(),
        })
    }

    async fn apply_rotation(&self, expected_version: i64, plan: &RotationPlan) -> Result<i64, DbError> {
        use StrategyStatus::*;

        let mut guard = self.state.lock().await;
        if guard.pool_version != expected_version {
            return Err(DbError::VersionConflict { expected: expected_version });
        }

        // Work on a copy so a failing step leaves nothing half-applied.
        let mut next = guard.clone();
        for (id, reason) in &plan.retire {
            next.rotate(*id, &[Scored, Active, Live], Retired, Some(reason))?;
        }
        for id in &plan.demote {
            next.rotate(*id, &[Live], Active, None)?;
        }
        for id in &plan.admit {
            next.rotate(*id, &[Scored], Active, None)?;
        }
        for (id, slot_id) in &plan.promote {
            next.rotate(*id, &[Active], Live, None)?;
            let slot = next
                .slots
                .get_mut(slot_id)
                .filter(|s| s.strategy_id.is_none())
                .ok_or(DbError::VersionConflict { expected: expected_version })?;
            slot.strategy_id = Some(*id);
            slot.assigned_at = Some(Utc::now());
        }
        next.pool_version += 1;
        next.pool_stats = plan.stats;

        *guard = next;
        Ok(guard.pool_version)
    }

    async fn pool_stats(&self) -> Result<PoolStats, DbError> {
        Ok(self.state.lock().await.pool_stats)
    }

    async fn configure_slots(&self, accounts: &[String]) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        for (slot_id, account) in accounts.iter().enumerate() {
            let slot_id = slot_id as i32;
            state
                .slots
                .entry(slot_id)
                .and_modify(|s| s.account = account.clone())
                .or_insert_with(|| LiveSlot {
                    slot_id,
                    account: account.clone(),
                    strategy_id: None,
                    assigned_at: None,
                });
        }
        let count = accounts.len() as i32;
        state.slots.retain(|id, slot| *id < count || slot.strategy_id.is_some());
        Ok(())
    }

    async fn record_rolling_score(&self, id: Uuid, score: f64) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        let record = state.record_mut(id)?;
        if !record.status.is_pool_member() {
            return Err(DbError::NotFound);
        }
        record.rolling_score = Some(score);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn risk_state(&self) -> Result<RiskState, DbError> {
        Ok(self.state.lock().await.risk.clone())
    }

    async fn set_risk_state(&self, risk: &RiskState) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        state.risk = RiskState { updated_at: risk.updated_at.or(Some(Utc::now())), ..risk.clone() };
        Ok(())
    }

    async fn generation_paused(&self) -> Result<bool, DbError> {
        Ok(self.state.lock().await.generation_paused)
    }

    async fn set_generation_paused(&self, paused: bool) -> Result<(), DbError> {
        self.state.lock().await.generation_paused = paused;
        Ok(())
    }
}

#[async_trait]
impl KlineStore for MemoryStore {
    async fn klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: &Window,
    ) -> Result<Vec<Kline>, DbError> {
        let klines = self.klines.read().await;
        Ok(klines
            .get(&(symbol.to_string(), timeframe))
            .map(|series| series.iter().filter(|k| window.contains(k.open_time)).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{
        BacktestMetrics, Comparison, Condition, Direction, Operand, PriceField, StageName,
        StrategyLogic, Value,
    };
    use std::collections::HashSet;
    use std::sync::Arc;

    fn sample_strategy() -> NewStrategy {
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

    fn metrics(phase: Phase) -> BacktestMetrics {
        BacktestMetrics {
            phase,
            trade_count: 40,
            sharpe: 1.0,
            win_rate: 0.5,
            expectancy: 0.003,
            max_drawdown: 0.2,
            win_rate_ci: None,
            symbols_used: 5,
        }
    }

    const LEASE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn concurrent_claims_never_share_a_strategy() {
        let store = Arc::new(MemoryStore::new());
        for _ in 0..20 {
            store.insert_strategy(sample_strategy()).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let worker = WorkerId::new(StageName::Validator);
                let mut claimed = Vec::new();
                while let Some(record) = store
                    .claim_next(StrategyStatus::Generated, &worker, LEASE)
                    .await
                    .unwrap()
                {
                    claimed.push(record.id);
                    tokio::task::yield_now().await;
                }
                claimed
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "strategy {id} claimed twice");
            }
        }
        assert_eq!(seen.len(), 20);
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimable_and_old_owner_loses_commit() {
        let store = MemoryStore::new();
        let record = store.insert_strategy(sample_strategy()).await.unwrap();
        let first = WorkerId::new(StageName::Validator);
        let second = WorkerId::new(StageName::Validator);

        store.claim_next(StrategyStatus::Generated, &first, Duration::ZERO).await.unwrap().unwrap();
        let reclaimed = store.claim_next(StrategyStatus::Generated, &second, LEASE).await.unwrap();
        assert_eq!(reclaimed.map(|r| r.id), Some(record.id));

        let err = store
            .commit_transition(record.id, &first, &Transition::advance(StrategyStatus::Validated))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::LeaseLost(_)));
        store
            .commit_transition(record.id, &second, &Transition::advance(StrategyStatus::Validated))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn commit_rejects_skipped_stages_and_second_metrics_write() {
        let store = MemoryStore::new();
        let record = store.insert_strategy(sample_strategy()).await.unwrap();
        let worker = WorkerId::new(StageName::InSample);

        store.claim_next(StrategyStatus::Generated, &worker, LEASE).await.unwrap();
        let err = store
            .commit_transition(record.id, &worker, &Transition::advance(StrategyStatus::Scored))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::IllegalTransition { .. }));

        store
            .commit_transition(record.id, &worker, &Transition::advance(StrategyStatus::Validated))
            .await
            .unwrap();
        store.claim_next(StrategyStatus::Validated, &worker, LEASE).await.unwrap();
        let is_done = Transition::advance(StrategyStatus::IsBacktested).with_metrics(metrics(Phase::InSample));
        store.commit_transition(record.id, &worker, &is_done).await.unwrap();

        store.claim_next(StrategyStatus::IsBacktested, &worker, LEASE).await.unwrap();
        let rewrite = Transition::advance(StrategyStatus::OosValidated).with_metrics(metrics(Phase::InSample));
        let err = store.commit_transition(record.id, &worker, &rewrite).await.unwrap_err();
        assert!(matches!(err, DbError::MetricsAlreadyWritten { phase: Phase::InSample, .. }));

        let history = store.transitions(record.id).await.unwrap();
        let path: Vec<_> = history.iter().map(|t| t.to_status).collect();
        assert_eq!(path, vec![StrategyStatus::Validated, StrategyStatus::IsBacktested]);
    }

    #[tokio::test]
    async fn rolling_score_is_only_recorded_for_pool_members() {
        let store = MemoryStore::new();
        let record = store.insert_strategy(sample_strategy()).await.unwrap();
        let err = store.record_rolling_score(record.id, 0.4).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound));
        assert!(matches!(store.record_rolling_score(Uuid::new_v4(), 0.4).await, Err(DbError::NotFound)));

        store.state.lock().await.record_mut(record.id).unwrap().status = StrategyStatus::Active;
        store.record_rolling_score(record.id, 0.4).await.unwrap();
        assert_eq!(store.get_strategy(record.id).await.unwrap().rolling_score, Some(0.4));

        store.state.lock().await.record_mut(record.id).unwrap().status = StrategyStatus::Live;
        store.record_rolling_score(record.id, -0.1).await.unwrap();
        let snapshot = store.pool_snapshot().await.unwrap();
        assert_eq!(snapshot.members.len(), 1);
        assert_eq!(snapshot.members[0].score(), -0.1);
    }

    #[tokio::test]
    async fn stale_rotation_plan_is_refused() {
        let store = MemoryStore::new();
        store.configure_slots(&["a".into(), "b".into()]).await.unwrap();
        let snapshot = store.pool_snapshot().await.unwrap();
        assert_eq!(snapshot.slots.len(), 2);

        let version = store.apply_rotation(snapshot.version, &RotationPlan::default()).await.unwrap();
        assert_eq!(version, snapshot.version + 1);
        let err = store.apply_rotation(snapshot.version, &RotationPlan::default()).await.unwrap_err();
        assert!(err.is_conflict());
    }
}
