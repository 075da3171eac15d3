//! The pool rotator: keeps the active pool within capacity and assigns the live slots.
//!
//! Planning is pure ([`plan_rotation`]); this module only reads a snapshot, plans,
//! and commits the plan against the snapshot's version.

use configuration::PoolConfig;
use core_types::{RiskState, RotationPlan};
use database::StrategyStore;
use events::{EventBus, PipelineEvent};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

pub mod error;
pub mod plan;

pub use error::RotatorError;
pub use plan::plan_rotation;

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Nothing to change.
    Idle,
    Applied { version: i64, plan: RotationPlan },
    /// The pool moved under us; the next tick re-plans from a fresh snapshot.
    Conflict,
}

pub struct Rotator {
    store: Arc<dyn StrategyStore>,
    config: PoolConfig,
    events: EventBus,
}

impl Rotator {
    pub fn new(store: Arc<dyn StrategyStore>, config: PoolConfig, events: EventBus) -> Self {
        Self { store, config, events }
    }

    /// Makes sure the store has one slot row per configured live slot.
    pub async fn prepare(&self) -> Result<(), RotatorError> {
        let accounts: Vec<String> = (0..self.config.max_live_slots)
            .map(|slot| self.config.account_for_slot(i32::try_from(slot).unwrap_or(i32::MAX)))
            .collect();
        self.store.configure_slots(&accounts).await?;
        tracing::info!(slots = accounts.len(), capacity = self.config.capacity, "Live slots configured");
        Ok(())
    }

    /// Runs one read-plan-commit cycle.
    pub async fn tick(&self) -> Result<TickOutcome, RotatorError> {
        let now = chrono::Utc::now();
        let risk = self.store.risk_state().await?;
        let snapshot = self.store.pool_snapshot().await?;
        let plan = plan_rotation(&snapshot, &self.config, &risk, now);

        if plan.is_noop() && self.store.pool_stats().await? == plan.stats {
            tracing::debug!(version = snapshot.version, "Pool unchanged");
            return Ok(TickOutcome::Idle);
        }

        match self.store.apply_rotation(snapshot.version, &plan).await {
            Ok(version) => {
                tracing::info!(
                    version,
                    admitted = plan.admit.len(),
                    retired = plan.retire.len(),
                    promoted = plan.promote.len(),
                    demoted = plan.demote.len(),
                    promotions_suppressed = risk.promotions_suppressed(now),
                    "Rotation committed"
                );
                self.events.publish(PipelineEvent::RotationApplied {
                    version,
                    admitted: plan.admit.len(),
                    retired: plan.retire.len(),
                    promoted: plan.promote.len(),
                    demoted: plan.demote.len(),
                    stats: plan.stats,
                });
                Ok(TickOutcome::Applied { version, plan })
            }
            Err(e) if e.is_conflict() => {
                tracing::warn!(expected = snapshot.version, error = %e, "Pool changed during planning, will re-plan");
                Ok(TickOutcome::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Ticks on the configured interval and immediately whenever the risk state changes.
    ///
    /// Returns when `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut risk: watch::Receiver<RiskState>, mut shutdown: watch::Receiver<bool>) {
        let mut timer = interval(Duration::from_secs(self.config.tick_interval_secs.max(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut risk_open = true;
        tracing::info!(interval_secs = self.config.tick_interval_secs, "Rotator started");

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                changed = risk.changed(), if risk_open => {
                    if changed.is_err() {
                        risk_open = false;
                        continue;
                    }
                    let state = risk.borrow_and_update().clone();
                    tracing::info!(emergency_stop = state.emergency_stop, cooldown_until = ?state.cooldown_until, "Risk state changed, re-planning now");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "Rotation tick failed");
            }
        }
        tracing::info!("Rotator stopped");
    }
}

/// Polls the store's risk flags and publishes every change on a watch channel.
///
/// The task ends when `shutdown` flips or every receiver is gone.
pub fn watch_risk(
    store: Arc<dyn StrategyStore>,
    poll: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> (watch::Receiver<RiskState>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(RiskState::default());
    let handle = tokio::spawn(async move {
        let mut timer = interval(poll);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = timer.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            match store.risk_state().await {
                Ok(state) => {
                    tx.send_if_modified(|current| {
                        if *current == state {
                            return false;
                        }
                        *current = state;
                        true
                    });
                }
                Err(e) => tracing::warn!(error = %e, "Could not read risk state"),
            }
            if tx.is_closed() {
                break;
            }
        }
    });
    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{
        Comparison, Condition, Direction, FinalMetrics, NewStrategy, Operand, PriceField, StageName,
        StrategyLogic, StrategyStatus, Timeframe, Transition, Value, WorkerId,
    };
    use database::MemoryStore;
    use uuid::Uuid;

    const LEASE: std::time::Duration = std::time::Duration::from_secs(60);

    fn new_strategy() -> NewStrategy {
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

    fn final_metrics(score: f64) -> FinalMetrics {
        FinalMetrics {
            weighted_sharpe: score,
            weighted_expectancy: 0.003,
            weighted_win_rate: 0.5,
            weighted_max_drawdown: 0.2,
            is_score: score,
            oos_score: score,
            adj: 0.0,
            final_score: score,
        }
    }

    /// Walks a fresh strategy through every stage to SCORED.
    async fn scored(store: &MemoryStore, score: f64) -> Uuid {
        let record = store.insert_strategy(new_strategy()).await.unwrap();
        let worker = WorkerId::new(StageName::Scorer);
        let steps = [
            (StrategyStatus::Generated, Transition::advance(StrategyStatus::Validated)),
            (StrategyStatus::Validated, Transition::advance(StrategyStatus::IsBacktested)),
            (StrategyStatus::IsBacktested, Transition::advance(StrategyStatus::OosValidated)),
            (
                StrategyStatus::OosValidated,
                Transition::advance(StrategyStatus::Scored).with_final_metrics(final_metrics(score)),
            ),
        ];
        for (from, transition) in steps {
            let claimed = store.claim_next(from, &worker, LEASE).await.unwrap().unwrap();
            assert_eq!(claimed.id, record.id);
            store.commit_transition(record.id, &worker, &transition).await.unwrap();
        }
        record.id
    }

    fn rotator(store: Arc<MemoryStore>, capacity: usize, max_live_slots: usize) -> Rotator {
        let config = PoolConfig { capacity, max_live_slots, ..PoolConfig::default() };
        Rotator::new(store, config, EventBus::new(16))
    }

    #[tokio::test]
    async fn first_tick_admits_and_promotes_the_best_candidates() {
        let store = Arc::new(MemoryStore::new());
        let best = scored(&store, 2.0).await;
        let second = scored(&store, 1.5).await;
        let third = scored(&store, 1.0).await;
        let worst = scored(&store, 0.5).await;

        let rotator = rotator(Arc::clone(&store), 3, 2);
        rotator.prepare().await.unwrap();
        let mut rx = rotator.events.subscribe();

        let TickOutcome::Applied { plan, .. } = rotator.tick().await.unwrap() else {
            panic!("expected an applied plan");
        };
        assert_eq!(plan.retire.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![worst]);

        assert_eq!(store.get_strategy(best).await.unwrap().status, StrategyStatus::Live);
        assert_eq!(store.get_strategy(second).await.unwrap().status, StrategyStatus::Live);
        assert_eq!(store.get_strategy(third).await.unwrap().status, StrategyStatus::Active);
        assert_eq!(store.get_strategy(worst).await.unwrap().status, StrategyStatus::Retired);

        let stats = store.pool_stats().await.unwrap();
        assert_eq!((stats.size, stats.live), (3, 2));
        assert!(matches!(
            events::next_event(&mut rx).await,
            Some(Ok(envelope)) if envelope.event.kind() == "rotation_applied"
        ));

        // A second pass over an unchanged pool commits nothing.
        assert_eq!(rotator.tick().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn emergency_stop_admits_but_never_promotes() {
        let store = Arc::new(MemoryStore::new());
        let id = scored(&store, 1.0).await;
        store
            .set_risk_state(&RiskState { emergency_stop: true, reason: Some("drawdown".into()), ..RiskState::default() })
            .await
            .unwrap();

        let rotator = rotator(Arc::clone(&store), 10, 2);
        rotator.prepare().await.unwrap();
        rotator.tick().await.unwrap();
        assert_eq!(store.get_strategy(id).await.unwrap().status, StrategyStatus::Active);

        store.set_risk_state(&RiskState::default()).await.unwrap();
        rotator.tick().await.unwrap();
        assert_eq!(store.get_strategy(id).await.unwrap().status, StrategyStatus::Live);
    }

    #[tokio::test]
    async fn reported_rolling_score_demotes_a_fading_live_strategy() {
        let store = Arc::new(MemoryStore::new());
        let leader = scored(&store, 2.0).await;
        let runner_up = scored(&store, 1.0).await;

        let rotator = rotator(Arc::clone(&store), 10, 1);
        rotator.prepare().await.unwrap();
        rotator.tick().await.unwrap();
        assert_eq!(store.get_strategy(leader).await.unwrap().status, StrategyStatus::Live);

        store.record_rolling_score(leader, 0.1).await.unwrap();
        let TickOutcome::Applied { plan, .. } = rotator.tick().await.unwrap() else {
            panic!("expected an applied plan");
        };
        assert_eq!(plan.demote, vec![leader]);
        assert_eq!(plan.promote, vec![(runner_up, 0)]);
        assert_eq!(store.get_strategy(leader).await.unwrap().status, StrategyStatus::Active);
        assert_eq!(store.get_strategy(runner_up).await.unwrap().status, StrategyStatus::Live);

        let slots = store.pool_snapshot().await.unwrap().slots;
        assert_eq!(slots[0].strategy_id, Some(runner_up));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let rotator = rotator(Arc::clone(&store), 10, 2);
        let (_risk_tx, risk_rx) = watch::channel(RiskState::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(rotator.run(risk_rx, shutdown_rx));
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn risk_watcher_reports_a_stop() {
        let store = Arc::new(MemoryStore::new());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (mut rx, _handle) = watch_risk(store.clone(), Duration::from_millis(10), shutdown_rx);

        store.set_risk_state(&RiskState { emergency_stop: true, ..RiskState::default() }).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx.changed()).await.unwrap().unwrap();
        assert!(rx.borrow().emergency_stop);
    }
}
