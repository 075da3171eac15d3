use crate::backpressure::Backpressure;
use crate::error::EngineError;
use crate::stages::Stage;
use configuration::WorkerConfig;
use core_types::{StrategyRecord, Transition, WorkerId};
use database::StrategyStore;
use events::{EventBus, PipelineEvent};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};

/// A continuously polling worker for one stage.
///
/// Claims strategies from the stage's input queue, processes up to `per_stage` of
/// them concurrently, renews each lease while its work is in flight and commits the
/// result. Infrastructure failures release the claim for a later retry.
pub struct StageWorker {
    stage: Arc<dyn Stage>,
    store: Arc<dyn StrategyStore>,
    events: EventBus,
    backpressure: Arc<Backpressure>,
    worker_id: WorkerId,
    lease: Duration,
    poll_interval: Duration,
    concurrency: usize,
}

impl StageWorker {
    pub fn new(
        stage: Arc<dyn Stage>,
        store: Arc<dyn StrategyStore>,
        events: EventBus,
        backpressure: Arc<Backpressure>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            worker_id: WorkerId::new(stage.name()),
            stage,
            store,
            events,
            backpressure,
            lease: Duration::from_secs(config.lease_secs.max(1)),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            concurrency: config.per_stage.max(1),
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Polls until `shutdown` flips, then waits for in-flight strategies to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), EngineError> {
        let worker = Arc::new(self);
        let permits = Arc::new(Semaphore::new(worker.concurrency));
        let input = worker.stage.name().input_status();
        tracing::info!(
            stage = %worker.stage.name(),
            worker = worker.worker_id.as_str(),
            concurrency = worker.concurrency,
            "Stage worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            let permit = tokio::select! {
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            match worker.store.claim_next(input, &worker.worker_id, worker.lease).await {
                Ok(Some(record)) => {
                    let worker = Arc::clone(&worker);
                    tokio::spawn(async move {
                        worker.handle(record).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    if wait_or_shutdown(worker.poll_interval, &mut shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(stage = %worker.stage.name(), error = %e, "Claim failed");
                    if wait_or_shutdown(worker.poll_interval, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        // Every permit back means every spawned strategy has finished.
        let total = u32::try_from(worker.concurrency).unwrap_or(u32::MAX);
        let _drained = permits.acquire_many(total).await;
        tracing::info!(stage = %worker.stage.name(), worker = worker.worker_id.as_str(), "Stage worker stopped");
        Ok(())
    }

    /// Processes one claimed strategy to a commit or a release.
    pub async fn handle(&self, record: StrategyRecord) {
        let id = record.id;
        let stage = self.stage.name();

        let work = self.stage.process(&record);
        tokio::pin!(work);
        let mut renew = interval(self.lease / 3);
        renew.set_missed_tick_behavior(MissedTickBehavior::Delay);
        renew.tick().await;

        let result = loop {
            tokio::select! {
                result = &mut work => break result,
                _ = renew.tick() => {
                    if let Err(e) = self.store.renew_lease(id, &self.worker_id, self.lease).await {
                        if e.is_conflict() {
                            tracing::warn!(strategy_id = %id, %stage, "Lease lost mid-computation, abandoning");
                            return;
                        }
                        tracing::warn!(strategy_id = %id, %stage, error = %e, "Lease renewal failed");
                    }
                }
            }
        };

        match result {
            Ok(transition) => self.commit(&record, transition).await,
            Err(e) => {
                tracing::warn!(strategy_id = %id, %stage, error = %e, "Infrastructure failure, releasing claim");
                self.release(id).await;
            }
        }
    }

    async fn commit(&self, record: &StrategyRecord, transition: Transition) {
        let id = record.id;
        let stage = self.stage.name();
        match self.store.commit_transition(id, &self.worker_id, &transition).await {
            Ok(committed) => {
                let event = match transition.reason {
                    Some(reason) if committed.status.is_terminal() => {
                        PipelineEvent::Rejected { strategy_id: id, status: committed.status, reason }
                    }
                    _ => PipelineEvent::Transition { strategy_id: id, stage, from: record.status, to: committed.status },
                };
                self.events.publish(event);
                if let Err(e) = self.backpressure.evaluate().await {
                    tracing::warn!(error = %e, "Backpressure evaluation failed");
                }
            }
            Err(e) if e.is_conflict() => {
                tracing::warn!(strategy_id = %id, %stage, error = %e, "Claim expired before commit, result discarded");
            }
            Err(e) => {
                tracing::error!(strategy_id = %id, %stage, error = %e, "Commit failed, releasing claim");
                self.release(id).await;
            }
        }
    }

    async fn release(&self, id: uuid::Uuid) {
        if let Err(e) = self.store.release_claim(id, &self.worker_id).await {
            tracing::warn!(strategy_id = %id, error = %e, "Could not release claim, it will expire");
        }
    }
}

/// Sleeps for `period`. Returns `true` if shutdown was requested meanwhile.
async fn wait_or_shutdown(period: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = sleep(period) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::ValidatorStage;
    use crate::test_support::new_strategy;
    use async_trait::async_trait;
    use configuration::{BackpressureConfig, ValidatorConfig};
    use core_types::{StageName, StrategyStatus};
    use database::MemoryStore;

    struct Flaky;

    #[async_trait]
    impl Stage for Flaky {
        fn name(&self) -> StageName {
            StageName::Validator
        }

        async fn process(&self, _strategy: &StrategyRecord) -> Result<Transition, EngineError> {
            Err(EngineError::SimulationPool("pool unavailable".into()))
        }
    }

    fn worker(store: Arc<MemoryStore>, stage: Arc<dyn Stage>, events: EventBus) -> StageWorker {
        let backpressure = Arc::new(Backpressure::new(store.clone(), events.clone(), BackpressureConfig::default()));
        let config = WorkerConfig { poll_interval_ms: 10, lease_secs: 30, per_stage: 3, simulation_threads: 1 };
        StageWorker::new(stage, store, events, backpressure, &config)
    }

    #[tokio::test]
    async fn infrastructure_failure_releases_the_claim_untouched() {
        let store = Arc::new(MemoryStore::new());
        let inserted = store.insert_strategy(new_strategy()).await.unwrap();
        let worker = worker(store.clone(), Arc::new(Flaky), EventBus::new(8));

        let claimed = store
            .claim_next(StrategyStatus::Generated, worker.worker_id(), worker.lease)
            .await
            .unwrap()
            .unwrap();
        worker.handle(claimed).await;

        let after = store.get_strategy(inserted.id).await.unwrap();
        assert_eq!(after.status, StrategyStatus::Generated);
        assert!(after.claimed_by.is_none());
        assert!(store.transitions(inserted.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn worker_drains_its_queue_and_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let mut good = Vec::new();
        for _ in 0..5 {
            good.push(store.insert_strategy(new_strategy()).await.unwrap().id);
        }
        let mut broken = new_strategy();
        broken.logic.entry.clear();
        let bad = store.insert_strategy(broken).await.unwrap().id;

        let events = EventBus::new(64);
        let mut rx = events.subscribe();
        let stage = Arc::new(ValidatorStage::new(ValidatorConfig::default()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker(store.clone(), stage, events).run(shutdown_rx));

        let mut rejected = 0;
        for _ in 0..6 {
            let envelope = tokio::time::timeout(Duration::from_secs(5), events::next_event(&mut rx))
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let PipelineEvent::Rejected { strategy_id, .. } = envelope.event {
                assert_eq!(strategy_id, bad);
                rejected += 1;
            }
        }
        assert_eq!(rejected, 1);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap().unwrap();

        for id in good {
            assert_eq!(store.get_strategy(id).await.unwrap().status, StrategyStatus::Validated);
        }
        assert_eq!(store.get_strategy(bad).await.unwrap().status, StrategyStatus::Rejected);
    }
}
