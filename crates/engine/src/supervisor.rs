use crate::backpressure::Backpressure;
use crate::error::EngineError;
use crate::market_data::MarketData;
use crate::simulation::SimulationPool;
use crate::stages::{InSampleStage, OutOfSampleStage, ScorerStage, Stage, ValidatorStage};
use crate::worker::StageWorker;
use configuration::Config;
use core_types::StageName;
use database::{KlineStore, StrategyStore};
use events::EventBus;
use optimizer::Optimizer;
use rotator::{watch_risk, Rotator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use wfo::WfoEngine;

/// What a process runs: any subset of the stages, optionally the rotator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub stages: Vec<StageName>,
    pub rotator: bool,
}

impl RunPlan {
    /// Every stage plus the rotator, in one process.
    pub fn all() -> Self {
        Self {
            stages: vec![StageName::Validator, StageName::InSample, StageName::OutOfSample, StageName::Scorer],
            rotator: true,
        }
    }

    pub fn stage(stage: StageName) -> Self {
        Self { stages: vec![stage], rotator: false }
    }

    pub fn rotator_only() -> Self {
        Self { stages: Vec::new(), rotator: true }
    }
}

/// Builds the workers of a [`RunPlan`] and drives them until shutdown.
pub struct Supervisor {
    config: Config,
    store: Arc<dyn StrategyStore>,
    klines: Arc<dyn KlineStore>,
    events: EventBus,
}

impl Supervisor {
    pub fn new(config: Config, store: Arc<dyn StrategyStore>, klines: Arc<dyn KlineStore>, events: EventBus) -> Self {
        Self { config, store, klines, events }
    }

    fn build_stage(
        &self,
        name: StageName,
        data: &Arc<MarketData>,
        pool: &SimulationPool,
    ) -> Result<Arc<dyn Stage>, EngineError> {
        let stage: Arc<dyn Stage> = match name {
            StageName::Validator => Arc::new(ValidatorStage::new(self.config.validator.clone())),
            StageName::InSample => Arc::new(InSampleStage::new(
                Optimizer::new(&self.config),
                Arc::clone(data),
                pool.clone(),
                self.config.data.clone(),
            )),
            StageName::OutOfSample => Arc::new(OutOfSampleStage::new(
                WfoEngine::new(&self.config),
                Arc::clone(data),
                pool.clone(),
                self.config.data.clone(),
            )),
            StageName::Scorer => Arc::new(ScorerStage),
            StageName::Rotator => {
                return Err(EngineError::Configuration("the rotator is not a claim-based stage".into()));
            }
        };
        Ok(stage)
    }

    /// Runs `plan` until `shutdown` flips. Worker failures are logged; the others
    /// keep running.
    pub async fn run(&self, plan: &RunPlan, shutdown: watch::Receiver<bool>) -> Result<(), EngineError> {
        let mut tasks: JoinSet<Result<(), EngineError>> = JoinSet::new();

        if !plan.stages.is_empty() {
            let pool = SimulationPool::new(self.config.workers.simulation_threads)?;
            let data = Arc::new(MarketData::new(Arc::clone(&self.klines), &self.config.data));
            let backpressure = Arc::new(Backpressure::new(
                Arc::clone(&self.store),
                self.events.clone(),
                self.config.backpressure.clone(),
            ));
            // Pick up whatever depth the queue had while nothing was running.
            backpressure.evaluate().await?;

            for name in &plan.stages {
                let stage = self.build_stage(*name, &data, &pool)?;
                let worker = StageWorker::new(
                    stage,
                    Arc::clone(&self.store),
                    self.events.clone(),
                    Arc::clone(&backpressure),
                    &self.config.workers,
                );
                tasks.spawn(worker.run(shutdown.clone()));
            }
        }

        if plan.rotator {
            let rotator = Rotator::new(Arc::clone(&self.store), self.config.pool.clone(), self.events.clone());
            rotator.prepare().await?;
            let poll = Duration::from_millis(self.config.workers.poll_interval_ms.max(1));
            let (risk_rx, _watcher) = watch_risk(Arc::clone(&self.store), poll, shutdown.clone());
            let rotator_shutdown = shutdown.clone();
            tasks.spawn(async move {
                rotator.run(risk_rx, rotator_shutdown).await;
                Ok(())
            });
        }

        tracing::info!(stages = ?plan.stages, rotator = plan.rotator, "Supervisor running");
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Worker exited with an error"),
                Err(e) => tracing::error!(error = %e, "Worker task panicked"),
            }
        }
        tracing::info!("Supervisor stopped");
        Ok(())
    }
}
