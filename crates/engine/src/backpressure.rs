use crate::error::EngineError;
use configuration::BackpressureConfig;
use core_types::StrategyStatus;
use database::StrategyStore;
use events::{EventBus, PipelineEvent};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Hysteresis on the GENERATED queue. `Some(flag)` when the pause flag must flip.
pub fn next_pause_state(paused: bool, generated: u64, config: &BackpressureConfig) -> Option<bool> {
    if !paused && generated > config.high_watermark {
        Some(true)
    } else if paused && generated < config.low_watermark {
        Some(false)
    } else {
        None
    }
}

/// Keeps the persisted generation-pause flag in line with the GENERATED depth.
///
/// Level-triggered: every evaluation recomputes from the current depth, so a
/// missed evaluation is corrected by the next one.
pub struct Backpressure {
    store: Arc<dyn StrategyStore>,
    events: EventBus,
    config: BackpressureConfig,
    // Serializes evaluations within this process so one flip is announced once.
    guard: Mutex<()>,
}

impl Backpressure {
    pub fn new(store: Arc<dyn StrategyStore>, events: EventBus, config: BackpressureConfig) -> Self {
        Self { store, events, config, guard: Mutex::new(()) }
    }

    /// Re-evaluates the flag. Returns whether generation is paused afterwards.
    pub async fn evaluate(&self) -> Result<bool, EngineError> {
        let _guard = self.guard.lock().await;
        let paused = self.store.generation_paused().await?;
        let depths = self.store.queue_depths().await?;
        let generated_depth = depths.get(&StrategyStatus::Generated).copied().unwrap_or(0);

        let Some(next) = next_pause_state(paused, generated_depth, &self.config) else {
            return Ok(paused);
        };
        self.store.set_generation_paused(next).await?;
        self.events.publish(if next {
            PipelineEvent::GenerationPaused { generated_depth }
        } else {
            PipelineEvent::GenerationResumed { generated_depth }
        });
        Ok(next)
    }
}
