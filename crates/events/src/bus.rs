use crate::error::EventsError;
use crate::messages::{EventEnvelope, PipelineEvent};
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// A cloneable handle onto the process-wide event channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Stamps and broadcasts `event`. Having no listener is not an error.
    pub fn publish(&self, event: PipelineEvent) {
        let envelope = EventEnvelope { timestamp: Utc::now(), event };
        let _ = self.tx.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Receives the next envelope, reporting lag instead of silently skipping.
/// `None` once every sender is gone.
pub async fn next_event(
    rx: &mut broadcast::Receiver<EventEnvelope>,
) -> Option<Result<EventEnvelope, EventsError>> {
    match rx.recv().await {
        Ok(envelope) => Some(Ok(envelope)),
        Err(broadcast::error::RecvError::Lagged(n)) => Some(Err(EventsError::Lagged(n))),
        Err(broadcast::error::RecvError::Closed) => None,
    }
}

/// Spawns a task that writes every event to the `tracing` log.
pub fn spawn_logger(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        while let Some(next) = next_event(&mut rx).await {
            match next {
                Ok(envelope) => log_event(&envelope.event),
                Err(e) => tracing::warn!(error = %e, "Event logger lagged"),
            }
        }
        tracing::debug!("Event bus closed, logger exiting");
    })
}

fn log_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::Transition { strategy_id, stage, from, to } => {
            tracing::info!(%strategy_id, %stage, %from, %to, "Strategy advanced");
        }
        PipelineEvent::Rejected { strategy_id, status, reason } => {
            tracing::info!(%strategy_id, %status, stage = %reason.stage, code = %reason.code, detail = %reason.detail, "Strategy dropped");
        }
        PipelineEvent::GenerationPaused { generated_depth } => {
            tracing::warn!(generated_depth, "Backpressure: generation paused");
        }
        PipelineEvent::GenerationResumed { generated_depth } => {
            tracing::info!(generated_depth, "Backpressure released: generation resumed");
        }
        PipelineEvent::RotationApplied { version, admitted, retired, promoted, demoted, stats } => {
            tracing::info!(
                version,
                admitted,
                retired,
                promoted,
                demoted,
                pool_size = stats.size,
                live = stats.live,
                average_score = stats.average_score,
                "Rotation applied"
            );
        }
    }
}
