use chrono::{DateTime, Utc};
use core_types::{PoolStats, StageName, StatusReason, StrategyStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A timestamped pipeline event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: PipelineEvent,
}

/// The top-level event enum.
///
/// The `#[serde(tag = "type", content = "payload")]` attribute serializes each variant
/// as `{ "type": "Transition", "payload": { ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum PipelineEvent {
    /// A stage advanced a strategy to the next queue.
    Transition {
        strategy_id: Uuid,
        stage: StageName,
        from: StrategyStatus,
        to: StrategyStatus,
    },
    /// A stage moved a strategy into a terminal state.
    Rejected {
        strategy_id: Uuid,
        status: StrategyStatus,
        reason: StatusReason,
    },
    GenerationPaused { generated_depth: u64 },
    GenerationResumed { generated_depth: u64 },
    /// The rotator committed a plan and bumped the pool version.
    RotationApplied {
        version: i64,
        admitted: usize,
        retired: usize,
        promoted: usize,
        demoted: usize,
        stats: PoolStats,
    },
}

impl PipelineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::Transition { .. } => "transition",
            PipelineEvent::Rejected { .. } => "rejected",
            PipelineEvent::GenerationPaused { .. } => "generation_paused",
            PipelineEvent::GenerationResumed { .. } => "generation_resumed",
            PipelineEvent::RotationApplied { .. } => "rotation_applied",
        }
    }
}
