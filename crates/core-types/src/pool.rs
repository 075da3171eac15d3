use crate::status::StrategyStatus;
use crate::strategy::StatusReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The rotator's view of one ranked strategy (ACTIVE, LIVE, or SCORED awaiting admission).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMember {
    pub id: Uuid,
    pub status: StrategyStatus,
    pub final_score: f64,
    pub rolling_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub live_since: Option<DateTime<Utc>>,
}

impl PoolMember {
    pub fn score(&self) -> f64 {
        self.rolling_score.unwrap_or(self.final_score)
    }

    /// Length of the current unbroken LIVE streak, zero when not live.
    pub fn live_streak_secs(&self, now: DateTime<Utc>) -> i64 {
        match (self.status, self.live_since) {
            (StrategyStatus::Live, Some(since)) => (now - since).num_seconds().max(0),
            _ => 0,
        }
    }
}

/// A capital-bearing execution account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveSlot {
    pub slot_id: i32,
    pub account: String,
    pub strategy_id: Option<Uuid>,
    pub assigned_at: Option<DateTime<Utc>>,
}

/// Process-wide risk flags written by the execution side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RiskState {
    pub emergency_stop: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RiskState {
    /// Promotions are suppressed during a stop and until the cooldown elapses.
    pub fn promotions_suppressed(&self, now: DateTime<Utc>) -> bool {
        self.emergency_stop || self.cooldown_until.is_some_and(|until| now < until)
    }
}

/// A consistent read of the pool aggregate, tagged with the version it was read at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub version: i64,
    /// ACTIVE and LIVE strategies.
    pub members: Vec<PoolMember>,
    /// SCORED strategies waiting to be admitted.
    pub candidates: Vec<PoolMember>,
    pub slots: Vec<LiveSlot>,
}

/// The decisions of one rotator tick, applied atomically against `PoolSnapshot::version`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RotationPlan {
    /// SCORED -> ACTIVE.
    pub admit: Vec<Uuid>,
    /// ACTIVE/LIVE/SCORED -> RETIRED, freeing any slot held.
    pub retire: Vec<(Uuid, StatusReason)>,
    /// LIVE -> ACTIVE, freeing the slot.
    pub demote: Vec<Uuid>,
    /// ACTIVE -> LIVE into the given slot.
    pub promote: Vec<(Uuid, i32)>,
    /// Pool statistics after the plan is applied.
    pub stats: PoolStats,
}

impl RotationPlan {
    pub fn is_noop(&self) -> bool {
        self.admit.is_empty() && self.retire.is_empty() && self.demote.is_empty() && self.promote.is_empty()
    }
}

/// Observable pool state, recomputed on every membership change.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    pub size: u32,
    pub live: u32,
    pub average_score: f64,
}

/// How promotion ties between equally scored members are broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionTieBreak {
    /// Prefer the member with the longer unbroken LIVE streak, then the older one.
    #[default]
    LiveStreak,
    /// Prefer the older member only.
    CreatedAt,
}
