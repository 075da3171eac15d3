use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a strategy. The status column doubles as the ownership token:
/// the stage whose input status matches is the only one allowed to advance it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyStatus {
    Generated,
    Validated,
    IsBacktested,
    OosValidated,
    Scored,
    Active,
    Live,
    Rejected,
    Deleted,
    Retired,
}

impl StrategyStatus {
    pub const ALL: [StrategyStatus; 10] = [
        StrategyStatus::Generated,
        StrategyStatus::Validated,
        StrategyStatus::IsBacktested,
        StrategyStatus::OosValidated,
        StrategyStatus::Scored,
        StrategyStatus::Active,
        StrategyStatus::Live,
        StrategyStatus::Rejected,
        StrategyStatus::Deleted,
        StrategyStatus::Retired,
    ];

    /// The statuses that sit between two stages and therefore form a work queue.
    pub const QUEUES: [StrategyStatus; 5] = [
        StrategyStatus::Generated,
        StrategyStatus::Validated,
        StrategyStatus::IsBacktested,
        StrategyStatus::OosValidated,
        StrategyStatus::Scored,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyStatus::Generated => "GENERATED",
            StrategyStatus::Validated => "VALIDATED",
            StrategyStatus::IsBacktested => "IS_BACKTESTED",
            StrategyStatus::OosValidated => "OOS_VALIDATED",
            StrategyStatus::Scored => "SCORED",
            StrategyStatus::Active => "ACTIVE",
            StrategyStatus::Live => "LIVE",
            StrategyStatus::Rejected => "REJECTED",
            StrategyStatus::Deleted => "DELETED",
            StrategyStatus::Retired => "RETIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StrategyStatus::Rejected | StrategyStatus::Deleted | StrategyStatus::Retired
        )
    }

    /// Pool members are the strategies the rotator ranks.
    pub fn is_pool_member(&self) -> bool {
        matches!(self, StrategyStatus::Active | StrategyStatus::Live)
    }

    /// The single table of legal transitions. Stage statuses only move one step
    /// forward or into a terminal state; only the pool statuses cycle.
    pub fn can_transition_to(&self, next: StrategyStatus) -> bool {
        use StrategyStatus::*;
        matches!(
            (self, next),
            (Generated, Validated)
                | (Generated, Rejected)
                | (Validated, IsBacktested)
                | (Validated, Deleted)
                | (IsBacktested, OosValidated)
                | (IsBacktested, Deleted)
                | (OosValidated, Scored)
                | (OosValidated, Deleted)
                | (Scored, Active)
                | (Scored, Retired)
                | (Active, Live)
                | (Active, Retired)
                | (Live, Active)
                | (Live, Retired)
        )
    }

    pub fn ensure_transition(&self, next: StrategyStatus) -> Result<(), CoreError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::IllegalTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::UnknownStatus(s.to_string()))
    }
}

/// The processing stages. Used to tag transitions, rejection reasons and worker ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Validator,
    InSample,
    OutOfSample,
    Scorer,
    Rotator,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Validator => "validator",
            StageName::InSample => "in_sample",
            StageName::OutOfSample => "out_of_sample",
            StageName::Scorer => "scorer",
            StageName::Rotator => "rotator",
        }
    }

    /// The queue a stage consumes from. The rotator consumes SCORED strategies.
    pub fn input_status(&self) -> StrategyStatus {
        match self {
            StageName::Validator => StrategyStatus::Generated,
            StageName::InSample => StrategyStatus::Validated,
            StageName::OutOfSample => StrategyStatus::IsBacktested,
            StageName::Scorer => StrategyStatus::OosValidated,
            StageName::Rotator => StrategyStatus::Scored,
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_column_text() {
        for status in StrategyStatus::ALL {
            assert_eq!(status.as_str().parse::<StrategyStatus>().unwrap(), status);
        }
        assert!("FAILED".parse::<StrategyStatus>().is_err());
    }

    #[test]
    fn stage_statuses_never_skip_or_move_backwards() {
        use StrategyStatus::*;
        assert!(Generated.can_transition_to(Validated));
        assert!(!Generated.can_transition_to(IsBacktested));
        assert!(!IsBacktested.can_transition_to(Validated));
        assert!(!Scored.can_transition_to(Live));
        assert!(!OosValidated.can_transition_to(Rejected));
    }

    #[test]
    fn only_pool_statuses_cycle() {
        use StrategyStatus::*;
        assert!(Active.can_transition_to(Live));
        assert!(Live.can_transition_to(Active));
        assert!(Live.can_transition_to(Retired));
        for terminal in [Rejected, Deleted, Retired] {
            for next in StrategyStatus::ALL {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }
}
