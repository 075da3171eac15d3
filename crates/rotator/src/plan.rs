use chrono::{DateTime, Utc};
use configuration::PoolConfig;
use core_types::{
    PoolMember, PoolSnapshot, PoolStats, PromotionTieBreak, RiskState, RotationPlan, StageName, StatusReason,
    StrategyStatus,
};
use std::cmp::Ordering;
use std::collections::HashSet;
use uuid::Uuid;

/// NaN ranks below every real score.
fn rank_score(member: &PoolMember) -> f64 {
    let score = member.score();
    if score.is_nan() { f64::NEG_INFINITY } else { score }
}

/// Pool order: score descending, then earliest creation, then id.
fn pool_order(a: &PoolMember, b: &PoolMember) -> Ordering {
    rank_score(b)
        .total_cmp(&rank_score(a))
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

fn promotion_order(tie_break: PromotionTieBreak, now: DateTime<Utc>) -> impl Fn(&&PoolMember, &&PoolMember) -> Ordering {
    move |a, b| {
        let by_score = rank_score(b).total_cmp(&rank_score(a));
        let by_streak = || match tie_break {
            PromotionTieBreak::LiveStreak => b.live_streak_secs(now).cmp(&a.live_streak_secs(now)),
            PromotionTieBreak::CreatedAt => Ordering::Equal,
        };
        by_score
            .then_with(by_streak)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Computes one rotator tick from a consistent snapshot.
///
/// Pure: the same snapshot, config, risk state and clock always give the same plan.
/// After the plan is applied the pool holds at most `capacity` members and at most
/// `max_live_slots` of them are LIVE. While promotions are suppressed, capacity
/// retirements still happen but LIVE members keep their slots and nothing new goes
/// live.
pub fn plan_rotation(
    snapshot: &PoolSnapshot,
    config: &PoolConfig,
    risk: &RiskState,
    now: DateTime<Utc>,
) -> RotationPlan {
    let mut plan = RotationPlan::default();

    // --- 1. RANK members and waiting candidates together ---
    let mut ranked: Vec<&PoolMember> = snapshot.members.iter().chain(&snapshot.candidates).collect();
    ranked.sort_by(|a, b| pool_order(a, b));

    // --- 2. ENFORCE capacity ---
    let total = ranked.len();
    let kept: Vec<&PoolMember> = ranked.iter().take(config.capacity).copied().collect();
    for (rank, member) in ranked.iter().enumerate().skip(config.capacity) {
        let reason = StatusReason::new(
            StageName::Rotator,
            "capacity",
            format!("ranked {} of {} with score {:.4}, capacity {}", rank + 1, total, member.score(), config.capacity),
        );
        plan.retire.push((member.id, reason));
    }
    plan.admit = kept.iter().filter(|m| m.status == StrategyStatus::Scored).map(|m| m.id).collect();

    // --- 3. CHOOSE the live set ---
    // Suppressed promotions freeze the LIVE set apart from capacity retirement.
    let suppressed = risk.promotions_suppressed(now);
    let mut by_promotion = kept.clone();
    by_promotion.sort_by(promotion_order(config.tie_break, now));
    let desired: HashSet<Uuid> = if suppressed {
        kept.iter().filter(|m| m.status == StrategyStatus::Live).map(|m| m.id).collect()
    } else {
        by_promotion.iter().take(config.max_live_slots).map(|m| m.id).collect()
    };

    let retired: HashSet<Uuid> = plan.retire.iter().map(|(id, _)| *id).collect();
    plan.demote = kept
        .iter()
        .filter(|m| m.status == StrategyStatus::Live && !desired.contains(&m.id))
        .map(|m| m.id)
        .collect();

    // --- 4. FILL free slots, lowest slot id first ---
    let mut live_after = kept.iter().filter(|m| m.status == StrategyStatus::Live).count() - plan.demote.len();
    if !suppressed {
        let vacating: HashSet<Uuid> = plan.demote.iter().chain(retired.iter()).copied().collect();
        let mut free_slots: Vec<i32> = snapshot
            .slots
            .iter()
            .filter(|s| usize::try_from(s.slot_id).is_ok_and(|id| id < config.max_live_slots))
            .filter(|s| s.strategy_id.is_none_or(|holder| vacating.contains(&holder)))
            .map(|s| s.slot_id)
            .collect();
        free_slots.sort_unstable();
        let mut free_slots = free_slots.into_iter();

        for member in by_promotion.iter().filter(|m| desired.contains(&m.id) && m.status != StrategyStatus::Live) {
            if live_after >= config.max_live_slots {
                break;
            }
            let Some(slot_id) = free_slots.next() else { break };
            plan.promote.push((member.id, slot_id));
            live_after += 1;
        }
    }

    // --- 5. STATS after the plan ---
    let average_score = if kept.is_empty() {
        0.0
    } else {
        kept.iter().map(|m| m.score()).sum::<f64>() / kept.len() as f64
    };
    plan.stats = PoolStats { size: kept.len() as u32, live: live_after as u32, average_score };
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use core_types::LiveSlot;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap()
    }

    fn member(n: u128, status: StrategyStatus, score: f64) -> PoolMember {
        PoolMember {
            id: Uuid::from_u128(n),
            status,
            final_score: score,
            rolling_score: None,
            created_at: t0() + Duration::minutes(n as i64),
            live_since: (status == StrategyStatus::Live).then(|| t0() + Duration::hours(1)),
        }
    }

    fn slots(count: i32, holders: &[(i32, u128)]) -> Vec<LiveSlot> {
        (0..count)
            .map(|slot_id| LiveSlot {
                slot_id,
                account: format!("slot-{slot_id}"),
                strategy_id: holders.iter().find(|(s, _)| *s == slot_id).map(|(_, id)| Uuid::from_u128(*id)),
                assigned_at: None,
            })
            .collect()
    }

    fn config(capacity: usize, max_live_slots: usize) -> PoolConfig {
        PoolConfig { capacity, max_live_slots, ..PoolConfig::default() }
    }

    #[test]
    fn overflow_retires_the_lowest_scorers_and_admits_the_rest() {
        let snapshot = PoolSnapshot {
            version: 3,
            members: vec![member(1, StrategyStatus::Active, 0.9), member(2, StrategyStatus::Active, 0.2)],
            candidates: vec![member(3, StrategyStatus::Scored, 0.5), member(4, StrategyStatus::Scored, 0.1)],
            slots: slots(1, &[]),
        };
        let plan = plan_rotation(&snapshot, &config(2, 1), &RiskState::default(), t0());

        let retired: Vec<Uuid> = plan.retire.iter().map(|(id, _)| *id).collect();
        assert_eq!(retired, vec![Uuid::from_u128(2), Uuid::from_u128(4)]);
        assert_eq!(plan.retire[0].1.code, "capacity");
        assert_eq!(plan.admit, vec![Uuid::from_u128(3)]);
        assert_eq!(plan.promote, vec![(Uuid::from_u128(1), 0)]);
        assert_eq!(plan.stats.size, 2);
        assert_eq!(plan.stats.live, 1);
        assert!((plan.stats.average_score - 0.7).abs() < 1e-12);
    }

    #[test]
    fn live_member_below_the_promotion_set_is_demoted_and_its_slot_reused() {
        let mut falling = member(1, StrategyStatus::Live, 0.9);
        falling.rolling_score = Some(0.05);
        let snapshot = PoolSnapshot {
            version: 1,
            members: vec![falling, member(2, StrategyStatus::Active, 0.6)],
            candidates: vec![],
            slots: slots(1, &[(0, 1)]),
        };
        let plan = plan_rotation(&snapshot, &config(10, 1), &RiskState::default(), t0());
        assert_eq!(plan.demote, vec![Uuid::from_u128(1)]);
        assert_eq!(plan.promote, vec![(Uuid::from_u128(2), 0)]);
        assert_eq!(plan.stats.live, 1);
    }

    #[test]
    fn emergency_stop_blocks_promotion_but_not_capacity() {
        let snapshot = PoolSnapshot {
            version: 1,
            members: vec![member(1, StrategyStatus::Active, 0.9)],
            candidates: vec![member(2, StrategyStatus::Scored, 0.1)],
            slots: slots(2, &[]),
        };
        let risk = RiskState { emergency_stop: true, ..RiskState::default() };
        let plan = plan_rotation(&snapshot, &config(1, 1), &risk, t0());
        assert!(plan.promote.is_empty());
        assert_eq!(plan.retire.len(), 1);

        let cooling = RiskState { cooldown_until: Some(t0() + Duration::minutes(5)), ..RiskState::default() };
        assert!(plan_rotation(&snapshot, &config(1, 1), &cooling, t0()).promote.is_empty());
        let elapsed = plan_rotation(&snapshot, &config(1, 1), &cooling, t0() + Duration::minutes(5));
        assert_eq!(elapsed.promote, vec![(Uuid::from_u128(1), 0)]);
    }

    #[test]
    fn emergency_stop_keeps_an_outranked_live_member_in_its_slot() {
        let snapshot = PoolSnapshot {
            version: 1,
            members: vec![member(1, StrategyStatus::Live, 0.5)],
            candidates: vec![member(2, StrategyStatus::Scored, 0.9)],
            slots: slots(1, &[(0, 1)]),
        };
        let risk = RiskState { emergency_stop: true, ..RiskState::default() };
        let plan = plan_rotation(&snapshot, &config(10, 1), &risk, t0());

        assert!(plan.demote.is_empty());
        assert!(plan.promote.is_empty());
        assert_eq!(plan.admit, vec![Uuid::from_u128(2)]);
        assert_eq!(plan.stats.live, 1);

        // Once the stop clears the candidate takes over the slot.
        let plan = plan_rotation(&snapshot, &config(10, 1), &RiskState::default(), t0());
        assert_eq!(plan.demote, vec![Uuid::from_u128(1)]);
        assert_eq!(plan.promote, vec![(Uuid::from_u128(2), 0)]);
    }

    #[test]
    fn promotion_ties_follow_the_configured_policy() {
        let incumbent = member(9, StrategyStatus::Live, 0.5);
        let older = member(1, StrategyStatus::Active, 0.5);
        let snapshot = PoolSnapshot {
            version: 1,
            members: vec![incumbent, older],
            candidates: vec![],
            slots: slots(1, &[(0, 9)]),
        };
        let now = t0() + Duration::days(1);

        let streak = plan_rotation(&snapshot, &config(10, 1), &RiskState::default(), now);
        assert!(streak.is_noop());

        let created = PoolConfig { tie_break: PromotionTieBreak::CreatedAt, ..config(10, 1) };
        let plan = plan_rotation(&snapshot, &created, &RiskState::default(), now);
        assert_eq!(plan.demote, vec![Uuid::from_u128(9)]);
        assert_eq!(plan.promote, vec![(Uuid::from_u128(1), 0)]);
    }

    #[test]
    fn stable_pool_produces_a_noop_plan() {
        let snapshot = PoolSnapshot {
            version: 7,
            members: vec![member(1, StrategyStatus::Live, 0.9), member(2, StrategyStatus::Active, 0.4)],
            candidates: vec![],
            slots: slots(1, &[(0, 1)]),
        };
        let plan = plan_rotation(&snapshot, &config(5, 1), &RiskState::default(), t0());
        assert!(plan.is_noop());
        assert_eq!(plan.stats.live, 1);
    }

    fn arb_snapshot() -> impl Strategy<Value = (PoolSnapshot, usize, usize, bool)> {
        (
            prop::collection::vec((0u8..3, -1.0f64..2.0), 0..40),
            1usize..12,
            1usize..6,
            any::<bool>(),
        )
            .prop_map(|(raw, capacity, slot_count, stopped)| {
                let max_live = slot_count.min(capacity);
                let mut members = Vec::new();
                let mut candidates = Vec::new();
                let mut holders = Vec::new();
                for (i, (kind, score)) in raw.into_iter().enumerate() {
                    let n = i as u128 + 1;
                    match kind {
                        0 => candidates.push(member(n, StrategyStatus::Scored, score)),
                        1 if holders.len() < max_live => {
                            holders.push((holders.len() as i32, n));
                            members.push(member(n, StrategyStatus::Live, score));
                        }
                        _ => members.push(member(n, StrategyStatus::Active, score)),
                    }
                }
                let snapshot = PoolSnapshot { version: 0, members, candidates, slots: slots(max_live as i32, &holders) };
                (snapshot, capacity, max_live, stopped)
            })
    }

    proptest! {
        #[test]
        fn any_tick_respects_capacity_and_slot_limits((snapshot, capacity, max_live, stopped) in arb_snapshot()) {
            let risk = RiskState { emergency_stop: stopped, ..RiskState::default() };
            let plan = plan_rotation(&snapshot, &config(capacity, max_live), &risk, t0());

            prop_assert!(plan.stats.size as usize <= capacity);
            prop_assert!(plan.stats.live as usize <= max_live);

            let total = snapshot.members.len() + snapshot.candidates.len();
            prop_assert_eq!(total - plan.retire.len(), plan.stats.size as usize);

            let promoted: HashSet<Uuid> = plan.promote.iter().map(|(id, _)| *id).collect();
            let slots_used: HashSet<i32> = plan.promote.iter().map(|(_, slot)| *slot).collect();
            prop_assert_eq!(promoted.len(), plan.promote.len());
            prop_assert_eq!(slots_used.len(), plan.promote.len());
            if stopped {
                prop_assert!(plan.promote.is_empty());
                prop_assert!(plan.demote.is_empty());
            }
        }
    }
}
