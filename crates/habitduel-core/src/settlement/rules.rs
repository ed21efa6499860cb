//! Settlement decisions.
//!
//! Pure functions over per-member standings, so the rules can be checked
//! without storage.
//!
//! VS ranking, in order:
//! 1. more SUCCESS weeks
//! 2. more total elapsed seconds
//! 3. the HOST (default on a full tie, pending product confirmation)
//! 4. lower user id (only reachable without a host among the tied)

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::challenge::{
    ChallengeMember, MemberResult, MemberRole, UserId, WeeklyProgress, WeeklyStatus,
};

/// One member's totals across the whole challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing {
    pub user_id: UserId,
    pub role: MemberRole,
    pub success_weeks: u32,
    pub total_elapsed_secs: u64,
}

impl Standing {
    pub fn from_progress(member: &ChallengeMember, weeks: &[WeeklyProgress]) -> Self {
        let success_weeks = weeks
            .iter()
            .filter(|w| w.weekly_status == WeeklyStatus::Success)
            .count();
        Self {
            user_id: member.user_id,
            role: member.role,
            success_weeks: u32::try_from(success_weeks).unwrap_or(u32::MAX),
            total_elapsed_secs: weeks
                .iter()
                .map(|w| w.elapsed_time_seconds)
                .fold(0u64, u64::saturating_add),
        }
    }
}

/// Which rule separated the VS winner from the runner-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    SuccessWeeks,
    TotalElapsed,
    HostDefault,
    UserId,
}

/// SOLO rule: `success_weeks / duration_weeks >= threshold`.
pub fn decide_solo(standing: &Standing, duration_weeks: u32, threshold: f64) -> MemberResult {
    if duration_weeks == 0 {
        return MemberResult::Fail;
    }
    let ratio = f64::from(standing.success_weeks) / f64::from(duration_weeks);
    if ratio >= threshold {
        MemberResult::Success
    } else {
        MemberResult::Fail
    }
}

/// Total order used to rank VS members; `Less` sorts first (wins).
fn rank(a: &Standing, b: &Standing) -> Ordering {
    b.success_weeks
        .cmp(&a.success_weeks)
        .then_with(|| b.total_elapsed_secs.cmp(&a.total_elapsed_secs))
        .then_with(|| host_first(a.role).cmp(&host_first(b.role)))
        .then_with(|| a.user_id.cmp(&b.user_id))
}

fn host_first(role: MemberRole) -> u8 {
    match role {
        MemberRole::Host => 0,
        MemberRole::Member => 1,
    }
}

fn deciding_rule(winner: &Standing, runner_up: &Standing) -> TieBreak {
    if winner.success_weeks != runner_up.success_weeks {
        TieBreak::SuccessWeeks
    } else if winner.total_elapsed_secs != runner_up.total_elapsed_secs {
        TieBreak::TotalElapsed
    } else if winner.role != runner_up.role {
        TieBreak::HostDefault
    } else {
        TieBreak::UserId
    }
}

/// VS rule: the top-ranked member succeeds, everyone else fails.
///
/// Returns the results in rank order plus the rule that decided the top
/// spot, or `None` with fewer than two standings.
pub fn decide_vs(standings: &[Standing]) -> Option<(Vec<(UserId, MemberResult)>, TieBreak)> {
    if standings.len() < 2 {
        return None;
    }
    let mut ranked: Vec<&Standing> = standings.iter().collect();
    ranked.sort_by(|a, b| rank(a, b));

    let decided_by = deciding_rule(ranked[0], ranked[1]);
    let results = ranked
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let result = if i == 0 {
                MemberResult::Success
            } else {
                MemberResult::Fail
            };
            (s.user_id, result)
        })
        .collect();
    Some((results, decided_by))
}
