use std::collections::HashMap;

use serenity::model::prelude::UserId;

use super::{condition::RoleCondition, platform::MemberSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Grant,
    Revoke,
    NoOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MemberDecision {
    pub(crate) member: UserId,
    pub(crate) count: u64,
    pub(crate) decision: Decision,
}

/// Members holding the qualifying role and none of the excluded ones. Bots never are.
pub(crate) fn is_tracked(member: &MemberSnapshot, condition: &RoleCondition) -> bool {
    !member.bot
        && member.has_role(condition.qualifying_role)
        && !condition.excluded_roles.iter().any(|r| member.has_role(*r))
}

pub(crate) fn decide(count: u64, min_messages: u64, has_reward: bool) -> Decision {
    match (count >= min_messages, has_reward) {
        (true, false) => Decision::Grant,
        (false, true) => Decision::Revoke,
        _ => Decision::NoOp,
    }
}

/// One decision per tracked member, in the order of `members`.
pub(crate) fn evaluate(
    condition: &RoleCondition,
    members: &[MemberSnapshot],
    counts: &HashMap<UserId, u64>,
) -> Vec<MemberDecision> {
    members
        .iter()
        .filter(|m| is_tracked(m, condition))
        .map(|m| {
            let count = counts.get(&m.user).copied().unwrap_or_default();
            MemberDecision {
                member: m.user,
                count,
                decision: decide(
                    count,
                    condition.min_messages,
                    m.has_role(condition.reward_role),
                ),
            }
        })
        .collect()
}
