use serenity::model::prelude::GuildId;
use tracing::{debug, info};

use super::{
    condition::RoleCondition,
    evaluate::{Decision, MemberDecision},
    log::GuildLog,
    platform::{MemberSnapshot, Platform},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReconcileReport {
    pub(crate) granted: usize,
    pub(crate) revoked: usize,
    pub(crate) unchanged: usize,
    pub(crate) failed: usize,
}

impl ReconcileReport {
    pub(crate) fn mutations(&self) -> usize {
        self.granted + self.revoked
    }
}

impl std::ops::AddAssign for ReconcileReport {
    fn add_assign(&mut self, rhs: Self) {
        self.granted += rhs.granted;
        self.revoked += rhs.revoked;
        self.unchanged += rhs.unchanged;
        self.failed += rhs.failed;
    }
}

/// Applies `decisions` one member at a time.
///
/// A failed mutation is reported and skipped. Successful ones are written back to `members`
/// so that conditions evaluated later in the pass see the new roles.
pub(crate) async fn reconcile<P: Platform + ?Sized>(
    platform: &P,
    guild: GuildId,
    condition: &RoleCondition,
    decisions: &[MemberDecision],
    members: &mut [MemberSnapshot],
    log: &GuildLog<'_, P>,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let role = condition.reward_role;

    for d in decisions {
        let res = match d.decision {
            Decision::NoOp => {
                report.unchanged += 1;
                continue;
            }
            Decision::Grant => platform.add_role(guild, d.member, role).await,
            Decision::Revoke => platform.remove_role(guild, d.member, role).await,
        };

        match res {
            Ok(()) => {
                let snapshot = members.iter_mut().find(|m| m.user == d.member);
                if d.decision == Decision::Grant {
                    report.granted += 1;
                    if let Some(m) = snapshot {
                        m.roles.insert(role);
                    }
                    info!(
                        guild = guild.0,
                        member = d.member.0,
                        role = role.0,
                        count = d.count,
                        "Granted reward role"
                    );
                } else {
                    report.revoked += 1;
                    if let Some(m) = snapshot {
                        m.roles.remove(&role);
                    }
                    info!(
                        guild = guild.0,
                        member = d.member.0,
                        role = role.0,
                        count = d.count,
                        "Revoked reward role"
                    );
                }
            }
            Err(e) => {
                report.failed += 1;
                let verb = if d.decision == Decision::Grant { "grant" } else { "revoke" };
                log.problem(format!(
                    "Could not {verb} <@&{}> for <@{}>: {e}",
                    role.0, d.member.0
                ))
                .await;
            }
        }
    }

    debug!(guild = guild.0, role = role.0, ?report, "Reconciled condition");
    report
}
