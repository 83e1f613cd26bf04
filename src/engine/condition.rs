use std::{collections::BTreeSet, time::Duration};

use itertools::Itertools;
use serenity::model::prelude::{ChannelId, RoleId};

use super::time::UnixTime;

/// An admin-configured rule: members holding `qualifying_role` earn `reward_role`
/// while they posted at least `min_messages` times during the trailing `timeframe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RoleCondition {
    pub(crate) qualifying_role: RoleId,
    pub(crate) min_messages: u64,
    pub(crate) timeframe: Duration,
    pub(crate) reward_role: RoleId,
    pub(crate) excluded_roles: BTreeSet<RoleId>,
    pub(crate) ignored_channels: BTreeSet<ChannelId>,
    pub(crate) ignored_categories: BTreeSet<ChannelId>,
    /// When `false`, messages made of nothing but links are not counted.
    pub(crate) count_only_link_messages: bool,
}

impl RoleCondition {
    /// Inclusive lower bound of the counting window.
    pub(crate) fn window_start(&self, now: UnixTime) -> UnixTime {
        now.saturating_sub(self.timeframe)
    }

    pub(crate) fn timeframe_days(&self) -> u64 {
        self.timeframe.as_secs() / crate::immut_data::consts::SECONDS_PER_DAY
    }

    /// Multi-line description used by `rewardrole list`.
    pub(crate) fn describe(&self) -> String {
        fn or_none(s: String) -> String {
            if s.is_empty() {
                "none".to_owned()
            } else {
                s
            }
        }

        let excluded = self
            .excluded_roles
            .iter()
            .map(|RoleId(r)| format!("<@&{r}>"))
            .join(", ");
        let channels = self
            .ignored_channels
            .iter()
            .map(|ChannelId(c)| format!("<#{c}>"))
            .join(", ");
        let categories = self
            .ignored_categories
            .iter()
            .map(|ChannelId(c)| format!("<#{c}>"))
            .join(", ");

        format!(
            "**Role:** <@&{}>\n\
             Min messages: {}\n\
             Timeframe (days): {}\n\
             Reward role: <@&{}>\n\
             Excluded roles: {}\n\
             Ignored channels: {}\n\
             Ignored categories: {}\n\
             Link-only messages count: {}",
            self.qualifying_role.0,
            self.min_messages,
            self.timeframe_days(),
            self.reward_role.0,
            or_none(excluded),
            or_none(channels),
            or_none(categories),
            if self.count_only_link_messages { "yes" } else { "no" },
        )
    }
}

/// The widest window among `conditions`, i.e. the oldest moment any of them looks at.
pub(crate) fn horizon<'a>(
    conditions: impl IntoIterator<Item = &'a RoleCondition>,
    now: UnixTime,
) -> Option<UnixTime> {
    conditions.into_iter().map(|c| c.window_start(now)).min()
}

#[cfg(test)]
pub(crate) fn condition(qualifying: u64, min_messages: u64, days: u64, reward: u64) -> RoleCondition {
    RoleCondition {
        qualifying_role: RoleId(qualifying),
        min_messages,
        timeframe: Duration::from_secs(days * crate::immut_data::consts::SECONDS_PER_DAY),
        reward_role: RoleId(reward),
        excluded_roles: BTreeSet::new(),
        ignored_channels: BTreeSet::new(),
        ignored_categories: BTreeSet::new(),
        count_only_link_messages: true,
    }
}
