use std::collections::HashMap;

use serenity::{
    async_trait,
    model::prelude::{ChannelId, GuildId, RoleId},
};

use super::{
    condition::RoleCondition, cursor::Cursor, ledger::LedgerEntry, source::Placement,
    time::UnixTime,
};

/// Everything a guild pass persists, written in a single transaction.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct PassCommit {
    pub(crate) cursors: Vec<(ChannelId, Cursor)>,
    /// Only for sources that also have a cursor.
    pub(crate) placements: Vec<(ChannelId, Placement)>,
    pub(crate) facts: Vec<LedgerEntry>,
    /// Ledger entries older than this are dropped and every cursor's coverage is raised to it.
    pub(crate) prune_before: Option<UnixTime>,
    /// Sources whose cursor and placement are deleted.
    pub(crate) forget: Vec<ChannelId>,
}

/// Guild-scoped persistence of the engine and of the admin commands.
#[async_trait]
pub(crate) trait GuildStore: Send + Sync {
    async fn conditions(&self, guild: GuildId) -> crate::util::Result<Vec<RoleCondition>>;

    /// Returns `true` when a condition for the same qualifying role was replaced.
    async fn put_condition(
        &self,
        guild: GuildId,
        condition: &RoleCondition,
    ) -> crate::util::Result<bool>;

    /// Returns `false` when there was nothing to remove.
    async fn remove_condition(
        &self,
        guild: GuildId,
        qualifying_role: RoleId,
    ) -> crate::util::Result<bool>;

    async fn log_channel(&self, guild: GuildId) -> crate::util::Result<Option<ChannelId>>;

    async fn set_log_channel(
        &self,
        guild: GuildId,
        channel: Option<ChannelId>,
    ) -> crate::util::Result<()>;

    async fn cursors(&self, guild: GuildId) -> crate::util::Result<HashMap<ChannelId, Cursor>>;

    /// Placements of the sources that have a cursor, where one was recorded.
    async fn placements(
        &self,
        guild: GuildId,
    ) -> crate::util::Result<HashMap<ChannelId, Placement>>;

    /// Ledger entries with `sent_at >= since`.
    async fn ledger(
        &self,
        guild: GuildId,
        since: UnixTime,
    ) -> crate::util::Result<Vec<LedgerEntry>>;

    /// Cursor `last_seen` values never move backwards, whatever the commit carries.
    async fn commit_pass(&self, guild: GuildId, commit: &PassCommit) -> crate::util::Result<()>;

    /// Forgets conditions, settings, cursors and ledger of the guild.
    async fn clear(&self, guild: GuildId) -> crate::util::Result<()>;
}
