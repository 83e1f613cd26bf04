//! The slice of the chat platform the engine talks to.
//!
//! The engine never touches serenity's HTTP client directly: everything goes through
//! [`Platform`] so that a pass can be driven against a fake guild in tests.

use std::collections::{HashMap, HashSet};

use serenity::{
    async_trait,
    model::{
        permissions::Permissions,
        prelude::{ChannelId, GuildId, MessageId, RoleId, UserId},
    },
};

use super::time::UnixTime;

/// A guild member as seen at the start of a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MemberSnapshot {
    pub(crate) user: UserId,
    pub(crate) roles: HashSet<RoleId>,
    pub(crate) bot: bool,
}

impl MemberSnapshot {
    pub(crate) fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelKind {
    /// Text and announcement channels.
    Text,
    Category,
    Forum,
    /// Public, private and announcement threads.
    Thread,
    /// Voice, stage, directory and whatever Discord adds next.
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RoleOverwrite {
    pub(crate) allow: Permissions,
    pub(crate) deny: Permissions,
}

/// A channel, category or thread of a guild together with its role permission overwrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GuildChannelInfo {
    pub(crate) id: ChannelId,
    pub(crate) name: String,
    pub(crate) kind: ChannelKind,
    /// Category for channels, parent channel for threads.
    pub(crate) parent: Option<ChannelId>,
    pub(crate) role_overwrites: HashMap<RoleId, RoleOverwrite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FetchedMessage {
    pub(crate) id: MessageId,
    pub(crate) author: UserId,
    pub(crate) sent_at: UnixTime,
    pub(crate) content: String,
}

/// Which page of a source's history to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HistoryPage {
    /// The oldest messages strictly newer than the id.
    After(MessageId),
    /// The newest messages strictly older than the id, or the newest messages overall.
    Before(Option<MessageId>),
}

#[async_trait]
pub(crate) trait Platform: Send + Sync {
    async fn guilds(&self) -> Vec<GuildId>;

    async fn guild_roles(&self, guild: GuildId) -> crate::util::Result<HashSet<RoleId>>;

    async fn guild_members(&self, guild: GuildId) -> crate::util::Result<Vec<MemberSnapshot>>;

    /// Channels, categories and active threads of the guild.
    async fn enumerate_channels(
        &self,
        guild: GuildId,
    ) -> crate::util::Result<Vec<GuildChannelInfo>>;

    /// At most one page of history. Order within the page is unspecified.
    async fn fetch_history(
        &self,
        source: ChannelId,
        page: HistoryPage,
    ) -> crate::util::Result<Vec<FetchedMessage>>;

    async fn add_role(
        &self,
        guild: GuildId,
        member: UserId,
        role: RoleId,
    ) -> crate::util::Result<()>;

    async fn remove_role(
        &self,
        guild: GuildId,
        member: UserId,
        role: RoleId,
    ) -> crate::util::Result<()>;

    async fn send_message(&self, channel: ChannelId, text: &str) -> crate::util::Result<()>;
}
