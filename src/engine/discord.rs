use std::{collections::HashSet, sync::Arc};

use serenity::{
    async_trait,
    cache::Cache,
    http::Http,
    model::{
        channel::{ChannelType, GuildChannel, Message, PermissionOverwriteType},
        prelude::{ChannelId, GuildId, Member, RoleId, UserId},
    },
};

use super::{
    platform::{
        ChannelKind, FetchedMessage, GuildChannelInfo, HistoryPage, MemberSnapshot, Platform,
        RoleOverwrite,
    },
    time::UnixTime,
};
use crate::{
    immut_data::consts::{HISTORY_PAGE_SIZE, MEMBER_PAGE_SIZE},
    util::say_wo_unintended_mentions,
};

/// [`Platform`] over the live gateway cache and REST client.
#[derive(Clone)]
pub(crate) struct SerenityPlatform {
    pub(crate) http: Arc<Http>,
    pub(crate) cache: Arc<Cache>,
}

impl From<&GuildChannel> for GuildChannelInfo {
    fn from(c: &GuildChannel) -> Self {
        let kind = match c.kind {
            ChannelType::Text | ChannelType::News => ChannelKind::Text,
            ChannelType::Category => ChannelKind::Category,
            ChannelType::Forum => ChannelKind::Forum,
            ChannelType::PublicThread | ChannelType::PrivateThread | ChannelType::NewsThread => {
                ChannelKind::Thread
            }
            _ => ChannelKind::Other,
        };
        let role_overwrites = c
            .permission_overwrites
            .iter()
            .filter_map(|o| match o.kind {
                PermissionOverwriteType::Role(role) => Some((
                    role,
                    RoleOverwrite {
                        allow: o.allow,
                        deny: o.deny,
                    },
                )),
                _ => None,
            })
            .collect();
        GuildChannelInfo {
            id: c.id,
            name: c.name.clone(),
            kind,
            parent: c.parent_id,
            role_overwrites,
        }
    }
}

impl From<Member> for MemberSnapshot {
    fn from(m: Member) -> Self {
        MemberSnapshot {
            user: m.user.id,
            roles: m.roles.into_iter().collect(),
            bot: m.user.bot,
        }
    }
}

impl From<Message> for FetchedMessage {
    fn from(m: Message) -> Self {
        FetchedMessage {
            id: m.id,
            author: m.author.id,
            sent_at: UnixTime::from_timestamp(&m.timestamp),
            content: m.content,
        }
    }
}

#[async_trait]
impl Platform for SerenityPlatform {
    async fn guilds(&self) -> Vec<GuildId> {
        let mut guilds = self.cache.guilds();
        guilds.sort_unstable();
        guilds
    }

    async fn guild_roles(&self, guild: GuildId) -> crate::util::Result<HashSet<RoleId>> {
        let roles = guild.roles(&self.http).await?;
        Ok(roles.into_keys().collect())
    }

    async fn guild_members(&self, guild: GuildId) -> crate::util::Result<Vec<MemberSnapshot>> {
        let mut members: Vec<MemberSnapshot> = Vec::new();
        let mut after: Option<UserId> = None;
        loop {
            let page = guild
                .members(&self.http, Some(MEMBER_PAGE_SIZE), after)
                .await?;
            let full = page.len() as u64 >= MEMBER_PAGE_SIZE;
            after = page.iter().map(|m| m.user.id).max();
            members.extend(page.into_iter().map(MemberSnapshot::from));
            if !full || after.is_none() {
                break;
            }
        }
        Ok(members)
    }

    async fn enumerate_channels(
        &self,
        guild: GuildId,
    ) -> crate::util::Result<Vec<GuildChannelInfo>> {
        let channels = guild.channels(&self.http).await?;
        let threads = guild.get_active_threads(&self.http).await?;
        Ok(channels
            .values()
            .chain(threads.threads.iter())
            .map(GuildChannelInfo::from)
            .collect())
    }

    async fn fetch_history(
        &self,
        source: ChannelId,
        page: HistoryPage,
    ) -> crate::util::Result<Vec<FetchedMessage>> {
        let messages = source
            .messages(&self.http, |b| {
                let b = b.limit(HISTORY_PAGE_SIZE);
                match page {
                    HistoryPage::After(id) => b.after(id),
                    HistoryPage::Before(Some(id)) => b.before(id),
                    HistoryPage::Before(None) => b,
                }
            })
            .await?;
        Ok(messages.into_iter().map(FetchedMessage::from).collect())
    }

    async fn add_role(
        &self,
        guild: GuildId,
        member: UserId,
        role: RoleId,
    ) -> crate::util::Result<()> {
        self.http
            .add_member_role(guild.0, member.0, role.0, Some("Reward role threshold reached"))
            .await?;
        Ok(())
    }

    async fn remove_role(
        &self,
        guild: GuildId,
        member: UserId,
        role: RoleId,
    ) -> crate::util::Result<()> {
        self.http
            .remove_member_role(guild.0, member.0, role.0, Some("Reward role threshold missed"))
            .await?;
        Ok(())
    }

    async fn send_message(&self, channel: ChannelId, text: &str) -> crate::util::Result<()> {
        say_wo_unintended_mentions(channel, &self.http, text).await?;
        Ok(())
    }
}
