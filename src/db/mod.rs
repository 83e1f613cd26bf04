use std::{collections::HashMap, time::Duration};

use serenity::{
    async_trait,
    model::prelude::{ChannelId, GuildId, MessageId, RoleId, UserId},
};
use sqlx::PgPool;

use crate::{
    engine::{
        ledger::LedgerEntry,
        source::Placement,
        store::{GuildStore, PassCommit},
        time::UnixTime,
        Cursor, RoleCondition,
    },
    util::macros::{i64_from_id, id_from_i64},
};

pub(crate) mod dao;

impl From<dao::RoleCondition> for RoleCondition {
    fn from(value: dao::RoleCondition) -> Self {
        let dao::RoleCondition {
            qualifying_role_id,
            min_messages,
            timeframe_secs,
            reward_role_id,
            excluded_roles,
            ignored_channels,
            ignored_categories,
            count_only_link_messages,
        } = value;

        RoleCondition {
            qualifying_role: id_from_i64!(RoleId, qualifying_role_id),
            min_messages: u64::try_from(min_messages).unwrap_or_default(),
            timeframe: Duration::from_secs(u64::try_from(timeframe_secs).unwrap_or_default()),
            reward_role: id_from_i64!(RoleId, reward_role_id),
            excluded_roles: excluded_roles
                .into_iter()
                .map(|r| id_from_i64!(RoleId, r))
                .collect(),
            ignored_channels: ignored_channels
                .into_iter()
                .map(|c| id_from_i64!(ChannelId, c))
                .collect(),
            ignored_categories: ignored_categories
                .into_iter()
                .map(|c| id_from_i64!(ChannelId, c))
                .collect(),
            count_only_link_messages,
        }
    }
}

impl From<dao::ScanCursor> for (ChannelId, Cursor) {
    fn from(value: dao::ScanCursor) -> Self {
        let dao::ScanCursor {
            channel_id,
            last_seen_message_id,
            covered_since,
        } = value;
        (
            id_from_i64!(ChannelId, channel_id),
            Cursor {
                last_seen: id_from_i64!(MessageId, last_seen_message_id),
                covered_since: UnixTime(covered_since),
            },
        )
    }
}

impl From<dao::SourcePlacement> for (ChannelId, Placement) {
    fn from(value: dao::SourcePlacement) -> Self {
        let dao::SourcePlacement {
            channel_id,
            parent_channel_id,
            category_id,
        } = value;
        (
            id_from_i64!(ChannelId, channel_id),
            Placement {
                channel: id_from_i64!(ChannelId, parent_channel_id),
                category: category_id.map(|c| id_from_i64!(ChannelId, c)),
            },
        )
    }
}

impl From<dao::LedgerEntry> for LedgerEntry {
    fn from(value: dao::LedgerEntry) -> Self {
        let dao::LedgerEntry {
            channel_id,
            message_id,
            author_id,
            sent_at,
            link_only,
        } = value;
        LedgerEntry {
            source: id_from_i64!(ChannelId, channel_id),
            message: id_from_i64!(MessageId, message_id),
            author: id_from_i64!(UserId, author_id),
            sent_at: UnixTime(sent_at),
            link_only,
        }
    }
}

pub(crate) async fn role_conditions(
    pool: &PgPool,
    guild: GuildId,
) -> Result<Vec<dao::RoleCondition>, sqlx::Error> {
    sqlx::query_as::<_, dao::RoleCondition>(
        "SELECT qualifying_role_id, min_messages, timeframe_secs, reward_role_id, \
        excluded_roles, ignored_channels, ignored_categories, count_only_link_messages \
        FROM role_conditions \
        WHERE guild_id = $1 \
        ORDER BY qualifying_role_id",
    )
    .bind(i64_from_id!(guild))
    .fetch_all(pool)
    .await
}

/// Returns `true` if a condition for the same qualifying role existed before.
pub(crate) async fn upsert_role_condition(
    pool: &PgPool,
    guild: GuildId,
    condition: &RoleCondition,
) -> Result<bool, sqlx::Error> {
    let guild_id: i64 = i64_from_id!(guild);
    let qualifying_role_id: i64 = i64_from_id!(condition.qualifying_role);
    let excluded_roles: Vec<i64> = condition
        .excluded_roles
        .iter()
        .map(|r| i64_from_id!(r))
        .collect();
    let ignored_channels: Vec<i64> = condition
        .ignored_channels
        .iter()
        .map(|c| i64_from_id!(c))
        .collect();
    let ignored_categories: Vec<i64> = condition
        .ignored_categories
        .iter()
        .map(|c| i64_from_id!(c))
        .collect();

    let mut tx = pool.begin().await?;
    let existed: bool = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (\
        SELECT 1 FROM role_conditions \
        WHERE guild_id = $1 AND qualifying_role_id = $2)",
    )
    .bind(guild_id)
    .bind(qualifying_role_id)
    .fetch_one(&mut *tx)
    .await?;
    sqlx::query(
        "INSERT INTO role_conditions (guild_id, qualifying_role_id, min_messages, timeframe_secs, \
        reward_role_id, excluded_roles, ignored_channels, ignored_categories, count_only_link_messages) \
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
        ON CONFLICT (guild_id, qualifying_role_id) \
        DO UPDATE SET min_messages = $3, timeframe_secs = $4, reward_role_id = $5, \
        excluded_roles = $6, ignored_channels = $7, ignored_categories = $8, \
        count_only_link_messages = $9",
    )
    .bind(guild_id)
    .bind(qualifying_role_id)
    .bind(i64::try_from(condition.min_messages).unwrap_or(i64::MAX))
    .bind(i64::try_from(condition.timeframe.as_secs()).unwrap_or(i64::MAX))
    .bind(i64_from_id!(condition.reward_role))
    .bind(excluded_roles)
    .bind(ignored_channels)
    .bind(ignored_categories)
    .bind(condition.count_only_link_messages)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(existed)
}

pub(crate) async fn delete_role_condition(
    pool: &PgPool,
    guild: GuildId,
    qualifying_role: RoleId,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        "DELETE FROM role_conditions \
        WHERE guild_id = $1 AND qualifying_role_id = $2",
    )
    .bind(i64_from_id!(guild))
    .bind(i64_from_id!(qualifying_role))
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

pub(crate) async fn log_channel(
    pool: &PgPool,
    guild: GuildId,
) -> Result<Option<ChannelId>, sqlx::Error> {
    let raw: Option<Option<i64>> = sqlx::query_scalar::<_, Option<i64>>(
        "SELECT log_channel_id FROM guild_settings WHERE guild_id = $1",
    )
    .bind(i64_from_id!(guild))
    .fetch_optional(pool)
    .await?;
    Ok(raw.flatten().map(|c| id_from_i64!(ChannelId, c)))
}

pub(crate) async fn set_log_channel(
    pool: &PgPool,
    guild: GuildId,
    channel: Option<ChannelId>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO guild_settings (guild_id, log_channel_id) \
        VALUES ($1, $2) \
        ON CONFLICT (guild_id) \
        DO UPDATE SET log_channel_id = $2",
    )
    .bind(i64_from_id!(guild))
    .bind(channel.map(|c| i64_from_id!(c)))
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn scan_cursors(
    pool: &PgPool,
    guild: GuildId,
) -> Result<Vec<dao::ScanCursor>, sqlx::Error> {
    sqlx::query_as::<_, dao::ScanCursor>(
        "SELECT channel_id, last_seen_message_id, covered_since \
        FROM scan_cursors \
        WHERE guild_id = $1",
    )
    .bind(i64_from_id!(guild))
    .fetch_all(pool)
    .await
}

pub(crate) async fn source_placements(
    pool: &PgPool,
    guild: GuildId,
) -> Result<Vec<dao::SourcePlacement>, sqlx::Error> {
    sqlx::query_as::<_, dao::SourcePlacement>(
        "SELECT channel_id, parent_channel_id, category_id \
        FROM scan_cursors \
        WHERE guild_id = $1 AND parent_channel_id IS NOT NULL",
    )
    .bind(i64_from_id!(guild))
    .fetch_all(pool)
    .await
}

pub(crate) async fn ledger_since(
    pool: &PgPool,
    guild: GuildId,
    since: UnixTime,
) -> Result<Vec<dao::LedgerEntry>, sqlx::Error> {
    sqlx::query_as::<_, dao::LedgerEntry>(
        "SELECT channel_id, message_id, author_id, sent_at, link_only \
        FROM activity_ledger \
        WHERE guild_id = $1 AND sent_at >= $2",
    )
    .bind(i64_from_id!(guild))
    .bind(since.0)
    .fetch_all(pool)
    .await
}

/// Writes the outcome of a guild pass. Either all of it lands or none of it does.
pub(crate) async fn commit_pass(
    pool: &PgPool,
    guild: GuildId,
    commit: &PassCommit,
) -> Result<(), sqlx::Error> {
    let guild_id: i64 = i64_from_id!(guild);
    let mut tx = pool.begin().await?;

    if !commit.cursors.is_empty() {
        let (channels, (last_seen, covered_since)): (Vec<i64>, (Vec<i64>, Vec<i64>)) = commit
            .cursors
            .iter()
            .map(|(source, cursor)| {
                (
                    i64_from_id!(source),
                    (i64_from_id!(cursor.last_seen), cursor.covered_since.0),
                )
            })
            .unzip();
        sqlx::query(
            "INSERT INTO scan_cursors (guild_id, channel_id, last_seen_message_id, covered_since) \
            SELECT $1, * FROM UNNEST($2::BIGINT[], $3::BIGINT[], $4::BIGINT[]) \
            ON CONFLICT (guild_id, channel_id) \
            DO UPDATE SET last_seen_message_id = \
            GREATEST(scan_cursors.last_seen_message_id, EXCLUDED.last_seen_message_id), \
            covered_since = EXCLUDED.covered_since",
        )
        .bind(guild_id)
        .bind(channels)
        .bind(last_seen)
        .bind(covered_since)
        .execute(&mut *tx)
        .await?;
    }

    if !commit.placements.is_empty() {
        let (channels, (parents, categories)): (Vec<i64>, (Vec<i64>, Vec<Option<i64>>)) = commit
            .placements
            .iter()
            .map(|(source, placement)| {
                (
                    i64_from_id!(source),
                    (
                        i64_from_id!(placement.channel),
                        placement.category.map(|c| i64_from_id!(c)),
                    ),
                )
            })
            .unzip();
        sqlx::query(
            "UPDATE scan_cursors \
            SET parent_channel_id = placed.parent, category_id = placed.category \
            FROM UNNEST($2::BIGINT[], $3::BIGINT[], $4::BIGINT[]) AS placed(channel, parent, category) \
            WHERE scan_cursors.guild_id = $1 AND scan_cursors.channel_id = placed.channel",
        )
        .bind(guild_id)
        .bind(channels)
        .bind(parents)
        .bind(categories)
        .execute(&mut *tx)
        .await?;
    }

    if !commit.facts.is_empty() {
        let mut channels = Vec::with_capacity(commit.facts.len());
        let mut messages = Vec::with_capacity(commit.facts.len());
        let mut authors = Vec::with_capacity(commit.facts.len());
        let mut sent_at = Vec::with_capacity(commit.facts.len());
        let mut link_only = Vec::with_capacity(commit.facts.len());
        for fact in &commit.facts {
            channels.push(i64_from_id!(fact.source));
            messages.push(i64_from_id!(fact.message));
            authors.push(i64_from_id!(fact.author));
            sent_at.push(fact.sent_at.0);
            link_only.push(fact.link_only);
        }
        sqlx::query(
            "INSERT INTO activity_ledger (guild_id, channel_id, message_id, author_id, sent_at, link_only) \
            SELECT $1, * FROM UNNEST($2::BIGINT[], $3::BIGINT[], $4::BIGINT[], $5::BIGINT[], $6::BOOLEAN[]) \
            ON CONFLICT (guild_id, message_id) DO NOTHING",
        )
        .bind(guild_id)
        .bind(channels)
        .bind(messages)
        .bind(authors)
        .bind(sent_at)
        .bind(link_only)
        .execute(&mut *tx)
        .await?;
    }

    if let Some(horizon) = commit.prune_before {
        sqlx::query("DELETE FROM activity_ledger WHERE guild_id = $1 AND sent_at < $2")
            .bind(guild_id)
            .bind(horizon.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE scan_cursors \
            SET covered_since = GREATEST(covered_since, $2) \
            WHERE guild_id = $1",
        )
        .bind(guild_id)
        .bind(horizon.0)
        .execute(&mut *tx)
        .await?;
    }

    if !commit.forget.is_empty() {
        let forget: Vec<i64> = commit.forget.iter().map(|c| i64_from_id!(c)).collect();
        sqlx::query("DELETE FROM scan_cursors WHERE guild_id = $1 AND channel_id = ANY($2)")
            .bind(guild_id)
            .bind(forget)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await
}

pub(crate) async fn clear_guild(pool: &PgPool, guild: GuildId) -> Result<(), sqlx::Error> {
    let guild_id: i64 = i64_from_id!(guild);
    let mut tx = pool.begin().await?;
    for table in [
        "role_conditions",
        "guild_settings",
        "scan_cursors",
        "activity_ledger",
    ] {
        sqlx::query(&format!("DELETE FROM {table} WHERE guild_id = $1"))
            .bind(guild_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await
}

/// [`GuildStore`] backed by the shuttle-provisioned PostgreSQL database.
#[derive(Clone)]
pub(crate) struct PgStore {
    pub(crate) pool: PgPool,
}

#[async_trait]
impl GuildStore for PgStore {
    async fn conditions(&self, guild: GuildId) -> crate::util::Result<Vec<RoleCondition>> {
        Ok(role_conditions(&self.pool, guild)
            .await?
            .into_iter()
            .map(RoleCondition::from)
            .collect())
    }

    async fn put_condition(
        &self,
        guild: GuildId,
        condition: &RoleCondition,
    ) -> crate::util::Result<bool> {
        Ok(upsert_role_condition(&self.pool, guild, condition).await?)
    }

    async fn remove_condition(
        &self,
        guild: GuildId,
        qualifying_role: RoleId,
    ) -> crate::util::Result<bool> {
        Ok(delete_role_condition(&self.pool, guild, qualifying_role).await?)
    }

    async fn log_channel(&self, guild: GuildId) -> crate::util::Result<Option<ChannelId>> {
        Ok(log_channel(&self.pool, guild).await?)
    }

    async fn set_log_channel(
        &self,
        guild: GuildId,
        channel: Option<ChannelId>,
    ) -> crate::util::Result<()> {
        Ok(set_log_channel(&self.pool, guild, channel).await?)
    }

    async fn cursors(&self, guild: GuildId) -> crate::util::Result<HashMap<ChannelId, Cursor>> {
        Ok(scan_cursors(&self.pool, guild)
            .await?
            .into_iter()
            .map(<(ChannelId, Cursor)>::from)
            .collect())
    }

    async fn placements(
        &self,
        guild: GuildId,
    ) -> crate::util::Result<HashMap<ChannelId, Placement>> {
        Ok(source_placements(&self.pool, guild)
            .await?
            .into_iter()
            .map(<(ChannelId, Placement)>::from)
            .collect())
    }

    async fn ledger(
        &self,
        guild: GuildId,
        since: UnixTime,
    ) -> crate::util::Result<Vec<LedgerEntry>> {
        Ok(ledger_since(&self.pool, guild, since)
            .await?
            .into_iter()
            .map(LedgerEntry::from)
            .collect())
    }

    async fn commit_pass(&self, guild: GuildId, commit: &PassCommit) -> crate::util::Result<()> {
        Ok(commit_pass(&self.pool, guild, commit).await?)
    }

    async fn clear(&self, guild: GuildId) -> crate::util::Result<()> {
        Ok(clear_guild(&self.pool, guild).await?)
    }
}
