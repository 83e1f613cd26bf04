//! In-memory stand-ins for Discord and PostgreSQL used by the engine tests.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use serenity::{
    async_trait,
    model::prelude::{ChannelId, GuildId, MessageId, RoleId, UserId},
};

use crate::{
    engine::{
        ledger::LedgerEntry,
        source::Placement,
        platform::{
            ChannelKind, FetchedMessage, GuildChannelInfo, HistoryPage, MemberSnapshot, Platform,
        },
        store::{GuildStore, PassCommit},
        time::UnixTime,
        Cursor, RoleCondition,
    },
    immut_data::consts::HISTORY_PAGE_SIZE,
    util::{Error, Result},
};

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

pub(crate) fn msg_by(secs: i64, author: u64, content: &str) -> FetchedMessage {
    let seq = NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed) & 0x3F_FFFF;
    FetchedMessage {
        id: MessageId(UnixTime(secs).snowflake_floor().0 | seq),
        author: UserId(author),
        sent_at: UnixTime(secs),
        content: content.to_owned(),
    }
}

pub(crate) fn msg_at(secs: i64, author: u64) -> FetchedMessage {
    msg_by(secs, author, "hello there")
}

pub(crate) fn channel(id: u64, kind: ChannelKind, parent: Option<u64>) -> GuildChannelInfo {
    GuildChannelInfo {
        id: ChannelId(id),
        name: format!("channel-{id}"),
        kind,
        parent: parent.map(ChannelId),
        role_overwrites: HashMap::new(),
    }
}

pub(crate) fn member(user: u64, roles: &[u64]) -> MemberSnapshot {
    MemberSnapshot {
        user: UserId(user),
        roles: roles.iter().copied().map(RoleId).collect(),
        bot: false,
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mutation {
    Add(UserId, RoleId),
    Remove(UserId, RoleId),
}

#[derive(Default)]
struct FakeGuild {
    roles: HashSet<RoleId>,
    members: Vec<MemberSnapshot>,
    channels: Vec<GuildChannelInfo>,
    panic_on_members: bool,
    stall_members: Option<Duration>,
}

#[derive(Default)]
struct FakeState {
    guilds: BTreeMap<GuildId, FakeGuild>,
    history: HashMap<ChannelId, Vec<FetchedMessage>>,
    denied: HashSet<ChannelId>,
    failing_members: HashSet<UserId>,
    fail_sends: bool,
    mutations: Vec<Mutation>,
    sent: Vec<(ChannelId, String)>,
    history_calls: usize,
}

/// A scripted guild with failure injection.
#[derive(Default)]
pub(crate) struct FakePlatform {
    state: Mutex<FakeState>,
}

impl FakePlatform {
    pub(crate) fn add_guild(&self, guild: GuildId, roles: impl IntoIterator<Item = RoleId>) {
        lock(&self.state)
            .guilds
            .entry(guild)
            .or_default()
            .roles
            .extend(roles);
    }

    pub(crate) fn add_channel(&self, guild: GuildId, channel: GuildChannelInfo) {
        lock(&self.state)
            .guilds
            .entry(guild)
            .or_default()
            .channels
            .push(channel);
    }

    pub(crate) fn remove_channel(&self, guild: GuildId, channel: ChannelId) {
        if let Some(g) = lock(&self.state).guilds.get_mut(&guild) {
            g.channels.retain(|c| c.id != channel);
        }
    }

    pub(crate) fn add_member(&self, guild: GuildId, member: MemberSnapshot) {
        lock(&self.state)
            .guilds
            .entry(guild)
            .or_default()
            .members
            .push(member);
    }

    pub(crate) fn post(&self, channel: ChannelId, msg: FetchedMessage) {
        lock(&self.state)
            .history
            .entry(channel)
            .or_default()
            .push(msg);
    }

    pub(crate) fn newest(&self, channel: ChannelId) -> Option<MessageId> {
        lock(&self.state)
            .history
            .get(&channel)
            .and_then(|h| h.iter().map(|m| m.id).max())
    }

    pub(crate) fn deny_history(&self, channel: ChannelId) {
        lock(&self.state).denied.insert(channel);
    }

    pub(crate) fn fail_mutations_for(&self, member: UserId) {
        lock(&self.state).failing_members.insert(member);
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        lock(&self.state).fail_sends = fail;
    }

    pub(crate) fn panic_on_members(&self, guild: GuildId) {
        lock(&self.state)
            .guilds
            .entry(guild)
            .or_default()
            .panic_on_members = true;
    }

    pub(crate) fn stall_members(&self, guild: GuildId, stall: Duration) {
        lock(&self.state)
            .guilds
            .entry(guild)
            .or_default()
            .stall_members = Some(stall);
    }

    pub(crate) fn mutations(&self) -> Vec<Mutation> {
        lock(&self.state).mutations.clone()
    }

    pub(crate) fn sent(&self) -> Vec<(ChannelId, String)> {
        lock(&self.state).sent.clone()
    }

    pub(crate) fn history_calls(&self) -> usize {
        lock(&self.state).history_calls
    }

    fn mutate(&self, guild: GuildId, mutation: Mutation) -> Result<()> {
        let mut state = lock(&self.state);
        let (Mutation::Add(user, role) | Mutation::Remove(user, role)) = mutation;
        if state.failing_members.contains(&user) {
            return Err(Error::Serenity(serenity::Error::Other("Missing permissions")));
        }
        if let Some(m) = state
            .guilds
            .get_mut(&guild)
            .and_then(|g| g.members.iter_mut().find(|m| m.user == user))
        {
            match mutation {
                Mutation::Add(..) => m.roles.insert(role),
                Mutation::Remove(..) => m.roles.remove(&role),
            };
        }
        state.mutations.push(mutation);
        Ok(())
    }
}

fn unknown_guild() -> Error {
    Error::Serenity(serenity::Error::Other("Unknown guild"))
}

#[async_trait]
impl Platform for FakePlatform {
    async fn guilds(&self) -> Vec<GuildId> {
        lock(&self.state).guilds.keys().copied().collect()
    }

    async fn guild_roles(&self, guild: GuildId) -> Result<HashSet<RoleId>> {
        lock(&self.state)
            .guilds
            .get(&guild)
            .map(|g| g.roles.clone())
            .ok_or_else(unknown_guild)
    }

    async fn guild_members(&self, guild: GuildId) -> Result<Vec<MemberSnapshot>> {
        let (members, panics, stall) = {
            let state = lock(&self.state);
            let g = state.guilds.get(&guild).ok_or_else(unknown_guild)?;
            (g.members.clone(), g.panic_on_members, g.stall_members)
        };
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        if panics {
            panic!("member list of guild {} is cursed", guild.0);
        }
        Ok(members)
    }

    async fn enumerate_channels(&self, guild: GuildId) -> Result<Vec<GuildChannelInfo>> {
        lock(&self.state)
            .guilds
            .get(&guild)
            .map(|g| g.channels.clone())
            .ok_or_else(unknown_guild)
    }

    async fn fetch_history(
        &self,
        source: ChannelId,
        page: HistoryPage,
    ) -> Result<Vec<FetchedMessage>> {
        let mut state = lock(&self.state);
        state.history_calls += 1;
        if state.denied.contains(&source) {
            return Err(Error::Serenity(serenity::Error::Other("Missing access")));
        }
        let mut history = state.history.get(&source).cloned().unwrap_or_default();
        history.sort_unstable_by_key(|m| m.id);
        #[allow(clippy::cast_possible_truncation)]
        let limit = HISTORY_PAGE_SIZE as usize;
        let page: Vec<FetchedMessage> = match page {
            HistoryPage::After(after) => history
                .into_iter()
                .filter(|m| m.id > after)
                .take(limit)
                .collect(),
            HistoryPage::Before(before) => history
                .into_iter()
                .rev()
                .filter(|m| before.map_or(true, |b| m.id < b))
                .take(limit)
                .collect(),
        };
        Ok(page)
    }

    async fn add_role(&self, guild: GuildId, member: UserId, role: RoleId) -> Result<()> {
        self.mutate(guild, Mutation::Add(member, role))
    }

    async fn remove_role(&self, guild: GuildId, member: UserId, role: RoleId) -> Result<()> {
        self.mutate(guild, Mutation::Remove(member, role))
    }

    async fn send_message(&self, channel: ChannelId, text: &str) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_sends {
            return Err(Error::Serenity(serenity::Error::Other("Missing access")));
        }
        state.sent.push((channel, text.to_owned()));
        Ok(())
    }
}

#[derive(Default)]
struct MemGuild {
    conditions: BTreeMap<RoleId, RoleCondition>,
    log_channel: Option<ChannelId>,
    cursors: HashMap<ChannelId, Cursor>,
    placements: HashMap<ChannelId, Placement>,
    ledger: BTreeMap<MessageId, LedgerEntry>,
}

/// [`GuildStore`] with the same commit semantics as the PostgreSQL one.
#[derive(Default)]
pub(crate) struct MemStore {
    guilds: Mutex<HashMap<GuildId, MemGuild>>,
    fail_commits: AtomicBool,
}

impl MemStore {
    pub(crate) fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl GuildStore for MemStore {
    async fn conditions(&self, guild: GuildId) -> Result<Vec<RoleCondition>> {
        Ok(lock(&self.guilds)
            .get(&guild)
            .map(|g| g.conditions.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn put_condition(&self, guild: GuildId, condition: &RoleCondition) -> Result<bool> {
        Ok(lock(&self.guilds)
            .entry(guild)
            .or_default()
            .conditions
            .insert(condition.qualifying_role, condition.clone())
            .is_some())
    }

    async fn remove_condition(&self, guild: GuildId, qualifying_role: RoleId) -> Result<bool> {
        Ok(lock(&self.guilds)
            .get_mut(&guild)
            .and_then(|g| g.conditions.remove(&qualifying_role))
            .is_some())
    }

    async fn log_channel(&self, guild: GuildId) -> Result<Option<ChannelId>> {
        Ok(lock(&self.guilds).get(&guild).and_then(|g| g.log_channel))
    }

    async fn set_log_channel(&self, guild: GuildId, channel: Option<ChannelId>) -> Result<()> {
        lock(&self.guilds).entry(guild).or_default().log_channel = channel;
        Ok(())
    }

    async fn cursors(&self, guild: GuildId) -> Result<HashMap<ChannelId, Cursor>> {
        Ok(lock(&self.guilds)
            .get(&guild)
            .map(|g| g.cursors.clone())
            .unwrap_or_default())
    }

    async fn placements(&self, guild: GuildId) -> Result<HashMap<ChannelId, Placement>> {
        Ok(lock(&self.guilds)
            .get(&guild)
            .map(|g| g.placements.clone())
            .unwrap_or_default())
    }

    async fn ledger(&self, guild: GuildId, since: UnixTime) -> Result<Vec<LedgerEntry>> {
        Ok(lock(&self.guilds)
            .get(&guild)
            .map(|g| {
                g.ledger
                    .values()
                    .filter(|e| e.sent_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn commit_pass(&self, guild: GuildId, commit: &PassCommit) -> Result<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(Error::Sqlx(sqlx::Error::PoolTimedOut));
        }
        let mut guilds = lock(&self.guilds);
        let g = guilds.entry(guild).or_default();
        for (source, cursor) in &commit.cursors {
            let stored = g.cursors.entry(*source).or_insert(*cursor);
            stored.last_seen = stored.last_seen.max(cursor.last_seen);
            stored.covered_since = cursor.covered_since;
        }
        for (source, placement) in &commit.placements {
            if g.cursors.contains_key(source) {
                g.placements.insert(*source, *placement);
            }
        }
        for fact in &commit.facts {
            g.ledger.entry(fact.message).or_insert_with(|| fact.clone());
        }
        if let Some(horizon) = commit.prune_before {
            g.ledger.retain(|_, e| e.sent_at >= horizon);
            for cursor in g.cursors.values_mut() {
                cursor.covered_since = cursor.covered_since.max(horizon);
            }
        }
        for source in &commit.forget {
            g.cursors.remove(source);
            g.placements.remove(source);
        }
        Ok(())
    }

    async fn clear(&self, guild: GuildId) -> Result<()> {
        lock(&self.guilds).remove(&guild);
        Ok(())
    }
}
