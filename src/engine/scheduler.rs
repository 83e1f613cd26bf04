use std::{collections::BTreeSet, sync::Arc};

use serenity::model::prelude::{ChannelId, GuildId};
use tokio::time;
use tracing::{debug, error, info};

use super::{
    aggregate::{refresh, tally},
    condition::{horizon, RoleCondition},
    cursor::CursorStore,
    evaluate::evaluate,
    ledger::Ledger,
    log::GuildLog,
    platform::Platform,
    reconcile::{reconcile, ReconcileReport},
    source::{GuildSources, Source},
    store::GuildStore,
    time::UnixTime,
    EngineCfg,
};
use crate::{error::Error, immut_data::consts::SCHEDULER_SETTLE_DELAY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SchedulerState {
    /// The gateway is ready but the first tick has not started yet.
    Waiting,
    Tick,
    Sleeping,
}

/// What a single guild pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GuildReport {
    pub(crate) guild: GuildId,
    pub(crate) conditions: usize,
    pub(crate) skipped_conditions: usize,
    pub(crate) sources: usize,
    pub(crate) failed_sources: Vec<ChannelId>,
    pub(crate) new_facts: usize,
    pub(crate) roles: ReconcileReport,
}

impl GuildReport {
    fn new(guild: GuildId) -> Self {
        Self {
            guild,
            conditions: 0,
            skipped_conditions: 0,
            sources: 0,
            failed_sources: Vec::new(),
            new_facts: 0,
            roles: ReconcileReport::default(),
        }
    }

    fn summary(&self) -> String {
        let ReconcileReport {
            granted,
            revoked,
            unchanged,
            failed,
        } = self.roles;
        format!(
            "Reward role pass finished: {granted} granted, {revoked} revoked, {unchanged} unchanged, \
             {failed} failed over {} condition(s) ({} skipped). \
             Scanned {} source(s), {} unreadable, {} new message(s).",
            self.conditions,
            self.skipped_conditions,
            self.sources,
            self.failed_sources.len(),
            self.new_facts,
        )
    }
}

#[derive(Debug, Default)]
pub(crate) struct TickReport {
    pub(crate) completed: Vec<GuildReport>,
    /// Guilds whose pass failed, timed out or panicked. Nothing of theirs was flushed.
    pub(crate) failed: Vec<GuildId>,
}

/// The periodic loop over every guild the bot is in.
pub(crate) struct Scheduler<P, S> {
    platform: Arc<P>,
    store: Arc<S>,
    cfg: EngineCfg,
    state: SchedulerState,
}

impl<P, S> Scheduler<P, S>
where
    P: Platform + 'static,
    S: GuildStore + 'static,
{
    pub(crate) fn new(platform: Arc<P>, store: Arc<S>, cfg: EngineCfg) -> Self {
        Self {
            platform,
            store,
            cfg,
            state: SchedulerState::Waiting,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> SchedulerState {
        self.state
    }

    fn transition(&mut self, to: SchedulerState) {
        debug!(from = ?self.state, ?to, "Scheduler state change");
        self.state = to;
    }

    /// Runs forever. Meant to be spawned once per process.
    pub(crate) async fn run(mut self) {
        time::sleep(SCHEDULER_SETTLE_DELAY).await;
        loop {
            self.transition(SchedulerState::Tick);
            let report = self.tick().await;
            info!(
                completed = report.completed.len(),
                failed = report.failed.len(),
                "Tick finished"
            );
            self.transition(SchedulerState::Sleeping);
            time::sleep(self.cfg.tick_interval).await;
        }
    }

    /// One pass over every guild, sequentially. Never fails: a guild that errors, panics or
    /// overruns its deadline is logged and left unflushed.
    pub(crate) async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        for guild in self.platform.guilds().await {
            let now = UnixTime::now();
            let mut handle = tokio::spawn(run_guild_pass(
                Arc::clone(&self.platform),
                Arc::clone(&self.store),
                guild,
                self.cfg.max_pages,
                now,
            ));

            let joined = match self.cfg.guild_timeout {
                Some(limit) => match time::timeout(limit, &mut handle).await {
                    Ok(joined) => joined,
                    Err(_elapsed) => {
                        handle.abort();
                        self.fail_guild(guild, Error::GuildTimeout(limit).to_string())
                            .await;
                        report.failed.push(guild);
                        continue;
                    }
                },
                None => (&mut handle).await,
            };

            match joined {
                Ok(Ok(guild_report)) => report.completed.push(guild_report),
                Ok(Err(e)) => {
                    self.fail_guild(guild, format!("Reward role pass failed: {e}"))
                        .await;
                    report.failed.push(guild);
                }
                Err(join_err) => {
                    self.fail_guild(guild, format!("Reward role pass crashed: {join_err}"))
                        .await;
                    report.failed.push(guild);
                }
            }
        }
        report
    }

    async fn fail_guild(&self, guild: GuildId, text: String) {
        error!(guild = guild.0, "{text}");
        // the store may be the reason the pass failed in the first place
        let channel = self.store.log_channel(guild).await.ok().flatten();
        if let Some(channel) = channel {
            if let Err(e) = self.platform.send_message(channel, &text).await {
                error!(guild = guild.0, "Failed to report the failed pass: {e}");
            }
        }
    }
}

/// Scans, counts, reconciles and flushes one guild.
pub(crate) async fn run_guild_pass<P, S>(
    platform: Arc<P>,
    store: Arc<S>,
    guild: GuildId,
    max_pages: u32,
    now: UnixTime,
) -> crate::util::Result<GuildReport>
where
    P: Platform + ?Sized,
    S: GuildStore + ?Sized,
{
    let mut report = GuildReport::new(guild);

    let conditions = store.conditions(guild).await?;
    if conditions.is_empty() {
        return Ok(report);
    }
    report.conditions = conditions.len();
    let log = GuildLog::new(&*platform, guild, store.log_channel(guild).await?);

    let roles = platform.guild_roles(guild).await?;
    let mut live: Vec<&RoleCondition> = Vec::with_capacity(conditions.len());
    for c in &conditions {
        let missing = [c.qualifying_role, c.reward_role]
            .into_iter()
            .find(|r| !roles.contains(r));
        match missing {
            Some(role) => {
                report.skipped_conditions += 1;
                log.problem(format!(
                    "Skipping the condition of <@&{}>: role {} no longer exists.",
                    c.qualifying_role.0, role.0
                ))
                .await;
            }
            None => live.push(c),
        }
    }

    // pruning honours every stored condition, skipped ones included
    let Some(since) = horizon(&conditions, now) else {
        return Ok(report);
    };

    let mut cursors = CursorStore::load(&*store, guild).await?;
    let sources = GuildSources::resolve(platform.enumerate_channels(guild).await?)
        .with_unlisted(cursors.placements());
    let mut members = platform.guild_members(guild).await?;
    members.sort_unstable_by_key(|m| m.user);

    let forgotten = cursors.forget_stale(since, |id| sources.get(id).map_or(false, |s| s.listed));
    if forgotten > 0 {
        debug!(guild = guild.0, forgotten, "Dropping cursors of sources gone for good");
    }
    let mut ledger = Ledger::from_committed(store.ledger(guild, since).await?);

    // unlisted sources still count below but have nothing left to fetch
    let wanted: BTreeSet<ChannelId> = live
        .iter()
        .flat_map(|c| sources.enumerate(*c))
        .filter(|s| s.listed)
        .map(|s| s.id)
        .collect();
    report.sources = wanted.len();
    let to_scan: Vec<&Source> = wanted.iter().filter_map(|id| sources.get(*id)).collect();
    let failures = refresh(
        &*platform,
        &to_scan,
        &mut cursors,
        &mut ledger,
        since,
        now,
        max_pages,
    )
    .await;
    for failure in failures {
        report.failed_sources.push(failure.source_id);
        log.problem(format!("Skipping <#{}>: {failure}", failure.source_id.0))
            .await;
    }

    for c in live {
        let eligible: Vec<ChannelId> = sources.enumerate(c).map(|s| s.id).collect();
        let counts = tally(&ledger, &eligible, c, now);
        let decisions = evaluate(c, &members, &counts);
        report.roles += reconcile(&*platform, guild, c, &decisions, &mut members, &log).await;
    }

    report.new_facts = ledger.staged_len();
    cursors.flush(&*store, ledger, Some(since)).await?;

    log.summary(report.summary()).await;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serenity::model::prelude::{RoleId, UserId};

    use super::*;
    use crate::{
        engine::{condition::condition, platform::ChannelKind},
        test_support::{channel, member, msg_at, msg_by, FakePlatform, MemStore, Mutation},
    };

    const GUILD: GuildId = GuildId(1);
    const TEXT: ChannelId = ChannelId(10);
    const QUALIFYING: RoleId = RoleId(100);
    const REWARD: RoleId = RoleId(200);

    fn cfg() -> EngineCfg {
        EngineCfg {
            tick_interval: Duration::from_secs(60),
            guild_timeout: None,
            max_pages: 5,
        }
    }

    fn guild_with_one_channel(platform: &FakePlatform, guild: GuildId) {
        platform.add_guild(guild, [QUALIFYING, REWARD]);
        platform.add_channel(guild, channel(TEXT.0 + guild.0, ChannelKind::Text, None));
    }

    async fn store_with_condition(guild: GuildId, min_messages: u64) -> MemStore {
        let store = MemStore::default();
        store
            .put_condition(guild, &condition(QUALIFYING.0, min_messages, 7, REWARD.0))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn active_members_get_the_reward_and_silent_ones_lose_it() {
        let platform = FakePlatform::default();
        guild_with_one_channel(&platform, GUILD);
        platform.add_member(GUILD, member(1, &[QUALIFYING.0]));
        platform.add_member(GUILD, member(2, &[QUALIFYING.0, REWARD.0]));
        let now = UnixTime::now();
        for _ in 0..3 {
            platform.post(ChannelId(TEXT.0 + GUILD.0), msg_by(now.0 - 60, 1, "hi"));
        }
        let platform = Arc::new(platform);
        let store = Arc::new(store_with_condition(GUILD, 3).await);

        let report = run_guild_pass(Arc::clone(&platform), Arc::clone(&store), GUILD, 5, now)
            .await
            .unwrap();
        assert_eq!(report.roles.granted, 1);
        assert_eq!(report.roles.revoked, 1);
        assert_eq!(report.new_facts, 3);
        assert_eq!(
            platform.mutations(),
            vec![
                Mutation::Add(UserId(1), REWARD),
                Mutation::Remove(UserId(2), REWARD),
            ]
        );
    }

    #[tokio::test]
    async fn ticks_do_not_double_count_and_converge() {
        let platform = FakePlatform::default();
        guild_with_one_channel(&platform, GUILD);
        platform.add_member(GUILD, member(1, &[QUALIFYING.0]));
        let src = ChannelId(TEXT.0 + GUILD.0);
        let now = UnixTime::now();
        platform.post(src, msg_at(now.0 - 120, 1));
        platform.post(src, msg_at(now.0 - 60, 1));
        let platform = Arc::new(platform);
        let store = Arc::new(store_with_condition(GUILD, 3).await);

        let first = run_guild_pass(Arc::clone(&platform), Arc::clone(&store), GUILD, 5, now)
            .await
            .unwrap();
        assert_eq!(first.roles.granted, 0);
        let cursor_after_first = store.cursors(GUILD).await.unwrap()[&src];

        // the same two messages are not counted again on the next tick
        let second = run_guild_pass(Arc::clone(&platform), Arc::clone(&store), GUILD, 5, now)
            .await
            .unwrap();
        assert_eq!(second.new_facts, 0);
        assert_eq!(second.roles.granted, 0);
        assert_eq!(store.cursors(GUILD).await.unwrap()[&src], cursor_after_first);

        platform.post(src, msg_at(now.0 - 30, 1));
        let third = run_guild_pass(Arc::clone(&platform), Arc::clone(&store), GUILD, 5, now)
            .await
            .unwrap();
        assert_eq!(third.new_facts, 1);
        assert_eq!(third.roles.granted, 1);
        assert!(store.cursors(GUILD).await.unwrap()[&src].last_seen > cursor_after_first.last_seen);

        let fourth = run_guild_pass(Arc::clone(&platform), Arc::clone(&store), GUILD, 5, now)
            .await
            .unwrap();
        assert_eq!(fourth.roles.mutations(), 0);
        assert_eq!(platform.mutations().len(), 1);
    }

    #[tokio::test]
    async fn widening_the_window_backfills_without_rewinding() {
        let platform = FakePlatform::default();
        guild_with_one_channel(&platform, GUILD);
        platform.add_member(GUILD, member(1, &[QUALIFYING.0]));
        let src = ChannelId(TEXT.0 + GUILD.0);
        let now = UnixTime::now();
        let day = 86_400;
        platform.post(src, msg_at(now.0 - 20 * day, 1));
        platform.post(src, msg_at(now.0 - 10 * day, 1));
        platform.post(src, msg_at(now.0 - day, 1));
        let platform = Arc::new(platform);
        let store = Arc::new(store_with_condition(GUILD, 3).await);

        let narrow = run_guild_pass(Arc::clone(&platform), Arc::clone(&store), GUILD, 5, now)
            .await
            .unwrap();
        assert_eq!(narrow.new_facts, 1);
        let before = store.cursors(GUILD).await.unwrap()[&src];

        store
            .put_condition(GUILD, &condition(QUALIFYING.0, 3, 30, REWARD.0))
            .await
            .unwrap();
        let wide = run_guild_pass(Arc::clone(&platform), Arc::clone(&store), GUILD, 5, now)
            .await
            .unwrap();
        assert_eq!(wide.new_facts, 2);
        assert_eq!(wide.roles.granted, 1);
        let after = store.cursors(GUILD).await.unwrap()[&src];
        assert_eq!(after.last_seen, before.last_seen);
        assert!(after.covered_since < before.covered_since);
    }

    #[tokio::test]
    async fn archived_threads_count_until_they_leave_the_window() {
        let platform = FakePlatform::default();
        guild_with_one_channel(&platform, GUILD);
        let text = ChannelId(TEXT.0 + GUILD.0);
        let thread = ChannelId(20);
        platform.add_channel(GUILD, channel(thread.0, ChannelKind::Thread, Some(text.0)));
        platform.add_member(GUILD, member(1, &[QUALIFYING.0]));
        let now = UnixTime::now();
        for _ in 0..3 {
            platform.post(thread, msg_by(now.0 - 60, 1, "hi"));
        }
        let platform = Arc::new(platform);
        let store = Arc::new(store_with_condition(GUILD, 3).await);

        run_guild_pass(Arc::clone(&platform), Arc::clone(&store), GUILD, 5, now)
            .await
            .unwrap();
        assert_eq!(platform.mutations(), vec![Mutation::Add(UserId(1), REWARD)]);

        // the thread auto-archives and drops out of the channel listing
        platform.remove_channel(GUILD, thread);
        let second = run_guild_pass(
            Arc::clone(&platform),
            Arc::clone(&store),
            GUILD,
            5,
            now.add_secs(60),
        )
        .await
        .unwrap();
        assert_eq!(second.sources, 1);
        assert_eq!(second.roles.mutations(), 0);
        assert_eq!(platform.mutations().len(), 1);
        assert!(store.cursors(GUILD).await.unwrap().contains_key(&thread));

        // once its messages are older than every window the thread is forgotten
        let third = run_guild_pass(
            Arc::clone(&platform),
            Arc::clone(&store),
            GUILD,
            5,
            now.add_secs(8 * 86_400),
        )
        .await
        .unwrap();
        assert_eq!(third.roles.revoked, 1);
        let cursors = store.cursors(GUILD).await.unwrap();
        assert!(!cursors.contains_key(&thread));
        assert!(cursors.contains_key(&text));
        assert!(store.placements(GUILD).await.unwrap().get(&thread).is_none());
    }

    #[tokio::test]
    async fn missing_roles_skip_the_condition_and_are_reported() {
        let platform = FakePlatform::default();
        platform.add_guild(GUILD, [QUALIFYING]);
        platform.add_member(GUILD, member(1, &[QUALIFYING.0]));
        let platform = Arc::new(platform);
        let store = Arc::new(store_with_condition(GUILD, 0).await);
        store.set_log_channel(GUILD, Some(ChannelId(77))).await.unwrap();

        let report = run_guild_pass(Arc::clone(&platform), Arc::clone(&store), GUILD, 5, UnixTime::now())
            .await
            .unwrap();
        assert_eq!(report.skipped_conditions, 1);
        assert!(platform.mutations().is_empty());
        let sent = platform.sent();
        assert!(sent[0].1.contains("no longer exists"));
        assert!(sent.iter().all(|(c, _)| *c == ChannelId(77)));
    }

    #[tokio::test]
    async fn unreadable_sources_do_not_abort_the_pass() {
        let platform = FakePlatform::default();
        guild_with_one_channel(&platform, GUILD);
        platform.add_channel(GUILD, channel(50, ChannelKind::Text, None));
        platform.add_member(GUILD, member(1, &[QUALIFYING.0]));
        let now = UnixTime::now();
        platform.post(ChannelId(TEXT.0 + GUILD.0), msg_at(now.0 - 60, 1));
        platform.deny_history(ChannelId(50));
        let platform = Arc::new(platform);
        let store = Arc::new(store_with_condition(GUILD, 1).await);

        let report = run_guild_pass(Arc::clone(&platform), Arc::clone(&store), GUILD, 5, now)
            .await
            .unwrap();
        assert_eq!(report.failed_sources, vec![ChannelId(50)]);
        assert_eq!(report.roles.granted, 1);
        let cursors = store.cursors(GUILD).await.unwrap();
        assert!(cursors.contains_key(&ChannelId(TEXT.0 + GUILD.0)));
        assert!(!cursors.contains_key(&ChannelId(50)));
    }

    #[tokio::test]
    async fn one_broken_guild_does_not_stop_the_tick() {
        const BROKEN: GuildId = GuildId(2);
        const HEALTHY: GuildId = GuildId(3);

        let platform = FakePlatform::default();
        guild_with_one_channel(&platform, BROKEN);
        guild_with_one_channel(&platform, HEALTHY);
        platform.add_member(BROKEN, member(1, &[QUALIFYING.0]));
        platform.add_member(HEALTHY, member(1, &[QUALIFYING.0]));
        platform.panic_on_members(BROKEN);
        let now = UnixTime::now();
        platform.post(ChannelId(TEXT.0 + BROKEN.0), msg_at(now.0 - 60, 1));

        let store = MemStore::default();
        for guild in [BROKEN, HEALTHY] {
            store
                .put_condition(guild, &condition(QUALIFYING.0, 0, 7, REWARD.0))
                .await
                .unwrap();
        }
        let platform = Arc::new(platform);
        let store = Arc::new(store);

        let scheduler = Scheduler::new(Arc::clone(&platform), Arc::clone(&store), cfg());
        assert_eq!(scheduler.state(), SchedulerState::Waiting);
        let report = scheduler.tick().await;
        assert_eq!(report.failed, vec![BROKEN]);
        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.completed[0].guild, HEALTHY);
        // nothing of the broken guild was flushed
        assert!(store.cursors(BROKEN).await.unwrap().is_empty());
        assert!(store.ledger(BROKEN, UnixTime(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_flush_fails_the_guild_only() {
        let platform = FakePlatform::default();
        guild_with_one_channel(&platform, GUILD);
        platform.add_member(GUILD, member(1, &[QUALIFYING.0]));
        let store = store_with_condition(GUILD, 0).await;
        store.fail_commits(true);
        let scheduler = Scheduler::new(Arc::new(platform), Arc::new(store), cfg());

        let report = scheduler.tick().await;
        assert_eq!(report.failed, vec![GUILD]);
    }

    #[tokio::test]
    async fn overrunning_guilds_are_abandoned() {
        let platform = FakePlatform::default();
        guild_with_one_channel(&platform, GUILD);
        platform.stall_members(GUILD, Duration::from_secs(30));
        let store = store_with_condition(GUILD, 0).await;
        let platform = Arc::new(platform);
        let store = Arc::new(store);
        let scheduler = Scheduler::new(
            Arc::clone(&platform),
            Arc::clone(&store),
            EngineCfg {
                guild_timeout: Some(Duration::from_millis(50)),
                ..cfg()
            },
        );

        let report = scheduler.tick().await;
        assert_eq!(report.failed, vec![GUILD]);
        assert!(store.cursors(GUILD).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn guilds_without_conditions_are_left_alone() {
        let platform = FakePlatform::default();
        guild_with_one_channel(&platform, GUILD);
        platform.add_member(GUILD, member(1, &[QUALIFYING.0]));
        let platform = Arc::new(platform);
        let store = Arc::new(MemStore::default());

        let report = run_guild_pass(Arc::clone(&platform), Arc::clone(&store), GUILD, 5, UnixTime::now())
            .await
            .unwrap();
        assert_eq!(report.conditions, 0);
        assert_eq!(platform.history_calls(), 0);
    }
}
