use std::collections::{BTreeSet, HashMap};

use serenity::model::prelude::{ChannelId, GuildId, MessageId};
use tracing::warn;

use super::{
    ledger::Ledger,
    source::Placement,
    store::{GuildStore, PassCommit},
    time::UnixTime,
};

/// Scan progress of one message source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cursor {
    /// Newest message already in the ledger. Incremental fetches start right after it.
    pub(crate) last_seen: MessageId,
    /// The ledger holds every message of the source sent at or after this moment.
    pub(crate) covered_since: UnixTime,
}

/// The cursors of one guild during a pass.
///
/// Updates are staged in memory and only reach the [`GuildStore`] through [`CursorStore::flush`],
/// together with the ledger facts they moved past.
#[derive(Debug)]
pub(crate) struct CursorStore {
    guild: GuildId,
    committed: HashMap<ChannelId, Cursor>,
    staged: HashMap<ChannelId, Cursor>,
    placements: HashMap<ChannelId, Placement>,
    moved: HashMap<ChannelId, Placement>,
    forgotten: BTreeSet<ChannelId>,
}

impl CursorStore {
    pub(crate) fn new(guild: GuildId, committed: HashMap<ChannelId, Cursor>) -> Self {
        Self {
            guild,
            committed,
            staged: HashMap::new(),
            placements: HashMap::new(),
            moved: HashMap::new(),
            forgotten: BTreeSet::new(),
        }
    }

    pub(crate) fn with_placements(mut self, placements: HashMap<ChannelId, Placement>) -> Self {
        self.placements = placements;
        self
    }

    pub(crate) async fn load<S: GuildStore + ?Sized>(
        store: &S,
        guild: GuildId,
    ) -> crate::util::Result<Self> {
        let committed = store.cursors(guild).await?;
        let placements = store.placements(guild).await?;
        Ok(Self::new(guild, committed).with_placements(placements))
    }

    pub(crate) fn cursor(&self, source: ChannelId) -> Option<Cursor> {
        self.staged
            .get(&source)
            .or_else(|| self.committed.get(&source))
            .copied()
    }

    pub(crate) fn get(&self, source: ChannelId) -> Option<MessageId> {
        self.cursor(source).map(|c| c.last_seen)
    }

    /// Placements remembered by earlier passes.
    pub(crate) fn placements(&self) -> &HashMap<ChannelId, Placement> {
        &self.placements
    }

    /// Stages a new cursor for `source`. A `last_seen` older than the current one is ignored.
    pub(crate) fn set(&mut self, source: ChannelId, cursor: Cursor) {
        let last_seen = match self.get(source) {
            Some(current) if cursor.last_seen < current => {
                warn!(
                    guild = self.guild.0,
                    channel = source.0,
                    current = current.0,
                    proposed = cursor.last_seen.0,
                    "Refusing to move a cursor backwards"
                );
                current
            }
            _ => cursor.last_seen,
        };
        self.staged.insert(
            source,
            Cursor {
                last_seen,
                covered_since: cursor.covered_since,
            },
        );
    }

    /// Stages where `source` currently sits, if that changed since it was last remembered.
    pub(crate) fn place(&mut self, source: ChannelId, placement: Placement) {
        if self.placements.get(&source) != Some(&placement) {
            self.moved.insert(source, placement);
        }
    }

    /// Drops the cursors of sources that are not listed any more and whose newest message
    /// already left every window. Returns how many were dropped.
    pub(crate) fn forget_stale(
        &mut self,
        horizon: UnixTime,
        listed: impl Fn(ChannelId) -> bool,
    ) -> usize {
        let stale: Vec<ChannelId> = self
            .committed
            .iter()
            .filter(|(source, c)| UnixTime::of_snowflake(c.last_seen) < horizon && !listed(**source))
            .map(|(source, _)| *source)
            .collect();
        for source in &stale {
            self.staged.remove(source);
            self.moved.remove(source);
        }
        let dropped = stale.len();
        self.forgotten.extend(stale);
        dropped
    }

    #[cfg(test)]
    pub(crate) fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Persists staged cursors, the ledger facts fetched during the pass and the pruning of
    /// facts older than `prune_before`, all at once.
    pub(crate) async fn flush<S: GuildStore + ?Sized>(
        self,
        store: &S,
        ledger: Ledger,
        prune_before: Option<UnixTime>,
    ) -> crate::util::Result<()> {
        let mut cursors: Vec<(ChannelId, Cursor)> = self.staged.into_iter().collect();
        cursors.sort_unstable_by_key(|(source, _)| *source);
        let mut placements: Vec<(ChannelId, Placement)> = self.moved.into_iter().collect();
        placements.sort_unstable_by_key(|(source, _)| *source);
        let commit = PassCommit {
            cursors,
            placements,
            facts: ledger.into_staged(),
            prune_before,
            forget: self.forgotten.into_iter().collect(),
        };
        store.commit_pass(self.guild, &commit).await
    }
}
