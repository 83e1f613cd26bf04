//! Windowed message counts per member.

use std::collections::HashMap;

use serenity::model::prelude::{ChannelId, UserId};
use tracing::{debug, warn};

use super::{
    condition::RoleCondition,
    cursor::CursorStore,
    ledger::{Ledger, LedgerEntry},
    platform::Platform,
    source::{scan, Source},
    time::UnixTime,
};
use crate::error::SourceError;

/// Brings the ledger up to date for every source in `sources`.
///
/// New facts are staged in `ledger` and the matching cursors in `cursors`; neither is durable
/// until the guild pass flushes. A source that cannot be read keeps its cursor and is returned
/// among the failures.
pub(crate) async fn refresh<P: Platform + ?Sized>(
    platform: &P,
    sources: &[&Source],
    cursors: &mut CursorStore,
    ledger: &mut Ledger,
    since: UnixTime,
    started: UnixTime,
    max_pages: u32,
) -> Vec<SourceError> {
    let mut failures = Vec::new();
    for &source in sources {
        let prior = cursors.cursor(source.id);
        match scan(platform, source.id, prior, since, started, max_pages).await {
            Ok(outcome) => {
                let fetched = outcome.messages.len();
                let new = outcome
                    .messages
                    .iter()
                    .map(|m| LedgerEntry::from_message(source.id, m))
                    .filter(|entry| ledger.ingest(entry.clone()))
                    .count();
                cursors.set(source.id, outcome.cursor);
                cursors.place(source.id, source.placement());
                debug!(
                    channel = source.id.0,
                    name = source.name.as_str(),
                    fetched,
                    new,
                    "Scanned source"
                );
            }
            Err(e) => {
                warn!(channel = source.id.0, name = source.name.as_str(), "{e}");
                failures.push(e);
            }
        }
    }
    failures
}

/// Whether `entry` counts for `condition` at `now`. The source is checked by the caller.
pub(crate) fn qualifies(entry: &LedgerEntry, condition: &RoleCondition, now: UnixTime) -> bool {
    entry.sent_at >= condition.window_start(now)
        && entry.sent_at <= now
        && (condition.count_only_link_messages || !entry.link_only)
}

/// Qualifying messages of `member` across `sources`.
#[cfg(test)]
pub(crate) fn count(
    ledger: &Ledger,
    sources: &[ChannelId],
    member: UserId,
    condition: &RoleCondition,
    now: UnixTime,
) -> u64 {
    sources
        .iter()
        .flat_map(|s| ledger.entries(*s))
        .filter(|e| e.author == member && qualifies(e, condition, now))
        .count() as u64
}

/// Qualifying messages of every author across `sources`, in one sweep of the ledger.
pub(crate) fn tally(
    ledger: &Ledger,
    sources: &[ChannelId],
    condition: &RoleCondition,
    now: UnixTime,
) -> HashMap<UserId, u64> {
    let mut counts: HashMap<UserId, u64> = HashMap::new();
    for entry in sources
        .iter()
        .flat_map(|s| ledger.entries(*s))
        .filter(|e| qualifies(e, condition, now))
    {
        *counts.entry(entry.author).or_default() += 1;
    }
    counts
}
