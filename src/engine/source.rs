//! Uniform access to the message history of channels and threads.

use std::collections::HashMap;

use serenity::model::{
    permissions::Permissions,
    prelude::{ChannelId, MessageId, RoleId},
};
use tracing::debug;

use super::{
    condition::RoleCondition,
    cursor::Cursor,
    platform::{ChannelKind, FetchedMessage, GuildChannelInfo, HistoryPage, Platform, RoleOverwrite},
    time::UnixTime,
};
use crate::{error::SourceError, immut_data::consts::HISTORY_PAGE_SIZE};

/// Where a source sits in its guild: the channel it belongs to and that channel's category.
///
/// Remembered with the cursor so that a thread keeps its place after it leaves the
/// active-thread listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Placement {
    pub(crate) channel: ChannelId,
    pub(crate) category: Option<ChannelId>,
}

/// A channel or thread whose messages count towards conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Source {
    pub(crate) id: ChannelId,
    pub(crate) name: String,
    /// The channel itself, or the channel a thread was started in.
    pub(crate) channel: ChannelId,
    pub(crate) category: Option<ChannelId>,
    /// Overwrites of the source, which threads borrow from their parent.
    pub(crate) role_overwrites: HashMap<RoleId, RoleOverwrite>,
    /// `false` for archived threads and deleted channels known only from an earlier scan.
    /// Their ledgered messages still count but there is nothing new to fetch.
    pub(crate) listed: bool,
}

impl Source {
    pub(crate) fn placement(&self) -> Placement {
        Placement {
            channel: self.channel,
            category: self.category,
        }
    }

    fn denies_sending(&self, role: RoleId) -> bool {
        self.role_overwrites
            .get(&role)
            .map_or(false, |o| o.deny.contains(Permissions::SEND_MESSAGES))
    }

    fn is_eligible_for(&self, condition: &RoleCondition) -> bool {
        if condition.ignored_channels.contains(&self.id)
            || condition.ignored_channels.contains(&self.channel)
        {
            return false;
        }
        if let Some(category) = self.category {
            if condition.ignored_categories.contains(&category) {
                return false;
            }
        }
        !self.denies_sending(condition.qualifying_role)
    }
}

/// Every source of a guild, resolved once per pass.
#[derive(Debug, Default)]
pub(crate) struct GuildSources {
    sources: Vec<Source>,
    /// Channels and forums threads can hang off, by id.
    parents: HashMap<ChannelId, GuildChannelInfo>,
}

impl GuildSources {
    pub(crate) fn resolve(channels: Vec<GuildChannelInfo>) -> Self {
        let (threads, parents): (Vec<GuildChannelInfo>, Vec<GuildChannelInfo>) = channels
            .into_iter()
            .partition(|c| c.kind == ChannelKind::Thread);
        let parents: HashMap<ChannelId, GuildChannelInfo> =
            parents.into_iter().map(|c| (c.id, c)).collect();

        let mut sources: Vec<Source> = parents
            .values()
            .filter(|c| c.kind == ChannelKind::Text)
            .map(|c| Source {
                id: c.id,
                name: c.name.clone(),
                channel: c.id,
                category: c.parent,
                role_overwrites: c.role_overwrites.clone(),
                listed: true,
            })
            .collect();
        sources.extend(threads.into_iter().map(|t| {
            let parent = t.parent.and_then(|p| parents.get(&p));
            Source {
                id: t.id,
                channel: parent.map_or(t.id, |p| p.id),
                category: parent.and_then(|p| p.parent),
                role_overwrites: parent.map_or_else(HashMap::new, |p| p.role_overwrites.clone()),
                name: t.name,
                listed: true,
            }
        }));
        sources.sort_unstable_by_key(|s| s.id);
        Self { sources, parents }
    }

    /// Adds the sources of earlier scans that the platform no longer lists.
    ///
    /// A surviving parent channel supplies its current category and overwrites; otherwise the
    /// remembered category is used and no overwrites apply.
    pub(crate) fn with_unlisted(mut self, known: &HashMap<ChannelId, Placement>) -> Self {
        let mut unlisted: Vec<Source> = known
            .iter()
            .filter(|(id, _)| self.get(**id).is_none())
            .map(|(id, placement)| {
                let parent = Some(placement.channel)
                    .filter(|c| c != id)
                    .and_then(|c| self.parents.get(&c));
                Source {
                    id: *id,
                    name: format!("unlisted {}", id.0),
                    channel: placement.channel,
                    category: parent.map_or(placement.category, |p| p.parent),
                    role_overwrites: parent
                        .map_or_else(HashMap::new, |p| p.role_overwrites.clone()),
                    listed: false,
                }
            })
            .collect();
        if !unlisted.is_empty() {
            self.sources.append(&mut unlisted);
            self.sources.sort_unstable_by_key(|s| s.id);
        }
        self
    }

    /// Sources whose messages count for `condition`.
    pub(crate) fn enumerate<'a>(
        &'a self,
        condition: &'a RoleCondition,
    ) -> impl Iterator<Item = &'a Source> + 'a {
        self.sources.iter().filter(|s| s.is_eligible_for(condition))
    }

    pub(crate) fn get(&self, id: ChannelId) -> Option<&Source> {
        self.sources
            .binary_search_by_key(&id, |s| s.id)
            .ok()
            .and_then(|i| self.sources.get(i))
    }

    /// Sources that are no longer listed by the platform.
    pub(crate) fn unlisted(&self) -> impl Iterator<Item = &Source> + '_ {
        self.sources.iter().filter(|s| !s.listed)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.sources.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScanOutcome {
    /// Messages sent at or after the requested `since`, in no particular order.
    pub(crate) messages: Vec<FetchedMessage>,
    pub(crate) cursor: Cursor,
    /// The page limit was hit and the next tick has more to fetch.
    pub(crate) capped: bool,
}

/// Fetches what the ledger is missing for one source.
///
/// Forward pages pick up everything newer than the cursor. When the ledger does not reach back
/// to `since` yet, backward pages continue from the coverage frontier. A source without a cursor
/// is read backwards from its newest message.
pub(crate) async fn scan<P: Platform + ?Sized>(
    platform: &P,
    source: ChannelId,
    prior: Option<Cursor>,
    since: UnixTime,
    started: UnixTime,
    max_pages: u32,
) -> Result<ScanOutcome, SourceError> {
    let fail = |cause: crate::util::Error| SourceError {
        source_id: source,
        cause,
    };

    let mut messages: Vec<FetchedMessage> = Vec::new();
    let mut capped = false;

    let mut last_seen: Option<MessageId> = prior.map(|c| c.last_seen);
    if let Some(Cursor { last_seen: from, .. }) = prior {
        let mut after = from;
        for page_no in 1..=max_pages {
            let page = platform
                .fetch_history(source, HistoryPage::After(after))
                .await
                .map_err(fail)?;
            let Some(newest) = page.iter().map(|m| m.id).max() else {
                break;
            };
            let full = page.len() as u64 >= HISTORY_PAGE_SIZE;
            after = newest.max(after);
            messages.extend(page);
            if !full {
                break;
            }
            if page_no == max_pages {
                capped = true;
            }
        }
        last_seen = Some(after);
    }

    let mut covered_since = prior.map_or(started, |c| c.covered_since);
    if covered_since > since {
        let mut before = prior.map(|c| c.covered_since.snowflake_floor());
        let mut reached = false;
        for page_no in 1..=max_pages {
            let page = platform
                .fetch_history(source, HistoryPage::Before(before))
                .await
                .map_err(fail)?;
            let Some(oldest) = page.iter().min_by_key(|m| m.id).map(|m| (m.id, m.sent_at)) else {
                reached = true;
                break;
            };
            if last_seen.is_none() {
                last_seen = page.iter().map(|m| m.id).max();
            }
            let full = page.len() as u64 >= HISTORY_PAGE_SIZE;
            messages.extend(page);
            let (oldest_id, oldest_at) = oldest;
            if !full || oldest_at < since {
                reached = true;
                break;
            }
            before = Some(oldest_id);
            covered_since = oldest_at.add_secs(1).min(covered_since);
            if page_no == max_pages {
                capped = true;
            }
        }
        if reached {
            covered_since = since;
        }
    }

    messages.retain(|m| m.sent_at >= since);
    let cursor = Cursor {
        last_seen: last_seen.unwrap_or_else(|| started.snowflake_floor()),
        covered_since,
    };
    if capped {
        debug!(
            channel = source.0,
            last_seen = cursor.last_seen.0,
            covered_since = cursor.covered_since.0,
            "Page limit reached, resuming next tick"
        );
    }
    Ok(ScanOutcome {
        messages,
        cursor,
        capped,
    })
}
