//! Message facts already fetched from the guild's sources.
//!
//! Cursors only bound what has to be *fetched*; the counting window is evaluated over the
//! ledger, which keeps every fact of the widest configured window.

use std::collections::{HashMap, HashSet};

use serenity::model::prelude::{ChannelId, MessageId, UserId};

use super::{platform::FetchedMessage, time::UnixTime};
use crate::immut_data::dynamic::URL;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LedgerEntry {
    pub(crate) source: ChannelId,
    pub(crate) message: MessageId,
    pub(crate) author: UserId,
    pub(crate) sent_at: UnixTime,
    pub(crate) link_only: bool,
}

impl LedgerEntry {
    pub(crate) fn from_message(source: ChannelId, msg: &FetchedMessage) -> Self {
        Self {
            source,
            message: msg.id,
            author: msg.author,
            sent_at: msg.sent_at,
            link_only: is_link_only(&msg.content),
        }
    }
}

/// A message is link-only when it has at least one URL and nothing else but whitespace.
pub(crate) fn is_link_only(content: &str) -> bool {
    URL.is_match(content) && URL.replace_all(content, "").trim().is_empty()
}

#[derive(Debug, Default)]
pub(crate) struct Ledger {
    by_source: HashMap<ChannelId, Vec<LedgerEntry>>,
    seen: HashSet<MessageId>,
    /// Facts ingested during the current pass, not yet durable.
    staged: Vec<LedgerEntry>,
}

impl Ledger {
    pub(crate) fn from_committed(entries: impl IntoIterator<Item = LedgerEntry>) -> Self {
        let mut ledger = Self::default();
        for entry in entries {
            if ledger.seen.insert(entry.message) {
                ledger.by_source.entry(entry.source).or_default().push(entry);
            }
        }
        ledger
    }

    /// Returns `false` when the message was already known.
    pub(crate) fn ingest(&mut self, entry: LedgerEntry) -> bool {
        if !self.seen.insert(entry.message) {
            return false;
        }
        self.staged.push(entry.clone());
        self.by_source.entry(entry.source).or_default().push(entry);
        true
    }

    pub(crate) fn entries(&self, source: ChannelId) -> &[LedgerEntry] {
        self.by_source.get(&source).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn staged_len(&self) -> usize {
        self.staged.len()
    }

    pub(crate) fn into_staged(self) -> Vec<LedgerEntry> {
        self.staged
    }
}
