//! Module for Data Access Objects

use sqlx::FromRow;

/// Data Access Object for [`crate::engine::RoleCondition`].
#[derive(FromRow, Debug)]
pub(crate) struct RoleCondition {
    pub(crate) qualifying_role_id: i64,
    pub(crate) min_messages: i64,
    pub(crate) timeframe_secs: i64,
    pub(crate) reward_role_id: i64,
    pub(crate) excluded_roles: Vec<i64>,
    pub(crate) ignored_channels: Vec<i64>,
    pub(crate) ignored_categories: Vec<i64>,
    pub(crate) count_only_link_messages: bool,
}

/// Data Access Object for [`crate::engine::Cursor`].
#[derive(FromRow, Debug)]
pub(crate) struct ScanCursor {
    pub(crate) channel_id: i64,
    pub(crate) last_seen_message_id: i64,
    pub(crate) covered_since: i64,
}

/// Data Access Object for [`crate::engine::source::Placement`].
#[derive(FromRow, Debug)]
pub(crate) struct SourcePlacement {
    pub(crate) channel_id: i64,
    pub(crate) parent_channel_id: i64,
    pub(crate) category_id: Option<i64>,
}

/// Data Access Object for [`crate::engine::ledger::LedgerEntry`].
#[derive(FromRow, Debug)]
pub(crate) struct LedgerEntry {
    pub(crate) channel_id: i64,
    pub(crate) message_id: i64,
    pub(crate) author_id: i64,
    pub(crate) sent_at: i64,
    pub(crate) link_only: bool,
}
