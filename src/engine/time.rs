use core::convert::identity as id;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serenity::model::{prelude::MessageId, Timestamp};

use crate::immut_data::consts::DISCORD_EPOCH_MS;

/// Whole seconds since the unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct UnixTime(pub(crate) i64);

impl UnixTime {
    pub(crate) fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        #[allow(clippy::cast_possible_wrap)]
        let secs = id::<u64>(secs) as i64;
        UnixTime(secs)
    }

    pub(crate) fn from_timestamp(timestamp: &Timestamp) -> Self {
        UnixTime(timestamp.unix_timestamp())
    }

    pub(crate) fn saturating_sub(self, span: Duration) -> Self {
        let span = i64::try_from(span.as_secs()).unwrap_or(i64::MAX);
        UnixTime(self.0.saturating_sub(span))
    }

    pub(crate) fn add_secs(self, secs: i64) -> Self {
        UnixTime(self.0.saturating_add(secs))
    }

    /// The smallest snowflake that can belong to a message sent during this second.
    ///
    /// Seconds before the Discord epoch map to the zero snowflake.
    pub(crate) fn snowflake_floor(self) -> MessageId {
        let ms = u64::try_from(self.0.max(0))
            .unwrap_or_default()
            .saturating_mul(1000);
        MessageId(ms.saturating_sub(DISCORD_EPOCH_MS) << 22)
    }

    pub(crate) fn of_snowflake(MessageId(snowflake): MessageId) -> Self {
        let ms = (snowflake >> 22) + DISCORD_EPOCH_MS;
        #[allow(clippy::cast_possible_wrap)]
        let secs = id::<u64>(ms / 1000) as i64;
        UnixTime(secs)
    }
}
