//! The periodic reward-role evaluation engine.
//!
//! A tick walks every guild, brings each message source's slice of the activity ledger up to
//! date, counts qualifying messages per member and converges reward roles to the thresholds
//! configured through `rewardrole add`.

use std::time::Duration;

pub(crate) mod aggregate;
pub(crate) mod condition;
pub(crate) mod cursor;
pub(crate) mod discord;
pub(crate) mod evaluate;
pub(crate) mod ledger;
pub(crate) mod log;
pub(crate) mod platform;
pub(crate) mod reconcile;
pub(crate) mod scheduler;
pub(crate) mod source;
pub(crate) mod store;
pub(crate) mod time;

pub(crate) use condition::RoleCondition;
pub(crate) use cursor::Cursor;
pub(crate) use platform::Platform;
pub(crate) use scheduler::Scheduler;
pub(crate) use store::GuildStore;

/// Knobs of the scheduler, read from `Secrets.toml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EngineCfg {
    pub(crate) tick_interval: Duration,
    /// Soft deadline of a single guild pass. `None` lets a pass run to completion.
    pub(crate) guild_timeout: Option<Duration>,
    /// History pages fetched per source and direction in one tick.
    pub(crate) max_pages: u32,
}
