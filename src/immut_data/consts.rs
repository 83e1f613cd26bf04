use std::time::Duration;

use serenity::prelude::GatewayIntents;

pub(crate) const SCHEMA: &str = include_str!("../../schema.pgsql");

pub(crate) const DISCORD_INTENTS: GatewayIntents = {
    let guilds = GatewayIntents::GUILDS.bits();
    let members = GatewayIntents::GUILD_MEMBERS.bits();
    let messages = GatewayIntents::GUILD_MESSAGES.bits();
    let content = GatewayIntents::MESSAGE_CONTENT.bits();
    match GatewayIntents::from_bits(guilds | members | messages | content) {
        Some(intents) => intents,
        None => panic!("Invalid intents"),
    }
};

/// Milliseconds between the unix epoch and the first second of 2015, the epoch of Discord snowflakes.
pub(crate) const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

/// Largest page the history endpoint hands out.
pub(crate) const HISTORY_PAGE_SIZE: u64 = 100;

/// Largest page the guild member endpoint hands out.
pub(crate) const MEMBER_PAGE_SIZE: u64 = 1000;

pub(crate) const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) const DEFAULT_PREFIX: &str = "!";
pub(crate) const DEFAULT_TICK_HOURS: u64 = 4;
pub(crate) const DEFAULT_GUILD_TIMEOUT_MINUTES: u64 = 30;
pub(crate) const DEFAULT_MAX_PAGES: u32 = 50;

pub(crate) const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Longest message Discord accepts, in characters.
pub(crate) const MESSAGE_CHAR_LIMIT: usize = 2000;

/// Pause between the gateway becoming ready and the first tick, so that the cache fills up.
pub(crate) const SCHEDULER_SETTLE_DELAY: Duration = Duration::from_secs(15);
