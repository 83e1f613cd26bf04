use std::{collections::HashSet, str::FromStr, time::Duration};

use once_cell::sync::Lazy;
use regex::Regex;
use serenity::model::prelude::UserId;
use shuttle_secrets::SecretStore;

use crate::engine::EngineCfg;

use super::consts::{
    DEFAULT_GUILD_TIMEOUT_MINUTES, DEFAULT_MAX_PAGES, DEFAULT_PREFIX, DEFAULT_TICK_HOURS,
};

pub(crate) static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\n\r\t]+").unwrap());

/// Anything a Discord client would render as a clickable link.
pub(crate) static URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:https?|ftp)://[^\s<>]+|<https?://[^\s>]+>").unwrap());

/// Role mention (`<@&123>`), channel mention (`<#123>`) or a bare snowflake.
pub(crate) static SNOWFLAKE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:<@&(\d{1,20})>|<#(\d{1,20})>|(\d{1,20}))$").unwrap());

#[derive(Debug, thiserror::Error)]
pub(crate) enum CfgError {
    #[error("Secret `{0}` is required but missing")]
    Missing(&'static str),
    #[error("Secret `{key}` has an invalid value `{value}`")]
    Invalid { key: &'static str, value: String },
}

/// The configuration of the bot.
#[derive(Debug, Clone)]
pub(crate) struct BotCfg {
    pub(crate) discord_token: String,
    pub(crate) discord_prefix: String,
    pub(crate) owners: HashSet<UserId>,
    pub(crate) engine: EngineCfg,
}

impl BotCfg {
    pub(crate) fn new(secret_store: &SecretStore) -> Result<Self, CfgError> {
        Self::from_lookup(|key| secret_store.get(key))
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CfgError> {
        let discord_token = lookup("DISCORD_TOKEN").ok_or(CfgError::Missing("DISCORD_TOKEN"))?;
        let discord_prefix = lookup("DISCORD_PREFIX").unwrap_or_else(|| DEFAULT_PREFIX.to_owned());

        let owners = match lookup("BOT_OWNERS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<u64>().map(UserId).map_err(|_| CfgError::Invalid {
                        key: "BOT_OWNERS",
                        value: raw.clone(),
                    })
                })
                .collect::<Result<HashSet<_>, _>>()?,
            None => HashSet::new(),
        };

        let tick_hours: u64 = parsed(&lookup, "REWARDROLE_TICK_HOURS", DEFAULT_TICK_HOURS)?;
        if tick_hours == 0 {
            return Err(CfgError::Invalid {
                key: "REWARDROLE_TICK_HOURS",
                value: tick_hours.to_string(),
            });
        }
        let timeout_minutes: u64 = parsed(
            &lookup,
            "REWARDROLE_GUILD_TIMEOUT_MINUTES",
            DEFAULT_GUILD_TIMEOUT_MINUTES,
        )?;
        let max_pages: u32 = parsed(&lookup, "REWARDROLE_MAX_PAGES", DEFAULT_MAX_PAGES)?;

        let engine = EngineCfg {
            tick_interval: Duration::from_secs(tick_hours * 60 * 60),
            guild_timeout: (timeout_minutes > 0).then(|| Duration::from_secs(timeout_minutes * 60)),
            max_pages: max_pages.max(1),
        };

        Ok(Self {
            discord_token,
            discord_prefix,
            owners,
            engine,
        })
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, CfgError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| CfgError::Invalid { key, value }),
        None => Ok(default),
    }
}
