use std::fmt::Display;

use serenity::model::prelude::{ChannelId, GuildId};
use tracing::{info, warn};

use super::platform::Platform;
use crate::immut_data::consts::MESSAGE_CHAR_LIMIT;

/// Diagnostics of a guild pass, mirrored to the guild's log channel when one is configured.
pub(crate) struct GuildLog<'a, P: Platform + ?Sized> {
    platform: &'a P,
    guild: GuildId,
    channel: Option<ChannelId>,
}

impl<'a, P: Platform + ?Sized> GuildLog<'a, P> {
    pub(crate) fn new(platform: &'a P, guild: GuildId, channel: Option<ChannelId>) -> Self {
        Self {
            platform,
            guild,
            channel,
        }
    }

    /// Something an admin should fix or at least know about.
    pub(crate) async fn problem(&self, text: impl Display) {
        let text = text.to_string();
        warn!(guild = self.guild.0, "{text}");
        self.post(&text).await;
    }

    pub(crate) async fn summary(&self, text: impl Display) {
        let text = text.to_string();
        info!(guild = self.guild.0, "{text}");
        self.post(&text).await;
    }

    async fn post(&self, text: &str) {
        let Some(channel) = self.channel else {
            return;
        };
        let text = truncated(text);
        if let Err(e) = self.platform.send_message(channel, &text).await {
            // never worth failing a pass over
            warn!(
                guild = self.guild.0,
                channel = channel.0,
                "Failed to write to the log channel: {e}"
            );
        }
    }
}

fn truncated(text: &str) -> String {
    if text.chars().count() <= MESSAGE_CHAR_LIMIT {
        return text.to_owned();
    }
    let mut short: String = text.chars().take(MESSAGE_CHAR_LIMIT - 1).collect();
    short.push('…');
    short
}
