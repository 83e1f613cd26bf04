//! Prompts that wait for the invoking admin's next message.

use std::time::{Duration, Instant};

use serenity::model::prelude::{ChannelId, GuildId, UserId};

use crate::immut_data::consts::CONFIRMATION_TIMEOUT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Confirmation {
    Confirmed,
    Declined,
    TimedOut,
}

/// A pending `rewardrole reset`, answered with `yes` or `no`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResetPrompt {
    pub(crate) guild: GuildId,
    pub(crate) channel: ChannelId,
    pub(crate) author: UserId,
    pub(crate) asked_at: Instant,
}

impl ResetPrompt {
    pub(crate) fn new(guild: GuildId, channel: ChannelId, author: UserId) -> Self {
        Self {
            guild,
            channel,
            author,
            asked_at: Instant::now(),
        }
    }

    fn expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.asked_at) >= timeout
    }

    /// Anything but an explicit yes declines.
    pub(crate) fn answer(&self, reply: &str, now: Instant) -> Confirmation {
        if self.expired(now, CONFIRMATION_TIMEOUT) {
            return Confirmation::TimedOut;
        }
        match reply.trim().to_lowercase().as_str() {
            "yes" | "y" => Confirmation::Confirmed,
            _ => Confirmation::Declined,
        }
    }
}

#[derive(Default, Debug)]
pub(crate) struct ReqdPrompts {
    pub(crate) reset: Vec<ResetPrompt>,
}

impl ReqdPrompts {
    /// Starts a prompt, replacing an older one of the same admin in the same guild.
    pub(crate) fn ask_reset(&mut self, prompt: ResetPrompt) {
        self.reset
            .retain(|p| !(p.guild == prompt.guild && p.author == prompt.author));
        self.reset.push(prompt);
    }

    /// Resolves the prompt `author` has open in `channel`, if any.
    pub(crate) fn take_answer(
        &mut self,
        channel: ChannelId,
        author: UserId,
        reply: &str,
        now: Instant,
    ) -> Option<(ResetPrompt, Confirmation)> {
        let i = self
            .reset
            .iter()
            .position(|p| p.channel == channel && p.author == author)?;
        let prompt = self.reset.remove(i);
        let confirmation = prompt.answer(reply, now);
        Some((prompt, confirmation))
    }

    /// Drops and returns the prompts nobody answered in time.
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<ResetPrompt> {
        let (expired, pending): (Vec<ResetPrompt>, Vec<ResetPrompt>) =
            std::mem::take(&mut self.reset)
                .into_iter()
                .partition(|p| p.expired(now, CONFIRMATION_TIMEOUT));
        self.reset = pending;
        expired
    }
}
