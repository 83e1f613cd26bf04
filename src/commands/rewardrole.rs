use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use serenity::{
    framework::standard::{macros::command, Args, CommandError, CommandResult},
    model::{
        channel::ChannelType,
        prelude::{ChannelId, GuildId, Message, RoleId},
    },
    prelude::Context,
};
use tracing::info;

use crate::{
    app_state::{
        reqd_prompts::{Confirmation, ResetPrompt},
        type_map_keys::{AppStateKey, PgStoreKey},
    },
    db::PgStore,
    engine::{GuildStore, RoleCondition},
    immut_data::{
        consts::{CONFIRMATION_TIMEOUT, MESSAGE_CHAR_LIMIT, SECONDS_PER_DAY},
        dynamic::{SNOWFLAKE_REF, WHITESPACE},
    },
    util::say_wo_unintended_mentions,
};

const ADD_USAGE: &str = "Usage: `rewardrole add <role> <min_messages> <timeframe_days> <reward_role> \
[excluded roles…] [ignored channels or categories…] [nolinks]`";

/// A role mention, a channel mention or a bare id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mention {
    Role(u64),
    Channel(u64),
    Id(u64),
}

impl Mention {
    pub(crate) fn parse(token: &str) -> Option<Self> {
        let caps = SNOWFLAKE_REF.captures(token)?;
        let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
        num(1)
            .map(Mention::Role)
            .or_else(|| num(2).map(Mention::Channel))
            .or_else(|| num(3).map(Mention::Id))
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub(crate) enum ArgError {
    #[error("Missing argument `{0}`.")]
    Missing(&'static str),
    #[error("`{value}` is not a valid {what}.")]
    Invalid { what: &'static str, value: String },
    #[error("`{0}` is neither a role nor a channel.")]
    Unrecognized(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AddArgs {
    pub(crate) qualifying_role: RoleId,
    pub(crate) min_messages: u64,
    pub(crate) timeframe_days: u64,
    pub(crate) reward_role: RoleId,
    pub(crate) excluded_roles: BTreeSet<RoleId>,
    /// Channels and categories, told apart once the guild's channel list is known.
    pub(crate) ignored: BTreeSet<ChannelId>,
    pub(crate) count_only_link_messages: bool,
}

impl AddArgs {
    pub(crate) fn into_condition(self, categories: &HashSet<ChannelId>) -> RoleCondition {
        let (ignored_categories, ignored_channels) =
            self.ignored.into_iter().partition(|c| categories.contains(c));
        RoleCondition {
            qualifying_role: self.qualifying_role,
            min_messages: self.min_messages,
            timeframe: Duration::from_secs(self.timeframe_days.saturating_mul(SECONDS_PER_DAY)),
            reward_role: self.reward_role,
            excluded_roles: self.excluded_roles,
            ignored_channels,
            ignored_categories,
            count_only_link_messages: self.count_only_link_messages,
        }
    }
}

fn role_arg(token: Option<&str>, name: &'static str) -> Result<RoleId, ArgError> {
    let token = token.ok_or(ArgError::Missing(name))?;
    match Mention::parse(token) {
        Some(Mention::Role(id) | Mention::Id(id)) => Ok(RoleId(id)),
        _ => Err(ArgError::Invalid {
            what: "role",
            value: token.to_owned(),
        }),
    }
}

fn channel_arg(token: Option<&str>, name: &'static str) -> Result<ChannelId, ArgError> {
    let token = token.ok_or(ArgError::Missing(name))?;
    match Mention::parse(token) {
        Some(Mention::Channel(id) | Mention::Id(id)) => Ok(ChannelId(id)),
        _ => Err(ArgError::Invalid {
            what: "channel",
            value: token.to_owned(),
        }),
    }
}

fn number_arg(token: Option<&str>, name: &'static str) -> Result<u64, ArgError> {
    let token = token.ok_or(ArgError::Missing(name))?;
    token.parse::<u64>().map_err(|_| ArgError::Invalid {
        what: name,
        value: token.to_owned(),
    })
}

/// Parses the arguments of `rewardrole add`. Bare ids are roles when `guild_roles` knows them.
pub(crate) fn parse_add(args: &str, guild_roles: &HashSet<RoleId>) -> Result<AddArgs, ArgError> {
    let mut tokens = args.split_whitespace();
    let qualifying_role = role_arg(tokens.next(), "role")?;
    let min_messages = number_arg(tokens.next(), "min_messages")?;
    let timeframe_days = number_arg(tokens.next(), "timeframe_days")?;
    if timeframe_days == 0 {
        return Err(ArgError::Invalid {
            what: "timeframe_days",
            value: "0".to_owned(),
        });
    }
    let reward_role = role_arg(tokens.next(), "reward_role")?;

    let mut parsed = AddArgs {
        qualifying_role,
        min_messages,
        timeframe_days,
        reward_role,
        excluded_roles: BTreeSet::new(),
        ignored: BTreeSet::new(),
        count_only_link_messages: true,
    };
    for token in tokens {
        if token.eq_ignore_ascii_case("nolinks") {
            parsed.count_only_link_messages = false;
            continue;
        }
        match Mention::parse(token) {
            Some(Mention::Role(id)) => {
                parsed.excluded_roles.insert(RoleId(id));
            }
            Some(Mention::Id(id)) if guild_roles.contains(&RoleId(id)) => {
                parsed.excluded_roles.insert(RoleId(id));
            }
            Some(Mention::Channel(id) | Mention::Id(id)) => {
                parsed.ignored.insert(ChannelId(id));
            }
            None => return Err(ArgError::Unrecognized(token.to_owned())),
        }
    }
    Ok(parsed)
}

/// Breaks a block too long for one message at line ends and spaces, and only mid-word when
/// a single word is over the limit.
fn split_block(block: &str) -> Vec<String> {
    if block.chars().count() <= MESSAGE_CHAR_LIMIT {
        return vec![block.to_owned()];
    }
    let mut parts: Vec<String> = Vec::new();
    let mut part = String::new();
    let mut len = 0;
    for piece in block.split_inclusive([' ', '\n']) {
        let piece_len = piece.chars().count();
        if len + piece_len > MESSAGE_CHAR_LIMIT && !part.is_empty() {
            parts.push(std::mem::take(&mut part));
            len = 0;
        }
        if piece_len > MESSAGE_CHAR_LIMIT {
            let chars: Vec<char> = piece.chars().collect();
            parts.extend(chars.chunks(MESSAGE_CHAR_LIMIT).map(|c| c.iter().collect::<String>()));
            continue;
        }
        part.push_str(piece);
        len += piece_len;
    }
    if !part.is_empty() {
        parts.push(part);
    }
    parts
}

/// Splits `blocks` into as few messages as the length limit allows.
fn paginate(blocks: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut pages: Vec<String> = Vec::new();
    let mut page = String::new();
    for block in blocks.into_iter().flat_map(|b| split_block(&b)) {
        if !page.is_empty() && page.chars().count() + block.chars().count() + 2 > MESSAGE_CHAR_LIMIT {
            pages.push(std::mem::take(&mut page));
        }
        if !page.is_empty() {
            page.push_str("\n\n");
        }
        page.push_str(&block);
    }
    if !page.is_empty() {
        pages.push(page);
    }
    pages
}

fn guild_of(msg: &Message) -> Result<GuildId, CommandError> {
    msg.guild_id
        .ok_or_else(|| CommandError::from("This command only works in a server."))
}

async fn pg_store(ctx: &Context) -> Result<Arc<PgStore>, CommandError> {
    let rlock = ctx.data.read().await;
    rlock
        .get::<PgStoreKey>()
        .cloned()
        .ok_or_else(|| CommandError::from("The database is not available yet."))
}

async fn say(ctx: &Context, msg: &Message, content: impl std::fmt::Display) -> CommandResult {
    say_wo_unintended_mentions(msg.channel_id, &ctx.http, content).await?;
    Ok(())
}

#[command]
#[only_in(guilds)]
#[required_permissions("MANAGE_GUILD")]
#[description = "Configure roles that are rewarded for recent activity."]
#[sub_commands(add, remove, list, logs, reset)]
async fn rewardrole(ctx: &Context, msg: &Message) -> CommandResult {
    let subcommands = REWARDROLE_COMMAND_OPTIONS.sub_commands;
    let names = subcommands
        .iter()
        .filter_map(|sub| sub.options.names.first())
        .map(|name| format!("`{name}`"))
        .collect::<Vec<_>>()
        .join(", ");
    say(ctx, msg, format!("Try one of the following subcommands: {names}")).await
}

#[command]
#[only_in(guilds)]
#[required_permissions("MANAGE_GUILD")]
#[description = "Add or replace the condition of a role. Append `nolinks` to ignore link-only messages."]
async fn add(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let guild = guild_of(msg)?;
    let store = pg_store(ctx).await?;

    let guild_roles: HashSet<RoleId> = guild.roles(&ctx.http).await?.into_keys().collect();
    let parsed = match parse_add(args.rest(), &guild_roles) {
        Ok(parsed) => parsed,
        Err(e) => return say(ctx, msg, format!("{e}\n{ADD_USAGE}")).await,
    };
    for role in [parsed.qualifying_role, parsed.reward_role] {
        if !guild_roles.contains(&role) {
            return say(ctx, msg, format!("There is no role {} in this server.", role.0)).await;
        }
    }

    let categories: HashSet<ChannelId> = guild
        .channels(&ctx.http)
        .await?
        .into_values()
        .filter(|c| c.kind == ChannelType::Category)
        .map(|c| c.id)
        .collect();
    let condition = parsed.into_condition(&categories);
    let replaced = store.put_condition(guild, &condition).await?;
    info!(
        guild = guild.0,
        role = condition.qualifying_role.0,
        replaced,
        "Role condition stored"
    );

    let verb = if replaced { "replaced" } else { "added" };
    say(
        ctx,
        msg,
        format!(
            "Role condition for <@&{}> {verb} successfully.",
            condition.qualifying_role.0
        ),
    )
    .await
}

#[command]
#[only_in(guilds)]
#[required_permissions("MANAGE_GUILD")]
#[description = "Remove the condition of a role."]
async fn remove(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let guild = guild_of(msg)?;
    let store = pg_store(ctx).await?;
    let role = match role_arg(args.rest().split_whitespace().next(), "role") {
        Ok(role) => role,
        Err(e) => return say(ctx, msg, format!("{e}\nUsage: `rewardrole remove <role>`")).await,
    };

    let response = if store.remove_condition(guild, role).await? {
        format!("Role condition for <@&{}> removed successfully.", role.0)
    } else {
        format!("No role condition found for <@&{}>.", role.0)
    };
    say(ctx, msg, response).await
}

#[command]
#[only_in(guilds)]
#[required_permissions("MANAGE_GUILD")]
#[description = "List the configured role conditions."]
async fn list(ctx: &Context, msg: &Message) -> CommandResult {
    let guild = guild_of(msg)?;
    let store = pg_store(ctx).await?;
    let conditions = store.conditions(guild).await?;
    if conditions.is_empty() {
        return say(ctx, msg, "No role conditions have been configured.").await;
    }

    let log_line = match store.log_channel(guild).await? {
        Some(channel) => format!("Log channel: <#{}>", channel.0),
        None => "Log channel: none".to_owned(),
    };
    let blocks = conditions
        .iter()
        .map(RoleCondition::describe)
        .chain(std::iter::once(log_line));
    for page in paginate(blocks) {
        say(ctx, msg, page).await?;
    }
    Ok(())
}

#[command]
#[only_in(guilds)]
#[required_permissions("MANAGE_GUILD")]
#[description = "Set the channel diagnostics are written to, or `off`."]
async fn logs(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let guild = guild_of(msg)?;
    let store = pg_store(ctx).await?;
    let arg = WHITESPACE.replace_all(args.rest().trim(), " ");

    if arg.eq_ignore_ascii_case("off") {
        store.set_log_channel(guild, None).await?;
        return say(ctx, msg, "Logging channel has been cleared.").await;
    }
    let channel = match channel_arg(arg.split(' ').next().filter(|s| !s.is_empty()), "channel") {
        Ok(channel) => channel,
        Err(e) => {
            return say(ctx, msg, format!("{e}\nUsage: `rewardrole logs <channel>|off`")).await
        }
    };
    if !guild.channels(&ctx.http).await?.contains_key(&channel) {
        return say(ctx, msg, format!("There is no channel {} in this server.", channel.0)).await;
    }

    store.set_log_channel(guild, Some(channel)).await?;
    say(
        ctx,
        msg,
        format!("Logging channel has been set to: <#{}>", channel.0),
    )
    .await
}

#[command]
#[only_in(guilds)]
#[required_permissions("MANAGE_GUILD")]
#[description = "Forget every condition, the log channel and all scan progress of this server."]
async fn reset(ctx: &Context, msg: &Message) -> CommandResult {
    let guild = guild_of(msg)?;
    {
        let mut wlock = ctx.data.write().await;
        let app_state = wlock
            .get_mut::<AppStateKey>()
            .ok_or_else(|| CommandError::from("The bot is still starting up."))?;
        app_state
            .reqd_prompts
            .ask_reset(ResetPrompt::new(guild, msg.channel_id, msg.author.id));
    }
    say(
        ctx,
        msg,
        format!(
            "<@{}> This deletes every reward role condition, the log channel and all scan \
             progress of this server. Reply `yes` within {} seconds to confirm.",
            msg.author.id.0,
            CONFIRMATION_TIMEOUT.as_secs()
        ),
    )
    .await?;

    let data = Arc::clone(&ctx.data);
    let http = Arc::clone(&ctx.http);
    tokio::spawn(async move {
        tokio::time::sleep(CONFIRMATION_TIMEOUT).await;
        let expired = {
            let mut wlock = data.write().await;
            wlock
                .get_mut::<AppStateKey>()
                .map(|s| s.reqd_prompts.expire(Instant::now()))
                .unwrap_or_default()
        };
        for prompt in expired {
            if let Err(e) = say_wo_unintended_mentions(
                prompt.channel,
                &http,
                confirmation_reply(Confirmation::TimedOut),
            )
            .await
            {
                tracing::warn!(guild = prompt.guild.0, "Failed to announce the expired reset: {e}");
            }
        }
    });
    Ok(())
}

fn confirmation_reply(confirmation: Confirmation) -> &'static str {
    match confirmation {
        Confirmation::Confirmed => "All reward role data of this server has been deleted.",
        Confirmation::Declined => "Reset cancelled.",
        Confirmation::TimedOut => "Reset cancelled: no answer arrived in time.",
    }
}

/// Carries out a `rewardrole reset` once its prompt has been answered.
pub(crate) async fn finish_reset(
    ctx: &Context,
    prompt: &ResetPrompt,
    confirmation: Confirmation,
) -> CommandResult {
    if confirmation == Confirmation::Confirmed {
        let store = pg_store(ctx).await?;
        store.clear(prompt.guild).await?;
        info!(guild = prompt.guild.0, admin = prompt.author.0, "Guild state reset");
    }
    say_wo_unintended_mentions(prompt.channel, &ctx.http, confirmation_reply(confirmation))
        .await?;
    Ok(())
}
