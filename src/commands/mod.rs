use std::collections::HashSet;

use serenity::{
    framework::standard::{
        help_commands,
        macros::{group, help},
        Args, CommandGroup, CommandResult, HelpOptions,
    },
    model::prelude::{Message, UserId},
    prelude::Context,
};

mod ping;
mod rewardrole;
mod stop;

use ping::PING_COMMAND;
use rewardrole::REWARDROLE_COMMAND;
use stop::STOP_COMMAND;

pub(crate) use rewardrole::finish_reset;

#[group]
#[commands(ping, stop)]
struct General;

#[group]
#[only_in(guilds)]
#[required_permissions("MANAGE_GUILD")]
#[commands(rewardrole)]
struct RewardRoles;

#[help]
#[individual_command_tip = "Pass a command name as argument to learn more about it."]
#[command_not_found_text = "Could not find: `{}`."]
#[max_levenshtein_distance(3)]
#[indention_prefix = "+"]
// Admin-only commands are hidden from members who cannot run them.
#[lacking_permissions = "Hide"]
#[lacking_role = "Hide"]
#[wrong_channel = "Strike"]
async fn bot_help(
    context: &Context,
    msg: &Message,
    args: Args,
    help_options: &'static HelpOptions,
    groups: &[&'static CommandGroup],
    owners: HashSet<UserId>,
) -> CommandResult {
    let _ = help_commands::with_embeds(context, msg, args, help_options, groups, owners).await;
    Ok(())
}
