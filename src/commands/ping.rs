use serenity::{
    framework::standard::{macros::command, CommandResult},
    model::prelude::Message,
    prelude::Context,
    utils::MessageBuilder,
};

use crate::app_state::type_map_keys::BotCfgKey;

#[command]
#[description = "Check if the bot is still around."]
async fn ping(ctx: &Context, msg: &Message) -> CommandResult {
    let tick_hours = {
        let rlock = ctx.data.read().await;
        rlock
            .get::<BotCfgKey>()
            .map(|cfg| cfg.engine.tick_interval.as_secs() / 3600)
    };
    let mut response = MessageBuilder::new();
    response.push("Pong!");
    if let Some(hours) = tick_hours {
        response.push(format!(" Reward roles are checked every {hours} hours."));
    }
    msg.reply(ctx, response.build()).await?;

    Ok(())
}
