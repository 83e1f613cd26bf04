use serenity::{
    framework::standard::{macros::command, CommandResult},
    model::prelude::Message,
    prelude::Context,
};
use tracing::info;

use crate::app_state::type_map_keys::ShardManagerKey;

#[command]
#[owners_only]
#[description = "Disconnect the bot from every server."]
async fn stop(ctx: &Context, msg: &Message) -> CommandResult {
    let data = ctx.data.read().await;

    if let Some(sm) = data.get::<ShardManagerKey>() {
        msg.reply(ctx, "Shutting down!").await?;
        info!(owner = msg.author.id.0, "Shutdown requested");
        let mut wlock = sm.lock().await;
        wlock.shutdown_all().await;
    } else {
        msg.reply(ctx, "There was a problem getting the shard manager")
            .await?;
    }
    Ok(())
}
