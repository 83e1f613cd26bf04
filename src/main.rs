use anyhow::Context as _;
use serenity::{framework::StandardFramework, prelude::Client};
use shuttle_secrets::SecretStore;
use sqlx::PgPool;
use tracing::info;

mod app_state;
mod bots;
mod commands;
mod db;
mod engine;
mod error;
mod immut_data;
#[cfg(test)]
mod test_support;
mod util;

use app_state::type_map_keys::ShardManagerKey;
use bots::{CfgExt, MainBot};
use commands::{BOT_HELP, GENERAL_GROUP, REWARDROLES_GROUP};
use immut_data::consts::DISCORD_INTENTS;

#[shuttle_runtime::main]
async fn serenity(
    #[shuttle_shared_db::Postgres] pool: PgPool,
    #[shuttle_secrets::Secrets] secret_store: SecretStore,
) -> shuttle_serenity::ShuttleSerenity {
    let bot = MainBot::new(pool, &secret_store)
        .await
        .context("Failed to initialize the bot")?;

    let framework = StandardFramework::new()
        .configure(|c| c.prefix(bot.discord_prefix()).owners(bot.owners().clone()))
        .help(&BOT_HELP)
        .group(&GENERAL_GROUP)
        .group(&REWARDROLES_GROUP);

    let client = Client::builder(bot.discord_token(), DISCORD_INTENTS)
        .framework(framework)
        .event_handler(bot)
        .await
        .context("Failed to create the client")?;

    {
        let mut data = client.data.write().await;
        data.insert::<ShardManagerKey>(client.shard_manager.clone());
    }
    info!("Client built, connecting to the gateway");

    Ok(client.into())
}
