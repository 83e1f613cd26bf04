use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use serenity::{
    async_trait,
    model::prelude::{Message, Ready},
    prelude::{Context, EventHandler, TypeMap},
};
use shuttle_secrets::SecretStore;
use sqlx::{Executor, PgPool};
use tokio::sync::RwLockWriteGuard;
use tracing::{error, info};

use crate::{
    app_state::{
        type_map_keys::{AppStateKey, BotCfgKey, PgStoreKey},
        AppState,
    },
    commands::finish_reset,
    db::PgStore,
    engine::{discord::SerenityPlatform, Scheduler},
    immut_data::{consts::SCHEMA, dynamic::BotCfg},
};

use super::cfg_ext::{impl_cfg_ext, CfgExt};

/// The bot structure that is used to
///
/// * populate the [Context::data] with run-time data during [EventHandler::ready].
/// * start the reward role scheduler once the gateway is up.
/// * resolve pending confirmation prompts in [EventHandler::message].
///
/// Note that commands do not have the direct access to the [MainBot] struct and
/// use [Context::data] instead.
pub(crate) struct MainBot {
    /// Conditions, settings and scan progress live in PostgreSQL so they survive restarts.
    pub(crate) store: Arc<PgStore>,
    /// The configuration of the bot.
    pub(crate) cfg: BotCfg,
    /// `ready` fires again after every reconnect; the scheduler must start only once.
    scheduler_started: AtomicBool,
}

impl MainBot {
    /// Creates a new instance of the bot and brings the database schema up to date.
    pub(crate) async fn new(pool: PgPool, secret_store: &SecretStore) -> crate::util::Result<Self> {
        let cfg = BotCfg::new(secret_store)?;
        pool.execute(SCHEMA).await?;
        Ok(Self {
            store: Arc::new(PgStore { pool }),
            cfg,
            scheduler_started: AtomicBool::new(false),
        })
    }
}

impl_cfg_ext!(MainBot);

/// Bots never answer prompts, and neither do commands: the command that opened a prompt
/// reaches the event handler too.
fn may_answer_prompt(author_is_bot: bool, content: &str, prefix: &str) -> bool {
    !author_is_bot && !content.starts_with(prefix)
}

#[async_trait]
impl EventHandler for MainBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        {
            let mut wlock: RwLockWriteGuard<TypeMap> = ctx.data.write().await;
            if !wlock.contains_key::<AppStateKey>() {
                wlock.insert::<AppStateKey>(AppState::default());
            }
            wlock.insert::<PgStoreKey>(Arc::clone(&self.store));
            wlock.insert::<BotCfgKey>(self.cfg());
        }

        info!(
            guilds = ready.guilds.len(),
            "{} is at your service", ready.user.name
        );

        if self.scheduler_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let platform = Arc::new(SerenityPlatform {
            http: Arc::clone(&ctx.http),
            cache: Arc::clone(&ctx.cache),
        });
        let scheduler = Scheduler::new(platform, Arc::clone(&self.store), self.engine_cfg());
        tokio::spawn(scheduler.run());
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if !may_answer_prompt(msg.author.bot, &msg.content, self.discord_prefix()) {
            return;
        }
        let answered = {
            let mut wlock = ctx.data.write().await;
            wlock.get_mut::<AppStateKey>().and_then(|app_state| {
                app_state.reqd_prompts.take_answer(
                    msg.channel_id,
                    msg.author.id,
                    &msg.content,
                    Instant::now(),
                )
            })
        };
        let Some((prompt, confirmation)) = answered else {
            return;
        };
        if let Err(e) = finish_reset(&ctx, &prompt, confirmation).await {
            error!(
                guild = prompt.guild.0,
                "Failed to carry out the reset prompt: {e}"
            );
        }
    }
}
