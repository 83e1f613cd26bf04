use std::time::Duration;

use serenity::model::prelude::ChannelId;

use crate::immut_data::dynamic::CfgError;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("Sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Serenity error: {0}")]
    Serenity(#[from] serenity::Error),
    #[error("Configuration error: {0}")]
    Cfg(#[from] CfgError),
    #[error("Guild pass did not finish within {0:?}")]
    GuildTimeout(Duration),
}

pub(crate) type Result<T> = core::result::Result<T, Error>;

/// A single message source could not be read during a pass.
///
/// Never fatal to the guild pass: the source is skipped and its cursor stays put.
#[derive(Debug, thiserror::Error)]
#[error("Source {source_id} could not be scanned: {cause}")]
pub(crate) struct SourceError {
    pub(crate) source_id: ChannelId,
    pub(crate) cause: Error,
}
