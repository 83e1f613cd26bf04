use serenity::{http::Http, model::prelude::ChannelId};

pub(crate) use crate::error::{Error, Result};

pub(crate) mod macros;

/// Sends `content` without pinging any of the roles, users or `@everyone` it mentions.
pub(crate) async fn say_wo_unintended_mentions(
    chan: ChannelId,
    http: impl AsRef<Http>,
    content: impl std::fmt::Display,
) -> serenity::Result<()> {
    chan.send_message(http, |m| {
        m.content(content)
            .allowed_mentions(|am| am.empty_parse())
    })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serenity::model::prelude::{RoleId, UserId};

    use super::macros::{i64_from_id, id_from_i64};

    #[test]
    fn snowflakes_survive_the_bigint_round_trip() {
        let user = UserId(1_146_091_424_870_445_107);
        let raw: i64 = i64_from_id!(user);
        assert_eq!(raw, 1_146_091_424_870_445_107);
        assert_eq!(id_from_i64!(UserId, raw), user);
        assert_eq!(id_from_i64!(RoleId, 0), RoleId(0));
    }
}
