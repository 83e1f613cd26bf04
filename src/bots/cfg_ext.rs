use std::collections::HashSet;

use serenity::model::prelude::UserId;

use crate::{engine::EngineCfg, immut_data::dynamic::BotCfg};

/// Shorthands for bots that carry a [`BotCfg`] in a `cfg` field.
pub(crate) trait CfgExt {
    fn discord_token(&self) -> &str;
    fn discord_prefix(&self) -> &str;
    fn owners(&self) -> &HashSet<UserId>;
    fn engine_cfg(&self) -> EngineCfg;
    fn cfg(&self) -> BotCfg;
}

macro_rules! impl_cfg_ext {
    ($t:ty) => {
        impl crate::bots::CfgExt for $t {
            fn discord_token(&self) -> &str {
                &self.cfg.discord_token
            }

            fn discord_prefix(&self) -> &str {
                &self.cfg.discord_prefix
            }

            fn owners(&self) -> &std::collections::HashSet<serenity::model::prelude::UserId> {
                &self.cfg.owners
            }

            fn engine_cfg(&self) -> crate::engine::EngineCfg {
                self.cfg.engine
            }

            fn cfg(&self) -> crate::immut_data::dynamic::BotCfg {
                self.cfg.clone()
            }
        }
    };
}

pub(crate) use impl_cfg_ext;
