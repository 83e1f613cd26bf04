use self::reqd_prompts::ReqdPrompts;

pub(crate) mod reqd_prompts;
pub(crate) mod type_map_keys;

/// Run-time state shared by commands and the event handler through [`serenity::prelude::Context::data`].
#[derive(Default)]
pub(crate) struct AppState {
    pub(crate) reqd_prompts: ReqdPrompts,
}
