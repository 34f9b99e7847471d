use crate::adapters::onebot::{LockedWriter, reply};
use crate::command::match_command;
use crate::config::build_config;
use crate::event::Context;
use crate::manager::plugins::{PluginMeta, PluginType};
use crate::manager::{group_manager, plugins_manager};
use crate::message::Message;
use crate::permission;
use crate::plugins::PluginError;
use crate::plugins::help::build::{BuildType, HelpImageBuild};
use crate::utils::paths::image_path;
use crate::utils::remove_if_exists;
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::path::PathBuf;
use toml::Value;

pub const META: PluginMeta = PluginMeta {
    plugin_type: PluginType::Superuser,
    usage: "超级用户帮助",
    commands: &["超级用户帮助"],
    ..PluginMeta::new("super_help", "超级用户帮助")
};

static SUPER_BUILDER: HelpImageBuild = HelpImageBuild::new(PluginType::Superuser);

#[derive(Serialize)]
struct SuperHelpConfig {
    enabled: bool,
}

pub fn default_config() -> Value {
    build_config(SuperHelpConfig { enabled: true })
}

fn help_file() -> PathBuf {
    image_path().join("SUPERUSER_HELP.png")
}

pub fn init(_ctx: Context) -> BoxFuture<'static, Result<(), PluginError>> {
    Box::pin(async move {
        remove_if_exists(&help_file())?;
        Ok(())
    })
}

pub fn handle(
    ctx: Context,
    writer: LockedWriter,
) -> BoxFuture<'static, Result<Option<Context>, PluginError>> {
    Box::pin(async move {
        if match_command(&ctx, "超级用户帮助").is_none() || !permission::is_superuser(&ctx) {
            return Ok(Some(ctx));
        }

        let file = help_file();
        if !file.exists() {
            let target = file.clone();
            tokio::task::spawn_blocking(move || {
                SUPER_BUILDER
                    .build_image(group_manager(), plugins_manager(), None, BuildType::Normal)
                    .and_then(|img| img.save(&target))
            })
            .await??;
        }
        reply(&ctx, writer, Message::new().image(file)).await?;
        Ok(None)
    })
}
