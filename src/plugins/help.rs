use crate::adapters::onebot::{LockedWriter, reply};
use crate::command::match_command;
use crate::config::build_config;
use crate::event::Context;
use crate::manager::plugins::{PluginMeta, PluginType, get_meta, get_plugin_module};
use crate::manager::{group_manager, plugins_manager};
use crate::message::Message;
use crate::permission;
use crate::plugins::{PluginError, get_config};
use crate::utils::paths::{group_help_path, image_path};
use crate::utils::{clear_dir_files, remove_if_exists};
use crate::{info, warn};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use toml::Value;

pub mod build;

use build::{BuildType, HelpImageBuild};

pub const META: PluginMeta = PluginMeta {
    plugin_type: PluginType::Hidden,
    usage: "帮助 [功能名称]",
    commands: &["帮助"],
    ..PluginMeta::new("help", "帮助")
};

static HELP_BUILDER: HelpImageBuild = HelpImageBuild::new(PluginType::Normal);

#[derive(Serialize, Deserialize)]
struct HelpConfig {
    enabled: bool,
    /// "normal" 或 "VV"
    #[serde(rename = "type")]
    build_type: String,
}

impl Default for HelpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            build_type: "normal".to_string(),
        }
    }
}

pub fn default_config() -> Value {
    build_config(HelpConfig::default())
}

/// 清理旧的帮助图片缓存
pub fn init(_ctx: Context) -> BoxFuture<'static, Result<(), PluginError>> {
    Box::pin(async move {
        std::fs::create_dir_all(group_help_path())?;
        let removed = clear_dir_files(&group_help_path())?;
        remove_if_exists(&simple_help_file())?;
        if removed > 0 {
            info!(target: "Help", "已清理 {} 张群帮助图片缓存", removed);
        }
        Ok(())
    })
}

fn simple_help_file() -> PathBuf {
    image_path().join("simple_help.png")
}

fn help_file(group_id: Option<i64>) -> PathBuf {
    match group_id {
        Some(gid) => group_help_path().join(format!("{}.png", gid)),
        None => simple_help_file(),
    }
}

/// 功能的使用说明，超级用户功能只对超级用户可见
fn usage_for(name: &str, is_super: bool) -> Option<&'static PluginMeta> {
    get_plugin_module(name, true)
        .into_iter()
        .filter_map(get_meta)
        .find(|m| match m.plugin_type {
            PluginType::Normal | PluginType::Admin => true,
            PluginType::Superuser => is_super,
            PluginType::Hidden => false,
        })
}

pub fn handle(
    ctx: Context,
    writer: LockedWriter,
) -> BoxFuture<'static, Result<Option<Context>, PluginError>> {
    Box::pin(async move {
        let Some(m) = match_command(&ctx, "帮助") else {
            return Ok(Some(ctx));
        };
        let name = m.text();

        if !name.is_empty() {
            let text = match usage_for(&name, permission::is_superuser(&ctx)) {
                Some(meta) if !meta.usage.is_empty() => format!("{}\n{}", meta.name, meta.usage),
                Some(meta) => format!("{} 暂无使用说明", meta.name),
                None => format!("没有找到功能 {} 的帮助...", name),
            };
            reply(&ctx, writer, Message::from(text)).await?;
            return Ok(None);
        }

        let group_id = ctx.group_id();
        let file = help_file(group_id);
        if !file.exists() {
            let config: HelpConfig = get_config(&ctx, "help").unwrap_or_default();
            let build_type = BuildType::parse(&config.build_type);
            let target = file.clone();
            tokio::task::spawn_blocking(move || {
                HELP_BUILDER
                    .build_image(group_manager(), plugins_manager(), group_id, build_type)
                    .and_then(|img| img.save(&target))
            })
            .await??;
        }

        let msg = Message::new().image(file);
        if msg.is_empty() {
            warn!(target: "Help", "帮助图片生成后仍不存在");
            return Ok(None);
        }
        reply(&ctx, writer, msg).await?;
        Ok(None)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_file_paths() {
        assert_eq!(help_file(Some(123)), group_help_path().join("123.png"));
        assert_eq!(help_file(None), image_path().join("simple_help.png"));
    }

    #[test]
    fn usage_lookup_respects_plugin_type() {
        assert_eq!(usage_for("戳一戳", false).map(|m| m.module), Some("poke"));
        assert!(usage_for("更新色图", false).is_none());
        assert_eq!(usage_for("更新色图", true).map(|m| m.module), Some("gallery"));
        assert!(usage_for("事件预处理", true).is_none());
    }

    #[test]
    fn normal_menu_has_no_hidden_plugins() {
        for (_, metas) in HELP_BUILDER.sort_data() {
            assert!(metas.iter().all(|m| m.plugin_type == PluginType::Normal));
        }
    }
}
