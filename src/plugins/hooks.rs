use crate::adapters::onebot::LockedWriter;
use crate::command::match_command;
use crate::config::build_config;
use crate::event::{Context, EventType};
use crate::manager::group_manager;
use crate::manager::plugins::{PluginMeta, PluginType};
use crate::models::ban_user;
use crate::plugins::PluginError;
use crate::warn;
use futures_util::future::BoxFuture;
use serde::Serialize;
use toml::Value;

pub const META: PluginMeta = PluginMeta {
    plugin_type: PluginType::Hidden,
    ..PluginMeta::new("hooks", "事件预处理")
};

#[derive(Serialize)]
struct HooksConfig {
    enabled: bool,
}

pub fn default_config() -> Value {
    build_config(HooksConfig { enabled: true })
}

/// 位于流水线最前：过滤心跳与多余响应，拦截休眠群与黑名单用户
pub fn handle(
    ctx: Context,
    _writer: LockedWriter,
) -> BoxFuture<'static, Result<Option<Context>, PluginError>> {
    Box::pin(async move {
        let EventType::Onebot(_) = &ctx.event else {
            return Ok(Some(ctx));
        };
        // 心跳，以及没有 post_type 的无人等待的 API 响应
        if matches!(ctx.post_type(), Some("meta_event") | None) {
            return Ok(None);
        }

        if let Some(group_id) = ctx.group_id()
            && !group_manager().check_group_bot_status(group_id)
            && match_command(&ctx, "醒来").is_none()
        {
            return Ok(None);
        }

        if ctx.as_message().is_some()
            && let Some(user_id) = ctx.user_id()
            && !ctx.is_superuser(user_id)
        {
            match ban_user::is_banned(&ctx.db, user_id).await {
                Ok(true) => return Ok(None),
                Ok(false) => {}
                Err(e) => warn!(target: "Hooks", "查询黑名单失败: {}", e),
            }
        }

        Ok(Some(ctx))
    })
}
