use crate::adapters::onebot::{LockedWriter, reply, send_msg};
use crate::command::match_command;
use crate::config::build_config;
use crate::event::Context;
use crate::manager::plugins::{PluginMeta, PluginType};
use crate::message::Message;
use crate::permission;
use crate::plugins::{PluginError, get_config};
use crate::scheduler::parse_hms;
use crate::utils::paths::{image_path, temp_path, text_path};
use crate::{error, info, warn};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use toml::Value;

pub mod data_source;

pub const META: PluginMeta = PluginMeta {
    plugin_type: PluginType::Superuser,
    usage: "更新色图: 下载缺失的图片并计算哈希",
    commands: &["更新色图"],
    ..PluginMeta::new("gallery", "更新色图")
};

#[derive(Serialize, Deserialize)]
struct GalleryConfig {
    enabled: bool,
    /// 是否每日自动更新
    auto_update: bool,
    update_time: String,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_update: true,
            update_time: "04:30:00".to_string(),
        }
    }
}

pub fn default_config() -> Value {
    build_config(GalleryConfig::default())
}

static UPDATING: AtomicBool = AtomicBool::new(false);

pub fn init(ctx: Context) -> BoxFuture<'static, Result<(), PluginError>> {
    Box::pin(async move {
        data_source::import_legacy_data(&ctx.db, &text_path()).await?;
        data_source::remove_rar_dirs(&image_path());
        Ok(())
    })
}

/// 执行一次更新，并按需私聊第一个超级用户
async fn run_update(ctx: &Context, writer: LockedWriter, flag: bool) -> Result<(), PluginError> {
    if UPDATING.swap(true, Ordering::SeqCst) {
        return Err("色图正在更新中".into());
    }
    let result = data_source::update_gallery(&ctx.db, &image_path(), &temp_path()).await;
    UPDATING.store(false, Ordering::SeqCst);
    let report = result?;

    info!(
        target: "Gallery",
        "更新完成，共 {} 张，更新 {} 张，错误 {} 类",
        report.count,
        report.success,
        report.errors.len()
    );
    if !report.should_notify(flag) {
        return Ok(());
    }
    let superuser = ctx.config.read().ok().and_then(|c| c.first_superuser());
    if let Some(su) = superuser {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        send_msg(ctx, writer, None, Some(su), Message::from(report.message(&now))).await?;
    }
    Ok(())
}

pub fn on_connected(
    ctx: Context,
    writer: LockedWriter,
) -> BoxFuture<'static, Result<Option<Context>, PluginError>> {
    Box::pin(async move {
        let config: GalleryConfig = get_config(&ctx, "gallery").unwrap_or_default();
        if !config.auto_update {
            return Ok(Some(ctx));
        }
        let Some((h, m, s)) = parse_hms(&config.update_time) else {
            warn!(target: "Gallery", "无效的更新时间: {}", config.update_time);
            return Ok(Some(ctx));
        };

        let task_ctx = ctx.clone();
        let task_name = format!("gallery_update:{}", ctx.bot.login_user.id);
        ctx.scheduler.replace_daily_at(task_name, h, m, s, move || {
            let ctx = task_ctx.clone();
            let writer = writer.clone();
            async move {
                if let Err(e) = run_update(&ctx, writer, false).await {
                    error!(target: "Gallery", "自动更新失败: {}", e);
                }
            }
        });
        Ok(Some(ctx))
    })
}

pub fn handle(
    ctx: Context,
    writer: LockedWriter,
) -> BoxFuture<'static, Result<Option<Context>, PluginError>> {
    Box::pin(async move {
        if match_command(&ctx, "更新色图").is_none() || !permission::is_superuser(&ctx) {
            return Ok(Some(ctx));
        }
        if UPDATING.load(Ordering::SeqCst) {
            reply(&ctx, writer, Message::from("色图正在更新中，请稍后...")).await?;
            return Ok(None);
        }
        reply(&ctx, writer.clone(), Message::from("开始更新色图...")).await?;
        if let Err(e) = run_update(&ctx, writer.clone(), true).await {
            error!(target: "Gallery", "更新失败: {}", e);
            reply(&ctx, writer, Message::from(format!("更新色图失败: {}", e))).await?;
        }
        Ok(None)
    })
}
