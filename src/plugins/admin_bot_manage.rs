use crate::adapters::onebot::{LockedWriter, api, reply, send_msg};
use crate::command::{Switch, match_command};
use crate::config::build_config;
use crate::event::Context;
use crate::manager::plugins::{BlockType, PluginMeta, PluginType, TaskMeta};
use crate::manager::{group_manager, plugins_manager};
use crate::message::Message;
use crate::models::group_member;
use crate::permission::{self, admin_default_auth};
use crate::plugins::{PluginError, get_config, get_data_dir, get_plugins};
use crate::scheduler::parse_hms;
use crate::utils::paths::{data_path, group_help_path};
use crate::{error, info, warn};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use toml::Value;

pub mod data_source;

const TASKS: &[TaskMeta] = &[
    ("group_welcome", "进群欢迎", true),
    ("refund_group_remind", "退群提醒", true),
];

pub const META: PluginMeta = PluginMeta {
    plugin_type: PluginType::Admin,
    menu_type: &["群管理"],
    usage: "群管理员指令:\n\
        群被动状态\n\
        自定义进群欢迎消息 [文本] [图片]\n\
        开启/关闭 [功能名称 | 被动名称 | 全部被动 | 全部功能]\n\
        更新群组成员列表\n\
        醒来 / 休息吧\n\
        超级用户指令:\n\
        开启/关闭全局 [被动名称 | 全部被动]\n\
        功能状态\n\
        (私聊) 开启/关闭 [功能名称] [群号 | a/p/g]",
    commands: &["群管理", "群被动状态", "自定义进群欢迎消息", "更新群组成员列表"],
    tasks: TASKS,
    ..PluginMeta::new("admin_bot_manage", "群管理")
};

#[derive(Serialize, Deserialize, Clone)]
struct AdminConfig {
    enabled: bool,
    /// 群主/管理员自动获得的权限等级
    admin_default_auth: i32,
    /// 每日更新群成员的时间
    update_member_time: String,
    default_welcome: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            admin_default_auth: permission::DEFAULT_ADMIN_AUTH,
            update_member_time: "01:01:00".to_string(),
            default_welcome: "欢迎新人加入本群！".to_string(),
        }
    }
}

pub fn default_config() -> Value {
    build_config(AdminConfig::default())
}

fn welcome_dir() -> PathBuf {
    data_path().join("custom_welcome_msg")
}

pub fn init(_ctx: Context) -> BoxFuture<'static, Result<(), PluginError>> {
    Box::pin(async move {
        get_data_dir("custom_welcome_msg").await?;
        get_data_dir("group_help").await?;
        Ok(())
    })
}

/// 连接后注册每日更新群成员的任务，每个 Bot 一个，重连时替换
pub fn on_connected(
    ctx: Context,
    writer: LockedWriter,
) -> BoxFuture<'static, Result<Option<Context>, PluginError>> {
    Box::pin(async move {
        let config: AdminConfig = get_config(&ctx, "admin_bot_manage").unwrap_or_default();
        let Some((h, m, s)) = parse_hms(&config.update_member_time) else {
            warn!(target: "AdminBotManage", "无效的更新时间: {}", config.update_member_time);
            return Ok(Some(ctx));
        };

        let task_ctx = ctx.clone();
        let task_name = format!("member_sync:{}", ctx.bot.login_user.id);
        ctx.scheduler.replace_daily_at(task_name, h, m, s, move || {
            let ctx = task_ctx.clone();
            let writer = writer.clone();
            async move {
                match api::get_group_list(&ctx, writer.clone(), false).await {
                    Ok(groups) => {
                        for g in groups {
                            if let Err(e) = update_member_info(&ctx, writer.clone(), g.group_id, false).await {
                                warn!(target: "AdminBotManage", "群 {} 成员更新失败: {}", g.group_id, e);
                            }
                        }
                        info!(target: "AdminBotManage", "每日群成员更新完成");
                    }
                    Err(e) => error!(target: "AdminBotManage", "获取群列表失败: {}", e),
                }
            }
        });
        Ok(Some(ctx))
    })
}

/// 拉取群成员列表并写入数据库
pub async fn update_member_info(
    ctx: &Context,
    writer: LockedWriter,
    group_id: i64,
    remind_superuser: bool,
) -> Result<(), PluginError> {
    let members = api::get_group_member_list(ctx, writer.clone(), group_id).await?;
    let superusers = ctx
        .config
        .read()
        .map(|c| c.superusers.clone())
        .unwrap_or_default();

    let errors = data_source::sync_members(
        &ctx.db,
        group_id,
        &members,
        &superusers,
        admin_default_auth(ctx),
    )
    .await?;

    if remind_superuser
        && !errors.is_empty()
        && let Some(&su) = superusers.first()
    {
        send_msg(ctx, writer, None, Some(su), Message::from(errors.join("\n"))).await?;
    }
    Ok(())
}

pub fn handle(
    ctx: Context,
    writer: LockedWriter,
) -> BoxFuture<'static, Result<Option<Context>, PluginError>> {
    Box::pin(async move {
        if ctx.as_notice().is_some() {
            return handle_notice(ctx, writer).await;
        }
        if ctx.as_message().is_none() {
            return Ok(Some(ctx));
        }

        let group_id = ctx.group_id();

        if let Some(gid) = group_id {
            for (cmd, status) in [("醒来", true), ("休息吧", false)] {
                if match_command(&ctx, cmd).is_some() && permission::is_admin(&ctx).await {
                    let text = data_source::set_group_bot_status(group_manager(), gid, status);
                    reply(&ctx, writer, Message::from(text)).await?;
                    return Ok(None);
                }
            }

            if match_command(&ctx, "群被动状态").is_some() && permission::is_admin(&ctx).await {
                let img = tokio::task::spawn_blocking(move || {
                    data_source::group_current_status(group_manager(), gid)
                })
                .await??;
                reply(&ctx, writer, Message::new().image(img)).await?;
                return Ok(None);
            }

            if let Some(m) = match_command(&ctx, "自定义进群欢迎消息")
                && permission::is_admin(&ctx).await
            {
                let text = m.text();
                let images = m.images();
                if text.is_empty() && images.is_empty() {
                    reply(&ctx, writer, Message::from("欢迎消息不能为空！")).await?;
                    return Ok(None);
                }
                let user_id = ctx.user_id().unwrap_or(0);
                let result = data_source::custom_group_welcome(
                    &welcome_dir(),
                    &text,
                    images.first().map(String::as_str),
                    user_id,
                    gid,
                )
                .await;
                reply(&ctx, writer, result).await?;
                return Ok(None);
            }

            if match_command(&ctx, "更新群组成员列表").is_some() && permission::is_admin(&ctx).await {
                let text = match update_member_info(&ctx, writer.clone(), gid, true).await {
                    Ok(()) => "更新群员信息成功！",
                    Err(e) => {
                        error!(target: "AdminBotManage", "群 {} 更新群员信息失败: {}", gid, e);
                        "更新群员信息失败！"
                    }
                };
                reply(&ctx, writer, Message::from(text)).await?;
                return Ok(None);
            }
        }

        if match_command(&ctx, "功能状态").is_some() && permission::is_superuser(&ctx) {
            let metas: Vec<&PluginMeta> = get_plugins().iter().map(|p| &p.meta).collect();
            let lines = data_source::plugin_status_lines(plugins_manager(), &metas);
            let img = tokio::task::spawn_blocking(move || data_source::get_plugin_status(&lines))
                .await??;
            reply(&ctx, writer, Message::new().image(img)).await?;
            return Ok(None);
        }

        for switch in [Switch::Open, Switch::Close] {
            if let Some(m) = match_command(&ctx, switch.label()) {
                let name = m.text();
                if name.is_empty() {
                    return Ok(Some(ctx));
                }
                return match handle_switch(&ctx, &name, switch).await? {
                    Some(text) => {
                        reply(&ctx, writer, Message::from(text)).await?;
                        Ok(None)
                    }
                    None => Ok(Some(ctx)),
                };
            }
        }

        Ok(Some(ctx))
    })
}

/// 开启/关闭 指令的分派，无权限时返回 None
async fn handle_switch(
    ctx: &Context,
    name: &str,
    switch: Switch,
) -> Result<Option<String>, PluginError> {
    let is_super = permission::is_superuser(ctx);
    let metas: Vec<&PluginMeta> = get_plugins().iter().map(|p| &p.meta).collect();
    let help_dir = group_help_path();

    if let Some(task) = name.strip_prefix("全局") {
        if !is_super {
            return Ok(None);
        }
        return Ok(Some(data_source::change_global_task_status(
            group_manager(),
            switch,
            task.trim(),
        )));
    }

    if let Some(gid) = ctx.group_id() {
        if !permission::is_admin(ctx).await {
            return Ok(None);
        }
        return Ok(Some(data_source::change_group_switch(
            group_manager(),
            &metas,
            &help_dir,
            switch,
            name,
            gid,
            false,
        )));
    }

    if !is_super {
        return Ok(None);
    }

    // 私聊：末尾为群号时修改该群，为 a/p/g 时修改全局禁用类型
    let (target, last) = match name.rsplit_once(char::is_whitespace) {
        Some((head, tail)) => (head.trim(), Some(tail.trim())),
        None => (name, None),
    };
    if let Some(gid) = last.and_then(|t| t.parse::<i64>().ok()) {
        return Ok(Some(data_source::change_group_switch(
            group_manager(),
            &metas,
            &help_dir,
            switch,
            target,
            gid,
            true,
        )));
    }
    let (target, block_type) = match last.and_then(BlockType::parse) {
        Some(t) => (target, t),
        None => (name, BlockType::All),
    };
    let text = data_source::set_plugin_status(
        plugins_manager(),
        &ctx.db,
        &metas,
        &help_dir,
        switch,
        target,
        block_type,
    )
    .await?;
    Ok(Some(text))
}

async fn handle_notice(
    ctx: Context,
    writer: LockedWriter,
) -> Result<Option<Context>, PluginError> {
    let Some(notice) = ctx.as_notice() else {
        return Ok(Some(ctx));
    };
    let (notice_type, sub_type) = (notice.notice_type().to_string(), notice.sub_type().to_string());
    let (user_id, self_id) = (notice.user_id(), notice.self_id());
    let Some(group_id) = notice.group_id() else {
        return Ok(Some(ctx));
    };

    match notice_type.as_str() {
        "group_increase" => {
            if user_id == self_id {
                return Ok(Some(ctx));
            }
            if !group_manager().is_task_enabled(group_id, "group_welcome") {
                return Ok(None);
            }
            let (text, image) = data_source::load_group_welcome(&welcome_dir(), group_id);
            let text = text.unwrap_or_else(|| {
                get_config::<AdminConfig>(&ctx, "admin_bot_manage")
                    .unwrap_or_default()
                    .default_welcome
            });
            let mut msg = Message::new().at(user_id).text(format!(" {}", text));
            if let Some(path) = image {
                msg = msg.image(path);
            }
            send_msg(&ctx, writer, Some(group_id), None, msg).await?;
            Ok(None)
        }
        "group_decrease" => {
            if sub_type == "kick_me" || user_id == self_id {
                return Ok(None);
            }
            let name = group_member::get(&ctx.db, user_id, group_id)
                .await?
                .map(|row| row.user_name)
                .unwrap_or_else(|| user_id.to_string());
            group_member::delete_member(&ctx.db, user_id, group_id).await?;
            info!(target: "AdminBotManage", "退群用户{} 所属{} 已删除", user_id, group_id);

            if group_manager().is_task_enabled(group_id, "refund_group_remind") {
                let text = if sub_type == "kick" {
                    format!("{}({}) 被请出了群聊...", name, user_id)
                } else {
                    format!("{}({}) 悄悄离开了我们...", name, user_id)
                };
                send_msg(&ctx, writer, Some(group_id), None, Message::from(text)).await?;
            }
            Ok(None)
        }
        _ => Ok(Some(ctx)),
    }
}
