use crate::adapters::onebot::api::GroupMember;
use crate::command::Switch;
use crate::manager::group::GroupManager;
use crate::manager::plugins::{
    BlockType, PluginMeta, PluginType, PluginsManager, resolve_module,
};
use crate::message::Message;
use crate::models::{group_member, level_user};
use crate::permission::SUPERUSER_LEVEL;
use crate::utils::image::BuildImage;
use crate::utils::paths::icon_path;
use crate::utils::{clear_dir_files, http, remove_if_exists};
use crate::{error, info, warn};
use anyhow::Result;
use image::RgbaImage;
use image::imageops::FilterType;
use plotters::style::RGBColor;
use sea_orm::{DatabaseConnection, DbErr, TransactionTrait};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

// ================= 群被动状态 =================

fn load_icon(on: bool) -> RgbaImage {
    let name = if on { "btn_true.png" } else { "btn_false.png" };
    match image::open(icon_path().join(name)) {
        Ok(img) => img.resize_exact(40, 40, FilterType::Triangle).to_rgba8(),
        Err(_) => {
            let color = if on { [76, 175, 80, 255] } else { [158, 158, 158, 255] };
            RgbaImage::from_pixel(40, 40, image::Rgba(color))
        }
    }
}

/// 绘制群内所有被动任务的开关状态，返回 base64://
pub fn group_current_status(gm: &GroupManager, group_id: i64) -> Result<String> {
    let tasks = gm.get_task_data();
    let (on_icon, off_icon) = (load_icon(true), load_icon(false));

    let mut rows = Vec::new();
    for (i, (task, name)) in tasks.iter().enumerate() {
        let label = format!("{}.{}", i + 1, name);
        let (name_w, _) = crate::utils::image::text_size(&label, 20);
        let mut row = BuildImage::new(name_w + 200, 60, RGBColor(103, 177, 109));
        row.text((10, 18), &label, 20, RGBColor(0, 0, 0))?;

        let group_on = gm.check_group_task_status(group_id, task);
        let super_on = gm.check_task_super_status(task);
        let x = name_w as i32;
        row.text((x + 20, 22), "状态", 15, RGBColor(0, 0, 0))?;
        row.paste(if group_on { &on_icon } else { &off_icon }, x + 50, 10);
        row.text((x + 100, 22), "全局", 15, RGBColor(0, 0, 0))?;
        row.paste(if super_on { &on_icon } else { &off_icon }, x + 130, 10);
        rows.push(row);
    }

    let width = rows.iter().map(|r| r.width()).max().unwrap_or(200);
    let height: u32 = rows.iter().map(|r| r.height() + 10).sum();
    let mut canvas = BuildImage::new(width + 20, height + 70, RGBColor(119, 97, 177));
    canvas.text((15, 20), "群被动状态", 30, RGBColor(0, 0, 0))?;

    let mut y = 75;
    for row in &rows {
        canvas.paste_build(row, 0, y);
        y += row.height() as i32 + 10;
    }
    canvas.to_base64()
}

// ================= 自定义进群欢迎消息 =================

fn welcome_json(dir: &Path) -> PathBuf {
    dir.join("custom_welcome_msg.json")
}

fn welcome_image(dir: &Path, group_id: i64) -> PathBuf {
    dir.join(format!("{}.jpg", group_id))
}

fn read_welcome_map(dir: &Path) -> BTreeMap<String, String> {
    std::fs::read_to_string(welcome_json(dir))
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default()
}

/// 替换群欢迎消息，图片只取第一张
pub async fn custom_group_welcome(
    dir: &Path,
    msg: &str,
    img: Option<&str>,
    user_id: i64,
    group_id: i64,
) -> Message {
    match save_group_welcome(dir, msg, img, user_id, group_id).await {
        Ok(reply) => reply,
        Err(e) => {
            error!(target: "AdminBotManage", "GROUP {} 替换群消息失败 e:{}", group_id, e);
            Message::from("替换群消息失败..")
        }
    }
}

async fn save_group_welcome(
    dir: &Path,
    msg: &str,
    img: Option<&str>,
    user_id: i64,
    group_id: i64,
) -> Result<Message> {
    let image_file = welcome_image(dir, group_id);
    remove_if_exists(&image_file)?;
    std::fs::create_dir_all(dir)?;

    let mut reply = Message::new().text(format!("替换群欢迎消息成功：\n{}", msg));
    if !msg.is_empty() {
        let mut data = read_welcome_map(dir);
        data.insert(group_id.to_string(), msg.to_string());
        std::fs::write(welcome_json(dir), serde_json::to_string_pretty(&data)?)?;
        info!(target: "AdminBotManage", "USER {} GROUP {} 更换群欢迎消息 {}", user_id, group_id, msg);
    }
    if let Some(url) = img {
        http::download_file(url, &image_file, None).await?;
        reply = reply.image(image_file);
        info!(target: "AdminBotManage", "USER {} GROUP {} 更换群欢迎消息图片", user_id, group_id);
    }
    Ok(reply)
}

/// 读取群欢迎消息 (文本, 图片)
pub fn load_group_welcome(dir: &Path, group_id: i64) -> (Option<String>, Option<PathBuf>) {
    let text = read_welcome_map(dir).remove(&group_id.to_string());
    let image = Some(welcome_image(dir, group_id)).filter(|p| p.exists());
    (text, image)
}

// ================= 被动 / 功能开关 =================

/// 修改全局被动任务状态
pub fn change_global_task_status(gm: &GroupManager, switch: Switch, name: &str) -> String {
    let tasks = gm.get_task_data();
    let status = switch.label();
    if name.contains("全部被动") {
        for task in tasks.keys() {
            match switch {
                Switch::Open => gm.open_global_task(task),
                Switch::Close => gm.close_global_task(task),
            }
        }
        return format!("已 {} 全局全部被动技能！", status);
    }
    let Some(task) = tasks
        .iter()
        .find(|(_, n)| n.to_lowercase() == name.to_lowercase())
        .map(|(t, _)| t.clone())
    else {
        return "未查询到该被动任务".to_string();
    };
    match switch {
        Switch::Open => gm.open_global_task(&task),
        Switch::Close => gm.close_global_task(&task),
    }
    format!("已 {} 全局{}", status, name)
}

/// 修改群功能状态，is_super 为超级用户私聊开关
pub fn change_group_switch(
    gm: &GroupManager,
    metas: &[&PluginMeta],
    help_dir: &Path,
    switch: Switch,
    name: &str,
    group_id: i64,
    is_super: bool,
) -> String {
    let tasks = gm.get_task_data();
    let status = switch.label();
    let help_file = help_dir.join(format!("{}.png", group_id));

    if name == "全部被动" {
        for task in tasks.keys() {
            let current = gm.check_group_task_status(group_id, task);
            match switch {
                Switch::Open if !current => gm.open_group_task(group_id, task),
                Switch::Close if current => gm.close_group_task(group_id, task),
                _ => {}
            }
        }
        invalidate_help(&help_file);
        return format!("已 {} 全部被动技能！", status);
    }

    if name == "全部功能" {
        for meta in metas {
            match switch {
                Switch::Open => gm.unblock_plugin(meta.module, group_id, false),
                Switch::Close => gm.block_plugin(meta.module, group_id, false),
            }
        }
        if let Err(e) = gm.save() {
            error!(target: "AdminBotManage", "保存群配置失败: {}", e);
        }
        invalidate_help(&help_file);
        return format!("已 {} 全部功能！", status);
    }

    let task_hit: Vec<String> = tasks
        .iter()
        .filter(|(_, n)| n.to_lowercase() == name.to_lowercase())
        .map(|(t, _)| t.clone())
        .collect();

    if !task_hit.is_empty() {
        for task in &task_hit {
            let task_name = tasks.get(task).map(String::as_str).unwrap_or(name);
            let current = gm.check_group_task_status(group_id, task);
            match switch {
                Switch::Open if current => {
                    return format!("被动 {} 正处于开启状态！不要重复开启.", task_name);
                }
                Switch::Close if !current => {
                    return format!("被动 {} 正处于关闭状态！不要重复关闭.", task_name);
                }
                Switch::Open => gm.open_group_task(group_id, task),
                Switch::Close => gm.close_group_task(group_id, task),
            }
        }
    } else {
        let modules = resolve_module(metas.iter().copied(), name, true);
        if modules.is_empty() {
            return format!("未查询到功能 {}", name);
        }
        for module in modules {
            let module = if is_super {
                format!("{}:super", module)
            } else {
                module.to_string()
            };
            let current = gm.get_plugin_status(&module, group_id);
            match switch {
                Switch::Open if current => {
                    return format!("功能 {} 正处于开启状态！不要重复开启.", name);
                }
                Switch::Close if !current => {
                    return format!("功能 {} 正处于关闭状态！不要重复关闭.", name);
                }
                Switch::Open => gm.unblock_plugin(&module, group_id, true),
                Switch::Close => gm.block_plugin(&module, group_id, true),
            }
        }
    }

    if is_super {
        invalidate_all_help(help_dir);
    } else {
        invalidate_help(&help_file);
    }
    format!("{} {} 功能！", status, name)
}

/// 设置插件全局状态 (超级用户)
pub async fn set_plugin_status(
    pm: &PluginsManager,
    db: &DatabaseConnection,
    metas: &[&PluginMeta],
    help_dir: &Path,
    switch: Switch,
    name: &str,
    block_type: BlockType,
) -> Result<String, DbErr> {
    let Some(module) = resolve_module(metas.iter().copied(), name, false)
        .into_iter()
        .next()
    else {
        return Ok(format!("未查询到功能 {}", name));
    };
    match switch {
        Switch::Open => pm.unblock_plugin(db, module).await?,
        Switch::Close => pm.block_plugin(db, module, block_type).await?,
    }
    invalidate_all_help(help_dir);
    Ok(match switch {
        Switch::Open => format!("已开启功能 {}", name),
        Switch::Close => format!("已关闭功能 {} ({})", name, block_type.as_str()),
    })
}

fn invalidate_help(file: &Path) {
    if let Err(e) = remove_if_exists(file) {
        warn!(target: "AdminBotManage", "删除帮助缓存 {} 失败: {}", file.display(), e);
    }
}

fn invalidate_all_help(dir: &Path) {
    if let Err(e) = clear_dir_files(dir) {
        warn!(target: "AdminBotManage", "清理帮助缓存失败: {}", e);
    }
}

// ================= 功能状态 =================

/// 每个普通插件一行：(名称[ERROR], OPEN / <TYPE> CLOSE)
pub fn plugin_status_lines(pm: &PluginsManager, metas: &[&PluginMeta]) -> Vec<(String, String)> {
    metas
        .iter()
        .filter(|m| m.plugin_type == PluginType::Normal)
        .map(|m| {
            let mut name = m.name.to_string();
            if pm.get(m.module).map(|r| r.error).unwrap_or(false) {
                name.push_str("[ERROR]");
            }
            let flag = match pm.get_plugin_block_type(m.module) {
                Some(t) => format!("{} CLOSE", t.as_str().to_uppercase()),
                None => "OPEN".to_string(),
            };
            (name, flag)
        })
        .collect()
}

/// 合成功能状态图片
pub fn get_plugin_status(lines: &[(String, String)]) -> Result<String> {
    let height = (lines.len() as u32 + 2) * 24 + 10;
    let mut canvas = BuildImage::new(500, height, RGBColor(255, 255, 255));
    let black = RGBColor(0, 0, 0);
    canvas.text((10, 10), "功能", 20, black)?;
    canvas.text((280, 10), "状态", 20, black)?;
    for (i, (name, flag)) in lines.iter().enumerate() {
        let y = 10 + (i as i32 + 1) * 24;
        canvas.text((10, y), name, 20, black)?;
        canvas.text((280, y), flag, 20, black)?;
    }
    canvas.to_base64()
}

// ================= 群成员 =================

/// 将成员列表同步到数据库，返回失败信息
pub async fn sync_members(
    db: &DatabaseConnection,
    group_id: i64,
    members: &[GroupMember],
    superusers: &[i64],
    admin_default_auth: i32,
) -> Result<Vec<String>, DbErr> {
    let mut errors = Vec::new();
    let mut exist = HashSet::new();

    for member in members {
        match sync_member(db, member, superusers, admin_default_auth).await {
            Ok(()) => {
                exist.insert(member.user_id);
            }
            Err(e) => {
                warn!(target: "AdminBotManage", "用户{} 所属{} 更新失败: {}", member.user_id, group_id, e);
                errors.push(format!("用户{} 所属{} 更新失败", member.user_id, group_id));
                // 失败的成员仍在群内，不应被删除
                exist.insert(member.user_id);
            }
        }
    }

    for row in group_member::list_by_group(db, group_id).await? {
        if !exist.contains(&row.user_id) {
            group_member::delete_member(db, row.user_id, group_id).await?;
            info!(target: "AdminBotManage", "退群用户{} 所属{} 已删除", row.user_id, group_id);
        }
    }
    Ok(errors)
}

async fn sync_member(
    db: &DatabaseConnection,
    member: &GroupMember,
    superusers: &[i64],
    admin_default_auth: i32,
) -> Result<(), DbErr> {
    let nickname = member.display_name().to_string();
    let txn = db.begin().await?;

    if matches!(member.role.as_str(), "owner" | "admin") {
        let flagged = level_user::get(&txn, member.user_id, member.group_id)
            .await?
            .map(|u| u.group_flag)
            .unwrap_or(false);
        if !flagged {
            level_user::set_level(&txn, member.user_id, member.group_id, admin_default_auth, false)
                .await?;
        }
    }
    if superusers.contains(&member.user_id) {
        level_user::set_level(&txn, member.user_id, member.group_id, SUPERUSER_LEVEL, false).await?;
    }

    match group_member::get(&txn, member.user_id, member.group_id).await? {
        Some(row) => {
            if row.user_name != nickname {
                group_member::set_name(&txn, row, &nickname).await?;
                info!(target: "AdminBotManage", "用户{} 所属{} 更新群昵称成功", member.user_id, member.group_id);
            }
        }
        None => {
            group_member::insert(&txn, member.user_id, member.group_id, &nickname, member.join_time)
                .await?;
            info!(target: "AdminBotManage", "用户{} 所属{} 更新成功", member.user_id, member.group_id);
        }
    }

    txn.commit().await
}

// ================= 醒来 / 休息 =================

pub fn set_group_bot_status(gm: &GroupManager, group_id: i64, status: bool) -> &'static str {
    if status {
        if gm.check_group_bot_status(group_id) {
            return "我还醒着呢！";
        }
        gm.turn_on_group_bot_status(group_id);
        "呜..醒来了..."
    } else {
        gm.shutdown_group_bot_status(group_id);
        "那我先睡觉了..."
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_db;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> GroupManager {
        let gm = GroupManager::load(dir.path().join("group_manager.json"));
        gm.register_task("group_welcome", "进群欢迎", true);
        gm.register_task("refund_group_remind", "退群提醒", true);
        gm
    }

    const POKE: PluginMeta = PluginMeta {
        commands: &["戳一戳"],
        ..PluginMeta::new("poke", "戳一戳")
    };
    const WORD_BANK: PluginMeta = PluginMeta::new("word_bank", "词条");
    const HOOKS: PluginMeta = PluginMeta {
        plugin_type: PluginType::Hidden,
        ..PluginMeta::new("hooks", "事件预处理")
    };

    fn member(user_id: i64, card: &str, role: &str) -> GroupMember {
        GroupMember {
            group_id: 100,
            user_id,
            nickname: format!("nick{}", user_id),
            card: card.to_string(),
            join_time: 1_700_000_000,
            role: role.to_string(),
        }
    }

    #[test]
    fn global_task_switch() {
        let dir = TempDir::new().unwrap();
        let gm = manager(&dir);
        assert_eq!(
            change_global_task_status(&gm, Switch::Close, "进群欢迎"),
            "已 关闭 全局进群欢迎"
        );
        assert!(!gm.check_task_super_status("group_welcome"));
        assert_eq!(
            change_global_task_status(&gm, Switch::Open, "全部被动"),
            "已 开启 全局全部被动技能！"
        );
        assert!(gm.check_task_super_status("group_welcome"));
        assert_eq!(
            change_global_task_status(&gm, Switch::Open, "不存在"),
            "未查询到该被动任务"
        );
    }

    #[test]
    fn group_switch_for_tasks_and_plugins() {
        let dir = TempDir::new().unwrap();
        let gm = manager(&dir);
        let help_dir = dir.path().join("group_help");
        std::fs::create_dir_all(&help_dir).unwrap();
        std::fs::write(help_dir.join("100.png"), b"x").unwrap();
        let metas = [&POKE, &WORD_BANK];

        assert_eq!(
            change_group_switch(&gm, &metas, &help_dir, Switch::Open, "进群欢迎", 100, false),
            "被动 进群欢迎 正处于开启状态！不要重复开启."
        );
        assert_eq!(
            change_group_switch(&gm, &metas, &help_dir, Switch::Close, "戳一戳", 100, false),
            "关闭 戳一戳 功能！"
        );
        assert!(!gm.get_plugin_status("poke", 100));
        assert!(!help_dir.join("100.png").exists());
        assert_eq!(
            change_group_switch(&gm, &metas, &help_dir, Switch::Close, "戳一戳", 100, false),
            "功能 戳一戳 正处于关闭状态！不要重复关闭."
        );

        assert_eq!(
            change_group_switch(&gm, &metas, &help_dir, Switch::Close, "全部被动", 100, false),
            "已 关闭 全部被动技能！"
        );
        assert!(!gm.check_group_task_status(100, "refund_group_remind"));

        assert_eq!(
            change_group_switch(&gm, &metas, &help_dir, Switch::Open, "全部功能", 100, false),
            "已 开启 全部功能！"
        );
        assert!(gm.get_plugin_status("poke", 100));
    }

    #[test]
    fn super_switch_marks_module_and_clears_cache() {
        let dir = TempDir::new().unwrap();
        let gm = manager(&dir);
        let help_dir = dir.path().join("group_help");
        std::fs::create_dir_all(&help_dir).unwrap();
        std::fs::write(help_dir.join("200.png"), b"x").unwrap();

        let msg = change_group_switch(&gm, &[&POKE], &help_dir, Switch::Close, "戳一戳", 100, true);
        assert_eq!(msg, "关闭 戳一戳 功能！");
        assert!(gm.get_plugin_status("poke", 100));
        assert!(!gm.get_plugin_super_status("poke", 100));
        assert!(!help_dir.join("200.png").exists());
    }

    #[tokio::test]
    async fn plugin_status_lines_skip_hidden() {
        let db = test_db().await;
        let pm = PluginsManager::default();
        let metas = [&POKE, &WORD_BANK, &HOOKS];
        pm.load(&db, metas.iter().copied()).await.unwrap();

        let dir = TempDir::new().unwrap();
        let msg = set_plugin_status(&pm, &db, &metas, dir.path(), Switch::Close, "词条", BlockType::Group)
            .await
            .unwrap();
        assert_eq!(msg, "已关闭功能 词条 (group)");
        pm.set_error(&db, "poke", true).await.unwrap();

        let lines = plugin_status_lines(&pm, &metas);
        assert_eq!(
            lines,
            vec![
                ("戳一戳[ERROR]".to_string(), "OPEN".to_string()),
                ("词条".to_string(), "GROUP CLOSE".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn member_sync_sets_levels_and_removes_leavers() {
        let db = test_db().await;
        group_member::insert(&db, 9, 100, "已退群", 0).await.unwrap();
        group_member::insert(&db, 2, 100, "旧名字", 0).await.unwrap();

        let members = vec![member(1, "", "owner"), member(2, "新名片", "member"), member(3, "", "member")];
        let errors = sync_members(&db, 100, &members, &[3], 5).await.unwrap();
        assert!(errors.is_empty());

        assert_eq!(level_user::get_level(&db, 1, 100).await.unwrap(), 5);
        assert_eq!(level_user::get_level(&db, 3, 100).await.unwrap(), SUPERUSER_LEVEL);
        assert_eq!(
            group_member::get(&db, 2, 100).await.unwrap().unwrap().user_name,
            "新名片"
        );
        assert!(group_member::get(&db, 9, 100).await.unwrap().is_none());
        assert_eq!(group_member::list_by_group(&db, 100).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn manual_level_is_kept_for_admins() {
        let db = test_db().await;
        level_user::set_level(&db, 1, 100, 7, true).await.unwrap();
        sync_members(&db, 100, &[member(1, "", "admin")], &[], 5).await.unwrap();
        assert_eq!(level_user::get_level(&db, 1, 100).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn welcome_text_is_stored_per_group() {
        let dir = TempDir::new().unwrap();
        let reply = custom_group_welcome(dir.path(), "欢迎新人", None, 1, 100).await;
        assert_eq!(reply.plain_text(), "替换群欢迎消息成功：\n欢迎新人");

        let (text, image) = load_group_welcome(dir.path(), 100);
        assert_eq!(text.as_deref(), Some("欢迎新人"));
        assert!(image.is_none());
        let saved = std::fs::read_to_string(dir.path().join("custom_welcome_msg.json")).unwrap();
        assert!(saved.contains("\"100\": \"欢迎新人\""));
    }

    #[test]
    fn bot_status_replies() {
        let dir = TempDir::new().unwrap();
        let gm = manager(&dir);
        assert_eq!(set_group_bot_status(&gm, 100, true), "我还醒着呢！");
        assert_eq!(set_group_bot_status(&gm, 100, false), "那我先睡觉了...");
        assert!(!gm.check_group_bot_status(100));
        assert_eq!(set_group_bot_status(&gm, 100, true), "呜..醒来了...");
    }
}
