use crate::event::Context;
use crate::models::level_user;

/// 管理员默认权限等级
pub const DEFAULT_ADMIN_AUTH: i32 = 5;

/// 超级用户在群内的权限等级
pub const SUPERUSER_LEVEL: i32 = 9;

/// 读取 [admin_bot_manage] 中的 admin_default_auth
pub fn admin_default_auth(ctx: &Context) -> i32 {
    ctx.config
        .read()
        .ok()
        .and_then(|c| {
            c.plugins
                .get("admin_bot_manage")
                .and_then(|v| v.get("admin_default_auth"))
                .and_then(|v| v.as_integer())
        })
        .map(|v| v as i32)
        .unwrap_or(DEFAULT_ADMIN_AUTH)
}

pub fn is_superuser(ctx: &Context) -> bool {
    ctx.user_id().map(|uid| ctx.is_superuser(uid)).unwrap_or(false)
}

/// 超级用户、群主/管理员，或权限等级达到管理员等级
pub async fn is_admin(ctx: &Context) -> bool {
    if is_superuser(ctx) {
        return true;
    }
    let Some(msg) = ctx.as_message() else {
        return false;
    };
    if matches!(msg.sender_role(), Some("owner") | Some("admin")) {
        return true;
    }
    let Some(group_id) = msg.group_id() else {
        return false;
    };
    let required = admin_default_auth(ctx);
    level_user::check_level(&ctx.db, msg.user_id(), group_id, required)
        .await
        .unwrap_or(false)
}
