use crate::adapters::onebot::{LockedWriter, send_frame_raw};
use crate::event::{BotStatus, Context, EventType};
use crate::manager::plugins::{PluginMeta, PluginType};
use crate::manager::{group_manager, plugins_manager};
use crate::utils::paths::data_path;
use crate::{error, info, warn};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::OnceLock;
use tokio::fs;
use toml::Value;

pub mod admin_bot_manage;
pub mod gallery;
pub mod help;
pub mod hooks;
pub mod poke;
pub mod shop_log;
pub mod super_help;
pub mod web_ui;
pub mod word_bank;

pub type PluginError = Box<dyn std::error::Error + Send + Sync>;

pub type PluginHandler =
    fn(Context, LockedWriter) -> BoxFuture<'static, Result<Option<Context>, PluginError>>;

pub type PluginInitHandler = fn(Context) -> BoxFuture<'static, Result<(), PluginError>>;

pub struct Plugin {
    pub meta: PluginMeta,
    pub handler: PluginHandler,
    pub on_init: Option<PluginInitHandler>,
    /// 当 Bot 连接成功且获取到自身信息后触发 (用于注册定时任务等)
    pub on_connected: Option<PluginHandler>,
    pub default_config: fn() -> Value,
}

impl Plugin {
    pub fn name(&self) -> &'static str {
        self.meta.module
    }
}

static PLUGINS: OnceLock<Vec<Plugin>> = OnceLock::new();

/// 获取全局插件列表 (按流水线顺序)
pub fn get_plugins() -> &'static [Plugin] {
    PLUGINS.get_or_init(|| {
        vec![
            Plugin {
                meta: hooks::META,
                handler: hooks::handle,
                on_init: None,
                on_connected: None,
                default_config: hooks::default_config,
            },
            Plugin {
                meta: admin_bot_manage::META,
                handler: admin_bot_manage::handle,
                on_init: Some(admin_bot_manage::init),
                on_connected: Some(admin_bot_manage::on_connected),
                default_config: admin_bot_manage::default_config,
            },
            Plugin {
                meta: help::META,
                handler: help::handle,
                on_init: Some(help::init),
                on_connected: None,
                default_config: help::default_config,
            },
            Plugin {
                meta: super_help::META,
                handler: super_help::handle,
                on_init: Some(super_help::init),
                on_connected: None,
                default_config: super_help::default_config,
            },
            Plugin {
                meta: gallery::META,
                handler: gallery::handle,
                on_init: Some(gallery::init),
                on_connected: Some(gallery::on_connected),
                default_config: gallery::default_config,
            },
            Plugin {
                meta: web_ui::META,
                handler: web_ui::handle,
                on_init: Some(web_ui::init),
                on_connected: None,
                default_config: web_ui::default_config,
            },
            Plugin {
                meta: word_bank::META,
                handler: word_bank::handle,
                on_init: None,
                on_connected: None,
                default_config: word_bank::default_config,
            },
            Plugin {
                meta: poke::META,
                handler: poke::handle,
                on_init: None,
                on_connected: None,
                default_config: poke::default_config,
            },
            Plugin {
                meta: shop_log::META,
                handler: shop_log::handle,
                on_init: None,
                on_connected: None,
                default_config: shop_log::default_config,
            },
        ]
    })
}

/// 所有插件的默认配置，用于补齐配置文件
pub fn default_configs() -> Vec<(&'static str, Value)> {
    get_plugins()
        .iter()
        .map(|p| (p.name(), (p.default_config)()))
        .collect()
}

fn is_enabled(ctx: &Context, plugin: &Plugin) -> bool {
    ctx.config
        .read()
        .map(|c| c.plugin_enabled(plugin.name()))
        .unwrap_or(false)
}

/// 执行所有插件的初始化逻辑
pub async fn do_init(ctx: Context) -> Result<(), PluginError> {
    let plugins = get_plugins();

    plugins_manager()
        .load(&ctx.db, plugins.iter().map(|p| &p.meta))
        .await?;

    let enabled_count = plugins.iter().filter(|p| is_enabled(&ctx, p)).count();
    info!(
        target: "System",
        "正在加载插件系统 (已启用 {}/{})",
        enabled_count,
        plugins.len()
    );

    for plugin in plugins {
        if !is_enabled(&ctx, plugin) {
            continue;
        }

        for (module, name, default_status) in plugin.meta.tasks {
            group_manager().register_task(module, name, *default_status);
        }

        if let Some(init_fn) = plugin.on_init {
            let init_ctx = ctx.with_event(EventType::Init);
            match init_fn(init_ctx).await {
                Ok(_) => {
                    info!(target: "Plugin", "✅ [{}] 就绪 (Init Success)", plugin.name());
                }
                Err(e) => {
                    error!(target: "Plugin", "❌ [{}] 初始化失败: {}", plugin.name(), e);
                }
            }
        } else {
            info!(target: "Plugin", "✅ [{}] 就绪", plugin.name());
        }
    }
    Ok(())
}

/// 当 Bot 连接建立后触发
pub async fn do_connected(ctx: Context, writer: LockedWriter) -> Result<(), PluginError> {
    for plugin in get_plugins() {
        if !is_enabled(&ctx, plugin) {
            continue;
        }

        if let Some(conn_fn) = plugin.on_connected {
            if let Err(e) = conn_fn(ctx.clone(), writer.clone()).await {
                error!(target: "Plugin", "❌ [{}] 连接钩子执行失败: {}", plugin.name(), e);
            } else {
                info!(target: "Plugin", "🔗 [{}] 连接钩子已触发", plugin.name());
            }
        }
    }
    Ok(())
}

/// 普通插件在当前事件中是否被禁用 (全局禁用或群内禁用)
fn is_blocked(ctx: &Context, meta: &PluginMeta) -> bool {
    if meta.plugin_type != PluginType::Normal {
        return false;
    }
    let EventType::Onebot(_) = &ctx.event else {
        return false;
    };
    let group_id = ctx.group_id();
    if plugins_manager().is_blocked_for(meta.module, group_id.is_some()) {
        return true;
    }
    match group_id {
        Some(gid) => {
            let gm = group_manager();
            !gm.get_plugin_status(meta.module, gid) || !gm.get_plugin_super_status(meta.module, gid)
        }
        None => false,
    }
}

/// 运行插件流水线
pub async fn run(mut ctx: Context, writer: LockedWriter) -> Result<(), PluginError> {
    for plugin in get_plugins() {
        if !is_enabled(&ctx, plugin) || is_blocked(&ctx, &plugin.meta) {
            continue;
        }

        let db = ctx.db.clone();
        match (plugin.handler)(ctx, writer.clone()).await {
            Ok(Some(next_ctx)) => ctx = next_ctx,
            Ok(None) => return Ok(()),
            Err(e) => {
                error!(target: "Plugin", "[{}] 处理事件失败: {}", plugin.name(), e);
                if let Err(db_err) = plugins_manager().set_error(&db, plugin.name(), true).await {
                    warn!(target: "Plugin", "记录插件错误状态失败: {}", db_err);
                }
                return Ok(());
            }
        }
    }

    if let EventType::BeforeSend(packet) = ctx.event {
        let json_str = simd_json::to_string(&packet)?;
        send_frame_raw(writer, json_str).await?;
    }

    Ok(())
}

// ================= 工具函数 =================

/// 插件数据目录 data/<plugin_name>，不存在时创建
pub async fn get_data_dir(plugin_name: &str) -> Result<PathBuf, PluginError> {
    let path = data_path().join(plugin_name);
    if !path.exists() {
        fs::create_dir_all(&path).await?;
    }
    Ok(path)
}

pub fn get_config<T>(ctx: &Context, plugin_name: &str) -> Option<T>
where
    T: DeserializeOwned,
{
    let guard = ctx.config.read().ok()?;
    guard
        .plugins
        .get(plugin_name)
        .and_then(|v| T::deserialize(v.clone()).ok())
}

/// 系统级上下文 (不依赖任何连接)
pub fn system_bot() -> BotStatus {
    BotStatus {
        adapter: "system".to_string(),
        platform: "internal".to_string(),
        login_user: Default::default(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::AppConfig;
    use crate::event::tests::parse;
    use crate::matcher::Matcher;
    use crate::scheduler::Scheduler;
    use std::sync::{Arc, RwLock};
    use tokio::sync::Mutex as AsyncMutex;

    /// 构造带内存数据库的上下文，超级用户为 10000
    pub async fn test_ctx(event_json: &str) -> Context {
        let mut config = AppConfig::default();
        config.superusers = vec![10000];
        for (name, value) in default_configs() {
            config.plugins.insert(name.to_string(), value);
        }
        Context {
            event: EventType::Onebot(parse(event_json)),
            config: Arc::new(RwLock::new(config)),
            config_save_lock: Arc::new(AsyncMutex::new(())),
            db: crate::models::test_db().await,
            scheduler: Arc::new(Scheduler::new()),
            matcher: Arc::new(Matcher::new()),
            config_path: String::new(),
            bot: system_bot(),
        }
    }

    pub fn group_msg(group_id: i64, user_id: i64, role: &str, text: &str) -> String {
        format!(
            r#"{{"post_type":"message","message_type":"group","group_id":{},"user_id":{},"self_id":1,
                "message_id":1,"raw_message":"{}","sender":{{"nickname":"n","card":"","role":"{}"}},
                "message":[{{"type":"text","data":{{"text":"{}"}}}}]}}"#,
            group_id, user_id, text, role, text
        )
    }

    pub fn private_msg(user_id: i64, text: &str) -> String {
        format!(
            r#"{{"post_type":"message","message_type":"private","user_id":{},"self_id":1,
                "message_id":1,"raw_message":"{}","sender":{{"nickname":"n"}},
                "message":[{{"type":"text","data":{{"text":"{}"}}}}]}}"#,
            user_id, text, text
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn module_names_are_unique() {
        let names: HashSet<_> = get_plugins().iter().map(|p| p.name()).collect();
        assert_eq!(names.len(), get_plugins().len());
    }

    #[test]
    fn every_plugin_has_enabled_flag() {
        for (name, value) in default_configs() {
            assert!(
                value.get("enabled").is_some(),
                "{} 缺少 enabled 字段",
                name
            );
        }
    }
}
