use crate::models::plugin_status::{self, Model as PluginStatus};
use sea_orm::{DatabaseConnection, DbErr};
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginType {
    Normal,
    Admin,
    Superuser,
    Hidden,
}

/// 被动任务 (module, 显示名称, 默认开启)
pub type TaskMeta = (&'static str, &'static str, bool);

/// 插件元信息
#[derive(Debug, Clone)]
pub struct PluginMeta {
    pub module: &'static str,
    pub name: &'static str,
    pub plugin_type: PluginType,
    /// 帮助菜单中的分类，第一个为主分类
    pub menu_type: &'static [&'static str],
    pub usage: &'static str,
    pub commands: &'static [&'static str],
    pub default_status: bool,
    pub tasks: &'static [TaskMeta],
}

impl PluginMeta {
    pub const fn new(module: &'static str, name: &'static str) -> Self {
        Self {
            module,
            name,
            plugin_type: PluginType::Normal,
            menu_type: &["normal"],
            usage: "",
            commands: &[],
            default_status: true,
            tasks: &[],
        }
    }

    pub fn main_menu(&self) -> &'static str {
        self.menu_type.first().copied().unwrap_or("normal")
    }
}

/// 根据插件名称或指令别名查找 module (忽略大小写)。
/// all 为 true 时返回所有匹配项，否则只返回第一个。
pub fn resolve_module<'a>(
    metas: impl IntoIterator<Item = &'a PluginMeta>,
    name: &str,
    all: bool,
) -> Vec<&'static str> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    for meta in metas {
        let hit = meta.name.to_lowercase() == name
            || meta.module.to_lowercase() == name
            || meta.commands.iter().any(|c| c.to_lowercase() == name);
        if hit {
            out.push(meta.module);
            if !all {
                break;
            }
        }
    }
    out
}

pub fn get_plugin_module(name: &str, all: bool) -> Vec<&'static str> {
    resolve_module(crate::plugins::get_plugins().iter().map(|p| &p.meta), name, all)
}

pub fn get_meta(module: &str) -> Option<&'static PluginMeta> {
    crate::plugins::get_plugins()
        .iter()
        .map(|p| &p.meta)
        .find(|m| m.module == module)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    All,
    Private,
    Group,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::All => "all",
            BlockType::Private => "private",
            BlockType::Group => "group",
        }
    }

    /// 解析 a/all, p/private, g/group
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "a" | "all" => Some(BlockType::All),
            "p" | "private" => Some(BlockType::Private),
            "g" | "group" => Some(BlockType::Group),
            _ => None,
        }
    }
}

/// 插件全局状态，内存缓存 + 数据库写回
#[derive(Default)]
pub struct PluginsManager {
    cache: RwLock<HashMap<String, PluginStatus>>,
}

static PLUGINS_MANAGER: OnceLock<PluginsManager> = OnceLock::new();

pub fn plugins_manager() -> &'static PluginsManager {
    PLUGINS_MANAGER.get_or_init(PluginsManager::default)
}

impl PluginsManager {
    /// 读取数据库状态，为新插件补齐记录
    pub async fn load<'a>(
        &self,
        db: &DatabaseConnection,
        metas: impl IntoIterator<Item = &'a PluginMeta>,
    ) -> Result<(), DbErr> {
        let mut rows: HashMap<String, PluginStatus> = plugin_status::all(db)
            .await?
            .into_iter()
            .map(|r| (r.module.clone(), r))
            .collect();

        for meta in metas {
            if !rows.contains_key(meta.module) {
                let row = PluginStatus {
                    module: meta.module.to_string(),
                    status: meta.default_status,
                    block_type: if meta.default_status {
                        String::new()
                    } else {
                        BlockType::All.as_str().to_string()
                    },
                    error: false,
                };
                plugin_status::save(db, &row).await?;
                rows.insert(row.module.clone(), row);
            }
        }

        if let Ok(mut cache) = self.cache.write() {
            *cache = rows;
        }
        Ok(())
    }

    pub fn get(&self, module: &str) -> Option<PluginStatus> {
        self.cache.read().ok()?.get(module).cloned()
    }

    async fn update(
        &self,
        db: &DatabaseConnection,
        module: &str,
        f: impl FnOnce(&mut PluginStatus),
    ) -> Result<(), DbErr> {
        let mut row = self.get(module).unwrap_or_else(|| PluginStatus {
            module: module.to_string(),
            status: true,
            block_type: String::new(),
            error: false,
        });
        f(&mut row);
        plugin_status::save(db, &row).await?;
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(module.to_string(), row);
        }
        Ok(())
    }

    pub async fn block_plugin(
        &self,
        db: &DatabaseConnection,
        module: &str,
        block_type: BlockType,
    ) -> Result<(), DbErr> {
        self.update(db, module, |r| {
            r.status = false;
            r.block_type = block_type.as_str().to_string();
        })
        .await
    }

    pub async fn unblock_plugin(&self, db: &DatabaseConnection, module: &str) -> Result<(), DbErr> {
        self.update(db, module, |r| {
            r.status = true;
            r.block_type.clear();
        })
        .await
    }

    pub async fn set_error(
        &self,
        db: &DatabaseConnection,
        module: &str,
        error: bool,
    ) -> Result<(), DbErr> {
        if self.get(module).map(|r| r.error) == Some(error) {
            return Ok(());
        }
        self.update(db, module, |r| r.error = error).await
    }

    /// 插件关闭时返回其禁用类型
    pub fn get_plugin_block_type(&self, module: &str) -> Option<BlockType> {
        let row = self.get(module)?;
        if row.status {
            return None;
        }
        BlockType::parse(&row.block_type).or(Some(BlockType::All))
    }

    /// 插件在群聊 / 私聊中是否被全局禁用
    pub fn is_blocked_for(&self, module: &str, is_group: bool) -> bool {
        match self.get_plugin_block_type(module) {
            None => false,
            Some(BlockType::All) => true,
            Some(BlockType::Group) => is_group,
            Some(BlockType::Private) => !is_group,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_db;

    const METAS: [PluginMeta; 2] = [
        PluginMeta {
            commands: &["戳一戳", "poke"],
            ..PluginMeta::new("poke", "戳一戳")
        },
        PluginMeta {
            default_status: false,
            ..PluginMeta::new("gallery", "色图")
        },
    ];

    #[test]
    fn resolve_by_name_alias_and_case() {
        assert_eq!(resolve_module(&METAS, "戳一戳", false), vec!["poke"]);
        assert_eq!(resolve_module(&METAS, "POKE", false), vec!["poke"]);
        assert_eq!(resolve_module(&METAS, "色图", true), vec!["gallery"]);
        assert!(resolve_module(&METAS, "签到", true).is_empty());
    }

    #[test]
    fn block_type_parsing() {
        assert_eq!(BlockType::parse("p"), Some(BlockType::Private));
        assert_eq!(BlockType::parse("GROUP"), Some(BlockType::Group));
        assert_eq!(BlockType::parse("x"), None);
    }

    #[tokio::test]
    async fn block_status_is_cached_and_persisted() {
        let db = test_db().await;
        let mgr = PluginsManager::default();
        mgr.load(&db, &METAS).await.unwrap();

        assert!(!mgr.is_blocked_for("poke", true));
        assert!(mgr.is_blocked_for("gallery", false));

        mgr.block_plugin(&db, "poke", BlockType::Group).await.unwrap();
        assert!(mgr.is_blocked_for("poke", true));
        assert!(!mgr.is_blocked_for("poke", false));

        mgr.set_error(&db, "poke", true).await.unwrap();

        let reloaded = PluginsManager::default();
        reloaded.load(&db, &METAS).await.unwrap();
        assert_eq!(reloaded.get_plugin_block_type("poke"), Some(BlockType::Group));
        assert!(reloaded.get("poke").unwrap().error);

        reloaded.unblock_plugin(&db, "poke").await.unwrap();
        assert_eq!(reloaded.get_plugin_block_type("poke"), None);
    }
}
