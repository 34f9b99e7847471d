use crate::utils::paths::data_path;
use crate::{error, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{OnceLock, RwLock};

fn default_level() -> i32 {
    5
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSetting {
    #[serde(default = "default_level")]
    pub level: i32,
    /// Bot 是否在该群处于醒着的状态
    #[serde(default = "default_true")]
    pub status: bool,
    /// 被禁用的插件，超级用户禁用的记为 "module:super"
    #[serde(default)]
    pub close_plugins: Vec<String>,
    #[serde(default)]
    pub group_task_status: HashMap<String, bool>,
}

impl Default for GroupSetting {
    fn default() -> Self {
        Self {
            level: default_level(),
            status: true,
            close_plugins: Vec::new(),
            group_task_status: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuperSetting {
    #[serde(default)]
    pub close_tasks: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GroupData {
    #[serde(default)]
    group_manager: BTreeMap<String, GroupSetting>,
    #[serde(default, rename = "super")]
    super_: SuperSetting,
    /// 被动任务 module -> 显示名称
    #[serde(default)]
    task: BTreeMap<String, String>,
}

/// 群功能开关管理 (JSON 持久化)
pub struct GroupManager {
    path: PathBuf,
    data: RwLock<GroupData>,
    /// 被动任务的默认状态，未注册的视为开启
    task_defaults: RwLock<HashMap<String, bool>>,
}

static GROUP_MANAGER: OnceLock<GroupManager> = OnceLock::new();

/// 全局群管理器，首次访问时从 data/manager/group_manager.json 加载
pub fn group_manager() -> &'static GroupManager {
    GROUP_MANAGER
        .get_or_init(|| GroupManager::load(data_path().join("manager").join("group_manager.json")))
}

impl GroupManager {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(target: "GroupManager", "解析 {} 失败，使用空配置: {}", path.display(), e);
                GroupData::default()
            }),
            Err(_) => GroupData::default(),
        };
        Self {
            path,
            data: RwLock::new(data),
            task_defaults: RwLock::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> std::io::Result<()> {
        let text = {
            let guard = self
                .data
                .read()
                .map_err(|_| std::io::Error::other("group manager lock poisoned"))?;
            serde_json::to_string_pretty(&*guard)?
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, text)
    }

    fn save_or_log(&self) {
        if let Err(e) = self.save() {
            error!(target: "GroupManager", "保存群配置失败: {}", e);
        }
    }

    fn read<R>(&self, f: impl FnOnce(&GroupData) -> R) -> Option<R> {
        self.data.read().ok().map(|g| f(&g))
    }

    /// 修改数据，save 为 true 时写回文件
    fn write(&self, save: bool, f: impl FnOnce(&mut GroupData)) {
        if let Ok(mut guard) = self.data.write() {
            f(&mut guard);
        }
        if save {
            self.save_or_log();
        }
    }

    fn task_default(&self, task: &str) -> bool {
        self.task_defaults
            .read()
            .ok()
            .and_then(|d| d.get(task).copied())
            .unwrap_or(true)
    }

    // ================== 被动任务 ==================

    /// 已注册的被动任务 module -> 名称
    pub fn get_task_data(&self) -> BTreeMap<String, String> {
        self.read(|d| d.task.clone()).unwrap_or_default()
    }

    pub fn register_task(&self, module: &str, name: &str, default_status: bool) {
        if let Ok(mut defaults) = self.task_defaults.write() {
            defaults.insert(module.to_string(), default_status);
        }
        let known = self
            .read(|d| d.task.get(module).map(|n| n == name).unwrap_or(false))
            .unwrap_or(false);
        if !known {
            self.write(true, |d| {
                d.task.insert(module.to_string(), name.to_string());
            });
        }
    }

    pub fn check_group_task_status(&self, group_id: i64, task: &str) -> bool {
        let default = self.task_default(task);
        self.read(|d| {
            d.group_manager
                .get(&group_id.to_string())
                .and_then(|g| g.group_task_status.get(task).copied())
                .unwrap_or(default)
        })
        .unwrap_or(default)
    }

    /// 全局被动状态
    pub fn check_task_super_status(&self, task: &str) -> bool {
        self.read(|d| !d.super_.close_tasks.iter().any(|t| t == task))
            .unwrap_or(true)
    }

    /// 全局与群内都开启时被动任务才会触发
    pub fn is_task_enabled(&self, group_id: i64, task: &str) -> bool {
        self.check_task_super_status(task) && self.check_group_task_status(group_id, task)
    }

    fn set_group_task(&self, group_id: i64, task: &str, status: bool) {
        self.write(true, |d| {
            d.group_manager
                .entry(group_id.to_string())
                .or_default()
                .group_task_status
                .insert(task.to_string(), status);
        });
    }

    pub fn open_group_task(&self, group_id: i64, task: &str) {
        self.set_group_task(group_id, task, true);
    }

    pub fn close_group_task(&self, group_id: i64, task: &str) {
        self.set_group_task(group_id, task, false);
    }

    pub fn open_global_task(&self, task: &str) {
        self.write(true, |d| d.super_.close_tasks.retain(|t| t != task));
    }

    pub fn close_global_task(&self, task: &str) {
        self.write(true, |d| {
            if !d.super_.close_tasks.iter().any(|t| t == task) {
                d.super_.close_tasks.push(task.to_string());
            }
        });
    }

    // ================== 插件开关 ==================

    pub fn block_plugin(&self, module: &str, group_id: i64, save: bool) {
        self.write(save, |d| {
            let setting = d.group_manager.entry(group_id.to_string()).or_default();
            if !setting.close_plugins.iter().any(|m| m == module) {
                setting.close_plugins.push(module.to_string());
            }
        });
    }

    pub fn unblock_plugin(&self, module: &str, group_id: i64, save: bool) {
        self.write(save, |d| {
            if let Some(setting) = d.group_manager.get_mut(&group_id.to_string()) {
                setting.close_plugins.retain(|m| m != module);
            }
        });
    }

    /// 插件在群内是否开启
    pub fn get_plugin_status(&self, module: &str, group_id: i64) -> bool {
        self.read(|d| {
            d.group_manager
                .get(&group_id.to_string())
                .map(|g| !g.close_plugins.iter().any(|m| m == module))
                .unwrap_or(true)
        })
        .unwrap_or(true)
    }

    /// 插件是否未被超级用户在该群禁用
    pub fn get_plugin_super_status(&self, module: &str, group_id: i64) -> bool {
        self.get_plugin_status(&format!("{}:super", module), group_id)
    }

    // ================== Bot 状态 ==================

    pub fn check_group_bot_status(&self, group_id: i64) -> bool {
        self.read(|d| {
            d.group_manager
                .get(&group_id.to_string())
                .map(|g| g.status)
                .unwrap_or(true)
        })
        .unwrap_or(true)
    }

    pub fn turn_on_group_bot_status(&self, group_id: i64) {
        self.write(true, |d| {
            d.group_manager.entry(group_id.to_string()).or_default().status = true;
        });
    }

    pub fn shutdown_group_bot_status(&self, group_id: i64) {
        self.write(true, |d| {
            d.group_manager.entry(group_id.to_string()).or_default().status = false;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> GroupManager {
        GroupManager::load(dir.path().join("manager").join("group_manager.json"))
    }

    #[test]
    fn unseen_group_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let gm = manager(&dir);
        gm.register_task("group_welcome", "进群欢迎", true);
        gm.register_task("zwa", "早晚安", false);

        assert!(gm.check_group_bot_status(1));
        assert!(gm.check_group_task_status(1, "group_welcome"));
        assert!(!gm.check_group_task_status(1, "zwa"));
        assert!(gm.get_plugin_status("poke", 1));
        assert_eq!(gm.get_task_data().get("zwa").map(String::as_str), Some("早晚安"));
    }

    #[test]
    fn toggles_are_persisted() {
        let dir = TempDir::new().unwrap();
        {
            let gm = manager(&dir);
            gm.close_group_task(1, "group_welcome");
            gm.close_global_task("zwa");
            gm.block_plugin("poke", 1, true);
            gm.block_plugin("help:super", 1, true);
            gm.shutdown_group_bot_status(1);
        }

        let gm = manager(&dir);
        assert!(!gm.check_group_task_status(1, "group_welcome"));
        assert!(!gm.check_task_super_status("zwa"));
        assert!(!gm.get_plugin_status("poke", 1));
        assert!(gm.get_plugin_status("poke", 2));
        assert!(!gm.get_plugin_super_status("help", 1));
        assert!(!gm.check_group_bot_status(1));

        gm.unblock_plugin("poke", 1, true);
        gm.open_global_task("zwa");
        gm.turn_on_group_bot_status(1);
        assert!(gm.get_plugin_status("poke", 1));
        assert!(gm.check_task_super_status("zwa"));
        assert!(gm.check_group_bot_status(1));
    }

    #[test]
    fn file_layout_uses_super_key() {
        let dir = TempDir::new().unwrap();
        let gm = manager(&dir);
        gm.close_global_task("zwa");
        let text = std::fs::read_to_string(gm.path()).unwrap();
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["super"]["close_tasks"][0], "zwa");
    }

    #[test]
    fn task_enabled_requires_both_switches() {
        let dir = TempDir::new().unwrap();
        let gm = manager(&dir);
        assert!(gm.is_task_enabled(1, "group_welcome"));
        gm.close_global_task("group_welcome");
        assert!(!gm.is_task_enabled(1, "group_welcome"));
    }
}
