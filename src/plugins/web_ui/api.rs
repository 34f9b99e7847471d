use super::auth::AuthUser;
use crate::manager::plugins::{PluginType, plugins_manager};
use crate::plugins::get_plugins;
use axum::Json;
use axum::extract::Query;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// 接口统一返回格式
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResult {
    pub suc: bool,
    pub code: i32,
    pub info: String,
    pub warning: Option<String>,
    pub data: Value,
}

impl ApiResult {
    pub fn ok(data: impl Serialize, info: impl Into<String>) -> Self {
        Self {
            suc: true,
            code: 200,
            info: info.into(),
            warning: None,
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }

    pub fn fail(info: impl Into<String>, code: i32) -> Self {
        Self {
            suc: false,
            code,
            info: info.into(),
            warning: None,
            data: Value::Null,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct FolderSize {
    pub name: String,
    /// MiB
    pub size: f64,
    pub full_path: Option<String>,
    pub is_dir: bool,
}

const MIB: f64 = 1024.0 * 1024.0;

fn dir_size(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|e| {
            let path = e.path();
            if path.is_dir() {
                dir_size(&path)
            } else {
                e.metadata().map(|m| m.len()).unwrap_or(0)
            }
        })
        .sum()
}

/// 列出目录下各文件夹的大小，普通文件合计为 other_file
pub fn system_disk(full_path: Option<&str>) -> std::io::Result<Vec<FolderSize>> {
    let base = full_path.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    let mut list = Vec::new();
    let mut other = 0u64;
    for entry in std::fs::read_dir(&base)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            list.push(FolderSize {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: dir_size(&path) as f64 / MIB,
                full_path: Some(path.to_string_lossy().into_owned()),
                is_dir: true,
            });
        } else {
            other += entry.metadata()?.len();
        }
    }
    if other > 0 {
        list.push(FolderSize {
            name: "other_file".to_string(),
            size: other as f64 / MIB,
            full_path: full_path.map(str::to_string),
            is_dir: false,
        });
    }
    Ok(list)
}

#[derive(Deserialize)]
pub struct DiskQuery {
    full_path: Option<String>,
}

/// GET /api/system/disk
pub async fn get_system_disk(_user: AuthUser, Query(query): Query<DiskQuery>) -> Json<ApiResult> {
    let full_path = query.full_path.filter(|p| !p.is_empty());
    let result = tokio::task::spawn_blocking(move || system_disk(full_path.as_deref())).await;
    match result {
        Ok(Ok(list)) => Json(ApiResult::ok(list, "获取磁盘信息成功")),
        Ok(Err(e)) => Json(ApiResult::fail(format!("读取目录失败: {}", e), 500)),
        Err(e) => Json(ApiResult::fail(format!("任务异常: {}", e), 500)),
    }
}

#[derive(Serialize)]
struct PluginInfo {
    module: &'static str,
    name: &'static str,
    plugin_type: &'static str,
    menu_type: &'static str,
    usage: &'static str,
    status: bool,
    block_type: Option<&'static str>,
    error: bool,
}

fn type_name(t: PluginType) -> &'static str {
    match t {
        PluginType::Normal => "normal",
        PluginType::Admin => "admin",
        PluginType::Superuser => "superuser",
        PluginType::Hidden => "hidden",
    }
}

/// GET /api/plugins
pub async fn get_plugin_list(_user: AuthUser) -> Json<ApiResult> {
    let pm = plugins_manager();
    let list: Vec<PluginInfo> = get_plugins()
        .iter()
        .map(|p| &p.meta)
        .filter(|m| m.plugin_type != PluginType::Hidden)
        .map(|m| {
            let row = pm.get(m.module);
            PluginInfo {
                module: m.module,
                name: m.name,
                plugin_type: type_name(m.plugin_type),
                menu_type: m.main_menu(),
                usage: m.usage,
                status: row.as_ref().is_none_or(|r| r.status),
                block_type: pm.get_plugin_block_type(m.module).map(|b| b.as_str()),
                error: row.is_some_and(|r| r.error),
            }
        })
        .collect();
    Json(ApiResult::ok(list, "拿到信息啦!"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn disk_sizes_group_plain_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("image/sub")).unwrap();
        std::fs::write(dir.path().join("image/sub/a.bin"), vec![0u8; 1024 * 1024]).unwrap();
        std::fs::write(dir.path().join("readme.txt"), vec![0u8; 512 * 1024]).unwrap();

        let base = dir.path().to_string_lossy().into_owned();
        let list = system_disk(Some(&base)).unwrap();
        assert_eq!(list.len(), 2);
        let image = list.iter().find(|f| f.name == "image").unwrap();
        assert!(image.is_dir);
        assert!((image.size - 1.0).abs() < 1e-9);
        let other = list.iter().find(|f| f.name == "other_file").unwrap();
        assert!(!other.is_dir);
        assert!((other.size - 0.5).abs() < 1e-9);
        assert_eq!(other.full_path.as_deref(), Some(base.as_str()));
    }

    #[test]
    fn result_shape() {
        let v = serde_json::to_value(ApiResult::fail("x", 998)).unwrap();
        assert_eq!(v["suc"], false);
        assert_eq!(v["code"], 998);
        assert!(v["warning"].is_null());
        assert!(v["data"].is_null());
    }
}
