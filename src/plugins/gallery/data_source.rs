use crate::models::gallery_image::{self, Model, NewImage};
use crate::utils::http::{change_pixiv_image_links, client};
use crate::utils::image::{compress_image, convert_to_origin_type, hash_file};
use crate::utils::remove_if_exists;
use crate::{info, warn};
use anyhow::{Context as _, Result, anyhow};
use reqwest::header::REFERER;
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// 超过该大小的图片会被压缩
const COMPRESS_THRESHOLD: u64 = 1024 * 1024 * 3 / 2;
const COMPRESS_RATIO: f32 = 0.9;
const PIXIV_REFERER: &str = "https://www.pixiv.net";

pub fn gallery_dir(image_dir: &Path, is_r18: bool) -> PathBuf {
    image_dir.join(if is_r18 { "_r18" } else { "_setu" })
}

/// 一次更新的结果
#[derive(Debug, Default)]
pub struct UpdateReport {
    /// 数据库中的图片总数
    pub count: usize,
    pub success: usize,
    /// 每类错误只保留第一条
    pub errors: Vec<String>,
    error_kinds: Vec<&'static str>,
}

impl UpdateReport {
    fn push_error(&mut self, kind: &'static str, err: &anyhow::Error) {
        if !self.error_kinds.contains(&kind) {
            self.error_kinds.push(kind);
            self.errors.push(format!("{}: {:#}", kind, err));
        }
    }

    pub fn should_notify(&self, flag: bool) -> bool {
        flag || self.success > 0 || !self.errors.is_empty()
    }

    pub fn message(&self, time: &str) -> String {
        format!(
            "{} 更新 色图 完成，本地存在 {} 张，实际更新 {} 张，以下为更新时未知错误：\n{}",
            time,
            self.count,
            self.success,
            self.errors.join("\n")
        )
    }
}

enum RowOutcome {
    Skipped,
    Updated,
    Removed,
}

struct StepError {
    kind: &'static str,
    err: anyhow::Error,
}

trait StepContext<T> {
    fn step(self, kind: &'static str) -> Result<T, StepError>;
}

impl<T, E: Into<anyhow::Error>> StepContext<T> for Result<T, E> {
    fn step(self, kind: &'static str) -> Result<T, StepError> {
        self.map_err(|e| StepError { kind, err: e.into() })
    }
}

/// 下载失败的页面通常是一段 html 文本
pub fn is_not_found_page(bytes: &[u8]) -> bool {
    String::from_utf8_lossy(bytes).contains("404 Not Found")
}

/// 不检查状态码，直接把响应内容写入文件
async fn fetch_to(url: &str, path: &Path) -> Result<()> {
    let resp = client()
        .get(url)
        .header(REFERER, PIXIV_REFERER)
        .send()
        .await
        .with_context(|| format!("下载失败: {}", url))?;
    let bytes = resp.bytes().await?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, &bytes).await?;
    Ok(())
}

/// 移动文件，跨设备时退回复制
fn move_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    std::fs::copy(src, dst)?;
    std::fs::remove_file(src)
}

/// 把目录中序号为 `from` 的文件改名为序号 `to`，保留扩展名
pub fn relocate_file(dir: &Path, from: i32, to: i32) -> std::io::Result<Option<PathBuf>> {
    let stem = from.to_string();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.file_stem().and_then(|s| s.to_str()) != Some(stem.as_str()) {
            continue;
        }
        let target = match path.extension() {
            Some(ext) => dir.join(format!("{}.{}", to, ext.to_string_lossy())),
            None => dir.join(to.to_string()),
        };
        std::fs::rename(&path, &target)?;
        return Ok(Some(target));
    }
    Ok(None)
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("jpg")
        .to_ascii_lowercase()
}

async fn process_row(
    db: &DatabaseConnection,
    row: Model,
    image_dir: &Path,
    temp_dir: &Path,
) -> Result<RowOutcome, StepError> {
    let dir = gallery_dir(image_dir, row.is_r18);
    let mut local = dir.join(row.file_name());

    // 修正已有文件的扩展名
    if local.exists() {
        let fixed = tokio::task::spawn_blocking({
            let local = local.clone();
            move || convert_to_origin_type(&local)
        })
        .await
        .step("任务异常")?;
        if let Ok(fixed) = fixed {
            local = fixed;
        }
    }
    if local.exists() && !row.img_hash.is_empty() {
        if extension_of(&local) != row.format {
            let hash = row.img_hash.clone();
            let format = extension_of(&local);
            gallery_image::update_hash(db, row, &hash, &format)
                .await
                .step("数据库错误")?;
        }
        return Ok(RowOutcome::Skipped);
    }

    let temp = temp_dir.join(format!("{}{}", if row.is_r18 { "r18_" } else { "" }, row.file_name()));
    remove_if_exists(&temp).step("文件错误")?;
    let url = change_pixiv_image_links(&row.img_url);
    fetch_to(&url, &temp).await.step("下载失败")?;

    let converted = tokio::task::spawn_blocking({
        let temp = temp.clone();
        move || convert_to_origin_type(&temp)
    })
    .await
    .step("任务异常")?;

    let temp = match converted {
        Ok(path) => path,
        Err(e) => {
            let body = tokio::fs::read(&temp).await.unwrap_or_default();
            if !is_not_found_page(&body) {
                return Err(StepError { kind: "无法识别的图片", err: e });
            }
            remove_if_exists(&temp).step("文件错误")?;
            remove_if_exists(&local).step("文件错误")?;
            let freed = row.local_id;
            let moved = gallery_image::delete_image(db, &row.pid, &row.img_url)
                .await
                .step("数据库错误")?;
            if let Some(max_id) = moved
                && dir.exists()
            {
                relocate_file(&dir, max_id, freed).step("文件错误")?;
            }
            info!(target: "Gallery", "PID {} 已失效，删除记录 local_id: {}", row.pid, freed);
            return Ok(RowOutcome::Removed);
        }
    };

    let format = extension_of(&temp);
    let target = dir.join(format!("{}.{}", row.local_id, format));
    let hash = tokio::task::spawn_blocking({
        let temp = temp.clone();
        let target = target.clone();
        move || -> Result<String> {
            std::fs::create_dir_all(target.parent().ok_or_else(|| anyhow!("无效路径"))?)?;
            let size = std::fs::metadata(&temp)?.len();
            if size > COMPRESS_THRESHOLD {
                compress_image(&temp, &target, COMPRESS_RATIO)?;
            } else {
                move_file(&temp, &target)?;
            }
            hash_file(&target)
        }
    })
    .await
    .step("任务异常")?
    .step("图片处理失败")?;

    if local != target {
        remove_if_exists(&local).step("文件错误")?;
    }
    gallery_image::update_hash(db, row, &hash, &format)
        .await
        .step("数据库错误")?;
    Ok(RowOutcome::Updated)
}

/// 检查所有图库记录，下载缺失的图片并计算哈希
pub async fn update_gallery(
    db: &DatabaseConnection,
    image_dir: &Path,
    temp_dir: &Path,
) -> Result<UpdateReport> {
    let rows = gallery_image::all_desc(db).await?;
    let mut report = UpdateReport {
        count: rows.len(),
        ..Default::default()
    };

    for row in rows {
        let pid = row.pid.clone();
        match process_row(db, row, image_dir, temp_dir).await {
            Ok(RowOutcome::Updated) => {
                report.success += 1;
                info!(target: "Gallery", "更新图片成功 PID: {}", pid);
            }
            Ok(RowOutcome::Removed) => report.count = report.count.saturating_sub(1),
            Ok(RowOutcome::Skipped) => {}
            Err(StepError { kind, err }) => {
                warn!(target: "Gallery", "更新图片 PID {} 失败: {:#}", pid, err);
                report.push_error(kind, &err);
            }
        }
    }
    Ok(report)
}

#[derive(Deserialize)]
struct LegacyImage {
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: String,
    pid: serde_json::Value,
    #[serde(default)]
    img_hash: String,
    img_url: String,
    #[serde(default)]
    tags: Vec<String>,
}

fn value_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 导入结果 (成功, 失败)
pub async fn import_legacy_data(db: &DatabaseConnection, text_dir: &Path) -> Result<(usize, usize)> {
    let setu_file = text_dir.join("setu_data.json");
    let r18_file = text_dir.join("r18_setu_data.json");
    if !setu_file.exists() && !r18_file.exists() {
        return Ok((0, 0));
    }

    let (mut index, mut r18_index) = (0, 0);
    let (mut count, mut fail) = (0, 0);
    for (file, from_normal) in [(&setu_file, true), (&r18_file, false)] {
        if !file.exists() {
            continue;
        }
        let raw = tokio::fs::read_to_string(file).await?;
        // 保持文件中的顺序
        let data: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&raw).with_context(|| format!("解析失败: {}", file.display()))?;

        for (key, value) in data {
            let mut img: LegacyImage = match serde_json::from_value(value) {
                Ok(img) => img,
                Err(e) => {
                    warn!(target: "Gallery", "旧数据 {} 格式错误: {}", key, e);
                    fail += 1;
                    continue;
                }
            };
            if from_normal {
                img.tags.retain(|t| t != "R-18");
            }
            let is_r18 = img.tags.iter().any(|t| t == "R-18");
            let idx = if is_r18 { r18_index } else { index };
            let pid = value_to_string(&img.pid);
            let img_url = change_pixiv_image_links(&img.img_url);

            if gallery_image::exists(db, &pid, &img_url).await? {
                fail += 1;
                info!(target: "Gallery", "添加旧图片数据失败，图片重复 PID: {} index: {}", pid, idx);
                continue;
            }
            gallery_image::create(
                db,
                NewImage {
                    local_id: idx,
                    title: img.title,
                    author: img.author,
                    pid,
                    img_hash: img.img_hash,
                    img_url,
                    is_r18,
                    tags: img.tags.join(","),
                },
            )
            .await?;
            count += 1;
            if is_r18 {
                r18_index += 1;
            } else {
                index += 1;
            }
        }
        remove_if_exists(file)?;
    }

    for name in ["setu_url.json", "setu_r18_url.json"] {
        remove_if_exists(&text_dir.join(name))?;
    }
    info!(target: "Gallery", "更新旧图片数据完成，成功 {} 条，失败 {} 条", count, fail);
    Ok((count, fail))
}

/// 删除旧版本留下的压缩包目录
pub fn remove_rar_dirs(image_dir: &Path) {
    for name in ["setu_rar", "r18_rar", "rar"] {
        let _ = std::fs::remove_dir_all(image_dir.join(name));
    }
}
