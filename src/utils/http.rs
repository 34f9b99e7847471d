use anyhow::{Context, Result, bail};
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, REFERER, USER_AGENT};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::fs;

static CLIENT: OnceLock<Client> = OnceLock::new();

/// 全局共享的 HTTP 客户端
pub fn client() -> &'static Client {
    CLIENT.get_or_init(|| {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.6; rv:2.0.1) Gecko/20100101 Firefox/4.0.1",
            ),
        );
        Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default()
    })
}

/// 下载内容到内存
pub async fn get_bytes(url: &str) -> Result<Vec<u8>> {
    let resp = client()
        .get(url)
        .send()
        .await
        .with_context(|| format!("请求失败: {}", url))?;
    if !resp.status().is_success() {
        bail!("请求 {} 返回状态码 {}", url, resp.status());
    }
    Ok(resp.bytes().await?.to_vec())
}

/// 下载文件到指定路径，目录不存在时自动创建
pub async fn download_file(url: &str, path: &Path, referer: Option<&str>) -> Result<()> {
    let mut req = client().get(url);
    if let Some(r) = referer {
        req = req.header(REFERER, r);
    }

    let resp = req
        .send()
        .await
        .with_context(|| format!("下载失败: {}", url))?;
    if !resp.status().is_success() {
        bail!("下载 {} 返回状态码 {}", url, resp.status());
    }
    let bytes = resp.bytes().await?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, &bytes)
        .await
        .with_context(|| format!("写入文件失败: {}", path.display()))?;
    Ok(())
}

/// 将 pixiv 反代链接替换为官方图床
pub fn change_pixiv_image_links(url: &str) -> String {
    if url.contains("i.pixiv.cat") {
        url.replace("i.pixiv.cat", "i.pximg.net")
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixiv_links_are_rewritten() {
        assert_eq!(
            change_pixiv_image_links("https://i.pixiv.cat/img-original/1.jpg"),
            "https://i.pximg.net/img-original/1.jpg"
        );
        assert_eq!(
            change_pixiv_image_links("https://example.com/1.jpg"),
            "https://example.com/1.jpg"
        );
    }
}
