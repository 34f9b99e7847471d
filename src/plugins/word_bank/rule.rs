use crate::event::segment_qq;
use crate::utils::http;
use crate::utils::image::hash_bytes;
use crate::warn;
use simd_json::OwnedValue;
use simd_json::derived::{ValueObjectAccess, ValueObjectAccessAsScalar};

/// 从消息段中提取的词条匹配信息
#[derive(Debug, Default, PartialEq)]
pub struct Parsed {
    pub self_id: i64,
    /// 消息以 @机器人 开头
    pub at_self: bool,
    /// 是否配置了昵称，未配置时不区分是否对机器人说话
    pub has_nickname: bool,
    /// 消息以昵称开头时匹配到的昵称
    pub nickname: Option<String>,
    /// 去掉开头 @ 和昵称后的纯文本
    pub text: String,
    pub images: Vec<String>,
    /// 含有 @ 时按段重建的文本
    pub with_at: Option<String>,
}

fn seg_text(seg: &OwnedValue) -> Option<&str> {
    seg.get("data").and_then(|d| d.get_str("text"))
}

/// 把文本段和 @ 段按顺序拼成 `[at:qq]文本` 形式
pub fn render_segments(segments: &[OwnedValue]) -> String {
    let mut out = String::new();
    for seg in segments {
        match seg.get_str("type") {
            Some("text") => out.push_str(seg_text(seg).unwrap_or("")),
            Some("at") => {
                if let Some(qq) = seg.get("data").and_then(segment_qq) {
                    out.push_str(&format!("[at:{}]", qq));
                }
            }
            _ => {}
        }
    }
    out.trim().to_string()
}

pub fn parse(segments: &[OwnedValue], self_id: i64, nicknames: &[String]) -> Parsed {
    let mut segs: Vec<&OwnedValue> = segments
        .iter()
        .filter(|s| s.get_str("type") != Some("reply"))
        .collect();
    let mut parsed = Parsed {
        self_id,
        has_nickname: nicknames.iter().any(|n| !n.is_empty()),
        ..Default::default()
    };

    // 开头的 @机器人
    let first = segs.iter().position(|s| {
        !(s.get_str("type") == Some("text") && seg_text(s).is_some_and(|t| t.trim().is_empty()))
    });
    if let Some(i) = first
        && segs[i].get_str("type") == Some("at")
        && segs[i].get("data").and_then(segment_qq) == Some(self_id.to_string())
    {
        parsed.at_self = true;
        segs.drain(..=i);
    }

    let rest: Vec<OwnedValue> = segs.into_iter().cloned().collect();
    let mut text: String = rest
        .iter()
        .filter(|s| s.get_str("type") == Some("text"))
        .filter_map(|s| seg_text(s))
        .collect::<String>()
        .trim()
        .to_string();

    if !parsed.at_self
        && let Some(nick) = nicknames
            .iter()
            .filter(|n| !n.is_empty() && text.starts_with(n.as_str()))
            .max_by_key(|n| n.len())
    {
        parsed.nickname = Some(nick.clone());
        text = text[nick.len()..].trim_start().to_string();
    }
    parsed.text = text;

    parsed.images = rest
        .iter()
        .filter(|s| s.get_str("type") == Some("image"))
        .filter_map(|s| {
            let data = s.get("data")?;
            data.get_str("url").or_else(|| data.get_str("file")).map(String::from)
        })
        .collect();

    if rest.iter().any(|s| s.get_str("type") == Some("at")) {
        let mut rendered = render_segments(&rest);
        if let Some(nick) = &parsed.nickname
            && let Some(stripped) = rendered.strip_prefix(nick.as_str())
        {
            rendered = stripped.trim_start().to_string();
        }
        parsed.with_at = Some(rendered);
    }
    parsed
}

impl Parsed {
    /// 只有一张图片且没有文本时需要图片哈希
    pub fn needs_image_hash(&self) -> bool {
        self.text.is_empty() && self.images.len() == 1
    }

    pub fn problem(&self, image_hash: Option<&str>) -> String {
        let mut problem = self.text.clone();
        if self.needs_image_hash()
            && let Some(hash) = image_hash
        {
            problem = hash.to_string();
        }
        if let Some(with_at) = &self.with_at {
            problem = with_at.clone();
        }
        if self.at_self && self.has_nickname {
            return format!("[at:{}]{}", self.self_id, problem);
        }
        match &self.nickname {
            Some(nick) if !problem.is_empty() => format!("{}{}", nick, problem),
            _ => problem,
        }
    }
}

/// 下载图片并计算平均哈希，失败时记录日志
pub async fn image_hash(url: &str) -> Option<String> {
    let bytes = match http::get_bytes(url).await {
        Ok(b) => b,
        Err(e) => {
            warn!(target: "WordBank", "获取图片失败: {}", e);
            return None;
        }
    };
    match tokio::task::spawn_blocking(move || hash_bytes(&bytes)).await {
        Ok(Ok(hash)) => Some(hash),
        Ok(Err(e)) => {
            warn!(target: "WordBank", "图片哈希计算失败: {}", e);
            None
        }
        Err(e) => {
            warn!(target: "WordBank", "图片哈希任务异常: {}", e);
            None
        }
    }
}

/// 根据消息内容得到用于匹配词条的问题
pub async fn problem_for(segments: &[OwnedValue], self_id: i64, nicknames: &[String]) -> String {
    let parsed = parse(segments, self_id, nicknames);
    let hash = if parsed.needs_image_hash() {
        image_hash(&parsed.images[0]).await
    } else {
        None
    };
    parsed.problem(hash.as_deref())
}
