use crate::event::Context;
use simd_json::OwnedValue;
use simd_json::derived::{ValueObjectAccess, ValueObjectAccessAsArray, ValueObjectAccessAsScalar};

pub struct CommandMatch {
    /// 指令之后剩余的消息段
    pub args: Vec<OwnedValue>,
}

impl CommandMatch {
    /// 参数中的纯文本 (去除首尾空白)
    pub fn text(&self) -> String {
        let mut out = String::new();
        for seg in &self.args {
            if seg.get_str("type") == Some("text")
                && let Some(t) = seg.get("data").and_then(|d| d.get_str("text"))
            {
                out.push_str(t);
            }
        }
        out.trim().to_string()
    }

    /// 参数中的图片 url
    pub fn images(&self) -> Vec<String> {
        self.args
            .iter()
            .filter(|seg| seg.get_str("type") == Some("image"))
            .filter_map(|seg| {
                let data = seg.get("data")?;
                data.get_str("url")
                    .or_else(|| data.get_str("file"))
                    .map(String::from)
            })
            .collect()
    }
}

pub fn get_prefixes(ctx: &Context) -> Vec<String> {
    ctx.config
        .read()
        .map(|c| c.command_prefix.clone())
        .unwrap_or_default()
}

/// 解析指令：跳过头部的引用回复、@ 和空白，匹配 [Prefix][Command]
pub fn match_command(ctx: &Context, command_name: &str) -> Option<CommandMatch> {
    let prefixes = get_prefixes(ctx);
    let msg_arr = ctx.as_message()?.0.get_array("message")?;
    match_segments(msg_arr, &prefixes, command_name)
}

pub fn match_segments(
    msg_arr: &[OwnedValue],
    prefixes: &[String],
    command_name: &str,
) -> Option<CommandMatch> {
    // 空前缀放到最后尝试，避免 "/帮助" 被空前缀截断
    let mut ordered: Vec<&String> = prefixes.iter().filter(|p| !p.is_empty()).collect();
    ordered.extend(prefixes.iter().filter(|p| p.is_empty()));

    for (i, segment) in msg_arr.iter().enumerate() {
        let type_ = segment.get_str("type")?;
        let data = segment.get("data")?;

        match type_ {
            "reply" | "at" => {}
            "text" => {
                let trimmed_start = data.get_str("text").unwrap_or("").trim_start();
                if trimmed_start.is_empty() {
                    continue;
                }

                for prefix in &ordered {
                    let target = format!("{}{}", prefix, command_name);
                    if let Some(rest) = trimmed_start.strip_prefix(target.as_str()) {
                        let mut args = Vec::new();

                        let args_text = rest.trim_start();
                        if !args_text.is_empty() {
                            let mut new_seg = segment.clone();
                            new_seg["data"]["text"] = OwnedValue::from(args_text);
                            args.push(new_seg);
                        }

                        for seg in msg_arr.iter().skip(i + 1) {
                            args.push(seg.clone());
                        }

                        return Some(CommandMatch { args });
                    }
                }
                return None;
            }
            _ => return None,
        }
    }

    None
}

/// 开关类指令："开启xxx" / "关闭xxx"
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Switch {
    Open,
    Close,
}

impl Switch {
    pub fn label(&self) -> &'static str {
        match self {
            Switch::Open => "开启",
            Switch::Close => "关闭",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tests::parse;
    use simd_json::base::ValueAsArray;

    fn segments(json: &str) -> Vec<OwnedValue> {
        parse(json).as_array().unwrap().clone()
    }

    fn prefixes() -> Vec<String> {
        vec!["".to_string(), "/".to_string()]
    }

    #[test]
    fn matches_with_and_without_prefix() {
        let msg = segments(r#"[{"type":"text","data":{"text":"/帮助 签到"}}]"#);
        let m = match_segments(&msg, &prefixes(), "帮助").unwrap();
        assert_eq!(m.text(), "签到");

        let msg = segments(r#"[{"type":"text","data":{"text":"帮助"}}]"#);
        let m = match_segments(&msg, &prefixes(), "帮助").unwrap();
        assert!(m.args.is_empty());
    }

    #[test]
    fn skips_leading_reply_and_at() {
        let msg = segments(
            r#"[{"type":"reply","data":{"id":"99"}},{"type":"at","data":{"qq":"12345"}},
                {"type":"text","data":{"text":" 添加词条 问你好答在呢"}},
                {"type":"image","data":{"url":"http://img"}}]"#,
        );
        let m = match_segments(&msg, &prefixes(), "添加词条").unwrap();
        assert_eq!(m.text(), "问你好答在呢");
        assert_eq!(m.images(), vec!["http://img".to_string()]);
    }

    #[test]
    fn image_first_does_not_match() {
        let msg = segments(
            r#"[{"type":"image","data":{"url":"http://img"}},{"type":"text","data":{"text":"帮助"}}]"#,
        );
        assert!(match_segments(&msg, &prefixes(), "帮助").is_none());
    }
}
