use crate::adapters::Runtime;
use crate::adapters::onebot::{LockedWriter, process_frame};
use crate::config::BotConfig;
use crate::event::{BotStatus, EventType, LoginUser};
use crate::matcher::Matcher;
use crate::message::Message;
use crate::{info, warn};
use futures_util::Sink;
use futures_util::future::BoxFuture;
use serde::Serialize;
use simd_json::OwnedValue;
use simd_json::base::{ValueAsArray, ValueAsScalar};
use simd_json::derived::{ValueObjectAccess, ValueObjectAccessAsScalar};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

#[derive(Serialize)]
struct ConsoleSender {
    user_id: i64,
    nickname: &'static str,
    card: &'static str,
    role: &'static str,
}

/// 控制台输入模拟成的 OneBot 消息事件
#[derive(Serialize)]
struct ConsoleEvent {
    post_type: &'static str,
    message_type: &'static str,
    sub_type: &'static str,
    time: i64,
    self_id: i64,
    message_id: i64,
    user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_id: Option<i64>,
    sender: ConsoleSender,
    raw_message: String,
    message: Message,
}

/// 输入 "g<群号> 内容" 模拟群聊消息，否则为私聊
fn split_target(line: &str) -> (Option<i64>, &str) {
    if let Some(rest) = line.strip_prefix('g')
        && let Some((gid, text)) = rest.split_once(' ')
        && let Ok(gid) = gid.parse::<i64>()
    {
        return (Some(gid), text.trim());
    }
    (None, line)
}

fn console_event(user_id: i64, line: &str) -> ConsoleEvent {
    let (group_id, text) = split_target(line);
    let now = chrono::Local::now().timestamp();
    ConsoleEvent {
        post_type: "message",
        message_type: if group_id.is_some() { "group" } else { "private" },
        sub_type: if group_id.is_some() { "normal" } else { "friend" },
        time: now,
        self_id: 0,
        message_id: now,
        user_id,
        group_id,
        sender: ConsoleSender {
            user_id,
            nickname: "ConsoleUser",
            card: "",
            role: "owner",
        },
        raw_message: text.to_string(),
        message: Message::new().text(text),
    }
}

pub fn entry(_bot: BotConfig, runtime: Runtime) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        // 控制台用户视为第一个超级用户
        let user_id = runtime
            .config
            .read()
            .ok()
            .and_then(|c| c.first_superuser())
            .unwrap_or(1);
        info!(target: "Console", "控制台模式已启动，USER {} | 输入 \"g<群号> 内容\" 模拟群聊", user_id);

        let writer: LockedWriter = Arc::new(AsyncMutex::new(Box::new(ConsoleSink)));
        let matcher = Arc::new(Matcher::new());
        let bot = BotStatus {
            adapter: "console".to_string(),
            platform: "console".to_string(),
            login_user: LoginUser {
                id: "0".to_string(),
                name: Some("ConsoleBot".to_string()),
                nick: Some("ConsoleBot".to_string()),
                avatar: None,
            },
        };

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut frame = match simd_json::to_vec(&console_event(user_id, line)) {
                Ok(b) => b,
                Err(e) => {
                    warn!(target: "Console", "构造模拟消息失败: {}", e);
                    continue;
                }
            };
            let ctx = runtime.context(EventType::Init, matcher.clone(), bot.clone());
            if let Err(e) = process_frame(&mut frame, writer.clone(), ctx).await {
                warn!(target: "Console", "处理消息时出错: {}", e);
            }
        }
    })
}

/// 将消息段渲染为可读文本，图片等只显示类型
fn render_message(msg: &OwnedValue) -> String {
    if let Some(s) = msg.as_str() {
        return s.to_string();
    }
    let Some(segments) = msg.as_array() else {
        return format!("{:?}", msg);
    };
    segments
        .iter()
        .map(|seg| {
            let type_ = seg.get_str("type").unwrap_or("unknown");
            match type_ {
                "text" => seg
                    .get("data")
                    .and_then(|d| d.get_str("text"))
                    .unwrap_or("")
                    .to_string(),
                "at" => format!(
                    "@{}",
                    seg.get("data").and_then(|d| d.get_str("qq")).unwrap_or("?")
                ),
                other => format!("[{}]", other),
            }
        })
        .collect()
}

struct ConsoleSink;

impl Sink<WsMessage> for ConsoleSink {
    type Error = WsError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsMessage) -> Result<(), Self::Error> {
        if let WsMessage::Text(text) = item {
            let mut data = text.as_bytes().to_vec();
            match simd_json::to_owned_value(&mut data) {
                Ok(val) => {
                    let action = val.get_str("action").unwrap_or("unknown");
                    match val.get("params").and_then(|p| p.get("message")) {
                        Some(msg) if action.starts_with("send_") => {
                            println!("\x1b[36m[Bot Reply] > \x1b[0m{}", render_message(msg));
                        }
                        _ => println!("\x1b[90m[API Call] > {}\x1b[0m", action),
                    }
                }
                Err(_) => println!("\x1b[36m[Bot Raw] > \x1b[0m{}", text.as_str()),
            }
        }
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tests::parse;

    #[test]
    fn group_prefix_is_parsed() {
        assert_eq!(split_target("g123 帮助"), (Some(123), "帮助"));
        assert_eq!(split_target("帮助"), (None, "帮助"));
        assert_eq!(split_target("gx 帮助"), (None, "gx 帮助"));
    }

    #[test]
    fn console_lines_become_message_events() {
        let ev = console_event(10000, "g42 帮助");
        assert_eq!((ev.message_type, ev.group_id), ("group", Some(42)));
        assert_eq!(ev.raw_message, "帮助");
        let ev = console_event(10000, "帮助");
        assert_eq!((ev.message_type, ev.sub_type), ("private", "friend"));
    }

    #[test]
    fn renders_segments() {
        let msg = parse(
            r#"[{"type":"text","data":{"text":"你好"}},{"type":"at","data":{"qq":"1"}},{"type":"image","data":{"file":"x"}}]"#,
        );
        assert_eq!(render_message(&msg), "你好@1[image]");
    }
}
