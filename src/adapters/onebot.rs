use crate::adapters::Runtime;
use crate::config::BotConfig;
use crate::event::{BotStatus, Context, EventType, LoginUser, SendPacket};
use crate::matcher::Matcher;
use crate::{error, info, plugins, warn};
use futures_util::future::BoxFuture;
use futures_util::{Sink, SinkExt, StreamExt};
use http::HeaderValue;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};

pub mod api;

pub type BotError = Box<dyn std::error::Error + Send + Sync>;

pub type TraitSink =
    Box<dyn Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin>;
pub type LockedWriter = Arc<AsyncMutex<TraitSink>>;

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Serialize)]
struct SendTarget<T> {
    message_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<i64>,
    message: T,
}

/// 一条 WebSocket 连接上的状态
#[derive(Clone)]
struct Connection {
    runtime: Runtime,
    writer: LockedWriter,
    matcher: Arc<Matcher>,
    status: Arc<RwLock<BotStatus>>,
}

impl Connection {
    fn context(&self, event: EventType) -> Context {
        let bot = self.status.read().map(|s| s.clone()).unwrap_or_default();
        self.runtime.context(event, self.matcher.clone(), bot)
    }

    /// 查询登录号信息后触发插件的连接钩子
    async fn on_connected(self) {
        tokio::time::sleep(Duration::from_secs(1)).await;
        match api::get_login_info(&self.context(EventType::Init), self.writer.clone()).await {
            Ok(login) => {
                if let Ok(mut status) = self.status.write() {
                    status.login_user = LoginUser {
                        id: login.user_id.to_string(),
                        name: Some(login.nickname.clone()),
                        nick: Some(login.nickname.clone()),
                        avatar: Some(format!("https://q1.qlogo.cn/g?b=qq&nk={}&s=640", login.user_id)),
                    };
                }
                info!(target: "Bot", "已获取登录信息: {} ({})", login.nickname, login.user_id);
            }
            Err(e) => warn!(target: "Bot", "获取登录信息失败: {}", e),
        }
        if let Err(e) = plugins::do_connected(self.context(EventType::Init), self.writer.clone()).await {
            error!(target: "Bot", "连接钩子执行失败: {}", e);
        }
    }
}

pub fn entry(bot: BotConfig, runtime: Runtime) -> BoxFuture<'static, ()> {
    Box::pin(run_bot_loop(bot, runtime))
}

/// 断线后固定延时重连，永不退出
pub async fn run_bot_loop(bot: BotConfig, runtime: Runtime) {
    let name = bot.url.clone().unwrap_or_else(|| "Unknown".to_string());
    loop {
        match connect_and_listen(&bot, &runtime).await {
            Ok(()) => warn!(target: "Bot", "Bot [{}] 连接断开，{} 秒后重连...", name, RECONNECT_DELAY.as_secs()),
            Err(e) => error!(
                target: "Bot",
                "Bot [{}] 连接失败: {}。{} 秒后重试...",
                name,
                e,
                RECONNECT_DELAY.as_secs()
            ),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn connect_and_listen(bot: &BotConfig, runtime: &Runtime) -> Result<(), BotError> {
    let url = bot
        .url
        .as_deref()
        .ok_or_else(|| BotError::from("OneBot URL 未配置"))?;
    let mut request = url.into_client_request()?;
    if let Some(token) = bot.access_token.as_deref().filter(|t| !t.is_empty()) {
        request
            .headers_mut()
            .insert("Authorization", HeaderValue::from_str(&format!("Bearer {}", token))?);
    }

    let (ws_stream, _) = connect_async(request).await?;
    info!(target: "Bot", "Bot [{}] 连接成功！(OneBot)", url);
    let (sink, mut stream) = ws_stream.split();

    let conn = Connection {
        runtime: runtime.clone(),
        writer: Arc::new(AsyncMutex::new(Box::new(sink))),
        matcher: Arc::new(Matcher::new()),
        status: Arc::new(RwLock::new(BotStatus {
            adapter: "onebot".to_string(),
            platform: "qq".to_string(),
            login_user: LoginUser {
                id: "0".to_string(),
                ..Default::default()
            },
        })),
    };
    tokio::spawn(conn.clone().on_connected());

    while let Some(frame) = stream.next().await {
        match frame? {
            WsMessage::Text(text) => {
                let mut data = text.as_bytes().to_vec();
                let ctx = conn.context(EventType::Init);
                let writer = conn.writer.clone();
                tokio::spawn(async move {
                    if let Err(e) = process_frame(&mut data, writer, ctx).await {
                        error!(target: "Bot", "事件处理出错: {}", e);
                    }
                });
            }
            WsMessage::Close(_) => return Ok(()),
            _ => {}
        }
    }
    Ok(())
}

/// 解析一帧数据：API 响应交给等待者，其余事件进入插件流水线
pub async fn process_frame(data: &mut [u8], writer: LockedWriter, ctx: Context) -> Result<(), BotError> {
    let Ok(event) = simd_json::to_owned_value(data) else {
        return Ok(());
    };
    let Some(event) = ctx.matcher.dispatch(event).await else {
        return Ok(());
    };
    plugins::run(ctx.with_event(EventType::Onebot(event)), writer).await?;
    Ok(())
}

/// 发送消息：构造 BeforeSend 包并交给插件流水线，最后由流水线写出
pub async fn send_msg<M>(
    ctx: &Context,
    writer: LockedWriter,
    group_id: Option<i64>,
    user_id: Option<i64>,
    message: M,
) -> Result<(), BotError>
where
    M: Serialize,
{
    let (msg_type, target_group, target_user) = if let Some(gid) = group_id.filter(|&id| id != 0) {
        ("group", Some(gid), None)
    } else if let Some(uid) = user_id.filter(|&id| id != 0) {
        ("private", None, Some(uid))
    } else {
        return Ok(());
    };

    let params = SendTarget {
        message_type: msg_type,
        group_id: target_group,
        user_id: target_user,
        message,
    };

    let mut json_bytes = simd_json::to_vec(&params)?;
    let params_val = simd_json::to_owned_value(&mut json_bytes)?;

    // 捕获原始事件以便在 BeforeSend 中传递
    let original_event = match &ctx.event {
        EventType::Onebot(ev) => Some(ev.clone()),
        EventType::BeforeSend(pkt) => pkt.original_event.clone(),
        EventType::Init => None,
    };

    let packet = SendPacket {
        action: "send_msg".to_string(),
        params: params_val,
        original_event,
    };

    plugins::run(ctx.with_event(EventType::BeforeSend(packet)), writer).await?;
    Ok(())
}

/// 回复当前事件：群聊回群，私聊回人
pub async fn reply<M>(ctx: &Context, writer: LockedWriter, message: M) -> Result<(), BotError>
where
    M: Serialize,
{
    send_msg(ctx, writer, ctx.group_id(), ctx.user_id(), message).await
}

pub async fn send_frame_raw(writer: LockedWriter, json_str: String) -> Result<(), BotError> {
    let mut guard = writer.lock().await;
    guard.send(WsMessage::Text(json_str.into())).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures_util::sink::unfold;
    use tokio::sync::mpsc;

    /// 收集所有写出的文本帧
    pub fn capture_writer() -> (LockedWriter, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let sink = unfold(tx, |tx, msg: WsMessage| async move {
            if let WsMessage::Text(text) = msg {
                let _ = tx.send(text.as_str().to_string());
            }
            Ok::<_, tokio_tungstenite::tungstenite::Error>(tx)
        });
        let sink: TraitSink = Box::new(Box::pin(sink));
        (Arc::new(AsyncMutex::new(sink)), rx)
    }

    #[tokio::test]
    async fn raw_frames_reach_the_sink() {
        let (writer, mut rx) = capture_writer();
        send_frame_raw(writer, "{\"a\":1}".to_string()).await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("{\"a\":1}"));
    }
}
