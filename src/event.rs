use crate::config::AppConfig;
use crate::matcher::Matcher;
use crate::scheduler::Scheduler;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use simd_json::OwnedValue;
use simd_json::derived::{ValueObjectAccess, ValueObjectAccessAsArray, ValueObjectAccessAsScalar};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex as AsyncMutex;

pub type Event = OwnedValue;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoginUser {
    pub id: String,
    pub name: Option<String>,
    pub nick: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BotStatus {
    pub adapter: String,
    pub platform: String,
    pub login_user: LoginUser,
}

/// 插件流水线上下文
/// event 直接持有所有权，插件可以修改后交给下一个插件。
#[derive(Clone)]
pub struct Context {
    pub event: EventType,
    pub config: Arc<RwLock<AppConfig>>,
    pub config_save_lock: Arc<AsyncMutex<()>>,
    pub db: DatabaseConnection,
    pub scheduler: Arc<Scheduler>,
    pub matcher: Arc<Matcher>,
    pub config_path: String,
    pub bot: BotStatus,
}

impl Context {
    /// 尝试将当前事件视为 OneBot 消息事件
    pub fn as_message(&self) -> Option<MessageEvent<'_>> {
        match &self.event {
            EventType::Onebot(event) if event.get_str("post_type") == Some("message") => {
                Some(MessageEvent(event))
            }
            _ => None,
        }
    }

    /// 尝试将当前事件视为 OneBot 通知事件
    pub fn as_notice(&self) -> Option<NoticeEvent<'_>> {
        match &self.event {
            EventType::Onebot(event) if event.get_str("post_type") == Some("notice") => {
                Some(NoticeEvent(event))
            }
            _ => None,
        }
    }

    pub fn post_type(&self) -> Option<&str> {
        match &self.event {
            EventType::Onebot(event) => event.get_str("post_type"),
            _ => None,
        }
    }

    /// 事件所在群号 (消息与通知均适用)
    pub fn group_id(&self) -> Option<i64> {
        match &self.event {
            EventType::Onebot(event) => read_i64(event, "group_id").filter(|&id| id != 0),
            _ => None,
        }
    }

    /// 事件触发者
    pub fn user_id(&self) -> Option<i64> {
        match &self.event {
            EventType::Onebot(event) => read_i64(event, "user_id"),
            _ => None,
        }
    }

    pub fn self_id(&self) -> i64 {
        let from_event = match &self.event {
            EventType::Onebot(event) => read_i64(event, "self_id"),
            _ => None,
        };
        from_event
            .or_else(|| self.bot.login_user.id.parse().ok())
            .unwrap_or(0)
    }

    pub fn is_superuser(&self, user_id: i64) -> bool {
        self.config
            .read()
            .map(|c| c.is_superuser(user_id))
            .unwrap_or(false)
    }

    pub fn nicknames(&self) -> Vec<String> {
        self.config
            .read()
            .map(|c| c.nickname.clone())
            .unwrap_or_default()
    }

    /// 以当前上下文为模板，构造携带新事件的上下文
    pub fn with_event(&self, event: EventType) -> Context {
        Context {
            event,
            config: self.config.clone(),
            config_save_lock: self.config_save_lock.clone(),
            db: self.db.clone(),
            scheduler: self.scheduler.clone(),
            matcher: self.matcher.clone(),
            config_path: self.config_path.clone(),
            bot: self.bot.clone(),
        }
    }
}

/// OneBot 的数字字段可能是有符号或无符号
pub fn read_i64(value: &OwnedValue, key: &str) -> Option<i64> {
    value
        .get_i64(key)
        .or_else(|| value.get_u64(key).map(|v| v as i64))
        .or_else(|| value.get_str(key).and_then(|s| s.parse().ok()))
}

// ================== 事件封装工具 ==================

/// 消息事件封装
pub struct MessageEvent<'a>(pub &'a Event);

impl<'a> MessageEvent<'a> {
    pub fn group_id(&self) -> Option<i64> {
        read_i64(self.0, "group_id")
    }

    pub fn user_id(&self) -> i64 {
        read_i64(self.0, "user_id").unwrap_or(0)
    }

    /// owner / admin / member
    pub fn sender_role(&self) -> Option<&'a str> {
        self.0.get("sender").and_then(|s| s.get_str("role"))
    }

    pub fn segments(&self) -> &'a [OwnedValue] {
        self.0.get_array("message").map(|a| a.as_slice()).unwrap_or(&[])
    }
}

/// 读取 at/poke 段中的 qq 字段
pub fn segment_qq(data: &OwnedValue) -> Option<String> {
    data.get_str("qq")
        .map(String::from)
        .or_else(|| data.get_i64("qq").map(|v| v.to_string()))
        .or_else(|| data.get_u64("qq").map(|v| v.to_string()))
}

/// 通知事件封装
pub struct NoticeEvent<'a>(pub &'a Event);

impl<'a> NoticeEvent<'a> {
    pub fn notice_type(&self) -> &'a str {
        self.0.get_str("notice_type").unwrap_or("")
    }

    pub fn sub_type(&self) -> &'a str {
        self.0.get_str("sub_type").unwrap_or("")
    }

    pub fn group_id(&self) -> Option<i64> {
        read_i64(self.0, "group_id").filter(|&id| id != 0)
    }

    pub fn user_id(&self) -> i64 {
        read_i64(self.0, "user_id").unwrap_or(0)
    }

    pub fn target_id(&self) -> i64 {
        read_i64(self.0, "target_id").unwrap_or(0)
    }

    pub fn self_id(&self) -> i64 {
        read_i64(self.0, "self_id").unwrap_or(0)
    }

    /// 戳一戳 Bot 自身
    pub fn is_poke_self(&self) -> bool {
        self.notice_type() == "notify"
            && self.sub_type() == "poke"
            && self.target_id() != 0
            && self.target_id() == self.self_id()
    }
}

// ================== 基础结构定义 ==================

#[derive(Debug, Clone)]
pub enum EventType {
    /// 来自 OneBot 的原始事件
    Onebot(Event),
    /// 插件准备发送消息前的拦截事件
    BeforeSend(SendPacket),
    /// 系统初始化事件 (插件 on_init 生命周期)
    Init,
}

/// 发送包，BeforeSend 阶段在插件间传递
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SendPacket {
    pub action: String,
    pub params: OwnedValue,
    #[serde(skip)]
    pub original_event: Option<Event>,
}
