use crate::config::{AppConfig, BotConfig};
use crate::event::{BotStatus, Context, EventType};
use crate::matcher::Matcher;
use crate::scheduler::Scheduler;
use crate::{info, warn};
use futures_util::future::BoxFuture;
use sea_orm::DatabaseConnection;
use std::sync::{Arc, OnceLock, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

pub mod console;
pub mod onebot;

/// 各连接共享的运行时资源
#[derive(Clone)]
pub struct Runtime {
    pub config: Arc<RwLock<AppConfig>>,
    pub db: DatabaseConnection,
    pub scheduler: Arc<Scheduler>,
    pub save_lock: Arc<AsyncMutex<()>>,
    pub config_path: String,
}

impl Runtime {
    pub fn context(&self, event: EventType, matcher: Arc<Matcher>, bot: BotStatus) -> Context {
        Context {
            event,
            config: self.config.clone(),
            config_save_lock: self.save_lock.clone(),
            db: self.db.clone(),
            scheduler: self.scheduler.clone(),
            matcher,
            config_path: self.config_path.clone(),
            bot,
        }
    }

    fn enabled_bots(&self) -> Vec<BotConfig> {
        self.config
            .read()
            .map(|c| c.bots.iter().filter(|b| b.enabled).cloned().collect())
            .unwrap_or_default()
    }
}

pub type AdapterHandler = fn(BotConfig, Runtime) -> BoxFuture<'static, ()>;

pub struct Adapter {
    /// 协议名称，对应配置中的 protocol 字段
    pub protocol: &'static str,
    pub handler: AdapterHandler,
}

static ADAPTERS: OnceLock<Vec<Adapter>> = OnceLock::new();

pub fn get_adapters() -> &'static [Adapter] {
    ADAPTERS.get_or_init(|| {
        vec![
            Adapter {
                protocol: "onebot",
                handler: onebot::entry,
            },
            // 本地调试用
            Adapter {
                protocol: "console",
                handler: console::entry,
            },
        ]
    })
}

pub fn find_adapter(protocol: &str) -> Option<&'static Adapter> {
    get_adapters().iter().find(|a| a.protocol == protocol)
}

/// 按协议为每个启用的 Bot 启动适配器任务
pub fn start_bots(runtime: &Runtime) -> Vec<JoinHandle<()>> {
    runtime
        .enabled_bots()
        .into_iter()
        .filter_map(|bot| {
            let Some(adapter) = find_adapter(&bot.protocol) else {
                warn!(target: "System", "未知的协议类型: {}", bot.protocol);
                return None;
            };
            info!(target: "System", "启动适配器: {}", adapter.protocol);
            Some(tokio::spawn((adapter.handler)(bot, runtime.clone())))
        })
        .collect()
}
