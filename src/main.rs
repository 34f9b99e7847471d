mod adapters;
mod command;
mod config;
mod db;
mod event;
mod log;
mod manager;
mod matcher;
mod message;
mod models;
mod permission;
mod plugins;
mod scheduler;
mod utils;

use adapters::Runtime;
use config::AppConfig;
use event::EventType;
use matcher::Matcher;
use scheduler::Scheduler;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex as AsyncMutex;

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    log::init_file(utils::paths::log_path());
    let config = AppConfig::load_or_create(CONFIG_PATH, &plugins::default_configs()).await?;
    if config.superusers.is_empty() {
        warn!(target: "System", "未配置超级用户，部分功能将无法使用");
    }

    let db = db::init().await?;
    models::init(&db).await?;

    let runtime = Runtime {
        config: Arc::new(RwLock::new(config)),
        db,
        scheduler: Arc::new(Scheduler::new()),
        save_lock: Arc::new(AsyncMutex::new(())),
        config_path: CONFIG_PATH.to_string(),
    };
    plugins::do_init(runtime.context(
        EventType::Init,
        Arc::new(Matcher::new()),
        plugins::system_bot(),
    ))
    .await?;

    let handles = adapters::start_bots(&runtime);
    if handles.is_empty() {
        warn!(target: "System", "没有启用任何 Bot 连接");
    }

    tokio::signal::ctrl_c().await?;
    info!(target: "System", "收到退出信号，正在关闭...");
    runtime.scheduler.shutdown();
    for handle in handles {
        handle.abort();
    }
    Ok(())
}
