use crate::adapters::onebot::{LockedWriter, reply};
use crate::command::match_command;
use crate::config::build_config;
use crate::event::Context;
use crate::manager::plugins::PluginMeta;
use crate::message::Message;
use crate::models::open_cases_log;
use crate::models::user_shop_gold_log::{self, GoldLogType};
use crate::plugins::{PluginError, get_config};
use chrono::{Local, TimeZone};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use toml::Value;

pub const META: PluginMeta = PluginMeta {
    usage: "金币记录: 查看自己最近的金币使用记录\n开箱统计: 查看自己在本群的开箱次数与总价值",
    commands: &["金币记录", "开箱统计"],
    menu_type: &["一些工具"],
    ..PluginMeta::new("shop_log", "金币记录")
};

#[derive(Serialize, Deserialize)]
struct ShopLogConfig {
    enabled: bool,
    /// 金币记录显示条数
    max_rows: u64,
}

impl Default for ShopLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_rows: 10,
        }
    }
}

pub fn default_config() -> Value {
    build_config(ShopLogConfig::default())
}

fn format_time(ts: i64) -> String {
    Local
        .timestamp_opt(ts, 0)
        .single()
        .map(|t| t.format("%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

fn gold_log_text(rows: &[user_shop_gold_log::Model]) -> String {
    if rows.is_empty() {
        return "你还没有任何金币记录哦".to_string();
    }
    let mut lines = vec!["最近的金币记录:".to_string()];
    for r in rows {
        let label = GoldLogType::from_i32(r.log_type).map(|t| t.label()).unwrap_or("未知");
        lines.push(format!(
            "[{}] {} {} x{} 花费 {} 金币",
            format_time(r.create_time),
            label,
            r.name,
            r.num,
            r.spend_gold
        ));
    }
    lines.join("\n")
}

fn case_stats_text(stats: &open_cases_log::CaseStats, colors: &[(String, i64)]) -> String {
    if stats.count == 0 {
        return "你还没有在本群开过箱子哦".to_string();
    }
    let mut text = format!(
        "共开箱 {} 次，总价值 {:.2}",
        stats.count,
        stats.total_price.unwrap_or(0.0)
    );
    if !colors.is_empty() {
        let detail: Vec<String> = colors.iter().map(|(c, n)| format!("{}: {}", c, n)).collect();
        text.push('\n');
        text.push_str(&detail.join("\n"));
    }
    text
}

pub fn handle(
    ctx: Context,
    writer: LockedWriter,
) -> BoxFuture<'static, Result<Option<Context>, PluginError>> {
    Box::pin(async move {
        let (Some(group_id), Some(user_id)) = (ctx.group_id(), ctx.user_id()) else {
            return Ok(Some(ctx));
        };

        if match_command(&ctx, "金币记录").is_some() {
            let config: ShopLogConfig = get_config(&ctx, "shop_log").unwrap_or_default();
            let rows = user_shop_gold_log::latest(
                &ctx.db,
                &user_id.to_string(),
                &group_id.to_string(),
                config.max_rows,
            )
            .await?;
            reply(&ctx, writer, Message::new().at(user_id).text(format!("\n{}", gold_log_text(&rows)))).await?;
            return Ok(None);
        }

        if match_command(&ctx, "开箱统计").is_some() {
            let stats = open_cases_log::stats(&ctx.db, user_id, group_id).await?;
            let colors = open_cases_log::count_by_color(&ctx.db, user_id, group_id).await?;
            reply(&ctx, writer, Message::new().at(user_id).text(format!("\n{}", case_stats_text(&stats, &colors)))).await?;
            return Ok(None);
        }
        Ok(Some(ctx))
    })
}
