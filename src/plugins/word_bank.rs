use crate::adapters::onebot::{LockedWriter, api, reply};
use crate::command::{CommandMatch, match_command};
use crate::config::build_config;
use crate::event::Context;
use crate::manager::plugins::{PluginMeta, PluginType};
use crate::message::{Message, custom_forward_msg};
use crate::models::word_bank::{self, WordType};
use crate::permission;
use crate::plugins::PluginError;
use crate::{info, warn};
use futures_util::future::BoxFuture;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use toml::Value;

pub mod rule;

pub const META: PluginMeta = PluginMeta {
    plugin_type: PluginType::Normal,
    usage: "自定义问答\n\
        添加词条 [模糊|正则]问...答...\n\
        删除词条 [问题]\n\
        查看词条\n\
        问题中的 @ 会保存为 [at:QQ]，只发一张图片时按图片匹配",
    commands: &["添加词条", "删除词条", "查看词条"],
    ..PluginMeta::new("word_bank", "词条")
};

#[derive(Serialize)]
struct WordBankConfig {
    enabled: bool,
}

pub fn default_config() -> Value {
    build_config(WordBankConfig { enabled: true })
}

fn add_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)^\s*(模糊|正则)?\s*问\s*(.*?)\s*答\s*(.+)$").expect("Invalid Regex")
    })
}

fn at_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[at:(\d+)\]").expect("Invalid Regex"))
}

/// 解析 `[模糊|正则]问...答...`
pub fn parse_add(text: &str) -> Option<(WordType, String, String)> {
    let caps = add_regex().captures(text)?;
    let word_type = match caps.get(1).map(|m| m.as_str()) {
        Some("模糊") => WordType::Fuzzy,
        Some("正则") => WordType::Regex,
        _ => WordType::Exact,
    };
    let answer = caps[3].trim().to_string();
    if answer.is_empty() {
        return None;
    }
    Some((word_type, caps[2].to_string(), answer))
}

/// 回答中的 `[at:QQ]` 还原为 @ 消息段
pub fn answer_message(answer: &str) -> Message {
    let mut msg = Message::new();
    let mut last = 0;
    for caps in at_regex().captures_iter(answer) {
        let (Some(all), Some(qq)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if all.start() > last {
            msg = msg.text(&answer[last..all.start()]);
        }
        msg = msg.at(qq.as_str());
        last = all.end();
    }
    if last < answer.len() {
        msg = msg.text(&answer[last..]);
    }
    msg
}

/// 群聊使用本群词条，超级用户私聊时操作全局词条
async fn manage_scope(ctx: &Context) -> Option<i64> {
    match ctx.group_id() {
        Some(gid) if permission::is_admin(ctx).await => Some(gid),
        None if permission::is_superuser(ctx) => Some(0),
        _ => None,
    }
}

async fn add_word(ctx: &Context, writer: LockedWriter, m: CommandMatch, scope: i64) -> Result<(), PluginError> {
    let text = rule::render_segments(&m.args);
    let Some((mut word_type, mut problem, answer)) = parse_add(&text) else {
        reply(ctx, writer, Message::from("格式错误，示例: 添加词条 问你好答你也好")).await?;
        return Ok(());
    };

    if problem.is_empty() {
        let images = m.images();
        let hash = match images.as_slice() {
            [url] => rule::image_hash(url).await,
            _ => None,
        };
        let Some(hash) = hash else {
            reply(ctx, writer, Message::from("问题不能为空！")).await?;
            return Ok(());
        };
        word_type = WordType::Image;
        problem = hash;
    }
    if word_type == WordType::Regex && Regex::new(&problem).is_err() {
        reply(ctx, writer, Message::from(format!("正则表达式 {} 有误", problem))).await?;
        return Ok(());
    }

    let user_id = ctx.user_id().unwrap_or(0);
    word_bank::add(&ctx.db, user_id, scope, word_type, &problem, &answer).await?;
    info!(target: "WordBank", "USER {} 添加{}词条 {} -> {}", user_id, word_type.label(), problem, answer);
    let shown = if word_type == WordType::Image { "[图片]" } else { problem.as_str() };
    reply(ctx, writer, Message::from(format!("添加词条 {} 成功！", shown))).await?;
    Ok(())
}

async fn show_words(ctx: &Context, writer: LockedWriter, scope: i64) -> Result<(), PluginError> {
    let rows = word_bank::list(&ctx.db, scope).await?;
    if rows.is_empty() {
        reply(ctx, writer, Message::from("当前没有任何词条...")).await?;
        return Ok(());
    }
    let nodes: Vec<Message> = rows
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let scope_label = if r.group_id == 0 { "全局" } else { "本群" };
            let word_type = WordType::from_i32(r.word_type);
            let problem = if word_type == WordType::Image { "[图片]" } else { r.problem.as_str() };
            Message::from(format!(
                "{}. [{}|{}] 问: {}\n答: {}",
                i,
                scope_label,
                word_type.label(),
                problem,
                r.answer
            ))
        })
        .collect();
    let nickname = ctx.nicknames().first().cloned().unwrap_or_default();
    let forward = custom_forward_msg(nodes, ctx.self_id(), None, &nickname);
    let user_id = if ctx.group_id().is_none() { ctx.user_id() } else { None };
    api::send_forward_msg(ctx, writer, ctx.group_id(), user_id, forward).await?;
    Ok(())
}

pub fn handle(
    ctx: Context,
    writer: LockedWriter,
) -> BoxFuture<'static, Result<Option<Context>, PluginError>> {
    Box::pin(async move {
        let Some(event) = ctx.as_message() else {
            return Ok(Some(ctx));
        };
        let segments = event.segments().to_vec();

        for cmd in ["添加词条", "删除词条", "查看词条"] {
            let Some(m) = match_command(&ctx, cmd) else {
                continue;
            };
            let Some(scope) = manage_scope(&ctx).await else {
                return Ok(Some(ctx));
            };
            match cmd {
                "添加词条" => add_word(&ctx, writer, m, scope).await?,
                "删除词条" => {
                    let problem = rule::render_segments(&m.args);
                    let text = if problem.is_empty() {
                        "请输入要删除的问题".to_string()
                    } else if word_bank::delete_problem(&ctx.db, scope, &problem).await? > 0 {
                        format!("删除词条 {} 成功！", problem)
                    } else {
                        format!("词条 {} 不存在...", problem)
                    };
                    reply(&ctx, writer, Message::from(text)).await?;
                }
                _ => show_words(&ctx, writer, scope).await?,
            }
            return Ok(None);
        }

        let problem = rule::problem_for(&segments, ctx.self_id(), &ctx.nicknames()).await;
        if problem.is_empty() {
            return Ok(Some(ctx));
        }
        let scope = ctx.group_id().unwrap_or(0);
        let answer = match word_bank::get_answer(&ctx.db, scope, &problem).await {
            Ok(Some(a)) => a,
            Ok(None) => return Ok(Some(ctx)),
            Err(e) => {
                warn!(target: "WordBank", "查询词条失败: {}", e);
                return Ok(Some(ctx));
            }
        };
        info!(target: "WordBank", "触发词条 {}", problem);
        reply(&ctx, writer, answer_message(&answer)).await?;
        Ok(None)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::onebot::tests::capture_writer;
    use crate::plugins::testing::{group_msg, private_msg, test_ctx};

    #[test]
    fn add_syntax() {
        let (t, p, a) = parse_add("问你好答你也好").unwrap();
        assert_eq!((t, p.as_str(), a.as_str()), (WordType::Exact, "你好", "你也好"));
        let (t, p, _) = parse_add("模糊 问 早 答 早上好").unwrap();
        assert_eq!((t, p.as_str()), (WordType::Fuzzy, "早"));
        let (t, p, _) = parse_add("正则问^在吗$答在").unwrap();
        assert_eq!((t, p.as_str()), (WordType::Regex, "^在吗$"));
        assert!(parse_add("你好").is_none());
        assert!(parse_add("问你好答").is_none());
    }

    #[test]
    fn answer_restores_ats() {
        let msg = answer_message("你好[at:42]再见");
        let types: Vec<&str> = msg.segments().iter().map(|s| s.type_.as_str()).collect();
        assert_eq!(types, vec!["text", "at", "text"]);
    }

    #[tokio::test]
    async fn admin_adds_and_member_triggers() {
        let ctx = test_ctx(&group_msg(100, 7, "admin", "添加词条 问你好答你也好")).await;
        let db = ctx.db.clone();
        let (writer, mut rx) = capture_writer();
        assert!(handle(ctx, writer).await.unwrap().is_none());
        assert!(rx.recv().await.unwrap().contains("添加词条 你好 成功！"));

        let mut ctx = test_ctx(&group_msg(100, 8, "member", "你好")).await;
        ctx.db = db;
        let (writer, mut rx) = capture_writer();
        assert!(handle(ctx, writer).await.unwrap().is_none());
        assert!(rx.recv().await.unwrap().contains("你也好"));
    }

    #[tokio::test]
    async fn members_cannot_add() {
        let ctx = test_ctx(&group_msg(100, 8, "member", "添加词条 问a答b")).await;
        let db = ctx.db.clone();
        let (writer, mut rx) = capture_writer();
        assert!(handle(ctx, writer).await.unwrap().is_some());
        assert!(rx.try_recv().is_err());
        assert!(word_bank::list(&db, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn superuser_private_words_are_global() {
        let ctx = test_ctx(&private_msg(10000, "添加词条 模糊问晚安答好梦")).await;
        let db = ctx.db.clone();
        let (writer, _rx) = capture_writer();
        handle(ctx, writer).await.unwrap();
        let rows = word_bank::list(&db, 555).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].group_id, 0);

        let mut ctx = test_ctx(&group_msg(555, 8, "member", "大家晚安")).await;
        ctx.db = db.clone();
        let (writer, mut rx) = capture_writer();
        assert!(handle(ctx, writer).await.unwrap().is_none());
        assert!(rx.recv().await.unwrap().contains("好梦"));

        let mut ctx = test_ctx(&private_msg(10000, "删除词条 晚安")).await;
        ctx.db = db.clone();
        let (writer, mut rx) = capture_writer();
        handle(ctx, writer).await.unwrap();
        assert!(rx.recv().await.unwrap().contains("删除词条 晚安 成功！"));
        assert!(word_bank::list(&db, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unmatched_messages_pass_through() {
        let ctx = test_ctx(&group_msg(100, 8, "member", "随便说说")).await;
        let (writer, _rx) = capture_writer();
        assert!(handle(ctx, writer).await.unwrap().is_some());
    }
}
