use crate::adapters::onebot::{LockedWriter, reply};
use crate::config::build_config;
use crate::event::Context;
use crate::manager::plugins::PluginMeta;
use crate::message::{Message, RecordSource};
use crate::models::{ban_user, gallery_image};
use crate::plugins::PluginError;
use crate::plugins::gallery::data_source::gallery_dir;
use crate::utils::image::random_file;
use crate::utils::limiter::CountLimiter;
use crate::utils::paths::{image_path, record_path};
use crate::{info, warn};
use futures_util::future::BoxFuture;
use rand::Rng;
use rand::seq::IndexedRandom;
use serde::Serialize;
use std::sync::OnceLock;
use toml::Value;

pub const META: PluginMeta = PluginMeta {
    usage: "戳一戳随机掉落语音或美图",
    commands: &["戳一戳"],
    menu_type: &["其他"],
    ..PluginMeta::new("poke", "戳一戳")
};

#[derive(Serialize)]
struct PokeConfig {
    enabled: bool,
}

pub fn default_config() -> Value {
    build_config(PokeConfig { enabled: true })
}

const POKE_REPLY: &[&str] = &[
    "不要动，我正在画关键的地方",
    "lsp你再戳？",
    "连个可爱美少女都要戳的肥宅真恶心啊。",
    "你再戳！",
    "？再戳试试？",
    "别戳了别戳了再戳就坏了555",
    "我爪巴爪巴，球球别再戳了",
    "你戳你🐎呢？！",
    "那...那里...那里不能戳...绝对...",
    "(。´・ω・)ん?",
    "有事恁叫我，白扯天一个劲戳戳戳！",
    "欸很烦欸！你戳🔨呢",
    "?",
    "再戳一下试试？",
    "???",
    "正在关闭对您的所有服务...关闭成功",
    "啊呜，太舒服刚刚竟然睡着了。什么事？",
    "正在定位您的真实地址...定位成功。轰炸机已起飞",
];

fn limiter() -> &'static CountLimiter {
    static LIMITER: OnceLock<CountLimiter> = OnceLock::new();
    LIMITER.get_or_init(|| CountLimiter::new(3))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PokeAction {
    /// 回一句话，可能顺带禁言
    Scold { ban: bool },
    Image,
    Voice,
    PokeBack,
}

/// 根据三次随机数决定回应方式
pub fn decide(limit_hit: bool, reply_roll: f64, ban_roll: f64, action_roll: f64) -> PokeAction {
    if limit_hit || reply_roll < 0.3 {
        return PokeAction::Scold { ban: ban_roll < 0.15 };
    }
    if action_roll <= 0.3 {
        PokeAction::Image
    } else if action_roll < 0.6 {
        PokeAction::Voice
    } else {
        PokeAction::PokeBack
    }
}

/// 语音文件名形如 `序号_台词.mp3`
fn voice_caption(name: &str) -> Option<&str> {
    name.split('_').nth(1).filter(|s| !s.is_empty())
}

async fn random_image(ctx: &Context) -> Option<Message> {
    let row = match gallery_image::random(&ctx.db, false).await {
        Ok(row) => row?,
        Err(e) => {
            warn!(target: "Poke", "读取图库失败: {}", e);
            return None;
        }
    };
    let path = gallery_dir(&image_path(), false).join(row.file_name());
    let msg = Message::new().text("别戳了，别戳了，给你一张色图").image(path);
    (msg.segments().len() > 1).then_some(msg)
}

fn random_voice() -> Option<(Message, Option<String>)> {
    let file = random_file(&record_path().join("dinggong"))?;
    let caption = file
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(voice_caption)
        .map(String::from);
    let msg = Message::new().record(RecordSource::Path(file));
    (!msg.is_empty()).then_some((msg, caption))
}

pub fn handle(
    ctx: Context,
    writer: LockedWriter,
) -> BoxFuture<'static, Result<Option<Context>, PluginError>> {
    Box::pin(async move {
        let Some(notice) = ctx.as_notice() else {
            return Ok(Some(ctx));
        };
        if !notice.is_poke_self() {
            return Ok(Some(ctx));
        }
        let user_id = notice.user_id();
        let in_group = notice.group_id().is_some();

        limiter().add(user_id);
        let action = {
            let mut rng = rand::rng();
            decide(limiter().check(user_id), rng.random(), rng.random(), rng.random())
        };

        let poke_back = Message::new().poke(user_id);
        match action {
            PokeAction::Scold { ban } => {
                let mut text = String::new();
                if ban {
                    ban_user::ban(&ctx.db, user_id, 1, 60).await?;
                    text.push_str("气死我了！");
                }
                text.push_str(POKE_REPLY.choose(&mut rand::rng()).copied().unwrap_or("?"));
                let msg = if in_group {
                    Message::new().at(user_id).text(format!(" {}", text))
                } else {
                    Message::from(text)
                };
                reply(&ctx, writer, msg).await?;
            }
            PokeAction::Image => {
                let msg = random_image(&ctx).await.unwrap_or(poke_back);
                reply(&ctx, writer, msg).await?;
            }
            PokeAction::Voice => match random_voice() {
                Some((msg, caption)) => {
                    reply(&ctx, writer.clone(), msg).await?;
                    if let Some(caption) = caption {
                        reply(&ctx, writer, Message::from(caption)).await?;
                    }
                }
                None => reply(&ctx, writer, poke_back).await?,
            },
            PokeAction::PokeBack => reply(&ctx, writer, poke_back).await?,
        }
        info!(target: "Poke", "USER {} 戳了戳我 回应: {:?}", user_id, action);
        Ok(None)
    })
}
