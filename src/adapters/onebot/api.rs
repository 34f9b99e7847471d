use super::{LockedWriter, send_frame_raw};
use crate::event::Context;
use crate::message::Message;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use simd_json::OwnedValue;
use simd_json::derived::{ValueObjectAccess, ValueObjectAccessAsScalar};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub type ApiError = Box<dyn std::error::Error + Send + Sync>;

const API_TIMEOUT: Duration = Duration::from_secs(60);

fn next_echo() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(1);
    format!("zx-api-{}", SEQ.fetch_add(1, Ordering::Relaxed))
}

#[derive(Serialize)]
struct ApiRequest<'a, T> {
    action: &'a str,
    params: T,
    echo: &'a str,
}

/// 取出响应中的 data，retcode 非 0 时转换为错误
fn unwrap_response(resp: &OwnedValue) -> Result<OwnedValue, ApiError> {
    let retcode = resp
        .get_i64("retcode")
        .or_else(|| resp.get_u64("retcode").map(|v| v as i64))
        .unwrap_or(-1);
    if retcode != 0 {
        let msg = resp
            .get_str("msg")
            .or_else(|| resp.get_str("wording"))
            .unwrap_or("Unknown Error");
        return Err(format!("API 调用失败 (retcode={}): {}", retcode, msg).into());
    }
    Ok(resp.get("data").cloned().unwrap_or(OwnedValue::from(())))
}

/// 发送 action 并等待 echo 对应的响应
pub async fn call_action<P, R>(
    ctx: &Context,
    writer: LockedWriter,
    action: &str,
    params: P,
) -> Result<R, ApiError>
where
    P: Serialize,
    R: DeserializeOwned,
{
    let echo = next_echo();
    let frame = simd_json::to_string(&ApiRequest {
        action,
        params,
        echo: &echo,
    })?;

    // 先注册等待者再发送
    let rx = ctx.matcher.register(echo.clone()).await;
    send_frame_raw(writer, frame).await?;
    let resp = ctx
        .matcher
        .wait_resp(&echo, rx, API_TIMEOUT)
        .await
        .ok_or_else(|| ApiError::from(format!("API {} 请求超时", action)))?;

    Ok(simd_json::serde::from_owned_value(unwrap_response(&resp)?)?)
}

#[derive(Serialize)]
struct NoParams {}

#[derive(Debug, Deserialize)]
pub struct LoginInfo {
    pub user_id: i64,
    pub nickname: String,
}

pub async fn get_login_info(ctx: &Context, writer: LockedWriter) -> Result<LoginInfo, ApiError> {
    call_action(ctx, writer, "get_login_info", NoParams {}).await
}

#[derive(Debug, Deserialize)]
pub struct GroupInfo {
    pub group_id: i64,
}

pub async fn get_group_list(
    ctx: &Context,
    writer: LockedWriter,
    no_cache: bool,
) -> Result<Vec<GroupInfo>, ApiError> {
    #[derive(Serialize)]
    struct Params {
        no_cache: bool,
    }
    call_action(ctx, writer, "get_group_list", Params { no_cache }).await
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupMember {
    pub group_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub card: String,
    #[serde(default)]
    pub join_time: i64,
    /// owner / admin / member
    #[serde(default)]
    pub role: String,
}

impl GroupMember {
    /// 群名片为空时使用昵称
    pub fn display_name(&self) -> &str {
        if self.card.is_empty() {
            &self.nickname
        } else {
            &self.card
        }
    }
}

pub async fn get_group_member_list(
    ctx: &Context,
    writer: LockedWriter,
    group_id: i64,
) -> Result<Vec<GroupMember>, ApiError> {
    #[derive(Serialize)]
    struct Params {
        group_id: i64,
    }
    call_action(ctx, writer, "get_group_member_list", Params { group_id }).await
}

/// 合并转发，有群号时发往群聊，否则发给 user_id
pub async fn send_forward_msg(
    ctx: &Context,
    writer: LockedWriter,
    group_id: Option<i64>,
    user_id: Option<i64>,
    messages: Message,
) -> Result<OwnedValue, ApiError> {
    #[derive(Serialize)]
    struct Params {
        #[serde(skip_serializing_if = "Option::is_none")]
        group_id: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<i64>,
        messages: Message,
    }
    let action = match group_id {
        Some(_) => "send_group_forward_msg",
        None => "send_private_forward_msg",
    };
    let params = Params {
        group_id,
        user_id,
        messages,
    };
    call_action(ctx, writer, action, params).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tests::parse;

    #[test]
    fn member_display_name_prefers_card() {
        let mut m = GroupMember {
            group_id: 1,
            user_id: 2,
            nickname: "昵称".into(),
            card: String::new(),
            join_time: 0,
            role: "member".into(),
        };
        assert_eq!(m.display_name(), "昵称");
        m.card = "名片".into();
        assert_eq!(m.display_name(), "名片");
    }

    #[test]
    fn failed_retcode_becomes_error() {
        let ok = parse(r#"{"status":"ok","retcode":0,"data":{"user_id":1,"nickname":"真寻"}}"#);
        let data = unwrap_response(&ok).unwrap();
        let info: LoginInfo = simd_json::serde::from_owned_value(data).unwrap();
        assert_eq!(info.nickname, "真寻");

        let failed = parse(r#"{"status":"failed","retcode":100,"wording":"群不存在"}"#);
        let err = unwrap_response(&failed).unwrap_err();
        assert!(err.to_string().contains("群不存在"));
    }

    #[test]
    fn echo_is_unique() {
        assert_ne!(next_echo(), next_echo());
    }
}
