use super::WebState;
use super::api::ApiResult;
use crate::config::WebUiConfig;
use crate::warn;
use axum::extract::{Form, FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Mutex;

pub const ACCESS_TOKEN_EXPIRE_MINUTES: i64 = 30;
const MAX_TOKENS: usize = 3;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

/// 已签发的 token，持久化到 token.json，只保留最近几个
pub struct TokenStore {
    path: PathBuf,
    tokens: Mutex<Vec<String>>,
}

#[derive(Serialize, Deserialize, Default)]
struct TokenFile {
    #[serde(default)]
    token: Vec<String>,
}

impl TokenStore {
    pub fn load(path: PathBuf) -> Self {
        let tokens = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str::<TokenFile>(&s).ok())
            .unwrap_or_default()
            .token;
        Self {
            path,
            tokens: Mutex::new(tokens),
        }
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn push(&self, token: String) -> std::io::Result<()> {
        let mut tokens = self
            .tokens
            .lock()
            .map_err(|_| std::io::Error::other("token 锁已损坏"))?;
        tokens.push(token);
        if tokens.len() > MAX_TOKENS {
            let extra = tokens.len() - MAX_TOKENS;
            tokens.drain(..extra);
        }
        let data = serde_json::to_string_pretty(&TokenFile { token: tokens.clone() })?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, data)
    }
}

/// 配置了用户名和密码且用户名一致时返回配置
fn get_user<'a>(config: &'a WebUiConfig, username: &str) -> Option<&'a WebUiConfig> {
    (!config.username.is_empty() && !config.password.is_empty() && config.username == username)
        .then_some(config)
}

pub fn create_token(username: &str, secret: &str) -> jsonwebtoken::errors::Result<String> {
    let claims = Claims {
        sub: username.to_string(),
        exp: chrono::Utc::now().timestamp() + ACCESS_TOKEN_EXPIRE_MINUTES * 60,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

pub fn decode_token(token: &str, secret: &str) -> jsonwebtoken::errors::Result<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
}

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

/// POST /api/login
pub async fn login(State(state): State<WebState>, Form(form): Form<LoginForm>) -> Json<ApiResult> {
    let Some(config) = state.web_config() else {
        return Json(ApiResult::fail("配置读取失败", 500));
    };
    let Some(user) = get_user(&config, &form.username) else {
        return Json(ApiResult::fail("你滴配置文件里用户名密码配置项为空", 998));
    };
    if user.password != form.password {
        return Json(ApiResult::fail("真笨, 密码都能记错!", 999));
    }

    let token = match create_token(&user.username, &user.secret_key) {
        Ok(t) => t,
        Err(e) => return Json(ApiResult::fail(format!("生成 token 失败: {}", e), 500)),
    };
    if let Err(e) = state.tokens.push(token.clone()) {
        warn!(target: "WebUi", "保存 token 失败: {}", e);
    }
    Json(ApiResult::ok(
        json!({"access_token": token, "token_type": "bearer"}),
        "欢迎回家, 欧尼酱!",
    ))
}

/// 通过验证的用户
pub struct AuthUser(pub String);

pub enum AuthError {
    Missing,
    Invalid,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            AuthError::Missing => (StatusCode::UNAUTHORIZED, "Not authenticated"),
            AuthError::Invalid => (StatusCode::BAD_REQUEST, "登录验证失败或已失效, 踢出房间!"),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

impl FromRequestParts<WebState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &WebState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
            .ok_or(AuthError::Missing)?;

        let config = state.web_config().ok_or(AuthError::Invalid)?;
        let claims = decode_token(token.trim(), &config.secret_key).map_err(|_| AuthError::Invalid)?;
        get_user(&config, &claims.sub).ok_or(AuthError::Invalid)?;
        Ok(AuthUser(claims.sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn token_store_keeps_last_three() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("web_ui").join("token.json");
        let store = TokenStore::load(path.clone());
        for i in 0..5 {
            store.push(format!("t{}", i)).unwrap();
        }
        assert_eq!(store.tokens(), vec!["t2", "t3", "t4"]);

        let reloaded = TokenStore::load(path);
        assert_eq!(reloaded.tokens(), vec!["t2", "t3", "t4"]);
    }

    #[test]
    fn tokens_decode_with_same_secret_only() {
        let token = create_token("admin", "secret").unwrap();
        assert_eq!(decode_token(&token, "secret").unwrap().sub, "admin");
        assert!(decode_token(&token, "other").is_err());
    }

    #[test]
    fn expired_tokens_rejected() {
        let claims = Claims {
            sub: "admin".into(),
            exp: chrono::Utc::now().timestamp() - 3600,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(decode_token(&token, "secret").is_err());
    }

    #[test]
    fn empty_credentials_have_no_user() {
        let config = WebUiConfig::default();
        assert!(get_user(&config, "").is_none());
    }
}
