use crate::adapters::onebot::LockedWriter;
use crate::config::{AppConfig, WebUiConfig, build_config};
use crate::event::Context;
use crate::manager::plugins::{PluginMeta, PluginType};
use crate::plugins::PluginError;
use crate::utils::paths::data_path;
use crate::{error, info};
use axum::Router;
use axum::routing::{get, post};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tokio::net::TcpListener;
use toml::Value;

pub mod api;
pub mod auth;

use auth::TokenStore;

pub const META: PluginMeta = PluginMeta {
    plugin_type: PluginType::Hidden,
    ..PluginMeta::new("web_ui", "Web管理面板")
};

#[derive(Serialize)]
struct WebUiPluginConfig {
    enabled: bool,
}

pub fn default_config() -> Value {
    build_config(WebUiPluginConfig { enabled: true })
}

/// 所有接口共享的状态
#[derive(Clone)]
pub struct WebState {
    pub config: Arc<RwLock<AppConfig>>,
    pub tokens: Arc<TokenStore>,
}

impl WebState {
    /// 每次请求都读取最新配置
    pub fn web_config(&self) -> Option<WebUiConfig> {
        self.config.read().ok().map(|c| c.web_ui.clone())
    }
}

pub fn build_router(state: WebState) -> Router {
    Router::new()
        .route("/api/login", post(auth::login))
        .route("/api/system/disk", get(api::get_system_disk))
        .route("/api/plugins", get(api::get_plugin_list))
        .with_state(state)
}

/// 启动面板，不依赖任何 Bot 连接
pub fn init(ctx: Context) -> BoxFuture<'static, Result<(), PluginError>> {
    Box::pin(async move {
        let web = ctx
            .config
            .read()
            .map(|c| c.web_ui.clone())
            .map_err(|_| "配置锁已损坏")?;
        if !web.enabled {
            return Ok(());
        }

        let state = WebState {
            config: ctx.config.clone(),
            tokens: Arc::new(TokenStore::load(data_path().join("web_ui").join("token.json"))),
        };
        let addr = format!("{}:{}", web.host, web.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(target: "WebUi", "管理面板已启动: http://{}", addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, build_router(state)).await {
                error!(target: "WebUi", "管理面板异常退出: {}", e);
            }
        });
        Ok(())
    })
}

pub fn handle(
    ctx: Context,
    _writer: LockedWriter,
) -> BoxFuture<'static, Result<Option<Context>, PluginError>> {
    Box::pin(async move { Ok(Some(ctx)) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::ApiResult;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn state(dir: &TempDir) -> WebState {
        let mut config = AppConfig::default();
        config.web_ui.username = "admin".into();
        config.web_ui.password = "123456".into();
        WebState {
            config: Arc::new(RwLock::new(config)),
            tokens: Arc::new(TokenStore::load(dir.path().join("token.json"))),
        }
    }

    async fn login(router: Router, form: &str) -> ApiResult {
        let req = Request::post("/api/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn authed_get(uri: &str, token: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn login_failures_have_codes() {
        let dir = TempDir::new().unwrap();
        let router = build_router(state(&dir));

        let r = login(router.clone(), "username=nobody&password=1").await;
        assert_eq!((r.suc, r.code), (false, 998));

        let r = login(router, "username=admin&password=wrong").await;
        assert_eq!((r.suc, r.code), (false, 999));
        assert_eq!(r.info, "真笨, 密码都能记错!");
    }

    #[tokio::test]
    async fn login_issues_token_for_protected_routes() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        let router = build_router(state.clone());

        let r = login(router.clone(), "username=admin&password=123456").await;
        assert!(r.suc);
        assert_eq!(r.info, "欢迎回家, 欧尼酱!");
        assert_eq!(r.data["token_type"], "bearer");
        let token = r.data["access_token"].as_str().unwrap().to_string();
        assert_eq!(state.tokens.tokens(), vec![token.clone()]);
        assert!(dir.path().join("token.json").exists());

        let resp = router.clone().oneshot(authed_get("/api/plugins", &token)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = router.clone().oneshot(authed_get("/api/plugins", "garbage")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["detail"], "登录验证失败或已失效, 踢出房间!");

        let req = Request::get("/api/plugins").body(Body::empty()).unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn token_for_renamed_user_rejected() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        let router = build_router(state.clone());
        let r = login(router.clone(), "username=admin&password=123456").await;
        let token = r.data["access_token"].as_str().unwrap().to_string();

        state.config.write().unwrap().web_ui.username = "root".into();
        let uri = format!("/api/system/disk?full_path={}", dir.path().display());
        let resp = router.oneshot(authed_get(&uri, &token)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
