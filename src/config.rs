use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;
use toml::Value;

pub type ConfigError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    // 指令前缀（支持多个，空字符串表示无需前缀）
    #[serde(default = "default_prefix")]
    pub command_prefix: Vec<String>,

    // 超级用户 QQ 列表，第一个会接收各类通知
    #[serde(default)]
    pub superusers: Vec<i64>,

    // Bot 昵称，消息以昵称开头时视为 @Bot
    #[serde(default = "default_nickname")]
    pub nickname: Vec<String>,

    // Web 管理面板
    #[serde(default)]
    pub web_ui: WebUiConfig,

    // Bot 连接配置
    #[serde(default = "default_bots")]
    pub bots: Vec<BotConfig>,

    // 插件配置
    #[serde(flatten)]
    pub plugins: HashMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebUiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_secret_key")]
    pub secret_key: String,
}

impl Default for WebUiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_web_host(),
            port: default_web_port(),
            username: String::new(),
            password: String::new(),
            secret_key: default_secret_key(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BotConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    // 协议类型 ("onebot" / "console")
    #[serde(default = "default_protocol")]
    pub protocol: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl AppConfig {
    /// 读取配置；文件不存在时写出默认配置。
    /// 缺失的插件配置段会用插件自身的默认值补齐并回写。
    pub async fn load_or_create(
        path: &str,
        defaults: &[(&'static str, Value)],
    ) -> Result<Self, ConfigError> {
        let mut config = if Path::new(path).exists() {
            let text = fs::read_to_string(path).await?;
            toml::from_str::<AppConfig>(&text)?
        } else {
            AppConfig::default()
        };

        let mut changed = !Path::new(path).exists();
        for (name, value) in defaults {
            if !config.plugins.contains_key(*name) {
                config.plugins.insert(name.to_string(), value.clone());
                changed = true;
            }
        }

        if changed {
            config.save(path).await?;
        }
        Ok(config)
    }

    pub async fn save(&self, path: &str) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string).await?;
        Ok(())
    }

    pub fn is_superuser(&self, user_id: i64) -> bool {
        self.superusers.contains(&user_id)
    }

    pub fn first_superuser(&self) -> Option<i64> {
        self.superusers.first().copied()
    }

    /// 插件是否在配置中启用
    pub fn plugin_enabled(&self, name: &str) -> bool {
        self.plugins
            .get(name)
            .and_then(|v| v.get("enabled"))
            .and_then(|x| x.as_bool())
            .unwrap_or(false)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            command_prefix: default_prefix(),
            superusers: Vec::new(),
            nickname: default_nickname(),
            web_ui: WebUiConfig::default(),
            bots: default_bots(),
            plugins: HashMap::new(),
        }
    }
}

fn default_prefix() -> Vec<String> {
    vec!["".to_string(), "/".to_string()]
}

fn default_nickname() -> Vec<String> {
    vec!["真寻".to_string(), "小真寻".to_string()]
}

fn default_web_host() -> String {
    "127.0.0.1".to_string()
}

fn default_web_port() -> u16 {
    8081
}

fn default_secret_key() -> String {
    "09d25e094faa6ca2556c818166b7a9563b93f7099f6f0f4caa6cf63b88e8d3e7".to_string()
}

fn default_bots() -> Vec<BotConfig> {
    vec![
        BotConfig {
            enabled: true,
            protocol: "console".to_string(),
            url: None,
            access_token: None,
        },
        // 默认禁用以防误连
        BotConfig {
            enabled: false,
            protocol: "onebot".to_string(),
            url: Some("ws://127.0.0.1:3001".to_string()),
            access_token: Some("YOUR_TOKEN_HERE".to_string()),
        },
    ]
}

fn default_true() -> bool {
    true
}

fn default_protocol() -> String {
    "onebot".to_string()
}

/// 构建插件默认配置 Value，并确保包含 enabled 字段
pub fn build_config<T: Serialize>(data: T) -> Value {
    let mut val = Value::try_from(data).unwrap_or(Value::Table(Default::default()));
    if let Value::Table(ref mut map) = val
        && !map.contains_key("enabled")
    {
        map.insert("enabled".to_string(), Value::Boolean(true));
    }
    val
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Serialize)]
    struct Sample {
        limit: u32,
    }

    #[test]
    fn build_config_inserts_enabled() {
        let val = build_config(Sample { limit: 3 });
        assert_eq!(val.get("enabled").and_then(|v| v.as_bool()), Some(true));
        assert_eq!(val.get("limit").and_then(|v| v.as_integer()), Some(3));
    }

    #[test]
    fn parse_minimal_config() {
        let text = r#"
superusers = [10001, 10002]

[web_ui]
username = "admin"
password = "123456"

[help]
enabled = true
type = "VV"
"#;
        let cfg: AppConfig = toml::from_str(text).unwrap();
        assert_eq!(cfg.first_superuser(), Some(10001));
        assert!(cfg.is_superuser(10002));
        assert_eq!(cfg.web_ui.port, 8081);
        assert_eq!(cfg.web_ui.username, "admin");
        assert!(cfg.plugin_enabled("help"));
        assert!(!cfg.plugin_enabled("poke"));
        assert_eq!(cfg.command_prefix, vec!["".to_string(), "/".to_string()]);
    }

    #[tokio::test]
    async fn load_or_create_fills_missing_sections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();

        let defaults = vec![("poke", build_config(Sample { limit: 1 }))];
        let cfg = AppConfig::load_or_create(path, &defaults).await.unwrap();
        assert!(cfg.plugin_enabled("poke"));

        let saved = std::fs::read_to_string(path).unwrap();
        let reloaded: AppConfig = toml::from_str(&saved).unwrap();
        assert!(reloaded.plugins.contains_key("poke"));
    }
}
