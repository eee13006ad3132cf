use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;

pub const TOKEN_ENV: &str = "KIOSK_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_origin")]
    pub origin: String,
    /// Bearer credential forwarded verbatim.
    #[serde(default)]
    pub token: String,
    /// File whose trimmed contents replace `token` when present.
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_media_timeout")]
    pub media_timeout_secs: u64,
    #[serde(default = "default_descriptor_timeout")]
    pub descriptor_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "platform::cache_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Play the last stored descriptor when the API is unreachable.
    #[serde(default = "default_true")]
    pub offline_descriptor_fallback: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MenuLayout {
    /// Whole categories, `categories_per_page` at a time.
    #[default]
    CategoryPairs,
    /// `products_per_page` products of a single category at a time.
    ProductPages,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_item_secs")]
    pub default_item_secs: u64,
    #[serde(default = "default_menu_page_secs")]
    pub menu_page_secs: u64,
    #[serde(default)]
    pub menu_layout: MenuLayout,
    #[serde(default = "default_categories_per_page")]
    pub categories_per_page: usize,
    #[serde(default = "default_products_per_page")]
    pub products_per_page: usize,
    /// Refuse to start rotation until every leaf is cached.
    #[serde(default)]
    pub require_complete_cache: bool,
    /// Periodic descriptor re-fetch while playing; 0 disables it.
    #[serde(default)]
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            token: String::new(),
            token_file: None,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            media_timeout_secs: default_media_timeout(),
            descriptor_timeout_secs: default_descriptor_timeout(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: platform::cache_dir(),
            namespace: default_namespace(),
            offline_descriptor_fallback: true,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_item_secs: default_item_secs(),
            menu_page_secs: default_menu_page_secs(),
            menu_layout: MenuLayout::default(),
            categories_per_page: default_categories_per_page(),
            products_per_page: default_products_per_page(),
            require_complete_cache: false,
            refresh_interval_secs: 0,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

fn default_origin() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_concurrency() -> usize {
    4
}

fn default_media_timeout() -> u64 {
    30
}

fn default_descriptor_timeout() -> u64 {
    15
}

fn default_namespace() -> String {
    "media".to_string()
}

fn default_true() -> bool {
    true
}

fn default_item_secs() -> u64 {
    10
}

fn default_menu_page_secs() -> u64 {
    5
}

fn default_categories_per_page() -> usize {
    2
}

fn default_products_per_page() -> usize {
    4
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8989
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

impl FetchConfig {
    pub fn media_timeout(&self) -> Duration {
        Duration::from_secs(self.media_timeout_secs.max(1))
    }

    pub fn descriptor_timeout(&self) -> Duration {
        Duration::from_secs(self.descriptor_timeout_secs.max(1))
    }
}

impl PlaybackConfig {
    pub fn default_item_duration(&self) -> Duration {
        Duration::from_secs(self.default_item_secs.max(1))
    }

    pub fn menu_page_duration(&self) -> Duration {
        Duration::from_secs(self.menu_page_secs.max(1))
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }
}

impl ApiConfig {
    /// Effective bearer token: `KIOSK_TOKEN`, then `token_file`, then `token`.
    pub fn resolved_token(&self) -> anyhow::Result<String> {
        self.resolve_token(std::env::var(TOKEN_ENV).ok())
    }

    fn resolve_token(&self, from_env: Option<String>) -> anyhow::Result<String> {
        if let Some(token) = from_env {
            if !token.trim().is_empty() {
                return Ok(token.trim().to_string());
            }
        }
        if let Some(path) = &self.token_file {
            let token = std::fs::read_to_string(path)?;
            return Ok(token.trim().to_string());
        }
        Ok(self.token.clone())
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Loads `config_path`, writing defaults there first if it does not exist.
    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
