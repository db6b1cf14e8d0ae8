use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub reply: ReplyConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Route the platform calls for verification and event submission.
    #[serde(default = "default_webhook_path")]
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            path: default_webhook_path(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlatformConfig {
    /// Shared secret used to sign webhook requests.
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub app_secret: Option<String>,
    #[serde(default = "default_platform_api_base")]
    pub api_base: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            app_id: None,
            app_secret: None,
            api_base: default_platform_api_base(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Model used to describe inbound images. Falls back to `model`.
    #[serde(default)]
    pub vision_model: Option<String>,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: None,
            model: default_model(),
            vision_model: None,
            image_model: default_image_model(),
            max_tokens: None,
            temperature: None,
            system_prompt: default_system_prompt(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
        }
    }
}

/// How a reply that misses the deadline reaches the user.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LateReplyMode {
    /// Acknowledge now, push the real reply through the platform API later.
    #[default]
    Push,
    /// Answer with a "resend shortly" text and park the real reply in the cache.
    CacheForResend,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReplyConfig {
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    /// How long the platform waits for a passive reply before hanging up.
    /// `deadline_ms` must stay below it.
    #[serde(default = "default_platform_window_ms")]
    pub platform_window_ms: u64,
    #[serde(default)]
    pub strategy: LateReplyMode,
    #[serde(default = "default_placeholder_text")]
    pub placeholder_text: String,
    #[serde(default = "default_fallback_text")]
    pub fallback_text: String,
    /// Text messages starting with this prefix request an image.
    #[serde(default = "default_image_prompt_prefix")]
    pub image_prompt_prefix: String,
    #[serde(default = "default_describe_prompt")]
    pub describe_prompt: String,
}

impl ReplyConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_deadline_ms(),
            platform_window_ms: default_platform_window_ms(),
            strategy: LateReplyMode::default(),
            placeholder_text: default_placeholder_text(),
            fallback_text: default_fallback_text(),
            image_prompt_prefix: default_image_prompt_prefix(),
            describe_prompt: default_describe_prompt(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DedupConfig {
    #[serde(default = "default_dedup_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_dedup_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_secs: default_dedup_window_secs(),
            max_entries: default_dedup_max_entries(),
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LoggingConfig {
    /// When set, logs are also written to a daily-rolling file here.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_webhook_path() -> String {
    "/wechat".to_string()
}
fn default_platform_api_base() -> String {
    "https://api.weixin.qq.com".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_image_model() -> String {
    "dall-e-3".to_string()
}
fn default_system_prompt() -> String {
    "You are a helpful assistant replying inside a chat app. Keep answers short.".to_string()
}
fn default_max_retries() -> u32 {
    2
}
fn default_base_backoff_ms() -> u64 {
    500
}
fn default_deadline_ms() -> u64 {
    4_500
}
fn default_platform_window_ms() -> u64 {
    5000
}

fn default_placeholder_text() -> String {
    "Still working on it, please send the same message again in a few seconds.".to_string()
}
fn default_fallback_text() -> String {
    "Sorry, I couldn't come up with a reply just now. Please try again later.".to_string()
}
fn default_image_prompt_prefix() -> String {
    "/image".to_string()
}
fn default_describe_prompt() -> String {
    "Describe what is in this picture.".to_string()
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_cache_capacity() -> usize {
    100
}
fn default_dedup_window_secs() -> u64 {
    60
}
fn default_dedup_max_entries() -> usize {
    4096
}
fn default_purge_interval_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let (config_path, required) = match custom_path {
            Some(path) => (path, true),
            None => (Self::default_path(), false),
        };

        let s = Config::builder()
            .add_source(File::from(config_path).required(required))
            // QUICKREPLY__PLATFORM__TOKEN=... overrides platform.token
            .add_source(
                Environment::with_prefix("QUICKREPLY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".quickreply/config.toml")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.platform.token.trim().is_empty() {
            return Err(ConfigError::Message("platform.token must be set".into()));
        }
        if self.reply.deadline_ms == 0 {
            return Err(ConfigError::Message("reply.deadline_ms must be > 0".into()));
        }
        if self.reply.deadline_ms >= self.reply.platform_window_ms {
            return Err(ConfigError::Message(format!(
                "reply.deadline_ms ({}) must be below reply.platform_window_ms ({})",
                self.reply.deadline_ms, self.reply.platform_window_ms
            )));
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::Message("cache.capacity must be > 0".into()));
        }
        if self.reply.strategy == LateReplyMode::Push {
            let has = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
            if !has(&self.platform.app_id) || !has(&self.platform.app_secret) {
                return Err(ConfigError::Message(
                    "reply.strategy = \"push\" requires platform.app_id and platform.app_secret"
                        .into(),
                ));
            }
        }
        Ok(())
    }
}

/// Mask a secret value for safe display in logs.
/// Shows first 4 and last 4 chars, the rest as `****`.
pub fn mask_secret(value: &str) -> String {
    if value.chars().count() <= 8 {
        "****".to_string()
    } else {
        let head: String = value.chars().take(4).collect();
        let tail: String = value
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("{head}****{tail}")
    }
}
