//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! pipeline constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::acquire::orchestrator::RetryPolicy;
use crate::pipeline::PipelineConfig;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// Comma-separated list of admin user IDs that receive failure reports
    #[serde(rename = "admin_ids")]
    pub admin_ids_str: Option<String>,

    /// Comma-separated backend names in priority order
    #[serde(default = "default_backend_order")]
    pub backend_order: String,

    /// Path or name of the yt-dlp executable
    #[serde(default = "default_ytdlp_binary")]
    pub ytdlp_binary: String,
    /// Netscape cookies file passed to yt-dlp
    pub ytdlp_cookies_path: Option<PathBuf>,

    /// Path or name of the instaloader executable
    #[serde(default = "default_instaloader_binary")]
    pub instaloader_binary: String,
    /// Account whose saved session instaloader uses
    pub instagram_username: Option<String>,
    /// Saved instaloader session file
    pub instaloader_session_path: Option<PathBuf>,
    /// Password for `refresh-session`; never needed by the running bot
    pub instagram_password: Option<String>,
    /// Interpreter used to read instaloader's session file
    #[serde(default = "default_python_binary")]
    pub python_binary: String,

    /// SQLite cache file. The cache is kept in memory when unset.
    pub cache_path: Option<PathBuf>,
    /// Directory under which per-request workspaces are created
    pub workspace_root: Option<PathBuf>,

    /// Maximum number of simultaneous backend invocations
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Deadline for a whole request (backends + delivery), in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_backend_order() -> String {
    "ytdlp,opengraph,instaloader".to_string()
}

fn default_ytdlp_binary() -> String {
    "yt-dlp".to_string()
}

fn default_instaloader_binary() -> String {
    "instaloader".to_string()
}

fn default_python_binary() -> String {
    "python3".to_string()
}

const fn default_worker_pool_size() -> usize {
    DEFAULT_WORKER_POOL_SIZE
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn parse_list(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|token| !token.is_empty())
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use reel_relay::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Local overrides, not checked into git
            .add_source(File::with_name("config/local").required(false))
            // Eg.. `APP__WORKER_POOL_SIZE=4 ./target/app`
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Plain UPPER_SNAKE_CASE variables; empty ones count as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        s.try_deserialize()
    }

    /// Returns the set of Telegram IDs that receive failure reports
    #[must_use]
    pub fn admin_ids(&self) -> HashSet<i64> {
        self.admin_ids_str
            .as_ref()
            .map(|s| parse_list(s).filter_map(|id| id.parse::<i64>().ok()).collect())
            .unwrap_or_default()
    }

    /// Backend names in priority order, lower-cased
    #[must_use]
    pub fn backend_names(&self) -> Vec<String> {
        parse_list(&self.backend_order)
            .map(str::to_lowercase)
            .collect()
    }

    /// Directory under which request workspaces are allocated
    #[must_use]
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("reel-relay"))
    }

    /// Builds the coordinator configuration from these settings
    #[must_use]
    pub fn to_pipeline_config(&self, bot_username: Option<String>) -> PipelineConfig {
        PipelineConfig {
            retry: RetryPolicy::default(),
            worker_pool_size: self.worker_pool_size.max(1),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            cache_ttl: CACHE_TTL,
            workspace_root: self.workspace_root(),
            media_group_limit: MEDIA_GROUP_LIMIT,
            sends_per_pause: OVERSIZED_SENDS_PER_PAUSE,
            oversized_pause: OVERSIZED_PAUSE,
            bot_username,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_settings() -> Settings {
        Settings {
            telegram_token: "dummy".to_string(),
            admin_ids_str: None,
            backend_order: default_backend_order(),
            ytdlp_binary: default_ytdlp_binary(),
            ytdlp_cookies_path: None,
            instaloader_binary: default_instaloader_binary(),
            instagram_username: None,
            instaloader_session_path: None,
            instagram_password: None,
            python_binary: default_python_binary(),
            cache_path: None,
            workspace_root: None,
            worker_pool_size: default_worker_pool_size(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    #[test]
    fn test_admin_list_parsing() {
        let mut settings = bare_settings();

        settings.admin_ids_str = Some("123,456".to_string());
        let admins = settings.admin_ids();
        assert!(admins.contains(&123));
        assert!(admins.contains(&456));
        assert_eq!(admins.len(), 2);

        settings.admin_ids_str = Some("333; 444 555".to_string());
        assert_eq!(settings.admin_ids().len(), 3);

        settings.admin_ids_str = Some("abc, 777".to_string());
        let admins = settings.admin_ids();
        assert!(admins.contains(&777));
        assert_eq!(admins.len(), 1);
    }

    #[test]
    fn test_backend_order_default_and_override() {
        let mut settings = bare_settings();
        assert_eq!(
            settings.backend_names(),
            vec!["ytdlp", "opengraph", "instaloader"]
        );

        settings.backend_order = "Instaloader; ytdlp".to_string();
        assert_eq!(settings.backend_names(), vec!["instaloader", "ytdlp"]);
    }

    #[test]
    fn test_pipeline_config_never_has_empty_pool() {
        let mut settings = bare_settings();
        settings.worker_pool_size = 0;
        settings.request_timeout_secs = 42;

        let config = settings.to_pipeline_config(Some("relay_bot".to_string()));
        assert_eq!(config.worker_pool_size, 1);
        assert_eq!(config.request_timeout, Duration::from_secs(42));
        assert_eq!(config.cache_ttl, CACHE_TTL);
        assert_eq!(config.bot_username.as_deref(), Some("relay_bot"));
    }
}

// Pipeline configuration
/// Cache entries older than this are treated as misses (7 days)
pub const CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Attempts per backend for transient failures
pub const BACKEND_MAX_RETRIES: usize = 3;
/// Linear backoff base between attempts on the same backend
pub const BACKEND_BACKOFF_BASE: Duration = Duration::from_secs(2);
/// Default width of the backend worker pool
pub const DEFAULT_WORKER_POOL_SIZE: usize = 2;
/// Default per-request deadline in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300; // 5 minutes

// Delivery configuration
/// Maximum number of items in one media group
pub const MEDIA_GROUP_LIMIT: usize = 10;
/// Sends between pauses when an asset list exceeds one group
pub const OVERSIZED_SENDS_PER_PAUSE: usize = 3;
/// Pause inserted after every `OVERSIZED_SENDS_PER_PAUSE` sends
pub const OVERSIZED_PAUSE: Duration = Duration::from_secs(1);
/// Description preview length in captions (characters)
pub const DESCRIPTION_PREVIEW_CHARS: usize = 200;
/// Telegram caption limit
pub const CAPTION_LIMIT: usize = 1024;

// Telegram API retry configuration
/// Maximum retry attempts for Telegram API calls
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;
/// Initial backoff for Telegram API retries (milliseconds)
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Maximum backoff for Telegram API retries (milliseconds)
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
