//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/parley/config.toml)
//! 3. Environment variables (PARLEY_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::RequestPolicy;
use crate::sync::ReconnectPolicy;

/// Environment variable prefix
const ENV_PREFIX: &str = "PARLEY";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the REST API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// WebSocket URL of the push channel
    #[serde(default = "default_push_url")]
    pub push_url: String,

    /// Bearer token for both channels
    #[serde(default)]
    pub token: Option<String>,

    /// Local user identity, for tokens that don't carry a `sub` claim
    #[serde(default)]
    pub user_id: Option<String>,

    /// Directory for local files (log file)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log file location (defaults to `<data_dir>/parley.log`)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Log level for the parley crates
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How long a typing indicator survives without a refresh
    #[serde(default = "default_typing_ttl_ms")]
    pub typing_ttl_ms: u64,

    /// Messages fetched per page
    #[serde(default = "default_message_page_size")]
    pub message_page_size: u32,

    /// Keep failed sends visible (marked failed) instead of removing them
    #[serde(default)]
    pub keep_failed_sends: bool,

    /// Push channel reconnect policy
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// REST retry policy
    #[serde(default)]
    pub requests: RequestConfig,
}

/// Push channel reconnect settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_base_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_reconnect_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_reconnect_base_ms(),
            max_delay_ms: default_reconnect_max_ms(),
            max_attempts: default_reconnect_attempts(),
        }
    }
}

/// REST request settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestConfig {
    /// Total attempts for retryable requests (first try included)
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_ms(),
            retry_max_delay_ms: default_retry_max_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            push_url: default_push_url(),
            token: None,
            user_id: None,
            data_dir: default_data_dir(),
            log_file: None,
            log_level: default_log_level(),
            typing_ttl_ms: default_typing_ttl_ms(),
            message_page_size: default_message_page_size(),
            keep_failed_sends: false,
            reconnect: ReconnectConfig::default(),
            requests: RequestConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (PARLEY_API_URL, PARLEY_PUSH_URL, PARLEY_TOKEN, ...)
    /// 2. Config file (~/.config/parley/config.toml or PARLEY_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load from `--config <path>` if given, else the default location
    pub fn load_with_cli_override(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_API_URL", ENV_PREFIX)) {
            self.api_url = val;
        }

        if let Ok(val) = std::env::var(format!("{}_PUSH_URL", ENV_PREFIX)) {
            self.push_url = val;
        }

        // Empty string clears the token
        if let Ok(val) = std::env::var(format!("{}_TOKEN", ENV_PREFIX)) {
            self.token = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_USER_ID", ENV_PREFIX)) {
            self.user_id = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_LOG_LEVEL", ENV_PREFIX)) {
            self.log_level = val;
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with PARLEY_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parley")
            .join("config.toml")
    }

    /// Get the path of the log file
    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("parley.log"))
    }

    /// Reconnect policy for the push channel
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            max_attempts: self.reconnect.max_attempts,
        }
    }

    /// Retry policy for REST calls
    pub fn request_policy(&self) -> RequestPolicy {
        RequestPolicy {
            attempts: self.requests.retry_attempts.max(1),
            base_delay: Duration::from_millis(self.requests.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.requests.retry_max_delay_ms),
            timeout: Duration::from_millis(self.requests.timeout_ms),
        }
    }

    /// Typing indicator lifetime
    pub fn typing_ttl(&self) -> Duration {
        Duration::from_millis(self.typing_ttl_ms)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("parley")
}

fn default_api_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_push_url() -> String {
    "ws://localhost:3000/events".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_typing_ttl_ms() -> u64 {
    3_000
}

fn default_message_page_size() -> u32 {
    50
}

fn default_reconnect_base_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

fn default_reconnect_attempts() -> u32 {
    10
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_retry_max_ms() -> u64 {
    5_000
}

fn default_timeout_ms() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "PARLEY_API_URL",
        "PARLEY_PUSH_URL",
        "PARLEY_TOKEN",
        "PARLEY_USER_ID",
        "PARLEY_DATA_DIR",
        "PARLEY_LOG_LEVEL",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.token.is_none());
        assert!(config.data_dir.ends_with("parley"));
        assert_eq!(config.typing_ttl(), Duration::from_secs(3));
        assert!(!config.keep_failed_sends);
    }

    #[test]
    fn test_default_reconnect_policy() {
        let policy = Config::default().reconnect_policy();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.max_attempts, 10);
    }

    #[test]
    fn test_request_policy_never_zero_attempts() {
        let mut config = Config::default();
        config.requests.retry_attempts = 0;
        assert_eq!(config.request_policy().attempts, 1);
    }

    #[test]
    fn test_log_path() {
        let mut config = Config::default();
        assert!(config.log_path().ends_with("parley.log"));

        config.log_file = Some(PathBuf::from("/tmp/custom.log"));
        assert_eq!(config.log_path(), PathBuf::from("/tmp/custom.log"));
    }

    #[test]
    fn test_env_override_token() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("PARLEY_TOKEN", "abc.def.ghi");
        config.apply_env_overrides();
        assert_eq!(config.token.as_deref(), Some("abc.def.ghi"));

        // Empty string clears it
        env::set_var("PARLEY_TOKEN", "");
        config.apply_env_overrides();
        assert!(config.token.is_none());
    }

    #[test]
    fn test_env_override_urls() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("PARLEY_API_URL", "https://chat.example.com/api");
        env::set_var("PARLEY_PUSH_URL", "wss://chat.example.com/events");
        config.apply_env_overrides();

        assert_eq!(config.api_url, "https://chat.example.com/api");
        assert_eq!(config.push_url, "wss://chat.example.com/events");
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            api_url = "https://chat.example.com/api"
            token = "secret"
            typing_ttl_ms = 5000

            [reconnect]
            max_attempts = 4
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.api_url, "https://chat.example.com/api");
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.typing_ttl(), Duration::from_secs(5));
        assert_eq!(config.reconnect.max_attempts, 4);
        // Unset fields in a table keep their defaults
        assert_eq!(config.reconnect.base_delay_ms, 1_000);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.data_dir = temp_dir.path().join("data");
        config.token = Some("secret".to_string());
        config.reconnect.max_attempts = 7;
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.token.as_deref(), Some("secret"));
        assert_eq!(loaded.reconnect.max_attempts, 7);
        assert!(loaded.data_dir.exists());
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = TempDir::new().unwrap();
        env::set_var("PARLEY_DATA_DIR", temp_dir.path().join("data"));

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();
        // Should return defaults when file doesn't exist
        assert!(config.token.is_none());
        assert_eq!(config.message_page_size, 50);
    }
}
