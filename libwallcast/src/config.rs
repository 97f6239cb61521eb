//! Configuration management for Wallcast
//!
//! Configuration comes from a TOML file, with the four identity values
//! (VK group, VK token, bot token, channel) overridable from the environment.
//! The file itself is optional when the environment supplies everything.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};
use crate::relay::supervisor::FetchErrorPolicy;

pub const ENV_CONFIG: &str = "WALLCAST_CONFIG";
pub const ENV_VK_GROUP_ID: &str = "WALLCAST_VK_GROUP_ID";
pub const ENV_VK_ACCESS_TOKEN: &str = "WALLCAST_VK_ACCESS_TOKEN";
pub const ENV_TELEGRAM_BOT_TOKEN: &str = "WALLCAST_TELEGRAM_BOT_TOKEN";
pub const ENV_TELEGRAM_CHANNEL_ID: &str = "WALLCAST_TELEGRAM_CHANNEL_ID";

/// Largest page `wall.get` will return
pub const MAX_FETCH_COUNT: u32 = 100;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub vk: VkConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/wallcast/parsed_posts.db".to_string(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct VkConfig {
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_vk_api_url")]
    pub api_url: String,
    #[serde(default = "default_vk_api_version")]
    pub api_version: String,
    #[serde(default = "default_fetch_count")]
    pub fetch_count: u32,
}

impl Default for VkConfig {
    fn default() -> Self {
        Self {
            group_id: String::new(),
            access_token: String::new(),
            api_url: default_vk_api_url(),
            api_version: default_vk_api_version(),
            fetch_count: default_fetch_count(),
        }
    }
}

impl std::fmt::Debug for VkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VkConfig")
            .field("group_id", &self.group_id)
            .field("access_token", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .field("api_version", &self.api_version)
            .field("fetch_count", &self.fetch_count)
            .finish()
    }
}

impl VkConfig {
    /// Parse the configured group id
    ///
    /// Accepts the community id with or without the leading minus VK uses
    /// for community walls; the result is always positive.
    pub fn group_id(&self) -> Result<i64> {
        let id: i64 = self.group_id.trim().parse().map_err(|_| ConfigError::Invalid {
            field: "vk.group_id".to_string(),
            reason: format!("'{}' is not an integer", self.group_id),
        })?;

        if id == 0 {
            return Err(ConfigError::Invalid {
                field: "vk.group_id".to_string(),
                reason: "must not be zero".to_string(),
            }
            .into());
        }

        Ok(id.abs())
    }
}

#[derive(Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
    /// Long-poll timeout for `getUpdates`, in seconds
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout: u64,
    pub start_reply: Option<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            channel_id: String::new(),
            api_url: default_telegram_api_url(),
            poll_timeout: default_poll_timeout(),
            start_reply: None,
        }
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"[REDACTED]")
            .field("channel_id", &self.channel_id)
            .field("api_url", &self.api_url)
            .field("poll_timeout", &self.poll_timeout)
            .field("start_reply", &self.start_reply)
            .finish()
    }
}

/// Timing and failure policy of the relay loop; all durations in seconds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub poll_interval: u64,
    pub post_delay: u64,
    pub publish_delay: u64,
    pub http_timeout: u64,
    pub on_error: FetchErrorPolicy,
    pub restart_backoff: u64,
    pub max_backoff: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: 300,
            post_delay: 5,
            publish_delay: 5,
            http_timeout: 30,
            on_error: FetchErrorPolicy::Continue,
            restart_backoff: 30,
            max_backoff: 1800,
        }
    }
}

fn default_vk_api_url() -> String {
    "https://api.vk.com".to_string()
}

fn default_vk_api_version() -> String {
    "5.199".to_string()
}

fn default_fetch_count() -> u32 {
    MAX_FETCH_COUNT
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout() -> u64 {
    25
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file is not an error; environment overrides are applied
    /// and the result validated either way.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_or_env(&config_path)
    }

    /// Load configuration from `path` if it exists, then apply the environment
    pub fn load_or_env(path: &Path) -> Result<Self> {
        let path = expand_path(path);
        let mut config = if path.exists() {
            Self::parse_file(&path)?
        } else {
            tracing::debug!("No config file at {}, using environment", path.display());
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string without validating it
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Replace identity values with their environment counterparts when set
    pub fn apply_env_overrides(&mut self) {
        let overrides: [(&str, &mut String); 4] = [
            (ENV_VK_GROUP_ID, &mut self.vk.group_id),
            (ENV_VK_ACCESS_TOKEN, &mut self.vk.access_token),
            (ENV_TELEGRAM_BOT_TOKEN, &mut self.telegram.bot_token),
            (ENV_TELEGRAM_CHANNEL_ID, &mut self.telegram.channel_id),
        ];

        for (var, field) in overrides {
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    *field = value.trim().to_string();
                }
            }
        }
    }

    /// Check that every required value is present and well-formed
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("vk.group_id", &self.vk.group_id),
            ("vk.access_token", &self.vk.access_token),
            ("telegram.bot_token", &self.telegram.bot_token),
            ("telegram.channel_id", &self.telegram.channel_id),
        ];

        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(name.to_string()).into());
            }
        }

        self.vk.group_id()?;

        if self.relay.poll_interval == 0 {
            return Err(ConfigError::Invalid {
                field: "relay.poll_interval".to_string(),
                reason: "must be at least 1 second".to_string(),
            }
            .into());
        }

        if self.vk.fetch_count == 0 || self.vk.fetch_count > MAX_FETCH_COUNT {
            return Err(ConfigError::Invalid {
                field: "vk.fetch_count".to_string(),
                reason: format!("must be between 1 and {}", MAX_FETCH_COUNT),
            }
            .into());
        }

        Ok(())
    }
}

fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).to_string())
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(ENV_CONFIG) {
        return Ok(expand_path(Path::new(&path)));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("wallcast").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WallcastError;
    use serial_test::serial;
    use tempfile::TempDir;

    const FULL_CONFIG: &str = r#"
[database]
path = "/tmp/wallcast-test.db"

[vk]
group_id = "123456"
access_token = "vk-token"

[telegram]
bot_token = "123:abc"
channel_id = "@wallcast_test"

[relay]
poll_interval = 60
on_error = "restart"
"#;

    fn clear_env() {
        for var in [
            ENV_VK_GROUP_ID,
            ENV_VK_ACCESS_TOKEN,
            ENV_TELEGRAM_BOT_TOKEN,
            ENV_TELEGRAM_CHANNEL_ID,
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_parse_full_config_with_defaults() {
        let config = Config::from_toml(FULL_CONFIG).unwrap();

        assert_eq!(config.database.path, "/tmp/wallcast-test.db");
        assert_eq!(config.vk.group_id, "123456");
        assert_eq!(config.vk.api_url, "https://api.vk.com");
        assert_eq!(config.vk.fetch_count, 100);
        assert_eq!(config.telegram.api_url, "https://api.telegram.org");
        assert_eq!(config.telegram.poll_timeout, 25);
        assert_eq!(config.relay.poll_interval, 60);
        assert_eq!(config.relay.post_delay, 5);
        assert_eq!(config.relay.publish_delay, 5);
        assert_eq!(config.relay.on_error, FetchErrorPolicy::Restart);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_relay_defaults() {
        let relay = RelayConfig::default();
        assert_eq!(relay.poll_interval, 300);
        assert_eq!(relay.post_delay, 5);
        assert_eq!(relay.on_error, FetchErrorPolicy::Continue);
    }

    #[test]
    fn test_group_id_accepts_negative_owner_form() {
        let vk = VkConfig {
            group_id: "-42".to_string(),
            ..Default::default()
        };
        assert_eq!(vk.group_id().unwrap(), 42);
    }

    #[test]
    fn test_group_id_rejects_garbage() {
        let vk = VkConfig {
            group_id: "club42".to_string(),
            ..Default::default()
        };
        match vk.group_id() {
            Err(WallcastError::Config(ConfigError::Invalid { field, .. })) => {
                assert_eq!(field, "vk.group_id");
            }
            other => panic!("Expected invalid group id, got {:?}", other),
        }

        let zero = VkConfig {
            group_id: "0".to_string(),
            ..Default::default()
        };
        assert!(zero.group_id().is_err());
    }

    #[test]
    fn test_validate_reports_missing_field() {
        let config = Config::from_toml("[vk]\ngroup_id = \"1\"\n").unwrap();
        match config.validate() {
            Err(WallcastError::Config(ConfigError::MissingField(field))) => {
                assert_eq!(field, "vk.access_token");
            }
            other => panic!("Expected missing field, got {:?}", other),
        }
    }

    #[test]
    fn test_database_table_without_path_uses_default() {
        let config = Config::from_toml("[database]\n").unwrap();
        assert_eq!(config.database.path, "~/.local/share/wallcast/parsed_posts.db");
    }

    #[test]
    fn test_validate_rejects_zero_poll_interval() {
        let mut config = Config::from_toml(FULL_CONFIG).unwrap();
        config.relay.poll_interval = 0;

        match config.validate() {
            Err(WallcastError::Config(ConfigError::Invalid { field, .. })) => {
                assert_eq!(field, "relay.poll_interval");
            }
            other => panic!("Expected invalid poll interval, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_oversized_page() {
        let mut config = Config::from_toml(FULL_CONFIG).unwrap();
        config.vk.fetch_count = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_output_redacts_tokens() {
        let config = Config::from_toml(FULL_CONFIG).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("vk-token"));
        assert!(!debug.contains("123:abc"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        match Config::from_toml("invalid toml content [[[") {
            Err(WallcastError::Config(ConfigError::ParseError(_))) => {}
            other => panic!("Expected parse error, got {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_env_overrides_fill_missing_file() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("absent.toml");

        std::env::set_var(ENV_VK_GROUP_ID, "777");
        std::env::set_var(ENV_VK_ACCESS_TOKEN, "env-vk-token");
        std::env::set_var(ENV_TELEGRAM_BOT_TOKEN, "env-bot-token");
        std::env::set_var(ENV_TELEGRAM_CHANNEL_ID, "-100200300");

        let config = Config::load_or_env(&missing).unwrap();
        clear_env();

        assert_eq!(config.vk.group_id().unwrap(), 777);
        assert_eq!(config.vk.access_token, "env-vk-token");
        assert_eq!(config.telegram.bot_token, "env-bot-token");
        assert_eq!(config.telegram.channel_id, "-100200300");
        assert_eq!(config.relay.poll_interval, 300);
    }

    #[test]
    #[serial]
    fn test_env_overrides_win_over_file() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, FULL_CONFIG).unwrap();

        std::env::set_var(ENV_TELEGRAM_CHANNEL_ID, "@other_channel");
        let config = Config::load_or_env(&path).unwrap();
        clear_env();

        assert_eq!(config.telegram.channel_id, "@other_channel");
        assert_eq!(config.vk.group_id, "123456");
    }

    #[test]
    #[serial]
    fn test_load_expands_tilde() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("wallcast.toml"), FULL_CONFIG).unwrap();

        let previous_home = std::env::var("HOME").ok();
        std::env::set_var("HOME", temp_dir.path());
        let result = Config::load_or_env(Path::new("~/wallcast.toml"));
        match previous_home {
            Some(home) => std::env::set_var("HOME", home),
            None => std::env::remove_var("HOME"),
        }

        let config = result.unwrap();
        assert_eq!(config.vk.group_id, "123456");
        assert_eq!(config.relay.on_error, FetchErrorPolicy::Restart);
    }

    #[test]
    #[serial]
    fn test_missing_file_without_env_fails_validation() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("absent.toml");

        let result = Config::load_or_env(&missing);
        assert!(matches!(
            result,
            Err(WallcastError::Config(ConfigError::MissingField(_)))
        ));
    }

    #[test]
    #[serial]
    fn test_resolve_config_path_from_env() {
        std::env::set_var(ENV_CONFIG, "/etc/wallcast/relay.toml");
        let path = resolve_config_path().unwrap();
        std::env::remove_var(ENV_CONFIG);

        assert_eq!(path, PathBuf::from("/etc/wallcast/relay.toml"));
    }
}
