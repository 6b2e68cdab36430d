//! Configuration management for echobot

use chrono::Weekday;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Environment variable pointing at an alternative config file
pub const CONFIG_ENV: &str = "ECHOBOT_CONFIG";

/// Environment variable overriding `api.bearer_token`
pub const TOKEN_ENV: &str = "ECHOBOT_BEARER_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub files: FilesConfig,
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub bearer_token: SecretString,
    /// The bot's own account id; discovered at startup when absent
    pub user_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    pub offset: String,
    pub blocked_users: String,
    pub blocked_phrases: String,
    pub event_log: String,
    pub scratch_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    pub keywords: Vec<String>,
    /// Seconds between search cycles
    #[serde(default = "default_interval")]
    pub check_interval: u64,
    #[serde(default)]
    pub excluded_languages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Seconds to wait before retrying a failed remote call
    pub error_interval: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            error_interval: default_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub enabled: bool,
    pub weekday: Weekday,
    pub hashtag: String,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weekday: Weekday::Mon,
            hashtag: "#AllMagadanWeekly".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub enabled: bool,
    pub hourly_url: String,
    pub daily_url: String,
    pub every_hours: u32,
    pub evening_hour: u32,
    pub hashtag: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hourly_url: String::new(),
            daily_url: String::new(),
            every_hours: 3,
            evening_hour: 20,
            hashtag: "#AllMagadanWeather".to_string(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.twitter.com".to_string()
}

fn default_interval() -> u64 {
    60
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    /// Parse, apply environment overrides and validate
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.is_empty() {
                config.api.bearer_token = SecretString::from(token);
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.bearer_token.expose_secret().is_empty() {
            return Err(ConfigError::MissingField("api.bearer_token".to_string()).into());
        }
        if self.watcher.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(invalid("watcher.keywords", "at least one keyword is required"));
        }
        if self.watcher.check_interval == 0 {
            return Err(invalid("watcher.check_interval", "must be positive"));
        }
        if self.retry.error_interval == 0 {
            return Err(invalid("retry.error_interval", "must be positive"));
        }
        if self.weather.enabled {
            if !(1..=24).contains(&self.weather.every_hours) {
                return Err(invalid("weather.every_hours", "must be between 1 and 24"));
            }
            if self.weather.evening_hour > 23 {
                return Err(invalid("weather.evening_hour", "must be between 0 and 23"));
            }
            if self.weather.hourly_url.is_empty() || self.weather.daily_url.is_empty() {
                return Err(ConfigError::MissingField("weather.hourly_url/daily_url".to_string()).into());
            }
        }
        Ok(())
    }

    /// Keywords joined into a single search disjunction
    pub fn search_query(&self) -> String {
        self.watcher
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect::<Vec<_>>()
            .join(" OR ")
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.watcher.check_interval)
    }

    pub fn error_interval(&self) -> Duration {
        Duration::from_secs(self.retry.error_interval)
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::BotError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Expand `~` in a configured path
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Ok(expand_path(&path));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("echobot").join("config.toml"))
}
