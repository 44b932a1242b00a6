//! Configuration management for Boostcast

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};

use crate::error::{ConfigError, Result};
use crate::registry::LevelPolicy;
use crate::types::{PreferenceLevel, SubscriberId};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub instance: InstanceConfig,
    pub bot: BotConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
}

/// The Mastodon-API instance and the OAuth application registered on it
#[derive(Debug, Deserialize)]
pub struct InstanceConfig {
    pub url: String,
    pub client_id: String,
    #[serde(deserialize_with = "secret")]
    pub client_secret: SecretString,
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct BotConfig {
    #[serde(deserialize_with = "secret")]
    pub access_token: SecretString,
    #[serde(default, deserialize_with = "optional_secret")]
    pub access_token_secret: Option<SecretString>,
    /// Handle used in help texts, e.g. `boostbot`
    pub handle: String,
    /// Resolved from the access token when absent
    #[serde(default)]
    pub account_id: Option<SubscriberId>,
    /// Account whose posts are boosted
    pub source_account: SubscriberId,
    /// Separate account reading command messages; the bot account when absent
    #[serde(default, deserialize_with = "optional_secret")]
    pub dm_access_token: Option<SecretString>,
    #[serde(default)]
    pub let_bot_account_boost: bool,
    #[serde(default)]
    pub admins: Vec<SubscriberId>,
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Loop timings, written as humantime strings such as `"90s"` or `"5m"`
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_poll_interval", deserialize_with = "duration")]
    pub poll_interval: Duration,
    #[serde(default = "default_command_interval", deserialize_with = "duration")]
    pub command_interval: Duration,
    #[serde(default = "default_rate_limit_backoff", deserialize_with = "duration")]
    pub rate_limit_backoff: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            command_interval: default_command_interval(),
            rate_limit_backoff: default_rate_limit_backoff(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Public URL of the web flow, used in the links sent to users
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub redirect_success: Option<String>,
    #[serde(default)]
    pub redirect_canceled: Option<String>,
    #[serde(default)]
    pub admin_contact: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            base_url: None,
            redirect_success: None,
            redirect_canceled: None,
            admin_contact: None,
        }
    }
}

impl WebConfig {
    /// Where users start the authorization flow
    pub fn start_url(&self) -> String {
        match &self.base_url {
            Some(base) => format!("{}/oauth/start", base.trim_end_matches('/')),
            None => format!("http://{}/oauth/start", self.listen),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationConfig {
    /// Keep a returning subscriber's level instead of resetting it
    #[serde(default = "default_true")]
    pub preserve_level_on_reauthorize: bool,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            preserve_level_on_reauthorize: true,
        }
    }
}

impl RegistrationConfig {
    pub fn level_policy(&self) -> LevelPolicy {
        if self.preserve_level_on_reauthorize {
            LevelPolicy::PreserveOr(PreferenceLevel::default())
        } else {
            LevelPolicy::Reset(PreferenceLevel::default())
        }
    }
}

fn default_scopes() -> Vec<String> {
    vec![
        "read".to_string(),
        "write".to_string(),
        "follow".to_string(),
    ]
}

fn default_app_name() -> String {
    "Boostcast".to_string()
}

fn default_database_path() -> String {
    "~/.local/share/boostcast/state.json".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_command_interval() -> Duration {
    Duration::from_secs(70)
}

fn default_rate_limit_backoff() -> Duration {
    Duration::from_secs(300)
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_true() -> bool {
    true
}

fn secret<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}

fn optional_secret<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<SecretString>, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

fn duration<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load and validate configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but cannot work
    pub fn validate(&self) -> Result<()> {
        require_url("instance.url", &self.instance.url)?;
        require_url("instance.redirect_uri", &self.instance.redirect_uri)?;
        require("instance.client_id", &self.instance.client_id)?;
        require("instance.client_secret", self.instance.client_secret.expose_secret())?;
        require("bot.access_token", self.bot.access_token.expose_secret())?;
        require("bot.handle", &self.bot.handle)?;
        require("bot.source_account", self.bot.source_account.as_str())?;
        require("database.path", &self.database.path)?;

        for (field, value) in [
            ("schedule.poll_interval", self.schedule.poll_interval),
            ("schedule.command_interval", self.schedule.command_interval),
            ("schedule.rate_limit_backoff", self.schedule.rate_limit_backoff),
        ] {
            if value.is_zero() {
                return Err(invalid(field, "must be greater than zero"));
            }
        }

        if self.web.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(invalid("web.listen", "expected host:port, e.g. 127.0.0.1:8080"));
        }
        for (field, value) in [
            ("web.base_url", &self.web.base_url),
            ("web.redirect_success", &self.web.redirect_success),
            ("web.redirect_canceled", &self.web.redirect_canceled),
        ] {
            if let Some(value) = value {
                require_url(field, value)?;
            }
        }

        Ok(())
    }

    /// State file path with `~` expanded
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database.path).to_string())
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(field.to_string()).into());
    }
    Ok(())
}

fn require_url(field: &str, value: &str) -> Result<()> {
    require(field, value)?;
    url::Url::parse(value).map_err(|e| invalid(field, &e.to_string()))?;
    Ok(())
}

fn invalid(field: &str, reason: &str) -> crate::error::BoostcastError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Resolve the configuration file path under the XDG config directory
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("BOOSTCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("boostcast").join("config.toml"))
}
