use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::ConfigError;

static SNOWFLAKE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{1,20}$").expect("valid snowflake regex"));

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub announcement: AnnouncementConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Overrides the application id reported in READY.
    #[serde(default)]
    pub application_id: Option<String>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("bot_token", &"[redacted]")
            .field("application_id", &self.application_id)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub log_channel: String,
    #[serde(default)]
    pub alert_channel: Option<String>,
    #[serde(default)]
    pub startup_channel: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_post_cron")]
    pub post_cron: String,
    #[serde(default = "default_tally_cron")]
    pub tally_cron: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            post_cron: default_post_cron(),
            tally_cron: default_tally_cron(),
        }
    }
}

impl ScheduleConfig {
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        Tz::from_str(self.timezone.trim()).map_err(|_| {
            ConfigError::InvalidConfig(format!(
                "schedule.timezone '{}' is not a known IANA timezone",
                self.timezone
            ))
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnnouncementConfig {
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default = "default_mention")]
    pub mention: String,
    #[serde(default = "default_accept_emoji")]
    pub accept_emoji: String,
    #[serde(default = "default_decline_emoji")]
    pub decline_emoji: String,
    #[serde(default = "default_empty_marker")]
    pub empty_marker: String,
}

impl Default for AnnouncementConfig {
    fn default() -> Self {
        Self {
            template: default_template(),
            mention: default_mention(),
            accept_emoji: default_accept_emoji(),
            decline_emoji: default_decline_emoji(),
            empty_marker: default_empty_marker(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackendKind,
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::File,
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_self_ping_interval")]
    pub self_ping_interval_secs: u64,
    #[serde(default)]
    pub self_ping_url: Option<String>,
    #[serde(default)]
    pub disable_self_ping: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            self_ping_interval_secs: default_self_ping_interval(),
            self_ping_url: None,
            disable_self_ping: false,
        }
    }
}

impl WebConfig {
    pub fn self_ping_target(&self) -> String {
        self.self_ping_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("http://127.0.0.1:{}/", self.port))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(alias = "console", default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Loads `path` if it exists, otherwise starts from defaults, then layers
    /// the environment on top.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            Config::default()
        };
        config.apply_env_overrides()?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.bot_token.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "auth.bot_token cannot be empty (set TOKEN)".to_string(),
            ));
        }
        if looks_like_placeholder_bot_token(&self.auth.bot_token) {
            return Err(ConfigError::InvalidConfig(
                "auth.bot_token is still using a placeholder value; set a real Discord bot token"
                    .to_string(),
            ));
        }

        if self.channels.targets.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "channels.targets cannot be empty (set CHANNEL_IDS)".to_string(),
            ));
        }
        for target in &self.channels.targets {
            ensure_snowflake("channels.targets", target)?;
        }

        if self.channels.log_channel.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "channels.log_channel cannot be empty (set LOG_CHANNEL_ID)".to_string(),
            ));
        }
        ensure_snowflake("channels.log_channel", &self.channels.log_channel)?;
        if let Some(alert) = &self.channels.alert_channel {
            ensure_snowflake("channels.alert_channel", alert)?;
        }
        if let Some(startup) = &self.channels.startup_channel {
            ensure_snowflake("channels.startup_channel", startup)?;
        }

        self.schedule.tz()?;
        for (field, expr) in [
            ("schedule.post_cron", &self.schedule.post_cron),
            ("schedule.tally_cron", &self.schedule.tally_cron),
        ] {
            crate::scheduler::parse_schedule(expr).map_err(|err| {
                ConfigError::InvalidConfig(format!("{field} '{expr}' is invalid: {err}"))
            })?;
        }

        if self.announcement.accept_emoji.is_empty() || self.announcement.decline_emoji.is_empty()
        {
            return Err(ConfigError::InvalidConfig(
                "announcement reaction emojis cannot be empty".to_string(),
            ));
        }
        if self.announcement.accept_emoji == self.announcement.decline_emoji {
            return Err(ConfigError::InvalidConfig(
                "announcement.accept_emoji and announcement.decline_emoji must differ".to_string(),
            ));
        }

        if self.store.backend == StoreBackendKind::File && self.store.path.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "store.path cannot be empty for the file backend".to_string(),
            ));
        }

        if self.web.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "web.port must be between 1 and 65535".to_string(),
            ));
        }
        if self.web.self_ping_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "web.self_ping_interval_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        PathBuf::from(self.store.path.trim())
    }

    fn normalize(&mut self) {
        self.auth.bot_token = sanitize_bot_token(&self.auth.bot_token);
        self.channels.targets = self
            .channels
            .targets
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        self.channels.log_channel = self.channels.log_channel.trim().to_string();
        self.channels.alert_channel = normalize_optional(self.channels.alert_channel.take());
        self.channels.startup_channel = normalize_optional(self.channels.startup_channel.take());
        self.auth.application_id = normalize_optional(self.auth.application_id.take());
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = env_value("TOKEN")?.or(env_value("DISCORD_TOKEN")?) {
            self.auth.bot_token = sanitize_bot_token(&value);
        }
        if let Some(value) = env_value("APPLICATION_ID")? {
            self.auth.application_id = Some(value);
        }
        if let Some(value) = env_value("CHANNEL_IDS")? {
            self.channels.targets = split_channel_list(&value);
        }
        if let Some(value) = env_value("LOG_CHANNEL_ID")? {
            self.channels.log_channel = value;
        }
        if let Some(value) = env_value("ALERT_CHANNEL_ID")? {
            self.channels.alert_channel = Some(value);
        }
        if let Some(value) = env_value("STARTUP_CHANNEL_ID")? {
            self.channels.startup_channel = Some(value);
        }
        if let Some(value) = env_value("TIMEZONE")? {
            self.schedule.timezone = value;
        }
        if let Some(value) = env_value("STORE_PATH")? {
            self.store.path = value;
        }
        if let Some(value) = env_value("PORT")? {
            self.web.port = value.trim().parse().map_err(|_| {
                ConfigError::InvalidConfig(format!("PORT '{value}' is not a valid port"))
            })?;
        }
        Ok(())
    }
}

fn env_value(name: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(source) => Err(ConfigError::EnvVar {
            name: name.to_string(),
            source,
        }),
    }
}

fn ensure_snowflake(field: &str, value: &str) -> Result<(), ConfigError> {
    if SNOWFLAKE_REGEX.is_match(value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidConfig(format!(
            "{field} contains '{value}', which is not a Discord id"
        )))
    }
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn split_channel_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn default_timezone() -> String {
    "Europe/Berlin".to_string()
}

fn default_post_cron() -> String {
    "0 20 * * *".to_string()
}

fn default_tally_cron() -> String {
    "0 19 * * *".to_string()
}

fn default_template() -> String {
    "**Aufstellung am :date um 20 Uhr**\n\nReagiere bis **19 Uhr**. Wer nicht reagiert = Sanki :mention"
        .to_string()
}

fn default_mention() -> String {
    "<@BBG>".to_string()
}

fn default_accept_emoji() -> String {
    "✅".to_string()
}

fn default_decline_emoji() -> String {
    "❌".to_string()
}

fn default_empty_marker() -> String {
    "Keine".to_string()
}

fn default_store_path() -> String {
    "last_messages.json".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_self_ping_interval() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn sanitize_bot_token(token: &str) -> String {
    let trimmed = token.trim();
    let without_prefix = trimmed
        .strip_prefix("Bot ")
        .or_else(|| trimmed.strip_prefix("bot "))
        .unwrap_or(trimmed);
    without_prefix.trim().to_string()
}

fn looks_like_placeholder_bot_token(token: &str) -> bool {
    let lower = token.trim().to_ascii_lowercase();
    lower == "your_discord_bot_token"
        || lower == "your_bot_token_here"
        || lower == "your_bot_token"
        || lower == "your-token-here"
        || lower == "changeme"
}
