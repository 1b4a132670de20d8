//! Application settings and Telegram configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{DEFAULT_LOGIN_ATTEMPTS, DEFAULT_PREFIX};

/// Telegram API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Telegram API ID (obtain from <https://my.telegram.org>).
    pub api_id: i32,

    /// Telegram API hash (obtain from <https://my.telegram.org>).
    pub api_hash: String,

    /// Path to the owner's session file.
    #[serde(default = "default_session_path")]
    pub session_path: PathBuf,
}

fn default_session_path() -> PathBuf {
    PathBuf::from("owner.session")
}

impl TelegramConfig {
    /// Creates a new Telegram configuration.
    #[must_use]
    pub fn new(api_id: i32, api_hash: String) -> Self {
        Self {
            api_id,
            api_hash,
            session_path: default_session_path(),
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// Expects `TG_API_ID` and `TG_API_HASH` to be set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_id: i32 = std::env::var("TG_API_ID")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_ID"))?
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidApiId)?;

        if api_id <= 0 {
            return Err(ConfigError::InvalidApiId);
        }

        let api_hash = std::env::var("TG_API_HASH")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_HASH"))?;

        let session_path = std::env::var("TG_SESSION_PATH")
            .map_or_else(|_| default_session_path(), PathBuf::from);

        Ok(Self {
            api_id,
            api_hash,
            session_path,
        })
    }
}

/// Bot-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    /// Directory holding the JSON stores and premium session files.
    pub data_dir: PathBuf,

    /// Prefix used by accounts that never changed theirs.
    #[serde(default = "default_prefix")]
    pub default_prefix: String,

    /// Owner user ID. Resolved from the owner account when unset.
    pub owner_id: Option<i64>,

    /// Companion bot token. The bot frontend is disabled without it.
    pub bot_token: Option<String>,

    /// Session file of the companion bot.
    #[serde(default = "default_bot_session_path")]
    pub bot_session_path: PathBuf,

    /// Attempts allowed for a login code or 2FA password.
    #[serde(default = "default_login_attempts")]
    pub login_attempts: u32,

    /// Reaction used when mirroring the owner's messages.
    #[serde(default = "default_mirror_emoji")]
    pub mirror_emoji: String,

    /// Minimum interval between two reactions sent by one session.
    #[serde(default = "default_min_reaction_interval")]
    pub min_reaction_interval_ms: u64,

    /// Interval of the premium expiry sweep in seconds.
    #[serde(default = "default_expiry_check")]
    pub expiry_check_secs: u64,
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_owned()
}

fn default_bot_session_path() -> PathBuf {
    PathBuf::from("bot.session")
}

const fn default_login_attempts() -> u32 {
    DEFAULT_LOGIN_ATTEMPTS
}

fn default_mirror_emoji() -> String {
    "❤".to_owned()
}

const fn default_min_reaction_interval() -> u64 {
    1500
}

const fn default_expiry_check() -> u64 {
    300
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            default_prefix: default_prefix(),
            owner_id: None,
            bot_token: None,
            bot_session_path: default_bot_session_path(),
            login_attempts: default_login_attempts(),
            mirror_emoji: default_mirror_emoji(),
            min_reaction_interval_ms: default_min_reaction_interval(),
            expiry_check_secs: default_expiry_check(),
        }
    }
}

impl BotSettings {
    /// Creates bot settings from environment variables with defaults.
    #[must_use]
    pub fn from_env_with_defaults() -> Self {
        Self {
            data_dir: std::env::var("DATA_DIR").map_or_else(|_| PathBuf::from("data"), PathBuf::from),
            default_prefix: std::env::var("COMMAND_PREFIX")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(default_prefix),
            owner_id: env_parse("OWNER_ID"),
            bot_token: std::env::var("BOT_TOKEN").ok().filter(|t| !t.trim().is_empty()),
            bot_session_path: std::env::var("BOT_SESSION_PATH")
                .map_or_else(|_| default_bot_session_path(), PathBuf::from),
            login_attempts: env_parse("LOGIN_MAX_ATTEMPTS")
                .filter(|&n: &u32| n > 0)
                .unwrap_or_else(default_login_attempts),
            mirror_emoji: std::env::var("MIRROR_EMOJI")
                .ok()
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(default_mirror_emoji),
            min_reaction_interval_ms: env_parse("MIN_REACTION_INTERVAL_MS")
                .unwrap_or_else(default_min_reaction_interval),
            expiry_check_secs: env_parse("EXPIRY_CHECK_INTERVAL")
                .filter(|&n: &u64| n > 0)
                .unwrap_or_else(default_expiry_check),
        }
    }

    /// Returns the file layout under the data directory.
    #[must_use]
    pub fn paths(&self) -> DataPaths {
        DataPaths::new(&self.data_dir)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Locations of every file kept under the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn prefixes(&self) -> PathBuf {
        self.root.join("prefixes.json")
    }

    #[must_use]
    pub fn premium(&self) -> PathBuf {
        self.root.join("premium.json")
    }

    #[must_use]
    pub fn sessions(&self) -> PathBuf {
        self.root.join("sessions.json")
    }

    /// Directory holding one session file per premium user.
    #[must_use]
    pub fn session_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    #[must_use]
    pub fn session_file(&self, user_id: i64) -> PathBuf {
        self.session_dir().join(format!("{user_id}.session"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid API ID format (must be a positive integer)")]
    InvalidApiId,
}
