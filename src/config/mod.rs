//! Configuration module for the userbot.
//!
//! Handles loading of Telegram API credentials and bot settings
//! from the environment, and the layout of the data directory.

mod settings;

pub use settings::{BotSettings, ConfigError, DataPaths, TelegramConfig};

/// Prefix used until an account picks its own.
pub const DEFAULT_PREFIX: &str = ".";

/// Maximum prefix length in characters.
pub const MAX_PREFIX_LENGTH: usize = 3;

/// Longest subscription a single grant can add.
pub const MAX_GRANT_DAYS: u32 = 36_500;

/// Attempts allowed for a login code or 2FA password.
pub const DEFAULT_LOGIN_ATTEMPTS: u32 = 3;

/// Attempts made when connecting a stored session.
pub const CONNECT_ATTEMPTS: u32 = 3;
