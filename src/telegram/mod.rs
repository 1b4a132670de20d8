//! Telegram client wrapper module.
//!
//! Provides high-level abstractions over grammers: connecting a session
//! file, authentication (phone, 2FA, QR, bot token), and rate limiting.

mod auth;
mod client;
pub mod qr;
mod rate_limiter;

pub use auth::{TelegramAuthenticator, remove_session_file};
pub use client::{
    AccountInfo, QrAuthResult, TelegramBot, TelegramError, mask_phone, truncate_for_log,
};
pub use grammers_client::update::Update;
pub use rate_limiter::RateLimiter;
