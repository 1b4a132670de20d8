//! Remote login flow for premium users.
//!
//! A premium user talks to the companion bot, which walks them through
//! phone number, login code and (optionally) 2FA password. The Telegram
//! side is behind the [`Authenticator`] trait so the flow can be driven
//! without a network connection.

mod flow;

use std::future::Future;
use std::path::PathBuf;

use thiserror::Error;

pub use flow::{LoginFlow, LoginReply, extract_code, normalize_phone};

/// An account that finished logging in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedIn {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    /// Session file now holding the authorization.
    pub session_file: PathBuf,
    pub phone_hint: String,
}

/// Failures reported by an [`Authenticator`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("The phone number is invalid")]
    InvalidPhone,

    #[error("The login code is invalid")]
    InvalidCode,

    #[error("The login code has expired")]
    CodeExpired,

    #[error("Two-factor password required")]
    PasswordRequired { hint: Option<String> },

    #[error("The password is invalid")]
    InvalidPassword,

    #[error("Too many attempts, wait {0} seconds")]
    FloodWait(u32),

    #[error("{0}")]
    Failed(String),
}

/// Telegram operations needed to log in a new account.
pub trait Authenticator: Send + Sync {
    /// State of one login between steps (client, tokens).
    type Pending: Send;

    /// Sends a login code to `phone` and opens a pending login.
    fn request_code(
        &self,
        chat_id: i64,
        phone: &str,
    ) -> impl Future<Output = Result<Self::Pending, AuthError>> + Send;

    /// Submits the login code.
    ///
    /// Returns [`AuthError::PasswordRequired`] when the account has 2FA.
    fn submit_code(
        &self,
        pending: &mut Self::Pending,
        code: &str,
    ) -> impl Future<Output = Result<SignedIn, AuthError>> + Send;

    /// Submits the 2FA password.
    fn submit_password(
        &self,
        pending: &mut Self::Pending,
        password: &str,
    ) -> impl Future<Output = Result<SignedIn, AuthError>> + Send;

    /// Closes the connection of a completed login. The session stays
    /// authorized.
    fn release(&self, pending: Self::Pending) -> impl Future<Output = ()> + Send;

    /// Discards a pending login and everything it created, logging the
    /// account out if it already signed in.
    fn abort(&self, pending: Self::Pending) -> impl Future<Output = ()> + Send;
}
