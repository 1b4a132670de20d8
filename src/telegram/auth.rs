//! Grammers-backed [`Authenticator`] for premium logins.

use std::path::{Path, PathBuf};

use grammers_tl_types as tl;
use tracing::{debug, info, warn};

use super::client::{PwdToken, TelegramBot, TelegramError, Token, mask_phone};
use crate::config::DataPaths;
use crate::login::{AuthError, Authenticator, SignedIn};

/// A login between steps.
pub struct PendingLogin {
    chat_id: i64,
    bot: TelegramBot,
    token: Token,
    password_token: Option<PwdToken>,
    phone_hint: String,
}

/// Logs premium accounts in, one session file per account.
///
/// The account must be the one talking to the bot: its session file is
/// named after the chat ID, and a mismatching account is logged out.
#[derive(Debug, Clone)]
pub struct TelegramAuthenticator {
    api_id: i32,
    api_hash: String,
    paths: DataPaths,
}

impl TelegramAuthenticator {
    #[must_use]
    pub fn new(api_id: i32, api_hash: String, paths: DataPaths) -> Self {
        Self {
            api_id,
            api_hash,
            paths,
        }
    }

    async fn finish(&self, pending: &PendingLogin) -> Result<SignedIn, AuthError> {
        let info = pending.bot.me().await.map_err(|e| AuthError::Failed(e.to_string()))?;

        if info.id != pending.chat_id {
            warn!(
                "Chat {} logged in a different account ({})",
                pending.chat_id, info.id
            );
            return Err(AuthError::Failed(
                "you can only connect the account you are chatting from".to_owned(),
            ));
        }

        info!("Premium account {} logged in ({})", info.id, pending.phone_hint);
        Ok(SignedIn {
            user_id: info.id,
            username: info.username,
            first_name: info.first_name,
            session_file: pending.bot.session_path().to_path_buf(),
            phone_hint: pending.phone_hint.clone(),
        })
    }
}

impl Authenticator for TelegramAuthenticator {
    type Pending = PendingLogin;

    async fn request_code(&self, chat_id: i64, phone: &str) -> Result<PendingLogin, AuthError> {
        let session_file = self.paths.session_file(chat_id);
        remove_session_file(&session_file);

        let bot = TelegramBot::connect(&session_file, self.api_id)
            .await
            .map_err(|e| AuthError::Failed(e.to_string()))?;

        match bot.request_login_code(phone, &self.api_hash).await {
            Ok(token) => Ok(PendingLogin {
                chat_id,
                bot,
                token,
                password_token: None,
                phone_hint: mask_phone(phone),
            }),
            Err(e) => {
                bot.disconnect();
                remove_session_file(&session_file);
                Err(match e {
                    TelegramError::FloodWait(secs) => AuthError::FloodWait(secs),
                    other if other.to_string().contains("PHONE_NUMBER_INVALID") => AuthError::InvalidPhone,
                    other => AuthError::Failed(other.to_string()),
                })
            }
        }
    }

    async fn submit_code(&self, pending: &mut PendingLogin, code: &str) -> Result<SignedIn, AuthError> {
        match pending.bot.sign_in(&pending.token, code).await {
            Ok(()) => self.finish(pending).await,
            Err(TelegramError::PasswordRequired(password_token)) => {
                let hint = password_token.hint().map(str::to_owned);
                pending.password_token = Some(password_token);
                Err(AuthError::PasswordRequired { hint })
            }
            Err(TelegramError::InvalidCode) => Err(AuthError::InvalidCode),
            Err(TelegramError::FloodWait(secs)) => Err(AuthError::FloodWait(secs)),
            Err(e) if e.to_string().contains("PHONE_CODE_EXPIRED") => Err(AuthError::CodeExpired),
            Err(e) => Err(AuthError::Failed(e.to_string())),
        }
    }

    async fn submit_password(&self, pending: &mut PendingLogin, password: &str) -> Result<SignedIn, AuthError> {
        let Some(password_token) = pending.password_token.take() else {
            return Err(AuthError::Failed("no password was requested".to_owned()));
        };

        match pending.bot.check_password(password_token, password).await {
            Ok(()) => self.finish(pending).await,
            Err(TelegramError::InvalidPassword(token)) => {
                pending.password_token = Some(token);
                Err(AuthError::InvalidPassword)
            }
            Err(TelegramError::FloodWait(secs)) => Err(AuthError::FloodWait(secs)),
            Err(e) => Err(AuthError::Failed(e.to_string())),
        }
    }

    async fn release(&self, pending: PendingLogin) {
        debug!("Closing login client of chat {}", pending.chat_id);
        pending.bot.disconnect();
    }

    async fn abort(&self, pending: PendingLogin) {
        debug!("Discarding pending login of chat {}", pending.chat_id);
        if matches!(pending.bot.is_authorized().await, Ok(true)) {
            info!("Logging out the discarded login of chat {}", pending.chat_id);
            if let Err(e) = pending.bot.inner().invoke(&tl::functions::auth::LogOut {}).await {
                warn!("Failed to log out discarded login: {}", e);
            }
        }
        pending.bot.disconnect();
        let session_file: PathBuf = pending.bot.session_path().to_path_buf();
        drop(pending);
        remove_session_file(&session_file);
    }
}

/// Deletes a session file if it exists.
pub fn remove_session_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed session file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove session file {}: {}", path.display(), e),
    }
}
