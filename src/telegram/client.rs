//! Telegram client wrapper shared by the owner, the companion bot and
//! every premium session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use grammers_client::client::UpdateStream;
use grammers_client::client::UpdatesConfiguration;
use grammers_client::{Client, InvocationError, SenderPool, SignInError};
use grammers_session::storages::SqliteSession;
use grammers_tl_types as tl;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Re-export types for external use.
pub use grammers_client::client::{LoginToken as Token, PasswordToken as PwdToken};

/// Errors that can occur during Telegram operations.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Not authorized. Please sign in first.")]
    NotAuthorized,

    #[error("Sign in failed: {0}")]
    SignInFailed(String),

    #[error("Invalid login code")]
    InvalidCode,

    #[error("Password required for 2FA")]
    PasswordRequired(PwdToken),

    #[error("Invalid password")]
    InvalidPassword(PwdToken),

    #[error("Flood wait required: {0} seconds")]
    FloodWait(u32),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Update stream already taken")]
    UpdatesTaken,

    #[error("API invocation error: {0}")]
    Invocation(String),
}

impl From<InvocationError> for TelegramError {
    fn from(err: InvocationError) -> Self {
        let err_str = err.to_string();

        if (err_str.contains("FLOOD_WAIT") || err_str.contains("flood"))
            && let Some(seconds) = extract_flood_wait_seconds(&err_str) {
                return Self::FloodWait(seconds);
            }

        Self::Invocation(err_str)
    }
}

/// Extracts flood wait seconds from an error message.
fn extract_flood_wait_seconds(err_msg: &str) -> Option<u32> {
    let patterns = ["flood_wait_", "flood wait "];
    let lower = err_msg.to_lowercase();

    for pattern in patterns {
        if let Some(idx) = lower.find(pattern) {
            let num_str: String = lower[idx + pattern.len()..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if let Ok(seconds) = num_str.parse() {
                return Some(seconds);
            }
        }
    }
    None
}

/// Result of a QR login attempt.
#[derive(Debug, Clone)]
pub enum QrAuthResult {
    /// Token to display as a QR code.
    Token {
        /// Raw token bytes (encode as base64 for the URL).
        token: Vec<u8>,
        /// Unix timestamp when the token expires.
        expires: i32,
    },
    /// The account lives on another datacenter.
    MigrateTo {
        dc_id: i32,
    },
    /// The QR code was scanned and accepted.
    Success,
    /// 2FA password is required.
    PasswordRequired,
}

/// Basic information about the logged-in account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub is_bot: bool,
}

/// High-level Telegram client wrapper.
pub struct TelegramBot {
    /// The underlying grammers client.
    client: Client,

    /// Session file backing this connection.
    session_path: PathBuf,

    /// Update stream, handed out once to the session's runner.
    updates: Mutex<Option<UpdateStream>>,

    /// Background task running the sender pool.
    pool_task: JoinHandle<()>,
}

impl TelegramBot {
    /// Opens (or creates) a session file and connects with it.
    pub async fn connect(session_path: impl AsRef<Path>, api_id: i32) -> Result<Self, TelegramError> {
        let session_path = session_path.as_ref().to_path_buf();
        debug!("Connecting to Telegram with {}", session_path.display());

        if let Some(parent) = session_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| TelegramError::Session(e.to_string()))?;
        }

        let session = Arc::new(
            SqliteSession::open(&session_path)
                .await
                .map_err(|e| TelegramError::Session(e.to_string()))?,
        );

        let pool = SenderPool::new(Arc::clone(&session), api_id);
        let client = Client::new(pool.handle.clone());
        let SenderPool { runner, updates, .. } = pool;

        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        let stream = client.stream_updates(
            updates,
            UpdatesConfiguration {
                catch_up: false,
                ..Default::default()
            },
        );

        Ok(Self {
            client,
            session_path,
            updates: Mutex::new(Some(stream)),
            pool_task,
        })
    }

    /// Session file backing this connection.
    #[must_use]
    pub fn session_path(&self) -> &Path {
        &self.session_path
    }

    /// Checks if the client is authorized.
    pub async fn is_authorized(&self) -> Result<bool, TelegramError> {
        self.client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))
    }

    /// Requests a login code to be sent to the phone number.
    pub async fn request_login_code(&self, phone: &str, api_hash: &str) -> Result<Token, TelegramError> {
        info!("Requesting login code for phone: {}...", mask_phone(phone));

        self.client
            .request_login_code(phone, api_hash)
            .await
            .map_err(|e| {
                let err: TelegramError = e.into();
                match err {
                    TelegramError::FloodWait(_) => err,
                    other => TelegramError::SignInFailed(other.to_string()),
                }
            })
    }

    /// Signs in with the login code.
    pub async fn sign_in(&self, token: &Token, code: &str) -> Result<(), TelegramError> {
        info!("Signing in with login code...");

        match self.client.sign_in(token, code).await {
            Ok(_user) => {
                info!("Successfully signed in!");
                Ok(())
            }
            Err(SignInError::PasswordRequired(password_token)) => {
                debug!("2FA password required, hint: {:?}", password_token.hint());
                Err(TelegramError::PasswordRequired(password_token))
            }
            Err(SignInError::InvalidCode) => Err(TelegramError::InvalidCode),
            Err(e) => Err(TelegramError::SignInFailed(e.to_string())),
        }
    }

    /// Checks the 2FA password.
    pub async fn check_password(&self, password_token: PwdToken, password: &str) -> Result<(), TelegramError> {
        info!("Checking 2FA password...");

        match self.client.check_password(password_token, password).await {
            Ok(_user) => {
                info!("Successfully authenticated with 2FA!");
                Ok(())
            }
            Err(SignInError::InvalidPassword(token)) => Err(TelegramError::InvalidPassword(token)),
            Err(e) => Err(TelegramError::SignInFailed(e.to_string())),
        }
    }

    /// Signs in as a bot account.
    pub async fn bot_sign_in(&self, token: &str, api_hash: &str) -> Result<(), TelegramError> {
        info!("Signing in companion bot...");
        self.client
            .bot_sign_in(token, api_hash)
            .await
            .map(|_| ())
            .map_err(|e| TelegramError::SignInFailed(e.to_string()))
    }

    /// Requests a QR login token.
    ///
    /// Calling this again after the code was scanned returns
    /// [`QrAuthResult::Success`]. The QR code URL format is
    /// `tg://login?token=BASE64URL_TOKEN`.
    pub async fn export_login_token(&self, api_id: i32, api_hash: &str) -> Result<QrAuthResult, TelegramError> {
        debug!("Requesting QR login token...");

        let request = tl::functions::auth::ExportLoginToken {
            api_id,
            api_hash: api_hash.to_owned(),
            except_ids: vec![],
        };

        match self.client.invoke(&request).await {
            Ok(tl::enums::auth::LoginToken::Token(token)) => {
                debug!("Got login token, expires: {}", token.expires);
                Ok(QrAuthResult::Token {
                    token: token.token,
                    expires: token.expires,
                })
            }
            Ok(tl::enums::auth::LoginToken::MigrateTo(migrate)) => {
                debug!("Need to migrate to DC {}", migrate.dc_id);
                Ok(QrAuthResult::MigrateTo { dc_id: migrate.dc_id })
            }
            Ok(tl::enums::auth::LoginToken::Success(_)) => {
                info!("QR login successful!");
                Ok(QrAuthResult::Success)
            }
            Err(e) => {
                let err_str = e.to_string();
                if err_str.contains("SESSION_PASSWORD_NEEDED") {
                    return Ok(QrAuthResult::PasswordRequired);
                }
                Err(TelegramError::SignInFailed(err_str))
            }
        }
    }

    /// Fetches the logged-in account.
    pub async fn me(&self) -> Result<AccountInfo, TelegramError> {
        if !self.is_authorized().await? {
            return Err(TelegramError::NotAuthorized);
        }

        let request = tl::functions::users::GetUsers {
            id: vec![tl::enums::InputUser::UserSelf],
        };

        let users = self.client.invoke(&request).await?;
        match users.into_iter().next() {
            Some(tl::enums::User::User(user)) => Ok(AccountInfo {
                id: user.id,
                username: user.username,
                first_name: user.first_name.unwrap_or_default(),
                is_bot: user.bot,
            }),
            _ => {
                warn!("Could not get info about the current account");
                Err(TelegramError::Invocation("users.getUsers returned no user".to_owned()))
            }
        }
    }

    /// Hands out the update stream. Only the first caller gets it.
    pub async fn take_updates(&self) -> Result<UpdateStream, TelegramError> {
        self.updates.lock().await.take().ok_or(TelegramError::UpdatesTaken)
    }

    /// Returns a reference to the underlying client for advanced operations.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Disconnects from Telegram and stops the sender pool.
    pub fn disconnect(&self) {
        debug!("Disconnecting {}", self.session_path.display());
        self.client.disconnect();
        self.pool_task.abort();
    }
}

impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot")
            .field("session_path", &self.session_path)
            .finish_non_exhaustive()
    }
}

/// Masks a phone number for logging (shows last 4 digits).
#[must_use]
pub fn mask_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > 4 {
        format!("***{}", &digits[digits.len() - 4..])
    } else {
        "****".to_owned()
    }
}

/// Truncates a string for logging purposes.
#[must_use]
pub fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}
