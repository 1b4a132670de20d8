//! Companion bot: premium users connect their accounts here.

use std::sync::Arc;

use chrono::Utc;
use grammers_client::client::UpdateStream;
use tracing::{debug, info, warn};

use super::types::{BotAction, BotRequest, BotResponse};
use crate::login::{Authenticator, LoginFlow, LoginReply, SignedIn};
use crate::sessions::{SessionError, SessionManager};
use crate::store::{PremiumRegistry, SessionRecord, SessionRegistry, StoreError};
use crate::telegram::{Update, remove_session_file};

const HELP: &str = "🤖 Premium userbot\n\n\
/connect - link your Telegram account as a userbot\n\
/cancel - abort a login in progress\n\
/disconnect - stop and remove your userbot session\n\
/status - show your subscription and session\n\
/help - show this message";

/// Private-chat frontend of the companion bot.
pub struct BotFrontend<A: Authenticator> {
    login: LoginFlow<A>,
    premium: Arc<PremiumRegistry>,
    registry: Arc<SessionRegistry>,
    manager: Arc<SessionManager>,
    default_prefix: String,
}

impl<A: Authenticator + 'static> BotFrontend<A> {
    #[must_use]
    pub fn new(
        login: LoginFlow<A>,
        premium: Arc<PremiumRegistry>,
        registry: Arc<SessionRegistry>,
        manager: Arc<SessionManager>,
        default_prefix: String,
    ) -> Self {
        Self {
            login,
            premium,
            registry,
            manager,
            default_prefix,
        }
    }

    /// Serves private messages until the update stream ends.
    ///
    /// Each message is handled on its own task so a slow login step of
    /// one user does not hold up the others.
    pub async fn run(self: Arc<Self>, mut updates: UpdateStream) {
        info!("Companion bot is listening");

        loop {
            let update = match updates.next().await {
                Ok(update) => update,
                Err(e) => {
                    warn!("Companion bot update stream ended: {}", e);
                    break;
                }
            };

            let Update::NewMessage(message) = update else {
                continue;
            };
            if message.outgoing() {
                continue;
            }

            let Some(chat_id) = message.sender().map(|s| s.id().bare_id()) else {
                continue;
            };
            if message.peer().map(|p| p.id().bare_id()) != Some(chat_id) {
                debug!("Ignoring non-private message for the companion bot");
                continue;
            }

            let this = Arc::clone(&self);
            tokio::spawn(async move {
                let is_password = this.login.awaits_password(chat_id).await;
                let response = this.handle(chat_id, message.text()).await;

                if is_password && let Err(e) = message.delete().await {
                    warn!("Could not delete password message of {}: {}", chat_id, e);
                }
                if let Err(e) = message.reply(response.text.as_str()).await {
                    warn!("Failed to reply to {}: {}", chat_id, e);
                }

                if let Some(follow_up) = this.apply(response.action).await
                    && let Err(e) = message.reply(follow_up.as_str()).await
                {
                    warn!("Failed to reply to {}: {}", chat_id, e);
                }
            });
        }
    }

    /// Handles one private message of `chat_id`.
    pub async fn handle(&self, chat_id: i64, text: &str) -> BotResponse {
        let request = BotRequest::parse(text);
        debug!("Bot request from {}: {:?}", chat_id, request);

        let result = match request {
            BotRequest::Start | BotRequest::Help => Ok(BotResponse::reply(HELP)),
            BotRequest::Connect => self.connect(chat_id).await,
            BotRequest::Cancel => Ok(BotResponse::reply(if self.login.cancel(chat_id).await {
                "Login cancelled."
            } else {
                "Nothing to cancel."
            })),
            BotRequest::Disconnect => self.disconnect(chat_id).await,
            BotRequest::Status => self.status(chat_id).await,
            BotRequest::Unknown(name) => Ok(BotResponse::reply(format!(
                "Unknown command /{name}. Send /help."
            ))),
            BotRequest::Text(input) => self.login_input(chat_id, &input).await,
        };

        result.unwrap_or_else(|e| {
            warn!("Bot request of {} failed: {}", chat_id, e);
            BotResponse::reply("⚠️ Something went wrong, try again later.")
        })
    }

    async fn connect(&self, chat_id: i64) -> Result<BotResponse, StoreError> {
        if !self.premium.is_active(chat_id, Utc::now())? {
            return Ok(BotResponse::reply(
                "💎 Connecting needs an active premium subscription. Ask the owner for one.",
            ));
        }

        if self.manager.is_connected(chat_id).await {
            return Ok(BotResponse::reply(
                "✅ Your account is already connected. Send /disconnect first to replace it.",
            ));
        }

        if let Some(record) = self.registry.get(chat_id)? {
            return Ok(BotResponse::with_action(
                "🔄 Reconnecting your stored session...",
                BotAction::Attach(record),
            ));
        }

        Ok(match self.login.start(chat_id).await {
            LoginReply::Prompt(text) | LoginReply::Failed(text) => BotResponse::reply(text),
            _ => BotResponse::reply("A login is already in progress. Continue it, or send /cancel."),
        })
    }

    async fn disconnect(&self, chat_id: i64) -> Result<BotResponse, StoreError> {
        self.login.cancel(chat_id).await;

        if self.registry.get(chat_id)?.is_none() && !self.manager.is_connected(chat_id).await {
            return Ok(BotResponse::reply("You have no connected session."));
        }

        Ok(BotResponse::with_action(
            "👋 Your userbot session was stopped and removed.",
            BotAction::Forget(chat_id),
        ))
    }

    async fn status(&self, chat_id: i64) -> Result<BotResponse, StoreError> {
        let now = Utc::now();
        let mut lines = Vec::new();

        match self.premium.get(chat_id)? {
            Some(grant) if grant.is_active(now) => {
                let expiry = grant.expires_at.map_or_else(
                    || "never".to_owned(),
                    |at| format!("{} ({} days left)", at.format("%Y-%m-%d"), grant.days_left(now).unwrap_or(0)),
                );
                lines.push(format!("💎 Plan: {} (expires: {expiry})", grant.plan));
            }
            Some(_) => lines.push("💎 Your premium has expired.".to_owned()),
            None => lines.push("💎 No premium subscription.".to_owned()),
        }

        match self.registry.get(chat_id)? {
            Some(record) => {
                let state = if self.manager.is_connected(chat_id).await {
                    "🟢 online"
                } else {
                    "⚪ offline"
                };
                lines.push(format!("Session: {} {state}", record.label()));
                lines.push(format!("Connected since {}", record.connected_at.format("%Y-%m-%d %H:%M UTC")));
            }
            None if self.login.is_active(chat_id).await => {
                lines.push("Session: login in progress".to_owned());
            }
            None => lines.push("Session: none (send /connect)".to_owned()),
        }

        Ok(BotResponse::reply(lines.join("\n")))
    }

    async fn login_input(&self, chat_id: i64, input: &str) -> Result<BotResponse, StoreError> {
        Ok(match self.login.handle_input(chat_id, input).await {
            LoginReply::Prompt(text) => BotResponse::reply(text),
            LoginReply::Completed(signed_in) => {
                let record = self.store_session(signed_in).await?;
                let prefix = &self.default_prefix;
                BotResponse::with_action(
                    format!(
                        "✅ Connected as {}. Type {prefix}help in any chat from that account.",
                        record.label()
                    ),
                    BotAction::Attach(record),
                )
            }
            LoginReply::Failed(reason) => BotResponse::reply(format!("❌ {reason}")),
            LoginReply::NotInFlow => BotResponse::reply("Send /connect to link your account, or /help."),
            LoginReply::Busy => BotResponse::reply("⏳ Still working on your previous message..."),
        })
    }

    /// Writes the record of a fresh login, keeping earlier user settings.
    async fn store_session(&self, signed_in: SignedIn) -> Result<SessionRecord, StoreError> {
        let previous = self.registry.get(signed_in.user_id)?;
        let record = SessionRecord {
            user_id: signed_in.user_id,
            session_file: signed_in.session_file,
            phone_hint: signed_in.phone_hint,
            username: signed_in.username,
            first_name: signed_in.first_name,
            connected_at: Utc::now(),
            mirror_reactions: previous.as_ref().is_some_and(|p| p.mirror_reactions),
            mirror_emoji: previous.as_ref().and_then(|p| p.mirror_emoji.clone()),
            disabled_plugins: previous.map(|p| p.disabled_plugins).unwrap_or_default(),
        };
        self.registry.upsert(record.clone()).await?;
        Ok(record)
    }

    /// Runs the follow-up work. Returns an extra message for the user.
    async fn apply(&self, action: BotAction) -> Option<String> {
        match action {
            BotAction::None => None,
            BotAction::Attach(record) => match self.manager.attach(&record).await {
                Ok(()) => None,
                Err(SessionError::Unauthorized(user_id)) => {
                    if let Err(e) = self.registry.remove(user_id).await {
                        warn!("Failed to remove revoked session {}: {}", user_id, e);
                    }
                    remove_session_file(&record.session_file);
                    Some("Your stored session is no longer valid. Send /connect to log in again.".to_owned())
                }
                Err(e) => {
                    warn!("Failed to attach session {}: {}", record.user_id, e);
                    Some("⚠️ Could not start your userbot. Try /connect again later.".to_owned())
                }
            },
            BotAction::Forget(user_id) => match self.manager.detach(user_id, true).await {
                Ok(_) => None,
                Err(e) => {
                    warn!("Failed to detach session {}: {}", user_id, e);
                    Some("⚠️ Could not remove your session completely.".to_owned())
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use std::time::Duration;

    use tokio::sync::RwLock;

    use super::*;
    use crate::commands::CommandHandler;
    use crate::login::AuthError;
    use crate::store::{Plan, PrefixStore};

    const OWNER: i64 = 1;
    const USER: i64 = 100;

    struct FakeAuth {
        dir: PathBuf,
    }

    impl Authenticator for FakeAuth {
        type Pending = i64;

        async fn request_code(&self, chat_id: i64, _phone: &str) -> Result<i64, AuthError> {
            Ok(chat_id)
        }

        async fn submit_code(&self, pending: &mut i64, code: &str) -> Result<SignedIn, AuthError> {
            if code != "12345" {
                return Err(AuthError::InvalidCode);
            }
            Ok(SignedIn {
                user_id: *pending,
                username: Some("premium_user".to_owned()),
                first_name: "Premium".to_owned(),
                session_file: self.dir.join(format!("{pending}.session")),
                phone_hint: "***4567".to_owned(),
            })
        }

        async fn submit_password(&self, _pending: &mut i64, _password: &str) -> Result<SignedIn, AuthError> {
            Err(AuthError::InvalidPassword)
        }

        async fn release(&self, _pending: i64) {}

        async fn abort(&self, _pending: i64) {}
    }

    struct Fixture {
        bot: BotFrontend<FakeAuth>,
        premium: Arc<PremiumRegistry>,
        registry: Arc<SessionRegistry>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let prefixes = Arc::new(PrefixStore::new(dir.path().join("prefixes.json"), "."));
        let premium = Arc::new(PremiumRegistry::new(dir.path().join("premium.json")));
        let registry = Arc::new(SessionRegistry::new(dir.path().join("sessions.json")));
        let online = Arc::new(RwLock::new(BTreeSet::new()));
        let handler = Arc::new(CommandHandler::new(
            OWNER,
            prefixes,
            Arc::clone(&premium),
            Arc::clone(&registry),
            Arc::clone(&online),
            "❤".to_owned(),
        ));
        let manager = SessionManager::new(
            12345,
            handler,
            Arc::clone(&premium),
            Arc::clone(&registry),
            online,
            Duration::from_millis(10),
        );
        let login = LoginFlow::new(
            FakeAuth {
                dir: dir.path().join("sessions"),
            },
            3,
        );
        let bot = BotFrontend::new(
            login,
            Arc::clone(&premium),
            Arc::clone(&registry),
            manager,
            ".".to_owned(),
        );
        Fixture {
            bot,
            premium,
            registry,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_connect_requires_premium() {
        let f = fixture();
        let response = f.bot.handle(USER, "/connect").await;
        assert!(response.text.contains("premium"));
        assert_eq!(response.action, BotAction::None);
    }

    #[tokio::test]
    async fn test_full_connect_flow_stores_record() {
        let f = fixture();
        f.premium.grant(USER, Plan::Pro, Some(30), OWNER, Utc::now()).await.unwrap();

        let response = f.bot.handle(USER, "/connect").await;
        assert!(response.text.contains("phone"));

        f.bot.handle(USER, "+1 555 123 4567").await;
        let response = f.bot.handle(USER, "1 2 3 4 5").await;

        let stored = f.registry.get(USER).unwrap().unwrap();
        assert_eq!(stored.username.as_deref(), Some("premium_user"));
        assert_eq!(response.action, BotAction::Attach(stored));
        assert!(response.text.contains("@premium_user (100)"));
    }

    #[tokio::test]
    async fn test_connect_with_stored_record_reattaches() {
        let f = fixture();
        f.premium.grant(USER, Plan::Basic, None, OWNER, Utc::now()).await.unwrap();
        f.bot.handle(USER, "/connect").await;
        f.bot.handle(USER, "+15551234567").await;
        f.bot.handle(USER, "12345").await;

        let response = f.bot.handle(USER, "/connect").await;
        assert!(matches!(response.action, BotAction::Attach(ref r) if r.user_id == USER));
    }

    #[tokio::test]
    async fn test_relogin_keeps_user_settings() {
        let f = fixture();
        f.premium.grant(USER, Plan::Pro, None, OWNER, Utc::now()).await.unwrap();
        f.bot.handle(USER, "/connect").await;
        f.bot.handle(USER, "+15551234567").await;
        f.bot.handle(USER, "12345").await;
        f.registry
            .update(USER, |r| {
                r.mirror_reactions = true;
                r.mirror_emoji = Some("🔥".to_owned());
            })
            .await
            .unwrap();

        let signed_in = SignedIn {
            user_id: USER,
            username: None,
            first_name: "Renamed".to_owned(),
            session_file: PathBuf::from("x.session"),
            phone_hint: "***4567".to_owned(),
        };
        let record = f.bot.store_session(signed_in).await.unwrap();
        assert!(record.mirror_reactions);
        assert_eq!(record.mirror_emoji.as_deref(), Some("🔥"));
        assert_eq!(record.first_name, "Renamed");
    }

    #[tokio::test]
    async fn test_cancel_and_stray_text() {
        let f = fixture();
        assert_eq!(f.bot.handle(USER, "/cancel").await.text, "Nothing to cancel.");
        assert!(f.bot.handle(USER, "hello").await.text.contains("/connect"));

        f.premium.grant(USER, Plan::Basic, None, OWNER, Utc::now()).await.unwrap();
        f.bot.handle(USER, "/connect").await;
        assert_eq!(f.bot.handle(USER, "/cancel").await.text, "Login cancelled.");
    }

    #[tokio::test]
    async fn test_disconnect() {
        let f = fixture();
        let response = f.bot.handle(USER, "/disconnect").await;
        assert_eq!(response.action, BotAction::None);

        f.premium.grant(USER, Plan::Basic, None, OWNER, Utc::now()).await.unwrap();
        f.bot.handle(USER, "/connect").await;
        f.bot.handle(USER, "+15551234567").await;
        f.bot.handle(USER, "12345").await;

        let response = f.bot.handle(USER, "/disconnect").await;
        assert_eq!(response.action, BotAction::Forget(USER));
    }

    #[tokio::test]
    async fn test_status_reports_plan() {
        let f = fixture();
        assert!(f.bot.handle(USER, "/status").await.text.contains("No premium"));

        f.premium.grant(USER, Plan::Pro, None, OWNER, Utc::now()).await.unwrap();
        let text = f.bot.handle(USER, "/status").await.text;
        assert!(text.contains("Plan: pro"));
        assert!(text.contains("none"));
    }
}
