//! Per-chat login state machine.
//!
//! Stages advance as follows:
//! 1. `AwaitingPhone` → code requested → `AwaitingCode`
//! 2. `AwaitingCode` → signed in, or `AwaitingPassword` when 2FA is on
//! 3. `AwaitingPassword` → signed in
//!
//! While a step talks to Telegram the chat holds a `Busy` marker, so a
//! second message from the same chat cannot reuse the pending login.
//! Invalid codes and passwords consume attempts; running out aborts the
//! login and discards its session. A login cancelled while its last step
//! was signing in is logged out again.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{AuthError, Authenticator, SignedIn};
use crate::telegram::mask_phone;

/// Shortest login code Telegram sends.
const MIN_CODE_LENGTH: usize = 5;

enum LoginStage<P> {
    Busy,
    AwaitingPhone,
    AwaitingCode {
        pending: P,
        phone_hint: String,
        attempts_left: u32,
    },
    AwaitingPassword {
        pending: P,
        hint: Option<String>,
        attempts_left: u32,
    },
    /// Signed in; the client is still open.
    SignedIn {
        pending: P,
    },
}

impl<P> LoginStage<P> {
    const fn name(&self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::AwaitingPhone => "awaiting_phone",
            Self::AwaitingCode { .. } => "awaiting_code",
            Self::AwaitingPassword { .. } => "awaiting_password",
            Self::SignedIn { .. } => "signed_in",
        }
    }
}

/// What the frontend should tell the user after an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginReply {
    /// The flow continues; show this prompt.
    Prompt(String),
    /// The account is logged in.
    Completed(SignedIn),
    /// The flow ended without logging in.
    Failed(String),
    /// No login is running for this chat.
    NotInFlow,
    /// The previous input of this chat is still being processed.
    Busy,
}

/// Login flows of every chat, keyed by chat ID.
pub struct LoginFlow<A: Authenticator> {
    auth: A,
    stages: Mutex<HashMap<i64, LoginStage<A::Pending>>>,
    max_attempts: u32,
}

impl<A: Authenticator> LoginFlow<A> {
    #[must_use]
    pub fn new(auth: A, max_attempts: u32) -> Self {
        Self {
            auth,
            stages: Mutex::new(HashMap::new()),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Whether a chat is in the middle of a login.
    pub async fn is_active(&self, chat_id: i64) -> bool {
        self.stages.lock().await.contains_key(&chat_id)
    }

    /// Whether the next message of a chat is a 2FA password.
    pub async fn awaits_password(&self, chat_id: i64) -> bool {
        matches!(
            self.stages.lock().await.get(&chat_id),
            Some(LoginStage::AwaitingPassword { .. })
        )
    }

    /// Starts a login for a chat.
    pub async fn start(&self, chat_id: i64) -> LoginReply {
        let mut stages = self.stages.lock().await;
        if stages.contains_key(&chat_id) {
            return LoginReply::Prompt(
                "A login is already in progress. Continue it, or send /cancel.".to_owned(),
            );
        }

        stages.insert(chat_id, LoginStage::AwaitingPhone);
        info!("Login started for chat {}", chat_id);
        LoginReply::Prompt(
            "📱 Send the phone number of the account to connect, in international format (e.g. +15551234567)."
                .to_owned(),
        )
    }

    /// Aborts the login of a chat. Returns whether one was running.
    pub async fn cancel(&self, chat_id: i64) -> bool {
        let stage = self.stages.lock().await.remove(&chat_id);
        match stage {
            Some(stage) => {
                info!("Login cancelled for chat {} at {}", chat_id, stage.name());
                self.discard(stage).await;
                true
            }
            None => false,
        }
    }

    /// Feeds one user message into the login of a chat.
    pub async fn handle_input(&self, chat_id: i64, text: &str) -> LoginReply {
        let stage = {
            let mut stages = self.stages.lock().await;
            match stages.get_mut(&chat_id) {
                None => return LoginReply::NotInFlow,
                Some(LoginStage::Busy) => return LoginReply::Busy,
                Some(stage) => std::mem::replace(stage, LoginStage::Busy),
            }
        };

        debug!("Login input for chat {} at {}", chat_id, stage.name());
        let (next, reply) = self.advance(chat_id, stage, text.trim()).await;

        let mut stages = self.stages.lock().await;
        let still_ours = matches!(stages.get(&chat_id), Some(LoginStage::Busy));
        if still_ours {
            stages.remove(&chat_id);
        }

        match next {
            Some(LoginStage::SignedIn { pending }) if still_ours => {
                drop(stages);
                self.auth.release(pending).await;
                reply
            }
            Some(next) if still_ours => {
                stages.insert(chat_id, next);
                reply
            }
            Some(next) => {
                // Cancelled while we were talking to Telegram.
                drop(stages);
                info!("Login of chat {} was cancelled at {}, discarding", chat_id, next.name());
                self.discard(next).await;
                LoginReply::Failed("Login cancelled.".to_owned())
            }
            None => reply,
        }
    }

    async fn advance(
        &self,
        chat_id: i64,
        stage: LoginStage<A::Pending>,
        input: &str,
    ) -> (Option<LoginStage<A::Pending>>, LoginReply) {
        match stage {
            LoginStage::Busy | LoginStage::SignedIn { .. } => (None, LoginReply::NotInFlow),
            LoginStage::AwaitingPhone => self.on_phone(chat_id, input).await,
            LoginStage::AwaitingCode {
                pending,
                phone_hint,
                attempts_left,
            } => self.on_code(pending, phone_hint, attempts_left, input).await,
            LoginStage::AwaitingPassword {
                pending,
                hint,
                attempts_left,
            } => self.on_password(pending, hint, attempts_left, input).await,
        }
    }

    async fn on_phone(
        &self,
        chat_id: i64,
        input: &str,
    ) -> (Option<LoginStage<A::Pending>>, LoginReply) {
        let Some(phone) = normalize_phone(input) else {
            return (
                Some(LoginStage::AwaitingPhone),
                LoginReply::Prompt(
                    "That does not look like a phone number. Use international format, e.g. +15551234567."
                        .to_owned(),
                ),
            );
        };

        let phone_hint = mask_phone(&phone);
        info!("Requesting login code for {} (chat {})", phone_hint, chat_id);

        match self.auth.request_code(chat_id, &phone).await {
            Ok(pending) => (
                Some(LoginStage::AwaitingCode {
                    pending,
                    phone_hint,
                    attempts_left: self.max_attempts,
                }),
                LoginReply::Prompt(
                    "🔑 A login code was sent to that account. Send it with spaces between the digits (e.g. 1 2 3 4 5), otherwise Telegram invalidates it."
                        .to_owned(),
                ),
            ),
            Err(AuthError::InvalidPhone) => (
                Some(LoginStage::AwaitingPhone),
                LoginReply::Prompt("Telegram rejected that phone number. Send another one.".to_owned()),
            ),
            Err(e) => {
                warn!("Login code request failed for chat {}: {}", chat_id, e);
                (None, LoginReply::Failed(format!("Could not send a login code: {e}")))
            }
        }
    }

    async fn on_code(
        &self,
        mut pending: A::Pending,
        phone_hint: String,
        attempts_left: u32,
        input: &str,
    ) -> (Option<LoginStage<A::Pending>>, LoginReply) {
        let code = extract_code(input);
        if code.len() < MIN_CODE_LENGTH {
            return (
                Some(LoginStage::AwaitingCode {
                    pending,
                    phone_hint,
                    attempts_left,
                }),
                LoginReply::Prompt("Send the login code digits, e.g. 1 2 3 4 5.".to_owned()),
            );
        }

        match self.auth.submit_code(&mut pending, &code).await {
            Ok(signed_in) => (Some(LoginStage::SignedIn { pending }), LoginReply::Completed(signed_in)),
            Err(AuthError::PasswordRequired { hint }) => {
                let prompt = match &hint {
                    Some(h) => format!("🔒 This account has two-step verification. Send the password (hint: {h})."),
                    None => "🔒 This account has two-step verification. Send the password.".to_owned(),
                };
                (
                    Some(LoginStage::AwaitingPassword {
                        pending,
                        hint,
                        attempts_left: self.max_attempts,
                    }),
                    LoginReply::Prompt(prompt),
                )
            }
            Err(AuthError::InvalidCode) if attempts_left > 1 => {
                let attempts_left = attempts_left - 1;
                (
                    Some(LoginStage::AwaitingCode {
                        pending,
                        phone_hint,
                        attempts_left,
                    }),
                    LoginReply::Prompt(format!(
                        "❌ Invalid code. {attempts_left} attempt(s) left."
                    )),
                )
            }
            Err(AuthError::InvalidCode) => {
                self.auth.abort(pending).await;
                (None, LoginReply::Failed("❌ Too many invalid codes. Send /connect to start over.".to_owned()))
            }
            Err(e) => {
                self.auth.abort(pending).await;
                (None, LoginReply::Failed(format!("❌ Login failed: {e}. Send /connect to start over.")))
            }
        }
    }

    async fn on_password(
        &self,
        mut pending: A::Pending,
        hint: Option<String>,
        attempts_left: u32,
        input: &str,
    ) -> (Option<LoginStage<A::Pending>>, LoginReply) {
        if input.is_empty() {
            return (
                Some(LoginStage::AwaitingPassword {
                    pending,
                    hint,
                    attempts_left,
                }),
                LoginReply::Prompt("Send the two-step verification password.".to_owned()),
            );
        }

        match self.auth.submit_password(&mut pending, input).await {
            Ok(signed_in) => (Some(LoginStage::SignedIn { pending }), LoginReply::Completed(signed_in)),
            Err(AuthError::InvalidPassword) if attempts_left > 1 => {
                let attempts_left = attempts_left - 1;
                let hint_text = hint.as_deref().map(|h| format!(" Hint: {h}.")).unwrap_or_default();
                (
                    Some(LoginStage::AwaitingPassword {
                        pending,
                        hint,
                        attempts_left,
                    }),
                    LoginReply::Prompt(format!(
                        "❌ Wrong password. {attempts_left} attempt(s) left.{hint_text}"
                    )),
                )
            }
            Err(AuthError::InvalidPassword) => {
                self.auth.abort(pending).await;
                (None, LoginReply::Failed("❌ Too many wrong passwords. Send /connect to start over.".to_owned()))
            }
            Err(e) => {
                self.auth.abort(pending).await;
                (None, LoginReply::Failed(format!("❌ Login failed: {e}. Send /connect to start over.")))
            }
        }
    }

    async fn discard(&self, stage: LoginStage<A::Pending>) {
        match stage {
            LoginStage::AwaitingCode { pending, .. }
            | LoginStage::AwaitingPassword { pending, .. }
            | LoginStage::SignedIn { pending } => {
                self.auth.abort(pending).await;
            }
            LoginStage::Busy | LoginStage::AwaitingPhone => {}
        }
    }
}

impl<A: Authenticator> std::fmt::Debug for LoginFlow<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginFlow")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

/// Normalizes a phone number to `+` followed by 7–15 digits.
#[must_use]
pub fn normalize_phone(input: &str) -> Option<String> {
    let input = input.trim();
    if input
        .chars()
        .any(|c| !(c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')')))
    {
        return None;
    }

    let digits: String = input.chars().filter(char::is_ascii_digit).collect();
    if !(7..=15).contains(&digits.len()) {
        return None;
    }
    Some(format!("+{digits}"))
}

/// Keeps only the digits of a login code.
#[must_use]
pub fn extract_code(input: &str) -> String {
    input.chars().filter(char::is_ascii_digit).collect()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::Notify;

    use super::*;

    const CODE: &str = "12345";
    const PASSWORD: &str = "hunter2";

    #[derive(Default)]
    struct FakeAuth {
        two_factor: bool,
        aborted: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
        requests: Arc<AtomicUsize>,
        /// When set, `submit_code` signals `entered` and waits for it.
        gate: Option<Arc<Notify>>,
        entered: Arc<Notify>,
    }

    struct FakePending {
        chat_id: i64,
    }

    fn signed_in(chat_id: i64) -> SignedIn {
        SignedIn {
            user_id: chat_id,
            username: Some("user".to_owned()),
            first_name: "User".to_owned(),
            session_file: PathBuf::from(format!("{chat_id}.session")),
            phone_hint: "***4567".to_owned(),
        }
    }

    impl Authenticator for FakeAuth {
        type Pending = FakePending;

        async fn request_code(&self, chat_id: i64, phone: &str) -> Result<FakePending, AuthError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if phone.ends_with("000") {
                return Err(AuthError::InvalidPhone);
            }
            Ok(FakePending { chat_id })
        }

        async fn submit_code(&self, pending: &mut FakePending, code: &str) -> Result<SignedIn, AuthError> {
            if let Some(gate) = &self.gate {
                self.entered.notify_one();
                gate.notified().await;
            }
            if code != CODE {
                return Err(AuthError::InvalidCode);
            }
            if self.two_factor {
                return Err(AuthError::PasswordRequired {
                    hint: Some("pet".to_owned()),
                });
            }
            Ok(signed_in(pending.chat_id))
        }

        async fn submit_password(
            &self,
            pending: &mut FakePending,
            password: &str,
        ) -> Result<SignedIn, AuthError> {
            if password == PASSWORD {
                Ok(signed_in(pending.chat_id))
            } else {
                Err(AuthError::InvalidPassword)
            }
        }

        async fn release(&self, _pending: FakePending) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }

        async fn abort(&self, _pending: FakePending) {
            self.aborted.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn flow(two_factor: bool) -> (LoginFlow<FakeAuth>, Arc<AtomicUsize>) {
        let auth = FakeAuth {
            two_factor,
            ..FakeAuth::default()
        };
        let aborted = Arc::clone(&auth.aborted);
        (LoginFlow::new(auth, 3), aborted)
    }

    fn is_prompt(reply: &LoginReply) -> bool {
        matches!(reply, LoginReply::Prompt(_))
    }

    #[tokio::test]
    async fn test_happy_path() {
        let (flow, aborted) = flow(false);
        assert!(is_prompt(&flow.start(7).await));
        assert!(is_prompt(&flow.handle_input(7, "+1 555 123 4567").await));

        let reply = flow.handle_input(7, "1 2 3 4 5").await;
        assert_eq!(reply, LoginReply::Completed(signed_in(7)));
        assert!(!flow.is_active(7).await);
        assert_eq!(flow.auth.released.load(Ordering::SeqCst), 1);
        assert_eq!(aborted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_two_factor_path() {
        let (flow, _) = flow(true);
        flow.start(7).await;
        flow.handle_input(7, "+15551234567").await;

        let reply = flow.handle_input(7, "12345").await;
        match reply {
            LoginReply::Prompt(text) => assert!(text.contains("pet")),
            other => panic!("unexpected reply: {other:?}"),
        }
        assert!(flow.awaits_password(7).await);

        let reply = flow.handle_input(7, PASSWORD).await;
        assert_eq!(reply, LoginReply::Completed(signed_in(7)));
        assert_eq!(flow.auth.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_phone_reasks() {
        let (flow, _) = flow(false);
        flow.start(7).await;

        assert!(is_prompt(&flow.handle_input(7, "call me maybe").await));
        assert!(is_prompt(&flow.handle_input(7, "+1 555 000 0000").await));
        assert!(flow.is_active(7).await);

        assert!(is_prompt(&flow.handle_input(7, "+15551234567").await));
        assert_eq!(
            flow.handle_input(7, "12345").await,
            LoginReply::Completed(signed_in(7))
        );
    }

    #[tokio::test]
    async fn test_code_attempts_are_limited() {
        let (flow, aborted) = flow(false);
        flow.start(7).await;
        flow.handle_input(7, "+15551234567").await;

        assert!(is_prompt(&flow.handle_input(7, "11111").await));
        assert!(is_prompt(&flow.handle_input(7, "22222").await));
        let reply = flow.handle_input(7, "33333").await;

        assert!(matches!(reply, LoginReply::Failed(_)));
        assert!(!flow.is_active(7).await);
        assert_eq!(aborted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_short_code_does_not_consume_attempt() {
        let (flow, _) = flow(false);
        flow.start(7).await;
        flow.handle_input(7, "+15551234567").await;

        for _ in 0..5 {
            assert!(is_prompt(&flow.handle_input(7, "12").await));
        }
        assert_eq!(
            flow.handle_input(7, "1-2-3-4-5").await,
            LoginReply::Completed(signed_in(7))
        );
    }

    #[tokio::test]
    async fn test_password_attempts_are_limited() {
        let (flow, aborted) = flow(true);
        flow.start(7).await;
        flow.handle_input(7, "+15551234567").await;
        flow.handle_input(7, "12345").await;

        assert!(is_prompt(&flow.handle_input(7, "a").await));
        assert!(is_prompt(&flow.handle_input(7, "b").await));
        assert!(matches!(flow.handle_input(7, "c").await, LoginReply::Failed(_)));
        assert_eq!(aborted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_discards_pending_login() {
        let (flow, aborted) = flow(false);
        flow.start(7).await;
        flow.handle_input(7, "+15551234567").await;

        assert!(flow.cancel(7).await);
        assert!(!flow.cancel(7).await);
        assert_eq!(aborted.load(Ordering::SeqCst), 1);
        assert_eq!(flow.handle_input(7, "12345").await, LoginReply::NotInFlow);
    }

    #[tokio::test]
    async fn test_cancel_during_sign_in_logs_account_out() {
        let gate = Arc::new(Notify::new());
        let auth = FakeAuth {
            gate: Some(Arc::clone(&gate)),
            ..FakeAuth::default()
        };
        let entered = Arc::clone(&auth.entered);
        let flow = Arc::new(LoginFlow::new(auth, 3));
        flow.start(7).await;
        flow.handle_input(7, "+15551234567").await;

        let task = tokio::spawn({
            let flow = Arc::clone(&flow);
            async move { flow.handle_input(7, "12345").await }
        });
        entered.notified().await;

        assert!(flow.cancel(7).await);
        gate.notify_one();

        assert_eq!(task.await.unwrap(), LoginReply::Failed("Login cancelled.".to_owned()));
        assert_eq!(flow.auth.aborted.load(Ordering::SeqCst), 1);
        assert_eq!(flow.auth.released.load(Ordering::SeqCst), 0);
        assert!(!flow.is_active(7).await);
    }

    #[tokio::test]
    async fn test_chats_are_independent() {
        let (flow, _) = flow(false);
        flow.start(1).await;
        flow.start(2).await;
        flow.handle_input(1, "+15551234567").await;

        // Chat 2 is still waiting for a phone number.
        assert!(is_prompt(&flow.handle_input(2, "12345").await));
        assert_eq!(
            flow.handle_input(1, "12345").await,
            LoginReply::Completed(signed_in(1))
        );
    }

    #[tokio::test]
    async fn test_start_twice_keeps_progress() {
        let (flow, _) = flow(false);
        flow.start(7).await;
        flow.handle_input(7, "+15551234567").await;
        flow.start(7).await;

        assert_eq!(
            flow.handle_input(7, "12345").await,
            LoginReply::Completed(signed_in(7))
        );
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+1 (555) 123-4567"), Some("+15551234567".to_owned()));
        assert_eq!(normalize_phone("79991234567"), Some("+79991234567".to_owned()));
        assert_eq!(normalize_phone("12345"), None);
        assert_eq!(normalize_phone("+1555abc4567"), None);
        assert_eq!(normalize_phone(""), None);
    }

    #[test]
    fn test_extract_code() {
        assert_eq!(extract_code("1 2 3 4 5"), "12345");
        assert_eq!(extract_code("code: 12-345"), "12345");
        assert_eq!(extract_code("abc"), "");
    }
}
