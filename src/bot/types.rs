//! Companion bot request and response types.

use crate::store::SessionRecord;

/// A private message sent to the companion bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotRequest {
    Start,
    Help,
    Connect,
    Cancel,
    Disconnect,
    Status,
    /// A slash command the bot does not know.
    Unknown(String),
    /// Free text, fed into a running login.
    Text(String),
}

impl BotRequest {
    /// Parses a message. `/cmd@botname` is accepted.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Self::Text(trimmed.to_owned());
        };

        let word = rest.split_whitespace().next().unwrap_or_default();
        let name = word.split('@').next().unwrap_or_default().to_lowercase();

        match name.as_str() {
            "start" => Self::Start,
            "help" => Self::Help,
            "connect" | "login" => Self::Connect,
            "cancel" => Self::Cancel,
            "disconnect" | "logout" => Self::Disconnect,
            "status" => Self::Status,
            _ => Self::Unknown(name),
        }
    }
}

/// Work the frontend leaves to the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotAction {
    None,
    /// Connect this stored session.
    Attach(SessionRecord),
    /// Disconnect and forget the session of this user.
    Forget(i64),
}

/// Reply text plus follow-up work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotResponse {
    pub text: String,
    pub action: BotAction,
}

impl BotResponse {
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: BotAction::None,
        }
    }

    pub fn with_action(text: impl Into<String>, action: BotAction) -> Self {
        Self {
            text: text.into(),
            action,
        }
    }
}
