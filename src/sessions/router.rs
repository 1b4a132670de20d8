//! Per-message routing decision for a running session.

/// The parts of an incoming message the router looks at.
#[derive(Debug, Clone, Copy)]
pub struct IncomingMessage<'a> {
    pub text: &'a str,
    /// Sent by the session's own account.
    pub outgoing: bool,
    /// Author of the message, when Telegram reports one.
    pub sender_id: Option<i64>,
}

/// The account a session runs as, read fresh for every message.
#[derive(Debug, Clone, Copy)]
pub struct AccountProfile<'a> {
    pub account_id: i64,
    pub owner_id: i64,
    pub prefix: &'a str,
    /// Reaction to mirror onto owner messages, if mirroring is on.
    pub mirror: Option<&'a str>,
}

/// What the session should do with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Hand the text to the command handler.
    Command,
    /// React to the message with this emoji.
    MirrorReaction(String),
    Ignore,
}

/// Decides how a session handles one message.
///
/// Only the account itself can issue commands. Mirroring applies to
/// messages the owner sends into chats a premium account can see.
#[must_use]
pub fn route(msg: &IncomingMessage<'_>, profile: &AccountProfile<'_>) -> Route {
    if msg.outgoing {
        return if msg.text.trim_start().starts_with(profile.prefix) {
            Route::Command
        } else {
            Route::Ignore
        };
    }

    if profile.account_id == profile.owner_id || msg.sender_id != Some(profile.owner_id) {
        return Route::Ignore;
    }

    profile
        .mirror
        .map_or(Route::Ignore, |emoji| Route::MirrorReaction(emoji.to_owned()))
}
