//! Update loop of one connected account.

use std::sync::{Arc, Weak};

use grammers_client::client::UpdateStream;
use tracing::{debug, info, warn};

use super::SessionManager;
use super::router::{AccountProfile, IncomingMessage, Route, route};
use crate::commands::{CommandAction, CommandContext, CommandHandler};
use crate::telegram::{RateLimiter, TelegramError, Update, truncate_for_log};

/// Everything a session's update loop needs.
pub(super) struct SessionRunner {
    pub account_id: i64,
    /// Matches the manager's entry for this loop.
    pub generation: u64,
    pub handler: Arc<CommandHandler>,
    pub limiter: Arc<RateLimiter>,
    pub manager: Weak<SessionManager>,
}

impl SessionRunner {
    /// Processes updates until the stream fails or the task is aborted.
    pub async fn run(self, mut updates: UpdateStream) {
        info!("Update loop started for account {}", self.account_id);

        loop {
            let update = match updates.next().await {
                Ok(update) => update,
                Err(e) => {
                    warn!("Update stream of account {} ended: {}", self.account_id, e);
                    break;
                }
            };

            let Update::NewMessage(message) = update else {
                continue;
            };

            let owner_id = self.handler.owner_id();
            let incoming = IncomingMessage {
                text: message.text(),
                outgoing: message.outgoing(),
                sender_id: message.sender().map(|s| s.id().bare_id()),
            };

            let prefix = self.handler.prefix_for(self.account_id);
            // The mirror setting is only read for messages that could be mirrored.
            let mirror = if !incoming.outgoing && incoming.sender_id == Some(owner_id) {
                match self.handler.mirror_reaction(self.account_id) {
                    Ok(mirror) => mirror,
                    Err(e) => {
                        warn!("Mirror lookup failed for {}: {}", self.account_id, e);
                        None
                    }
                }
            } else {
                None
            };

            let profile = AccountProfile {
                account_id: self.account_id,
                owner_id,
                prefix: &prefix,
                mirror: mirror.as_deref(),
            };

            match route(&incoming, &profile) {
                Route::Command => {
                    let ctx = CommandContext {
                        account_id: self.account_id,
                        chat_id: message.peer().map_or(0, |p| p.id().bare_id()),
                        message_id: message.id(),
                        sent_at: message.date(),
                    };

                    let Some(result) = self.handler.try_handle(&ctx, message.text()).await else {
                        continue;
                    };

                    if let Err(e) = message.edit(result.message.as_str()).await {
                        warn!(
                            "Failed to edit command reply of {}: {}",
                            self.account_id,
                            TelegramError::from(e)
                        );
                    }

                    if let CommandAction::Disconnect { user_id, forget } = result.action {
                        self.request_detach(user_id, forget);
                    }
                }
                Route::MirrorReaction(emoji) => {
                    debug!(
                        "Account {} mirrors {} onto \"{}\"",
                        self.account_id,
                        emoji,
                        truncate_for_log(incoming.text, 30)
                    );
                    if !self.limiter.try_acquire().await {
                        debug!(
                            "Dropping reaction of {}, next slot in {:?}",
                            self.account_id,
                            self.limiter.time_until_allowed().await
                        );
                        continue;
                    }
                    let limiter = Arc::clone(&self.limiter);
                    let account_id = self.account_id;
                    tokio::spawn(async move {
                        match message.react(emoji).await.map_err(TelegramError::from) {
                            Ok(()) => {}
                            Err(TelegramError::FloodWait(secs)) => limiter.handle_flood_wait(secs).await,
                            Err(e) => warn!("Reaction from {} failed: {}", account_id, e),
                        }
                    });
                }
                Route::Ignore => {}
            }
        }

        // A dead stream leaves the session offline until the next restore.
        if let Some(manager) = self.manager.upgrade() {
            manager.detach_ended(self.account_id, self.generation).await;
        }
    }

    /// Detaches a session from a separate task, so a loop can stop itself.
    fn request_detach(&self, user_id: i64, forget: bool) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = manager.detach(user_id, forget).await {
                warn!("Failed to detach session {}: {}", user_id, e);
            }
        });
    }
}
