//! Connection manager for premium sessions.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use grammers_client::client::UpdateStream;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::runner::SessionRunner;
use crate::commands::CommandHandler;
use crate::config::CONNECT_ATTEMPTS;
use crate::store::{PremiumRegistry, SessionRecord, SessionRegistry, StoreError};
use crate::telegram::{RateLimiter, TelegramBot, TelegramError, remove_session_file};

/// Pause between two connection attempts.
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Session manager errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Telegram error: {0}")]
    Telegram(#[from] TelegramError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Session of {0} is no longer authorized")]
    Unauthorized(i64),
}

/// Outcome of restoring the stored sessions at startup.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<i64>,
    /// Records kept but not connected because the grant is inactive.
    pub skipped: Vec<i64>,
    /// Records dropped because Telegram revoked the session.
    pub removed: Vec<i64>,
    pub failed: Vec<(i64, String)>,
}

impl RestoreReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.restored.len() + self.skipped.len() + self.removed.len() + self.failed.len()
    }
}

/// Client connection kept open while a session runs.
pub(crate) trait Connection: Send + Sync {
    fn close(&self);
}

impl Connection for TelegramBot {
    fn close(&self) {
        self.disconnect();
    }
}

struct ActiveSession {
    connection: Arc<dyn Connection>,
    task: JoinHandle<()>,
    /// Identifies the update loop, so a finished loop only removes itself.
    generation: u64,
}

impl ActiveSession {
    fn stop(self) {
        self.task.abort();
        self.connection.close();
    }
}

/// Owns the connection and update loop of every premium session.
pub struct SessionManager {
    api_id: i32,
    handler: Arc<CommandHandler>,
    premium: Arc<PremiumRegistry>,
    registry: Arc<SessionRegistry>,
    /// Shared with the command handler for `sessions`.
    online: Arc<RwLock<BTreeSet<i64>>>,
    active: Mutex<HashMap<i64, ActiveSession>>,
    reaction_interval: Duration,
    next_generation: AtomicU64,
    this: Weak<SessionManager>,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        api_id: i32,
        handler: Arc<CommandHandler>,
        premium: Arc<PremiumRegistry>,
        registry: Arc<SessionRegistry>,
        online: Arc<RwLock<BTreeSet<i64>>>,
        reaction_interval: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            api_id,
            handler,
            premium,
            registry,
            online,
            active: Mutex::new(HashMap::new()),
            reaction_interval,
            next_generation: AtomicU64::new(1),
            this: this.clone(),
        })
    }

    /// Reconnects every stored session whose grant is still active.
    pub async fn restore_all(&self) -> Result<RestoreReport, StoreError> {
        let records = self.registry.list()?;
        let now = Utc::now();
        let mut report = RestoreReport::default();

        info!("Restoring {} stored sessions", records.len());
        for record in records {
            let user_id = record.user_id;

            if !self.premium.is_active(user_id, now)? {
                info!("Skipping {}: no active premium", record.label());
                report.skipped.push(user_id);
                continue;
            }

            match self.attach(&record).await {
                Ok(()) => report.restored.push(user_id),
                Err(SessionError::Unauthorized(_)) => {
                    warn!("Session of {} was revoked by Telegram, removing it", record.label());
                    self.registry.remove(user_id).await?;
                    remove_session_file(&record.session_file);
                    report.removed.push(user_id);
                }
                Err(e) => {
                    error!("Failed to restore {}: {}", record.label(), e);
                    report.failed.push((user_id, e.to_string()));
                }
            }
        }

        info!(
            "Restore finished: {} connected, {} skipped, {} removed, {} failed",
            report.restored.len(),
            report.skipped.len(),
            report.removed.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Connects a stored session and starts its update loop.
    ///
    /// Does nothing when the session is already connected.
    pub async fn attach(&self, record: &SessionRecord) -> Result<(), SessionError> {
        if self.is_connected(record.user_id).await {
            debug!("Session {} already connected", record.user_id);
            return Ok(());
        }

        let session_file = record.session_file.clone();
        let api_id = self.api_id;
        let (bot, authorized) = retry_fixed(CONNECT_ATTEMPTS, RETRY_DELAY, |attempt| {
            let session_file = session_file.clone();
            async move {
                debug!("Connecting {} (attempt {})", session_file.display(), attempt);
                let bot = TelegramBot::connect(&session_file, api_id).await?;
                match bot.is_authorized().await {
                    Ok(authorized) => Ok::<_, TelegramError>((bot, authorized)),
                    Err(e) => {
                        bot.disconnect();
                        Err(e)
                    }
                }
            }
        })
        .await?;

        if !authorized {
            bot.disconnect();
            return Err(SessionError::Unauthorized(record.user_id));
        }

        let bot = Arc::new(bot);
        let updates = match bot.take_updates().await {
            Ok(updates) => updates,
            Err(e) => {
                bot.disconnect();
                return Err(e.into());
            }
        };
        let generation = self.next_generation();
        let task = self.spawn_loop(record.user_id, generation, updates);
        self.register(
            record.user_id,
            ActiveSession {
                connection: bot,
                task,
                generation,
            },
        )
        .await;

        info!("Session {} connected", record.label());
        Ok(())
    }

    /// Starts the update loop of an account, the owner's included.
    pub fn spawn_runner(&self, account_id: i64, updates: UpdateStream) -> JoinHandle<()> {
        self.spawn_loop(account_id, self.next_generation(), updates)
    }

    fn spawn_loop(&self, account_id: i64, generation: u64, updates: UpdateStream) -> JoinHandle<()> {
        let runner = SessionRunner {
            account_id,
            generation,
            handler: Arc::clone(&self.handler),
            limiter: Arc::new(RateLimiter::new(self.reaction_interval)),
            manager: self.this.clone(),
        };
        tokio::spawn(runner.run(updates))
    }

    fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Makes `session` the active one of `user_id`, stopping any previous one.
    async fn register(&self, user_id: i64, session: ActiveSession) {
        let replaced = self.active.lock().await.insert(user_id, session);
        if let Some(old) = replaced {
            debug!("Replacing running session {} (loop {})", user_id, old.generation);
            old.stop();
        }
        self.online.write().await.insert(user_id);
    }

    /// Stops a session. With `forget` its record and session file go too.
    ///
    /// Returns whether anything was connected or stored.
    pub async fn detach(&self, user_id: i64, forget: bool) -> Result<bool, SessionError> {
        let active = self.active.lock().await.remove(&user_id);
        self.online.write().await.remove(&user_id);

        let mut changed = false;
        if let Some(session) = active {
            session.stop();
            info!("Session {} disconnected", user_id);
            changed = true;
        }

        if forget && let Some(record) = self.registry.remove(user_id).await? {
            remove_session_file(&record.session_file);
            info!("Session {} forgotten", record.label());
            changed = true;
        }

        Ok(changed)
    }

    /// Drops a session whose update loop ended, unless a newer loop
    /// replaced it meanwhile. Returns whether it was removed.
    pub(super) async fn detach_ended(&self, user_id: i64, generation: u64) -> bool {
        let ended = {
            let mut active = self.active.lock().await;
            if active.get(&user_id).is_none_or(|s| s.generation != generation) {
                return false;
            }
            active.remove(&user_id)
        };
        self.online.write().await.remove(&user_id);

        if let Some(session) = ended {
            session.connection.close();
        }
        info!("Session {} went offline", user_id);
        true
    }

    /// IDs of the connected sessions.
    pub async fn list(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.active.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn is_connected(&self, user_id: i64) -> bool {
        self.active.lock().await.contains_key(&user_id)
    }

    /// Disconnects every session.
    pub async fn shutdown(&self) {
        let sessions: Vec<(i64, ActiveSession)> = self.active.lock().await.drain().collect();
        info!("Disconnecting {} premium sessions", sessions.len());
        for (user_id, session) in sessions {
            session.stop();
            debug!("Session {} stopped", user_id);
        }
        self.online.write().await.clear();
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("api_id", &self.api_id)
            .field("reaction_interval", &self.reaction_interval)
            .finish_non_exhaustive()
    }
}

/// Runs `op` up to `attempts` times with a fixed pause in between.
///
/// `op` receives the 1-based attempt number. The last error is returned.
pub async fn retry_fixed<T, E, F, Fut>(attempts: u32, delay: Duration, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!("Attempt {}/{} failed: {}", attempt, attempts, e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
impl SessionManager {
    /// Registers a connected session backed by `connection` and an idle loop.
    pub(crate) async fn register_idle(&self, user_id: i64, connection: Arc<dyn Connection>) -> u64 {
        let generation = self.next_generation();
        let task = tokio::spawn(std::future::pending::<()>());
        self.register(
            user_id,
            ActiveSession {
                connection,
                task,
                generation,
            },
        )
        .await;
        generation
    }
}
