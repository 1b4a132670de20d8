//! Premium expiry sweeper.
//!
//! Runs on a fixed interval, and on demand through [`SweepMessage`]:
//! 1. Expired grants are pruned from `premium.json`
//! 2. Their sessions are disconnected, along with any connected session
//!    whose grant disappeared some other way
//!
//! Session records stay in `sessions.json`, so a renewed grant can be
//! reconnected on the next restore or with `/connect`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::sessions::SessionManager;
use crate::store::{PremiumRegistry, StoreError};

/// Messages that can be sent to the sweeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepMessage {
    /// Sweep right away.
    SweepNow,
    /// Stop the sweeper.
    Shutdown,
}

/// What one sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Users whose grant expired and was removed.
    pub expired: Vec<i64>,
    /// Sessions disconnected by this sweep.
    pub disconnected: Vec<i64>,
}

/// Periodic premium expiry check.
pub struct ExpirySweeper {
    premium: Arc<PremiumRegistry>,
    manager: Arc<SessionManager>,
    check_interval: Duration,
}

impl ExpirySweeper {
    #[must_use]
    pub fn new(premium: Arc<PremiumRegistry>, manager: Arc<SessionManager>, check_interval: Duration) -> Self {
        Self {
            premium,
            manager,
            check_interval,
        }
    }

    /// Runs the sweep loop until [`SweepMessage::Shutdown`] or the
    /// channel closes.
    pub async fn run(&self, mut rx: mpsc::Receiver<SweepMessage>) {
        info!("Expiry sweeper started (every {:?})", self.check_interval);

        let mut timer = interval(self.check_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.tick().await;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(SweepMessage::SweepNow) => {
                            debug!("Received sweep request");
                            self.tick().await;
                        }
                        Some(SweepMessage::Shutdown) | None => {
                            info!("Expiry sweeper shutting down");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn tick(&self) {
        match self.sweep().await {
            Ok(report) if report.expired.is_empty() && report.disconnected.is_empty() => {
                debug!("Expiry sweep: nothing to do");
            }
            Ok(report) => info!(
                "Expiry sweep: {} grants expired, {} sessions disconnected",
                report.expired.len(),
                report.disconnected.len()
            ),
            Err(e) => warn!("Expiry sweep failed: {}", e),
        }
    }

    /// Prunes expired grants and disconnects sessions left without one.
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let now = Utc::now();
        let expired = self.premium.prune_expired(now).await?;

        let mut disconnected = Vec::new();
        for user_id in self.manager.list().await {
            if expired.contains(&user_id) || !self.premium.is_active(user_id, now)? {
                match self.manager.detach(user_id, false).await {
                    Ok(true) => {
                        info!("Premium of {} ended, session disconnected", user_id);
                        disconnected.push(user_id);
                    }
                    Ok(false) => {}
                    Err(e) => warn!("Failed to disconnect {}: {}", user_id, e),
                }
            }
        }

        Ok(SweepReport { expired, disconnected })
    }
}

impl std::fmt::Debug for ExpirySweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpirySweeper")
            .field("check_interval", &self.check_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Duration as ChronoDuration;
    use tokio::sync::RwLock;

    use super::*;
    use crate::commands::CommandHandler;
    use crate::sessions::testing::CountingConnection;
    use crate::store::{Plan, PrefixStore, SessionRecord, SessionRegistry};

    struct Fixture {
        sweeper: ExpirySweeper,
        manager: Arc<SessionManager>,
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
            1,
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
        Fixture {
            sweeper: ExpirySweeper::new(Arc::clone(&premium), Arc::clone(&manager), Duration::from_secs(60)),
            manager,
            premium,
            registry,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_sweep_prunes_expired_and_keeps_records() {
        let f = fixture();
        let long_ago = Utc::now() - ChronoDuration::days(10);
        f.premium.grant(100, Plan::Basic, Some(1), 1, long_ago).await.unwrap();
        f.premium.grant(200, Plan::Pro, Some(30), 1, Utc::now()).await.unwrap();
        f.registry
            .upsert(SessionRecord {
                user_id: 100,
                session_file: "100.session".into(),
                phone_hint: "***0000".to_owned(),
                username: None,
                first_name: "User".to_owned(),
                connected_at: long_ago,
                mirror_reactions: false,
                mirror_emoji: None,
                disabled_plugins: Vec::new(),
            })
            .await
            .unwrap();

        let report = f.sweeper.sweep().await.unwrap();
        assert_eq!(report.expired, vec![100]);
        assert!(report.disconnected.is_empty());

        assert!(f.premium.get(100).unwrap().is_none());
        assert!(f.premium.get(200).unwrap().is_some());
        assert!(f.registry.get(100).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_disconnects_revoked_session() {
        let f = fixture();
        f.premium.grant(100, Plan::Basic, None, 1, Utc::now()).await.unwrap();
        f.premium.grant(200, Plan::Pro, None, 1, Utc::now()).await.unwrap();

        let revoked = Arc::new(CountingConnection::default());
        let closed = Arc::clone(&revoked.closed);
        f.manager.register_idle(100, revoked).await;
        f.manager.register_idle(200, Arc::new(CountingConnection::default())).await;

        f.premium.revoke(100).await.unwrap();
        let report = f.sweeper.sweep().await.unwrap();

        assert!(report.expired.is_empty());
        assert_eq!(report.disconnected, vec![100]);
        assert_eq!(closed.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(f.manager.list().await, vec![200]);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture();
        let (tx, rx) = mpsc::channel(4);
        tx.send(SweepMessage::SweepNow).await.unwrap();
        tx.send(SweepMessage::Shutdown).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), f.sweeper.run(rx))
            .await
            .unwrap();
    }
}
