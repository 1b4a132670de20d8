//! Premium subscription registry.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use super::StoreError;
use crate::config::MAX_GRANT_DAYS;
use super::json::{load_or_default, save_atomic};

/// Subscription tier of a premium user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Basic,
    Pro,
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "basic" | "b" => Ok(Self::Basic),
            "pro" | "p" => Ok(Self::Pro),
            other => Err(format!("unknown plan '{other}' (expected basic or pro)")),
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::Pro => write!(f, "pro"),
        }
    }
}

/// A single premium grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PremiumGrant {
    pub plan: Plan,
    /// User who issued the grant (normally the owner).
    pub granted_by: i64,
    pub granted_at: DateTime<Utc>,
    /// `None` means the grant never expires.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PremiumGrant {
    /// Active iff there is no expiry or `now` is strictly before it.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expires| now < expires)
    }

    /// Whole days left, `None` for unlimited grants.
    #[must_use]
    pub fn days_left(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at.map(|expires| (expires - now).num_days().max(0))
    }
}

type GrantMap = BTreeMap<i64, PremiumGrant>;

/// Registry of premium users backed by `premium.json`.
#[derive(Debug)]
pub struct PremiumRegistry {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl PremiumRegistry {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Grants (or replaces) a subscription.
    ///
    /// With `days` set, an existing active grant is extended from its
    /// current expiry rather than from `now`. More than
    /// [`MAX_GRANT_DAYS`] days, or an expiry past the calendar range,
    /// fails with [`StoreError::GrantTooLong`].
    pub async fn grant(
        &self,
        user_id: i64,
        plan: Plan,
        days: Option<u32>,
        granted_by: i64,
        now: DateTime<Utc>,
    ) -> Result<PremiumGrant, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map: GrantMap = load_or_default(&self.path)?;

        let expires_at = days
            .map(|days| {
                if days > MAX_GRANT_DAYS {
                    return Err(StoreError::GrantTooLong(days));
                }
                let base = map
                    .get(&user_id)
                    .filter(|g| g.is_active(now))
                    .and_then(|g| g.expires_at)
                    .unwrap_or(now);
                base.checked_add_signed(Duration::days(i64::from(days)))
                    .ok_or(StoreError::GrantTooLong(days))
            })
            .transpose()?;

        let grant = PremiumGrant {
            plan,
            granted_by,
            granted_at: now,
            expires_at,
        };
        map.insert(user_id, grant.clone());
        save_atomic(&self.path, &map)?;

        info!("Granted {} premium to {} (expires: {:?})", plan, user_id, expires_at);
        Ok(grant)
    }

    /// Removes a grant. Returns whether one existed.
    pub async fn revoke(&self, user_id: i64) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map: GrantMap = load_or_default(&self.path)?;
        let existed = map.remove(&user_id).is_some();
        if existed {
            save_atomic(&self.path, &map)?;
            info!("Revoked premium of {}", user_id);
        }
        Ok(existed)
    }

    pub fn get(&self, user_id: i64) -> Result<Option<PremiumGrant>, StoreError> {
        let mut map: GrantMap = load_or_default(&self.path)?;
        Ok(map.remove(&user_id))
    }

    pub fn is_active(&self, user_id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self.active_plan(user_id, now)?.is_some())
    }

    /// Returns the plan of an active grant.
    pub fn active_plan(&self, user_id: i64, now: DateTime<Utc>) -> Result<Option<Plan>, StoreError> {
        Ok(self
            .get(user_id)?
            .filter(|g| g.is_active(now))
            .map(|g| g.plan))
    }

    pub fn list(&self) -> Result<Vec<(i64, PremiumGrant)>, StoreError> {
        let map: GrantMap = load_or_default(&self.path)?;
        Ok(map.into_iter().collect())
    }

    /// Deletes expired grants and returns the affected user IDs.
    pub async fn prune_expired(&self, now: DateTime<Utc>) -> Result<Vec<i64>, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map: GrantMap = load_or_default(&self.path)?;

        let expired: Vec<i64> = map
            .iter()
            .filter(|(_, g)| !g.is_active(now))
            .map(|(id, _)| *id)
            .collect();

        if !expired.is_empty() {
            for id in &expired {
                map.remove(id);
            }
            save_atomic(&self.path, &map)?;
            info!("Pruned {} expired premium grant(s)", expired.len());
        }

        Ok(expired)
    }
}
