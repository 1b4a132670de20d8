//! Registry of connected premium sessions.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::StoreError;
use super::json::{load_or_default, save_atomic};
use crate::plugins::Plugin;

/// A premium account whose session is kept on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: i64,

    /// Session file holding the authorization of this account.
    pub session_file: PathBuf,

    /// Masked phone number, for display only.
    #[serde(default)]
    pub phone_hint: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub first_name: String,

    pub connected_at: DateTime<Utc>,

    /// Whether this session reacts to the owner's messages.
    #[serde(default)]
    pub mirror_reactions: bool,

    /// Overrides the global mirror emoji.
    #[serde(default)]
    pub mirror_emoji: Option<String>,

    #[serde(default)]
    pub disabled_plugins: Vec<Plugin>,
}

impl SessionRecord {
    /// Human readable label, e.g. `@name (123)`.
    #[must_use]
    pub fn label(&self) -> String {
        match &self.username {
            Some(username) => format!("@{username} ({})", self.user_id),
            None if !self.first_name.is_empty() => format!("{} ({})", self.first_name, self.user_id),
            None => self.user_id.to_string(),
        }
    }
}

type RecordMap = BTreeMap<i64, SessionRecord>;

/// Registry of session records backed by `sessions.json`.
#[derive(Debug)]
pub struct SessionRegistry {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Inserts or replaces the record of a user.
    pub async fn upsert(&self, record: SessionRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map: RecordMap = load_or_default(&self.path)?;
        info!("Storing session record for {}", record.label());
        map.insert(record.user_id, record);
        save_atomic(&self.path, &map)
    }

    /// Removes and returns the record of a user.
    pub async fn remove(&self, user_id: i64) -> Result<Option<SessionRecord>, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map: RecordMap = load_or_default(&self.path)?;
        let removed = map.remove(&user_id);
        if removed.is_some() {
            save_atomic(&self.path, &map)?;
            debug!("Removed session record for {}", user_id);
        }
        Ok(removed)
    }

    pub fn get(&self, user_id: i64) -> Result<Option<SessionRecord>, StoreError> {
        let mut map: RecordMap = load_or_default(&self.path)?;
        Ok(map.remove(&user_id))
    }

    pub fn list(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let map: RecordMap = load_or_default(&self.path)?;
        Ok(map.into_values().collect())
    }

    /// Applies `f` to a stored record and persists the result.
    pub async fn update<F>(&self, user_id: i64, f: F) -> Result<SessionRecord, StoreError>
    where
        F: FnOnce(&mut SessionRecord),
    {
        let _guard = self.write_lock.lock().await;
        let mut map: RecordMap = load_or_default(&self.path)?;
        let record = map.get_mut(&user_id).ok_or(StoreError::NotFound(user_id))?;
        f(record);
        let updated = record.clone();
        save_atomic(&self.path, &map)?;
        Ok(updated)
    }
}
