//! Per-account command prefixes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::StoreError;
use super::json::{load_or_default, save_atomic};
use crate::config::MAX_PREFIX_LENGTH;

type PrefixMap = BTreeMap<i64, String>;

/// Stores the command prefix chosen by each account.
#[derive(Debug)]
pub struct PrefixStore {
    path: PathBuf,
    default_prefix: String,
    write_lock: Mutex<()>,
}

impl PrefixStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, default_prefix: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            default_prefix: default_prefix.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn default_prefix(&self) -> &str {
        &self.default_prefix
    }

    /// Returns the prefix of an account, falling back to the default.
    ///
    /// An unreadable file is logged and treated as empty so a broken
    /// prefix file never silences the bot.
    pub fn get(&self, account_id: i64) -> String {
        match load_or_default::<PrefixMap>(&self.path) {
            Ok(map) => map
                .get(&account_id)
                .cloned()
                .unwrap_or_else(|| self.default_prefix.clone()),
            Err(e) => {
                warn!("Failed to read prefixes: {}", e);
                self.default_prefix.clone()
            }
        }
    }

    /// Validates and stores a new prefix for an account.
    pub async fn set(&self, account_id: i64, prefix: &str) -> Result<(), StoreError> {
        validate_prefix(prefix)?;

        let _guard = self.write_lock.lock().await;
        let mut map: PrefixMap = load_or_default(&self.path)?;
        map.insert(account_id, prefix.to_owned());
        save_atomic(&self.path, &map)?;

        debug!("Prefix for {} set to {:?}", account_id, prefix);
        Ok(())
    }

    /// Drops the stored prefix, returning the account to the default.
    pub async fn reset(&self, account_id: i64) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map: PrefixMap = load_or_default(&self.path)?;
        if map.remove(&account_id).is_some() {
            save_atomic(&self.path, &map)?;
        }
        Ok(())
    }

    /// Returns every stored prefix.
    pub fn all(&self) -> Result<PrefixMap, StoreError> {
        load_or_default(&self.path)
    }
}

/// Checks that a prefix is short, has no whitespace and is not alphanumeric.
pub fn validate_prefix(prefix: &str) -> Result<(), StoreError> {
    let count = prefix.chars().count();
    if count == 0 {
        return Err(StoreError::InvalidPrefix("prefix cannot be empty".to_owned()));
    }
    if count > MAX_PREFIX_LENGTH {
        return Err(StoreError::InvalidPrefix(format!(
            "prefix is {count} chars (max {MAX_PREFIX_LENGTH})"
        )));
    }
    if prefix.chars().any(char::is_whitespace) {
        return Err(StoreError::InvalidPrefix(
            "prefix cannot contain whitespace".to_owned(),
        ));
    }
    if prefix.chars().any(char::is_alphanumeric) {
        return Err(StoreError::InvalidPrefix(
            "prefix cannot contain letters or digits".to_owned(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (PrefixStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = PrefixStore::new(dir.path().join("prefixes.json"), ".");
        (store, dir)
    }

    #[tokio::test]
    async fn test_get_falls_back_to_default() {
        let (store, _dir) = store();
        assert_eq!(store.get(1), ".");
    }

    #[tokio::test]
    async fn test_set_is_per_account() {
        let (store, _dir) = store();
        store.set(1, "!").await.unwrap();
        store.set(2, "$$").await.unwrap();

        assert_eq!(store.get(1), "!");
        assert_eq!(store.get(2), "$$");
        assert_eq!(store.get(3), ".");
    }

    #[tokio::test]
    async fn test_reset_restores_default() {
        let (store, _dir) = store();
        store.set(1, "!").await.unwrap();
        store.reset(1).await.unwrap();
        assert_eq!(store.get(1), ".");
    }

    #[tokio::test]
    async fn test_set_rejects_invalid_prefix() {
        let (store, _dir) = store();
        assert!(store.set(1, "").await.is_err());
        assert!(store.set(1, "!!!!").await.is_err());
        assert!(store.set(1, "a").await.is_err());
        assert!(store.set(1, "! ").await.is_err());
        assert_eq!(store.get(1), ".");
    }

    #[test]
    fn test_broken_file_falls_back_to_default() {
        let (store, dir) = store();
        std::fs::write(dir.path().join("prefixes.json"), "[1, 2").unwrap();
        assert_eq!(store.get(1), ".");
    }
}
