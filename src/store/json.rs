//! Flat JSON file helpers shared by every store.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::StoreError;

/// Loads a JSON file, returning `T::default()` when the file does not exist.
pub fn load_or_default<T>(path: impl AsRef<Path>) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    let path = path.as_ref();
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(StoreError::Io(e)),
    };

    if content.trim().is_empty() {
        return Ok(T::default());
    }

    serde_json::from_str(&content).map_err(|source| StoreError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Saves a value as pretty JSON (write temp file + rename).
pub fn save_atomic<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<(), StoreError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(value).map_err(StoreError::Serialize)?;
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn test_missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let map: BTreeMap<String, u32> = load_or_default(dir.path().join("absent.json")).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_save_creates_parent_and_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("values.json");

        let mut map = BTreeMap::new();
        map.insert("a".to_owned(), 1u32);
        save_atomic(&path, &map).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
        let loaded: BTreeMap<String, u32> = load_or_default(&path).unwrap();
        assert_eq!(loaded, map);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result: Result<BTreeMap<String, u32>, _> = load_or_default(&path);
        assert!(matches!(result, Err(StoreError::Parse { .. })));
    }

    #[test]
    fn test_empty_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::write(&path, "  \n").unwrap();

        let map: BTreeMap<String, u32> = load_or_default(&path).unwrap();
        assert!(map.is_empty());
    }
}
