//! Credential persistence.
//!
//! Pure storage: one slot holding the current token pair, last-write-wins.
//! No validation happens here.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lusolve_protocol::TokenPair;
use thiserror::Error;

/// File name of the persisted credential slot.
pub const CREDENTIALS_FILE: &str = "credentials.json";

/// Directory under the platform config dir holding client state.
pub const APP_DIR: &str = "lusolve";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential store io: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential store encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("no config directory available for credential storage")]
    NoConfigDir,
}

/// Storage seam for the current credential pair.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<TokenPair>, StoreError>;
    fn save(&self, pair: &TokenPair) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

/// Credential slot persisted as JSON in a single fixed-name file, surviving
/// process restarts.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<config-dir>/lusolve/credentials.json`.
    pub fn default_location() -> Result<Self, StoreError> {
        let base = dirs::config_dir().ok_or(StoreError::NoConfigDir)?;
        Ok(Self::at(base.join(APP_DIR).join(CREDENTIALS_FILE)))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<TokenPair>, StoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        let pair = serde_json::from_str(&contents)?;
        Ok(Some(pair))
    }

    fn save(&self, pair: &TokenPair) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Whole-file replace keeps the slot last-write-wins.
        let encoded = serde_json::to_string(pair)?;
        std::fs::write(&self.path, encoded)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

/// In-process slot, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<TokenPair>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_pair(pair: TokenPair) -> Self {
        Self {
            slot: Mutex::new(Some(pair)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<TokenPair>, StoreError> {
        let slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(slot.clone())
    }

    fn save(&self, pair: &TokenPair) -> Result<(), StoreError> {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(pair.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pair() -> TokenPair {
        TokenPair {
            access: "access-token".to_string(),
            refresh: "refresh-token".to_string(),
        }
    }

    #[test]
    fn file_store_roundtrip() -> Result<(), StoreError> {
        let dir = tempfile::tempdir()?;
        let store = FileCredentialStore::at(dir.path().join(CREDENTIALS_FILE));

        assert!(store.load()?.is_none());

        store.save(&sample_pair())?;
        assert_eq!(store.load()?, Some(sample_pair()));

        store.clear()?;
        assert!(store.load()?.is_none());

        // Clearing an already-empty slot is fine.
        store.clear()?;
        Ok(())
    }

    #[test]
    fn file_store_creates_parent_directories() -> Result<(), StoreError> {
        let dir = tempfile::tempdir()?;
        let store = FileCredentialStore::at(dir.path().join("nested").join("deep").join(CREDENTIALS_FILE));

        store.save(&sample_pair())?;
        assert_eq!(store.load()?, Some(sample_pair()));
        Ok(())
    }

    #[test]
    fn file_store_last_write_wins() -> Result<(), StoreError> {
        let dir = tempfile::tempdir()?;
        let store = FileCredentialStore::at(dir.path().join(CREDENTIALS_FILE));

        store.save(&sample_pair())?;
        let rotated = TokenPair {
            access: "second-access".to_string(),
            refresh: "second-refresh".to_string(),
        };
        store.save(&rotated)?;
        assert_eq!(store.load()?, Some(rotated));
        Ok(())
    }

    #[test]
    fn corrupt_file_surfaces_encoding_error() -> Result<(), StoreError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(CREDENTIALS_FILE);
        std::fs::write(&path, "{ not json")?;

        let store = FileCredentialStore::at(path);
        assert!(matches!(store.load(), Err(StoreError::Encoding(_))));
        Ok(())
    }

    #[test]
    fn memory_store_roundtrip() -> Result<(), StoreError> {
        let store = MemoryCredentialStore::new();
        assert!(store.load()?.is_none());
        store.save(&sample_pair())?;
        assert_eq!(store.load()?, Some(sample_pair()));
        store.clear()?;
        assert!(store.load()?.is_none());
        Ok(())
    }
}
