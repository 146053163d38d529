//! Cache storage trait and encrypted file implementation.

use serde::{de::DeserializeOwned, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::crypto::{Cipher, CryptoError};

use super::sections::Cache;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("failed to access {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("{} is corrupt: {reason}", path.display())]
  Corrupt { path: PathBuf, reason: String },
  #[error("failed to serialize data for {}: {source}", path.display())]
  Serialize {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error(transparent)]
  Crypto(#[from] CryptoError),
}

/// Trait for cache persistence backends.
pub trait CacheStorage: Send + Sync {
  /// Load the persisted cache. `Ok(None)` means nothing has been stored yet.
  fn load(&self) -> Result<Option<Cache>, StoreError>;

  /// Persist the full cache, replacing whatever was stored before.
  fn store(&self, cache: &Cache) -> Result<(), StoreError>;

  /// Remove the persisted cache.
  fn clear(&self) -> Result<(), StoreError>;
}

/// Storage implementation that doesn't persist anything.
/// Used when downloaded data should only live for the session.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn load(&self) -> Result<Option<Cache>, StoreError> {
    Ok(None) // Nothing persisted
  }

  fn store(&self, _cache: &Cache) -> Result<(), StoreError> {
    Ok(()) // Discard
  }

  fn clear(&self) -> Result<(), StoreError> {
    Ok(())
  }
}

/// A JSON document on disk, optionally passed through a [`Cipher`].
#[derive(Debug, Clone)]
pub struct SealedFile {
  path: PathBuf,
  cipher: Option<Cipher>,
}

impl SealedFile {
  pub fn new(path: impl Into<PathBuf>, cipher: Option<Cipher>) -> Self {
    Self {
      path: path.into(),
      cipher,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn exists(&self) -> bool {
    self.path.is_file()
  }

  /// Read and decode the document. A missing file is `Ok(None)`; anything
  /// that fails to decode is reported as corrupt.
  pub fn read<T: DeserializeOwned>(&self) -> Result<Option<T>, StoreError> {
    let raw = match std::fs::read(&self.path) {
      Ok(raw) => raw,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
      Err(source) => {
        return Err(StoreError::Io {
          path: self.path.clone(),
          source,
        })
      }
    };

    let plain = match &self.cipher {
      Some(cipher) => cipher.decrypt(&raw)?,
      None => raw,
    };

    serde_json::from_slice(&plain)
      .map(Some)
      .map_err(|e| StoreError::Corrupt {
        path: self.path.clone(),
        reason: e.to_string(),
      })
  }

  pub fn write<T: Serialize>(&self, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec(value).map_err(|source| StoreError::Serialize {
      path: self.path.clone(),
      source,
    })?;

    let bytes = match &self.cipher {
      Some(cipher) => cipher.encrypt(&json)?,
      None => json,
    };

    // Ensure parent directory exists
    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
        path: parent.to_path_buf(),
        source,
      })?;
    }

    std::fs::write(&self.path, bytes).map_err(|source| StoreError::Io {
      path: self.path.clone(),
      source,
    })
  }

  /// Delete the file; already missing is fine.
  pub fn remove(&self) -> Result<(), StoreError> {
    match std::fs::remove_file(&self.path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
      Err(source) => Err(StoreError::Io {
        path: self.path.clone(),
        source,
      }),
    }
  }
}

/// File-backed cache storage.
pub struct FileStorage {
  file: SealedFile,
}

impl FileStorage {
  pub fn new(path: impl Into<PathBuf>, cipher: Option<Cipher>) -> Self {
    Self {
      file: SealedFile::new(path, cipher),
    }
  }
}

impl CacheStorage for FileStorage {
  fn load(&self) -> Result<Option<Cache>, StoreError> {
    let cache = self.file.read::<Cache>()?;
    debug!(
      path = %self.file.path().display(),
      found = cache.is_some(),
      "Loaded cache file"
    );
    Ok(cache)
  }

  fn store(&self, cache: &Cache) -> Result<(), StoreError> {
    self.file.write(cache)?;
    debug!(path = %self.file.path().display(), "Updated cache file");
    Ok(())
  }

  fn clear(&self) -> Result<(), StoreError> {
    self.file.remove()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::value::PathValue;
  use serde_json::json;

  fn populated() -> Cache {
    let mut cache = Cache::default();
    cache.store_channels(vec![PathValue::new(json!({
      "id": "c1",
      "brandingSettings": { "channel": { "title": "Ferris Talks" } },
      "statistics": { "videoCount": "3" }
    }))]);
    cache.store_playlist_items(
      "p1",
      vec![PathValue::new(json!({"id": "v1", "tags": ["a", "b"]}))],
    );
    cache
  }

  #[test]
  fn test_missing_file_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(dir.path().join("cache.json"), Some(Cipher::builtin().unwrap()));
    assert!(storage.load().unwrap().is_none());
  }

  #[test]
  fn test_encrypted_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.json");
    let storage = FileStorage::new(&path, Some(Cipher::builtin().unwrap()));

    let cache = populated();
    storage.store(&cache).unwrap();

    // The bytes on disk are not plain JSON.
    let raw = std::fs::read(&path).unwrap();
    assert!(serde_json::from_slice::<serde_json::Value>(&raw).is_err());

    assert_eq!(storage.load().unwrap(), Some(cache));
  }

  #[test]
  fn test_plain_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    let storage = FileStorage::new(&path, None);

    storage.store(&populated()).unwrap();
    let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(
      raw["channel_details"]["c1"]["brandingSettings"]["channel"]["title"],
      "Ferris Talks"
    );
    assert_eq!(storage.load().unwrap(), Some(populated()));
  }

  #[test]
  fn test_corrupt_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    std::fs::write(&path, b"definitely not a cache").unwrap();

    let storage = FileStorage::new(&path, Some(Cipher::builtin().unwrap()));
    assert!(matches!(storage.load(), Err(StoreError::Corrupt { .. })));
  }

  #[test]
  fn test_clear_removes_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    let storage = FileStorage::new(&path, None);

    storage.store(&populated()).unwrap();
    storage.clear().unwrap();
    assert!(!path.exists());
    // Clearing twice is fine.
    storage.clear().unwrap();
  }

  #[test]
  fn test_noop_storage_never_persists() {
    let storage = NoopStorage;
    storage.store(&populated()).unwrap();
    assert!(storage.load().unwrap().is_none());
  }
}
