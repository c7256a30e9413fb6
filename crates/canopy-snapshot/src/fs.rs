use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::SnapshotError;
use crate::store::{SnapshotStore, validate_key};

const EXTENSION: &str = "snapshot";

/// Filesystem-based snapshot store.
///
/// Each snapshot is stored at `{base_path}/{key}.snapshot`. Writes go to a temporary
/// sibling first and are renamed into place, so a crash never leaves a half-written
/// snapshot behind.
pub struct FsSnapshotStore {
  base_path: PathBuf,
}

impl FsSnapshotStore {
  /// Create a new filesystem store with the given base path.
  pub fn new(base_path: impl Into<PathBuf>) -> Self {
    Self {
      base_path: base_path.into(),
    }
  }

  pub fn base_path(&self) -> &PathBuf {
    &self.base_path
  }

  fn key_to_path(&self, key: &str) -> Result<PathBuf, SnapshotError> {
    validate_key(key)?;
    Ok(self.base_path.join(format!("{key}.{EXTENSION}")))
  }
}

fn not_found(key: &str) -> impl FnOnce(std::io::Error) -> SnapshotError {
  move |e| {
    if e.kind() == std::io::ErrorKind::NotFound {
      SnapshotError::NotFound(key.to_string())
    } else {
      SnapshotError::Io(e)
    }
  }
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
  async fn load(&self, key: &str) -> Result<Bytes, SnapshotError> {
    let path = self.key_to_path(key)?;
    let bytes = fs::read(&path).await.map_err(not_found(key))?;
    Ok(Bytes::from(bytes))
  }

  async fn save(&self, key: &str, bytes: Bytes) -> Result<(), SnapshotError> {
    let path = self.key_to_path(key)?;
    fs::create_dir_all(&self.base_path).await?;

    let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
    let mut file = File::create(&tmp).await?;
    file.write_all(&bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, &path).await?;
    debug!(key = %key, bytes = bytes.len(), "snapshot saved");
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), SnapshotError> {
    let path = self.key_to_path(key)?;
    fs::remove_file(&path).await.map_err(not_found(key))
  }

  async fn list(&self) -> Result<Vec<String>, SnapshotError> {
    let mut entries = match fs::read_dir(&self.base_path).await {
      Ok(entries) => entries,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(e.into()),
    };

    let mut keys = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
      let path = entry.path();
      if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
        continue;
      }
      if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
        && validate_key(stem).is_ok()
      {
        keys.push(stem.to_string());
      }
    }
    keys.sort();
    Ok(keys)
  }
}
