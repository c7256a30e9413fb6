use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SnapshotError;

/// Persistence backend for encoded tree snapshots.
///
/// Stored values are opaque blobs. Callers decode them with
/// [`TreeSnapshot::parse`](crate::TreeSnapshot::parse) when they need the structure.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
  /// Load the blob stored under `key`, or [`SnapshotError::NotFound`].
  async fn load(&self, key: &str) -> Result<Bytes, SnapshotError>;

  /// Store a blob, replacing any previous value.
  async fn save(&self, key: &str, bytes: Bytes) -> Result<(), SnapshotError>;

  /// Delete the blob stored under `key`, or [`SnapshotError::NotFound`].
  async fn delete(&self, key: &str) -> Result<(), SnapshotError>;

  /// List stored keys in ascending order.
  async fn list(&self) -> Result<Vec<String>, SnapshotError>;
}

/// Keys become file names, so they are limited to a conservative character set.
pub(crate) fn validate_key(key: &str) -> Result<(), SnapshotError> {
  let valid = !key.is_empty()
    && !key.starts_with('.')
    && key
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
  if valid {
    Ok(())
  } else {
    Err(SnapshotError::InvalidKey {
      key: key.to_string(),
    })
  }
}
