use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::error::SnapshotError;
use crate::store::{SnapshotStore, validate_key};

/// In-memory snapshot store, for tests and short-lived processes.
#[derive(Default)]
pub struct MemorySnapshotStore {
  entries: RwLock<BTreeMap<String, Bytes>>,
}

impl MemorySnapshotStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
  async fn load(&self, key: &str) -> Result<Bytes, SnapshotError> {
    self
      .entries
      .read()
      .await
      .get(key)
      .cloned()
      .ok_or_else(|| SnapshotError::NotFound(key.to_string()))
  }

  async fn save(&self, key: &str, bytes: Bytes) -> Result<(), SnapshotError> {
    validate_key(key)?;
    self.entries.write().await.insert(key.to_string(), bytes);
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), SnapshotError> {
    self
      .entries
      .write()
      .await
      .remove(key)
      .map(|_| ())
      .ok_or_else(|| SnapshotError::NotFound(key.to_string()))
  }

  async fn list(&self) -> Result<Vec<String>, SnapshotError> {
    Ok(self.entries.read().await.keys().cloned().collect())
  }
}
