use std::fmt;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::SnapshotError;

/// The opaque serialized state of a single node.
///
/// The runtime never looks inside; only the workflow that produced it knows how to
/// read it back in `initial_state`.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Snapshot {
  bytes: Bytes,
}

impl Snapshot {
  pub fn of_bytes(bytes: impl Into<Bytes>) -> Self {
    Self {
      bytes: bytes.into(),
    }
  }

  pub fn of_str(value: &str) -> Self {
    Self::of_bytes(Bytes::copy_from_slice(value.as_bytes()))
  }

  /// Serialize `value` as JSON.
  pub fn of_json<T: Serialize>(value: &T) -> Result<Self, SnapshotError> {
    Ok(Self::of_bytes(serde_json::to_vec(value)?))
  }

  /// Deserialize the bytes as JSON.
  pub fn to_json<T: DeserializeOwned>(&self) -> Result<T, SnapshotError> {
    Ok(serde_json::from_slice(&self.bytes)?)
  }

  pub fn as_string(&self) -> Result<String, SnapshotError> {
    Ok(String::from_utf8(self.bytes.to_vec())?)
  }

  pub fn bytes(&self) -> &Bytes {
    &self.bytes
  }

  pub fn len(&self) -> usize {
    self.bytes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bytes.is_empty()
  }
}

impl fmt::Debug for Snapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Snapshot({} bytes)", self.bytes.len())
  }
}
