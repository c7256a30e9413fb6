use thiserror::Error;

/// Errors produced while encoding, decoding or persisting snapshots.
#[derive(Debug, Error)]
pub enum SnapshotError {
  /// The input ended before a length-prefixed field could be read.
  #[error("snapshot truncated: needed {needed} bytes, {remaining} remaining")]
  Truncated { needed: usize, remaining: usize },

  /// A string field did not contain valid UTF-8.
  #[error("invalid utf-8 in snapshot: {0}")]
  InvalidUtf8(#[from] std::string::FromUtf8Error),

  /// Identity bytes could not be parsed.
  #[error("invalid identity: {message}")]
  InvalidIdentity { message: String },

  /// No snapshot is stored under the key.
  #[error("snapshot not found: {0}")]
  NotFound(String),

  /// A store key that cannot be mapped onto the backend.
  #[error("invalid snapshot key '{key}'")]
  InvalidKey { key: String },

  /// State bytes were not the JSON the caller expected.
  #[error("snapshot json error: {0}")]
  Json(#[from] serde_json::Error),

  /// An I/O error occurred in a store backend.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl SnapshotError {
  /// Whether this error means the key simply has no stored snapshot.
  pub fn is_not_found(&self) -> bool {
    matches!(self, Self::NotFound(_))
  }

  /// Create an invalid identity error.
  pub fn invalid_identity(message: impl Into<String>) -> Self {
    Self::InvalidIdentity {
      message: message.into(),
    }
  }
}
