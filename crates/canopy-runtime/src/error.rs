//! Runtime errors.

use canopy_snapshot::SnapshotError;

/// Boxed error returned by user action closures and task futures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while rendering or ticking a workflow tree.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
  /// Two children with the same identity and key were declared in one render pass.
  #[error("duplicate child '{identity}' with key '{key}' declared in one render pass")]
  DuplicateChild { identity: String, key: String },

  /// Two tasks with the same key were declared in one render pass.
  #[error("duplicate task key '{key}' declared by '{identity}'")]
  DuplicateTask { identity: String, key: String },

  /// An action closure returned an error. The target node's state is unchanged.
  #[error("action '{action}' failed")]
  ActionFailed {
    action: String,
    #[source]
    source: BoxError,
  },

  /// A value crossing an interceptor boundary did not have the expected type.
  #[error("type mismatch: expected {expected}")]
  TypeMismatch { expected: &'static str },

  /// The runtime was cancelled.
  #[error("runtime cancelled")]
  Cancelled,

  /// Tasks can only be started from inside a Tokio runtime.
  #[error("no tokio runtime available to start tasks")]
  NoTokioRuntime,

  /// A workflow's render function failed.
  #[error("render failed: {message}")]
  Render { message: String },

  /// Snapshot encoding failed.
  #[error("snapshot error: {0}")]
  Snapshot(#[from] SnapshotError),
}

impl RuntimeError {
  /// Create a render error.
  pub fn render(message: impl Into<String>) -> Self {
    Self::Render {
      message: message.into(),
    }
  }

  pub(crate) fn type_mismatch<T>() -> Self {
    Self::TypeMismatch {
      expected: std::any::type_name::<T>(),
    }
  }

  /// Cancellation is an expected termination, not a failure.
  pub fn is_cancellation(&self) -> bool {
    matches!(self, Self::Cancelled)
  }
}

/// A failure raised by a running task, delivered to the owning node's handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
  /// The task returned an error.
  #[error("task failed: {message}")]
  Failed { message: String },

  /// The task panicked.
  #[error("task panicked: {message}")]
  Panicked { message: String },
}

impl TaskError {
  pub(crate) fn failed(error: impl std::fmt::Display) -> Self {
    Self::Failed {
      message: error.to_string(),
    }
  }

  pub(crate) fn panicked(payload: Box<dyn std::any::Any + Send>) -> Self {
    let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
      (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      "unknown panic payload".to_string()
    };
    Self::Panicked { message }
  }
}

/// Why an action could not be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
  /// The sending node or task has been torn down.
  #[error("sink owner has been torn down")]
  Cancelled,

  /// The runtime that owned the queue is gone.
  #[error("action queue closed")]
  Closed,
}
