use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime configuration, loadable from JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
  /// Name used in log fields. Defaults to the runner id.
  pub name: Option<String>,

  /// When set, `next_output` keeps applying queued actions that produce no output
  /// until this many milliseconds pass, coalescing them into one re-render.
  pub frame_timeout_ms: Option<u64>,

  /// When set, the render loop skips the render pass after actions that changed no
  /// node's state.
  pub render_only_when_state_changed: bool,
}

impl RuntimeConfig {
  pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(json)
  }

  pub fn frame_timeout(&self) -> Option<Duration> {
    self.frame_timeout_ms.map(Duration::from_millis)
  }
}
