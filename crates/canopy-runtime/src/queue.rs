use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::action::AnyAction;

/// An action waiting for the runner, addressed by the session ids from the root down
/// to its target node.
pub(crate) struct QueuedAction {
  pub path: Arc<[u64]>,
  /// Token of whatever sent it. Cancelled origins mean the action is stale.
  pub origin: CancellationToken,
  pub action: AnyAction,
}

pub(crate) type ActionSender = mpsc::UnboundedSender<QueuedAction>;
pub(crate) type ActionReceiver = mpsc::UnboundedReceiver<QueuedAction>;

/// Single-consumer queue shared by every sink in one tree. Delivery order is
/// enqueue order.
pub(crate) fn action_queue() -> (ActionSender, ActionReceiver) {
  mpsc::unbounded_channel()
}
