use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::action::{Action, AnyAction};
use crate::error::SendError;
use crate::interceptor::{WorkflowInterceptor, WorkflowSession};
use crate::queue::{ActionSender, QueuedAction};
use crate::workflow::Workflow;

/// Sends actions to one node. Cheap to clone and safe to move into tasks.
///
/// Once the node (or the task the sink was handed to) is torn down, sends fail with
/// [`SendError::Cancelled`] and anything already queued is dropped unapplied.
pub struct Sink<W: Workflow> {
  queue: ActionSender,
  path: Arc<[u64]>,
  origin: CancellationToken,
  session: Arc<WorkflowSession>,
  interceptor: Arc<dyn WorkflowInterceptor>,
  _workflow: PhantomData<fn() -> W>,
}

impl<W: Workflow> Sink<W> {
  pub(crate) fn new(
    queue: ActionSender,
    path: Arc<[u64]>,
    origin: CancellationToken,
    session: Arc<WorkflowSession>,
    interceptor: Arc<dyn WorkflowInterceptor>,
  ) -> Self {
    Self {
      queue,
      path,
      origin,
      session,
      interceptor,
      _workflow: PhantomData,
    }
  }

  pub fn send(&self, action: Action<W>) -> Result<(), SendError> {
    if self.origin.is_cancelled() {
      debug!(
        session_id = self.session.session_id,
        action = %action.name(),
        "action_rejected_after_teardown"
      );
      return Err(SendError::Cancelled);
    }

    self.interceptor.on_action_sent(
      AnyAction::new(action),
      &self.session,
      Box::new(|action: AnyAction| {
        self
          .queue
          .send(QueuedAction {
            path: self.path.clone(),
            origin: self.origin.clone(),
            action,
          })
          .map_err(|_| SendError::Closed)
      }),
    )
  }

  /// Whether sends can no longer reach the node.
  pub fn is_closed(&self) -> bool {
    self.origin.is_cancelled() || self.queue.is_closed()
  }
}

impl<W: Workflow> Clone for Sink<W> {
  fn clone(&self) -> Self {
    Self {
      queue: self.queue.clone(),
      path: self.path.clone(),
      origin: self.origin.clone(),
      session: self.session.clone(),
      interceptor: self.interceptor.clone(),
      _workflow: PhantomData,
    }
  }
}

impl<W: Workflow> fmt::Debug for Sink<W> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Sink")
      .field("session_id", &self.session.session_id)
      .field("closed", &self.is_closed())
      .finish()
  }
}

/// A callable that turns events into actions, for handing to a rendering.
pub struct EventHandler<E> {
  handler: Arc<dyn Fn(E) -> Result<(), SendError> + Send + Sync>,
}

impl<E: 'static> EventHandler<E> {
  pub(crate) fn new<W, F>(sink: Sink<W>, to_action: F) -> Self
  where
    W: Workflow,
    F: Fn(E) -> Action<W> + Send + Sync + 'static,
  {
    Self {
      handler: Arc::new(move |event| sink.send(to_action(event))),
    }
  }

  /// Deliver an event. Events sent after the node is torn down are ignored.
  pub fn call(&self, event: E) {
    if let Err(e) = (self.handler)(event) {
      debug!(error = %e, "event_dropped");
    }
  }

  /// Deliver an event, reporting whether it was queued.
  pub fn try_call(&self, event: E) -> Result<(), SendError> {
    (self.handler)(event)
  }
}

impl<E> Clone for EventHandler<E> {
  fn clone(&self) -> Self {
    Self {
      handler: self.handler.clone(),
    }
  }
}

impl<E> fmt::Debug for EventHandler<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("EventHandler")
  }
}
