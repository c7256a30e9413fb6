//! The context a workflow renders with.

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::{FutureExt, Stream, StreamExt};
use tracing::{error, warn};

use crate::action::Action;
use crate::error::{RuntimeError, TaskError};
use crate::interceptor::{AnyRendering, TaskFuture, WorkflowSession};
use crate::node::{NodeScope, downcast_box, downcast_ref};
use crate::sink::{EventHandler, Sink};
use crate::subtree::SubtreeManager;
use crate::tasks::{HandlerCell, TaskKind, TaskSet};
use crate::workflow::Workflow;

/// Handed to [`Workflow::render`]. Declares children and tasks for this pass and
/// creates sinks and event handlers that feed actions back to the node.
///
/// Declarations only take effect once the whole pass succeeds. Redeclaring a task key
/// that is already running keeps the running task and drops the new future unpolled,
/// but the running task switches to the handler passed this pass.
pub struct RenderContext<'a, W: Workflow> {
  subtree: &'a mut SubtreeManager<W>,
  tasks: &'a mut TaskSet<W>,
  scope: &'a NodeScope,
}

impl<'a, W: Workflow> RenderContext<'a, W> {
  pub(crate) fn new(
    subtree: &'a mut SubtreeManager<W>,
    tasks: &'a mut TaskSet<W>,
    scope: &'a NodeScope,
  ) -> Self {
    Self {
      subtree,
      tasks,
      scope,
    }
  }

  pub fn session(&self) -> &WorkflowSession {
    &self.scope.session
  }

  /// A sink that sends actions to this node until it is torn down.
  pub fn action_sink(&self) -> Sink<W> {
    self.scope.sink(self.scope.token.clone())
  }

  /// A callable that maps an event to an action and sends it to this node.
  pub fn event_handler<E, F>(&self, to_action: F) -> EventHandler<E>
  where
    E: 'static,
    F: Fn(E) -> Action<W> + Send + Sync + 'static,
  {
    EventHandler::new(self.action_sink(), to_action)
  }

  /// Render `child` under `key` and return its rendering. The child's outputs are
  /// mapped through `handler` into actions on this node.
  ///
  /// The same `(identity, key)` declared on consecutive passes is the same node and
  /// keeps its state. Declaring it twice in one pass is an error.
  pub fn render_child<C, H>(
    &mut self,
    child: C,
    props: C::Props,
    key: &str,
    handler: H,
  ) -> Result<C::Rendering, RuntimeError>
  where
    C: Workflow,
    H: Fn(C::Output) -> Action<W> + Send + 'static,
  {
    let identity = child.identity();
    let scope: &NodeScope = self.scope;
    let subtree = &mut *self.subtree;
    let rendering = scope.shared.interceptor.on_render_child(
      &identity,
      key,
      &props,
      &scope.session,
      Box::new(move |props: &dyn Any| -> Result<AnyRendering, RuntimeError> {
        let props = downcast_ref::<C::Props>(props)?.clone();
        let rendering = subtree.render_child(scope, child, props, key, Box::new(handler))?;
        Ok(Box::new(rendering) as AnyRendering)
      }),
    )?;
    downcast_box::<C::Rendering>(rendering)
  }

  /// Run `stream` under `key`, turning every item into an action.
  pub fn run_subscription<S, F>(
    &mut self,
    key: &str,
    stream: S,
    handler: F,
  ) -> Result<(), RuntimeError>
  where
    S: Stream + Send + 'static,
    S::Item: Send,
    F: Fn(S::Item) -> Action<W> + Send + 'static,
  {
    let handler = HandlerCell::new(handler);
    let cell = handler.clone();
    let starter = move |sink: Sink<W>| -> TaskFuture {
      Box::pin(async move {
        let mut stream = std::pin::pin!(stream);
        while let Some(item) = stream.next().await {
          let Some(action) = cell.with(|handler| handler(item)) else {
            break;
          };
          if sink.send(action).is_err() {
            break;
          }
        }
      })
    };
    self.tasks.declare(
      self.scope,
      key,
      TaskKind::Subscription,
      Some(Box::new(handler)),
      Box::new(starter),
    )
  }

  /// Run a stream of results under `key`. Errors and panics reach `handler` as
  /// [`TaskError`]s; a panic ends the subscription.
  pub fn run_fallible_subscription<S, T, E, F>(
    &mut self,
    key: &str,
    stream: S,
    handler: F,
  ) -> Result<(), RuntimeError>
  where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
    F: Fn(Result<T, TaskError>) -> Action<W> + Send + 'static,
  {
    let session_id = self.scope.session.session_id;
    let task_key = key.to_string();
    let handler = HandlerCell::new(handler);
    let cell = handler.clone();
    let starter = move |sink: Sink<W>| -> TaskFuture {
      Box::pin(async move {
        let mut stream = std::pin::pin!(stream);
        loop {
          let item = match AssertUnwindSafe(stream.next()).catch_unwind().await {
            Ok(Some(item)) => item.map_err(TaskError::failed),
            Ok(None) => break,
            Err(payload) => {
              let e = TaskError::panicked(payload);
              error!(session_id, key = %task_key, error = %e, "task_failed");
              if let Some(action) = cell.with(|handler| handler(Err(e))) {
                let _ = sink.send(action);
              }
              break;
            }
          };
          if let Err(e) = &item {
            warn!(session_id, key = %task_key, error = %e, "subscription_item_failed");
          }
          let Some(action) = cell.with(|handler| handler(item)) else {
            break;
          };
          if sink.send(action).is_err() {
            break;
          }
        }
      })
    };
    self.tasks.declare(
      self.scope,
      key,
      TaskKind::Subscription,
      Some(Box::new(handler)),
      Box::new(starter),
    )
  }

  /// Run a one-shot fallible future under `key` and turn its result into an action.
  pub fn run_task<Fut, T, E, F>(
    &mut self,
    key: &str,
    future: Fut,
    handler: F,
  ) -> Result<(), RuntimeError>
  where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
    F: FnOnce(Result<T, TaskError>) -> Action<W> + Send + 'static,
  {
    let session_id = self.scope.session.session_id;
    let task_key = key.to_string();
    let handler = HandlerCell::new(handler);
    let cell = handler.clone();
    let starter = move |sink: Sink<W>| -> TaskFuture {
      Box::pin(async move {
        let result = match AssertUnwindSafe(future).catch_unwind().await {
          Ok(Ok(value)) => Ok(value),
          Ok(Err(e)) => Err(TaskError::failed(e)),
          Err(payload) => Err(TaskError::panicked(payload)),
        };
        if let Err(e) = &result {
          error!(session_id, key = %task_key, error = %e, "task_failed");
        }
        if let Some(handler) = cell.take() {
          let _ = sink.send(handler(result));
        }
      })
    };
    self.tasks.declare(
      self.scope,
      key,
      TaskKind::Task,
      Some(Box::new(handler)),
      Box::new(starter),
    )
  }

  /// Run a one-shot effect under `key`. It may send actions through the sink it is
  /// given, which closes when the effect is removed from the tree.
  pub fn run_side_effect<F, Fut>(&mut self, key: &str, effect: F) -> Result<(), RuntimeError>
  where
    F: FnOnce(Sink<W>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let session_id = self.scope.session.session_id;
    let task_key = key.to_string();
    let starter = move |sink: Sink<W>| -> TaskFuture {
      Box::pin(async move {
        if let Err(payload) = AssertUnwindSafe(effect(sink)).catch_unwind().await {
          let e = TaskError::panicked(payload);
          error!(session_id, key = %task_key, error = %e, "side_effect_failed");
        }
      })
    };
    self
      .tasks
      .declare(self.scope, key, TaskKind::SideEffect, None, Box::new(starter))
  }
}
