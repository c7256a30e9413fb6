//! Keyed background tasks owned by one node.
//!
//! Declarations made during render are staged. Committing a pass first cancels every
//! running task whose key was not redeclared, then starts the newly declared ones.
//! A redeclared key keeps its running task, but the handler from the latest pass
//! replaces the one the task reads its items through.

use std::any::Any;
use std::collections::HashSet;
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::RuntimeError;
use crate::interceptor::TaskFuture;
use crate::node::NodeScope;
use crate::sink::Sink;
use crate::workflow::Workflow;

/// What a task sends back into the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
  /// Emits zero or more values, each turned into an action.
  Subscription,
  /// Resolves once, its result turned into an action.
  Task,
  /// Runs for its effect only.
  SideEffect,
}

/// A task as reported by [`NodeDescription`](crate::NodeDescription).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskDescription {
  pub key: String,
  pub kind: TaskKind,
  /// False once the task has finished or was skipped by an interceptor.
  pub running: bool,
}

pub(crate) type Starter<W> = Box<dyn FnOnce(Sink<W>) -> TaskFuture + Send>;

/// A task's handler, shared with the running future so a later pass can replace it.
pub(crate) struct HandlerCell<H>(Arc<Mutex<Option<H>>>);

impl<H> Clone for HandlerCell<H> {
  fn clone(&self) -> Self {
    Self(self.0.clone())
  }
}

impl<H: Send + 'static> HandlerCell<H> {
  pub fn new(handler: H) -> Self {
    Self(Arc::new(Mutex::new(Some(handler))))
  }

  /// Call the current handler. `None` once a one-shot handler was taken.
  pub fn with<R>(&self, f: impl FnOnce(&H) -> R) -> Option<R> {
    self.0.lock().as_ref().map(f)
  }

  pub fn take(&self) -> Option<H> {
    self.0.lock().take()
  }
}

/// Type-erased [`HandlerCell`], kept alongside the task it belongs to.
pub(crate) trait Rebind: Send {
  fn as_any(&self) -> &dyn Any;

  /// Move this cell's handler into `running`. False when the handler types differ.
  fn rebind(&self, running: &dyn Rebind) -> bool;
}

impl<H: Send + 'static> Rebind for HandlerCell<H> {
  fn as_any(&self) -> &dyn Any {
    self
  }

  fn rebind(&self, running: &dyn Rebind) -> bool {
    let Some(running) = running.as_any().downcast_ref::<HandlerCell<H>>() else {
      return false;
    };
    if let Some(next) = self.take() {
      *running.0.lock() = Some(next);
    }
    true
  }
}

struct RunningTask {
  key: String,
  kind: TaskKind,
  token: CancellationToken,
  handle: Option<JoinHandle<()>>,
  handler: Option<Box<dyn Rebind>>,
}

impl RunningTask {
  fn cancel(self, scope: &NodeScope) {
    self.token.cancel();
    if let Some(handle) = self.handle {
      handle.abort();
    }
    debug!(
      session_id = scope.session.session_id,
      key = %self.key,
      "task_cancelled"
    );
  }
}

enum StagedTask<W: Workflow> {
  Retained {
    key: String,
    handler: Option<Box<dyn Rebind>>,
  },
  New {
    key: String,
    kind: TaskKind,
    starter: Starter<W>,
    handler: Option<Box<dyn Rebind>>,
  },
}

pub(crate) struct TaskSet<W: Workflow> {
  running: Vec<RunningTask>,
  staged: Vec<StagedTask<W>>,
  staged_keys: HashSet<String>,
}

impl<W: Workflow> Default for TaskSet<W> {
  fn default() -> Self {
    Self {
      running: Vec::new(),
      staged: Vec::new(),
      staged_keys: HashSet::new(),
    }
  }
}

impl<W: Workflow> TaskSet<W> {
  /// Stage a task for this pass. `handler` is the cell the starter reads its handler
  /// from; when the key is already running it is rebound on commit.
  pub fn declare(
    &mut self,
    scope: &NodeScope,
    key: &str,
    kind: TaskKind,
    handler: Option<Box<dyn Rebind>>,
    starter: Starter<W>,
  ) -> Result<(), RuntimeError> {
    if !self.staged_keys.insert(key.to_string()) {
      return Err(RuntimeError::DuplicateTask {
        identity: scope.session.identity.to_string(),
        key: key.to_string(),
      });
    }

    if self.running.iter().any(|task| task.key == key) {
      drop(starter);
      self.staged.push(StagedTask::Retained {
        key: key.to_string(),
        handler,
      });
    } else {
      self.staged.push(StagedTask::New {
        key: key.to_string(),
        kind,
        starter,
        handler,
      });
    }
    Ok(())
  }

  /// Cancel running tasks that were not redeclared this pass.
  pub fn teardown_removed(&mut self, scope: &NodeScope) {
    let (kept, removed): (Vec<_>, Vec<_>) = mem::take(&mut self.running)
      .into_iter()
      .partition(|task| self.staged_keys.contains(&task.key));
    self.running = kept;
    for task in removed {
      task.cancel(scope);
    }
  }

  /// Rebind handlers of retained tasks, start tasks first declared this pass and
  /// clear staging.
  pub fn start_new(&mut self, scope: &NodeScope) -> Result<(), RuntimeError> {
    let staged = mem::take(&mut self.staged);
    self.staged_keys.clear();

    let mut new = Vec::new();
    for entry in staged {
      match entry {
        StagedTask::Retained { key, handler } => self.rebind(scope, &key, handler),
        StagedTask::New {
          key,
          kind,
          starter,
          handler,
        } => new.push((key, kind, starter, handler)),
      }
    }
    if new.is_empty() {
      return Ok(());
    }
    let runtime = Handle::try_current().map_err(|_| RuntimeError::NoTokioRuntime)?;

    for (key, kind, starter, handler) in new {
      let token = scope.token.child_token();
      let effect = starter(scope.sink(token.clone()));
      let guard = token.clone();
      let guarded: TaskFuture = Box::pin(async move {
        tokio::select! {
          biased;
          _ = guard.cancelled() => {}
          _ = effect => {}
        }
      });

      let mut spawned = None;
      scope.shared.interceptor.on_running_side_effect(
        &key,
        guarded,
        &scope.session,
        Box::new(|effect: TaskFuture| spawned = Some(runtime.spawn(effect))),
      );

      if spawned.is_none() {
        debug!(session_id = scope.session.session_id, key = %key, "task_skipped");
      } else {
        debug!(
          session_id = scope.session.session_id,
          key = %key,
          kind = ?kind,
          "task_started"
        );
      }
      self.running.push(RunningTask {
        key,
        kind,
        token,
        handle: spawned,
        handler,
      });
    }
    Ok(())
  }

  fn rebind(&mut self, scope: &NodeScope, key: &str, handler: Option<Box<dyn Rebind>>) {
    let Some(handler) = handler else {
      return;
    };
    let Some(task) = self.running.iter_mut().find(|task| task.key == key) else {
      return;
    };
    match &task.handler {
      Some(running) if handler.rebind(running.as_ref()) => {}
      _ => {
        debug!(
          session_id = scope.session.session_id,
          key = %key,
          "task_handler_not_rebound"
        );
      }
    }
  }

  pub fn abort_pass(&mut self) {
    self.staged.clear();
    self.staged_keys.clear();
  }

  pub fn cancel_all(&mut self, scope: &NodeScope) {
    self.abort_pass();
    for task in self.running.drain(..) {
      task.cancel(scope);
    }
  }

  pub fn describe(&self) -> Vec<TaskDescription> {
    self
      .running
      .iter()
      .map(|task| TaskDescription {
        key: task.key.clone(),
        kind: task.kind,
        running: task.handle.as_ref().is_some_and(|h| !h.is_finished()),
      })
      .collect()
  }
}
