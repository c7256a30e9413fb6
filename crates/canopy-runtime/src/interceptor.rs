//! Interceptors wrap every node operation.
//!
//! Each hook receives a `proceed` continuation standing for the rest of the chain plus
//! the real operation. A hook may run code around `proceed`, call it with different
//! arguments, or not call it at all. Props and state cross the hook boundary as
//! `dyn Any`, so one interceptor serves every workflow type.
//!
//! ```text
//! runner ─► chain[0] ─► chain[1] ─► ... ─► chain[n-1] ─► node operation
//! ```
//!
//! The first interceptor in the list is the outermost.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use canopy_snapshot::Snapshot;
use futures::future::BoxFuture;
use tracing::{debug, info};
use uuid::Uuid;

use crate::action::AnyAction;
use crate::error::{RuntimeError, SendError};
use crate::identity::WorkflowIdentity;

/// Type-erased node state.
pub type AnyState = Box<dyn Any + Send>;
/// Type-erased rendering.
pub type AnyRendering = Box<dyn Any + Send>;
/// A task future as handed to [`WorkflowInterceptor::on_running_side_effect`].
pub type TaskFuture = BoxFuture<'static, ()>;

pub type InitialStateProceed<'a> =
  Box<dyn FnOnce(&dyn Any, Option<&Snapshot>) -> Result<AnyState, RuntimeError> + 'a>;
pub type PropsChangedProceed<'a> =
  Box<dyn FnOnce(&dyn Any, &dyn Any, AnyState) -> Result<AnyState, RuntimeError> + 'a>;
pub type RenderProceed<'a> =
  Box<dyn FnOnce(&dyn Any, &dyn Any) -> Result<AnyRendering, RuntimeError> + 'a>;
pub type SnapshotProceed<'a> =
  Box<dyn FnOnce(&dyn Any) -> Result<Option<Snapshot>, RuntimeError> + 'a>;
pub type RenderChildProceed<'a> =
  Box<dyn FnOnce(&dyn Any) -> Result<AnyRendering, RuntimeError> + 'a>;
pub type SideEffectProceed<'a> = Box<dyn FnOnce(TaskFuture) + 'a>;
pub type ActionSentProceed<'a> = Box<dyn FnOnce(AnyAction) -> Result<(), SendError> + 'a>;

/// One node's lifetime, from creation to teardown.
#[derive(Debug, Clone)]
pub struct WorkflowSession {
  pub identity: WorkflowIdentity,
  pub render_key: String,
  /// Unique within one runner.
  pub session_id: u64,
  pub parent_session_id: Option<u64>,
  pub runner_id: Uuid,
}

impl WorkflowSession {
  pub fn is_root(&self) -> bool {
    self.parent_session_id.is_none()
  }
}

impl fmt::Display for WorkflowSession {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{} {}", self.session_id, self.identity)?;
    if !self.render_key.is_empty() {
      write!(f, "[{}]", self.render_key)?;
    }
    Ok(())
  }
}

/// Hooks around node operations. Every method defaults to calling `proceed` unchanged.
pub trait WorkflowInterceptor: Send + Sync {
  fn on_session_started(&self, _session: &WorkflowSession) {}

  fn on_session_finished(&self, _session: &WorkflowSession) {}

  fn on_initial_state(
    &self,
    props: &dyn Any,
    snapshot: Option<&Snapshot>,
    _session: &WorkflowSession,
    proceed: InitialStateProceed<'_>,
  ) -> Result<AnyState, RuntimeError> {
    proceed(props, snapshot)
  }

  fn on_props_changed(
    &self,
    old: &dyn Any,
    new: &dyn Any,
    state: AnyState,
    _session: &WorkflowSession,
    proceed: PropsChangedProceed<'_>,
  ) -> Result<AnyState, RuntimeError> {
    proceed(old, new, state)
  }

  fn on_render(
    &self,
    props: &dyn Any,
    state: &dyn Any,
    _session: &WorkflowSession,
    proceed: RenderProceed<'_>,
  ) -> Result<AnyRendering, RuntimeError> {
    proceed(props, state)
  }

  fn on_snapshot_state(
    &self,
    state: &dyn Any,
    _session: &WorkflowSession,
    proceed: SnapshotProceed<'_>,
  ) -> Result<Option<Snapshot>, RuntimeError> {
    proceed(state)
  }

  /// Called in the parent's session when it renders a child.
  fn on_render_child(
    &self,
    _child: &WorkflowIdentity,
    _key: &str,
    props: &dyn Any,
    _session: &WorkflowSession,
    proceed: RenderChildProceed<'_>,
  ) -> Result<AnyRendering, RuntimeError> {
    proceed(props)
  }

  /// Called when a task is about to start. Not calling `proceed` skips the task.
  fn on_running_side_effect(
    &self,
    _key: &str,
    effect: TaskFuture,
    _session: &WorkflowSession,
    proceed: SideEffectProceed<'_>,
  ) {
    proceed(effect)
  }

  fn on_action_sent(
    &self,
    action: AnyAction,
    _session: &WorkflowSession,
    proceed: ActionSentProceed<'_>,
  ) -> Result<(), SendError> {
    proceed(action)
  }
}

/// Ordered composition of interceptors, itself an interceptor.
#[derive(Clone, Default)]
pub struct InterceptorChain {
  interceptors: Vec<Arc<dyn WorkflowInterceptor>>,
}

impl InterceptorChain {
  pub fn new(interceptors: Vec<Arc<dyn WorkflowInterceptor>>) -> Self {
    Self { interceptors }
  }

  pub fn len(&self) -> usize {
    self.interceptors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.interceptors.is_empty()
  }

  fn initial_state_at(
    &self,
    index: usize,
    props: &dyn Any,
    snapshot: Option<&Snapshot>,
    session: &WorkflowSession,
    proceed: InitialStateProceed<'_>,
  ) -> Result<AnyState, RuntimeError> {
    let Some(interceptor) = self.interceptors.get(index) else {
      return proceed(props, snapshot);
    };
    interceptor.on_initial_state(
      props,
      snapshot,
      session,
      Box::new(move |props: &dyn Any, snapshot: Option<&Snapshot>| {
        self.initial_state_at(index + 1, props, snapshot, session, proceed)
      }),
    )
  }

  fn props_changed_at(
    &self,
    index: usize,
    old: &dyn Any,
    new: &dyn Any,
    state: AnyState,
    session: &WorkflowSession,
    proceed: PropsChangedProceed<'_>,
  ) -> Result<AnyState, RuntimeError> {
    let Some(interceptor) = self.interceptors.get(index) else {
      return proceed(old, new, state);
    };
    interceptor.on_props_changed(
      old,
      new,
      state,
      session,
      Box::new(move |old: &dyn Any, new: &dyn Any, state: AnyState| {
        self.props_changed_at(index + 1, old, new, state, session, proceed)
      }),
    )
  }

  fn render_at(
    &self,
    index: usize,
    props: &dyn Any,
    state: &dyn Any,
    session: &WorkflowSession,
    proceed: RenderProceed<'_>,
  ) -> Result<AnyRendering, RuntimeError> {
    let Some(interceptor) = self.interceptors.get(index) else {
      return proceed(props, state);
    };
    interceptor.on_render(
      props,
      state,
      session,
      Box::new(move |props: &dyn Any, state: &dyn Any| {
        self.render_at(index + 1, props, state, session, proceed)
      }),
    )
  }

  fn snapshot_at(
    &self,
    index: usize,
    state: &dyn Any,
    session: &WorkflowSession,
    proceed: SnapshotProceed<'_>,
  ) -> Result<Option<Snapshot>, RuntimeError> {
    let Some(interceptor) = self.interceptors.get(index) else {
      return proceed(state);
    };
    interceptor.on_snapshot_state(
      state,
      session,
      Box::new(move |state: &dyn Any| self.snapshot_at(index + 1, state, session, proceed)),
    )
  }

  fn render_child_at(
    &self,
    index: usize,
    child: &WorkflowIdentity,
    key: &str,
    props: &dyn Any,
    session: &WorkflowSession,
    proceed: RenderChildProceed<'_>,
  ) -> Result<AnyRendering, RuntimeError> {
    let Some(interceptor) = self.interceptors.get(index) else {
      return proceed(props);
    };
    interceptor.on_render_child(
      child,
      key,
      props,
      session,
      Box::new(move |props: &dyn Any| {
        self.render_child_at(index + 1, child, key, props, session, proceed)
      }),
    )
  }

  fn side_effect_at(
    &self,
    index: usize,
    key: &str,
    effect: TaskFuture,
    session: &WorkflowSession,
    proceed: SideEffectProceed<'_>,
  ) {
    let Some(interceptor) = self.interceptors.get(index) else {
      return proceed(effect);
    };
    interceptor.on_running_side_effect(
      key,
      effect,
      session,
      Box::new(move |effect: TaskFuture| {
        self.side_effect_at(index + 1, key, effect, session, proceed)
      }),
    )
  }

  fn action_sent_at(
    &self,
    index: usize,
    action: AnyAction,
    session: &WorkflowSession,
    proceed: ActionSentProceed<'_>,
  ) -> Result<(), SendError> {
    let Some(interceptor) = self.interceptors.get(index) else {
      return proceed(action);
    };
    interceptor.on_action_sent(
      action,
      session,
      Box::new(move |action: AnyAction| self.action_sent_at(index + 1, action, session, proceed)),
    )
  }
}

impl WorkflowInterceptor for InterceptorChain {
  fn on_session_started(&self, session: &WorkflowSession) {
    for interceptor in &self.interceptors {
      interceptor.on_session_started(session);
    }
  }

  fn on_session_finished(&self, session: &WorkflowSession) {
    for interceptor in self.interceptors.iter().rev() {
      interceptor.on_session_finished(session);
    }
  }

  fn on_initial_state(
    &self,
    props: &dyn Any,
    snapshot: Option<&Snapshot>,
    session: &WorkflowSession,
    proceed: InitialStateProceed<'_>,
  ) -> Result<AnyState, RuntimeError> {
    self.initial_state_at(0, props, snapshot, session, proceed)
  }

  fn on_props_changed(
    &self,
    old: &dyn Any,
    new: &dyn Any,
    state: AnyState,
    session: &WorkflowSession,
    proceed: PropsChangedProceed<'_>,
  ) -> Result<AnyState, RuntimeError> {
    self.props_changed_at(0, old, new, state, session, proceed)
  }

  fn on_render(
    &self,
    props: &dyn Any,
    state: &dyn Any,
    session: &WorkflowSession,
    proceed: RenderProceed<'_>,
  ) -> Result<AnyRendering, RuntimeError> {
    self.render_at(0, props, state, session, proceed)
  }

  fn on_snapshot_state(
    &self,
    state: &dyn Any,
    session: &WorkflowSession,
    proceed: SnapshotProceed<'_>,
  ) -> Result<Option<Snapshot>, RuntimeError> {
    self.snapshot_at(0, state, session, proceed)
  }

  fn on_render_child(
    &self,
    child: &WorkflowIdentity,
    key: &str,
    props: &dyn Any,
    session: &WorkflowSession,
    proceed: RenderChildProceed<'_>,
  ) -> Result<AnyRendering, RuntimeError> {
    self.render_child_at(0, child, key, props, session, proceed)
  }

  fn on_running_side_effect(
    &self,
    key: &str,
    effect: TaskFuture,
    session: &WorkflowSession,
    proceed: SideEffectProceed<'_>,
  ) {
    self.side_effect_at(0, key, effect, session, proceed)
  }

  fn on_action_sent(
    &self,
    action: AnyAction,
    session: &WorkflowSession,
    proceed: ActionSentProceed<'_>,
  ) -> Result<(), SendError> {
    self.action_sent_at(0, action, session, proceed)
  }
}

/// Logs every intercepted operation through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingInterceptor;

impl WorkflowInterceptor for TracingInterceptor {
  fn on_session_started(&self, session: &WorkflowSession) {
    info!(
      runner_id = %session.runner_id,
      session_id = session.session_id,
      parent_session_id = ?session.parent_session_id,
      identity = %session.identity,
      key = %session.render_key,
      "node_started"
    );
  }

  fn on_session_finished(&self, session: &WorkflowSession) {
    info!(
      runner_id = %session.runner_id,
      session_id = session.session_id,
      identity = %session.identity,
      key = %session.render_key,
      "node_finished"
    );
  }

  fn on_initial_state(
    &self,
    props: &dyn Any,
    snapshot: Option<&Snapshot>,
    session: &WorkflowSession,
    proceed: InitialStateProceed<'_>,
  ) -> Result<AnyState, RuntimeError> {
    debug!(
      session_id = session.session_id,
      restored = snapshot.is_some(),
      "initial_state"
    );
    let result = proceed(props, snapshot);
    debug!(session_id = session.session_id, ok = result.is_ok(), "initial_state_done");
    result
  }

  fn on_props_changed(
    &self,
    old: &dyn Any,
    new: &dyn Any,
    state: AnyState,
    session: &WorkflowSession,
    proceed: PropsChangedProceed<'_>,
  ) -> Result<AnyState, RuntimeError> {
    debug!(session_id = session.session_id, "props_changed");
    proceed(old, new, state)
  }

  fn on_render(
    &self,
    props: &dyn Any,
    state: &dyn Any,
    session: &WorkflowSession,
    proceed: RenderProceed<'_>,
  ) -> Result<AnyRendering, RuntimeError> {
    debug!(session_id = session.session_id, identity = %session.identity, "render");
    let result = proceed(props, state);
    if let Err(e) = &result {
      debug!(session_id = session.session_id, error = %e, "render_failed");
    }
    result
  }

  fn on_snapshot_state(
    &self,
    state: &dyn Any,
    session: &WorkflowSession,
    proceed: SnapshotProceed<'_>,
  ) -> Result<Option<Snapshot>, RuntimeError> {
    let result = proceed(state);
    if let Ok(snapshot) = &result {
      debug!(
        session_id = session.session_id,
        bytes = snapshot.as_ref().map_or(0, Snapshot::len),
        "snapshot_state"
      );
    }
    result
  }

  fn on_render_child(
    &self,
    child: &WorkflowIdentity,
    key: &str,
    props: &dyn Any,
    session: &WorkflowSession,
    proceed: RenderChildProceed<'_>,
  ) -> Result<AnyRendering, RuntimeError> {
    debug!(
      session_id = session.session_id,
      child = %child,
      key = %key,
      "render_child"
    );
    proceed(props)
  }

  fn on_running_side_effect(
    &self,
    key: &str,
    effect: TaskFuture,
    session: &WorkflowSession,
    proceed: SideEffectProceed<'_>,
  ) {
    info!(session_id = session.session_id, key = %key, "task_started");
    proceed(effect)
  }

  fn on_action_sent(
    &self,
    action: AnyAction,
    session: &WorkflowSession,
    proceed: ActionSentProceed<'_>,
  ) -> Result<(), SendError> {
    debug!(session_id = session.session_id, action = %action.name(), "action_sent");
    proceed(action)
  }
}
