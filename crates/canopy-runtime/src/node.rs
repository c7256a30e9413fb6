//! One running workflow instance and the tree-wide state its scope shares.

use std::any::Any;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use canopy_snapshot::{ChildFrame, Snapshot, TreeSnapshot};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::action::{Action, AnyAction};
use crate::context::RenderContext;
use crate::error::RuntimeError;
use crate::identity::WorkflowNodeId;
use crate::interceptor::{AnyRendering, AnyState, WorkflowInterceptor, WorkflowSession};
use crate::queue::ActionSender;
use crate::sink::Sink;
use crate::subtree::SubtreeManager;
use crate::tasks::{TaskDescription, TaskSet};
use crate::workflow::Workflow;

/// State shared by every node of one tree.
pub(crate) struct TreeShared {
  pub queue: ActionSender,
  pub interceptor: Arc<dyn WorkflowInterceptor>,
  pub runner_id: Uuid,
  next_session_id: AtomicU64,
}

impl TreeShared {
  pub fn new(queue: ActionSender, interceptor: Arc<dyn WorkflowInterceptor>, runner_id: Uuid) -> Self {
    Self {
      queue,
      interceptor,
      runner_id,
      next_session_id: AtomicU64::new(0),
    }
  }

  fn next_session_id(&self) -> u64 {
    self.next_session_id.fetch_add(1, Ordering::Relaxed)
  }
}

/// Where a node sits: its session, the session-id path from the root, and its
/// cancellation token (a child of its parent's).
pub(crate) struct NodeScope {
  pub session: Arc<WorkflowSession>,
  pub path: Arc<[u64]>,
  pub token: CancellationToken,
  pub shared: Arc<TreeShared>,
}

impl NodeScope {
  pub fn root(shared: Arc<TreeShared>, id: &WorkflowNodeId, token: CancellationToken) -> Self {
    Self::new(shared, id, None, Vec::new(), token)
  }

  pub fn child(&self, id: &WorkflowNodeId) -> Self {
    Self::new(
      self.shared.clone(),
      id,
      Some(self.session.session_id),
      self.path.to_vec(),
      self.token.child_token(),
    )
  }

  fn new(
    shared: Arc<TreeShared>,
    id: &WorkflowNodeId,
    parent_session_id: Option<u64>,
    mut path: Vec<u64>,
    token: CancellationToken,
  ) -> Self {
    let session_id = shared.next_session_id();
    path.push(session_id);
    let session = WorkflowSession {
      identity: id.identity.clone(),
      render_key: id.key.clone(),
      session_id,
      parent_session_id,
      runner_id: shared.runner_id,
    };
    Self {
      session: Arc::new(session),
      path: path.into(),
      token,
      shared,
    }
  }

  pub fn sink<W: Workflow>(&self, origin: CancellationToken) -> Sink<W> {
    Sink::new(
      self.shared.queue.clone(),
      self.path.clone(),
      origin,
      self.session.clone(),
      self.shared.interceptor.clone(),
    )
  }
}

/// Outcome of routing an action down the tree.
pub(crate) enum Dispatch<T> {
  /// The target node no longer exists.
  Dropped,
  /// Applied, with the output that bubbled out of the addressed subtree and whether
  /// any node along the way changed its state.
  Applied {
    output: Option<T>,
    state_changed: bool,
  },
}

/// Debug dump of a live node and its subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeDescription {
  pub identity: String,
  pub key: String,
  pub session_id: u64,
  pub tasks: Vec<TaskDescription>,
  pub children: Vec<NodeDescription>,
}

impl NodeDescription {
  /// Find a direct child by render key.
  pub fn child(&self, key: &str) -> Option<&NodeDescription> {
    self.children.iter().find(|child| child.key == key)
  }
}

/// Values to restore if the current render pass fails.
struct Rollback<W: Workflow> {
  workflow: Option<W>,
  props: Option<W::Props>,
  state: Option<W::State>,
}

pub(crate) struct WorkflowNode<W: Workflow> {
  id: WorkflowNodeId,
  workflow: W,
  props: W::Props,
  state: W::State,
  /// Result of the action being dispatched, committed by `settle`.
  pending_state: Option<W::State>,
  rollback: Option<Rollback<W>>,
  subtree: SubtreeManager<W>,
  tasks: TaskSet<W>,
  scope: NodeScope,
}

pub(crate) fn downcast_ref<T: 'static>(value: &dyn Any) -> Result<&T, RuntimeError> {
  value
    .downcast_ref::<T>()
    .ok_or_else(RuntimeError::type_mismatch::<T>)
}

pub(crate) fn downcast_box<T: 'static>(value: Box<dyn Any + Send>) -> Result<T, RuntimeError> {
  value
    .downcast::<T>()
    .map(|value| *value)
    .map_err(|_| RuntimeError::type_mismatch::<T>())
}

impl<W: Workflow> WorkflowNode<W> {
  /// Create a node and compute its initial state. `snapshot` is the subtree frame
  /// restored for this node, if any.
  pub fn new(
    id: WorkflowNodeId,
    workflow: W,
    props: W::Props,
    snapshot: Option<TreeSnapshot>,
    scope: NodeScope,
  ) -> Result<Self, RuntimeError> {
    let interceptor = scope.shared.interceptor.clone();
    interceptor.on_session_started(&scope.session);

    let (state_snapshot, restored_children) = snapshot
      .map(TreeSnapshot::into_parts)
      .unwrap_or_default();

    let state = interceptor
      .on_initial_state(
        &props,
        state_snapshot.as_ref(),
        &scope.session,
        Box::new(|props: &dyn Any, snapshot: Option<&Snapshot>| -> Result<AnyState, RuntimeError> {
          let props = downcast_ref::<W::Props>(props)?;
          Ok(Box::new(workflow.initial_state(props, snapshot)) as AnyState)
        }),
      )
      .and_then(downcast_box::<W::State>);

    let state = match state {
      Ok(state) => state,
      Err(e) => {
        scope.token.cancel();
        interceptor.on_session_finished(&scope.session);
        return Err(e);
      }
    };

    debug!(
      session_id = scope.session.session_id,
      node = %id,
      restored = state_snapshot.is_some(),
      "node_created"
    );

    Ok(Self {
      id,
      workflow,
      props,
      state,
      pending_state: None,
      rollback: None,
      subtree: SubtreeManager::new(restored_children),
      tasks: TaskSet::default(),
      scope,
    })
  }

  pub fn id(&self) -> &WorkflowNodeId {
    &self.id
  }

  pub fn session_id(&self) -> u64 {
    self.scope.session.session_id
  }

  pub fn session(&self) -> &WorkflowSession {
    &self.scope.session
  }

  pub fn state(&self) -> &W::State {
    &self.state
  }

  /// Render into staging. `workflow` replaces the stored workflow value when given.
  /// Nothing is committed until `commit_teardown`/`commit_startup`; on error the
  /// caller must `abort_pass`.
  pub fn render(&mut self, workflow: Option<W>, props: W::Props) -> Result<W::Rendering, RuntimeError> {
    let mut rollback = Rollback {
      workflow: workflow.map(|workflow| mem::replace(&mut self.workflow, workflow)),
      props: None,
      state: None,
    };

    if props != self.props {
      let old_props = mem::replace(&mut self.props, props);
      let changed = self.props_changed(&old_props);
      rollback.props = Some(old_props);
      match changed {
        Ok(state) => rollback.state = Some(mem::replace(&mut self.state, state)),
        Err(e) => {
          self.rollback = Some(rollback);
          return Err(e);
        }
      }
    }
    self.rollback = Some(rollback);

    let Self {
      workflow,
      props,
      state,
      subtree,
      tasks,
      scope,
      ..
    } = self;
    let scope: &NodeScope = scope;
    let mut ctx = RenderContext::new(subtree, tasks, scope);
    let rendering = scope.shared.interceptor.on_render(
      &*props,
      &*state,
      &scope.session,
      Box::new(|props: &dyn Any, state: &dyn Any| -> Result<AnyRendering, RuntimeError> {
        let props = downcast_ref::<W::Props>(props)?;
        let state = downcast_ref::<W::State>(state)?;
        let rendering = workflow.render(props, state, &mut ctx)?;
        Ok(Box::new(rendering) as AnyRendering)
      }),
    )?;
    downcast_box::<W::Rendering>(rendering)
  }

  fn props_changed(&self, old: &W::Props) -> Result<W::State, RuntimeError> {
    let workflow = &self.workflow;
    let state = self.scope.shared.interceptor.on_props_changed(
      old,
      &self.props,
      Box::new(self.state.clone()),
      &self.scope.session,
      Box::new(|old: &dyn Any, new: &dyn Any, state: AnyState| -> Result<AnyState, RuntimeError> {
        let old = downcast_ref::<W::Props>(old)?;
        let new = downcast_ref::<W::Props>(new)?;
        let state = downcast_box::<W::State>(state)?;
        Ok(Box::new(workflow.on_props_changed(old, new, state)) as AnyState)
      }),
    )?;
    downcast_box::<W::State>(state)
  }

  /// First commit phase: cancel everything the pass removed, tree-wide.
  pub fn commit_teardown(&mut self) {
    self.rollback = None;
    self.tasks.teardown_removed(&self.scope);
    self.subtree.commit_teardown();
  }

  /// Second commit phase: start every task the pass added, tree-wide.
  pub fn commit_startup(&mut self) -> Result<(), RuntimeError> {
    self.tasks.start_new(&self.scope)?;
    self.subtree.commit_startup()
  }

  /// Undo a failed pass: restore workflow, props and state, and drop staging.
  pub fn abort_pass(&mut self) {
    if let Some(rollback) = self.rollback.take() {
      if let Some(workflow) = rollback.workflow {
        self.workflow = workflow;
      }
      if let Some(props) = rollback.props {
        self.props = props;
      }
      if let Some(state) = rollback.state {
        self.state = state;
      }
    }
    self.tasks.abort_pass();
    self.subtree.abort_pass();
  }

  /// Tear down this node: children first, then tasks, then the node's own scope.
  pub fn cancel(&mut self) {
    self.subtree.cancel_all();
    self.tasks.cancel_all(&self.scope);
    self.scope.token.cancel();
    self.scope.shared.interceptor.on_session_finished(&self.scope.session);
    info!(
      session_id = self.scope.session.session_id,
      node = %self.id,
      "node_torn_down"
    );
  }

  /// Route an action down `rest` (session ids below this node) and apply it, along
  /// with every handler action its output produces on the way back up.
  pub fn dispatch(
    &mut self,
    rest: &[u64],
    action: AnyAction,
  ) -> Result<Dispatch<W::Output>, RuntimeError> {
    match rest.split_first() {
      None => {
        let action = action.downcast::<W>()?;
        self.apply(action)
      }
      Some((&child, rest)) => match self.subtree.dispatch(child, rest, action)? {
        Dispatch::Dropped => Ok(Dispatch::Dropped),
        Dispatch::Applied {
          output: None,
          state_changed,
        } => Ok(Dispatch::Applied {
          output: None,
          state_changed,
        }),
        Dispatch::Applied {
          output: Some(action),
          state_changed: child_changed,
        } => {
          let mut applied = self.apply(action)?;
          if let Dispatch::Applied { state_changed, .. } = &mut applied {
            *state_changed |= child_changed;
          }
          Ok(applied)
        }
      },
    }
  }

  fn apply(&mut self, action: Action<W>) -> Result<Dispatch<W::Output>, RuntimeError> {
    let name = action.name().to_string();
    let current = self.pending_state.as_ref().unwrap_or(&self.state);
    let applied = action.apply(&self.props, current)?;
    if applied.state_changed {
      self.pending_state = Some(applied.state);
    }
    debug!(
      session_id = self.scope.session.session_id,
      action = %name,
      state_changed = applied.state_changed,
      output = applied.output.is_some(),
      "action_applied"
    );
    Ok(Dispatch::Applied {
      output: applied.output,
      state_changed: applied.state_changed,
    })
  }

  /// Commit or discard the states staged by `dispatch` along `rest`.
  pub fn settle(&mut self, rest: &[u64], commit: bool) {
    let pending = self.pending_state.take();
    if commit && let Some(state) = pending {
      self.state = state;
    }
    if let Some((&child, rest)) = rest.split_first() {
      self.subtree.settle(child, rest, commit);
    }
  }

  pub fn snapshot(&self) -> Result<TreeSnapshot, RuntimeError> {
    let workflow = &self.workflow;
    let state = self.scope.shared.interceptor.on_snapshot_state(
      &self.state,
      &self.scope.session,
      Box::new(|state: &dyn Any| -> Result<Option<Snapshot>, RuntimeError> {
        let state = downcast_ref::<W::State>(state)?;
        Ok(workflow.snapshot_state(state))
      }),
    )?;
    Ok(TreeSnapshot::new(state, self.subtree.snapshot_children()?))
  }

  /// Frame for this node inside its parent's snapshot, or `None` if its identity
  /// cannot be serialized.
  pub fn snapshot_frame(&self) -> Result<Option<ChildFrame>, RuntimeError> {
    let Some(id) = self.id.frame_id() else {
      return Ok(None);
    };
    Ok(Some(ChildFrame {
      id,
      snapshot: self.snapshot()?,
    }))
  }

  pub fn describe(&self) -> NodeDescription {
    NodeDescription {
      identity: self.id.identity.to_string(),
      key: self.id.key.clone(),
      session_id: self.scope.session.session_id,
      tasks: self.tasks.describe(),
      children: self.subtree.describe_children(),
    }
  }
}
