//! Reconciliation of a node's children across render passes.
//!
//! Children declared during a pass move from `active` into `staging`: matched ones keep
//! their node (and state), unmatched ones are created fresh. Committing tears down
//! whatever is left in `active` and promotes `staging`. Aborting puts matched children
//! back and discards the fresh ones.

use std::any::Any;
use std::collections::HashSet;
use std::mem;

use canopy_snapshot::ChildFrame;
use tracing::debug;

use crate::action::{Action, AnyAction};
use crate::error::RuntimeError;
use crate::identity::WorkflowNodeId;
use crate::node::{Dispatch, NodeDescription, NodeScope, WorkflowNode};
use crate::workflow::Workflow;

pub(crate) type OutputHandler<P, C> = Box<dyn Fn(<C as Workflow>::Output) -> Action<P> + Send>;

/// A child node of a `P` parent, with its concrete workflow type erased.
pub(crate) trait AnyChild<P: Workflow>: Send {
  fn id(&self) -> &WorkflowNodeId;
  fn session_id(&self) -> u64;
  fn as_any(&self) -> &dyn Any;
  fn as_any_mut(&mut self) -> &mut dyn Any;
  fn dispatch(
    &mut self,
    rest: &[u64],
    action: AnyAction,
  ) -> Result<Dispatch<Action<P>>, RuntimeError>;
  fn settle(&mut self, rest: &[u64], commit: bool);
  fn commit_teardown(&mut self);
  fn commit_startup(&mut self) -> Result<(), RuntimeError>;
  fn abort_pass(&mut self);
  fn cancel(&mut self);
  fn snapshot_frame(&self) -> Result<Option<ChildFrame>, RuntimeError>;
  fn describe(&self) -> NodeDescription;
}

pub(crate) struct ChildNode<P: Workflow, C: Workflow> {
  node: WorkflowNode<C>,
  handler: OutputHandler<P, C>,
}

impl<P: Workflow, C: Workflow> AnyChild<P> for ChildNode<P, C> {
  fn id(&self) -> &WorkflowNodeId {
    self.node.id()
  }

  fn session_id(&self) -> u64 {
    self.node.session_id()
  }

  fn as_any(&self) -> &dyn Any {
    self
  }

  fn as_any_mut(&mut self) -> &mut dyn Any {
    self
  }

  fn dispatch(
    &mut self,
    rest: &[u64],
    action: AnyAction,
  ) -> Result<Dispatch<Action<P>>, RuntimeError> {
    Ok(match self.node.dispatch(rest, action)? {
      Dispatch::Dropped => Dispatch::Dropped,
      Dispatch::Applied {
        output,
        state_changed,
      } => Dispatch::Applied {
        output: output.map(|output| (self.handler)(output)),
        state_changed,
      },
    })
  }

  fn settle(&mut self, rest: &[u64], commit: bool) {
    self.node.settle(rest, commit)
  }

  fn commit_teardown(&mut self) {
    self.node.commit_teardown()
  }

  fn commit_startup(&mut self) -> Result<(), RuntimeError> {
    self.node.commit_startup()
  }

  fn abort_pass(&mut self) {
    self.node.abort_pass()
  }

  fn cancel(&mut self) {
    self.node.cancel()
  }

  fn snapshot_frame(&self) -> Result<Option<ChildFrame>, RuntimeError> {
    self.node.snapshot_frame()
  }

  fn describe(&self) -> NodeDescription {
    self.node.describe()
  }
}

struct Staged<P: Workflow> {
  child: Box<dyn AnyChild<P>>,
  /// Created during this pass rather than carried over.
  fresh: bool,
}

pub(crate) struct SubtreeManager<P: Workflow> {
  active: Vec<Box<dyn AnyChild<P>>>,
  staging: Vec<Staged<P>>,
  staged_ids: HashSet<WorkflowNodeId>,
  /// Child frames restored from a snapshot, consulted until the first committed pass.
  restored: Vec<ChildFrame>,
}

impl<P: Workflow> SubtreeManager<P> {
  pub fn new(restored: Vec<ChildFrame>) -> Self {
    Self {
      active: Vec::new(),
      staging: Vec::new(),
      staged_ids: HashSet::new(),
      restored,
    }
  }

  pub fn render_child<C: Workflow>(
    &mut self,
    scope: &NodeScope,
    workflow: C,
    props: C::Props,
    key: &str,
    handler: OutputHandler<P, C>,
  ) -> Result<C::Rendering, RuntimeError> {
    let id = WorkflowNodeId::new(workflow.identity(), key);
    if !self.staged_ids.insert(id.clone()) {
      return Err(RuntimeError::DuplicateChild {
        identity: id.identity.to_string(),
        key: id.key,
      });
    }

    // An equal identity backed by another concrete type is a different node: the old one
    // stays in `active` and is torn down on commit.
    let matched = self.active.iter().position(|child| {
      child.id() == &id && child.as_any().is::<ChildNode<P, C>>()
    });
    if matched.is_none() && self.active.iter().any(|child| child.id() == &id) {
      debug!(node = %id, "child_type_changed");
    }

    if let Some(position) = matched {
      let mut existing = self.active.remove(position);
      let result = match existing.as_any_mut().downcast_mut::<ChildNode<P, C>>() {
        Some(child) => {
          child.handler = handler;
          child.node.render(Some(workflow), props)
        }
        None => Err(RuntimeError::type_mismatch::<C>()),
      };
      self.staging.push(Staged {
        child: existing,
        fresh: false,
      });
      return result;
    }

    let snapshot = id.frame_id().and_then(|frame_id| {
      self
        .restored
        .iter()
        .find(|frame| frame.id == frame_id)
        .map(|frame| frame.snapshot.clone())
    });
    let scope = scope.child(&id);
    let node = WorkflowNode::new(id, workflow, props.clone(), snapshot, scope)?;
    let mut child = ChildNode { node, handler };
    let result = child.node.render(None, props);
    self.staging.push(Staged {
      child: Box::new(child),
      fresh: true,
    });
    result
  }

  pub fn commit_teardown(&mut self) {
    for mut removed in mem::take(&mut self.active) {
      debug!(
        session_id = removed.session_id(),
        node = %removed.id(),
        "child_removed"
      );
      removed.cancel();
    }
    self.active = self.staging.drain(..).map(|staged| staged.child).collect();
    self.staged_ids.clear();
    self.restored.clear();
    for child in &mut self.active {
      child.commit_teardown();
    }
  }

  pub fn commit_startup(&mut self) -> Result<(), RuntimeError> {
    for child in &mut self.active {
      child.commit_startup()?;
    }
    Ok(())
  }

  pub fn abort_pass(&mut self) {
    for staged in self.staging.drain(..) {
      let mut child = staged.child;
      if staged.fresh {
        child.cancel();
      } else {
        child.abort_pass();
        self.active.push(child);
      }
    }
    self.staged_ids.clear();
  }

  pub fn cancel_all(&mut self) {
    for staged in self.staging.drain(..) {
      let mut child = staged.child;
      child.cancel();
    }
    for mut child in self.active.drain(..) {
      child.cancel();
    }
    self.staged_ids.clear();
  }

  pub fn dispatch(
    &mut self,
    session_id: u64,
    rest: &[u64],
    action: AnyAction,
  ) -> Result<Dispatch<Action<P>>, RuntimeError> {
    match self.find(session_id) {
      Some(child) => child.dispatch(rest, action),
      None => {
        debug!(session_id, action = %action.name(), "action_target_gone");
        Ok(Dispatch::Dropped)
      }
    }
  }

  pub fn settle(&mut self, session_id: u64, rest: &[u64], commit: bool) {
    if let Some(child) = self.find(session_id) {
      child.settle(rest, commit);
    }
  }

  fn find(&mut self, session_id: u64) -> Option<&mut Box<dyn AnyChild<P>>> {
    self
      .active
      .iter_mut()
      .find(|child| child.session_id() == session_id)
  }

  pub fn snapshot_children(&self) -> Result<Vec<ChildFrame>, RuntimeError> {
    let mut frames = Vec::with_capacity(self.active.len());
    for child in &self.active {
      if let Some(frame) = child.snapshot_frame()? {
        frames.push(frame);
      }
    }
    Ok(frames)
  }

  pub fn describe_children(&self) -> Vec<NodeDescription> {
    self.active.iter().map(|child| child.describe()).collect()
  }
}
