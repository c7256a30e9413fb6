//! The top-level driver of a workflow tree.

use std::fmt;
use std::sync::Arc;

use canopy_snapshot::TreeSnapshot;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::identity::WorkflowNodeId;
use crate::interceptor::{InterceptorChain, WorkflowInterceptor};
use crate::node::{Dispatch, NodeDescription, NodeScope, TreeShared, WorkflowNode};
use crate::queue::{ActionReceiver, QueuedAction, action_queue};
use crate::workflow::Workflow;

/// Construction-time inputs for a [`WorkflowRunner`].
#[derive(Default)]
pub struct RunnerOptions {
  /// Snapshot to restore the tree from.
  pub snapshot: Option<TreeSnapshot>,
  /// Interceptors, outermost first. Fixed for the runner's lifetime.
  pub interceptors: Vec<Arc<dyn WorkflowInterceptor>>,
  pub config: RuntimeConfig,
}

/// The result of one render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderingAndSnapshot<R> {
  pub rendering: R,
  pub snapshot: TreeSnapshot,
}

/// What woke up [`WorkflowRunner::next_output`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingResult<O> {
  /// New props arrived.
  PropsUpdated,
  /// One or more actions were applied. Holds the root's output, if it emitted one.
  ActionApplied {
    output: Option<O>,
    /// Whether any node's state changed. When false, rendering again would produce
    /// the same tree.
    state_changed: bool,
  },
}

impl<O> ProcessingResult<O> {
  /// Whether the tree has to be rendered again to reflect this result.
  pub fn state_changed(&self) -> bool {
    match self {
      Self::PropsUpdated => true,
      Self::ActionApplied { state_changed, .. } => *state_changed,
    }
  }

  pub fn output(&self) -> Option<&O> {
    match self {
      Self::PropsUpdated => None,
      Self::ActionApplied { output, .. } => output.as_ref(),
    }
  }

  pub fn into_output(self) -> Option<O> {
    match self {
      Self::PropsUpdated => None,
      Self::ActionApplied { output, .. } => output,
    }
  }
}

enum Event<P> {
  Props(P),
  Action(QueuedAction),
}

/// Drives a tree of workflow nodes.
///
/// Props arrive through a `watch` channel. Render passes and action application both
/// happen on the caller's task, one at a time; only tasks declared by workflows run
/// concurrently, and they reach the tree solely through the action queue.
///
/// # Usage
///
/// ```ignore
/// let (props_tx, props_rx) = watch::channel(props);
/// let mut runner = WorkflowRunner::new(root, props_rx, RunnerOptions::default());
///
/// let mut current = runner.next_rendering()?;
/// loop {
///   let result = runner.next_output().await?;
///   if result.state_changed() {
///     current = runner.next_rendering()?;
///   }
///   if let Some(output) = result.into_output() {
///     handle(output);
///   }
/// }
/// ```
pub struct WorkflowRunner<W: Workflow> {
  id: Uuid,
  name: String,
  workflow: Option<W>,
  props: watch::Receiver<W::Props>,
  props_open: bool,
  current_props: W::Props,
  root: Option<WorkflowNode<W>>,
  restore: Option<TreeSnapshot>,
  receiver: ActionReceiver,
  shared: Arc<TreeShared>,
  config: RuntimeConfig,
  cancel: CancellationToken,
}

impl<W: Workflow> WorkflowRunner<W> {
  /// Create a runner. The props value current in `props` is the initial props.
  pub fn new(workflow: W, mut props: watch::Receiver<W::Props>, options: RunnerOptions) -> Self {
    let id = Uuid::new_v4();
    let (queue, receiver) = action_queue();
    let interceptor: Arc<dyn WorkflowInterceptor> =
      Arc::new(InterceptorChain::new(options.interceptors));
    let current_props = props.borrow_and_update().clone();
    let name = options
      .config
      .name
      .clone()
      .unwrap_or_else(|| id.to_string());

    Self {
      id,
      name,
      workflow: Some(workflow),
      props,
      props_open: true,
      current_props,
      root: None,
      restore: options.snapshot,
      receiver,
      shared: Arc::new(TreeShared::new(queue, interceptor, id)),
      config: options.config,
      cancel: CancellationToken::new(),
    }
  }

  pub fn id(&self) -> Uuid {
    self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Cancelling this token cancels the whole tree. It does not wake a pending
  /// `next_output`; later calls fail with [`RuntimeError::Cancelled`].
  pub fn cancellation_token(&self) -> CancellationToken {
    self.cancel.clone()
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  /// Run one full render pass with the current props.
  ///
  /// The pass is all-or-nothing: on error no child or task changes are committed and
  /// every node keeps its previous props and state.
  #[instrument(name = "render_pass", skip(self), fields(runner_id = %self.id, runner = %self.name))]
  pub fn next_rendering(&mut self) -> Result<RenderingAndSnapshot<W::Rendering>, RuntimeError> {
    self.ensure_live()?;
    Handle::try_current().map_err(|_| RuntimeError::NoTokioRuntime)?;

    if self.root.is_none() {
      let Some(workflow) = self.workflow.take() else {
        return Err(RuntimeError::Cancelled);
      };
      let id = WorkflowNodeId::new(workflow.identity(), "");
      let scope = NodeScope::root(self.shared.clone(), &id, self.cancel.child_token());
      let root = WorkflowNode::new(
        id,
        workflow,
        self.current_props.clone(),
        self.restore.take(),
        scope,
      )?;
      self.root = Some(root);
    }
    let Some(root) = self.root.as_mut() else {
      return Err(RuntimeError::Cancelled);
    };

    let rendering = match root.render(None, self.current_props.clone()) {
      Ok(rendering) => rendering,
      Err(e) => {
        root.abort_pass();
        warn!(error = %e, "render_pass_aborted");
        return Err(e);
      }
    };

    root.commit_teardown();
    root.commit_startup()?;
    let snapshot = root.snapshot()?;
    debug!(frames = snapshot.frame_count(), "render_pass_committed");

    Ok(RenderingAndSnapshot {
      rendering,
      snapshot,
    })
  }

  /// Wait for new props or for an action, apply it, and report what happened.
  ///
  /// Props take priority when both are ready. Props equal to the current value are
  /// ignored. Actions whose sender was torn down are dropped without waking the caller.
  /// An error from an action leaves the tree in its pre-action state. Call
  /// [`next_rendering`](Self::next_rendering) after every result whose
  /// [`state_changed`](ProcessingResult::state_changed) is true.
  pub async fn next_output(&mut self) -> Result<ProcessingResult<W::Output>, RuntimeError> {
    self.ensure_live()?;
    let deadline = self
      .config
      .frame_timeout()
      .map(|timeout| Instant::now() + timeout);
    let mut applied = false;
    let mut state_changed = false;

    loop {
      let event = match deadline {
        Some(deadline) if applied => match timeout_at(deadline, self.next_event()).await {
          Ok(event) => event?,
          Err(_) => {
            return Ok(ProcessingResult::ActionApplied {
              output: None,
              state_changed,
            });
          }
        },
        _ => self.next_event().await?,
      };

      match event {
        Event::Props(props) => {
          self.current_props = props;
          info!(runner_id = %self.id, "props_updated");
          return Ok(ProcessingResult::PropsUpdated);
        }
        Event::Action(queued) => {
          let Some((output, changed)) = self.process(queued)? else {
            continue;
          };
          state_changed |= changed;
          if output.is_none() && deadline.is_some() {
            applied = true;
            continue;
          }
          return Ok(ProcessingResult::ActionApplied {
            output,
            state_changed,
          });
        }
      }
    }
  }

  async fn next_event(&mut self) -> Result<Event<W::Props>, RuntimeError> {
    loop {
      tokio::select! {
        biased;
        changed = self.props.changed(), if self.props_open => match changed {
          Ok(()) => {
            let props = self.props.borrow_and_update().clone();
            if props != self.current_props {
              return Ok(Event::Props(props));
            }
            debug!(runner_id = %self.id, "props_unchanged");
          }
          Err(_) => {
            debug!(runner_id = %self.id, "props_source_closed");
            self.props_open = false;
          }
        },
        queued = self.receiver.recv() => match queued {
          Some(queued) => return Ok(Event::Action(queued)),
          None => return Err(RuntimeError::Cancelled),
        },
      }
    }
  }

  /// Apply one queued action, returning the root output and whether any state changed.
  /// `None` means it was stale and dropped.
  fn process(
    &mut self,
    queued: QueuedAction,
  ) -> Result<Option<(Option<W::Output>, bool)>, RuntimeError> {
    let name = queued.action.name().to_string();
    if queued.origin.is_cancelled() {
      debug!(runner_id = %self.id, action = %name, "action_dropped_stale");
      return Ok(None);
    }
    let Some(root) = self.root.as_mut() else {
      return Ok(None);
    };
    let Some((&head, rest)) = queued.path.split_first() else {
      return Ok(None);
    };
    if head != root.session_id() {
      debug!(runner_id = %self.id, action = %name, "action_dropped_stale");
      return Ok(None);
    }

    match root.dispatch(rest, queued.action) {
      Ok(Dispatch::Dropped) => {
        root.settle(rest, false);
        Ok(None)
      }
      Ok(Dispatch::Applied {
        output,
        state_changed,
      }) => {
        root.settle(rest, true);
        Ok(Some((output, state_changed)))
      }
      Err(e) => {
        root.settle(rest, false);
        error!(runner_id = %self.id, action = %name, error = %e, "action_failed");
        Err(e)
      }
    }
  }

  /// Tear down the whole tree. Later calls to `next_rendering` and `next_output` fail
  /// with [`RuntimeError::Cancelled`].
  pub fn cancel_runtime(&mut self, cause: Option<&str>) {
    if !self.cancel.is_cancelled() {
      info!(runner_id = %self.id, cause = cause.unwrap_or("none"), "runtime_cancelled");
    }
    self.cancel.cancel();
    if let Some(mut root) = self.root.take() {
      root.cancel();
    }
    self.workflow = None;
  }

  fn ensure_live(&mut self) -> Result<(), RuntimeError> {
    if self.cancel.is_cancelled() {
      self.cancel_runtime(None);
      return Err(RuntimeError::Cancelled);
    }
    Ok(())
  }

  /// Describe the live tree, or `None` before the first render.
  pub fn describe_tree(&self) -> Option<NodeDescription> {
    self.root.as_ref().map(WorkflowNode::describe)
  }

  /// The root's current state, or `None` before the first render.
  pub fn root_state(&self) -> Option<&W::State> {
    self.root.as_ref().map(WorkflowNode::state)
  }

  /// Drive render passes until `cancel` fires, publishing every rendering on
  /// `renderings` and every root output on `outputs`. With
  /// `render_only_when_state_changed` set, actions that changed no state are not
  /// followed by a render pass.
  #[instrument(name = "render_loop", skip_all, fields(runner_id = %self.id, runner = %self.name))]
  pub async fn start(
    mut self,
    renderings: watch::Sender<Option<RenderingAndSnapshot<W::Rendering>>>,
    outputs: mpsc::Sender<W::Output>,
    cancel: CancellationToken,
  ) -> Result<(), RuntimeError> {
    info!("starting workflow runner");

    let mut render = true;
    let result = loop {
      if render {
        match self.next_rendering() {
          Ok(rendering) => {
            renderings.send_replace(Some(rendering));
          }
          Err(e) => break Err(e),
        }
      }

      let output = tokio::select! {
        _ = cancel.cancelled() => {
          info!("workflow runner cancelled");
          break Ok(());
        }
        output = self.next_output() => output,
      };

      let output = match output {
        Ok(output) => output,
        Err(e) => break Err(e),
      };
      render = output.state_changed() || !self.config.render_only_when_state_changed;
      if !render {
        debug!("render_skipped_state_unchanged");
      }
      if let Some(output) = output.into_output()
        && outputs.send(output).await.is_err()
      {
        warn!("output receiver dropped");
      }
    };

    if let Err(e) = &result
      && !e.is_cancellation()
    {
      error!(error = %e, "workflow runner failed");
    }
    self.cancel_runtime(Some("render loop stopped"));
    result
  }
}

impl<W: Workflow> Drop for WorkflowRunner<W> {
  fn drop(&mut self) {
    self.cancel_runtime(None);
  }
}

impl<W: Workflow> fmt::Debug for WorkflowRunner<W> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkflowRunner")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("cancelled", &self.cancel.is_cancelled())
      .finish()
  }
}
