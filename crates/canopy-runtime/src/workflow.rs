//! The workflow trait and the rendering adapter.

use canopy_snapshot::Snapshot;

use crate::action::Action;
use crate::context::RenderContext;
use crate::error::RuntimeError;
use crate::identity::WorkflowIdentity;

/// A state machine that renders a value from its props and state.
///
/// A workflow value is a description: the runtime keeps one node per declared
/// `(identity, key)` and hands it the latest workflow value on every render pass.
pub trait Workflow: Send + Sized + 'static {
  /// Input from the parent. A value equal to the previous one is not a change.
  type Props: Clone + PartialEq + Send + Sync + 'static;
  /// Private state, mutated only by actions and `on_props_changed`.
  type State: Clone + Send + 'static;
  /// Value emitted to the parent's handler.
  type Output: Send + 'static;
  /// Value produced by each render pass.
  type Rendering: Send + 'static;

  fn identity(&self) -> WorkflowIdentity {
    WorkflowIdentity::of::<Self>()
  }

  /// Called once when the node is created. `snapshot` is this node's restored state,
  /// if a matching frame was found.
  fn initial_state(&self, props: &Self::Props, snapshot: Option<&Snapshot>) -> Self::State;

  /// Called before render when the parent passes props that differ from the last pass.
  fn on_props_changed(
    &self,
    _old: &Self::Props,
    _new: &Self::Props,
    state: Self::State,
  ) -> Self::State {
    state
  }

  /// Render from props and state. Must be idempotent: the same inputs produce an
  /// equal rendering and the same child and task declarations.
  fn render(
    &self,
    props: &Self::Props,
    state: &Self::State,
    ctx: &mut RenderContext<'_, Self>,
  ) -> Result<Self::Rendering, RuntimeError>;

  /// Serialize state for persistence. `None` means restore starts from scratch.
  fn snapshot_state(&self, _state: &Self::State) -> Option<Snapshot> {
    None
  }
}

/// Impostor workflow that renders `inner` as its only child and transforms the
/// rendering. Its identity names the adapter type, transform included, and proxies the
/// inner workflow's identity.
#[derive(Clone)]
pub struct MapRendering<W, F> {
  inner: W,
  transform: F,
}

impl<W, F> MapRendering<W, F> {
  pub fn new(inner: W, transform: F) -> Self {
    Self { inner, transform }
  }
}

impl<W, F, R> Workflow for MapRendering<W, F>
where
  W: Workflow + Clone,
  F: Fn(W::Rendering) -> R + Send + 'static,
  R: Send + 'static,
{
  type Props = W::Props;
  type State = ();
  type Output = W::Output;
  type Rendering = R;

  fn identity(&self) -> WorkflowIdentity {
    WorkflowIdentity::of::<Self>().with_proxy(self.inner.identity())
  }

  fn initial_state(&self, _props: &W::Props, _snapshot: Option<&Snapshot>) {}

  fn render(
    &self,
    props: &W::Props,
    _state: &(),
    ctx: &mut RenderContext<'_, Self>,
  ) -> Result<R, RuntimeError> {
    let rendering = ctx.render_child(
      self.inner.clone(),
      props.clone(),
      "",
      Action::<Self>::emit_output,
    )?;
    Ok((self.transform)(rendering))
  }
}

/// Combinators available on every cloneable workflow.
pub trait WorkflowExt: Workflow + Clone {
  fn map_rendering<F, R>(self, transform: F) -> MapRendering<Self, F>
  where
    F: Fn(Self::Rendering) -> R + Send + 'static,
    R: Send + 'static,
  {
    MapRendering::new(self, transform)
  }
}

impl<W: Workflow + Clone> WorkflowExt for W {}
