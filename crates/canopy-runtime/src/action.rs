//! Actions: atomic state transitions.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;

use crate::error::{BoxError, RuntimeError};
use crate::workflow::Workflow;

type ApplyFn<W> = Box<dyn FnOnce(&mut Updater<'_, W>) -> Result<(), BoxError> + Send>;

/// A state transition for a node running workflow `W`.
///
/// The closure receives an [`Updater`] holding the current props and a working copy of
/// the state. The copy replaces the node's state only if the closure returns `Ok` and
/// wrote to it through [`Updater::state_mut`] or [`Updater::set_state`].
pub struct Action<W: Workflow> {
  name: Cow<'static, str>,
  apply: ApplyFn<W>,
}

/// Mutable view handed to an action closure.
pub struct Updater<'a, W: Workflow> {
  pub props: &'a W::Props,
  state: W::State,
  state_changed: bool,
  output: Option<W::Output>,
}

/// What applying an action produced.
pub(crate) struct Applied<W: Workflow> {
  pub state: W::State,
  pub state_changed: bool,
  pub output: Option<W::Output>,
}

impl<W: Workflow> Updater<'_, W> {
  pub fn state(&self) -> &W::State {
    &self.state
  }

  /// Mutable access to the working copy. Marks the state as changed.
  pub fn state_mut(&mut self) -> &mut W::State {
    self.state_changed = true;
    &mut self.state
  }

  pub fn set_state(&mut self, state: W::State) {
    self.state_changed = true;
    self.state = state;
  }

  /// Emit an output to the parent's handler (or the runner, at the root).
  pub fn set_output(&mut self, output: W::Output) {
    self.output = Some(output);
  }
}

impl<W: Workflow> Action<W> {
  /// A fallible action.
  pub fn new<F>(name: impl Into<Cow<'static, str>>, apply: F) -> Self
  where
    F: FnOnce(&mut Updater<'_, W>) -> Result<(), BoxError> + Send + 'static,
  {
    Self {
      name: name.into(),
      apply: Box::new(apply),
    }
  }

  /// An action that cannot fail.
  pub fn update<F>(name: impl Into<Cow<'static, str>>, apply: F) -> Self
  where
    F: FnOnce(&mut Updater<'_, W>) + Send + 'static,
  {
    Self::new(name, move |updater: &mut Updater<'_, W>| {
      apply(updater);
      Ok(())
    })
  }

  /// An action that changes nothing.
  pub fn noop() -> Self {
    Self::update("noop", |_: &mut Updater<'_, W>| {})
  }

  /// An action that only emits `output`.
  pub fn emit_output(output: W::Output) -> Self {
    Self::update("emit_output", move |updater: &mut Updater<'_, W>| {
      updater.set_output(output)
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Apply to `state`. On error the state is left untouched.
  pub(crate) fn apply(self, props: &W::Props, state: &W::State) -> Result<Applied<W>, RuntimeError> {
    let mut updater = Updater {
      props,
      state: state.clone(),
      state_changed: false,
      output: None,
    };
    match (self.apply)(&mut updater) {
      Ok(()) => Ok(Applied {
        state: updater.state,
        state_changed: updater.state_changed,
        output: updater.output,
      }),
      Err(source) => Err(RuntimeError::ActionFailed {
        action: self.name.into_owned(),
        source,
      }),
    }
  }
}

impl<W: Workflow> fmt::Debug for Action<W> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Action").field("name", &self.name).finish()
  }
}

/// An action with its workflow type erased, as carried by the queue and interceptors.
pub struct AnyAction {
  name: String,
  inner: Box<dyn Any + Send>,
}

impl AnyAction {
  pub fn new<W: Workflow>(action: Action<W>) -> Self {
    Self {
      name: action.name().to_string(),
      inner: Box::new(action),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn downcast<W: Workflow>(self) -> Result<Action<W>, RuntimeError> {
    self
      .inner
      .downcast::<Action<W>>()
      .map(|action| *action)
      .map_err(|_| RuntimeError::type_mismatch::<Action<W>>())
  }
}

impl fmt::Debug for AnyAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AnyAction")
      .field("name", &self.name)
      .finish()
  }
}
