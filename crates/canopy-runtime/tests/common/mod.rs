//! Workflows shared by the runtime integration tests.

#![allow(dead_code)]

use std::time::Duration;

use canopy_runtime::{
  Action, EventHandler, RenderContext, RunnerOptions, RuntimeError, Snapshot, Workflow,
  WorkflowRunner,
};
use tokio::sync::{mpsc, watch};

pub type Events = mpsc::UnboundedSender<String>;

/// Reports on `events` when dropped, so tests can observe task teardown.
struct StopSignal {
  events: Events,
  message: String,
}

impl Drop for StopSignal {
  fn drop(&mut self) {
    let _ = self.events.send(self.message.clone());
  }
}

/// Leaf counter. Props are a base value the count is shifted by when it changes.
/// Runs a long-lived "work" task that reports `started:<name>` and `stopped:<name>`.
#[derive(Clone)]
pub struct Counter {
  pub name: String,
  pub events: Events,
}

#[derive(Clone)]
pub struct CounterRendering {
  pub count: i64,
  pub increment: EventHandler<i64>,
}

impl Workflow for Counter {
  type Props = i64;
  type State = i64;
  type Output = i64;
  type Rendering = CounterRendering;

  fn initial_state(&self, base: &i64, snapshot: Option<&Snapshot>) -> i64 {
    snapshot
      .and_then(|snapshot| snapshot.to_json::<i64>().ok())
      .unwrap_or(*base)
  }

  fn on_props_changed(&self, old: &i64, new: &i64, state: i64) -> i64 {
    state - old + new
  }

  fn render(
    &self,
    _base: &i64,
    state: &i64,
    ctx: &mut RenderContext<'_, Self>,
  ) -> Result<CounterRendering, RuntimeError> {
    let events = self.events.clone();
    let name = self.name.clone();
    ctx.run_side_effect("work", move |_sink| async move {
      let _ = events.send(format!("started:{name}"));
      let _signal = StopSignal {
        events,
        message: format!("stopped:{name}"),
      };
      std::future::pending::<()>().await
    })?;

    Ok(CounterRendering {
      count: *state,
      increment: ctx.event_handler(increment),
    })
  }

  fn snapshot_state(&self, state: &i64) -> Option<Snapshot> {
    Snapshot::of_json(state).ok()
  }
}

/// Adds `by` and reports the new count. Negative steps are rejected.
pub fn increment(by: i64) -> Action<Counter> {
  Action::<Counter>::new("increment", move |u| {
    if by < 0 {
      return Err(format!("negative step {by}").into());
    }
    *u.state_mut() += by;
    let count = *u.state();
    u.set_output(count);
    Ok(())
  })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParentProps {
  pub keys: Vec<String>,
  pub base: i64,
  pub fail: bool,
}

impl ParentProps {
  pub fn keys(keys: &[&str]) -> Self {
    Self {
      keys: keys.iter().map(|key| key.to_string()).collect(),
      base: 0,
      fail: false,
    }
  }
}

/// Renders one [`Counter`] per key. Records every count its children report and
/// forwards it as its own output, except 13, which it refuses.
#[derive(Clone)]
pub struct Parent {
  pub events: Events,
}

pub struct ParentRendering {
  pub children: Vec<(String, CounterRendering)>,
  pub received: Vec<i64>,
}

impl ParentRendering {
  pub fn child(&self, key: &str) -> &CounterRendering {
    &self
      .children
      .iter()
      .find(|(child, _)| child == key)
      .unwrap_or_else(|| panic!("no child {key}"))
      .1
  }

  pub fn counts(&self) -> Vec<(String, i64)> {
    self
      .children
      .iter()
      .map(|(key, child)| (key.clone(), child.count))
      .collect()
  }
}

impl Workflow for Parent {
  type Props = ParentProps;
  type State = Vec<i64>;
  type Output = i64;
  type Rendering = ParentRendering;

  fn initial_state(&self, _props: &ParentProps, snapshot: Option<&Snapshot>) -> Vec<i64> {
    snapshot
      .and_then(|snapshot| snapshot.to_json().ok())
      .unwrap_or_default()
  }

  fn render(
    &self,
    props: &ParentProps,
    state: &Vec<i64>,
    ctx: &mut RenderContext<'_, Self>,
  ) -> Result<ParentRendering, RuntimeError> {
    let mut children = Vec::with_capacity(props.keys.len());
    for key in &props.keys {
      let child = Counter {
        name: key.clone(),
        events: self.events.clone(),
      };
      let rendering = ctx.render_child(child, props.base, key, child_reported)?;
      children.push((key.clone(), rendering));
    }
    if props.fail {
      return Err(RuntimeError::render("requested failure"));
    }
    Ok(ParentRendering {
      children,
      received: state.clone(),
    })
  }

  fn snapshot_state(&self, state: &Vec<i64>) -> Option<Snapshot> {
    Snapshot::of_json(state).ok()
  }
}

fn child_reported(count: i64) -> Action<Parent> {
  Action::<Parent>::new("child_reported", move |u| {
    if count == 13 {
      return Err("unlucky count".into());
    }
    u.state_mut().push(count);
    u.set_output(count);
    Ok(())
  })
}

pub fn parent_runner(
  keys: &[&str],
  options: RunnerOptions,
) -> (
  WorkflowRunner<Parent>,
  watch::Sender<ParentProps>,
  mpsc::UnboundedReceiver<String>,
) {
  let (events, events_rx) = mpsc::unbounded_channel();
  let (props_tx, props_rx) = watch::channel(ParentProps::keys(keys));
  let runner = WorkflowRunner::new(Parent { events }, props_rx, options);
  (runner, props_tx, events_rx)
}

/// Collect `count` events, sorted, failing if they do not arrive promptly.
pub async fn expect_events(events: &mut mpsc::UnboundedReceiver<String>, count: usize) -> Vec<String> {
  let mut received = Vec::with_capacity(count);
  while received.len() < count {
    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
      .await
      .expect("timed out waiting for task events")
      .expect("event channel closed");
    received.push(event);
  }
  received.sort();
  received
}

/// Give spawned tasks a chance to run, then assert nothing was reported.
pub async fn expect_no_events(events: &mut mpsc::UnboundedReceiver<String>) {
  for _ in 0..10 {
    tokio::task::yield_now().await;
  }
  assert!(events.try_recv().is_err(), "unexpected task event");
}
