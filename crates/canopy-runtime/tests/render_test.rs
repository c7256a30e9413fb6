//! Integration tests for render passes: reconciliation, task lifetimes and rollback.

mod common;

use canopy_runtime::{
  Action, ProcessingResult, RenderContext, RunnerOptions, RuntimeError, SendError, Snapshot,
  Workflow, WorkflowExt, WorkflowIdentity, WorkflowRunner,
};
use tokio::sync::{mpsc, watch};

use common::{
  Counter, CounterRendering, Events, ParentProps, expect_events, expect_no_events,
  parent_runner,
};

#[tokio::test]
async fn test_first_render_creates_children_and_starts_tasks() {
  let (mut runner, _props, mut events) = parent_runner(&["a", "b"], RunnerOptions::default());

  let rendered = runner.next_rendering().unwrap();
  assert_eq!(
    rendered.rendering.counts(),
    vec![("a".to_string(), 0), ("b".to_string(), 0)]
  );
  assert_eq!(expect_events(&mut events, 2).await, vec!["started:a", "started:b"]);

  let tree = runner.describe_tree().unwrap();
  assert_eq!(tree.children.len(), 2);
  let a = tree.child("a").unwrap();
  assert_eq!(a.tasks.len(), 1);
  assert_eq!(a.tasks[0].key, "work");
  assert!(a.tasks[0].running);
}

#[tokio::test]
async fn test_removed_child_is_torn_down_and_kept_child_keeps_state() {
  let (mut runner, props, mut events) = parent_runner(&["a", "b"], RunnerOptions::default());
  let rendered = runner.next_rendering().unwrap();
  expect_events(&mut events, 2).await;

  rendered.rendering.child("b").increment.call(5);
  assert!(matches!(
    runner.next_output().await.unwrap(),
    ProcessingResult::ActionApplied {
      output: Some(5),
      state_changed: true
    }
  ));
  let before = runner.describe_tree().unwrap();
  runner.next_rendering().unwrap();

  props.send(ParentProps::keys(&["b", "c"])).unwrap();
  assert!(matches!(
    runner.next_output().await.unwrap(),
    ProcessingResult::PropsUpdated
  ));
  let rendered = runner.next_rendering().unwrap();

  assert_eq!(
    rendered.rendering.counts(),
    vec![("b".to_string(), 5), ("c".to_string(), 0)]
  );
  assert_eq!(expect_events(&mut events, 2).await, vec!["started:c", "stopped:a"]);

  let after = runner.describe_tree().unwrap();
  assert!(after.child("a").is_none());
  assert_eq!(
    after.child("b").unwrap().session_id,
    before.child("b").unwrap().session_id
  );
}

#[tokio::test]
async fn test_rendering_twice_is_idempotent() {
  let (mut runner, _props, mut events) = parent_runner(&["a", "b"], RunnerOptions::default());

  let first = runner.next_rendering().unwrap();
  expect_events(&mut events, 2).await;
  let first_tree = runner.describe_tree().unwrap();

  let second = runner.next_rendering().unwrap();
  assert_eq!(first.rendering.counts(), second.rendering.counts());
  assert_eq!(first.snapshot, second.snapshot);
  assert_eq!(first_tree, runner.describe_tree().unwrap());
  expect_no_events(&mut events).await;
}

#[tokio::test]
async fn test_duplicate_child_fails_the_pass() {
  let (mut runner, _props, mut events) = parent_runner(&["x", "x"], RunnerOptions::default());

  let err = runner.next_rendering().err().unwrap();
  assert!(matches!(err, RuntimeError::DuplicateChild { ref key, .. } if key == "x"));
  assert!(runner.describe_tree().unwrap().children.is_empty());
  expect_no_events(&mut events).await;
}

#[tokio::test]
async fn test_failed_pass_commits_nothing() {
  let (mut runner, props, mut events) = parent_runner(&["a"], RunnerOptions::default());
  let rendered = runner.next_rendering().unwrap();
  expect_events(&mut events, 1).await;
  rendered.rendering.child("a").increment.call(2);
  runner.next_output().await.unwrap();
  runner.next_rendering().unwrap();

  props
    .send(ParentProps {
      keys: vec!["b".to_string()],
      base: 10,
      fail: true,
    })
    .unwrap();
  runner.next_output().await.unwrap();
  let err = runner.next_rendering().err().unwrap();
  assert!(matches!(err, RuntimeError::Render { .. }));

  let tree = runner.describe_tree().unwrap();
  assert_eq!(tree.children.len(), 1);
  assert!(tree.child("a").is_some());
  expect_no_events(&mut events).await;

  props
    .send(ParentProps {
      keys: vec!["a".to_string()],
      base: 10,
      fail: false,
    })
    .unwrap();
  runner.next_output().await.unwrap();
  let rendered = runner.next_rendering().unwrap();
  assert_eq!(rendered.rendering.counts(), vec![("a".to_string(), 12)]);
}

#[tokio::test]
async fn test_props_change_shifts_child_state() {
  let (mut runner, props, _events) = parent_runner(&["a"], RunnerOptions::default());
  let rendered = runner.next_rendering().unwrap();
  rendered.rendering.child("a").increment.call(3);
  runner.next_output().await.unwrap();

  props
    .send(ParentProps {
      keys: vec!["a".to_string()],
      base: 100,
      fail: false,
    })
    .unwrap();
  runner.next_output().await.unwrap();
  let rendered = runner.next_rendering().unwrap();
  assert_eq!(rendered.rendering.counts(), vec![("a".to_string(), 103)]);
}

#[test]
fn test_render_outside_tokio_runtime_fails() {
  let (mut runner, _props, _events) = parent_runner(&["a"], RunnerOptions::default());
  let err = runner.next_rendering().err().unwrap();
  assert!(matches!(err, RuntimeError::NoTokioRuntime));
}

struct TwoTasks;

impl Workflow for TwoTasks {
  type Props = ();
  type State = ();
  type Output = ();
  type Rendering = ();

  fn initial_state(&self, _props: &(), _snapshot: Option<&Snapshot>) {}

  fn render(&self, _props: &(), _state: &(), ctx: &mut RenderContext<'_, Self>) -> Result<(), RuntimeError> {
    ctx.run_side_effect("same", |_sink| async {})?;
    ctx.run_side_effect("same", |_sink| async {})?;
    Ok(())
  }
}

#[tokio::test]
async fn test_duplicate_task_key_fails_the_pass() {
  let (_tx, rx) = watch::channel(());
  let mut runner = WorkflowRunner::new(TwoTasks, rx, RunnerOptions::default());

  let err = runner.next_rendering().err().unwrap();
  assert!(matches!(err, RuntimeError::DuplicateTask { ref key, .. } if key == "same"));
  assert!(runner.describe_tree().unwrap().tasks.is_empty());
}

#[tokio::test]
async fn test_map_rendering_proxies_inner_identity() {
  let (events, mut events_rx) = mpsc::unbounded_channel();
  let counter = Counter {
    name: "inner".to_string(),
    events,
  };
  let mapped = counter.map_rendering(|rendering| rendering);
  let identity = mapped.identity();
  assert_eq!(identity.proxied(), Some(&WorkflowIdentity::of::<Counter>()));
  assert_eq!(identity.real_identity(), &WorkflowIdentity::of::<Counter>());

  let (_tx, rx) = watch::channel(7);
  let mut runner = WorkflowRunner::new(mapped, rx, RunnerOptions::default());
  let rendered = runner.next_rendering().unwrap();
  assert_eq!(rendered.rendering.count, 7);
  expect_events(&mut events_rx, 1).await;

  rendered.rendering.increment.call(1);
  assert!(matches!(
    runner.next_output().await.unwrap(),
    ProcessingResult::ActionApplied {
      output: Some(8),
      state_changed: true
    }
  ));
  assert_eq!(runner.next_rendering().unwrap().rendering.count, 8);

  let tree = runner.describe_tree().unwrap();
  assert!(tree.identity.contains("MapRendering<"));
  assert_eq!(tree.children.len(), 1);
  assert_eq!(tree.children[0].key, "");
}

#[tokio::test]
async fn test_map_rendering_transforms_rendering() {
  let (events, _events_rx) = mpsc::unbounded_channel();
  let counter = Counter {
    name: "inner".to_string(),
    events,
  };
  let (_tx, rx) = watch::channel(4);
  let mut runner = WorkflowRunner::new(
    counter.map_rendering(|rendering| format!("count={}", rendering.count)),
    rx,
    RunnerOptions::default(),
  );
  assert_eq!(runner.next_rendering().unwrap().rendering, "count=4");
}

/// Wraps a [`Counter`] so that removing a `Middle` removes a grandchild.
struct Middle {
  name: String,
  events: Events,
}

impl Workflow for Middle {
  type Props = ();
  type State = ();
  type Output = i64;
  type Rendering = CounterRendering;

  fn initial_state(&self, _props: &(), _snapshot: Option<&Snapshot>) {}

  fn render(
    &self,
    _props: &(),
    _state: &(),
    ctx: &mut RenderContext<'_, Self>,
  ) -> Result<CounterRendering, RuntimeError> {
    let leaf = Counter {
      name: format!("{}/leaf", self.name),
      events: self.events.clone(),
    };
    ctx.render_child(leaf, 0, "leaf", Action::<Self>::emit_output)
  }
}

/// Renders one [`Middle`] per key in its props.
struct Group {
  events: Events,
}

impl Workflow for Group {
  type Props = Vec<&'static str>;
  type State = ();
  type Output = i64;
  type Rendering = Vec<CounterRendering>;

  fn initial_state(&self, _props: &Vec<&'static str>, _snapshot: Option<&Snapshot>) {}

  fn render(
    &self,
    keys: &Vec<&'static str>,
    _state: &(),
    ctx: &mut RenderContext<'_, Self>,
  ) -> Result<Vec<CounterRendering>, RuntimeError> {
    let mut leaves = Vec::with_capacity(keys.len());
    for key in keys {
      let middle = Middle {
        name: key.to_string(),
        events: self.events.clone(),
      };
      leaves.push(ctx.render_child(middle, (), key, Action::<Self>::emit_output)?);
    }
    Ok(leaves)
  }
}

#[tokio::test]
async fn test_removing_a_node_tears_down_its_grandchildren() {
  let (events, mut events_rx) = mpsc::unbounded_channel();
  let (props, rx) = watch::channel(vec!["a", "b"]);
  let mut runner = WorkflowRunner::new(Group { events }, rx, RunnerOptions::default());

  let first = runner.next_rendering().unwrap();
  assert_eq!(
    expect_events(&mut events_rx, 2).await,
    vec!["started:a/leaf", "started:b/leaf"]
  );
  let stale = first.rendering[1].increment.clone();

  props.send(vec!["a"]).unwrap();
  assert!(matches!(
    runner.next_output().await.unwrap(),
    ProcessingResult::PropsUpdated
  ));
  runner.next_rendering().unwrap();

  assert_eq!(stale.try_call(1), Err(SendError::Cancelled));
  assert_eq!(expect_events(&mut events_rx, 1).await, vec!["stopped:b/leaf"]);

  let tree = runner.describe_tree().unwrap();
  assert_eq!(tree.children.len(), 1);
  let leaf = tree.child("a").unwrap().child("leaf").unwrap();
  assert!(leaf.tasks[0].running);

  first.rendering[0].increment.call(2);
  assert!(matches!(
    runner.next_output().await.unwrap(),
    ProcessingResult::ActionApplied {
      output: Some(2),
      ..
    }
  ));
}

/// Shows a [`Counter`] under one key through either of two adapters whose renderings
/// differ in type.
struct Labelled {
  events: Events,
}

impl Workflow for Labelled {
  type Props = bool;
  type State = ();
  type Output = i64;
  type Rendering = String;

  fn initial_state(&self, _as_text: &bool, _snapshot: Option<&Snapshot>) {}

  fn render(
    &self,
    as_text: &bool,
    _state: &(),
    ctx: &mut RenderContext<'_, Self>,
  ) -> Result<String, RuntimeError> {
    let counter = Counter {
      name: "c".to_string(),
      events: self.events.clone(),
    };
    if *as_text {
      let view = counter.map_rendering(|rendering| format!("#{}", rendering.count));
      ctx.render_child(view, 0, "view", Action::<Self>::emit_output)
    } else {
      let view = counter.map_rendering(|rendering| rendering.count);
      let count = ctx.render_child(view, 0, "view", Action::<Self>::emit_output)?;
      Ok(count.to_string())
    }
  }
}

#[tokio::test]
async fn test_swapping_adapters_under_one_key_replaces_the_child() {
  let (events, mut events_rx) = mpsc::unbounded_channel();
  let (props, rx) = watch::channel(false);
  let mut runner = WorkflowRunner::new(Labelled { events }, rx, RunnerOptions::default());

  assert_eq!(runner.next_rendering().unwrap().rendering, "0");
  assert_eq!(expect_events(&mut events_rx, 1).await, vec!["started:c"]);
  let before = runner.describe_tree().unwrap().children[0].session_id;

  props.send(true).unwrap();
  assert!(matches!(
    runner.next_output().await.unwrap(),
    ProcessingResult::PropsUpdated
  ));
  assert_eq!(runner.next_rendering().unwrap().rendering, "#0");
  assert_eq!(
    expect_events(&mut events_rx, 2).await,
    vec!["started:c", "stopped:c"]
  );

  let tree = runner.describe_tree().unwrap();
  assert_eq!(tree.children.len(), 1);
  assert_ne!(tree.children[0].session_id, before);
}
