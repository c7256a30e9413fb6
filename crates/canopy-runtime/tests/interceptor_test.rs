//! Integration tests for interceptors installed on a runner.

mod common;

use std::any::Any;
use std::sync::{Arc, Mutex};

use canopy_runtime::{
  ActionSentProceed, AnyAction, AnyRendering, RenderProceed, RunnerOptions, RuntimeError,
  SendError, SideEffectProceed, TaskFuture, TracingInterceptor, WorkflowInterceptor,
  WorkflowSession,
};

use common::{expect_events, expect_no_events, parent_runner};

type Log = Arc<Mutex<Vec<String>>>;

fn label(session: &WorkflowSession) -> &str {
  if session.is_root() { "root" } else { &session.render_key }
}

struct Recorder {
  name: &'static str,
  log: Log,
}

impl Recorder {
  fn push(&self, entry: String) {
    self.log.lock().unwrap().push(format!("{}:{entry}", self.name));
  }
}

impl WorkflowInterceptor for Recorder {
  fn on_session_started(&self, session: &WorkflowSession) {
    self.push(format!("started:{}", label(session)));
  }

  fn on_session_finished(&self, session: &WorkflowSession) {
    self.push(format!("finished:{}", label(session)));
  }

  fn on_render(
    &self,
    props: &dyn Any,
    state: &dyn Any,
    session: &WorkflowSession,
    proceed: RenderProceed<'_>,
  ) -> Result<AnyRendering, RuntimeError> {
    self.push(format!("render:{}:enter", label(session)));
    let rendering = proceed(props, state);
    self.push(format!("render:{}:exit", label(session)));
    rendering
  }

  fn on_action_sent(
    &self,
    action: AnyAction,
    session: &WorkflowSession,
    proceed: ActionSentProceed<'_>,
  ) -> Result<(), SendError> {
    self.push(format!("sent:{}:{}", label(session), action.name()));
    proceed(action)
  }
}

fn recorders(log: &Log) -> Vec<Arc<dyn WorkflowInterceptor>> {
  vec![
    Arc::new(Recorder {
      name: "outer",
      log: log.clone(),
    }) as Arc<dyn WorkflowInterceptor>,
    Arc::new(Recorder {
      name: "inner",
      log: log.clone(),
    }),
  ]
}

fn take(log: &Log) -> Vec<String> {
  std::mem::take(&mut *log.lock().unwrap())
}

#[tokio::test]
async fn test_first_interceptor_wraps_the_rest() {
  let log = Log::default();
  let (mut runner, _props, _events) = parent_runner(
    &["a"],
    RunnerOptions {
      interceptors: recorders(&log),
      ..Default::default()
    },
  );
  runner.next_rendering().unwrap();

  assert_eq!(
    take(&log),
    vec![
      "outer:started:root",
      "inner:started:root",
      "outer:render:root:enter",
      "inner:render:root:enter",
      "outer:started:a",
      "inner:started:a",
      "outer:render:a:enter",
      "inner:render:a:enter",
      "inner:render:a:exit",
      "outer:render:a:exit",
      "inner:render:root:exit",
      "outer:render:root:exit",
    ]
  );
}

#[tokio::test]
async fn test_sent_actions_and_teardown_are_observed() {
  let log = Log::default();
  let (mut runner, _props, _events) = parent_runner(
    &["a"],
    RunnerOptions {
      interceptors: recorders(&log),
      ..Default::default()
    },
  );
  let rendered = runner.next_rendering().unwrap();
  take(&log);

  rendered.rendering.child("a").increment.call(1);
  assert_eq!(take(&log), vec!["outer:sent:a:increment", "inner:sent:a:increment"]);

  runner.cancel_runtime(None);
  assert_eq!(
    take(&log),
    vec![
      "inner:finished:a",
      "outer:finished:a",
      "inner:finished:root",
      "outer:finished:root",
    ]
  );
}

/// Never calls `proceed`, so no task ever starts.
struct SkipTasks;

impl WorkflowInterceptor for SkipTasks {
  fn on_running_side_effect(
    &self,
    _key: &str,
    _effect: TaskFuture,
    _session: &WorkflowSession,
    _proceed: SideEffectProceed<'_>,
  ) {
  }
}

#[tokio::test]
async fn test_interceptor_can_skip_tasks() {
  let (mut runner, _props, mut events) = parent_runner(
    &["a"],
    RunnerOptions {
      interceptors: vec![Arc::new(SkipTasks) as Arc<dyn WorkflowInterceptor>],
      ..Default::default()
    },
  );
  runner.next_rendering().unwrap();
  expect_no_events(&mut events).await;

  let tree = runner.describe_tree().unwrap();
  let task = &tree.child("a").unwrap().tasks[0];
  assert_eq!(task.key, "work");
  assert!(!task.running);
}

#[tokio::test]
async fn test_tracing_interceptor_is_transparent() {
  let (mut runner, _props, mut events) = parent_runner(
    &["a", "b"],
    RunnerOptions {
      interceptors: vec![Arc::new(TracingInterceptor) as Arc<dyn WorkflowInterceptor>],
      ..Default::default()
    },
  );
  let rendered = runner.next_rendering().unwrap();
  assert_eq!(expect_events(&mut events, 2).await, vec!["started:a", "started:b"]);

  rendered.rendering.child("b").increment.call(2);
  runner.next_output().await.unwrap();
  assert_eq!(
    runner.next_rendering().unwrap().rendering.counts(),
    vec![("a".to_string(), 0), ("b".to_string(), 2)]
  );
}
