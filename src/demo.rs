//! The built-in demo tree: a dashboard of counters driven by intervals.

use std::fmt;
use std::time::Duration;

use canopy_runtime::{Action, RenderContext, RuntimeError, Snapshot, Workflow, WorkflowIdentity};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_stream::wrappers::IntervalStream;

const TICKERS: [(&str, u64); 3] = [("fast", 200), ("medium", 500), ("slow", 1000)];

/// Counts the ticks of one interval and reports each of them.
pub struct Ticker;

impl Workflow for Ticker {
  type Props = Duration;
  type State = u64;
  type Output = ();
  type Rendering = u64;

  fn identity(&self) -> WorkflowIdentity {
    WorkflowIdentity::named("canopy.demo.Ticker")
  }

  fn initial_state(&self, _period: &Duration, snapshot: Option<&Snapshot>) -> u64 {
    snapshot
      .and_then(|snapshot| snapshot.to_json().ok())
      .unwrap_or(0)
  }

  fn render(
    &self,
    period: &Duration,
    count: &u64,
    ctx: &mut RenderContext<'_, Self>,
  ) -> Result<u64, RuntimeError> {
    let mut interval = interval_at(Instant::now() + *period, *period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ctx.run_subscription(
      &format!("every-{}ms", period.as_millis()),
      IntervalStream::new(interval),
      |_| {
        Action::<Self>::update("tick", |u| {
          *u.state_mut() += 1;
          u.set_output(());
        })
      },
    )?;
    Ok(*count)
  }

  fn snapshot_state(&self, count: &u64) -> Option<Snapshot> {
    Snapshot::of_json(count).ok()
  }
}

/// Renders one [`Ticker`] per configured interval and keeps a running total.
/// Emits the total every time any ticker ticks.
pub struct Dashboard;

pub struct DashboardRendering {
  pub total: u64,
  pub tickers: Vec<(&'static str, u64)>,
}

impl fmt::Display for DashboardRendering {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "total={}", self.total)?;
    for (name, count) in &self.tickers {
      write!(f, " {name}={count}")?;
    }
    Ok(())
  }
}

impl Workflow for Dashboard {
  type Props = ();
  type State = u64;
  type Output = u64;
  type Rendering = DashboardRendering;

  fn identity(&self) -> WorkflowIdentity {
    WorkflowIdentity::named("canopy.demo.Dashboard")
  }

  fn initial_state(&self, _props: &(), snapshot: Option<&Snapshot>) -> u64 {
    snapshot
      .and_then(|snapshot| snapshot.to_json().ok())
      .unwrap_or(0)
  }

  fn render(
    &self,
    _props: &(),
    total: &u64,
    ctx: &mut RenderContext<'_, Self>,
  ) -> Result<DashboardRendering, RuntimeError> {
    let mut tickers = Vec::with_capacity(TICKERS.len());
    for (name, millis) in TICKERS {
      let count = ctx.render_child(Ticker, Duration::from_millis(millis), name, |()| {
        Action::<Self>::update("ticked", |u| {
          *u.state_mut() += 1;
          let total = *u.state();
          u.set_output(total);
        })
      })?;
      tickers.push((name, count));
    }
    Ok(DashboardRendering {
      total: *total,
      tickers,
    })
  }

  fn snapshot_state(&self, total: &u64) -> Option<Snapshot> {
    Snapshot::of_json(total).ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use canopy_runtime::{ProcessingResult, RunnerOptions, TreeSnapshot, WorkflowRunner};
  use tokio::sync::watch;

  async fn tick(runner: &mut WorkflowRunner<Dashboard>) -> DashboardRendering {
    match runner.next_output().await.unwrap() {
      ProcessingResult::ActionApplied {
        output: Some(_),
        ..
      } => {}
      other => panic!("unexpected result {other:?}"),
    }
    runner.next_rendering().unwrap().rendering
  }

  #[tokio::test(start_paused = true)]
  async fn test_dashboard_counts_and_restores() {
    let (_tx, rx) = watch::channel(());
    let mut runner = WorkflowRunner::new(Dashboard, rx, RunnerOptions::default());
    let first = runner.next_rendering().unwrap();
    assert_eq!(first.rendering.to_string(), "total=0 fast=0 medium=0 slow=0");

    let mut latest = None;
    for _ in 0..5 {
      latest = Some(tick(&mut runner).await);
    }
    let latest = latest.unwrap();
    assert_eq!(latest.total, 5);
    assert_eq!(
      latest.tickers.iter().map(|(_, count)| count).sum::<u64>(),
      5
    );

    let snapshot = runner.next_rendering().unwrap().snapshot;
    let (_tx, rx) = watch::channel(());
    let mut restored = WorkflowRunner::new(
      Dashboard,
      rx,
      RunnerOptions {
        snapshot: Some(TreeSnapshot::parse(snapshot.to_bytes()).unwrap()),
        ..Default::default()
      },
    );
    let rendering = restored.next_rendering().unwrap().rendering;
    assert_eq!(rendering.total, 5);
    assert_eq!(rendering.tickers, latest.tickers);
  }
}
