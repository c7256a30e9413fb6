//! Canopy Runtime
//!
//! A runtime for trees of stateful workflows. Each node owns its state, renders a value
//! from props and state on every pass, declares children and background tasks, and
//! changes state only through actions applied one at a time by the runner.
//!
//! # Architecture
//!
//! ```text
//!  props (watch) ──┐
//!                  ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │ WorkflowRunner                                             │
//! │   next_rendering()  ──► render pass ──► commit ──► snapshot│
//! │   next_output()     ◄── select { props, action queue }     │
//! └────────────────────────────────────────────────────────────┘
//!                  │
//!                  ▼
//!        ┌──────────────────┐   render_child   ┌─────────────┐
//!        │ WorkflowNode     │ ───────────────► │ child nodes │
//!        │   state, props   │ ◄─── outputs ─── │   ...       │
//!        │   TaskSet        │                  └─────────────┘
//!        └──────────────────┘
//!                  │ spawn
//!                  ▼
//!        tasks ──► Sink ──► action queue ──► runner
//! ```
//!
//! A render pass is two-phase. The whole tree renders into staging first; only if it
//! succeeds are removed children and tasks torn down, tree-wide, and then new tasks
//! started. A failed pass commits nothing.
//!
//! Children are matched across passes by workflow identity plus render key. A matched
//! child keeps its state; an unmatched one is created fresh; a child no longer declared
//! is torn down with all of its tasks and descendants.
//!
//! # Usage
//!
//! ```ignore
//! use canopy_runtime::{
//!   Action, RenderContext, RunnerOptions, RuntimeError, Snapshot, Workflow, WorkflowRunner,
//! };
//!
//! struct Counter;
//!
//! impl Workflow for Counter {
//!   type Props = ();
//!   type State = u32;
//!   type Output = ();
//!   type Rendering = u32;
//!
//!   fn initial_state(&self, _: &(), _: Option<&Snapshot>) -> u32 {
//!     0
//!   }
//!
//!   fn render(&self, _: &(), state: &u32, ctx: &mut RenderContext<'_, Self>) -> Result<u32, RuntimeError> {
//!     ctx.run_subscription("ticks", ticks(), |_| Action::update("tick", |u| *u.state_mut() += 1))?;
//!     Ok(*state)
//!   }
//! }
//!
//! let (_props_tx, props_rx) = tokio::sync::watch::channel(());
//! let mut runner = WorkflowRunner::new(Counter, props_rx, RunnerOptions::default());
//! let first = runner.next_rendering()?;
//! runner.next_output().await?;
//! let second = runner.next_rendering()?;
//! ```

mod action;
mod config;
mod context;
mod error;
mod identity;
mod interceptor;
mod node;
mod queue;
mod runner;
mod sink;
mod subtree;
mod tasks;
mod workflow;

pub use action::{Action, AnyAction, Updater};
pub use config::RuntimeConfig;
pub use context::RenderContext;
pub use error::{BoxError, RuntimeError, SendError, TaskError};
pub use identity::{WorkflowIdentity, WorkflowNodeId};
pub use interceptor::{
  ActionSentProceed, AnyRendering, AnyState, InitialStateProceed, InterceptorChain,
  PropsChangedProceed, RenderChildProceed, RenderProceed, SideEffectProceed, SnapshotProceed,
  TaskFuture, TracingInterceptor, WorkflowInterceptor, WorkflowSession,
};
pub use node::NodeDescription;
pub use runner::{ProcessingResult, RenderingAndSnapshot, RunnerOptions, WorkflowRunner};
pub use sink::{EventHandler, Sink};
pub use tasks::{TaskDescription, TaskKind};
pub use workflow::{MapRendering, Workflow, WorkflowExt};

pub use canopy_snapshot::{Snapshot, TreeSnapshot};
