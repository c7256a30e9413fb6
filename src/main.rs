mod demo;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use canopy_runtime::{
  RunnerOptions, RuntimeConfig, TracingInterceptor, WorkflowIdentity, WorkflowInterceptor,
  WorkflowRunner,
};
use canopy_snapshot::{FsSnapshotStore, SnapshotStore, TreeSnapshot};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use demo::Dashboard;

/// Store key the demo saves its tree under.
const DEMO_KEY: &str = "demo";

/// Canopy - A runtime for trees of stateful workflows
#[derive(Parser)]
#[command(name = "canopy")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.canopy)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Path to a JSON runtime configuration file
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Inspect and maintain saved snapshots
  Snapshot {
    #[command(subcommand)]
    action: SnapshotCommand,
  },

  /// Run the built-in counter dashboard, resuming from its last saved snapshot
  Demo {
    /// Number of ticks to run before saving and exiting
    #[arg(long, default_value_t = 20)]
    ticks: u64,
  },
}

#[derive(Subcommand)]
enum SnapshotCommand {
  /// Print a snapshot file's frame tree as JSON
  Inspect {
    /// Path to the snapshot file
    file: PathBuf,
  },

  /// List the keys in the snapshot store
  List,

  /// Delete a snapshot from the store
  Rm {
    /// The snapshot key
    key: String,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(std::io::stderr)
    .init();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".canopy"),
  };
  let store = FsSnapshotStore::new(data_dir.join("snapshots"));

  match cli.command {
    Some(Commands::Snapshot { action }) => match action {
      SnapshotCommand::Inspect { file } => inspect_snapshot(&file)?,
      SnapshotCommand::List => {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(list_snapshots(&store))?;
      }
      SnapshotCommand::Rm { key } => {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(remove_snapshot(&store, &key))?;
      }
    },
    Some(Commands::Demo { ticks }) => {
      let config = load_config(cli.config.as_deref())?;
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run_demo(&store, config, ticks))?;
    }
    None => {
      println!("canopy - use --help to see available commands");
    }
  }

  Ok(())
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
  let Some(path) = path else {
    return Ok(RuntimeConfig {
      name: Some("demo".to_string()),
      ..Default::default()
    });
  };
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read config file: {}", path.display()))?;
  RuntimeConfig::from_json_str(&content)
    .with_context(|| format!("failed to parse config file: {}", path.display()))
}

/// One frame of a decoded snapshot, as printed by `snapshot inspect`.
#[derive(Serialize)]
struct FrameReport {
  #[serde(skip_serializing_if = "Option::is_none")]
  identity: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  key: Option<String>,
  state_bytes: usize,
  children: Vec<FrameReport>,
}

impl FrameReport {
  fn new(tree: &TreeSnapshot, identity: Option<String>, key: Option<String>) -> Self {
    let children = tree
      .children()
      .iter()
      .map(|frame| {
        let identity = match WorkflowIdentity::parse(frame.id.identity().clone()) {
          Ok(identity) => identity.to_string(),
          Err(e) => format!("<undecodable: {e}>"),
        };
        FrameReport::new(&frame.snapshot, Some(identity), Some(frame.id.key().to_string()))
      })
      .collect();
    Self {
      identity,
      key,
      state_bytes: tree.state().map_or(0, |state| state.len()),
      children,
    }
  }
}

fn inspect_snapshot(file: &Path) -> Result<()> {
  let bytes = std::fs::read(file)
    .with_context(|| format!("failed to read snapshot file: {}", file.display()))?;
  let tree = TreeSnapshot::parse(bytes)
    .with_context(|| format!("failed to decode snapshot file: {}", file.display()))?;

  eprintln!("Frames: {}", tree.frame_count());
  let report = FrameReport::new(&tree, None, None);
  println!("{}", serde_json::to_string_pretty(&report)?);
  Ok(())
}

async fn list_snapshots(store: &FsSnapshotStore) -> Result<()> {
  let keys = store.list().await.context("failed to list snapshots")?;
  for key in keys {
    println!("{key}");
  }
  Ok(())
}

async fn remove_snapshot(store: &FsSnapshotStore, key: &str) -> Result<()> {
  store
    .delete(key)
    .await
    .with_context(|| format!("failed to delete snapshot '{key}'"))?;
  eprintln!("Deleted snapshot: {key}");
  Ok(())
}

async fn run_demo(store: &FsSnapshotStore, config: RuntimeConfig, ticks: u64) -> Result<()> {
  let snapshot = match store.load(DEMO_KEY).await {
    Ok(bytes) => Some(TreeSnapshot::parse(bytes).context("failed to decode saved demo snapshot")?),
    Err(e) if e.is_not_found() => None,
    Err(e) => return Err(e).context("failed to load demo snapshot"),
  };
  if snapshot.is_some() {
    eprintln!("Resuming from saved snapshot '{DEMO_KEY}'");
  }

  let (_props_tx, props_rx) = watch::channel(());
  let mut runner = WorkflowRunner::new(
    Dashboard,
    props_rx,
    RunnerOptions {
      snapshot,
      interceptors: vec![Arc::new(TracingInterceptor) as Arc<dyn WorkflowInterceptor>],
      config,
    },
  );

  let mut current = runner.next_rendering().context("initial render failed")?;
  println!("{}", current.rendering);

  let mut seen = 0;
  while seen < ticks {
    let result = tokio::select! {
      result = runner.next_output() => result.context("workflow failed")?,
      _ = tokio::signal::ctrl_c() => {
        eprintln!("Interrupted");
        break;
      }
    };
    if result.output().is_some() {
      seen += 1;
    }
    if result.state_changed() {
      current = runner.next_rendering().context("render failed")?;
      println!("{}", current.rendering);
    }
  }

  store
    .save(DEMO_KEY, current.snapshot.to_bytes())
    .await
    .context("failed to save demo snapshot")?;
  info!(key = DEMO_KEY, frames = current.snapshot.frame_count(), "demo_snapshot_saved");
  eprintln!(
    "Saved snapshot '{DEMO_KEY}' to {}",
    store.base_path().display()
  );

  runner.cancel_runtime(Some("demo finished"));
  Ok(())
}
