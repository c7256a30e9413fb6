//! Canopy Snapshot
//!
//! The byte layer of canopy's state persistence. A running workflow tree is saved as a
//! tree of frames: each frame holds one node's opaque state bytes plus one child frame
//! per snapshottable child, tagged with the child's identity bytes and render key.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ TreeSnapshot (root)                          │
//! │   state: Snapshot                            │
//! │   ┌────────────────────┐ ┌────────────────┐  │
//! │   │ FrameId(id, "a")   │ │ FrameId(id,"b")│  │
//! │   │ TreeSnapshot ...   │ │ TreeSnapshot   │  │
//! │   └────────────────────┘ └────────────────┘  │
//! └──────────────────────────────────────────────┘
//!                      │ encode_tree / decode_tree
//!                      ▼
//!            Bytes ──► SnapshotStore (fs, memory)
//! ```
//!
//! Decoding is best-effort: frames that cannot be parsed are dropped with a warning and
//! the nodes they described start fresh.
//!
//! # Usage
//!
//! ```ignore
//! use canopy_snapshot::{FsSnapshotStore, SnapshotStore, TreeSnapshot};
//!
//! let store = FsSnapshotStore::new("/var/lib/app/snapshots");
//! store.save("main", tree.to_bytes()).await?;
//!
//! let restored = TreeSnapshot::parse(store.load("main").await?)?;
//! ```

pub mod codec;
mod error;
mod fs;
mod memory;
mod snapshot;
mod store;
mod tree;

pub use error::SnapshotError;
pub use fs::FsSnapshotStore;
pub use memory::MemorySnapshotStore;
pub use snapshot::Snapshot;
pub use store::SnapshotStore;
pub use tree::{ChildFrame, FrameId, TreeSnapshot};
