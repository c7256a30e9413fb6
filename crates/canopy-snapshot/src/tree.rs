use bytes::{Bytes, BytesMut};

use crate::Snapshot;
use crate::codec::{self, ByteReader};
use crate::error::SnapshotError;

/// Identifies one child frame: the child's identity bytes plus its render key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameId {
  identity: Bytes,
  key: String,
}

impl FrameId {
  pub fn new(identity: impl Into<Bytes>, key: impl Into<String>) -> Self {
    Self {
      identity: identity.into(),
      key: key.into(),
    }
  }

  pub fn identity(&self) -> &Bytes {
    &self.identity
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  pub fn to_bytes(&self) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + self.identity.len() + self.key.len());
    codec::put_bytes_with_length(&mut buf, &self.identity);
    codec::put_str_with_length(&mut buf, &self.key);
    buf.freeze()
  }

  pub fn parse(bytes: impl Into<Bytes>) -> Result<Self, SnapshotError> {
    let mut reader = ByteReader::new(bytes);
    let identity = reader.read_bytes_with_length()?;
    let key = reader.read_str_with_length()?;
    Ok(Self { identity, key })
  }
}

/// A child's frame inside a [`TreeSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildFrame {
  pub id: FrameId,
  pub snapshot: TreeSnapshot,
}

/// A whole subtree's persisted state: this node's own snapshot plus one frame per
/// snapshottable child.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TreeSnapshot {
  state: Option<Snapshot>,
  children: Vec<ChildFrame>,
}

impl TreeSnapshot {
  /// Empty state snapshots are normalized to `None`, matching what a decode yields.
  pub fn new(state: Option<Snapshot>, children: Vec<ChildFrame>) -> Self {
    let state = state.filter(|s| !s.is_empty());
    Self { state, children }
  }

  pub fn for_root_only(state: Option<Snapshot>) -> Self {
    Self::new(state, Vec::new())
  }

  pub fn state(&self) -> Option<&Snapshot> {
    self.state.as_ref()
  }

  pub fn children(&self) -> &[ChildFrame] {
    &self.children
  }

  /// Look up a child frame by exact identity bytes and key.
  pub fn child(&self, id: &FrameId) -> Option<&TreeSnapshot> {
    self
      .children
      .iter()
      .find(|frame| &frame.id == id)
      .map(|frame| &frame.snapshot)
  }

  pub fn into_parts(self) -> (Option<Snapshot>, Vec<ChildFrame>) {
    (self.state, self.children)
  }

  /// Total number of frames in the tree, the root included.
  pub fn frame_count(&self) -> usize {
    let mut count = 0;
    let mut pending = vec![self];
    while let Some(tree) = pending.pop() {
      count += 1;
      pending.extend(tree.children.iter().map(|frame| &frame.snapshot));
    }
    count
  }

  pub fn to_bytes(&self) -> Bytes {
    codec::encode_tree(self)
  }

  pub fn parse(bytes: impl Into<Bytes>) -> Result<Self, SnapshotError> {
    codec::decode_tree(bytes)
  }
}
