//! Length-prefixed byte codec.
//!
//! Every variable-length field is written as a big-endian `u32` length followed by
//! the raw bytes. Frame trees and node identities are both built from these
//! primitives, so the helpers are public for the runtime's identity encoding.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::error::SnapshotError;
use crate::tree::{ChildFrame, FrameId, TreeSnapshot};

/// Deepest child frame a decode keeps. Frames nested below it are dropped.
pub const MAX_DEPTH: usize = 512;

/// Write `bytes` prefixed with its length.
pub fn put_bytes_with_length(buf: &mut BytesMut, bytes: &[u8]) {
  debug_assert!(bytes.len() <= u32::MAX as usize);
  buf.put_u32(bytes.len() as u32);
  buf.put_slice(bytes);
}

/// Write a UTF-8 string prefixed with its byte length.
pub fn put_str_with_length(buf: &mut BytesMut, value: &str) {
  put_bytes_with_length(buf, value.as_bytes());
}

/// Cursor over an immutable byte buffer. Slices are zero-copy views.
#[derive(Debug, Clone)]
pub struct ByteReader {
  buf: Bytes,
}

impl ByteReader {
  pub fn new(bytes: impl Into<Bytes>) -> Self {
    Self { buf: bytes.into() }
  }

  pub fn remaining(&self) -> usize {
    self.buf.remaining()
  }

  pub fn is_empty(&self) -> bool {
    self.buf.is_empty()
  }

  fn ensure(&self, needed: usize) -> Result<(), SnapshotError> {
    if self.buf.remaining() < needed {
      return Err(SnapshotError::Truncated {
        needed,
        remaining: self.buf.remaining(),
      });
    }
    Ok(())
  }

  pub fn read_u8(&mut self) -> Result<u8, SnapshotError> {
    self.ensure(1)?;
    Ok(self.buf.get_u8())
  }

  pub fn read_u32(&mut self) -> Result<u32, SnapshotError> {
    self.ensure(4)?;
    Ok(self.buf.get_u32())
  }

  pub fn read_bytes_with_length(&mut self) -> Result<Bytes, SnapshotError> {
    let len = self.read_u32()? as usize;
    self.ensure(len)?;
    Ok(self.buf.split_to(len))
  }

  pub fn read_str_with_length(&mut self) -> Result<String, SnapshotError> {
    let bytes = self.read_bytes_with_length()?;
    Ok(String::from_utf8(bytes.to_vec())?)
  }
}

/// Encode a frame tree.
///
/// ```text
/// tree     := lenBytes(state) u32(count) (lenBytes(frameId) lenBytes(tree))*
/// frameId  := lenBytes(identity) lenBytes(utf8 key)
/// ```
pub fn encode_tree(tree: &TreeSnapshot) -> Bytes {
  let mut buf = BytesMut::new();
  write_tree(&mut buf, tree);
  buf.freeze()
}

fn write_tree(buf: &mut BytesMut, tree: &TreeSnapshot) {
  let state = tree.state().map(|s| s.bytes().as_ref()).unwrap_or_default();
  put_bytes_with_length(buf, state);

  debug_assert!(tree.children().len() <= u32::MAX as usize);
  buf.put_u32(tree.children().len() as u32);
  for frame in tree.children() {
    put_bytes_with_length(buf, &frame.id.to_bytes());
    // length slot, backfilled once the subtree is written
    let slot = buf.len();
    buf.put_u32(0);
    write_tree(buf, &frame.snapshot);
    let len = buf.len() - slot - 4;
    debug_assert!(len <= u32::MAX as usize);
    buf[slot..slot + 4].copy_from_slice(&(len as u32).to_be_bytes());
  }
}

/// Decode a frame tree written by [`encode_tree`].
///
/// Decoding is best-effort below the root: a child frame whose id or subtree cannot be
/// parsed is dropped, and a truncated child list keeps the frames read so far. Only an
/// unreadable root header is an error. Frames nested deeper than [`MAX_DEPTH`] are
/// dropped as well.
pub fn decode_tree(bytes: impl Into<Bytes>) -> Result<TreeSnapshot, SnapshotError> {
  decode_at(bytes.into(), 0)
}

fn decode_at(bytes: Bytes, depth: usize) -> Result<TreeSnapshot, SnapshotError> {
  let mut reader = ByteReader::new(bytes);
  let state = reader.read_bytes_with_length()?;
  let count = reader.read_u32()?;

  let mut children = Vec::new();
  for index in 0..count {
    let (id_bytes, child_bytes) = match read_frame(&mut reader) {
      Ok(frame) => frame,
      Err(e) => {
        warn!(
          frame = index,
          expected = count,
          error = %e,
          "snapshot child list truncated, keeping frames read so far"
        );
        break;
      }
    };

    let id = match FrameId::parse(id_bytes) {
      Ok(id) => id,
      Err(e) => {
        warn!(frame = index, error = %e, "dropping snapshot frame with unreadable id");
        continue;
      }
    };

    if depth >= MAX_DEPTH {
      warn!(
        frame = index,
        key = %id.key(),
        depth = depth + 1,
        "dropping snapshot subtree nested too deep"
      );
      continue;
    }

    match decode_at(child_bytes, depth + 1) {
      Ok(snapshot) => children.push(ChildFrame { id, snapshot }),
      Err(e) => {
        warn!(
          frame = index,
          key = %id.key(),
          error = %e,
          "dropping unparseable snapshot subtree"
        );
      }
    }
  }

  if !reader.is_empty() {
    warn!(
      trailing = reader.remaining(),
      "ignoring trailing bytes after snapshot frame"
    );
  }

  let state = (!state.is_empty()).then(|| crate::Snapshot::of_bytes(state));
  Ok(TreeSnapshot::new(state, children))
}

fn read_frame(reader: &mut ByteReader) -> Result<(Bytes, Bytes), SnapshotError> {
  let id = reader.read_bytes_with_length()?;
  let tree = reader.read_bytes_with_length()?;
  Ok((id, tree))
}
