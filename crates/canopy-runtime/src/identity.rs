//! Node identity.
//!
//! A node is matched across render passes by its [`WorkflowNodeId`]: the workflow's
//! [`WorkflowIdentity`] plus the render key its parent declared it with.

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::{BufMut, Bytes, BytesMut};
use canopy_snapshot::codec::{ByteReader, put_str_with_length};
use canopy_snapshot::{FrameId, SnapshotError};

const NO_PROXY: u8 = 0;
const PROXY: u8 = 1;

/// Names the implementing type of a workflow.
///
/// Impostor workflows (adapters that stand in for another workflow) carry the wrapped
/// workflow's identity as a proxy. Equality compares the type name and recurses through
/// the proxy chain.
#[derive(Debug, Clone)]
pub struct WorkflowIdentity {
  type_name: Cow<'static, str>,
  snapshottable: bool,
  proxied: Option<Box<WorkflowIdentity>>,
}

impl WorkflowIdentity {
  /// Identity derived from the Rust type. Stable within one build.
  pub fn of<T: ?Sized + 'static>() -> Self {
    Self::named(std::any::type_name::<T>())
  }

  /// Identity with an explicit name, stable across builds and refactors.
  pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
    Self {
      type_name: name.into(),
      snapshottable: true,
      proxied: None,
    }
  }

  /// Mark this identity as impossible to serialize. Nodes with it are never persisted.
  pub fn unsnapshottable(mut self) -> Self {
    self.snapshottable = false;
    self
  }

  /// Make this identity an impostor for `inner`.
  pub fn with_proxy(mut self, inner: WorkflowIdentity) -> Self {
    self.proxied = Some(Box::new(inner));
    self
  }

  pub fn type_name(&self) -> &str {
    &self.type_name
  }

  pub fn proxied(&self) -> Option<&WorkflowIdentity> {
    self.proxied.as_deref()
  }

  /// The innermost identity of the proxy chain.
  pub fn real_identity(&self) -> &WorkflowIdentity {
    let mut current = self;
    while let Some(inner) = current.proxied.as_deref() {
      current = inner;
    }
    current
  }

  /// Whether this identity and every identity it proxies can be serialized.
  pub fn is_snapshottable(&self) -> bool {
    self.snapshottable && self.proxied.as_ref().is_none_or(|p| p.is_snapshottable())
  }

  /// `utf8WithLength(typeName) | tag | proxiedIdentity?`, or `None` when anything in
  /// the chain is unsnapshottable.
  pub fn to_bytes(&self) -> Option<Bytes> {
    let mut buf = BytesMut::new();
    self.write(&mut buf).then(|| buf.freeze())
  }

  fn write(&self, buf: &mut BytesMut) -> bool {
    if !self.snapshottable {
      return false;
    }
    put_str_with_length(buf, &self.type_name);
    match &self.proxied {
      None => {
        buf.put_u8(NO_PROXY);
        true
      }
      Some(inner) => {
        buf.put_u8(PROXY);
        inner.write(buf)
      }
    }
  }

  pub fn parse(bytes: impl Into<Bytes>) -> Result<Self, SnapshotError> {
    let mut reader = ByteReader::new(bytes);
    let identity = Self::read(&mut reader)?;
    if !reader.is_empty() {
      return Err(SnapshotError::invalid_identity(format!(
        "{} trailing bytes",
        reader.remaining()
      )));
    }
    Ok(identity)
  }

  fn read(reader: &mut ByteReader) -> Result<Self, SnapshotError> {
    let type_name = reader.read_str_with_length()?;
    let proxied = match reader.read_u8()? {
      NO_PROXY => None,
      PROXY => Some(Box::new(Self::read(reader)?)),
      tag => {
        return Err(SnapshotError::invalid_identity(format!(
          "unknown proxy tag {tag}"
        )));
      }
    };
    Ok(Self {
      type_name: Cow::Owned(type_name),
      snapshottable: true,
      proxied,
    })
  }
}

impl PartialEq for WorkflowIdentity {
  fn eq(&self, other: &Self) -> bool {
    self.type_name == other.type_name && self.proxied == other.proxied
  }
}

impl Eq for WorkflowIdentity {}

impl Hash for WorkflowIdentity {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.type_name.hash(state);
    self.proxied.hash(state);
  }
}

impl fmt::Display for WorkflowIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.type_name)?;
    if let Some(inner) = &self.proxied {
      write!(f, "({inner})")?;
    }
    Ok(())
  }
}

/// Identity of one node instance: workflow identity plus render key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkflowNodeId {
  pub identity: WorkflowIdentity,
  pub key: String,
}

impl WorkflowNodeId {
  pub fn new(identity: WorkflowIdentity, key: impl Into<String>) -> Self {
    Self {
      identity,
      key: key.into(),
    }
  }

  /// The snapshot frame id for this node, if its identity is snapshottable.
  pub fn frame_id(&self) -> Option<FrameId> {
    let identity = self.identity.to_bytes()?;
    Some(FrameId::new(identity, self.key.clone()))
  }
}

impl fmt::Display for WorkflowNodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.key.is_empty() {
      write!(f, "{}", self.identity)
    } else {
      write!(f, "{}[{}]", self.identity, self.key)
    }
  }
}
