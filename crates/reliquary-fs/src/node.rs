//! Node model.
//!
//! Nodes live in an arena owned by [`crate::MemFs`] and refer to each other
//! by [`NodeId`]. The id doubles as the inode number and as the arena index.
//! A directory's `contents` map is the authoritative parent/child relation;
//! the `parent` field is a back-reference and a root node is its own parent.

use crate::mode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Inode number of a node, unique for the lifetime of a [`crate::MemFs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u64);

impl NodeId {
    /// The top-level root directory of every filesystem.
    pub const ROOT: Self = Self(0);

    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw inode number.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mount bookkeeping stored on the root of a mounted tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    /// Absolute path of the directory the tree is spliced onto.
    pub mountpoint: String,
    /// The directory node carrying the `mounted` reference.
    pub covered: NodeId,
}

/// Variant-specific node payload.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// A directory owning its children by name.
    Directory {
        /// Child name to child id.
        contents: HashMap<String, NodeId>,
        /// Root of a filesystem mounted on this directory.
        mounted: Option<NodeId>,
    },
    /// A regular file backed by a growable byte buffer.
    File {
        /// File data; its length is the file size.
        contents: Vec<u8>,
    },
    /// A symbolic link.
    Symlink {
        /// Link target, stored verbatim.
        target: String,
    },
    /// A character device; only its attributes are modelled.
    CharDevice {
        /// Device number reported as `rdev`.
        rdev: u64,
    },
}

/// A node in the tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) mode: u32,
    pub(crate) parent: NodeId,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) mount: Option<MountInfo>,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub(crate) fn new(id: NodeId, parent: NodeId, name: &str, mode: u32, kind: NodeKind) -> Self {
        Self {
            id,
            name: name.to_string(),
            mode,
            parent,
            timestamp: Utc::now(),
            mount: None,
            kind,
        }
    }

    /// Builds the node kind implied by the type bits of `mode`.
    pub(crate) fn kind_for_mode(mode: u32, dev: u64) -> NodeKind {
        if mode::is_file(mode) {
            NodeKind::File {
                contents: Vec::new(),
            }
        } else if mode::is_chrdev(mode) {
            NodeKind::CharDevice { rdev: dev }
        } else if mode::is_link(mode) {
            NodeKind::Symlink {
                target: String::new(),
            }
        } else {
            NodeKind::Directory {
                contents: HashMap::new(),
                mounted: None,
            }
        }
    }

    /// Returns the inode number.
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// Returns the node's own path component.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the packed mode bits.
    #[must_use]
    pub const fn mode(&self) -> u32 {
        self.mode
    }

    /// Returns the parent id; a root returns its own id.
    #[must_use]
    pub const fn parent(&self) -> NodeId {
        self.parent
    }

    /// Returns the last-modified time.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the variant payload.
    #[must_use]
    pub const fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Returns `true` for the root of a tree.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent == self.id
    }

    /// Returns `true` for directories.
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    /// Returns `true` for regular files.
    #[must_use]
    pub const fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File { .. })
    }

    /// Returns `true` for symbolic links.
    #[must_use]
    pub const fn is_link(&self) -> bool {
        matches!(self.kind, NodeKind::Symlink { .. })
    }

    /// Returns the mounted root if this directory is a mount point.
    #[must_use]
    pub const fn mounted(&self) -> Option<NodeId> {
        match &self.kind {
            NodeKind::Directory { mounted, .. } => *mounted,
            _ => None,
        }
    }

    /// Returns the mount this root belongs to, if any.
    #[must_use]
    pub const fn mount_info(&self) -> Option<&MountInfo> {
        self.mount.as_ref()
    }

    /// Returns the file data for regular files.
    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        match &self.kind {
            NodeKind::File { contents } => Some(contents),
            _ => None,
        }
    }

    /// Returns the child id named `name`, if this is a directory.
    pub(crate) fn child(&self, name: &str) -> Option<NodeId> {
        match &self.kind {
            NodeKind::Directory { contents, .. } => contents.get(name).copied(),
            _ => None,
        }
    }
}

/// Stat-like attribute record produced by `getattr`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stat {
    /// Device id; character devices report their own inode.
    pub dev: u64,
    /// Inode number.
    pub ino: u64,
    /// Packed mode bits.
    pub mode: u32,
    /// Link count; always 1.
    pub nlink: u32,
    /// Owner id; always 0.
    pub uid: u32,
    /// Group id; always 0.
    pub gid: u32,
    /// Device number for character devices.
    pub rdev: u64,
    /// Size in bytes.
    pub size: u64,
    /// Access time.
    pub atime: DateTime<Utc>,
    /// Modification time.
    pub mtime: DateTime<Utc>,
    /// Status change time.
    pub ctime: DateTime<Utc>,
    /// Preferred block size.
    pub blksize: u64,
    /// Number of blocks.
    pub blocks: u64,
}

/// Attribute changes applied by `setattr`. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetAttr {
    /// New mode bits.
    pub mode: Option<u32>,
    /// New modification time.
    pub timestamp: Option<DateTime<Utc>>,
    /// New size; only meaningful for regular files.
    pub size: Option<usize>,
}
