//! Node and stream operations.
//!
//! Each operation matches exhaustively on [`NodeKind`]; a kind that lacks a
//! capability reports it through the `supports_*` predicates or fails with
//! the appropriate code. These functions see a single node at a time. Tree
//! and index bookkeeping stays in [`crate::MemFs`].

use crate::error::{Errno, FsError, Result};
use crate::node::{Node, NodeId, NodeKind, SetAttr, Stat};
use crate::stream::Whence;

/// Block size reported by `getattr`.
pub const BLOCK_SIZE: u64 = 4096;

/// Nominal size reported for directories.
pub const DIR_SIZE: u64 = 4096;

/// Returns `true` if `node` can resolve children by name.
#[must_use]
pub const fn supports_lookup(node: &Node) -> bool {
    match node.kind {
        NodeKind::Directory { .. } => true,
        NodeKind::File { .. } | NodeKind::Symlink { .. } | NodeKind::CharDevice { .. } => false,
    }
}

/// Returns `true` if new nodes can be created inside `node`.
#[must_use]
pub const fn supports_mknod(node: &Node) -> bool {
    supports_lookup(node)
}

/// Returns `true` if `node` accepts attribute changes.
#[must_use]
pub const fn supports_setattr(node: &Node) -> bool {
    match node.kind {
        NodeKind::Directory { .. } | NodeKind::File { .. } | NodeKind::CharDevice { .. } => true,
        NodeKind::Symlink { .. } => false,
    }
}

/// Returns `true` if streams on `node` can read, write and seek.
#[must_use]
pub const fn supports_stream_io(node: &Node) -> bool {
    match node.kind {
        NodeKind::File { .. } => true,
        NodeKind::Directory { .. } | NodeKind::Symlink { .. } | NodeKind::CharDevice { .. } => {
            false
        }
    }
}

/// Synthesizes a stat record for `node`.
#[must_use]
pub fn getattr(node: &Node) -> Stat {
    let (size, rdev, dev) = match &node.kind {
        NodeKind::Directory { .. } => (DIR_SIZE, 0, 1),
        NodeKind::File { contents } => (contents.len() as u64, 0, 1),
        NodeKind::Symlink { target } => (target.len() as u64, 0, 1),
        NodeKind::CharDevice { rdev } => (0, *rdev, node.id.as_u64()),
    };

    Stat {
        dev,
        ino: node.id.as_u64(),
        mode: node.mode,
        nlink: 1,
        uid: 0,
        gid: 0,
        rdev,
        size,
        atime: node.timestamp,
        mtime: node.timestamp,
        ctime: node.timestamp,
        blksize: BLOCK_SIZE,
        blocks: size.div_ceil(BLOCK_SIZE),
    }
}

/// Returns the child of `parent` called `name`.
///
/// # Errors
///
/// `ENOENT` if no such child exists, `ENOTDIR` if `parent` is not a
/// directory.
pub fn lookup(parent: &Node, name: &str) -> Result<NodeId> {
    match &parent.kind {
        NodeKind::Directory { .. } => parent
            .child(name)
            .ok_or_else(|| FsError::with_node(Errno::ENOENT, parent.id)),
        NodeKind::File { .. } | NodeKind::Symlink { .. } | NodeKind::CharDevice { .. } => {
            Err(FsError::with_node(Errno::ENOTDIR, parent.id))
        }
    }
}

/// Creates a node of the kind implied by `mode` under `parent`.
///
/// The child is linked into `parent`'s contents and returned so the caller
/// can place it in the arena and the name index.
///
/// # Errors
///
/// `EPERM` if `parent` cannot hold children.
pub fn mknod(parent: &mut Node, id: NodeId, name: &str, mode: u32, dev: u64) -> Result<Node> {
    let parent_id = parent.id;
    match &mut parent.kind {
        NodeKind::Directory { contents, .. } => {
            let node = Node::new(id, parent_id, name, mode, Node::kind_for_mode(mode, dev));
            contents.insert(name.to_string(), id);
            Ok(node)
        }
        NodeKind::File { .. } | NodeKind::Symlink { .. } | NodeKind::CharDevice { .. } => {
            Err(FsError::with_node(Errno::EPERM, parent_id))
        }
    }
}

/// Lists a directory: `.` and `..` followed by every child name.
///
/// Child order is unspecified.
///
/// # Errors
///
/// `ENOTDIR` if `node` is not a directory.
pub fn readdir(node: &Node) -> Result<Vec<String>> {
    match &node.kind {
        NodeKind::Directory { contents, .. } => {
            let mut entries = Vec::with_capacity(contents.len() + 2);
            entries.push(".".to_string());
            entries.push("..".to_string());
            entries.extend(contents.keys().cloned());
            Ok(entries)
        }
        NodeKind::File { .. } | NodeKind::Symlink { .. } | NodeKind::CharDevice { .. } => {
            Err(FsError::with_node(Errno::ENOTDIR, node.id))
        }
    }
}

/// Applies attribute changes to `node`.
///
/// # Errors
///
/// `EPERM` if the node kind has no `setattr`, `EISDIR` when resizing a
/// directory, `EINVAL` when resizing a symlink or device.
pub fn setattr(node: &mut Node, attr: &SetAttr) -> Result<()> {
    if !supports_setattr(node) {
        return Err(FsError::with_node(Errno::EPERM, node.id));
    }

    if let Some(size) = attr.size {
        match &mut node.kind {
            NodeKind::File { contents } => resize(contents, size),
            NodeKind::Directory { .. } => return Err(FsError::with_node(Errno::EISDIR, node.id)),
            NodeKind::Symlink { .. } | NodeKind::CharDevice { .. } => {
                return Err(FsError::with_node(Errno::EINVAL, node.id));
            }
        }
    }

    if let Some(mode) = attr.mode {
        node.mode = mode;
    }

    if let Some(timestamp) = attr.timestamp {
        node.timestamp = timestamp;
    }

    Ok(())
}

/// Resizes a file buffer, zero-filling growth.
///
/// Resizing to zero replaces the buffer with a fresh empty one.
pub fn resize(contents: &mut Vec<u8>, size: usize) {
    if size == 0 {
        if !contents.is_empty() {
            *contents = Vec::new();
        }
        return;
    }

    contents.resize(size, 0);
}

/// Computes a seek target for a stream at `position` on `node`.
///
/// Does not move the stream; the caller applies the result.
///
/// # Errors
///
/// `EINVAL` if the result would be negative.
pub fn llseek(node: &Node, position: u64, offset: i64, whence: Whence) -> Result<u64> {
    let base = match whence {
        Whence::Set => 0,
        Whence::Current => i128::from(position),
        Whence::End => match &node.kind {
            NodeKind::File { contents } => contents.len() as i128,
            NodeKind::Directory { .. } | NodeKind::Symlink { .. } | NodeKind::CharDevice { .. } => {
                0
            }
        },
    };

    let target = base + i128::from(offset);
    u64::try_from(target).map_err(|_| FsError::with_node(Errno::EINVAL, node.id))
}

/// Copies bytes at `position` from `node` into `dest`.
///
/// Returns 0 at or past end of file, otherwise `min(dest.len(), remaining)`.
///
/// # Errors
///
/// `EINVAL` if the node is not a regular file.
pub fn read(node: &Node, dest: &mut [u8], position: u64) -> Result<usize> {
    let NodeKind::File { contents } = &node.kind else {
        return Err(FsError::with_node(Errno::EINVAL, node.id));
    };

    let Ok(start) = usize::try_from(position) else {
        return Ok(0);
    };
    if start >= contents.len() {
        return Ok(0);
    }

    let size = dest.len().min(contents.len() - start);
    dest[..size].copy_from_slice(&contents[start..start + size]);
    Ok(size)
}

/// Writes `src` into `node` at `position`, growing the buffer as needed.
///
/// Writes are never partial: the return value is always `src.len()`.
///
/// # Errors
///
/// `EINVAL` if the node is not a regular file or the end offset does not
/// fit in memory.
pub fn write(node: &mut Node, src: &[u8], position: u64) -> Result<usize> {
    let id = node.id;
    let NodeKind::File { contents } = &mut node.kind else {
        return Err(FsError::with_node(Errno::EINVAL, id));
    };

    let start = usize::try_from(position).map_err(|_| FsError::with_node(Errno::EINVAL, id))?;
    let end = start
        .checked_add(src.len())
        .ok_or_else(|| FsError::with_node(Errno::EINVAL, id))?;

    if end > contents.len() {
        contents.resize(end, 0);
    }
    contents[start..end].copy_from_slice(src);
    Ok(src.len())
}
