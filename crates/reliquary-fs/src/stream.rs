//! Open-file streams and descriptor allocation.

use crate::error::{Errno, FsError, Result};
use crate::mode::OpenFlags;
use crate::node::NodeId;
use std::collections::BTreeMap;
use std::fmt;

/// Default exclusive upper bound for descriptor numbers.
pub const MAX_OPEN_FDS: u32 = 4096;

/// File descriptor: a small integer naming an open [`Stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fd(u32);

impl Fd {
    /// Wraps a raw descriptor number.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw descriptor number.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Origin for [`crate::MemFs::llseek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Absolute offset (`SEEK_SET`, 0).
    Set,
    /// Relative to the current position (`SEEK_CUR`, 1).
    Current,
    /// Relative to end of file (`SEEK_END`, 2).
    End,
}

impl TryFrom<i32> for Whence {
    type Error = FsError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::Set),
            1 => Ok(Self::Current),
            2 => Ok(Self::End),
            _ => Err(FsError::new(Errno::EINVAL)),
        }
    }
}

/// An open-file handle.
///
/// The stream keeps its node alive even if the node is unlinked from the
/// tree while the stream is open.
#[derive(Debug, Clone)]
pub struct Stream {
    pub(crate) fd: Fd,
    pub(crate) node: NodeId,
    pub(crate) path: String,
    pub(crate) flags: OpenFlags,
    pub(crate) position: u64,
    pub(crate) seekable: bool,
    pub(crate) error: bool,
    pub(crate) getdents: Option<Vec<String>>,
}

impl Stream {
    pub(crate) fn new(node: NodeId, path: String, flags: OpenFlags) -> Self {
        Self {
            fd: Fd::new(0),
            node,
            path,
            flags,
            position: 0,
            seekable: true,
            error: false,
            getdents: None,
        }
    }

    /// Descriptor of this stream.
    #[must_use]
    pub const fn fd(&self) -> Fd {
        self.fd
    }

    /// Node the stream reads and writes.
    #[must_use]
    pub const fn node(&self) -> NodeId {
        self.node
    }

    /// Absolute path of the node at open time.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Flags the stream was opened with, minus `EXCL` and `TRUNC`.
    #[must_use]
    pub const fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Current cursor position.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Whether explicit positions and seeks are allowed.
    #[must_use]
    pub const fn is_seekable(&self) -> bool {
        self.seekable
    }

    /// Whether an error has been recorded on this stream.
    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.error
    }
}

/// Descriptor table mapping live descriptors to streams.
#[derive(Debug, Clone, Default)]
pub struct StreamTable {
    streams: BTreeMap<Fd, Stream>,
}

impl StreamTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lowest free descriptor in `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns `EMFILE` when every descriptor in the range is taken.
    pub fn next_fd(&self, start: u32, end: u32) -> Result<Fd> {
        (start..end)
            .map(Fd::new)
            .find(|fd| !self.streams.contains_key(fd))
            .ok_or_else(|| FsError::new(Errno::EMFILE))
    }

    /// Assigns a descriptor in `[start, end)` to `stream` and stores it.
    ///
    /// # Errors
    ///
    /// Returns `EMFILE` when the range is exhausted.
    pub fn create(&mut self, mut stream: Stream, start: u32, end: u32) -> Result<Fd> {
        let fd = self.next_fd(start, end)?;
        stream.fd = fd;
        self.streams.insert(fd, stream);
        Ok(fd)
    }

    /// Looks up an open stream.
    #[must_use]
    pub fn get(&self, fd: Fd) -> Option<&Stream> {
        self.streams.get(&fd)
    }

    pub(crate) fn get_mut(&mut self, fd: Fd) -> Option<&mut Stream> {
        self.streams.get_mut(&fd)
    }

    /// Releases a descriptor slot, returning the stream it held.
    pub fn close(&mut self, fd: Fd) -> Option<Stream> {
        self.streams.remove(&fd)
    }

    /// Returns `true` if any open stream refers to `node`.
    #[must_use]
    pub fn references(&self, node: NodeId) -> bool {
        self.streams.values().any(|stream| stream.node == node)
    }

    /// Number of open streams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Returns `true` if no stream is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Iterates over open streams in descriptor order.
    pub fn iter(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }
}
