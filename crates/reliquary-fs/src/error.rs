//! Error types for filesystem operations.
//!
//! Every failure raised by the engine carries exactly one POSIX-style
//! [`Errno`] and, where one is known, the offending node.
//!
//! # Examples
//!
//! ```
//! use reliquary_fs::{Errno, FsError};
//!
//! let error = FsError::new(Errno::ENOENT);
//!
//! assert!(error.is_not_found());
//! assert_eq!(error.errno().code(), 2);
//! ```

use crate::node::NodeId;
use std::fmt;
use thiserror::Error;

/// Closed set of error codes surfaced by the filesystem.
///
/// Numeric values follow Linux.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Errno {
    /// Operation not permitted for this node kind.
    EPERM,
    /// No such file or directory.
    ENOENT,
    /// Bad or closed file descriptor.
    EBADF,
    /// Permission denied.
    EACCES,
    /// Resource busy (mount point, open streams).
    EBUSY,
    /// Name already exists.
    EEXIST,
    /// Expected a directory.
    ENOTDIR,
    /// Expected something other than a directory.
    EISDIR,
    /// Invalid argument.
    EINVAL,
    /// Too many open files.
    EMFILE,
    /// Illegal seek.
    ESPIPE,
    /// Operation not implemented.
    ENOSYS,
    /// Directory not empty.
    ENOTEMPTY,
    /// Too many levels of symbolic links.
    ELOOP,
}

impl Errno {
    /// Returns the Linux numeric value of this code.
    ///
    /// # Examples
    ///
    /// ```
    /// use reliquary_fs::Errno;
    ///
    /// assert_eq!(Errno::EEXIST.code(), 17);
    /// assert_eq!(Errno::ELOOP.code(), 40);
    /// ```
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::EPERM => 1,
            Self::ENOENT => 2,
            Self::EBADF => 9,
            Self::EACCES => 13,
            Self::EBUSY => 16,
            Self::EEXIST => 17,
            Self::ENOTDIR => 20,
            Self::EISDIR => 21,
            Self::EINVAL => 22,
            Self::EMFILE => 24,
            Self::ESPIPE => 29,
            Self::ENOSYS => 38,
            Self::ENOTEMPTY => 39,
            Self::ELOOP => 40,
        }
    }

    /// Returns the symbolic name, e.g. `"ENOENT"`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::EPERM => "EPERM",
            Self::ENOENT => "ENOENT",
            Self::EBADF => "EBADF",
            Self::EACCES => "EACCES",
            Self::EBUSY => "EBUSY",
            Self::EEXIST => "EEXIST",
            Self::ENOTDIR => "ENOTDIR",
            Self::EISDIR => "EISDIR",
            Self::EINVAL => "EINVAL",
            Self::EMFILE => "EMFILE",
            Self::ESPIPE => "ESPIPE",
            Self::ENOSYS => "ENOSYS",
            Self::ENOTEMPTY => "ENOTEMPTY",
            Self::ELOOP => "ELOOP",
        }
    }

    /// Returns a short human-readable description.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::EPERM => "operation not permitted",
            Self::ENOENT => "no such file or directory",
            Self::EBADF => "bad file descriptor",
            Self::EACCES => "permission denied",
            Self::EBUSY => "device or resource busy",
            Self::EEXIST => "file exists",
            Self::ENOTDIR => "not a directory",
            Self::EISDIR => "is a directory",
            Self::EINVAL => "invalid argument",
            Self::EMFILE => "too many open files",
            Self::ESPIPE => "illegal seek",
            Self::ENOSYS => "function not implemented",
            Self::ENOTEMPTY => "directory not empty",
            Self::ELOOP => "too many levels of symbolic links",
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.description())
    }
}

/// Error raised by a filesystem operation.
///
/// # Examples
///
/// ```
/// use reliquary_fs::{Errno, FsError, NodeId};
///
/// let error = FsError::with_node(Errno::EACCES, NodeId::ROOT);
///
/// assert!(error.is_permission_denied());
/// assert_eq!(error.node(), Some(NodeId::ROOT));
/// ```
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{errno}")]
pub struct FsError {
    errno: Errno,
    node: Option<NodeId>,
}

impl FsError {
    /// Creates an error carrying only a code.
    #[must_use]
    pub const fn new(errno: Errno) -> Self {
        Self { errno, node: None }
    }

    /// Creates an error that names the node it concerns.
    #[must_use]
    pub const fn with_node(errno: Errno, node: NodeId) -> Self {
        Self {
            errno,
            node: Some(node),
        }
    }

    /// Returns the error code.
    #[must_use]
    pub const fn errno(&self) -> Errno {
        self.errno
    }

    /// Returns the offending node, if recorded.
    #[must_use]
    pub const fn node(&self) -> Option<NodeId> {
        self.node
    }

    /// Returns `true` if this is `ENOENT`.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.errno, Errno::ENOENT)
    }

    /// Returns `true` if this is `EEXIST`.
    #[must_use]
    pub const fn is_exists(&self) -> bool {
        matches!(self.errno, Errno::EEXIST)
    }

    /// Returns `true` if this is `EACCES` or `EPERM`.
    #[must_use]
    pub const fn is_permission_denied(&self) -> bool {
        matches!(self.errno, Errno::EACCES | Errno::EPERM)
    }

    /// Returns `true` if this is `ELOOP`.
    #[must_use]
    pub const fn is_loop(&self) -> bool {
        matches!(self.errno, Errno::ELOOP)
    }

    /// Returns `true` if this is `EBADF`.
    #[must_use]
    pub const fn is_bad_descriptor(&self) -> bool {
        matches!(self.errno, Errno::EBADF)
    }
}

impl From<Errno> for FsError {
    fn from(errno: Errno) -> Self {
        Self::new(errno)
    }
}

impl PartialEq<Errno> for FsError {
    fn eq(&self, other: &Errno) -> bool {
        self.errno == *other
    }
}

/// Errors raised while loading or validating [`crate::FsConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    /// TOML could not be parsed into a configuration.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A configuration value is out of range.
    #[error("Invalid configuration value for {field}: {reason}")]
    Invalid {
        /// Name of the offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

/// Errors raised by [`crate::FsBuilder::build`].
#[derive(Error, Debug)]
pub enum BuildError {
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A seeded entry could not be created.
    #[error("Failed to seed {path}: {source}")]
    Seed {
        /// Path of the entry
        path: String,
        /// Underlying filesystem error
        #[source]
        source: FsError,
    },
}

impl BuildError {
    /// Returns the filesystem error behind a failed seed, if any.
    #[must_use]
    pub const fn fs_error(&self) -> Option<&FsError> {
        match self {
            Self::Seed { source, .. } => Some(source),
            Self::Config(_) => None,
        }
    }
}

/// Type alias for filesystem operation results.
pub type Result<T> = std::result::Result<T, FsError>;
