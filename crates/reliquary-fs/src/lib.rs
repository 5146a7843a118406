//! In-memory hierarchical filesystem with POSIX-flavored semantics.
//!
//! The engine keeps a tree of directories, regular files, symbolic links and
//! character devices, resolves paths with symlink and mount handling, and
//! exposes descriptor-based I/O. Every failure is an [`FsError`] carrying a
//! POSIX [`Errno`].
//!
//! # Examples
//!
//! ```
//! use reliquary_fs::{Errno, MemFs, OpenFlags, WriteFileOptions};
//!
//! let mut fs = MemFs::new();
//! fs.mkdir("/tmp", 0o777).unwrap();
//! fs.write_file("/tmp/hello", "world", &WriteFileOptions::default()).unwrap();
//!
//! assert_eq!(fs.read_file("/tmp/hello").unwrap(), b"world\0");
//! assert_eq!(fs.mkdir("/tmp", 0o777).unwrap_err().errno(), Errno::EEXIST);
//!
//! let fd = fs.open("/tmp/hello", OpenFlags::from_mode_str("r").unwrap(), None).unwrap();
//! assert_eq!(fs.fstat(fd).unwrap().size, 6);
//! fs.close(fd).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations)]

pub mod builder;
pub mod config;
pub mod error;
pub mod fs;
pub mod index;
pub mod mode;
pub mod node;
pub mod ops;
pub mod path;
pub mod stream;

pub use builder::FsBuilder;
pub use config::FsConfig;
pub use error::{BuildError, ConfigError, Errno, FsError, Result};
pub use fs::{
    FileData, Lookup, LookupOptions, MemFs, MountOptions, OpenTarget, WriteFileOptions,
};
pub use index::NameIndex;
pub use mode::{Access, OpenFlags};
pub use node::{MountInfo, Node, NodeId, NodeKind, SetAttr, Stat};
pub use stream::{Fd, Stream, StreamTable, Whence};
