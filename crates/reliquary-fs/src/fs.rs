//! Filesystem engine.
//!
//! [`MemFs`] owns the node arena, the inode counter, the name index, the
//! descriptor table and the working directory. Every operation runs to
//! completion synchronously; there is no internal locking, so callers that
//! share an instance across threads must serialize access themselves.
//!
//! # Examples
//!
//! ```
//! use reliquary_fs::{MemFs, OpenFlags};
//!
//! let mut fs = MemFs::new();
//! fs.mkdir_tree("/var/log", 0o755).unwrap();
//!
//! let fd = fs.open("/var/log/app.log", OpenFlags::from_mode_str("w").unwrap(), None).unwrap();
//! fs.write(fd, b"hello", None).unwrap();
//! fs.close(fd).unwrap();
//!
//! let fd = fs.open("/var/log/app.log", OpenFlags::RDONLY, None).unwrap();
//! let mut buf = [0u8; 5];
//! assert_eq!(fs.read(fd, &mut buf, None).unwrap(), 5);
//! assert_eq!(&buf, b"hello");
//! fs.close(fd).unwrap();
//! ```

use crate::config::FsConfig;
use crate::error::{ConfigError, Errno, FsError, Result};
use crate::index::NameIndex;
use crate::mode::{
    self, Access, OpenFlags, S_IALLUGO, S_IFCHR, S_IFDIR, S_IFLNK, S_IFREG, S_IRWXUGO, S_ISVTX,
};
use crate::node::{MountInfo, Node, NodeId, NodeKind, SetAttr, Stat};
use crate::ops;
use crate::path;
use crate::stream::{Fd, Stream, StreamTable, Whence};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, trace, warn};

/// Maximum number of symlink hops while resolving one component.
pub const MAX_SYMLINK_HOPS: u32 = 40;

/// Maximum nesting of recursive path resolutions.
pub const MAX_RECURSE_DEPTH: u32 = 8;

/// Default permission bits for `mkdir`.
pub const DEFAULT_DIR_MODE: u32 = 0o777;

/// Default permission bits for files created by `open`.
pub const DEFAULT_FILE_MODE: u32 = 0o666;

/// Options controlling [`MemFs::lookup_path`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupOptions {
    /// Follow a symlink at the final component.
    pub follow: bool,
    /// Cross into a filesystem mounted at the final component.
    pub follow_mount: bool,
    /// Stop one component short and return the containing directory.
    pub parent: bool,
    /// Current recursion depth.
    pub recurse_count: u32,
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self {
            follow: false,
            follow_mount: true,
            parent: false,
            recurse_count: 0,
        }
    }
}

impl LookupOptions {
    /// Options that follow a trailing symlink.
    #[must_use]
    pub fn follow() -> Self {
        Self {
            follow: true,
            ..Self::default()
        }
    }

    /// Options that return the parent directory of the final component.
    #[must_use]
    pub fn parent() -> Self {
        Self {
            parent: true,
            ..Self::default()
        }
    }
}

/// Result of [`MemFs::lookup_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    /// Absolute path as resolved, after symlink substitution.
    pub path: String,
    /// Node found; `None` only for an empty input path.
    pub node: Option<NodeId>,
}

/// What [`MemFs::open`] and [`MemFs::truncate`] operate on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenTarget {
    /// A path to resolve.
    Path(String),
    /// An already-resolved node.
    Node(NodeId),
}

impl From<&str> for OpenTarget {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

impl From<&String> for OpenTarget {
    fn from(path: &String) -> Self {
        Self::Path(path.clone())
    }
}

impl From<String> for OpenTarget {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

impl From<NodeId> for OpenTarget {
    fn from(node: NodeId) -> Self {
        Self::Node(node)
    }
}

/// Payload for [`MemFs::write_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileData {
    /// UTF-8 text, written with a trailing NUL terminator.
    Text(String),
    /// Raw bytes, written verbatim.
    Bytes(Vec<u8>),
}

impl FileData {
    fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(text) => {
                let mut bytes = text.into_bytes();
                bytes.push(0);
                bytes
            }
            Self::Bytes(bytes) => bytes,
        }
    }
}

impl From<&str> for FileData {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for FileData {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for FileData {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for FileData {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

/// Options for [`MemFs::write_file`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteFileOptions {
    /// Open flags; defaults to `"w"`.
    pub flags: Option<OpenFlags>,
    /// Permission bits for a newly created file; defaults to `0o666`.
    pub mode: Option<u32>,
}

/// Options for [`MemFs::mount`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    /// Directory of the mounted filesystem to expose. Only `/` is supported.
    pub root: String,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            root: "/".to_string(),
        }
    }
}

/// An in-memory POSIX-flavored filesystem.
#[derive(Debug, Clone)]
pub struct MemFs {
    nodes: Vec<Option<Node>>,
    next_inode: u64,
    index: NameIndex,
    streams: StreamTable,
    orphans: HashSet<NodeId>,
    cwd: String,
    ignore_permissions: bool,
    max_open_fds: u32,
}

impl MemFs {
    /// Creates an empty filesystem with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::from_valid_config(&FsConfig::default())
    }

    /// Creates an empty filesystem from `config`.
    ///
    /// The configured working directory is created if missing.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the configuration is invalid or the
    /// working directory cannot be created.
    pub fn with_config(config: &FsConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let mut fs = Self::from_valid_config(config);

        if config.cwd != "/" {
            fs.mkdir_tree(&config.cwd, DEFAULT_DIR_MODE)
                .and_then(|()| fs.chdir(&config.cwd))
                .map_err(|e| ConfigError::Invalid {
                    field: "cwd",
                    reason: e.to_string(),
                })?;
        }

        Ok(fs)
    }

    fn from_valid_config(config: &FsConfig) -> Self {
        let mut fs = Self {
            nodes: Vec::new(),
            next_inode: 0,
            index: NameIndex::new(config.name_table_size, config.case_insensitive),
            streams: StreamTable::new(),
            orphans: HashSet::new(),
            cwd: "/".to_string(),
            ignore_permissions: config.ignore_permissions,
            max_open_fds: config.max_open_fds,
        };

        let root = fs.alloc_inode();
        let mode = S_IFDIR | (config.root_mode & (S_IRWXUGO | S_ISVTX));
        fs.nodes
            .push(Some(Node::new(root, root, "/", mode, Node::kind_for_mode(S_IFDIR, 0))));
        fs
    }

    fn alloc_inode(&mut self) -> NodeId {
        let id = NodeId::new(self.next_inode);
        self.next_inode += 1;
        id
    }

    /// Returns the node with inode `id`, if it is alive.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    fn get(&self, id: NodeId) -> Result<&Node> {
        self.node(id)
            .ok_or_else(|| FsError::with_node(Errno::ENOENT, id))
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| FsError::with_node(Errno::ENOENT, id))
    }

    /// Returns the name index.
    #[must_use]
    pub const fn index(&self) -> &NameIndex {
        &self.index
    }

    /// Returns the open stream for `fd`.
    #[must_use]
    pub fn stream(&self, fd: Fd) -> Option<&Stream> {
        self.streams.get(fd)
    }

    /// Number of open streams.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.streams.len()
    }

    /// Current working directory.
    #[must_use]
    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Enables or disables the permission bypass for privileged callers.
    pub fn set_ignore_permissions(&mut self, ignore: bool) {
        self.ignore_permissions = ignore;
    }

    /// Computes the name-index bucket for `(parent, name)`.
    #[must_use]
    pub fn hash_name(&self, parent: NodeId, name: &str) -> usize {
        self.index.hash_name(parent, name)
    }

    // ---------------------------------------------------------------------
    // Permission checks
    // ---------------------------------------------------------------------

    /// Checks `access` against the permission bits of `node`.
    ///
    /// Owner, group and other bits are not distinguished: a permission is
    /// granted when any class holds it.
    ///
    /// # Errors
    ///
    /// `EACCES` on the first unmet permission.
    pub fn node_permissions(&self, node: NodeId, access: Access) -> Result<()> {
        if self.ignore_permissions {
            return Ok(());
        }

        let mode = self.get(node)?.mode;
        for letter in [Access::READ, Access::WRITE, Access::EXEC] {
            if access.contains(letter) && mode & letter.mode_mask() == 0 {
                return Err(FsError::with_node(Errno::EACCES, node));
            }
        }
        Ok(())
    }

    /// Checks that children of `dir` may be looked up.
    ///
    /// # Errors
    ///
    /// `EACCES` without execute permission or when `dir` has no lookup.
    pub fn may_lookup(&self, dir: NodeId) -> Result<()> {
        self.node_permissions(dir, Access::EXEC)?;

        if !ops::supports_lookup(self.get(dir)?) {
            return Err(FsError::with_node(Errno::EACCES, dir));
        }
        Ok(())
    }

    /// Checks that `name` may be created in `dir`.
    ///
    /// # Errors
    ///
    /// `EEXIST` if the name is taken, `EACCES` without write and execute
    /// permission on `dir`.
    pub fn may_create(&self, dir: NodeId, name: &str) -> Result<()> {
        if self.child_exists(dir, name) {
            return Err(FsError::with_node(Errno::EEXIST, dir));
        }
        self.node_permissions(dir, Access::WRITE | Access::EXEC)
    }

    fn may_delete(&self, dir: NodeId) -> Result<()> {
        self.node_permissions(dir, Access::WRITE | Access::EXEC)
    }

    fn may_open(&self, node: NodeId, flags: OpenFlags) -> Result<()> {
        match self.get(node)?.kind {
            NodeKind::Symlink { .. } => return Err(FsError::with_node(Errno::ELOOP, node)),
            NodeKind::Directory { .. } => {
                if flags.access_mode() != OpenFlags::RDONLY || flags.contains(OpenFlags::TRUNC) {
                    return Err(FsError::with_node(Errno::EISDIR, node));
                }
            }
            NodeKind::File { .. } | NodeKind::CharDevice { .. } => {}
        }

        self.node_permissions(node, flags.required_access())
    }

    fn child_exists(&self, dir: NodeId, name: &str) -> bool {
        self.lookup_node(dir, name).is_ok()
    }

    // ---------------------------------------------------------------------
    // Resolution
    // ---------------------------------------------------------------------

    /// Resolves `name` inside `parent`.
    ///
    /// The name index is consulted first; on a miss the directory's own
    /// lookup runs.
    ///
    /// # Errors
    ///
    /// `EACCES` if `parent` may not be searched, `ENOENT` if no such child.
    pub fn lookup_node(&self, parent: NodeId, name: &str) -> Result<NodeId> {
        self.may_lookup(parent)?;

        if let Some(node) = self.index.lookup(parent, name) {
            return Ok(node);
        }

        ops::lookup(self.get(parent)?, name)
    }

    /// Follows mounts stacked on `node` down to the topmost mounted root.
    fn cross_mounts(&self, mut node: NodeId) -> Result<NodeId> {
        while let Some(root) = self.get(node)?.mounted() {
            node = root;
        }
        Ok(node)
    }

    /// Resolves `path` against the working directory to a node.
    ///
    /// An empty path yields `Lookup { path: "", node: None }`.
    ///
    /// # Errors
    ///
    /// Propagates lookup failures (`ENOENT`, `EACCES`) and fails with
    /// `ELOOP` when symlink hops or recursion depth exceed their limits.
    pub fn lookup_path(&self, path: &str, opts: LookupOptions) -> Result<Lookup> {
        let resolved = path::resolve(&self.cwd, &[path]);
        if resolved.is_empty() {
            return Ok(Lookup {
                path: String::new(),
                node: None,
            });
        }

        if opts.recurse_count > MAX_RECURSE_DEPTH {
            return Err(FsError::new(Errno::ELOOP));
        }

        trace!("Resolving path: {}", resolved);

        let parts = path::normalize_array(&path::components(&resolved), false);

        let mut current = NodeId::ROOT;
        if !parts.is_empty() || opts.follow_mount {
            current = self.cross_mounts(current)?;
        }
        let mut current_path = "/".to_string();

        for (i, part) in parts.iter().enumerate() {
            let is_last = i + 1 == parts.len();

            if is_last && opts.parent {
                break;
            }

            current = self.lookup_node(current, part)?;
            current_path = path::join2(&current_path, part);

            if !is_last || opts.follow_mount {
                current = self.cross_mounts(current)?;
            }

            if !is_last || opts.follow {
                let mut hops = 0;

                while let NodeKind::Symlink { target } = &self.get(current)?.kind {
                    if hops >= MAX_SYMLINK_HOPS {
                        return Err(FsError::with_node(Errno::ELOOP, current));
                    }
                    hops += 1;

                    let link_target = path::resolve(path::dirname(&current_path), &[target.as_str()]);
                    trace!("Following symlink to {}", link_target);

                    let lookup = self.lookup_path(
                        &link_target,
                        LookupOptions {
                            recurse_count: opts.recurse_count + 1,
                            ..LookupOptions::default()
                        },
                    )?;
                    current = lookup
                        .node
                        .ok_or_else(|| FsError::new(Errno::ENOENT))?;
                    current_path = lookup.path;
                }
            }
        }

        Ok(Lookup {
            path: current_path,
            node: Some(current),
        })
    }

    fn resolve_node(&self, path: &str, opts: LookupOptions) -> Result<NodeId> {
        self.lookup_path(path, opts)?
            .node
            .ok_or_else(|| FsError::new(Errno::ENOENT))
    }

    /// Returns `true` if `path` resolves, following symlinks.
    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.resolve_node(path, LookupOptions::follow()).is_ok()
    }

    /// Reconstructs the absolute path of `node` from its parent links.
    ///
    /// # Errors
    ///
    /// `ENOENT` if the node or one of its ancestors is gone.
    pub fn get_path(&self, node: NodeId) -> Result<String> {
        let mut names: Vec<&str> = Vec::new();
        let mut current = self.get(node)?;

        while !current.is_root() {
            names.push(&current.name);
            current = self.get(current.parent)?;
        }

        let mountpoint = current
            .mount
            .as_ref()
            .map_or("/", |mount| mount.mountpoint.as_str());

        if names.is_empty() {
            return Ok(mountpoint.to_string());
        }

        names.reverse();
        let relative = names.join("/");
        if mountpoint.ends_with('/') {
            Ok(format!("{mountpoint}{relative}"))
        } else {
            Ok(format!("{mountpoint}/{relative}"))
        }
    }

    // ---------------------------------------------------------------------
    // Node creation
    // ---------------------------------------------------------------------

    /// Creates a node at `path` whose kind follows the type bits of `mode`.
    ///
    /// # Errors
    ///
    /// `EINVAL` for an empty, `.` or `..` name or for a type other than
    /// directory, regular file, character device or symlink. `EEXIST` if the
    /// name is taken, `EACCES` without permission on the parent, `EPERM` if
    /// the parent cannot hold children.
    pub fn mknod(&mut self, path: &str, mode: u32, dev: u64) -> Result<NodeId> {
        let parent = self.resolve_node(path, LookupOptions::parent())?;
        let name = path::basename(path);

        if name.is_empty() || name == "." || name == ".." {
            return Err(FsError::new(Errno::EINVAL));
        }
        if name == "/" {
            return Err(FsError::with_node(Errno::EEXIST, parent));
        }
        let supported = mode::is_dir(mode)
            || mode::is_file(mode)
            || mode::is_chrdev(mode)
            || mode::is_link(mode);
        if !supported {
            return Err(FsError::new(Errno::EINVAL));
        }

        self.may_create(parent, name)?;

        if !ops::supports_mknod(self.get(parent)?) {
            return Err(FsError::with_node(Errno::EPERM, parent));
        }

        let id = NodeId::new(self.next_inode);
        let parent_node = self.get_mut(parent)?;
        let node = ops::mknod(parent_node, id, name, mode, dev)?;
        parent_node.timestamp = Utc::now();
        self.alloc_inode();

        self.index.insert(parent, name, id);
        self.nodes.push(Some(node));

        debug!("Created node {} at {} (mode {:o})", id, path, mode);
        Ok(id)
    }

    /// Creates a directory. Permission bits are masked to `0o1777`.
    ///
    /// # Errors
    ///
    /// As [`MemFs::mknod`].
    pub fn mkdir(&mut self, path: &str, mode: u32) -> Result<NodeId> {
        self.mknod(path, (mode & (S_IRWXUGO | S_ISVTX)) | S_IFDIR, 0)
    }

    /// Creates every missing directory along `path`.
    ///
    /// Relative paths are resolved against the working directory first.
    /// Components that already exist are skipped.
    ///
    /// # Errors
    ///
    /// The first error other than `EEXIST`.
    pub fn mkdir_tree(&mut self, path: &str, mode: u32) -> Result<()> {
        let absolute = path::resolve(&self.cwd, &[path]);
        let mut current = String::from("/");

        for part in path::components(&absolute) {
            current = path::join2(&current, part);

            match self.mkdir(&current, mode) {
                Ok(_) => {}
                Err(e) if e.errno() == Errno::EEXIST => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Creates a regular file. Permission bits are masked to `S_IALLUGO`.
    ///
    /// # Errors
    ///
    /// As [`MemFs::mknod`].
    pub fn create(&mut self, path: &str, mode: u32) -> Result<NodeId> {
        self.mknod(path, (mode & S_IALLUGO) | S_IFREG, 0)
    }

    /// Creates a character device node with device number `dev`.
    ///
    /// # Errors
    ///
    /// As [`MemFs::mknod`].
    pub fn mkdev(&mut self, path: &str, mode: u32, dev: u64) -> Result<NodeId> {
        self.mknod(path, (mode & S_IALLUGO) | S_IFCHR, dev)
    }

    /// Creates a symbolic link at `linkpath` pointing to `target`.
    ///
    /// # Errors
    ///
    /// As [`MemFs::mknod`].
    pub fn symlink(&mut self, target: &str, linkpath: &str) -> Result<NodeId> {
        let id = self.mknod(linkpath, S_IFLNK | 0o777, 0)?;
        if let NodeKind::Symlink { target: stored } = &mut self.get_mut(id)?.kind {
            target.clone_into(stored);
        }
        Ok(id)
    }

    /// Returns the target stored in the symlink at `path`.
    ///
    /// # Errors
    ///
    /// `EINVAL` if the node is not a symlink.
    pub fn readlink(&self, path: &str) -> Result<String> {
        let node = self.resolve_node(path, LookupOptions::default())?;
        match &self.get(node)?.kind {
            NodeKind::Symlink { target } => Ok(target.clone()),
            NodeKind::Directory { .. } | NodeKind::File { .. } | NodeKind::CharDevice { .. } => {
                Err(FsError::with_node(Errno::EINVAL, node))
            }
        }
    }

    // ---------------------------------------------------------------------
    // Deletion
    // ---------------------------------------------------------------------

    /// Removes a non-directory entry.
    ///
    /// A node still held open stays readable and writable through its
    /// streams until the last one closes.
    ///
    /// # Errors
    ///
    /// `ENOENT` if missing, `EISDIR` for directories, `EACCES` without write
    /// and execute permission on the parent.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let parent = self.resolve_node(path, LookupOptions::parent())?;
        let node = self.lookup_node(parent, path::basename(path))?;

        if self.get(node)?.is_dir() {
            return Err(FsError::with_node(Errno::EISDIR, node));
        }
        self.may_delete(parent)?;

        self.detach(parent, node)?;
        debug!("Unlinked {}", path);
        Ok(())
    }

    /// Removes an empty directory.
    ///
    /// # Errors
    ///
    /// `ENOTDIR` for non-directories, `EBUSY` for mount points and roots,
    /// `ENOTEMPTY` if children remain, `EACCES` without permission on the
    /// parent.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let name = path::basename(path);
        if name == "." || name == ".." {
            return Err(FsError::new(Errno::EINVAL));
        }

        let parent = self.resolve_node(path, LookupOptions::parent())?;
        if name == "/" {
            return Err(FsError::with_node(Errno::EBUSY, parent));
        }
        let node = self.lookup_node(parent, name)?;

        match &self.get(node)?.kind {
            NodeKind::Directory { contents, mounted } => {
                if mounted.is_some() {
                    return Err(FsError::with_node(Errno::EBUSY, node));
                }
                if !contents.is_empty() {
                    return Err(FsError::with_node(Errno::ENOTEMPTY, node));
                }
            }
            NodeKind::File { .. } | NodeKind::Symlink { .. } | NodeKind::CharDevice { .. } => {
                return Err(FsError::with_node(Errno::ENOTDIR, node));
            }
        }
        self.may_delete(parent)?;

        self.detach(parent, node)?;
        debug!("Removed directory {}", path);
        Ok(())
    }

    /// Unlinks `node` from `parent` and its index entry, freeing the arena
    /// slot unless a stream still holds it.
    fn detach(&mut self, parent: NodeId, node: NodeId) -> Result<()> {
        let name = self.get(node)?.name.clone();

        let parent_node = self.get_mut(parent)?;
        if let NodeKind::Directory { contents, .. } = &mut parent_node.kind {
            contents.remove(&name);
        }
        parent_node.timestamp = Utc::now();
        self.index.remove(parent, &name);

        if self.streams.references(node) {
            self.orphans.insert(node);
        } else {
            self.nodes[node.index()] = None;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Attributes
    // ---------------------------------------------------------------------

    /// Returns attributes of `path`, following symlinks.
    ///
    /// # Errors
    ///
    /// Resolution errors.
    pub fn stat(&self, path: &str) -> Result<Stat> {
        let node = self.resolve_node(path, LookupOptions::follow())?;
        Ok(ops::getattr(self.get(node)?))
    }

    /// Returns attributes of `path` without following a final symlink.
    ///
    /// # Errors
    ///
    /// Resolution errors.
    pub fn lstat(&self, path: &str) -> Result<Stat> {
        let node = self.resolve_node(path, LookupOptions::default())?;
        Ok(ops::getattr(self.get(node)?))
    }

    /// Returns attributes of the node behind `fd`.
    ///
    /// # Errors
    ///
    /// `EBADF` if `fd` is not open.
    pub fn fstat(&self, fd: Fd) -> Result<Stat> {
        let stream = self.streams.get(fd).ok_or_else(|| FsError::new(Errno::EBADF))?;
        Ok(ops::getattr(self.get(stream.node)?))
    }

    /// Replaces the permission bits of `path`, keeping its type bits.
    ///
    /// # Errors
    ///
    /// `EPERM` if the node kind does not accept attribute changes.
    pub fn chmod(&mut self, path: &str, mode: u32) -> Result<()> {
        let node = self.resolve_node(path, LookupOptions::follow())?;
        let target = self.get_mut(node)?;
        let mode = (mode & S_IALLUGO) | (target.mode & !S_IALLUGO);

        ops::setattr(
            target,
            &SetAttr {
                mode: Some(mode),
                timestamp: Some(Utc::now()),
                size: None,
            },
        )
    }

    /// Sets the modification time of `path`.
    ///
    /// # Errors
    ///
    /// `EPERM` if the node kind does not accept attribute changes.
    pub fn utime(&mut self, path: &str, timestamp: DateTime<Utc>) -> Result<()> {
        let node = self.resolve_node(path, LookupOptions::follow())?;
        ops::setattr(
            self.get_mut(node)?,
            &SetAttr {
                timestamp: Some(timestamp),
                ..SetAttr::default()
            },
        )
    }

    /// Resizes a regular file, zero-filling growth.
    ///
    /// # Errors
    ///
    /// `EINVAL` for a negative length or a non-file, `EISDIR` for a
    /// directory, `EPERM` if the node has no `setattr`, `EACCES` without
    /// write permission.
    pub fn truncate(&mut self, target: impl Into<OpenTarget>, len: i64) -> Result<()> {
        if len < 0 {
            return Err(FsError::new(Errno::EINVAL));
        }

        let node = match target.into() {
            OpenTarget::Path(path) => self.resolve_node(&path, LookupOptions::follow())?,
            OpenTarget::Node(node) => node,
        };
        self.truncate_node(node, len)
    }

    /// Truncates the file behind `fd`.
    ///
    /// # Errors
    ///
    /// `EBADF` if `fd` is not open, `EINVAL` if it is read-only, then as
    /// [`MemFs::truncate`].
    pub fn ftruncate(&mut self, fd: Fd, len: i64) -> Result<()> {
        let stream = self.streams.get(fd).ok_or_else(|| FsError::new(Errno::EBADF))?;
        if !stream.flags.is_writable() {
            return Err(FsError::new(Errno::EINVAL));
        }
        let node = stream.node;
        self.truncate(node, len)
    }

    fn truncate_node(&mut self, node: NodeId, len: i64) -> Result<()> {
        let size = usize::try_from(len).map_err(|_| FsError::with_node(Errno::EINVAL, node))?;
        let target = self.get(node)?;

        if !ops::supports_setattr(target) {
            return Err(FsError::with_node(Errno::EPERM, node));
        }
        if target.is_dir() {
            return Err(FsError::with_node(Errno::EISDIR, node));
        }
        if !target.is_file() {
            return Err(FsError::with_node(Errno::EINVAL, node));
        }
        self.node_permissions(node, Access::WRITE)?;

        ops::setattr(
            self.get_mut(node)?,
            &SetAttr {
                size: Some(size),
                timestamp: Some(Utc::now()),
                mode: None,
            },
        )?;
        debug!("Truncated node {} to {} bytes", node, size);
        Ok(())
    }

    /// Lists `path`: `.`, `..` and every child name in unspecified order.
    ///
    /// # Errors
    ///
    /// `ENOTDIR` if `path` is not a directory.
    pub fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let node = self.resolve_node(path, LookupOptions::follow())?;
        ops::readdir(self.get(node)?)
    }

    /// Changes the working directory.
    ///
    /// # Errors
    ///
    /// `ENOTDIR` for non-directories, `EACCES` without execute permission.
    pub fn chdir(&mut self, path: &str) -> Result<()> {
        let lookup = self.lookup_path(path, LookupOptions::follow())?;
        let node = lookup.node.ok_or_else(|| FsError::new(Errno::ENOENT))?;

        if !self.get(node)?.is_dir() {
            return Err(FsError::with_node(Errno::ENOTDIR, node));
        }
        self.node_permissions(node, Access::EXEC)?;

        debug!("Changed working directory to {}", lookup.path);
        self.cwd = lookup.path;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Streams
    // ---------------------------------------------------------------------

    /// Opens `target` with descriptors drawn from `[0, max_open_fds)`.
    ///
    /// `mode` gives the permission bits of a file created by `CREAT`
    /// (default `0o666`).
    ///
    /// # Errors
    ///
    /// See [`MemFs::open_in_range`].
    pub fn open(
        &mut self,
        target: impl Into<OpenTarget>,
        flags: OpenFlags,
        mode: Option<u32>,
    ) -> Result<Fd> {
        let end = self.max_open_fds;
        self.open_in_range(target, flags, mode, 0, end)
    }

    /// Opens `target`, allocating the lowest free descriptor in
    /// `[fd_start, fd_end)`.
    ///
    /// # Errors
    ///
    /// `ENOENT` if missing without `CREAT`, `EEXIST` for `CREAT | EXCL` on
    /// an existing node, `ENOTDIR` for `DIRECTORY` on a non-directory,
    /// `EISDIR`/`EACCES`/`ELOOP` from the access check, `EMFILE` when no
    /// descriptor is free.
    pub fn open_in_range(
        &mut self,
        target: impl Into<OpenTarget>,
        mut flags: OpenFlags,
        mode: Option<u32>,
        fd_start: u32,
        fd_end: u32,
    ) -> Result<Fd> {
        let create_mode = if flags.contains(OpenFlags::CREAT) {
            (mode.unwrap_or(DEFAULT_FILE_MODE) & S_IALLUGO) | S_IFREG
        } else {
            0
        };

        let (mut node, path) = match target.into() {
            OpenTarget::Node(node) => (Some(node), None),
            OpenTarget::Path(path) => {
                if path.is_empty() {
                    return Err(FsError::new(Errno::ENOENT));
                }
                let path = path::normalize(&path);
                let opts = LookupOptions {
                    follow: !flags.contains(OpenFlags::NOFOLLOW),
                    ..LookupOptions::default()
                };
                let node = match self.lookup_path(&path, opts) {
                    Ok(lookup) => lookup.node,
                    Err(e) if e.errno() == Errno::ENOENT => None,
                    Err(e) => return Err(e),
                };
                (node, Some(path))
            }
        };

        let mut created = false;
        if flags.contains(OpenFlags::CREAT) {
            match (node, &path) {
                (Some(existing), _) if flags.contains(OpenFlags::EXCL) => {
                    return Err(FsError::with_node(Errno::EEXIST, existing));
                }
                (Some(_), _) => {}
                (None, Some(path)) => {
                    node = Some(self.mknod(path, create_mode, 0)?);
                    created = true;
                }
                (None, None) => {}
            }
        }

        let node = node.ok_or_else(|| FsError::new(Errno::ENOENT))?;

        if mode::is_chrdev(self.get(node)?.mode) {
            flags.remove(OpenFlags::TRUNC);
        }

        if flags.contains(OpenFlags::DIRECTORY) && !self.get(node)?.is_dir() {
            return Err(FsError::with_node(Errno::ENOTDIR, node));
        }

        if !created {
            self.may_open(node, flags)?;
        }

        if flags.contains(OpenFlags::TRUNC) && !created {
            self.truncate_node(node, 0)?;
        }

        flags.remove(OpenFlags::EXCL | OpenFlags::TRUNC);

        let stream = Stream::new(node, self.get_path(node)?, flags);
        let fd = self.streams.create(stream, fd_start, fd_end)?;

        debug!("Opened node {} as fd {} ({:?})", node, fd, flags);
        Ok(fd)
    }

    /// Closes `fd` and releases its descriptor.
    ///
    /// The descriptor slot is released on every path out of this call. An
    /// unlinked node is freed once its last stream closes.
    ///
    /// # Errors
    ///
    /// `EBADF` if `fd` is not open.
    pub fn close(&mut self, fd: Fd) -> Result<()> {
        let stream = self.streams.get_mut(fd).ok_or_else(|| FsError::new(Errno::EBADF))?;
        stream.getdents = None;

        let Some(stream) = self.streams.close(fd) else {
            return Err(FsError::new(Errno::EBADF));
        };
        if stream.error {
            warn!("Closing fd {} with a recorded stream error", fd);
        }

        if self.orphans.contains(&stream.node) && !self.streams.references(stream.node) {
            self.orphans.remove(&stream.node);
            self.nodes[stream.node.index()] = None;
            debug!("Released unlinked node {}", stream.node);
        }

        debug!("Closed fd {}", fd);
        Ok(())
    }

    /// Repositions the cursor of `fd` and returns the new position.
    ///
    /// # Errors
    ///
    /// `EBADF` if closed, `ESPIPE` if the stream cannot seek, `EINVAL` for
    /// a negative result.
    pub fn llseek(&mut self, fd: Fd, offset: i64, whence: Whence) -> Result<u64> {
        let stream = self.streams.get(fd).ok_or_else(|| FsError::new(Errno::EBADF))?;
        let node = self.get(stream.node)?;

        if !stream.seekable || !ops::supports_stream_io(node) {
            return Err(FsError::with_node(Errno::ESPIPE, node.id));
        }

        let position = ops::llseek(node, stream.position, offset, whence)?;
        if let Some(stream) = self.streams.get_mut(fd) {
            stream.position = position;
        }

        trace!("Seeked fd {} to {}", fd, position);
        Ok(position)
    }

    /// Reads into `dest` from `fd`.
    ///
    /// With `position` set, reads there without moving the cursor;
    /// otherwise reads at the cursor and advances it.
    ///
    /// # Errors
    ///
    /// `EINVAL` for a negative position or a node without read support,
    /// `EBADF` if closed or write-only, `EISDIR` for directories, `ESPIPE`
    /// for an explicit position on a non-seekable stream.
    pub fn read(&mut self, fd: Fd, dest: &mut [u8], position: Option<i64>) -> Result<usize> {
        if position.is_some_and(|p| p < 0) {
            return Err(FsError::new(Errno::EINVAL));
        }

        let stream = self.streams.get(fd).ok_or_else(|| FsError::new(Errno::EBADF))?;
        if !stream.flags.is_readable() {
            return Err(FsError::new(Errno::EBADF));
        }

        let node = self.get(stream.node)?;
        if node.is_dir() {
            return Err(FsError::with_node(Errno::EISDIR, node.id));
        }
        if !ops::supports_stream_io(node) {
            return Err(FsError::with_node(Errno::EINVAL, node.id));
        }

        let offset = Self::effective_position(stream, position)?;
        let result = ops::read(node, dest, offset);
        let bytes = self.finish_io(fd, position, result)?;

        trace!("Read {} bytes from fd {} at {}", bytes, fd, offset);
        Ok(bytes)
    }

    /// Writes `src` to `fd`.
    ///
    /// With `APPEND`, the cursor first moves to end of file. With
    /// `position` set, writes there without moving the cursor; otherwise
    /// writes at the cursor and advances it.
    ///
    /// # Errors
    ///
    /// `EINVAL` for a negative position or a node without write support,
    /// `EBADF` if closed or read-only, `EISDIR` for directories, `ESPIPE`
    /// for an explicit position on a non-seekable stream.
    pub fn write(&mut self, fd: Fd, src: &[u8], position: Option<i64>) -> Result<usize> {
        if position.is_some_and(|p| p < 0) {
            return Err(FsError::new(Errno::EINVAL));
        }

        let stream = self.streams.get(fd).ok_or_else(|| FsError::new(Errno::EBADF))?;
        if !stream.flags.is_writable() {
            return Err(FsError::new(Errno::EBADF));
        }

        let node = self.get(stream.node)?;
        if node.is_dir() {
            return Err(FsError::with_node(Errno::EISDIR, node.id));
        }
        if !ops::supports_stream_io(node) {
            return Err(FsError::with_node(Errno::EINVAL, node.id));
        }

        if stream.flags.contains(OpenFlags::APPEND) {
            self.llseek(fd, 0, Whence::End)?;
        }

        let stream = self.streams.get(fd).ok_or_else(|| FsError::new(Errno::EBADF))?;
        let node_id = stream.node;
        let offset = Self::effective_position(stream, position)?;

        let target = self.get_mut(node_id)?;
        let result = ops::write(target, src, offset);
        if result.is_ok() {
            target.timestamp = Utc::now();
        }
        let bytes = self.finish_io(fd, position, result)?;

        trace!("Wrote {} bytes to fd {} at {}", bytes, fd, offset);
        Ok(bytes)
    }

    fn effective_position(stream: &Stream, position: Option<i64>) -> Result<u64> {
        match position {
            None => Ok(stream.position),
            Some(_) if !stream.seekable => Err(FsError::new(Errno::ESPIPE)),
            Some(p) => u64::try_from(p).map_err(|_| FsError::new(Errno::EINVAL)),
        }
    }

    /// Advances the cursor after cursor-relative I/O and records failures.
    fn finish_io(&mut self, fd: Fd, position: Option<i64>, result: Result<usize>) -> Result<usize> {
        let stream = self.streams.get_mut(fd).ok_or_else(|| FsError::new(Errno::EBADF))?;
        match result {
            Ok(bytes) => {
                if position.is_none() {
                    stream.position += bytes as u64;
                }
                Ok(bytes)
            }
            Err(e) => {
                stream.error = true;
                Err(e)
            }
        }
    }

    /// Returns the next entry of a directory stream, or `None` at the end.
    ///
    /// The listing is captured on first use and dropped on close.
    ///
    /// # Errors
    ///
    /// `EBADF` if `fd` is not open, `ENOTDIR` if it is not a directory.
    pub fn readdir_fd(&mut self, fd: Fd) -> Result<Option<String>> {
        let stream = self.streams.get(fd).ok_or_else(|| FsError::new(Errno::EBADF))?;

        if stream.getdents.is_none() {
            let mut entries = ops::readdir(self.get(stream.node)?)?;
            entries.reverse();
            if let Some(stream) = self.streams.get_mut(fd) {
                stream.getdents = Some(entries);
            }
        }

        Ok(self
            .streams
            .get_mut(fd)
            .and_then(|stream| stream.getdents.as_mut())
            .and_then(Vec::pop))
    }

    // ---------------------------------------------------------------------
    // Whole-file helpers
    // ---------------------------------------------------------------------

    /// Reads the whole contents of the file at `path`.
    ///
    /// # Errors
    ///
    /// Open and read errors. The stream is closed on every path.
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let fd = self.open(path, OpenFlags::RDONLY, None)?;

        let contents = self.fstat(fd).and_then(|stat| {
            let size = usize::try_from(stat.size).map_err(|_| FsError::new(Errno::EINVAL))?;
            let mut buf = vec![0u8; size];
            let read = self.read(fd, &mut buf, Some(0))?;
            buf.truncate(read);
            Ok(buf)
        });

        let closed = self.close(fd);
        let contents = contents?;
        closed?;
        Ok(contents)
    }

    /// Opens `path`, writes `data` and closes it in one call.
    ///
    /// Text is written with a trailing NUL terminator; bytes verbatim.
    ///
    /// # Errors
    ///
    /// Open and write errors. The stream is closed on every path.
    pub fn write_file(
        &mut self,
        path: &str,
        data: impl Into<FileData>,
        opts: &WriteFileOptions,
    ) -> Result<usize> {
        let flags = opts
            .flags
            .unwrap_or(OpenFlags::TRUNC | OpenFlags::CREAT | OpenFlags::WRONLY);
        let fd = self.open(path, flags, opts.mode)?;

        let bytes = data.into().into_bytes();
        let written = self.write(fd, &bytes, None);

        let closed = self.close(fd);
        let written = written?;
        closed?;
        Ok(written)
    }

    // ---------------------------------------------------------------------
    // Mounts
    // ---------------------------------------------------------------------

    /// Splices a fresh, empty filesystem onto the directory at `mountpoint`.
    ///
    /// Returns the root of the mounted tree.
    ///
    /// # Errors
    ///
    /// `ENOSYS` unless `opts.root` is `/`, `ENOTDIR` if the mount point is
    /// not a directory, `EBUSY` if something is already mounted there.
    pub fn mount(&mut self, mountpoint: &str, opts: &MountOptions) -> Result<NodeId> {
        if opts.root != "/" {
            warn!("Rejected mount of sub-root {} at {}", opts.root, mountpoint);
            return Err(FsError::new(Errno::ENOSYS));
        }

        let lookup = self.lookup_path(
            mountpoint,
            LookupOptions {
                follow: true,
                follow_mount: false,
                ..LookupOptions::default()
            },
        )?;
        let covered = lookup.node.ok_or_else(|| FsError::new(Errno::ENOENT))?;

        match self.get(covered)?.kind {
            NodeKind::Directory { mounted: Some(_), .. } => {
                return Err(FsError::with_node(Errno::EBUSY, covered));
            }
            NodeKind::Directory { mounted: None, .. } => {}
            NodeKind::File { .. } | NodeKind::Symlink { .. } | NodeKind::CharDevice { .. } => {
                return Err(FsError::with_node(Errno::ENOTDIR, covered));
            }
        }

        let root = self.alloc_inode();
        let mut node = Node::new(root, root, "/", S_IFDIR | 0o777, Node::kind_for_mode(S_IFDIR, 0));
        node.mount = Some(MountInfo {
            mountpoint: lookup.path.clone(),
            covered,
        });
        self.nodes.push(Some(node));

        if let NodeKind::Directory { mounted, .. } = &mut self.get_mut(covered)?.kind {
            *mounted = Some(root);
        }

        debug!("Mounted filesystem root {} at {}", root, lookup.path);
        Ok(root)
    }

    /// Detaches the filesystem mounted at `mountpoint` and frees its nodes.
    ///
    /// # Errors
    ///
    /// `EINVAL` if nothing is mounted there, `EBUSY` if a stream is open on
    /// any node of the mounted tree.
    pub fn unmount(&mut self, mountpoint: &str) -> Result<()> {
        let covered = self.resolve_node(
            mountpoint,
            LookupOptions {
                follow: true,
                follow_mount: false,
                ..LookupOptions::default()
            },
        )?;
        let root = self
            .get(covered)?
            .mounted()
            .ok_or_else(|| FsError::with_node(Errno::EINVAL, covered))?;

        let subtree = self.collect_subtree(root)?;
        if subtree.iter().any(|&id| self.streams.references(id)) {
            return Err(FsError::with_node(Errno::EBUSY, root));
        }

        for &id in &subtree {
            let node = self.get(id)?;
            if !node.is_root() {
                let (parent, name) = (node.parent, node.name.clone());
                self.index.remove(parent, &name);
            }
        }
        for id in subtree {
            self.orphans.remove(&id);
            self.nodes[id.index()] = None;
        }

        if let NodeKind::Directory { mounted, .. } = &mut self.get_mut(covered)?.kind {
            *mounted = None;
        }

        debug!("Unmounted {}", mountpoint);
        Ok(())
    }

    fn collect_subtree(&self, root: NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut pending = vec![root];

        while let Some(id) = pending.pop() {
            out.push(id);
            if let NodeKind::Directory { contents, mounted } = &self.get(id)?.kind {
                pending.extend(contents.values().copied());
                pending.extend(mounted.iter().copied());
            }
        }
        Ok(out)
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}
