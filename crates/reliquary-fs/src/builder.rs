//! Builder for pre-populated filesystems.
//!
//! Entries are recorded in call order and created when [`FsBuilder::build`]
//! runs, after the configuration is known. Missing parent directories are
//! created along the way.
//!
//! # Examples
//!
//! ```
//! use reliquary_fs::FsBuilder;
//!
//! let mut fs = FsBuilder::new()
//!     .add_dir("/etc", 0o755)
//!     .add_file("/etc/hostname", "reliquary\n", 0o644)
//!     .add_symlink("/etc/hostname", "/hostname")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(fs.read_file("/hostname").unwrap(), b"reliquary\n");
//! ```

use crate::config::FsConfig;
use crate::error::BuildError;
use crate::fs::{DEFAULT_DIR_MODE, MemFs, WriteFileOptions};
use crate::path;
use tracing::debug;

#[derive(Debug, Clone)]
enum Seed {
    Dir { path: String, mode: u32 },
    File { path: String, data: Vec<u8>, mode: u32 },
    Symlink { target: String, path: String },
}

impl Seed {
    fn path(&self) -> &str {
        match self {
            Self::Dir { path, .. } | Self::File { path, .. } | Self::Symlink { path, .. } => path,
        }
    }
}

/// Builder for a [`MemFs`] with configuration and initial contents.
///
/// Errors from individual entries are held back until `build()`, which
/// reports the first one.
///
/// # Examples
///
/// ```
/// use reliquary_fs::FsBuilder;
///
/// let fs = FsBuilder::new()
///     .case_insensitive(true)
///     .add_file("/README", "read me", 0o644)
///     .build()
///     .unwrap();
///
/// assert!(fs.exists("/readme"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct FsBuilder {
    config: FsConfig,
    seeds: Vec<Seed>,
}

impl FsBuilder {
    /// Creates a builder with the default configuration and no entries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: FsConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets case-insensitive name lookup.
    #[must_use]
    pub const fn case_insensitive(mut self, enabled: bool) -> Self {
        self.config.case_insensitive = enabled;
        self
    }

    /// Sets the permission bypass.
    #[must_use]
    pub const fn ignore_permissions(mut self, enabled: bool) -> Self {
        self.config.ignore_permissions = enabled;
        self
    }

    /// Sets the initial working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.config.cwd = cwd.into();
        self
    }

    /// Adds a directory, creating missing ancestors.
    #[must_use]
    pub fn add_dir(mut self, path: impl Into<String>, mode: u32) -> Self {
        self.seeds.push(Seed::Dir {
            path: path.into(),
            mode,
        });
        self
    }

    /// Adds a regular file with `content` stored verbatim.
    ///
    /// # Examples
    ///
    /// ```
    /// use reliquary_fs::FsBuilder;
    ///
    /// let mut fs = FsBuilder::new()
    ///     .add_file("/a/b/c.txt", [1u8, 2, 3], 0o600)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(fs.read_file("/a/b/c.txt").unwrap(), vec![1, 2, 3]);
    /// assert_eq!(fs.stat("/a/b/c.txt").unwrap().mode & 0o777, 0o600);
    /// ```
    #[must_use]
    pub fn add_file(mut self, path: impl Into<String>, content: impl AsRef<[u8]>, mode: u32) -> Self {
        self.seeds.push(Seed::File {
            path: path.into(),
            data: content.as_ref().to_vec(),
            mode,
        });
        self
    }

    /// Adds a symlink at `path` pointing to `target`.
    #[must_use]
    pub fn add_symlink(mut self, target: impl Into<String>, path: impl Into<String>) -> Self {
        self.seeds.push(Seed::Symlink {
            target: target.into(),
            path: path.into(),
        });
        self
    }

    /// Number of entries recorded so far.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.seeds.len()
    }

    /// Consumes the builder and returns the populated filesystem.
    ///
    /// Entries are created with permission checks suspended, so a
    /// read-only directory can still be seeded with children.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Config`] for an invalid configuration, or
    /// [`BuildError::Seed`] for the first entry that could not be created.
    ///
    /// ```
    /// use reliquary_fs::{Errno, FsBuilder};
    ///
    /// let result = FsBuilder::new()
    ///     .add_file("/f", "x", 0o644)
    ///     .add_file("/f/g", "y", 0o644)
    ///     .build();
    ///
    /// let err = result.unwrap_err();
    /// assert_eq!(err.fs_error().unwrap().errno(), Errno::EACCES);
    /// ```
    pub fn build(self) -> Result<MemFs, BuildError> {
        let mut fs = MemFs::with_config(&self.config)?;
        fs.set_ignore_permissions(true);

        for seed in &self.seeds {
            Self::apply(&mut fs, seed).map_err(|source| BuildError::Seed {
                path: seed.path().to_string(),
                source,
            })?;
        }

        fs.set_ignore_permissions(self.config.ignore_permissions);
        debug!("Built filesystem with {} seeded entries", self.seeds.len());
        Ok(fs)
    }

    fn apply(fs: &mut MemFs, seed: &Seed) -> crate::Result<()> {
        match seed {
            Seed::Dir { path, mode } => fs.mkdir_tree(path, *mode),
            Seed::File { path, data, mode } => {
                fs.mkdir_tree(path::dirname(path), DEFAULT_DIR_MODE)?;
                let opts = WriteFileOptions {
                    flags: None,
                    mode: Some(*mode),
                };
                fs.write_file(path, data.as_slice(), &opts).map(|_| ())
            }
            Seed::Symlink { target, path } => {
                fs.mkdir_tree(path::dirname(path), DEFAULT_DIR_MODE)?;
                fs.symlink(target, path).map(|_| ())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, Errno};

    #[test]
    fn test_builder_new() {
        let fs = FsBuilder::new().build().unwrap();
        assert_eq!(fs.readdir("/").unwrap(), vec![".", ".."]);
    }

    #[test]
    fn test_add_dir_creates_ancestors() {
        let fs = FsBuilder::new().add_dir("/a/b/c", 0o755).build().unwrap();
        assert!(fs.exists("/a"));
        assert!(fs.exists("/a/b"));
        assert_eq!(fs.stat("/a/b/c").unwrap().mode & 0o777, 0o755);
    }

    #[test]
    fn test_add_file_is_verbatim() {
        let mut fs = FsBuilder::new()
            .add_file("/notes.txt", "no terminator", 0o644)
            .build()
            .unwrap();
        assert_eq!(fs.read_file("/notes.txt").unwrap(), b"no terminator");
    }

    #[test]
    fn test_seeding_ignores_permissions() {
        let mut fs = FsBuilder::new()
            .add_dir("/ro", 0o555)
            .add_file("/ro/inside", "x", 0o444)
            .build()
            .unwrap();

        assert!(fs.exists("/ro/inside"));
        assert_eq!(fs.create("/ro/other", 0o644).unwrap_err().errno(), Errno::EACCES);
    }

    #[test]
    fn test_first_error_is_reported() {
        let err = FsBuilder::new()
            .add_file("/dup", "a", 0o644)
            .add_symlink("/dup", "/dup")
            .add_file("/fine", "b", 0o644)
            .build()
            .unwrap_err();

        match err {
            BuildError::Seed { path, source } => {
                assert_eq!(path, "/dup");
                assert_eq!(source.errno(), Errno::EEXIST);
            }
            BuildError::Config(_) => panic!("expected a seed error"),
        }
    }

    #[test]
    fn test_invalid_config() {
        let err = FsBuilder::new().cwd("relative").build().unwrap_err();
        assert!(matches!(err, BuildError::Config(ConfigError::Invalid { field: "cwd", .. })));
    }

    #[test]
    fn test_cwd_applies_to_relative_seeds() {
        let fs = FsBuilder::new()
            .cwd("/work")
            .add_file("job.toml", "", 0o644)
            .build()
            .unwrap();

        assert_eq!(fs.cwd(), "/work");
        assert!(fs.exists("/work/job.toml"));
    }

    #[test]
    fn test_entry_count() {
        let builder = FsBuilder::new().add_dir("/a", 0o755).add_symlink("/a", "/b");
        assert_eq!(builder.entry_count(), 2);
    }
}
