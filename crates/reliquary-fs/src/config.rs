//! Filesystem configuration.
//!
//! # Examples
//!
//! ```
//! use reliquary_fs::FsConfig;
//!
//! let config = FsConfig::default();
//! assert_eq!(config.name_table_size, 4096);
//! assert!(config.validate().is_ok());
//!
//! let parsed = FsConfig::from_toml_str("case_insensitive = true\ncwd = \"/home\"").unwrap();
//! assert!(parsed.case_insensitive);
//! assert_eq!(parsed.cwd, "/home");
//! assert_eq!(parsed.max_open_fds, 4096);
//! ```

use crate::error::ConfigError;
use crate::index::DEFAULT_TABLE_SIZE;
use crate::stream::MAX_OPEN_FDS;
use serde::Deserialize;

/// Settings fixed when a [`crate::MemFs`] is created.
///
/// Every field has a default, so a TOML document only needs the keys it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FsConfig {
    /// Fold names to lowercase for lookup and hashing.
    ///
    /// Default: false
    pub case_insensitive: bool,

    /// Skip every permission check.
    ///
    /// Default: false
    pub ignore_permissions: bool,

    /// Number of buckets in the name index.
    ///
    /// Default: 4096
    pub name_table_size: usize,

    /// Exclusive upper bound for descriptors handed out by `open`.
    ///
    /// Default: 4096
    pub max_open_fds: u32,

    /// Initial working directory; created if missing.
    ///
    /// Default: `/`
    pub cwd: String,

    /// Permission bits of the root directory.
    ///
    /// Default: `0o777`
    pub root_mode: u32,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            case_insensitive: false,
            ignore_permissions: false,
            name_table_size: DEFAULT_TABLE_SIZE,
            max_open_fds: MAX_OPEN_FDS,
            cwd: "/".to_string(),
            root_mode: 0o777,
        }
    }
}

impl FsConfig {
    /// Parses a configuration from TOML and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `name_table_size` is zero
    /// - `max_open_fds` is zero
    /// - `cwd` is not absolute
    /// - `root_mode` has bits outside `0o7777`
    ///
    /// # Examples
    ///
    /// ```
    /// use reliquary_fs::FsConfig;
    ///
    /// let mut invalid = FsConfig::default();
    /// invalid.max_open_fds = 0;
    /// assert!(invalid.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name_table_size == 0 {
            return Err(ConfigError::Invalid {
                field: "name_table_size",
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.max_open_fds == 0 {
            return Err(ConfigError::Invalid {
                field: "max_open_fds",
                reason: "must be greater than zero".to_string(),
            });
        }

        if !self.cwd.starts_with('/') {
            return Err(ConfigError::Invalid {
                field: "cwd",
                reason: format!("'{}' is not an absolute path", self.cwd),
            });
        }

        if self.root_mode & !0o7777 != 0 {
            return Err(ConfigError::Invalid {
                field: "root_mode",
                reason: format!("{:o} has bits outside 0o7777", self.root_mode),
            });
        }

        Ok(())
    }
}
