//! Mode bits, open flags and permission sets.
//!
//! Mode values are plain `u32`s carrying POSIX `S_IF*` type bits packed
//! with permission and special bits, exactly as callers pass them.
//!
//! # Examples
//!
//! ```
//! use reliquary_fs::mode::{self, OpenFlags};
//!
//! assert!(mode::is_dir(mode::S_IFDIR | 0o755));
//!
//! let flags: OpenFlags = "w+".parse().unwrap();
//! assert!(flags.contains(OpenFlags::CREAT | OpenFlags::TRUNC));
//! assert_eq!(flags.access_mode(), OpenFlags::RDWR);
//! ```

use crate::error::{Errno, FsError};
use bitflags::bitflags;
use std::str::FromStr;

/// Mask of the file-type bits.
pub const S_IFMT: u32 = 0o170_000;
/// Directory.
pub const S_IFDIR: u32 = 0o040_000;
/// Character device.
pub const S_IFCHR: u32 = 0o020_000;
/// Block device.
pub const S_IFBLK: u32 = 0o060_000;
/// Regular file.
pub const S_IFREG: u32 = 0o100_000;
/// FIFO.
pub const S_IFIFO: u32 = 0o010_000;
/// Symbolic link.
pub const S_IFLNK: u32 = 0o120_000;
/// Socket.
pub const S_IFSOCK: u32 = 0o140_000;

/// Set-user-id bit.
pub const S_ISUID: u32 = 0o4000;
/// Set-group-id bit.
pub const S_ISGID: u32 = 0o2000;
/// Sticky bit.
pub const S_ISVTX: u32 = 0o1000;

/// Read/write/execute for owner, group and other.
pub const S_IRWXUGO: u32 = 0o777;
/// Every permission and special bit.
pub const S_IALLUGO: u32 = S_ISUID | S_ISGID | S_ISVTX | S_IRWXUGO;
/// Read for any class.
pub const S_IRUGO: u32 = 0o444;
/// Write for any class.
pub const S_IWUGO: u32 = 0o222;
/// Execute for any class.
pub const S_IXUGO: u32 = 0o111;

/// Returns `true` if `mode` carries the directory type.
#[must_use]
pub const fn is_dir(mode: u32) -> bool {
    mode & S_IFMT == S_IFDIR
}

/// Returns `true` if `mode` carries the regular-file type.
#[must_use]
pub const fn is_file(mode: u32) -> bool {
    mode & S_IFMT == S_IFREG
}

/// Returns `true` if `mode` carries the symlink type.
#[must_use]
pub const fn is_link(mode: u32) -> bool {
    mode & S_IFMT == S_IFLNK
}

/// Returns `true` if `mode` carries the character-device type.
#[must_use]
pub const fn is_chrdev(mode: u32) -> bool {
    mode & S_IFMT == S_IFCHR
}

bitflags! {
    /// Flags accepted by [`crate::MemFs::open`].
    ///
    /// Bit values follow Linux so callers can pass raw integers through
    /// [`OpenFlags::from_bits_retain`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        /// Write only.
        const WRONLY = 0o1;
        /// Read and write.
        const RDWR = 0o2;
        /// Create the file if it does not exist.
        const CREAT = 0o100;
        /// With `CREAT`, fail if the file exists.
        const EXCL = 0o200;
        /// Do not assign a controlling terminal.
        const NOCTTY = 0o400;
        /// Truncate to zero length on open.
        const TRUNC = 0o1000;
        /// Every write goes to end of file.
        const APPEND = 0o2000;
        /// Non-blocking I/O.
        const NONBLOCK = 0o4000;
        /// Synchronized data writes.
        const DSYNC = 0o10000;
        /// Fail unless the target is a directory.
        const DIRECTORY = 0o200_000;
        /// Do not follow a symlink at the final component.
        const NOFOLLOW = 0o400_000;
        /// Close on exec.
        const CLOEXEC = 0o2_000_000;
        /// Synchronized file writes.
        const SYNC = 0o4_010_000;
        /// Path-only descriptor.
        const PATH = 0o10_000_000;
    }
}

impl OpenFlags {
    /// Read only. Represented by the absence of `WRONLY` and `RDWR`.
    pub const RDONLY: Self = Self::empty();

    /// Mask covering the access-mode bits.
    pub const ACCMODE: Self = Self::WRONLY.union(Self::RDWR).union(Self::PATH);

    /// Returns only the access-mode bits.
    #[must_use]
    pub const fn access_mode(self) -> Self {
        self.intersection(Self::ACCMODE)
    }

    /// Returns `true` if the stream may be read from.
    #[must_use]
    pub fn is_readable(self) -> bool {
        !self.contains(Self::WRONLY)
    }

    /// Returns `true` if the stream may be written to.
    #[must_use]
    pub fn is_writable(self) -> bool {
        self.intersects(Self::WRONLY | Self::RDWR)
    }

    /// Translates an open-mode token like `"r+"` or `"wx"` into flags.
    ///
    /// # Errors
    ///
    /// Returns `EINVAL` for an unknown token.
    ///
    /// # Examples
    ///
    /// ```
    /// use reliquary_fs::mode::OpenFlags;
    ///
    /// assert_eq!(OpenFlags::from_mode_str("r").unwrap(), OpenFlags::RDONLY);
    /// assert_eq!(
    ///     OpenFlags::from_mode_str("a").unwrap(),
    ///     OpenFlags::APPEND | OpenFlags::CREAT | OpenFlags::WRONLY
    /// );
    /// assert!(OpenFlags::from_mode_str("rw").is_err());
    /// ```
    pub fn from_mode_str(token: &str) -> Result<Self, FsError> {
        let flags = match token {
            "r" => Self::RDONLY,
            "rs" => Self::RDONLY | Self::SYNC,
            "r+" => Self::RDWR,
            "w" => Self::TRUNC | Self::CREAT | Self::WRONLY,
            "wx" | "xw" => Self::TRUNC | Self::CREAT | Self::WRONLY | Self::EXCL,
            "w+" => Self::TRUNC | Self::CREAT | Self::RDWR,
            "wx+" | "xw+" => Self::TRUNC | Self::CREAT | Self::RDWR | Self::EXCL,
            "a" => Self::APPEND | Self::CREAT | Self::WRONLY,
            "ax" | "xa" => Self::APPEND | Self::CREAT | Self::WRONLY | Self::EXCL,
            "a+" => Self::APPEND | Self::CREAT | Self::RDWR,
            "ax+" | "xa+" => Self::APPEND | Self::CREAT | Self::RDWR | Self::EXCL,
            _ => return Err(FsError::new(Errno::EINVAL)),
        };
        Ok(flags)
    }

    /// Returns the permissions an open with these flags requires.
    ///
    /// `O_TRUNC` always adds write permission.
    #[must_use]
    pub fn required_access(self) -> Access {
        let mut access = if self.contains(Self::RDWR) {
            Access::READ | Access::WRITE
        } else if self.contains(Self::WRONLY) {
            Access::WRITE
        } else {
            Access::READ
        };

        if self.contains(Self::TRUNC) {
            access |= Access::WRITE;
        }
        access
    }
}

impl FromStr for OpenFlags {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_mode_str(s)
    }
}

bitflags! {
    /// Permission letters checked by [`crate::MemFs::node_permissions`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u8 {
        /// `r`
        const READ = 0b001;
        /// `w`
        const WRITE = 0b010;
        /// `x`
        const EXEC = 0b100;
    }
}

impl Access {
    /// Returns the `S_I?UGO` mask for a single permission letter.
    pub(crate) const fn mode_mask(self) -> u32 {
        let mut mask = 0;
        if self.contains(Self::READ) {
            mask |= S_IRUGO;
        }
        if self.contains(Self::WRITE) {
            mask |= S_IWUGO;
        }
        if self.contains(Self::EXEC) {
            mask |= S_IXUGO;
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_predicates() {
        assert!(is_dir(S_IFDIR | 0o755));
        assert!(!is_dir(S_IFREG | 0o755));
        assert!(is_file(S_IFREG));
        assert!(is_link(S_IFLNK | 0o777));
        assert!(is_chrdev(S_IFCHR | 0o666));
        assert!(!is_chrdev(S_IFBLK));
    }

    #[test]
    fn test_all_mode_tokens() {
        let table = [
            ("r", OpenFlags::RDONLY),
            ("rs", OpenFlags::SYNC),
            ("r+", OpenFlags::RDWR),
            ("w", OpenFlags::TRUNC | OpenFlags::CREAT | OpenFlags::WRONLY),
            ("wx", OpenFlags::TRUNC | OpenFlags::CREAT | OpenFlags::WRONLY | OpenFlags::EXCL),
            ("xw", OpenFlags::TRUNC | OpenFlags::CREAT | OpenFlags::WRONLY | OpenFlags::EXCL),
            ("w+", OpenFlags::TRUNC | OpenFlags::CREAT | OpenFlags::RDWR),
            ("wx+", OpenFlags::TRUNC | OpenFlags::CREAT | OpenFlags::RDWR | OpenFlags::EXCL),
            ("xw+", OpenFlags::TRUNC | OpenFlags::CREAT | OpenFlags::RDWR | OpenFlags::EXCL),
            ("a", OpenFlags::APPEND | OpenFlags::CREAT | OpenFlags::WRONLY),
            ("ax", OpenFlags::APPEND | OpenFlags::CREAT | OpenFlags::WRONLY | OpenFlags::EXCL),
            ("xa", OpenFlags::APPEND | OpenFlags::CREAT | OpenFlags::WRONLY | OpenFlags::EXCL),
            ("a+", OpenFlags::APPEND | OpenFlags::CREAT | OpenFlags::RDWR),
            ("ax+", OpenFlags::APPEND | OpenFlags::CREAT | OpenFlags::RDWR | OpenFlags::EXCL),
            ("xa+", OpenFlags::APPEND | OpenFlags::CREAT | OpenFlags::RDWR | OpenFlags::EXCL),
        ];

        for (token, expected) in table {
            assert_eq!(OpenFlags::from_mode_str(token).unwrap(), expected, "token {token}");
        }
    }

    #[test]
    fn test_unknown_token_is_einval() {
        let err = "x".parse::<OpenFlags>().unwrap_err();
        assert_eq!(err.errno(), Errno::EINVAL);
    }

    #[test]
    fn test_access_mode_helpers() {
        assert!(OpenFlags::RDONLY.is_readable());
        assert!(!OpenFlags::RDONLY.is_writable());
        assert!(!OpenFlags::WRONLY.is_readable());
        assert!(OpenFlags::RDWR.is_readable() && OpenFlags::RDWR.is_writable());
        assert_eq!((OpenFlags::RDWR | OpenFlags::APPEND).access_mode(), OpenFlags::RDWR);
    }

    #[test]
    fn test_required_access() {
        assert_eq!(OpenFlags::RDONLY.required_access(), Access::READ);
        assert_eq!(OpenFlags::WRONLY.required_access(), Access::WRITE);
        assert_eq!(OpenFlags::RDWR.required_access(), Access::READ | Access::WRITE);
        assert_eq!(
            (OpenFlags::RDONLY | OpenFlags::TRUNC).required_access(),
            Access::READ | Access::WRITE
        );
    }

    #[test]
    fn test_access_mode_mask() {
        assert_eq!(Access::READ.mode_mask(), S_IRUGO);
        assert_eq!((Access::WRITE | Access::EXEC).mode_mask(), S_IWUGO | S_IXUGO);
    }
}
