//! Path utilities.
//!
//! Pure string functions over `/`-separated POSIX-style paths. Nothing here
//! touches filesystem state; the engine layers its working directory on top
//! through [`resolve`].
//!
//! # Examples
//!
//! ```
//! use reliquary_fs::path;
//!
//! assert_eq!(path::normalize("/var/./log/../tmp/"), "/var/tmp/");
//! assert_eq!(path::resolve("/home", &["docs", "../notes.txt"]), "/home/notes.txt");
//! assert_eq!(path::basename("/var/log/app.log"), "app.log");
//! assert_eq!(path::dirname("/var/log/app.log"), "/var/log");
//! ```

/// Splits `path` into its non-empty components.
///
/// ```
/// use reliquary_fs::path;
///
/// assert_eq!(path::components("//a/./b/"), vec!["a", ".", "b"]);
/// ```
#[must_use]
pub fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|p| !p.is_empty()).collect()
}

/// Collapses `.` and `..` segments in a component list.
///
/// A `..` consumes the nearest preceding regular component. Leftover `..`
/// segments are kept at the front only when `allow_above_root` is set,
/// otherwise they are dropped (an absolute path cannot climb above `/`).
#[must_use]
pub fn normalize_array<'a>(parts: &[&'a str], allow_above_root: bool) -> Vec<&'a str> {
    let mut out: Vec<&'a str> = Vec::with_capacity(parts.len());

    for &part in parts {
        match part {
            "." | "" => {}
            ".." => {
                if out.last().is_some_and(|last| *last != "..") {
                    out.pop();
                } else if allow_above_root {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }

    out
}

/// Normalizes a path string.
///
/// Preserves absoluteness and a trailing slash. An empty relative result
/// becomes `"."`.
///
/// ```
/// use reliquary_fs::path::normalize;
///
/// assert_eq!(normalize("/a/b/../c"), "/a/c");
/// assert_eq!(normalize("/../.."), "/");
/// assert_eq!(normalize("a/.."), ".");
/// assert_eq!(normalize("../x/"), "../x/");
/// ```
#[must_use]
pub fn normalize(path: &str) -> String {
    let is_absolute = path.starts_with('/');
    let trailing_slash = path.ends_with('/');

    let parts = components(path);
    let mut normalized = normalize_array(&parts, !is_absolute).join("/");

    if normalized.is_empty() && !is_absolute {
        normalized.push('.');
    }

    if !normalized.is_empty() && trailing_slash {
        normalized.push('/');
    }

    if is_absolute {
        format!("/{normalized}")
    } else {
        normalized
    }
}

/// Resolves `paths` right to left against `cwd`, like successive `cd`s.
///
/// Concatenation stops at the first absolute argument; `cwd` is only
/// consulted when no argument is absolute. An empty argument reached during
/// the scan aborts resolution and yields an empty string, which callers
/// report as "no such entry".
///
/// ```
/// use reliquary_fs::path::resolve;
///
/// assert_eq!(resolve("/home", &["a", "/etc", "hosts"]), "/etc/hosts");
/// assert_eq!(resolve("/home", &["a/b"]), "/home/a/b");
/// assert_eq!(resolve("/home", &[""]), "");
/// ```
#[must_use]
pub fn resolve(cwd: &str, paths: &[&str]) -> String {
    let mut segments: Vec<&str> = Vec::new();
    let mut absolute = false;

    for path in paths.iter().rev().copied().chain(std::iter::once(cwd)) {
        if path.is_empty() {
            return String::new();
        }

        segments.push(path);

        if path.starts_with('/') {
            absolute = true;
            break;
        }
    }

    let joined = segments
        .iter()
        .rev()
        .flat_map(|segment| components(segment))
        .collect::<Vec<_>>();
    let resolved = normalize_array(&joined, !absolute).join("/");

    if absolute {
        format!("/{resolved}")
    } else if resolved.is_empty() {
        ".".to_string()
    } else {
        resolved
    }
}

/// Joins two paths and normalizes the result.
///
/// ```
/// use reliquary_fs::path::join2;
///
/// assert_eq!(join2("/var", "log"), "/var/log");
/// assert_eq!(join2("/", "etc"), "/etc");
/// ```
#[must_use]
pub fn join2(left: &str, right: &str) -> String {
    normalize(&format!("{left}/{right}"))
}

/// Returns the final component of `path`.
///
/// Trailing slashes are ignored and `/` maps to itself.
///
/// ```
/// use reliquary_fs::path::basename;
///
/// assert_eq!(basename("/"), "/");
/// assert_eq!(basename("/a/b/"), "b");
/// assert_eq!(basename("name"), "name");
/// ```
#[must_use]
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');

    if trimmed.is_empty() {
        return if path.is_empty() { "" } else { "/" };
    }

    trimmed
        .rfind('/')
        .map_or(trimmed, |pos| &trimmed[pos + 1..])
}

/// Returns everything before the final component of `path`.
///
/// ```
/// use reliquary_fs::path::dirname;
///
/// assert_eq!(dirname("/a/b"), "/a");
/// assert_eq!(dirname("/a"), "/");
/// assert_eq!(dirname("a"), ".");
/// assert_eq!(dirname("a/b/"), "a");
/// ```
#[must_use]
pub fn dirname(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');

    if trimmed.is_empty() {
        return if path.is_empty() { "." } else { "/" };
    }

    match trimmed.rfind('/') {
        None => ".",
        Some(pos) => {
            let dir = trimmed[..pos].trim_end_matches('/');
            if dir.is_empty() { "/" } else { dir }
        }
    }
}
