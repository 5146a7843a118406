//! Inode name index.
//!
//! A fixed-capacity hash table keyed by `(parent id, name)` that accelerates
//! child lookup. Collisions are chained per bucket. The table is a cache over
//! directory contents, never the source of truth: every insert and removal
//! in a directory must be mirrored here.

use crate::node::NodeId;

/// Default number of buckets.
pub const DEFAULT_TABLE_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    parent: NodeId,
    name: String,
    node: NodeId,
}

/// Hash index from `(parent, name)` to child node.
#[derive(Debug, Clone)]
pub struct NameIndex {
    buckets: Vec<Vec<Entry>>,
    case_insensitive: bool,
    len: usize,
}

impl NameIndex {
    /// Creates an index with `size` buckets.
    ///
    /// A zero size is rounded up to one bucket.
    #[must_use]
    pub fn new(size: usize, case_insensitive: bool) -> Self {
        Self {
            buckets: vec![Vec::new(); size.max(1)],
            case_insensitive,
            len: 0,
        }
    }

    /// Number of buckets.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Number of live entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no entries are indexed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn fold<'a>(&self, name: &'a str) -> std::borrow::Cow<'a, str> {
        if self.case_insensitive {
            std::borrow::Cow::Owned(name.to_lowercase())
        } else {
            std::borrow::Cow::Borrowed(name)
        }
    }

    /// Computes the bucket for `(parent, name)`.
    ///
    /// `hash = hash * 31 + unit` over the UTF-16 code units of the
    /// (optionally case-folded) name with 32-bit wraparound, added to the
    /// parent id and reduced modulo the bucket count.
    ///
    /// # Examples
    ///
    /// ```
    /// use reliquary_fs::NameIndex;
    /// use reliquary_fs::NodeId;
    ///
    /// let index = NameIndex::new(4096, false);
    /// // "a" hashes to 97, plus parent id 0.
    /// assert_eq!(index.hash_name(NodeId::ROOT, "a"), 97);
    /// ```
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn hash_name(&self, parent: NodeId, name: &str) -> usize {
        let folded = self.fold(name);
        let hash = folded
            .encode_utf16()
            .fold(0u32, |hash, unit| hash.wrapping_mul(31).wrapping_add(u32::from(unit)));

        let combined = (parent.as_u64() as u32).wrapping_add(hash);
        combined as usize % self.buckets.len()
    }

    /// Finds the child of `parent` called `name`.
    #[must_use]
    pub fn lookup(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let bucket = &self.buckets[self.hash_name(parent, name)];
        let folded = self.fold(name);

        bucket
            .iter()
            .find(|entry| entry.parent == parent && entry.name == folded)
            .map(|entry| entry.node)
    }

    /// Indexes `node` as the child of `parent` called `name`.
    ///
    /// An existing entry for the same key is replaced.
    pub fn insert(&mut self, parent: NodeId, name: &str, node: NodeId) {
        let slot = self.hash_name(parent, name);
        let folded = self.fold(name).into_owned();
        let bucket = &mut self.buckets[slot];

        if let Some(entry) = bucket
            .iter_mut()
            .find(|entry| entry.parent == parent && entry.name == folded)
        {
            entry.node = node;
            return;
        }

        bucket.push(Entry {
            parent,
            name: folded,
            node,
        });
        self.len += 1;
    }

    /// Removes the entry for `(parent, name)`, returning the node it held.
    pub fn remove(&mut self, parent: NodeId, name: &str) -> Option<NodeId> {
        let slot = self.hash_name(parent, name);
        let folded = self.fold(name).into_owned();
        let bucket = &mut self.buckets[slot];

        let position = bucket
            .iter()
            .position(|entry| entry.parent == parent && entry.name == folded)?;
        self.len -= 1;
        Some(bucket.swap_remove(position).node)
    }

    /// Returns the length of the longest bucket chain.
    #[must_use]
    pub fn max_chain(&self) -> usize {
        self.buckets.iter().map(Vec::len).max().unwrap_or(0)
    }
}

impl Default for NameIndex {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_SIZE, false)
    }
}
