//! Ordered keysets
//!
//! A [`KeySet`] is an ordered, duplicate-free collection of shared keys,
//! always sorted by canonical name so that all keys below a common prefix
//! form one contiguous range. That invariant is what makes [`KeySet::cut`]
//! a single range removal and keeps merge results reproducible.

use crate::error::{Error, Result};
use crate::key::Key;
use crate::name::KeyName;
use std::fmt;
use std::rc::Rc;

/// An ordered, duplicate-free collection of shared keys.
#[derive(Clone, Default)]
pub struct KeySet {
    keys: Vec<Rc<Key>>,
}

impl KeySet {
    /// Create an empty keyset.
    #[must_use]
    pub const fn new() -> Self {
        Self { keys: Vec::new() }
    }

    /// Number of keys in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Append one key, keeping the set sorted.
    ///
    /// A key with the same name replaces the present one; the displaced key
    /// is returned. Nameless keys are rejected.
    pub fn append_key(&mut self, key: impl Into<Rc<Key>>) -> Result<Option<Rc<Key>>> {
        let key = key.into();
        if key.name().is_none() {
            return Err(Error::NamelessKey);
        }
        Ok(self.insert(key))
    }

    /// Merge every key of `other` into this set (replace on collision).
    pub fn append(&mut self, other: &Self) {
        for key in &other.keys {
            self.insert(Rc::clone(key));
        }
    }

    fn insert(&mut self, key: Rc<Key>) -> Option<Rc<Key>> {
        match self.position(key.name()) {
            Ok(at) => Some(std::mem::replace(&mut self.keys[at], key)),
            Err(at) => {
                self.keys.insert(at, key);
                None
            }
        }
    }

    fn position(&self, name: Option<&KeyName>) -> std::result::Result<usize, usize> {
        self.keys.binary_search_by(|k| k.name().cmp(&name))
    }

    /// Binary-search lookup by decoded name.
    #[must_use]
    pub fn lookup(&self, name: &KeyName) -> Option<&Rc<Key>> {
        self.position(Some(name)).ok().map(|at| &self.keys[at])
    }

    /// Lookup by textual name. An unparsable name finds nothing.
    #[must_use]
    pub fn lookup_name(&self, name: &str) -> Option<&Rc<Key>> {
        let name = KeyName::parse(name).ok()?;
        self.lookup(&name)
    }

    /// Exclusive access to a contained key.
    ///
    /// `Ok(None)` when absent; [`Error::SharedKey`] when another keyset
    /// still holds the key.
    pub fn lookup_mut(&mut self, name: &str) -> Result<Option<&mut Key>> {
        let name = KeyName::parse(name)?;
        match self.position(Some(&name)) {
            Ok(at) => Key::exclusive(&mut self.keys[at]).map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Remove and return the contiguous range of keys at or below `at`.
    pub fn cut(&mut self, at: &KeyName) -> Self {
        let start = self
            .keys
            .partition_point(|k| k.name().cmp(&Some(at)).is_lt());
        let mut end = start;
        while end < self.keys.len()
            && self.keys[end]
                .name()
                .is_some_and(|n| n.is_same_or_below(at))
        {
            end += 1;
        }
        Self {
            keys: self.keys.drain(start..end).collect(),
        }
    }

    /// Forward iteration over the keys in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Rc<Key>> {
        self.keys.iter()
    }

    /// The key at a cursor position.
    #[must_use]
    pub fn at(&self, index: usize) -> Option<&Rc<Key>> {
        self.keys.get(index)
    }

    /// The first key in order.
    #[must_use]
    pub fn head(&self) -> Option<&Rc<Key>> {
        self.keys.first()
    }

    /// The last key in order.
    #[must_use]
    pub fn tail(&self) -> Option<&Rc<Key>> {
        self.keys.last()
    }

    /// Clear the needs-write flag on every contained key.
    pub fn clear_dirty(&self) {
        for key in &self.keys {
            key.clear_dirty();
        }
    }

    /// Whether any contained key needs a write-back.
    #[must_use]
    pub fn any_dirty(&self) -> bool {
        self.keys.iter().any(|k| k.is_dirty())
    }
}

impl<'a> IntoIterator for &'a KeySet {
    type Item = &'a Rc<Key>;
    type IntoIter = std::slice::Iter<'a, Rc<Key>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.keys.iter().map(|k| k.canonical_name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ks(names: &[&str]) -> KeySet {
        let mut set = KeySet::new();
        for name in names {
            set.append_key(Key::new(name).unwrap()).unwrap();
        }
        set
    }

    fn names(set: &KeySet) -> Vec<&str> {
        set.iter().map(|k| k.canonical_name()).collect()
    }

    #[test]
    fn test_sorted_insertion() {
        let set = ks(&["user/b", "system/x", "user/a", "user/a/sub"]);
        assert_eq!(names(&set), ["system/x", "user/a", "user/a/sub", "user/b"]);
    }

    #[test]
    fn test_duplicate_replaces() {
        let mut set = ks(&["user/a"]);
        let displaced = set
            .append_key(Key::with_text("user/a", "new").unwrap())
            .unwrap();
        assert!(displaced.is_some());
        assert_eq!(set.len(), 1);
        assert_eq!(set.lookup_name("user/a").unwrap().text(), Some("new"));
    }

    #[test]
    fn test_nameless_key_rejected() {
        let mut set = KeySet::new();
        assert!(matches!(
            set.append_key(Key::unnamed()),
            Err(Error::NamelessKey)
        ));
    }

    #[test]
    fn test_lookup() {
        let set = ks(&["user/a", "user/a/b", "user/c"]);
        assert!(set.lookup_name("user/a/b").is_some());
        assert!(set.lookup_name("user/missing").is_none());
        // canonicalization applies before the search
        assert!(set.lookup_name("user//a/./b").is_some());
    }

    #[test]
    fn test_lookup_mut_respects_sharing() {
        let mut set = ks(&["user/a"]);
        set.lookup_mut("user/a").unwrap().unwrap().set_text("v");

        let mut second = KeySet::new();
        second
            .append_key(Rc::clone(set.lookup_name("user/a").unwrap()))
            .unwrap();
        assert!(matches!(set.lookup_mut("user/a"), Err(Error::SharedKey)));
    }

    #[test]
    fn test_cut_removes_subtree() {
        let mut set = ks(&[
            "user/tests",
            "user/tests/a",
            "user/tests/a/deep",
            "user/testsuite",
            "user/other",
        ]);
        let cut = set.cut(&KeyName::parse("user/tests").unwrap());
        assert_eq!(names(&cut), ["user/tests", "user/tests/a", "user/tests/a/deep"]);
        assert_eq!(names(&set), ["user/other", "user/testsuite"]);
    }

    #[test]
    fn test_cut_without_match_is_empty() {
        let mut set = ks(&["user/a"]);
        let cut = set.cut(&KeyName::parse("user/b").unwrap());
        assert!(cut.is_empty());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_append_merges_sorted() {
        let mut left = ks(&["user/a", "user/c"]);
        let right = ks(&["user/b", "user/c"]);
        left.append(&right);
        assert_eq!(names(&left), ["user/a", "user/b", "user/c"]);
    }

    #[test]
    fn test_dirty_tracking() {
        let set = ks(&["user/a", "user/b"]);
        assert!(set.any_dirty());
        set.clear_dirty();
        assert!(!set.any_dirty());
        set.head().unwrap().mark_dirty();
        assert!(set.any_dirty());
    }

    #[test]
    fn test_cursor_positions() {
        let set = ks(&["user/a", "user/b", "user/c"]);
        assert_eq!(set.head().unwrap().canonical_name(), "user/a");
        assert_eq!(set.tail().unwrap().canonical_name(), "user/c");
        assert_eq!(set.at(1).unwrap().canonical_name(), "user/b");
        assert!(set.at(3).is_none());
    }
}
