//! Configuration keys
//!
//! A [`Key`] is one named configuration entry: an optional canonical name,
//! a value (absent, text, or a binary blob with explicit length), an
//! attached metadata keyset, and a needs-write flag consulted by the
//! transaction engine.
//!
//! Keys are shared between keysets with `Rc`; anything that would change a
//! shared key's identity (name or value) requires exclusive ownership and
//! fails with [`Error::SharedKey`] otherwise. The needs-write flag lives in
//! a `Cell` so it can be cleared on keys that are already shared, which is
//! exactly what a successful transaction does.

use crate::error::{Error, Result};
use crate::keyset::KeySet;
use crate::name::KeyName;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Warnings beyond this count are dropped.
const MAX_WARNINGS: usize = 100;

/// The value of a key.
///
/// Text values are conventional NUL-free strings; binary values carry an
/// explicit length and may contain any byte.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum KeyValue {
    /// No value set.
    #[default]
    Absent,
    /// A text value.
    Text(String),
    /// An opaque binary value.
    Binary(Vec<u8>),
}

impl KeyValue {
    /// The value size in bytes (0 when absent).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Absent => 0,
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Whether no value is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// One named configuration entry.
#[derive(Clone)]
pub struct Key {
    name: Option<KeyName>,
    value: KeyValue,
    meta: KeySet,
    dirty: Cell<bool>,
}

impl Key {
    /// Create a key from a textual name.
    ///
    /// The empty string creates a key without a name (such a key cannot
    /// enter a keyset; the default backend's mountpoint is the one place
    /// this is used). Fresh keys carry the needs-write flag.
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Ok(Self::unnamed());
        }
        Ok(Self::from_name(KeyName::parse(name)?))
    }

    /// Create a key with a text value.
    pub fn with_text(name: &str, text: impl Into<String>) -> Result<Self> {
        let mut key = Self::new(name)?;
        key.value = KeyValue::Text(text.into());
        Ok(key)
    }

    /// Create a key with a binary value.
    pub fn with_binary(name: &str, data: impl Into<Vec<u8>>) -> Result<Self> {
        let mut key = Self::new(name)?;
        key.value = KeyValue::Binary(data.into());
        Ok(key)
    }

    /// Create a key from an already-decoded name.
    #[must_use]
    pub fn from_name(name: KeyName) -> Self {
        Self {
            name: Some(name),
            value: KeyValue::Absent,
            meta: KeySet::new(),
            dirty: Cell::new(true),
        }
    }

    /// Create a key without a name.
    #[must_use]
    pub fn unnamed() -> Self {
        Self {
            name: None,
            value: KeyValue::Absent,
            meta: KeySet::new(),
            dirty: Cell::new(true),
        }
    }

    /// Exclusive access to a possibly shared key.
    ///
    /// Fails with [`Error::SharedKey`] while any other keyset still holds
    /// the key.
    pub fn exclusive(this: &mut Rc<Self>) -> Result<&mut Self> {
        Rc::get_mut(this).ok_or(Error::SharedKey)
    }

    /// The decoded name, if any.
    #[must_use]
    pub const fn name(&self) -> Option<&KeyName> {
        self.name.as_ref()
    }

    /// The canonical name, or the empty string for a nameless key.
    #[must_use]
    pub fn canonical_name(&self) -> &str {
        self.name.as_ref().map_or("", KeyName::canonical)
    }

    /// Rename the key. Requires exclusive ownership at the `Rc` level.
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        self.name = if name.is_empty() {
            None
        } else {
            Some(KeyName::parse(name)?)
        };
        self.dirty.set(true);
        Ok(())
    }

    /// The current value.
    #[must_use]
    pub const fn value(&self) -> &KeyValue {
        &self.value
    }

    /// The text value, if the value is text.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.value {
            KeyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Set a text value and mark the key dirty.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.value = KeyValue::Text(text.into());
        self.dirty.set(true);
    }

    /// Set a binary value and mark the key dirty.
    pub fn set_binary(&mut self, data: impl Into<Vec<u8>>) {
        self.value = KeyValue::Binary(data.into());
        self.dirty.set(true);
    }

    /// Whether the key must be written back on the next transaction.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    /// Mark the key as needing a write-back.
    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }

    /// Clear the needs-write flag (done after a successful transaction).
    pub fn clear_dirty(&self) {
        self.dirty.set(false);
    }

    /// The attached metadata keyset.
    #[must_use]
    pub const fn meta(&self) -> &KeySet {
        &self.meta
    }

    /// Set (or replace) one metadata entry and mark the key dirty.
    pub fn set_meta(&mut self, path: &str, value: impl Into<String>) -> Result<()> {
        let name = KeyName::meta(path)?;
        let mut entry = Self::from_name(name);
        entry.value = KeyValue::Text(value.into());
        self.meta.append_key(entry)?;
        self.dirty.set(true);
        Ok(())
    }

    /// Read one metadata entry's text value.
    #[must_use]
    pub fn meta_value(&self, path: &str) -> Option<&str> {
        let name = KeyName::meta(path).ok()?;
        self.meta.lookup(&name).and_then(|k| k.text())
    }

    /// Append a numbered warning to the key's metadata.
    ///
    /// Warnings accumulate and never abort processing; the key used for
    /// error reporting collects them across a whole operation.
    pub fn add_warning(&mut self, code: u32, reason: &str) {
        let count = self.warnings_count();
        if count >= MAX_WARNINGS {
            return;
        }
        // the meta paths are valid by construction
        let _ = self.set_meta("warnings", (count + 1).to_string());
        let _ = self.set_meta(&format!("warnings/#{count:02}/number"), code.to_string());
        let _ = self.set_meta(&format!("warnings/#{count:02}/reason"), reason);
    }

    /// How many warnings the key carries.
    #[must_use]
    pub fn warnings_count(&self) -> usize {
        self.meta_value("warnings")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Read one warning by index.
    #[must_use]
    pub fn warning(&self, index: usize) -> Option<(u32, &str)> {
        let number = self
            .meta_value(&format!("warnings/#{index:02}/number"))?
            .parse()
            .ok()?;
        let reason = self.meta_value(&format!("warnings/#{index:02}/reason"))?;
        Some((number, reason))
    }

    /// Record a fatal error on the key. The first error wins.
    pub fn set_error(&mut self, code: u32, reason: &str) {
        if self.has_error() {
            return;
        }
        let _ = self.set_meta("error/number", code.to_string());
        let _ = self.set_meta("error/reason", reason);
    }

    /// Whether a fatal error is recorded.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.meta_value("error/number").is_some()
    }

    /// The recorded error reason, if any.
    #[must_use]
    pub fn error_reason(&self) -> Option<&str> {
        self.meta_value("error/reason")
    }

    /// Migrate another key's warnings and error onto this key, renumbering
    /// the warnings.
    pub fn absorb_diagnostics(&mut self, other: &Self) {
        for index in 0..other.warnings_count() {
            if let Some((number, reason)) = other.warning(index) {
                let reason = reason.to_string();
                self.add_warning(number, &reason);
            }
        }
        if !self.has_error()
            && let (Some(number), Some(reason)) = (
                other
                    .meta_value("error/number")
                    .and_then(|v| v.parse::<u32>().ok()),
                other.error_reason(),
            )
        {
            let reason = reason.to_string();
            self.set_error(number, &reason);
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:?}, {:?})", self.canonical_name(), self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_keys_are_dirty() {
        let key = Key::new("user/a").unwrap();
        assert!(key.is_dirty());
        key.clear_dirty();
        assert!(!key.is_dirty());
    }

    #[test]
    fn test_value_mutation_marks_dirty() {
        let mut key = Key::new("user/a").unwrap();
        key.clear_dirty();
        key.set_text("value");
        assert!(key.is_dirty());
        assert_eq!(key.text(), Some("value"));

        key.clear_dirty();
        key.set_binary(vec![0u8, 1, 2]);
        assert!(key.is_dirty());
        assert_eq!(key.value().len(), 3);
        assert_eq!(key.text(), None);
    }

    #[test]
    fn test_empty_name_is_no_name() {
        let key = Key::with_text("", "default").unwrap();
        assert!(key.name().is_none());
        assert_eq!(key.canonical_name(), "");
    }

    #[test]
    fn test_exclusive_access_blocks_shared_rename() {
        let mut shared = Rc::new(Key::new("user/a").unwrap());
        let other = Rc::clone(&shared);
        assert!(matches!(
            Key::exclusive(&mut shared),
            Err(Error::SharedKey)
        ));
        drop(other);
        Key::exclusive(&mut shared)
            .unwrap()
            .set_name("user/b")
            .unwrap();
        assert_eq!(shared.canonical_name(), "user/b");
    }

    #[test]
    fn test_meta_round_trip() {
        let mut key = Key::new("user/a").unwrap();
        key.set_meta("mode", "0600").unwrap();
        key.set_meta("comment", "first").unwrap();
        key.set_meta("comment", "second").unwrap();
        assert_eq!(key.meta_value("mode"), Some("0600"));
        assert_eq!(key.meta_value("comment"), Some("second"));
        assert_eq!(key.meta().len(), 2);
    }

    #[test]
    fn test_warning_accumulation() {
        let mut key = Key::new("user/err").unwrap();
        assert_eq!(key.warnings_count(), 0);
        key.add_warning(8, "mountpoint missing");
        key.add_warning(9, "plugin unknown");
        assert_eq!(key.warnings_count(), 2);
        assert_eq!(key.warning(0), Some((8, "mountpoint missing")));
        assert_eq!(key.warning(1), Some((9, "plugin unknown")));
    }

    #[test]
    fn test_first_error_wins() {
        let mut key = Key::new("user/err").unwrap();
        key.set_error(10, "chain failed");
        key.set_error(11, "later");
        assert!(key.has_error());
        assert_eq!(key.error_reason(), Some("chain failed"));
    }

    #[test]
    fn test_absorb_diagnostics() {
        let mut inner = Key::new("user/mount").unwrap();
        inner.add_warning(8, "skipped");
        inner.set_error(10, "fatal");

        let mut outer = Key::new("user").unwrap();
        outer.add_warning(7, "earlier");
        outer.absorb_diagnostics(&inner);

        assert_eq!(outer.warnings_count(), 2);
        assert_eq!(outer.warning(1), Some((8, "skipped")));
        assert_eq!(outer.error_reason(), Some("fatal"));
    }
}
