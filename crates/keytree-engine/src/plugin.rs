//! Plugins and plugin chains
//!
//! Backends do not read or write anything themselves; they hold three
//! ordered plugin chains (get, set, error) that do. A chain is opaque to
//! the engine: each plugin is a function from (keyset, parent key) to a
//! status, with side effects on the keyset. Warnings and errors are
//! recorded on the parent key, never raised through the call.
//!
//! The same plugin instance may appear in several chains of one backend
//! (a storage plugin typically serves get and set), so instances are
//! shared behind `Rc<RefCell<…>>`.

use keytree_core::{Key, KeySet};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::warn;

/// Outcome of one plugin invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PluginStatus {
    /// The plugin did its work and touched the keyset.
    Updated,
    /// Nothing to do.
    Unchanged,
    /// Fatal failure; details are on the parent key.
    Error,
}

/// One pluggable processing step in a backend's chains.
///
/// The default implementations make every phase a no-op so that plugins
/// only implement the phases they care about.
pub trait Plugin {
    /// The plugin name (used in diagnostics).
    fn name(&self) -> &str;

    /// Fill or transform the keyset on the read path.
    fn get(&mut self, keys: &mut KeySet, parent: &mut Key) -> PluginStatus {
        let _ = (keys, parent);
        PluginStatus::Unchanged
    }

    /// Persist or transform the keyset on the write path.
    fn set(&mut self, keys: &mut KeySet, parent: &mut Key) -> PluginStatus {
        let _ = (keys, parent);
        PluginStatus::Unchanged
    }

    /// React to an aborted write transaction.
    fn error(&mut self, keys: &mut KeySet, parent: &mut Key) -> PluginStatus {
        let _ = (keys, parent);
        PluginStatus::Unchanged
    }
}

/// A shared plugin instance.
pub type PluginHandle = Rc<RefCell<dyn Plugin>>;

/// Factory producing a plugin instance from its configuration keyset.
pub type PluginFactory = Box<dyn Fn(KeySet) -> PluginHandle>;

/// The chain phase being executed.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Phase {
    Get,
    Set,
    Error,
}

/// Run a chain in order, stopping at the first fatal status.
///
/// Returns the name of the failing plugin on error; the failure details
/// are on the parent key.
pub(crate) fn run_chain(
    chain: &[PluginHandle],
    phase: Phase,
    keys: &mut KeySet,
    parent: &mut Key,
) -> std::result::Result<(), String> {
    for handle in chain {
        let mut plugin = handle.borrow_mut();
        let status = match phase {
            Phase::Get => plugin.get(keys, parent),
            Phase::Set => plugin.set(keys, parent),
            Phase::Error => plugin.error(keys, parent),
        };
        if status == PluginStatus::Error {
            warn!(plugin = plugin.name(), ?phase, "plugin chain aborted");
            return Err(plugin.name().to_string());
        }
    }
    Ok(())
}

/// The list of plugins available to mount configurations.
pub struct PluginRegistry {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// An empty registry.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Register a plugin factory under a name.
    pub fn register(&mut self, name: impl Into<String>, factory: PluginFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Instantiate a plugin by name, or `None` for an unknown plugin.
    #[must_use]
    pub fn instantiate(&self, name: &str, config: KeySet) -> Option<PluginHandle> {
        self.factories.get(name).map(|factory| factory(config))
    }

    /// Whether a plugin name is known.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for PluginRegistry {
    /// A registry with the built-in `mem` storage plugin.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(
            MemStorage::NAME,
            Box::new(|_config| Rc::new(RefCell::new(MemStorage::new())) as PluginHandle),
        );
        registry
    }
}

/// Built-in in-memory storage plugin.
///
/// `get` appends copies of the stored keys, `set` replaces the store with
/// copies of the incoming partition. Copies keep the store's keys from
/// aliasing the caller's, so callers retain exclusive ownership of what
/// they read.
#[derive(Default)]
pub struct MemStorage {
    stored: KeySet,
}

impl MemStorage {
    /// The registry name of the plugin.
    pub const NAME: &'static str = "mem";

    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How many keys the store currently holds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stored.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stored.is_empty()
    }

    fn copy_into(source: &KeySet, dest: &mut KeySet) {
        for key in source {
            let copy = (**key).clone();
            copy.clear_dirty();
            // keys cloned from a named source stay named
            let _ = dest.append_key(copy);
        }
    }
}

impl Plugin for MemStorage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn get(&mut self, keys: &mut KeySet, _parent: &mut Key) -> PluginStatus {
        if self.stored.is_empty() {
            return PluginStatus::Unchanged;
        }
        Self::copy_into(&self.stored, keys);
        PluginStatus::Updated
    }

    fn set(&mut self, keys: &mut KeySet, _parent: &mut Key) -> PluginStatus {
        let mut fresh = KeySet::new();
        Self::copy_into(keys, &mut fresh);
        self.stored = fresh;
        PluginStatus::Updated
    }
}
