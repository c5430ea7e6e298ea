//! The database handle
//!
//! [`KeyDb`] owns everything a configuration database needs at runtime:
//! the backend arena, the mount trie, the mount-time partition skeleton,
//! the default backend and the plugin registry. It is an explicit value —
//! there is no ambient global — and must not be driven from two threads.
//!
//! The `get` and `set` drivers run whole transactions: buildup the split,
//! let every responsible backend's plugin chain do its work, record the
//! observed sizes and reassemble (reads) or commit only the changed
//! partitions (writes).

use crate::backend::{Backend, BackendId};
use crate::error::{Error, Result};
use crate::mount::MountEntry;
use crate::plugin::{run_chain, Phase, PluginRegistry};
use crate::split::Split;
use crate::trie::Trie;
use keytree_core::{Key, KeyName, KeySet};
use tracing::debug;

/// The access point to the key database.
pub struct KeyDb {
    backends: Vec<Backend>,
    trie: Trie,
    mounts: Vec<MountEntry>,
    default_backend: BackendId,
    registry: PluginRegistry,
}

impl KeyDb {
    /// Open a database from a mount configuration keyset.
    ///
    /// Builds the mount table (skipping unusable mounts with warnings on
    /// `error_key`) and mounts the default backend.
    pub fn open(
        config: KeySet,
        registry: PluginRegistry,
        error_key: &mut Key,
    ) -> Result<Self> {
        let mut db = Self::with_registry(registry);
        db.mount_open(config, error_key)?;
        db.mount_default()?;
        Ok(db)
    }

    /// A database with only the default backend and no mounts.
    #[must_use]
    pub fn with_registry(registry: PluginRegistry) -> Self {
        Self {
            backends: vec![Backend::open_default()],
            trie: Trie::new(),
            mounts: Vec::new(),
            default_backend: BackendId::from(0),
            registry,
        }
    }

    #[cfg(test)]
    pub(crate) fn bare() -> Self {
        Self::with_registry(PluginRegistry::default())
    }

    /// The plugin registry mounts resolve their chains against.
    #[must_use]
    pub const fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// The distinguished fallback backend.
    #[must_use]
    pub const fn default_backend(&self) -> BackendId {
        self.default_backend
    }

    /// A backend by id.
    #[must_use]
    pub fn backend(&self, id: BackendId) -> &Backend {
        &self.backends[usize::from(id)]
    }

    /// Mutable access to a backend.
    pub fn backend_mut(&mut self, id: BackendId) -> &mut Backend {
        &mut self.backends[usize::from(id)]
    }

    /// The mount-time partition skeleton, in mount order.
    #[must_use]
    pub fn mount_table(&self) -> &[MountEntry] {
        &self.mounts
    }

    /// The mount trie.
    #[must_use]
    pub const fn trie(&self) -> &Trie {
        &self.trie
    }

    pub(crate) const fn trie_mut(&mut self) -> &mut Trie {
        &mut self.trie
    }

    pub(crate) fn add_backend(&mut self, backend: Backend) -> BackendId {
        self.backends.push(backend);
        BackendId::from(self.backends.len() - 1)
    }

    pub(crate) fn push_mount(
        &mut self,
        backend: BackendId,
        parent: Key,
        state: crate::split::SyncState,
    ) {
        self.mounts.push(MountEntry {
            backend,
            parent,
            state,
        });
    }

    /// The backend responsible for a name: the trie's longest-prefix
    /// answer, or the default backend when nothing matches (including the
    /// nameless case).
    #[must_use]
    pub fn backend_for(&self, name: Option<&KeyName>) -> BackendId {
        name.and_then(|n| self.trie.lookup(n))
            .unwrap_or(self.default_backend)
    }

    /// The mountpoint key of the backend responsible for a name.
    #[must_use]
    pub fn mountpoint_for(&self, name: Option<&KeyName>) -> &Key {
        self.backend(self.backend_for(name)).mountpoint()
    }

    /// Read every key reachable under `parent` into `dest`.
    ///
    /// Each reachable partition is filled by its backend's get chain; the
    /// observed sizes are recorded for deletion detection, the retrieved
    /// keys are clean, and partitions merge into `dest` in deterministic
    /// order. Returns whether anything was retrieved.
    pub fn get(&mut self, dest: &mut KeySet, parent: &mut Key) -> Result<bool> {
        let mut split = Split::new();
        if !split.buildup(self, Some(parent)) {
            return Ok(false);
        }
        debug!(partitions = split.len(), "read transaction");

        for part in split.parts_mut() {
            let chain = self.backend(part.backend()).get_chain().to_vec();
            if let Err(plugin) = { let (keys, parent) = part.keys_parent_mut(); run_chain(&chain, Phase::Get, keys, parent) }
            {
                let reason = part
                    .parent()
                    .error_reason()
                    .unwrap_or("plugin failed")
                    .to_string();
                parent.absorb_diagnostics(part.parent());
                return Err(Error::PluginFailed {
                    plugin,
                    phase: "get",
                    reason,
                });
            }
        }

        split.update_sizes(self);
        let mut retrieved = false;
        for part in split.parts() {
            part.keys().clear_dirty();
            retrieved |= !part.keys().is_empty();
            parent.absorb_diagnostics(part.parent());
        }
        split.merge(dest);
        Ok(retrieved)
    }

    /// Write the changed parts of `keys` back to their backends.
    ///
    /// Divides the keyset along the mount boundaries, commits only the
    /// partitions that carry a dirty key or a size change, and records the
    /// new sizes. Returns `Ok(false)` when nothing needed to be written.
    ///
    /// A fatal plugin failure aborts the remaining chain and signals every
    /// prepared partition's error chain; partitions already written are
    /// not rolled back.
    pub fn set(&mut self, keys: &KeySet, parent: &mut Key) -> Result<bool> {
        let mut split = Split::new();
        split.buildup(self, Some(parent));
        if !split.divide(self, keys) {
            return Ok(false);
        }
        let prepared = split.prepare();
        debug!(partitions = prepared, "write transaction");

        let mut failure = None;
        for part in split.parts_mut() {
            let chain = self.backend(part.backend()).set_chain().to_vec();
            if let Err(plugin) = { let (keys, parent) = part.keys_parent_mut(); run_chain(&chain, Phase::Set, keys, parent) }
            {
                let reason = part
                    .parent()
                    .error_reason()
                    .unwrap_or("plugin failed")
                    .to_string();
                failure = Some(Error::PluginFailed {
                    plugin,
                    phase: "set",
                    reason,
                });
                break;
            }
        }

        if let Some(err) = failure {
            for part in split.parts_mut() {
                let chain = self.backend(part.backend()).error_chain().to_vec();
                let _ = { let (keys, parent) = part.keys_parent_mut(); run_chain(&chain, Phase::Error, keys, parent) };
            }
            for part in split.parts() {
                parent.absorb_diagnostics(part.parent());
            }
            return Err(err);
        }

        split.update_sizes(self);
        for part in split.parts() {
            part.keys().clear_dirty();
            parent.absorb_diagnostics(part.parent());
        }
        Ok(true)
    }
}
