//! Mount table construction
//!
//! Reads the mount configuration keyset, opens one backend per mount
//! group and registers it in the trie and in the mount-time partition
//! skeleton. A broken mount group is skipped with a warning on the error
//! key; only a configuration without the reserved root key is fatal.
//!
//! Four mountpoint forms are dispatched here: the empty value (mounted
//! once at the reserved default path), the root mount `/` (mounted under
//! both namespaces), cascading `/<path>` (likewise) and absolute
//! `user/…`/`system/…` paths (mounted once).

use crate::backend::{Backend, BackendId};
use crate::db::KeyDb;
use crate::error::{
    Error, Result, WARN_BACKEND_UNUSABLE, WARN_MOUNT_ROOT_MISSING, WARN_MOUNTPOINT_MISSING,
};
use crate::split::SyncState;
use keytree_core::{Key, KeyName, KeySet, Namespace};
use tracing::{debug, warn};

/// Where mount configuration lives in the key hierarchy.
pub const MOUNT_CONFIG_ROOT: &str = "system/keytree/mountpoints";

/// The reserved path served by the default backend.
pub const RESERVED_ROOT: &str = "system/keytree";

/// One entry of the mount-time partition skeleton.
///
/// `buildup` clones these into every transaction's split; the parent key
/// names the namespace/mountpoint root the entry answers for and carries
/// the backend label as its value.
#[derive(Debug)]
pub struct MountEntry {
    /// The responsible backend.
    pub backend: BackendId,
    /// The subtree root this entry covers.
    pub parent: Key,
    /// The skeleton sync state (`SHARED` for duplicate mounts).
    pub state: SyncState,
}

impl KeyDb {
    /// Build the mount table from a mount configuration keyset.
    ///
    /// Every direct child of [`MOUNT_CONFIG_ROOT`] starts one mount group.
    /// Groups that cannot be opened (no `mountpoint` key, unparsable
    /// mountpoint) are skipped with a warning; a configuration without the
    /// root key itself is fatal.
    pub fn mount_open(&mut self, mut config: KeySet, error_key: &mut Key) -> Result<()> {
        let root = KeyName::parse(MOUNT_CONFIG_ROOT).map_err(keytree_core::Error::from)?;
        if config.lookup(&root).is_none() {
            error_key.add_warning(WARN_MOUNT_ROOT_MISSING, MOUNT_CONFIG_ROOT);
            return Err(Error::MissingMountRoot(MOUNT_CONFIG_ROOT.to_string()));
        }

        while let Some(group_root) = next_group(&config, &root) {
            let group = config.cut(&group_root);
            match Backend::open(&group, &group_root, self.registry(), error_key) {
                Ok(backend) => {
                    self.mount_backend(backend)?;
                }
                Err(Error::MissingMountpoint(group)) => {
                    warn!(group = %group, "mount group has no mountpoint, skipping");
                    error_key.add_warning(WARN_MOUNTPOINT_MISSING, &group);
                }
                Err(err) => {
                    warn!(group = group_root.canonical(), %err, "unusable mount group, skipping");
                    error_key.add_warning(WARN_BACKEND_UNUSABLE, &err.to_string());
                }
            }
        }
        Ok(())
    }

    /// Mount one backend into the trie and the partition skeleton.
    ///
    /// Sets the backend's reference count to the number of trie slots the
    /// mountpoint form occupies.
    pub fn mount_backend(&mut self, backend: Backend) -> Result<BackendId> {
        let mountpoint = backend.mountpoint().name().cloned();
        let label = backend.label().to_string();
        let id = self.add_backend(backend);

        match mountpoint {
            None => {
                // empty mountpoint: the default-namespace mount
                self.trie_mut().insert(RESERVED_ROOT, id);
                self.push_mount(id, Key::with_text(RESERVED_ROOT, "default")?, SyncState::CLEAN);
                self.backend_mut(id).set_refcount(1);
            }
            Some(name)
                if name.namespace() == Namespace::Cascading && name.segments().is_empty() =>
            {
                // the root mount: one backend, both namespace views
                self.trie_mut().insert("system", id);
                self.push_mount(id, Key::with_text("system", "root")?, SyncState::SHARED);
                self.trie_mut().insert("user", id);
                self.push_mount(id, Key::with_text("user", "root")?, SyncState::SHARED);
                self.backend_mut(id).set_refcount(2);
            }
            Some(name) if name.namespace() == Namespace::Cascading => {
                // cascading: resolved into both namespaces
                let system_path = format!("system{}", name.canonical());
                self.trie_mut().insert(&system_path, id);
                self.push_mount(id, Key::with_text(&system_path, &label)?, SyncState::SHARED);
                let user_path = format!("user{}", name.canonical());
                self.trie_mut().insert(&user_path, id);
                self.push_mount(id, Key::with_text(&user_path, &label)?, SyncState::SHARED);
                self.backend_mut(id).set_refcount(2);
            }
            Some(name) => {
                // plain absolute mount
                self.trie_mut().insert(name.canonical(), id);
                let parent = self.backend(id).mountpoint().clone();
                self.push_mount(id, parent, SyncState::CLEAN);
                self.backend_mut(id).set_refcount(1);
            }
        }

        debug!(backend = %id, "mounted backend");
        Ok(id)
    }

    /// Mount the default backend.
    ///
    /// The reserved path must stay reachable through the default backend;
    /// if an explicit mount captured it, the default backend is mounted
    /// over it. The plain `user` and `system` views get default skeleton
    /// entries when no explicit mount answers for them.
    pub fn mount_default(&mut self) -> Result<()> {
        let id = self.default_backend();

        let reserved = KeyName::parse(RESERVED_ROOT).map_err(keytree_core::Error::from)?;
        if self.backend_for(Some(&reserved)) == id {
            // reachable without a trie slot: record the system view only
            self.push_mount(id, Key::with_text("system", "default")?, SyncState::SHARED);
        } else {
            self.trie_mut().insert(RESERVED_ROOT, id);
            self.push_mount(id, Key::with_text(RESERVED_ROOT, "default")?, SyncState::SHARED);
            self.backend_mut(id).bump_refcount();
        }

        let user = KeyName::parse("user").map_err(keytree_core::Error::from)?;
        if self.backend_for(Some(&user)) == id {
            self.push_mount(id, Key::with_text("user", "default")?, SyncState::SHARED);
        }

        Ok(())
    }
}

fn next_group(config: &KeySet, root: &KeyName) -> Option<KeyName> {
    config.iter().find_map(|key| {
        let name = key.name()?;
        if name.is_below(root) {
            Some(root.join(&name.segments()[root.segments().len()]))
        } else {
            None
        }
    })
}
