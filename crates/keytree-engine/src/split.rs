//! Transactional keyset partitioning
//!
//! Every read or write transaction partitions one flat keyset into one
//! sub-keyset per responsible backend. A [`Split`] is built fresh per
//! transaction: `buildup` creates the partition skeleton from the mount
//! table, `divide` routes keys into partitions by the same longest-prefix
//! rule the trie answers, `sync` re-derives which partitions must be
//! written, `prepare` compacts the split down to the actual commit set and
//! `merge` reassembles read results in deterministic order.
//!
//! Change detection is two-fold: a dirty key marks its partition, and a
//! partition whose key count differs from what its backend reported on the
//! previous read is marked as well — that is how deletions are detected
//! when no surviving key carries a dirty flag.

use crate::backend::BackendId;
use crate::db::KeyDb;
use keytree_core::{Key, KeyName, KeySet, Namespace};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::rc::Rc;
use tracing::debug;

/// Initial partition list capacity; the list doubles when it overflows.
pub const INITIAL_PARTITION_CAPACITY: usize = 16;

/// Per-partition synchronization state.
///
/// A bitmask kept numerically compatible with dependent logic: bit 0 set
/// means the partition has a dirty key or a detected deletion and must be
/// written back; bit 1 set means the partition belongs to a
/// default/root/cascading duplicate mount (the backend serves two
/// namespace views). Both bits may be set at once.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncState(u8);

impl SyncState {
    /// Nothing to do.
    pub const CLEAN: Self = Self(0);
    /// The partition must be written back.
    pub const DIRTY: Self = Self(1);
    /// The partition's backend serves two namespace views.
    pub const SHARED: Self = Self(2);

    /// Whether every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// The raw bitmask.
    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }
}

impl BitOr for SyncState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SyncState {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncState({:#04b})", self.0)
    }
}

/// One backend's slice of a transaction.
pub struct Partition {
    keys: KeySet,
    backend: BackendId,
    parent: Key,
    state: SyncState,
}

impl Partition {
    /// The keys routed into this partition.
    #[must_use]
    pub const fn keys(&self) -> &KeySet {
        &self.keys
    }

    pub(crate) const fn keys_mut(&mut self) -> &mut KeySet {
        &mut self.keys
    }

    /// The responsible backend.
    #[must_use]
    pub const fn backend(&self) -> BackendId {
        self.backend
    }

    /// The namespace/mountpoint root this partition answers for.
    #[must_use]
    pub const fn parent(&self) -> &Key {
        &self.parent
    }

    pub(crate) const fn parent_mut(&mut self) -> &mut Key {
        &mut self.parent
    }

    /// Disjoint mutable access to the keys and parent, for callers that
    /// need both at once (borrowing `keys_mut()` and `parent_mut()`
    /// separately would conflict).
    pub(crate) const fn keys_parent_mut(&mut self) -> (&mut KeySet, &mut Key) {
        (&mut self.keys, &mut self.parent)
    }

    /// The partition's synchronization state.
    #[must_use]
    pub const fn state(&self) -> SyncState {
        self.state
    }

    fn namespace(&self) -> Option<Namespace> {
        self.parent.name().map(KeyName::namespace)
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("parent", &self.parent.canonical_name())
            .field("backend", &self.backend)
            .field("state", &self.state)
            .field("keys", &self.keys.len())
            .finish()
    }
}

/// The ordered partition list of one transaction.
#[derive(Debug)]
pub struct Split {
    parts: Vec<Partition>,
}

impl Default for Split {
    fn default() -> Self {
        Self::new()
    }
}

impl Split {
    /// An empty split.
    #[must_use]
    pub fn new() -> Self {
        Self {
            parts: Vec::with_capacity(INITIAL_PARTITION_CAPACITY),
        }
    }

    /// Number of partitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Whether the split has no partitions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The partitions in deterministic order.
    #[must_use]
    pub fn parts(&self) -> &[Partition] {
        &self.parts
    }

    pub(crate) fn parts_mut(&mut self) -> &mut [Partition] {
        &mut self.parts
    }

    /// Append an empty partition.
    pub fn append(&mut self, backend: BackendId, parent: Key, state: SyncState) {
        self.parts.push(Partition {
            keys: KeySet::new(),
            backend,
            parent,
            state,
        });
    }

    /// Whether any partition's parent covers `key`.
    #[must_use]
    pub fn search_root(&self, key: &Key) -> bool {
        let Some(name) = key.name() else {
            return false;
        };
        self.parts.iter().any(|part| {
            part.parent
                .name()
                .is_some_and(|parent| name.is_same_or_below(parent))
        })
    }

    /// The first partition eligible for a key of `backend` named `name`.
    ///
    /// A `SHARED` partition only takes keys of its own namespace; the
    /// backend appears once per namespace it serves.
    fn search_backend(&self, backend: BackendId, name: &KeyName) -> Option<usize> {
        self.parts.iter().position(|part| {
            part.backend == backend
                && (!part.state.contains(SyncState::SHARED)
                    || part.namespace() == Some(name.namespace()))
        })
    }

    /// Create one partition per (backend, namespace) pair reachable under
    /// `parent`.
    ///
    /// A missing, nameless or cascading parent selects every mount-table
    /// entry. Partition order is the mount-table order, so results and
    /// commits are reproducible. Returns whether any partition was
    /// produced.
    pub fn buildup(&mut self, db: &KeyDb, parent: Option<&Key>) -> bool {
        let scope = parent
            .and_then(Key::name)
            .filter(|name| name.namespace() != Namespace::Cascading);
        let scope_backend = scope.map(|name| db.backend_for(Some(name)));

        for entry in db.mount_table() {
            let eligible = match (scope, scope_backend) {
                (Some(scope), Some(scope_backend)) => {
                    let covers = entry
                        .parent
                        .name()
                        .is_some_and(|entry_root| scope.is_same_or_below(entry_root));
                    let covered = entry
                        .parent
                        .name()
                        .is_some_and(|entry_root| entry_root.is_same_or_below(scope));
                    (entry.backend == scope_backend && covers) || covered
                }
                _ => true,
            };
            if eligible {
                self.append(entry.backend, entry.parent.clone(), entry.state);
            }
        }
        !self.parts.is_empty()
    }

    /// Route every key of `keys` into its partition.
    ///
    /// The responsible backend is resolved through the trie (longest
    /// prefix); keys that fit no partition are outside this transaction's
    /// scope and are skipped. A dirty key marks its partition `DIRTY`, and
    /// so does a partition whose size no longer matches the backend's
    /// previously observed count for that namespace. Returns whether any
    /// partition needs a write-back.
    pub fn divide(&mut self, db: &KeyDb, keys: &KeySet) -> bool {
        for key in keys {
            let Some(name) = key.name() else {
                continue;
            };
            let backend = db.backend_for(Some(name));
            let Some(at) = self.search_backend(backend, name) else {
                continue;
            };
            let part = &mut self.parts[at];
            let _ = part.keys.append_key(Rc::clone(key));
            if key.is_dirty() {
                part.state |= SyncState::DIRTY;
            }
        }
        self.check_sizes(db)
    }

    /// Re-derive the needs-sync aggregate from the backends' counters.
    ///
    /// Idempotent with [`Split::divide`] as long as no counter was changed
    /// in between; bits are only ever set, never cleared.
    pub fn sync(&mut self, db: &KeyDb) -> bool {
        self.check_sizes(db)
    }

    fn check_sizes(&mut self, db: &KeyDb) -> bool {
        let mut needs_sync = false;
        for part in &mut self.parts {
            let observed = match part.namespace() {
                Some(Namespace::User) => Some(db.backend(part.backend).user_size()),
                Some(Namespace::System) => Some(db.backend(part.backend).system_size()),
                _ => None,
            };
            if let Some(observed) = observed
                && observed != part.keys.len()
            {
                // fewer (or more) keys than the previous read: a removal
                // or addition happened even if no surviving key is dirty
                part.state |= SyncState::DIRTY;
            }
            if part.state.contains(SyncState::DIRTY) {
                needs_sync = true;
            }
        }
        needs_sync
    }

    /// Drop every partition that needs no write-back.
    ///
    /// The surviving partitions keep their relative order; the returned
    /// count is the size of the commit set.
    pub fn prepare(&mut self) -> usize {
        self.parts
            .retain(|part| part.state.contains(SyncState::DIRTY));
        debug!(remaining = self.parts.len(), "prepared commit set");
        self.parts.len()
    }

    /// Reassemble every partition into `dest`, in partition order.
    pub fn merge(&self, dest: &mut KeySet) {
        for part in &self.parts {
            dest.append(&part.keys);
        }
    }

    /// Record every partition's size as its backend's observed count for
    /// the partition's namespace.
    pub fn update_sizes(&self, db: &mut KeyDb) {
        for part in &self.parts {
            match part.namespace() {
                Some(Namespace::User) => {
                    db.backend_mut(part.backend).set_user_size(part.keys.len());
                }
                Some(Namespace::System) => {
                    db.backend_mut(part.backend)
                        .set_system_size(part.keys.len());
                }
                _ => {}
            }
        }
    }
}
