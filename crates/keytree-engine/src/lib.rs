//! Keytree Engine - Mount resolution and transactional partitioning
//!
//! This crate implements the runtime of the Keytree configuration
//! database: backends with their plugin chains, the mount trie that
//! answers "which backend owns this key", the mount table built from
//! configuration, and the split engine that partitions every transaction's
//! keyset across the responsible backends.

pub mod backend;
pub mod db;
pub mod error;
pub mod mount;
pub mod plugin;
pub mod split;
pub mod trie;

pub use backend::{Backend, BackendId, PLUGIN_SLOTS};
pub use db::KeyDb;
pub use error::{Error, Result};
pub use mount::{MountEntry, MOUNT_CONFIG_ROOT, RESERVED_ROOT};
pub use plugin::{MemStorage, Plugin, PluginHandle, PluginRegistry, PluginStatus};
pub use split::{Partition, Split, SyncState, INITIAL_PARTITION_CAPACITY};
pub use trie::Trie;
