//! Error types for the Keytree engine
//!
//! Per-mount configuration problems are not errors: they are recorded as
//! warnings on the caller's error key and processing continues. Only a
//! missing mount root and fatal plugin failures surface here.

use thiserror::Error;

/// Common result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the Keytree engine
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] keytree_core::Error),

    #[error("mount configuration root key '{0}' is missing")]
    MissingMountRoot(String),

    #[error("mount group '{0}' has no mountpoint")]
    MissingMountpoint(String),

    #[error("plugin '{plugin}' failed during {phase}: {reason}")]
    PluginFailed {
        plugin: String,
        phase: &'static str,
        reason: String,
    },
}

// Warning codes recorded on the error key.
pub const WARN_MOUNT_ROOT_MISSING: u32 = 22;
pub const WARN_BACKEND_UNUSABLE: u32 = 24;
pub const WARN_MOUNTPOINT_MISSING: u32 = 25;
pub const WARN_PLUGIN_UNKNOWN: u32 = 26;
pub const WARN_PLUGIN_SLOT: u32 = 27;
