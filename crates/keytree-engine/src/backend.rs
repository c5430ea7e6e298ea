//! Backends
//!
//! A [`Backend`] bundles everything needed to persist one mounted subtree:
//! the mountpoint key (whose name is the mount path and whose value is a
//! human-readable label), the three plugin chains, a reference count (how
//! many trie slots the backend occupies) and the per-namespace key counts
//! observed by the last read, which the split engine uses to detect
//! deletions.
//!
//! Backends are owned by the [`crate::KeyDb`] arena; the trie, the mount
//! table and split partitions address them by [`BackendId`].

use crate::error::{Error, Result, WARN_PLUGIN_SLOT, WARN_PLUGIN_UNKNOWN};
use crate::plugin::{MemStorage, PluginHandle, PluginRegistry};
use derive_more::{Display, From, Into};
use keytree_core::{Key, KeyName, KeySet};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use tracing::warn;

/// How many plugins one chain can hold.
pub const PLUGIN_SLOTS: usize = 10;

/// Handle of a backend in the [`crate::KeyDb`] arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, From, Into, Display)]
#[display("{_0}")]
pub struct BackendId(usize);

impl fmt::Debug for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackendId({})", self.0)
    }
}

/// One mounted storage unit.
pub struct Backend {
    mountpoint: Key,
    get_chain: Vec<PluginHandle>,
    set_chain: Vec<PluginHandle>,
    error_chain: Vec<PluginHandle>,
    refcount: usize,
    user_size: usize,
    system_size: usize,
}

impl Backend {
    /// A backend with a mountpoint and no plugins (mount bookkeeping only).
    #[must_use]
    pub fn new(mountpoint: Key) -> Self {
        Self {
            mountpoint,
            get_chain: Vec::new(),
            set_chain: Vec::new(),
            error_chain: Vec::new(),
            refcount: 1,
            user_size: 0,
            system_size: 0,
        }
    }

    /// Build a backend from one mount configuration group.
    ///
    /// `group` is the subtree cut out of the mount configuration for one
    /// mount, rooted at `group_root`. The group must contain a
    /// `mountpoint` key; its value is the mount path (per the four forms)
    /// and the group's base name becomes the backend label. Plugin chain
    /// references are `<role>/#N<label>` keys whose value names the
    /// plugin; a label already instantiated for this backend is reused
    /// across chains. Unknown plugins and bad slot references record a
    /// warning and are skipped.
    pub fn open(
        group: &KeySet,
        group_root: &KeyName,
        registry: &PluginRegistry,
        error_key: &mut Key,
    ) -> Result<Self> {
        let mountpoint_name = group_root.join("mountpoint");
        let Some(mountpoint_key) = group.lookup(&mountpoint_name) else {
            return Err(Error::MissingMountpoint(group_root.canonical().to_string()));
        };
        let label = group_root.base().unwrap_or("backend");
        let mountpoint = Key::with_text(mountpoint_key.text().unwrap_or(""), label)
            .map_err(Error::Core)?;

        let backend_config = collect_below(group, &group_root.join("config"));
        let mut instances: BTreeMap<String, PluginHandle> = BTreeMap::new();
        let mut backend = Self::new(mountpoint);
        backend.get_chain = build_chain(
            group,
            group_root,
            "getplugins",
            registry,
            &mut instances,
            &backend_config,
            error_key,
        );
        backend.set_chain = build_chain(
            group,
            group_root,
            "setplugins",
            registry,
            &mut instances,
            &backend_config,
            error_key,
        );
        backend.error_chain = build_chain(
            group,
            group_root,
            "errorplugins",
            registry,
            &mut instances,
            &backend_config,
            error_key,
        );
        Ok(backend)
    }

    /// The distinguished fallback backend: in-memory storage, a nameless
    /// mountpoint labelled `default`.
    #[must_use]
    pub(crate) fn open_default() -> Self {
        let storage: PluginHandle = Rc::new(RefCell::new(MemStorage::new()));
        let mut mountpoint = Key::unnamed();
        mountpoint.set_text("default");
        let mut backend = Self::new(mountpoint);
        backend.get_chain = vec![Rc::clone(&storage)];
        backend.set_chain = vec![storage];
        backend
    }

    /// The mountpoint key (name = mount path, value = label).
    #[must_use]
    pub const fn mountpoint(&self) -> &Key {
        &self.mountpoint
    }

    /// The human-readable backend label.
    #[must_use]
    pub fn label(&self) -> &str {
        self.mountpoint.text().unwrap_or("")
    }

    /// How many trie slots the backend occupies (1 plain, 2 root/cascading).
    #[must_use]
    pub const fn refcount(&self) -> usize {
        self.refcount
    }

    pub(crate) fn set_refcount(&mut self, refcount: usize) {
        self.refcount = refcount;
    }

    pub(crate) fn bump_refcount(&mut self) {
        self.refcount += 1;
    }

    /// Keys of the `user` namespace returned by the previous read.
    #[must_use]
    pub const fn user_size(&self) -> usize {
        self.user_size
    }

    /// Keys of the `system` namespace returned by the previous read.
    #[must_use]
    pub const fn system_size(&self) -> usize {
        self.system_size
    }

    /// Record the observed `user` key count.
    pub fn set_user_size(&mut self, size: usize) {
        self.user_size = size;
    }

    /// Record the observed `system` key count.
    pub fn set_system_size(&mut self, size: usize) {
        self.system_size = size;
    }

    /// The read chain.
    #[must_use]
    pub fn get_chain(&self) -> &[PluginHandle] {
        &self.get_chain
    }

    /// The write chain.
    #[must_use]
    pub fn set_chain(&self) -> &[PluginHandle] {
        &self.set_chain
    }

    /// The abort chain.
    #[must_use]
    pub fn error_chain(&self) -> &[PluginHandle] {
        &self.error_chain
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("mountpoint", &self.mountpoint.canonical_name())
            .field("label", &self.label())
            .field("refcount", &self.refcount)
            .finish_non_exhaustive()
    }
}

/// Clone the keys strictly below `root` out of `group`.
fn collect_below(group: &KeySet, root: &KeyName) -> KeySet {
    let mut out = KeySet::new();
    for key in group {
        if key.name().is_some_and(|n| n.is_below(root)) {
            let _ = out.append_key(Rc::clone(key));
        }
    }
    out
}

fn build_chain(
    group: &KeySet,
    group_root: &KeyName,
    role: &str,
    registry: &PluginRegistry,
    instances: &mut BTreeMap<String, PluginHandle>,
    backend_config: &KeySet,
    error_key: &mut Key,
) -> Vec<PluginHandle> {
    let chain_root = group_root.join(role);
    let mut slots: Vec<Option<PluginHandle>> = (0..PLUGIN_SLOTS).map(|_| None).collect();

    for key in group {
        let Some(name) = key.name() else { continue };
        if !name.is_below(&chain_root) || name.segments().len() != chain_root.segments().len() + 1
        {
            continue;
        }
        let base = name.base().unwrap_or("");
        let Some(reference) = base.strip_prefix('#') else {
            warn!(role, reference = base, "plugin reference must start with '#'");
            error_key.add_warning(WARN_PLUGIN_SLOT, &format!("bad plugin reference '{base}'"));
            continue;
        };
        let digits: String = reference
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        let label = &reference[digits.len()..];
        let slot = match digits.parse::<usize>() {
            Ok(slot) if slot < PLUGIN_SLOTS => slot,
            _ => {
                warn!(role, reference = base, "plugin slot out of range");
                error_key
                    .add_warning(WARN_PLUGIN_SLOT, &format!("bad plugin slot in '{base}'"));
                continue;
            }
        };
        let plugin_name = key.text().unwrap_or(label);

        let handle = if let Some(present) = instances.get(label) {
            Rc::clone(present)
        } else {
            let mut config = collect_below(group, &name.join("config"));
            config.append(backend_config);
            let Some(fresh) = registry.instantiate(plugin_name, config) else {
                warn!(role, plugin = plugin_name, "unknown plugin");
                error_key
                    .add_warning(WARN_PLUGIN_UNKNOWN, &format!("unknown plugin '{plugin_name}'"));
                continue;
            };
            instances.insert(label.to_string(), Rc::clone(&fresh));
            fresh
        };
        slots[slot] = Some(handle);
    }

    slots.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(entries: &[(&str, Option<&str>)]) -> KeySet {
        let mut set = KeySet::new();
        for (name, value) in entries {
            let key = match value {
                Some(value) => Key::with_text(name, *value).unwrap(),
                None => Key::new(name).unwrap(),
            };
            set.append_key(key).unwrap();
        }
        set
    }

    fn group_root(name: &str) -> KeyName {
        KeyName::parse(name).unwrap()
    }

    #[test]
    fn test_open_simple_group() {
        let group = config(&[
            ("system/keytree/mountpoints/simple", None),
            (
                "system/keytree/mountpoints/simple/mountpoint",
                Some("user/tests/backend/simple"),
            ),
            (
                "system/keytree/mountpoints/simple/getplugins/#1default",
                Some("mem"),
            ),
            (
                "system/keytree/mountpoints/simple/setplugins/#1default",
                Some("mem"),
            ),
        ]);
        let registry = PluginRegistry::default();
        let mut error_key = Key::new("user").unwrap();

        let backend = Backend::open(
            &group,
            &group_root("system/keytree/mountpoints/simple"),
            &registry,
            &mut error_key,
        )
        .unwrap();

        assert_eq!(
            backend.mountpoint().canonical_name(),
            "user/tests/backend/simple"
        );
        assert_eq!(backend.label(), "simple");
        assert_eq!(backend.get_chain().len(), 1);
        assert_eq!(backend.set_chain().len(), 1);
        assert!(backend.error_chain().is_empty());
        assert_eq!(error_key.warnings_count(), 0);

        // the same label resolves to the same instance across chains
        assert!(Rc::ptr_eq(&backend.get_chain()[0], &backend.set_chain()[0]));
    }

    #[test]
    fn test_chain_ordering_by_slot() {
        let group = config(&[
            ("system/keytree/mountpoints/m", None),
            ("system/keytree/mountpoints/m/mountpoint", Some("user/m")),
            ("system/keytree/mountpoints/m/getplugins/#5late", Some("mem")),
            ("system/keytree/mountpoints/m/getplugins/#1early", Some("mem")),
        ]);
        let registry = PluginRegistry::default();
        let mut error_key = Key::new("user").unwrap();

        let backend = Backend::open(
            &group,
            &group_root("system/keytree/mountpoints/m"),
            &registry,
            &mut error_key,
        )
        .unwrap();

        assert_eq!(backend.get_chain().len(), 2);
        // distinct labels produce distinct instances, ordered by slot
        assert!(!Rc::ptr_eq(&backend.get_chain()[0], &backend.get_chain()[1]));
    }

    #[test]
    fn test_missing_mountpoint_is_an_error() {
        let group = config(&[("system/keytree/mountpoints/broken", None)]);
        let registry = PluginRegistry::default();
        let mut error_key = Key::new("user").unwrap();

        let result = Backend::open(
            &group,
            &group_root("system/keytree/mountpoints/broken"),
            &registry,
            &mut error_key,
        );
        assert!(matches!(result, Err(Error::MissingMountpoint(_))));
    }

    #[test]
    fn test_unknown_plugin_warns_and_continues() {
        let group = config(&[
            ("system/keytree/mountpoints/m", None),
            ("system/keytree/mountpoints/m/mountpoint", Some("user/m")),
            ("system/keytree/mountpoints/m/getplugins/#1odd", Some("nosuch")),
            ("system/keytree/mountpoints/m/getplugins/#2def", Some("mem")),
        ]);
        let registry = PluginRegistry::default();
        let mut error_key = Key::new("user").unwrap();

        let backend = Backend::open(
            &group,
            &group_root("system/keytree/mountpoints/m"),
            &registry,
            &mut error_key,
        )
        .unwrap();

        assert_eq!(backend.get_chain().len(), 1);
        assert_eq!(error_key.warnings_count(), 1);
        assert_eq!(error_key.warning(0).unwrap().0, WARN_PLUGIN_UNKNOWN);
    }

    #[test]
    fn test_bad_slot_reference_warns() {
        let group = config(&[
            ("system/keytree/mountpoints/m", None),
            ("system/keytree/mountpoints/m/mountpoint", Some("user/m")),
            (
                "system/keytree/mountpoints/m/getplugins/#99toolarge",
                Some("mem"),
            ),
            ("system/keytree/mountpoints/m/getplugins/nohash", Some("mem")),
        ]);
        let registry = PluginRegistry::default();
        let mut error_key = Key::new("user").unwrap();

        let backend = Backend::open(
            &group,
            &group_root("system/keytree/mountpoints/m"),
            &registry,
            &mut error_key,
        )
        .unwrap();

        assert!(backend.get_chain().is_empty());
        assert_eq!(error_key.warnings_count(), 2);
    }

    #[test]
    fn test_cascading_and_empty_mountpoints_parse() {
        for (value, expected) in [("/tests/simple", "/tests/simple"), ("/", "/"), ("", "")] {
            let group = config(&[
                ("system/keytree/mountpoints/m", None),
                ("system/keytree/mountpoints/m/mountpoint", Some(value)),
            ]);
            let registry = PluginRegistry::default();
            let mut error_key = Key::new("user").unwrap();
            let backend = Backend::open(
                &group,
                &group_root("system/keytree/mountpoints/m"),
                &registry,
                &mut error_key,
            )
            .unwrap();
            assert_eq!(backend.mountpoint().canonical_name(), expected);
        }
    }
}
