//! The mount trie
//!
//! Maps canonical key names to the backend mounted at their longest
//! matching prefix. Nodes hold a sparse byte-keyed map of compressed edges
//! plus one dedicated slot for the empty mount path (the root mount, which
//! matches everything deeper mounts do not claim).
//!
//! Matching is byte-granular, not segment-granular: every stored mount
//! path ends with the separator and every queried name gets one appended,
//! which is what lets `user/endings` claim `user/endings/x` while
//! rejecting suffix continuations such as `user/endingsX`.

use crate::backend::BackendId;
use keytree_core::KeyName;
use std::collections::BTreeMap;

/// Prefix index from canonical mount paths to backends.
#[derive(Debug, Default)]
pub struct Trie {
    root: Node,
}

#[derive(Debug, Default)]
struct Node {
    children: BTreeMap<u8, Edge>,
    /// Backend mounted at the empty path relative to this node.
    empty: Option<BackendId>,
}

#[derive(Debug)]
struct Edge {
    chunk: Vec<u8>,
    backend: Option<BackendId>,
    child: Option<Box<Node>>,
}

impl Trie {
    /// An empty trie.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no mount has been inserted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty() && self.root.empty.is_none()
    }

    /// Insert a mount path.
    ///
    /// Non-empty paths are normalized to end with the separator; the empty
    /// path is the root mount and lands in the dedicated empty slot.
    /// Inserting at an already mounted path overwrites the previous
    /// backend reference (last writer wins).
    pub fn insert(&mut self, path: &str, backend: BackendId) {
        if path.is_empty() {
            self.root.empty = Some(backend);
            return;
        }
        let mut bytes = path.as_bytes().to_vec();
        if bytes.last() != Some(&b'/') {
            bytes.push(b'/');
        }
        insert_at(&mut self.root, bytes, backend);
    }

    /// Find the backend mounted at the longest prefix of `name`.
    ///
    /// Returns `None` when no mount matches; the caller substitutes the
    /// default backend.
    #[must_use]
    pub fn lookup(&self, name: &KeyName) -> Option<BackendId> {
        let mut bytes = name.canonical().as_bytes().to_vec();
        if bytes.last() != Some(&b'/') {
            bytes.push(b'/');
        }
        lookup_at(&self.root, &bytes)
    }

    /// Every mounted (path, backend) pair, in canonical path order.
    #[must_use]
    pub fn mounts(&self) -> Vec<(String, BackendId)> {
        let mut out = Vec::new();
        collect(&self.root, &mut Vec::new(), &mut out);
        out
    }
}

fn insert_at(node: &mut Node, path: Vec<u8>, backend: BackendId) {
    debug_assert!(!path.is_empty());
    let first = path[0];
    let edge = match node.children.entry(first) {
        std::collections::btree_map::Entry::Vacant(slot) => {
            slot.insert(Edge {
                chunk: path,
                backend: Some(backend),
                child: None,
            });
            return;
        }
        std::collections::btree_map::Entry::Occupied(slot) => slot.into_mut(),
    };

    let common = edge
        .chunk
        .iter()
        .zip(&path)
        .take_while(|(a, b)| a == b)
        .count();

    if common == edge.chunk.len() {
        let rest = path[common..].to_vec();
        if rest.is_empty() {
            // same path: the previous mount is replaced
            edge.backend = Some(backend);
        } else {
            let child = edge.child.get_or_insert_with(Box::default);
            insert_at(child, rest, backend);
        }
        return;
    }

    // diverging paths: split the edge at the common prefix
    let parted_chunk = edge.chunk.split_off(common);
    let mut parted = Node::default();
    parted.children.insert(
        parted_chunk[0],
        Edge {
            chunk: parted_chunk,
            backend: edge.backend.take(),
            child: edge.child.take(),
        },
    );
    edge.child = Some(Box::new(parted));

    let rest = path[common..].to_vec();
    if rest.is_empty() {
        edge.backend = Some(backend);
    } else if let Some(child) = edge.child.as_deref_mut() {
        insert_at(child, rest, backend);
    }
}

fn lookup_at(node: &Node, name: &[u8]) -> Option<BackendId> {
    let Some(&first) = name.first() else {
        return node.empty;
    };
    let matched = node.children.get(&first).and_then(|edge| {
        if name.starts_with(&edge.chunk) {
            let rest = &name[edge.chunk.len()..];
            edge.child
                .as_deref()
                .and_then(|child| lookup_at(child, rest))
                .or(edge.backend)
        } else {
            None
        }
    });
    matched.or(node.empty)
}

fn collect(node: &Node, prefix: &mut Vec<u8>, out: &mut Vec<(String, BackendId)>) {
    if let Some(backend) = node.empty {
        out.push((String::from_utf8_lossy(prefix).into_owned(), backend));
    }
    for edge in node.children.values() {
        prefix.extend_from_slice(&edge.chunk);
        if let Some(backend) = edge.backend {
            out.push((String::from_utf8_lossy(prefix).into_owned(), backend));
        }
        if let Some(child) = edge.child.as_deref() {
            collect(child, prefix, out);
        }
        prefix.truncate(prefix.len() - edge.chunk.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: usize) -> BackendId {
        BackendId::from(n)
    }

    fn name(s: &str) -> KeyName {
        KeyName::parse(s).unwrap()
    }

    fn build(paths: &[&str]) -> Trie {
        let mut trie = Trie::new();
        for (n, path) in paths.iter().enumerate() {
            trie.insert(path, id(n));
        }
        trie
    }

    #[test]
    fn test_minimal_root_mount() {
        let trie = build(&[""]);
        assert!(!trie.is_empty());
        for query in ["user", "system", "user/below", "system/below"] {
            assert_eq!(trie.lookup(&name(query)), Some(id(0)), "query {query}");
        }
    }

    #[test]
    fn test_simple_mount() {
        let trie = build(&["user/tests/simple"]);
        assert_eq!(trie.lookup(&name("user")), None);
        assert_eq!(trie.lookup(&name("user/tests/simple")), Some(id(0)));
        assert_eq!(trie.lookup(&name("user/tests/simple/below")), Some(id(0)));
        assert_eq!(
            trie.lookup(&name("user/tests/simple/deep/below")),
            Some(id(0))
        );
    }

    #[test]
    fn test_nested_mounts_longest_prefix_wins() {
        // insertion order must not matter
        let orders: [&[&str]; 2] = [
            &["user/tests/hosts", "user/tests/hosts/below"],
            &["user/tests/hosts/below", "user/tests/hosts"],
        ];
        for paths in orders {
            let mut trie = Trie::new();
            let mut hosts = id(0);
            let mut below = id(1);
            if paths[0].len() > paths[1].len() {
                std::mem::swap(&mut hosts, &mut below);
            }
            trie.insert(paths[0], id(0));
            trie.insert(paths[1], id(1));

            assert_eq!(trie.lookup(&name("user")), None);
            assert_eq!(trie.lookup(&name("user/tests/hosts")), Some(hosts));
            assert_eq!(trie.lookup(&name("user/tests/hosts/other/below")), Some(hosts));
            assert_eq!(
                trie.lookup(&name("user/tests/hosts/other/deep/below")),
                Some(hosts)
            );
            assert_eq!(trie.lookup(&name("user/tests/hosts/below")), Some(below));
            assert_eq!(
                trie.lookup(&name("user/tests/hosts/below/other/deep/below")),
                Some(below)
            );
        }
    }

    #[test]
    fn test_both_namespaces() {
        let paths = [
            "user",
            "user/tests",
            "user/tests/hosts",
            "user/tests/hosts/below",
            "system",
            "system/tests",
            "system/tests/hosts",
            "system/tests/hosts/below",
        ];
        let trie = build(&paths);

        assert_eq!(trie.lookup(&name("user")), Some(id(0)));
        assert_eq!(trie.lookup(&name("user/tests/hosts/other/below")), Some(id(2)));
        assert_eq!(
            trie.lookup(&name("user/tests/hosts/below/other/deep/below")),
            Some(id(3))
        );
        assert_eq!(trie.lookup(&name("system")), Some(id(4)));
        assert_eq!(
            trie.lookup(&name("system/tests/hosts/other/deep/below")),
            Some(id(6))
        );
        assert_eq!(trie.lookup(&name("system/tests/hosts/below")), Some(id(7)));

        // every mount is enumerable exactly once
        let mounts = trie.mounts();
        assert_eq!(mounts.len(), paths.len());
    }

    #[test]
    fn test_insertion_order_is_irrelevant() {
        let orders: [&[&str]; 3] = [
            &["user/tests", "user/tests/hosts", "system/tests", "system", "user"],
            &["system", "user/tests/hosts", "user", "user/tests", "system/tests"],
            &["user", "system", "system/tests", "user/tests/hosts", "user/tests"],
        ];
        for paths in orders {
            let mut trie = Trie::new();
            for path in paths {
                // stable id per path, independent of insertion order
                let stable = match *path {
                    "user" => 0,
                    "user/tests" => 1,
                    "user/tests/hosts" => 2,
                    "system" => 3,
                    _ => 4,
                };
                trie.insert(path, id(stable));
            }
            assert_eq!(trie.lookup(&name("user/other")), Some(id(0)));
            assert_eq!(trie.lookup(&name("user/tests/other")), Some(id(1)));
            assert_eq!(trie.lookup(&name("user/tests/hosts/x")), Some(id(2)));
            assert_eq!(trie.lookup(&name("system/other")), Some(id(3)));
            assert_eq!(trie.lookup(&name("system/tests/deep")), Some(id(4)));
        }
    }

    #[test]
    fn test_sibling_segments_diverging_after_shared_prefix() {
        // all four diverge one byte after "user/umlauts"
        let mut trie = Trie::new();
        trie.insert("user/umlauts/test", id(0));
        trie.insert("user/umlauts#test", id(1));
        trie.insert("user/umlauts test", id(2));
        trie.insert("user/umlauts\u{fc}test", id(3));

        assert_eq!(trie.lookup(&name("user")), None);
        assert_eq!(trie.lookup(&name("user/umlauts/test")), Some(id(0)));
        assert_eq!(trie.lookup(&name("user/umlauts#test")), Some(id(1)));
        assert_eq!(trie.lookup(&name("user/umlauts test")), Some(id(2)));
        assert_eq!(trie.lookup(&name("user/umlauts\u{fc}test")), Some(id(3)));
    }

    #[test]
    fn test_endings_suffix_must_not_match() {
        // four mounts differing only in the byte after "user/endings"
        let orders: [&[&str]; 4] = [
            &["user/endings", "user/endings#", "user/endings ", "user/endings\u{fc}"],
            &["user/endings#", "user/endings ", "user/endings\u{fc}", "user/endings"],
            &["user/endings ", "user/endings\u{fc}", "user/endings", "user/endings#"],
            &["user/endings\u{fc}", "user/endings ", "user/endings#", "user/endings"],
        ];
        for paths in orders {
            let mut trie = Trie::new();
            let stable = |path: &str| match path {
                "user/endings" => 0,
                "user/endings#" => 1,
                "user/endings " => 2,
                _ => 3,
            };
            for path in paths {
                trie.insert(path, id(stable(path)));
            }

            assert_eq!(trie.lookup(&name("user")), None);
            assert_eq!(trie.lookup(&name("user/endings")), Some(id(0)));
            assert_eq!(trie.lookup(&name("user/endings#")), Some(id(1)));
            assert_eq!(trie.lookup(&name("user/endings ")), Some(id(2)));
            assert_eq!(trie.lookup(&name("user/endings\u{fc}")), Some(id(3)));

            // descendants match the slash mount
            assert_eq!(trie.lookup(&name("user/endings/_")), Some(id(0)));
            assert_eq!(trie.lookup(&name("user/endings/X")), Some(id(0)));

            // suffix continuation without a separator must miss entirely
            assert_eq!(trie.lookup(&name("user/endings_")), None);
            assert_eq!(trie.lookup(&name("user/endingsX")), None);
            assert_eq!(trie.lookup(&name("user/endings!")), None);
        }
    }

    #[test]
    fn test_root_mount_is_the_fallback() {
        let mut trie = Trie::new();
        trie.insert("", id(0));
        trie.insert("user/tests/simple", id(1));

        assert_eq!(trie.lookup(&name("user")), Some(id(0)));
        assert_eq!(trie.lookup(&name("user/tests")), Some(id(0)));
        assert_eq!(trie.lookup(&name("user/tests/simple")), Some(id(1)));
        assert_eq!(trie.lookup(&name("user/tests/simple/deep/below")), Some(id(1)));
        assert_eq!(trie.lookup(&name("system/other")), Some(id(0)));
    }

    #[test]
    fn test_double_insertion_last_writer_wins() {
        let mut trie = Trie::new();
        trie.insert("", id(0));
        trie.insert("user/tests/simple", id(1));
        trie.insert("user/tests/simple", id(2));
        assert_eq!(trie.lookup(&name("user/tests/simple")), Some(id(2)));
        assert_eq!(trie.lookup(&name("user/tests/simple/below")), Some(id(2)));
        assert_eq!(trie.mounts().len(), 2);
    }

    #[test]
    fn test_trailing_slash_spellings_are_equivalent() {
        let mut trie = Trie::new();
        trie.insert("user/umlauts/b/", id(0));
        trie.insert("user/umlauts/a/", id(1));
        trie.insert("user/umlauts/", id(2));
        trie.insert("user/umlauts/c/", id(3));
        trie.insert("user/", id(4));

        assert_eq!(trie.lookup(&name("user/umlauts/b/x")), Some(id(0)));
        assert_eq!(trie.lookup(&name("user/umlauts/a")), Some(id(1)));
        assert_eq!(trie.lookup(&name("user/umlauts/other")), Some(id(2)));
        assert_eq!(trie.lookup(&name("user/umlauts/c")), Some(id(3)));
        assert_eq!(trie.lookup(&name("user/elsewhere")), Some(id(4)));
        assert_eq!(trie.lookup(&name("user")), Some(id(4)));
    }
}
