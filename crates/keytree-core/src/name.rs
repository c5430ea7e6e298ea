//! Key name canonicalization
//!
//! A key name is a namespace plus a sequence of path segments separated by
//! `/`. Within a segment, `/` and `\` are escaped with a backslash, a
//! segment consisting of `%` denotes an intentionally empty segment, and
//! `\.`/`\..` spell segments that would otherwise read as path navigation.
//! [`KeyName::parse`] decodes the namespace exactly once; everything else in
//! the workspace works on the decoded form.
//!
//! Ordering is hierarchical: namespaces first, then segment-wise byte
//! comparison. This is the order that keeps all keys below a common prefix
//! contiguous, which `KeySet::cut` relies on.

use crate::error::NameError;
use std::fmt;

/// Characters a backslash may escape inside a name segment.
const ESCAPABLE: &[char] = &['\\', '/', '%', '#', '.'];

/// The top-level partition of the key hierarchy.
///
/// `Cascading` names carry no namespace prefix and resolve into both `user`
/// and `system` at mount time. `Meta` is internal: it tags the names of
/// metadata keys attached to a [`crate::Key`] and never reaches the mount
/// logic.
///
/// Variants are declared in sort order (the order of the canonical
/// renderings: `/…` < `system…` < `user…`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Namespace {
    /// No namespace prefix; resolved at mount time.
    Cascading,
    /// The global view.
    System,
    /// The per-user view.
    User,
    /// Metadata key names (internal).
    Meta,
}

impl Namespace {
    /// The canonical name prefix for this namespace.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Cascading | Self::Meta => "",
        }
    }

    /// Whether this is the `user` namespace.
    #[must_use]
    pub const fn is_user(self) -> bool {
        matches!(self, Self::User)
    }

    /// Whether this is the `system` namespace.
    #[must_use]
    pub const fn is_system(self) -> bool {
        matches!(self, Self::System)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cascading => write!(f, "cascading"),
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Meta => write!(f, "meta"),
        }
    }
}

/// A decoded, canonical key name.
///
/// Holds the namespace, the unescaped segments, and the canonical escaped
/// rendering used for ordering and trie indexing. Comparisons are performed
/// on the underlying bytes of the segments, never on characters.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyName {
    namespace: Namespace,
    segments: Vec<String>,
    canonical: String,
}

impl KeyName {
    /// Parse and canonicalize a key name.
    ///
    /// Multiple separators collapse, unescaped `.` segments are dropped and
    /// unescaped `..` segments pop the previous segment (clamped at the
    /// namespace root); the surviving segments are then validated. The empty
    /// string is not a name and is rejected.
    pub fn parse(name: &str) -> Result<Self, NameError> {
        if name.is_empty() {
            return Err(NameError::Empty);
        }

        let mut parts = split_escaped(name);
        let namespace = if name.starts_with('/') {
            parts.remove(0); // the empty part before the leading separator
            Namespace::Cascading
        } else {
            match parts.remove(0) {
                "user" => Namespace::User,
                "system" => Namespace::System,
                other => return Err(NameError::InvalidNamespace(other.to_string())),
            }
        };

        let mut segments = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                _ => segments.push(unescape_part(part)?),
            }
        }

        Ok(Self::assemble(namespace, segments))
    }

    /// Build the name of a metadata key, e.g. `warnings/#00/reason`.
    ///
    /// Same segment syntax as regular names, but without a namespace
    /// prefix. Only [`crate::Key`] metadata uses these.
    pub fn meta(path: &str) -> Result<Self, NameError> {
        if path.is_empty() {
            return Err(NameError::Empty);
        }
        let mut segments = Vec::new();
        for part in split_escaped(path) {
            match part {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                _ => segments.push(unescape_part(part)?),
            }
        }
        Ok(Self::assemble(Namespace::Meta, segments))
    }

    /// Build a name directly from a namespace and unescaped segments.
    #[must_use]
    pub fn from_segments<S: Into<String>>(
        namespace: Namespace,
        segments: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::assemble(namespace, segments.into_iter().map(Into::into).collect())
    }

    fn assemble(namespace: Namespace, segments: Vec<String>) -> Self {
        let canonical = render(namespace, &segments);
        Self {
            namespace,
            segments,
            canonical,
        }
    }

    /// The namespace tag.
    #[must_use]
    pub const fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// The unescaped path segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The canonical escaped rendering, e.g. `user/a\/b` or `/tests`.
    #[must_use]
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// The last segment, unescaped.
    #[must_use]
    pub fn base(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// A child name with one more literal (unescaped) segment.
    #[must_use]
    pub fn join(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self::assemble(self.namespace, segments)
    }

    /// Whether `self` is `other` or lies below it in the hierarchy.
    ///
    /// Namespaces never cross-match here; cascading resolution happens at
    /// mount time, not in name comparison.
    #[must_use]
    pub fn is_same_or_below(&self, other: &Self) -> bool {
        self.namespace == other.namespace
            && self.segments.len() >= other.segments.len()
            && self.segments[..other.segments.len()] == other.segments[..]
    }

    /// Whether `self` lies strictly below `other`.
    #[must_use]
    pub fn is_below(&self, other: &Self) -> bool {
        self.segments.len() > other.segments.len() && self.is_same_or_below(other)
    }
}

impl fmt::Display for KeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl fmt::Debug for KeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyName({:?})", self.canonical)
    }
}

fn render(namespace: Namespace, segments: &[String]) -> String {
    match namespace {
        Namespace::System | Namespace::User => {
            let mut out = String::from(namespace.prefix());
            for segment in segments {
                out.push('/');
                out.push_str(&escape_part(segment));
            }
            out
        }
        Namespace::Cascading => {
            if segments.is_empty() {
                return "/".to_string();
            }
            let mut out = String::new();
            for segment in segments {
                out.push('/');
                out.push_str(&escape_part(segment));
            }
            out
        }
        Namespace::Meta => segments
            .iter()
            .map(|s| escape_part(s))
            .collect::<Vec<_>>()
            .join("/"),
    }
}

/// Split a name on unescaped separators.
///
/// A `/` preceded by an odd number of backslashes is part of its segment;
/// an even number means the backslashes escape each other and the `/`
/// separates.
fn split_escaped(name: &str) -> Vec<&str> {
    let bytes = name.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut backslashes = 0usize;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'/' && backslashes % 2 == 0 {
            parts.push(&name[start..i]);
            start = i + 1;
        }
        backslashes = if b == b'\\' { backslashes + 1 } else { 0 };
    }
    parts.push(&name[start..]);
    parts
}

/// Escape one raw segment into its canonical part spelling.
///
/// The empty segment becomes `%`; segments that would read as `%`, `.` or
/// `..` get a leading backslash; otherwise every `\` and `/` is prefixed
/// with a backslash. Exact inverse of [`unescape_part`] for all inputs.
#[must_use]
pub fn escape_part(segment: &str) -> String {
    match segment {
        "" => "%".to_string(),
        "%" => "\\%".to_string(),
        "." => "\\.".to_string(),
        ".." => "\\..".to_string(),
        _ => {
            let mut out = String::with_capacity(segment.len());
            for c in segment.chars() {
                if c == '\\' || c == '/' {
                    out.push('\\');
                }
                out.push(c);
            }
            out
        }
    }
}

/// Unescape one canonical part back into the raw segment.
///
/// Fails on a trailing backslash, on a backslash escaping a character
/// outside `\ / % # .`, and on an unescaped separator.
pub fn unescape_part(part: &str) -> Result<String, NameError> {
    if part == "%" {
        return Ok(String::new());
    }
    let mut out = String::with_capacity(part.len());
    let mut chars = part.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(e) if ESCAPABLE.contains(&e) => out.push(e),
                Some(other) => return Err(NameError::BadEscape(other)),
                None => return Err(NameError::TrailingEscape),
            },
            '/' => return Err(NameError::UnescapedSeparator),
            _ => out.push(c),
        }
    }
    Ok(out)
}

/// Check one canonical part for escaping errors without unescaping it.
pub fn validate_part(part: &str) -> Result<(), NameError> {
    unescape_part(part).map(|_| ())
}
