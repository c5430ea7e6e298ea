//! Keytree Core - Key names, keys and keysets
//!
//! This crate provides the data model of the Keytree configuration
//! database: the key name canonicalizer, the [`Key`] type and the ordered
//! [`KeySet`] collection. The mount and transaction engine lives in
//! `keytree-engine`.

pub mod error;
pub mod key;
pub mod keyset;
pub mod name;

pub use error::{Error, NameError, Result};
pub use key::{Key, KeyValue};
pub use keyset::KeySet;
pub use name::{escape_part, unescape_part, validate_part, KeyName, Namespace};
