//! Error types for the Keytree core
//!
//! Invalid names and misuse of shared keys are reported as typed errors;
//! "key not found" is never an error, only an empty lookup result.

use thiserror::Error;

/// Common result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the Keytree core
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("invalid key name: {0}")]
    InvalidName(#[from] NameError),

    #[error("key is held by more than one keyset and cannot be modified")]
    SharedKey,

    #[error("a key without a name cannot be appended to a keyset")]
    NamelessKey,
}

/// Errors that can occur when parsing or validating a key name
#[derive(Debug, Clone, Error)]
pub enum NameError {
    #[error("key name cannot be empty")]
    Empty,

    #[error("key name must start with 'user', 'system' or '/', got '{0}'")]
    InvalidNamespace(String),

    #[error("backslash cannot escape '{0}'")]
    BadEscape(char),

    #[error("trailing backslash escapes nothing")]
    TrailingEscape,

    #[error("name segment contains an unescaped separator")]
    UnescapedSeparator,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_error_nests_into_error() {
        let err: Error = NameError::TrailingEscape.into();
        assert!(matches!(err, Error::InvalidName(_)));
        assert_eq!(
            err.to_string(),
            "invalid key name: trailing backslash escapes nothing"
        );
    }
}
