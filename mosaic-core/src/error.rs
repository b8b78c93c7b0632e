//! Error types.

use thiserror::Error;

/// Errors raised when reading or calling into module state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The requested key is not present in the map.
    #[error("no field named `{key}`")]
    UnknownKey { key: String },

    /// The field exists but does not hold a function.
    #[error("field `{key}` holds {found}, not a function")]
    NotCallable { key: String, found: &'static str },

    /// A value could not be converted to the requested type.
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

/// Result alias for fallible store operations.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_readable_messages() {
        let err = StoreError::NotCallable {
            key: "count".to_string(),
            found: "int",
        };
        assert_eq!(err.to_string(), "field `count` holds int, not a function");

        let err = StoreError::TypeMismatch {
            expected: "int",
            found: "string",
        };
        assert_eq!(err.to_string(), "expected int, found string");
    }
}
