//! Error types for tasksync entities.

use thiserror::Error;

/// Errors raised when building or mutating an entity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Name is empty after trimming.
    #[error("name cannot be empty")]
    EmptyName,

    /// Name exceeds the maximum length.
    #[error("name too long (max {max} characters)")]
    NameTooLong {
        /// Maximum allowed length.
        max: usize,
    },

    /// Priority string not recognized.
    #[error("unknown priority: {0} (expected low, medium or high)")]
    UnknownPriority(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ValidationError::NameTooLong { max: 256 };
        assert_eq!(err.to_string(), "name too long (max 256 characters)");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ValidationError>();
    }
}
