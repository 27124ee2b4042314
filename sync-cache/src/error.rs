//! Error types for cache operations.

use thiserror::Error;

/// Cache errors.
///
/// The plain `set`/`get` helpers log these and carry on; the `try_`
/// variants return them.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The value could not be serialized.
    #[error("failed to encode value for key '{key}': {source}")]
    Encode {
        /// Cache key.
        key: String,
        /// Underlying serializer error.
        #[source]
        source: serde_json::Error,
    },

    /// The stored bytes could not be decoded as the requested type.
    #[error("failed to decode value for key '{key}': {source}")]
    Decode {
        /// Cache key.
        key: String,
        /// Underlying deserializer error.
        #[source]
        source: serde_json::Error,
    },
}
