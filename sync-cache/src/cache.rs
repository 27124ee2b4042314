//! Cache abstraction.
//!
//! [`Cache`] is the object-safe, byte-level contract shared by the sync
//! coordinator and the repository read paths. [`TypedCache`] layers
//! serde-based encoding on top and is implemented for every `Cache`.
//!
//! Cache operations never suspend the caller, so the trait is synchronous.

use crate::{CacheError, CacheStatistics, Expiration};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Thread-safe key/value store with per-entry expiry.
pub trait Cache: Send + Sync + std::fmt::Debug {
    /// Store `value` under `key`, replacing any existing entry.
    fn set_raw(&self, key: &str, value: Vec<u8>, expiration: Expiration);

    /// Fetch the bytes stored under `key` if present and unexpired.
    ///
    /// Counts one request and one hit or miss. An expired entry is evicted.
    fn get_raw(&self, key: &str) -> Option<Vec<u8>>;

    /// Delete the entry for `key`; no-op if absent.
    fn remove(&self, key: &str);

    /// Whether an unexpired entry exists for `key`. Not counted as a request.
    fn exists(&self, key: &str) -> bool;

    /// Delete every entry and reset the request counters.
    fn clear_all(&self);

    /// Delete every expired entry. Returns how many were removed.
    fn clear_expired(&self) -> usize;

    /// Diagnostic snapshot.
    fn statistics(&self) -> CacheStatistics;

    /// Number of stored entries.
    fn item_count(&self) -> usize;

    /// Turn the most recent hit into a miss.
    ///
    /// Called by typed readers when stored bytes fail to decode.
    fn record_decode_miss(&self);
}

/// Serde-typed access to any [`Cache`].
pub trait TypedCache: Cache {
    /// Encode and store `value`.
    fn try_set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expiration: Expiration,
    ) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value).map_err(|source| CacheError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.set_raw(key, bytes, expiration);
        Ok(())
    }

    /// Encode and store `value`; an encoding failure is logged and the
    /// write dropped.
    fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, expiration: Expiration) {
        if let Err(e) = self.try_set(key, value, expiration) {
            tracing::warn!("Cache write dropped: {}", e);
        }
    }

    /// Fetch and decode the value under `key`.
    ///
    /// A decode failure is counted as a miss and returned as an error.
    fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let Some(bytes) = self.get_raw(key) else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(source) => {
                self.record_decode_miss();
                Err(CacheError::Decode {
                    key: key.to_string(),
                    source,
                })
            }
        }
    }

    /// Fetch and decode the value under `key`; a decode failure is logged
    /// and treated as absent.
    fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.try_get(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Cache read treated as miss: {}", e);
                None
            }
        }
    }
}

impl<C: Cache + ?Sized> TypedCache for C {}
