//! Cache entries, expirations and statistics.

use chrono::{DateTime, Duration, Utc};

/// When a cached value stops being served.
///
/// Relative variants are resolved against the cache clock when the value
/// is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiration {
    /// Never expires.
    #[default]
    Never,
    /// Expires this many seconds after `set`.
    Seconds(u64),
    /// Expires this many minutes after `set`.
    Minutes(u64),
    /// Expires this many hours after `set`.
    Hours(u64),
    /// Expires this many days after `set`.
    Days(u64),
    /// Expires at a fixed instant.
    At(DateTime<Utc>),
}

impl Expiration {
    /// Build a relative expiration from a std duration, at second precision.
    pub fn after(ttl: std::time::Duration) -> Self {
        Self::Seconds(ttl.as_secs())
    }

    /// Absolute expiry instant for a value stored at `now`.
    ///
    /// `None` means the value never expires. Durations too large to
    /// represent are treated as never expiring.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let secs = match *self {
            Self::Never => return None,
            Self::At(at) => return Some(at),
            Self::Seconds(n) => n,
            Self::Minutes(n) => n.saturating_mul(60),
            Self::Hours(n) => n.saturating_mul(3_600),
            Self::Days(n) => n.saturating_mul(86_400),
        };
        let delta = i64::try_from(secs).ok().and_then(Duration::try_seconds)?;
        now.checked_add_signed(delta)
    }
}

/// One stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Serialized value.
    pub value: Vec<u8>,
    /// Instant from which the entry is no longer served.
    pub expires_at: Option<DateTime<Utc>>,
    /// When the entry was stored.
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create an entry stored at `now`.
    pub fn new(value: Vec<u8>, expiration: Expiration, now: DateTime<Utc>) -> Self {
        Self {
            value,
            expires_at: expiration.expires_at(now),
            created_at: now,
        }
    }

    /// Expired iff `now` has reached the expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        self.value.len()
    }
}

/// Diagnostic snapshot of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatistics {
    /// `get` calls since the last `clear_all`.
    pub total_requests: u64,
    /// `get` calls that returned a value.
    pub hits: u64,
    /// `get` calls that returned nothing.
    pub misses: u64,
    /// Entries currently stored, including expired ones not yet evicted.
    pub item_count: usize,
    /// Sum of serialized value lengths in bytes.
    pub cache_size: usize,
}

impl CacheStatistics {
    /// Fraction of requests that hit, 0.0 when there were none.
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_requests as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn relative_expirations_resolve() {
        assert_eq!(Expiration::Never.expires_at(at(0)), None);
        assert_eq!(Expiration::Seconds(5).expires_at(at(0)), Some(at(5)));
        assert_eq!(Expiration::Minutes(15).expires_at(at(0)), Some(at(900)));
        assert_eq!(Expiration::Hours(1).expires_at(at(0)), Some(at(3_600)));
        assert_eq!(Expiration::Days(1).expires_at(at(0)), Some(at(86_400)));
        assert_eq!(Expiration::At(at(42)).expires_at(at(0)), Some(at(42)));
    }

    #[test]
    fn huge_expiration_never_expires() {
        assert_eq!(Expiration::Days(u64::MAX).expires_at(at(0)), None);
    }

    #[test]
    fn after_uses_whole_seconds() {
        let expiration = Expiration::after(std::time::Duration::from_millis(90_500));
        assert_eq!(expiration, Expiration::Seconds(90));
    }

    #[test]
    fn entry_expires_at_boundary() {
        let entry = CacheEntry::new(vec![1, 2, 3], Expiration::Seconds(10), at(0));
        assert!(!entry.is_expired(at(9)));
        assert!(entry.is_expired(at(10)));
        assert!(entry.is_expired(at(11)));
        assert_eq!(entry.size(), 3);
    }

    #[test]
    fn hit_rate() {
        let stats = CacheStatistics {
            total_requests: 4,
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStatistics::default().hit_rate(), 0.0);
    }
}
