//! Expiration Policy
//!
//! Freshness check applied to every record right after it is found and
//! before any of its members are read.

use chrono::{DateTime, Duration, Utc};

use crate::cache::Metadata;
use crate::error::{CacheError, Result};

/// TTLs are clamped to a century so timestamp arithmetic cannot overflow.
const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 3600;

// == Expiration Policy ==
/// Time-to-live for one cache family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    ttl_secs: u64,
}

impl ExpirationPolicy {
    pub fn new(ttl_secs: u64) -> Self {
        Self { ttl_secs }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    pub fn ttl(&self) -> Duration {
        Duration::seconds(self.ttl_secs.min(MAX_TTL_SECS) as i64)
    }

    // == Check ==
    /// Fails with [`CacheError::Expired`] when the record is at least `ttl` old.
    pub fn check(&self, metadata: &Metadata) -> Result<()> {
        self.check_at(metadata, Utc::now())
    }

    /// Same as [`check`](Self::check) with an explicit clock reading.
    ///
    /// Boundary condition: a record whose age equals the TTL exactly is
    /// already expired.
    pub fn check_at(&self, metadata: &Metadata, now: DateTime<Utc>) -> Result<()> {
        if metadata.age_at(now) >= self.ttl() {
            Err(CacheError::Expired(metadata.clone()))
        } else {
            Ok(())
        }
    }

    /// Oldest `update_time` still considered fresh at `now`.
    pub fn cutoff_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.ttl()
    }
}
