//! Cache Module
//!
//! Value types shared by the facade and the engines: metadata envelope,
//! expiration policy, lazy references, cache keys, LRU ordering and stats.

mod expiration;
mod key;
mod lazy;
mod lru;
mod metadata;
mod stats;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use expiration::ExpirationPolicy;
pub use key::{
    CacheType, IllustSetQuery, RankingMode, RecordFamily, SetKey, SetQuery, UserSetQuery,
};
pub use lazy::{CachedSet, Lazy, LazyIllust, LazyUser};
pub use lru::LruTracker;
pub use metadata::{datetime_from_ms, Metadata, NextQs};
pub use stats::{CacheStats, StatsRecorder};
