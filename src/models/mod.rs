//! Entity models and admin API response bodies
//!
//! Entities are what the cache stores; responses are the DTOs the admin
//! HTTP surface serializes.

pub mod illust;
pub mod responses;
pub mod user;

use serde::{de::DeserializeOwned, Serialize};

// Re-export commonly used types
pub use illust::{Illust, Tag};
pub use responses::{CountsResponse, HealthResponse, StatsResponse};
pub use user::User;

/// The two entity kinds that own a detail cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Illust,
    User,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Illust => "illust",
            EntityKind::User => "user",
        }
    }
}

/// Something with a stable integer id that can live in a detail cache.
///
/// Bodies are stored as JSON documents; engines never look past the id.
pub trait CacheEntity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> i64;

    /// Tags to feed the tag index on write. Only illustrations carry any.
    fn tags(&self) -> &[Tag] {
        &[]
    }
}
