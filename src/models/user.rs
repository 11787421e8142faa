//! User (artist) entity as returned by the remote API.

use serde::{Deserialize, Serialize};

use super::{CacheEntity, EntityKind};

/// User detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub account: String,
}

impl User {
    pub fn new(id: i64, name: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            account: account.into(),
        }
    }
}

impl CacheEntity for User {
    const KIND: EntityKind = EntityKind::User;

    fn id(&self) -> i64 {
        self.id
    }
}
