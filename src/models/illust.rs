//! Illustration entity as returned by the remote API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CacheEntity, EntityKind, User};

/// A tag attached to an illustration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default)]
    pub translated_name: Option<String>,
}

impl Tag {
    pub fn new(name: impl Into<String>, translated_name: Option<String>) -> Self {
        Self {
            name: name.into(),
            translated_name,
        }
    }
}

/// Illustration detail.
///
/// The cache only relies on `id`; everything else travels as an opaque body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Illust {
    pub id: i64,
    pub title: String,
    #[serde(rename = "type", default = "default_illust_type")]
    pub illust_type: String,
    #[serde(default)]
    pub caption: String,
    pub user: User,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub create_date: Option<DateTime<Utc>>,
    #[serde(default = "default_page_count")]
    pub page_count: u32,
    #[serde(default)]
    pub total_view: u64,
    #[serde(default)]
    pub total_bookmarks: u64,
}

fn default_illust_type() -> String {
    "illust".to_string()
}

fn default_page_count() -> u32 {
    1
}

impl Illust {
    /// Minimal illustration, mostly useful for tests and fixtures.
    pub fn new(id: i64, title: impl Into<String>, user: User) -> Self {
        Self {
            id,
            title: title.into(),
            illust_type: default_illust_type(),
            caption: String::new(),
            user,
            tags: Vec::new(),
            create_date: None,
            page_count: default_page_count(),
            total_view: 0,
            total_bookmarks: 0,
        }
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }
}

impl CacheEntity for Illust {
    const KIND: EntityKind = EntityKind::Illust;

    fn id(&self) -> i64 {
        self.id
    }

    fn tags(&self) -> &[Tag] {
        &self.tags
    }
}
