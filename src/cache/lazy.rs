//! Lazy references and set results
//!
//! A set cache stores member ids only; bodies come from the shared detail
//! caches and may be missing.

use crate::cache::Metadata;
use crate::models::{CacheEntity, Illust, User};

// == Lazy ==
/// Handle to an entity by id that may or may not carry the loaded body.
///
/// Invariant: `is_loaded() ⇔ content().is_some()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lazy<T> {
    id: i64,
    content: Option<T>,
}

pub type LazyIllust = Lazy<Illust>;
pub type LazyUser = Lazy<User>;

impl<T> Lazy<T> {
    /// Known to exist, detail not cached.
    pub fn stub(id: i64) -> Self {
        Self { id, content: None }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn is_loaded(&self) -> bool {
        self.content.is_some()
    }

    pub fn content(&self) -> Option<&T> {
        self.content.as_ref()
    }

    pub fn into_content(self) -> Option<T> {
        self.content
    }
}

impl<T: CacheEntity> Lazy<T> {
    /// Fully cached entity.
    pub fn loaded(content: T) -> Self {
        Self {
            id: content.id(),
            content: Some(content),
        }
    }
}

impl<T: CacheEntity> From<T> for Lazy<T> {
    fn from(content: T) -> Self {
        Self::loaded(content)
    }
}

// == Cached Set ==
/// Result of a set cache read.
///
/// `header` is the stored metadata with `pages` zeroed; `footer` is the full
/// stored metadata including pagination state.
#[derive(Debug, Clone)]
pub struct CachedSet<T> {
    pub header: Metadata,
    pub members: Vec<Lazy<T>>,
    pub footer: Metadata,
}

impl<T> CachedSet<T> {
    pub fn ids(&self) -> Vec<i64> {
        self.members.iter().map(Lazy::id).collect()
    }

    /// Members whose detail body was not cached.
    pub fn broken(&self) -> usize {
        self.members.iter().filter(|m| !m.is_loaded()).count()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
