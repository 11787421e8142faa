//! Tag indexing collaborator
//!
//! Detail and set writes hand illustration tags to a [`TagIndexer`] on a
//! spawned task. The write never waits for it and never sees its errors.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::models::Tag;

#[async_trait]
pub trait TagIndexer: Send + Sync {
    async fn update_from_tags(&self, tags: Vec<Tag>) -> Result<()>;
}

/// Tag name to translated name, kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryTagIndex {
    translations: RwLock<HashMap<String, Option<String>>>,
}

impl InMemoryTagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translated name for `name`, if one has been seen.
    pub async fn translate(&self, name: &str) -> Option<String> {
        self.translations.read().await.get(name).cloned().flatten()
    }

    pub async fn len(&self) -> usize {
        self.translations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.translations.read().await.is_empty()
    }
}

#[async_trait]
impl TagIndexer for InMemoryTagIndex {
    async fn update_from_tags(&self, tags: Vec<Tag>) -> Result<()> {
        let mut translations = self.translations.write().await;
        let count = tags.len();
        for tag in tags {
            let entry = translations.entry(tag.name).or_default();
            // A tag seen without translation keeps the one already known
            if tag.translated_name.is_some() {
                *entry = tag.translated_name;
            }
        }
        debug!("Indexed {} tags ({} known)", count, translations.len());
        Ok(())
    }
}
