//! Storage Module
//!
//! The backing-store capability shared by both engines. Exactly one engine is
//! active per process; it is chosen at startup by [`DataSourceType`] and
//! handed to the repository facade as an `Arc<dyn CacheEngine>`.

mod document;
mod relational;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;

use crate::cache::{CacheType, Metadata, RecordFamily, SetKey, StatsRecorder};
use crate::config::{Config, DataSourceType};
use crate::error::Result;
use crate::models::EntityKind;

pub use document::DocumentEngine;
pub use relational::RelationalEngine;

/// Deleted record count per family name.
pub type DeletedCounts = BTreeMap<String, u64>;

/// Stored detail body and its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailRecord {
    pub body: Value,
    pub metadata: Metadata,
}

/// Entity body to upsert into a detail cache.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailBody {
    pub id: i64,
    pub body: Value,
}

/// Stored download payload and its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRecord {
    pub content: Vec<u8>,
    pub metadata: Metadata,
}

/// A set member joined against its detail cache.
#[derive(Debug, Clone, PartialEq)]
pub struct SetMember {
    pub id: i64,
    /// `None` when the detail row is missing
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the member list wholesale
    Replace,
    /// Union new ids into the member list
    Append,
}

/// One set cache write, with the detail bodies to back-fill.
#[derive(Debug, Clone)]
pub struct SetWrite {
    pub cache_type: CacheType,
    pub key: SetKey,
    /// Member ids, already deduplicated, in upstream order
    pub ids: Vec<i64>,
    /// Loaded entity bodies among the members
    pub details: Vec<DetailBody>,
    pub metadata: Metadata,
    pub mode: WriteMode,
}

// == Cache Engine ==
/// Physical read/write/merge operations the caches need.
///
/// Both implementations have identical observable semantics. Append must be
/// atomic per set record: concurrent appends to the same key never lose ids.
#[async_trait]
pub trait CacheEngine: Send + Sync {
    /// Short engine name for logs and health output.
    fn name(&self) -> &'static str;

    async fn find_detail(&self, kind: EntityKind, id: i64) -> Result<Option<DetailRecord>>;

    /// Full-replace upsert of every body, stamped with `metadata.update_time`.
    async fn upsert_details(
        &self,
        kind: EntityKind,
        bodies: Vec<DetailBody>,
        metadata: &Metadata,
    ) -> Result<()>;

    async fn find_set_metadata(
        &self,
        cache_type: CacheType,
        key: &SetKey,
    ) -> Result<Option<Metadata>>;

    /// Members in stored order, skipping the first `offset`, each joined
    /// against the detail cache of the set's entity kind.
    async fn set_members(
        &self,
        cache_type: CacheType,
        key: &SetKey,
        offset: usize,
    ) -> Result<Vec<SetMember>>;

    /// Upserts the set record and back-fills details.
    ///
    /// For [`WriteMode::Append`] returns true iff any of `write.ids` was
    /// already a member before this call. Always false for replace.
    async fn write_set(&self, write: SetWrite) -> Result<bool>;

    async fn delete_set(&self, cache_type: CacheType, key: &SetKey) -> Result<u64>;

    async fn find_download(&self, illust_id: i64, page: u32) -> Result<Option<DownloadRecord>>;

    async fn upsert_download(
        &self,
        illust_id: i64,
        page: u32,
        content: Vec<u8>,
        metadata: &Metadata,
    ) -> Result<()>;

    /// Deletes every record of every family.
    async fn delete_all(&self) -> Result<DeletedCounts>;

    /// Deletes records of `family` whose `update_time <= cutoff`.
    async fn delete_older_than(&self, family: RecordFamily, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn health_check(&self) -> Result<()>;

    /// Releases the storage handle. Called once at shutdown.
    async fn close(&self) -> Result<()>;
}

/// Drops repeated ids, keeping the first occurrence.
pub fn dedup_ids(ids: impl IntoIterator<Item = i64>) -> Vec<i64> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

/// Opens the engine selected by configuration.
pub async fn connect(config: &Config, stats: Arc<StatsRecorder>) -> Result<Arc<dyn CacheEngine>> {
    let engine: Arc<dyn CacheEngine> = match config.data_source {
        DataSourceType::Document => Arc::new(DocumentEngine::open(
            &config.document_path,
            config.document_map_size_mb,
            config.max_download_entries,
            stats,
        )?),
        DataSourceType::Relational => {
            Arc::new(RelationalEngine::connect(&config.database_url).await?)
        }
    };
    info!("Storage engine '{}' ready", engine.name());
    Ok(engine)
}
