//! Local Repository
//!
//! The facade the fetch-and-populate layer talks to. It owns no cached state:
//! every read goes to the engine, is checked for freshness, and is decoded
//! into entities; every write is encoded and handed to the engine.

mod tags;

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::cache::{
    CachedSet, ExpirationPolicy, Lazy, Metadata, RecordFamily, SetQuery, StatsRecorder,
};
use crate::config::{CacheTtlConfig, Config};
use crate::error::{CacheError, Result};
use crate::models::{CacheEntity, Illust, Tag, User};
use crate::storage::{self, dedup_ids, CacheEngine, DeletedCounts, DetailBody, SetWrite, WriteMode};

pub use tags::{InMemoryTagIndex, TagIndexer};

// == Local Repository ==
pub struct LocalRepo {
    engine: Arc<dyn CacheEngine>,
    ttl: CacheTtlConfig,
    tag_indexer: Option<Arc<dyn TagIndexer>>,
    stats: Arc<StatsRecorder>,
}

impl LocalRepo {
    pub fn new(engine: Arc<dyn CacheEngine>, ttl: CacheTtlConfig, stats: Arc<StatsRecorder>) -> Self {
        Self {
            engine,
            ttl,
            tag_indexer: None,
            stats,
        }
    }

    /// Feeds illustration tags to `indexer` on every write.
    pub fn with_tag_indexer(mut self, indexer: Arc<dyn TagIndexer>) -> Self {
        self.tag_indexer = Some(indexer);
        self
    }

    /// Opens the configured engine and wires the tag index when enabled.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let stats = Arc::new(StatsRecorder::new());
        let engine = storage::connect(config, stats.clone()).await?;
        let repo = Self::new(engine, config.ttl.clone(), stats);
        if config.tag_translation_enabled {
            Ok(repo.with_tag_indexer(Arc::new(InMemoryTagIndex::new())))
        } else {
            Ok(repo)
        }
    }

    pub fn stats(&self) -> &StatsRecorder {
        &self.stats
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    pub async fn health_check(&self) -> Result<()> {
        self.engine.health_check().await
    }

    pub async fn close(&self) -> Result<()> {
        self.engine.close().await
    }

    // == Helpers ==
    fn require<R>(&self, record: Option<R>, describe: impl FnOnce() -> String) -> Result<R> {
        record.ok_or_else(|| {
            self.stats.record_miss();
            CacheError::NotFound(describe())
        })
    }

    fn check_fresh(&self, family: RecordFamily, metadata: &Metadata) -> Result<()> {
        let checked = self.ttl.policy(family).check(metadata);
        if checked.is_err() {
            self.stats.record_expired();
        }
        checked
    }

    fn index_tags(&self, tags: Vec<Tag>) {
        let Some(indexer) = self.tag_indexer.clone() else {
            return;
        };
        if tags.is_empty() {
            return;
        }
        tokio::spawn(async move {
            if let Err(err) = indexer.update_from_tags(tags).await {
                warn!("Tag indexing failed: {}", err);
            }
        });
    }

    // == Detail Caches ==
    /// Reads one entity body from its detail cache.
    pub async fn detail<T: CacheEntity>(&self, id: i64) -> Result<(Metadata, T)> {
        let family = RecordFamily::detail(T::KIND);
        let record = self.engine.find_detail(T::KIND, id).await?;
        let record = self.require(record, || format!("{} {}", family, id))?;
        self.check_fresh(family, &record.metadata)?;

        let entity: T = serde_json::from_value(record.body)?;
        self.stats.record_hit();
        info!("[local] got {} {}", family, id);
        Ok((record.metadata, entity))
    }

    /// Full-replace upsert of one entity body.
    pub async fn update_detail<T: CacheEntity>(&self, entity: &T, metadata: &Metadata) -> Result<()> {
        let body = DetailBody {
            id: entity.id(),
            body: serde_json::to_value(entity)?,
        };
        self.engine
            .upsert_details(T::KIND, vec![body], metadata)
            .await?;
        self.stats.record_write();
        self.index_tags(entity.tags().to_vec());
        info!("[local] updated {} {}", RecordFamily::detail(T::KIND), entity.id());
        Ok(())
    }

    pub async fn illust_detail(&self, illust_id: i64) -> Result<(Metadata, Illust)> {
        self.detail(illust_id).await
    }

    pub async fn update_illust_detail(&self, illust: &Illust, metadata: &Metadata) -> Result<()> {
        self.update_detail(illust, metadata).await
    }

    pub async fn user_detail(&self, user_id: i64) -> Result<(Metadata, User)> {
        self.detail(user_id).await
    }

    pub async fn update_user_detail(&self, user: &User, metadata: &Metadata) -> Result<()> {
        self.update_detail(user, metadata).await
    }

    // == Set Caches ==
    /// Reads a set record, skipping the first `offset` members.
    ///
    /// Members whose detail row is missing come back as stubs and are counted
    /// as broken.
    pub async fn set<Q: SetQuery>(&self, query: &Q, offset: usize) -> Result<CachedSet<Q::Entity>> {
        let cache_type = query.cache_type();
        let key = query.key();

        let metadata = self.engine.find_set_metadata(cache_type, &key).await?;
        let metadata = self.require(metadata, || format!("{} {}", cache_type, key))?;
        self.check_fresh(RecordFamily::Set(cache_type), &metadata)?;

        let rows = self.engine.set_members(cache_type, &key, offset).await?;
        let members: Vec<Lazy<Q::Entity>> = rows
            .into_iter()
            .map(|row| match row.body {
                Some(body) => serde_json::from_value(body)
                    .map(Lazy::loaded)
                    .unwrap_or_else(|err| {
                        warn!("[local] undecodable detail for {}: {}", row.id, err);
                        Lazy::stub(row.id)
                    }),
                None => Lazy::stub(row.id),
            })
            .collect();

        let set = CachedSet {
            header: metadata.without_pages(),
            members,
            footer: metadata,
        };
        let broken = set.broken();
        self.stats.record_hit();
        self.stats.record_broken(broken as u64);
        info!(
            "[local] got {} members of {} {}, detail of {} are missed",
            set.len(),
            cache_type,
            key,
            broken
        );
        Ok(set)
    }

    /// Writes a set record and back-fills the detail cache with every loaded
    /// member. Returns the append existence signal (always false on replace).
    pub async fn put_set<Q: SetQuery>(
        &self,
        query: &Q,
        content: &[Lazy<Q::Entity>],
        metadata: &Metadata,
        append: bool,
    ) -> Result<bool> {
        let cache_type = query.cache_type();
        let key = query.key();

        let mut details = Vec::new();
        let mut tags = Vec::new();
        for entity in content.iter().filter_map(Lazy::content) {
            details.push(DetailBody {
                id: entity.id(),
                body: serde_json::to_value(entity)?,
            });
            tags.extend_from_slice(entity.tags());
        }

        let ids = dedup_ids(content.iter().map(Lazy::id));
        let count = ids.len();
        let exists = self
            .engine
            .write_set(SetWrite {
                cache_type,
                key: key.clone(),
                ids,
                details,
                metadata: metadata.clone(),
                mode: if append {
                    WriteMode::Append
                } else {
                    WriteMode::Replace
                },
            })
            .await?;
        self.stats.record_write();
        self.index_tags(tags);

        if append {
            info!(
                "[local] appended {} ids to {} {} (exists: {})",
                count, cache_type, key, exists
            );
        } else {
            info!("[local] updated {} {} with {} ids", cache_type, key, count);
        }
        Ok(exists)
    }

    /// Replaces the member list of a set record.
    pub async fn update_set<Q: SetQuery>(
        &self,
        query: &Q,
        content: &[Lazy<Q::Entity>],
        metadata: &Metadata,
    ) -> Result<()> {
        self.put_set(query, content, metadata, false).await.map(|_| ())
    }

    /// Unions `content` into a set record. True when some of it was already cached.
    pub async fn append_set<Q: SetQuery>(
        &self,
        query: &Q,
        content: &[Lazy<Q::Entity>],
        metadata: &Metadata,
    ) -> Result<bool> {
        self.put_set(query, content, metadata, true).await
    }

    pub async fn invalidate_set<Q: SetQuery>(&self, query: &Q) -> Result<()> {
        let deleted = self
            .engine
            .delete_set(query.cache_type(), &query.key())
            .await?;
        info!(
            "[local] invalidated {} {} ({} deleted)",
            query.cache_type(),
            query.key(),
            deleted
        );
        Ok(())
    }

    // == Download Cache ==
    pub async fn image(&self, illust_id: i64, page: u32) -> Result<(Metadata, Vec<u8>)> {
        let record = self.engine.find_download(illust_id, page).await?;
        let record = self.require(record, || format!("download {} p{}", illust_id, page))?;
        self.check_fresh(RecordFamily::Download, &record.metadata)?;

        self.stats.record_hit();
        info!(
            "[local] got download {} p{} ({} bytes)",
            illust_id,
            page,
            record.content.len()
        );
        Ok((record.metadata, record.content))
    }

    pub async fn update_image(
        &self,
        illust_id: i64,
        page: u32,
        content: Vec<u8>,
        metadata: &Metadata,
    ) -> Result<()> {
        let size = content.len();
        self.engine
            .upsert_download(illust_id, page, content, metadata)
            .await?;
        self.stats.record_write();
        info!("[local] updated download {} p{} ({} bytes)", illust_id, page, size);
        Ok(())
    }

    // == Bulk Operations ==
    /// Deletes every record of every family.
    pub async fn invalidate_all(&self) -> Result<DeletedCounts> {
        let deleted = self.engine.delete_all().await?;
        let total: u64 = deleted.values().sum();
        info!("[local] invalidated all caches ({} records)", total);
        Ok(deleted)
    }

    /// Retention sweep: deletes records older than their family's window.
    pub async fn clean_expired(&self) -> Result<DeletedCounts> {
        let now = Utc::now();
        let mut deleted = DeletedCounts::new();

        for family in RecordFamily::all() {
            let cutoff = ExpirationPolicy::new(self.ttl.delete_in(family)).cutoff_at(now);
            let removed = self.engine.delete_older_than(family, cutoff).await?;
            if removed > 0 {
                info!("[local] deleted {} expired {} records", removed, family);
            }
            deleted.insert(family.as_str().to_string(), removed);
        }

        self.stats.record_swept(deleted.values().sum());
        Ok(deleted)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    use chrono::Duration;

    use crate::cache::{IllustSetQuery, LazyIllust, UserSetQuery};
    use crate::storage::DocumentEngine;

    fn repo() -> LocalRepo {
        let stats = Arc::new(StatsRecorder::new());
        let engine = Arc::new(DocumentEngine::temporary(0, stats.clone()).unwrap());
        LocalRepo::new(engine, CacheTtlConfig::default(), stats)
    }

    fn illust(id: i64) -> Illust {
        Illust::new(id, format!("illust {}", id), User::new(1, "artist", "artist"))
    }

    #[tokio::test]
    async fn test_detail_miss_then_hit() {
        let repo = repo();
        assert!(matches!(
            repo.illust_detail(5).await,
            Err(CacheError::NotFound(_))
        ));

        repo.update_illust_detail(&illust(5), &Metadata::now())
            .await
            .unwrap();
        let (_, cached) = repo.illust_detail(5).await.unwrap();
        assert_eq!(cached, illust(5));

        let stats = repo.stats().snapshot();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.writes, 1);
    }

    #[tokio::test]
    async fn test_stale_detail_carries_metadata() {
        let repo = repo();
        let stale = Metadata::new(Utc::now() - Duration::days(8));
        repo.update_user_detail(&User::new(3, "u", "u"), &stale)
            .await
            .unwrap();

        match repo.user_detail(3).await {
            Err(CacheError::Expired(metadata)) => assert_eq!(metadata, stale),
            other => panic!("expected expired, got {:?}", other.map(|(m, _)| m)),
        }
        assert_eq!(repo.stats().snapshot().expired, 1);
    }

    #[tokio::test]
    async fn test_set_header_hides_pages() {
        let repo = repo();
        let query = IllustSetQuery::search("landscape");
        let metadata = Metadata::paged(Utc::now(), 3, None);

        repo.update_set(&query, &[LazyIllust::stub(1)], &metadata)
            .await
            .unwrap();
        let set = repo.set(&query, 0).await.unwrap();

        assert_eq!(set.header.pages, 0);
        assert_eq!(set.footer.pages, 3);
        assert_eq!(set.broken(), 1);
        assert_eq!(repo.stats().snapshot().broken, 1);
    }

    #[tokio::test]
    async fn test_duplicate_ids_in_one_batch() {
        let repo = repo();
        let query = IllustSetQuery::user_illusts(1);
        let content = vec![LazyIllust::stub(4), LazyIllust::stub(4), LazyIllust::stub(2)];

        let exists = repo
            .append_set(&query, &content, &Metadata::now())
            .await
            .unwrap();
        assert!(!exists);
        assert_eq!(repo.set(&query, 0).await.unwrap().ids(), vec![4, 2]);
    }

    #[tokio::test]
    async fn test_user_set_resolves_users() {
        let repo = repo();
        let query = UserSetQuery::search("artist");
        let content = vec![Lazy::loaded(User::new(8, "eight", "acc8")), Lazy::stub(9)];

        repo.update_set(&query, &content, &Metadata::now())
            .await
            .unwrap();
        let set = repo.set(&query, 0).await.unwrap();
        assert_eq!(set.members[0].content().unwrap().name, "eight");
        assert!(!set.members[1].is_loaded());
        assert!(repo.user_detail(8).await.is_ok());
    }

    #[tokio::test]
    async fn test_tags_indexed_on_write() {
        let index = Arc::new(InMemoryTagIndex::new());
        let repo = repo().with_tag_indexer(index.clone());
        let tagged = illust(1).with_tags(vec![Tag::new("空", Some("sky".to_string()))]);

        repo.update_illust_detail(&tagged, &Metadata::now())
            .await
            .unwrap();

        for _ in 0..50 {
            if !index.is_empty().await {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        assert_eq!(index.translate("空").await.as_deref(), Some("sky"));
    }

    #[tokio::test]
    async fn test_clean_expired_uses_retention_window() {
        let repo = repo();
        let ten_days_ago = Metadata::new(Utc::now() - Duration::days(10));
        let search = IllustSetQuery::search("old");
        let ranking = IllustSetQuery::ranking(crate::cache::RankingMode::Week);

        repo.update_set(&search, &[LazyIllust::stub(1)], &ten_days_ago)
            .await
            .unwrap();
        repo.update_set(&ranking, &[LazyIllust::stub(1)], &ten_days_ago)
            .await
            .unwrap();

        let deleted = repo.clean_expired().await.unwrap();
        // Search keeps rows for 30 days; ranking only for its 6 hour TTL
        assert_eq!(deleted["search_illust"], 0);
        assert_eq!(deleted["illust_ranking"], 1);
        assert!(matches!(
            repo.set(&search, 0).await,
            Err(CacheError::Expired(_))
        ));
        assert!(matches!(
            repo.set(&ranking, 0).await,
            Err(CacheError::NotFound(_))
        ));
        assert_eq!(repo.stats().snapshot().swept, 1);
    }
}
