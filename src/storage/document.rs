//! Document Engine
//!
//! Embedded LMDB store through heed. Each collection is a named database in a
//! single environment and every write is a committed transaction, so a write
//! that returned `Ok` survives a crash. An append reads the stored set
//! document, unions the new ids and writes it back inside one write
//! transaction; LMDB runs one writer at a time, so the existence check and the
//! union always see the same pre-image.
//!
//! # Layout
//!
//! - details: key `id` (big-endian), value `[update_time ms LE][json body]`
//! - downloads: key `illust_id ++ page` (big-endian), value `[update_time ms LE][bytes]`
//! - sets: key `cache_type \0 set_key`, value JSON [`SetDocument`]
//!
//! Reads use read transactions and never wait on writers.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RwTxn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::cache::{
    datetime_from_ms, CacheType, LruTracker, Metadata, RecordFamily, SetKey, StatsRecorder,
};
use crate::error::{CacheError, Result};
use crate::models::EntityKind;
use crate::storage::{
    CacheEngine, DeletedCounts, DetailBody, DetailRecord, DownloadRecord, SetMember, SetWrite,
    WriteMode,
};

type DownloadKey = (i64, u32);

/// Named databases in the environment
const DATABASES: u32 = 4;

/// Map size for throwaway stores
const SCRATCH_MAP_SIZE_MB: usize = 64;

/// Stored form of a set record.
#[derive(Debug, Serialize, Deserialize)]
struct SetDocument {
    cache_type: CacheType,
    key: SetKey,
    ids: Vec<i64>,
    metadata: Metadata,
}

// == Document Engine ==
pub struct DocumentEngine {
    env: Env,
    illust_detail: Database<Bytes, Bytes>,
    user_detail: Database<Bytes, Bytes>,
    downloads: Database<Bytes, Bytes>,
    sets: Database<Bytes, Bytes>,
    /// Recency of stored downloads. Rebuilt from update times on open.
    download_lru: Mutex<LruTracker<DownloadKey>>,
    /// 0 for unbounded
    max_download_entries: usize,
    stats: Arc<StatsRecorder>,
    path: PathBuf,
    // Declared after `env` so the directory outlives it
    _scratch: Option<TempDir>,
}

impl DocumentEngine {
    /// Opens (or creates) the store in directory `path`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the directory cannot be created or the
    /// environment is already open in this process.
    pub fn open<P: AsRef<Path>>(
        path: P,
        map_size_mb: usize,
        max_download_entries: usize,
        stats: Arc<StatsRecorder>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;

        // Safety: the environment is opened once per process and the files
        // are not modified by anything outside LMDB.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb * 1024 * 1024)
                .max_dbs(DATABASES)
                .open(&path)
        }?;

        let mut wtxn = env.write_txn()?;
        let illust_detail: Database<Bytes, Bytes> =
            env.create_database(&mut wtxn, Some("illust_detail"))?;
        let user_detail: Database<Bytes, Bytes> =
            env.create_database(&mut wtxn, Some("user_detail"))?;
        let downloads: Database<Bytes, Bytes> =
            env.create_database(&mut wtxn, Some("download"))?;
        let sets: Database<Bytes, Bytes> = env.create_database(&mut wtxn, Some("set"))?;
        wtxn.commit()?;

        let engine = Self {
            env,
            illust_detail,
            user_detail,
            downloads,
            sets,
            download_lru: Mutex::new(LruTracker::new()),
            max_download_entries,
            stats,
            path,
            _scratch: None,
        };
        let restored = engine.restore_download_order()?;
        info!(
            "Opened document store at {} ({} downloads)",
            engine.path.display(),
            restored
        );
        Ok(engine)
    }

    /// Opens a store in a fresh temporary directory, removed on drop.
    pub fn temporary(max_download_entries: usize, stats: Arc<StatsRecorder>) -> Result<Self> {
        let scratch = TempDir::new()?;
        let mut engine = Self::open(
            scratch.path(),
            SCRATCH_MAP_SIZE_MB,
            max_download_entries,
            stats,
        )?;
        engine._scratch = Some(scratch);
        Ok(engine)
    }

    fn details(&self, kind: EntityKind) -> Database<Bytes, Bytes> {
        match kind {
            EntityKind::Illust => self.illust_detail,
            EntityKind::User => self.user_detail,
        }
    }

    fn lru(&self) -> MutexGuard<'_, LruTracker<DownloadKey>> {
        self.download_lru
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds the LRU with stored downloads, oldest write first, then trims
    /// to the configured bound.
    fn restore_download_order(&self) -> Result<usize> {
        let mut stamped: Vec<(i64, DownloadKey)> = Vec::new();
        {
            let rtxn = self.env.read_txn()?;
            for entry in self.downloads.iter(&rtxn)? {
                let (key, value) = entry?;
                let (update_time_ms, _) = split_stamp(value)?;
                stamped.push((update_time_ms, decode_download_key(key)?));
            }
        }
        stamped.sort_unstable();

        // Same order as the write paths: txn first, then the tracker.
        let mut wtxn = self.env.write_txn()?;
        let mut lru = self.lru();
        for (_, key) in &stamped {
            lru.touch(key);
        }
        let evicted = self.evict_over_capacity(&mut wtxn, &mut lru)?;
        wtxn.commit()?;
        self.record_evictions(evicted);

        Ok(lru.len())
    }

    fn evict_over_capacity(
        &self,
        wtxn: &mut RwTxn<'_>,
        lru: &mut LruTracker<DownloadKey>,
    ) -> Result<u64> {
        let mut evicted = 0;
        while self.max_download_entries > 0 && lru.len() > self.max_download_entries {
            let Some(oldest) = lru.evict_oldest() else {
                break;
            };
            self.downloads.delete(wtxn, &download_key(oldest)[..])?;
            evicted += 1;
        }
        Ok(evicted)
    }

    fn record_evictions(&self, evicted: u64) {
        if evicted > 0 {
            debug!("Evicted {} downloads over capacity", evicted);
            self.stats.record_evictions(evicted);
        }
    }

    fn put_details(
        &self,
        wtxn: &mut RwTxn<'_>,
        kind: EntityKind,
        bodies: &[DetailBody],
        update_time_ms: i64,
    ) -> Result<()> {
        let db = self.details(kind);
        for DetailBody { id, body } in bodies {
            let value = stamp(update_time_ms, &serde_json::to_vec(body)?);
            db.put(wtxn, &detail_key(*id)[..], &value[..])?;
        }
        Ok(())
    }

    fn find_set(&self, cache_type: CacheType, key: &SetKey) -> Result<Option<SetDocument>> {
        let rtxn = self.env.read_txn()?;
        let raw = self.sets.get(&rtxn, &set_address(cache_type, key)[..])?;
        Ok(raw.map(serde_json::from_slice::<SetDocument>).transpose()?)
    }

    /// Deletes every stamped record with `update_time <= cutoff_ms` and
    /// returns the deleted keys.
    fn delete_stamped(
        &self,
        wtxn: &mut RwTxn<'_>,
        db: Database<Bytes, Bytes>,
        cutoff_ms: i64,
    ) -> Result<Vec<Vec<u8>>> {
        let mut stale = Vec::new();
        for entry in db.iter(&*wtxn)? {
            let (key, value) = entry?;
            if split_stamp(value)?.0 <= cutoff_ms {
                stale.push(key.to_vec());
            }
        }
        for key in &stale {
            db.delete(wtxn, &key[..])?;
        }
        Ok(stale)
    }
}

#[async_trait]
impl CacheEngine for DocumentEngine {
    fn name(&self) -> &'static str {
        "document"
    }

    async fn find_detail(&self, kind: EntityKind, id: i64) -> Result<Option<DetailRecord>> {
        let rtxn = self.env.read_txn()?;
        let Some(bytes) = self.details(kind).get(&rtxn, &detail_key(id)[..])? else {
            return Ok(None);
        };
        let (update_time_ms, body) = split_stamp(bytes)?;
        Ok(Some(DetailRecord {
            body: serde_json::from_slice(body)?,
            metadata: Metadata::new(datetime_from_ms(update_time_ms)),
        }))
    }

    async fn upsert_details(
        &self,
        kind: EntityKind,
        bodies: Vec<DetailBody>,
        metadata: &Metadata,
    ) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.put_details(&mut wtxn, kind, &bodies, metadata.update_time_ms())?;
        wtxn.commit()?;
        Ok(())
    }

    async fn find_set_metadata(
        &self,
        cache_type: CacheType,
        key: &SetKey,
    ) -> Result<Option<Metadata>> {
        Ok(self
            .find_set(cache_type, key)?
            .map(|document| document.metadata))
    }

    async fn set_members(
        &self,
        cache_type: CacheType,
        key: &SetKey,
        offset: usize,
    ) -> Result<Vec<SetMember>> {
        let rtxn = self.env.read_txn()?;
        let Some(raw) = self.sets.get(&rtxn, &set_address(cache_type, key)[..])? else {
            return Ok(Vec::new());
        };
        let document: SetDocument = serde_json::from_slice(raw)?;
        let details = self.details(cache_type.entity_kind());

        document
            .ids
            .into_iter()
            .skip(offset)
            .map(|id| -> Result<SetMember> {
                let body = match details.get(&rtxn, &detail_key(id)[..])? {
                    Some(bytes) => Some(serde_json::from_slice::<Value>(split_stamp(bytes)?.1)?),
                    None => None,
                };
                Ok(SetMember { id, body })
            })
            .collect()
    }

    async fn write_set(&self, write: SetWrite) -> Result<bool> {
        let SetWrite {
            cache_type,
            key,
            ids,
            details,
            metadata,
            mode,
        } = write;
        let address = set_address(cache_type, &key);
        let metadata = metadata.truncated();

        // One write txn: the pre-image read, the union and the detail
        // back-fill commit together.
        let mut wtxn = self.env.write_txn()?;
        let stored = self
            .sets
            .get(&wtxn, &address[..])?
            .map(serde_json::from_slice::<SetDocument>)
            .transpose()?;

        let (members, exists) = match (stored, mode) {
            (Some(document), WriteMode::Append) => {
                let present: HashSet<i64> = document.ids.iter().copied().collect();
                let exists = ids.iter().any(|id| present.contains(id));
                let mut members = document.ids;
                members.extend(ids.into_iter().filter(|id| !present.contains(id)));
                (members, exists)
            }
            _ => (ids, false),
        };
        debug!("{} {}: {} members", cache_type, key, members.len());

        let document = SetDocument {
            cache_type,
            key,
            ids: members,
            metadata,
        };
        self.sets
            .put(&mut wtxn, &address[..], &serde_json::to_vec(&document)?[..])?;
        self.put_details(
            &mut wtxn,
            cache_type.entity_kind(),
            &details,
            document.metadata.update_time_ms(),
        )?;
        wtxn.commit()?;

        Ok(exists)
    }

    async fn delete_set(&self, cache_type: CacheType, key: &SetKey) -> Result<u64> {
        let mut wtxn = self.env.write_txn()?;
        let deleted = self
            .sets
            .delete(&mut wtxn, &set_address(cache_type, key)[..])?;
        wtxn.commit()?;
        Ok(u64::from(deleted))
    }

    async fn find_download(&self, illust_id: i64, page: u32) -> Result<Option<DownloadRecord>> {
        let key = (illust_id, page);
        let record = {
            let rtxn = self.env.read_txn()?;
            match self.downloads.get(&rtxn, &download_key(key)[..])? {
                Some(bytes) => {
                    let (update_time_ms, content) = split_stamp(bytes)?;
                    Some(DownloadRecord {
                        content: content.to_vec(),
                        metadata: Metadata::new(datetime_from_ms(update_time_ms)),
                    })
                }
                None => None,
            }
        };

        // Only the recency touch is serialised; the lookup above is not.
        if record.is_some() {
            self.lru().touch(&key);
        }
        Ok(record)
    }

    async fn upsert_download(
        &self,
        illust_id: i64,
        page: u32,
        content: Vec<u8>,
        metadata: &Metadata,
    ) -> Result<()> {
        let key = (illust_id, page);
        let value = stamp(metadata.update_time_ms(), &content);

        let mut wtxn = self.env.write_txn()?;
        self.downloads
            .put(&mut wtxn, &download_key(key)[..], &value[..])?;

        let mut lru = self.lru();
        lru.touch(&key);
        let evicted = self.evict_over_capacity(&mut wtxn, &mut lru)?;
        wtxn.commit()?;
        drop(lru);

        self.record_evictions(evicted);
        Ok(())
    }

    async fn delete_all(&self) -> Result<DeletedCounts> {
        let mut deleted: DeletedCounts = RecordFamily::all()
            .into_iter()
            .map(|family| (family.as_str().to_string(), 0))
            .collect();

        let mut wtxn = self.env.write_txn()?;
        for entry in self.sets.iter(&wtxn)? {
            let (address, _) = entry?;
            let cache_type = cache_type_of(address)?;
            *deleted.entry(cache_type.to_string()).or_default() += 1;
        }
        for kind in [EntityKind::Illust, EntityKind::User] {
            deleted.insert(
                RecordFamily::detail(kind).as_str().to_string(),
                self.details(kind).len(&wtxn)?,
            );
        }
        deleted.insert(
            RecordFamily::Download.as_str().to_string(),
            self.downloads.len(&wtxn)?,
        );

        for db in [self.sets, self.illust_detail, self.user_detail, self.downloads] {
            db.clear(&mut wtxn)?;
        }
        let mut lru = self.lru();
        wtxn.commit()?;
        lru.clear();

        Ok(deleted)
    }

    async fn delete_older_than(&self, family: RecordFamily, cutoff: DateTime<Utc>) -> Result<u64> {
        let cutoff_ms = cutoff.timestamp_millis();
        let mut wtxn = self.env.write_txn()?;

        let removed = match family {
            RecordFamily::IllustDetail => {
                self.delete_stamped(&mut wtxn, self.illust_detail, cutoff_ms)?
                    .len()
            }
            RecordFamily::UserDetail => {
                self.delete_stamped(&mut wtxn, self.user_detail, cutoff_ms)?
                    .len()
            }
            RecordFamily::Download => {
                let stale = self.delete_stamped(&mut wtxn, self.downloads, cutoff_ms)?;
                let mut lru = self.lru();
                for key in &stale {
                    lru.remove(&decode_download_key(key)?);
                }
                stale.len()
            }
            RecordFamily::Set(target) => {
                let prefix = set_prefix(target);
                let mut stale = Vec::new();
                for entry in self.sets.iter(&wtxn)? {
                    let (address, raw) = entry?;
                    if !address.starts_with(&prefix) {
                        continue;
                    }
                    let document: SetDocument = serde_json::from_slice(raw)?;
                    if document.metadata.update_time <= cutoff {
                        stale.push(address.to_vec());
                    }
                }
                for address in &stale {
                    self.sets.delete(&mut wtxn, &address[..])?;
                }
                stale.len()
            }
        };

        wtxn.commit()?;
        Ok(removed as u64)
    }

    async fn health_check(&self) -> Result<()> {
        let _rtxn = self.env.read_txn()?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.env.force_sync()?;
        info!("Flushed document store at {}", self.path.display());
        Ok(())
    }
}

// == Encoding ==
fn detail_key(id: i64) -> [u8; 8] {
    id.to_be_bytes()
}

fn download_key((illust_id, page): DownloadKey) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&illust_id.to_be_bytes());
    key[8..].copy_from_slice(&page.to_be_bytes());
    key
}

fn decode_download_key(bytes: &[u8]) -> Result<DownloadKey> {
    let key: [u8; 12] = bytes
        .try_into()
        .map_err(|_| CacheError::Serialization("malformed download key".to_string()))?;
    let mut illust_id = [0u8; 8];
    let mut page = [0u8; 4];
    illust_id.copy_from_slice(&key[..8]);
    page.copy_from_slice(&key[8..]);
    Ok((i64::from_be_bytes(illust_id), u32::from_be_bytes(page)))
}

/// Prefix shared by every set of `cache_type`; the NUL keeps one type name
/// from matching another that starts with it.
fn set_prefix(cache_type: CacheType) -> Vec<u8> {
    let mut prefix = cache_type.as_str().as_bytes().to_vec();
    prefix.push(0);
    prefix
}

fn set_address(cache_type: CacheType, key: &SetKey) -> Vec<u8> {
    let mut address = set_prefix(cache_type);
    address.extend_from_slice(key.as_str().as_bytes());
    address
}

fn cache_type_of(address: &[u8]) -> Result<&str> {
    let end = address
        .iter()
        .position(|byte| *byte == 0)
        .unwrap_or(address.len());
    std::str::from_utf8(&address[..end])
        .map_err(|e| CacheError::Serialization(format!("malformed set address: {}", e)))
}

/// Prepends the update time to a payload.
fn stamp(update_time_ms: i64, payload: &[u8]) -> Vec<u8> {
    let mut value = Vec::with_capacity(8 + payload.len());
    value.extend_from_slice(&update_time_ms.to_le_bytes());
    value.extend_from_slice(payload);
    value
}

fn split_stamp(value: &[u8]) -> Result<(i64, &[u8])> {
    if value.len() < 8 {
        return Err(CacheError::Serialization(
            "stored record shorter than its timestamp".to_string(),
        ));
    }
    let (head, payload) = value.split_at(8);
    let mut update_time = [0u8; 8];
    update_time.copy_from_slice(head);
    Ok((i64::from_le_bytes(update_time), payload))
}
