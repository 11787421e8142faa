//! Configuration Module
//!
//! Handles loading the cache configuration from environment variables.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::cache::{CacheType, ExpirationPolicy, RecordFamily};
use crate::error::CacheError;

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

/// Which backing engine to open at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSourceType {
    Document,
    Relational,
}

impl DataSourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSourceType::Document => "document",
            DataSourceType::Relational => "relational",
        }
    }
}

impl FromStr for DataSourceType {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "document" | "mongo" => Ok(DataSourceType::Document),
            "relational" | "sql" | "sqlite" => Ok(DataSourceType::Relational),
            other => Err(CacheError::InvalidRequest(format!(
                "unknown data source: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for DataSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// == TTL Configuration ==
/// Freshness TTLs and retention windows, in seconds.
///
/// A family without its own retention window is swept once its TTL passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTtlConfig {
    pub illust_detail_expires_in: u64,
    pub user_detail_expires_in: u64,
    pub download_expires_in: u64,
    pub illust_ranking_expires_in: u64,
    pub search_illust_expires_in: u64,
    pub search_illust_delete_in: u64,
    pub search_user_expires_in: u64,
    pub search_user_delete_in: u64,
    pub user_illusts_expires_in: u64,
    pub user_illusts_delete_in: u64,
    pub user_bookmarks_expires_in: u64,
    pub user_bookmarks_delete_in: u64,
    pub related_illusts_expires_in: u64,
    pub other_expires_in: u64,
}

impl CacheTtlConfig {
    /// Loads every TTL from `<FAMILY>_CACHE_EXPIRES_IN` / `_DELETE_IN`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            illust_detail_expires_in: env_or(
                "ILLUST_DETAIL_CACHE_EXPIRES_IN",
                defaults.illust_detail_expires_in,
            ),
            user_detail_expires_in: env_or(
                "USER_DETAIL_CACHE_EXPIRES_IN",
                defaults.user_detail_expires_in,
            ),
            download_expires_in: env_or("DOWNLOAD_CACHE_EXPIRES_IN", defaults.download_expires_in),
            illust_ranking_expires_in: env_or(
                "ILLUST_RANKING_CACHE_EXPIRES_IN",
                defaults.illust_ranking_expires_in,
            ),
            search_illust_expires_in: env_or(
                "SEARCH_ILLUST_CACHE_EXPIRES_IN",
                defaults.search_illust_expires_in,
            ),
            search_illust_delete_in: env_or(
                "SEARCH_ILLUST_CACHE_DELETE_IN",
                defaults.search_illust_delete_in,
            ),
            search_user_expires_in: env_or(
                "SEARCH_USER_CACHE_EXPIRES_IN",
                defaults.search_user_expires_in,
            ),
            search_user_delete_in: env_or(
                "SEARCH_USER_CACHE_DELETE_IN",
                defaults.search_user_delete_in,
            ),
            user_illusts_expires_in: env_or(
                "USER_ILLUSTS_CACHE_EXPIRES_IN",
                defaults.user_illusts_expires_in,
            ),
            user_illusts_delete_in: env_or(
                "USER_ILLUSTS_CACHE_DELETE_IN",
                defaults.user_illusts_delete_in,
            ),
            user_bookmarks_expires_in: env_or(
                "USER_BOOKMARKS_CACHE_EXPIRES_IN",
                defaults.user_bookmarks_expires_in,
            ),
            user_bookmarks_delete_in: env_or(
                "USER_BOOKMARKS_CACHE_DELETE_IN",
                defaults.user_bookmarks_delete_in,
            ),
            related_illusts_expires_in: env_or(
                "RELATED_ILLUSTS_CACHE_EXPIRES_IN",
                defaults.related_illusts_expires_in,
            ),
            other_expires_in: env_or("OTHER_CACHE_EXPIRES_IN", defaults.other_expires_in),
        }
    }

    /// Freshness TTL for reads of `family`.
    pub fn expires_in(&self, family: RecordFamily) -> u64 {
        match family {
            RecordFamily::IllustDetail => self.illust_detail_expires_in,
            RecordFamily::UserDetail => self.user_detail_expires_in,
            RecordFamily::Download => self.download_expires_in,
            RecordFamily::Set(cache_type) => match cache_type {
                CacheType::SearchIllust => self.search_illust_expires_in,
                CacheType::SearchUser => self.search_user_expires_in,
                CacheType::UserIllusts => self.user_illusts_expires_in,
                CacheType::UserBookmarks => self.user_bookmarks_expires_in,
                CacheType::RelatedIllusts => self.related_illusts_expires_in,
                CacheType::IllustRanking => self.illust_ranking_expires_in,
                CacheType::Other => self.other_expires_in,
            },
        }
    }

    /// Retention window used by the sweep.
    pub fn delete_in(&self, family: RecordFamily) -> u64 {
        match family {
            RecordFamily::Set(CacheType::SearchIllust) => self.search_illust_delete_in,
            RecordFamily::Set(CacheType::SearchUser) => self.search_user_delete_in,
            RecordFamily::Set(CacheType::UserIllusts) => self.user_illusts_delete_in,
            RecordFamily::Set(CacheType::UserBookmarks) => self.user_bookmarks_delete_in,
            other => self.expires_in(other),
        }
    }

    pub fn policy(&self, family: RecordFamily) -> ExpirationPolicy {
        ExpirationPolicy::new(self.expires_in(family))
    }
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            illust_detail_expires_in: 7 * DAY,
            user_detail_expires_in: 7 * DAY,
            download_expires_in: 7 * DAY,
            illust_ranking_expires_in: 6 * HOUR,
            search_illust_expires_in: DAY,
            search_illust_delete_in: 30 * DAY,
            search_user_expires_in: DAY,
            search_user_delete_in: 30 * DAY,
            user_illusts_expires_in: DAY,
            user_illusts_delete_in: 30 * DAY,
            user_bookmarks_expires_in: DAY,
            user_bookmarks_delete_in: 30 * DAY,
            related_illusts_expires_in: DAY,
            other_expires_in: 6 * HOUR,
        }
    }
}

// == Configuration ==
/// Cache service configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backing engine
    pub data_source: DataSourceType,
    /// Relational engine connection string
    pub database_url: String,
    /// Document engine directory
    pub document_path: PathBuf,
    /// Document engine map size in megabytes
    pub document_map_size_mb: usize,
    /// Document engine download bound, 0 for unbounded
    pub max_download_entries: usize,
    /// Admin HTTP port
    pub server_port: u16,
    /// Retention sweep interval in seconds
    pub sweep_interval: u64,
    /// Feed illustration tags to the tag index on write
    pub tag_translation_enabled: bool,
    pub ttl: CacheTtlConfig,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `DATA_SOURCE` - `document` or `relational` (default: document)
    /// - `DATABASE_URL` - SQLite URL (default: sqlite://pixivbot_cache.db)
    /// - `DOCUMENT_PATH` - Document store directory (default: pixivbot_cache.lmdb)
    /// - `DOCUMENT_MAP_SIZE_MB` - Document store map size (default: 1024)
    /// - `MAX_DOWNLOAD_ENTRIES` - Downloads kept by the document engine (default: 1000)
    /// - `SERVER_PORT` - Admin HTTP port (default: 3000)
    /// - `SWEEP_INTERVAL` - Retention sweep frequency in seconds (default: 7200)
    /// - `TAG_TRANSLATION_ENABLED` - Enable tag indexing (default: false)
    /// - `*_CACHE_EXPIRES_IN` / `*_CACHE_DELETE_IN` - see [`CacheTtlConfig`]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_source: env_or("DATA_SOURCE", defaults.data_source),
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            document_path: env::var("DOCUMENT_PATH")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.document_path),
            document_map_size_mb: env_or("DOCUMENT_MAP_SIZE_MB", defaults.document_map_size_mb),
            max_download_entries: env_or("MAX_DOWNLOAD_ENTRIES", defaults.max_download_entries),
            server_port: env_or("SERVER_PORT", defaults.server_port),
            sweep_interval: env_or("SWEEP_INTERVAL", defaults.sweep_interval),
            tag_translation_enabled: env_or(
                "TAG_TRANSLATION_ENABLED",
                defaults.tag_translation_enabled,
            ),
            ttl: CacheTtlConfig::from_env(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_source: DataSourceType::Document,
            database_url: "sqlite://pixivbot_cache.db".to_string(),
            document_path: PathBuf::from("pixivbot_cache.lmdb"),
            document_map_size_mb: 1024,
            max_download_entries: 1000,
            server_port: 3000,
            sweep_interval: 2 * HOUR,
            tag_translation_enabled: false,
            ttl: CacheTtlConfig::default(),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
