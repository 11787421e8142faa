//! Relational Engine
//!
//! SQLite through sqlx. Set records are a parent row plus one member row per
//! id; an append is a single transaction that upserts the parent, inserts
//! members with `ON CONFLICT DO NOTHING` and counts what actually landed.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::{Pool, Sqlite};
use tracing::{debug, info};

use crate::cache::{datetime_from_ms, CacheType, Metadata, NextQs, RecordFamily, SetKey};
use crate::error::Result;
use crate::models::EntityKind;
use crate::storage::{
    CacheEngine, DeletedCounts, DetailBody, DetailRecord, DownloadRecord, SetMember, SetWrite,
    WriteMode,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS illust_detail_cache (
        illust_id   INTEGER PRIMARY KEY,
        body        TEXT    NOT NULL,
        update_time INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_illust_detail_cache_update_time
        ON illust_detail_cache (update_time)",
    "CREATE TABLE IF NOT EXISTS user_detail_cache (
        user_id     INTEGER PRIMARY KEY,
        body        TEXT    NOT NULL,
        update_time INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_user_detail_cache_update_time
        ON user_detail_cache (update_time)",
    "CREATE TABLE IF NOT EXISTS download_cache (
        illust_id   INTEGER NOT NULL,
        page        INTEGER NOT NULL,
        content     BLOB    NOT NULL,
        update_time INTEGER NOT NULL,
        PRIMARY KEY (illust_id, page)
    )",
    "CREATE INDEX IF NOT EXISTS idx_download_cache_update_time
        ON download_cache (update_time)",
    "CREATE TABLE IF NOT EXISTS illust_set_cache (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        cache_type  TEXT    NOT NULL,
        cache_key   TEXT    NOT NULL,
        update_time INTEGER NOT NULL,
        pages       INTEGER NOT NULL DEFAULT 0,
        next_qs     TEXT,
        size        INTEGER NOT NULL DEFAULT 0,
        UNIQUE (cache_type, cache_key)
    )",
    "CREATE INDEX IF NOT EXISTS idx_illust_set_cache_update_time
        ON illust_set_cache (cache_type, update_time)",
    "CREATE TABLE IF NOT EXISTS illust_set_cache_illust (
        cache_id  INTEGER NOT NULL REFERENCES illust_set_cache (id) ON DELETE CASCADE,
        illust_id INTEGER NOT NULL,
        rank      INTEGER NOT NULL DEFAULT 0,
        UNIQUE (cache_id, illust_id)
    )",
    "CREATE TABLE IF NOT EXISTS user_set_cache (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        cache_type  TEXT    NOT NULL,
        cache_key   TEXT    NOT NULL,
        update_time INTEGER NOT NULL,
        pages       INTEGER NOT NULL DEFAULT 0,
        next_qs     TEXT,
        size        INTEGER NOT NULL DEFAULT 0,
        UNIQUE (cache_type, cache_key)
    )",
    "CREATE INDEX IF NOT EXISTS idx_user_set_cache_update_time
        ON user_set_cache (cache_type, update_time)",
    "CREATE TABLE IF NOT EXISTS user_set_cache_user (
        cache_id INTEGER NOT NULL REFERENCES user_set_cache (id) ON DELETE CASCADE,
        user_id  INTEGER NOT NULL,
        rank     INTEGER NOT NULL DEFAULT 0,
        UNIQUE (cache_id, user_id)
    )",
];

/// Table and column names for one entity kind.
struct Tables {
    detail: &'static str,
    set: &'static str,
    member: &'static str,
    /// Entity id column, shared by the detail and member tables
    id_column: &'static str,
}

impl Tables {
    fn of(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Illust => Tables {
                detail: "illust_detail_cache",
                set: "illust_set_cache",
                member: "illust_set_cache_illust",
                id_column: "illust_id",
            },
            EntityKind::User => Tables {
                detail: "user_detail_cache",
                set: "user_set_cache",
                member: "user_set_cache_user",
                id_column: "user_id",
            },
        }
    }
}

// == Relational Engine ==
pub struct RelationalEngine {
    pool: Pool<Sqlite>,
}

impl RelationalEngine {
    /// Connects to `database_url` and creates the schema if needed.
    ///
    /// `sqlite::memory:` gives a private database that lives as long as the
    /// pool's single connection.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let mut pool_options = SqlitePoolOptions::new().max_connections(1);
        if in_memory {
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;

        let engine = Self { pool };
        engine.migrate().await?;
        info!("Connected to relational cache at {}", database_url);
        Ok(engine)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

async fn upsert_details_on(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    bodies: &[DetailBody],
    update_time_ms: i64,
) -> Result<()> {
    let tables = Tables::of(kind);
    let sql = format!(
        "INSERT INTO {detail} ({id}, body, update_time) VALUES (?, ?, ?)
         ON CONFLICT ({id}) DO UPDATE SET body = excluded.body, update_time = excluded.update_time",
        detail = tables.detail,
        id = tables.id_column,
    );
    for DetailBody { id, body } in bodies {
        sqlx::query(&sql)
            .bind(*id)
            .bind(serde_json::to_string(body)?)
            .bind(update_time_ms)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

#[async_trait]
impl CacheEngine for RelationalEngine {
    fn name(&self) -> &'static str {
        "relational"
    }

    async fn find_detail(&self, kind: EntityKind, id: i64) -> Result<Option<DetailRecord>> {
        let tables = Tables::of(kind);
        let sql = format!(
            "SELECT body, update_time FROM {} WHERE {} = ?",
            tables.detail, tables.id_column
        );
        let row: Option<(String, i64)> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(body, update_time)| -> Result<DetailRecord> {
            Ok(DetailRecord {
                body: serde_json::from_str(&body)?,
                metadata: Metadata::new(datetime_from_ms(update_time)),
            })
        })
        .transpose()
    }

    async fn upsert_details(
        &self,
        kind: EntityKind,
        bodies: Vec<DetailBody>,
        metadata: &Metadata,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert_details_on(&mut *tx, kind, &bodies, metadata.update_time_ms()).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_set_metadata(
        &self,
        cache_type: CacheType,
        key: &SetKey,
    ) -> Result<Option<Metadata>> {
        let tables = Tables::of(cache_type.entity_kind());
        let sql = format!(
            "SELECT update_time, pages, next_qs FROM {} WHERE cache_type = ? AND cache_key = ?",
            tables.set
        );
        let row: Option<(i64, i64, Option<String>)> = sqlx::query_as(&sql)
            .bind(cache_type.as_str())
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(update_time, pages, next_qs)| -> Result<Metadata> {
            let next_qs = next_qs
                .map(|raw| serde_json::from_str::<NextQs>(&raw))
                .transpose()?;
            Ok(Metadata::paged(
                datetime_from_ms(update_time),
                u32::try_from(pages).unwrap_or_default(),
                next_qs,
            ))
        })
        .transpose()
    }

    async fn set_members(
        &self,
        cache_type: CacheType,
        key: &SetKey,
        offset: usize,
    ) -> Result<Vec<SetMember>> {
        let tables = Tables::of(cache_type.entity_kind());
        let sql = format!(
            "SELECT m.{id}, d.body
             FROM {set} s
             JOIN {member} m ON m.cache_id = s.id
             LEFT OUTER JOIN {detail} d ON d.{id} = m.{id}
             WHERE s.cache_type = ? AND s.cache_key = ?
             ORDER BY m.rank, m.rowid
             LIMIT -1 OFFSET ?",
            id = tables.id_column,
            set = tables.set,
            member = tables.member,
            detail = tables.detail,
        );
        let rows: Vec<(i64, Option<String>)> = sqlx::query_as(&sql)
            .bind(cache_type.as_str())
            .bind(key.as_str())
            // Offsets past i64::MAX read nothing either way
            .bind(i64::try_from(offset).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|(id, body)| -> Result<SetMember> {
                let body = body
                    .map(|raw| serde_json::from_str::<Value>(&raw))
                    .transpose()?;
                Ok(SetMember { id, body })
            })
            .collect()
    }

    async fn write_set(&self, write: SetWrite) -> Result<bool> {
        let kind = write.cache_type.entity_kind();
        let tables = Tables::of(kind);
        let update_time = write.metadata.update_time_ms();
        let next_qs = write
            .metadata
            .next_qs
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        // Rolls back on drop if any step below fails.
        let mut tx = self.pool.begin().await?;

        let upsert_parent = format!(
            "INSERT INTO {} (cache_type, cache_key, update_time, pages, next_qs, size)
             VALUES (?, ?, ?, ?, ?, 0)
             ON CONFLICT (cache_type, cache_key) DO UPDATE SET
                update_time = excluded.update_time,
                pages = excluded.pages,
                next_qs = excluded.next_qs
             RETURNING id, size",
            tables.set
        );
        let (cache_id, size): (i64, i64) = sqlx::query_as(&upsert_parent)
            .bind(write.cache_type.as_str())
            .bind(write.key.as_str())
            .bind(update_time)
            .bind(i64::from(write.metadata.pages))
            .bind(next_qs)
            .fetch_one(&mut *tx)
            .await?;

        let base = match write.mode {
            WriteMode::Append => size,
            WriteMode::Replace => {
                let clear = format!("DELETE FROM {} WHERE cache_id = ?", tables.member);
                sqlx::query(&clear).bind(cache_id).execute(&mut *tx).await?;
                0
            }
        };

        let insert_member = format!(
            "INSERT INTO {member} (cache_id, {id}, rank) VALUES (?, ?, ?)
             ON CONFLICT (cache_id, {id}) DO NOTHING",
            member = tables.member,
            id = tables.id_column,
        );
        let mut rank = base;
        let mut inserted: usize = 0;
        for id in &write.ids {
            let result = sqlx::query(&insert_member)
                .bind(cache_id)
                .bind(*id)
                .bind(rank)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() > 0 {
                rank += 1;
                inserted += 1;
            }
        }

        let update_size = format!("UPDATE {} SET size = ? WHERE id = ?", tables.set);
        sqlx::query(&update_size)
            .bind(rank)
            .bind(cache_id)
            .execute(&mut *tx)
            .await?;

        upsert_details_on(&mut *tx, kind, &write.details, update_time).await?;
        tx.commit().await?;

        debug!(
            "{} {}: inserted {} of {} ids",
            write.cache_type,
            write.key,
            inserted,
            write.ids.len()
        );
        Ok(write.mode == WriteMode::Append && inserted != write.ids.len())
    }

    async fn delete_set(&self, cache_type: CacheType, key: &SetKey) -> Result<u64> {
        let tables = Tables::of(cache_type.entity_kind());
        let sql = format!(
            "DELETE FROM {} WHERE cache_type = ? AND cache_key = ?",
            tables.set
        );
        let result = sqlx::query(&sql)
            .bind(cache_type.as_str())
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn find_download(&self, illust_id: i64, page: u32) -> Result<Option<DownloadRecord>> {
        let row: Option<(Vec<u8>, i64)> = sqlx::query_as(
            "SELECT content, update_time FROM download_cache WHERE illust_id = ? AND page = ?",
        )
        .bind(illust_id)
        .bind(i64::from(page))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(content, update_time)| DownloadRecord {
            content,
            metadata: Metadata::new(datetime_from_ms(update_time)),
        }))
    }

    async fn upsert_download(
        &self,
        illust_id: i64,
        page: u32,
        content: Vec<u8>,
        metadata: &Metadata,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO download_cache (illust_id, page, content, update_time) VALUES (?, ?, ?, ?)
             ON CONFLICT (illust_id, page) DO UPDATE SET
                content = excluded.content,
                update_time = excluded.update_time",
        )
        .bind(illust_id)
        .bind(i64::from(page))
        .bind(content)
        .bind(metadata.update_time_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<DeletedCounts> {
        let mut deleted = DeletedCounts::new();
        let mut tx = self.pool.begin().await?;

        for family in RecordFamily::all() {
            let result = match family {
                RecordFamily::IllustDetail => {
                    sqlx::query("DELETE FROM illust_detail_cache")
                        .execute(&mut *tx)
                        .await?
                }
                RecordFamily::UserDetail => {
                    sqlx::query("DELETE FROM user_detail_cache")
                        .execute(&mut *tx)
                        .await?
                }
                RecordFamily::Download => {
                    sqlx::query("DELETE FROM download_cache")
                        .execute(&mut *tx)
                        .await?
                }
                RecordFamily::Set(cache_type) => {
                    let sql = format!(
                        "DELETE FROM {} WHERE cache_type = ?",
                        Tables::of(cache_type.entity_kind()).set
                    );
                    sqlx::query(&sql)
                        .bind(cache_type.as_str())
                        .execute(&mut *tx)
                        .await?
                }
            };
            deleted.insert(family.as_str().to_string(), result.rows_affected());
        }

        tx.commit().await?;
        Ok(deleted)
    }

    async fn delete_older_than(&self, family: RecordFamily, cutoff: DateTime<Utc>) -> Result<u64> {
        let cutoff = cutoff.timestamp_millis();
        let result = match family {
            RecordFamily::IllustDetail => {
                sqlx::query("DELETE FROM illust_detail_cache WHERE update_time <= ?")
                    .bind(cutoff)
                    .execute(&self.pool)
                    .await?
            }
            RecordFamily::UserDetail => {
                sqlx::query("DELETE FROM user_detail_cache WHERE update_time <= ?")
                    .bind(cutoff)
                    .execute(&self.pool)
                    .await?
            }
            RecordFamily::Download => {
                sqlx::query("DELETE FROM download_cache WHERE update_time <= ?")
                    .bind(cutoff)
                    .execute(&self.pool)
                    .await?
            }
            RecordFamily::Set(cache_type) => {
                let sql = format!(
                    "DELETE FROM {} WHERE cache_type = ? AND update_time <= ?",
                    Tables::of(cache_type.entity_kind()).set
                );
                sqlx::query(&sql)
                    .bind(cache_type.as_str())
                    .bind(cutoff)
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        info!("Closed relational cache pool");
        Ok(())
    }
}
