//! Database connection management.

use std::sync::Arc;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::codec::{bind_all, SqlValue};
use crate::config::{StoreConfig, StoreLocation};
use crate::error::{DbError, DbResult, OpContext};
use crate::live::InvalidationTracker;
use crate::mapper;
use crate::schema::{self, FoundColumn, SchemaDiff, Table, FINGERPRINT_TABLE, SCHEMA_VERSION};
use crate::statement::{StatementCache, StatementStats};

pub(crate) struct DbInner {
    pub(crate) pool: SqlitePool,
    /// Writers hold this exclusively; snapshot reads share it.
    pub(crate) gate: Arc<RwLock<()>>,
    pub(crate) statements: Arc<StatementCache>,
    pub(crate) tracker: Arc<InvalidationTracker>,
    pub(crate) config: StoreConfig,
}

/// Handle to the application store.
///
/// Cheap to clone; every clone shares the same pool, write gate and live
/// query registry.
#[derive(Clone)]
pub struct MentraDb {
    pub(crate) inner: Arc<DbInner>,
}

impl std::fmt::Debug for MentraDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MentraDb")
            .field("location", &self.inner.config.location)
            .field("live_queries", &self.inner.tracker.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl MentraDb {
    /// Open or create a store described by `config`.
    ///
    /// This will:
    /// 1. Create the database file (and parent directory) if missing
    /// 2. Configure SQLite (WAL, busy timeout, statement cache)
    /// 3. Verify the persisted schema fingerprint, creating tables on first open
    pub async fn open(config: StoreConfig) -> DbResult<Self> {
        config.validate()?;

        let pool = match &config.location {
            StoreLocation::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
                info!("Opening store: {}", path.display());

                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal)
                    .busy_timeout(config.busy_timeout())
                    .statement_cache_capacity(config.statement_cache_capacity)
                    .pragma("temp_store", "MEMORY");

                SqlitePoolOptions::new()
                    .max_connections(config.max_read_connections)
                    .connect_with(options)
                    .await?
            }
            StoreLocation::Memory => {
                debug!("Opening in-memory store");
                let options = SqliteConnectOptions::new()
                    .filename(":memory:")
                    .busy_timeout(config.busy_timeout())
                    .statement_cache_capacity(config.statement_cache_capacity);

                // In-memory must be a single connection that is never recycled,
                // or its contents vanish.
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options)
                    .await?
            }
        };

        initialize_schema(&pool, config.reset_on_schema_mismatch).await?;

        Ok(Self {
            inner: Arc::new(DbInner {
                pool,
                gate: Arc::new(RwLock::new(())),
                statements: Arc::new(StatementCache::new(config.statement_cache_capacity)),
                tracker: Arc::new(InvalidationTracker::new()),
                config,
            }),
        })
    }

    /// Open or create a store file with default tunables.
    pub async fn open_path(path: impl Into<std::path::PathBuf>) -> DbResult<Self> {
        Self::open(StoreConfig::file(path)).await
    }

    /// Open an in-memory store (for testing).
    pub async fn open_in_memory() -> DbResult<Self> {
        Self::open(StoreConfig::memory()).await
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Get a reference to the connection pool.
    ///
    /// Writes issued directly against the pool bypass the write gate and
    /// live query invalidation.
    pub fn pool(&self) -> &SqlitePool {
        &self.inner.pool
    }

    /// Snapshot read. Waits for any in-flight write to finish; retries
    /// bounded times on lock contention from other processes.
    ///
    /// From inside a transaction's work the read runs on that transaction
    /// and sees its uncommitted writes.
    pub async fn fetch_rows(
        &self,
        ctx: &OpContext,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<Vec<SqliteRow>> {
        if let Some(active) = self.active_tx() {
            return active.fetch_rows(ctx, sql, params).await;
        }
        let _read = self.inner.gate.read().await;
        let retries = self.inner.config.busy_retries;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = bind_all(sqlx::query(sql), params)
                .fetch_all(&self.inner.pool)
                .await;
            match result {
                Ok(rows) => return Ok(rows),
                Err(e) => match DbError::from_sqlx(e, ctx) {
                    DbError::Busy { .. } if attempt <= retries => {
                        warn!(attempt, operation = ctx.operation, "database busy, retrying read");
                        tokio::time::sleep(self.inner.config.busy_backoff(attempt)).await;
                    }
                    DbError::Busy {
                        table, operation, ..
                    } => {
                        return Err(DbError::Busy {
                            table,
                            operation,
                            attempts: attempt,
                        })
                    }
                    other => return Err(other),
                },
            }
        }
    }

    /// Snapshot read of a single integer (COUNT, MAX, ...). `None` when the
    /// query yields no row or NULL.
    pub async fn fetch_i64(
        &self,
        ctx: &OpContext,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<Option<i64>> {
        let rows = self.fetch_rows(ctx, sql, params).await?;
        match rows.first() {
            Some(row) => row
                .try_get::<Option<i64>, _>(0)
                .map_err(|e| DbError::from_sqlx(e, ctx)),
            None => Ok(None),
        }
    }

    /// Close the database connection.
    pub async fn close(&self) {
        info!("Closing store");
        self.inner.pool.close().await;
    }

    /// Check if the database is healthy.
    pub async fn health_check(&self) -> DbResult<()> {
        self.fetch_rows(&OpContext::store("health_check"), "SELECT 1", &[])
            .await?;
        Ok(())
    }

    /// Statement cache counters.
    pub fn statement_stats(&self) -> StatementStats {
        self.inner.statements.stats()
    }

    /// Truncate every table in one transaction, then reclaim space.
    ///
    /// Live queries on any table see exactly one invalidation.
    pub async fn clear_all(&self) -> DbResult<()> {
        if self.in_transaction() {
            return Err(DbError::InTransaction {
                operation: "clear_all",
            });
        }
        info!("Clearing all tables");
        self.transaction(|tx| {
            Box::pin(async move {
                for table in Table::ALL {
                    let ctx = OpContext::new(table, "clear_all");
                    tx.execute(&ctx, &mapper::sql(table).truncate, &[]).await?;
                }
                Ok(())
            })
        })
        .await?;
        self.checkpoint().await?;
        self.vacuum().await
    }

    /// Vacuum the database to reclaim space.
    pub async fn vacuum(&self) -> DbResult<()> {
        info!("Vacuuming database");
        self.maintenance("vacuum", "VACUUM").await
    }

    /// Checkpoint the WAL file.
    pub async fn checkpoint(&self) -> DbResult<()> {
        debug!("Checkpointing WAL");
        self.maintenance("checkpoint", "PRAGMA wal_checkpoint(TRUNCATE)")
            .await
    }

    /// Store-wide statement run outside any transaction, exclusive of writers.
    async fn maintenance(&self, operation: &'static str, sql: &str) -> DbResult<()> {
        if self.in_transaction() {
            return Err(DbError::InTransaction { operation });
        }
        let _gate = self.inner.gate.write().await;
        sqlx::query(sql)
            .execute(&self.inner.pool)
            .await
            .map_err(|e| DbError::from_sqlx(e, &OpContext::store(operation)))?;
        Ok(())
    }
}

/// Verify or create the schema.
///
/// - no fingerprint and no known tables: fresh store, create everything
/// - fingerprint equal: create any missing table
/// - fingerprint different (or tables present without one): `SchemaMismatch`,
///   unless `reset` is set, in which case every known table is rebuilt empty
async fn initialize_schema(pool: &SqlitePool, reset: bool) -> DbResult<()> {
    let expected = schema::fingerprint(SCHEMA_VERSION)?;
    let ctx = OpContext::store("open");

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {FINGERPRINT_TABLE} \
         (schema_id INTEGER PRIMARY KEY NOT NULL, fingerprint_hash TEXT NOT NULL)"
    ))
    .execute(pool)
    .await
    .map_err(|e| DbError::from_sqlx(e, &ctx))?;

    let stored: Option<(i64, String)> = sqlx::query_as(&format!(
        "SELECT schema_id, fingerprint_hash FROM {FINGERPRINT_TABLE} ORDER BY schema_id DESC LIMIT 1"
    ))
    .fetch_optional(pool)
    .await
    .map_err(|e| DbError::from_sqlx(e, &ctx))?;

    let matches = matches!(&stored, Some((id, hash)) if *id == SCHEMA_VERSION && *hash == expected);
    if !matches {
        let diff = diff_existing(pool).await?;
        let fresh = stored.is_none() && diff.is_empty();
        if !fresh {
            let found = stored
                .map(|(id, hash)| format!("{hash} (schema {id})"))
                .unwrap_or_else(|| "<none>".to_string());
            if !reset {
                return Err(DbError::SchemaMismatch {
                    expected,
                    found,
                    diff,
                });
            }
            warn!(%found, "schema mismatch, dropping and recreating all tables");
            drop_all(pool).await?;
        }
    }

    let mut tx = pool.begin().await.map_err(|e| DbError::from_sqlx(e, &ctx))?;
    for table in schema::tables(SCHEMA_VERSION)? {
        sqlx::query(&table.def().create_sql())
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::from_sqlx(e, &OpContext::new(*table, "create_table")))?;
    }
    if !matches {
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO {FINGERPRINT_TABLE} (schema_id, fingerprint_hash) VALUES (?, ?)"
        ))
        .bind(SCHEMA_VERSION)
        .bind(&expected)
        .execute(&mut *tx)
        .await
        .map_err(|e| DbError::from_sqlx(e, &ctx))?;
    }
    tx.commit().await.map_err(|e| DbError::from_sqlx(e, &ctx))?;

    debug!(fingerprint = %expected, "schema ready");
    Ok(())
}

/// Compare every known table that exists on disk against its declaration.
async fn diff_existing(pool: &SqlitePool) -> DbResult<SchemaDiff> {
    let mut diff = SchemaDiff::default();
    for table in Table::ALL {
        let def = table.def();
        let rows = sqlx::query(&format!("PRAGMA table_info({})", def.name))
            .fetch_all(pool)
            .await
            .map_err(|e| DbError::from_sqlx(e, &OpContext::new(table, "table_info")))?;
        let found = rows
            .iter()
            .map(|row| {
                Ok(FoundColumn {
                    name: row.try_get("name")?,
                    ty: row.try_get("type")?,
                    not_null: row.try_get::<i64, _>("notnull")? != 0,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| DbError::from_sqlx(e, &OpContext::new(table, "table_info")))?;
        diff.compare(def, &found);
    }
    Ok(diff)
}

async fn drop_all(pool: &SqlitePool) -> DbResult<()> {
    let ctx = OpContext::store("reset");
    let mut tx = pool.begin().await.map_err(|e| DbError::from_sqlx(e, &ctx))?;
    for table in Table::ALL {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table.name()))
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::from_sqlx(e, &OpContext::new(table, "drop_table")))?;
    }
    sqlx::query(&format!("DELETE FROM {FINGERPRINT_TABLE}"))
        .execute(&mut *tx)
        .await
        .map_err(|e| DbError::from_sqlx(e, &ctx))?;
    tx.commit().await.map_err(|e| DbError::from_sqlx(e, &ctx))?;
    Ok(())
}
