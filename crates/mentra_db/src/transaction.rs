//! Transaction coordinator.
//!
//! All mutation goes through [`MentraDb::transaction`]. A single write gate
//! serializes writers against each other and against readers; the commit
//! itself runs on a detached task so a caller that stops polling cannot
//! abandon it half way. Each committed transaction produces exactly one
//! invalidation pass covering every table it wrote.
//!
//! While a transaction's work runs, the task carries a marker naming it.
//! Calls made through the same store handle from that task join the open
//! transaction: nested `transaction` calls and repository writes run inside
//! it, and snapshot reads see its uncommitted writes. Tasks spawned from the
//! work do not carry the marker and wait for the commit like any other
//! caller.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use sqlx::sqlite::{SqliteQueryResult, SqliteRow};
use sqlx::{Sqlite, Transaction};
use tracing::{debug, trace, warn};

use crate::codec::{bind_all, SqlValue};
use crate::error::{DbError, DbResult, OpContext};
use crate::mapper::{self, Entity};
use crate::schema::{Table, TableSet};
use crate::statement::StatementCache;
use crate::MentraDb;

tokio::task_local! {
    static ACTIVE_TX: ActiveTx;
}

/// State shared by every handle onto one open transaction.
struct TxShared {
    /// Identity of the store that opened it.
    owner: usize,
    conn: tokio::sync::Mutex<Option<Transaction<'static, Sqlite>>>,
    statements: Arc<StatementCache>,
    written: Mutex<TableSet>,
}

impl TxShared {
    async fn execute(
        &self,
        ctx: &OpContext,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<SqliteQueryResult> {
        let mut conn = self.conn.lock().await;
        let tx = conn.as_mut().ok_or(DbError::TransactionFinished {
            operation: ctx.operation,
        })?;
        let lease = self.statements.acquire(sql);
        let result = bind_all(lease.query(), params)
            .execute(&mut **tx)
            .await
            .map_err(|e| DbError::from_sqlx(e, ctx))?;
        if let Some(table) = ctx.table {
            self.written.lock().insert(table);
        }
        Ok(result)
    }

    async fn fetch_rows(
        &self,
        ctx: &OpContext,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<Vec<SqliteRow>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.as_mut().ok_or(DbError::TransactionFinished {
            operation: ctx.operation,
        })?;
        bind_all(sqlx::query(sql), params)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| DbError::from_sqlx(e, ctx))
    }
}

/// Marker carried by a task while it runs transaction work.
#[derive(Clone)]
pub(crate) struct ActiveTx {
    shared: Arc<TxShared>,
    depth: u32,
}

impl ActiveTx {
    /// The transaction open on the current task for the store `owner`.
    fn current(owner: usize) -> Option<Self> {
        ACTIVE_TX
            .try_with(|active| active.clone())
            .ok()
            .filter(|active| active.shared.owner == owner)
    }

    pub(crate) async fn fetch_rows(
        &self,
        ctx: &OpContext,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<Vec<SqliteRow>> {
        self.shared.fetch_rows(ctx, sql, params).await
    }
}

/// An open write transaction.
///
/// Obtained only inside [`MentraDb::transaction`]. Records every table it
/// writes so the commit can notify live queries.
pub struct WriteTx {
    shared: Arc<TxShared>,
    depth: u32,
}

impl WriteTx {
    fn joined(active: &ActiveTx) -> Self {
        Self {
            shared: active.shared.clone(),
            depth: active.depth,
        }
    }

    fn marker(&self) -> ActiveTx {
        ActiveTx {
            shared: self.shared.clone(),
            depth: self.depth,
        }
    }

    /// Execute a write statement through the statement cache.
    pub async fn execute(
        &mut self,
        ctx: &OpContext,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<SqliteQueryResult> {
        self.shared.execute(ctx, sql, params).await
    }

    /// Read inside the transaction, observing its uncommitted writes.
    pub async fn fetch_rows(
        &mut self,
        ctx: &OpContext,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<Vec<SqliteRow>> {
        self.shared.fetch_rows(ctx, sql, params).await
    }

    /// Typed read inside the transaction.
    pub async fn fetch_all<E: Entity>(
        &mut self,
        operation: &'static str,
        clause: &str,
        params: &[SqlValue],
    ) -> DbResult<Vec<E>> {
        let ctx = OpContext::new(E::TABLE, operation);
        let rows = self
            .fetch_rows(&ctx, &mapper::sql(E::TABLE).select_where(clause), params)
            .await?;
        mapper::decode_rows(&rows)
    }

    /// Single integer result (counts, MAX(), etc.) inside the transaction.
    pub async fn fetch_i64(
        &mut self,
        ctx: &OpContext,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<Option<i64>> {
        let rows = self.fetch_rows(ctx, sql, params).await?;
        match rows.first() {
            Some(row) => sqlx::Row::try_get::<Option<i64>, _>(row, 0)
                .map_err(|e| DbError::from_sqlx(e, ctx)),
            None => Ok(None),
        }
    }

    /// Flag a table as written without going through [`execute`](Self::execute).
    pub fn mark_written(&mut self, table: Table) {
        self.shared.written.lock().insert(table);
    }

    /// Tables written so far, including by joined nested work.
    pub fn written(&self) -> TableSet {
        self.shared.written.lock().clone()
    }

    /// Nesting depth; 0 for the outermost transaction.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Run nested work. Nested requests join this transaction: their writes
    /// commit or roll back with the outermost one.
    pub async fn transaction<T, F>(&mut self, work: F) -> DbResult<T>
    where
        F: for<'t> FnOnce(&'t mut WriteTx) -> BoxFuture<'t, DbResult<T>>,
    {
        self.depth += 1;
        let marker = self.marker();
        let result = ACTIVE_TX.scope(marker, work(self)).await;
        self.depth -= 1;
        result
    }
}

impl std::fmt::Debug for WriteTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTx")
            .field("written", &*self.shared.written.lock())
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

impl MentraDb {
    /// Run `work` atomically.
    ///
    /// If `work` fails, every write it made is rolled back and its error is
    /// returned unchanged. On success all writes commit together and one
    /// invalidation pass fires for the union of written tables.
    ///
    /// Called from inside another transaction's work on the same store, the
    /// request joins that transaction instead of opening a new one.
    ///
    /// ```rust,ignore
    /// let id = db
    ///     .transaction(|tx| Box::pin(async move {
    ///         let id = mapper::upsert(tx, &route, "insert").await?;
    ///         mapper::upsert(tx, &first_point, "insert").await?;
    ///         Ok(id)
    ///     }))
    ///     .await?;
    /// ```
    pub async fn transaction<T, F>(&self, work: F) -> DbResult<T>
    where
        F: for<'t> FnOnce(&'t mut WriteTx) -> BoxFuture<'t, DbResult<T>>,
    {
        if let Some(active) = self.active_tx() {
            let mut nested = WriteTx::joined(&active);
            nested.depth += 1;
            trace!(depth = nested.depth, "joining open transaction");
            let marker = nested.marker();
            return ACTIVE_TX.scope(marker, work(&mut nested)).await;
        }

        let gate = self.inner.gate.clone().write_owned().await;
        let tx = self.begin().await?;
        let shared = Arc::new(TxShared {
            owner: self.owner_id(),
            conn: tokio::sync::Mutex::new(Some(tx)),
            statements: self.inner.statements.clone(),
            written: Mutex::new(TableSet::new()),
        });
        let mut wtx = WriteTx {
            shared: shared.clone(),
            depth: 0,
        };
        let marker = wtx.marker();
        let outcome = ACTIVE_TX.scope(marker, work(&mut wtx)).await;
        drop(wtx);

        let tx = shared.conn.lock().await.take();
        let written = shared.written.lock().clone();
        let Some(tx) = tx else {
            return Err(DbError::TransactionFinished { operation: "commit" });
        };

        let value = match outcome {
            Ok(value) => value,
            Err(err) => {
                debug!(tables = ?written, "rolling back transaction: {err}");
                if let Err(rollback) = tx.rollback().await {
                    warn!("rollback failed: {rollback}");
                }
                return Err(err);
            }
        };

        let tracker = self.inner.tracker.clone();

        // Once committing starts it must finish even if this future is
        // dropped, so the commit owns the transaction and the write gate.
        let commit = tokio::spawn(async move {
            let outcome = tx.commit().await;
            drop(gate);
            if outcome.is_ok() && !written.is_empty() {
                debug!(tables = ?written, "transaction committed");
                tracker.invalidate(&written);
            }
            outcome
        });

        match commit.await {
            Ok(Ok(())) => Ok(value),
            Ok(Err(e)) => Err(DbError::from_sqlx(e, &OpContext::store("commit"))),
            Err(join) => Err(DbError::CommitTask(join.to_string())),
        }
    }

    /// The transaction this task is running work for on this store, if any.
    pub(crate) fn active_tx(&self) -> Option<ActiveTx> {
        ActiveTx::current(self.owner_id())
    }

    /// Whether the current task is inside a transaction on this store.
    pub fn in_transaction(&self) -> bool {
        self.active_tx().is_some()
    }

    fn owner_id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Begin a transaction, retrying bounded times on lock contention.
    async fn begin(&self) -> DbResult<Transaction<'static, Sqlite>> {
        let ctx = OpContext::store("begin");
        let retries = self.inner.config.busy_retries;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.pool.begin().await {
                Ok(tx) => return Ok(tx),
                Err(e) => {
                    let err = DbError::from_sqlx(e, &ctx);
                    if err.is_busy() && attempt <= retries {
                        warn!(attempt, "database busy at BEGIN, retrying");
                        tokio::time::sleep(self.inner.config.busy_backoff(attempt)).await;
                        continue;
                    }
                    return Err(match err {
                        DbError::Busy { table, operation, .. } => DbError::Busy {
                            table,
                            operation,
                            attempts: attempt,
                        },
                        other => other,
                    });
                }
            }
        }
    }
}
