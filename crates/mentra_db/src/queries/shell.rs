//! Shell history, alias, script and trigger queries.

use crate::codec::ColumnCodec;
use crate::error::{DbError, DbResult, OpContext};
use crate::live::LiveQuery;
use crate::mapper::{self, surrogate, Entity};
use crate::models::{ShellAlias, ShellHistory, ShellScript, ShellTrigger};
use crate::schema::Table;
use crate::MentraDb;

// ============================================================================
// History
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ShellHistoryRepo<'a> {
    pub(crate) db: &'a MentraDb,
}

impl ShellHistoryRepo<'_> {
    /// Append an entry. Entries are immutable once written, so reusing a
    /// stored id is a `ConstraintViolation`.
    pub async fn insert(&self, entry: &ShellHistory) -> DbResult<i64> {
        let entry = entry.clone();
        self.db
            .transaction(move |tx| {
                Box::pin(async move { mapper::insert_strict(tx, &entry, "insert").await })
            })
            .await
    }

    /// Latest `limit` entries, newest first.
    pub async fn recent(&self, limit: u32) -> DbResult<Vec<ShellHistory>> {
        mapper::fetch_all(
            self.db,
            "recent",
            "ORDER BY timestamp DESC, id DESC LIMIT ?",
            &[i64::from(limit).encode()],
        )
        .await
    }

    /// Entries whose command contains `query`, newest first.
    pub async fn search(&self, query: &str) -> DbResult<Vec<ShellHistory>> {
        mapper::fetch_all(
            self.db,
            "search",
            "WHERE command LIKE '%' || ? || '%' ORDER BY timestamp DESC, id DESC",
            &[query.to_string().encode()],
        )
        .await
    }

    /// Drop entries strictly older than `before`.
    pub async fn delete_older_than(&self, before: i64) -> DbResult<u64> {
        super::execute_one(
            self.db,
            OpContext::new(Table::ShellHistory, "delete_older_than"),
            "DELETE FROM shell_history WHERE timestamp < ?",
            vec![before.encode()],
        )
        .await
    }

    /// Keep only the newest `keep` entries.
    pub async fn prune_to_latest(&self, keep: u32) -> DbResult<u64> {
        super::execute_one(
            self.db,
            OpContext::new(Table::ShellHistory, "prune_to_latest"),
            "DELETE FROM shell_history WHERE id NOT IN \
             (SELECT id FROM shell_history ORDER BY timestamp DESC, id DESC LIMIT ?)",
            vec![i64::from(keep).encode()],
        )
        .await
    }

    pub async fn clear(&self) -> DbResult<u64> {
        super::execute_one(
            self.db,
            OpContext::new(Table::ShellHistory, "clear"),
            &mapper::sql(Table::ShellHistory).truncate,
            Vec::new(),
        )
        .await
    }

    pub fn watch_recent(&self, limit: u32) -> LiveQuery<Vec<ShellHistory>> {
        self.db.subscribe(&[Table::ShellHistory], move |db| {
            Box::pin(async move { db.shell_history().recent(limit).await })
        })
    }

    pub fn watch_search(&self, query: &str) -> LiveQuery<Vec<ShellHistory>> {
        let query = query.to_string();
        self.db.subscribe(&[Table::ShellHistory], move |db| {
            let query = query.clone();
            Box::pin(async move { db.shell_history().search(&query).await })
        })
    }
}

// ============================================================================
// Aliases
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ShellAliasRepo<'a> {
    pub(crate) db: &'a MentraDb,
}

impl ShellAliasRepo<'_> {
    /// Insert, replacing any alias with the same name.
    pub async fn upsert(&self, alias: &ShellAlias) -> DbResult<()> {
        super::upsert_one(self.db, alias, "upsert").await?;
        Ok(())
    }

    /// Insert a new alias; an existing name is a `ConstraintViolation`.
    pub async fn create(&self, alias: &ShellAlias) -> DbResult<()> {
        let alias = alias.clone();
        self.db
            .transaction(move |tx| {
                Box::pin(async move {
                    mapper::insert_strict(tx, &alias, "create").await?;
                    Ok(())
                })
            })
            .await
    }

    pub async fn get(&self, alias: &str) -> DbResult<Option<ShellAlias>> {
        mapper::get(self.db, alias.to_string().encode()).await
    }

    pub async fn all(&self) -> DbResult<Vec<ShellAlias>> {
        mapper::fetch_all(self.db, "all", "ORDER BY alias ASC", &[]).await
    }

    pub async fn delete(&self, alias: &str) -> DbResult<bool> {
        super::delete_one::<ShellAlias>(self.db, alias.to_string().encode()).await
    }

    pub fn watch_all(&self) -> LiveQuery<Vec<ShellAlias>> {
        self.db.subscribe(&[Table::ShellAliases], |db| {
            Box::pin(async move { db.shell_aliases().all().await })
        })
    }
}

// ============================================================================
// Scripts
// ============================================================================

const UPSERT_SCRIPT: &str = "INSERT INTO shell_scripts \
     (id, name, content, description, created_at, updated_at, execution_count, last_executed) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
     ON CONFLICT(id) DO UPDATE SET \
     name = excluded.name, content = excluded.content, description = excluded.description, \
     created_at = excluded.created_at, updated_at = excluded.updated_at, \
     execution_count = MAX(execution_count, excluded.execution_count), \
     last_executed = COALESCE(excluded.last_executed, last_executed)";

#[derive(Debug, Clone, Copy)]
pub struct ShellScriptRepo<'a> {
    pub(crate) db: &'a MentraDb,
}

impl ShellScriptRepo<'_> {
    /// Insert a script, or rewrite the one with the same id. A rewrite keeps
    /// the higher of the stored and given execution counts, and the stored
    /// `last_executed` when none is given. Returns the id.
    pub async fn insert(&self, script: &ShellScript) -> DbResult<i64> {
        script.validate()?;
        let script = script.clone();
        self.db
            .transaction(move |tx| {
                Box::pin(async move {
                    let ctx = OpContext::new(Table::ShellScripts, "insert").with_key(script.key());
                    let result = tx.execute(&ctx, UPSERT_SCRIPT, &script.values()).await?;
                    Ok(if script.id == 0 {
                        result.last_insert_rowid()
                    } else {
                        script.id
                    })
                })
            })
            .await
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<ShellScript>> {
        mapper::get(self.db, surrogate(id)).await
    }

    pub async fn all(&self) -> DbResult<Vec<ShellScript>> {
        mapper::fetch_all(self.db, "all", "ORDER BY name ASC, id ASC", &[]).await
    }

    /// Rewrite a stored script. The stored execution count is kept if it is
    /// higher than the one passed in, as is a stored `last_executed` when
    /// none is given. Fails with `NotFound` if absent.
    pub async fn update(&self, script: &ShellScript) -> DbResult<()> {
        script.validate()?;
        let script = script.clone();
        self.db
            .transaction(move |tx| {
                Box::pin(async move {
                    let ctx = OpContext::new(Table::ShellScripts, "update").with_key(script.id);
                    let result = tx
                        .execute(
                            &ctx,
                            "UPDATE shell_scripts SET name = ?, content = ?, description = ?, \
                             created_at = ?, updated_at = ?, \
                             execution_count = MAX(execution_count, ?), \
                             last_executed = COALESCE(?, last_executed) \
                             WHERE id = ?",
                            &[
                                script.name.encode(),
                                script.content.encode(),
                                script.description.encode(),
                                script.created_at.encode(),
                                script.updated_at.encode(),
                                script.execution_count.encode(),
                                script.last_executed.encode(),
                                surrogate(script.id),
                            ],
                        )
                        .await?;
                    if result.rows_affected() == 0 {
                        return Err(DbError::not_found("shell script", script.id));
                    }
                    Ok(())
                })
            })
            .await
    }

    /// Record one execution at `timestamp`. Returns false if no such script.
    pub async fn increment_execution_count(&self, id: i64, timestamp: i64) -> DbResult<bool> {
        let affected = super::execute_one(
            self.db,
            OpContext::new(Table::ShellScripts, "increment_execution_count").with_key(id),
            "UPDATE shell_scripts SET execution_count = execution_count + 1, last_executed = ? \
             WHERE id = ?",
            vec![timestamp.encode(), id.encode()],
        )
        .await?;
        Ok(affected > 0)
    }

    /// Delete the script. Triggers pointing at it are left in place.
    pub async fn delete(&self, id: i64) -> DbResult<bool> {
        super::delete_one::<ShellScript>(self.db, surrogate(id)).await
    }

    pub fn watch_all(&self) -> LiveQuery<Vec<ShellScript>> {
        self.db.subscribe(&[Table::ShellScripts], |db| {
            Box::pin(async move { db.shell_scripts().all().await })
        })
    }
}

// ============================================================================
// Triggers
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ShellTriggerRepo<'a> {
    pub(crate) db: &'a MentraDb,
}

impl ShellTriggerRepo<'_> {
    pub async fn insert(&self, trigger: &ShellTrigger) -> DbResult<i64> {
        super::upsert_one(self.db, trigger, "insert").await
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<ShellTrigger>> {
        mapper::get(self.db, surrogate(id)).await
    }

    pub async fn enabled(&self) -> DbResult<Vec<ShellTrigger>> {
        mapper::fetch_all(self.db, "enabled", "WHERE enabled = 1 ORDER BY id ASC", &[]).await
    }

    /// Enabled triggers for one event type.
    pub async fn by_type(&self, trigger_type: &str) -> DbResult<Vec<ShellTrigger>> {
        mapper::fetch_all(
            self.db,
            "by_type",
            "WHERE trigger_type = ? AND enabled = 1 ORDER BY id ASC",
            &[trigger_type.to_string().encode()],
        )
        .await
    }

    pub async fn set_enabled(&self, id: i64, enabled: bool) -> DbResult<bool> {
        let affected = super::execute_one(
            self.db,
            OpContext::new(Table::ShellTriggers, "set_enabled").with_key(id),
            "UPDATE shell_triggers SET enabled = ? WHERE id = ?",
            vec![enabled.encode(), id.encode()],
        )
        .await?;
        Ok(affected > 0)
    }

    pub async fn delete(&self, id: i64) -> DbResult<bool> {
        super::delete_one::<ShellTrigger>(self.db, surrogate(id)).await
    }

    pub fn watch_enabled(&self) -> LiveQuery<Vec<ShellTrigger>> {
        self.db.subscribe(&[Table::ShellTriggers], |db| {
            Box::pin(async move { db.shell_triggers().enabled().await })
        })
    }

    pub fn watch_by_type(&self, trigger_type: &str) -> LiveQuery<Vec<ShellTrigger>> {
        let trigger_type = trigger_type.to_string();
        self.db.subscribe(&[Table::ShellTriggers], move |db| {
            let trigger_type = trigger_type.clone();
            Box::pin(async move { db.shell_triggers().by_type(&trigger_type).await })
        })
    }
}
