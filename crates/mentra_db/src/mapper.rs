//! Table-driven row mapping.
//!
//! Entities describe themselves as an ordered list of column values matching
//! their [`TableDef`](crate::schema::TableDef). The SQL for inserting,
//! updating, deleting and selecting is generated once per table from the
//! schema registry, so no entity carries hand-written bind code.

use std::collections::HashMap;
use std::sync::OnceLock;

use sqlx::sqlite::SqliteRow;

use crate::codec::{ColumnCodec, SqlValue};
use crate::error::{DbError, DbResult, OpContext};
use crate::schema::{PrimaryKey, Table};
use crate::transaction::WriteTx;
use crate::MentraDb;

/// A row type stored in one table.
pub trait Entity: Sized + Send + Sync + 'static {
    const TABLE: Table;

    /// Name used in error messages.
    const ENTITY: &'static str;

    /// Primary key value. Surrogate keys encode 0 as NULL so the store
    /// assigns one.
    fn key(&self) -> SqlValue;

    /// Column values in schema declaration order.
    fn values(&self) -> Vec<SqlValue>;

    fn from_row(row: &RowReader<'_>) -> DbResult<Self>;

    /// Domain invariants checked before every write.
    fn validate(&self) -> DbResult<()> {
        Ok(())
    }
}

/// Encode a surrogate id, mapping the unassigned value 0 to NULL.
pub fn surrogate(id: i64) -> SqlValue {
    if id == 0 {
        SqlValue::Null
    } else {
        SqlValue::Integer(id)
    }
}

/// Typed, context-aware access to one fetched row.
pub struct RowReader<'r> {
    table: Table,
    row: &'r SqliteRow,
}

impl<'r> RowReader<'r> {
    pub fn new(table: Table, row: &'r SqliteRow) -> Self {
        Self { table, row }
    }

    pub fn get<T: ColumnCodec>(&self, column: &'static str) -> DbResult<T> {
        self.get_with(column, T::decode)
    }

    /// Decode a column with an explicit codec function.
    pub fn get_with<T>(
        &self,
        column: &'static str,
        decode: impl FnOnce(&SqlValue) -> Result<T, String>,
    ) -> DbResult<T> {
        let def = self.table.def().column(column).ok_or_else(|| {
            DbError::corrupt(self.table, column, "<absent>", "column is not declared")
        })?;
        let value = SqlValue::read(self.row, column, def.ty)
            .map_err(|e| DbError::corrupt(self.table, column, "<unreadable>", e.to_string()))?;
        decode(&value).map_err(|reason| DbError::corrupt(self.table, column, value.to_string(), reason))
    }
}

/// Generated statements for one table.
#[derive(Debug)]
pub struct TableSql {
    pub select: String,
    pub upsert: String,
    pub insert: String,
    pub update: String,
    pub delete: String,
    pub truncate: String,
}

impl TableSql {
    fn build(table: Table) -> Self {
        let def = table.def();
        let columns: Vec<&str> = def.column_names().collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let pk = def.primary_key.column();
        let assignments: Vec<String> = columns
            .iter()
            .filter(|c| **c != pk)
            .map(|c| format!("{c} = ?"))
            .collect();

        Self {
            select: format!("SELECT {} FROM {}", columns.join(", "), def.name),
            upsert: format!(
                "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
                def.name,
                columns.join(", "),
                placeholders
            ),
            insert: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                def.name,
                columns.join(", "),
                placeholders
            ),
            update: format!(
                "UPDATE {} SET {} WHERE {pk} = ?",
                def.name,
                assignments.join(", ")
            ),
            delete: format!("DELETE FROM {} WHERE {pk} = ?", def.name),
            truncate: format!("DELETE FROM {}", def.name),
        }
    }

    /// `SELECT <all columns> FROM <table> <clause>`
    pub fn select_where(&self, clause: &str) -> String {
        if clause.is_empty() {
            self.select.clone()
        } else {
            format!("{} {clause}", self.select)
        }
    }
}

/// Generated SQL for `table`, built on first use.
pub fn sql(table: Table) -> &'static TableSql {
    static SQL: OnceLock<HashMap<Table, TableSql>> = OnceLock::new();
    let all = SQL.get_or_init(|| {
        Table::ALL
            .iter()
            .map(|t| (*t, TableSql::build(*t)))
            .collect()
    });
    &all[&table]
}

/// Split values into (non-key columns, key) for an UPDATE.
fn update_params<E: Entity>(entity: &E) -> Vec<SqlValue> {
    let def = E::TABLE.def();
    let pk = def.primary_key.column();
    let mut params: Vec<SqlValue> = def
        .column_names()
        .zip(entity.values())
        .filter(|(name, _)| *name != pk)
        .map(|(_, v)| v)
        .collect();
    params.push(entity.key());
    params
}

/// Insert or replace by primary key. Returns the row id.
pub async fn upsert<E: Entity>(tx: &mut WriteTx, entity: &E, operation: &'static str) -> DbResult<i64> {
    entity.validate()?;
    let ctx = OpContext::new(E::TABLE, operation).with_key(entity.key());
    let result = tx
        .execute(&ctx, &sql(E::TABLE).upsert, &entity.values())
        .await?;
    Ok(result.last_insert_rowid())
}

/// Insert, failing with a constraint violation if the key already exists.
pub async fn insert_strict<E: Entity>(
    tx: &mut WriteTx,
    entity: &E,
    operation: &'static str,
) -> DbResult<i64> {
    entity.validate()?;
    let ctx = OpContext::new(E::TABLE, operation).with_key(entity.key());
    let result = tx
        .execute(&ctx, &sql(E::TABLE).insert, &entity.values())
        .await?;
    Ok(result.last_insert_rowid())
}

/// Full-row update by primary key. Returns whether a row matched.
pub async fn update<E: Entity>(tx: &mut WriteTx, entity: &E, operation: &'static str) -> DbResult<bool> {
    entity.validate()?;
    if let (PrimaryKey::AutoIncrement(_), SqlValue::Null) = (E::TABLE.def().primary_key, entity.key()) {
        return Err(DbError::invalid_data(E::ENTITY, "cannot update a row without an id"));
    }
    let ctx = OpContext::new(E::TABLE, operation).with_key(entity.key());
    let result = tx
        .execute(&ctx, &sql(E::TABLE).update, &update_params(entity))
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Delete by primary key. Returns whether a row was removed.
pub async fn delete_by_key(
    tx: &mut WriteTx,
    table: Table,
    key: SqlValue,
    operation: &'static str,
) -> DbResult<bool> {
    let ctx = OpContext::new(table, operation).with_key(&key);
    let result = tx.execute(&ctx, &sql(table).delete, &[key]).await?;
    Ok(result.rows_affected() > 0)
}

/// Map fetched rows into entities; the first undecodable row fails the read.
pub fn decode_rows<E: Entity>(rows: &[SqliteRow]) -> DbResult<Vec<E>> {
    rows.iter()
        .map(|row| E::from_row(&RowReader::new(E::TABLE, row)))
        .collect()
}

/// Snapshot read of all rows matching `clause`.
pub async fn fetch_all<E: Entity>(
    db: &MentraDb,
    operation: &'static str,
    clause: &str,
    params: &[SqlValue],
) -> DbResult<Vec<E>> {
    let ctx = OpContext::new(E::TABLE, operation);
    let rows = db
        .fetch_rows(&ctx, &sql(E::TABLE).select_where(clause), params)
        .await?;
    decode_rows(&rows)
}

/// Snapshot read of at most one row matching `clause`.
pub async fn fetch_optional<E: Entity>(
    db: &MentraDb,
    operation: &'static str,
    clause: &str,
    params: &[SqlValue],
) -> DbResult<Option<E>> {
    let mut rows = fetch_all::<E>(db, operation, clause, params).await?;
    Ok(if rows.is_empty() {
        None
    } else {
        Some(rows.swap_remove(0))
    })
}

/// Read by primary key.
pub async fn get<E: Entity>(db: &MentraDb, key: SqlValue) -> DbResult<Option<E>> {
    let clause = format!("WHERE {} = ?", E::TABLE.def().primary_key.column());
    fetch_optional::<E>(db, "get", &clause, &[key]).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_sql_follows_declaration_order() {
        let s = sql(Table::ShellAliases);
        assert_eq!(
            s.select,
            "SELECT alias, target, description, created_at FROM shell_aliases"
        );
        assert_eq!(
            s.upsert,
            "INSERT OR REPLACE INTO shell_aliases (alias, target, description, created_at) VALUES (?, ?, ?, ?)"
        );
        assert_eq!(
            s.update,
            "UPDATE shell_aliases SET target = ?, description = ?, created_at = ? WHERE alias = ?"
        );
        assert_eq!(s.delete, "DELETE FROM shell_aliases WHERE alias = ?");
    }

    #[test]
    fn select_where_appends_clause() {
        let s = sql(Table::Poi);
        assert!(s.select_where("WHERE is_favorite = 1").ends_with("FROM poi WHERE is_favorite = 1"));
        assert_eq!(s.select_where(""), s.select);
    }

    #[test]
    fn surrogate_zero_is_unassigned() {
        assert_eq!(surrogate(0), SqlValue::Null);
        assert_eq!(surrogate(9), SqlValue::Integer(9));
    }
}
