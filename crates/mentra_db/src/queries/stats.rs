//! Database statistics queries.

use crate::error::{DbResult, OpContext};
use crate::schema::Table;
use crate::MentraDb;

/// Row count of every table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbStats {
    pub tables: Vec<(Table, i64)>,
}

impl DbStats {
    pub fn count(&self, table: Table) -> i64 {
        self.tables
            .iter()
            .find(|(t, _)| *t == table)
            .map_or(0, |(_, n)| *n)
    }

    pub fn total_rows(&self) -> i64 {
        self.tables.iter().map(|(_, n)| n).sum()
    }
}

impl MentraDb {
    /// Get overall database statistics.
    pub async fn stats(&self) -> DbResult<DbStats> {
        let mut tables = Vec::with_capacity(Table::ALL.len());
        for table in Table::ALL {
            let count = self
                .fetch_i64(
                    &OpContext::new(table, "stats"),
                    &format!("SELECT COUNT(*) FROM {}", table.name()),
                    &[],
                )
                .await?
                .unwrap_or(0);
            tables.push((table, count));
        }
        Ok(DbStats { tables })
    }
}
