//! Activity record queries.

use crate::codec::ColumnCodec;
use crate::error::{DbResult, OpContext};
use crate::live::LiveQuery;
use crate::mapper::{self, surrogate};
use crate::models::ActivityRecord;
use crate::schema::Table;
use crate::MentraDb;

/// Detected activity spans.
#[derive(Debug, Clone, Copy)]
pub struct ActivityRepo<'a> {
    pub(crate) db: &'a MentraDb,
}

impl ActivityRepo<'_> {
    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert (or replace by id). Returns the stored id.
    pub async fn insert(&self, record: &ActivityRecord) -> DbResult<i64> {
        super::upsert_one(self.db, record, "insert").await
    }

    /// Insert a batch atomically.
    pub async fn insert_many(&self, records: &[ActivityRecord]) -> DbResult<()> {
        super::upsert_all(self.db, records, "insert_many").await
    }

    /// Delete records strictly older than `before`. Returns how many went.
    pub async fn delete_older_than(&self, before: i64) -> DbResult<u64> {
        super::execute_one(
            self.db,
            OpContext::new(Table::ActivityRecords, "delete_older_than"),
            "DELETE FROM activity_records WHERE timestamp < ?",
            vec![before.encode()],
        )
        .await
    }

    pub async fn delete(&self, id: i64) -> DbResult<bool> {
        super::delete_one::<ActivityRecord>(self.db, surrogate(id)).await
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn get(&self, id: i64) -> DbResult<Option<ActivityRecord>> {
        mapper::get(self.db, surrogate(id)).await
    }

    /// Records with `start <= timestamp <= end`, newest first.
    pub async fn in_range(&self, start: i64, end: i64) -> DbResult<Vec<ActivityRecord>> {
        mapper::fetch_all(
            self.db,
            "in_range",
            "WHERE timestamp >= ? AND timestamp <= ? ORDER BY timestamp DESC",
            &[start.encode(), end.encode()],
        )
        .await
    }

    /// Records at or after `start`, newest first.
    pub async fn since(&self, start: i64) -> DbResult<Vec<ActivityRecord>> {
        mapper::fetch_all(
            self.db,
            "since",
            "WHERE timestamp >= ? ORDER BY timestamp DESC",
            &[start.encode()],
        )
        .await
    }

    pub fn watch_in_range(&self, start: i64, end: i64) -> LiveQuery<Vec<ActivityRecord>> {
        self.db.subscribe(&[Table::ActivityRecords], move |db| {
            Box::pin(async move { db.activities().in_range(start, end).await })
        })
    }

    pub fn watch_since(&self, start: i64) -> LiveQuery<Vec<ActivityRecord>> {
        self.db.subscribe(&[Table::ActivityRecords], move |db| {
            Box::pin(async move { db.activities().since(start).await })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActivityType;
    use crate::DbError;
    use pretty_assertions::assert_eq;

    fn record(timestamp: i64) -> ActivityRecord {
        ActivityRecord {
            id: 0,
            timestamp,
            activity_type: ActivityType::Walking,
            steps: 100,
            distance: 75.0,
            calories: 3.5,
            duration_ms: 60_000,
            confidence: 0.75,
        }
    }

    #[tokio::test]
    async fn range_is_inclusive_and_descending() {
        let db = MentraDb::open_in_memory().await.unwrap();
        let batch: Vec<_> = [5, 10, 15, 20].into_iter().map(record).collect();
        db.activities().insert_many(&batch).await.unwrap();

        let found = db.activities().in_range(10, 15).await.unwrap();
        let stamps: Vec<i64> = found.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![15, 10]);
    }

    #[tokio::test]
    async fn round_trip_preserves_every_field() {
        let db = MentraDb::open_in_memory().await.unwrap();
        let mut original = record(42);
        original.activity_type = ActivityType::Cycling;
        original.confidence = 0.83;

        let id = db.activities().insert(&original).await.unwrap();
        original.id = id;
        assert_eq!(db.activities().get(id).await.unwrap(), Some(original));
    }

    #[tokio::test]
    async fn invalid_record_in_batch_writes_nothing() {
        let db = MentraDb::open_in_memory().await.unwrap();
        let mut bad = record(30);
        bad.confidence = 3.0;
        let batch = vec![record(10), record(20), bad];

        let err = db.activities().insert_many(&batch).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidData { .. }));
        assert!(db.activities().since(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_older_than_is_strict() {
        let db = MentraDb::open_in_memory().await.unwrap();
        let batch: Vec<_> = [5, 10, 15].into_iter().map(record).collect();
        db.activities().insert_many(&batch).await.unwrap();

        assert_eq!(db.activities().delete_older_than(10).await.unwrap(), 1);
        let left: Vec<i64> = db
            .activities()
            .since(0)
            .await
            .unwrap()
            .iter()
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(left, vec![15, 10]);
    }
}
