//! Daily health stats and sleep queries.

use chrono::NaiveDate;

use crate::codec::ColumnCodec;
use crate::error::DbResult;
use crate::live::LiveQuery;
use crate::mapper::{self, surrogate};
use crate::models::{HealthStats, SleepData};
use crate::schema::Table;
use crate::MentraDb;

/// Per-day aggregates, keyed by date.
#[derive(Debug, Clone, Copy)]
pub struct HealthStatsRepo<'a> {
    pub(crate) db: &'a MentraDb,
}

impl HealthStatsRepo<'_> {
    /// Insert or replace the stats for their date.
    pub async fn upsert(&self, stats: &HealthStats) -> DbResult<()> {
        super::upsert_one(self.db, stats, "upsert").await?;
        Ok(())
    }

    pub async fn get_for_date(&self, date: NaiveDate) -> DbResult<Option<HealthStats>> {
        mapper::get(self.db, date.encode()).await
    }

    /// Latest `limit` days, newest first.
    pub async fn recent(&self, limit: u32) -> DbResult<Vec<HealthStats>> {
        mapper::fetch_all(
            self.db,
            "recent",
            "ORDER BY date DESC LIMIT ?",
            &[i64::from(limit).encode()],
        )
        .await
    }

    /// Days with `start <= date <= end`, oldest first.
    pub async fn in_range(&self, start: NaiveDate, end: NaiveDate) -> DbResult<Vec<HealthStats>> {
        mapper::fetch_all(
            self.db,
            "in_range",
            "WHERE date >= ? AND date <= ? ORDER BY date ASC",
            &[start.encode(), end.encode()],
        )
        .await
    }

    pub async fn delete(&self, date: NaiveDate) -> DbResult<bool> {
        super::delete_one::<HealthStats>(self.db, date.encode()).await
    }

    pub fn watch_for_date(&self, date: NaiveDate) -> LiveQuery<Option<HealthStats>> {
        self.db.subscribe(&[Table::HealthStats], move |db| {
            Box::pin(async move { db.health_stats().get_for_date(date).await })
        })
    }

    pub fn watch_recent(&self, limit: u32) -> LiveQuery<Vec<HealthStats>> {
        self.db.subscribe(&[Table::HealthStats], move |db| {
            Box::pin(async move { db.health_stats().recent(limit).await })
        })
    }

    pub fn watch_in_range(&self, start: NaiveDate, end: NaiveDate) -> LiveQuery<Vec<HealthStats>> {
        self.db.subscribe(&[Table::HealthStats], move |db| {
            Box::pin(async move { db.health_stats().in_range(start, end).await })
        })
    }
}

/// Nightly sleep records.
#[derive(Debug, Clone, Copy)]
pub struct SleepRepo<'a> {
    pub(crate) db: &'a MentraDb,
}

impl SleepRepo<'_> {
    /// Insert (or replace by id). Returns the stored id.
    pub async fn insert(&self, sleep: &SleepData) -> DbResult<i64> {
        super::upsert_one(self.db, sleep, "insert").await
    }

    /// The most recently stored record for `date`, if any.
    pub async fn get_for_date(&self, date: NaiveDate) -> DbResult<Option<SleepData>> {
        mapper::fetch_optional(
            self.db,
            "get_for_date",
            "WHERE date = ? ORDER BY id DESC LIMIT 1",
            &[date.encode()],
        )
        .await
    }

    /// Latest `limit` nights, newest first.
    pub async fn recent(&self, limit: u32) -> DbResult<Vec<SleepData>> {
        mapper::fetch_all(
            self.db,
            "recent",
            "ORDER BY date DESC, id DESC LIMIT ?",
            &[i64::from(limit).encode()],
        )
        .await
    }

    pub async fn delete(&self, id: i64) -> DbResult<bool> {
        super::delete_one::<SleepData>(self.db, surrogate(id)).await
    }

    pub fn watch_recent(&self, limit: u32) -> LiveQuery<Vec<SleepData>> {
        self.db.subscribe(&[Table::SleepData], move |db| {
            Box::pin(async move { db.sleep().recent(limit).await })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn stats(date: NaiveDate, steps: i32) -> HealthStats {
        HealthStats {
            date,
            total_steps: steps,
            total_distance: f64::from(steps) * 0.7,
            total_calories: f64::from(steps) * 0.04,
            active_minutes: 30,
            walking_minutes: 20,
            running_minutes: 10,
            cycling_minutes: 0,
        }
    }

    #[tokio::test]
    async fn one_row_per_date() {
        let db = MentraDb::open_in_memory().await.unwrap();
        db.health_stats().upsert(&stats(day(1), 1_000)).await.unwrap();
        db.health_stats().upsert(&stats(day(1), 8_000)).await.unwrap();

        let recent = db.health_stats().recent(30).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].total_steps, 8_000);
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_range_oldest_first() {
        let db = MentraDb::open_in_memory().await.unwrap();
        for d in [3, 1, 2, 10] {
            db.health_stats().upsert(&stats(day(d), 500)).await.unwrap();
        }

        let recent: Vec<_> = db
            .health_stats()
            .recent(2)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.date)
            .collect();
        assert_eq!(recent, vec![day(10), day(3)]);

        let range: Vec<_> = db
            .health_stats()
            .in_range(day(1), day(3))
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.date)
            .collect();
        assert_eq!(range, vec![day(1), day(2), day(3)]);
    }

    #[tokio::test]
    async fn sleep_round_trip() {
        let db = MentraDb::open_in_memory().await.unwrap();
        let mut night = SleepData::new(day(4), 1_000, 28_801_000, 8);
        night.id = db.sleep().insert(&night).await.unwrap();

        assert_eq!(db.sleep().get_for_date(day(4)).await.unwrap(), Some(night.clone()));
        assert!(db.sleep().delete(night.id).await.unwrap());
        assert_eq!(db.sleep().get_for_date(day(4)).await.unwrap(), None);
    }
}
