//! Activity, daily health and sleep models.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::ensure;
use crate::codec::{decode_named, encode_named, ColumnCodec, NamedEnum, SqlValue};
use crate::error::{DbError, DbResult};
use crate::mapper::{surrogate, Entity, RowReader};
use crate::schema::Table;

/// Detected physical activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
    Still,
    Walking,
    Running,
    Cycling,
    Driving,
    Unknown,
}

impl NamedEnum for ActivityType {
    const NAMES: &'static [(Self, &'static str)] = &[
        (Self::Still, "STILL"),
        (Self::Walking, "WALKING"),
        (Self::Running, "RUNNING"),
        (Self::Cycling, "CYCLING"),
        (Self::Driving, "DRIVING"),
        (Self::Unknown, "UNKNOWN"),
    ];
    const TYPE_NAME: &'static str = "activity type";
}

impl ColumnCodec for ActivityType {
    fn encode(&self) -> SqlValue {
        encode_named(*self)
    }

    fn decode(value: &SqlValue) -> Result<Self, String> {
        decode_named(value)
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A span of detected activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// 0 until stored
    pub id: i64,

    /// Epoch milliseconds
    pub timestamp: i64,

    pub activity_type: ActivityType,
    pub steps: i32,

    /// Meters
    pub distance: f64,

    pub calories: f64,
    pub duration_ms: i64,

    /// Classifier confidence in `[0, 1]`
    pub confidence: f32,
}

impl Entity for ActivityRecord {
    const TABLE: Table = Table::ActivityRecords;
    const ENTITY: &'static str = "activity record";

    fn key(&self) -> SqlValue {
        surrogate(self.id)
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            surrogate(self.id),
            self.timestamp.encode(),
            self.activity_type.encode(),
            self.steps.encode(),
            self.distance.encode(),
            self.calories.encode(),
            self.duration_ms.encode(),
            self.confidence.encode(),
        ]
    }

    fn from_row(row: &RowReader<'_>) -> DbResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            timestamp: row.get("timestamp")?,
            activity_type: row.get("activity_type")?,
            steps: row.get("steps")?,
            distance: row.get("distance")?,
            calories: row.get("calories")?,
            duration_ms: row.get("duration_ms")?,
            confidence: row.get("confidence")?,
        })
    }

    fn validate(&self) -> DbResult<()> {
        ensure::<Self>(self.steps >= 0, "steps must be non-negative")?;
        ensure::<Self>(self.distance >= 0.0, "distance must be non-negative")?;
        ensure::<Self>(self.calories >= 0.0, "calories must be non-negative")?;
        ensure::<Self>(self.duration_ms >= 0, "duration must be non-negative")?;
        ensure::<Self>(
            (0.0..=1.0).contains(&self.confidence),
            "confidence must be within [0, 1]",
        )
    }
}

/// Aggregates for one calendar day. Keyed by date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStats {
    pub date: NaiveDate,
    pub total_steps: i32,
    pub total_distance: f64,
    pub total_calories: f64,
    pub active_minutes: i32,
    pub walking_minutes: i32,
    pub running_minutes: i32,
    pub cycling_minutes: i32,
}

impl Entity for HealthStats {
    const TABLE: Table = Table::HealthStats;
    const ENTITY: &'static str = "health stats";

    fn key(&self) -> SqlValue {
        self.date.encode()
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.date.encode(),
            self.total_steps.encode(),
            self.total_distance.encode(),
            self.total_calories.encode(),
            self.active_minutes.encode(),
            self.walking_minutes.encode(),
            self.running_minutes.encode(),
            self.cycling_minutes.encode(),
        ]
    }

    fn from_row(row: &RowReader<'_>) -> DbResult<Self> {
        Ok(Self {
            date: row.get("date")?,
            total_steps: row.get("total_steps")?,
            total_distance: row.get("total_distance")?,
            total_calories: row.get("total_calories")?,
            active_minutes: row.get("active_minutes")?,
            walking_minutes: row.get("walking_minutes")?,
            running_minutes: row.get("running_minutes")?,
            cycling_minutes: row.get("cycling_minutes")?,
        })
    }

    fn validate(&self) -> DbResult<()> {
        let counts = [
            self.total_steps,
            self.active_minutes,
            self.walking_minutes,
            self.running_minutes,
            self.cycling_minutes,
        ];
        ensure::<Self>(
            counts.iter().all(|c| *c >= 0)
                && self.total_distance >= 0.0
                && self.total_calories >= 0.0,
            "aggregates must be non-negative",
        )
    }
}

/// One night of sleep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepData {
    pub id: i64,
    pub date: NaiveDate,
    pub sleep_start: i64,
    pub sleep_end: i64,

    /// Always `sleep_end - sleep_start`; see [`SleepData::new`]
    pub duration_ms: i64,

    /// 1 (poor) to 10 (excellent)
    pub quality: i32,
}

impl SleepData {
    /// Build a record with the duration derived from the interval. An
    /// interval too wide for `i64` saturates and fails validation.
    pub fn new(date: NaiveDate, sleep_start: i64, sleep_end: i64, quality: i32) -> Self {
        Self {
            id: 0,
            date,
            sleep_start,
            sleep_end,
            duration_ms: sleep_end.saturating_sub(sleep_start),
            quality,
        }
    }
}

impl Entity for SleepData {
    const TABLE: Table = Table::SleepData;
    const ENTITY: &'static str = "sleep data";

    fn key(&self) -> SqlValue {
        surrogate(self.id)
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            surrogate(self.id),
            self.date.encode(),
            self.sleep_start.encode(),
            self.sleep_end.encode(),
            self.duration_ms.encode(),
            self.quality.encode(),
        ]
    }

    fn from_row(row: &RowReader<'_>) -> DbResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            date: row.get("date")?,
            sleep_start: row.get("sleep_start")?,
            sleep_end: row.get("sleep_end")?,
            duration_ms: row.get("duration_ms")?,
            quality: row.get("quality")?,
        })
    }

    fn validate(&self) -> DbResult<()> {
        ensure::<Self>(
            self.sleep_end >= self.sleep_start,
            "sleep must end at or after it starts",
        )?;
        let interval = self
            .sleep_end
            .checked_sub(self.sleep_start)
            .ok_or_else(|| DbError::invalid_data(Self::ENTITY, "sleep interval overflows"))?;
        ensure::<Self>(
            self.duration_ms == interval,
            "duration must equal the sleep interval",
        )?;
        ensure::<Self>((1..=10).contains(&self.quality), "quality must be within 1..=10")
    }
}
