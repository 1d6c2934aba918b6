//! The user profile singleton.

use serde::{Deserialize, Serialize};

use super::ensure;
use crate::codec::{ColumnCodec, SqlValue};
use crate::error::DbResult;
use crate::mapper::{Entity, RowReader};
use crate::schema::Table;

/// Key of the only profile row.
pub const PROFILE_ID: i64 = 1;

/// Personal settings. Exactly one row exists once saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    /// Always [`PROFILE_ID`]; the repository overwrites anything else
    pub id: i64,
    pub name: Option<String>,

    /// Centimeters
    pub height: Option<f64>,

    /// Kilograms
    pub weight: Option<f64>,

    pub age: Option<i32>,
    pub gender: Option<String>,
    pub daily_step_goal: i32,
    pub use_metric_system: bool,

    /// `SYSTEM`, `LIGHT` or `DARK`
    pub theme: String,

    pub language: String,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            id: PROFILE_ID,
            name: None,
            height: None,
            weight: None,
            age: None,
            gender: None,
            daily_step_goal: 10_000,
            use_metric_system: true,
            theme: "SYSTEM".to_string(),
            language: "en".to_string(),
        }
    }
}

impl Entity for UserProfile {
    const TABLE: Table = Table::UserProfile;
    const ENTITY: &'static str = "user profile";

    fn key(&self) -> SqlValue {
        self.id.encode()
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.id.encode(),
            self.name.encode(),
            self.height.encode(),
            self.weight.encode(),
            self.age.encode(),
            self.gender.encode(),
            self.daily_step_goal.encode(),
            self.use_metric_system.encode(),
            self.theme.encode(),
            self.language.encode(),
        ]
    }

    fn from_row(row: &RowReader<'_>) -> DbResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            height: row.get("height")?,
            weight: row.get("weight")?,
            age: row.get("age")?,
            gender: row.get("gender")?,
            daily_step_goal: row.get("daily_step_goal")?,
            use_metric_system: row.get("use_metric_system")?,
            theme: row.get("theme")?,
            language: row.get("language")?,
        })
    }

    fn validate(&self) -> DbResult<()> {
        ensure::<Self>(self.id == PROFILE_ID, "profile id must be the singleton id")?;
        ensure::<Self>(self.daily_step_goal >= 0, "step goal must be non-negative")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let profile: UserProfile = serde_json::from_str(r#"{ "name": "Ada" }"#).unwrap();
        assert_eq!(profile.id, PROFILE_ID);
        assert_eq!(profile.daily_step_goal, 10_000);
        assert_eq!(profile.theme, "SYSTEM");
        assert_eq!(profile.name.as_deref(), Some("Ada"));
    }
}
