//! Saved routes, their points, and points of interest.

use serde::{Deserialize, Serialize};

use super::ensure;
use crate::codec::{ColumnCodec, SqlValue};
use crate::error::DbResult;
use crate::mapper::{surrogate, Entity, RowReader};
use crate::schema::Table;

/// A named route between two coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedRoute {
    pub id: i64,
    pub name: String,
    pub start_latitude: f64,
    pub start_longitude: f64,
    pub end_latitude: f64,
    pub end_longitude: f64,

    /// Meters
    pub distance: f64,

    pub estimated_time_ms: i64,
    pub created_at: i64,

    /// Never earlier than `created_at`
    pub last_used: i64,
}

impl Entity for SavedRoute {
    const TABLE: Table = Table::SavedRoutes;
    const ENTITY: &'static str = "saved route";

    fn key(&self) -> SqlValue {
        surrogate(self.id)
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            surrogate(self.id),
            self.name.encode(),
            self.start_latitude.encode(),
            self.start_longitude.encode(),
            self.end_latitude.encode(),
            self.end_longitude.encode(),
            self.distance.encode(),
            self.estimated_time_ms.encode(),
            self.created_at.encode(),
            self.last_used.encode(),
        ]
    }

    fn from_row(row: &RowReader<'_>) -> DbResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            start_latitude: row.get("start_latitude")?,
            start_longitude: row.get("start_longitude")?,
            end_latitude: row.get("end_latitude")?,
            end_longitude: row.get("end_longitude")?,
            distance: row.get("distance")?,
            estimated_time_ms: row.get("estimated_time_ms")?,
            created_at: row.get("created_at")?,
            last_used: row.get("last_used")?,
        })
    }

    fn validate(&self) -> DbResult<()> {
        ensure::<Self>(self.distance >= 0.0, "distance must be non-negative")?;
        ensure::<Self>(
            self.last_used >= self.created_at,
            "last_used cannot precede created_at",
        )
    }
}

/// Waypoint on a [`SavedRoute`]. Owned by the route: deleting the route
/// deletes its points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub id: i64,
    pub route_id: i64,
    pub latitude: f64,
    pub longitude: f64,

    /// Strictly increasing along the route
    pub sequence: i32,

    /// Turn-by-turn text, if any
    pub instruction: Option<String>,
}

impl Entity for RoutePoint {
    const TABLE: Table = Table::RoutePoints;
    const ENTITY: &'static str = "route point";

    fn key(&self) -> SqlValue {
        surrogate(self.id)
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            surrogate(self.id),
            self.route_id.encode(),
            self.latitude.encode(),
            self.longitude.encode(),
            self.sequence.encode(),
            self.instruction.encode(),
        ]
    }

    fn from_row(row: &RowReader<'_>) -> DbResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            route_id: row.get("route_id")?,
            latitude: row.get("latitude")?,
            longitude: row.get("longitude")?,
            sequence: row.get("sequence")?,
            instruction: row.get("instruction")?,
        })
    }
}

/// Highest rating a point of interest may carry.
pub const MAX_POI_RATING: f32 = 5.0;

/// Point of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poi {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,

    /// `0.0..=MAX_POI_RATING` when present
    pub rating: Option<f32>,

    pub is_favorite: bool,
}

impl Entity for Poi {
    const TABLE: Table = Table::Poi;
    const ENTITY: &'static str = "point of interest";

    fn key(&self) -> SqlValue {
        surrogate(self.id)
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            surrogate(self.id),
            self.name.encode(),
            self.category.encode(),
            self.latitude.encode(),
            self.longitude.encode(),
            self.address.encode(),
            self.rating.encode(),
            self.is_favorite.encode(),
        ]
    }

    fn from_row(row: &RowReader<'_>) -> DbResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            category: row.get("category")?,
            latitude: row.get("latitude")?,
            longitude: row.get("longitude")?,
            address: row.get("address")?,
            rating: row.get("rating")?,
            is_favorite: row.get("is_favorite")?,
        })
    }

    fn validate(&self) -> DbResult<()> {
        ensure::<Self>(
            self.rating
                .map_or(true, |r| (0.0..=MAX_POI_RATING).contains(&r)),
            "rating must be within [0, 5]",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_last_used_cannot_precede_creation() {
        let route = SavedRoute {
            id: 0,
            name: "commute".into(),
            start_latitude: 52.37,
            start_longitude: 4.89,
            end_latitude: 52.09,
            end_longitude: 5.12,
            distance: 41_000.0,
            estimated_time_ms: 2_400_000,
            created_at: 100,
            last_used: 99,
        };
        assert!(route.validate().is_err());
        assert!(SavedRoute { last_used: 100, ..route }.validate().is_ok());
    }

    #[test]
    fn poi_rating_is_optional_but_bounded() {
        let poi = Poi {
            id: 0,
            name: "Cafe".into(),
            category: "food".into(),
            latitude: 0.0,
            longitude: 0.0,
            address: None,
            rating: None,
            is_favorite: false,
        };
        assert!(poi.validate().is_ok());
        assert!(Poi { rating: Some(4.5), ..poi.clone() }.validate().is_ok());
        assert!(Poi { rating: Some(5.5), ..poi }.validate().is_err());
    }
}
