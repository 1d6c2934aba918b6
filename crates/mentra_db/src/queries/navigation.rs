//! Saved route, route point and point-of-interest queries.
//!
//! Points belong to routes by `route_id` only; the store does not enforce
//! the relation. Deleting a route through [`RouteRepo::delete`] removes its
//! points first, in the same transaction.

use std::collections::HashMap;

use crate::codec::ColumnCodec;
use crate::error::{DbError, DbResult, OpContext};
use crate::live::LiveQuery;
use crate::mapper::{self, surrogate};
use crate::models::{Poi, RoutePoint, SavedRoute};
use crate::schema::Table;
use crate::transaction::WriteTx;
use crate::MentraDb;

const DELETE_POINTS_FOR_ROUTE: &str = "DELETE FROM route_points WHERE route_id = ?";

// ============================================================================
// Saved routes
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct RouteRepo<'a> {
    pub(crate) db: &'a MentraDb,
}

impl RouteRepo<'_> {
    /// Insert (or replace by id). Returns the stored id.
    pub async fn insert(&self, route: &SavedRoute) -> DbResult<i64> {
        super::upsert_one(self.db, route, "insert").await
    }

    /// Insert a route and its points atomically. Each point's `route_id` is
    /// set to the new route's id.
    pub async fn insert_with_points(
        &self,
        route: &SavedRoute,
        points: &[RoutePoint],
    ) -> DbResult<i64> {
        let route = route.clone();
        let mut points = points.to_vec();
        self.db
            .transaction(move |tx| {
                Box::pin(async move {
                    let route_id = mapper::upsert(tx, &route, "insert_with_points").await?;
                    for point in &mut points {
                        point.route_id = route_id;
                    }
                    tx.transaction(move |tx| {
                        Box::pin(async move { insert_points(tx, &points, "insert_with_points").await })
                    })
                    .await?;
                    Ok(route_id)
                })
            })
            .await
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<SavedRoute>> {
        mapper::get(self.db, surrogate(id)).await
    }

    /// Every route, most recently used first.
    pub async fn all(&self) -> DbResult<Vec<SavedRoute>> {
        mapper::fetch_all(self.db, "all", "ORDER BY last_used DESC, id DESC", &[]).await
    }

    /// Set `last_used` without touching other columns. Returns false if the
    /// route does not exist or `timestamp` precedes its creation.
    pub async fn update_last_used(&self, id: i64, timestamp: i64) -> DbResult<bool> {
        let affected = super::execute_one(
            self.db,
            OpContext::new(Table::SavedRoutes, "update_last_used").with_key(id),
            "UPDATE saved_routes SET last_used = ? WHERE id = ? AND created_at <= ?",
            vec![timestamp.encode(), id.encode(), timestamp.encode()],
        )
        .await?;
        Ok(affected > 0)
    }

    /// Delete a route and all of its points.
    pub async fn delete(&self, id: i64) -> DbResult<bool> {
        self.db
            .transaction(move |tx| {
                Box::pin(async move {
                    let ctx = OpContext::new(Table::RoutePoints, "delete_route").with_key(id);
                    tx.execute(&ctx, DELETE_POINTS_FOR_ROUTE, &[id.encode()])
                        .await?;
                    mapper::delete_by_key(tx, Table::SavedRoutes, surrogate(id), "delete").await
                })
            })
            .await
    }

    pub fn watch_all(&self) -> LiveQuery<Vec<SavedRoute>> {
        self.db.subscribe(&[Table::SavedRoutes], |db| {
            Box::pin(async move { db.routes().all().await })
        })
    }
}

// ============================================================================
// Route points
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct RoutePointRepo<'a> {
    pub(crate) db: &'a MentraDb,
}

impl RoutePointRepo<'_> {
    /// Insert one point. Its sequence must not already exist on the route.
    pub async fn insert(&self, point: &RoutePoint) -> DbResult<i64> {
        let point = point.clone();
        self.db
            .transaction(move |tx| {
                Box::pin(async move {
                    check_sequence_free(tx, &point, "insert").await?;
                    mapper::upsert(tx, &point, "insert").await
                })
            })
            .await
    }

    /// Insert a batch atomically. Within each route the batch's sequences
    /// must be strictly increasing and must not collide with stored points.
    pub async fn insert_many(&self, points: &[RoutePoint]) -> DbResult<()> {
        let points = points.to_vec();
        self.db
            .transaction(move |tx| {
                Box::pin(async move { insert_points(tx, &points, "insert_many").await })
            })
            .await
    }

    /// Points of `route_id` in sequence order.
    pub async fn for_route(&self, route_id: i64) -> DbResult<Vec<RoutePoint>> {
        mapper::fetch_all(
            self.db,
            "for_route",
            "WHERE route_id = ? ORDER BY sequence ASC",
            &[route_id.encode()],
        )
        .await
    }

    /// Delete exactly the points of `route_id`. Returns how many went.
    pub async fn delete_for_route(&self, route_id: i64) -> DbResult<u64> {
        super::execute_one(
            self.db,
            OpContext::new(Table::RoutePoints, "delete_for_route").with_key(route_id),
            DELETE_POINTS_FOR_ROUTE,
            vec![route_id.encode()],
        )
        .await
    }
}

async fn check_sequence_free(
    tx: &mut WriteTx,
    point: &RoutePoint,
    operation: &'static str,
) -> DbResult<()> {
    let ctx = OpContext::new(Table::RoutePoints, operation).with_key(point.route_id);
    let taken = tx
        .fetch_i64(
            &ctx,
            "SELECT COUNT(*) FROM route_points WHERE route_id = ? AND sequence = ? AND id IS NOT ?",
            &[
                point.route_id.encode(),
                point.sequence.encode(),
                surrogate(point.id),
            ],
        )
        .await?
        .unwrap_or(0);
    if taken > 0 {
        return Err(DbError::constraint(
            &ctx,
            format!("sequence {} already exists on route", point.sequence),
        ));
    }
    Ok(())
}

async fn insert_points(
    tx: &mut WriteTx,
    points: &[RoutePoint],
    operation: &'static str,
) -> DbResult<()> {
    let mut last: HashMap<i64, i32> = HashMap::new();
    for point in points {
        if let Some(prev) = last.insert(point.route_id, point.sequence) {
            if point.sequence <= prev {
                return Err(DbError::invalid_data(
                    "route point",
                    format!(
                        "sequence {} does not follow {} on route {}",
                        point.sequence, prev, point.route_id
                    ),
                ));
            }
        }
    }
    for point in points {
        check_sequence_free(tx, point, operation).await?;
        mapper::upsert(tx, point, operation).await?;
    }
    Ok(())
}

// ============================================================================
// Points of interest
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct PoiRepo<'a> {
    pub(crate) db: &'a MentraDb,
}

impl PoiRepo<'_> {
    pub async fn insert(&self, poi: &Poi) -> DbResult<i64> {
        super::upsert_one(self.db, poi, "insert").await
    }

    pub async fn insert_many(&self, pois: &[Poi]) -> DbResult<()> {
        super::upsert_all(self.db, pois, "insert_many").await
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<Poi>> {
        mapper::get(self.db, surrogate(id)).await
    }

    pub async fn all(&self) -> DbResult<Vec<Poi>> {
        mapper::fetch_all(self.db, "all", "ORDER BY id ASC", &[]).await
    }

    pub async fn favorites(&self) -> DbResult<Vec<Poi>> {
        mapper::fetch_all(self.db, "favorites", "WHERE is_favorite = 1 ORDER BY id ASC", &[])
            .await
    }

    pub async fn by_category(&self, category: &str) -> DbResult<Vec<Poi>> {
        mapper::fetch_all(
            self.db,
            "by_category",
            "WHERE category = ? ORDER BY id ASC",
            &[category.to_string().encode()],
        )
        .await
    }

    /// Flip only the favorite flag. Returns false if no such POI.
    pub async fn set_favorite(&self, id: i64, favorite: bool) -> DbResult<bool> {
        let affected = super::execute_one(
            self.db,
            OpContext::new(Table::Poi, "set_favorite").with_key(id),
            "UPDATE poi SET is_favorite = ? WHERE id = ?",
            vec![favorite.encode(), id.encode()],
        )
        .await?;
        Ok(affected > 0)
    }

    pub async fn delete(&self, id: i64) -> DbResult<bool> {
        super::delete_one::<Poi>(self.db, surrogate(id)).await
    }

    pub fn watch_all(&self) -> LiveQuery<Vec<Poi>> {
        self.db
            .subscribe(&[Table::Poi], |db| Box::pin(async move { db.pois().all().await }))
    }

    pub fn watch_favorites(&self) -> LiveQuery<Vec<Poi>> {
        self.db.subscribe(&[Table::Poi], |db| {
            Box::pin(async move { db.pois().favorites().await })
        })
    }

    pub fn watch_by_category(&self, category: &str) -> LiveQuery<Vec<Poi>> {
        let category = category.to_string();
        self.db.subscribe(&[Table::Poi], move |db| {
            let category = category.clone();
            Box::pin(async move { db.pois().by_category(&category).await })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn route(name: &str) -> SavedRoute {
        SavedRoute {
            id: 0,
            name: name.to_string(),
            start_latitude: 48.85,
            start_longitude: 2.35,
            end_latitude: 48.86,
            end_longitude: 2.29,
            distance: 4_200.0,
            estimated_time_ms: 900_000,
            created_at: 1_000,
            last_used: 1_000,
        }
    }

    fn point(route_id: i64, sequence: i32) -> RoutePoint {
        RoutePoint {
            id: 0,
            route_id,
            latitude: 48.85,
            longitude: 2.35,
            sequence,
            instruction: None,
        }
    }

    #[tokio::test]
    async fn scoped_point_delete_leaves_other_routes() {
        let db = MentraDb::open_in_memory().await.unwrap();
        let a = db.routes().insert(&route("a")).await.unwrap();
        let b = db.routes().insert(&route("b")).await.unwrap();
        db.route_points()
            .insert_many(&[point(a, 1), point(a, 2), point(b, 1)])
            .await
            .unwrap();

        assert_eq!(db.route_points().delete_for_route(a).await.unwrap(), 2);
        assert!(db.route_points().for_route(a).await.unwrap().is_empty());
        assert_eq!(db.route_points().for_route(b).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn route_delete_cascades_to_points() {
        let db = MentraDb::open_in_memory().await.unwrap();
        let points = [point(0, 1), point(0, 2), point(0, 3)];
        let id = db
            .routes()
            .insert_with_points(&route("loop"), &points)
            .await
            .unwrap();
        assert_eq!(db.route_points().for_route(id).await.unwrap().len(), 3);

        assert!(db.routes().delete(id).await.unwrap());
        assert!(db.routes().get(id).await.unwrap().is_none());
        assert!(db.route_points().for_route(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sequences_must_increase_and_be_unique() {
        let db = MentraDb::open_in_memory().await.unwrap();
        let id = db.routes().insert(&route("r")).await.unwrap();

        let err = db
            .route_points()
            .insert_many(&[point(id, 2), point(id, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidData { .. }));

        db.route_points().insert(&point(id, 1)).await.unwrap();
        let err = db.route_points().insert(&point(id, 1)).await.unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation { .. }));
        assert_eq!(db.route_points().for_route(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn last_used_cannot_move_before_creation() {
        let db = MentraDb::open_in_memory().await.unwrap();
        let id = db.routes().insert(&route("r")).await.unwrap();

        assert!(db.routes().update_last_used(id, 5_000).await.unwrap());
        assert!(!db.routes().update_last_used(id, 10).await.unwrap());
        assert!(!db.routes().update_last_used(id + 1, 5_000).await.unwrap());
        assert_eq!(db.routes().get(id).await.unwrap().unwrap().last_used, 5_000);
    }

    #[tokio::test]
    async fn favorite_flag_is_targeted() {
        let db = MentraDb::open_in_memory().await.unwrap();
        let poi = Poi {
            id: 0,
            name: "Bakery".into(),
            category: "food".into(),
            latitude: 1.0,
            longitude: 2.0,
            address: Some("1 Main St".into()),
            rating: Some(4.5),
            is_favorite: false,
        };
        let id = db.pois().insert(&poi).await.unwrap();
        assert!(db.pois().set_favorite(id, true).await.unwrap());

        let favorites = db.pois().favorites().await.unwrap();
        assert_eq!(
            favorites,
            vec![Poi {
                id,
                is_favorite: true,
                ..poi
            }]
        );
        assert_eq!(db.pois().by_category("food").await.unwrap().len(), 1);
        assert!(db.pois().by_category("fuel").await.unwrap().is_empty());
    }
}
