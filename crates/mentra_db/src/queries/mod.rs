//! Typed repositories.
//!
//! Organized by domain:
//! - `activity`: Activity records
//! - `health`: Daily health stats and sleep
//! - `navigation`: Saved routes, route points, points of interest
//! - `media`: Media library, playlists and playlist items
//! - `shell`: Shell history, aliases, scripts and triggers
//! - `profile`: The user profile singleton
//! - `stats`: Row counts for diagnostics
//!
//! Every write runs inside [`MentraDb::transaction`]; every `watch_*`
//! method returns a [`LiveQuery`](crate::live::LiveQuery) over the same
//! read its snapshot counterpart performs.

mod activity;
mod health;
mod media;
mod navigation;
mod profile;
mod shell;
mod stats;

pub use activity::ActivityRepo;
pub use health::{HealthStatsRepo, SleepRepo};
pub use media::{MediaRepo, PlaylistItemRepo, PlaylistRepo};
pub use navigation::{PoiRepo, RoutePointRepo, RouteRepo};
pub use profile::ProfileRepo;
pub use shell::{ShellAliasRepo, ShellHistoryRepo, ShellScriptRepo, ShellTriggerRepo};
pub use stats::DbStats;

use crate::codec::SqlValue;
use crate::error::{DbResult, OpContext};
use crate::mapper::{self, Entity};
use crate::MentraDb;

impl MentraDb {
    pub fn activities(&self) -> ActivityRepo<'_> {
        ActivityRepo { db: self }
    }

    pub fn health_stats(&self) -> HealthStatsRepo<'_> {
        HealthStatsRepo { db: self }
    }

    pub fn sleep(&self) -> SleepRepo<'_> {
        SleepRepo { db: self }
    }

    pub fn routes(&self) -> RouteRepo<'_> {
        RouteRepo { db: self }
    }

    pub fn route_points(&self) -> RoutePointRepo<'_> {
        RoutePointRepo { db: self }
    }

    pub fn pois(&self) -> PoiRepo<'_> {
        PoiRepo { db: self }
    }

    pub fn media(&self) -> MediaRepo<'_> {
        MediaRepo { db: self }
    }

    pub fn playlists(&self) -> PlaylistRepo<'_> {
        PlaylistRepo { db: self }
    }

    pub fn playlist_items(&self) -> PlaylistItemRepo<'_> {
        PlaylistItemRepo { db: self }
    }

    pub fn shell_history(&self) -> ShellHistoryRepo<'_> {
        ShellHistoryRepo { db: self }
    }

    pub fn shell_aliases(&self) -> ShellAliasRepo<'_> {
        ShellAliasRepo { db: self }
    }

    pub fn shell_scripts(&self) -> ShellScriptRepo<'_> {
        ShellScriptRepo { db: self }
    }

    pub fn shell_triggers(&self) -> ShellTriggerRepo<'_> {
        ShellTriggerRepo { db: self }
    }

    pub fn profile(&self) -> ProfileRepo<'_> {
        ProfileRepo { db: self }
    }
}

/// Insert or replace one row in its own transaction.
async fn upsert_one<E: Entity + Clone>(
    db: &MentraDb,
    entity: &E,
    operation: &'static str,
) -> DbResult<i64> {
    let entity = entity.clone();
    db.transaction(move |tx| Box::pin(async move { mapper::upsert(tx, &entity, operation).await }))
        .await
}

/// Insert or replace every row atomically: all land or none do.
async fn upsert_all<E: Entity + Clone>(
    db: &MentraDb,
    entities: &[E],
    operation: &'static str,
) -> DbResult<()> {
    let entities = entities.to_vec();
    db.transaction(move |tx| {
        Box::pin(async move {
            for entity in &entities {
                mapper::upsert(tx, entity, operation).await?;
            }
            Ok(())
        })
    })
    .await
}

/// Run one targeted statement in its own transaction. Returns rows affected.
async fn execute_one(
    db: &MentraDb,
    ctx: OpContext,
    sql: &'static str,
    params: Vec<SqlValue>,
) -> DbResult<u64> {
    db.transaction(move |tx| {
        Box::pin(async move { Ok(tx.execute(&ctx, sql, &params).await?.rows_affected()) })
    })
    .await
}

/// Delete one row by primary key in its own transaction.
async fn delete_one<E: Entity>(db: &MentraDb, key: SqlValue) -> DbResult<bool> {
    db.transaction(move |tx| {
        Box::pin(async move { mapper::delete_by_key(tx, E::TABLE, key, "delete").await })
    })
    .await
}
