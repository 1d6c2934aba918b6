//! Database models.
//!
//! Each struct is one row of one table. Column order and types come from
//! the schema registry; the [`Entity`](crate::mapper::Entity) impls here only
//! list values in that order and check domain invariants.

mod health;
mod media;
mod navigation;
mod profile;
mod shell;

pub use health::{ActivityRecord, ActivityType, HealthStats, SleepData};
pub use media::{MediaItem, Playlist, PlaylistItem};
pub use navigation::{Poi, RoutePoint, SavedRoute, MAX_POI_RATING};
pub use profile::{UserProfile, PROFILE_ID};
pub use shell::{ShellAlias, ShellHistory, ShellScript, ShellTrigger};

use crate::error::{DbError, DbResult};
use crate::mapper::Entity;

/// Reject a value of `E` that breaks an invariant.
fn ensure<E: Entity>(ok: bool, message: &str) -> DbResult<()> {
    if ok {
        Ok(())
    } else {
        Err(DbError::invalid_data(E::ENTITY, message))
    }
}
