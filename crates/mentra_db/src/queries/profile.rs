//! User profile queries.

use crate::codec::ColumnCodec;
use crate::error::{DbError, DbResult};
use crate::live::LiveQuery;
use crate::mapper;
use crate::models::{UserProfile, PROFILE_ID};
use crate::schema::Table;
use crate::MentraDb;

/// The single profile row.
#[derive(Debug, Clone, Copy)]
pub struct ProfileRepo<'a> {
    pub(crate) db: &'a MentraDb,
}

impl ProfileRepo<'_> {
    /// Insert or replace the profile. Any id on `profile` is ignored.
    pub async fn save(&self, profile: &UserProfile) -> DbResult<()> {
        let profile = UserProfile {
            id: PROFILE_ID,
            ..profile.clone()
        };
        super::upsert_one(self.db, &profile, "save").await?;
        Ok(())
    }

    pub async fn get(&self) -> DbResult<Option<UserProfile>> {
        mapper::get(self.db, PROFILE_ID.encode()).await
    }

    /// Rewrite the stored profile. Fails with `NotFound` before the first
    /// [`save`](Self::save).
    pub async fn update(&self, profile: &UserProfile) -> DbResult<()> {
        let profile = UserProfile {
            id: PROFILE_ID,
            ..profile.clone()
        };
        self.db
            .transaction(move |tx| {
                Box::pin(async move {
                    if mapper::update(tx, &profile, "update").await? {
                        Ok(())
                    } else {
                        Err(DbError::not_found("user profile", PROFILE_ID))
                    }
                })
            })
            .await
    }

    pub fn watch(&self) -> LiveQuery<Option<UserProfile>> {
        self.db.subscribe(&[Table::UserProfile], |db| {
            Box::pin(async move { db.profile().get().await })
        })
    }
}
