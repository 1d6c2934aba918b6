//! Media library, playlist and playlist item queries.

use std::collections::HashSet;

use crate::codec::{ColumnCodec, SqlValue};
use crate::error::{DbError, DbResult, OpContext};
use crate::live::LiveQuery;
use crate::mapper::{self, surrogate};
use crate::models::{MediaItem, Playlist, PlaylistItem};
use crate::schema::Table;
use crate::transaction::WriteTx;
use crate::MentraDb;

const TITLE_ORDER: &str = "ORDER BY title ASC, id ASC";

// ============================================================================
// Media items
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct MediaRepo<'a> {
    pub(crate) db: &'a MentraDb,
}

impl MediaRepo<'_> {
    /// Insert or replace by media id.
    pub async fn upsert(&self, item: &MediaItem) -> DbResult<()> {
        super::upsert_one(self.db, item, "upsert").await?;
        Ok(())
    }

    /// Insert or replace a batch atomically (library scans).
    pub async fn upsert_many(&self, items: &[MediaItem]) -> DbResult<()> {
        super::upsert_all(self.db, items, "upsert_many").await
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<MediaItem>> {
        mapper::get(self.db, id.to_string().encode()).await
    }

    /// Whole library by title.
    pub async fn all(&self) -> DbResult<Vec<MediaItem>> {
        mapper::fetch_all(self.db, "all", TITLE_ORDER, &[]).await
    }

    pub async fn audio(&self) -> DbResult<Vec<MediaItem>> {
        self.where_ordered("audio", "WHERE mime_type LIKE 'audio/%'", &[])
            .await
    }

    pub async fn video(&self) -> DbResult<Vec<MediaItem>> {
        self.where_ordered("video", "WHERE mime_type LIKE 'video/%'", &[])
            .await
    }

    pub async fn favorites(&self) -> DbResult<Vec<MediaItem>> {
        self.where_ordered("favorites", "WHERE is_favorite = 1", &[])
            .await
    }

    pub async fn by_artist(&self, artist: &str) -> DbResult<Vec<MediaItem>> {
        self.where_ordered("by_artist", "WHERE artist = ?", &[artist.to_string().encode()])
            .await
    }

    pub async fn by_album(&self, album: &str) -> DbResult<Vec<MediaItem>> {
        self.where_ordered("by_album", "WHERE album = ?", &[album.to_string().encode()])
            .await
    }

    /// Items whose title, artist or album contains `query`.
    pub async fn search(&self, query: &str) -> DbResult<Vec<MediaItem>> {
        let q = query.to_string().encode();
        self.where_ordered(
            "search",
            "WHERE title LIKE '%' || ? || '%' \
             OR artist LIKE '%' || ? || '%' \
             OR album LIKE '%' || ? || '%'",
            &[q.clone(), q.clone(), q],
        )
        .await
    }

    async fn where_ordered(
        &self,
        operation: &'static str,
        filter: &str,
        params: &[SqlValue],
    ) -> DbResult<Vec<MediaItem>> {
        mapper::fetch_all(self.db, operation, &format!("{filter} {TITLE_ORDER}"), params).await
    }

    /// Count one play at `timestamp`. Concurrent calls are serialized, so N
    /// increments always add N. Returns false if no such item.
    pub async fn increment_play_count(&self, id: &str, timestamp: i64) -> DbResult<bool> {
        let affected = super::execute_one(
            self.db,
            OpContext::new(Table::MediaItems, "increment_play_count").with_key(id),
            "UPDATE media_items SET play_count = play_count + 1, last_played = ? WHERE id = ?",
            vec![timestamp.encode(), id.to_string().encode()],
        )
        .await?;
        Ok(affected > 0)
    }

    pub async fn set_favorite(&self, id: &str, favorite: bool) -> DbResult<bool> {
        let affected = super::execute_one(
            self.db,
            OpContext::new(Table::MediaItems, "set_favorite").with_key(id),
            "UPDATE media_items SET is_favorite = ? WHERE id = ?",
            vec![favorite.encode(), id.to_string().encode()],
        )
        .await?;
        Ok(affected > 0)
    }

    pub async fn delete(&self, id: &str) -> DbResult<bool> {
        super::delete_one::<MediaItem>(self.db, id.to_string().encode()).await
    }

    /// Empty the library. Playlist items referring to removed media stay.
    pub async fn delete_all(&self) -> DbResult<u64> {
        super::execute_one(
            self.db,
            OpContext::new(Table::MediaItems, "delete_all"),
            &mapper::sql(Table::MediaItems).truncate,
            Vec::new(),
        )
        .await
    }

    pub fn watch_all(&self) -> LiveQuery<Vec<MediaItem>> {
        self.db.subscribe(&[Table::MediaItems], |db| {
            Box::pin(async move { db.media().all().await })
        })
    }

    pub fn watch_search(&self, query: &str) -> LiveQuery<Vec<MediaItem>> {
        let query = query.to_string();
        self.db.subscribe(&[Table::MediaItems], move |db| {
            let query = query.clone();
            Box::pin(async move { db.media().search(&query).await })
        })
    }
}

// ============================================================================
// Playlists
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct PlaylistRepo<'a> {
    pub(crate) db: &'a MentraDb,
}

impl PlaylistRepo<'_> {
    /// Insert (or replace by id). Returns the stored id.
    pub async fn insert(&self, playlist: &Playlist) -> DbResult<i64> {
        super::upsert_one(self.db, playlist, "insert").await
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<Playlist>> {
        mapper::get(self.db, surrogate(id)).await
    }

    pub async fn all(&self) -> DbResult<Vec<Playlist>> {
        mapper::fetch_all(self.db, "all", "ORDER BY name ASC, id ASC", &[]).await
    }

    /// Rewrite an existing playlist. Fails with `NotFound` if absent.
    pub async fn update(&self, playlist: &Playlist) -> DbResult<()> {
        let playlist = playlist.clone();
        self.db
            .transaction(move |tx| {
                Box::pin(async move {
                    if mapper::update(tx, &playlist, "update").await? {
                        Ok(())
                    } else {
                        Err(DbError::not_found("playlist", playlist.id))
                    }
                })
            })
            .await
    }

    /// Delete a playlist and its items.
    pub async fn delete(&self, id: i64) -> DbResult<bool> {
        self.db
            .transaction(move |tx| {
                Box::pin(async move {
                    clear_items(tx, id, "delete_playlist").await?;
                    mapper::delete_by_key(tx, Table::Playlists, surrogate(id), "delete").await
                })
            })
            .await
    }

    /// Set `track_count` from the stored items and return it.
    pub async fn refresh_track_count(&self, id: i64) -> DbResult<i32> {
        self.db
            .transaction(move |tx| {
                Box::pin(async move {
                    let ctx = OpContext::new(Table::Playlists, "refresh_track_count").with_key(id);
                    let count = tx
                        .fetch_i64(
                            &ctx,
                            "SELECT COUNT(*) FROM playlist_items WHERE playlist_id = ?",
                            &[id.encode()],
                        )
                        .await?
                        .unwrap_or(0);
                    let count = i32::try_from(count).map_err(|_| {
                        DbError::invalid_data("playlist", format!("{count} items overflow track count"))
                    })?;
                    let result = tx
                        .execute(
                            &ctx,
                            "UPDATE playlists SET track_count = ? WHERE id = ?",
                            &[count.encode(), id.encode()],
                        )
                        .await?;
                    if result.rows_affected() == 0 {
                        return Err(DbError::not_found("playlist", id));
                    }
                    Ok(count)
                })
            })
            .await
    }

    pub fn watch_all(&self) -> LiveQuery<Vec<Playlist>> {
        self.db.subscribe(&[Table::Playlists], |db| {
            Box::pin(async move { db.playlists().all().await })
        })
    }
}

// ============================================================================
// Playlist items
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct PlaylistItemRepo<'a> {
    pub(crate) db: &'a MentraDb,
}

impl PlaylistItemRepo<'_> {
    /// Insert one item. Its position must be free in the playlist.
    pub async fn insert(&self, item: &PlaylistItem) -> DbResult<i64> {
        let item = item.clone();
        self.db
            .transaction(move |tx| Box::pin(async move { insert_item(tx, &item, "insert").await }))
            .await
    }

    /// Insert a batch atomically. Positions must be unique per playlist,
    /// both within the batch and against stored items.
    pub async fn insert_many(&self, items: &[PlaylistItem]) -> DbResult<()> {
        let items = items.to_vec();
        self.db
            .transaction(move |tx| {
                Box::pin(async move {
                    let mut seen = HashSet::new();
                    for item in &items {
                        if !seen.insert((item.playlist_id, item.position)) {
                            let ctx = OpContext::new(Table::PlaylistItems, "insert_many")
                                .with_key(item.playlist_id);
                            return Err(DbError::constraint(
                                &ctx,
                                format!("position {} repeated in batch", item.position),
                            ));
                        }
                        insert_item(tx, item, "insert_many").await?;
                    }
                    Ok(())
                })
            })
            .await
    }

    /// Add `media_id` after the last item of the playlist.
    pub async fn append(
        &self,
        playlist_id: i64,
        media_id: &str,
        added_at: i64,
    ) -> DbResult<PlaylistItem> {
        let media_id = media_id.to_string();
        self.db
            .transaction(move |tx| {
                Box::pin(async move {
                    let ctx = OpContext::new(Table::PlaylistItems, "append").with_key(playlist_id);
                    let next = tx
                        .fetch_i64(
                            &ctx,
                            "SELECT MAX(position) + 1 FROM playlist_items WHERE playlist_id = ?",
                            &[playlist_id.encode()],
                        )
                        .await?
                        .unwrap_or(0);
                    let mut item = PlaylistItem {
                        id: 0,
                        playlist_id,
                        media_id,
                        position: i32::try_from(next).map_err(|_| {
                            DbError::invalid_data("playlist item", "position overflow")
                        })?,
                        added_at,
                    };
                    item.id = mapper::upsert(tx, &item, "append").await?;
                    Ok(item)
                })
            })
            .await
    }

    /// Items of `playlist_id` in play order.
    pub async fn for_playlist(&self, playlist_id: i64) -> DbResult<Vec<PlaylistItem>> {
        mapper::fetch_all(
            self.db,
            "for_playlist",
            "WHERE playlist_id = ? ORDER BY position ASC",
            &[playlist_id.encode()],
        )
        .await
    }

    /// Remove `media_id` from the playlist. Returns how many rows went.
    pub async fn remove(&self, playlist_id: i64, media_id: &str) -> DbResult<u64> {
        super::execute_one(
            self.db,
            OpContext::new(Table::PlaylistItems, "remove").with_key(playlist_id),
            "DELETE FROM playlist_items WHERE playlist_id = ? AND media_id = ?",
            vec![playlist_id.encode(), media_id.to_string().encode()],
        )
        .await
    }

    /// Remove every item of the playlist.
    pub async fn clear(&self, playlist_id: i64) -> DbResult<u64> {
        self.db
            .transaction(move |tx| Box::pin(async move { clear_items(tx, playlist_id, "clear").await }))
            .await
    }

    pub fn watch_for_playlist(&self, playlist_id: i64) -> LiveQuery<Vec<PlaylistItem>> {
        self.db.subscribe(&[Table::PlaylistItems], move |db| {
            Box::pin(async move { db.playlist_items().for_playlist(playlist_id).await })
        })
    }
}

async fn insert_item(tx: &mut WriteTx, item: &PlaylistItem, operation: &'static str) -> DbResult<i64> {
    let ctx = OpContext::new(Table::PlaylistItems, operation).with_key(item.playlist_id);
    let taken = tx
        .fetch_i64(
            &ctx,
            "SELECT COUNT(*) FROM playlist_items WHERE playlist_id = ? AND position = ? AND id IS NOT ?",
            &[
                item.playlist_id.encode(),
                item.position.encode(),
                surrogate(item.id),
            ],
        )
        .await?
        .unwrap_or(0);
    if taken > 0 {
        return Err(DbError::constraint(
            &ctx,
            format!("position {} already taken", item.position),
        ));
    }
    mapper::upsert(tx, item, operation).await
}

async fn clear_items(tx: &mut WriteTx, playlist_id: i64, operation: &'static str) -> DbResult<u64> {
    let ctx = OpContext::new(Table::PlaylistItems, operation).with_key(playlist_id);
    let result = tx
        .execute(
            &ctx,
            "DELETE FROM playlist_items WHERE playlist_id = ?",
            &[playlist_id.encode()],
        )
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn track(id: &str, title: &str, artist: Option<&str>, mime: &str) -> MediaItem {
        MediaItem {
            id: id.to_string(),
            title: title.to_string(),
            artist: artist.map(str::to_string),
            album: None,
            genre: None,
            duration_ms: 180_000,
            file_path: format!("/music/{id}"),
            mime_type: mime.to_string(),
            size_bytes: 4_096,
            date_added: 1,
            date_modified: 1,
            album_art_path: None,
            play_count: 0,
            last_played: None,
            is_favorite: false,
        }
    }

    #[tokio::test]
    async fn search_matches_any_text_column() {
        let db = MentraDb::open_in_memory().await.unwrap();
        db.media()
            .upsert_many(&[
                track("1", "Blue Monday", Some("New Order"), "audio/mpeg"),
                track("2", "Holiday", Some("Blue Lagoon"), "audio/mpeg"),
                track("3", "Intro", None, "video/mp4"),
            ])
            .await
            .unwrap();

        let titles: Vec<String> = db
            .media()
            .search("Blue")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.title)
            .collect();
        assert_eq!(titles, vec!["Blue Monday".to_string(), "Holiday".to_string()]);

        assert_eq!(db.media().video().await.unwrap().len(), 1);
        assert_eq!(db.media().audio().await.unwrap().len(), 2);
        assert_eq!(db.media().by_artist("New Order").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn play_count_sets_last_played() {
        let db = MentraDb::open_in_memory().await.unwrap();
        db.media()
            .upsert(&track("a", "A", None, "audio/ogg"))
            .await
            .unwrap();

        assert!(db.media().increment_play_count("a", 777).await.unwrap());
        assert!(!db.media().increment_play_count("missing", 777).await.unwrap());

        let item = db.media().get("a").await.unwrap().unwrap();
        assert_eq!(item.play_count, 1);
        assert_eq!(item.last_played, Some(777));
    }

    #[tokio::test]
    async fn positions_are_unique_per_playlist() {
        let db = MentraDb::open_in_memory().await.unwrap();
        let item = |playlist_id, position| PlaylistItem {
            id: 0,
            playlist_id,
            media_id: "m".to_string(),
            position,
            added_at: 0,
        };
        db.playlist_items().insert(&item(1, 0)).await.unwrap();
        db.playlist_items().insert(&item(2, 0)).await.unwrap();

        let err = db.playlist_items().insert(&item(1, 0)).await.unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation { .. }));

        let err = db
            .playlist_items()
            .insert_many(&[item(3, 0), item(3, 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation { .. }));
        assert!(db.playlist_items().for_playlist(3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_and_track_count() {
        let db = MentraDb::open_in_memory().await.unwrap();
        let id = db
            .playlists()
            .insert(&Playlist {
                id: 0,
                name: "Road trip".into(),
                description: None,
                created_at: 1,
                updated_at: 1,
                track_count: 0,
                cover_art_path: None,
            })
            .await
            .unwrap();

        let first = db.playlist_items().append(id, "x", 10).await.unwrap();
        let second = db.playlist_items().append(id, "y", 11).await.unwrap();
        assert_eq!((first.position, second.position), (0, 1));

        assert_eq!(db.playlists().refresh_track_count(id).await.unwrap(), 2);
        assert_eq!(db.playlists().get(id).await.unwrap().unwrap().track_count, 2);

        assert_eq!(db.playlist_items().remove(id, "x").await.unwrap(), 1);
        let left: Vec<String> = db
            .playlist_items()
            .for_playlist(id)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.media_id)
            .collect();
        assert_eq!(left, vec!["y".to_string()]);

        assert!(db.playlists().delete(id).await.unwrap());
        assert!(db.playlist_items().for_playlist(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_missing_playlist_is_not_found() {
        let db = MentraDb::open_in_memory().await.unwrap();
        let ghost = Playlist {
            id: 99,
            name: "ghost".into(),
            description: None,
            created_at: 0,
            updated_at: 0,
            track_count: 0,
            cover_art_path: None,
        };
        let err = db.playlists().update(&ghost).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
