//! Media library models.

use serde::{Deserialize, Serialize};

use super::ensure;
use crate::codec::{ColumnCodec, SqlValue};
use crate::error::DbResult;
use crate::mapper::{surrogate, Entity, RowReader};
use crate::schema::Table;

/// An audio or video file known to the library.
///
/// Keyed by a caller-supplied id (media store id or a path hash).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub duration_ms: i64,
    pub file_path: String,

    /// `audio/*` or `video/*`
    pub mime_type: String,

    pub size_bytes: i64,
    pub date_added: i64,
    pub date_modified: i64,
    pub album_art_path: Option<String>,

    /// Only ever incremented after insert
    pub play_count: i32,

    /// `None` until first play
    pub last_played: Option<i64>,

    pub is_favorite: bool,
}

impl Entity for MediaItem {
    const TABLE: Table = Table::MediaItems;
    const ENTITY: &'static str = "media item";

    fn key(&self) -> SqlValue {
        self.id.encode()
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.id.encode(),
            self.title.encode(),
            self.artist.encode(),
            self.album.encode(),
            self.genre.encode(),
            self.duration_ms.encode(),
            self.file_path.encode(),
            self.mime_type.encode(),
            self.size_bytes.encode(),
            self.date_added.encode(),
            self.date_modified.encode(),
            self.album_art_path.encode(),
            self.play_count.encode(),
            self.last_played.encode(),
            self.is_favorite.encode(),
        ]
    }

    fn from_row(row: &RowReader<'_>) -> DbResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            title: row.get("title")?,
            artist: row.get("artist")?,
            album: row.get("album")?,
            genre: row.get("genre")?,
            duration_ms: row.get("duration_ms")?,
            file_path: row.get("file_path")?,
            mime_type: row.get("mime_type")?,
            size_bytes: row.get("size_bytes")?,
            date_added: row.get("date_added")?,
            date_modified: row.get("date_modified")?,
            album_art_path: row.get("album_art_path")?,
            play_count: row.get("play_count")?,
            last_played: row.get("last_played")?,
            is_favorite: row.get("is_favorite")?,
        })
    }

    fn validate(&self) -> DbResult<()> {
        ensure::<Self>(!self.id.is_empty(), "id must not be empty")?;
        ensure::<Self>(self.play_count >= 0, "play count must be non-negative")?;
        ensure::<Self>(
            self.play_count > 0 || self.last_played.is_none(),
            "an unplayed item cannot have a last played time",
        )
    }
}

/// A user playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,

    /// Kept in step with the item count via
    /// [`PlaylistRepo::refresh_track_count`](crate::queries::PlaylistRepo::refresh_track_count)
    pub track_count: i32,

    pub cover_art_path: Option<String>,
}

impl Entity for Playlist {
    const TABLE: Table = Table::Playlists;
    const ENTITY: &'static str = "playlist";

    fn key(&self) -> SqlValue {
        surrogate(self.id)
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            surrogate(self.id),
            self.name.encode(),
            self.description.encode(),
            self.created_at.encode(),
            self.updated_at.encode(),
            self.track_count.encode(),
            self.cover_art_path.encode(),
        ]
    }

    fn from_row(row: &RowReader<'_>) -> DbResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            track_count: row.get("track_count")?,
            cover_art_path: row.get("cover_art_path")?,
        })
    }

    fn validate(&self) -> DbResult<()> {
        ensure::<Self>(self.track_count >= 0, "track count must be non-negative")
    }
}

/// Membership of a media item in a playlist at a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistItem {
    pub id: i64,
    pub playlist_id: i64,
    pub media_id: String,

    /// Unique within the playlist; defines play order
    pub position: i32,

    pub added_at: i64,
}

impl Entity for PlaylistItem {
    const TABLE: Table = Table::PlaylistItems;
    const ENTITY: &'static str = "playlist item";

    fn key(&self) -> SqlValue {
        surrogate(self.id)
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            surrogate(self.id),
            self.playlist_id.encode(),
            self.media_id.encode(),
            self.position.encode(),
            self.added_at.encode(),
        ]
    }

    fn from_row(row: &RowReader<'_>) -> DbResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            playlist_id: row.get("playlist_id")?,
            media_id: row.get("media_id")?,
            position: row.get("position")?,
            added_at: row.get("added_at")?,
        })
    }

    fn validate(&self) -> DbResult<()> {
        ensure::<Self>(self.position >= 0, "position must be non-negative")
    }
}
