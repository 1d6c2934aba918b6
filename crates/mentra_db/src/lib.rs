//! Mentra Database Layer
//!
//! Embedded SQLite persistence for the Mentra app: activity and health
//! tracking, saved routes and points of interest, the local media library,
//! and shell automation.
//!
//! # Architecture
//!
//! - **Schema registry** - every table declared once; drives creation, row
//!   mapping and a fingerprint checked on open
//! - **Single write gate** - one write transaction at a time; snapshot reads
//!   run concurrently with each other but never alongside a write
//! - **Table-driven mapper** - entities list their column values; SQL is
//!   generated per table
//! - **Live queries** - re-run automatically after any commit that writes a
//!   table they read
//!
//! # Usage
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use mentra_db::MentraDb;
//!
//! let db = MentraDb::open_path("/data/mentra/mentra.db").await?;
//! db.shell_aliases().upsert(&alias).await?;
//!
//! let mut aliases = db.shell_aliases().watch_all();
//! while let Some(snapshot) = aliases.next().await {
//!     render(snapshot?);
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod live;
pub mod mapper;
pub mod models;
pub mod queries;
pub mod schema;
pub mod statement;
pub mod transaction;

pub use config::{StoreConfig, StoreLocation};
pub use connection::MentraDb;
pub use error::{DbError, DbResult, OpContext};
pub use live::{LiveQuery, SubscriptionId, SubscriptionState};
pub use queries::DbStats;
pub use schema::{Table, TableSet, SCHEMA_VERSION};
pub use statement::StatementStats;
pub use transaction::WriteTx;

// Re-export key model types for convenience
pub use models::{
    ActivityRecord, ActivityType, HealthStats, MediaItem, Playlist, PlaylistItem, Poi, RoutePoint,
    SavedRoute, ShellAlias, ShellHistory, ShellScript, ShellTrigger, SleepData, UserProfile,
    PROFILE_ID,
};
