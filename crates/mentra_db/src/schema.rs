//! Schema registry.
//!
//! Every table the store owns is declared here once. The declarations drive
//! table creation, the generic row mapper, and the schema fingerprint that
//! guards against opening a file written by a different schema.

use std::collections::BTreeSet;
use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::{DbError, DbResult};

/// Current schema version. No migrations exist yet.
pub const SCHEMA_VERSION: i64 = 1;

/// Reserved table holding `(schema_id, fingerprint_hash)`.
pub const FINGERPRINT_TABLE: &str = "schema_fingerprint";

/// Every table owned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    ActivityRecords,
    HealthStats,
    SleepData,
    SavedRoutes,
    RoutePoints,
    Poi,
    MediaItems,
    Playlists,
    PlaylistItems,
    ShellHistory,
    ShellAliases,
    ShellScripts,
    ShellTriggers,
    UserProfile,
}

impl Table {
    pub const ALL: [Table; 14] = [
        Table::ActivityRecords,
        Table::HealthStats,
        Table::SleepData,
        Table::SavedRoutes,
        Table::RoutePoints,
        Table::Poi,
        Table::MediaItems,
        Table::Playlists,
        Table::PlaylistItems,
        Table::ShellHistory,
        Table::ShellAliases,
        Table::ShellScripts,
        Table::ShellTriggers,
        Table::UserProfile,
    ];

    pub fn name(self) -> &'static str {
        self.def().name
    }

    pub fn def(self) -> &'static TableDef {
        match self {
            Table::ActivityRecords => &ACTIVITY_RECORDS,
            Table::HealthStats => &HEALTH_STATS,
            Table::SleepData => &SLEEP_DATA,
            Table::SavedRoutes => &SAVED_ROUTES,
            Table::RoutePoints => &ROUTE_POINTS,
            Table::Poi => &POI,
            Table::MediaItems => &MEDIA_ITEMS,
            Table::Playlists => &PLAYLISTS,
            Table::PlaylistItems => &PLAYLIST_ITEMS,
            Table::ShellHistory => &SHELL_HISTORY,
            Table::ShellAliases => &SHELL_ALIASES,
            Table::ShellScripts => &SHELL_SCRIPTS,
            Table::ShellTriggers => &SHELL_TRIGGERS,
            Table::UserProfile => &USER_PROFILE,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of tables touched by a transaction.
pub type TableSet = BTreeSet<Table>;

/// SQLite storage class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    pub fn sql(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
}

const fn col(name: &'static str, ty: ColumnType) -> ColumnDef {
    ColumnDef {
        name,
        ty,
        nullable: false,
    }
}

const fn opt(name: &'static str, ty: ColumnType) -> ColumnDef {
    ColumnDef {
        name,
        ty,
        nullable: true,
    }
}

/// Primary key strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryKey {
    /// Integer surrogate assigned by the store when the caller passes 0
    AutoIncrement(&'static str),
    /// Caller-supplied key (date string, alias name, media id, singleton id)
    Natural(&'static str),
}

impl PrimaryKey {
    pub fn column(self) -> &'static str {
        match self {
            PrimaryKey::AutoIncrement(c) | PrimaryKey::Natural(c) => c,
        }
    }
}

#[derive(Debug)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
    pub primary_key: PrimaryKey,
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    fn column_sql(&self, c: &ColumnDef) -> String {
        let mut sql = format!("{} {}", c.name, c.ty.sql());
        match self.primary_key {
            PrimaryKey::AutoIncrement(pk) if pk == c.name => {
                sql.push_str(" PRIMARY KEY AUTOINCREMENT NOT NULL")
            }
            _ if !c.nullable => sql.push_str(" NOT NULL"),
            _ => {}
        }
        sql
    }

    /// Idempotent `CREATE TABLE IF NOT EXISTS` statement.
    pub fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(|c| self.column_sql(c)).collect();
        if let PrimaryKey::Natural(pk) = self.primary_key {
            parts.push(format!("PRIMARY KEY({pk})"));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.name,
            parts.join(", ")
        )
    }

    /// Canonical text used for fingerprinting and diffs.
    fn canonical_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| describe_column(c.name, c.ty.sql(), !c.nullable || self.is_pk(c.name)))
            .collect()
    }

    fn is_pk(&self, column: &str) -> bool {
        self.primary_key.column() == column
    }
}

fn describe_column(name: &str, ty: &str, not_null: bool) -> String {
    if not_null {
        format!("{name} {ty} NOT NULL")
    } else {
        format!("{name} {ty}")
    }
}

use ColumnType::{Integer, Real, Text};

static ACTIVITY_RECORDS: TableDef = TableDef {
    name: "activity_records",
    columns: &[
        col("id", Integer),
        col("timestamp", Integer),
        col("activity_type", Text),
        col("steps", Integer),
        col("distance", Real),
        col("calories", Real),
        col("duration_ms", Integer),
        col("confidence", Real),
    ],
    primary_key: PrimaryKey::AutoIncrement("id"),
};

static HEALTH_STATS: TableDef = TableDef {
    name: "health_stats",
    columns: &[
        col("date", Text),
        col("total_steps", Integer),
        col("total_distance", Real),
        col("total_calories", Real),
        col("active_minutes", Integer),
        col("walking_minutes", Integer),
        col("running_minutes", Integer),
        col("cycling_minutes", Integer),
    ],
    primary_key: PrimaryKey::Natural("date"),
};

static SLEEP_DATA: TableDef = TableDef {
    name: "sleep_data",
    columns: &[
        col("id", Integer),
        col("date", Text),
        col("sleep_start", Integer),
        col("sleep_end", Integer),
        col("duration_ms", Integer),
        col("quality", Integer),
    ],
    primary_key: PrimaryKey::AutoIncrement("id"),
};

static SAVED_ROUTES: TableDef = TableDef {
    name: "saved_routes",
    columns: &[
        col("id", Integer),
        col("name", Text),
        col("start_latitude", Real),
        col("start_longitude", Real),
        col("end_latitude", Real),
        col("end_longitude", Real),
        col("distance", Real),
        col("estimated_time_ms", Integer),
        col("created_at", Integer),
        col("last_used", Integer),
    ],
    primary_key: PrimaryKey::AutoIncrement("id"),
};

static ROUTE_POINTS: TableDef = TableDef {
    name: "route_points",
    columns: &[
        col("id", Integer),
        col("route_id", Integer),
        col("latitude", Real),
        col("longitude", Real),
        col("sequence", Integer),
        opt("instruction", Text),
    ],
    primary_key: PrimaryKey::AutoIncrement("id"),
};

static POI: TableDef = TableDef {
    name: "poi",
    columns: &[
        col("id", Integer),
        col("name", Text),
        col("category", Text),
        col("latitude", Real),
        col("longitude", Real),
        opt("address", Text),
        opt("rating", Real),
        col("is_favorite", Integer),
    ],
    primary_key: PrimaryKey::AutoIncrement("id"),
};

static MEDIA_ITEMS: TableDef = TableDef {
    name: "media_items",
    columns: &[
        col("id", Text),
        col("title", Text),
        opt("artist", Text),
        opt("album", Text),
        opt("genre", Text),
        col("duration_ms", Integer),
        col("file_path", Text),
        col("mime_type", Text),
        col("size_bytes", Integer),
        col("date_added", Integer),
        col("date_modified", Integer),
        opt("album_art_path", Text),
        col("play_count", Integer),
        opt("last_played", Integer),
        col("is_favorite", Integer),
    ],
    primary_key: PrimaryKey::Natural("id"),
};

static PLAYLISTS: TableDef = TableDef {
    name: "playlists",
    columns: &[
        col("id", Integer),
        col("name", Text),
        opt("description", Text),
        col("created_at", Integer),
        col("updated_at", Integer),
        col("track_count", Integer),
        opt("cover_art_path", Text),
    ],
    primary_key: PrimaryKey::AutoIncrement("id"),
};

static PLAYLIST_ITEMS: TableDef = TableDef {
    name: "playlist_items",
    columns: &[
        col("id", Integer),
        col("playlist_id", Integer),
        col("media_id", Text),
        col("position", Integer),
        col("added_at", Integer),
    ],
    primary_key: PrimaryKey::AutoIncrement("id"),
};

static SHELL_HISTORY: TableDef = TableDef {
    name: "shell_history",
    columns: &[
        col("id", Integer),
        col("command", Text),
        opt("original_language", Text),
        opt("translated_command", Text),
        col("result", Text),
        col("success", Integer),
        col("timestamp", Integer),
    ],
    primary_key: PrimaryKey::AutoIncrement("id"),
};

static SHELL_ALIASES: TableDef = TableDef {
    name: "shell_aliases",
    columns: &[
        col("alias", Text),
        col("target", Text),
        opt("description", Text),
        col("created_at", Integer),
    ],
    primary_key: PrimaryKey::Natural("alias"),
};

static SHELL_SCRIPTS: TableDef = TableDef {
    name: "shell_scripts",
    columns: &[
        col("id", Integer),
        col("name", Text),
        col("content", Text),
        opt("description", Text),
        col("created_at", Integer),
        col("updated_at", Integer),
        col("execution_count", Integer),
        opt("last_executed", Integer),
    ],
    primary_key: PrimaryKey::AutoIncrement("id"),
};

static SHELL_TRIGGERS: TableDef = TableDef {
    name: "shell_triggers",
    columns: &[
        col("id", Integer),
        col("name", Text),
        col("trigger_type", Text),
        col("script_id", Integer),
        col("enabled", Integer),
        opt("conditions", Text),
    ],
    primary_key: PrimaryKey::AutoIncrement("id"),
};

static USER_PROFILE: TableDef = TableDef {
    name: "user_profile",
    columns: &[
        col("id", Integer),
        opt("name", Text),
        opt("height", Real),
        opt("weight", Real),
        opt("age", Integer),
        opt("gender", Text),
        col("daily_step_goal", Integer),
        col("use_metric_system", Integer),
        col("theme", Text),
        col("language", Text),
    ],
    primary_key: PrimaryKey::Natural("id"),
};

/// Table declarations for a schema version.
pub fn tables(version: i64) -> DbResult<&'static [Table]> {
    match version {
        1 => Ok(&Table::ALL),
        other => Err(DbError::config(
            "schema_version",
            format!("unknown schema version {other}"),
        )),
    }
}

/// SHA-256 over the canonical description of every table in `version`.
pub fn fingerprint(version: i64) -> DbResult<String> {
    let mut hasher = Sha256::new();
    hasher.update(format!("v{version}\n"));
    for table in tables(version)? {
        let def = table.def();
        hasher.update(format!(
            "{}({})pk={}\n",
            def.name,
            def.canonical_columns().join(","),
            def.primary_key.column()
        ));
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Column as reported by `PRAGMA table_info` on an existing file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundColumn {
    pub name: String,
    pub ty: String,
    pub not_null: bool,
}

/// Expected vs. found column set for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDiff {
    pub table: &'static str,
    pub expected: Vec<String>,
    pub found: Vec<String>,
}

/// Human-readable summary of how an on-disk schema differs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDiff {
    pub tables: Vec<TableDiff>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Compare one declared table against the columns found on disk.
    /// Tables absent from disk are not a difference; they are created.
    pub fn compare(&mut self, def: &TableDef, found: &[FoundColumn]) {
        if found.is_empty() {
            return;
        }
        let expected = def.canonical_columns();
        let found: Vec<String> = found
            .iter()
            .map(|c| describe_column(&c.name, &c.ty.to_uppercase(), c.not_null))
            .collect();
        if expected != found {
            self.tables.push(TableDiff {
                table: def.name,
                expected,
                found,
            });
        }
    }
}

impl fmt::Display for SchemaDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tables.is_empty() {
            return f.write_str("no column differences in known tables");
        }
        for diff in &self.tables {
            writeln!(f, "table `{}`:", diff.table)?;
            writeln!(f, "  expected: [{}]", diff.expected.join(", "))?;
            writeln!(f, "  found:    [{}]", diff.found.join(", "))?;
        }
        Ok(())
    }
}
