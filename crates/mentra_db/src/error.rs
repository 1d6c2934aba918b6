//! Error types for the database layer.

use miette::Diagnostic;
use thiserror::Error;

use crate::schema::{SchemaDiff, Table};

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Database error types.
#[derive(Debug, Error, Diagnostic)]
pub enum DbError {
    /// The persisted schema fingerprint disagrees with the compiled-in schema.
    #[error("Schema mismatch: expected fingerprint {expected}, found {found}\n{diff}")]
    #[diagnostic(
        code(mentra_db::schema_mismatch),
        help("No automatic migration exists for this change. Reset the store or set `reset_on_schema_mismatch`")
    )]
    SchemaMismatch {
        expected: String,
        found: String,
        diff: SchemaDiff,
    },

    /// A stored value could not be decoded into its domain type.
    #[error("Corrupt value in {table}.{column} ({value}): {reason}")]
    #[diagnostic(code(mentra_db::corrupt_data))]
    CorruptData {
        table: &'static str,
        column: &'static str,
        value: String,
        reason: String,
    },

    /// A uniqueness constraint was violated.
    #[error("Constraint violation on {table} during {operation}{}: {message}", fmt_key(.key))]
    #[diagnostic(code(mentra_db::constraint_violation))]
    ConstraintViolation {
        table: &'static str,
        operation: &'static str,
        key: Option<String>,
        message: String,
    },

    /// Storage medium failure (disk full, permissions, file corruption).
    #[error("Storage failure on {table} during {operation}{}: {source}", fmt_key(.key))]
    #[diagnostic(
        code(mentra_db::storage),
        help("Writes are not retried automatically; the failed transaction was rolled back")
    )]
    Storage {
        table: &'static str,
        operation: &'static str,
        key: Option<String>,
        #[source]
        source: sqlx::Error,
    },

    /// Lock contention that outlasted the bounded internal retries.
    #[error("Database busy on {table} during {operation} after {attempts} attempts")]
    #[diagnostic(
        code(mentra_db::busy),
        help("Another process holds the database lock; retry later")
    )]
    Busy {
        table: &'static str,
        operation: &'static str,
        attempts: u32,
    },

    /// Entity not found
    #[error("{entity_type} not found: {id}")]
    #[diagnostic(code(mentra_db::not_found))]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// Value rejected before it reached storage
    #[error("Invalid {entity_type}: {message}")]
    #[diagnostic(code(mentra_db::invalid_data))]
    InvalidData {
        entity_type: &'static str,
        message: String,
    },

    /// Configuration could not be loaded or is out of range
    #[error("Invalid configuration for {field}: {reason}")]
    #[diagnostic(code(mentra_db::config))]
    Config { field: String, reason: String },

    /// SQLite/sqlx error without table context
    #[error("Database error: {0}")]
    #[diagnostic(code(mentra_db::sqlx))]
    Sqlx(#[from] sqlx::Error),

    /// IO error (for filesystem operations)
    #[error("IO error: {0}")]
    #[diagnostic(code(mentra_db::io))]
    Io(#[from] std::io::Error),

    /// A store-wide operation was requested from inside a write transaction
    #[error("{operation} cannot run inside a transaction")]
    #[diagnostic(
        code(mentra_db::in_transaction),
        help("Call it after the surrounding transaction has finished")
    )]
    InTransaction { operation: &'static str },

    /// A transaction handle was used after its transaction finished
    #[error("Transaction already finished; {operation} was not run")]
    #[diagnostic(code(mentra_db::transaction_finished))]
    TransactionFinished { operation: &'static str },

    /// A commit task was lost before reporting its outcome
    #[error("Commit task failed: {0}")]
    #[diagnostic(code(mentra_db::commit_task))]
    CommitTask(String),
}

fn fmt_key(key: &Option<String>) -> String {
    match key {
        Some(key) => format!(" (key {key})"),
        None => String::new(),
    }
}

/// Where an operation was running when it failed.
#[derive(Debug, Clone)]
pub struct OpContext {
    pub table: Option<Table>,
    pub operation: &'static str,
    pub key: Option<String>,
}

impl OpContext {
    pub fn new(table: Table, operation: &'static str) -> Self {
        Self {
            table: Some(table),
            operation,
            key: None,
        }
    }

    /// Store-wide operation not tied to one table (begin, commit, vacuum).
    pub fn store(operation: &'static str) -> Self {
        Self {
            table: None,
            operation,
            key: None,
        }
    }

    pub fn table_name(&self) -> &'static str {
        self.table.map(Table::name).unwrap_or("*")
    }

    pub fn with_key(mut self, key: impl ToString) -> Self {
        self.key = Some(key.to_string());
        self
    }
}

impl DbError {
    /// Create a not found error.
    pub fn not_found(entity_type: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity_type,
            id: id.to_string(),
        }
    }

    /// Create an invalid data error.
    pub fn invalid_data(entity_type: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidData {
            entity_type,
            message: message.into(),
        }
    }

    /// Create a corrupt data error for a single column value.
    pub fn corrupt(
        table: Table,
        column: &'static str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::CorruptData {
            table: table.name(),
            column,
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a constraint violation error.
    pub fn constraint(ctx: &OpContext, message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            table: ctx.table_name(),
            operation: ctx.operation,
            key: ctx.key.clone(),
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Classify a raw driver error using the SQLite result code.
    pub fn from_sqlx(err: sqlx::Error, ctx: &OpContext) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if is_busy_code(db_err.code().as_deref()) {
                return Self::Busy {
                    table: ctx.table_name(),
                    operation: ctx.operation,
                    attempts: 1,
                };
            }
            let constraint = matches!(
                db_err.kind(),
                sqlx::error::ErrorKind::UniqueViolation
                    | sqlx::error::ErrorKind::NotNullViolation
                    | sqlx::error::ErrorKind::CheckViolation
                    | sqlx::error::ErrorKind::ForeignKeyViolation
            );
            if constraint {
                return Self::constraint(ctx, db_err.message().to_string());
            }
        }
        Self::Storage {
            table: ctx.table_name(),
            operation: ctx.operation,
            key: ctx.key.clone(),
            source: err,
        }
    }

    /// Whether this error is transient lock contention.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}

/// SQLITE_BUSY (5) and SQLITE_LOCKED (6), including their extended codes.
fn is_busy_code(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok())
        .map(|c| matches!(c & 0xff, 5 | 6))
        .unwrap_or(false)
}
