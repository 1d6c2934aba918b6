//! Column codecs.
//!
//! Pure conversions between domain values and the primitive values SQLite
//! stores. Every decode is strict: a stored value that does not map back to
//! exactly one domain value is reported, never defaulted.

use std::fmt;

use chrono::NaiveDate;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::query::Query;
use sqlx::{Row, Sqlite};

use crate::schema::ColumnType;

/// A primitive column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    /// Attach this value as the next positional parameter.
    pub fn bind<'q>(
        &self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        match self {
            SqlValue::Null => query.bind(None::<i64>),
            SqlValue::Integer(v) => query.bind(*v),
            SqlValue::Real(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
        }
    }

    /// Read a column of the declared storage class from a row.
    pub fn read(row: &SqliteRow, column: &str, ty: ColumnType) -> Result<Self, sqlx::Error> {
        let value = match ty {
            ColumnType::Integer => row
                .try_get::<Option<i64>, _>(column)?
                .map_or(SqlValue::Null, SqlValue::Integer),
            ColumnType::Real => row
                .try_get::<Option<f64>, _>(column)?
                .map_or(SqlValue::Null, SqlValue::Real),
            ColumnType::Text => row
                .try_get::<Option<String>, _>(column)?
                .map_or(SqlValue::Null, SqlValue::Text),
        };
        Ok(value)
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Integer(v) => write!(f, "{v}"),
            SqlValue::Real(v) => write!(f, "{v}"),
            SqlValue::Text(v) => write!(f, "'{v}'"),
        }
    }
}

/// Bind a parameter list in order.
pub fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = param.bind(query);
    }
    query
}

/// Bidirectional mapping between a domain type and a column value.
///
/// `decode` returns the reason on failure; the caller attaches table and
/// column context.
pub trait ColumnCodec: Sized {
    fn encode(&self) -> SqlValue;
    fn decode(value: &SqlValue) -> Result<Self, String>;
}

fn unexpected(expected: &str, value: &SqlValue) -> String {
    format!("expected {expected}, found {value}")
}

impl ColumnCodec for i64 {
    fn encode(&self) -> SqlValue {
        SqlValue::Integer(*self)
    }

    fn decode(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Integer(v) => Ok(*v),
            other => Err(unexpected("integer", other)),
        }
    }
}

impl ColumnCodec for i32 {
    fn encode(&self) -> SqlValue {
        SqlValue::Integer(i64::from(*self))
    }

    fn decode(value: &SqlValue) -> Result<Self, String> {
        let wide = i64::decode(value)?;
        i32::try_from(wide).map_err(|_| format!("{wide} does not fit in 32 bits"))
    }
}

impl ColumnCodec for f64 {
    fn encode(&self) -> SqlValue {
        SqlValue::Real(*self)
    }

    fn decode(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Real(v) => Ok(*v),
            other => Err(unexpected("real", other)),
        }
    }
}

impl ColumnCodec for f32 {
    fn encode(&self) -> SqlValue {
        SqlValue::Real(f64::from(*self))
    }

    fn decode(value: &SqlValue) -> Result<Self, String> {
        f64::decode(value).map(|v| v as f32)
    }
}

impl ColumnCodec for bool {
    fn encode(&self) -> SqlValue {
        SqlValue::Integer(i64::from(*self))
    }

    fn decode(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Integer(0) => Ok(false),
            SqlValue::Integer(1) => Ok(true),
            other => Err(unexpected("boolean 0 or 1", other)),
        }
    }
}

impl ColumnCodec for String {
    fn encode(&self) -> SqlValue {
        SqlValue::Text(self.clone())
    }

    fn decode(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Text(v) => Ok(v.clone()),
            other => Err(unexpected("text", other)),
        }
    }
}

impl<T: ColumnCodec> ColumnCodec for Option<T> {
    fn encode(&self) -> SqlValue {
        match self {
            Some(v) => v.encode(),
            None => SqlValue::Null,
        }
    }

    fn decode(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Null => Ok(None),
            other => T::decode(other).map(Some),
        }
    }
}

/// Calendar dates are stored as `YYYY-MM-DD` so they sort lexically.
impl ColumnCodec for NaiveDate {
    fn encode(&self) -> SqlValue {
        SqlValue::Text(self.format("%Y-%m-%d").to_string())
    }

    fn decode(value: &SqlValue) -> Result<Self, String> {
        let text = String::decode(value)?;
        NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|e| format!("bad date: {e}"))
    }
}

/// JSON documents are stored as text.
impl ColumnCodec for serde_json::Value {
    fn encode(&self) -> SqlValue {
        SqlValue::Text(self.to_string())
    }

    fn decode(value: &SqlValue) -> Result<Self, String> {
        let text = String::decode(value)?;
        serde_json::from_str(&text).map_err(|e| format!("bad json: {e}"))
    }
}

/// Closed enums stored by name. `NAMES` pairs every variant with its
/// unique stored string.
pub trait NamedEnum: Copy + PartialEq + 'static {
    const NAMES: &'static [(Self, &'static str)];
    const TYPE_NAME: &'static str;

    fn as_str(self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(v, _)| *v == self)
            .map(|(_, n)| *n)
            .unwrap_or("")
    }

    fn parse(name: &str) -> Option<Self> {
        Self::NAMES.iter().find(|(_, n)| *n == name).map(|(v, _)| *v)
    }
}

/// Encode/decode any [`NamedEnum`]; unknown names are corrupt data.
pub fn encode_named<E: NamedEnum>(value: E) -> SqlValue {
    SqlValue::Text(value.as_str().to_string())
}

pub fn decode_named<E: NamedEnum>(value: &SqlValue) -> Result<E, String> {
    let text = String::decode(value)?;
    E::parse(&text).ok_or_else(|| format!("unknown {} `{text}`", E::TYPE_NAME))
}
