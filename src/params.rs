//! Query parameter types.
//!
//! [`SqlParam`] is the typed value that travels from application code into a
//! bound query. One parameter list binds against either backend; binding
//! happens positionally, in order, against `$1`-style placeholders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::Arguments as _;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;

/// A typed query parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Json(JsonValue),
}

impl SqlParam {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get a human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Timestamp(_) => "timestamp",
            Self::Json(_) => "json",
        }
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for SqlParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<DateTime<Utc>> for SqlParam {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<JsonValue> for SqlParam {
    fn from(v: JsonValue) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

/// Bind parameters into PostgreSQL argument form.
pub(crate) fn postgres_arguments(params: &[SqlParam]) -> Result<PgArguments, sqlx::Error> {
    let mut args = PgArguments::default();
    for param in params {
        match param {
            SqlParam::Null => args.add(None::<String>),
            SqlParam::Bool(v) => args.add(v),
            SqlParam::Int(v) => args.add(v),
            SqlParam::Float(v) => args.add(v),
            SqlParam::Text(v) => args.add(v),
            SqlParam::Bytes(v) => args.add(v.as_slice()),
            SqlParam::Timestamp(v) => args.add(v),
            SqlParam::Json(v) => args.add(sqlx::types::Json(v)),
        }
        .map_err(sqlx::Error::Encode)?;
    }
    Ok(args)
}

/// Bind parameters into SQLite argument form.
pub(crate) fn sqlite_arguments<'q>(
    params: &'q [SqlParam],
) -> Result<SqliteArguments<'q>, sqlx::Error> {
    let mut args = SqliteArguments::default();
    for param in params {
        match param {
            SqlParam::Null => args.add(None::<String>),
            SqlParam::Bool(v) => args.add(v),
            SqlParam::Int(v) => args.add(v),
            SqlParam::Float(v) => args.add(v),
            SqlParam::Text(v) => args.add(v.as_str()),
            SqlParam::Bytes(v) => args.add(v.as_slice()),
            SqlParam::Timestamp(v) => args.add(v),
            // SQLite doesn't have native JSON type, store as string
            SqlParam::Json(v) => args.add(v.to_string()),
        }
        .map_err(sqlx::Error::Encode)?;
    }
    Ok(args)
}

/// Serde helper for base64-encoded binary data in JSON.
mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
