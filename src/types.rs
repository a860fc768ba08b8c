//! Logical field types mapped to each engine's native type.

use crate::config::{Engine, FieldType, Primitive};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Relational column type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Numeric,
    Integer,
    Boolean,
    /// RFC 3339 text, UTC, millisecond precision.
    DateTime,
    /// JSON text; arrays, nested maps and Mixed values.
    Json,
    /// Unknown type name passed through as the declared column type.
    Custom(String),
}

impl SqlType {
    pub fn ddl(&self) -> &str {
        match self {
            SqlType::Text | SqlType::DateTime | SqlType::Json => "TEXT",
            SqlType::Numeric => "NUMERIC",
            SqlType::Integer => "INTEGER",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Custom(name) => name.as_str(),
        }
    }
}

/// Document engine field type.
#[derive(Clone, Debug, PartialEq)]
pub enum DocumentType {
    String,
    Number,
    Date,
    Boolean,
    ObjectId,
    Mixed,
    Array(Box<DocumentType>),
    Embedded(Vec<(String, DocumentType)>),
    /// Unknown type name; stored as given.
    Custom(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum NativeType {
    Relational(SqlType),
    Document(DocumentType),
    /// Virtual fields have no storage on either engine.
    Unstored,
}

/// Map a descriptor to the native type of `engine`.
pub fn map_type(descriptor: &FieldType, engine: Engine) -> NativeType {
    match engine {
        Engine::Sqlite => sql_type(descriptor).map_or(NativeType::Unstored, NativeType::Relational),
        Engine::Mongodb => {
            document_type(descriptor).map_or(NativeType::Unstored, NativeType::Document)
        }
    }
}

pub fn sql_type(descriptor: &FieldType) -> Option<SqlType> {
    Some(match descriptor {
        FieldType::Primitive(p) => match p {
            Primitive::String => SqlType::Text,
            Primitive::Number => SqlType::Numeric,
            Primitive::Date => SqlType::DateTime,
            Primitive::Boolean => SqlType::Boolean,
            Primitive::ObjectId => SqlType::Integer,
            Primitive::Mixed => SqlType::Json,
            Primitive::Virtual => return None,
        },
        FieldType::Custom(name) => SqlType::Custom(name.clone()),
        FieldType::Array(_) | FieldType::Object(_) => SqlType::Json,
    })
}

pub fn document_type(descriptor: &FieldType) -> Option<DocumentType> {
    Some(match descriptor {
        FieldType::Primitive(p) => match p {
            Primitive::String => DocumentType::String,
            Primitive::Number => DocumentType::Number,
            Primitive::Date => DocumentType::Date,
            Primitive::Boolean => DocumentType::Boolean,
            Primitive::ObjectId => DocumentType::ObjectId,
            Primitive::Mixed => DocumentType::Mixed,
            Primitive::Virtual => return None,
        },
        FieldType::Custom(name) => DocumentType::Custom(name.clone()),
        FieldType::Array(inner) => {
            DocumentType::Array(Box::new(document_type(inner).unwrap_or(DocumentType::Mixed)))
        }
        FieldType::Object(map) => DocumentType::Embedded(
            map.iter()
                .filter_map(|(name, ty)| document_type(ty).map(|t| (name.to_string(), t)))
                .collect(),
        ),
    })
}

/// Current time as stored in timestamp fields.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Milliseconds since the epoch as an RFC 3339 string.
pub fn timestamp_from_millis(ms: i64) -> Option<String> {
    Utc.timestamp_millis_opt(ms).single().map(format_timestamp)
}

/// Parse an RFC 3339 string (or a bare `YYYY-MM-DD` date) into epoch milliseconds.
pub fn parse_timestamp(s: &str) -> Option<i64> {
    if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Some(at.timestamp_millis());
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}
