//! Convert serde_json::Value to values sqlx can bind to SQLite.

use crate::types::{parse_timestamp, timestamp_from_millis, SqlType};
use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteTypeInfo};
use sqlx::Database;

/// A value that can be bound to a SQLite query.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlBindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
}

impl SqlBindValue {
    /// Untyped conversion; arrays and objects become JSON text.
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => SqlBindValue::Null,
            Value::Bool(b) => SqlBindValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlBindValue::I64(i)
                } else {
                    SqlBindValue::F64(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => SqlBindValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => SqlBindValue::Text(v.to_string()),
        }
    }

    /// Conversion for a column of type `ty`. Returns the reason when `v` cannot be
    /// stored in that column.
    pub fn for_column(ty: &SqlType, v: &Value) -> Result<Self, String> {
        if v.is_null() {
            return Ok(SqlBindValue::Null);
        }
        match ty {
            SqlType::Text => match v {
                Value::String(s) => Ok(SqlBindValue::Text(s.clone())),
                Value::Number(n) => Ok(SqlBindValue::Text(n.to_string())),
                Value::Bool(b) => Ok(SqlBindValue::Text(b.to_string())),
                _ => Err("expected a string".into()),
            },
            SqlType::Numeric => match v {
                Value::Number(_) => Ok(SqlBindValue::from_json(v)),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(SqlBindValue::I64)
                    .or_else(|_| s.trim().parse::<f64>().map(SqlBindValue::F64))
                    .map_err(|_| format!("expected a number, got '{}'", s)),
                _ => Err("expected a number".into()),
            },
            SqlType::Integer => match v {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                    .map(SqlBindValue::I64)
                    .ok_or_else(|| "expected an integer".into()),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(SqlBindValue::I64)
                    .map_err(|_| format!("expected an integer, got '{}'", s)),
                _ => Err("expected an integer".into()),
            },
            SqlType::Boolean => match v {
                Value::Bool(b) => Ok(SqlBindValue::Bool(*b)),
                Value::Number(n) if n.as_i64() == Some(0) => Ok(SqlBindValue::Bool(false)),
                Value::Number(n) if n.as_i64() == Some(1) => Ok(SqlBindValue::Bool(true)),
                Value::String(s) => match s.as_str() {
                    "true" | "1" => Ok(SqlBindValue::Bool(true)),
                    "false" | "0" => Ok(SqlBindValue::Bool(false)),
                    _ => Err(format!("expected a boolean, got '{}'", s)),
                },
                _ => Err("expected a boolean".into()),
            },
            SqlType::DateTime => {
                let ms = match v {
                    Value::String(s) => parse_timestamp(s),
                    Value::Number(n) => n.as_i64(),
                    _ => None,
                };
                ms.and_then(timestamp_from_millis)
                    .map(SqlBindValue::Text)
                    .ok_or_else(|| "expected an RFC 3339 date or epoch milliseconds".into())
            }
            SqlType::Json => Ok(SqlBindValue::Text(v.to_string())),
            SqlType::Custom(_) => Ok(SqlBindValue::from_json(v)),
        }
    }
}

impl<'q> Encode<'q, Sqlite> for SqlBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Sqlite as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        match self {
            SqlBindValue::Null => <Option<i64> as Encode<Sqlite>>::encode_by_ref(&None, buf),
            SqlBindValue::Bool(b) => <bool as Encode<Sqlite>>::encode_by_ref(b, buf),
            SqlBindValue::I64(n) => <i64 as Encode<Sqlite>>::encode_by_ref(n, buf),
            SqlBindValue::F64(n) => <f64 as Encode<Sqlite>>::encode_by_ref(n, buf),
            SqlBindValue::Text(s) => <String as Encode<Sqlite>>::encode_by_ref(s, buf),
        }
    }
}

impl sqlx::Type<Sqlite> for SqlBindValue {
    fn type_info() -> SqliteTypeInfo {
        <String as sqlx::Type<Sqlite>>::type_info()
    }
}

/// Bind `params` in order.
pub fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[SqlBindValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for p in params {
        query = query.bind(p.clone());
    }
    query
}
