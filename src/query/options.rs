//! Read options: populate, select, sort, skip, limit.

use crate::error::TranslateError;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Clone, Debug, Default, PartialEq)]
pub enum Projection {
    #[default]
    All,
    Include(Vec<String>),
    Exclude(Vec<String>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub order: SortOrder,
}

/// Options accepted by the read operations. An empty value is treated the same as
/// passing no options at all.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryOptions {
    pub populate: Vec<String>,
    pub select: Projection,
    pub sort: Vec<SortKey>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn populate(mut self, name: impl Into<String>) -> Self {
        self.populate.push(name.into());
        self
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Projection::Include(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Projection::Exclude(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            order,
        });
        self
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.skip = Some(n);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Parse the JSON form: `{"populate": "a" | ["a"], "select": "a -b" | ["a"],
    /// "sort": {"f": 1 | -1 | "asc" | "desc"}, "skip": n, "limit": n}`.
    pub fn from_json(v: &Value) -> Result<Self, TranslateError> {
        let obj = match v {
            Value::Null => return Ok(Self::default()),
            Value::Object(obj) => obj,
            _ => return Err(TranslateError::InvalidOptions("expected an object".into())),
        };
        let mut options = Self::default();
        for (key, value) in obj {
            match key.as_str() {
                "populate" => options.populate = string_list(key, value)?,
                "select" => options.select = parse_projection(value)?,
                "sort" => options.sort = parse_sort(value)?,
                "skip" => options.skip = count(key, value)?,
                "limit" => options.limit = count(key, value)?,
                other => {
                    return Err(TranslateError::InvalidOptions(format!(
                        "unknown option '{}'",
                        other
                    )))
                }
            }
        }
        Ok(options)
    }
}

impl<'de> Deserialize<'de> for QueryOptions {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Value::deserialize(deserializer)?;
        QueryOptions::from_json(&v).map_err(serde::de::Error::custom)
    }
}

fn string_list(key: &str, v: &Value) -> Result<Vec<String>, TranslateError> {
    match v {
        Value::String(s) => Ok(s.split_whitespace().map(str::to_string).collect()),
        Value::Array(items) => items
            .iter()
            .map(|i| {
                i.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| TranslateError::InvalidOptions(format!("{} entries must be strings", key)))
            })
            .collect(),
        _ => Err(TranslateError::InvalidOptions(format!(
            "{} must be a string or an array of strings",
            key
        ))),
    }
}

fn parse_projection(v: &Value) -> Result<Projection, TranslateError> {
    let entries = string_list("select", v)?;
    if entries.is_empty() {
        return Ok(Projection::All);
    }
    let excluded: Vec<String> = entries
        .iter()
        .filter_map(|e| e.strip_prefix('-').map(str::to_string))
        .collect();
    if excluded.is_empty() {
        Ok(Projection::Include(entries))
    } else if excluded.len() == entries.len() {
        Ok(Projection::Exclude(excluded))
    } else {
        Err(TranslateError::InvalidOptions(
            "select cannot mix included and excluded fields".into(),
        ))
    }
}

fn parse_sort(v: &Value) -> Result<Vec<SortKey>, TranslateError> {
    let obj = v
        .as_object()
        .ok_or_else(|| TranslateError::InvalidOptions("sort must be an object".into()))?;
    obj.iter()
        .map(|(field, dir)| {
            let order = match dir {
                Value::Number(n) if n.as_i64() == Some(1) => SortOrder::Asc,
                Value::Number(n) if n.as_i64() == Some(-1) => SortOrder::Desc,
                Value::String(s) if s.eq_ignore_ascii_case("asc") => SortOrder::Asc,
                Value::String(s) if s.eq_ignore_ascii_case("desc") => SortOrder::Desc,
                other => {
                    return Err(TranslateError::InvalidOptions(format!(
                        "sort direction for '{}' must be 1, -1, \"asc\" or \"desc\"; got {}",
                        field, other
                    )))
                }
            };
            Ok(SortKey {
                field: field.clone(),
                order,
            })
        })
        .collect()
}

fn count(key: &str, v: &Value) -> Result<Option<u64>, TranslateError> {
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| TranslateError::InvalidOptions(format!("{} must be a non-negative integer", key))),
        _ => Err(TranslateError::InvalidOptions(format!(
            "{} must be a non-negative integer",
            key
        ))),
    }
}
