//! Translate document-style filters into each engine's native form.
//!
//! Filters are parsed once into a [`Condition`] tree against a closed operator set and
//! then rendered either as a SQLite WHERE clause or a MongoDB filter document. The
//! guard refuses filters that constrain nothing when the caller is about to delete or
//! modify rows.

pub mod condition;
pub mod document;
pub mod operator;
pub mod options;
pub mod sql;

pub use condition::{Comparison, Condition, FieldTest};
pub use operator::{Operator, INCOMPATIBLE_WITH_SQL};
pub use options::{Projection, QueryOptions, SortKey, SortOrder};
pub use sql::SqlFilter;

use crate::config::Engine;
use crate::error::TranslateError;
use crate::schema::{DocumentModel, RelationalModel};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Guard {
    /// An empty filter matches everything.
    Optional,
    /// An empty filter is refused with [`TranslateError::ConditionRequired`].
    RequireCondition,
}

#[derive(Clone, Copy, Debug)]
pub enum Target<'a> {
    Relational(&'a RelationalModel),
    Document(&'a DocumentModel),
}

impl Target<'_> {
    pub fn engine(&self) -> Engine {
        match self {
            Target::Relational(_) => Engine::Sqlite,
            Target::Document(_) => Engine::Mongodb,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NativeFilter {
    Sql(SqlFilter),
    Document(bson::Document),
}

/// Parse `filter` and apply the guard. `Ok(None)` means "match everything".
fn parse_guarded(
    filter: &Value,
    engine: Engine,
    guard: Guard,
) -> Result<Option<Condition>, TranslateError> {
    let parsed = Condition::parse(filter, engine)?;
    let empty = parsed.as_ref().map_or(true, Condition::is_unconditional);
    if empty && guard == Guard::RequireCondition {
        return Err(TranslateError::ConditionRequired);
    }
    Ok(parsed.filter(|c| !c.is_unconditional()))
}

pub fn to_sql_filter(
    filter: &Value,
    model: &RelationalModel,
    guard: Guard,
) -> Result<SqlFilter, TranslateError> {
    match parse_guarded(filter, Engine::Sqlite, guard)? {
        Some(condition) => sql::render(&condition, model),
        None => Ok(SqlFilter::always()),
    }
}

pub fn to_document_filter(
    filter: &Value,
    model: &DocumentModel,
    guard: Guard,
) -> Result<bson::Document, TranslateError> {
    match parse_guarded(filter, Engine::Mongodb, guard)? {
        Some(condition) => document::render(&condition, model),
        None => Ok(bson::Document::new()),
    }
}

/// Translate `filter` for `target`.
pub fn translate(filter: &Value, target: Target<'_>, guard: Guard) -> Result<NativeFilter, TranslateError> {
    match target {
        Target::Relational(model) => to_sql_filter(filter, model, guard).map(NativeFilter::Sql),
        Target::Document(model) => to_document_filter(filter, model, guard).map(NativeFilter::Document),
    }
}
