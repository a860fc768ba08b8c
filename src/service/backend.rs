//! The engine seam: one trait, one implementation per engine.

use crate::config::Engine;
use crate::error::DbError;
use crate::query::QueryOptions;
use crate::sql::UpdateScope;
use async_trait::async_trait;
use serde_json::Value;

/// CRUD over compiled models, addressed by model name. Filters are document-style JSON;
/// data is a JSON object. Errors are returned as-is; the DBO turns them into sentinels.
#[async_trait]
pub trait Backend: Send + Sync {
    fn engine(&self) -> Engine;

    fn has_model(&self, model: &str) -> bool;

    async fn count(&self, model: &str, filter: &Value) -> Result<u64, DbError>;

    async fn find_one(
        &self,
        model: &str,
        filter: &Value,
        options: Option<&QueryOptions>,
    ) -> Result<Option<Value>, DbError>;

    async fn find_by_id(
        &self,
        model: &str,
        id: &Value,
        options: Option<&QueryOptions>,
    ) -> Result<Option<Value>, DbError>;

    async fn find(
        &self,
        model: &str,
        filter: &Value,
        options: Option<&QueryOptions>,
    ) -> Result<Vec<Value>, DbError>;

    async fn insert(&self, model: &str, data: &Value) -> Result<Value, DbError>;

    /// Update matching records; returns the number matched.
    async fn update(
        &self,
        model: &str,
        filter: &Value,
        data: &Value,
        scope: UpdateScope,
    ) -> Result<u64, DbError>;

    /// Update the first match or insert; returns the resulting record.
    async fn upsert(&self, model: &str, filter: &Value, data: &Value) -> Result<Value, DbError>;

    async fn delete(&self, model: &str, filter: &Value) -> Result<u64, DbError>;

    async fn close(&self);

    /// Remove all stored data: the database file, the tables or the database.
    async fn drop_database(&self) -> Result<(), DbError>;
}

pub(crate) fn as_object<'a>(
    data: &'a Value,
    op: &str,
) -> Result<&'a serde_json::Map<String, Value>, DbError> {
    data.as_object()
        .ok_or_else(|| DbError::InvalidData(format!("{} data must be a JSON object", op)))
}
