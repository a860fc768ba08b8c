//! The data access object handed to callers: one per model, engine-neutral, and
//! infallible at its surface. Failures are reported to a [`DiagnosticSink`] and turned
//! into sentinel values.

use crate::config::Engine;
use crate::error::DbError;
use crate::query::QueryOptions;
use crate::service::backend::Backend;
use crate::sql::UpdateScope;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Receives one line per failed operation.
#[derive(Clone)]
pub struct DiagnosticSink(Arc<dyn Fn(&str) + Send + Sync>);

impl DiagnosticSink {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Emit diagnostics as `tracing` warnings.
    pub fn tracing() -> Self {
        Self::new(|message| tracing::warn!(target: "modeldb::dbo", "{}", message))
    }

    pub fn report(&self, message: &str) {
        (self.0)(message)
    }
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        Self::tracing()
    }
}

impl fmt::Debug for DiagnosticSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DiagnosticSink")
    }
}

/// Result of a single-record read. A failed read is never reported as "not found".
#[derive(Clone, Debug, PartialEq)]
pub enum Lookup {
    Found(Value),
    NotFound,
    Failed,
}

impl Lookup {
    pub fn found(self) -> Option<Value> {
        match self {
            Lookup::Found(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

/// Data access object for one model.
#[derive(Clone)]
pub struct Dbo {
    model: String,
    backend: Arc<dyn Backend>,
    sink: DiagnosticSink,
}

impl fmt::Debug for Dbo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dbo")
            .field("model", &self.model)
            .field("engine", &self.backend.engine())
            .finish()
    }
}

/// Empty options behave exactly like no options.
fn effective(options: Option<&QueryOptions>) -> Option<&QueryOptions> {
    options.filter(|o| !o.is_empty())
}

impl Dbo {
    pub fn new(model: impl Into<String>, backend: Arc<dyn Backend>, sink: DiagnosticSink) -> Self {
        Self {
            model: model.into(),
            backend,
            sink,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn engine(&self) -> Engine {
        self.backend.engine()
    }

    fn report(&self, op: &str, err: &DbError) {
        self.sink.report(&format!(
            "{}.{} failed on {}: {}",
            self.model,
            op,
            self.backend.engine().as_str(),
            err
        ));
    }

    /// Affected-count sentinel for writes: 0 when the guard refused, -1 on failure.
    fn affected(&self, op: &str, result: Result<u64, DbError>) -> i64 {
        match result {
            Ok(n) => i64::try_from(n).unwrap_or(i64::MAX),
            Err(e) => {
                self.report(op, &e);
                if e.is_refusal() {
                    0
                } else {
                    -1
                }
            }
        }
    }

    fn lookup(&self, op: &str, result: Result<Option<Value>, DbError>) -> Lookup {
        match result {
            Ok(Some(v)) => Lookup::Found(v),
            Ok(None) => Lookup::NotFound,
            Err(e) => {
                self.report(op, &e);
                Lookup::Failed
            }
        }
    }

    fn optional<T>(&self, op: &str, result: Result<T, DbError>) -> Option<T> {
        result.map_err(|e| self.report(op, &e)).ok()
    }

    /// Number of matching records, or -1 on failure.
    pub async fn count(&self, filter: &Value) -> i64 {
        match self.backend.count(&self.model, filter).await {
            Ok(n) => i64::try_from(n).unwrap_or(i64::MAX),
            Err(e) => {
                self.report("count", &e);
                -1
            }
        }
    }

    pub async fn find_one(&self, filter: &Value, options: Option<&QueryOptions>) -> Lookup {
        let result = self
            .backend
            .find_one(&self.model, filter, effective(options))
            .await;
        self.lookup("findOne", result)
    }

    pub async fn find_by_id(&self, id: &Value, options: Option<&QueryOptions>) -> Lookup {
        let result = self
            .backend
            .find_by_id(&self.model, id, effective(options))
            .await;
        self.lookup("findById", result)
    }

    /// Matching records; `Some(vec![])` when nothing matches, `None` on failure.
    pub async fn find(&self, filter: &Value, options: Option<&QueryOptions>) -> Option<Vec<Value>> {
        let result = self.backend.find(&self.model, filter, effective(options)).await;
        self.optional("find", result)
    }

    /// The stored record, or `None` on failure.
    pub async fn insert(&self, data: &Value) -> Option<Value> {
        let result = self.backend.insert(&self.model, data).await;
        self.optional("insert", result)
    }

    /// Update every match. Refuses an empty filter.
    pub async fn update(&self, filter: &Value, data: &Value) -> i64 {
        let result = self
            .backend
            .update(&self.model, filter, data, UpdateScope::Many)
            .await;
        self.affected("update", result)
    }

    /// Update the first match. Refuses an empty filter.
    pub async fn update_one(&self, filter: &Value, data: &Value) -> i64 {
        let result = self
            .backend
            .update(&self.model, filter, data, UpdateScope::One)
            .await;
        self.affected("updateOne", result)
    }

    /// Update the first match or insert; returns the record as stored. Refuses an
    /// empty filter.
    pub async fn upsert(&self, filter: &Value, data: &Value) -> Option<Value> {
        let result = self.backend.upsert(&self.model, filter, data).await;
        self.optional("upsert", result)
    }

    /// Delete every match. Refuses an empty filter.
    pub async fn delete(&self, filter: &Value) -> i64 {
        let result = self.backend.delete(&self.model, filter).await;
        self.affected("delete", result)
    }
}
