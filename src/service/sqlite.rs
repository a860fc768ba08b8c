//! CRUD execution against SQLite.

use crate::config::Engine;
use crate::error::DbError;
use crate::migration;
use crate::query::{to_sql_filter, Guard, QueryOptions, SqlFilter};
use crate::schema::relational::WriteMode;
use crate::schema::{AssociationKind, Registry, RelationalModel};
use crate::service::backend::{as_object, Backend};
use crate::sql::{self, bind_all, resolve_includes, IncludeSelect, QueryBuf, UpdateScope};
use crate::types::now_timestamp;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{SqliteConnection, SqlitePool};
use std::path::PathBuf;

pub struct SqliteBackend {
    pool: SqlitePool,
    registry: Registry<RelationalModel>,
    file: Option<PathBuf>,
}

impl SqliteBackend {
    pub fn new(pool: SqlitePool, registry: Registry<RelationalModel>, file: Option<PathBuf>) -> Self {
        Self {
            pool,
            registry,
            file,
        }
    }

    fn model(&self, name: &str) -> Result<&RelationalModel, DbError> {
        self.registry
            .get(name)
            .map(|m| m.as_ref())
            .ok_or_else(|| DbError::UnknownModel(name.to_string()))
    }

    async fn select_rows(
        &self,
        model: &RelationalModel,
        filter: SqlFilter,
        options: Option<&QueryOptions>,
        single: bool,
    ) -> Result<Vec<Value>, DbError> {
        let populate = options.map(|o| o.populate.as_slice()).unwrap_or(&[]);
        let includes = resolve_includes(model, populate, &self.registry)?;
        let q = sql::select(model, filter, options, &includes, single)?;
        let mut conn = self.pool.acquire().await?;
        let rows = fetch_rows(&mut conn, &q).await?;
        Ok(rows
            .into_iter()
            .map(|row| decode_with_includes(model, &includes, row))
            .collect())
    }
}

/// `{ <primary key>: id }`.
fn by_primary_key(model: &RelationalModel, id: Value) -> Value {
    let mut filter = Map::new();
    filter.insert(model.primary_key().to_string(), id);
    Value::Object(filter)
}

/// Top-level plain equality conditions of a filter; they seed the row an upsert
/// inserts.
fn equality_fields(filter: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    let Some(obj) = filter.as_object() else {
        return out;
    };
    for (k, v) in obj {
        if k.starts_with('$') {
            continue;
        }
        match v {
            Value::Object(ops) if ops.keys().any(|key| key.starts_with('$')) => {
                if let (1, Some(eq)) = (ops.len(), ops.get("$eq")) {
                    out.insert(k.clone(), eq.clone());
                }
            }
            _ => {
                out.insert(k.clone(), v.clone());
            }
        }
    }
    out
}

fn decode_with_includes(
    model: &RelationalModel,
    includes: &[IncludeSelect<'_>],
    row: Map<String, Value>,
) -> Value {
    let mut row = model.decode_row(row);
    for inc in includes {
        let name = &inc.association.name;
        let raw = row.remove(name).unwrap_or(Value::Null);
        let parsed = match raw {
            Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::Null),
            other => other,
        };
        let decoded = match (inc.association.kind, parsed) {
            (AssociationKind::HasOne, Value::Object(map)) => Value::Object(inc.related.decode_row(map)),
            (AssociationKind::HasOne, _) => Value::Null,
            (AssociationKind::HasMany, Value::Array(items)) => Value::Array(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::Object(map) => Value::Object(inc.related.decode_row(map)),
                        other => other,
                    })
                    .collect(),
            ),
            (AssociationKind::HasMany, _) => Value::Array(Vec::new()),
        };
        row.insert(name.clone(), decoded);
    }
    Value::Object(row)
}

async fn fetch_rows(conn: &mut SqliteConnection, q: &QueryBuf) -> Result<Vec<Map<String, Value>>, DbError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let rows = bind_all(sqlx::query(&q.sql), &q.params)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.iter().map(row_to_json).collect())
}

async fn execute(conn: &mut SqliteConnection, q: &QueryBuf) -> Result<u64, DbError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let result = bind_all(sqlx::query(&q.sql), &q.params)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

fn row_to_json(row: &SqliteRow) -> Map<String, Value> {
    use sqlx::Column;
    use sqlx::Row;
    let mut map = Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

fn cell_to_value(row: &SqliteRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(bytes)) = row.try_get::<Option<Vec<u8>>, _>(name) {
        return Value::String(String::from_utf8_lossy(&bytes).into_owned());
    }
    Value::Null
}

#[async_trait]
impl Backend for SqliteBackend {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    fn has_model(&self, model: &str) -> bool {
        self.registry.contains(model)
    }

    async fn count(&self, model: &str, filter: &Value) -> Result<u64, DbError> {
        use sqlx::Row;
        let model = self.model(model)?;
        let q = sql::count(model, to_sql_filter(filter, model, Guard::Optional)?);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut conn = self.pool.acquire().await?;
        let row = bind_all(sqlx::query(&q.sql), &q.params)
            .fetch_one(&mut *conn)
            .await?;
        let n: i64 = row.try_get(0)?;
        Ok(n.max(0) as u64)
    }

    async fn find_one(
        &self,
        model: &str,
        filter: &Value,
        options: Option<&QueryOptions>,
    ) -> Result<Option<Value>, DbError> {
        let model = self.model(model)?;
        let filter = to_sql_filter(filter, model, Guard::Optional)?;
        Ok(self
            .select_rows(model, filter, options, true)
            .await?
            .into_iter()
            .next())
    }

    async fn find_by_id(
        &self,
        model: &str,
        id: &Value,
        options: Option<&QueryOptions>,
    ) -> Result<Option<Value>, DbError> {
        let m = self.model(model)?;
        let filter = by_primary_key(m, id.clone());
        self.find_one(model, &filter, options).await
    }

    async fn find(
        &self,
        model: &str,
        filter: &Value,
        options: Option<&QueryOptions>,
    ) -> Result<Vec<Value>, DbError> {
        let model = self.model(model)?;
        let filter = to_sql_filter(filter, model, Guard::Optional)?;
        self.select_rows(model, filter, options, false).await
    }

    async fn insert(&self, model: &str, data: &Value) -> Result<Value, DbError> {
        let model = self.model(model)?;
        let values = model.write_values(as_object(data, "insert")?, WriteMode::Insert, &now_timestamp())?;
        let q = sql::insert(model, values);
        let mut conn = self.pool.acquire().await?;
        let row = fetch_rows(&mut conn, &q)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::InvalidData("insert returned no row".into()))?;
        Ok(Value::Object(model.decode_row(row)))
    }

    async fn update(
        &self,
        model: &str,
        filter: &Value,
        data: &Value,
        scope: UpdateScope,
    ) -> Result<u64, DbError> {
        let model = self.model(model)?;
        let filter = to_sql_filter(filter, model, Guard::RequireCondition)?;
        let values = model.write_values(as_object(data, "update")?, WriteMode::Update, &now_timestamp())?;
        if values.is_empty() {
            return Ok(0);
        }
        let q = sql::update(model, values, filter, scope);
        let mut conn = self.pool.acquire().await?;
        execute(&mut conn, &q).await
    }

    async fn upsert(&self, model: &str, filter: &Value, data: &Value) -> Result<Value, DbError> {
        let m = self.model(model)?;
        let sql_filter = to_sql_filter(filter, m, Guard::RequireCondition)?;
        let data = as_object(data, "upsert")?;
        let now = now_timestamp();
        let pk = m.primary_key();

        let mut tx = self.pool.begin().await?;
        let existing = fetch_rows(&mut *tx, &sql::select_primary_key(m, sql_filter))
            .await?
            .into_iter()
            .next()
            .and_then(|mut row| row.remove(pk));
        let id = match existing {
            Some(id) => {
                let values = m.write_values(data, WriteMode::Update, &now)?;
                if !values.is_empty() {
                    let by_id = to_sql_filter(&by_primary_key(m, id.clone()), m, Guard::RequireCondition)?;
                    execute(&mut *tx, &sql::update(m, values, by_id, UpdateScope::Many)).await?;
                }
                id
            }
            None => {
                let mut merged = equality_fields(filter);
                for (k, v) in data {
                    merged.insert(k.clone(), v.clone());
                }
                let values = m.write_values(&merged, WriteMode::Insert, &now)?;
                fetch_rows(&mut *tx, &sql::insert(m, values))
                    .await?
                    .into_iter()
                    .next()
                    .and_then(|mut row| row.remove(pk))
                    .ok_or_else(|| DbError::InvalidData("upsert insert returned no row".into()))?
            }
        };
        let by_id = to_sql_filter(&by_primary_key(m, id), m, Guard::RequireCondition)?;
        let row = fetch_rows(&mut *tx, &sql::select(m, by_id, None, &[], true)?)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::InvalidData("upserted row not found".into()))?;
        tx.commit().await?;
        Ok(Value::Object(m.decode_row(row)))
    }

    async fn delete(&self, model: &str, filter: &Value) -> Result<u64, DbError> {
        let model = self.model(model)?;
        let filter = to_sql_filter(filter, model, Guard::RequireCondition)?;
        let q = sql::delete(model, filter);
        let mut conn = self.pool.acquire().await?;
        execute(&mut conn, &q).await
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("sqlite pool closed");
    }

    async fn drop_database(&self) -> Result<(), DbError> {
        match &self.file {
            Some(file) => {
                self.pool.close().await;
                let mut paths = vec![file.clone()];
                for suffix in ["-wal", "-shm", "-journal"] {
                    let mut sidecar = file.clone().into_os_string();
                    sidecar.push(suffix);
                    paths.push(PathBuf::from(sidecar));
                }
                for path in &paths {
                    match tokio::fs::remove_file(path).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                tracing::info!(file = %file.display(), "database file removed");
            }
            None => {
                migration::drop_tables(&self.pool, &self.registry).await?;
                tracing::info!("in-memory tables dropped");
            }
        }
        Ok(())
    }
}
