//! Apply compiled relational models to SQLite: create missing tables, add missing
//! columns. Existing columns are never altered or dropped.

use crate::error::DbError;
use crate::schema::{Registry, RelationalModel};
use crate::sql::quoted;
use sqlx::SqlitePool;
use std::collections::HashSet;

/// CREATE TABLE IF NOT EXISTS for one model.
pub fn create_table_sql(model: &RelationalModel) -> String {
    let col_defs: Vec<String> = model.columns().iter().map(column_def).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quoted(model.table_name()),
        col_defs.join(",\n    ")
    )
}

fn column_def(col: &crate::schema::Column) -> String {
    if col.primary_key {
        format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quoted(&col.name))
    } else {
        format!("{} {}", quoted(&col.name), col.sql_type.ddl())
    }
}

/// Create every registered table and add columns declared since the table was
/// created.
pub async fn sync_models(pool: &SqlitePool, registry: &Registry<RelationalModel>) -> Result<(), DbError> {
    for model in registry.iter() {
        let ddl = create_table_sql(model);
        tracing::debug!(sql = %ddl, "ddl");
        sqlx::query(&ddl).execute(pool).await?;

        let existing: HashSet<String> = sqlx::query_scalar::<_, String>("SELECT name FROM pragma_table_info(?)")
            .bind(model.table_name())
            .fetch_all(pool)
            .await?
            .into_iter()
            .collect();
        for col in model.columns() {
            if existing.contains(&col.name) || col.primary_key {
                continue;
            }
            let alter = format!(
                "ALTER TABLE {} ADD COLUMN {}",
                quoted(model.table_name()),
                column_def(col)
            );
            tracing::info!(table = %model.table_name(), column = %col.name, "adding column");
            sqlx::query(&alter).execute(pool).await?;
        }
    }
    Ok(())
}

/// DROP TABLE for every registered model.
pub async fn drop_tables(pool: &SqlitePool, registry: &Registry<RelationalModel>) -> Result<(), DbError> {
    for model in registry.iter() {
        let sql = format!("DROP TABLE IF EXISTS {}", quoted(model.table_name()));
        tracing::debug!(sql = %sql, "ddl");
        sqlx::query(&sql).execute(pool).await?;
    }
    Ok(())
}
