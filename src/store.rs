//! Open engine connections from a [`DatabaseConfig`].

use crate::config::{DatabaseConfig, DEFAULT_DATABASE_FILE};
use crate::error::DbError;
use mongodb::options::ClientOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Document database used when neither the connection string nor the options name one.
pub const DEFAULT_DATABASE_NAME: &str = "modeldb";

/// Database file for file-backed SQLite.
pub fn database_file(config: &DatabaseConfig) -> PathBuf {
    config
        .database_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_FILE))
}

/// Create the parent directory of the database file if missing.
pub async fn ensure_database_dir(file: &Path) -> Result<(), DbError> {
    if let Some(dir) = file.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }
    Ok(())
}

/// Open the SQLite pool. In-memory databases use a single connection that is never
/// recycled, since each connection would otherwise see its own empty database.
/// Returns the file path for file-backed databases.
pub async fn connect_sqlite(config: &DatabaseConfig) -> Result<(SqlitePool, Option<PathBuf>), DbError> {
    let pool_options = SqlitePoolOptions::new()
        .acquire_timeout(Duration::from_secs(config.connection_options.acquire_timeout_secs));

    if config.memory_only {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.with_regexp();
        let pool = pool_options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        tracing::info!("connected to in-memory sqlite");
        return Ok((pool, None));
    }

    let file = database_file(config);
    ensure_database_dir(&file).await?;
    let options = SqliteConnectOptions::new()
        .filename(&file)
        .create_if_missing(true)
        .with_regexp();
    let pool = pool_options
        .max_connections(config.connection_options.max_connections.max(1))
        .connect_with(options)
        .await?;
    tracing::info!(file = %file.display(), "connected to sqlite");
    Ok((pool, Some(file)))
}

/// Connect to MongoDB and pick the database: the one named in the connection string,
/// else `connectionOptions.databaseName`, else [`DEFAULT_DATABASE_NAME`].
pub async fn connect_mongo(config: &DatabaseConfig) -> Result<(mongodb::Client, mongodb::Database), DbError> {
    let opts = &config.connection_options;
    let mut options = ClientOptions::parse(config.connection_string()).await?;
    if let Some(app_name) = &opts.app_name {
        options.app_name = Some(app_name.clone());
    }
    options.max_pool_size = Some(opts.max_connections.max(1));
    options.server_selection_timeout = Some(Duration::from_secs(opts.acquire_timeout_secs));

    let client = mongodb::Client::with_options(options)?;
    let db = match client.default_database() {
        Some(db) => db,
        None => client.database(opts.database_name.as_deref().unwrap_or(DEFAULT_DATABASE_NAME)),
    };
    db.run_command(bson::doc! { "ping": 1 }).await?;
    tracing::info!(database = %db.name(), "connected to mongodb");
    Ok((client, db))
}
