//! Example consumer: a separate Rust project that uses modeldb as a dependency.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Configure with `MODELDB_*` variables or a `.env` file, e.g.
//! `MODELDB_MEMORY_ONLY=true` or `MODELDB_ENGINE=mongodb`.

use modeldb::{Database, DatabaseConfig};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("modeldb=info")),
        )
        .init();

    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(config).await?;
    tracing::info!("connected to {}", db.engine().as_str());

    for name in db.model_names() {
        let Some(dbo) = db.dbo(name) else {
            continue;
        };
        let fields = db.fields(name).unwrap_or_default().join(", ");
        let count = dbo.count(&json!({})).await;
        tracing::info!(model = %name, count, "fields: {}", fields);
    }

    db.disconnect().await;
    Ok(())
}
