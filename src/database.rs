//! The connection handle: compiled models, their metadata and one DBO per model.

use crate::config::{load_schemas, DatabaseConfig, Engine, SchemaSet, TestCase, VirtualConfig};
use crate::error::DbError;
use crate::migration::sync_models;
use crate::schema::{DocumentCompiler, Registry, RelationalCompiler};
use crate::seed::{ensure_default_account, SeedOutcome, ACCOUNT_MODEL};
use crate::service::{Backend, Dbo, DiagnosticSink, MongoBackend, SqliteBackend};
use crate::store::{connect_mongo, connect_sqlite};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// One live connection. Models are compiled once in [`Database::connect`] and stay
/// fixed for the lifetime of the handle.
pub struct Database {
    config: DatabaseConfig,
    backend: Arc<dyn Backend>,
    schemas: SchemaSet,
    dbos: HashMap<String, Dbo>,
    seeded: OnceCell<SeedOutcome>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("engine", &self.config.engine)
            .field("models", &self.schemas.models)
            .finish()
    }
}

impl Database {
    /// Connect with diagnostics sent to `tracing`.
    pub async fn connect(config: DatabaseConfig) -> Result<Self, DbError> {
        Self::connect_with_sink(config, DiagnosticSink::default()).await
    }

    /// Load and compile the models, open the engine, sync relational tables, wrap
    /// every model in a DBO and seed the default account.
    pub async fn connect_with_sink(config: DatabaseConfig, sink: DiagnosticSink) -> Result<Self, DbError> {
        let (backend, schemas): (Arc<dyn Backend>, SchemaSet) = match config.engine {
            Engine::Sqlite => {
                let mut registry = Registry::new();
                let schemas = load_schemas(&config, &RelationalCompiler, &mut registry).await?;
                let (pool, file) = connect_sqlite(&config).await?;
                sync_models(&pool, &registry).await?;
                let backend: Arc<dyn Backend> = Arc::new(SqliteBackend::new(pool, registry, file));
                (backend, schemas)
            }
            Engine::Mongodb => {
                let mut registry = Registry::new();
                let schemas = load_schemas(&config, &DocumentCompiler, &mut registry).await?;
                let (client, db) = connect_mongo(&config).await?;
                let backend: Arc<dyn Backend> = Arc::new(MongoBackend::new(client, db, registry));
                (backend, schemas)
            }
        };

        let dbos = schemas
            .models
            .iter()
            .map(|name| (name.clone(), Dbo::new(name.clone(), backend.clone(), sink.clone())))
            .collect();
        tracing::info!(engine = %config.engine.as_str(), models = schemas.models.len(), "models compiled");

        let db = Self {
            config,
            backend,
            schemas,
            dbos,
            seeded: OnceCell::new(),
        };
        if db.config.initialise_user_account {
            db.ensure_default_account().await;
        }
        Ok(db)
    }

    pub fn engine(&self) -> Engine {
        self.config.engine
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn dbo(&self, model: &str) -> Option<&Dbo> {
        self.dbos.get(model)
    }

    /// Model names in load order.
    pub fn model_names(&self) -> &[String] {
        &self.schemas.models
    }

    /// Declared field names of a model.
    pub fn fields(&self, model: &str) -> Option<&[String]> {
        self.schemas.fields.get(model).map(Vec::as_slice)
    }

    pub fn virtuals(&self, model: &str) -> Option<&BTreeMap<String, VirtualConfig>> {
        self.schemas.virtuals.get(model)
    }

    /// Fixtures of every model, sorted by id.
    pub fn tests(&self) -> &[TestCase] {
        &self.schemas.tests
    }

    /// Seed the default account once for this handle. A failed attempt is not
    /// remembered, so a later call tries again. Returns `None` when no account model
    /// is loaded.
    pub async fn ensure_default_account(&self) -> Option<SeedOutcome> {
        let accounts = self.dbos.get(ACCOUNT_MODEL)?;
        let user = &self.config.default_user;
        let outcome = self
            .seeded
            .get_or_try_init(|| async {
                match ensure_default_account(accounts, user).await {
                    SeedOutcome::Failed => Err(()),
                    done => Ok(done),
                }
            })
            .await;
        Some(outcome.cloned().unwrap_or(SeedOutcome::Failed))
    }

    /// Close the pool or client.
    pub async fn disconnect(self) {
        self.backend.close().await;
    }

    /// Remove everything this handle stored, then close it.
    pub async fn drop_database(self) -> Result<(), DbError> {
        self.backend.drop_database().await?;
        self.backend.close().await;
        Ok(())
    }
}
