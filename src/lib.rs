//! modeldb: declarative JSON models compiled onto SQLite or MongoDB behind one CRUD
//! facade.

pub mod config;
pub mod database;
pub mod error;
pub mod hash;
pub mod migration;
pub mod query;
pub mod schema;
pub mod seed;
pub mod service;
pub mod sql;
pub mod store;
pub mod types;

pub use config::{DatabaseConfig, DefaultUser, Engine, ModelDefinition, TestCase, VirtualConfig};
pub use database::Database;
pub use error::{ConfigError, DbError, TranslateError};
pub use hash::{hash, is_same_hashed};
pub use query::{translate, Guard, NativeFilter, QueryOptions, SortOrder, Target};
pub use seed::SeedOutcome;
pub use service::{Backend, Dbo, DiagnosticSink, Lookup};
pub use types::{map_type, NativeType};
