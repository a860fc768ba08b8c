//! Engine backends and the per-model DBO built on top of them.

mod backend;
mod dbo;
mod mongo;
mod sqlite;

pub use crate::sql::UpdateScope;
pub use backend::Backend;
pub use dbo::{Dbo, DiagnosticSink, Lookup};
pub use mongo::MongoBackend;
pub use sqlite::SqliteBackend;
