//! Compile model definitions into engine-native model handles.
//!
//! A [`Registry`] owns the compiled handles of one engine. Compiling a name that is
//! already registered returns the existing handle instead of redefining it.

pub mod document;
pub mod relational;

pub use document::{DocumentCompiler, DocumentModel};
pub use relational::{Association, AssociationKind, Column, RelationalCompiler, RelationalModel};

use crate::config::{ModelDefinition, ModelSchema, VirtualConfig};
use crate::error::ConfigError;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Turns a validated [`ModelSchema`] into an engine model.
pub trait SchemaCompiler {
    type Model: CompiledModel;

    fn compile(&self, schema: ModelSchema) -> Result<Self::Model, ConfigError>;
}

pub trait CompiledModel: Send + Sync {
    fn schema(&self) -> &ModelSchema;

    fn name(&self) -> &str {
        &self.schema().name
    }
}

/// Result of compiling one definition.
#[derive(Debug)]
pub struct Compiled<M> {
    pub handle: Arc<M>,
    pub fields: Vec<String>,
    pub virtuals: BTreeMap<String, VirtualConfig>,
    /// False when the name was already registered and the existing handle was returned.
    pub created: bool,
}

#[derive(Debug)]
pub struct Registry<M> {
    models: HashMap<String, Arc<M>>,
    order: Vec<String>,
}

impl<M> Default for Registry<M> {
    fn default() -> Self {
        Self {
            models: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<M: CompiledModel> Registry<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `definition` under `name`. `Ok(None)` when the definition has no `model`.
    pub fn compile<C>(
        &mut self,
        compiler: &C,
        name: &str,
        definition: &ModelDefinition,
    ) -> Result<Option<Compiled<M>>, ConfigError>
    where
        C: SchemaCompiler<Model = M>,
    {
        let Some(fields) = &definition.model else {
            return Ok(None);
        };
        if let Some(existing) = self.models.get(name) {
            tracing::debug!(model = %name, "already compiled; returning existing handle");
            return Ok(Some(Self::describe(existing.clone(), false)));
        }
        let schema = ModelSchema::new(name, fields.clone(), definition.schema.clone());
        let handle = Arc::new(compiler.compile(schema)?);
        self.models.insert(name.to_string(), handle.clone());
        self.order.push(name.to_string());
        Ok(Some(Self::describe(handle, true)))
    }

    fn describe(handle: Arc<M>, created: bool) -> Compiled<M> {
        let schema = handle.schema();
        let fields = schema.field_names();
        let virtuals = schema.virtuals().clone();
        Compiled {
            handle,
            fields,
            virtuals,
            created,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<M>> {
        self.models.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Names in registration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<M>> {
        self.order.iter().filter_map(|n| self.models.get(n))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
