//! Resolved model set: definitions validated and flattened for runtime use.

use crate::config::{FieldMap, ModelDefinition, SchemaOptions, TestCase, VirtualConfig};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Fields that exist on every stored record without being declared.
pub const IMPLICIT_FIELDS: &[&str] = &["id", "_id", "createdAt", "updatedAt"];

/// One model's declared shape plus its schema options; input to a schema compiler.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSchema {
    pub name: String,
    pub fields: FieldMap,
    pub options: SchemaOptions,
}

impl ModelSchema {
    pub fn new(name: impl Into<String>, fields: FieldMap, options: SchemaOptions) -> Self {
        Self {
            name: name.into(),
            fields,
            options,
        }
    }

    /// Declared field names in declaration order, virtual-typed fields included.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.names()
    }

    /// Name of the field whose writes are hashed, when password encryption is on.
    pub fn hashed_field(&self) -> Option<&str> {
        self.options
            .encrypt_password
            .then_some(self.options.password_field.as_str())
    }

    pub fn virtuals(&self) -> &BTreeMap<String, VirtualConfig> {
        &self.options.virtuals
    }
}

/// A definition read from disk (or embedded), before compilation.
#[derive(Clone, Debug)]
pub struct LoadedDefinition {
    pub name: String,
    /// File the definition came from; `builtin:<name>` for embedded models.
    pub source: PathBuf,
    pub definition: ModelDefinition,
}

/// Everything the loader produced besides the compiled handles.
#[derive(Clone, Debug, Default)]
pub struct SchemaSet {
    /// Model names in load order.
    pub models: Vec<String>,
    pub fields: HashMap<String, Vec<String>>,
    pub virtuals: HashMap<String, BTreeMap<String, VirtualConfig>>,
    /// Fixtures of every model, sorted by id.
    pub tests: Vec<TestCase>,
}

impl SchemaSet {
    pub fn contains(&self, model: &str) -> bool {
        self.fields.contains_key(model)
    }
}
