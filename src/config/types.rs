//! Raw config types matching the model definition JSON and the connection settings.

use crate::error::ConfigError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

/// Storage engine behind the facade.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Sqlite,
    Mongodb,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Sqlite => "sqlite",
            Engine::Mongodb => "mongodb",
        }
    }
}

impl FromStr for Engine {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(Engine::Sqlite),
            "mongodb" | "mongo" => Ok(Engine::Mongodb),
            other => Err(ConfigError::UnknownEngine(other.to_string())),
        }
    }
}

/// Built-in logical types a field descriptor may name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    String,
    Number,
    Date,
    Boolean,
    ObjectId,
    Mixed,
    Virtual,
}

impl Primitive {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "String" => Primitive::String,
            "Number" => Primitive::Number,
            "Date" => Primitive::Date,
            "Boolean" => Primitive::Boolean,
            "ObjectId" => Primitive::ObjectId,
            "Mixed" => Primitive::Mixed,
            "Virtual" => Primitive::Virtual,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Primitive::String => "String",
            Primitive::Number => "Number",
            Primitive::Date => "Date",
            Primitive::Boolean => "Boolean",
            Primitive::ObjectId => "ObjectId",
            Primitive::Mixed => "Mixed",
            Primitive::Virtual => "Virtual",
        }
    }
}

/// Parsed field descriptor: a type name, an array of one element descriptor, or a
/// nested field map.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldType {
    Primitive(Primitive),
    /// A type name outside the built-in set; the engine decides how to store it.
    Custom(String),
    Array(Box<FieldType>),
    Object(FieldMap),
}

impl FieldType {
    pub fn from_json(v: &Value) -> Result<Self, String> {
        match v {
            Value::String(name) => Ok(Primitive::from_name(name)
                .map(FieldType::Primitive)
                .unwrap_or_else(|| FieldType::Custom(name.clone()))),
            Value::Array(items) => match items.as_slice() {
                [] => Ok(FieldType::Array(Box::new(FieldType::Primitive(Primitive::Mixed)))),
                [single] => Ok(FieldType::Array(Box::new(FieldType::from_json(single)?))),
                many if many.iter().all(Value::is_object) => {
                    // Several element maps describe one element shape; merge them in order.
                    let mut merged = FieldMap::default();
                    for item in many {
                        if let FieldType::Object(map) = FieldType::from_json(item)? {
                            for (name, ty) in map.0 {
                                merged.insert(name, ty);
                            }
                        }
                    }
                    Ok(FieldType::Array(Box::new(FieldType::Object(merged))))
                }
                _ => Err("array descriptor must declare exactly one element type".into()),
            },
            Value::Object(obj) => {
                let mut map = FieldMap::default();
                for (name, item) in obj {
                    let ty = FieldType::from_json(item).map_err(|e| format!("{}: {}", name, e))?;
                    map.insert(name.clone(), ty);
                }
                Ok(FieldType::Object(map))
            }
            other => Err(format!(
                "type descriptor must be a type name, an array or an object; got {}",
                type_name_of_json(other)
            )),
        }
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, FieldType::Primitive(Primitive::Virtual))
    }
}

fn type_name_of_json(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Ordered field name to descriptor map.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldMap(pub Vec<(String, FieldType)>);

impl FieldMap {
    pub fn get(&self, name: &str) -> Option<&FieldType> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert or replace, keeping the first position of `name`.
    pub fn insert(&mut self, name: String, ty: FieldType) {
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = ty,
            None => self.0.push((name, ty)),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldType)> {
        self.0.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for FieldMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Value::deserialize(deserializer)?;
        match FieldType::from_json(&v) {
            Ok(FieldType::Object(map)) => Ok(map),
            Ok(_) => Err(serde::de::Error::custom(format!(
                "model must be an object of field descriptors; got {}",
                type_name_of_json(&v)
            ))),
            Err(e) => Err(serde::de::Error::custom(e)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualConfig {
    #[serde(rename = "ref")]
    pub ref_model: String,
    pub local_field: String,
    pub foreign_field: String,
    #[serde(default)]
    pub just_one: bool,
}

/// Options under a definition's `schema` key. Unknown keys are ignored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaOptions {
    #[serde(default = "default_true")]
    pub timestamps: bool,
    #[serde(default)]
    pub version_key: bool,
    #[serde(default)]
    pub encrypt_password: bool,
    #[serde(default = "default_password_field")]
    pub password_field: String,
    #[serde(default)]
    pub id_field: Option<String>,
    #[serde(default)]
    pub virtuals: BTreeMap<String, VirtualConfig>,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self {
            timestamps: true,
            version_key: false,
            encrypt_password: false,
            password_field: default_password_field(),
            id_field: None,
            virtuals: BTreeMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_password_field() -> String {
    "password".into()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestExpectation {
    #[serde(default)]
    pub parameters: Vec<Value>,
    #[serde(default)]
    pub response: Value,
    #[serde(default, rename = "match")]
    pub match_field: Option<String>,
}

/// A test fixture attached to a model definition. `model` and `id` are filled in when
/// fixtures are flattened.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub success: TestExpectation,
    #[serde(default)]
    pub failure: TestExpectation,
}

/// One definition file. A file with no `model` key is not a model and is skipped.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ModelDefinition {
    #[serde(default)]
    pub model: Option<FieldMap>,
    #[serde(default)]
    pub schema: SchemaOptions,
    #[serde(default)]
    pub test: BTreeMap<String, TestCase>,
}

impl ModelDefinition {
    /// Same model shape and schema options; fixtures are not compared.
    pub fn same_shape(&self, other: &ModelDefinition) -> bool {
        self.model == other.model && self.schema == other.schema
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DefaultUser {
    pub username: String,
    pub password: String,
}

impl Default for DefaultUser {
    fn default() -> Self {
        Self {
            username: "superuser".into(),
            password: "superpassword".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionOptions {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    /// Document database name when the connection string carries none.
    pub database_name: Option<String>,
    pub app_name: Option<String>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout_secs: 30,
            database_name: None,
            app_name: None,
        }
    }
}

/// Connection and loading settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub engine: Engine,
    pub database_file: Option<PathBuf>,
    pub memory_only: bool,
    pub connection_string: Option<String>,
    pub connection_options: ConnectionOptions,
    pub default_user: DefaultUser,
    pub user_data_model_path: Option<PathBuf>,
    pub initialise_user_account: bool,
    pub reject_conflicting_models: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: Engine::Sqlite,
            database_file: None,
            memory_only: false,
            connection_string: None,
            connection_options: ConnectionOptions::default(),
            default_user: DefaultUser::default(),
            user_data_model_path: None,
            initialise_user_account: true,
            reject_conflicting_models: false,
        }
    }
}

pub const DEFAULT_DATABASE_FILE: &str = "./datastore/database.db";
pub const DEFAULT_CONNECTION_STRING: &str = "mongodb://localhost:27017/modeldb";

impl DatabaseConfig {
    /// In-memory SQLite with the built-in account models.
    pub fn memory() -> Self {
        Self {
            memory_only: true,
            ..Self::default()
        }
    }

    /// Defaults overridden by `MODELDB_*` variables (and a `.env` file when present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        if let Ok(engine) = std::env::var("MODELDB_ENGINE") {
            config.engine = engine.parse()?;
        }
        if let Ok(file) = std::env::var("MODELDB_DATABASE_FILE") {
            config.database_file = Some(PathBuf::from(file));
        }
        if let Ok(flag) = std::env::var("MODELDB_MEMORY_ONLY") {
            config.memory_only = is_truthy(&flag);
        }
        if let Ok(url) = std::env::var("MODELDB_CONNECTION_STRING") {
            config.connection_string = Some(url);
        }
        if let Ok(name) = std::env::var("MODELDB_DATABASE_NAME") {
            config.connection_options.database_name = Some(name);
        }
        if let Ok(path) = std::env::var("MODELDB_USER_MODELS") {
            config.user_data_model_path = Some(PathBuf::from(path));
        }
        if let Ok(username) = std::env::var("MODELDB_DEFAULT_USERNAME") {
            config.default_user.username = username;
        }
        if let Ok(password) = std::env::var("MODELDB_DEFAULT_PASSWORD") {
            config.default_user.password = password;
        }
        if let Ok(flag) = std::env::var("MODELDB_INITIALISE_USER_ACCOUNT") {
            config.initialise_user_account = is_truthy(&flag);
        }
        Ok(config)
    }

    pub fn connection_string(&self) -> &str {
        self.connection_string
            .as_deref()
            .unwrap_or(DEFAULT_CONNECTION_STRING)
    }
}

fn is_truthy(s: &str) -> bool {
    matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_type_primitives_and_custom() {
        assert_eq!(
            FieldType::from_json(&json!("String")).unwrap(),
            FieldType::Primitive(Primitive::String)
        );
        assert_eq!(
            FieldType::from_json(&json!("Decimal128")).unwrap(),
            FieldType::Custom("Decimal128".into())
        );
    }

    #[test]
    fn test_field_type_arrays() {
        assert_eq!(
            FieldType::from_json(&json!([])).unwrap(),
            FieldType::Array(Box::new(FieldType::Primitive(Primitive::Mixed)))
        );
        assert_eq!(
            FieldType::from_json(&json!(["Number"])).unwrap(),
            FieldType::Array(Box::new(FieldType::Primitive(Primitive::Number)))
        );
        let merged = FieldType::from_json(&json!([{ "a": "String" }, { "b": "Date" }])).unwrap();
        let FieldType::Array(inner) = merged else { panic!("expected array") };
        let FieldType::Object(map) = *inner else { panic!("expected object") };
        assert_eq!(map.names(), vec!["a".to_string(), "b".to_string()]);
        assert!(FieldType::from_json(&json!(["String", "Number"])).is_err());
    }

    #[test]
    fn test_field_type_rejects_scalars() {
        let err = FieldType::from_json(&json!(5)).unwrap_err();
        assert!(err.contains("number"));
    }

    #[test]
    fn test_definition_defaults() {
        let def: ModelDefinition = serde_json::from_value(json!({
            "model": { "title": "String", "tags": ["String"], "meta": { "views": "Number" } }
        }))
        .unwrap();
        let model = def.model.unwrap();
        assert_eq!(model.names(), vec!["title", "tags", "meta"]);
        assert!(def.schema.timestamps);
        assert!(!def.schema.encrypt_password);
        assert_eq!(def.schema.password_field, "password");
        assert!(def.test.is_empty());
    }

    #[test]
    fn test_definition_without_model() {
        let def: ModelDefinition = serde_json::from_value(json!({ "notes": "not a model" })).unwrap();
        assert!(def.model.is_none());
    }

    #[test]
    fn test_virtual_config_keys() {
        let opts: SchemaOptions = serde_json::from_value(json!({
            "virtuals": {
                "author": { "ref": "user", "localField": "authorId", "foreignField": "id", "justOne": true }
            },
            "toJSON": { "virtuals": true }
        }))
        .unwrap();
        let v = &opts.virtuals["author"];
        assert_eq!(v.ref_model, "user");
        assert_eq!(v.local_field, "authorId");
        assert!(v.just_one);
    }

    #[test]
    fn test_database_config_from_json() {
        let config: DatabaseConfig = serde_json::from_value(json!({
            "type": "mongodb",
            "connectionString": "mongodb://db:27017/app",
            "defaultUser": { "username": "root", "password": "pw" }
        }))
        .unwrap();
        assert_eq!(config.engine, Engine::Mongodb);
        assert_eq!(config.connection_string(), "mongodb://db:27017/app");
        assert_eq!(config.default_user.username, "root");
        assert!(config.initialise_user_account);
    }

    #[test]
    fn test_engine_from_str() {
        assert_eq!("SQLite".parse::<Engine>().unwrap(), Engine::Sqlite);
        assert_eq!("mongodb".parse::<Engine>().unwrap(), Engine::Mongodb);
        assert!(matches!("postgres".parse::<Engine>(), Err(ConfigError::UnknownEngine(_))));
    }
}
