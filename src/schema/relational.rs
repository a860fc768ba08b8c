//! Relational (SQLite) model: columns, primary key, associations, write transforms.

use crate::config::ModelSchema;
use crate::error::{ConfigError, DbError};
use crate::hash::hash_value;
use crate::schema::{CompiledModel, SchemaCompiler};
use crate::sql::SqlBindValue;
use crate::types::{sql_type, SqlType};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";
const DEFAULT_PRIMARY_KEY: &str = "id";

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    /// INTEGER PRIMARY KEY AUTOINCREMENT.
    pub primary_key: bool,
    /// Writes are replaced by their digest.
    pub hashed: bool,
    /// Maintained by the model (createdAt / updatedAt).
    pub timestamp: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssociationKind {
    HasOne,
    HasMany,
}

/// Virtual relationship: rows of `target` whose `foreign_key` equals our `source_key`.
#[derive(Clone, Debug, PartialEq)]
pub struct Association {
    pub name: String,
    pub kind: AssociationKind,
    pub target: String,
    pub source_key: String,
    pub foreign_key: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    Insert,
    Update,
}

#[derive(Clone, Debug)]
pub struct RelationalModel {
    schema: ModelSchema,
    columns: Vec<Column>,
    primary_key: String,
    associations: BTreeMap<String, Association>,
}

impl CompiledModel for RelationalModel {
    fn schema(&self) -> &ModelSchema {
        &self.schema
    }
}

impl RelationalModel {
    pub fn table_name(&self) -> &str {
        &self.schema.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn association(&self, name: &str) -> Option<&Association> {
        self.associations.get(name)
    }

    pub fn associations(&self) -> impl Iterator<Item = &Association> {
        self.associations.values()
    }

    /// Column values to write for `data`. Unknown keys are ignored; the hashed column
    /// is digested; timestamps are set from `now`. On update the primary key and
    /// `createdAt` are never written.
    pub fn write_values(
        &self,
        data: &Map<String, Value>,
        mode: WriteMode,
        now: &str,
    ) -> Result<Vec<(String, SqlBindValue)>, DbError> {
        let mut out = Vec::new();
        for col in &self.columns {
            if col.timestamp {
                let stamp = match (mode, col.name.as_str()) {
                    (WriteMode::Update, CREATED_AT) => continue,
                    _ => SqlBindValue::Text(now.to_string()),
                };
                out.push((col.name.clone(), stamp));
                continue;
            }
            if col.primary_key && mode == WriteMode::Update {
                continue;
            }
            let Some(v) = data.get(&col.name) else {
                continue;
            };
            let v = if col.hashed { hash_value(v) } else { v.clone() };
            let bind = SqlBindValue::for_column(&col.sql_type, &v).map_err(|reason| DbError::Cast {
                field: col.name.clone(),
                reason,
            })?;
            out.push((col.name.clone(), bind));
        }
        Ok(out)
    }

    /// Turn a raw row into the caller-facing shape: booleans from 0/1, JSON columns
    /// parsed.
    pub fn decode_row(&self, row: Map<String, Value>) -> Map<String, Value> {
        row.into_iter()
            .map(|(k, v)| {
                let v = match self.column(&k) {
                    Some(col) => decode_value(&col.sql_type, v),
                    None => v,
                };
                (k, v)
            })
            .collect()
    }
}

fn decode_value(ty: &SqlType, v: Value) -> Value {
    match (ty, v) {
        (SqlType::Boolean, Value::Number(n)) => Value::Bool(n.as_f64().is_some_and(|f| f != 0.0)),
        (SqlType::Json, Value::String(s)) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        (_, v) => v,
    }
}

/// Compiles [`ModelSchema`]s into [`RelationalModel`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct RelationalCompiler;

impl SchemaCompiler for RelationalCompiler {
    type Model = RelationalModel;

    fn compile(&self, schema: ModelSchema) -> Result<RelationalModel, ConfigError> {
        let primary_key = schema
            .options
            .id_field
            .clone()
            .unwrap_or_else(|| DEFAULT_PRIMARY_KEY.to_string());
        let hashed = schema.hashed_field().map(str::to_string);

        let mut columns = Vec::new();
        if !schema.fields.contains(&primary_key) {
            columns.push(Column {
                name: primary_key.clone(),
                sql_type: SqlType::Integer,
                primary_key: true,
                hashed: false,
                timestamp: false,
            });
        }
        for (name, ty) in schema.fields.iter() {
            let Some(mut col_type) = sql_type(ty) else {
                continue;
            };
            if let SqlType::Custom(type_name) = &col_type {
                check_custom_type(&schema.name, name, type_name)?;
            }
            let is_pk = name == primary_key;
            if is_pk {
                col_type = SqlType::Integer;
            }
            columns.push(Column {
                name: name.to_string(),
                sql_type: col_type,
                primary_key: is_pk,
                hashed: hashed.as_deref() == Some(name),
                timestamp: false,
            });
        }
        if schema.options.timestamps {
            for ts in [CREATED_AT, UPDATED_AT] {
                match columns.iter_mut().find(|c| c.name == ts) {
                    Some(col) => {
                        col.timestamp = true;
                        col.sql_type = SqlType::DateTime;
                    }
                    None => columns.push(Column {
                        name: ts.to_string(),
                        sql_type: SqlType::DateTime,
                        primary_key: false,
                        hashed: false,
                        timestamp: true,
                    }),
                }
            }
        }

        let associations = schema
            .virtuals()
            .iter()
            .map(|(name, v)| {
                let kind = if v.just_one {
                    AssociationKind::HasOne
                } else {
                    AssociationKind::HasMany
                };
                let association = Association {
                    name: name.clone(),
                    kind,
                    target: v.ref_model.clone(),
                    source_key: v.local_field.clone(),
                    foreign_key: v.foreign_field.clone(),
                };
                (name.clone(), association)
            })
            .collect();

        Ok(RelationalModel {
            schema,
            columns,
            primary_key,
            associations,
        })
    }
}

/// Custom type names end up in DDL verbatim, so only plain type syntax is allowed.
fn check_custom_type(model: &str, field: &str, type_name: &str) -> Result<(), ConfigError> {
    let ok = !type_name.is_empty()
        && type_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '(' | ')' | ','));
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "{}.{}: unsupported column type '{}'",
            model, field, type_name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelDefinition;
    use crate::hash::hash;
    use serde_json::json;

    fn compile(v: serde_json::Value) -> RelationalModel {
        let def: ModelDefinition = serde_json::from_value(v).unwrap();
        let schema = ModelSchema::new("thing", def.model.unwrap(), def.schema);
        RelationalCompiler.compile(schema).unwrap()
    }

    #[test]
    fn test_implicit_primary_key_and_timestamps() {
        let m = compile(json!({ "model": { "title": "String", "extra": "Virtual" } }));
        let names: Vec<&str> = m.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "title", "createdAt", "updatedAt"]);
        assert_eq!(m.primary_key(), "id");
        assert!(m.columns()[0].primary_key);
    }

    #[test]
    fn test_id_field_becomes_primary_key() {
        let m = compile(json!({
            "model": { "userId": "ObjectId", "name": "String" },
            "schema": { "idField": "userId", "timestamps": false }
        }));
        assert_eq!(m.primary_key(), "userId");
        assert_eq!(m.columns().len(), 2);
        assert_eq!(m.column("userId").unwrap().sql_type, SqlType::Integer);
    }

    #[test]
    fn test_write_values_hashes_and_stamps() {
        let m = compile(json!({
            "model": { "username": "String", "password": "String" },
            "schema": { "encryptPassword": true }
        }));
        let data = json!({ "username": "ann", "password": "pw", "unknown": 1 });
        let values = m
            .write_values(data.as_object().unwrap(), WriteMode::Insert, "2024-01-01T00:00:00.000Z")
            .unwrap();
        assert_eq!(values[0], ("username".into(), SqlBindValue::Text("ann".into())));
        assert_eq!(values[1], ("password".into(), SqlBindValue::Text(hash("pw"))));
        assert_eq!(values.len(), 4);

        let update = m
            .write_values(data.as_object().unwrap(), WriteMode::Update, "now")
            .unwrap();
        assert!(update.iter().all(|(k, _)| k != "createdAt"));
        assert!(update.iter().any(|(k, _)| k == "updatedAt"));
    }

    #[test]
    fn test_write_values_cast_error() {
        let m = compile(json!({ "model": { "age": "Number" } }));
        let err = m
            .write_values(json!({ "age": "old" }).as_object().unwrap(), WriteMode::Insert, "now")
            .unwrap_err();
        assert!(matches!(err, DbError::Cast { ref field, .. } if field == "age"));
    }

    #[test]
    fn test_decode_row() {
        let m = compile(json!({ "model": { "active": "Boolean", "tags": ["String"] } }));
        let row = json!({ "id": 1, "active": 1, "tags": "[\"a\",\"b\"]" });
        let decoded = m.decode_row(row.as_object().unwrap().clone());
        assert_eq!(Value::Object(decoded), json!({ "id": 1, "active": true, "tags": ["a", "b"] }));
    }

    #[test]
    fn test_associations() {
        let m = compile(json!({
            "model": { "authorId": "ObjectId" },
            "schema": { "virtuals": {
                "author": { "ref": "user", "localField": "authorId", "foreignField": "id", "justOne": true },
                "comments": { "ref": "comment", "localField": "id", "foreignField": "postId" }
            } }
        }));
        assert_eq!(m.association("author").unwrap().kind, AssociationKind::HasOne);
        let comments = m.association("comments").unwrap();
        assert_eq!(comments.kind, AssociationKind::HasMany);
        assert_eq!(comments.foreign_key, "postId");
        assert_eq!(comments.source_key, "id");
    }

    #[test]
    fn test_rejects_unsafe_custom_type() {
        let def: ModelDefinition =
            serde_json::from_value(json!({ "model": { "x": "TEXT); DROP TABLE y; --" } })).unwrap();
        let schema = ModelSchema::new("thing", def.model.unwrap(), def.schema);
        assert!(RelationalCompiler.compile(schema).is_err());
    }
}
