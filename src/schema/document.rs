//! Document (MongoDB) model: typed casting and write hooks.

use crate::config::ModelSchema;
use crate::error::{ConfigError, DbError};
use crate::hash::hash;
use crate::schema::{CompiledModel, SchemaCompiler};
use crate::types::{document_type, parse_timestamp, timestamp_from_millis, DocumentType};
use bson::oid::ObjectId;
use bson::{Bson, Document};
use serde_json::{Map, Number, Value};

pub const ID: &str = "_id";
pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";

/// Work done on a document before it is written.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteHook {
    /// Copy `_id` into the named field.
    CopyId(String),
    Timestamps,
    /// Replace the named field with its digest when present.
    HashField(String),
}

#[derive(Clone, Debug)]
pub struct DocumentModel {
    schema: ModelSchema,
    fields: Vec<(String, DocumentType)>,
    pre_save: Vec<WriteHook>,
    pre_update: Vec<WriteHook>,
}

impl CompiledModel for DocumentModel {
    fn schema(&self) -> &ModelSchema {
        &self.schema
    }
}

impl DocumentModel {
    pub fn collection_name(&self) -> &str {
        &self.schema.name
    }

    pub fn fields(&self) -> &[(String, DocumentType)] {
        &self.fields
    }

    /// Type at a dotted path, descending through embedded maps and arrays.
    pub fn field_type(&self, path: &str) -> Option<&DocumentType> {
        if self.schema.options.timestamps && (path == CREATED_AT || path == UPDATED_AT) {
            return Some(&DocumentType::Date);
        }
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut ty = self.fields.iter().find(|(n, _)| n == first).map(|(_, t)| t)?;
        for part in parts {
            ty = match ty {
                DocumentType::Array(inner) => match inner.as_ref() {
                    DocumentType::Embedded(fields) => lookup(fields, part)?,
                    _ => return None,
                },
                DocumentType::Embedded(fields) => lookup(fields, part)?,
                _ => return None,
            };
        }
        Some(ty)
    }

    /// Cast `data` to a document of declared fields. Undeclared keys are dropped; a
    /// value that does not fit its declared type is an error.
    pub fn cast_document(&self, data: &Map<String, Value>) -> Result<Document, DbError> {
        let mut doc = Document::new();
        if let Some(id) = data.get(ID) {
            doc.insert(ID, coerce_object_id(id));
        }
        self.cast_fields(data, &mut doc)?;
        Ok(doc)
    }

    /// Cast the fields of an update. `_id` and the id field are never updated.
    pub fn cast_update(&self, data: &Map<String, Value>) -> Result<Document, DbError> {
        let mut doc = Document::new();
        self.cast_fields(data, &mut doc)?;
        if let Some(id_field) = &self.schema.options.id_field {
            doc.remove(id_field);
        }
        Ok(doc)
    }

    fn cast_fields(&self, data: &Map<String, Value>, doc: &mut Document) -> Result<(), DbError> {
        for (name, ty) in &self.fields {
            if let Some(v) = data.get(name) {
                doc.insert(name.clone(), cast(name, ty, v)?);
            }
        }
        Ok(())
    }

    /// Assign `_id` when missing, then run the save hooks.
    pub fn apply_pre_save(&self, doc: &mut Document, now: bson::DateTime) {
        if !doc.contains_key(ID) {
            doc.insert(ID, ObjectId::new());
        }
        for hook in &self.pre_save {
            match hook {
                WriteHook::CopyId(field) => {
                    if let Some(id) = doc.get(ID).cloned() {
                        let id = self.id_for_field(field, id);
                        doc.insert(field.clone(), id);
                    }
                }
                WriteHook::Timestamps => {
                    doc.insert(CREATED_AT, now);
                    doc.insert(UPDATED_AT, now);
                }
                WriteHook::HashField(field) => hash_in_place(doc, field),
            }
        }
    }

    /// Run the update hooks on a `$set` document.
    pub fn apply_pre_update(&self, set: &mut Document, now: bson::DateTime) {
        for hook in &self.pre_update {
            match hook {
                WriteHook::Timestamps => {
                    set.insert(UPDATED_AT, now);
                }
                WriteHook::HashField(field) => hash_in_place(set, field),
                WriteHook::CopyId(_) => {}
            }
        }
    }

    /// `$setOnInsert` fields for an upsert: `_id` (fresh unless the filter pins one),
    /// its copy and `createdAt`.
    pub fn on_insert_fields(&self, id: Option<ObjectId>, now: bson::DateTime) -> Document {
        let id = id.unwrap_or_else(ObjectId::new);
        let mut doc = Document::new();
        doc.insert(ID, id);
        for hook in &self.pre_save {
            match hook {
                WriteHook::CopyId(field) => {
                    doc.insert(field.clone(), self.id_for_field(field, Bson::ObjectId(id)));
                }
                WriteHook::Timestamps => {
                    doc.insert(CREATED_AT, now);
                }
                WriteHook::HashField(_) => {}
            }
        }
        doc
    }

    fn id_for_field(&self, field: &str, id: Bson) -> Bson {
        match (self.field_type(field), &id) {
            (Some(DocumentType::String), Bson::ObjectId(oid)) => Bson::String(oid.to_hex()),
            _ => id,
        }
    }

    /// Convert a filter operand for `path`, turning hex strings into ObjectIds and date
    /// strings into dates where the field is declared that way.
    pub fn filter_value(&self, path: &str, v: &Value) -> Bson {
        if path == ID || path.ends_with("._id") {
            return match v {
                Value::Array(items) => Bson::Array(items.iter().map(coerce_object_id).collect()),
                _ => coerce_object_id(v),
            };
        }
        match self.field_type(path) {
            Some(ty) => coerce_filter(ty, v),
            None => json_to_bson(v),
        }
    }
}

fn lookup<'a>(fields: &'a [(String, DocumentType)], name: &str) -> Option<&'a DocumentType> {
    fields.iter().find(|(n, _)| n == name).map(|(_, t)| t)
}

fn hash_in_place(doc: &mut Document, field: &str) {
    let hashed = match doc.get(field) {
        None | Some(Bson::Null) => return,
        Some(Bson::String(s)) => hash(s),
        Some(other) => hash(&bson_to_json(other).to_string()),
    };
    doc.insert(field, hashed);
}

fn coerce_object_id(v: &Value) -> Bson {
    match v {
        Value::String(s) => ObjectId::parse_str(s)
            .map(Bson::ObjectId)
            .unwrap_or_else(|_| Bson::String(s.clone())),
        other => json_to_bson(other),
    }
}

fn coerce_filter(ty: &DocumentType, v: &Value) -> Bson {
    match (ty, v) {
        (_, Value::Array(items)) => {
            let inner = match ty {
                DocumentType::Array(inner) => inner.as_ref(),
                other => other,
            };
            Bson::Array(items.iter().map(|i| coerce_filter(inner, i)).collect())
        }
        (DocumentType::Array(inner), _) => coerce_filter(inner, v),
        (DocumentType::ObjectId, _) => coerce_object_id(v),
        (DocumentType::Date, Value::String(s)) => parse_timestamp(s)
            .map(|ms| Bson::DateTime(bson::DateTime::from_millis(ms)))
            .unwrap_or_else(|| Bson::String(s.clone())),
        _ => json_to_bson(v),
    }
}

fn cast_error(path: &str, reason: impl Into<String>) -> DbError {
    DbError::Cast {
        field: path.to_string(),
        reason: reason.into(),
    }
}

fn cast(path: &str, ty: &DocumentType, v: &Value) -> Result<Bson, DbError> {
    if v.is_null() {
        return Ok(Bson::Null);
    }
    match ty {
        DocumentType::String => match v {
            Value::String(s) => Ok(Bson::String(s.clone())),
            Value::Number(n) => Ok(Bson::String(n.to_string())),
            Value::Bool(b) => Ok(Bson::String(b.to_string())),
            _ => Err(cast_error(path, "expected a string")),
        },
        DocumentType::Number => match v {
            Value::Number(n) => n
                .as_f64()
                .map(Bson::Double)
                .ok_or_else(|| cast_error(path, "expected a number")),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Bson::Double)
                .map_err(|_| cast_error(path, format!("expected a number, got '{}'", s))),
            _ => Err(cast_error(path, "expected a number")),
        },
        DocumentType::Date => {
            let ms = match v {
                Value::String(s) => parse_timestamp(s),
                Value::Number(n) => n.as_i64(),
                _ => None,
            };
            ms.map(|ms| Bson::DateTime(bson::DateTime::from_millis(ms)))
                .ok_or_else(|| cast_error(path, "expected an RFC 3339 date or epoch milliseconds"))
        }
        DocumentType::Boolean => match v {
            Value::Bool(b) => Ok(Bson::Boolean(*b)),
            Value::Number(n) if n.as_i64() == Some(0) => Ok(Bson::Boolean(false)),
            Value::Number(n) if n.as_i64() == Some(1) => Ok(Bson::Boolean(true)),
            Value::String(s) if s == "true" => Ok(Bson::Boolean(true)),
            Value::String(s) if s == "false" => Ok(Bson::Boolean(false)),
            _ => Err(cast_error(path, "expected a boolean")),
        },
        DocumentType::ObjectId => match v {
            Value::String(s) => ObjectId::parse_str(s)
                .map(Bson::ObjectId)
                .map_err(|_| cast_error(path, format!("expected a 24 character hex id, got '{}'", s))),
            _ => Err(cast_error(path, "expected a 24 character hex id")),
        },
        DocumentType::Mixed | DocumentType::Custom(_) => Ok(json_to_bson(v)),
        DocumentType::Array(inner) => match v {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| cast(&format!("{}.{}", path, i), inner, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Bson::Array),
            single => Ok(Bson::Array(vec![cast(path, inner, single)?])),
        },
        DocumentType::Embedded(fields) => match v {
            Value::Object(obj) => {
                let mut doc = Document::new();
                for (name, field_ty) in fields {
                    if let Some(item) = obj.get(name) {
                        doc.insert(name.clone(), cast(&format!("{}.{}", path, name), field_ty, item)?);
                    }
                }
                Ok(Bson::Document(doc))
            }
            _ => Err(cast_error(path, "expected an object")),
        },
    }
}

pub fn json_to_bson(v: &Value) -> Bson {
    match v {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Bson::Int64(i),
            None => n.as_f64().map(Bson::Double).unwrap_or(Bson::Null),
        },
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(obj) => Bson::Document(
            obj.iter()
                .map(|(k, v)| (k.clone(), json_to_bson(v)))
                .collect(),
        ),
    }
}

/// Caller-facing JSON: ObjectIds as hex, dates as RFC 3339, integral doubles as
/// integers.
pub fn bson_to_json(b: &Bson) -> Value {
    match b {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(v) => Value::Bool(*v),
        Bson::Int32(i) => Value::from(*i),
        Bson::Int64(i) => Value::from(*i),
        Bson::Double(f) => {
            if f.fract() == 0.0 && f.abs() < 9.0e15 {
                Value::from(*f as i64)
            } else {
                Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null)
            }
        }
        Bson::String(s) => Value::String(s.clone()),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => timestamp_from_millis(dt.timestamp_millis())
            .map(Value::String)
            .unwrap_or(Value::Null),
        Bson::Array(items) => Value::Array(items.iter().map(bson_to_json).collect()),
        Bson::Document(doc) => document_to_json(doc),
        other => other.clone().into_relaxed_extjson(),
    }
}

pub fn document_to_json(doc: &Document) -> Value {
    Value::Object(
        doc.iter()
            .map(|(k, v)| (k.clone(), bson_to_json(v)))
            .collect(),
    )
}

/// Compiles [`ModelSchema`]s into [`DocumentModel`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct DocumentCompiler;

impl SchemaCompiler for DocumentCompiler {
    type Model = DocumentModel;

    fn compile(&self, schema: ModelSchema) -> Result<DocumentModel, ConfigError> {
        let fields = schema
            .fields
            .iter()
            .filter_map(|(name, ty)| document_type(ty).map(|t| (name.to_string(), t)))
            .collect();

        let mut pre_save = Vec::new();
        let mut pre_update = Vec::new();
        if let Some(id_field) = &schema.options.id_field {
            pre_save.push(WriteHook::CopyId(id_field.clone()));
        }
        if schema.options.timestamps {
            pre_save.push(WriteHook::Timestamps);
            pre_update.push(WriteHook::Timestamps);
        }
        if let Some(field) = schema.hashed_field() {
            pre_save.push(WriteHook::HashField(field.to_string()));
            pre_update.push(WriteHook::HashField(field.to_string()));
        }

        Ok(DocumentModel {
            schema,
            fields,
            pre_save,
            pre_update,
        })
    }
}
