//! CRUD execution against MongoDB.

use crate::config::{Engine, VirtualConfig};
use crate::error::{DbError, TranslateError};
use crate::query::{to_document_filter, Guard, Projection, QueryOptions, SortOrder};
use crate::schema::document::{bson_to_json, document_to_json, ID};
use crate::schema::{CompiledModel, DocumentModel, Registry};
use crate::service::backend::{as_object, Backend};
use crate::sql::UpdateScope;
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use mongodb::options::ReturnDocument;
use mongodb::{Client, Collection, Database};
use serde_json::Value;

pub struct MongoBackend {
    client: Client,
    db: Database,
    registry: Registry<DocumentModel>,
}

/// A populate request resolved against the registry.
struct Populate<'a> {
    name: &'a str,
    config: &'a VirtualConfig,
    related: &'a DocumentModel,
}

impl MongoBackend {
    pub fn new(client: Client, db: Database, registry: Registry<DocumentModel>) -> Self {
        Self { client, db, registry }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn model(&self, name: &str) -> Result<&DocumentModel, DbError> {
        self.registry
            .get(name)
            .map(|m| m.as_ref())
            .ok_or_else(|| DbError::UnknownModel(name.to_string()))
    }

    fn collection(&self, model: &DocumentModel) -> Collection<Document> {
        self.db.collection::<Document>(model.collection_name())
    }

    fn resolve_populate<'a>(
        &'a self,
        model: &'a DocumentModel,
        names: &'a [String],
    ) -> Result<Vec<Populate<'a>>, TranslateError> {
        names
            .iter()
            .map(|name| {
                let unknown = || TranslateError::UnknownPopulate {
                    model: model.name().to_string(),
                    name: name.clone(),
                };
                let config = model.schema().virtuals().get(name).ok_or_else(unknown)?;
                let related = self.registry.get(&config.ref_model).ok_or_else(unknown)?;
                Ok(Populate {
                    name,
                    config,
                    related: related.as_ref(),
                })
            })
            .collect()
    }

    async fn find_documents(
        &self,
        model: &DocumentModel,
        filter: Document,
        options: Option<&QueryOptions>,
        single: bool,
    ) -> Result<Vec<Value>, DbError> {
        let populate = match options {
            Some(o) => self.resolve_populate(model, &o.populate)?,
            None => Vec::new(),
        };

        let mut sort = Document::new();
        for key in options.map(|o| o.sort.as_slice()).unwrap_or(&[]) {
            let dir = match key.order {
                SortOrder::Asc => 1,
                SortOrder::Desc => -1,
            };
            sort.insert(key.field.clone(), dir);
        }
        if !sort.contains_key(ID) {
            sort.insert(ID, 1);
        }

        let coll = self.collection(model);
        let mut find = coll.find(filter.clone()).sort(sort);
        if let Some(projection) = options.and_then(|o| projection(model, &o.select, &populate)) {
            find = find.projection(projection);
        }
        if let Some(skip) = options.and_then(|o| o.skip) {
            find = find.skip(skip);
        }
        let limit = if single {
            Some(1)
        } else {
            options.and_then(|o| o.limit)
        };
        if let Some(limit) = limit {
            find = find.limit(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        tracing::debug!(collection = %model.collection_name(), filter = %filter, "find");
        let mut cursor = find.await?;
        let mut docs = Vec::new();
        while cursor.advance().await? {
            docs.push(cursor.deserialize_current()?);
        }

        let mut out: Vec<Value> = docs.iter().map(document_to_json).collect();
        for p in &populate {
            self.attach(p, &docs, &mut out).await?;
        }
        Ok(out)
    }

    /// Fetch related documents for one populate and attach them under its name.
    async fn attach(&self, p: &Populate<'_>, docs: &[Document], out: &mut [Value]) -> Result<(), DbError> {
        let mut keys: Vec<Bson> = Vec::new();
        for d in docs {
            match d.get(&p.config.local_field) {
                None | Some(Bson::Null) => {}
                Some(Bson::Array(items)) => keys.extend(items.iter().cloned()),
                Some(v) => keys.push(v.clone()),
            }
        }
        let related: Vec<Value> = if keys.is_empty() {
            Vec::new()
        } else {
            let mut filter = Document::new();
            filter.insert(p.config.foreign_field.clone(), doc! { "$in": keys });
            tracing::debug!(collection = %p.related.collection_name(), filter = %filter, "populate");
            let mut cursor = self
                .collection(p.related)
                .find(filter)
                .sort(doc! { "_id": 1 })
                .await?;
            let mut found = Vec::new();
            while cursor.advance().await? {
                found.push(document_to_json(&cursor.deserialize_current()?));
            }
            found
        };

        for (d, record) in docs.iter().zip(out.iter_mut()) {
            let local = d.get(&p.config.local_field).map(bson_to_json).unwrap_or(Value::Null);
            let matches = related.iter().filter(|r| {
                let foreign = r.get(&p.config.foreign_field).unwrap_or(&Value::Null);
                references(&local, foreign)
            });
            let value = if p.config.just_one {
                matches.cloned().next().unwrap_or(Value::Null)
            } else {
                Value::Array(matches.cloned().collect())
            };
            if let Value::Object(map) = record {
                map.insert(p.name.to_string(), value);
            }
        }
        Ok(())
    }
}

/// True when `local` (a value or an array of values) refers to `foreign`.
fn references(local: &Value, foreign: &Value) -> bool {
    if local.is_null() {
        return false;
    }
    match (local, foreign) {
        (Value::Array(items), _) => items.iter().any(|i| references(i, foreign)),
        (_, Value::Array(items)) => items.iter().any(|i| i == local),
        _ => local == foreign,
    }
}

/// Projection document, or `None` to return every field. Virtual names are not stored
/// and are left out; populated local fields are kept so the join can run.
fn projection(model: &DocumentModel, select: &Projection, populate: &[Populate<'_>]) -> Option<Document> {
    let is_virtual = |f: &str| model.schema().virtuals().contains_key(f);
    match select {
        Projection::All => None,
        Projection::Include(fields) => {
            let mut doc = Document::new();
            for f in fields.iter().filter(|f| !is_virtual(f.as_str())) {
                doc.insert(f.clone(), 1);
            }
            for p in populate {
                doc.insert(p.config.local_field.clone(), 1);
            }
            Some(doc)
        }
        Projection::Exclude(fields) => {
            let mut doc = Document::new();
            let needed = |f: &str| populate.iter().any(|p| p.config.local_field == f);
            for f in fields.iter().filter(|f| !is_virtual(f.as_str()) && !needed(f.as_str())) {
                doc.insert(f.clone(), 0);
            }
            (!doc.is_empty()).then_some(doc)
        }
    }
}

#[async_trait]
impl Backend for MongoBackend {
    fn engine(&self) -> Engine {
        Engine::Mongodb
    }

    fn has_model(&self, model: &str) -> bool {
        self.registry.contains(model)
    }

    async fn count(&self, model: &str, filter: &Value) -> Result<u64, DbError> {
        let model = self.model(model)?;
        let filter = to_document_filter(filter, model, Guard::Optional)?;
        tracing::debug!(collection = %model.collection_name(), filter = %filter, "count");
        Ok(self.collection(model).count_documents(filter).await?)
    }

    async fn find_one(
        &self,
        model: &str,
        filter: &Value,
        options: Option<&QueryOptions>,
    ) -> Result<Option<Value>, DbError> {
        let model = self.model(model)?;
        let filter = to_document_filter(filter, model, Guard::Optional)?;
        Ok(self
            .find_documents(model, filter, options, true)
            .await?
            .into_iter()
            .next())
    }

    async fn find_by_id(
        &self,
        model: &str,
        id: &Value,
        options: Option<&QueryOptions>,
    ) -> Result<Option<Value>, DbError> {
        let m = self.model(model)?;
        let mut filter = Document::new();
        filter.insert(ID, m.filter_value(ID, id));
        Ok(self
            .find_documents(m, filter, options, true)
            .await?
            .into_iter()
            .next())
    }

    async fn find(
        &self,
        model: &str,
        filter: &Value,
        options: Option<&QueryOptions>,
    ) -> Result<Vec<Value>, DbError> {
        let model = self.model(model)?;
        let filter = to_document_filter(filter, model, Guard::Optional)?;
        self.find_documents(model, filter, options, false).await
    }

    async fn insert(&self, model: &str, data: &Value) -> Result<Value, DbError> {
        let model = self.model(model)?;
        let mut doc = model.cast_document(as_object(data, "insert")?)?;
        model.apply_pre_save(&mut doc, bson::DateTime::now());
        tracing::debug!(collection = %model.collection_name(), "insert");
        self.collection(model).insert_one(&doc).await?;
        Ok(document_to_json(&doc))
    }

    async fn update(
        &self,
        model: &str,
        filter: &Value,
        data: &Value,
        scope: UpdateScope,
    ) -> Result<u64, DbError> {
        let model = self.model(model)?;
        let filter = to_document_filter(filter, model, Guard::RequireCondition)?;
        let mut set = model.cast_update(as_object(data, "update")?)?;
        if set.is_empty() {
            return Ok(0);
        }
        model.apply_pre_update(&mut set, bson::DateTime::now());
        let update = doc! { "$set": set };
        tracing::debug!(collection = %model.collection_name(), filter = %filter, ?scope, "update");
        let coll = self.collection(model);
        let result = match scope {
            UpdateScope::Many => coll.update_many(filter, update).await?,
            UpdateScope::One => coll.update_one(filter, update).await?,
        };
        Ok(result.matched_count)
    }

    async fn upsert(&self, model: &str, filter: &Value, data: &Value) -> Result<Value, DbError> {
        let model = self.model(model)?;
        let filter = to_document_filter(filter, model, Guard::RequireCondition)?;
        let now = bson::DateTime::now();
        let mut set = model.cast_update(as_object(data, "upsert")?)?;
        model.apply_pre_update(&mut set, now);

        let pinned = match filter.get(ID) {
            Some(Bson::ObjectId(id)) => Some(*id),
            Some(Bson::Document(test)) => test.get_object_id("$eq").ok(),
            _ => None,
        };
        let mut on_insert = model.on_insert_fields(pinned, now);
        if filter.contains_key(ID) {
            on_insert.remove(ID);
        }
        let on_insert: Document = on_insert
            .into_iter()
            .filter(|(k, _)| !set.contains_key(k) && !filter.contains_key(k))
            .collect();

        let mut update = Document::new();
        if !set.is_empty() {
            update.insert("$set", set);
        }
        if !on_insert.is_empty() {
            update.insert("$setOnInsert", on_insert);
        }
        tracing::debug!(collection = %model.collection_name(), filter = %filter, "upsert");
        let doc = self
            .collection(model)
            .find_one_and_update(filter, update)
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| DbError::InvalidData("upsert returned no document".into()))?;
        Ok(document_to_json(&doc))
    }

    async fn delete(&self, model: &str, filter: &Value) -> Result<u64, DbError> {
        let model = self.model(model)?;
        let filter = to_document_filter(filter, model, Guard::RequireCondition)?;
        tracing::debug!(collection = %model.collection_name(), filter = %filter, "delete");
        Ok(self.collection(model).delete_many(filter).await?.deleted_count)
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
        tracing::info!("mongodb client shut down");
    }

    async fn drop_database(&self) -> Result<(), DbError> {
        self.db.drop().await?;
        tracing::info!(database = %self.db.name(), "database dropped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelDefinition, ModelSchema};
    use crate::schema::{DocumentCompiler, SchemaCompiler};
    use serde_json::json;

    #[test]
    fn test_references() {
        assert!(references(&json!("a"), &json!("a")));
        assert!(references(&json!(["a", "b"]), &json!("b")));
        assert!(references(&json!("b"), &json!(["a", "b"])));
        assert!(!references(&Value::Null, &Value::Null));
        assert!(!references(&json!("a"), &json!("c")));
    }

    #[test]
    fn test_projection_keeps_join_fields() {
        let def: ModelDefinition = serde_json::from_value(json!({
            "model": { "owner": "ObjectId", "title": "String" },
            "schema": { "virtuals": { "ownerDoc": { "ref": "accountuser", "localField": "owner", "foreignField": "_id", "justOne": true } } }
        }))
        .unwrap();
        let model = DocumentCompiler
            .compile(ModelSchema::new("post", def.model.unwrap(), def.schema))
            .unwrap();
        let config = model.schema().virtuals().get("ownerDoc").unwrap().clone();
        let populate = [Populate {
            name: "ownerDoc",
            config: &config,
            related: &model,
        }];

        let include = projection(&model, &Projection::Include(vec!["title".into(), "ownerDoc".into()]), &populate);
        assert_eq!(include, Some(doc! { "title": 1, "owner": 1 }));

        let exclude = projection(&model, &Projection::Exclude(vec!["owner".into()]), &populate);
        assert_eq!(exclude, None);
        assert_eq!(projection(&model, &Projection::All, &[]), None);
    }
}
