//! Builds parameterized INSERT, SELECT, UPDATE, DELETE from a relational model.

use crate::error::TranslateError;
use crate::query::{Projection, QueryOptions, SortOrder, SqlFilter};
use crate::schema::{Association, AssociationKind, Registry, RelationalModel};
use crate::sql::SqlBindValue;

const MAIN_ALIAS: &str = "main";
const REL_ALIAS: &str = "rel";

/// How many matching rows an UPDATE touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateScope {
    One,
    Many,
}

/// One populated association: the virtual and the model it points at.
pub struct IncludeSelect<'a> {
    pub association: &'a Association,
    pub related: &'a RelationalModel,
}

/// Quote identifier for SQLite (safe: names come from model definitions only).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<SqlBindValue>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: SqlBindValue) {
        self.params.push(v);
    }

    fn push_filter(&mut self, filter: SqlFilter) {
        if !filter.is_always() {
            self.sql.push_str(" WHERE ");
            self.sql.push_str(&filter.clause);
            self.params.extend(filter.params);
        }
    }
}

/// Resolve populate names against the model's associations.
pub fn resolve_includes<'a>(
    model: &'a RelationalModel,
    populate: &[String],
    registry: &'a Registry<RelationalModel>,
) -> Result<Vec<IncludeSelect<'a>>, TranslateError> {
    populate
        .iter()
        .map(|name| {
            let unknown = || TranslateError::UnknownPopulate {
                model: model.table_name().to_string(),
                name: name.clone(),
            };
            let association = model.association(name).ok_or_else(unknown)?;
            let related = registry.get(&association.target).ok_or_else(unknown)?;
            Ok(IncludeSelect {
                association,
                related: related.as_ref(),
            })
        })
        .collect()
}

/// Column names the projection keeps. The primary key is always kept for inclusion
/// lists.
fn projected_columns<'a>(
    model: &'a RelationalModel,
    projection: &Projection,
) -> Result<Vec<&'a str>, TranslateError> {
    let unknown = |field: &str| TranslateError::UnknownField {
        model: model.table_name().to_string(),
        field: field.to_string(),
    };
    match projection {
        Projection::All => Ok(model.columns().iter().map(|c| c.name.as_str()).collect()),
        Projection::Include(fields) => {
            for f in fields {
                if model.column(f).is_none() && model.association(f).is_none() {
                    return Err(unknown(f));
                }
            }
            Ok(model
                .columns()
                .iter()
                .filter(|c| c.name == model.primary_key() || fields.contains(&c.name))
                .map(|c| c.name.as_str())
                .collect())
        }
        Projection::Exclude(fields) => {
            for f in fields {
                if model.column(f).is_none() && model.association(f).is_none() {
                    return Err(unknown(f));
                }
            }
            Ok(model
                .columns()
                .iter()
                .filter(|c| !fields.contains(&c.name))
                .map(|c| c.name.as_str())
                .collect())
        }
    }
}

/// Scalar subquery producing the association as JSON text.
fn include_subquery(inc: &IncludeSelect<'_>) -> String {
    let pairs = inc
        .related
        .columns()
        .iter()
        .map(|c| format!("{}, {}.{}", literal(&c.name), REL_ALIAS, quoted(&c.name)))
        .collect::<Vec<_>>()
        .join(", ");
    let from = format!(
        "{} AS {} WHERE {}.{} = {}.{}",
        quoted(inc.related.table_name()),
        REL_ALIAS,
        REL_ALIAS,
        quoted(&inc.association.foreign_key),
        MAIN_ALIAS,
        quoted(&inc.association.source_key)
    );
    match inc.association.kind {
        AssociationKind::HasOne => format!(
            "(SELECT json_object({}) FROM {} ORDER BY {}.{} LIMIT 1)",
            pairs,
            from,
            REL_ALIAS,
            quoted(inc.related.primary_key())
        ),
        AssociationKind::HasMany => format!(
            "(SELECT json_group_array(json_object({})) FROM {})",
            pairs, from
        ),
    }
}

/// SELECT with the main table aliased as "main" and each populated association as a
/// scalar subquery. Without includes no subquery is emitted.
pub fn select(
    model: &RelationalModel,
    filter: SqlFilter,
    options: Option<&QueryOptions>,
    includes: &[IncludeSelect<'_>],
    single: bool,
) -> Result<QueryBuf, TranslateError> {
    let mut q = QueryBuf::new();
    let projection = options.map(|o| &o.select).unwrap_or(&Projection::All);
    let mut select_parts: Vec<String> = projected_columns(model, projection)?
        .into_iter()
        .map(|c| format!("{}.{} AS {}", MAIN_ALIAS, quoted(c), quoted(c)))
        .collect();
    for inc in includes {
        select_parts.push(format!(
            "{} AS {}",
            include_subquery(inc),
            quoted(&inc.association.name)
        ));
    }

    q.sql = format!(
        "SELECT {} FROM {} AS {}",
        select_parts.join(", "),
        quoted(model.table_name()),
        MAIN_ALIAS
    );
    q.push_filter(filter);

    let mut order_parts = Vec::new();
    for key in options.map(|o| o.sort.as_slice()).unwrap_or(&[]) {
        if model.column(&key.field).is_none() {
            return Err(TranslateError::UnknownField {
                model: model.table_name().to_string(),
                field: key.field.clone(),
            });
        }
        let dir = match key.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        order_parts.push(format!("{}.{} {}", MAIN_ALIAS, quoted(&key.field), dir));
    }
    if !order_parts.iter().any(|p| p.starts_with(&format!("{}.{} ", MAIN_ALIAS, quoted(model.primary_key())))) {
        order_parts.push(format!("{}.{} ASC", MAIN_ALIAS, quoted(model.primary_key())));
    }
    q.sql.push_str(" ORDER BY ");
    q.sql.push_str(&order_parts.join(", "));

    let limit = if single {
        Some(1)
    } else {
        options.and_then(|o| o.limit)
    };
    let skip = options.and_then(|o| o.skip);
    match (limit, skip) {
        (Some(n), Some(s)) => q.sql.push_str(&format!(" LIMIT {} OFFSET {}", n, s)),
        (Some(n), None) => q.sql.push_str(&format!(" LIMIT {}", n)),
        (None, Some(s)) => q.sql.push_str(&format!(" LIMIT -1 OFFSET {}", s)),
        (None, None) => {}
    }
    Ok(q)
}

pub fn count(model: &RelationalModel, filter: SqlFilter) -> QueryBuf {
    let mut q = QueryBuf::new();
    q.sql = format!("SELECT COUNT(*) AS \"count\" FROM {}", quoted(model.table_name()));
    q.push_filter(filter);
    q
}

/// Primary key of the first matching row.
pub fn select_primary_key(model: &RelationalModel, filter: SqlFilter) -> QueryBuf {
    let mut q = QueryBuf::new();
    let pk = quoted(model.primary_key());
    q.sql = format!("SELECT {} FROM {}", pk, quoted(model.table_name()));
    q.push_filter(filter);
    q.sql.push_str(&format!(" ORDER BY {} LIMIT 1", pk));
    q
}

/// INSERT … RETURNING *.
pub fn insert(model: &RelationalModel, values: Vec<(String, SqlBindValue)>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = quoted(model.table_name());
    if values.is_empty() {
        q.sql = format!("INSERT INTO {} DEFAULT VALUES RETURNING *", table);
        return q;
    }
    let cols: Vec<String> = values.iter().map(|(c, _)| quoted(c)).collect();
    let placeholders = vec!["?"; values.len()].join(", ");
    for (_, v) in values {
        q.push_param(v);
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
        table,
        cols.join(", "),
        placeholders
    );
    q
}

/// UPDATE matching rows. `UpdateScope::One` limits the change to the first match by
/// primary key.
pub fn update(
    model: &RelationalModel,
    values: Vec<(String, SqlBindValue)>,
    filter: SqlFilter,
    scope: UpdateScope,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = quoted(model.table_name());
    let sets: Vec<String> = values.iter().map(|(c, _)| format!("{} = ?", quoted(c))).collect();
    for (_, v) in values {
        q.push_param(v);
    }
    q.sql = format!("UPDATE {} SET {}", table, sets.join(", "));
    match scope {
        UpdateScope::Many => q.push_filter(filter),
        UpdateScope::One => {
            let pk = quoted(model.primary_key());
            let inner = select_primary_key(model, filter);
            q.sql.push_str(&format!(" WHERE {} IN ({})", pk, inner.sql));
            q.params.extend(inner.params);
        }
    }
    q
}

pub fn delete(model: &RelationalModel, filter: SqlFilter) -> QueryBuf {
    let mut q = QueryBuf::new();
    q.sql = format!("DELETE FROM {}", quoted(model.table_name()));
    q.push_filter(filter);
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelDefinition;
    use crate::query::{to_sql_filter, Guard};
    use crate::schema::RelationalCompiler;
    use serde_json::json;

    fn registry() -> Registry<RelationalModel> {
        let mut registry = Registry::new();
        for (name, v) in [
            (
                "post",
                json!({
                    "model": { "title": "String", "authorId": "ObjectId", "author": "Virtual", "comments": "Virtual" },
                    "schema": {
                        "timestamps": false,
                        "virtuals": {
                            "author": { "ref": "user", "localField": "authorId", "foreignField": "id", "justOne": true },
                            "comments": { "ref": "comment", "localField": "id", "foreignField": "postId" }
                        }
                    }
                }),
            ),
            ("user", json!({ "model": { "name": "String" }, "schema": { "timestamps": false } })),
            ("comment", json!({ "model": { "postId": "ObjectId", "body": "String" }, "schema": { "timestamps": false } })),
        ] {
            let def: ModelDefinition = serde_json::from_value(v).unwrap();
            registry.compile(&RelationalCompiler, name, &def).unwrap();
        }
        registry
    }

    #[test]
    fn test_select_without_populate_has_no_subquery() {
        let registry = registry();
        let post = registry.get("post").unwrap();
        let filter = to_sql_filter(&json!({ "title": "hi" }), post, Guard::Optional).unwrap();
        let q = select(post, filter, None, &[], false).unwrap();
        assert_eq!(
            q.sql,
            "SELECT main.\"id\" AS \"id\", main.\"title\" AS \"title\", main.\"authorId\" AS \"authorId\" FROM \"post\" AS main WHERE \"title\" = ? ORDER BY main.\"id\" ASC"
        );
        assert!(!q.sql.contains("json_object"));
        assert_eq!(q.params, vec![SqlBindValue::Text("hi".into())]);
    }

    #[test]
    fn test_select_with_populate() {
        let registry = registry();
        let post = registry.get("post").unwrap();
        let options = QueryOptions::new().populate("author").populate("comments");
        let includes = resolve_includes(post, &options.populate, &registry).unwrap();
        let q = select(post, SqlFilter::always(), Some(&options), &includes, false).unwrap();
        assert!(q.sql.contains(
            "(SELECT json_object('id', rel.\"id\", 'name', rel.\"name\") FROM \"user\" AS rel WHERE rel.\"id\" = main.\"authorId\" ORDER BY rel.\"id\" LIMIT 1) AS \"author\""
        ));
        assert!(q.sql.contains(
            "(SELECT json_group_array(json_object('id', rel.\"id\", 'postId', rel.\"postId\", 'body', rel.\"body\")) FROM \"comment\" AS rel WHERE rel.\"postId\" = main.\"id\") AS \"comments\""
        ));
    }

    #[test]
    fn test_unknown_populate() {
        let registry = registry();
        let post = registry.get("post").unwrap();
        assert!(matches!(
            resolve_includes(post, &["tags".to_string()], &registry),
            Err(TranslateError::UnknownPopulate { .. })
        ));
    }

    #[test]
    fn test_projection_sort_and_paging() {
        let registry = registry();
        let post = registry.get("post").unwrap();
        let options = QueryOptions::new()
            .select(["title"])
            .sort_by("title", SortOrder::Desc)
            .skip(20)
            .limit(10);
        let q = select(post, SqlFilter::always(), Some(&options), &[], false).unwrap();
        assert_eq!(
            q.sql,
            "SELECT main.\"id\" AS \"id\", main.\"title\" AS \"title\" FROM \"post\" AS main ORDER BY main.\"title\" DESC, main.\"id\" ASC LIMIT 10 OFFSET 20"
        );
        let q = select(post, SqlFilter::always(), Some(&QueryOptions::new().skip(5)), &[], true).unwrap();
        assert!(q.sql.ends_with("LIMIT 1 OFFSET 5"));
        assert!(select(post, SqlFilter::always(), Some(&QueryOptions::new().select(["ghost"])), &[], false).is_err());
    }

    #[test]
    fn test_update_one_limits_by_primary_key() {
        let registry = registry();
        let post = registry.get("post").unwrap();
        let filter = to_sql_filter(&json!({ "title": "a" }), post, Guard::RequireCondition).unwrap();
        let q = update(
            post,
            vec![("title".into(), SqlBindValue::Text("b".into()))],
            filter,
            UpdateScope::One,
        );
        assert_eq!(
            q.sql,
            "UPDATE \"post\" SET \"title\" = ? WHERE \"id\" IN (SELECT \"id\" FROM \"post\" WHERE \"title\" = ? ORDER BY \"id\" LIMIT 1)"
        );
        assert_eq!(
            q.params,
            vec![SqlBindValue::Text("b".into()), SqlBindValue::Text("a".into())]
        );
    }

    #[test]
    fn test_insert_count_delete() {
        let registry = registry();
        let user = registry.get("user").unwrap();
        let q = insert(user, vec![("name".into(), SqlBindValue::Text("ann".into()))]);
        assert_eq!(q.sql, "INSERT INTO \"user\" (\"name\") VALUES (?) RETURNING *");
        assert_eq!(insert(user, vec![]).sql, "INSERT INTO \"user\" DEFAULT VALUES RETURNING *");
        assert_eq!(count(user, SqlFilter::always()).sql, "SELECT COUNT(*) AS \"count\" FROM \"user\"");
        let filter = to_sql_filter(&json!({ "name": "ann" }), user, Guard::RequireCondition).unwrap();
        assert_eq!(delete(user, filter).sql, "DELETE FROM \"user\" WHERE \"name\" = ?");
    }
}
