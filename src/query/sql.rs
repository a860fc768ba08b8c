//! Render a [`Condition`] as a SQLite WHERE clause with `?` placeholders.

use crate::error::TranslateError;
use crate::query::condition::{Comparison, Condition, FieldTest};
use crate::query::operator::Operator;
use crate::schema::RelationalModel;
use crate::sql::{quoted, SqlBindValue};
use crate::types::SqlType;
use regex::Regex;
use serde_json::Value;

/// A WHERE clause (without the keyword) and its parameters in placeholder order. An
/// empty clause matches every row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SqlFilter {
    pub clause: String,
    pub params: Vec<SqlBindValue>,
}

impl SqlFilter {
    pub fn always() -> Self {
        Self::default()
    }

    pub fn is_always(&self) -> bool {
        self.clause.is_empty()
    }
}

/// Column expression a path resolves to, with the column type when the path is a
/// whole column.
struct Target {
    expr: String,
    sql_type: Option<SqlType>,
}

pub fn render(condition: &Condition, model: &RelationalModel) -> Result<SqlFilter, TranslateError> {
    let mut params = Vec::new();
    let clause = render_condition(condition, model, &mut params)?;
    Ok(SqlFilter { clause, params })
}

fn render_condition(
    condition: &Condition,
    model: &RelationalModel,
    params: &mut Vec<SqlBindValue>,
) -> Result<String, TranslateError> {
    match condition {
        Condition::All(children) => {
            if children.is_empty() {
                return Ok("1 = 1".into());
            }
            join(children, " AND ", model, params)
        }
        Condition::Any(children) => {
            if children.is_empty() {
                return Ok("1 = 0".into());
            }
            join(children, " OR ", model, params)
        }
        Condition::Not(inner) => Ok(negate(&render_condition(inner, model, params)?)),
        Condition::Field { path, test } => {
            let target = resolve(path, model)?;
            render_test(&target, test, params)
        }
    }
}

fn join(
    children: &[Condition],
    sep: &str,
    model: &RelationalModel,
    params: &mut Vec<SqlBindValue>,
) -> Result<String, TranslateError> {
    let parts = children
        .iter()
        .map(|c| render_condition(c, model, params))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(if parts.len() == 1 {
        parts.into_iter().next().unwrap_or_default()
    } else {
        format!("({})", parts.join(sep))
    })
}

/// Plain paths name a column; dotted paths reach into a JSON column.
fn resolve(path: &str, model: &RelationalModel) -> Result<Target, TranslateError> {
    let unknown = || TranslateError::UnknownField {
        model: model.table_name().to_string(),
        field: path.to_string(),
    };
    match path.split_once('.') {
        None => {
            let col = model.column(path).ok_or_else(unknown)?;
            Ok(Target {
                expr: quoted(&col.name),
                sql_type: Some(col.sql_type.clone()),
            })
        }
        Some((root, rest)) => {
            let col = model.column(root).ok_or_else(unknown)?;
            if col.sql_type != SqlType::Json {
                return Err(unknown());
            }
            if rest.split('.').any(str::is_empty) {
                return Err(unknown());
            }
            // Inlined as a literal: the expression may appear more than once in a test.
            let json_path = format!("$.{}", rest).replace('\'', "''");
            Ok(Target {
                expr: format!("json_extract({}, '{}')", quoted(&col.name), json_path),
                sql_type: None,
            })
        }
    }
}

fn bind(target: &Target, op: Operator, v: &Value) -> Result<SqlBindValue, TranslateError> {
    match &target.sql_type {
        Some(ty) => SqlBindValue::for_column(ty, v).map_err(|reason| TranslateError::InvalidOperand {
            operator: op.key().into(),
            reason,
        }),
        None => Ok(SqlBindValue::from_json(v)),
    }
}

fn render_test(
    target: &Target,
    test: &FieldTest,
    params: &mut Vec<SqlBindValue>,
) -> Result<String, TranslateError> {
    let expr = &target.expr;
    match test {
        FieldTest::Compare(Comparison::Eq, Value::Null) => Ok(format!("{} IS NULL", expr)),
        FieldTest::Compare(Comparison::Ne, Value::Null) => Ok(format!("{} IS NOT NULL", expr)),
        FieldTest::Compare(Comparison::Ne, v) => {
            params.push(bind(target, Operator::Ne, v)?);
            Ok(format!("{} IS NOT ?", expr))
        }
        FieldTest::Compare(cmp, v) => {
            params.push(bind(target, cmp.operator(), v)?);
            Ok(format!("{} {} ?", expr, cmp.sql()))
        }
        FieldTest::In(items) => {
            if items.is_empty() {
                return Ok("1 = 0".into());
            }
            let (placeholders, has_null) = push_list(target, Operator::In, items, params)?;
            let mut sql = format!("{} IN ({})", expr, placeholders);
            if has_null {
                sql = format!("({} OR {} IS NULL)", sql, expr);
            }
            Ok(sql)
        }
        FieldTest::NotIn(items) => {
            if items.is_empty() {
                return Ok("1 = 1".into());
            }
            let (placeholders, has_null) = push_list(target, Operator::Nin, items, params)?;
            if has_null {
                Ok(format!("({} NOT IN ({}) AND {} IS NOT NULL)", expr, placeholders, expr))
            } else {
                Ok(format!("({} NOT IN ({}) OR {} IS NULL)", expr, placeholders, expr))
            }
        }
        FieldTest::Regex { pattern, options } => {
            params.push(SqlBindValue::Text(regex_source(pattern, options)?));
            Ok(format!("{} REGEXP ?", expr))
        }
        FieldTest::Not(inner) => Ok(negate(&render_test(target, inner, params)?)),
        FieldTest::All(tests) => {
            let parts = tests
                .iter()
                .map(|t| render_test(target, t, params))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(format!("({})", parts.join(" AND ")))
        }
    }
}

/// A comparison against NULL yields NULL; the negation of that must match.
fn negate(clause: &str) -> String {
    format!("NOT COALESCE(({}), 0)", clause)
}

/// Placeholders for the non-null items, and whether null was among them.
fn push_list(
    target: &Target,
    op: Operator,
    items: &[Value],
    params: &mut Vec<SqlBindValue>,
) -> Result<(String, bool), TranslateError> {
    let mut placeholders = Vec::with_capacity(items.len());
    let mut has_null = false;
    for item in items {
        if item.is_null() {
            has_null = true;
            continue;
        }
        params.push(bind(target, op, item)?);
        placeholders.push("?");
    }
    if placeholders.is_empty() {
        // Only nulls; keep the list syntactically valid.
        params.push(SqlBindValue::Null);
        placeholders.push("?");
    }
    Ok((placeholders.join(", "), has_null))
}

/// Pattern with `$options` folded in as inline flags, validated up front.
pub fn regex_source(pattern: &str, options: &str) -> Result<String, TranslateError> {
    let mut flags = String::new();
    for c in options.chars() {
        match c {
            'i' | 'm' | 's' | 'x' => {
                if !flags.contains(c) {
                    flags.push(c);
                }
            }
            other => {
                return Err(TranslateError::InvalidOperand {
                    operator: "$options".into(),
                    reason: format!("unsupported regex option '{}'", other),
                })
            }
        }
    }
    let source = if flags.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{}){}", flags, pattern)
    };
    Regex::new(&source).map_err(|e| TranslateError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;
    Ok(source)
}
