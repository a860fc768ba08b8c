//! Render a [`Condition`] as a MongoDB filter document.

use crate::error::TranslateError;
use crate::query::condition::{Condition, FieldTest};
use crate::query::operator::{Operator, REGEX_OPTIONS};
use crate::query::sql::regex_source;
use crate::schema::DocumentModel;
use bson::{Bson, Document};

pub fn render(condition: &Condition, model: &DocumentModel) -> Result<Document, TranslateError> {
    match condition {
        Condition::All(children) => {
            let docs = children
                .iter()
                .map(|c| render(c, model))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(match docs.len() {
                0 => Document::new(),
                1 => docs.into_iter().next().unwrap_or_default(),
                _ => merge_or_and(docs),
            })
        }
        Condition::Any(children) => {
            let docs = children
                .iter()
                .map(|c| render(c, model).map(Bson::Document))
                .collect::<Result<Vec<_>, _>>()?;
            let mut out = Document::new();
            out.insert(Operator::Or.key(), docs);
            Ok(out)
        }
        Condition::Not(inner) => {
            let mut out = Document::new();
            out.insert("$nor", vec![Bson::Document(render(inner, model)?)]);
            Ok(out)
        }
        Condition::Field { path, test } => {
            let mut out = Document::new();
            out.insert(path.clone(), render_test(path, test, model)?);
            Ok(out)
        }
    }
}

/// Sibling conditions on distinct keys stay one document; repeated keys need `$and`.
fn merge_or_and(docs: Vec<Document>) -> Document {
    let mut merged = Document::new();
    let mut clash = false;
    for doc in &docs {
        for (k, v) in doc {
            if merged.contains_key(k) {
                clash = true;
                break;
            }
            merged.insert(k.clone(), v.clone());
        }
    }
    if !clash {
        return merged;
    }
    let mut out = Document::new();
    out.insert(
        Operator::And.key(),
        docs.into_iter().map(Bson::Document).collect::<Vec<_>>(),
    );
    out
}

fn render_test(path: &str, test: &FieldTest, model: &DocumentModel) -> Result<Bson, TranslateError> {
    let mut out = Document::new();
    match test {
        FieldTest::Compare(cmp, v) => {
            out.insert(cmp.operator().key(), model.filter_value(path, v));
        }
        FieldTest::In(items) | FieldTest::NotIn(items) => {
            let op = if matches!(test, FieldTest::In(_)) {
                Operator::In
            } else {
                Operator::Nin
            };
            let values: Vec<Bson> = items.iter().map(|v| model.filter_value(path, v)).collect();
            out.insert(op.key(), values);
        }
        FieldTest::Regex { pattern, options } => {
            regex_source(pattern, options)?;
            out.insert(Operator::Regex.key(), pattern.clone());
            if !options.is_empty() {
                out.insert(REGEX_OPTIONS, options.clone());
            }
        }
        FieldTest::Not(inner) => {
            out.insert(Operator::Not.key(), render_test(path, inner, model)?);
        }
        FieldTest::All(tests) => {
            for t in tests {
                if let Bson::Document(part) = render_test(path, t, model)? {
                    for (k, v) in part {
                        out.insert(k, v);
                    }
                }
            }
        }
    }
    Ok(Bson::Document(out))
}
