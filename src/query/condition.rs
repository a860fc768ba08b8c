//! Engine-neutral condition tree parsed from a document-style filter.

use crate::config::Engine;
use crate::error::TranslateError;
use crate::query::operator::{is_incompatible_with_sql, Operator, REGEX_OPTIONS};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    pub fn operator(&self) -> Operator {
        match self {
            Comparison::Eq => Operator::Eq,
            Comparison::Ne => Operator::Ne,
            Comparison::Gt => Operator::Gt,
            Comparison::Gte => Operator::Gte,
            Comparison::Lt => Operator::Lt,
            Comparison::Lte => Operator::Lte,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "!=",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
        }
    }
}

/// Test applied to one field path.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldTest {
    Compare(Comparison, Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Regex { pattern: String, options: String },
    Not(Box<FieldTest>),
    /// Several operators on the same field.
    All(Vec<FieldTest>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// Conjunction; implicit for sibling keys and explicit for `$and`.
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
    Field { path: String, test: FieldTest },
}

impl Condition {
    /// Parse a filter. `Ok(None)` for null or an empty object.
    pub fn parse(filter: &Value, engine: Engine) -> Result<Option<Condition>, TranslateError> {
        match filter {
            Value::Null => Ok(None),
            Value::Object(obj) if obj.is_empty() => Ok(None),
            Value::Object(obj) => parse_object(obj, engine).map(Some),
            other => Err(TranslateError::InvalidOperand {
                operator: "filter".into(),
                reason: format!("expected an object, got {}", other),
            }),
        }
    }

    /// True when the condition matches every record, e.g. `{"$and": []}`,
    /// `{"$or": [{}]}` or `{"a": {"$nin": []}}`.
    pub fn is_unconditional(&self) -> bool {
        match self {
            Condition::All(children) => children.iter().all(Condition::is_unconditional),
            Condition::Any(children) => children.iter().any(Condition::is_unconditional),
            Condition::Not(inner) => inner.matches_nothing(),
            Condition::Field { test, .. } => test.is_unconditional(),
        }
    }

    /// True when the condition can match no record, e.g. `{"$or": []}`.
    pub fn matches_nothing(&self) -> bool {
        match self {
            Condition::All(children) => children.iter().any(Condition::matches_nothing),
            Condition::Any(children) => children.iter().all(Condition::matches_nothing),
            Condition::Not(inner) => inner.is_unconditional(),
            Condition::Field { test, .. } => test.matches_nothing(),
        }
    }
}

impl FieldTest {
    pub fn is_unconditional(&self) -> bool {
        match self {
            FieldTest::NotIn(items) => items.is_empty(),
            FieldTest::Not(inner) => inner.matches_nothing(),
            FieldTest::All(tests) => tests.iter().all(FieldTest::is_unconditional),
            _ => false,
        }
    }

    pub fn matches_nothing(&self) -> bool {
        match self {
            FieldTest::In(items) => items.is_empty(),
            FieldTest::Not(inner) => inner.is_unconditional(),
            FieldTest::All(tests) => tests.iter().any(FieldTest::matches_nothing),
            _ => false,
        }
    }
}

fn parse_object(obj: &Map<String, Value>, engine: Engine) -> Result<Condition, TranslateError> {
    let mut parts = Vec::with_capacity(obj.len());
    for (key, value) in obj {
        if key.starts_with('$') {
            let op = Operator::parse(key, engine)?;
            parts.push(parse_logical(op, value, engine)?);
        } else {
            if key.contains(".$") {
                let err = if engine == Engine::Sqlite && is_incompatible_with_sql(key) {
                    TranslateError::Incompatible { operator: key.clone() }
                } else {
                    TranslateError::UnsupportedOperator { operator: key.clone() }
                };
                return Err(err);
            }
            parts.push(Condition::Field {
                path: key.clone(),
                test: parse_test(value, engine)?,
            });
        }
    }
    Ok(match parts.len() {
        1 => parts.remove(0),
        _ => Condition::All(parts),
    })
}

fn parse_logical(op: Operator, value: &Value, engine: Engine) -> Result<Condition, TranslateError> {
    let invalid = |reason: &str| TranslateError::InvalidOperand {
        operator: op.key().into(),
        reason: reason.into(),
    };
    match op {
        Operator::And | Operator::Or => {
            let items = value
                .as_array()
                .ok_or_else(|| invalid("expected an array of conditions"))?;
            let mut children = Vec::with_capacity(items.len());
            for item in items {
                let obj = item
                    .as_object()
                    .ok_or_else(|| invalid("expected an array of conditions"))?;
                if !obj.is_empty() {
                    children.push(parse_object(obj, engine)?);
                } else if op == Operator::Or {
                    // An empty branch matches everything.
                    children.push(Condition::All(Vec::new()));
                }
            }
            Ok(if op == Operator::And {
                Condition::All(children)
            } else {
                Condition::Any(children)
            })
        }
        Operator::Not => {
            let obj = value
                .as_object()
                .filter(|o| !o.is_empty())
                .ok_or_else(|| invalid("expected a non-empty condition"))?;
            Ok(Condition::Not(Box::new(parse_object(obj, engine)?)))
        }
        other => Err(TranslateError::InvalidOperand {
            operator: other.key().into(),
            reason: "must be applied to a field".into(),
        }),
    }
}

/// Field value: an operator object (`{"$gt": 1}`) or a literal compared for equality.
fn parse_test(value: &Value, engine: Engine) -> Result<FieldTest, TranslateError> {
    let Some(obj) = value.as_object() else {
        return Ok(FieldTest::Compare(Comparison::Eq, value.clone()));
    };
    let operator_keys = obj.keys().filter(|k| k.starts_with('$')).count();
    if obj.is_empty() || operator_keys == 0 {
        return Ok(FieldTest::Compare(Comparison::Eq, value.clone()));
    }
    if operator_keys != obj.len() {
        return Err(TranslateError::InvalidOperand {
            operator: "field".into(),
            reason: "cannot mix operators and plain keys".into(),
        });
    }

    let mut tests = Vec::with_capacity(obj.len());
    for (key, operand) in obj {
        if key == REGEX_OPTIONS {
            if !obj.contains_key(Operator::Regex.key()) {
                return Err(TranslateError::InvalidOperand {
                    operator: REGEX_OPTIONS.into(),
                    reason: "only valid together with $regex".into(),
                });
            }
            continue;
        }
        let op = Operator::parse(key, engine)?;
        let test = match op {
            Operator::Eq => FieldTest::Compare(Comparison::Eq, operand.clone()),
            Operator::Ne => FieldTest::Compare(Comparison::Ne, operand.clone()),
            Operator::Gt => FieldTest::Compare(Comparison::Gt, operand.clone()),
            Operator::Gte => FieldTest::Compare(Comparison::Gte, operand.clone()),
            Operator::Lt => FieldTest::Compare(Comparison::Lt, operand.clone()),
            Operator::Lte => FieldTest::Compare(Comparison::Lte, operand.clone()),
            Operator::In | Operator::Nin => {
                let items = operand
                    .as_array()
                    .ok_or_else(|| TranslateError::InvalidOperand {
                        operator: op.key().into(),
                        reason: "expected an array".into(),
                    })?
                    .clone();
                if op == Operator::In {
                    FieldTest::In(items)
                } else {
                    FieldTest::NotIn(items)
                }
            }
            Operator::Regex => {
                let pattern = operand
                    .as_str()
                    .ok_or_else(|| TranslateError::InvalidOperand {
                        operator: op.key().into(),
                        reason: "expected a string pattern".into(),
                    })?
                    .to_string();
                let options = match obj.get(REGEX_OPTIONS) {
                    None => String::new(),
                    Some(Value::String(s)) => s.clone(),
                    Some(_) => {
                        return Err(TranslateError::InvalidOperand {
                            operator: REGEX_OPTIONS.into(),
                            reason: "expected a string".into(),
                        })
                    }
                };
                FieldTest::Regex { pattern, options }
            }
            Operator::Not => FieldTest::Not(Box::new(parse_test(operand, engine)?)),
            Operator::And | Operator::Or => {
                return Err(TranslateError::InvalidOperand {
                    operator: op.key().into(),
                    reason: "must be used at the top level of a filter".into(),
                })
            }
        };
        tests.push(test);
    }
    Ok(match tests.len() {
        1 => tests.remove(0),
        _ => FieldTest::All(tests),
    })
}
