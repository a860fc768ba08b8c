//! The closed set of filter operators both engines understand.

use crate::config::Engine;
use crate::error::TranslateError;

/// Operators known to the document query language that have no relational
/// counterpart. Naming one against the relational engine is a hard error.
pub const INCOMPATIBLE_WITH_SQL: &[&str] = &[
    "$nor",
    "$exists",
    "$type",
    "$expr",
    "$jsonSchema",
    "$mod",
    "$text",
    "$where",
    "$geoIntersects",
    "$geoWithin",
    "$near",
    "$nearSphere",
    "$box",
    "$center",
    "$centerSphere",
    "$geometry",
    "$maxDistance",
    "$minDistance",
    "$polygon",
    "$elemMatch",
    "$size",
    "$bitsAllClear",
    "$bitsAllSet",
    "$bitsAnyClear",
    "$bitsAnySet",
    "$slice",
    "$comment",
    "$rand",
    "$natural",
    "$currentDate",
    "$inc",
    "$min",
    "$max",
    "$mul",
    "$rename",
    "$set",
    "$setOnInsert",
    "$unset",
    "$addToSet",
    "$pop",
    "$pull",
    "$push",
    "$pullAll",
    "$each",
    "$position",
    "$sort",
    "$bit",
];

/// Modifier read alongside `$regex`; not an operator on its own.
pub const REGEX_OPTIONS: &str = "$options";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    And,
    Or,
    Not,
    Regex,
}

impl Operator {
    pub const ALL: [Operator; 12] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::In,
        Operator::Nin,
        Operator::And,
        Operator::Or,
        Operator::Not,
        Operator::Regex,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::In => "$in",
            Operator::Nin => "$nin",
            Operator::And => "$and",
            Operator::Or => "$or",
            Operator::Not => "$not",
            Operator::Regex => "$regex",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.key() == key)
    }

    /// Resolve an operator key. Keys outside the closed set are rejected on every
    /// engine; the relational engine reports listed document-only operators (and
    /// positional `.$` keys) as incompatible.
    pub fn parse(key: &str, engine: Engine) -> Result<Self, TranslateError> {
        if let Some(op) = Self::from_key(key) {
            return Ok(op);
        }
        if engine == Engine::Sqlite && is_incompatible_with_sql(key) {
            return Err(TranslateError::Incompatible {
                operator: key.to_string(),
            });
        }
        Err(TranslateError::UnsupportedOperator {
            operator: key.to_string(),
        })
    }
}

pub fn is_incompatible_with_sql(key: &str) -> bool {
    INCOMPATIBLE_WITH_SQL.contains(&key) || key.contains(".$")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_keys() {
        for op in Operator::ALL {
            assert_eq!(Operator::parse(op.key(), Engine::Sqlite), Ok(op));
            assert_eq!(Operator::parse(op.key(), Engine::Mongodb), Ok(op));
        }
    }

    #[test]
    fn test_incompatible_on_sqlite_only() {
        for key in INCOMPATIBLE_WITH_SQL {
            assert_eq!(
                Operator::parse(key, Engine::Sqlite),
                Err(TranslateError::Incompatible {
                    operator: key.to_string()
                })
            );
            assert!(matches!(
                Operator::parse(key, Engine::Mongodb),
                Err(TranslateError::UnsupportedOperator { .. })
            ));
        }
    }

    #[test]
    fn test_unknown_operator() {
        assert!(matches!(
            Operator::parse("$like", Engine::Sqlite),
            Err(TranslateError::UnsupportedOperator { .. })
        ));
    }
}
