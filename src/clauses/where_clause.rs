use crate::error::{QuarryError, Result};
use crate::types::SqlValue;

/// All of the available comparison operators.
pub const OPERATORS: &[&str] = &[
    "=",
    "<",
    ">",
    "<=",
    ">=",
    "<>",
    "!=",
    "<=>",
    "like",
    "like binary",
    "not like",
    "ilike",
    "&",
    "|",
    "^",
    "<<",
    ">>",
    "rlike",
    "regexp",
    "not regexp",
    "~",
    "~*",
    "!~",
    "!~*",
    "similar to",
    "not similar to",
    "not ilike",
    "~~*",
    "!~~*",
];

/// Checks `operator` against [`OPERATORS`], ignoring case and surrounding
/// whitespace. Returns the operator as it will be rendered.
pub fn validate_operator(operator: &str) -> Result<String> {
    let normalized = operator.trim().to_ascii_lowercase();
    if OPERATORS.contains(&normalized.as_str()) {
        Ok(normalized)
    } else {
        Err(QuarryError::InvalidArgument(format!(
            "Illegal operator `{}`",
            operator
        )))
    }
}

/// Boolean connector written in front of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    And,
    Or,
}

impl Connector {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Connector::And => "AND",
            Connector::Or => "OR",
        }
    }
}

/// A single predicate shape. Values live inside the predicate so that the
/// parameter order always follows clause order.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// column op value
    Basic {
        column: String,
        operator: String,
        value: SqlValue,
    },
    /// column [NOT] IN (values)
    In {
        column: String,
        values: Vec<SqlValue>,
        negated: bool,
    },
    /// column [NOT] BETWEEN low AND high
    Between {
        column: String,
        low: SqlValue,
        high: SqlValue,
        negated: bool,
    },
    /// column IS [NOT] NULL
    Null { column: String, negated: bool },
}

impl Predicate {
    pub fn column(&self) -> &str {
        match self {
            Predicate::Basic { column, .. }
            | Predicate::In { column, .. }
            | Predicate::Between { column, .. }
            | Predicate::Null { column, .. } => column,
        }
    }
}

/// Represents one entry of a WHERE clause.
///
/// The connector is the one supplied by the caller; the first clause of a
/// query always renders as `WHERE` regardless.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub connector: Connector,
    pub predicate: Predicate,
}

impl WhereClause {
    pub fn new(connector: Connector, predicate: Predicate) -> Self {
        Self {
            connector,
            predicate,
        }
    }

    /// Two basic clauses bind the same parameter when column, operator and
    /// value all match.
    pub fn binds_same_as(&self, other: &WhereClause) -> bool {
        match (&self.predicate, &other.predicate) {
            (
                Predicate::Basic {
                    column: c1,
                    operator: o1,
                    value: v1,
                },
                Predicate::Basic {
                    column: c2,
                    operator: o2,
                    value: v2,
                },
            ) => c1 == c2 && o1 == o2 && v1 == v2,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_operator_accepts_known() {
        assert_eq!(validate_operator(">=").unwrap(), ">=");
        assert_eq!(validate_operator("LIKE").unwrap(), "like");
        assert_eq!(validate_operator(" not ilike ").unwrap(), "not ilike");
    }

    #[test]
    fn test_validate_operator_rejects_unknown() {
        let err = validate_operator("DROP TABLE").unwrap_err();
        assert!(matches!(err, QuarryError::InvalidArgument(msg) if msg.contains("DROP TABLE")));
        assert!(validate_operator("=; --").is_err());
    }

    #[test]
    fn test_binds_same_as() {
        let basic = |value: i32| {
            WhereClause::new(
                Connector::And,
                Predicate::Basic {
                    column: "age".to_string(),
                    operator: ">".to_string(),
                    value: value.into(),
                },
            )
        };
        assert!(basic(18).binds_same_as(&basic(18)));
        assert!(!basic(18).binds_same_as(&basic(21)));
    }
}
