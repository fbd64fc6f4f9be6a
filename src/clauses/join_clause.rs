use crate::clauses::Connector;
use crate::types::SqlValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER",
            JoinType::Left => "LEFT OUTER",
            JoinType::Right => "RIGHT OUTER",
            JoinType::Full => "FULL",
            JoinType::Cross => "CROSS",
        }
    }
}

/// Represents one entry of the JOIN section.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinClause {
    /// `<TYPE> JOIN table ON left op right`. Keys are rendered verbatim.
    On {
        table: String,
        left: String,
        operator: String,
        right: String,
        join_type: JoinType,
    },
    /// `AND|OR column op ?` appended to the preceding join.
    Predicate {
        connector: Connector,
        column: String,
        operator: String,
        value: SqlValue,
    },
}
