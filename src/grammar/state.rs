use crate::clauses::{Aggregate, JoinClause, OrderClause, WhereClause};
use crate::types::SqlValue;

/// Everything a [`Builder`](crate::Builder) has accumulated for the current
/// statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    /// Empty compiles to `*`.
    pub columns: Vec<String>,
    pub from: Option<String>,
    pub joins: Vec<JoinClause>,
    pub wheres: Vec<WhereClause>,
    pub groups: Vec<String>,
    pub orders: Vec<OrderClause>,
    /// Present aggregates switch compilation to the aggregate-only form.
    pub aggregates: Vec<Aggregate>,
    pub limit: Option<u64>,
    pub distinct: bool,
}

impl QueryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Parameter buckets filled while a statement is rendered. Each bucket keeps
/// the order in which its placeholders were written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    pub select_where: Vec<SqlValue>,
    pub join: Vec<SqlValue>,
    pub insert: Vec<SqlValue>,
    pub update: Vec<SqlValue>,
}

impl Bindings {
    /// Flattens the buckets in statement order: SET/VALUES, then JOIN, then
    /// WHERE.
    pub fn into_params(self) -> Vec<SqlValue> {
        let mut params = Vec::with_capacity(
            self.insert.len() + self.update.len() + self.join.len() + self.select_where.len(),
        );
        params.extend(self.insert);
        params.extend(self.update);
        params.extend(self.join);
        params.extend(self.select_where);
        params
    }
}

/// A compiled statement and its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl CompiledQuery {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn placeholder_count(&self) -> usize {
        self.sql.matches('?').count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bindings_flatten_in_statement_order() {
        let bindings = Bindings {
            select_where: vec![SqlValue::from(3)],
            join: vec![SqlValue::from(2)],
            insert: vec![],
            update: vec![SqlValue::from(1)],
        };
        assert_eq!(
            bindings.into_params(),
            vec![SqlValue::from(1), SqlValue::from(2), SqlValue::from(3)]
        );
    }

    #[test]
    fn test_fresh_state_is_empty() {
        let mut state = QueryState::new();
        assert!(state.is_empty());
        state.distinct = true;
        assert!(!state.is_empty());
    }
}
