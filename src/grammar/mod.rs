//! SQL compilation.
//!
//! [`Grammar`] renders a [`QueryState`] into a statement using `?`
//! placeholders. Parameters are collected into [`Bindings`] while each
//! fragment is written, so placeholder order and parameter order cannot
//! drift apart.

mod state;

pub use state::{Bindings, CompiledQuery, QueryState};

use crate::clauses::{Aggregate, JoinClause, OrderClause, Predicate, WhereClause};
use crate::error::{QuarryError, Result};
use crate::traits::QueryCompiler;
use crate::types::{SqlValue, Values};

/// Pieces of a SELECT in the order they are emitted.
#[derive(Debug, Clone, Copy)]
enum Component {
    Columns,
    From,
    Joins,
    Wheres,
    Groups,
    Havings,
    Orders,
    Limit,
    Offset,
    Unions,
}

const SELECT_COMPONENTS: [Component; 10] = [
    Component::Columns,
    Component::From,
    Component::Joins,
    Component::Wheres,
    Component::Groups,
    Component::Havings,
    Component::Orders,
    Component::Limit,
    Component::Offset,
    Component::Unions,
];

/// The default grammar: upper-case keywords, `?` placeholders, columns
/// qualified with the table they are selected from.
#[derive(Debug, Clone, Copy, Default)]
pub struct Grammar;

impl Grammar {
    pub fn new() -> Self {
        Self
    }

    /// Prefixes a bare column with `table.`. `*`, dotted names and
    /// expressions are left alone.
    pub fn qualify(&self, column: &str, table: Option<&str>) -> String {
        match table {
            Some(table)
                if !table.is_empty()
                    && column != "*"
                    && !column.contains('.')
                    && !column.contains('(') =>
            {
                format!("{}.{}", table, column)
            }
            _ => column.to_string(),
        }
    }

    fn columnize(&self, columns: &[String], table: Option<&str>) -> String {
        columns
            .iter()
            .map(|c| self.qualify(c, table))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn parametrize(&self, count: usize) -> String {
        vec!["?"; count].join(", ")
    }

    fn compile_component(
        &self,
        component: Component,
        state: &QueryState,
        table: &str,
        bindings: &mut Bindings,
    ) -> Option<String> {
        match component {
            Component::Columns => Some(self.compile_columns(state, table)),
            Component::From => Some(format!("FROM {}", table)),
            Component::Joins if !state.joins.is_empty() => {
                Some(self.compile_joins(&state.joins, table, bindings))
            }
            Component::Wheres if !state.wheres.is_empty() => {
                Some(self.compile_wheres(&state.wheres, table, bindings))
            }
            Component::Groups if !state.groups.is_empty() => {
                Some(format!("GROUP BY {}", self.columnize(&state.groups, Some(table))))
            }
            Component::Orders if !state.orders.is_empty() => {
                Some(self.compile_orders(&state.orders, table))
            }
            Component::Limit => state.limit.map(|limit| format!("LIMIT {}", limit)),
            // Reserved slots; nothing produces them yet.
            Component::Havings | Component::Offset | Component::Unions => None,
            _ => None,
        }
    }

    fn compile_columns(&self, state: &QueryState, table: &str) -> String {
        let select = if state.distinct {
            "SELECT DISTINCT "
        } else {
            "SELECT "
        };
        if state.columns.is_empty() {
            return format!("{}*", select);
        }
        format!("{}{}", select, self.columnize(&state.columns, Some(table)))
    }

    fn compile_aggregate_select(
        &self,
        state: &QueryState,
        table: &str,
        bindings: &mut Bindings,
    ) -> String {
        let aggregates = state
            .aggregates
            .iter()
            .map(|aggregate| self.compile_aggregate(aggregate, table))
            .collect::<Vec<_>>()
            .join(", ");

        let mut head = format!("SELECT {}", aggregates);
        let plain_columns = !state.columns.is_empty() && state.columns != ["*"];
        if plain_columns {
            head.push_str(", ");
            head.push_str(&self.columnize(&state.columns, Some(table)));
        }

        let mut parts = vec![head, format!("FROM {}", table)];
        if !state.joins.is_empty() {
            parts.push(self.compile_joins(&state.joins, table, bindings));
        }
        if !state.wheres.is_empty() {
            parts.push(self.compile_wheres(&state.wheres, table, bindings));
        }
        if !state.groups.is_empty() {
            parts.push(format!("GROUP BY {}", self.columnize(&state.groups, Some(table))));
        }
        if !state.orders.is_empty() {
            parts.push(self.compile_orders(&state.orders, table));
        }
        parts.join(" ")
    }

    fn compile_aggregate(&self, aggregate: &Aggregate, table: &str) -> String {
        let columns = if aggregate.columns.is_empty() {
            "*".to_string()
        } else {
            self.columnize(&aggregate.columns, Some(table))
        };
        match &aggregate.alias {
            Some(alias) => format!("{}({}) AS {}", aggregate.function.as_sql(), columns, alias),
            None => format!("{}({})", aggregate.function.as_sql(), columns),
        }
    }

    fn compile_wheres(
        &self,
        wheres: &[WhereClause],
        table: &str,
        bindings: &mut Bindings,
    ) -> String {
        wheres
            .iter()
            .enumerate()
            .map(|(index, clause)| {
                let connector = if index == 0 {
                    "WHERE"
                } else {
                    clause.connector.as_sql()
                };
                self.compile_predicate(
                    connector,
                    &clause.predicate,
                    table,
                    &mut bindings.select_where,
                )
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn compile_predicate(
        &self,
        connector: &str,
        predicate: &Predicate,
        table: &str,
        bucket: &mut Vec<SqlValue>,
    ) -> String {
        let column = self.qualify(predicate.column(), Some(table));
        match predicate {
            Predicate::Basic {
                operator, value, ..
            } => {
                bucket.push(value.clone());
                format!("{} {} {} ?", connector, column, operator)
            }
            Predicate::In {
                values, negated, ..
            } => {
                bucket.extend(values.iter().cloned());
                let keyword = if *negated { "NOT IN" } else { "IN" };
                format!(
                    "{} {} {} ({})",
                    connector,
                    column,
                    keyword,
                    self.parametrize(values.len())
                )
            }
            Predicate::Between {
                low, high, negated, ..
            } => {
                bucket.push(low.clone());
                bucket.push(high.clone());
                let keyword = if *negated { "NOT BETWEEN" } else { "BETWEEN" };
                format!("{} {} {} ? AND ?", connector, column, keyword)
            }
            Predicate::Null { negated, .. } => {
                let keyword = if *negated { "IS NOT NULL" } else { "IS NULL" };
                format!("{} {} {}", connector, column, keyword)
            }
        }
    }

    fn compile_joins(&self, joins: &[JoinClause], table: &str, bindings: &mut Bindings) -> String {
        joins
            .iter()
            .map(|join| match join {
                JoinClause::On {
                    table: joined,
                    left,
                    operator,
                    right,
                    join_type,
                } => format!(
                    "{} JOIN {} ON {} {} {}",
                    join_type.as_sql(),
                    joined,
                    left,
                    operator,
                    right
                ),
                JoinClause::Predicate {
                    connector,
                    column,
                    operator,
                    value,
                } => self.compile_predicate(
                    connector.as_sql(),
                    &Predicate::Basic {
                        column: column.clone(),
                        operator: operator.clone(),
                        value: value.clone(),
                    },
                    table,
                    &mut bindings.join,
                ),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn compile_orders(&self, orders: &[OrderClause], table: &str) -> String {
        let orders = orders
            .iter()
            .map(|order| format!("{} {}", self.qualify(&order.column, Some(table)), order.spelling))
            .collect::<Vec<_>>()
            .join(", ");
        format!("ORDER BY {}", orders)
    }

    fn dml_table<'a>(&self, state: &'a QueryState, verb: &str) -> Result<&'a str> {
        state
            .from
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| QuarryError::Query(format!("no table to {}", verb)))
    }
}

impl QueryCompiler for Grammar {
    fn compile_select(&self, state: &QueryState) -> Result<CompiledQuery> {
        let table = self.dml_table(state, "select from")?;
        let mut bindings = Bindings::default();

        if !state.aggregates.is_empty() {
            let sql = self.compile_aggregate_select(state, table, &mut bindings);
            return Ok(CompiledQuery::new(sql, bindings.into_params()));
        }

        let sql = SELECT_COMPONENTS
            .iter()
            .filter_map(|component| self.compile_component(*component, state, table, &mut bindings))
            .collect::<Vec<_>>()
            .join(" ");

        Ok(CompiledQuery::new(sql, bindings.into_params()))
    }

    fn compile_insert(&self, state: &QueryState, values: &Values) -> Result<CompiledQuery> {
        if values.is_empty() {
            return Err(QuarryError::Query("no values to persist".to_string()));
        }
        let table = self.dml_table(state, "insert into")?;
        let mut bindings = Bindings::default();

        let columns = values
            .keys()
            .map(|column| format!("`{}`", column))
            .collect::<Vec<_>>()
            .join(", ");
        bindings.insert.extend(values.values().cloned());

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns,
            self.parametrize(values.len())
        );
        Ok(CompiledQuery::new(sql, bindings.into_params()))
    }

    fn compile_update(&self, state: &QueryState, values: &Values) -> Result<CompiledQuery> {
        if values.is_empty() {
            return Err(QuarryError::Query("no values to persist".to_string()));
        }
        let table = self.dml_table(state, "update")?;
        let mut bindings = Bindings::default();

        let assignments = values
            .iter()
            .map(|(column, value)| {
                bindings.update.push(value.clone());
                format!("{} = ?", column)
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!("UPDATE {} SET {}", table, assignments);
        if !state.wheres.is_empty() {
            sql.push(' ');
            sql.push_str(&self.compile_wheres(&state.wheres, table, &mut bindings));
        }
        Ok(CompiledQuery::new(sql, bindings.into_params()))
    }

    fn compile_delete(&self, state: &QueryState) -> Result<CompiledQuery> {
        let table = self.dml_table(state, "delete from")?;
        let mut bindings = Bindings::default();

        let mut sql = format!("DELETE FROM {}", table);
        if !state.wheres.is_empty() {
            sql.push(' ');
            sql.push_str(&self.compile_wheres(&state.wheres, table, &mut bindings));
        }
        Ok(CompiledQuery::new(sql, bindings.into_params()))
    }
}
