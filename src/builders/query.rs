use std::sync::Arc;

use crate::clauses::{
    validate_operator, Aggregate, AggregateFunction, Connector, JoinClause, JoinType,
    OrderClause, Predicate, WhereClause,
};
use crate::connection::Connection;
use crate::error::{QuarryError, Result};
use crate::grammar::{CompiledQuery, QueryState};
use crate::model::Model;
use crate::traits::QueryCompiler;
use crate::types::{Collection, Row, SqlValue, Values};

/// Shapes routed through [`Builder::where_set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetShape {
    In,
    NotIn,
    Between,
    NotBetween,
}

/// What a SELECT produced.
///
/// A builder bound to a model collapses a single matching row into one
/// [`Model`]; any other row count yields a collection.
#[derive(Debug)]
pub enum Fetched {
    Rows(Collection<Row>),
    Model(Box<Model>),
    Models(Collection<Model>),
}

impl Fetched {
    pub fn len(&self) -> usize {
        match self {
            Fetched::Rows(rows) => rows.count(),
            Fetched::Model(_) => 1,
            Fetched::Models(models) => models.count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_single_model(&self) -> bool {
        matches!(self, Fetched::Model(_))
    }

    pub fn into_rows(self) -> Option<Collection<Row>> {
        match self {
            Fetched::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn into_model(self) -> Option<Model> {
        match self {
            Fetched::Model(model) => Some(*model),
            _ => None,
        }
    }

    /// Every hydrated model, whether one or many rows matched. `None` for
    /// plain rows from a builder with no model bound.
    pub fn into_models(self) -> Option<Collection<Model>> {
        match self {
            Fetched::Model(model) => Some(Collection::new(vec![*model])),
            Fetched::Models(models) => Some(models),
            Fetched::Rows(_) => None,
        }
    }
}

/// Fluent query builder.
///
/// Clause methods record state and return `&mut Self` for chaining; SQL is
/// compiled on demand by [`sql`](Builder::sql) or a terminal call. Terminal
/// calls (`get`, `insert`, `update`, `delete`) always clear the state, so one
/// builder can be reused for the next statement.
///
/// Validation failures (an illegal operator, a malformed predicate) are kept
/// until the next `sql()` or terminal call, which returns them instead of
/// producing SQL.
pub struct Builder {
    connection: Connection,
    compiler: Arc<dyn QueryCompiler>,
    state: QueryState,
    model: Option<Box<Model>>,
    eager: bool,
    /// Last table named through `from`; survives resets.
    table_hint: Option<String>,
    error: Option<QuarryError>,
}

impl Builder {
    pub fn new(connection: Connection) -> Self {
        let compiler = connection.compiler();
        Self {
            connection,
            compiler,
            state: QueryState::new(),
            model: None,
            eager: true,
            table_hint: None,
            error: None,
        }
    }

    /// Bind a model so that fetched rows hydrate into model instances.
    pub fn with_model(&mut self, model: Model) -> &mut Self {
        self.model = Some(Box::new(model));
        self
    }

    /// Skip relationship eager loading when hydrating a single row.
    pub(crate) fn without_eager_loading(&mut self) -> &mut Self {
        self.eager = false;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn state(&self) -> &QueryState {
        &self.state
    }

    fn fail(&mut self, err: QuarryError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    pub fn from(&mut self, table: &str) -> &mut Self {
        self.state.from = Some(table.to_string());
        self.table_hint = Some(table.to_string());
        self
    }

    /// Set the selected columns; an empty list selects `*`.
    pub fn select(&mut self, columns: &[&str]) -> &mut Self {
        self.state.columns = if columns.is_empty() {
            vec!["*".to_string()]
        } else {
            columns.iter().map(|c| c.to_string()).collect()
        };
        self
    }

    pub fn add_select(&mut self, columns: &[&str]) -> &mut Self {
        if self.state.columns.is_empty() {
            return self.select(columns);
        }
        self.state
            .columns
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn has_columns(&self) -> bool {
        !self.state.columns.is_empty()
    }

    pub fn distinct(&mut self) -> &mut Self {
        self.state.distinct = true;
        self
    }

    /// `column operator value`, joined with AND when it is not the first predicate.
    pub fn where_<V: Into<SqlValue>>(&mut self, column: &str, operator: &str, value: V) -> &mut Self {
        self.push_basic(Connector::And, column, operator, value.into())
    }

    /// `column = value`
    pub fn where_eq<V: Into<SqlValue>>(&mut self, column: &str, value: V) -> &mut Self {
        self.where_(column, "=", value)
    }

    pub fn and<V: Into<SqlValue>>(&mut self, column: &str, operator: &str, value: V) -> &mut Self {
        self.push_basic(Connector::And, column, operator, value.into())
    }

    pub fn and_eq<V: Into<SqlValue>>(&mut self, column: &str, value: V) -> &mut Self {
        self.and(column, "=", value)
    }

    pub fn or<V: Into<SqlValue>>(&mut self, column: &str, operator: &str, value: V) -> &mut Self {
        self.push_basic(Connector::Or, column, operator, value.into())
    }

    pub fn or_eq<V: Into<SqlValue>>(&mut self, column: &str, value: V) -> &mut Self {
        self.or(column, "=", value)
    }

    /// Several `column operator value` predicates at once, each joined with AND.
    pub fn where_all(&mut self, conditions: &[(&str, &str, SqlValue)]) -> &mut Self {
        for (column, operator, value) in conditions {
            self.push_basic(Connector::And, column, operator, value.clone());
        }
        self
    }

    fn push_basic(
        &mut self,
        connector: Connector,
        column: &str,
        operator: &str,
        value: SqlValue,
    ) -> &mut Self {
        let operator = match validate_operator(operator) {
            Ok(operator) => operator,
            Err(err) => {
                self.fail(err);
                return self;
            }
        };
        let clause = WhereClause::new(
            connector,
            Predicate::Basic {
                column: column.to_string(),
                operator,
                value,
            },
        );
        // An identical column/operator/value pair is only bound once, and only
        // while every predicate is joined by AND; under OR it changes the result.
        let duplicate = self.conjunctive_with(connector)
            && self.state.wheres.iter().any(|w| w.binds_same_as(&clause));
        if !duplicate {
            self.state.wheres.push(clause);
        }
        self
    }

    /// True when the chain is AND-only so far and `connector` keeps it that way.
    /// The first predicate's connector never renders.
    fn conjunctive_with(&self, connector: Connector) -> bool {
        connector == Connector::And
            && self
                .state
                .wheres
                .iter()
                .skip(1)
                .all(|w| w.connector == Connector::And)
    }

    fn where_set(
        &mut self,
        shape: SetShape,
        connector: Connector,
        column: &str,
        values: Vec<SqlValue>,
    ) -> &mut Self {
        let predicate = match shape {
            SetShape::In | SetShape::NotIn => {
                if values.is_empty() {
                    self.fail(QuarryError::InvalidArgument(format!(
                        "IN on `{}` needs at least one value",
                        column
                    )));
                    return self;
                }
                Predicate::In {
                    column: column.to_string(),
                    values,
                    negated: shape == SetShape::NotIn,
                }
            }
            SetShape::Between | SetShape::NotBetween => {
                let mut bounds = values.into_iter();
                match (bounds.next(), bounds.next(), bounds.next()) {
                    (Some(low), Some(high), None) => Predicate::Between {
                        column: column.to_string(),
                        low,
                        high,
                        negated: shape == SetShape::NotBetween,
                    },
                    _ => {
                        self.fail(QuarryError::InvalidArgument(format!(
                            "BETWEEN on `{}` needs exactly two values",
                            column
                        )));
                        return self;
                    }
                }
            }
        };
        self.state.wheres.push(WhereClause::new(connector, predicate));
        self
    }

    pub fn where_in<I, V>(&mut self, column: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.where_set(SetShape::In, Connector::And, column, values)
    }

    pub fn and_where_in<I, V>(&mut self, column: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.where_in(column, values)
    }

    pub fn or_where_in<I, V>(&mut self, column: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.where_set(SetShape::In, Connector::Or, column, values)
    }

    pub fn where_not_in<I, V>(&mut self, column: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.where_set(SetShape::NotIn, Connector::And, column, values)
    }

    pub fn and_where_not_in<I, V>(&mut self, column: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.where_not_in(column, values)
    }

    pub fn or_where_not_in<I, V>(&mut self, column: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.where_set(SetShape::NotIn, Connector::Or, column, values)
    }

    pub fn where_between<L, H>(&mut self, column: &str, low: L, high: H) -> &mut Self
    where
        L: Into<SqlValue>,
        H: Into<SqlValue>,
    {
        let values = vec![low.into(), high.into()];
        self.where_set(SetShape::Between, Connector::And, column, values)
    }

    pub fn and_where_between<L, H>(&mut self, column: &str, low: L, high: H) -> &mut Self
    where
        L: Into<SqlValue>,
        H: Into<SqlValue>,
    {
        self.where_between(column, low, high)
    }

    pub fn or_where_between<L, H>(&mut self, column: &str, low: L, high: H) -> &mut Self
    where
        L: Into<SqlValue>,
        H: Into<SqlValue>,
    {
        let values = vec![low.into(), high.into()];
        self.where_set(SetShape::Between, Connector::Or, column, values)
    }

    pub fn where_not_between<L, H>(&mut self, column: &str, low: L, high: H) -> &mut Self
    where
        L: Into<SqlValue>,
        H: Into<SqlValue>,
    {
        let values = vec![low.into(), high.into()];
        self.where_set(SetShape::NotBetween, Connector::And, column, values)
    }

    pub fn and_where_not_between<L, H>(&mut self, column: &str, low: L, high: H) -> &mut Self
    where
        L: Into<SqlValue>,
        H: Into<SqlValue>,
    {
        self.where_not_between(column, low, high)
    }

    pub fn or_where_not_between<L, H>(&mut self, column: &str, low: L, high: H) -> &mut Self
    where
        L: Into<SqlValue>,
        H: Into<SqlValue>,
    {
        let values = vec![low.into(), high.into()];
        self.where_set(SetShape::NotBetween, Connector::Or, column, values)
    }

    fn push_null(&mut self, connector: Connector, column: &str, negated: bool) -> &mut Self {
        self.state.wheres.push(WhereClause::new(
            connector,
            Predicate::Null {
                column: column.to_string(),
                negated,
            },
        ));
        self
    }

    pub fn where_null(&mut self, column: &str) -> &mut Self {
        self.push_null(Connector::And, column, false)
    }

    pub fn or_where_null(&mut self, column: &str) -> &mut Self {
        self.push_null(Connector::Or, column, false)
    }

    pub fn where_not_null(&mut self, column: &str) -> &mut Self {
        self.push_null(Connector::And, column, true)
    }

    pub fn or_where_not_null(&mut self, column: &str) -> &mut Self {
        self.push_null(Connector::Or, column, true)
    }

    /// `INNER JOIN table ON left operator right`
    pub fn join(&mut self, table: &str, left: &str, operator: &str, right: &str) -> &mut Self {
        self.push_join(JoinType::Inner, table, left, operator, right)
    }

    pub fn left_join(&mut self, table: &str, left: &str, operator: &str, right: &str) -> &mut Self {
        self.push_join(JoinType::Left, table, left, operator, right)
    }

    pub fn right_join(&mut self, table: &str, left: &str, operator: &str, right: &str) -> &mut Self {
        self.push_join(JoinType::Right, table, left, operator, right)
    }

    pub fn full_join(&mut self, table: &str, left: &str, operator: &str, right: &str) -> &mut Self {
        self.push_join(JoinType::Full, table, left, operator, right)
    }

    pub fn cross_join(&mut self, table: &str, left: &str, operator: &str, right: &str) -> &mut Self {
        self.push_join(JoinType::Cross, table, left, operator, right)
    }

    fn push_join(
        &mut self,
        join_type: JoinType,
        table: &str,
        left: &str,
        operator: &str,
        right: &str,
    ) -> &mut Self {
        match validate_operator(operator) {
            Ok(operator) => self.state.joins.push(JoinClause::On {
                table: table.to_string(),
                left: left.to_string(),
                operator,
                right: right.to_string(),
                join_type,
            }),
            Err(err) => self.fail(err),
        }
        self
    }

    /// Extend the last join with `AND column operator ?`.
    pub fn and_join<V: Into<SqlValue>>(&mut self, column: &str, operator: &str, value: V) -> &mut Self {
        self.push_join_predicate(Connector::And, column, operator, value.into())
    }

    /// Extend the last join with `OR column operator ?`.
    pub fn or_join<V: Into<SqlValue>>(&mut self, column: &str, operator: &str, value: V) -> &mut Self {
        self.push_join_predicate(Connector::Or, column, operator, value.into())
    }

    fn push_join_predicate(
        &mut self,
        connector: Connector,
        column: &str,
        operator: &str,
        value: SqlValue,
    ) -> &mut Self {
        match validate_operator(operator) {
            Ok(operator) => self.state.joins.push(JoinClause::Predicate {
                connector,
                column: column.to_string(),
                operator,
                value,
            }),
            Err(err) => self.fail(err),
        }
        self
    }

    pub fn order_by(&mut self, column: &str, direction: &str) -> &mut Self {
        match OrderClause::parse(column, direction) {
            Ok(order) => self.state.orders.push(order),
            Err(err) => self.fail(err),
        }
        self
    }

    pub fn order_by_desc(&mut self, column: &str) -> &mut Self {
        self.order_by(column, "desc")
    }

    /// Newest first, by `created_at` unless another column is given.
    pub fn latest(&mut self, column: Option<&str>) -> &mut Self {
        self.order_by_desc(column.unwrap_or("created_at"))
    }

    pub fn oldest(&mut self, column: Option<&str>) -> &mut Self {
        self.order_by(column.unwrap_or("created_at"), "asc")
    }

    pub fn group_by(&mut self, columns: &[&str]) -> &mut Self {
        self.state
            .groups
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// Limit the number of rows. Negative values are ignored.
    pub fn rows(&mut self, limit: i64) -> &mut Self {
        if let Ok(limit) = u64::try_from(limit) {
            self.state.limit = Some(limit);
        }
        self
    }

    pub fn limit(&mut self, limit: i64) -> &mut Self {
        self.rows(limit)
    }

    /// Queue an aggregate. Without a GROUP BY any ORDER BY collected so far
    /// is dropped, since it cannot apply to a single aggregate row.
    pub fn aggregate(
        &mut self,
        function: AggregateFunction,
        column: &str,
        alias: Option<&str>,
    ) -> &mut Self {
        let columns = if column.is_empty() {
            Vec::new()
        } else {
            vec![column.to_string()]
        };
        self.state.aggregates.push(Aggregate {
            function,
            columns,
            alias: alias.map(str::to_string),
        });
        if self.state.groups.is_empty() {
            self.state.orders.clear();
        }
        self
    }

    pub fn min(&mut self, column: &str, alias: Option<&str>) -> &mut Self {
        self.aggregate(AggregateFunction::Min, column, alias)
    }

    pub fn max(&mut self, column: &str, alias: Option<&str>) -> &mut Self {
        self.aggregate(AggregateFunction::Max, column, alias)
    }

    pub fn avg(&mut self, column: &str, alias: Option<&str>) -> &mut Self {
        self.aggregate(AggregateFunction::Avg, column, alias)
    }

    pub fn average(&mut self, column: &str, alias: Option<&str>) -> &mut Self {
        self.avg(column, alias)
    }

    pub fn sum(&mut self, column: &str, alias: Option<&str>) -> &mut Self {
        self.aggregate(AggregateFunction::Sum, column, alias)
    }

    pub fn count(&mut self, column: &str, alias: Option<&str>) -> &mut Self {
        self.aggregate(AggregateFunction::Count, column, alias)
    }

    /// Queue an aggregate and execute the query right away.
    pub async fn aggregate_now(
        &mut self,
        function: AggregateFunction,
        column: &str,
        alias: Option<&str>,
    ) -> Result<Fetched> {
        self.aggregate(function, column, alias);
        self.get().await
    }

    /// Compile the current state without consuming it.
    pub fn sql(&self) -> Result<CompiledQuery> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        self.compiler.compile_select(&self.state)
    }

    /// Compile the current state and clear it.
    pub fn to_sql(&mut self) -> Result<CompiledQuery> {
        let compiled = self.sql();
        self.reset();
        compiled
    }

    /// Clear all accumulated clauses and any pending validation error.
    pub fn reset(&mut self) -> &mut Self {
        self.state = QueryState::new();
        self.error = None;
        self
    }

    /// Execute the SELECT.
    pub async fn get(&mut self) -> Result<Fetched> {
        if !self.has_columns() {
            self.select(&[]);
        }
        let compiled = self.to_sql()?;
        let result = self
            .connection
            .select(&compiled.sql, &compiled.params)
            .await?;
        self.hydrate(result.rows()).await
    }

    /// Execute the SELECT with `columns` unless columns were already chosen.
    pub async fn get_columns(&mut self, columns: &[&str]) -> Result<Fetched> {
        if !self.has_columns() {
            self.select(columns);
        }
        self.get().await
    }

    /// Run hand-written SQL and hydrate the rows like [`get`](Builder::get).
    pub async fn raw_query(&mut self, sql: &str) -> Result<Fetched> {
        self.reset();
        let result = self.connection.select(sql, &[]).await?;
        self.hydrate(result.rows()).await
    }

    async fn hydrate(&self, rows: Vec<Row>) -> Result<Fetched> {
        let Some(model) = &self.model else {
            return Ok(Fetched::Rows(Collection::new(rows)));
        };
        if rows.len() == 1 {
            let row = rows.into_iter().next().unwrap_or_default();
            let instance = model.new_instance(row.into_values(), self.eager).await?;
            return Ok(Fetched::Model(Box::new(instance)));
        }
        Ok(Fetched::Models(
            rows.into_iter()
                .map(|row| model.clone_instance(row.into_values()))
                .collect(),
        ))
    }

    /// Takes the state for a data-modifying statement, falling back to the
    /// last table this builder saw when none is set.
    fn take_for_write(&mut self) -> Result<QueryState> {
        let pending = self.error.take();
        let mut state = std::mem::take(&mut self.state);
        if let Some(err) = pending {
            return Err(err);
        }
        if state.from.is_none() {
            state.from = self.table_hint.clone();
        }
        Ok(state)
    }

    /// Insert one row. Returns the generated identifier when available,
    /// otherwise the number of inserted rows.
    pub async fn insert(&mut self, values: Values) -> Result<i64> {
        let state = self.take_for_write()?;
        let compiled = self.compiler.compile_insert(&state, &values)?;
        self.connection
            .insert(&compiled.sql, &compiled.params)
            .await
    }

    /// Update matching rows. Returns the affected row count.
    pub async fn update(&mut self, values: Values) -> Result<u64> {
        let state = self.take_for_write()?;
        let compiled = self.compiler.compile_update(&state, &values)?;
        self.connection
            .update(&compiled.sql, &compiled.params)
            .await
    }

    /// Delete rows matching the accumulated predicates.
    pub async fn delete(&mut self) -> Result<u64> {
        let state = self.take_for_write()?;
        let compiled = self.compiler.compile_delete(&state)?;
        self.connection
            .delete(&compiled.sql, &compiled.params)
            .await
    }

    /// Add `column operator value` and delete matching rows.
    pub async fn delete_where<V: Into<SqlValue>>(
        &mut self,
        column: &str,
        operator: &str,
        value: V,
    ) -> Result<u64> {
        self.where_(column, operator, value);
        self.delete().await
    }

    pub async fn call_procedure(&self, name: &str, params: &[SqlValue]) -> Result<bool> {
        self.connection.call_procedure(name, params).await
    }
}
