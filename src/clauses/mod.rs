mod join_clause;
mod projection;
mod where_clause;

pub use join_clause::{JoinClause, JoinType};
pub use projection::{Aggregate, AggregateFunction, Direction, OrderClause};
pub use where_clause::{validate_operator, Connector, Predicate, WhereClause, OPERATORS};
