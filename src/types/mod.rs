mod collection;
mod row;
mod sql_value;

pub use collection::Collection;
pub use row::{QueryResult, RawQueryResult, Row};
pub use sql_value::SqlValue;

/// Ordered column → value mapping used for inserts, updates and model attributes.
pub type Values = indexmap::IndexMap<String, SqlValue>;
