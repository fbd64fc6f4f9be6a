//! quarry - fluent SQL query builder and active-record layer over PostgreSQL
//!
//! # Example
//! ```ignore
//! use quarry::{Connection, ConnectionConfig, Entity, Model};
//!
//! struct Customer;
//!
//! impl Entity for Customer {
//!     const NAME: &'static str = "Customer";
//! }
//!
//! // Connect the process-wide handle once
//! let config = ConnectionConfig::load()?;
//! Connection::global().connect(&config).await?;
//!
//! // Build and run a query
//! let adults = Connection::global()
//!     .table("users")
//!     .where_("age", ">", 18)
//!     .order_by("name", "asc")
//!     .get()
//!     .await?;
//!
//! // Or go through a model
//! let customer = Model::new::<Customer>().find(5).await?;
//! println!("{}", customer.to_json()?);
//! ```

pub mod builders;
pub mod clauses;
pub mod config;
pub mod drivers;
pub mod error;
pub mod grammar;
pub mod model;
pub mod relation;
pub mod traits;
pub mod types;

mod connection;

// Re-export main types for convenient access
pub use builders::{Builder, Fetched};
pub use config::ConnectionConfig;
pub use connection::{Connection, Transaction};
pub use error::{QuarryError, Result};
pub use grammar::{CompiledQuery, Grammar, QueryState};
pub use model::{Model, Schema};
pub use relation::{Relation, RelationDef, RelationKind};
pub use traits::{DatabaseDriver, Entity, ExecuteOutcome, QueryCompiler};
pub use types::{Collection, QueryResult, RawQueryResult, Row, SqlValue, Values};
