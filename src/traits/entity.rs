use crate::model::{default_primary_key, pluralize, Schema};
use crate::relation::RelationDef;

/// Trait describing an entity stored in one table.
///
/// Only [`NAME`](Entity::NAME) is required; everything else is derived
/// from it unless overridden.
///
/// ```ignore
/// struct Customer;
///
/// impl Entity for Customer {
///     const NAME: &'static str = "Customer";
///
///     fn relations() -> Vec<RelationDef> {
///         vec![RelationDef::has_many::<Order>()]
///     }
/// }
/// ```
pub trait Entity: Send + Sync + 'static {
    /// Entity name, used to derive the table, primary key and relation names.
    const NAME: &'static str;

    /// Resolve every declared relation when a single row is fetched.
    const EAGER_LOAD: bool = false;

    /// Returns the table name as it appears in the database.
    fn table_name() -> String {
        pluralize(Self::NAME)
    }

    fn primary_key() -> String {
        default_primary_key(Self::NAME)
    }

    /// Columns accepted by mass assignment.
    fn fillable() -> &'static [&'static str] {
        &[]
    }

    fn relations() -> Vec<RelationDef> {
        Vec::new()
    }

    fn schema() -> Schema {
        Schema {
            name: Self::NAME.to_string(),
            table: Self::table_name(),
            primary_key: Self::primary_key(),
            fillable: Self::fillable().iter().map(|c| c.to_string()).collect(),
            relations: Self::relations(),
            eager_load: Self::EAGER_LOAD,
        }
    }
}
