//! Active-record models.
//!
//! A [`Model`] is one row of its table plus the relations resolved for it.
//! Models are built from an [`Entity`] or a [`Schema`] and talk to the
//! database through builders scoped to their table.

mod schema;

pub use schema::{default_primary_key, pluralize, Schema};

use std::fmt;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};

use crate::builders::Builder;
use crate::connection::Connection;
use crate::error::{QuarryError, Result};
use crate::relation::{Relation, RelationDef};
use crate::traits::Entity;
use crate::types::{Collection, SqlValue, Values};

#[derive(Debug, Clone)]
pub struct Model {
    connection: Connection,
    schema: Schema,
    attributes: Values,
    relations: IndexMap<String, Relation>,
}

impl Model {
    /// An empty model of `E` on the process-wide connection.
    pub fn new<E: Entity>() -> Self {
        Self::from_schema(E::schema(), Connection::global())
    }

    /// An empty model of `E` on an explicit connection.
    pub fn with_connection<E: Entity>(connection: Connection) -> Self {
        Self::from_schema(E::schema(), connection)
    }

    pub fn from_schema(schema: Schema, connection: Connection) -> Self {
        Self {
            connection,
            schema,
            attributes: Values::new(),
            relations: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn table(&self) -> &str {
        &self.schema.table
    }

    pub fn set_table(&mut self, table: &str) -> &mut Self {
        self.schema.table = table.to_string();
        self
    }

    pub fn primary_key(&self) -> &str {
        &self.schema.primary_key
    }

    pub fn set_primary_key(&mut self, key: &str) -> &mut Self {
        self.schema.primary_key = key.to_string();
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub(crate) fn relation_defs(&self) -> &[RelationDef] {
        &self.schema.relations
    }

    pub fn attributes(&self) -> &Values {
        &self.attributes
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.attributes.get(column)
    }

    pub fn set_attribute<V: Into<SqlValue>>(&mut self, column: &str, value: V) -> &mut Self {
        self.attributes.insert(column.to_string(), value.into());
        self
    }

    pub fn remove_attribute(&mut self, column: &str) -> Option<SqlValue> {
        self.attributes.shift_remove(column)
    }

    /// Merge `values` into the attributes, overwriting existing columns.
    pub fn fill(&mut self, values: Values) -> &mut Self {
        self.attributes.extend(values);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Number of attributes.
    pub fn count(&self) -> usize {
        self.attributes.len()
    }

    pub fn relations(&self) -> &IndexMap<String, Relation> {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name)
    }

    pub fn set_relation(&mut self, name: &str, relation: Relation) -> &mut Self {
        self.relations.insert(name.to_string(), relation);
        self
    }

    /// Same table and connection, different attributes, no relations.
    pub fn clone_instance(&self, attributes: Values) -> Model {
        Model {
            connection: self.connection.clone(),
            schema: self.schema.clone(),
            attributes,
            relations: IndexMap::new(),
        }
    }

    /// Like [`clone_instance`](Model::clone_instance), then resolves every
    /// declared relation when the schema asks for eager loading.
    pub async fn new_instance(&self, attributes: Values, eager: bool) -> Result<Model> {
        let mut instance = self.clone_instance(attributes);
        if eager && instance.schema.eager_load && !instance.is_empty() {
            instance.load_all_relations().await?;
        }
        Ok(instance)
    }

    /// An unbound builder on this model's table.
    pub fn serve(&self) -> Builder {
        self.connection.table(self.table())
    }

    /// A builder on this model's table whose results hydrate into models.
    pub fn query(&self) -> Builder {
        let mut builder = self.serve();
        builder.with_model(self.clone_instance(Values::new()));
        builder
    }

    pub fn where_<V: Into<SqlValue>>(&self, column: &str, operator: &str, value: V) -> Builder {
        let mut builder = self.query();
        builder.where_(column, operator, value);
        builder
    }

    /// The row whose primary key equals `id`, or an empty model.
    pub async fn find<V: Into<SqlValue>>(&self, id: V) -> Result<Model> {
        let fetched = self
            .query()
            .select(&["*"])
            .where_(self.primary_key(), "=", id)
            .get()
            .await?;
        Ok(fetched
            .into_model()
            .unwrap_or_else(|| self.clone_instance(Values::new())))
    }

    /// Every row, ordered by primary key.
    pub async fn all(&self) -> Result<Collection<Model>> {
        let fetched = self
            .query()
            .select(&["*"])
            .order_by(self.primary_key(), "ASC")
            .get()
            .await?;
        Ok(fetched.into_models().unwrap_or_default())
    }

    pub async fn first(&self) -> Result<Option<Model>> {
        self.edge("asc").await
    }

    pub async fn last(&self) -> Result<Option<Model>> {
        self.edge("desc").await
    }

    async fn edge(&self, direction: &str) -> Result<Option<Model>> {
        let fetched = self
            .query()
            .select(&["*"])
            .order_by(self.primary_key(), direction)
            .rows(1)
            .get()
            .await?;
        Ok(fetched.into_models().and_then(Collection::into_first))
    }

    /// Insert the current attributes. When the primary key is not set it is
    /// filled with the generated identifier.
    pub async fn save(&mut self) -> Result<i64> {
        let id = self
            .serve()
            .insert(self.attributes.clone())
            .await?;
        let primary_key = self.primary_key().to_string();
        if !self.attributes.contains_key(&primary_key) {
            self.attributes.insert(primary_key, SqlValue::Int64(id));
        }
        Ok(id)
    }

    /// Merge `values` into the attributes, then [`save`](Model::save).
    pub async fn save_with(&mut self, values: Values) -> Result<i64> {
        self.fill(values);
        self.save().await
    }

    /// Write the current attributes to the row with this model's primary key.
    pub async fn update(&self) -> Result<u64> {
        let id = self.require_primary_key()?;
        self.serve()
            .where_(self.primary_key(), "=", id)
            .update(self.attributes.clone())
            .await
    }

    /// Merge `values` into the attributes, then [`update`](Model::update).
    pub async fn update_with(&mut self, values: Values) -> Result<u64> {
        self.fill(values);
        self.update().await
    }

    /// Delete the row with this model's primary key.
    pub async fn delete(&self) -> Result<u64> {
        let id = self.require_primary_key()?;
        self.delete_where(self.primary_key(), "=", id).await
    }

    pub async fn delete_where<V: Into<SqlValue>>(
        &self,
        column: &str,
        operator: &str,
        value: V,
    ) -> Result<u64> {
        self.serve().delete_where(column, operator, value).await
    }

    /// Mass-assign `values` and insert them. Every column must be fillable.
    pub async fn create(&self, values: Values) -> Result<i64> {
        if self.schema.fillable.is_empty() {
            return Err(QuarryError::InvalidArgument(
                "no columns available for mass assignment".to_string(),
            ));
        }
        if let Some(column) = values
            .keys()
            .find(|column| !self.schema.fillable.contains(*column))
        {
            return Err(QuarryError::InvalidArgument(format!(
                "column `{}` is not available for mass assignment",
                column
            )));
        }
        self.serve().insert(values).await
    }

    fn require_primary_key(&self) -> Result<SqlValue> {
        self.get(self.primary_key())
            .filter(|value| !value.is_null())
            .cloned()
            .ok_or_else(|| {
                QuarryError::InvalidArgument(format!(
                    "`{}` has no value for primary key `{}`",
                    self.name(),
                    self.primary_key()
                ))
            })
    }

    /// Attributes and resolved relations as JSON.
    pub fn to_value(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        for (column, value) in &self.attributes {
            object.insert(column.clone(), serde_json::to_value(value).unwrap_or_default());
        }
        for (name, relation) in &self.relations {
            let value = match relation {
                Relation::One(model) => model.to_value(),
                Relation::Many(models) => {
                    serde_json::Value::Array(models.iter().map(Model::to_value).collect())
                }
            };
            object.insert(name.clone(), value);
        }
        serde_json::Value::Object(object)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.to_value())
            .map_err(|e| QuarryError::Query(format!("cannot render model as JSON: {}", e)))
    }
}

impl Serialize for Model {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_value().to_string())
    }
}

impl<'a> IntoIterator for &'a Model {
    type Item = (&'a String, &'a SqlValue);
    type IntoIter = indexmap::map::Iter<'a, String, SqlValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.attributes.iter()
    }
}
