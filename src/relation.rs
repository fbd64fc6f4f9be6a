//! Relationship declarations and their resolution.
//!
//! Each relation is resolved with its own query keyed on an attribute of the
//! owning model. Eager loading issues one query per declared relation.

use std::future::Future;
use std::pin::Pin;

use crate::error::{QuarryError, Result};
use crate::model::{Model, Schema};
use crate::traits::Entity;
use crate::types::Collection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    HasMany,
    BelongsTo,
    HasOne,
}

/// A declared association to another entity.
#[derive(Debug, Clone)]
pub struct RelationDef {
    pub kind: RelationKind,
    target: fn() -> Schema,
    foreign_key: Option<String>,
    local_key: Option<String>,
}

impl RelationDef {
    pub fn new(kind: RelationKind, target: fn() -> Schema) -> Self {
        Self {
            kind,
            target,
            foreign_key: None,
            local_key: None,
        }
    }

    pub fn has_many<E: Entity>() -> Self {
        Self::new(RelationKind::HasMany, E::schema)
    }

    pub fn belongs_to<E: Entity>() -> Self {
        Self::new(RelationKind::BelongsTo, E::schema)
    }

    pub fn has_one<E: Entity>() -> Self {
        Self::new(RelationKind::HasOne, E::schema)
    }

    /// Column of the related table to match on.
    pub fn foreign_key(mut self, key: &str) -> Self {
        self.foreign_key = Some(key.to_string());
        self
    }

    /// Attribute of the owning model whose value is matched. Defaults to the
    /// foreign key.
    pub fn local_key(mut self, key: &str) -> Self {
        self.local_key = Some(key.to_string());
        self
    }

    pub fn target(&self) -> Schema {
        (self.target)()
    }
}

/// A resolved relation.
#[derive(Debug, Clone)]
pub enum Relation {
    One(Box<Model>),
    Many(Collection<Model>),
}

impl Relation {
    pub fn as_one(&self) -> Option<&Model> {
        match self {
            Relation::One(model) => Some(model),
            Relation::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> Option<&Collection<Model>> {
        match self {
            Relation::Many(models) => Some(models),
            Relation::One(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Relation::One(model) if model.is_empty() => 0,
            Relation::One(_) => 1,
            Relation::Many(models) => models.count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Model {
    /// Load every related row of `E` whose foreign key matches this model.
    /// Stored under the related table name.
    pub async fn has_many<E: Entity>(
        &mut self,
        foreign_key: Option<&str>,
        local_key: Option<&str>,
    ) -> Result<&mut Self> {
        let def = with_keys(RelationDef::has_many::<E>(), foreign_key, local_key);
        self.resolve(&def).await?;
        Ok(self)
    }

    /// Load the `E` this model points at. Stored under the lowercased entity name.
    pub async fn belongs_to<E: Entity>(
        &mut self,
        foreign_key: Option<&str>,
        local_key: Option<&str>,
    ) -> Result<&mut Self> {
        let def = with_keys(RelationDef::belongs_to::<E>(), foreign_key, local_key);
        self.resolve(&def).await?;
        Ok(self)
    }

    /// Like [`belongs_to`](Model::belongs_to), but a relation that is already
    /// loaded is not queried again.
    pub async fn has_one<E: Entity>(
        &mut self,
        foreign_key: Option<&str>,
        local_key: Option<&str>,
    ) -> Result<&mut Self> {
        let def = with_keys(RelationDef::has_one::<E>(), foreign_key, local_key);
        self.resolve(&def).await?;
        Ok(self)
    }

    /// Resolve one declared relation and store it on this model.
    pub async fn resolve(&mut self, def: &RelationDef) -> Result<()> {
        let target = def.target();
        let name = match def.kind {
            RelationKind::HasMany => target.table.clone(),
            RelationKind::BelongsTo | RelationKind::HasOne => target.relation_name(),
        };
        if def.kind == RelationKind::HasOne && self.relation(&name).is_some() {
            return Ok(());
        }

        let foreign_key = match (&def.foreign_key, def.kind) {
            (Some(key), _) => key.clone(),
            (None, RelationKind::HasMany) => self.primary_key().to_string(),
            (None, _) => target.primary_key.clone(),
        };
        let local_key = def.local_key.clone().unwrap_or_else(|| foreign_key.clone());
        let value = self.get(&local_key).cloned().ok_or_else(|| {
            QuarryError::InvalidArgument(format!(
                "`{}` has no attribute `{}` to resolve relation `{}`",
                self.name(),
                local_key,
                name
            ))
        })?;

        tracing::debug!(relation = %name, key = %foreign_key, "resolving relation");
        let related = Model::from_schema(target, self.connection().clone());
        let fetched = related
            .query()
            .without_eager_loading()
            .select(&["*"])
            .where_(&foreign_key, "=", value)
            .get()
            .await?;

        let relation = match def.kind {
            // `query()` binds a model, so rows always hydrate.
            RelationKind::HasMany => {
                Relation::Many(fetched.into_models().unwrap_or_default())
            }
            RelationKind::BelongsTo | RelationKind::HasOne => {
                let one = fetched
                    .into_models()
                    .and_then(Collection::into_first)
                    .unwrap_or_else(|| related.clone_instance(Default::default()));
                Relation::One(Box::new(one))
            }
        };
        self.set_relation(&name, relation);
        Ok(())
    }

    /// Resolve every declared relation: belongs-to first, then has-many,
    /// then has-one.
    pub fn load_all_relations(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut defs = self.relation_defs().to_vec();
            defs.sort_by_key(|def| match def.kind {
                RelationKind::BelongsTo => 0,
                RelationKind::HasMany => 1,
                RelationKind::HasOne => 2,
            });
            for def in &defs {
                self.resolve(def).await?;
            }
            Ok(())
        })
    }
}

fn with_keys(mut def: RelationDef, foreign_key: Option<&str>, local_key: Option<&str>) -> RelationDef {
    if let Some(key) = foreign_key {
        def = def.foreign_key(key);
    }
    if let Some(key) = local_key {
        def = def.local_key(key);
    }
    def
}
