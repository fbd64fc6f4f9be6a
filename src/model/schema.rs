use crate::relation::RelationDef;

/// Table mapping of a model: where its rows live and how it relates to
/// other models.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub name: String,
    pub table: String,
    pub primary_key: String,
    pub fillable: Vec<String>,
    pub relations: Vec<RelationDef>,
    pub eager_load: bool,
}

impl Schema {
    /// A schema whose table and primary key are derived from `name`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            table: pluralize(name),
            primary_key: default_primary_key(name),
            ..Self::default()
        }
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    pub fn primary_key(mut self, key: &str) -> Self {
        self.primary_key = key.to_string();
        self
    }

    pub fn fillable(mut self, columns: &[&str]) -> Self {
        self.fillable = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn eager_load(mut self, eager: bool) -> Self {
        self.eager_load = eager;
        self
    }

    /// Lowercased entity name, used as the key of single-valued relations.
    pub fn relation_name(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Table name for an entity name, following Portuguese plural rules:
/// `ão`/`ao` become `ões`/`oes`, a final vowel takes `s`, a final `l`
/// becomes `is`, anything else takes `es`.
pub fn pluralize(name: &str) -> String {
    let name = name.to_lowercase();
    if let Some(stem) = name.strip_suffix("ão") {
        return format!("{}ões", stem);
    }
    if let Some(stem) = name.strip_suffix("ao") {
        return format!("{}oes", stem);
    }
    match name.chars().last() {
        Some('a' | 'e' | 'i' | 'o' | 'u') => format!("{}s", name),
        Some('l') => format!("{}is", &name[..name.len() - 1]),
        _ => format!("{}es", name),
    }
}

pub fn default_primary_key(name: &str) -> String {
    format!("{}_id", name.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pluralize_rules() {
        assert_eq!(pluralize("Pedido"), "pedidos");
        assert_eq!(pluralize("Casa"), "casas");
        assert_eq!(pluralize("Cliente"), "clientes");
        assert_eq!(pluralize("Produto"), "produtos");
        assert_eq!(pluralize("Cartão"), "cartões");
        assert_eq!(pluralize("Cartao"), "cartoes");
        assert_eq!(pluralize("Animal"), "animais");
        assert_eq!(pluralize("Customer"), "customeres");
    }

    #[test]
    fn test_default_primary_key() {
        assert_eq!(default_primary_key("Customer"), "customer_id");
    }

    #[test]
    fn test_schema_overrides() {
        let schema = Schema::new("Order").table("orders").primary_key("id");
        assert_eq!(schema.table, "orders");
        assert_eq!(schema.primary_key, "id");
        assert_eq!(schema.relation_name(), "order");
    }
}
