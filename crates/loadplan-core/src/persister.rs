//! Persister metadata: the mapping collaborator load queries are built from.
//!
//! An [`EntityPersister`] describes one entity table, a [`CollectionPersister`]
//! one collection role. Both render their own SQL fragments against an alias
//! chosen by the caller; load-query construction treats those fragments as
//! opaque text. [`EntityMapping`] and [`CollectionMapping`] are the stock
//! implementations, and [`Metamodel`] resolves names and roles to persisters.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::error::{Error, MappingErrorKind};
use crate::template::SqlTemplate;
use crate::value::Value;

/// Build the result-set label for a column rendered with a suffix.
pub fn column_alias(column: &str, suffix: &str) -> String {
    format!("{column}_{suffix}")
}

/// Render `alias.col as col_suffix` items, skipping repeated columns.
pub fn render_select_columns<'a>(
    alias: &str,
    suffix: &str,
    columns: impl IntoIterator<Item = &'a String>,
) -> String {
    let mut seen = BTreeSet::new();
    columns
        .into_iter()
        .filter(|c| seen.insert(c.as_str()))
        .map(|c| format!("{}.{} as {}", alias, c, column_alias(c, suffix)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Filters enabled for the current load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryInfluencers {
    pub enabled_filters: BTreeSet<String>,
}

impl QueryInfluencers {
    #[must_use]
    pub fn enable_filter(mut self, name: impl Into<String>) -> Self {
        self.enabled_filters.insert(name.into());
        self
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled_filters.contains(name)
    }
}

fn render_filters(
    filters: &[(String, SqlTemplate)],
    alias: &str,
    influencers: &QueryInfluencers,
) -> String {
    filters
        .iter()
        .filter(|(name, _)| influencers.is_enabled(name))
        .map(|(_, template)| template.render(alias))
        .collect::<Vec<_>>()
        .join(" and ")
}

// ============================================================================
// Properties
// ============================================================================

/// What kind of value a mapped property holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKind {
    /// A column value copied onto the entity as is.
    Basic,
    /// Foreign key columns on this table pointing at another entity's id.
    ManyToOne {
        entity_name: String,
        /// Unique foreign key (logical one-to-one).
        one_to_one: bool,
    },
    /// Association owned by the other side.
    ///
    /// `foreign_key_columns` are the target's columns referencing this
    /// entity's identifier; empty means the two share a primary key.
    OneToOne {
        entity_name: String,
        foreign_key_columns: Vec<String>,
    },
    /// A collection identified by its role.
    Collection { role: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyMapping {
    pub name: String,
    pub columns: Vec<String>,
    pub kind: PropertyKind,
}

impl PropertyMapping {
    pub fn basic(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: vec![column.into()],
            kind: PropertyKind::Basic,
        }
    }

    pub fn many_to_one(
        name: impl Into<String>,
        columns: Vec<String>,
        entity_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            kind: PropertyKind::ManyToOne {
                entity_name: entity_name.into(),
                one_to_one: false,
            },
        }
    }

    /// Name of the associated entity, for entity-valued properties.
    pub fn associated_entity(&self) -> Option<&str> {
        match &self.kind {
            PropertyKind::ManyToOne { entity_name, .. }
            | PropertyKind::OneToOne { entity_name, .. } => Some(entity_name),
            _ => None,
        }
    }

    pub fn collection_role(&self) -> Option<&str> {
        match &self.kind {
            PropertyKind::Collection { role } => Some(role),
            _ => None,
        }
    }

    /// Whether this property's value is read from the entity's own columns.
    pub fn is_column_backed(&self) -> bool {
        matches!(
            self.kind,
            PropertyKind::Basic | PropertyKind::ManyToOne { .. }
        ) && !self.columns.is_empty()
    }
}

// ============================================================================
// Entity persister
// ============================================================================

/// Mapping metadata for one entity type.
pub trait EntityPersister: Send + Sync + fmt::Debug {
    fn entity_name(&self) -> &str;

    fn table_name(&self) -> &str;

    fn identifier_columns(&self) -> &[String];

    /// Many-to-one components of a composite identifier.
    fn identifier_properties(&self) -> &[PropertyMapping];

    fn properties(&self) -> &[PropertyMapping];

    fn property(&self, name: &str) -> Option<&PropertyMapping> {
        self.properties()
            .iter()
            .chain(self.identifier_properties())
            .find(|p| p.name == name)
    }

    fn discriminator_column(&self) -> Option<&str> {
        None
    }

    /// Entity name of the concrete subclass a discriminator value selects.
    fn subclass_for_discriminator(&self, _value: &Value) -> Option<&str> {
        None
    }

    /// Name of the property holding the optimistic version.
    fn version_property(&self) -> Option<&str> {
        None
    }

    fn version_column(&self) -> Option<&str> {
        let name = self.version_property()?;
        self.property(name)
            .and_then(|p| p.columns.first())
            .map(String::as_str)
    }

    /// Mapping-level restriction always applied to this table.
    fn where_template(&self) -> Option<&SqlTemplate> {
        None
    }

    /// Named filters that apply when enabled on the load.
    fn filters(&self) -> &[(String, SqlTemplate)] {
        &[]
    }

    /// Every column a row of this entity is read from, identifier first.
    fn selected_columns(&self) -> Vec<&String> {
        let mut columns: Vec<&String> = self.identifier_columns().iter().collect();
        for p in self.properties() {
            if p.is_column_backed() {
                columns.extend(p.columns.iter());
            }
        }
        columns
    }

    fn select_fragment(&self, alias: &str, suffix: &str) -> String {
        let discriminator = self.discriminator_column().map(str::to_string);
        let mut columns = self.selected_columns();
        if let Some(d) = &discriminator {
            columns.push(d);
        }
        render_select_columns(alias, suffix, columns)
    }

    fn from_table_fragment(&self, alias: &str) -> String {
        format!("{} {}", self.table_name(), alias)
    }

    /// Extra joins for subclass/secondary tables. Single-table mappings
    /// have none.
    fn from_join_fragment(&self, _alias: &str, _inner_join: bool) -> String {
        String::new()
    }

    fn where_join_fragment(&self, _alias: &str, _inner_join: bool) -> String {
        String::new()
    }

    fn filter_fragment(&self, alias: &str, influencers: &QueryInfluencers) -> String {
        render_filters(self.filters(), alias, influencers)
    }

    fn where_fragment(&self, alias: &str) -> Option<String> {
        self.where_template().map(|t| t.render(alias))
    }
}

/// Discriminator column plus the subclass each value selects.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscriminatorMapping {
    pub column: String,
    pub subclasses: Vec<(Value, String)>,
}

/// Stock [`EntityPersister`] built fluently.
#[derive(Debug, Clone)]
pub struct EntityMapping {
    entity_name: String,
    table_name: String,
    identifier_columns: Vec<String>,
    identifier_properties: Vec<PropertyMapping>,
    properties: Vec<PropertyMapping>,
    discriminator: Option<DiscriminatorMapping>,
    version_property: Option<String>,
    where_clause: Option<SqlTemplate>,
    filters: Vec<(String, SqlTemplate)>,
}

impl EntityMapping {
    pub fn new(entity_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            table_name: table_name.into(),
            identifier_columns: Vec::new(),
            identifier_properties: Vec::new(),
            properties: Vec::new(),
            discriminator: None,
            version_property: None,
            where_clause: None,
            filters: Vec::new(),
        }
    }

    /// Add an identifier column. Call repeatedly for composite keys.
    #[must_use]
    pub fn id(mut self, column: impl Into<String>) -> Self {
        self.identifier_columns.push(column.into());
        self
    }

    /// Declare a many-to-one component of a composite identifier.
    ///
    /// Its columns must already be identifier columns.
    #[must_use]
    pub fn key_many_to_one(
        mut self,
        name: impl Into<String>,
        columns: &[&str],
        entity_name: impl Into<String>,
    ) -> Self {
        self.identifier_properties.push(PropertyMapping::many_to_one(
            name,
            columns.iter().map(|c| (*c).to_string()).collect(),
            entity_name,
        ));
        self
    }

    #[must_use]
    pub fn property(mut self, name: impl Into<String>, column: impl Into<String>) -> Self {
        self.properties.push(PropertyMapping::basic(name, column));
        self
    }

    #[must_use]
    pub fn many_to_one(
        mut self,
        name: impl Into<String>,
        column: impl Into<String>,
        entity_name: impl Into<String>,
    ) -> Self {
        self.properties.push(PropertyMapping::many_to_one(
            name,
            vec![column.into()],
            entity_name,
        ));
        self
    }

    /// Unique foreign key to another entity.
    #[must_use]
    pub fn unique_many_to_one(
        mut self,
        name: impl Into<String>,
        column: impl Into<String>,
        entity_name: impl Into<String>,
    ) -> Self {
        self.properties.push(PropertyMapping {
            name: name.into(),
            columns: vec![column.into()],
            kind: PropertyKind::ManyToOne {
                entity_name: entity_name.into(),
                one_to_one: true,
            },
        });
        self
    }

    /// One-to-one owned by the other side through `foreign_key_columns`.
    #[must_use]
    pub fn one_to_one(
        mut self,
        name: impl Into<String>,
        entity_name: impl Into<String>,
        foreign_key_columns: &[&str],
    ) -> Self {
        self.properties.push(PropertyMapping {
            name: name.into(),
            columns: Vec::new(),
            kind: PropertyKind::OneToOne {
                entity_name: entity_name.into(),
                foreign_key_columns: foreign_key_columns
                    .iter()
                    .map(|c| (*c).to_string())
                    .collect(),
            },
        });
        self
    }

    #[must_use]
    pub fn collection(mut self, name: impl Into<String>, role: impl Into<String>) -> Self {
        self.properties.push(PropertyMapping {
            name: name.into(),
            columns: Vec::new(),
            kind: PropertyKind::Collection { role: role.into() },
        });
        self
    }

    #[must_use]
    pub fn discriminator(mut self, column: impl Into<String>) -> Self {
        self.discriminator = Some(DiscriminatorMapping {
            column: column.into(),
            subclasses: Vec::new(),
        });
        self
    }

    /// Map a discriminator value to a subclass entity name.
    #[must_use]
    pub fn subclass(mut self, value: impl Into<Value>, entity_name: impl Into<String>) -> Self {
        let value = value.into();
        let entity_name = entity_name.into();
        if let Some(d) = self.discriminator.as_mut() {
            d.subclasses.push((value, entity_name));
        }
        self
    }

    /// Optimistic version, stored as a basic property.
    #[must_use]
    pub fn version(mut self, name: impl Into<String>, column: impl Into<String>) -> Self {
        let name = name.into();
        self.properties.push(PropertyMapping::basic(name.clone(), column));
        self.version_property = Some(name);
        self
    }

    #[allow(clippy::result_large_err)]
    pub fn where_clause(mut self, template: &str) -> Result<Self> {
        self.where_clause = Some(SqlTemplate::parse(template)?);
        Ok(self)
    }

    #[allow(clippy::result_large_err)]
    pub fn filter(mut self, name: impl Into<String>, template: &str) -> Result<Self> {
        self.filters.push((name.into(), SqlTemplate::parse(template)?));
        Ok(self)
    }
}

impl EntityPersister for EntityMapping {
    fn entity_name(&self) -> &str {
        &self.entity_name
    }

    fn table_name(&self) -> &str {
        &self.table_name
    }

    fn identifier_columns(&self) -> &[String] {
        &self.identifier_columns
    }

    fn identifier_properties(&self) -> &[PropertyMapping] {
        &self.identifier_properties
    }

    fn properties(&self) -> &[PropertyMapping] {
        &self.properties
    }

    fn discriminator_column(&self) -> Option<&str> {
        self.discriminator.as_ref().map(|d| d.column.as_str())
    }

    fn subclass_for_discriminator(&self, value: &Value) -> Option<&str> {
        let d = self.discriminator.as_ref()?;
        d.subclasses
            .iter()
            .find(|(v, _)| v == value)
            .map(|(_, name)| name.as_str())
    }

    fn version_property(&self) -> Option<&str> {
        self.version_property.as_deref()
    }

    fn where_template(&self) -> Option<&SqlTemplate> {
        self.where_clause.as_ref()
    }

    fn filters(&self) -> &[(String, SqlTemplate)] {
        &self.filters
    }
}

// ============================================================================
// Collection persister
// ============================================================================

/// How a collection stores its elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionNature {
    Bag,
    Set,
    List,
    Map,
    Array,
}

impl CollectionNature {
    pub const fn is_indexed(self) -> bool {
        matches!(
            self,
            CollectionNature::List | CollectionNature::Map | CollectionNature::Array
        )
    }
}

/// What the elements of a collection are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementKind {
    /// Values stored in the collection table.
    Basic,
    /// Entities whose table holds the owner's foreign key.
    OneToMany { entity_name: String },
    /// Entities reached through a link table.
    ManyToMany { entity_name: String },
}

impl ElementKind {
    pub fn entity_name(&self) -> Option<&str> {
        match self {
            ElementKind::Basic => None,
            ElementKind::OneToMany { entity_name } | ElementKind::ManyToMany { entity_name } => {
                Some(entity_name)
            }
        }
    }
}

/// Mapping metadata for one collection role.
pub trait CollectionPersister: Send + Sync + fmt::Debug {
    fn role(&self) -> &str;

    fn owner_entity_name(&self) -> &str;

    /// Collection table. For one-to-many this is the element's table.
    fn table_name(&self) -> &str;

    /// Columns referencing the owner's identifier.
    fn key_columns(&self) -> &[String];

    /// List position or map key columns; empty when not indexed.
    fn index_columns(&self) -> &[String];

    /// Basic value column(s), or the element foreign key for many-to-many.
    /// For one-to-many these are the element's identifier columns.
    fn element_columns(&self) -> &[String];

    fn nature(&self) -> CollectionNature;

    fn element_kind(&self) -> &ElementKind;

    /// Entity name when the map key is itself an entity.
    fn index_entity_name(&self) -> Option<&str> {
        None
    }

    fn order_by(&self) -> Option<&SqlTemplate> {
        None
    }

    /// Ordering over the element entity of a many-to-many.
    fn many_to_many_order_by(&self) -> Option<&SqlTemplate> {
        None
    }

    fn filters(&self) -> &[(String, SqlTemplate)] {
        &[]
    }

    fn many_to_many_filters(&self) -> &[(String, SqlTemplate)] {
        &[]
    }

    fn where_template(&self) -> Option<&SqlTemplate> {
        None
    }

    fn is_one_to_many(&self) -> bool {
        matches!(self.element_kind(), ElementKind::OneToMany { .. })
    }

    fn is_many_to_many(&self) -> bool {
        matches!(self.element_kind(), ElementKind::ManyToMany { .. })
    }

    fn select_fragment(&self, alias: &str, suffix: &str) -> String {
        render_select_columns(
            alias,
            suffix,
            self.key_columns()
                .iter()
                .chain(self.index_columns())
                .chain(self.element_columns()),
        )
    }

    /// Collection columns rendered on the element table's alias.
    ///
    /// Combined with the element entity's own select fragment under the
    /// same alias, this reads owner key and element in one pass.
    fn one_to_many_select_fragment(&self, alias: &str, suffix: &str) -> String {
        self.select_fragment(alias, suffix)
    }

    fn filter_fragment(&self, alias: &str, influencers: &QueryInfluencers) -> String {
        render_filters(self.filters(), alias, influencers)
    }

    fn many_to_many_filter_fragment(&self, alias: &str, influencers: &QueryInfluencers) -> String {
        render_filters(self.many_to_many_filters(), alias, influencers)
    }

    fn where_fragment(&self, alias: &str) -> Option<String> {
        self.where_template().map(|t| t.render(alias))
    }

    fn order_by_fragment(&self, alias: &str) -> Option<String> {
        self.order_by().map(|t| t.render(alias))
    }

    fn many_to_many_order_by_fragment(&self, alias: &str) -> Option<String> {
        self.many_to_many_order_by().map(|t| t.render(alias))
    }
}

/// Stock [`CollectionPersister`] built fluently.
#[derive(Debug, Clone)]
pub struct CollectionMapping {
    role: String,
    owner_entity_name: String,
    table_name: String,
    key_columns: Vec<String>,
    index_columns: Vec<String>,
    element_columns: Vec<String>,
    nature: CollectionNature,
    element_kind: ElementKind,
    index_entity_name: Option<String>,
    order_by: Option<SqlTemplate>,
    many_to_many_order_by: Option<SqlTemplate>,
    filters: Vec<(String, SqlTemplate)>,
    many_to_many_filters: Vec<(String, SqlTemplate)>,
    where_clause: Option<SqlTemplate>,
}

impl CollectionMapping {
    /// Collection of basic values stored in `table_name`.
    pub fn basic(
        role: impl Into<String>,
        owner_entity_name: impl Into<String>,
        table_name: impl Into<String>,
        nature: CollectionNature,
    ) -> Self {
        Self {
            role: role.into(),
            owner_entity_name: owner_entity_name.into(),
            table_name: table_name.into(),
            key_columns: Vec::new(),
            index_columns: Vec::new(),
            element_columns: Vec::new(),
            nature,
            element_kind: ElementKind::Basic,
            index_entity_name: None,
            order_by: None,
            many_to_many_order_by: None,
            filters: Vec::new(),
            many_to_many_filters: Vec::new(),
            where_clause: None,
        }
    }

    /// One-to-many over `element_entity`, whose table is `element_table`.
    pub fn one_to_many(
        role: impl Into<String>,
        owner_entity_name: impl Into<String>,
        element_entity: impl Into<String>,
        element_table: impl Into<String>,
        nature: CollectionNature,
    ) -> Self {
        let mut mapping = Self::basic(role, owner_entity_name, element_table, nature);
        mapping.element_kind = ElementKind::OneToMany {
            entity_name: element_entity.into(),
        };
        mapping
    }

    /// Many-to-many through `link_table`.
    pub fn many_to_many(
        role: impl Into<String>,
        owner_entity_name: impl Into<String>,
        element_entity: impl Into<String>,
        link_table: impl Into<String>,
        nature: CollectionNature,
    ) -> Self {
        let mut mapping = Self::basic(role, owner_entity_name, link_table, nature);
        mapping.element_kind = ElementKind::ManyToMany {
            entity_name: element_entity.into(),
        };
        mapping
    }

    #[must_use]
    pub fn key(mut self, column: impl Into<String>) -> Self {
        self.key_columns.push(column.into());
        self
    }

    #[must_use]
    pub fn index(mut self, column: impl Into<String>) -> Self {
        self.index_columns.push(column.into());
        self
    }

    #[must_use]
    pub fn element(mut self, column: impl Into<String>) -> Self {
        self.element_columns.push(column.into());
        self
    }

    /// Map keyed by an entity; `index` columns hold its identifier.
    #[must_use]
    pub fn index_entity(mut self, entity_name: impl Into<String>) -> Self {
        self.index_entity_name = Some(entity_name.into());
        self
    }

    #[allow(clippy::result_large_err)]
    pub fn ordered_by(mut self, template: &str) -> Result<Self> {
        self.order_by = Some(SqlTemplate::parse(template)?);
        Ok(self)
    }

    #[allow(clippy::result_large_err)]
    pub fn many_to_many_ordered_by(mut self, template: &str) -> Result<Self> {
        self.many_to_many_order_by = Some(SqlTemplate::parse(template)?);
        Ok(self)
    }

    #[allow(clippy::result_large_err)]
    pub fn filter(mut self, name: impl Into<String>, template: &str) -> Result<Self> {
        self.filters.push((name.into(), SqlTemplate::parse(template)?));
        Ok(self)
    }

    #[allow(clippy::result_large_err)]
    pub fn many_to_many_filter(mut self, name: impl Into<String>, template: &str) -> Result<Self> {
        self.many_to_many_filters
            .push((name.into(), SqlTemplate::parse(template)?));
        Ok(self)
    }

    #[allow(clippy::result_large_err)]
    pub fn where_clause(mut self, template: &str) -> Result<Self> {
        self.where_clause = Some(SqlTemplate::parse(template)?);
        Ok(self)
    }
}

impl CollectionPersister for CollectionMapping {
    fn role(&self) -> &str {
        &self.role
    }

    fn owner_entity_name(&self) -> &str {
        &self.owner_entity_name
    }

    fn table_name(&self) -> &str {
        &self.table_name
    }

    fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    fn index_columns(&self) -> &[String] {
        &self.index_columns
    }

    fn element_columns(&self) -> &[String] {
        &self.element_columns
    }

    fn nature(&self) -> CollectionNature {
        self.nature
    }

    fn element_kind(&self) -> &ElementKind {
        &self.element_kind
    }

    fn index_entity_name(&self) -> Option<&str> {
        self.index_entity_name.as_deref()
    }

    fn order_by(&self) -> Option<&SqlTemplate> {
        self.order_by.as_ref()
    }

    fn many_to_many_order_by(&self) -> Option<&SqlTemplate> {
        self.many_to_many_order_by.as_ref()
    }

    fn filters(&self) -> &[(String, SqlTemplate)] {
        &self.filters
    }

    fn many_to_many_filters(&self) -> &[(String, SqlTemplate)] {
        &self.many_to_many_filters
    }

    fn where_template(&self) -> Option<&SqlTemplate> {
        self.where_clause.as_ref()
    }
}

// ============================================================================
// Metamodel
// ============================================================================

/// Registry resolving entity names and collection roles to persisters.
#[derive(Debug, Default, Clone)]
pub struct Metamodel {
    entities: HashMap<String, Arc<dyn EntityPersister>>,
    collections: HashMap<String, Arc<dyn CollectionPersister>>,
}

impl Metamodel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity persister.
    ///
    /// Fails when the mapping has no identifier columns or a composite-key
    /// component names columns outside the identifier.
    #[allow(clippy::result_large_err)]
    pub fn add_entity(&mut self, persister: impl EntityPersister + 'static) -> Result<()> {
        if persister.identifier_columns().is_empty() {
            return Err(Error::mapping(
                MappingErrorKind::MissingColumns,
                format!("entity {} declares no identifier columns", persister.entity_name()),
            ));
        }
        for component in persister.identifier_properties() {
            let outside = component
                .columns
                .iter()
                .any(|c| !persister.identifier_columns().contains(c));
            if outside || component.columns.is_empty() {
                return Err(Error::mapping(
                    MappingErrorKind::MissingColumns,
                    format!(
                        "identifier component {}.{} must map identifier columns",
                        persister.entity_name(),
                        component.name
                    ),
                ));
            }
        }
        tracing::trace!(entity = %persister.entity_name(), "registered entity persister");
        self.entities
            .insert(persister.entity_name().to_string(), Arc::new(persister));
        Ok(())
    }

    /// Register a collection persister.
    ///
    /// Fails when key columns are missing, an indexed nature has no index
    /// columns, or non-one-to-many elements have no element columns.
    #[allow(clippy::result_large_err)]
    pub fn add_collection(&mut self, persister: impl CollectionPersister + 'static) -> Result<()> {
        let role = persister.role().to_string();
        let missing = |what: &str| {
            Error::mapping(
                MappingErrorKind::MissingColumns,
                format!("collection {} declares no {} columns", role, what),
            )
        };
        if persister.key_columns().is_empty() {
            return Err(missing("key"));
        }
        if persister.nature().is_indexed() && persister.index_columns().is_empty() {
            return Err(missing("index"));
        }
        if persister.element_columns().is_empty() && !persister.is_one_to_many() {
            return Err(missing("element"));
        }
        tracing::trace!(role = %role, "registered collection persister");
        self.collections.insert(role, Arc::new(persister));
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    pub fn entity(&self, entity_name: &str) -> Result<Arc<dyn EntityPersister>> {
        self.entities.get(entity_name).cloned().ok_or_else(|| {
            Error::mapping(
                MappingErrorKind::UnknownPersister,
                format!("unknown entity {}", entity_name),
            )
        })
    }

    #[allow(clippy::result_large_err)]
    pub fn collection(&self, role: &str) -> Result<Arc<dyn CollectionPersister>> {
        self.collections.get(role).cloned().ok_or_else(|| {
            Error::mapping(
                MappingErrorKind::UnknownPersister,
                format!("unknown collection role {}", role),
            )
        })
    }

    pub fn contains_entity(&self, entity_name: &str) -> bool {
        self.entities.contains_key(entity_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_mapping() -> EntityMapping {
        EntityMapping::new("Order", "orders")
            .id("id")
            .property("number", "order_number")
            .many_to_one("customer", "customer_id", "Customer")
            .collection("lineItems", "Order.lineItems")
            .version("version", "version")
    }

    // ==== Entity fragments ====

    #[test]
    fn test_entity_select_fragment() {
        let order = order_mapping();
        assert_eq!(
            order.select_fragment("orders0_", "0_"),
            "orders0_.id as id_0_, orders0_.order_number as order_number_0_, \
             orders0_.customer_id as customer_id_0_, orders0_.version as version_0_"
        );
        assert_eq!(order.from_table_fragment("orders0_"), "orders orders0_");
        assert_eq!(order.version_column(), Some("version"));
    }

    #[test]
    fn test_discriminator_column_selected_and_resolved() {
        let payment = EntityMapping::new("Payment", "payments")
            .id("id")
            .discriminator("kind")
            .subclass("CARD", "CardPayment")
            .subclass("CASH", "CashPayment");
        assert!(payment.select_fragment("p", "0_").ends_with("p.kind as kind_0_"));
        assert_eq!(
            payment.subclass_for_discriminator(&Value::from("CASH")),
            Some("CashPayment")
        );
        assert_eq!(payment.subclass_for_discriminator(&Value::from("X")), None);
    }

    #[test]
    fn test_filters_render_only_when_enabled() {
        let order = order_mapping()
            .filter("active", "{alias}.active = 1")
            .unwrap()
            .filter("region", "{alias}.region = 'EU'")
            .unwrap();
        let influencers = QueryInfluencers::default().enable_filter("region");
        assert_eq!(
            order.filter_fragment("o", &influencers),
            "o.region = 'EU'"
        );
        assert_eq!(order.filter_fragment("o", &QueryInfluencers::default()), "");
    }

    // ==== Collection fragments ====

    #[test]
    fn test_collection_select_fragment() {
        let tags = CollectionMapping::basic("Order.tags", "Order", "order_tags", CollectionNature::List)
            .key("order_id")
            .index("idx")
            .element("tag");
        assert_eq!(
            tags.select_fragment("tags1_", "1_"),
            "tags1_.order_id as order_id_1_, tags1_.idx as idx_1_, tags1_.tag as tag_1_"
        );
        assert!(!tags.is_one_to_many());
    }

    // ==== Metamodel ====

    #[test]
    fn test_metamodel_rejects_missing_identifier() {
        let mut model = Metamodel::new();
        let err = model
            .add_entity(EntityMapping::new("Broken", "broken"))
            .unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::MissingColumns));
    }

    #[test]
    fn test_metamodel_rejects_unindexed_list() {
        let mut model = Metamodel::new();
        let err = model
            .add_collection(
                CollectionMapping::basic("Order.tags", "Order", "order_tags", CollectionNature::List)
                    .key("order_id")
                    .element("tag"),
            )
            .unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::MissingColumns));
    }

    #[test]
    fn test_metamodel_lookup() {
        let mut model = Metamodel::new();
        model.add_entity(order_mapping()).unwrap();
        assert_eq!(model.entity("Order").unwrap().table_name(), "orders");
        assert_eq!(
            model.entity("Nope").unwrap_err().mapping_kind(),
            Some(MappingErrorKind::UnknownPersister)
        );
        assert!(model.collection("Order.lineItems").is_err());
    }
}
