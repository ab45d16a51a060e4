//! Table and column alias allocation per query space.
//!
//! Every query space joined into a statement gets a table alias built from a
//! short name prefix and a statement-wide counter (`order0_`, `customer1_`),
//! plus a column suffix that keeps identically named columns of different
//! tables apart in the SELECT list (`id_0_`, `id_1_`, `order_id_0__`).
//! Allocation happens in join traversal order, so a given plan always yields
//! the same aliases.

use std::collections::HashMap;

use loadplan_core::error::MappingErrorKind;
use loadplan_core::{CollectionPersister, EntityPersister, Error, Result, column_alias};

use crate::plan::QuerySpaceUid;

const MAX_ALIAS_PREFIX: usize = 10;

/// Result-set labels for one entity's columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityAliases {
    suffix: String,
    identifier_aliases: Vec<String>,
    property_aliases: Vec<(String, Vec<String>)>,
    discriminator_alias: Option<String>,
    version_alias: Option<String>,
}

impl EntityAliases {
    pub fn new(persister: &dyn EntityPersister, suffix: &str) -> Self {
        let labels = |columns: &[String]| -> Vec<String> {
            columns.iter().map(|c| column_alias(c, suffix)).collect()
        };
        let property_aliases = persister
            .properties()
            .iter()
            .chain(persister.identifier_properties())
            .filter(|p| !p.columns.is_empty())
            .map(|p| (p.name.clone(), labels(&p.columns)))
            .collect();
        Self {
            suffix: suffix.to_string(),
            identifier_aliases: labels(persister.identifier_columns()),
            property_aliases,
            discriminator_alias: persister
                .discriminator_column()
                .map(|c| column_alias(c, suffix)),
            version_alias: persister.version_column().map(|c| column_alias(c, suffix)),
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn identifier_aliases(&self) -> &[String] {
        &self.identifier_aliases
    }

    pub fn property_aliases(&self, property: &str) -> Option<&[String]> {
        self.property_aliases
            .iter()
            .find(|(name, _)| name == property)
            .map(|(_, labels)| labels.as_slice())
    }

    pub fn discriminator_alias(&self) -> Option<&str> {
        self.discriminator_alias.as_deref()
    }

    pub fn version_alias(&self) -> Option<&str> {
        self.version_alias.as_deref()
    }
}

/// Table alias plus column labels for an entity query space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityReferenceAliases {
    pub table_alias: String,
    pub column_aliases: EntityAliases,
}

/// Result-set labels for one collection's columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionAliases {
    suffix: String,
    key_aliases: Vec<String>,
    index_aliases: Vec<String>,
    element_aliases: Vec<String>,
}

impl CollectionAliases {
    pub fn new(persister: &dyn CollectionPersister, suffix: &str) -> Self {
        let labels = |columns: &[String]| -> Vec<String> {
            columns.iter().map(|c| column_alias(c, suffix)).collect()
        };
        Self {
            suffix: suffix.to_string(),
            key_aliases: labels(persister.key_columns()),
            index_aliases: labels(persister.index_columns()),
            element_aliases: labels(persister.element_columns()),
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn key_aliases(&self) -> &[String] {
        &self.key_aliases
    }

    pub fn index_aliases(&self) -> &[String] {
        &self.index_aliases
    }

    pub fn element_aliases(&self) -> &[String] {
        &self.element_aliases
    }
}

/// Aliases for a collection query space.
///
/// For a many-to-many, `element_table_alias` names the element entity's
/// table joined through the link table. For a one-to-many the collection
/// table is the element table, so the element aliases share
/// `collection_table_alias`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionReferenceAliases {
    pub collection_table_alias: String,
    pub element_table_alias: Option<String>,
    pub collection_aliases: CollectionAliases,
    pub entity_element_aliases: Option<EntityReferenceAliases>,
}

/// Element graph of a collection, used when generating its aliases.
#[derive(Debug, Clone, Copy)]
pub struct ElementGraph<'a> {
    pub uid: &'a QuerySpaceUid,
    pub persister: &'a dyn EntityPersister,
}

/// Alias registry for one generated statement.
#[derive(Debug, Default, Clone)]
pub struct AliasResolutionContext {
    entity_aliases: HashMap<QuerySpaceUid, EntityReferenceAliases>,
    collection_aliases: HashMap<QuerySpaceUid, CollectionReferenceAliases>,
    table_alias_counter: usize,
    entity_suffix_counter: usize,
    collection_suffix_counter: usize,
}

impl AliasResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate aliases for an entity query space.
    ///
    /// Fails when the space already has aliases.
    #[allow(clippy::result_large_err)]
    pub fn generate_entity_reference_aliases(
        &mut self,
        uid: &QuerySpaceUid,
        persister: &dyn EntityPersister,
    ) -> Result<EntityReferenceAliases> {
        self.ensure_unregistered(uid)?;
        let aliases = self.create_entity_reference_aliases(persister);
        tracing::trace!(
            uid = %uid,
            table_alias = %aliases.table_alias,
            suffix = %aliases.column_aliases.suffix(),
            "generated entity aliases"
        );
        self.entity_aliases.insert(uid.clone(), aliases.clone());
        Ok(aliases)
    }

    /// Allocate aliases for a collection query space, and for its element
    /// entity when there is one.
    #[allow(clippy::result_large_err)]
    pub fn generate_collection_reference_aliases(
        &mut self,
        uid: &QuerySpaceUid,
        persister: &dyn CollectionPersister,
        element: Option<ElementGraph<'_>>,
    ) -> Result<CollectionReferenceAliases> {
        self.ensure_unregistered(uid)?;
        if let Some(graph) = element {
            self.ensure_unregistered(graph.uid)?;
        }

        let role_name = persister.role();
        let (collection_table_alias, element_table_alias) = if persister.is_many_to_many() {
            let element_name = element
                .map(|g| g.persister.entity_name())
                .or_else(|| persister.element_kind().entity_name())
                .unwrap_or(role_name);
            let element_alias = self.create_table_alias(element_name);
            (self.create_table_alias(role_name), Some(element_alias))
        } else {
            (self.create_table_alias(role_name), None)
        };

        let collection_suffix = format!("{}__", self.collection_suffix_counter);
        self.collection_suffix_counter += 1;

        let entity_element_aliases = element.map(|graph| {
            let table_alias = element_table_alias
                .clone()
                .unwrap_or_else(|| collection_table_alias.clone());
            let suffix = self.next_entity_suffix();
            EntityReferenceAliases {
                table_alias,
                column_aliases: EntityAliases::new(graph.persister, &suffix),
            }
        });

        if let (Some(graph), Some(element_aliases)) = (element, &entity_element_aliases) {
            self.register_query_space_aliases(graph.uid, element_aliases.clone())?;
        }

        let aliases = CollectionReferenceAliases {
            collection_table_alias,
            element_table_alias,
            collection_aliases: CollectionAliases::new(persister, &collection_suffix),
            entity_element_aliases,
        };
        tracing::trace!(
            uid = %uid,
            table_alias = %aliases.collection_table_alias,
            suffix = %collection_suffix,
            "generated collection aliases"
        );
        self.collection_aliases.insert(uid.clone(), aliases.clone());
        Ok(aliases)
    }

    /// Register aliases that were allocated elsewhere for an entity space,
    /// e.g. a collection element reusing its collection's table alias.
    #[allow(clippy::result_large_err)]
    pub fn register_query_space_aliases(
        &mut self,
        uid: &QuerySpaceUid,
        aliases: EntityReferenceAliases,
    ) -> Result<()> {
        self.ensure_unregistered(uid)?;
        self.entity_aliases.insert(uid.clone(), aliases);
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    pub fn resolve_entity_reference_aliases(
        &self,
        uid: &QuerySpaceUid,
    ) -> Result<&EntityReferenceAliases> {
        self.entity_aliases
            .get(uid)
            .ok_or_else(|| unregistered(uid, "entity"))
    }

    #[allow(clippy::result_large_err)]
    pub fn resolve_collection_reference_aliases(
        &self,
        uid: &QuerySpaceUid,
    ) -> Result<&CollectionReferenceAliases> {
        self.collection_aliases
            .get(uid)
            .ok_or_else(|| unregistered(uid, "collection"))
    }

    /// Table alias of any registered space. For a collection this is the
    /// collection table's alias.
    #[allow(clippy::result_large_err)]
    pub fn resolve_sql_table_alias(&self, uid: &QuerySpaceUid) -> Result<&str> {
        if let Some(aliases) = self.entity_aliases.get(uid) {
            return Ok(&aliases.table_alias);
        }
        self.collection_aliases
            .get(uid)
            .map(|a| a.collection_table_alias.as_str())
            .ok_or_else(|| unregistered(uid, "query space"))
    }

    pub fn is_registered(&self, uid: &QuerySpaceUid) -> bool {
        self.entity_aliases.contains_key(uid) || self.collection_aliases.contains_key(uid)
    }

    /// Every distinct table alias allocated so far.
    pub fn table_aliases(&self) -> Vec<&str> {
        let mut aliases: Vec<&str> = self
            .entity_aliases
            .values()
            .map(|a| a.table_alias.as_str())
            .chain(self.collection_aliases.values().flat_map(|a| {
                std::iter::once(a.collection_table_alias.as_str())
                    .chain(a.element_table_alias.as_deref())
            }))
            .collect();
        aliases.sort_unstable();
        aliases.dedup();
        aliases
    }

    fn create_entity_reference_aliases(
        &mut self,
        persister: &dyn EntityPersister,
    ) -> EntityReferenceAliases {
        let table_alias = self.create_table_alias(persister.entity_name());
        let suffix = self.next_entity_suffix();
        EntityReferenceAliases {
            table_alias,
            column_aliases: EntityAliases::new(persister, &suffix),
        }
    }

    fn next_entity_suffix(&mut self) -> String {
        let suffix = format!("{}_", self.entity_suffix_counter);
        self.entity_suffix_counter += 1;
        suffix
    }

    fn create_table_alias(&mut self, description: &str) -> String {
        let alias = format!("{}{}_", alias_prefix(description), self.table_alias_counter);
        self.table_alias_counter += 1;
        alias
    }

    #[allow(clippy::result_large_err)]
    fn ensure_unregistered(&self, uid: &QuerySpaceUid) -> Result<()> {
        if self.is_registered(uid) {
            Err(Error::mapping(
                MappingErrorKind::InvalidLoadPlan,
                format!("aliases for query space {} were already generated", uid),
            ))
        } else {
            Ok(())
        }
    }
}

/// Lowercased, unqualified, alphanumeric prefix of at most ten characters.
fn alias_prefix(description: &str) -> String {
    let unqualified = description.rsplit(['.', ':']).next().unwrap_or(description);
    let mut prefix: String = unqualified
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .map(|c| c.to_ascii_lowercase())
        .take(MAX_ALIAS_PREFIX)
        .collect();
    if !prefix.starts_with(|c: char| c.is_ascii_alphabetic()) {
        prefix.insert(0, 'x');
    }
    prefix
}

fn unregistered(uid: &QuerySpaceUid, what: &str) -> Error {
    Error::mapping(
        MappingErrorKind::UnregisteredQuerySpace,
        format!("no {} aliases generated for query space {}", what, uid),
    )
}
