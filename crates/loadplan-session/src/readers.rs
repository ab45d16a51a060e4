//! Readers that pull entity and collection state out of physical rows.
//!
//! One [`EntityReferenceInitializer`] exists per entity query space and one
//! [`CollectionReferenceInitializer`] per collection query space. All of them
//! see every row; the return readers then pick the logical row value.

use std::sync::Arc;

use loadplan_core::{
    CollectionKey, EntityKey, Error, LockMode, PropertyKind, Result, ResultSetError,
    ResultSetErrorKind, Row, Value, is_null_key,
};
use loadplan_query::{CollectionReaderSpec, EntityLink, EntityReaderSpec, ReaderPlan, ReferenceId};

use crate::context::{ForeignKey, HydratedEntity, ProcessingPhase, ResultSetProcessingContext};
use crate::identity_map::SessionContext;
use crate::instance::{CollectionRef, ElementValue, EntityData, EntityRef, read};
use crate::options::{OptionalEntity, ProcessingOptions};

/// Values of `labels`, as one value for a single column.
#[allow(clippy::result_large_err)]
fn read_value(row: &Row, labels: &[String]) -> Result<Value> {
    match labels {
        [label] => Ok(row.column(label)?.clone()),
        _ => Ok(Value::Array(row.columns(labels)?)),
    }
}

// ============================================================================
// Entity references
// ============================================================================

/// Reads one entity reference out of each row.
#[derive(Debug)]
pub struct EntityReferenceInitializer<'p> {
    spec: &'p EntityReaderSpec,
    fetched_collections: Vec<String>,
    optional: Option<&'p OptionalEntity>,
}

impl<'p> EntityReferenceInitializer<'p> {
    /// `optional` seeds the key of the return reference instead of its
    /// identifier columns. It is ignored for every other reference.
    pub fn new(
        spec: &'p EntityReaderSpec,
        plan: &'p ReaderPlan,
        optional: Option<&'p OptionalEntity>,
    ) -> Self {
        let fetched_collections = plan
            .collection_fetches_of(spec.reference)
            .filter_map(|c| c.owner.as_ref().map(|(_, property)| property.clone()))
            .collect();
        let optional = optional.filter(|_| spec.link == EntityLink::Return);
        Self {
            spec,
            fetched_collections,
            optional,
        }
    }

    pub fn reference(&self) -> ReferenceId {
        self.spec.reference
    }

    pub fn spec(&self) -> &EntityReaderSpec {
        self.spec
    }

    fn is_return(&self) -> bool {
        self.spec.link == EntityLink::Return
    }

    /// Read the identifier columns. A fully null identifier means the row
    /// holds no entity for this reference.
    #[allow(clippy::result_large_err)]
    pub fn hydrate_identifier(&self, row: &Row, ctx: &mut ResultSetProcessingContext) -> Result<()> {
        if ctx.phase(self.reference()) >= ProcessingPhase::Hydrated {
            return Ok(());
        }
        let identifier = match self.optional {
            Some(optional) => Some(optional.identifier.clone()),
            None => {
                let values = row.columns(self.spec.aliases.column_aliases.identifier_aliases())?;
                (!is_null_key(&values)).then_some(values)
            }
        };
        ctx.state_mut(self.reference()).hydrated(identifier);
        Ok(())
    }

    /// Build the entity key from the hydrated identifier.
    #[allow(clippy::result_large_err)]
    pub fn resolve_entity_key(&self, ctx: &mut ResultSetProcessingContext) -> Result<()> {
        let reference = self.reference();
        if ctx.phase(reference) >= ProcessingPhase::KeyResolved {
            return Ok(());
        }
        let identifier = ctx
            .processing_state(reference)
            .and_then(|s| s.identifier())
            .map(<[Value]>::to_vec);
        let key = match identifier {
            Some(id) => Some(EntityKey::new(self.spec.persister.entity_name(), id)),
            None if self.is_return() => {
                return Err(Error::ResultSet(ResultSetError {
                    kind: ResultSetErrorKind::MissingIdentifier,
                    column: self
                        .spec
                        .aliases
                        .column_aliases
                        .identifier_aliases()
                        .first()
                        .cloned(),
                    message: format!(
                        "row carries no identifier for root entity {}",
                        self.spec.persister.entity_name()
                    ),
                    source: None,
                }));
            }
            None => None,
        };
        if let Some(key) = &key {
            ctx.record_subselect_key(key);
        }
        ctx.state_mut(reference).key_resolved(key);
        Ok(())
    }

    /// Find or create the instance for the resolved key.
    ///
    /// Lookup order is this traversal, then an initialized session instance
    /// (read past, only its lock may be upgraded), then a session proxy
    /// (loaded in place), then a fresh instance of the row's concrete class.
    #[allow(clippy::result_large_err)]
    pub fn resolve_instance(
        &self,
        row: &Row,
        ctx: &mut ResultSetProcessingContext,
        session: &dyn SessionContext,
        options: &ProcessingOptions,
    ) -> Result<()> {
        let reference = self.reference();
        if ctx.phase(reference) >= ProcessingPhase::Resolved {
            return Ok(());
        }
        let Some(key) = ctx.key_of(reference).cloned() else {
            ctx.state_mut(reference).resolved(None, false);
            return Ok(());
        };

        if let Some(existing) = ctx.resolved_instance(&key) {
            ctx.state_mut(reference).resolved(Some(existing), false);
            return Ok(());
        }

        let target = match session.get_entity(&key) {
            Some(managed) if read(&managed).is_initialized() => {
                let requested = options
                    .lock_options
                    .effective_lock_mode(&self.spec.aliases.table_alias);
                self.upgrade_lock(row, &managed, requested, ctx)?;
                let instance = ctx.register_instance(key, managed);
                ctx.state_mut(reference).resolved(Some(instance), false);
                return Ok(());
            }
            Some(proxy) => proxy,
            None => EntityData::new(key.clone(), self.spec.persister.entity_name()).into_ref(),
        };
        let instance = ctx.register_instance(key, target);
        self.load_from_row(row, &instance, ctx)?;
        ctx.state_mut(reference).resolved(Some(instance), true);
        Ok(())
    }

    /// A managed instance re-read under a stronger pessimistic lock must
    /// still carry the row's version.
    #[allow(clippy::result_large_err)]
    fn upgrade_lock(
        &self,
        row: &Row,
        managed: &EntityRef,
        requested: LockMode,
        ctx: &mut ResultSetProcessingContext,
    ) -> Result<()> {
        let (current, version, key) = {
            let data = read(managed);
            (data.lock_mode(), data.version().cloned(), data.key().clone())
        };
        if !requested.is_pessimistic() || !requested.greater_than(current) {
            return Ok(());
        }
        if let Some(alias) = self.spec.aliases.column_aliases.version_alias() {
            let row_version = row.column(alias)?;
            if version.as_ref() != Some(row_version) {
                tracing::debug!(
                    entity = %key,
                    managed = ?version,
                    row = ?row_version,
                    "version mismatch on lock upgrade"
                );
                return Err(Error::StaleState {
                    entity_name: key.entity_name().to_string(),
                    identifier: key.identifier().to_vec(),
                });
            }
        }
        ctx.register_lock_upgrade(Arc::clone(managed), requested);
        Ok(())
    }

    /// Entity name selected by the row's discriminator.
    #[allow(clippy::result_large_err)]
    fn concrete_name(&self, row: &Row) -> Result<String> {
        let persister = &self.spec.persister;
        let Some(alias) = self.spec.aliases.column_aliases.discriminator_alias() else {
            return Ok(persister.entity_name().to_string());
        };
        let value = row.column(alias)?;
        if value.is_null() {
            return Ok(persister.entity_name().to_string());
        }
        persister
            .subclass_for_discriminator(value)
            .map(str::to_string)
            .ok_or_else(|| Error::WrongClass {
                entity_name: persister.entity_name().to_string(),
                discriminator: value.clone(),
            })
    }

    /// Read the entity state from the row. Nothing is applied to the
    /// instance until finish-up.
    #[allow(clippy::result_large_err)]
    fn load_from_row(
        &self,
        row: &Row,
        instance: &EntityRef,
        ctx: &mut ResultSetProcessingContext,
    ) -> Result<()> {
        let persister = &self.spec.persister;
        let aliases = &self.spec.aliases.column_aliases;
        let concrete_name = self.concrete_name(row)?;

        let mut basic = Vec::new();
        let mut foreign_keys = Vec::new();
        for property in persister
            .properties()
            .iter()
            .chain(persister.identifier_properties())
        {
            let Some(labels) = aliases.property_aliases(&property.name) else {
                continue;
            };
            match &property.kind {
                PropertyKind::Basic => {
                    basic.push((property.name.clone(), read_value(row, labels)?));
                }
                PropertyKind::ManyToOne { entity_name, .. } => {
                    let values = row.columns(labels)?;
                    foreign_keys.push(ForeignKey {
                        property: property.name.clone(),
                        entity_name: entity_name.clone(),
                        key: (!is_null_key(&values)).then_some(values),
                    });
                }
                _ => {}
            }
        }
        let version = aliases
            .version_alias()
            .map(|alias| row.column(alias).cloned())
            .transpose()?;

        tracing::trace!(
            entity = %read(instance).key(),
            concrete = %concrete_name,
            "hydrated entity from row"
        );
        ctx.register_hydrated(HydratedEntity {
            instance: Arc::clone(instance),
            persister: Arc::clone(persister),
            concrete_name,
            table_alias: self.spec.aliases.table_alias.clone(),
            basic,
            foreign_keys,
            version,
            fetched_collections: self.fetched_collections.clone(),
        });
        Ok(())
    }

    /// Wire this reference into the association it was fetched for.
    pub fn finish_row(&self, ctx: &mut ResultSetProcessingContext) {
        let (owner, property, one_to_one) = match &self.spec.link {
            EntityLink::Association {
                owner,
                property,
                one_to_one,
            } => (*owner, property, *one_to_one),
            EntityLink::Identifier { owner, property } => (*owner, property, false),
            _ => return,
        };
        let Some(owner_key) = ctx.key_of(owner).cloned() else {
            return;
        };
        let target = ctx.instance_of(self.reference());
        if target.is_none() && one_to_one {
            ctx.register_null_property(owner_key.clone(), property);
        }
        ctx.wire_association(owner_key, property, target);
    }
}

// ============================================================================
// Collection references
// ============================================================================

/// Adds one element per row to the collection of the row's owner key.
#[derive(Debug)]
pub struct CollectionReferenceInitializer<'p> {
    spec: &'p CollectionReaderSpec,
}

impl<'p> CollectionReferenceInitializer<'p> {
    pub fn new(spec: &'p CollectionReaderSpec) -> Self {
        Self { spec }
    }

    pub fn reference(&self) -> ReferenceId {
        self.spec.reference
    }

    /// Key of the collection this row belongs to, `None` on a row with no
    /// collection data (outer join miss).
    #[allow(clippy::result_large_err)]
    pub fn collection_key(&self, row: &Row) -> Result<Option<CollectionKey>> {
        let values = row.columns(self.spec.aliases.collection_aliases.key_aliases())?;
        if is_null_key(&values) {
            return Ok(None);
        }
        Ok(Some(CollectionKey::new(
            self.spec.persister.role(),
            values,
        )))
    }

    #[allow(clippy::result_large_err)]
    fn element(&self, row: &Row, ctx: &ResultSetProcessingContext) -> Result<Option<ElementValue>> {
        if let Some(element) = self.spec.element {
            return Ok(ctx.instance_of(element).map(ElementValue::Entity));
        }
        let mut values = row.columns(self.spec.aliases.collection_aliases.element_aliases())?;
        if is_null_key(&values) {
            return Ok(None);
        }
        let value = if values.len() == 1 {
            values.remove(0)
        } else {
            Value::Array(values)
        };
        Ok(Some(ElementValue::Value(value)))
    }

    #[allow(clippy::result_large_err)]
    fn index(&self, row: &Row, ctx: &ResultSetProcessingContext) -> Result<Option<ElementValue>> {
        if let Some(index) = self.spec.index {
            return Ok(ctx.instance_of(index).map(ElementValue::Entity));
        }
        let labels = self.spec.aliases.collection_aliases.index_aliases();
        if labels.is_empty() {
            return Ok(None);
        }
        read_value(row, labels).map(|v| Some(ElementValue::Value(v)))
    }

    /// Contribute this row's element to its collection.
    #[allow(clippy::result_large_err)]
    pub fn finish_up_row(
        &self,
        row: &Row,
        ctx: &mut ResultSetProcessingContext,
        session: &dyn SessionContext,
    ) -> Result<()> {
        let Some(key) = self.collection_key(row)? else {
            return Ok(());
        };
        let element = self.element(row, ctx)?;
        let index = self.index(row, ctx)?;
        let nature = self.spec.persister.nature();
        if let Some(entries) = ctx.loading_collection(self.reference(), &key, nature, session) {
            if let Some(element) = element {
                entries.push((index, element));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Return readers
// ============================================================================

/// Yields the root entity instance of a row.
#[derive(Debug, Clone, Copy)]
pub struct EntityReturnReader {
    reference: ReferenceId,
}

impl EntityReturnReader {
    pub fn new(reference: ReferenceId) -> Self {
        Self { reference }
    }

    pub fn read(&self, ctx: &ResultSetProcessingContext) -> Option<EntityRef> {
        ctx.instance_of(self.reference)
    }
}

/// Yields the collection a row contributed to.
#[derive(Debug)]
pub struct CollectionReturnReader<'p> {
    initializer: CollectionReferenceInitializer<'p>,
}

impl<'p> CollectionReturnReader<'p> {
    pub fn new(spec: &'p CollectionReaderSpec) -> Self {
        Self {
            initializer: CollectionReferenceInitializer::new(spec),
        }
    }

    #[allow(clippy::result_large_err)]
    pub fn read(
        &self,
        row: &Row,
        ctx: &ResultSetProcessingContext,
        session: &dyn SessionContext,
    ) -> Result<Option<CollectionRef>> {
        Ok(self
            .initializer
            .collection_key(row)?
            .and_then(|key| ctx.collection_instance(&key, session)))
    }
}
