//! Mutable state of one result-set traversal.
//!
//! A [`ResultSetProcessingContext`] lives for exactly one traversal. It keeps
//! the per-row processing state of every entity reference, the instances
//! resolved so far, and everything that is applied to the session only once
//! all rows were read successfully (two-phase load). Nothing reaches the
//! session before [`ResultSetProcessingContext::finish_up`], so a traversal
//! that fails leaves the session untouched.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use loadplan_core::{
    CollectionKey, CollectionNature, EntityKey, EntityPersister, LockMode, Metamodel,
    PropertyKind, Result, Value,
};
use loadplan_query::ReferenceId;

use crate::identity_map::SessionContext;
use crate::instance::{
    CollectionRef, ElementValue, EntityRef, PersistentCollection, PropertyValue, read, write,
};
use crate::options::ProcessingOptions;

/// How far an entity reference got on the current row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProcessingPhase {
    #[default]
    Unseen,
    /// Identifier read from the row (possibly null).
    Hydrated,
    /// Entity key built from the identifier.
    KeyResolved,
    /// Instance found or created.
    Resolved,
    /// Instance state read from this row's columns.
    LoadedFromRow,
}

/// Per-row state of one entity reference.
#[derive(Debug, Default)]
pub struct EntityReferenceProcessingState {
    phase: ProcessingPhase,
    identifier: Option<Vec<Value>>,
    key: Option<EntityKey>,
    instance: Option<EntityRef>,
}

impl EntityReferenceProcessingState {
    pub fn phase(&self) -> ProcessingPhase {
        self.phase
    }

    /// Hydrated identifier; `None` when the row has no entity here.
    pub fn identifier(&self) -> Option<&[Value]> {
        self.identifier.as_deref()
    }

    pub fn entity_key(&self) -> Option<&EntityKey> {
        self.key.as_ref()
    }

    pub fn instance(&self) -> Option<&EntityRef> {
        self.instance.as_ref()
    }

    pub(crate) fn hydrated(&mut self, identifier: Option<Vec<Value>>) {
        self.identifier = identifier;
        self.phase = ProcessingPhase::Hydrated;
    }

    pub(crate) fn key_resolved(&mut self, key: Option<EntityKey>) {
        self.key = key;
        self.phase = ProcessingPhase::KeyResolved;
    }

    pub(crate) fn resolved(&mut self, instance: Option<EntityRef>, loaded_from_row: bool) {
        self.instance = instance;
        self.phase = if loaded_from_row {
            ProcessingPhase::LoadedFromRow
        } else {
            ProcessingPhase::Resolved
        };
    }
}

/// Foreign key read for a many-to-one, resolved at finish-up.
#[derive(Debug, Clone)]
pub(crate) struct ForeignKey {
    pub property: String,
    pub entity_name: String,
    /// `None` when the key columns are all null.
    pub key: Option<Vec<Value>>,
}

/// Entity state read from a row, applied to its instance at finish-up.
#[derive(Debug)]
pub(crate) struct HydratedEntity {
    pub instance: EntityRef,
    pub persister: Arc<dyn EntityPersister>,
    pub concrete_name: String,
    pub table_alias: String,
    pub basic: Vec<(String, Value)>,
    pub foreign_keys: Vec<ForeignKey>,
    pub version: Option<Value>,
    /// Collection properties fetched by this query.
    pub fetched_collections: Vec<String>,
}

#[derive(Debug)]
struct LoadingCollection {
    instance: CollectionRef,
    entries: Vec<(Option<ElementValue>, ElementValue)>,
}

/// What finish-up produced.
#[derive(Debug, Default)]
pub struct FinishedLoad {
    pub rows_read: usize,
    pub entities_loaded: usize,
    pub collections_loaded: usize,
    /// Keys of every hydrated entity per entity name, in first-seen order.
    /// Empty unless subselect fetches need them.
    pub subselect_keys: BTreeMap<String, Vec<EntityKey>>,
}

/// Mutable state of one result-set traversal. Not shareable across
/// traversals.
#[derive(Debug, Default)]
pub struct ResultSetProcessingContext {
    row_states: HashMap<ReferenceId, EntityReferenceProcessingState>,
    instances: HashMap<EntityKey, EntityRef>,
    hydrated: Vec<HydratedEntity>,
    associations: HashMap<(EntityKey, String), Option<EntityRef>>,
    null_properties: Vec<(EntityKey, String)>,
    lock_upgrades: Vec<(EntityRef, LockMode)>,
    collections: Vec<LoadingCollection>,
    collection_index: HashMap<CollectionKey, usize>,
    collection_runs: HashMap<ReferenceId, CollectionKey>,
    finished_runs: HashSet<(ReferenceId, CollectionKey)>,
    track_subselect_keys: bool,
    subselect_seen: HashSet<EntityKey>,
    subselect_keys: BTreeMap<String, Vec<EntityKey>>,
    rows_read: usize,
}

impl ResultSetProcessingContext {
    /// `track_subselect_keys` keeps every hydrated entity key for a
    /// subselect follow-up query.
    pub fn new(track_subselect_keys: bool) -> Self {
        Self {
            track_subselect_keys,
            ..Self::default()
        }
    }

    /// Forget the per-row state of the previous row.
    pub fn start_row(&mut self) {
        self.row_states.clear();
        self.rows_read += 1;
    }

    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    pub fn processing_state(&self, reference: ReferenceId) -> Option<&EntityReferenceProcessingState> {
        self.row_states.get(&reference)
    }

    pub(crate) fn state_mut(&mut self, reference: ReferenceId) -> &mut EntityReferenceProcessingState {
        self.row_states.entry(reference).or_default()
    }

    pub fn phase(&self, reference: ReferenceId) -> ProcessingPhase {
        self.row_states
            .get(&reference)
            .map_or(ProcessingPhase::Unseen, |s| s.phase)
    }

    /// Instance a reference resolved to on the current row.
    pub fn instance_of(&self, reference: ReferenceId) -> Option<EntityRef> {
        self.row_states
            .get(&reference)
            .and_then(|s| s.instance.clone())
    }

    pub fn key_of(&self, reference: ReferenceId) -> Option<&EntityKey> {
        self.row_states.get(&reference).and_then(|s| s.key.as_ref())
    }

    /// Instance already resolved for `key` anywhere in this traversal.
    pub fn resolved_instance(&self, key: &EntityKey) -> Option<EntityRef> {
        self.instances.get(key).cloned()
    }

    /// First resolution of a key wins; later calls keep the first instance.
    pub(crate) fn register_instance(&mut self, key: EntityKey, instance: EntityRef) -> EntityRef {
        Arc::clone(self.instances.entry(key).or_insert(instance))
    }

    pub(crate) fn register_hydrated(&mut self, entity: HydratedEntity) {
        self.hydrated.push(entity);
    }

    /// Number of instances loaded from rows so far.
    pub fn hydrated_count(&self) -> usize {
        self.hydrated.len()
    }

    /// Wire `owner.property` to a fetched instance (or to nothing). The
    /// first row to wire a property wins.
    pub(crate) fn wire_association(
        &mut self,
        owner: EntityKey,
        property: &str,
        target: Option<EntityRef>,
    ) {
        self.associations
            .entry((owner, property.to_string()))
            .or_insert(target);
    }

    pub(crate) fn register_null_property(&mut self, owner: EntityKey, property: &str) {
        let entry = (owner, property.to_string());
        if !self.null_properties.contains(&entry) {
            self.null_properties.push(entry);
        }
    }

    pub(crate) fn register_lock_upgrade(&mut self, instance: EntityRef, mode: LockMode) {
        self.lock_upgrades.push((instance, mode));
    }

    pub(crate) fn record_subselect_key(&mut self, key: &EntityKey) {
        if self.track_subselect_keys && self.subselect_seen.insert(key.clone()) {
            self.subselect_keys
                .entry(key.entity_name().to_string())
                .or_default()
                .push(key.clone());
        }
    }

    /// Collection being loaded for `key`, started on first sight.
    ///
    /// Returns `None` when the session already holds an initialized
    /// collection for the key: its rows are read past, not reapplied.
    pub(crate) fn loading_collection(
        &mut self,
        reference: ReferenceId,
        key: &CollectionKey,
        nature: CollectionNature,
        session: &dyn SessionContext,
    ) -> Option<&mut Vec<(Option<ElementValue>, ElementValue)>> {
        self.track_run(reference, key);
        if let Some(i) = self.collection_index.get(key) {
            return self.collections.get_mut(*i).map(|c| &mut c.entries);
        }
        let instance = match session.get_collection(key) {
            Some(existing) if read(&existing).is_initialized() => {
                tracing::trace!(collection = %key, "collection already initialized, ignoring row");
                return None;
            }
            Some(existing) => existing,
            None => PersistentCollection::new(key.clone(), nature).into_ref(),
        };
        tracing::trace!(collection = %key, "loading collection");
        self.collection_index
            .insert(key.clone(), self.collections.len());
        self.collections.push(LoadingCollection {
            instance,
            entries: Vec::new(),
        });
        self.collections.last_mut().map(|c| &mut c.entries)
    }

    /// Instance for `key` as this traversal sees it.
    pub fn collection_instance(
        &self,
        key: &CollectionKey,
        session: &dyn SessionContext,
    ) -> Option<CollectionRef> {
        self.collection_index
            .get(key)
            .and_then(|i| self.collections.get(*i))
            .map(|c| Arc::clone(&c.instance))
            .or_else(|| session.get_collection(key))
    }

    /// Rows of one owner key are expected to arrive together.
    fn track_run(&mut self, reference: ReferenceId, key: &CollectionKey) {
        if self.collection_runs.get(&reference) == Some(key) {
            return;
        }
        if let Some(previous) = self.collection_runs.insert(reference, key.clone()) {
            self.finished_runs.insert((reference, previous));
        }
        if self.finished_runs.contains(&(reference, key.clone())) {
            tracing::warn!(
                collection = %key,
                "collection rows are not contiguous; owner key reappeared after its run ended"
            );
        }
    }

    /// Apply everything read to instances and commit it to the session.
    ///
    /// Collections are filled first, then each hydrated entity gets its
    /// basic values, resolved associations and collection wrappers, and is
    /// marked loaded and registered. `requested` lists collection keys to
    /// initialize empty when no row carried them.
    #[allow(clippy::result_large_err)]
    #[tracing::instrument(level = "debug", skip_all, fields(rows = self.rows_read))]
    pub fn finish_up(
        self,
        session: &mut dyn SessionContext,
        metamodel: &Metamodel,
        options: &ProcessingOptions,
        requested: &[(CollectionKey, CollectionNature)],
    ) -> Result<FinishedLoad> {
        let mut loaded: HashMap<CollectionKey, CollectionRef> = HashMap::new();
        for loading in &self.collections {
            let key = {
                let mut collection = write(&loading.instance);
                collection.clear();
                for (index, element) in &loading.entries {
                    collection.add(index.clone(), element.clone());
                }
                collection.mark_initialized();
                collection.key().clone()
            };
            let managed = session.register_collection(Arc::clone(&loading.instance));
            loaded.insert(key, managed);
        }

        for hydrated in &self.hydrated {
            self.initialize_entity(hydrated, session, metamodel, options, &mut loaded)?;
        }

        for (key, nature) in requested {
            if loaded.contains_key(key) {
                continue;
            }
            let collection = match session.get_collection(key) {
                Some(existing) if read(&existing).is_initialized() => continue,
                Some(existing) => existing,
                None => session
                    .register_collection(PersistentCollection::new(key.clone(), *nature).into_ref()),
            };
            {
                let mut data = write(&collection);
                data.clear();
                data.mark_initialized();
            }
            tracing::trace!(collection = %key, "initialized empty requested collection");
            loaded.insert(key.clone(), collection);
        }

        for (owner, property) in &self.null_properties {
            session.add_null_property(owner, property);
        }
        for (instance, mode) in &self.lock_upgrades {
            session.lock(instance, *mode);
        }

        let finished = FinishedLoad {
            rows_read: self.rows_read,
            entities_loaded: self.hydrated.len(),
            collections_loaded: loaded.len(),
            subselect_keys: self.subselect_keys,
        };
        tracing::debug!(
            entities = finished.entities_loaded,
            collections = finished.collections_loaded,
            "finished loading"
        );
        Ok(finished)
    }

    #[allow(clippy::result_large_err)]
    fn initialize_entity(
        &self,
        hydrated: &HydratedEntity,
        session: &mut dyn SessionContext,
        metamodel: &Metamodel,
        options: &ProcessingOptions,
        loaded: &mut HashMap<CollectionKey, CollectionRef>,
    ) -> Result<()> {
        let persister = &hydrated.persister;
        let (owner_key, identifier) = {
            let data = read(&hydrated.instance);
            (data.key().clone(), data.identifier().to_vec())
        };

        let mut values: Vec<(String, PropertyValue)> = hydrated
            .basic
            .iter()
            .map(|(name, v)| (name.clone(), PropertyValue::Basic(v.clone())))
            .collect();

        for fk in &hydrated.foreign_keys {
            let value = match &fk.key {
                None => PropertyValue::Entity(None),
                Some(key_values) => {
                    let key = EntityKey::new(fk.entity_name.as_str(), key_values.clone());
                    self.resolve_foreign_key(key, session, options)
                }
            };
            values.push((fk.property.clone(), value));
        }

        for property in persister
            .properties()
            .iter()
            .chain(persister.identifier_properties())
        {
            let wired = self
                .associations
                .get(&(owner_key.clone(), property.name.clone()));
            match (&property.kind, wired) {
                (_, Some(target)) => {
                    values.push((property.name.clone(), PropertyValue::Entity(target.clone())));
                }
                (PropertyKind::OneToOne { .. }, None) => {
                    let known_null = session.is_null_property(&owner_key, &property.name)
                        || self
                            .null_properties
                            .contains(&(owner_key.clone(), property.name.clone()));
                    let value = if known_null {
                        PropertyValue::Entity(None)
                    } else {
                        PropertyValue::Unfetched
                    };
                    values.push((property.name.clone(), value));
                }
                (PropertyKind::Collection { role }, None) => {
                    let key = CollectionKey::new(role.as_str(), identifier.clone());
                    let fetched = hydrated.fetched_collections.contains(&property.name);
                    let collection =
                        Self::resolve_collection(key, fetched, session, metamodel, loaded)?;
                    values.push((property.name.clone(), PropertyValue::Collection(collection)));
                }
                _ => {}
            }
        }

        {
            let mut data = write(&hydrated.instance);
            for (name, value) in values {
                data.set_property(name, value);
            }
            data.set_concrete_name(hydrated.concrete_name.as_str());
            data.set_version(hydrated.version.clone());
            data.upgrade_lock(
                options
                    .lock_options
                    .effective_lock_mode(&hydrated.table_alias)
                    .acquired(),
            );
            data.set_read_only(options.read_only);
            data.mark_initialized();
        }
        session.register_entity(Arc::clone(&hydrated.instance));
        tracing::trace!(entity = %owner_key, "initialized entity");
        Ok(())
    }

    /// This traversal's instance, then the session's, then a proxy.
    fn resolve_foreign_key(
        &self,
        key: EntityKey,
        session: &mut dyn SessionContext,
        options: &ProcessingOptions,
    ) -> PropertyValue {
        if let Some(instance) = self.instances.get(&key) {
            return PropertyValue::Entity(Some(Arc::clone(instance)));
        }
        if let Some(instance) = session.get_entity(&key) {
            return PropertyValue::Entity(Some(instance));
        }
        if options.return_proxies {
            PropertyValue::Entity(Some(session.create_proxy(key)))
        } else {
            PropertyValue::Reference(key)
        }
    }

    /// Collection loaded here, the session's, or a new one: empty and
    /// initialized when it was fetched, lazy otherwise.
    #[allow(clippy::result_large_err)]
    fn resolve_collection(
        key: CollectionKey,
        fetched: bool,
        session: &mut dyn SessionContext,
        metamodel: &Metamodel,
        loaded: &mut HashMap<CollectionKey, CollectionRef>,
    ) -> Result<CollectionRef> {
        if let Some(collection) = loaded.get(&key) {
            return Ok(Arc::clone(collection));
        }
        if let Some(collection) = session.get_collection(&key) {
            if fetched && !read(&collection).is_initialized() {
                {
                    let mut data = write(&collection);
                    data.clear();
                    data.mark_initialized();
                }
                loaded.insert(key, Arc::clone(&collection));
            }
            return Ok(collection);
        }
        let nature = metamodel.collection(key.role())?.nature();
        let mut collection = PersistentCollection::new(key.clone(), nature);
        if fetched {
            collection.mark_initialized();
        }
        let managed = session.register_collection(collection.into_ref());
        if fetched {
            loaded.insert(key, Arc::clone(&managed));
        }
        Ok(managed)
    }
}
