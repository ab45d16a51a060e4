//! Entity and collection instances shared between a session and the rows
//! that load them.
//!
//! Instances are `Arc<RwLock<..>>` so that every fetch path reaching the
//! same [`EntityKey`] sees one object: a change made through one reference
//! is visible through all of them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use loadplan_core::{CollectionKey, CollectionNature, EntityKey, LockMode, Value};

/// A shared entity instance.
pub type EntityRef = Arc<RwLock<EntityData>>;

/// A shared collection instance.
pub type CollectionRef = Arc<RwLock<PersistentCollection>>;

/// Read an instance, ignoring poisoning: instances hold plain data and are
/// never left half-written by a panicking reader.
pub fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Entities
// ============================================================================

/// Value of one entity property.
#[derive(Clone)]
pub enum PropertyValue {
    Basic(Value),
    /// Associated entity; `None` when the association is empty.
    Entity(Option<EntityRef>),
    /// Association left as a key reference with no instance behind it.
    Reference(EntityKey),
    Collection(CollectionRef),
    /// Not loaded by this query.
    Unfetched,
}

impl fmt::Debug for PropertyValue {
    // Associations print their key only: entity graphs may be cyclic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Basic(v) => f.debug_tuple("Basic").field(v).finish(),
            PropertyValue::Entity(None) => f.write_str("Entity(None)"),
            PropertyValue::Entity(Some(e)) => match e.try_read() {
                Ok(data) => write!(f, "Entity({})", data.key()),
                Err(_) => f.write_str("Entity(<locked>)"),
            },
            PropertyValue::Reference(key) => write!(f, "Reference({})", key),
            PropertyValue::Collection(c) => match c.try_read() {
                Ok(data) => write!(f, "Collection({}, {} entries)", data.key(), data.len()),
                Err(_) => f.write_str("Collection(<locked>)"),
            },
            PropertyValue::Unfetched => f.write_str("Unfetched"),
        }
    }
}

/// State of one managed entity instance.
#[derive(Debug, Clone)]
pub struct EntityData {
    key: EntityKey,
    concrete_name: String,
    properties: BTreeMap<String, PropertyValue>,
    initialized: bool,
    lock_mode: LockMode,
    read_only: bool,
    version: Option<Value>,
}

impl EntityData {
    /// A new, not yet loaded instance of `concrete_name` identified by `key`.
    pub fn new(key: EntityKey, concrete_name: impl Into<String>) -> Self {
        Self {
            key,
            concrete_name: concrete_name.into(),
            properties: BTreeMap::new(),
            initialized: false,
            lock_mode: LockMode::None,
            read_only: false,
            version: None,
        }
    }

    /// An uninitialized placeholder for `key`.
    pub fn proxy(key: EntityKey) -> Self {
        let name = key.entity_name().to_string();
        Self::new(key, name)
    }

    /// Wrap into a shared instance.
    pub fn into_ref(self) -> EntityRef {
        Arc::new(RwLock::new(self))
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn identifier(&self) -> &[Value] {
        self.key.identifier()
    }

    /// Entity name of the concrete class, which differs from the key's
    /// entity name for discriminated subclasses.
    pub fn concrete_name(&self) -> &str {
        &self.concrete_name
    }

    pub(crate) fn set_concrete_name(&mut self, name: impl Into<String>) {
        self.concrete_name = name.into();
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.properties.insert(name.into(), value);
    }

    /// Basic value of a property, if it holds one.
    pub fn basic(&self, name: &str) -> Option<&Value> {
        match self.properties.get(name) {
            Some(PropertyValue::Basic(v)) => Some(v),
            _ => None,
        }
    }

    /// Associated instance of an entity-valued property.
    pub fn entity(&self, name: &str) -> Option<EntityRef> {
        match self.properties.get(name) {
            Some(PropertyValue::Entity(Some(e))) => Some(Arc::clone(e)),
            _ => None,
        }
    }

    pub fn collection(&self, name: &str) -> Option<CollectionRef> {
        match self.properties.get(name) {
            Some(PropertyValue::Collection(c)) => Some(Arc::clone(c)),
            _ => None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Mark state as fully loaded, e.g. for an instance an application
    /// seeds into its session.
    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    pub fn lock_mode(&self) -> LockMode {
        self.lock_mode
    }

    /// Raise the recorded lock mode; never lowers it.
    pub fn upgrade_lock(&mut self, mode: LockMode) {
        if mode.greater_than(self.lock_mode) {
            self.lock_mode = mode;
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn version(&self) -> Option<&Value> {
        self.version.as_ref()
    }

    pub fn set_version(&mut self, version: Option<Value>) {
        self.version = version;
    }
}

// ============================================================================
// Collections
// ============================================================================

/// One element or map key of a collection.
#[derive(Clone)]
pub enum ElementValue {
    Value(Value),
    Entity(EntityRef),
}

impl ElementValue {
    /// Same value, or the very same entity instance.
    pub fn same_as(&self, other: &ElementValue) -> bool {
        match (self, other) {
            (ElementValue::Value(a), ElementValue::Value(b)) => a == b,
            (ElementValue::Entity(a), ElementValue::Entity(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            ElementValue::Value(v) => Some(v),
            ElementValue::Entity(_) => None,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            ElementValue::Entity(e) => Some(e),
            ElementValue::Value(_) => None,
        }
    }
}

impl fmt::Debug for ElementValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementValue::Value(v) => f.debug_tuple("Value").field(v).finish(),
            ElementValue::Entity(e) => match e.try_read() {
                Ok(data) => write!(f, "Entity({})", data.key()),
                Err(_) => f.write_str("Entity(<locked>)"),
            },
        }
    }
}

/// An element with its list position or map key.
#[derive(Debug, Clone)]
pub struct CollectionEntry {
    pub index: Option<ElementValue>,
    pub element: ElementValue,
}

impl CollectionEntry {
    /// A list position no row has filled.
    fn empty_slot() -> Self {
        Self {
            index: None,
            element: ElementValue::Value(Value::Null),
        }
    }

    pub fn is_empty_slot(&self) -> bool {
        self.index.is_none() && matches!(&self.element, ElementValue::Value(Value::Null))
    }
}

/// A collection owned by one entity, keyed by role and owner key.
#[derive(Debug, Clone)]
pub struct PersistentCollection {
    key: CollectionKey,
    nature: CollectionNature,
    entries: Vec<CollectionEntry>,
    initialized: bool,
}

impl PersistentCollection {
    /// An empty, not yet loaded collection.
    pub fn new(key: CollectionKey, nature: CollectionNature) -> Self {
        Self {
            key,
            nature,
            entries: Vec::new(),
            initialized: false,
        }
    }

    pub fn into_ref(self) -> CollectionRef {
        Arc::new(RwLock::new(self))
    }

    pub fn key(&self) -> &CollectionKey {
        &self.key
    }

    pub fn nature(&self) -> CollectionNature {
        self.nature
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CollectionEntry] {
        &self.entries
    }

    pub fn elements(&self) -> impl Iterator<Item = &ElementValue> {
        self.entries.iter().map(|e| &e.element)
    }

    /// Basic element values, in collection order.
    pub fn values(&self) -> Vec<Value> {
        self.elements()
            .filter_map(ElementValue::as_value)
            .cloned()
            .collect()
    }

    /// Entity elements, in collection order.
    pub fn entities(&self) -> Vec<EntityRef> {
        self.elements()
            .filter_map(ElementValue::as_entity)
            .cloned()
            .collect()
    }

    /// Element stored under a map key.
    pub fn get(&self, index: &ElementValue) -> Option<&ElementValue> {
        self.entries
            .iter()
            .find(|e| e.index.as_ref().is_some_and(|i| i.same_as(index)))
            .map(|e| &e.element)
    }

    /// Add one element the way this collection's nature requires.
    ///
    /// Sets ignore repeated elements. Maps replace the value of a repeated
    /// key. Lists and arrays store each entry at the slot named by its
    /// integer index: skipped positions hold `NULL` and a repeated index
    /// overwrites its slot. Entries without a usable index are appended.
    /// Bags append.
    pub fn add(&mut self, index: Option<ElementValue>, element: ElementValue) {
        match self.nature {
            CollectionNature::Set => {
                if !self.elements().any(|e| e.same_as(&element)) {
                    self.entries.push(CollectionEntry { index, element });
                }
            }
            CollectionNature::Map => {
                let existing = index.as_ref().and_then(|key| {
                    self.entries
                        .iter_mut()
                        .find(|e| e.index.as_ref().is_some_and(|i| i.same_as(key)))
                });
                match existing {
                    Some(entry) => entry.element = element,
                    None => self.entries.push(CollectionEntry { index, element }),
                }
            }
            CollectionNature::List | CollectionNature::Array => match slot_of(index.as_ref()) {
                Some(slot) => {
                    if self.entries.len() <= slot {
                        self.entries.resize_with(slot + 1, CollectionEntry::empty_slot);
                    }
                    self.entries[slot] = CollectionEntry { index, element };
                }
                None => self.entries.push(CollectionEntry { index, element }),
            },
            CollectionNature::Bag => self.entries.push(CollectionEntry { index, element }),
        }
    }

    /// Drop all entries, e.g. before a reload.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

fn slot_of(index: Option<&ElementValue>) -> Option<usize> {
    index
        .and_then(ElementValue::as_value)
        .and_then(Value::as_i64)
        .and_then(|i| usize::try_from(i).ok())
}
