//! Session-level identity map.
//!
//! Within one session each [`EntityKey`] corresponds to exactly one entity
//! instance and each [`CollectionKey`] to exactly one collection instance.
//! Result-set processing reaches the session only through the
//! [`SessionContext`] capability, passed explicitly into each call; the
//! stock [`IdentityMap`] implements it.
//!
//! # Example
//!
//! ```ignore
//! let mut session = IdentityMap::new();
//! let outcome = processor.extract_results(&mut rows, &mut session, &options)?;
//!
//! // Loading the same key again yields the same instance.
//! let again = session.get_entity(&key).unwrap();
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use loadplan_core::{CollectionKey, EntityKey, LockMode};

use crate::instance::{CollectionRef, EntityData, EntityRef, read, write};

/// What row reading needs from the owning session.
pub trait SessionContext {
    /// Managed instance for `key`, loaded or not.
    fn get_entity(&self, key: &EntityKey) -> Option<EntityRef>;

    /// Make `entity` the managed instance for its key. An instance already
    /// managed under that key wins and is returned.
    fn register_entity(&mut self, entity: EntityRef) -> EntityRef;

    /// Associate `entity` with the session under at least `mode`.
    fn lock(&mut self, entity: &EntityRef, mode: LockMode);

    /// Record that `owner.property` is known to have no associated row.
    fn add_null_property(&mut self, owner: &EntityKey, property: &str);

    fn is_null_property(&self, owner: &EntityKey, property: &str) -> bool;

    fn get_collection(&self, key: &CollectionKey) -> Option<CollectionRef>;

    /// Make `collection` the managed instance for its key, returning the
    /// instance that ends up managed.
    fn register_collection(&mut self, collection: CollectionRef) -> CollectionRef;

    /// Uninitialized placeholder for an entity not loaded yet, registered
    /// so that later loads of `key` fill it in.
    fn create_proxy(&mut self, key: EntityKey) -> EntityRef {
        self.register_entity(EntityData::proxy(key).into_ref())
    }
}

/// Identity map for entity and collection instances.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entities: HashMap<EntityKey, EntityRef>,
    collections: HashMap<CollectionKey, CollectionRef>,
    null_properties: HashSet<(EntityKey, String)>,
}

impl IdentityMap {
    /// Create a new empty identity map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity, returning the managed instance for its key.
    ///
    /// If an instance with the same key already exists it is returned and
    /// `entity` is ignored.
    pub fn insert(&mut self, entity: EntityData) -> EntityRef {
        self.register_entity(entity.into_ref())
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    pub fn contains_collection(&self, key: &CollectionKey) -> bool {
        self.collections.contains_key(key)
    }

    /// Remove an entity. Returns `true` if it was managed.
    pub fn remove(&mut self, key: &EntityKey) -> bool {
        self.entities.remove(key).is_some()
    }

    /// Clear all entries from the identity map.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.collections.clear();
        self.null_properties.clear();
    }

    /// Number of managed entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[must_use]
    pub fn collection_count(&self) -> usize {
        self.collections.len()
    }
}

impl SessionContext for IdentityMap {
    fn get_entity(&self, key: &EntityKey) -> Option<EntityRef> {
        self.entities.get(key).cloned()
    }

    fn register_entity(&mut self, entity: EntityRef) -> EntityRef {
        let key = read(&entity).key().clone();
        Arc::clone(self.entities.entry(key).or_insert(entity))
    }

    fn lock(&mut self, entity: &EntityRef, mode: LockMode) {
        let managed = self.register_entity(Arc::clone(entity));
        write(&managed).upgrade_lock(mode);
        tracing::trace!(entity = %read(&managed).key(), mode = ?mode, "locked entity");
    }

    fn add_null_property(&mut self, owner: &EntityKey, property: &str) {
        self.null_properties
            .insert((owner.clone(), property.to_string()));
    }

    fn is_null_property(&self, owner: &EntityKey, property: &str) -> bool {
        self.null_properties
            .contains(&(owner.clone(), property.to_string()))
    }

    fn get_collection(&self, key: &CollectionKey) -> Option<CollectionRef> {
        self.collections.get(key).cloned()
    }

    fn register_collection(&mut self, collection: CollectionRef) -> CollectionRef {
        let key = read(&collection).key().clone();
        Arc::clone(self.collections.entry(key).or_insert(collection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::PersistentCollection;
    use loadplan_core::{CollectionNature, Value};

    fn key(id: i64) -> EntityKey {
        EntityKey::new("Order", vec![Value::BigInt(id)])
    }

    #[test]
    fn test_first_registration_wins() {
        let mut map = IdentityMap::new();
        let first = map.insert(EntityData::new(key(1), "Order"));
        let second = map.insert(EntityData::new(key(1), "SpecialOrder"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(read(&second).concrete_name(), "Order");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_get_returns_shared_instance() {
        let mut map = IdentityMap::new();
        let order = map.insert(EntityData::new(key(1), "Order"));
        let fetched = map.get_entity(&key(1)).unwrap();
        write(&order).set_property(
            "number",
            crate::instance::PropertyValue::Basic(Value::from("A-1")),
        );
        assert_eq!(read(&fetched).basic("number"), Some(&Value::from("A-1")));
        assert!(map.get_entity(&key(2)).is_none());
    }

    #[test]
    fn test_proxy_is_registered_and_uninitialized() {
        let mut map = IdentityMap::new();
        let proxy = map.create_proxy(key(5));
        assert!(!read(&proxy).is_initialized());
        assert!(map.contains(&key(5)));
        assert!(Arc::ptr_eq(&proxy, &map.create_proxy(key(5))));
    }

    #[test]
    fn test_lock_touch_associates_and_upgrades() {
        let mut map = IdentityMap::new();
        let detached = EntityData::new(key(3), "Order").into_ref();
        map.lock(&detached, LockMode::None);
        assert!(map.contains(&key(3)));
        assert_eq!(read(&detached).lock_mode(), LockMode::None);

        map.lock(&detached, LockMode::PessimisticWrite);
        assert_eq!(read(&detached).lock_mode(), LockMode::PessimisticWrite);
    }

    #[test]
    fn test_null_properties_and_collections() {
        let mut map = IdentityMap::new();
        map.add_null_property(&key(1), "invoice");
        assert!(map.is_null_property(&key(1), "invoice"));
        assert!(!map.is_null_property(&key(2), "invoice"));

        let ckey = CollectionKey::new("Order.items", vec![Value::BigInt(1)]);
        let coll = PersistentCollection::new(ckey.clone(), CollectionNature::Bag).into_ref();
        let managed = map.register_collection(Arc::clone(&coll));
        assert!(Arc::ptr_eq(&coll, &managed));
        assert!(map.get_collection(&ckey).is_some());
        assert_eq!(map.collection_count(), 1);

        map.clear();
        assert!(map.is_empty());
        assert!(!map.contains_collection(&ckey));
    }
}
