//! Identity keys used for identity-map lookups.

use crate::value::Value;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// The tuple (entity name, identifier value) identifying one entity instance.
///
/// The identifier is a list of column values so composite keys need no
/// special casing. The hash is computed once at construction.
#[derive(Debug, Clone)]
pub struct EntityKey {
    entity_name: String,
    identifier: Vec<Value>,
    hash: u64,
}

impl EntityKey {
    pub fn new(entity_name: impl Into<String>, identifier: Vec<Value>) -> Self {
        let entity_name = entity_name.into();
        let hash = hash_key(&entity_name, &identifier);
        Self {
            entity_name,
            identifier,
            hash,
        }
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn identifier(&self) -> &[Value] {
        &self.identifier
    }
}

impl PartialEq for EntityKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.entity_name == other.entity_name
            && self.identifier == other.identifier
    }
}

impl Eq for EntityKey {}

impl Hash for EntityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:?}", self.entity_name, self.identifier)
    }
}

/// The tuple (collection role, owner key value) identifying one collection.
#[derive(Debug, Clone)]
pub struct CollectionKey {
    role: String,
    key: Vec<Value>,
    hash: u64,
}

impl CollectionKey {
    pub fn new(role: impl Into<String>, key: Vec<Value>) -> Self {
        let role = role.into();
        let hash = hash_key(&role, &key);
        Self { role, key, hash }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn key(&self) -> &[Value] {
        &self.key
    }
}

impl PartialEq for CollectionKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.role == other.role && self.key == other.key
    }
}

impl Eq for CollectionKey {}

impl Hash for CollectionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:?}", self.role, self.key)
    }
}

/// True when every value of a hydrated key is NULL (no row on that side of
/// an outer join).
pub fn is_null_key(values: &[Value]) -> bool {
    values.iter().all(Value::is_null)
}

fn hash_key(name: &str, values: &[Value]) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    values.len().hash(&mut hasher);
    for v in values {
        v.hash_into(&mut hasher);
    }
    hasher.finish()
}
