//! Per-execution options for reading a result set.

use loadplan_core::{CollectionKey, LockOptions, Value};

/// An entity identity known before the rows are read.
///
/// Used when exactly one key is loaded: the root entity key is taken from
/// here rather than from the identifier columns.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionalEntity {
    pub entity_name: String,
    pub identifier: Vec<Value>,
}

impl OptionalEntity {
    pub fn new(entity_name: impl Into<String>, identifier: Vec<Value>) -> Self {
        Self {
            entity_name: entity_name.into(),
            identifier,
        }
    }
}

/// Options for one result-set traversal.
#[derive(Debug, Clone)]
pub struct ProcessingOptions {
    /// Mark loaded entities read-only.
    pub read_only: bool,
    /// Resolve foreign keys with nothing loaded behind them to session
    /// proxies. When off they stay plain key references.
    pub return_proxies: bool,
    pub optional_entity: Option<OptionalEntity>,
    pub lock_options: LockOptions,
    /// Owner keys a collection load was issued for. Keys with no rows get an
    /// initialized empty collection.
    pub collection_keys: Vec<CollectionKey>,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            return_proxies: true,
            optional_entity: None,
            lock_options: LockOptions::default(),
            collection_keys: Vec::new(),
        }
    }
}

impl ProcessingOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    #[must_use]
    pub fn return_proxies(mut self, value: bool) -> Self {
        self.return_proxies = value;
        self
    }

    #[must_use]
    pub fn optional_entity(mut self, entity: OptionalEntity) -> Self {
        self.optional_entity = Some(entity);
        self
    }

    #[must_use]
    pub fn lock_options(mut self, options: LockOptions) -> Self {
        self.lock_options = options;
        self
    }

    /// Request a collection for `key`, so it is initialized even when the
    /// result set holds no rows for it.
    #[must_use]
    pub fn collection_key(mut self, key: CollectionKey) -> Self {
        self.collection_keys.push(key);
        self
    }
}
