//! Core types and collaborator interfaces for loadplan.
//!
//! This crate provides the foundations load queries are compiled from and
//! result sets are read with:
//!
//! - `Value`, `Row` and the `ResultSet` cursor trait
//! - `EntityPersister` / `CollectionPersister` mapping metadata and the `Metamodel`
//! - `EntityKey` / `CollectionKey` identity keys
//! - `LockMode`, `LockOptions` and the `Dialect` lock/placeholder renderer
//! - the shared `Error` type

pub mod dialect;
pub mod error;
pub mod key;
pub mod lock;
pub mod persister;
pub mod row;
pub mod template;
pub mod value;

pub use dialect::Dialect;
pub use error::{
    Error, MappingError, MappingErrorKind, Result, ResultSetError, ResultSetErrorKind, TypeError,
};
pub use key::{CollectionKey, EntityKey, is_null_key};
pub use lock::{LockMode, LockOptions};
pub use persister::{
    CollectionMapping, CollectionNature, CollectionPersister, DiscriminatorMapping, ElementKind,
    EntityMapping, EntityPersister, Metamodel, PropertyKind, PropertyMapping, QueryInfluencers,
    column_alias,
};
pub use row::{ColumnInfo, FromValue, ResultSet, Row, VecResultSet};
pub use template::SqlTemplate;
pub use value::Value;
