//! Loadplan - load-plan driven SQL generation and result-set hydration.
//!
//! Loadplan turns a description of an object graph to load into one SQL
//! SELECT and reads the matching result set back into entity instances:
//!
//! - Load plans with entity and collection returns and a tree of fetches
//! - Collision-free table aliases and column labels across any fetch depth
//! - Batched key restrictions (`IN` lists and composite disjunctions)
//! - Multi-row collection collapsing and one instance per entity key
//! - Two-phase loading that commits to the session only after all rows
//!
//! # Quick Start
//!
//! ```ignore
//! use loadplan::prelude::*;
//!
//! let mut model = Metamodel::new();
//! model.add_entity(
//!     EntityMapping::new("Order", "orders")
//!         .id("id")
//!         .many_to_one("customer", "customer_id", "Customer"),
//! )?;
//! model.add_entity(EntityMapping::new("Customer", "customers").id("id").property("name", "name"))?;
//!
//! let mut loader = Loader::new(model);
//! let mut plan = loader.plan();
//! let order = plan.entity_return("Order")?;
//! plan.entity_fetch(order, "customer", FetchStrategy::inner_join())?;
//! let details = loader.compile_entity_load(plan.build()?)?;
//!
//! // SELECT order0_.id as id_0_, ... FROM orders order0_
//! //   INNER JOIN customers customer1_ ON order0_.customer_id = customer1_.id
//! //   WHERE order0_.id = ?
//! let sql = details.sql_statement();
//!
//! let outcome = loader.read(&details, &mut rows, &ProcessingOptions::new())?;
//! let order = outcome.unique_entity();
//! ```
//!
//! # Crates
//!
//! - `loadplan-core`: values, rows, persister metadata, keys, locks, errors
//! - `loadplan-query`: load plans, aliases and load-query compilation
//! - `loadplan-session`: identity map, row readers and result-set processing

pub use loadplan_core::{
    CollectionKey, CollectionMapping, CollectionNature, CollectionPersister, Dialect, ElementKind,
    EntityKey, EntityMapping, EntityPersister, Error, LockMode, LockOptions, MappingErrorKind,
    Metamodel, PropertyKind, PropertyMapping, QueryInfluencers, Result, ResultSet,
    ResultSetErrorKind, Row, Value, VecResultSet,
};

pub use loadplan_query::{
    AliasResolutionContext, FetchStats, FetchStrategy, JoinType, LoadPlan, LoadPlanBuilder,
    LoadQueryDetails, LoadShape, QueryBuildingParameters, ReaderPlan, ReferenceId,
    SelectStatementBuilder,
};

pub use loadplan_session::{
    CollectionRef, ElementValue, EntityData, EntityRef, IdentityMap, LogicalRow, OptionalEntity,
    PersistentCollection, ProcessingOptions, ProcessingOutcome, PropertyValue,
    ResultSetProcessor, SessionContext,
};

/// Shared-instance accessors for [`EntityRef`] and [`CollectionRef`].
pub use loadplan_session::instance::{read, write};

pub mod loader;
pub use loader::{Loader, LoaderBuilder};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use loadplan::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Mapping
        CollectionKey,
        CollectionMapping,
        CollectionNature,
        Dialect,
        EntityKey,
        EntityMapping,
        Error,
        // Plans and compilation
        FetchStrategy,
        // Session
        IdentityMap,
        LoadPlan,
        LoadPlanBuilder,
        LoadQueryDetails,
        Loader,
        LockMode,
        LockOptions,
        Metamodel,
        OptionalEntity,
        ProcessingOptions,
        ProcessingOutcome,
        PropertyValue,
        QueryBuildingParameters,
        Result,
        ResultSet,
        ResultSetProcessor,
        SessionContext,
        Value,
        VecResultSet,
        read,
    };
}
