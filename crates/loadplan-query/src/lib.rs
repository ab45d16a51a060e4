//! Load plans and load-query compilation for loadplan.
//!
//! `loadplan-query` is the **SQL generation layer**. It turns a description of
//! an object graph to load into one SELECT statement and a matching reader
//! layout.
//!
//! # Role In The Architecture
//!
//! - **Load plans**: `LoadPlanBuilder` resolves returns and fetches against
//!   the `Metamodel` into a validated `LoadPlan` arena.
//! - **Aliases**: `AliasResolutionContext` assigns table aliases and column
//!   suffixes per query space.
//! - **Compilation**: `LoadQueryDetails` walks joins and fetches into a
//!   `SelectStatementBuilder` and a `ReaderPlan`.
//!
//! Compiled queries are executed and read back by `loadplan-session`.

pub mod alias;
pub mod collector;
pub mod config;
pub mod details;
pub mod join;
pub mod plan;
pub mod processor;
pub mod shape;
pub mod statement;

pub use alias::{
    AliasResolutionContext, CollectionAliases, CollectionReferenceAliases, ElementGraph,
    EntityAliases, EntityReferenceAliases,
};
pub use collector::{
    CollectionReaderSpec, EntityLink, EntityReaderSpec, ReaderCollector, ReaderPlan, RootReader,
};
pub use config::QueryBuildingParameters;
pub use details::LoadQueryDetails;
pub use join::{JoinFragment, JoinType};
pub use plan::{
    CollectionReference, EntityReference, FetchStrategy, FetchStyle, FetchTiming, Join, JoinRole,
    LoadPlan, LoadPlanBuilder, QuerySpace, QuerySpaceKind, QuerySpaceUid, Reference, ReferenceId,
    ReferenceOrigin,
};
pub use processor::{DeferredFetch, FetchStats, LoadQueryJoinAndFetchProcessor};
pub use shape::LoadShape;
pub use statement::SelectStatementBuilder;
