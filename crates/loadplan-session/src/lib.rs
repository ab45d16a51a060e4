//! Session-side row reading for loadplan.
//!
//! `loadplan-session` executes the reader layout of a compiled
//! `LoadQueryDetails` against a result set and materializes entity graphs.
//!
//! # Role In The Architecture
//!
//! - **Identity map**: `IdentityMap` keeps one instance per entity and
//!   collection key; readers reach it through the `SessionContext` trait.
//! - **Row reading**: `RowReader` runs the entity and collection readers over
//!   each physical row, tracking per-reference phases in a
//!   `ResultSetProcessingContext`.
//! - **Two-phase load**: `ResultSetProcessor::extract_results` reads every row
//!   first, then applies state, resolves associations and registers
//!   instances in one finish-up step.

pub mod context;
pub mod identity_map;
pub mod instance;
pub mod options;
pub mod processor;
pub mod readers;
pub mod row_reader;

pub use context::{
    EntityReferenceProcessingState, FinishedLoad, ProcessingPhase, ResultSetProcessingContext,
};
pub use identity_map::{IdentityMap, SessionContext};
pub use instance::{
    CollectionEntry, CollectionRef, ElementValue, EntityData, EntityRef, PersistentCollection,
    PropertyValue,
};
pub use options::{OptionalEntity, ProcessingOptions};
pub use processor::{ProcessingOutcome, ResultSetProcessor};
pub use readers::{
    CollectionReferenceInitializer, CollectionReturnReader, EntityReferenceInitializer,
    EntityReturnReader,
};
pub use row_reader::{LogicalRow, RowReader};
