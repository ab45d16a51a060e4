//! Reader descriptors collected while walking fetches.
//!
//! The processor records one descriptor per query space it emits columns
//! for. Once the walk is done the collector is turned into an immutable
//! [`ReaderPlan`], which the session crate executes against result sets.

use std::sync::Arc;

use loadplan_core::error::MappingErrorKind;
use loadplan_core::{CollectionNature, CollectionPersister, EntityPersister, Error, Result};

use crate::alias::{CollectionReferenceAliases, EntityReferenceAliases};
use crate::plan::{QuerySpaceUid, ReferenceId};

/// How an entity reference is attached to what it was read for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityLink {
    Return,
    /// Value of `property` on the `owner` instance of the same row.
    Association {
        owner: ReferenceId,
        property: String,
        /// Owned by the other side; a missing row is recorded on the owner.
        one_to_one: bool,
    },
    /// Component of the `owner`'s composite identifier.
    Identifier { owner: ReferenceId, property: String },
    CollectionElement { collection: ReferenceId },
    CollectionIndex { collection: ReferenceId },
}

/// Reads one entity query space out of each row.
#[derive(Debug, Clone)]
pub struct EntityReaderSpec {
    pub reference: ReferenceId,
    pub uid: QuerySpaceUid,
    pub persister: Arc<dyn EntityPersister>,
    pub aliases: EntityReferenceAliases,
    pub link: EntityLink,
}

/// Reads one collection query space, collapsing rows per owner key.
#[derive(Debug, Clone)]
pub struct CollectionReaderSpec {
    pub reference: ReferenceId,
    pub uid: QuerySpaceUid,
    pub persister: Arc<dyn CollectionPersister>,
    pub aliases: CollectionReferenceAliases,
    /// Owning entity reference and property; `None` for a collection return.
    pub owner: Option<(ReferenceId, String)>,
    pub element: Option<ReferenceId>,
    pub index: Option<ReferenceId>,
}

/// Which reader yields the logical row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootReader {
    Entity(ReferenceId),
    Collection(ReferenceId),
}

/// Accumulates reader descriptors during fetch processing.
#[derive(Debug, Default)]
pub struct ReaderCollector {
    root: Option<RootReader>,
    entity_initializers: Vec<EntityReaderSpec>,
    collection_initializers: Vec<CollectionReaderSpec>,
    array_initializers: Vec<CollectionReaderSpec>,
}

impl ReaderCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Designate the root return reader. Fails on a second call.
    #[allow(clippy::result_large_err)]
    pub fn set_root_return_reader(&mut self, root: RootReader) -> Result<()> {
        if let Some(existing) = self.root {
            return Err(Error::mapping(
                MappingErrorKind::DuplicateRootReader,
                format!(
                    "root return reader already set to {:?}, refusing {:?}",
                    existing, root
                ),
            ));
        }
        self.root = Some(root);
        Ok(())
    }

    pub fn root_return_reader(&self) -> Option<RootReader> {
        self.root
    }

    pub fn add_entity_reference_initializer(&mut self, spec: EntityReaderSpec) {
        self.entity_initializers.push(spec);
    }

    /// Arrays go to their own bucket: they are assembled by index once all
    /// rows are read.
    pub fn add_collection_reference_initializer(&mut self, spec: CollectionReaderSpec) {
        if spec.persister.nature() == CollectionNature::Array {
            self.array_initializers.push(spec);
        } else {
            self.collection_initializers.push(spec);
        }
    }

    #[allow(clippy::result_large_err)]
    pub fn into_reader_plan(self) -> Result<ReaderPlan> {
        let root = self.root.ok_or_else(|| {
            Error::mapping(
                MappingErrorKind::InvalidLoadPlan,
                "no root return reader was registered",
            )
        })?;
        Ok(ReaderPlan {
            root,
            entity_initializers: self.entity_initializers,
            collection_initializers: self.collection_initializers,
            array_initializers: self.array_initializers,
        })
    }
}

/// Executable reader layout for one compiled load query.
#[derive(Debug, Clone)]
pub struct ReaderPlan {
    root: RootReader,
    entity_initializers: Vec<EntityReaderSpec>,
    collection_initializers: Vec<CollectionReaderSpec>,
    array_initializers: Vec<CollectionReaderSpec>,
}

impl ReaderPlan {
    pub fn root(&self) -> RootReader {
        self.root
    }

    /// Entity readers in fetch-tree order.
    pub fn entity_initializers(&self) -> &[EntityReaderSpec] {
        &self.entity_initializers
    }

    pub fn collection_initializers(&self) -> &[CollectionReaderSpec] {
        &self.collection_initializers
    }

    pub fn array_initializers(&self) -> &[CollectionReaderSpec] {
        &self.array_initializers
    }

    /// Non-array and array collection readers together.
    pub fn all_collection_initializers(&self) -> impl Iterator<Item = &CollectionReaderSpec> {
        self.collection_initializers
            .iter()
            .chain(&self.array_initializers)
    }

    pub fn entity_initializer(&self, reference: ReferenceId) -> Option<&EntityReaderSpec> {
        self.entity_initializers
            .iter()
            .find(|s| s.reference == reference)
    }

    pub fn collection_initializer(&self, reference: ReferenceId) -> Option<&CollectionReaderSpec> {
        self.all_collection_initializers()
            .find(|s| s.reference == reference)
    }

    /// Entity readers for the key-many-to-one components of `owner`'s id.
    pub fn identifier_fetches_of(
        &self,
        owner: ReferenceId,
    ) -> impl Iterator<Item = &EntityReaderSpec> {
        self.entity_initializers.iter().filter(move |s| {
            matches!(&s.link, EntityLink::Identifier { owner: o, .. } if *o == owner)
        })
    }

    /// Collection readers fetched as properties of `owner`.
    pub fn collection_fetches_of(
        &self,
        owner: ReferenceId,
    ) -> impl Iterator<Item = &CollectionReaderSpec> {
        self.all_collection_initializers()
            .filter(move |s| matches!(&s.owner, Some((o, _)) if *o == owner))
    }
}
