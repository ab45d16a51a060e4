//! Turns one physical row into one logical row value.

use std::sync::Arc;

use loadplan_core::{Result, Row};
use loadplan_query::{ReaderPlan, RootReader};

use crate::context::ResultSetProcessingContext;
use crate::identity_map::SessionContext;
use crate::instance::{CollectionRef, EntityRef};
use crate::options::{OptionalEntity, ProcessingOptions};
use crate::readers::{
    CollectionReferenceInitializer, CollectionReturnReader, EntityReferenceInitializer,
    EntityReturnReader,
};

/// The value a row yields for the root return.
#[derive(Debug, Clone)]
pub enum LogicalRow {
    Entity(EntityRef),
    Collection(CollectionRef),
}

impl LogicalRow {
    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            LogicalRow::Entity(e) => Some(e),
            LogicalRow::Collection(_) => None,
        }
    }

    pub fn as_collection(&self) -> Option<&CollectionRef> {
        match self {
            LogicalRow::Collection(c) => Some(c),
            LogicalRow::Entity(_) => None,
        }
    }

    /// Address of the underlying instance, equal for the same instance.
    pub(crate) fn instance_addr(&self) -> usize {
        match self {
            LogicalRow::Entity(e) => Arc::as_ptr(e).cast::<()>() as usize,
            LogicalRow::Collection(c) => Arc::as_ptr(c).cast::<()>() as usize,
        }
    }
}

#[derive(Debug)]
enum ReturnReader<'p> {
    Entity(EntityReturnReader),
    Collection(CollectionReturnReader<'p>),
}

/// Runs every reader of a [`ReaderPlan`] against each row.
#[derive(Debug)]
pub struct RowReader<'p> {
    entity_initializers: Vec<EntityReferenceInitializer<'p>>,
    collection_initializers: Vec<CollectionReferenceInitializer<'p>>,
    return_reader: Option<ReturnReader<'p>>,
}

impl<'p> RowReader<'p> {
    pub fn new(plan: &'p ReaderPlan, optional: Option<&'p OptionalEntity>) -> Self {
        let entity_initializers = plan
            .entity_initializers()
            .iter()
            .map(|spec| EntityReferenceInitializer::new(spec, plan, optional))
            .collect();
        let collection_initializers = plan
            .all_collection_initializers()
            .map(CollectionReferenceInitializer::new)
            .collect();
        let return_reader = match plan.root() {
            RootReader::Entity(reference) => {
                Some(ReturnReader::Entity(EntityReturnReader::new(reference)))
            }
            RootReader::Collection(reference) => plan
                .collection_initializer(reference)
                .map(|spec| ReturnReader::Collection(CollectionReturnReader::new(spec))),
        };
        Self {
            entity_initializers,
            collection_initializers,
            return_reader,
        }
    }

    /// Read one physical row.
    ///
    /// Every entity reader hydrates identifiers first, then keys are
    /// resolved, then instances, so that a reference resolved earlier in the
    /// row is seen by later ones. Collections collect their element last.
    #[allow(clippy::result_large_err)]
    pub fn read_row(
        &self,
        row: &Row,
        ctx: &mut ResultSetProcessingContext,
        session: &dyn SessionContext,
        options: &ProcessingOptions,
    ) -> Result<Option<LogicalRow>> {
        ctx.start_row();
        for initializer in &self.entity_initializers {
            initializer.hydrate_identifier(row, ctx)?;
        }
        for initializer in &self.entity_initializers {
            initializer.resolve_entity_key(ctx)?;
        }
        for initializer in &self.entity_initializers {
            initializer.resolve_instance(row, ctx, session, options)?;
        }
        for initializer in &self.entity_initializers {
            initializer.finish_row(ctx);
        }
        for initializer in &self.collection_initializers {
            initializer.finish_up_row(row, ctx, session)?;
        }
        self.read_logical_row(row, ctx, session)
    }

    #[allow(clippy::result_large_err)]
    fn read_logical_row(
        &self,
        row: &Row,
        ctx: &ResultSetProcessingContext,
        session: &dyn SessionContext,
    ) -> Result<Option<LogicalRow>> {
        match &self.return_reader {
            Some(ReturnReader::Entity(reader)) => Ok(reader.read(ctx).map(LogicalRow::Entity)),
            Some(ReturnReader::Collection(reader)) => Ok(reader
                .read(row, ctx, session)?
                .map(LogicalRow::Collection)),
            None => Ok(None),
        }
    }
}
