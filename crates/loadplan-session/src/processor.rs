//! Result-set processing for a compiled load query.
//!
//! [`ResultSetProcessor`] walks a result set with the readers of a
//! [`LoadQueryDetails`], then commits what was read to the session in one
//! finish-up step. The compiled query is only borrowed, so one compiled
//! query can serve many executions.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use loadplan_core::{
    CollectionKey, CollectionNature, EntityKey, LockMode, Metamodel, Result, ResultSet,
};
use loadplan_query::{EntityLink, LoadQueryDetails, RootReader};

use crate::context::ResultSetProcessingContext;
use crate::identity_map::SessionContext;
use crate::instance::{CollectionRef, EntityRef, read};
use crate::options::{OptionalEntity, ProcessingOptions};
use crate::row_reader::{LogicalRow, RowReader};

/// Everything one traversal produced.
#[derive(Debug, Default)]
pub struct ProcessingOutcome {
    /// One value per distinct root instance, in first-seen order.
    pub results: Vec<LogicalRow>,
    /// Hydrated keys per entity name, kept for subselect follow-up loads.
    pub subselect_keys: BTreeMap<String, Vec<EntityKey>>,
    pub rows_read: usize,
    pub entities_loaded: usize,
    pub collections_loaded: usize,
}

impl ProcessingOutcome {
    /// Root entities, for an entity load.
    pub fn entities(&self) -> Vec<EntityRef> {
        self.results
            .iter()
            .filter_map(LogicalRow::as_entity)
            .cloned()
            .collect()
    }

    /// Root collections, for a collection load.
    pub fn collections(&self) -> Vec<CollectionRef> {
        self.results
            .iter()
            .filter_map(LogicalRow::as_collection)
            .cloned()
            .collect()
    }

    /// The single root entity of a load by one key.
    pub fn unique_entity(&self) -> Option<EntityRef> {
        match self.results.as_slice() {
            [LogicalRow::Entity(e)] => Some(Arc::clone(e)),
            _ => None,
        }
    }
}

/// Reads result sets of one compiled load query.
#[derive(Debug, Clone, Copy)]
pub struct ResultSetProcessor<'d> {
    details: &'d LoadQueryDetails,
    metamodel: &'d Metamodel,
}

impl<'d> ResultSetProcessor<'d> {
    pub fn new(details: &'d LoadQueryDetails, metamodel: &'d Metamodel) -> Self {
        Self { details, metamodel }
    }

    pub fn details(&self) -> &LoadQueryDetails {
        self.details
    }

    /// Read every row of `rows` and load the results into `session`.
    ///
    /// The session is only written to once the last row was read: an error
    /// on any row leaves it as it was.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let processor = ResultSetProcessor::new(&details, &metamodel);
    /// let outcome = processor.extract_results(&mut rows, &mut session, &ProcessingOptions::new())?;
    /// let order = outcome.unique_entity().unwrap();
    /// ```
    #[allow(clippy::result_large_err)]
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(root_alias = %self.details.root_table_alias(), shape = ?self.details.shape())
    )]
    pub fn extract_results(
        &self,
        rows: &mut dyn ResultSet,
        session: &mut dyn SessionContext,
        options: &ProcessingOptions,
    ) -> Result<ProcessingOutcome> {
        let plan = self.details.reader_plan();
        let optional = self.optional_entity(options);
        let reader = RowReader::new(plan, optional);
        let mut ctx =
            ResultSetProcessingContext::new(self.details.fetch_stats().has_subselect_fetches());

        let mut results = Vec::new();
        let mut seen = HashSet::new();
        while rows.advance()? {
            let row = rows.current_row()?;
            if let Some(logical) = reader.read_row(row, &mut ctx, &*session, options)? {
                if seen.insert(logical.instance_addr()) {
                    results.push(logical);
                }
            }
        }
        tracing::trace!(rows = ctx.rows_read(), roots = results.len(), "read all rows");

        let requested = self.requested_collections(options)?;
        let finished = ctx.finish_up(session, self.metamodel, options, &requested)?;

        if optional.is_some() {
            self.touch_identifier_associations(&results, session);
        }

        tracing::debug!(
            rows = finished.rows_read,
            results = results.len(),
            entities = finished.entities_loaded,
            collections = finished.collections_loaded,
            "processed result set"
        );
        Ok(ProcessingOutcome {
            results,
            subselect_keys: finished.subselect_keys,
            rows_read: finished.rows_read,
            entities_loaded: finished.entities_loaded,
            collections_loaded: finished.collections_loaded,
        })
    }

    /// The optional entity applies to single-key entity loads of its own
    /// entity type only.
    fn optional_entity<'o>(&self, options: &'o ProcessingOptions) -> Option<&'o OptionalEntity> {
        let optional = options.optional_entity.as_ref()?;
        if !self.details.should_use_optional_entity_information() {
            tracing::debug!(
                batch_size = self.details.batch_size(),
                "ignoring optional entity for a batched or collection load"
            );
            return None;
        }
        let root_name = match self.details.reader_plan().root() {
            RootReader::Entity(reference) => self
                .details
                .reader_plan()
                .entity_initializer(reference)
                .map(|spec| spec.persister.entity_name()),
            RootReader::Collection(_) => None,
        };
        if root_name != Some(optional.entity_name.as_str()) {
            tracing::debug!(
                optional = %optional.entity_name,
                root = ?root_name,
                "ignoring optional entity of another entity type"
            );
            return None;
        }
        Some(optional)
    }

    #[allow(clippy::result_large_err)]
    fn requested_collections(
        &self,
        options: &ProcessingOptions,
    ) -> Result<Vec<(CollectionKey, CollectionNature)>> {
        options
            .collection_keys
            .iter()
            .map(|key| {
                let nature = self.metamodel.collection(key.role())?.nature();
                Ok((key.clone(), nature))
            })
            .collect()
    }

    /// Associate the many-to-one parts of the root's composite identifier
    /// with the session under no lock.
    fn touch_identifier_associations(
        &self,
        results: &[LogicalRow],
        session: &mut dyn SessionContext,
    ) {
        let plan = self.details.reader_plan();
        let RootReader::Entity(root) = plan.root() else {
            return;
        };
        for spec in plan.identifier_fetches_of(root) {
            let EntityLink::Identifier { property, .. } = &spec.link else {
                continue;
            };
            for result in results.iter().filter_map(LogicalRow::as_entity) {
                let associated = read(result).entity(property);
                if let Some(associated) = associated {
                    session.lock(&associated, LockMode::None);
                }
            }
        }
    }
}
