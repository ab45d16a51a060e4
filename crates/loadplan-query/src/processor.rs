//! Walks query-space joins and fetches, filling the statement builder and
//! the reader collector.

use std::sync::Arc;

use loadplan_core::error::MappingErrorKind;
use loadplan_core::{Error, PropertyKind, QueryInfluencers, Result};

use crate::alias::{AliasResolutionContext, ElementGraph};
use crate::collector::{CollectionReaderSpec, EntityLink, EntityReaderSpec, ReaderCollector};
use crate::join::JoinFragment;
use crate::plan::{
    CollectionReference, EntityReference, FetchStrategy, Join, JoinRole, LoadPlan, QuerySpaceUid,
    Reference, ReferenceId, ReferenceOrigin,
};
use crate::shape::{LoadShape, ShapeContext};
use crate::statement::SelectStatementBuilder;

/// A fetch left for a later query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredFetch {
    pub reference: ReferenceId,
    pub owner: ReferenceId,
    pub property: String,
    pub strategy: FetchStrategy,
}

/// What fetch processing found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchStats {
    has_subselect_fetches: bool,
    joined_fetch_count: usize,
    deferred_fetches: Vec<DeferredFetch>,
}

impl FetchStats {
    /// Whether some fetch needs the owners' keys for a subselect follow-up.
    pub fn has_subselect_fetches(&self) -> bool {
        self.has_subselect_fetches
    }

    pub fn joined_fetch_count(&self) -> usize {
        self.joined_fetch_count
    }

    pub fn deferred_fetches(&self) -> &[DeferredFetch] {
        &self.deferred_fetches
    }

    pub fn merge(&mut self, other: FetchStats) {
        self.has_subselect_fetches |= other.has_subselect_fetches;
        self.joined_fetch_count += other.joined_fetch_count;
        self.deferred_fetches.extend(other.deferred_fetches);
    }
}

/// Renders joins and fetch columns for one load query.
pub struct LoadQueryJoinAndFetchProcessor<'a> {
    plan: &'a LoadPlan,
    aliases: &'a mut AliasResolutionContext,
    influencers: &'a QueryInfluencers,
}

impl<'a> LoadQueryJoinAndFetchProcessor<'a> {
    pub fn new(
        plan: &'a LoadPlan,
        aliases: &'a mut AliasResolutionContext,
        influencers: &'a QueryInfluencers,
    ) -> Self {
        Self {
            plan,
            aliases,
            influencers,
        }
    }

    /// Render every join reachable from `root` into the builder's FROM
    /// clause, allocating aliases for each joined space on the way.
    #[allow(clippy::result_large_err)]
    pub fn process_query_space_joins(
        &mut self,
        root: &QuerySpaceUid,
        builder: &mut SelectStatementBuilder,
    ) -> Result<()> {
        let mut fragment = JoinFragment::new();
        self.render_joins(root, &mut fragment)?;
        builder.set_outer_joins(
            &fragment.to_from_fragment_string(),
            &fragment.to_where_fragment_string(),
        );
        Ok(())
    }

    /// Emit SELECT columns and reader descriptors for the fetches of an
    /// entity reference, recursively.
    #[allow(clippy::result_large_err)]
    pub fn process_fetches(
        &mut self,
        source: ReferenceId,
        builder: &mut SelectStatementBuilder,
        collector: &mut ReaderCollector,
    ) -> Result<FetchStats> {
        let mut stats = FetchStats::default();
        self.process_fetch_source(source, builder, collector, &mut stats)?;
        tracing::debug!(
            source = %source,
            joined = stats.joined_fetch_count,
            deferred = stats.deferred_fetches.len(),
            has_subselect_fetches = stats.has_subselect_fetches,
            "processed fetches"
        );
        Ok(stats)
    }

    /// Register readers for a collection return and process the fetches of
    /// its element and index graphs.
    #[allow(clippy::result_large_err)]
    pub fn process_collection_return(
        &mut self,
        collection: ReferenceId,
        builder: &mut SelectStatementBuilder,
        collector: &mut ReaderCollector,
    ) -> Result<FetchStats> {
        let mut stats = FetchStats::default();
        self.register_collection_readers(collection, None, builder, collector, &mut stats)?;
        Ok(stats)
    }

    // ---- joins ----

    #[allow(clippy::result_large_err)]
    fn render_joins(&mut self, uid: &QuerySpaceUid, fragment: &mut JoinFragment) -> Result<()> {
        let plan = self.plan;
        for join in plan.joins_from(uid)? {
            self.render_join(join, fragment)?;
            self.render_joins(&join.rhs, fragment)?;
        }
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    fn render_join(&mut self, join: &Join, fragment: &mut JoinFragment) -> Result<()> {
        let plan = self.plan;
        let rhs = plan.query_space(&join.rhs)?;
        match plan.reference(rhs.reference) {
            Reference::Entity(entity) if join.role == JoinRole::CollectionElement => {
                self.render_collection_element_join(join, entity, fragment)
            }
            Reference::Entity(entity) => self.render_entity_join(join, entity, fragment),
            Reference::Collection(collection) => {
                self.render_collection_join(join, collection, fragment)
            }
        }
    }

    #[allow(clippy::result_large_err)]
    fn render_entity_join(
        &mut self,
        join: &Join,
        entity: &EntityReference,
        fragment: &mut JoinFragment,
    ) -> Result<()> {
        let aliases = self
            .aliases
            .generate_entity_reference_aliases(&join.rhs, entity.persister.as_ref())?;
        let lhs_alias = self.aliases.resolve_sql_table_alias(&join.lhs)?;
        let rhs_alias = &aliases.table_alias;
        let inner = join.is_right_hand_side_required();

        fragment.add_join(
            join.join_type,
            &entity.persister.from_table_fragment(rhs_alias),
            lhs_alias,
            &join.lhs_columns,
            rhs_alias,
            &join.rhs_columns,
            &[],
        );
        fragment.add_from_fragment(&entity.persister.from_join_fragment(rhs_alias, inner));
        fragment.add_condition(&entity.persister.where_join_fragment(rhs_alias, inner));
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    fn render_collection_join(
        &mut self,
        join: &Join,
        collection: &CollectionReference,
        fragment: &mut JoinFragment,
    ) -> Result<()> {
        let plan = self.plan;
        let graph = collection
            .element
            .and_then(|id| plan.entity(id))
            .map(|e| ElementGraph {
                uid: &e.uid,
                persister: e.persister.as_ref(),
            });
        let aliases = self.aliases.generate_collection_reference_aliases(
            &join.rhs,
            collection.persister.as_ref(),
            graph,
        )?;
        let lhs_alias = self.aliases.resolve_sql_table_alias(&join.lhs)?;
        let alias = &aliases.collection_table_alias;

        let mut on_extra = vec![collection.persister.filter_fragment(alias, self.influencers)];
        on_extra.extend(collection.persister.where_fragment(alias));
        fragment.add_join(
            join.join_type,
            &format!("{} {}", collection.persister.table_name(), alias),
            lhs_alias,
            &join.lhs_columns,
            alias,
            &join.rhs_columns,
            &on_extra,
        );
        Ok(())
    }

    /// One-to-many elements live in the collection table itself, so only
    /// many-to-many elements add a join (link table to element table).
    #[allow(clippy::result_large_err)]
    fn render_collection_element_join(
        &mut self,
        join: &Join,
        element: &EntityReference,
        fragment: &mut JoinFragment,
    ) -> Result<()> {
        let plan = self.plan;
        let owner = plan.query_space(&join.lhs)?;
        let Some(collection) = plan.collection(owner.reference) else {
            return Err(Error::mapping(
                MappingErrorKind::InvalidLoadPlan,
                format!("element join {} does not start at a collection", join.lhs),
            ));
        };
        if collection.persister.is_one_to_many() {
            tracing::trace!(
                role = %collection.persister.role(),
                "one-to-many element shares the collection table"
            );
            return Ok(());
        }

        let collection_alias = &self
            .aliases
            .resolve_collection_reference_aliases(&join.lhs)?
            .collection_table_alias;
        let element_alias = &self
            .aliases
            .resolve_entity_reference_aliases(&join.rhs)?
            .table_alias;
        let on_extra = [collection
            .persister
            .many_to_many_filter_fragment(element_alias, self.influencers)];
        fragment.add_join(
            join.join_type,
            &element.persister.from_table_fragment(element_alias),
            collection_alias,
            &join.lhs_columns,
            element_alias,
            &join.rhs_columns,
            &on_extra,
        );
        Ok(())
    }

    // ---- fetches ----

    #[allow(clippy::result_large_err)]
    fn process_fetch_source(
        &mut self,
        source: ReferenceId,
        builder: &mut SelectStatementBuilder,
        collector: &mut ReaderCollector,
        stats: &mut FetchStats,
    ) -> Result<()> {
        let plan = self.plan;
        let Some(entity) = plan.entity(source) else {
            return Ok(());
        };
        for id in &entity.identifier_fetches {
            self.process_identifier_fetch(*id, builder, collector, stats)?;
        }
        for id in &entity.fetches {
            self.process_fetch(*id, builder, collector, stats)?;
        }
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    fn process_fetch(
        &mut self,
        id: ReferenceId,
        builder: &mut SelectStatementBuilder,
        collector: &mut ReaderCollector,
        stats: &mut FetchStats,
    ) -> Result<()> {
        let plan = self.plan;
        let reference = plan.reference(id);
        let ReferenceOrigin::Fetch {
            source,
            property,
            strategy,
        } = reference.origin()
        else {
            return Err(Error::mapping(
                MappingErrorKind::InvalidLoadPlan,
                format!("reference {} is listed as a fetch but is not one", id),
            ));
        };

        // Counted for deferred fetches too: a delayed subselect is exactly
        // the case that needs the owner keys later.
        if strategy.is_delayed_subselect() {
            stats.has_subselect_fetches = true;
        }
        if !strategy.is_joined() {
            tracing::trace!(fetch = %id, property = %property, "deferred fetch");
            stats.deferred_fetches.push(DeferredFetch {
                reference: id,
                owner: *source,
                property: property.clone(),
                strategy: *strategy,
            });
            return Ok(());
        }
        stats.joined_fetch_count += 1;

        match reference {
            Reference::Entity(entity) => {
                let one_to_one = plan
                    .entity(*source)
                    .and_then(|owner| owner.persister.property(property))
                    .is_some_and(|p| matches!(p.kind, PropertyKind::OneToOne { .. }));
                let link = EntityLink::Association {
                    owner: *source,
                    property: property.clone(),
                    one_to_one,
                };
                self.process_entity_fetch(id, entity, link, builder, collector, stats)
            }
            Reference::Collection(_) => self.register_collection_readers(
                id,
                Some((*source, property.clone())),
                builder,
                collector,
                stats,
            ),
        }
    }

    #[allow(clippy::result_large_err)]
    fn process_identifier_fetch(
        &mut self,
        id: ReferenceId,
        builder: &mut SelectStatementBuilder,
        collector: &mut ReaderCollector,
        stats: &mut FetchStats,
    ) -> Result<()> {
        let plan = self.plan;
        let (Some(entity), ReferenceOrigin::IdentifierFetch { source, property }) =
            (plan.entity(id), plan.reference(id).origin())
        else {
            return Err(Error::mapping(
                MappingErrorKind::InvalidLoadPlan,
                format!("reference {} is not an identifier fetch", id),
            ));
        };
        stats.joined_fetch_count += 1;
        let link = EntityLink::Identifier {
            owner: *source,
            property: property.clone(),
        };
        self.process_entity_fetch(id, entity, link, builder, collector, stats)
    }

    #[allow(clippy::result_large_err)]
    fn process_entity_fetch(
        &mut self,
        id: ReferenceId,
        entity: &EntityReference,
        link: EntityLink,
        builder: &mut SelectStatementBuilder,
        collector: &mut ReaderCollector,
        stats: &mut FetchStats,
    ) -> Result<()> {
        let aliases = self
            .aliases
            .resolve_entity_reference_aliases(&entity.uid)?
            .clone();
        builder.append_select_clause_fragment(
            &entity
                .persister
                .select_fragment(&aliases.table_alias, aliases.column_aliases.suffix()),
        );
        collector.add_entity_reference_initializer(EntityReaderSpec {
            reference: id,
            uid: entity.uid.clone(),
            persister: Arc::clone(&entity.persister),
            aliases,
            link,
        });
        self.process_fetch_source(id, builder, collector, stats)
    }

    /// SELECT and ORDER BY for a joined collection, its reader, and readers
    /// for its entity element and entity index graphs.
    #[allow(clippy::result_large_err)]
    fn register_collection_readers(
        &mut self,
        id: ReferenceId,
        owner: Option<(ReferenceId, String)>,
        builder: &mut SelectStatementBuilder,
        collector: &mut ReaderCollector,
        stats: &mut FetchStats,
    ) -> Result<()> {
        let plan = self.plan;
        let Some(collection) = plan.collection(id) else {
            return Err(Error::mapping(
                MappingErrorKind::InvalidLoadPlan,
                format!("reference {} is not a collection", id),
            ));
        };

        // The collection return's own columns come from the orchestrator.
        if owner.is_some() {
            let rules = LoadShape::for_collection(collection.persister.as_ref()).rules();
            let ctx = ShapeContext {
                plan,
                reference: id,
                aliases: self.aliases,
            };
            for fragment in (rules.select)(&ctx)? {
                builder.append_select_clause_fragment(&fragment);
            }
            for fragment in (rules.order_by)(&ctx)? {
                builder.append_order_by_fragment(&fragment);
            }
        }

        let aliases = self
            .aliases
            .resolve_collection_reference_aliases(&collection.uid)?
            .clone();
        collector.add_collection_reference_initializer(CollectionReaderSpec {
            reference: id,
            uid: collection.uid.clone(),
            persister: Arc::clone(&collection.persister),
            aliases,
            owner,
            element: collection.element,
            index: collection.index,
        });

        for (graph, link) in [
            (
                collection.element,
                EntityLink::CollectionElement { collection: id },
            ),
            (
                collection.index,
                EntityLink::CollectionIndex { collection: id },
            ),
        ] {
            let Some(graph_id) = graph else { continue };
            let Some(entity) = plan.entity(graph_id) else {
                continue;
            };
            let entity_aliases = self
                .aliases
                .resolve_entity_reference_aliases(&entity.uid)?
                .clone();
            collector.add_entity_reference_initializer(EntityReaderSpec {
                reference: graph_id,
                uid: entity.uid.clone(),
                persister: Arc::clone(&entity.persister),
                aliases: entity_aliases,
                link,
            });
            self.process_fetch_source(graph_id, builder, collector, stats)?;
        }
        Ok(())
    }
}
