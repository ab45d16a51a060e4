//! Load plan model: returns, fetches and the query spaces they join.
//!
//! A [`LoadPlan`] is an arena of references (entity and collection nodes)
//! indexed by [`ReferenceId`]. The first reference is the single root return;
//! every other reference is a fetch hanging off a parent, or the element or
//! index graph of a collection. Each reference owns one [`QuerySpace`], and
//! [`Join`]s between query spaces describe the FROM clause.
//!
//! Plans are produced by [`LoadPlanBuilder`], which resolves property names
//! through the [`Metamodel`] and checks join columns as it goes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use loadplan_core::error::MappingErrorKind;
use loadplan_core::{
    CollectionPersister, ElementKind, EntityPersister, Error, Metamodel, PropertyKind, Result,
};
use serde::{Deserialize, Serialize};

use crate::join::JoinType;

/// Index of a reference in the plan arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceId(usize);

impl ReferenceId {
    pub const fn index(self) -> usize {
        self.0
    }

    #[cfg(test)]
    pub(crate) const fn for_tests(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stable opaque identifier of a query space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuerySpaceUid(String);

impl QuerySpaceUid {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    fn generated(n: usize) -> Self {
        Self(format!("<gen:{n}>"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuerySpaceUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Fetch strategy
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchTiming {
    /// Loaded as part of loading the owner.
    Immediate,
    /// Loaded on first access.
    Delayed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStyle {
    /// Joined into the owner's statement.
    Join,
    /// A separate select per owner.
    Select,
    /// One select re-running the owner query as a subquery.
    Subselect,
    /// One select for a batch of owners.
    Batch,
}

/// When and how an association is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchStrategy {
    pub timing: FetchTiming,
    pub style: FetchStyle,
    /// Join type used when `style` is `Join`.
    pub join_type: JoinType,
}

impl FetchStrategy {
    pub const fn inner_join() -> Self {
        Self {
            timing: FetchTiming::Immediate,
            style: FetchStyle::Join,
            join_type: JoinType::Inner,
        }
    }

    pub const fn outer_join() -> Self {
        Self {
            timing: FetchTiming::Immediate,
            style: FetchStyle::Join,
            join_type: JoinType::Left,
        }
    }

    pub const fn select() -> Self {
        Self::deferred(FetchStyle::Select)
    }

    pub const fn subselect() -> Self {
        Self::deferred(FetchStyle::Subselect)
    }

    pub const fn batch() -> Self {
        Self::deferred(FetchStyle::Batch)
    }

    const fn deferred(style: FetchStyle) -> Self {
        Self {
            timing: FetchTiming::Delayed,
            style,
            join_type: JoinType::Left,
        }
    }

    /// Same style, loaded eagerly by a follow-up query.
    #[must_use]
    pub const fn immediate(mut self) -> Self {
        self.timing = FetchTiming::Immediate;
        self
    }

    /// Whether this fetch is read from the owner's own statement.
    pub fn is_joined(&self) -> bool {
        self.timing == FetchTiming::Immediate && self.style == FetchStyle::Join
    }

    /// Whether the owner's key set must be kept for a subselect follow-up.
    pub fn is_delayed_subselect(&self) -> bool {
        self.style == FetchStyle::Subselect && self.timing != FetchTiming::Immediate
    }
}

// ============================================================================
// References
// ============================================================================

/// How a reference hangs in the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceOrigin {
    Return,
    Fetch {
        source: ReferenceId,
        property: String,
        strategy: FetchStrategy,
    },
    /// Many-to-one component of the source's composite identifier.
    IdentifierFetch {
        source: ReferenceId,
        property: String,
    },
    CollectionElement {
        collection: ReferenceId,
    },
    CollectionIndex {
        collection: ReferenceId,
    },
}

#[derive(Debug, Clone)]
pub struct EntityReference {
    pub uid: QuerySpaceUid,
    pub persister: Arc<dyn EntityPersister>,
    pub origin: ReferenceOrigin,
    /// Property fetches, in declaration order.
    pub fetches: Vec<ReferenceId>,
    pub identifier_fetches: Vec<ReferenceId>,
}

#[derive(Debug, Clone)]
pub struct CollectionReference {
    pub uid: QuerySpaceUid,
    pub persister: Arc<dyn CollectionPersister>,
    pub origin: ReferenceOrigin,
    /// Element graph, when elements are entities.
    pub element: Option<ReferenceId>,
    /// Index graph, when map keys are entities.
    pub index: Option<ReferenceId>,
}

#[derive(Debug, Clone)]
pub enum Reference {
    Entity(EntityReference),
    Collection(CollectionReference),
}

impl Reference {
    pub fn uid(&self) -> &QuerySpaceUid {
        match self {
            Reference::Entity(e) => &e.uid,
            Reference::Collection(c) => &c.uid,
        }
    }

    pub fn origin(&self) -> &ReferenceOrigin {
        match self {
            Reference::Entity(e) => &e.origin,
            Reference::Collection(c) => &c.origin,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityReference> {
        match self {
            Reference::Entity(e) => Some(e),
            Reference::Collection(_) => None,
        }
    }

    pub fn as_collection(&self) -> Option<&CollectionReference> {
        match self {
            Reference::Collection(c) => Some(c),
            Reference::Entity(_) => None,
        }
    }
}

// ============================================================================
// Query spaces and joins
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySpaceKind {
    Entity,
    Collection,
}

/// One table participation in the statement.
#[derive(Debug, Clone)]
pub struct QuerySpace {
    pub uid: QuerySpaceUid,
    pub kind: QuerySpaceKind,
    pub reference: ReferenceId,
    /// Indexes into [`LoadPlan::joins`] of joins leaving this space.
    pub joins: Vec<usize>,
    /// Belongs to a fetch loaded by a later query; never joined here.
    pub deferred: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRole {
    /// Owner to associated entity or collection.
    Association,
    /// Entity to a many-to-one component of its identifier.
    Identifier,
    CollectionElement,
    CollectionIndex,
}

/// Directed join between two query spaces.
#[derive(Debug, Clone)]
pub struct Join {
    pub lhs: QuerySpaceUid,
    pub rhs: QuerySpaceUid,
    pub join_type: JoinType,
    pub lhs_columns: Vec<String>,
    pub rhs_columns: Vec<String>,
    pub role: JoinRole,
}

impl Join {
    pub fn is_right_hand_side_required(&self) -> bool {
        self.join_type == JoinType::Inner
    }
}

// ============================================================================
// LoadPlan
// ============================================================================

/// What graph one load materializes.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    references: Vec<Reference>,
    query_spaces: Vec<QuerySpace>,
    joins: Vec<Join>,
    space_index: HashMap<QuerySpaceUid, usize>,
}

impl LoadPlan {
    /// The root return.
    pub fn root(&self) -> ReferenceId {
        ReferenceId(0)
    }

    /// Look up a reference.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not produced for this plan.
    pub fn reference(&self, id: ReferenceId) -> &Reference {
        &self.references[id.0]
    }

    pub fn entity(&self, id: ReferenceId) -> Option<&EntityReference> {
        self.references.get(id.0).and_then(Reference::as_entity)
    }

    pub fn collection(&self, id: ReferenceId) -> Option<&CollectionReference> {
        self.references.get(id.0).and_then(Reference::as_collection)
    }

    pub fn references(&self) -> impl Iterator<Item = (ReferenceId, &Reference)> {
        self.references
            .iter()
            .enumerate()
            .map(|(i, r)| (ReferenceId(i), r))
    }

    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    #[allow(clippy::result_large_err)]
    pub fn query_space(&self, uid: &QuerySpaceUid) -> Result<&QuerySpace> {
        self.space_index
            .get(uid)
            .and_then(|i| self.query_spaces.get(*i))
            .ok_or_else(|| {
                Error::mapping(
                    MappingErrorKind::UnregisteredQuerySpace,
                    format!("query space {} is not registered in the load plan", uid),
                )
            })
    }

    pub fn query_spaces(&self) -> &[QuerySpace] {
        &self.query_spaces
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    /// Joins leaving `uid`, in the order they were declared.
    #[allow(clippy::result_large_err)]
    pub fn joins_from(&self, uid: &QuerySpaceUid) -> Result<Vec<&Join>> {
        let space = self.query_space(uid)?;
        Ok(space
            .joins
            .iter()
            .filter_map(|i| self.joins.get(*i))
            .collect())
    }

    /// Query spaces in the statement that no join leads into.
    pub fn root_query_spaces(&self) -> Vec<&QuerySpace> {
        self.query_spaces
            .iter()
            .filter(|s| !s.deferred && !self.joins.iter().any(|j| j.rhs == s.uid))
            .collect()
    }

    /// Check the structural invariants of the plan.
    ///
    /// - exactly one root query space, owned by the root return
    /// - every reference and join endpoint is a registered query space
    /// - every other joined query space is reached by exactly one join
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        let Some(root) = self.references.first() else {
            return Err(invalid("load plan has no return"));
        };
        if root.origin() != &ReferenceOrigin::Return {
            return Err(invalid("first reference of a load plan must be its return"));
        }
        if let Some(extra) = self.references.iter().skip(1).find(|r| {
            r.origin() == &ReferenceOrigin::Return
        }) {
            return Err(invalid(format!(
                "load plan declares more than one return ({})",
                extra.uid()
            )));
        }

        for (_, reference) in self.references() {
            self.query_space(reference.uid())?;
        }

        let mut incoming: HashMap<&QuerySpaceUid, usize> = HashMap::new();
        for join in &self.joins {
            let lhs = self.query_space(&join.lhs)?;
            let rhs = self.query_space(&join.rhs)?;
            if lhs.deferred || rhs.deferred {
                return Err(invalid(format!(
                    "join {} -> {} touches a deferred query space",
                    join.lhs, join.rhs
                )));
            }
            if join.lhs_columns.len() != join.rhs_columns.len() || join.lhs_columns.is_empty() {
                return Err(Error::mapping(
                    MappingErrorKind::MissingColumns,
                    format!("join {} -> {} has mismatched columns", join.lhs, join.rhs),
                ));
            }
            *incoming.entry(&join.rhs).or_default() += 1;
        }

        if let Some((uid, _)) = incoming.iter().find(|(_, n)| **n > 1) {
            return Err(invalid(format!(
                "query space {} is joined more than once",
                uid
            )));
        }

        let roots = self.root_query_spaces();
        match roots.as_slice() {
            [only] if &only.uid == root.uid() => Ok(()),
            [only] => Err(invalid(format!(
                "root query space {} does not belong to the return",
                only.uid
            ))),
            _ => Err(invalid(format!(
                "load plan must have exactly one root query space, found {}",
                roots.len()
            ))),
        }
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::mapping(MappingErrorKind::InvalidLoadPlan, message)
}

// ============================================================================
// Builder
// ============================================================================

/// Builds a [`LoadPlan`] against a [`Metamodel`].
#[derive(Debug)]
pub struct LoadPlanBuilder<'m> {
    metamodel: &'m Metamodel,
    references: Vec<Reference>,
    query_spaces: Vec<QuerySpace>,
    joins: Vec<Join>,
    space_index: HashMap<QuerySpaceUid, usize>,
}

impl<'m> LoadPlanBuilder<'m> {
    pub fn new(metamodel: &'m Metamodel) -> Self {
        Self {
            metamodel,
            references: Vec::new(),
            query_spaces: Vec::new(),
            joins: Vec::new(),
            space_index: HashMap::new(),
        }
    }

    /// Root return loading entities of `entity_name`.
    #[allow(clippy::result_large_err)]
    pub fn entity_return(&mut self, entity_name: &str) -> Result<ReferenceId> {
        self.ensure_no_return()?;
        let persister = self.metamodel.entity(entity_name)?;
        Ok(self.push_entity(persister, ReferenceOrigin::Return, false))
    }

    /// Root return loading collections of `role`.
    #[allow(clippy::result_large_err)]
    pub fn collection_return(&mut self, role: &str) -> Result<ReferenceId> {
        self.ensure_no_return()?;
        let persister = self.metamodel.collection(role)?;
        let id = self.push_collection(persister, ReferenceOrigin::Return, false);
        self.add_collection_graphs(id)?;
        Ok(id)
    }

    /// Fetch the entity-valued `property` of `source`.
    #[allow(clippy::result_large_err)]
    pub fn entity_fetch(
        &mut self,
        source: ReferenceId,
        property: &str,
        strategy: FetchStrategy,
    ) -> Result<ReferenceId> {
        let owner = self.fetch_source(source)?;
        let mapping = owner.property(property).cloned().ok_or_else(|| {
            unknown_property(owner.entity_name(), property)
        })?;

        let (target_name, lhs_columns, rhs_from_target) = match &mapping.kind {
            PropertyKind::ManyToOne { entity_name, .. } => {
                (entity_name.clone(), mapping.columns.clone(), None)
            }
            PropertyKind::OneToOne {
                entity_name,
                foreign_key_columns,
            } => (
                entity_name.clone(),
                owner.identifier_columns().to_vec(),
                Some(foreign_key_columns.clone()).filter(|c| !c.is_empty()),
            ),
            _ => {
                return Err(Error::mapping(
                    MappingErrorKind::UnknownProperty,
                    format!(
                        "{}.{} is not an entity association",
                        owner.entity_name(),
                        property
                    ),
                ));
            }
        };
        let target = self.metamodel.entity(&target_name)?;
        let rhs_columns =
            rhs_from_target.unwrap_or_else(|| target.identifier_columns().to_vec());

        let origin = ReferenceOrigin::Fetch {
            source,
            property: property.to_string(),
            strategy,
        };
        let joined = strategy.is_joined();
        let id = self.push_entity(target, origin, !joined);
        self.attach_fetch(source, id);
        if joined {
            let join_type = self.effective_join_type(source, strategy.join_type);
            self.add_join(source, id, join_type, lhs_columns, rhs_columns, JoinRole::Association)?;
        }
        Ok(id)
    }

    /// Fetch a many-to-one component of `source`'s composite identifier.
    #[allow(clippy::result_large_err)]
    pub fn identifier_fetch(&mut self, source: ReferenceId, property: &str) -> Result<ReferenceId> {
        let owner = self.fetch_source(source)?;
        let mapping = owner
            .identifier_properties()
            .iter()
            .find(|p| p.name == property)
            .cloned()
            .ok_or_else(|| unknown_property(owner.entity_name(), property))?;
        let target_name = mapping
            .associated_entity()
            .map(str::to_string)
            .ok_or_else(|| unknown_property(owner.entity_name(), property))?;
        let target = self.metamodel.entity(&target_name)?;
        let rhs_columns = target.identifier_columns().to_vec();

        let origin = ReferenceOrigin::IdentifierFetch {
            source,
            property: property.to_string(),
        };
        let id = self.push_entity(target, origin, false);
        if let Some(Reference::Entity(e)) = self.references.get_mut(source.0) {
            e.identifier_fetches.push(id);
        }
        let join_type = self.effective_join_type(source, JoinType::Inner);
        self.add_join(source, id, join_type, mapping.columns, rhs_columns, JoinRole::Identifier)?;
        Ok(id)
    }

    /// Fetch the collection-valued `property` of `source`.
    ///
    /// Entity elements and entity map keys get their own references, which
    /// further fetches can hang off.
    #[allow(clippy::result_large_err)]
    pub fn collection_fetch(
        &mut self,
        source: ReferenceId,
        property: &str,
        strategy: FetchStrategy,
    ) -> Result<ReferenceId> {
        let owner = self.fetch_source(source)?;
        let role = owner
            .property(property)
            .and_then(|p| p.collection_role())
            .map(str::to_string)
            .ok_or_else(|| unknown_property(owner.entity_name(), property))?;
        let lhs_columns = owner.identifier_columns().to_vec();
        let persister = self.metamodel.collection(&role)?;
        let rhs_columns = persister.key_columns().to_vec();

        let origin = ReferenceOrigin::Fetch {
            source,
            property: property.to_string(),
            strategy,
        };
        let joined = strategy.is_joined();
        let id = self.push_collection(persister, origin, !joined);
        self.attach_fetch(source, id);
        if joined {
            let join_type = self.effective_join_type(source, strategy.join_type);
            self.add_join(source, id, join_type, lhs_columns, rhs_columns, JoinRole::Association)?;
            self.add_collection_graphs(id)?;
        }
        Ok(id)
    }

    /// Element graph of a collection reference, if its elements are entities.
    pub fn element_of(&self, collection: ReferenceId) -> Option<ReferenceId> {
        self.references
            .get(collection.0)
            .and_then(Reference::as_collection)
            .and_then(|c| c.element)
    }

    /// Index graph of a collection reference, if its map keys are entities.
    pub fn index_of(&self, collection: ReferenceId) -> Option<ReferenceId> {
        self.references
            .get(collection.0)
            .and_then(Reference::as_collection)
            .and_then(|c| c.index)
    }

    /// Finish the plan and check its invariants.
    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<LoadPlan> {
        let plan = LoadPlan {
            references: self.references,
            query_spaces: self.query_spaces,
            joins: self.joins,
            space_index: self.space_index,
        };
        plan.validate()?;
        tracing::trace!(
            references = plan.references.len(),
            joins = plan.joins.len(),
            "built load plan"
        );
        Ok(plan)
    }

    // ---- internals ----

    #[allow(clippy::result_large_err)]
    fn ensure_no_return(&self) -> Result<()> {
        if self.references.is_empty() {
            Ok(())
        } else {
            Err(invalid("load plan already has a return"))
        }
    }

    #[allow(clippy::result_large_err)]
    fn fetch_source(&self, source: ReferenceId) -> Result<Arc<dyn EntityPersister>> {
        let Some(reference) = self.references.get(source.0) else {
            return Err(invalid(format!("unknown fetch source {}", source)));
        };
        let Reference::Entity(entity) = reference else {
            return Err(invalid(format!(
                "fetch source {} is a collection; fetch from its element instead",
                source
            )));
        };
        let deferred = self
            .space_index
            .get(&entity.uid)
            .and_then(|i| self.query_spaces.get(*i))
            .is_some_and(|s| s.deferred);
        if deferred {
            return Err(invalid(format!(
                "cannot fetch through {}, which is not joined",
                entity.uid
            )));
        }
        Ok(Arc::clone(&entity.persister))
    }

    fn next_uid(&self) -> QuerySpaceUid {
        QuerySpaceUid::generated(self.query_spaces.len())
    }

    fn push_entity(
        &mut self,
        persister: Arc<dyn EntityPersister>,
        origin: ReferenceOrigin,
        deferred: bool,
    ) -> ReferenceId {
        let uid = self.next_uid();
        let id = ReferenceId(self.references.len());
        self.references.push(Reference::Entity(EntityReference {
            uid: uid.clone(),
            persister,
            origin,
            fetches: Vec::new(),
            identifier_fetches: Vec::new(),
        }));
        self.push_space(uid, QuerySpaceKind::Entity, id, deferred);
        id
    }

    fn push_collection(
        &mut self,
        persister: Arc<dyn CollectionPersister>,
        origin: ReferenceOrigin,
        deferred: bool,
    ) -> ReferenceId {
        let uid = self.next_uid();
        let id = ReferenceId(self.references.len());
        self.references
            .push(Reference::Collection(CollectionReference {
                uid: uid.clone(),
                persister,
                origin,
                element: None,
                index: None,
            }));
        self.push_space(uid, QuerySpaceKind::Collection, id, deferred);
        id
    }

    fn push_space(
        &mut self,
        uid: QuerySpaceUid,
        kind: QuerySpaceKind,
        reference: ReferenceId,
        deferred: bool,
    ) {
        self.space_index.insert(uid.clone(), self.query_spaces.len());
        self.query_spaces.push(QuerySpace {
            uid,
            kind,
            reference,
            joins: Vec::new(),
            deferred,
        });
    }

    fn attach_fetch(&mut self, source: ReferenceId, fetch: ReferenceId) {
        if let Some(Reference::Entity(e)) = self.references.get_mut(source.0) {
            e.fetches.push(fetch);
        }
    }

    /// A child of an outer-joined parent cannot be inner-joined without
    /// dropping the parent's rows.
    fn effective_join_type(&self, source: ReferenceId, requested: JoinType) -> JoinType {
        let Some(uid) = self.references.get(source.0).map(Reference::uid) else {
            return requested;
        };
        let parent_outer = self
            .joins
            .iter()
            .any(|j| &j.rhs == uid && j.join_type.is_outer());
        if parent_outer {
            JoinType::Left
        } else {
            requested
        }
    }

    #[allow(clippy::result_large_err)]
    fn add_join(
        &mut self,
        lhs: ReferenceId,
        rhs: ReferenceId,
        join_type: JoinType,
        lhs_columns: Vec<String>,
        rhs_columns: Vec<String>,
        role: JoinRole,
    ) -> Result<()> {
        let lhs_uid = self.references[lhs.0].uid().clone();
        let rhs_uid = self.references[rhs.0].uid().clone();
        if lhs_columns.is_empty() || lhs_columns.len() != rhs_columns.len() {
            return Err(Error::mapping(
                MappingErrorKind::MissingColumns,
                format!(
                    "cannot join {} to {}: {:?} vs {:?}",
                    lhs_uid, rhs_uid, lhs_columns, rhs_columns
                ),
            ));
        }
        let index = self.joins.len();
        self.joins.push(Join {
            lhs: lhs_uid.clone(),
            rhs: rhs_uid,
            join_type,
            lhs_columns,
            rhs_columns,
            role,
        });
        if let Some(space) = self
            .space_index
            .get(&lhs_uid)
            .and_then(|i| self.query_spaces.get_mut(*i))
        {
            space.joins.push(index);
        }
        Ok(())
    }

    /// Element and index graphs for a joined collection reference.
    #[allow(clippy::result_large_err)]
    fn add_collection_graphs(&mut self, collection: ReferenceId) -> Result<()> {
        let Some(persister) = self
            .references
            .get(collection.0)
            .and_then(Reference::as_collection)
            .map(|c| Arc::clone(&c.persister))
        else {
            return Ok(());
        };

        if let Some(element_name) = persister.element_kind().entity_name() {
            let element = self.metamodel.entity(element_name)?;
            let rhs_columns = element.identifier_columns().to_vec();
            let lhs_columns = match persister.element_kind() {
                ElementKind::OneToMany { .. } if persister.element_columns().is_empty() => {
                    rhs_columns.clone()
                }
                _ => persister.element_columns().to_vec(),
            };
            let id = self.push_entity(
                element,
                ReferenceOrigin::CollectionElement { collection },
                false,
            );
            if let Some(Reference::Collection(c)) = self.references.get_mut(collection.0) {
                c.element = Some(id);
            }
            self.add_join(
                collection,
                id,
                JoinType::Left,
                lhs_columns,
                rhs_columns,
                JoinRole::CollectionElement,
            )?;
        }

        if let Some(index_name) = persister.index_entity_name() {
            let index_entity = self.metamodel.entity(index_name)?;
            let rhs_columns = index_entity.identifier_columns().to_vec();
            let lhs_columns = persister.index_columns().to_vec();
            let id = self.push_entity(
                index_entity,
                ReferenceOrigin::CollectionIndex { collection },
                false,
            );
            if let Some(Reference::Collection(c)) = self.references.get_mut(collection.0) {
                c.index = Some(id);
            }
            self.add_join(
                collection,
                id,
                JoinType::Left,
                lhs_columns,
                rhs_columns,
                JoinRole::CollectionIndex,
            )?;
        }
        Ok(())
    }
}

fn unknown_property(entity_name: &str, property: &str) -> Error {
    Error::mapping(
        MappingErrorKind::UnknownProperty,
        format!("{} has no property {}", entity_name, property),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadplan_core::{CollectionMapping, CollectionNature, EntityMapping};

    fn metamodel() -> Metamodel {
        let mut model = Metamodel::new();
        model
            .add_entity(
                EntityMapping::new("Order", "orders")
                    .id("id")
                    .property("number", "order_number")
                    .many_to_one("customer", "customer_id", "Customer")
                    .collection("lineItems", "Order.lineItems")
                    .collection("tags", "Order.tags"),
            )
            .unwrap();
        model
            .add_entity(
                EntityMapping::new("Customer", "customers")
                    .id("id")
                    .property("name", "name")
                    .many_to_one("region", "region_id", "Region"),
            )
            .unwrap();
        model
            .add_entity(EntityMapping::new("Region", "regions").id("id"))
            .unwrap();
        model
            .add_entity(
                EntityMapping::new("LineItem", "line_items")
                    .id("id")
                    .property("position", "position")
                    .many_to_one("order", "order_id", "Order"),
            )
            .unwrap();
        model
            .add_collection(
                CollectionMapping::one_to_many(
                    "Order.lineItems",
                    "Order",
                    "LineItem",
                    "line_items",
                    CollectionNature::Bag,
                )
                .key("order_id"),
            )
            .unwrap();
        model
            .add_collection(
                CollectionMapping::basic("Order.tags", "Order", "order_tags", CollectionNature::Set)
                    .key("order_id")
                    .element("tag"),
            )
            .unwrap();
        model
    }

    // ==== Building ====

    #[test]
    fn test_entity_return_with_fetches() {
        let model = metamodel();
        let mut builder = LoadPlanBuilder::new(&model);
        let order = builder.entity_return("Order").unwrap();
        let customer = builder
            .entity_fetch(order, "customer", FetchStrategy::inner_join())
            .unwrap();
        let items = builder
            .collection_fetch(order, "lineItems", FetchStrategy::outer_join())
            .unwrap();
        let element = builder.element_of(items).unwrap();
        let plan = builder.build().unwrap();

        assert_eq!(plan.root(), order);
        assert_eq!(plan.entity(order).unwrap().fetches, vec![customer, items]);
        assert_eq!(plan.joins().len(), 3);
        assert_eq!(plan.root_query_spaces().len(), 1);

        let element_ref = plan.entity(element).unwrap();
        assert_eq!(element_ref.persister.entity_name(), "LineItem");
        assert_eq!(
            element_ref.origin,
            ReferenceOrigin::CollectionElement { collection: items }
        );

        let root_joins = plan.joins_from(plan.reference(order).uid()).unwrap();
        assert_eq!(root_joins.len(), 2);
        assert_eq!(root_joins[0].join_type, JoinType::Inner);
        assert_eq!(root_joins[0].lhs_columns, vec!["customer_id".to_string()]);
        assert_eq!(root_joins[1].rhs_columns, vec!["order_id".to_string()]);
    }

    #[test]
    fn test_child_of_outer_join_is_outer() {
        let model = metamodel();
        let mut builder = LoadPlanBuilder::new(&model);
        let order = builder.entity_return("Order").unwrap();
        let customer = builder
            .entity_fetch(order, "customer", FetchStrategy::outer_join())
            .unwrap();
        builder
            .entity_fetch(customer, "region", FetchStrategy::inner_join())
            .unwrap();
        let plan = builder.build().unwrap();
        assert!(plan.joins().iter().all(|j| j.join_type == JoinType::Left));
    }

    #[test]
    fn test_deferred_fetch_has_no_join() {
        let model = metamodel();
        let mut builder = LoadPlanBuilder::new(&model);
        let order = builder.entity_return("Order").unwrap();
        let tags = builder
            .collection_fetch(order, "tags", FetchStrategy::subselect())
            .unwrap();
        let plan = builder.build().unwrap();

        assert!(plan.joins().is_empty());
        let space = plan.query_space(plan.reference(tags).uid()).unwrap();
        assert!(space.deferred);
        assert_eq!(plan.root_query_spaces().len(), 1);
    }

    #[test]
    fn test_cannot_fetch_through_deferred() {
        let model = metamodel();
        let mut builder = LoadPlanBuilder::new(&model);
        let order = builder.entity_return("Order").unwrap();
        let customer = builder
            .entity_fetch(order, "customer", FetchStrategy::select())
            .unwrap();
        let err = builder
            .entity_fetch(customer, "region", FetchStrategy::inner_join())
            .unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::InvalidLoadPlan));
    }

    // ==== Mapping errors ====

    #[test]
    fn test_unknown_property() {
        let model = metamodel();
        let mut builder = LoadPlanBuilder::new(&model);
        let order = builder.entity_return("Order").unwrap();
        let err = builder
            .entity_fetch(order, "nope", FetchStrategy::inner_join())
            .unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::UnknownProperty));

        let err = builder
            .entity_fetch(order, "number", FetchStrategy::inner_join())
            .unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::UnknownProperty));
    }

    #[test]
    fn test_second_return_rejected() {
        let model = metamodel();
        let mut builder = LoadPlanBuilder::new(&model);
        builder.entity_return("Order").unwrap();
        let err = builder.entity_return("Customer").unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::InvalidLoadPlan));
    }

    #[test]
    fn test_unknown_persister() {
        let model = metamodel();
        let mut builder = LoadPlanBuilder::new(&model);
        let err = builder.collection_return("Order.nothing").unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::UnknownPersister));
    }

    // ==== Validation ====

    #[test]
    fn test_validate_rejects_two_roots() {
        let model = metamodel();
        let mut builder = LoadPlanBuilder::new(&model);
        let order = builder.entity_return("Order").unwrap();
        builder
            .entity_fetch(order, "customer", FetchStrategy::inner_join())
            .unwrap();
        let mut plan = builder.build().unwrap();

        // Detach the customer space from its join: it becomes a second root.
        plan.joins.clear();
        for space in &mut plan.query_spaces {
            space.joins.clear();
        }
        let err = plan.validate().unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::InvalidLoadPlan));
    }

    #[test]
    fn test_validate_rejects_duplicate_join() {
        let model = metamodel();
        let mut builder = LoadPlanBuilder::new(&model);
        let order = builder.entity_return("Order").unwrap();
        builder
            .entity_fetch(order, "customer", FetchStrategy::inner_join())
            .unwrap();
        let mut plan = builder.build().unwrap();
        let duplicate = plan.joins[0].clone();
        plan.joins.push(duplicate);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unregistered_uid() {
        let model = metamodel();
        let mut builder = LoadPlanBuilder::new(&model);
        let order = builder.entity_return("Order").unwrap();
        builder
            .entity_fetch(order, "customer", FetchStrategy::inner_join())
            .unwrap();
        let mut plan = builder.build().unwrap();
        plan.joins[0].rhs = QuerySpaceUid::new("<missing>");
        let err = plan.validate().unwrap_err();
        assert_eq!(
            err.mapping_kind(),
            Some(MappingErrorKind::UnregisteredQuerySpace)
        );
    }

    // ==== Strategy ====

    #[test]
    fn test_fetch_strategy_flags() {
        assert!(FetchStrategy::inner_join().is_joined());
        assert!(!FetchStrategy::select().is_joined());
        assert!(FetchStrategy::subselect().is_delayed_subselect());
        assert!(!FetchStrategy::subselect().immediate().is_delayed_subselect());
        assert!(!FetchStrategy::batch().is_delayed_subselect());
    }
}
