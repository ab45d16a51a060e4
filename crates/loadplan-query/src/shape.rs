//! Per-shape SQL rules for root returns and fetched collections.
//!
//! A load is one of three shapes. Each shape is described by a record of
//! four rules (root alias, SELECT, FROM, ORDER BY) that the load-query
//! orchestrator and the fetch processor both call.

use loadplan_core::error::MappingErrorKind;
use loadplan_core::{CollectionPersister, Error, Result};

use crate::alias::AliasResolutionContext;
use crate::plan::{CollectionReference, EntityReference, LoadPlan, Reference, ReferenceId};

/// The kind of root a load query is built around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadShape {
    /// Entities by key (or batch of keys).
    Entity,
    /// A one-to-many collection by owner key: the element table is the
    /// collection table.
    OneToManyCollection,
    /// A collection of values, or a many-to-many through a link table.
    BasicCollection,
}

impl LoadShape {
    pub fn for_collection(persister: &dyn CollectionPersister) -> Self {
        if persister.is_one_to_many() {
            LoadShape::OneToManyCollection
        } else {
            LoadShape::BasicCollection
        }
    }

    /// Shape of a plan's root return.
    pub fn of_plan(plan: &LoadPlan) -> Self {
        match plan.reference(plan.root()) {
            Reference::Entity(_) => LoadShape::Entity,
            Reference::Collection(c) => Self::for_collection(c.persister.as_ref()),
        }
    }

    pub(crate) fn rules(self) -> &'static ShapeRules {
        match self {
            LoadShape::Entity => &ENTITY_RULES,
            LoadShape::OneToManyCollection => &ONE_TO_MANY_RULES,
            LoadShape::BasicCollection => &BASIC_COLLECTION_RULES,
        }
    }
}

/// Inputs every rule reads.
pub(crate) struct ShapeContext<'a> {
    pub plan: &'a LoadPlan,
    pub reference: ReferenceId,
    pub aliases: &'a AliasResolutionContext,
}

type Rule<T> = fn(&ShapeContext<'_>) -> Result<T>;

pub(crate) struct ShapeRules {
    pub root_alias: Rule<String>,
    pub select: Rule<Vec<String>>,
    pub from: Rule<String>,
    pub order_by: Rule<Vec<String>>,
}

static ENTITY_RULES: ShapeRules = ShapeRules {
    root_alias: entity_root_alias,
    select: entity_select,
    from: entity_from,
    order_by: no_order,
};

static ONE_TO_MANY_RULES: ShapeRules = ShapeRules {
    root_alias: one_to_many_root_alias,
    select: one_to_many_select,
    from: one_to_many_from,
    order_by: one_to_many_order_by,
};

static BASIC_COLLECTION_RULES: ShapeRules = ShapeRules {
    root_alias: basic_root_alias,
    select: basic_select,
    from: basic_from,
    order_by: basic_order_by,
};

// ---- entity ----

#[allow(clippy::result_large_err)]
fn entity_ref<'a>(ctx: &ShapeContext<'a>) -> Result<&'a EntityReference> {
    ctx.plan.entity(ctx.reference).ok_or_else(|| {
        Error::mapping(
            MappingErrorKind::InvalidLoadPlan,
            format!("reference {} is not an entity", ctx.reference),
        )
    })
}

#[allow(clippy::result_large_err)]
fn entity_root_alias(ctx: &ShapeContext<'_>) -> Result<String> {
    let entity = entity_ref(ctx)?;
    Ok(ctx
        .aliases
        .resolve_entity_reference_aliases(&entity.uid)?
        .table_alias
        .clone())
}

#[allow(clippy::result_large_err)]
fn entity_select(ctx: &ShapeContext<'_>) -> Result<Vec<String>> {
    let entity = entity_ref(ctx)?;
    let aliases = ctx.aliases.resolve_entity_reference_aliases(&entity.uid)?;
    Ok(vec![entity.persister.select_fragment(
        &aliases.table_alias,
        aliases.column_aliases.suffix(),
    )])
}

#[allow(clippy::result_large_err)]
fn entity_from(ctx: &ShapeContext<'_>) -> Result<String> {
    let entity = entity_ref(ctx)?;
    let alias = entity_root_alias(ctx)?;
    Ok(join_nonempty(&[
        entity.persister.from_table_fragment(&alias),
        entity.persister.from_join_fragment(&alias, true),
    ]))
}

#[allow(clippy::result_large_err)]
fn no_order(_ctx: &ShapeContext<'_>) -> Result<Vec<String>> {
    Ok(Vec::new())
}

// ---- collections ----

#[allow(clippy::result_large_err)]
fn collection_ref<'a>(ctx: &ShapeContext<'a>) -> Result<&'a CollectionReference> {
    ctx.plan.collection(ctx.reference).ok_or_else(|| {
        Error::mapping(
            MappingErrorKind::InvalidLoadPlan,
            format!("reference {} is not a collection", ctx.reference),
        )
    })
}

#[allow(clippy::result_large_err)]
fn element_ref<'a>(ctx: &ShapeContext<'a>) -> Result<&'a EntityReference> {
    let collection = collection_ref(ctx)?;
    collection
        .element
        .and_then(|id| ctx.plan.entity(id))
        .ok_or_else(|| {
            Error::mapping(
                MappingErrorKind::InvalidLoadPlan,
                format!(
                    "collection {} has no entity element graph",
                    collection.persister.role()
                ),
            )
        })
}

/// SELECT fragments for entity elements and entity map keys.
#[allow(clippy::result_large_err)]
fn graph_selects(ctx: &ShapeContext<'_>, out: &mut Vec<String>) -> Result<()> {
    let collection = collection_ref(ctx)?;
    for id in collection.element.iter().chain(collection.index.iter()) {
        if let Some(entity) = ctx.plan.entity(*id) {
            let aliases = ctx.aliases.resolve_entity_reference_aliases(&entity.uid)?;
            out.push(
                entity
                    .persister
                    .select_fragment(&aliases.table_alias, aliases.column_aliases.suffix()),
            );
        }
    }
    Ok(())
}

/// The element entity's alias: no separate collection table exists.
#[allow(clippy::result_large_err)]
fn one_to_many_root_alias(ctx: &ShapeContext<'_>) -> Result<String> {
    let element = element_ref(ctx)?;
    Ok(ctx
        .aliases
        .resolve_entity_reference_aliases(&element.uid)?
        .table_alias
        .clone())
}

#[allow(clippy::result_large_err)]
fn one_to_many_select(ctx: &ShapeContext<'_>) -> Result<Vec<String>> {
    let collection = collection_ref(ctx)?;
    let aliases = ctx
        .aliases
        .resolve_collection_reference_aliases(&collection.uid)?;
    let alias = one_to_many_root_alias(ctx)?;
    let mut out = vec![collection
        .persister
        .one_to_many_select_fragment(&alias, aliases.collection_aliases.suffix())];
    graph_selects(ctx, &mut out)?;
    Ok(out)
}

#[allow(clippy::result_large_err)]
fn one_to_many_from(ctx: &ShapeContext<'_>) -> Result<String> {
    let element = element_ref(ctx)?;
    let alias = one_to_many_root_alias(ctx)?;
    Ok(join_nonempty(&[
        element.persister.from_table_fragment(&alias),
        element.persister.from_join_fragment(&alias, true),
    ]))
}

#[allow(clippy::result_large_err)]
fn one_to_many_order_by(ctx: &ShapeContext<'_>) -> Result<Vec<String>> {
    let collection = collection_ref(ctx)?;
    let alias = one_to_many_root_alias(ctx)?;
    Ok(collection
        .persister
        .order_by_fragment(&alias)
        .into_iter()
        .collect())
}

#[allow(clippy::result_large_err)]
fn basic_root_alias(ctx: &ShapeContext<'_>) -> Result<String> {
    let collection = collection_ref(ctx)?;
    Ok(ctx
        .aliases
        .resolve_collection_reference_aliases(&collection.uid)?
        .collection_table_alias
        .clone())
}

#[allow(clippy::result_large_err)]
fn basic_select(ctx: &ShapeContext<'_>) -> Result<Vec<String>> {
    let collection = collection_ref(ctx)?;
    let aliases = ctx
        .aliases
        .resolve_collection_reference_aliases(&collection.uid)?;
    let mut out = vec![collection.persister.select_fragment(
        &aliases.collection_table_alias,
        aliases.collection_aliases.suffix(),
    )];
    graph_selects(ctx, &mut out)?;
    Ok(out)
}

#[allow(clippy::result_large_err)]
fn basic_from(ctx: &ShapeContext<'_>) -> Result<String> {
    let collection = collection_ref(ctx)?;
    let alias = basic_root_alias(ctx)?;
    Ok(format!("{} {}", collection.persister.table_name(), alias))
}

/// Many-to-many ordering first, then the collection's own ordering.
#[allow(clippy::result_large_err)]
fn basic_order_by(ctx: &ShapeContext<'_>) -> Result<Vec<String>> {
    let collection = collection_ref(ctx)?;
    let aliases = ctx
        .aliases
        .resolve_collection_reference_aliases(&collection.uid)?;
    let mut out = Vec::new();
    if let Some(element_alias) = &aliases.element_table_alias {
        out.extend(
            collection
                .persister
                .many_to_many_order_by_fragment(element_alias),
        );
    }
    out.extend(
        collection
            .persister
            .order_by_fragment(&aliases.collection_table_alias),
    );
    Ok(out)
}

fn join_nonempty(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
