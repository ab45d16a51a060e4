//! Compiled load queries.
//!
//! [`LoadQueryDetails`] turns a validated [`LoadPlan`] into one SELECT
//! statement plus the [`ReaderPlan`] that reads its rows back. Entity loads,
//! one-to-many collection loads and basic (value or many-to-many)
//! collection loads all go through the same compilation; they differ only in
//! the [`LoadShape`] rules used for the root alias, SELECT, FROM and ORDER BY.
//!
//! A compiled query holds no per-execution state and can be shared across
//! threads and reused for any number of key sets.

use std::sync::Arc;

use loadplan_core::error::MappingErrorKind;
use loadplan_core::{Dialect, Error, LockMode, Result, Value};

use crate::alias::{AliasResolutionContext, ElementGraph};
use crate::collector::{EntityLink, EntityReaderSpec, ReaderCollector, ReaderPlan, RootReader};
use crate::config::QueryBuildingParameters;
use crate::plan::{LoadPlan, Reference};
use crate::processor::{FetchStats, LoadQueryJoinAndFetchProcessor};
use crate::shape::{LoadShape, ShapeContext};
use crate::statement::SelectStatementBuilder;

/// SQL and reader layout for loading one plan by key.
#[derive(Debug, Clone)]
pub struct LoadQueryDetails {
    plan: LoadPlan,
    shape: LoadShape,
    sql: String,
    root_table_alias: String,
    key_columns: Vec<String>,
    batch_size: usize,
    dialect: Dialect,
    fetch_stats: FetchStats,
    reader_plan: ReaderPlan,
    aliases: AliasResolutionContext,
}

impl LoadQueryDetails {
    /// Compile a load of the plan's root entity by its identifier columns.
    #[allow(clippy::result_large_err)]
    pub fn for_entity(plan: LoadPlan, params: &QueryBuildingParameters) -> Result<Self> {
        Self::for_entity_by_columns(plan, None, params)
    }

    /// Compile a load of the plan's root entity restricted on `key_columns`,
    /// which may be any unique column set. `None` uses the identifier.
    #[allow(clippy::result_large_err)]
    pub fn for_entity_by_columns(
        plan: LoadPlan,
        key_columns: Option<Vec<String>>,
        params: &QueryBuildingParameters,
    ) -> Result<Self> {
        if plan.entity(plan.root()).is_none() {
            return Err(Error::mapping(
                MappingErrorKind::InvalidLoadPlan,
                "entity load requires an entity return",
            ));
        }
        Self::compile(plan, key_columns, params)
    }

    /// Compile a load of the plan's root collection by owner key.
    #[allow(clippy::result_large_err)]
    pub fn for_collection(plan: LoadPlan, params: &QueryBuildingParameters) -> Result<Self> {
        if plan.collection(plan.root()).is_none() {
            return Err(Error::mapping(
                MappingErrorKind::InvalidLoadPlan,
                "collection load requires a collection return",
            ));
        }
        Self::compile(plan, None, params)
    }

    pub fn sql_statement(&self) -> &str {
        &self.sql
    }

    /// Alias the key restriction is applied to. For a one-to-many load this
    /// is the element entity's alias.
    pub fn root_table_alias(&self) -> &str {
        &self.root_table_alias
    }

    pub fn shape(&self) -> LoadShape {
        self.shape
    }

    pub fn load_plan(&self) -> &LoadPlan {
        &self.plan
    }

    pub fn reader_plan(&self) -> &ReaderPlan {
        &self.reader_plan
    }

    pub fn fetch_stats(&self) -> &FetchStats {
        &self.fetch_stats
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Every table alias used in the statement.
    pub fn table_aliases(&self) -> Vec<&str> {
        self.aliases.table_aliases()
    }

    /// Whether a single known root identity may seed the root entity key
    /// instead of reading it from the row.
    pub fn should_use_optional_entity_information(&self) -> bool {
        self.shape == LoadShape::Entity && self.batch_size == 1
    }

    /// Flatten `keys` into positional bind values for the statement.
    ///
    /// The statement always has `batch_size` key slots; a shorter key list
    /// is padded by repeating its last key.
    #[allow(clippy::result_large_err)]
    pub fn bind_values(&self, keys: &[Vec<Value>]) -> Result<Vec<Value>> {
        let Some(last) = keys.last() else {
            return Err(batch_error("no keys to bind"));
        };
        if keys.len() > self.batch_size {
            return Err(batch_error(format!(
                "{} keys do not fit a batch of {}",
                keys.len(),
                self.batch_size
            )));
        }
        if let Some(bad) = keys.iter().find(|k| k.len() != self.key_columns.len()) {
            return Err(batch_error(format!(
                "key {:?} does not match key columns {:?}",
                bad, self.key_columns
            )));
        }

        let mut values = Vec::with_capacity(self.batch_size * self.key_columns.len());
        for key in keys {
            values.extend(key.iter().cloned());
        }
        for _ in keys.len()..self.batch_size {
            values.extend(last.iter().cloned());
        }
        Ok(values)
    }

    #[allow(clippy::result_large_err)]
    #[tracing::instrument(level = "debug", skip_all, fields(batch_size = params.batch_size))]
    fn compile(
        plan: LoadPlan,
        key_columns: Option<Vec<String>>,
        params: &QueryBuildingParameters,
    ) -> Result<Self> {
        if params.batch_size == 0 {
            return Err(batch_error("batch size must be at least 1"));
        }
        plan.validate()?;

        let shape = LoadShape::of_plan(&plan);
        let rules = shape.rules();
        let root = plan.root();
        let root_uid = plan.reference(root).uid().clone();
        let mut aliases = AliasResolutionContext::new();

        let (description, default_keys) = match plan.reference(root) {
            Reference::Entity(entity) => {
                aliases.generate_entity_reference_aliases(&entity.uid, entity.persister.as_ref())?;
                (
                    format!("load {}", entity.persister.entity_name()),
                    entity.persister.identifier_columns().to_vec(),
                )
            }
            Reference::Collection(collection) => {
                let graph = collection.element.and_then(|id| plan.entity(id)).map(|e| {
                    ElementGraph {
                        uid: &e.uid,
                        persister: e.persister.as_ref(),
                    }
                });
                aliases.generate_collection_reference_aliases(
                    &collection.uid,
                    collection.persister.as_ref(),
                    graph,
                )?;
                (
                    format!("load collection {}", collection.persister.role()),
                    collection.persister.key_columns().to_vec(),
                )
            }
        };
        let key_columns = key_columns.unwrap_or(default_keys);
        if key_columns.is_empty() {
            return Err(Error::mapping(
                MappingErrorKind::MissingColumns,
                format!("{description}: no key columns to restrict on"),
            ));
        }

        let mut builder = SelectStatementBuilder::new(params.dialect);

        // FROM, key restriction and root filters
        let root_table_alias = {
            let ctx = ShapeContext {
                plan: &plan,
                reference: root,
                aliases: &aliases,
            };
            let alias = (rules.root_alias)(&ctx)?;
            builder.append_from_clause_fragment(&(rules.from)(&ctx)?);
            builder.append_restrictions(&key_restriction(
                &alias,
                &key_columns,
                params.batch_size,
                params.dialect,
            ));
            apply_root_restrictions(&plan, &alias, params, &mut builder);
            alias
        };

        // Joined spaces, including a collection return's entity map key,
        // get their aliases here.
        LoadQueryJoinAndFetchProcessor::new(&plan, &mut aliases, &params.query_influencers)
            .process_query_space_joins(&root_uid, &mut builder)?;

        // Root ordering and columns
        {
            let ctx = ShapeContext {
                plan: &plan,
                reference: root,
                aliases: &aliases,
            };
            for fragment in (rules.order_by)(&ctx)? {
                builder.append_order_by_fragment(&fragment);
            }
            for fragment in (rules.select)(&ctx)? {
                builder.append_select_clause_fragment(&fragment);
            }
        }

        let mut collector = ReaderCollector::new();
        let fetch_stats = match plan.reference(root) {
            Reference::Entity(entity) => {
                collector.set_root_return_reader(RootReader::Entity(root))?;
                collector.add_entity_reference_initializer(EntityReaderSpec {
                    reference: root,
                    uid: entity.uid.clone(),
                    persister: Arc::clone(&entity.persister),
                    aliases: aliases.resolve_entity_reference_aliases(&entity.uid)?.clone(),
                    link: EntityLink::Return,
                });
                LoadQueryJoinAndFetchProcessor::new(&plan, &mut aliases, &params.query_influencers)
                    .process_fetches(root, &mut builder, &mut collector)?
            }
            Reference::Collection(_) => {
                collector.set_root_return_reader(RootReader::Collection(root))?;
                LoadQueryJoinAndFetchProcessor::new(&plan, &mut aliases, &params.query_influencers)
                    .process_collection_return(root, &mut builder, &mut collector)?
            }
        };

        if let Some(options) = &params.lock_options {
            if options.strongest() > LockMode::None {
                builder.set_lock_options(options.clone());
            }
        }
        if params.comments_enabled {
            builder.set_comment(description);
        }

        let sql = builder.to_statement_string();
        let reader_plan = collector.into_reader_plan()?;
        tracing::debug!(
            sql = %sql,
            shape = ?shape,
            root_alias = %root_table_alias,
            joined_fetches = fetch_stats.joined_fetch_count(),
            has_subselect_fetches = fetch_stats.has_subselect_fetches(),
            "compiled load query"
        );

        Ok(Self {
            plan,
            shape,
            sql,
            root_table_alias,
            key_columns,
            batch_size: params.batch_size,
            dialect: params.dialect,
            fetch_stats,
            reader_plan,
            aliases,
        })
    }
}

/// Mapping-level restrictions and enabled filters on the root table.
fn apply_root_restrictions(
    plan: &LoadPlan,
    alias: &str,
    params: &QueryBuildingParameters,
    builder: &mut SelectStatementBuilder,
) {
    match plan.reference(plan.root()) {
        Reference::Entity(entity) => {
            let persister = &entity.persister;
            builder.append_restrictions(&persister.filter_fragment(alias, &params.query_influencers));
            builder.append_restrictions(&persister.where_join_fragment(alias, true));
            if let Some(fragment) = persister.where_fragment(alias) {
                builder.append_restrictions(&fragment);
            }
        }
        Reference::Collection(collection) => {
            let persister = &collection.persister;
            builder.append_restrictions(&persister.filter_fragment(alias, &params.query_influencers));
            if let Some(fragment) = persister.where_fragment(alias) {
                builder.append_restrictions(&fragment);
            }
        }
    }
}

/// Key predicate for `batch_size` keys over `columns`.
///
/// - one column, one key: `a.id = ?`
/// - one column, N keys: `a.id IN (?, ?, ...)`
/// - composite, one key: `a.k1 = ? AND a.k2 = ?`
/// - composite, N keys: `((a.k1 = ? AND a.k2 = ?) OR (...))`
fn key_restriction(alias: &str, columns: &[String], batch_size: usize, dialect: Dialect) -> String {
    let mut next = 0usize;
    let mut placeholder = || {
        next += 1;
        dialect.placeholder(next)
    };

    if let [column] = columns {
        if batch_size == 1 {
            return format!("{}.{} = {}", alias, column, placeholder());
        }
        let slots: Vec<String> = (0..batch_size).map(|_| placeholder()).collect();
        return format!("{}.{} IN ({})", alias, column, slots.join(", "));
    }

    let mut conjunction = || {
        columns
            .iter()
            .map(|c| format!("{}.{} = {}", alias, c, placeholder()))
            .collect::<Vec<_>>()
            .join(" AND ")
    };
    if batch_size == 1 {
        return conjunction();
    }
    let disjuncts: Vec<String> = (0..batch_size)
        .map(|_| format!("({})", conjunction()))
        .collect();
    format!("({})", disjuncts.join(" OR "))
}

fn batch_error(message: impl Into<String>) -> Error {
    Error::mapping(MappingErrorKind::InvalidBatch, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{FetchStrategy, LoadPlanBuilder};
    use loadplan_core::{
        CollectionMapping, CollectionNature, EntityMapping, LockOptions, Metamodel,
        QueryInfluencers,
    };

    fn metamodel() -> Metamodel {
        let mut model = Metamodel::new();
        model
            .add_entity(
                EntityMapping::new("Order", "orders")
                    .id("id")
                    .property("number", "order_number")
                    .many_to_one("customer", "customer_id", "Customer")
                    .collection("lineItems", "Order.lineItems")
                    .collection("labels", "Order.labels")
                    .collection("notes", "Order.notes"),
            )
            .unwrap();
        model
            .add_entity(
                EntityMapping::new("Customer", "customers")
                    .id("id")
                    .property("name", "name"),
            )
            .unwrap();
        model
            .add_entity(
                EntityMapping::new("LineItem", "line_items")
                    .id("id")
                    .property("position", "position"),
            )
            .unwrap();
        model
            .add_entity(
                EntityMapping::new("Label", "labels")
                    .id("id")
                    .property("title", "title"),
            )
            .unwrap();
        model
            .add_entity(
                EntityMapping::new("Shipment", "shipments")
                    .id("region")
                    .id("code")
                    .property("carrier", "carrier"),
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
                .key("order_id")
                .ordered_by("{alias}.position")
                .unwrap(),
            )
            .unwrap();
        model
            .add_collection(
                CollectionMapping::many_to_many(
                    "Order.labels",
                    "Order",
                    "Label",
                    "order_labels",
                    CollectionNature::Bag,
                )
                .key("order_id")
                .element("label_id")
                .ordered_by("{alias}.added_at")
                .unwrap()
                .many_to_many_ordered_by("{alias}.title")
                .unwrap(),
            )
            .unwrap();
        model
            .add_collection(
                CollectionMapping::basic("Order.notes", "Order", "order_notes", CollectionNature::List)
                    .key("order_id")
                    .index("idx")
                    .element("note"),
            )
            .unwrap();
        model
            .add_entity(
                EntityMapping::new("Currency", "currencies")
                    .id("id")
                    .property("code", "code"),
            )
            .unwrap();
        model
            .add_collection(
                CollectionMapping::basic("Order.prices", "Order", "order_prices", CollectionNature::Map)
                    .key("order_id")
                    .index("currency_id")
                    .index_entity("Currency")
                    .element("amount"),
            )
            .unwrap();
        model
    }

    /// Orders whose line items reach a product and its supplier, and whose
    /// labels reach a category.
    fn catalog_metamodel() -> Metamodel {
        let mut model = Metamodel::new();
        let entities = [
            EntityMapping::new("Order", "orders")
                .id("id")
                .many_to_one("customer", "customer_id", "Customer")
                .collection("lineItems", "Order.lineItems")
                .collection("labels", "Order.labels"),
            EntityMapping::new("Customer", "customers").id("id"),
            EntityMapping::new("LineItem", "line_items")
                .id("id")
                .many_to_one("product", "product_id", "Product"),
            EntityMapping::new("Product", "products")
                .id("id")
                .many_to_one("supplier", "supplier_id", "Supplier"),
            EntityMapping::new("Supplier", "suppliers").id("id"),
            EntityMapping::new("Label", "labels")
                .id("id")
                .many_to_one("category", "category_id", "Category"),
            EntityMapping::new("Category", "categories").id("id"),
        ];
        for entity in entities {
            model.add_entity(entity).unwrap();
        }
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
                CollectionMapping::many_to_many(
                    "Order.labels",
                    "Order",
                    "Label",
                    "order_labels",
                    CollectionNature::Set,
                )
                .key("order_id")
                .element("label_id"),
            )
            .unwrap();
        model
    }

    /// Table aliases after FROM/JOIN and column labels after `as`.
    fn declared_aliases(sql: &str) -> (Vec<&str>, Vec<&str>) {
        let tokens: Vec<&str> = sql.split_whitespace().collect();
        let mut tables = Vec::new();
        let mut columns = Vec::new();
        for (i, token) in tokens.iter().enumerate() {
            match *token {
                "FROM" | "JOIN" => tables.extend(tokens.get(i + 2).copied()),
                "as" => columns.extend(
                    tokens
                        .get(i + 1)
                        .copied()
                        .map(|c| c.trim_end_matches(',')),
                ),
                _ => {}
            }
        }
        (tables, columns)
    }

    fn has_duplicates(items: &[&str]) -> bool {
        let mut sorted = items.to_vec();
        sorted.sort_unstable();
        sorted.windows(2).any(|w| w[0] == w[1])
    }

    fn order_plan(model: &Metamodel) -> LoadPlan {
        let mut builder = LoadPlanBuilder::new(model);
        let order = builder.entity_return("Order").unwrap();
        builder
            .entity_fetch(order, "customer", FetchStrategy::inner_join())
            .unwrap();
        builder
            .collection_fetch(order, "lineItems", FetchStrategy::outer_join())
            .unwrap();
        builder.build().unwrap()
    }

    fn entity_plan(model: &Metamodel, name: &str) -> LoadPlan {
        let mut builder = LoadPlanBuilder::new(model);
        builder.entity_return(name).unwrap();
        builder.build().unwrap()
    }

    fn collection_plan(model: &Metamodel, role: &str) -> LoadPlan {
        let mut builder = LoadPlanBuilder::new(model);
        builder.collection_return(role).unwrap();
        builder.build().unwrap()
    }

    // ==== Entity loads ====

    #[test]
    fn test_order_with_customer_and_line_items() {
        let model = metamodel();
        let details =
            LoadQueryDetails::for_entity(order_plan(&model), &QueryBuildingParameters::new())
                .unwrap();

        assert_eq!(
            details.sql_statement(),
            "SELECT order0_.id as id_0_, order0_.order_number as order_number_0_, \
             order0_.customer_id as customer_id_0_, \
             customer1_.id as id_1_, customer1_.name as name_1_, \
             lineitems2_.order_id as order_id_0__, \
             lineitems2_.id as id_2_, lineitems2_.position as position_2_ \
             FROM orders order0_ \
             INNER JOIN customers customer1_ ON order0_.customer_id = customer1_.id \
             LEFT JOIN line_items lineitems2_ ON order0_.id = lineitems2_.order_id \
             WHERE order0_.id = ? ORDER BY lineitems2_.position"
        );
        assert_eq!(details.root_table_alias(), "order0_");
        assert_eq!(details.shape(), LoadShape::Entity);
        assert_eq!(
            details.table_aliases(),
            vec!["customer1_", "lineitems2_", "order0_"]
        );
        assert_eq!(details.fetch_stats().joined_fetch_count(), 2);
        assert!(!details.fetch_stats().has_subselect_fetches());

        let readers = details.reader_plan();
        assert_eq!(readers.root(), RootReader::Entity(details.load_plan().root()));
        // root, customer, line item element
        assert_eq!(readers.entity_initializers().len(), 3);
        assert_eq!(readers.entity_initializers()[0].link, EntityLink::Return);
        assert_eq!(readers.collection_initializers().len(), 1);
    }

    #[test]
    fn test_deferred_subselect_counts_without_join() {
        let model = metamodel();
        let mut builder = LoadPlanBuilder::new(&model);
        let order = builder.entity_return("Order").unwrap();
        builder
            .collection_fetch(order, "lineItems", FetchStrategy::subselect())
            .unwrap();
        builder
            .entity_fetch(order, "customer", FetchStrategy::select())
            .unwrap();
        let details =
            LoadQueryDetails::for_entity(builder.build().unwrap(), &QueryBuildingParameters::new())
                .unwrap();

        assert!(!details.sql_statement().contains("JOIN"));
        let stats = details.fetch_stats();
        assert!(stats.has_subselect_fetches());
        assert_eq!(stats.joined_fetch_count(), 0);
        assert_eq!(stats.deferred_fetches().len(), 2);
        assert_eq!(stats.deferred_fetches()[0].property, "lineItems");
        assert!(details.reader_plan().collection_initializers().is_empty());
    }

    #[test]
    fn test_lock_comment_and_dialect() {
        let model = metamodel();
        let params = QueryBuildingParameters::new()
            .dialect(Dialect::Postgres)
            .lock_options(LockOptions::new(LockMode::PessimisticWrite))
            .comments_enabled(true);
        let details = LoadQueryDetails::for_entity(entity_plan(&model, "Customer"), &params).unwrap();
        assert_eq!(
            details.sql_statement(),
            "/* load Customer */ SELECT customer0_.id as id_0_, customer0_.name as name_0_ \
             FROM customers customer0_ WHERE customer0_.id = $1 for update"
        );
    }

    #[test]
    fn test_root_filter_applied_when_enabled() {
        let mut model = Metamodel::new();
        model
            .add_entity(
                EntityMapping::new("Customer", "customers")
                    .id("id")
                    .filter("active", "{alias}.active = 1")
                    .unwrap(),
            )
            .unwrap();
        let params = QueryBuildingParameters::new()
            .query_influencers(QueryInfluencers::default().enable_filter("active"));
        let details = LoadQueryDetails::for_entity(entity_plan(&model, "Customer"), &params).unwrap();
        assert!(
            details
                .sql_statement()
                .ends_with("WHERE customer0_.id = ? AND customer0_.active = 1")
        );

        let details =
            LoadQueryDetails::for_entity(entity_plan(&model, "Customer"), &QueryBuildingParameters::new())
                .unwrap();
        assert!(details.sql_statement().ends_with("WHERE customer0_.id = ?"));
    }

    // ==== Batch restrictions ====

    #[test]
    fn test_single_column_batch_shapes() {
        let model = metamodel();
        let one = LoadQueryDetails::for_entity(
            entity_plan(&model, "Customer"),
            &QueryBuildingParameters::new(),
        )
        .unwrap();
        assert!(one.sql_statement().ends_with("WHERE customer0_.id = ?"));
        assert!(!one.sql_statement().contains(" IN "));
        assert!(one.should_use_optional_entity_information());

        let three = LoadQueryDetails::for_entity(
            entity_plan(&model, "Customer"),
            &QueryBuildingParameters::new().batch_size(3),
        )
        .unwrap();
        assert!(three.sql_statement().ends_with("WHERE customer0_.id IN (?, ?, ?)"));
        assert!(!three.should_use_optional_entity_information());
    }

    #[test]
    fn test_composite_batch_shapes() {
        let model = metamodel();
        let one = LoadQueryDetails::for_entity(
            entity_plan(&model, "Shipment"),
            &QueryBuildingParameters::new().dialect(Dialect::Sqlite),
        )
        .unwrap();
        assert!(
            one.sql_statement()
                .ends_with("WHERE shipment0_.region = ?1 AND shipment0_.code = ?2")
        );

        let two = LoadQueryDetails::for_entity(
            entity_plan(&model, "Shipment"),
            &QueryBuildingParameters::new()
                .batch_size(2)
                .dialect(Dialect::Sqlite),
        )
        .unwrap();
        assert!(two.sql_statement().ends_with(
            "WHERE ((shipment0_.region = ?1 AND shipment0_.code = ?2) \
             OR (shipment0_.region = ?3 AND shipment0_.code = ?4))"
        ));
    }

    #[test]
    fn test_custom_key_columns() {
        let model = metamodel();
        let details = LoadQueryDetails::for_entity_by_columns(
            entity_plan(&model, "Order"),
            Some(vec!["order_number".to_string()]),
            &QueryBuildingParameters::new(),
        )
        .unwrap();
        assert!(
            details
                .sql_statement()
                .ends_with("WHERE order0_.order_number = ?")
        );
    }

    #[test]
    fn test_zero_batch_rejected() {
        let model = metamodel();
        let err = LoadQueryDetails::for_entity(
            entity_plan(&model, "Customer"),
            &QueryBuildingParameters::new().batch_size(0),
        )
        .unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::InvalidBatch));
    }

    #[test]
    fn test_bind_values_pad_short_batch() {
        let model = metamodel();
        let details = LoadQueryDetails::for_entity(
            entity_plan(&model, "Customer"),
            &QueryBuildingParameters::new().batch_size(4),
        )
        .unwrap();
        let values = details
            .bind_values(&[vec![Value::BigInt(7)], vec![Value::BigInt(9)]])
            .unwrap();
        assert_eq!(
            values,
            vec![
                Value::BigInt(7),
                Value::BigInt(9),
                Value::BigInt(9),
                Value::BigInt(9)
            ]
        );

        let too_many: Vec<Vec<Value>> = (0..5).map(|i| vec![Value::BigInt(i)]).collect();
        assert_eq!(
            details.bind_values(&too_many).unwrap_err().mapping_kind(),
            Some(MappingErrorKind::InvalidBatch)
        );
        assert!(details.bind_values(&[]).is_err());
        assert!(
            details
                .bind_values(&[vec![Value::BigInt(1), Value::BigInt(2)]])
                .is_err()
        );
    }

    // ==== Collection loads ====

    #[test]
    fn test_one_to_many_root_alias_is_element_alias() {
        let model = metamodel();
        let details = LoadQueryDetails::for_collection(
            collection_plan(&model, "Order.lineItems"),
            &QueryBuildingParameters::new(),
        )
        .unwrap();
        assert_eq!(details.shape(), LoadShape::OneToManyCollection);

        let plan = details.load_plan();
        let element = plan.collection(plan.root()).and_then(|c| c.element).unwrap();
        let element_uid = plan.reference(element).uid();
        let element_alias = &details
            .reader_plan()
            .entity_initializer(element)
            .unwrap()
            .aliases
            .table_alias;
        assert_eq!(details.root_table_alias(), element_alias);
        assert_eq!(details.root_table_alias(), "lineitems0_");
        assert_eq!(
            details.reader_plan().entity_initializer(element).unwrap().uid,
            *element_uid
        );
        assert_eq!(
            details.sql_statement(),
            "SELECT lineitems0_.order_id as order_id_0__, \
             lineitems0_.id as id_0_, lineitems0_.position as position_0_ \
             FROM line_items lineitems0_ WHERE lineitems0_.order_id = ? \
             ORDER BY lineitems0_.position"
        );
        assert_eq!(
            details.reader_plan().root(),
            RootReader::Collection(plan.root())
        );
    }

    #[test]
    fn test_many_to_many_order_precedes_collection_order() {
        let model = metamodel();
        let details = LoadQueryDetails::for_collection(
            collection_plan(&model, "Order.labels"),
            &QueryBuildingParameters::new(),
        )
        .unwrap();
        assert_eq!(details.shape(), LoadShape::BasicCollection);
        assert_eq!(details.root_table_alias(), "labels1_");
        assert_eq!(
            details.sql_statement(),
            "SELECT labels1_.order_id as order_id_0__, labels1_.label_id as label_id_0__, \
             label0_.id as id_0_, label0_.title as title_0_ \
             FROM order_labels labels1_ \
             LEFT JOIN labels label0_ ON labels1_.label_id = label0_.id \
             WHERE labels1_.order_id = ? \
             ORDER BY label0_.title, labels1_.added_at"
        );
    }

    #[test]
    fn test_basic_value_collection() {
        let model = metamodel();
        let details = LoadQueryDetails::for_collection(
            collection_plan(&model, "Order.notes"),
            &QueryBuildingParameters::new().batch_size(2),
        )
        .unwrap();
        assert_eq!(
            details.sql_statement(),
            "SELECT notes0_.order_id as order_id_0__, notes0_.idx as idx_0__, \
             notes0_.note as note_0__ FROM order_notes notes0_ \
             WHERE notes0_.order_id IN (?, ?)"
        );
        assert!(!details.should_use_optional_entity_information());
        assert!(details.reader_plan().entity_initializers().is_empty());
    }

    #[test]
    fn test_map_keyed_by_entity() {
        let model = metamodel();
        let details = LoadQueryDetails::for_collection(
            collection_plan(&model, "Order.prices"),
            &QueryBuildingParameters::new(),
        )
        .unwrap();
        assert_eq!(details.shape(), LoadShape::BasicCollection);
        assert_eq!(details.root_table_alias(), "prices0_");
        assert_eq!(
            details.sql_statement(),
            "SELECT prices0_.order_id as order_id_0__, prices0_.currency_id as currency_id_0__, \
             prices0_.amount as amount_0__, currency1_.id as id_0_, currency1_.code as code_0_ \
             FROM order_prices prices0_ \
             LEFT JOIN currencies currency1_ ON prices0_.currency_id = currency1_.id \
             WHERE prices0_.order_id = ?"
        );

        let plan = details.load_plan();
        let index = plan.collection(plan.root()).and_then(|c| c.index).unwrap();
        let reader = details.reader_plan().entity_initializer(index).unwrap();
        assert_eq!(reader.aliases.table_alias, "currency1_");
        assert_eq!(
            reader.link,
            EntityLink::CollectionIndex {
                collection: plan.root()
            }
        );
    }

    // ==== Alias uniqueness ====

    #[test]
    fn test_nested_fetch_aliases_are_distinct() {
        let model = catalog_metamodel();
        let mut builder = LoadPlanBuilder::new(&model);
        let order = builder.entity_return("Order").unwrap();
        builder
            .entity_fetch(order, "customer", FetchStrategy::inner_join())
            .unwrap();
        let items = builder
            .collection_fetch(order, "lineItems", FetchStrategy::outer_join())
            .unwrap();
        let item = builder.element_of(items).unwrap();
        let product = builder
            .entity_fetch(item, "product", FetchStrategy::outer_join())
            .unwrap();
        builder
            .entity_fetch(product, "supplier", FetchStrategy::outer_join())
            .unwrap();
        let labels = builder
            .collection_fetch(order, "labels", FetchStrategy::outer_join())
            .unwrap();
        let label = builder.element_of(labels).unwrap();
        builder
            .entity_fetch(label, "category", FetchStrategy::outer_join())
            .unwrap();

        let details =
            LoadQueryDetails::for_entity(builder.build().unwrap(), &QueryBuildingParameters::new())
                .unwrap();
        let sql = details.sql_statement();

        let (tables, columns) = declared_aliases(sql);
        assert_eq!(tables.len(), 8);
        assert!(!has_duplicates(&tables), "{sql}");
        assert!(!has_duplicates(&columns), "{sql}");
        assert_eq!(details.table_aliases().len(), 8);

        // Each nested join starts from its parent's alias
        for join in [
            "LEFT JOIN products product3_ ON lineitems2_.product_id = product3_.id",
            "LEFT JOIN suppliers supplier4_ ON product3_.supplier_id = supplier4_.id",
            "LEFT JOIN labels label5_ ON labels6_.label_id = label5_.id",
            "LEFT JOIN categories category7_ ON label5_.category_id = category7_.id",
        ] {
            assert!(sql.contains(join), "missing `{join}` in {sql}");
        }
        assert_eq!(details.fetch_stats().joined_fetch_count(), 6);
        assert_eq!(details.reader_plan().entity_initializers().len(), 7);
    }

    #[test]
    fn test_wrong_constructor_rejected() {
        let model = metamodel();
        let err = LoadQueryDetails::for_collection(
            entity_plan(&model, "Order"),
            &QueryBuildingParameters::new(),
        )
        .unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::InvalidLoadPlan));
        assert!(
            LoadQueryDetails::for_entity(
                collection_plan(&model, "Order.notes"),
                &QueryBuildingParameters::new()
            )
            .is_err()
        );
    }
}
