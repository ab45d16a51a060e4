//! Shared mappings and result-set helpers for the loader tests.

#![allow(dead_code)] // Not every test binary uses every fixture

use loadplan::prelude::*;

/// Orders with customers, line items, labels, notes and per-currency
/// prices, plus a pet hierarchy and a composite-keyed shipment.
pub fn shop_metamodel() -> Metamodel {
    let mut model = Metamodel::new();
    model
        .add_entity(
            EntityMapping::new("Order", "orders")
                .id("id")
                .property("number", "order_number")
                .many_to_one("customer", "customer_id", "Customer")
                .many_to_one("billedTo", "billed_to_id", "Customer")
                .collection("lineItems", "Order.lineItems")
                .collection("labels", "Order.labels")
                .collection("notes", "Order.notes"),
        )
        .unwrap();
    model
        .add_entity(
            EntityMapping::new("Customer", "customers")
                .id("id")
                .property("name", "name")
                .version("version", "version"),
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
            EntityMapping::new("Currency", "currencies")
                .id("id")
                .property("code", "code"),
        )
        .unwrap();
    model
        .add_entity(
            EntityMapping::new("Pet", "pets")
                .id("id")
                .property("name", "name")
                .discriminator("kind")
                .subclass("dog", "Dog")
                .subclass("cat", "Cat"),
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

pub fn big(v: i64) -> Value {
    Value::BigInt(v)
}

pub fn key(entity_name: &str, id: i64) -> EntityKey {
    EntityKey::new(entity_name, vec![big(id)])
}

pub fn rows(columns: &[&str], data: Vec<Vec<Value>>) -> VecResultSet {
    VecResultSet::from_values(columns.iter().map(|c| (*c).to_string()).collect(), data)
}

/// Compile an entity load of `root` with the given fetches.
pub fn entity_load(
    loader: &Loader,
    root: &str,
    fetches: &[(&str, FetchStrategy)],
) -> LoadQueryDetails {
    let mut plan = loader.plan();
    let id = plan.entity_return(root).unwrap();
    for (property, strategy) in fetches {
        let is_collection = loader
            .metamodel()
            .entity(root)
            .unwrap()
            .property(property)
            .and_then(|p| p.collection_role())
            .is_some();
        if is_collection {
            plan.collection_fetch(id, property, *strategy).unwrap();
        } else {
            plan.entity_fetch(id, property, *strategy).unwrap();
        }
    }
    loader.compile_entity_load(plan.build().unwrap()).unwrap()
}

/// Compile a load of the collection `role`.
pub fn collection_load(loader: &Loader, role: &str) -> LoadQueryDetails {
    let mut plan = loader.plan();
    plan.collection_return(role).unwrap();
    loader.compile_collection_load(plan.build().unwrap()).unwrap()
}
