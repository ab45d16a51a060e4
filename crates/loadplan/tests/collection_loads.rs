//! End-to-end collection loads: one-to-many, many-to-many and value
//! collections read back across multiple rows per owner.

mod fixtures;

use std::sync::Arc;

use fixtures::{big, collection_load, key, rows, shop_metamodel};
use loadplan::prelude::*;
use loadplan::{ElementValue, LoadShape, PersistentCollection};

fn line_items(owner: i64) -> CollectionKey {
    CollectionKey::new("Order.lineItems", vec![big(owner)])
}

fn labels(owner: i64) -> CollectionKey {
    CollectionKey::new("Order.labels", vec![big(owner)])
}

fn item_ids(collection: &PersistentCollection) -> Vec<Value> {
    collection
        .entities()
        .iter()
        .map(|e| read(e).identifier()[0].clone())
        .collect()
}

// ============================================================================
// One-to-many
// ============================================================================

#[test]
fn test_one_to_many_batch_load() {
    let mut loader = Loader::builder(shop_metamodel())
        .parameters(QueryBuildingParameters::new().batch_size(2))
        .build();
    let details = collection_load(&loader, "Order.lineItems");
    assert_eq!(details.shape(), LoadShape::OneToManyCollection);
    assert_eq!(details.root_table_alias(), "lineitems0_");
    assert_eq!(
        details.sql_statement(),
        "SELECT lineitems0_.order_id as order_id_0__, \
         lineitems0_.id as id_0_, lineitems0_.position as position_0_ \
         FROM line_items lineitems0_ WHERE lineitems0_.order_id IN (?, ?) \
         ORDER BY lineitems0_.position"
    );

    let mut result = rows(
        &["order_id_0__", "id_0_", "position_0_"],
        vec![
            vec![big(1), big(100), Value::Int(0)],
            vec![big(1), big(101), Value::Int(1)],
            vec![big(2), big(200), Value::Int(0)],
        ],
    );
    let options = ProcessingOptions::new()
        .collection_key(line_items(1))
        .collection_key(line_items(2));
    let outcome = loader.read(&details, &mut result, &options).unwrap();

    assert_eq!(outcome.collections().len(), 2);
    assert_eq!(outcome.collections_loaded, 2);
    assert_eq!(outcome.entities_loaded, 3);

    let first = loader.session().get_collection(&line_items(1)).unwrap();
    assert_eq!(item_ids(&read(&first)), vec![big(100), big(101)]);
    let second = loader.session().get_collection(&line_items(2)).unwrap();
    assert_eq!(item_ids(&read(&second)), vec![big(200)]);
    assert!(loader.session().contains(&key("LineItem", 200)));
}

#[test]
fn test_owner_rows_out_of_order_still_collect() {
    let mut loader = Loader::new(shop_metamodel());
    let details = collection_load(&loader, "Order.lineItems");
    let mut result = rows(
        &["order_id_0__", "id_0_", "position_0_"],
        vec![
            vec![big(1), big(100), Value::Int(0)],
            vec![big(2), big(200), Value::Int(0)],
            vec![big(1), big(101), Value::Int(1)],
        ],
    );
    let outcome = loader
        .read(&details, &mut result, &ProcessingOptions::new())
        .unwrap();

    assert_eq!(outcome.collections().len(), 2);
    let first = loader.session().get_collection(&line_items(1)).unwrap();
    assert_eq!(item_ids(&read(&first)), vec![big(100), big(101)]);
}

#[test]
fn test_requested_owner_without_rows_gets_empty_collection() {
    let mut loader = Loader::new(shop_metamodel());
    let details = collection_load(&loader, "Order.lineItems");
    let mut result = rows(&["order_id_0__", "id_0_", "position_0_"], Vec::new());
    let outcome = loader
        .read(
            &details,
            &mut result,
            &ProcessingOptions::new().collection_key(line_items(7)),
        )
        .unwrap();

    assert!(outcome.results.is_empty());
    let empty = loader.session().get_collection(&line_items(7)).unwrap();
    assert!(read(&empty).is_initialized());
    assert!(read(&empty).is_empty());
}

// ============================================================================
// Many-to-many
// ============================================================================

#[test]
fn test_many_to_many_sql() {
    let loader = Loader::new(shop_metamodel());
    let details = collection_load(&loader, "Order.labels");
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
fn test_many_to_many_shares_element_instances() {
    let mut loader = Loader::builder(shop_metamodel())
        .parameters(QueryBuildingParameters::new().batch_size(2))
        .build();
    let details = collection_load(&loader, "Order.labels");
    let mut result = rows(
        &["order_id_0__", "label_id_0__", "id_0_", "title_0_"],
        vec![
            vec![big(1), big(5), big(5), Value::from("alpha")],
            vec![big(1), big(6), big(6), Value::from("beta")],
            vec![big(2), big(5), big(5), Value::from("alpha")],
        ],
    );
    let outcome = loader
        .read(&details, &mut result, &ProcessingOptions::new())
        .unwrap();

    assert_eq!(outcome.collections().len(), 2);
    assert_eq!(outcome.entities_loaded, 2);

    let first = loader.session().get_collection(&labels(1)).unwrap();
    let second = loader.session().get_collection(&labels(2)).unwrap();
    let first = read(&first).entities();
    let second = read(&second).entities();
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 1);
    assert!(Arc::ptr_eq(&first[0], &second[0]));
    assert_eq!(read(&first[1]).basic("title"), Some(&Value::from("beta")));
}

// ============================================================================
// Value collections
// ============================================================================

#[test]
fn test_list_of_values_follows_index_column() {
    let mut loader = Loader::new(shop_metamodel());
    let details = collection_load(&loader, "Order.notes");
    let mut result = rows(
        &["order_id_0__", "idx_0__", "note_0__"],
        vec![
            vec![big(1), Value::Int(2), Value::from("c")],
            vec![big(1), Value::Int(0), Value::from("a")],
            vec![big(1), Value::Int(1), Value::from("b")],
        ],
    );
    let outcome = loader
        .read(&details, &mut result, &ProcessingOptions::new())
        .unwrap();

    let notes = outcome.collections();
    assert_eq!(notes.len(), 1);
    assert_eq!(
        read(&notes[0]).values(),
        vec![Value::from("a"), Value::from("b"), Value::from("c")]
    );
    assert_eq!(outcome.entities_loaded, 0);
}

#[test]
fn test_map_keyed_by_entity() {
    let mut loader = Loader::new(shop_metamodel());
    let details = collection_load(&loader, "Order.prices");
    assert_eq!(details.shape(), LoadShape::BasicCollection);
    assert_eq!(
        details.sql_statement(),
        "SELECT prices0_.order_id as order_id_0__, prices0_.currency_id as currency_id_0__, \
         prices0_.amount as amount_0__, currency1_.id as id_0_, currency1_.code as code_0_ \
         FROM order_prices prices0_ \
         LEFT JOIN currencies currency1_ ON prices0_.currency_id = currency1_.id \
         WHERE prices0_.order_id = ?"
    );

    let mut result = rows(
        &["order_id_0__", "currency_id_0__", "amount_0__", "id_0_", "code_0_"],
        vec![
            vec![big(1), big(10), Value::Double(9.5), big(10), Value::from("EUR")],
            vec![big(1), big(11), Value::Double(12.0), big(11), Value::from("USD")],
        ],
    );
    loader
        .read(&details, &mut result, &ProcessingOptions::new())
        .unwrap();

    let prices = loader
        .session()
        .get_collection(&CollectionKey::new("Order.prices", vec![big(1)]))
        .unwrap();
    let eur = loader.session().get_entity(&key("Currency", 10)).unwrap();
    assert_eq!(read(&eur).basic("code"), Some(&Value::from("EUR")));

    let prices = read(&prices);
    assert_eq!(prices.len(), 2);
    assert_eq!(
        prices
            .get(&ElementValue::Entity(eur))
            .and_then(ElementValue::as_value),
        Some(&Value::Double(9.5))
    );
}
