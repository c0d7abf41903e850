//! Link traversal, list aggregates, backlinks, subqueries and key-path
//! aliasing over a shop-shaped schema.

use strata_core::error::Error;
use strata_core::key::{ColAttrs, DataType, ObjKey, TableKey};
use strata_core::query::{parse_query, parse_query_mapped, KeyPathMapping};
use strata_core::store::Store;
use strata_core::value::Value;

struct ShopFixture {
    store: Store,
    discounts: TableKey,
    items: TableKey,
    person: TableKey,
}

fn verify_query(store: &Store, table: TableKey, text: &str, expected: usize) {
    let parsed = parse_query(store, table, text, &[]).unwrap_or_else(|err| {
        panic!("query '{text}' failed to build: {err}");
    });
    assert_eq!(parsed.query.count(store).unwrap(), expected, "query '{text}'");

    let description = parsed.query.get_description(store).unwrap();
    let reparsed = parse_query(store, table, &description, &[]).unwrap_or_else(|err| {
        panic!("description '{description}' of '{text}' failed to parse: {err}");
    });
    assert_eq!(
        reparsed.query.count(store).unwrap(),
        expected,
        "description '{description}' of query '{text}'"
    );
}

fn shop_fixture() -> ShopFixture {
    let mut store = Store::new();

    let discounts = store.add_table("Discounts");
    let reduced_by = store
        .add_column(discounts, "reduced_by", DataType::Double, ColAttrs::empty())
        .unwrap();
    let active = store
        .add_column(discounts, "active", DataType::Bool, ColAttrs::empty())
        .unwrap();
    let discount_info = [(3.0, false), (2.5, true), (0.50, true), (1.50, true)];
    let mut discount_keys = Vec::new();
    for (off, is_active) in discount_info {
        let key = store.create_object(discounts).unwrap();
        store.set(discounts, key, reduced_by, Value::Double(off)).unwrap();
        store.set(discounts, key, active, Value::Bool(is_active)).unwrap();
        discount_keys.push(key);
    }

    let items = store.add_table("Items");
    let item_name = store
        .add_column(items, "name", DataType::String, ColAttrs::empty())
        .unwrap();
    let item_price = store
        .add_column(items, "price", DataType::Double, ColAttrs::empty())
        .unwrap();
    let item_discount = store
        .add_link_column(items, "discount", discounts, false)
        .unwrap();
    let item_info = [("milk", 5.5), ("oranges", 4.0), ("pizza", 9.5), ("cereal", 6.5)];
    let mut item_keys = Vec::new();
    for (name, price) in item_info {
        let key = store.create_object(items).unwrap();
        store.set(items, key, item_name, Value::String(name.into())).unwrap();
        store.set(items, key, item_price, Value::Double(price)).unwrap();
        item_keys.push(key);
    }
    store
        .set(items, item_keys[0], item_discount, Value::Link(discount_keys[2]))
        .unwrap(); // milk -0.50
    store
        .set(items, item_keys[2], item_discount, Value::Link(discount_keys[1]))
        .unwrap(); // pizza -2.5
    store
        .set(items, item_keys[3], item_discount, Value::Link(discount_keys[0]))
        .unwrap(); // cereal -3.0 inactive

    let person = store.add_table("Person");
    let customer_id = store
        .add_column(person, "customer_id", DataType::Int, ColAttrs::empty())
        .unwrap();
    let person_items = store.add_link_column(person, "items", items, true).unwrap();

    let link = Value::Link;
    let lists: [Vec<ObjKey>; 3] = [
        vec![item_keys[0], item_keys[1], item_keys[2], item_keys[3]],
        std::iter::repeat(item_keys[0]).take(10).collect(),
        vec![item_keys[2], item_keys[2], item_keys[3]],
    ];
    for (i, list) in lists.into_iter().enumerate() {
        let key = store.create_object(person).unwrap();
        store
            .set(person, key, customer_id, Value::Int(i as i64))
            .unwrap();
        store
            .set(
                person,
                key,
                person_items,
                Value::List(list.into_iter().map(link).collect()),
            )
            .unwrap();
    }

    ShopFixture {
        store,
        discounts,
        items,
        person,
    }
}

#[test]
fn link_chains_evaluate_with_exists_semantics() {
    let f = shop_fixture();

    verify_query(&f.store, f.person, "items.@count > 2", 3);
    verify_query(&f.store, f.person, "items.price > 3.0", 3);
    verify_query(&f.store, f.person, "items.name ==[c] 'MILK'", 2);
    verify_query(&f.store, f.person, "items.discount.active == true", 3);
    verify_query(&f.store, f.person, "items.discount.reduced_by > 2.0", 2);
}

#[test]
fn list_aggregates_fold_through_the_link_map() {
    let f = shop_fixture();

    verify_query(&f.store, f.person, "items.@sum.price > 50", 1);
    verify_query(&f.store, f.person, "items.@avg.price > 7", 1);
    verify_query(&f.store, f.person, "items.@min.price == 4.0", 1);
    verify_query(&f.store, f.person, "items.@max.price == 9.5", 2);
}

#[test]
fn aggregates_on_non_numeric_properties_are_unsupported() {
    let f = shop_fixture();

    for text in ["items.@sum.name > 5", "items.@min.discount > 5"] {
        let err = parse_query(&f.store, f.person, text, &[]).unwrap_err();
        assert!(
            matches!(err, Error::Unsupported { .. }),
            "'{text}' should be unsupported, got {err:?}"
        );
    }
}

#[test]
fn count_against_null_is_rejected() {
    let f = shop_fixture();

    let err = parse_query(&f.store, f.person, "items.@count == NULL", &[]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid predicate: comparison between 'null' and @size or @count"
    );

    let err = parse_query(&f.store, f.person, "items == NULL", &[]).unwrap_err();
    assert!(err
        .to_string()
        .contains("Comparing a list property to 'null' is not supported"));
}

#[test]
fn backlinks_are_first_class_query_paths() {
    let f = shop_fixture();

    // How many items have at least one purchaser?
    verify_query(&f.store, f.items, "@links.Person.items.@count > 0", 4);
    verify_query(&f.store, f.items, "@links.Person.items.@count > 2", 1);
    verify_query(
        &f.store,
        f.items,
        "@links.Person.items.customer_id == 1",
        1,
    );
    // Total incoming links regardless of origin column.
    verify_query(&f.store, f.items, "@links.@count > 0", 4);
    verify_query(&f.store, f.discounts, "@links.@count == 0", 1);
}

#[test]
fn quantifiers_over_list_paths() {
    let f = shop_fixture();

    verify_query(&f.store, f.person, "ANY items.price > 9.0", 2);
    verify_query(&f.store, f.person, "SOME items.price > 9.0", 2);
    verify_query(&f.store, f.person, "ALL items.price > 5.0", 2);
    verify_query(&f.store, f.person, "NONE items.price > 9.0", 1);
    verify_query(&f.store, f.person, "NONE items.price > 100.0", 3);

    let err = parse_query(&f.store, f.person, "ALL customer_id > 0", &[]).unwrap_err();
    assert!(err
        .to_string()
        .contains("The keypath following 'ALL' must contain a list"));

    let err = parse_query(&f.store, f.person, "ANY customer_id > 0", &[]).unwrap_err();
    assert!(err
        .to_string()
        .contains("The keypath following 'ANY' or 'SOME' must contain a list"));
}

#[test]
fn subquery_counts_bind_the_element_variable() {
    let f = shop_fixture();

    verify_query(
        &f.store,
        f.person,
        "SUBQUERY(items, $x, $x.price > 5 && $x.discount.active == true).@count > 0",
        3,
    );
    verify_query(
        &f.store,
        f.person,
        "SUBQUERY(items, $x, $x.price > 5 && $x.discount.active == true).@count > 2",
        1,
    );
    verify_query(
        &f.store,
        f.person,
        "SUBQUERY(items, $x, $x.price > 5).@count == items.@count",
        2,
    );

    // Nested variables must be distinct.
    let err = parse_query(
        &f.store,
        f.person,
        "SUBQUERY(items, $x, SUBQUERY($x.discount.@links.Items.discount, $x, $x.price > 0).@count > 0).@count > 0",
        &[],
    )
    .unwrap_err();
    assert!(err.to_string().contains("already in use"), "got {err}");
}

#[test]
fn in_operator_against_list_paths_and_literals() {
    let f = shop_fixture();

    verify_query(&f.store, f.items, "name IN {'milk', 'pizza'}", 2);
    verify_query(&f.store, f.person, "5.5 IN items.price", 2);
    verify_query(&f.store, f.person, "3.99 IN items.price", 0);

    let err = parse_query(&f.store, f.person, "5.5 IN customer_id", &[]).unwrap_err();
    assert!(err
        .to_string()
        .contains("The keypath following 'IN' must contain a list"));

    let err = parse_query(&f.store, f.person, "items IN items", &[]).unwrap_err();
    assert!(err.to_string().contains("list vs list"));
}

#[test]
fn keypath_mapping_installs_backlink_aliases() {
    let f = shop_fixture();
    let mut mapping = KeyPathMapping::new();
    mapping.add_mapping(f.items, "purchasers", "@links.Person.items");

    let parsed = parse_query_mapped(
        &f.store,
        f.items,
        "purchasers.@count > 2",
        &[],
        &mapping,
    )
    .unwrap();
    assert_eq!(parsed.query.count(&f.store).unwrap(), 1);

    let parsed = parse_query_mapped(
        &f.store,
        f.items,
        "purchasers.customer_id == 0",
        &[],
        &mapping,
    )
    .unwrap();
    assert_eq!(parsed.query.count(&f.store).unwrap(), 4);
}

#[test]
fn disabled_backlinks_reject_inverse_paths() {
    let f = shop_fixture();
    let mut mapping = KeyPathMapping::new();
    mapping.add_mapping(f.items, "purchasers", "@links.Person.items");
    mapping.set_allow_backlinks(false);

    let err = parse_query_mapped(
        &f.store,
        f.items,
        "purchasers.@count > 2",
        &[],
        &mapping,
    )
    .unwrap_err();
    assert!(
        err.to_string().contains("backlinks are disabled")
            || err.to_string().contains("Querying over backlinks is disabled"),
        "got {err}"
    );
}

#[test]
fn links_to_matches_specific_objects() {
    let f = shop_fixture();

    // Discount keys are dense from zero; key 1 is the 2.5-off sale that
    // only pizza carries, key 3 is unreferenced.
    let parsed =
        parse_query(&f.store, f.items, "discount == $0", &[Value::Link(ObjKey(1))]).unwrap();
    assert_eq!(parsed.query.count(&f.store).unwrap(), 1);

    let parsed =
        parse_query(&f.store, f.items, "discount == $0", &[Value::Link(ObjKey(3))]).unwrap();
    assert_eq!(parsed.query.count(&f.store).unwrap(), 0);

    let err = parse_query(&f.store, f.items, "discount > $0", &[Value::Link(ObjKey(1))])
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported { .. }));

    // Serialized form round-trips through the O-key literal.
    verify_query(&f.store, f.items, "discount == O1", 1);
    verify_query(&f.store, f.items, "discount != O1", 3);
}
