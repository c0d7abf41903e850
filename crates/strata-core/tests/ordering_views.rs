//! Descriptor ordering over result views: sort, distinct, limit,
//! include reporting, and versioned view sync.

use std::collections::BTreeSet;

use strata_core::key::{ColAttrs, ColKey, DataType, ObjKey, TableKey};
use strata_core::query::parse_query;
use strata_core::store::{Store, Table};
use strata_core::value::Value;

fn names_of(store: &Store, table: &Table, name: ColKey, keys: &[ObjKey]) -> Vec<String> {
    keys.iter()
        .map(|&key| {
            match table.object(store, key).unwrap().get(name).unwrap() {
                Value::String(s) => s,
                other => panic!("expected a string name, got {other:?}"),
            }
        })
        .collect()
}

fn people_fixture() -> (Store, TableKey, ColKey) {
    let mut store = Store::new();
    let table = store.add_table("Person");
    let name = store
        .add_column(table, "name", DataType::String, ColAttrs::empty())
        .unwrap();
    let age = store
        .add_column(table, "age", DataType::Int, ColAttrs::empty())
        .unwrap();
    for (n, a) in [("Adam", 28), ("Frank", 30), ("Ben", 28)] {
        let key = store.create_object(table).unwrap();
        store.set(table, key, name, Value::String(n.into())).unwrap();
        store.set(table, key, age, Value::Int(a)).unwrap();
    }
    (store, table, name)
}

#[test]
fn descriptor_order_is_preserved_verbatim() {
    let (store, table, name) = people_fixture();
    let t = store.table(table).unwrap();

    // Sort, then distinct, then limit: nothing dropped by the limit.
    let parsed = parse_query(
        &store,
        table,
        "TRUEPREDICATE SORT(name ASC) DISTINCT(age) LIMIT(2)",
        &[],
    )
    .unwrap();
    let mut view = parsed.query.find_all(&store).unwrap();
    view.apply_descriptor_ordering(&store, &parsed.ordering).unwrap();
    assert_eq!(names_of(&store, t, name, view.keys()), vec!["Adam", "Frank"]);
    assert_eq!(view.get_num_results_excluded_by_limit(), 0);

    // Limit first: one row dropped before distinct even runs.
    let parsed = parse_query(
        &store,
        table,
        "TRUEPREDICATE LIMIT(2) SORT(name ASC) DISTINCT(age)",
        &[],
    )
    .unwrap();
    let mut view = parsed.query.find_all(&store).unwrap();
    view.apply_descriptor_ordering(&store, &parsed.ordering).unwrap();
    assert_eq!(names_of(&store, t, name, view.keys()), vec!["Adam", "Frank"]);
    assert_eq!(view.get_num_results_excluded_by_limit(), 1);
}

#[test]
fn applying_an_ordering_twice_is_idempotent() {
    let (store, table, _) = people_fixture();

    let parsed = parse_query(
        &store,
        table,
        "TRUEPREDICATE SORT(name DESC) DISTINCT(age) LIMIT(5)",
        &[],
    )
    .unwrap();
    let mut view = parsed.query.find_all(&store).unwrap();
    view.apply_descriptor_ordering(&store, &parsed.ordering).unwrap();
    let first = view.keys().to_vec();
    view.apply_descriptor_ordering(&store, &parsed.ordering).unwrap();
    assert_eq!(view.keys(), first.as_slice());
}

#[test]
fn adjacent_limits_compose_as_minimum() {
    let (store, table, _) = people_fixture();

    let parsed =
        parse_query(&store, table, "TRUEPREDICATE LIMIT(2) LIMIT(3)", &[]).unwrap();
    let mut view = parsed.query.find_all(&store).unwrap();
    view.apply_descriptor_ordering(&store, &parsed.ordering).unwrap();
    assert_eq!(view.size(), 2);

    let parsed =
        parse_query(&store, table, "TRUEPREDICATE LIMIT(3) LIMIT(2)", &[]).unwrap();
    let mut view = parsed.query.find_all(&store).unwrap();
    view.apply_descriptor_ordering(&store, &parsed.ordering).unwrap();
    assert_eq!(view.size(), 2);
    assert_eq!(view.get_num_results_excluded_by_limit(), 1);
}

#[test]
fn sort_places_nulls_first_and_nan_below_negative_infinity() {
    let mut store = Store::new();
    let table = store.add_table("Sample");
    let value = store
        .add_column(table, "value", DataType::Double, ColAttrs::NULLABLE)
        .unwrap();
    let inputs = [
        Some(1.5),
        None,
        Some(f64::NAN),
        Some(f64::NEG_INFINITY),
        Some(0.0),
    ];
    for input in inputs {
        let key = store.create_object(table).unwrap();
        store
            .set(table, key, value, input.map_or(Value::Null, Value::Double))
            .unwrap();
    }

    let parsed = parse_query(&store, table, "TRUEPREDICATE SORT(value ASC)", &[]).unwrap();
    let mut view = parsed.query.find_all(&store).unwrap();
    view.apply_descriptor_ordering(&store, &parsed.ordering).unwrap();

    let t = store.table(table).unwrap();
    let sorted: Vec<Value> = view
        .keys()
        .iter()
        .map(|&key| t.object(&store, key).unwrap().get(value).unwrap())
        .collect();
    assert_eq!(sorted[0], Value::Null);
    assert!(matches!(sorted[1], Value::Double(v) if v.is_nan()));
    assert_eq!(sorted[2], Value::Double(f64::NEG_INFINITY));
    assert_eq!(sorted[3], Value::Double(0.0));
    assert_eq!(sorted[4], Value::Double(1.5));
}

#[test]
fn sort_follows_single_links_with_broken_links_first() {
    let mut store = Store::new();
    let table = store.add_table("Person");
    let name = store
        .add_column(table, "name", DataType::String, ColAttrs::empty())
        .unwrap();
    let buddy = store.add_link_column(table, "buddy", table, false).unwrap();

    let a = store.create_object(table).unwrap();
    let b = store.create_object(table).unwrap();
    let c = store.create_object(table).unwrap();
    store.set(table, a, name, Value::String("Ann".into())).unwrap();
    store.set(table, b, name, Value::String("Bea".into())).unwrap();
    store.set(table, c, name, Value::String("Col".into())).unwrap();
    store.set(table, a, buddy, Value::Link(c)).unwrap();
    store.set(table, b, buddy, Value::Link(a)).unwrap();
    // c has no buddy: its sort key is null and sorts first.

    let parsed =
        parse_query(&store, table, "TRUEPREDICATE SORT(buddy.name ASC)", &[]).unwrap();
    let mut view = parsed.query.find_all(&store).unwrap();
    view.apply_descriptor_ordering(&store, &parsed.ordering).unwrap();

    let t = store.table(table).unwrap();
    assert_eq!(names_of(&store, t, name, view.keys()), vec!["Col", "Bea", "Ann"]);
}

#[test]
fn include_walks_backlink_chains_hop_by_hop() {
    let mut store = Store::new();
    let table = store.add_table("Person");
    let name = store
        .add_column(table, "name", DataType::String, ColAttrs::empty())
        .unwrap();
    let father = store.add_link_column(table, "father", table, false).unwrap();

    let bones = store.create_object(table).unwrap();
    let john = store.create_object(table).unwrap();
    let mark = store.create_object(table).unwrap();
    let jonathan = store.create_object(table).unwrap();
    let eli = store.create_object(table).unwrap();
    for (key, n) in [
        (bones, "Bones"),
        (john, "John"),
        (mark, "Mark"),
        (jonathan, "Jonathan"),
        (eli, "Eli"),
    ] {
        store.set(table, key, name, Value::String(n.into())).unwrap();
    }
    store.set(table, john, father, Value::Link(bones)).unwrap();
    store.set(table, mark, father, Value::Link(john)).unwrap();
    store.set(table, jonathan, father, Value::Link(mark)).unwrap();
    store.set(table, eli, father, Value::Link(jonathan)).unwrap();

    let parsed = parse_query(
        &store,
        table,
        "name CONTAINS[c] 'bone' SORT(name DESC) INCLUDE(@links.Person.father.@links.Person.father.@links.Person.father.@links.Person.father)",
        &[],
    )
    .unwrap();
    let mut view = parsed.query.find_all(&store).unwrap();
    view.apply_descriptor_ordering(&store, &parsed.ordering).unwrap();
    assert_eq!(view.size(), 1);
    assert_eq!(view.get(0), bones);

    let includes = view.get_include_descriptors();
    assert!(!includes.is_empty());

    let t = store.table(table).unwrap();
    let mut reported: Vec<Vec<String>> = Vec::new();
    includes
        .report_included_backlinks(&store, t, view.get(0), &mut |origin, keys: &BTreeSet<ObjKey>| {
            assert_eq!(origin.key(), table);
            reported.push(
                keys.iter()
                    .map(|&key| match origin.object(&store, key).unwrap().get(name).unwrap() {
                        Value::String(s) => s,
                        other => panic!("expected string, got {other:?}"),
                    })
                    .collect(),
            );
        })
        .unwrap();

    assert_eq!(
        reported,
        vec![
            vec!["John".to_string()],
            vec!["Mark".to_string()],
            vec!["Jonathan".to_string()],
            vec!["Eli".to_string()],
        ]
    );
}

#[test]
fn include_requires_a_terminal_backlink() {
    let mut store = Store::new();
    let table = store.add_table("Person");
    store
        .add_column(table, "name", DataType::String, ColAttrs::empty())
        .unwrap();
    let _ = store.add_link_column(table, "father", table, false).unwrap();

    let err = parse_query(&store, table, "TRUEPREDICATE INCLUDE(father)", &[]).unwrap_err();
    assert!(err.to_string().contains("backlink"), "got {err}");

    let err = parse_query(&store, table, "TRUEPREDICATE INCLUDE(name)", &[]).unwrap_err();
    assert!(err.to_string().contains("INCLUDE"), "got {err}");

    // Forward links may appear before the terminal backlink.
    let parsed = parse_query(
        &store,
        table,
        "TRUEPREDICATE INCLUDE(father.@links.Person.father)",
        &[],
    )
    .unwrap();
    assert!(!parsed.ordering.is_empty());
}

#[test]
fn standalone_include_paths_parse_and_validate() {
    use strata_core::query::{parse_include_path, KeyPathMapping};

    let mut store = Store::new();
    let table = store.add_table("Person");
    store
        .add_column(table, "name", DataType::String, ColAttrs::empty())
        .unwrap();
    let _ = store.add_link_column(table, "father", table, false).unwrap();

    let mapping = KeyPathMapping::new();
    let include =
        parse_include_path(&store, table, &mapping, "@links.Person.father").unwrap();
    assert!(!include.is_empty());

    let err = parse_include_path(&store, table, &mapping, "father").unwrap_err();
    assert!(err.to_string().contains("backlink"));

    let err = parse_include_path(&store, table, &mapping, "9bad path!").unwrap_err();
    assert!(err.to_string().contains("INCLUDE"));
}

#[test]
fn views_resync_on_version_drift() {
    let (mut store, table, name) = people_fixture();
    let age = store.table(table).unwrap().get_column_key("age").unwrap();

    let parsed = parse_query(&store, table, "age > 28 SORT(name ASC)", &[]).unwrap();
    let mut view = parsed.query.find_all(&store).unwrap();
    view.apply_descriptor_ordering(&store, &parsed.ordering).unwrap();
    assert_eq!(view.size(), 1);
    assert!(view.is_in_sync(&store));
    assert!(!view.sync_if_needed(&store).unwrap());

    // Age Ben up; the view notices the version drift and refreshes.
    let ben = ObjKey(2);
    store.set(table, ben, age, Value::Int(41)).unwrap();
    assert!(!view.is_in_sync(&store));
    assert!(view.sync_if_needed(&store).unwrap());
    assert_eq!(view.size(), 2);

    let t = store.table(table).unwrap();
    assert_eq!(names_of(&store, t, name, view.keys()), vec!["Ben", "Frank"]);
}

#[test]
fn ordering_descriptions_round_trip() {
    let (store, table, _) = people_fixture();

    let text = "TRUEPREDICATE SORT(name ASC, age DESC) DISTINCT(age) LIMIT(2)";
    let parsed = parse_query(&store, table, text, &[]).unwrap();
    let t = store.table(table).unwrap();
    let description = parsed.ordering.get_description(t);
    assert_eq!(description, "SORT(name ASC, age DESC) DISTINCT(age) LIMIT(2)");

    let full = format!("TRUEPREDICATE {description}");
    let reparsed = parse_query(&store, table, &full, &[]).unwrap();
    assert_eq!(reparsed.ordering.get_description(t), description);
}
