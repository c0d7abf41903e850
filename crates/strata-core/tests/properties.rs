//! Property suites for the executable invariants: conjunction results
//! match brute force, double negation is identity, needle fusion
//! preserves semantics, and descriptions are round-trip stable.

use proptest::prelude::*;
use strata_core::key::{ColAttrs, ColKey, DataType, TableKey};
use strata_core::query::parse_query;
use strata_core::store::Store;
use strata_core::value::Value;

fn int_table(values: &[Option<i64>]) -> (Store, TableKey, ColKey) {
    let mut store = Store::new();
    let table = store.add_table("T");
    let v = store
        .add_column(table, "v", DataType::Int, ColAttrs::NULLABLE)
        .unwrap();
    for value in values {
        let key = store.create_object(table).unwrap();
        store
            .set(table, key, v, value.map_or(Value::Null, Value::Int))
            .unwrap();
    }
    (store, table, v)
}

fn string_table(values: &[String]) -> (Store, TableKey) {
    let mut store = Store::new();
    let table = store.add_table("T");
    let s = store
        .add_column(table, "s", DataType::String, ColAttrs::empty())
        .unwrap();
    for value in values {
        let key = store.create_object(table).unwrap();
        store.set(table, key, s, Value::String(value.clone())).unwrap();
    }
    (store, table)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn conjunction_count_matches_brute_force(
        values in prop::collection::vec(prop::option::of(-20_i64..20), 0..400),
        low in -20_i64..20,
        high in -20_i64..20,
    ) {
        let (store, table, _) = int_table(&values);
        let text = format!("v > {low} and v < {high}");
        let parsed = parse_query(&store, table, &text, &[]).unwrap();
        let expected = values
            .iter()
            .filter(|v| v.is_some_and(|v| v > low && v < high))
            .count();
        prop_assert_eq!(parsed.query.count(&store).unwrap(), expected);
    }

    #[test]
    fn double_negation_is_identity(
        values in prop::collection::vec(prop::option::of(-20_i64..20), 0..300),
        threshold in -20_i64..20,
    ) {
        let (store, table, _) = int_table(&values);
        let plain = parse_query(&store, table, &format!("v > {threshold}"), &[]).unwrap();
        let double = parse_query(&store, table, &format!("!(!(v > {threshold}))"), &[]).unwrap();

        let plain_keys = plain.query.find_all(&store).unwrap().keys().to_vec();
        let double_keys = double.query.find_all(&store).unwrap().keys().to_vec();
        prop_assert_eq!(plain_keys, double_keys);
    }

    #[test]
    fn negation_partitions_the_table(
        values in prop::collection::vec(prop::option::of(-20_i64..20), 0..300),
        threshold in -20_i64..20,
    ) {
        let (store, table, _) = int_table(&values);
        let positive = parse_query(&store, table, &format!("v > {threshold}"), &[]).unwrap();
        let negative = parse_query(&store, table, &format!("!(v > {threshold})"), &[]).unwrap();

        let a = positive.query.count(&store).unwrap();
        let b = negative.query.count(&store).unwrap();
        prop_assert_eq!(a + b, values.len());
    }

    #[test]
    fn needle_fusion_preserves_semantics(
        values in prop::collection::vec("[a-d]{1,2}", 0..200),
        needles in prop::collection::btree_set("[a-d]{1,2}", 1..4),
    ) {
        let (store, table) = string_table(&values);

        let ors = needles
            .iter()
            .map(|needle| format!("s == '{needle}'"))
            .collect::<Vec<_>>()
            .join(" or ");
        let braced = needles
            .iter()
            .map(|needle| format!("'{needle}'"))
            .collect::<Vec<_>>()
            .join(", ");
        let in_form = format!("s IN {{{braced}}}");

        let fused = parse_query(&store, table, &ors, &[]).unwrap();
        let listed = parse_query(&store, table, &in_form, &[]).unwrap();

        let fused_keys = fused.query.find_all(&store).unwrap().keys().to_vec();
        let listed_keys = listed.query.find_all(&store).unwrap().keys().to_vec();
        prop_assert_eq!(&fused_keys, &listed_keys);

        let expected = values
            .iter()
            .filter(|value| needles.contains(*value))
            .count();
        prop_assert_eq!(fused_keys.len(), expected);
    }

    #[test]
    fn descriptions_are_round_trip_stable(
        low in -20_i64..20,
        high in -20_i64..20,
        needle in "[a-z]{1,6}",
    ) {
        let mut store = Store::new();
        let table = store.add_table("T");
        store.add_column(table, "v", DataType::Int, ColAttrs::NULLABLE).unwrap();
        store.add_column(table, "s", DataType::String, ColAttrs::NULLABLE).unwrap();

        let text = format!("(v > {low} and v < {high}) or s BEGINSWITH[c] '{needle}' or s == NULL");
        let parsed = parse_query(&store, table, &text, &[]).unwrap();
        let description = parsed.query.get_description(&store).unwrap();
        let reparsed = parse_query(&store, table, &description, &[]).unwrap();
        prop_assert_eq!(reparsed.query.get_description(&store).unwrap(), description);
    }

    #[test]
    fn sort_is_total_over_nulls_and_nan(
        values in prop::collection::vec(
            prop::option::of(prop_oneof![
                Just(f64::NAN),
                Just(f64::NEG_INFINITY),
                Just(f64::INFINITY),
                -1e9_f64..1e9,
            ]),
            0..120,
        ),
    ) {
        let mut store = Store::new();
        let table = store.add_table("T");
        let col = store
            .add_column(table, "v", DataType::Double, ColAttrs::NULLABLE)
            .unwrap();
        for value in &values {
            let key = store.create_object(table).unwrap();
            store
                .set(table, key, col, value.map_or(Value::Null, Value::Double))
                .unwrap();
        }

        let parsed = parse_query(&store, table, "TRUEPREDICATE SORT(v ASC)", &[]).unwrap();
        let mut view = parsed.query.find_all(&store).unwrap();
        view.apply_descriptor_ordering(&store, &parsed.ordering).unwrap();
        prop_assert_eq!(view.size(), values.len());

        let t = store.table(table).unwrap();
        let sorted: Vec<Value> = view
            .keys()
            .iter()
            .map(|&key| t.object(&store, key).unwrap().get(col).unwrap())
            .collect();

        // Null block first, then NaN block, then ordered numbers.
        let mut stage = 0;
        let mut previous: Option<f64> = None;
        for value in sorted {
            match value {
                Value::Null => prop_assert_eq!(stage, 0, "null after non-null"),
                Value::Double(v) if v.is_nan() => {
                    prop_assert!(stage <= 1, "NaN after a non-NaN double");
                    stage = 1;
                }
                Value::Double(v) => {
                    stage = 2;
                    if let Some(prev) = previous {
                        prop_assert!(prev <= v, "doubles out of order: {prev} > {v}");
                    }
                    previous = Some(v);
                }
                other => prop_assert!(false, "unexpected value {:?}", other),
            }
        }
    }
}
