use crate::key::{ColAttrs, ColKey, DataType, TableKey};
use crate::query::compile;
use crate::query::node::{chain_find_first, NodeKind, NOT_FOUND};
use crate::query::{ExecContext, Query};
use crate::store::Store;
use crate::value::Value;

fn people() -> (Store, TableKey, ColKey, ColKey) {
    let mut store = Store::new();
    let table = store.add_table("Person");
    let name = store
        .add_column(table, "name", DataType::String, ColAttrs::NULLABLE)
        .unwrap();
    let age = store
        .add_column(table, "age", DataType::Int, ColAttrs::empty())
        .unwrap();
    for (n, a) in [("Billy", 0), ("Bob", 1), ("Joe", 2), ("Jane", 3), ("Joel", 4)] {
        let key = store.create_object(table).unwrap();
        store.set(table, key, name, Value::String(n.into())).unwrap();
        store.set(table, key, age, Value::Int(a)).unwrap();
    }
    (store, table, name, age)
}

#[test]
fn conjunction_returns_smallest_satisfying_row() {
    let (store, table, _, age) = people();
    let query = Query::new(table).greater(age, 2).less(age, 5);

    let first = query.find_first(&store).unwrap().unwrap();
    let value = store
        .table(table)
        .unwrap()
        .object(&store, first)
        .unwrap()
        .get(age)
        .unwrap();
    assert_eq!(value, Value::Int(3));
    assert_eq!(query.count(&store).unwrap(), 2);
}

#[test]
fn chained_inequalities_coalesce_into_one_range_node() {
    let (store, table, _, age) = people();
    let query = Query::new(table).greater(age, 0).less(age, 3);

    let store_table = store.table(table).unwrap();
    let cx = ExecContext {
        store: &store,
        table: store_table,
    };
    let nodes = compile::compile(&cx, query.root()).unwrap();
    assert_eq!(nodes.len(), 1, "bounds on one column should coalesce");
    assert!(matches!(nodes[0].kind, NodeKind::Between(_)));
    assert_eq!(query.count(&store).unwrap(), 2);
}

#[test]
fn disjunction_of_string_equalities_fuses_needles() {
    let (store, table, name, _) = people();
    let query = Query::new(table).equal(name, "Bob")
        | Query::new(table).equal(name, "Jane")
        | Query::new(table).equal(name, "Joe");

    let store_table = store.table(table).unwrap();
    let cx = ExecContext {
        store: &store,
        table: store_table,
    };
    let nodes = compile::compile(&cx, query.root()).unwrap();
    assert_eq!(nodes.len(), 1);
    let NodeKind::StringEqual(fused) = &nodes[0].kind else {
        panic!("expected a fused string-equal node, got {:?}", nodes[0].kind);
    };
    assert!(fused.is_fused());
    assert_eq!(fused.needles.len(), 3);

    assert_eq!(query.count(&store).unwrap(), 3);
}

#[test]
fn fusion_preserves_match_order_of_find_first() {
    let (store, table, name, _) = people();
    let fused = Query::new(table).equal(name, "Joel") | Query::new(table).equal(name, "Billy");

    // The fused scan reports matches in row order, not needle order.
    let first = fused.find_first(&store).unwrap().unwrap();
    let value = store
        .table(table)
        .unwrap()
        .object(&store, first)
        .unwrap()
        .get(name)
        .unwrap();
    assert_eq!(value, Value::String("Billy".into()));
}

#[test]
fn double_negation_matches_the_original_key_set() {
    let (store, table, _, age) = people();
    let plain = Query::new(table).greater(age, 1);
    let double = Query::new(table).greater(age, 1).negate().negate();

    let plain_keys = plain.find_all(&store).unwrap().keys().to_vec();
    let double_keys = double.find_all(&store).unwrap().keys().to_vec();
    assert_eq!(plain_keys, double_keys);
}

#[test]
fn not_node_cached_range_survives_equal_width_disjoint_requests() {
    let (store, table, _, age) = people();
    let store_table = store.table(table).unwrap();
    let cx = ExecContext {
        store: &store,
        table: store_table,
    };
    let query = Query::new(table).greater(age, 10).negate();
    let mut nodes = compile::compile(&cx, query.root()).unwrap();
    for node in &mut nodes {
        node.table_changed(&cx).unwrap();
        node.init(&cx, true).unwrap();
    }
    let cluster = &store_table.clusters[0];
    for node in &mut nodes {
        node.cluster_changed(&cx, cluster).unwrap();
    }

    let NodeKind::Not(not) = &mut nodes[0].kind else {
        panic!("expected a NOT node");
    };
    // Establish a known range of width two.
    assert_eq!(not.find_first_local(&cx, cluster, 0, 2).unwrap(), 0);
    let before = not.known_range();
    // An equal-width disjoint request must not displace the cache.
    assert_eq!(not.find_first_local(&cx, cluster, 3, 5).unwrap(), 3);
    assert_eq!(not.known_range(), before);
    // A wider overlapping request extends it.
    assert_eq!(not.find_first_local(&cx, cluster, 2, 5).unwrap(), 2);
    assert_ne!(not.known_range(), before);
}

#[test]
fn indexed_equality_reports_matches_in_key_order_and_resets_cursor() {
    let mut store = Store::new();
    let table = store.add_table("T");
    let name = store
        .add_column(
            table,
            "name",
            DataType::String,
            ColAttrs::NULLABLE.with(ColAttrs::INDEXED),
        )
        .unwrap();
    for value in ["a", "b", "a", "c", "a"] {
        let key = store.create_object(table).unwrap();
        store.set(table, key, name, Value::String(value.into())).unwrap();
    }

    let store_table = store.table(table).unwrap();
    let cx = ExecContext {
        store: &store,
        table: store_table,
    };
    let query = Query::new(table).equal(name, "a");
    let mut nodes = compile::compile(&cx, query.root()).unwrap();
    nodes[0].table_changed(&cx).unwrap();
    nodes[0].init(&cx, true).unwrap();
    let cluster = &store_table.clusters[0];
    nodes[0].cluster_changed(&cx, cluster).unwrap();

    // Ascending starts produce non-decreasing results.
    let mut previous = 0;
    let mut found = Vec::new();
    loop {
        let row = nodes[0]
            .find_first_local(&cx, cluster, previous, cluster.size())
            .unwrap();
        if row == NOT_FOUND {
            break;
        }
        found.push(row);
        previous = row + 1;
    }
    assert_eq!(found, vec![0, 2, 4]);

    // A non-monotonic start resets the internal cursor.
    let row = nodes[0].find_first_local(&cx, cluster, 0, cluster.size()).unwrap();
    assert_eq!(row, 0);
}

#[test]
fn empty_chain_matches_everything_in_range() {
    let (store, table, _, _) = people();
    let store_table = store.table(table).unwrap();
    let cx = ExecContext {
        store: &store,
        table: store_table,
    };
    let cluster = &store_table.clusters[0];
    assert_eq!(chain_find_first(&mut [], &cx, cluster, 2, 5).unwrap(), 2);
    assert_eq!(chain_find_first(&mut [], &cx, cluster, 5, 5).unwrap(), NOT_FOUND);
}

#[test]
fn aggregate_rejects_non_numeric_columns() {
    let (store, table, name, age) = people();
    let query = Query::new(table);

    let err = query
        .aggregate(
            &store,
            crate::query::AggregateSpec {
                op: crate::query::AggregateOp::Sum,
                col: name,
            },
        )
        .unwrap_err();
    assert!(matches!(err, crate::error::Error::Unsupported { .. }));

    let sum = query
        .aggregate(
            &store,
            crate::query::AggregateSpec {
                op: crate::query::AggregateOp::Sum,
                col: age,
            },
        )
        .unwrap();
    assert_eq!(sum, Value::Int(10));
}
