use crate::key::DataType;
use crate::value::{Timestamp, Value};
use std::cmp::Ordering;

#[test]
fn structural_equality_distinguishes_variants() {
    assert_ne!(Value::Int(1), Value::Double(1.0));
    assert_eq!(Value::Int(1), Value::Int(1));
    assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
}

#[test]
fn coercion_widens_numerics_only() {
    assert_eq!(
        Value::Int(2).coerce_to(DataType::Double),
        Some(Value::Double(2.0))
    );
    assert_eq!(
        Value::Int(1).coerce_to(DataType::Bool),
        Some(Value::Bool(true))
    );
    assert_eq!(Value::Int(2).coerce_to(DataType::Bool), None);
    assert_eq!(Value::String("x".into()).coerce_to(DataType::Int), None);
    assert_eq!(
        Value::Double(4.0).coerce_to(DataType::Int),
        Some(Value::Int(4))
    );
    assert_eq!(Value::Double(4.5).coerce_to(DataType::Int), None);
}

#[test]
fn null_coerces_to_any_column_type() {
    for target in [DataType::Int, DataType::String, DataType::Link] {
        assert_eq!(Value::Null.coerce_to(target), Some(Value::Null));
    }
}

#[test]
fn partial_cmp_is_strict_per_variant() {
    assert_eq!(
        Value::Int(1).partial_cmp(&Value::Int(2)),
        Some(Ordering::Less)
    );
    assert_eq!(Value::Int(1).partial_cmp(&Value::Double(2.0)), None);
    assert_eq!(
        Value::Double(f64::NAN).partial_cmp(&Value::Double(1.0)),
        None
    );
}

#[test]
fn timestamps_order_canonically_with_null_first() {
    let values = [
        Value::Timestamp(Timestamp::new(1, 0).unwrap()),
        Value::Null,
        Value::Timestamp(Timestamp::new(-1, -1).unwrap()),
    ];
    let mut sorted = values.to_vec();
    sorted.sort_by(Value::canonical_cmp);

    assert_eq!(
        sorted,
        vec![
            Value::Null,
            Value::Timestamp(Timestamp::new(-1, -1).unwrap()),
            Value::Timestamp(Timestamp::new(1, 0).unwrap()),
        ]
    );
}
