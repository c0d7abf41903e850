use crate::value::Value;
use std::cmp::Ordering;

/// Total canonical comparator used by sort, distinct, aggregation and the
/// expression engine.
///
/// Ordering rules:
/// 1. Canonical variant rank (null first, then the numeric family, then
///    the remaining variants).
/// 2. Variant-specific comparison for same-ranked values. Mixed members of
///    the numeric family compare through f64 promotion.
///
/// NaN sorts below every non-NaN float/double; NaN-vs-NaN compares by raw
/// bit pattern so the order stays total and deterministic.
#[must_use]
pub(crate) fn canonical_cmp(left: &Value, right: &Value) -> Ordering {
    let rank = canonical_rank(left).cmp(&canonical_rank(right));
    if rank != Ordering::Equal {
        return rank;
    }

    canonical_cmp_same_rank(left, right)
}

/// Stable canonical rank used by all cross-variant ordering surfaces.
#[must_use]
pub(crate) const fn canonical_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Int(_) | Value::Float(_) | Value::Double(_) => 1,
        Value::Bool(_) => 2,
        Value::Timestamp(_) => 3,
        Value::String(_) => 4,
        Value::Binary(_) => 5,
        Value::Link(_) => 6,
        Value::List(_) => 7,
    }
}

/// Strict comparator for identical orderable variants.
///
/// Returns `None` for mismatched variants; floats follow IEEE partial
/// comparison here (use [`canonical_cmp`] for the total order).
#[must_use]
pub(crate) fn strict_order_cmp(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Binary(a), Value::Binary(b)) => Some(a.cmp(b)),
        (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
        (Value::Link(a), Value::Link(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn canonical_cmp_same_rank(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp_parts(*b),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Binary(a), Value::Binary(b)) => a.cmp(b),
        (Value::Link(a), Value::Link(b)) => a.cmp(b),
        (Value::List(a), Value::List(b)) => canonical_cmp_list(a, b),
        // Same rank and not handled above means the numeric family.
        _ => numeric_cmp(left, right),
    }
}

fn numeric_cmp(left: &Value, right: &Value) -> Ordering {
    if let (Value::Int(a), Value::Int(b)) = (left, right) {
        return a.cmp(b);
    }

    // Mixed widths promote to f64; NaN bit patterns are preserved by the
    // promotion for the tie-break below.
    let a = left.as_f64().unwrap_or(f64::NAN);
    let b = right.as_f64().unwrap_or(f64::NAN);
    float_total_cmp(a, b)
}

/// Total order over doubles: NaN below all non-NaN, NaN-vs-NaN by raw
/// bit pattern.
#[must_use]
pub(crate) fn float_total_cmp(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => a.to_bits().cmp(&b.to_bits()),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

fn canonical_cmp_list(left: &[Value], right: &[Value]) -> Ordering {
    for (left, right) in left.iter().zip(right.iter()) {
        let cmp = canonical_cmp(left, right);
        if cmp != Ordering::Equal {
            return cmp;
        }
    }

    left.len().cmp(&right.len())
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::{canonical_cmp, float_total_cmp};
    use crate::value::Value;
    use std::cmp::Ordering;

    #[test]
    fn null_sorts_below_everything() {
        for value in [
            Value::Int(i64::MIN),
            Value::Double(f64::NEG_INFINITY),
            Value::Double(f64::NAN),
            Value::Bool(false),
            Value::String(String::new()),
        ] {
            assert_eq!(
                canonical_cmp(&Value::Null, &value),
                Ordering::Less,
                "null must order below {value:?}",
            );
        }
    }

    #[test]
    fn nan_sorts_below_all_non_nan_doubles() {
        assert_eq!(
            canonical_cmp(&Value::Double(f64::NAN), &Value::Double(f64::NEG_INFINITY)),
            Ordering::Less
        );
        assert_eq!(
            canonical_cmp(&Value::Double(-1.0), &Value::Double(f64::NAN)),
            Ordering::Greater
        );
    }

    #[test]
    fn nan_vs_nan_compares_by_raw_bits() {
        let quiet = f64::from_bits(0x7FF8_0000_0000_0000);
        let payload = f64::from_bits(0x7FF8_0000_0000_0001);

        assert_eq!(float_total_cmp(quiet, payload), Ordering::Less);
        assert_eq!(float_total_cmp(payload, payload), Ordering::Equal);
    }

    #[test]
    fn mixed_numeric_widths_compare_through_promotion() {
        assert_eq!(
            canonical_cmp(&Value::Int(2), &Value::Double(2.5)),
            Ordering::Less
        );
        assert_eq!(
            canonical_cmp(&Value::Float(3.0), &Value::Int(3)),
            Ordering::Equal
        );
    }

    #[test]
    fn lists_compare_elementwise_then_by_length() {
        let short = Value::List(vec![Value::Int(1)]);
        let long = Value::List(vec![Value::Int(1), Value::Int(2)]);

        assert_eq!(canonical_cmp(&short, &long), Ordering::Less);
    }
}
