use crate::key::{ColKey, DataType, ObjKey};
use crate::query::node::NOT_FOUND;
use crate::query::ExecContext;
use crate::store::Cluster;
use crate::value::{Timestamp, Value};

///
/// RelOp
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum RelOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl RelOp {
    pub(crate) fn token(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
        }
    }

    /// Mirrored operator for swapped operands (`v < col` → `col > v`).
    pub(crate) fn mirrored(self) -> Self {
        match self {
            Self::Less => Self::Greater,
            Self::LessEqual => Self::GreaterEqual,
            Self::Greater => Self::Less,
            Self::GreaterEqual => Self::LessEqual,
            op => op,
        }
    }

    pub(crate) fn is_ordering(self) -> bool {
        !matches!(self, Self::Equal | Self::NotEqual)
    }
}

/// One comparison under IEEE-style semantics: null participates in
/// equality only, ordering against null (or NaN) never matches.
fn rel_matches<T: PartialOrd>(op: RelOp, actual: &Option<T>, target: &Option<T>) -> bool {
    match op {
        RelOp::Equal => actual == target,
        RelOp::NotEqual => actual != target,
        RelOp::Less => matches!((actual, target), (Some(a), Some(b)) if a < b),
        RelOp::LessEqual => matches!((actual, target), (Some(a), Some(b)) if a <= b),
        RelOp::Greater => matches!((actual, target), (Some(a), Some(b)) if a > b),
        RelOp::GreaterEqual => matches!((actual, target), (Some(a), Some(b)) if a >= b),
    }
}

///
/// RelNode
///
/// Relational condition over numeric, bool, timestamp and link leaves.
/// The needle was coerced to the column type at build time.
///

#[derive(Clone, Debug)]
pub(crate) struct RelNode {
    pub col: ColKey,
    pub op: RelOp,
    pub value: Value,
}

impl RelNode {
    pub(crate) fn cost_tier(&self) -> f64 {
        match self.col.data_type() {
            DataType::Int | DataType::Bool => 0.25,
            _ => 1.0,
        }
    }

    pub(crate) fn find_first_local(
        &self,
        _cx: &ExecContext<'_>,
        cluster: &Cluster,
        start: usize,
        end: usize,
    ) -> usize {
        let leaf = cluster.leaf(self.col);
        match self.col.data_type() {
            DataType::Int => {
                let target = match &self.value {
                    Value::Null => None,
                    Value::Int(v) => Some(*v),
                    _ => return NOT_FOUND,
                };
                if self.op == RelOp::Equal {
                    if let crate::store::Leaf::Int(int_leaf) = leaf {
                        return int_leaf.find_first(target, start, end).unwrap_or(NOT_FOUND);
                    }
                }
                scan(start, end, |row| {
                    rel_matches(self.op, &leaf.get_int(row), &target)
                })
            }
            DataType::Bool => {
                let target = match &self.value {
                    Value::Null => None,
                    Value::Bool(v) => Some(*v),
                    _ => return NOT_FOUND,
                };
                scan(start, end, |row| {
                    rel_matches(self.op, &leaf.get_bool(row), &target)
                })
            }
            DataType::Float => {
                let target = match &self.value {
                    Value::Null => None,
                    Value::Float(v) => Some(*v),
                    _ => return NOT_FOUND,
                };
                scan(start, end, |row| {
                    rel_matches(self.op, &leaf.get_float(row), &target)
                })
            }
            DataType::Double => {
                let target = match &self.value {
                    Value::Null => None,
                    Value::Double(v) => Some(*v),
                    _ => return NOT_FOUND,
                };
                scan(start, end, |row| {
                    rel_matches(self.op, &leaf.get_double(row), &target)
                })
            }
            DataType::Timestamp => {
                let target: Option<Timestamp> = match &self.value {
                    Value::Null => None,
                    Value::Timestamp(v) => Some(*v),
                    _ => return NOT_FOUND,
                };
                scan(start, end, |row| {
                    rel_matches(self.op, &leaf.get_timestamp(row), &target)
                })
            }
            DataType::Link => {
                let target: Option<ObjKey> = match &self.value {
                    Value::Null => None,
                    Value::Link(k) => Some(*k),
                    _ => return NOT_FOUND,
                };
                scan(start, end, |row| {
                    let key = leaf.get_key(row);
                    let actual = (!key.is_null()).then_some(key);
                    rel_matches(self.op, &actual, &target)
                })
            }
            DataType::String | DataType::Binary | DataType::Backlink => NOT_FOUND,
        }
    }
}

///
/// BetweenNode
///
/// Coalesced range over one column: the lowering pass folds chained
/// inequalities (`x > a and x < b`) into a single scan.
///

#[derive(Clone, Debug)]
pub(crate) struct BetweenNode {
    pub col: ColKey,
    pub lower_op: RelOp,
    pub lower: Value,
    pub upper_op: RelOp,
    pub upper: Value,
}

impl BetweenNode {
    pub(crate) fn cost_tier(&self) -> f64 {
        match self.col.data_type() {
            DataType::Int | DataType::Bool => 0.25,
            _ => 1.0,
        }
    }

    pub(crate) fn find_first_local(
        &self,
        cx: &ExecContext<'_>,
        cluster: &Cluster,
        start: usize,
        end: usize,
    ) -> usize {
        let lower = RelNode {
            col: self.col,
            op: self.lower_op,
            value: self.lower.clone(),
        };
        let upper = RelNode {
            col: self.col,
            op: self.upper_op,
            value: self.upper.clone(),
        };
        let mut row = start;
        while row < end {
            let m = lower.find_first_local(cx, cluster, row, end);
            if m == NOT_FOUND {
                return NOT_FOUND;
            }
            if upper.find_first_local(cx, cluster, m, m + 1) == m {
                return m;
            }
            row = m + 1;
        }
        NOT_FOUND
    }
}

fn scan(start: usize, end: usize, matches: impl Fn(usize) -> bool) -> usize {
    (start..end).find(|&row| matches(row)).unwrap_or(NOT_FOUND)
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::{rel_matches, RelOp};

    #[test]
    fn null_participates_in_equality_only() {
        let null: Option<i64> = None;
        assert!(rel_matches(RelOp::Equal, &null, &None));
        assert!(rel_matches(RelOp::NotEqual, &Some(1), &None));
        assert!(!rel_matches(RelOp::Less, &null, &Some(1)));
        assert!(!rel_matches(RelOp::Greater, &Some(1), &None));
    }

    #[test]
    fn nan_never_orders() {
        let nan = Some(f64::NAN);
        assert!(!rel_matches(RelOp::Less, &nan, &Some(1.0)));
        assert!(!rel_matches(RelOp::GreaterEqual, &nan, &Some(1.0)));
        assert!(!rel_matches(RelOp::Equal, &nan, &nan));
        assert!(rel_matches(RelOp::NotEqual, &nan, &nan));
    }

    #[test]
    fn mirrored_swaps_ordering_only() {
        assert_eq!(RelOp::Less.mirrored(), RelOp::Greater);
        assert_eq!(RelOp::GreaterEqual.mirrored(), RelOp::LessEqual);
        assert_eq!(RelOp::Equal.mirrored(), RelOp::Equal);
    }
}
