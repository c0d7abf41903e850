use crate::error::Error;
use crate::key::{ColKey, DataType, ObjKey, TableKey};
use crate::query::link_map::LinkMap;
use crate::query::node::{chain_find_first, ConditionNode};
use crate::query::ExecContext;
use crate::store::Cluster;
use crate::value::{
    bin_begins_with, bin_contains, bin_ends_with, bin_equal, bin_like, str_begins_with,
    str_contains, str_ends_with, str_equal, str_like, Value,
};
use smallvec::SmallVec;
use std::cmp::Ordering;

///
/// ExprValue
///
/// Evaluation destination: one or many values plus the flag telling the
/// comparison layer whether the values came from a multi-valued source
/// (list column, list link or backlink traversal).
///

#[derive(Clone, Debug, Default)]
pub(crate) struct ExprValue {
    pub values: SmallVec<[Value; 2]>,
    pub from_list: bool,
}

impl ExprValue {
    pub(crate) fn single(value: Value) -> Self {
        let mut values = SmallVec::new();
        values.push(value);
        Self {
            values,
            from_list: false,
        }
    }

    pub(crate) fn many(values: SmallVec<[Value; 2]>) -> Self {
        Self {
            values,
            from_list: true,
        }
    }
}

///
/// AggrOp
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum AggrOp {
    Min,
    Max,
    Sum,
    Avg,
    Count,
    Size,
    /// Total number of incoming links over every backlink column
    /// (`@links.@count`).
    BacklinkCount,
}

impl AggrOp {
    pub(crate) fn token(self) -> &'static str {
        match self {
            Self::Min => "@min",
            Self::Max => "@max",
            Self::Sum => "@sum",
            Self::Avg => "@avg",
            Self::Count | Self::BacklinkCount => "@count",
            Self::Size => "@size",
        }
    }
}

///
/// Expr
///
/// Typed expression tree leaf/branch set. Every variant evaluates one row
/// into an `ExprValue`; list-valued intermediates fan out through the
/// link map before scalar folding.
///

#[derive(Clone, Debug)]
pub(crate) enum Expr {
    Literal(Value),
    Column {
        link_map: LinkMap,
        col: ColKey,
    },
    /// The traversed object itself (terminal link chain without a scalar
    /// column, as in `items == $0` or subquery variables).
    SelfKey {
        link_map: LinkMap,
    },
    Aggregate {
        link_map: LinkMap,
        col: Option<ColKey>,
        op: AggrOp,
    },
    SubQueryCount(Box<SubQueryExpr>),
}

///
/// SubQueryExpr
///
/// `SUBQUERY(list, $var, predicate).@count`: a fresh node tree bound to
/// the element type of `list`, counted per outer row.
///

#[derive(Clone, Debug)]
pub(crate) struct SubQueryExpr {
    pub link_map: LinkMap,
    pub var: String,
    pub target_table: TableKey,
    pub nodes: Vec<ConditionNode>,
    last_cluster: Option<usize>,
}

impl SubQueryExpr {
    pub(crate) fn new(
        link_map: LinkMap,
        var: String,
        target_table: TableKey,
        nodes: Vec<ConditionNode>,
    ) -> Self {
        Self {
            link_map,
            var,
            target_table,
            nodes,
            last_cluster: None,
        }
    }

    fn init(&mut self, cx: &ExecContext<'_>) -> Result<(), Error> {
        let table = cx.store.table_or_stale(self.target_table)?;
        let inner_cx = ExecContext {
            store: cx.store,
            table,
        };
        for node in &mut self.nodes {
            node.table_changed(&inner_cx)?;
            node.init(&inner_cx, false)?;
        }
        self.last_cluster = None;
        Ok(())
    }

    /// Number of list elements satisfying the inner predicate.
    fn count(&mut self, cx: &ExecContext<'_>, start_key: ObjKey) -> Result<i64, Error> {
        let table = cx.store.table_or_stale(self.target_table)?;
        let inner_cx = ExecContext {
            store: cx.store,
            table,
        };
        let targets = self.link_map.collect_links(cx.store, start_key);
        let mut count = 0;
        for key in targets {
            let Some((cluster_index, row)) = table.locate(key) else {
                continue;
            };
            let cluster = &table.clusters[cluster_index];
            if self.last_cluster != Some(cluster_index) {
                for node in &mut self.nodes {
                    node.cluster_changed(&inner_cx, cluster)?;
                }
                self.last_cluster = Some(cluster_index);
            }
            if chain_find_first(&mut self.nodes, &inner_cx, cluster, row, row + 1)? == row {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl Expr {
    /// Cost estimate and nested-tree initialisation; returns the
    /// expression's contribution to `dT`.
    pub(crate) fn init(&mut self, cx: &ExecContext<'_>) -> Result<f64, Error> {
        match self {
            Self::Literal(_) => Ok(0.0),
            Self::Column { .. } | Self::SelfKey { .. } => Ok(50.0),
            Self::Aggregate { .. } => Ok(50.0),
            Self::SubQueryCount(subquery) => {
                subquery.init(cx)?;
                Ok(50.0)
            }
        }
    }

    pub(crate) fn collect_dependencies(&self, cx: &ExecContext<'_>, tables: &mut Vec<TableKey>) {
        match self {
            Self::Literal(_) => {}
            Self::Column { link_map, .. }
            | Self::SelfKey { link_map }
            | Self::Aggregate { link_map, .. } => {
                link_map.collect_dependencies(cx.store, tables);
            }
            Self::SubQueryCount(subquery) => {
                subquery.link_map.collect_dependencies(cx.store, tables);
                if !tables.contains(&subquery.target_table) {
                    tables.push(subquery.target_table);
                }
                let Ok(table) = cx.store.table_or_stale(subquery.target_table) else {
                    return;
                };
                let inner_cx = ExecContext {
                    store: cx.store,
                    table,
                };
                for node in &subquery.nodes {
                    node.collect_dependencies(&inner_cx, tables);
                }
            }
        }
    }

    pub(crate) fn evaluate(
        &mut self,
        cx: &ExecContext<'_>,
        cluster: &Cluster,
        row: usize,
    ) -> Result<ExprValue, Error> {
        match self {
            Self::Literal(value) => Ok(ExprValue::single(value.clone())),
            Self::Column { link_map, col } => {
                Ok(evaluate_column(cx, cluster, row, link_map, *col))
            }
            Self::SelfKey { link_map } => Ok(evaluate_self_key(cx, cluster, row, link_map)),
            Self::Aggregate { link_map, col, op } => {
                evaluate_aggregate(cx, cluster, row, link_map, *col, *op)
            }
            Self::SubQueryCount(subquery) => {
                let start_key = cluster.get_real_key(row);
                let count = subquery.count(cx, start_key)?;
                Ok(ExprValue::single(Value::Int(count)))
            }
        }
    }
}

fn evaluate_column(
    cx: &ExecContext<'_>,
    cluster: &Cluster,
    row: usize,
    link_map: &LinkMap,
    col: ColKey,
) -> ExprValue {
    if !link_map.has_links() {
        let value = cluster.leaf(col).value_at(row, cx.table.interner(col));
        return match value {
            Value::List(items) => ExprValue::many(items.into()),
            value => ExprValue::single(value),
        };
    }

    let target_table = link_map.target_table(cx.store, cx.table.key());
    let start_key = cluster.get_real_key(row);
    let mut values: SmallVec<[Value; 2]> = SmallVec::new();
    if let Some(table) = cx.store.table(target_table) {
        link_map.map_links(cx.store, start_key, &mut |key| {
            match table.value_at_key(key, col) {
                Some(Value::List(items)) => values.extend(items),
                Some(value) => values.push(value),
                None => {}
            }
            true
        });
    }

    if link_map.only_unary_links() && !col.is_list() {
        // A broken unary chain still yields one value so null
        // comparisons see the missing link.
        let value = values.pop().unwrap_or(Value::Null);
        ExprValue::single(value)
    } else {
        ExprValue::many(values)
    }
}

fn evaluate_self_key(
    cx: &ExecContext<'_>,
    cluster: &Cluster,
    row: usize,
    link_map: &LinkMap,
) -> ExprValue {
    if !link_map.has_links() {
        return ExprValue::single(Value::Link(cluster.get_real_key(row)));
    }
    let start_key = cluster.get_real_key(row);
    let keys = link_map.collect_links(cx.store, start_key);
    if link_map.only_unary_links() {
        let value = keys.first().map_or(Value::Null, |&k| Value::Link(k));
        ExprValue::single(value)
    } else {
        ExprValue::many(keys.into_iter().map(Value::Link).collect())
    }
}

fn evaluate_aggregate(
    cx: &ExecContext<'_>,
    cluster: &Cluster,
    row: usize,
    link_map: &LinkMap,
    col: Option<ColKey>,
    op: AggrOp,
) -> Result<ExprValue, Error> {
    if op == AggrOp::BacklinkCount {
        return Ok(ExprValue::single(Value::Int(backlink_count(
            cx, cluster, row, link_map,
        ))));
    }

    // @count over links (no terminal column) is the chain's cardinality.
    let Some(col) = col else {
        let start_key = cluster.get_real_key(row);
        let mut count = 0_i64;
        link_map.map_links(cx.store, start_key, &mut |_| {
            count += 1;
            true
        });
        return Ok(ExprValue::single(Value::Int(count)));
    };

    let collected = evaluate_column(cx, cluster, row, link_map, col);
    match op {
        AggrOp::Count | AggrOp::Size => {
            match col.data_type() {
                // Byte length per element for strings and binaries.
                DataType::String | DataType::Binary if !col.is_list() => {
                    let sizes = collected
                        .values
                        .iter()
                        .map(|value| match value {
                            Value::String(s) => Value::Int(i64::try_from(s.len()).unwrap_or(i64::MAX)),
                            Value::Binary(b) => Value::Int(i64::try_from(b.len()).unwrap_or(i64::MAX)),
                            _ => Value::Null,
                        })
                        .collect();
                    Ok(ExprValue {
                        values: sizes,
                        from_list: collected.from_list,
                    })
                }
                _ => Ok(ExprValue::single(Value::Int(
                    i64::try_from(collected.values.len()).unwrap_or(i64::MAX),
                ))),
            }
        }
        AggrOp::Min | AggrOp::Max | AggrOp::Sum | AggrOp::Avg => {
            Ok(ExprValue::single(fold_numeric(&collected.values, op)))
        }
        AggrOp::BacklinkCount => unreachable!("handled above"),
    }
}

fn backlink_count(
    cx: &ExecContext<'_>,
    cluster: &Cluster,
    row: usize,
    link_map: &LinkMap,
) -> i64 {
    let count_at = |table: &crate::store::Table, key: ObjKey| -> i64 {
        let Some((cluster_index, row)) = table.locate(key) else {
            return 0;
        };
        let cluster = &table.clusters[cluster_index];
        table
            .columns
            .iter()
            .filter(|column| column.key.data_type() == DataType::Backlink)
            .map(|column| cluster.leaf(column.key).get_key_list(row).len() as i64)
            .sum()
    };

    if !link_map.has_links() {
        let key = cluster.get_real_key(row);
        return count_at(cx.table, key);
    }

    let target_key = link_map.target_table(cx.store, cx.table.key());
    let Some(target) = cx.store.table(target_key) else {
        return 0;
    };
    let start_key = cluster.get_real_key(row);
    let mut total = 0;
    link_map.map_links(cx.store, start_key, &mut |key| {
        total += count_at(target, key);
        true
    });
    total
}

/// Fold a collected value list under a numeric aggregate, skipping nulls.
/// Empty folds return the null sentinel for min/max/avg and the additive
/// identity for sum.
fn fold_numeric(values: &[Value], op: AggrOp) -> Value {
    let non_null: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();

    match op {
        AggrOp::Min | AggrOp::Max => {
            let mut best: Option<&Value> = None;
            for value in non_null {
                let replace = best.is_none_or(|current| {
                    let cmp = Value::canonical_cmp(value, current);
                    if op == AggrOp::Min {
                        cmp == Ordering::Less
                    } else {
                        cmp == Ordering::Greater
                    }
                });
                if replace {
                    best = Some(value);
                }
            }
            best.cloned().unwrap_or(Value::Null)
        }
        AggrOp::Sum | AggrOp::Avg => {
            let mut int_sum = 0_i64;
            let mut double_sum = 0.0_f64;
            let mut all_int = true;
            let mut count = 0_u64;
            for value in &non_null {
                match value {
                    Value::Int(v) => {
                        // Wrap-around semantics; overflow never raises.
                        int_sum = int_sum.wrapping_add(*v);
                        double_sum += *v as f64;
                    }
                    Value::Float(v) => {
                        all_int = false;
                        double_sum += f64::from(*v);
                    }
                    Value::Double(v) => {
                        all_int = false;
                        double_sum += *v;
                    }
                    _ => {}
                }
                count += 1;
            }
            if op == AggrOp::Sum {
                if all_int {
                    Value::Int(int_sum)
                } else {
                    Value::Double(double_sum)
                }
            } else if count == 0 {
                Value::Null
            } else {
                Value::Double(double_sum / count as f64)
            }
        }
        AggrOp::Count | AggrOp::Size | AggrOp::BacklinkCount => {
            Value::Int(i64::try_from(values.len()).unwrap_or(i64::MAX))
        }
    }
}

///
/// ExprCmpOp
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ExprCmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    BeginsWith,
    EndsWith,
    Like,
}

impl ExprCmpOp {
    pub(crate) fn token(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Contains => "CONTAINS",
            Self::BeginsWith => "BEGINSWITH",
            Self::EndsWith => "ENDSWITH",
            Self::Like => "LIKE",
        }
    }
}

///
/// CompareExpr
///
/// General comparison over two expression trees. Multi-valued sides use
/// exists semantics: the row matches when any left/right value pair
/// satisfies the operator.
///

#[derive(Clone, Debug)]
pub(crate) struct CompareExpr {
    pub op: ExprCmpOp,
    pub case_sensitive: bool,
    pub left: Expr,
    pub right: Expr,
}

impl CompareExpr {
    pub(crate) fn init(&mut self, cx: &ExecContext<'_>) -> Result<f64, Error> {
        let left = self.left.init(cx)?;
        let right = self.right.init(cx)?;
        Ok(left.max(right).max(50.0))
    }

    pub(crate) fn collect_dependencies(&self, cx: &ExecContext<'_>, tables: &mut Vec<TableKey>) {
        self.left.collect_dependencies(cx, tables);
        self.right.collect_dependencies(cx, tables);
    }

    pub(crate) fn matches(
        &mut self,
        cx: &ExecContext<'_>,
        cluster: &Cluster,
        row: usize,
    ) -> Result<bool, Error> {
        let left = self.left.evaluate(cx, cluster, row)?;
        let right = self.right.evaluate(cx, cluster, row)?;

        for a in &left.values {
            for b in &right.values {
                if pair_matches(self.op, self.case_sensitive, a, b) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

/// One value pair under one operator. Invalid combinations (type
/// mismatch, null in an ordering comparison, NaN) are non-matches.
pub(crate) fn pair_matches(op: ExprCmpOp, case_sensitive: bool, a: &Value, b: &Value) -> bool {
    match op {
        ExprCmpOp::Eq => value_eq(a, b, case_sensitive),
        ExprCmpOp::Ne => !value_eq(a, b, case_sensitive),
        ExprCmpOp::Lt => value_order(a, b).is_some_and(Ordering::is_lt),
        ExprCmpOp::Le => value_order(a, b).is_some_and(Ordering::is_le),
        ExprCmpOp::Gt => value_order(a, b).is_some_and(Ordering::is_gt),
        ExprCmpOp::Ge => value_order(a, b).is_some_and(Ordering::is_ge),
        ExprCmpOp::Contains => match (a, b) {
            (Value::String(hay), Value::String(needle)) => {
                str_contains(hay, needle, case_sensitive)
            }
            (Value::Binary(hay), Value::Binary(needle)) => {
                bin_contains(hay, needle, case_sensitive)
            }
            _ => false,
        },
        ExprCmpOp::BeginsWith => match (a, b) {
            (Value::String(hay), Value::String(needle)) => {
                str_begins_with(hay, needle, case_sensitive)
            }
            (Value::Binary(hay), Value::Binary(needle)) => {
                bin_begins_with(hay, needle, case_sensitive)
            }
            _ => false,
        },
        ExprCmpOp::EndsWith => match (a, b) {
            (Value::String(hay), Value::String(needle)) => {
                str_ends_with(hay, needle, case_sensitive)
            }
            (Value::Binary(hay), Value::Binary(needle)) => {
                bin_ends_with(hay, needle, case_sensitive)
            }
            _ => false,
        },
        ExprCmpOp::Like => match (a, b) {
            (Value::String(hay), Value::String(pattern)) => {
                str_like(hay, pattern, case_sensitive)
            }
            (Value::Binary(hay), Value::Binary(pattern)) => {
                bin_like(hay, pattern, case_sensitive)
            }
            _ => false,
        },
    }
}

/// Equality across the value kinds, with numeric promotion and the null
/// identity (`null == null` holds, `null == x` does not).
pub(crate) fn value_eq(a: &Value, b: &Value, case_sensitive: bool) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(a), Value::String(b)) => str_equal(a, b, case_sensitive),
        (Value::Binary(a), Value::Binary(b)) => bin_equal(a, b, case_sensitive),
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
        (Value::Link(a), Value::Link(b)) => a == b,
        _ if a.is_numeric() && b.is_numeric() => {
            if let (Value::Int(a), Value::Int(b)) = (a, b) {
                a == b
            } else {
                // IEEE equality after promotion: NaN never equals NaN.
                a.as_f64().zip(b.as_f64()).is_some_and(|(a, b)| a == b)
            }
        }
        _ => false,
    }
}

/// IEEE-style ordering: `None` for nulls, NaN, or mismatched kinds.
pub(crate) fn value_order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
        _ if a.is_numeric() && b.is_numeric() => {
            if let (Value::Int(a), Value::Int(b)) = (a, b) {
                Some(a.cmp(b))
            } else {
                let (a, b) = (a.as_f64()?, b.as_f64()?);
                a.partial_cmp(&b)
            }
        }
        _ => None,
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::{fold_numeric, pair_matches, value_eq, AggrOp, ExprCmpOp};
    use crate::value::Value;

    #[test]
    fn fold_over_empty_list_returns_sentinels() {
        assert_eq!(fold_numeric(&[], AggrOp::Min), Value::Null);
        assert_eq!(fold_numeric(&[], AggrOp::Avg), Value::Null);
        assert_eq!(fold_numeric(&[], AggrOp::Sum), Value::Int(0));
    }

    #[test]
    fn sum_wraps_in_twos_complement() {
        let folded = fold_numeric(&[Value::Int(i64::MAX), Value::Int(1)], AggrOp::Sum);
        assert_eq!(folded, Value::Int(i64::MIN));
    }

    #[test]
    fn fold_skips_nulls() {
        let values = [Value::Null, Value::Double(2.0), Value::Double(4.0)];
        assert_eq!(fold_numeric(&values, AggrOp::Avg), Value::Double(3.0));
        assert_eq!(fold_numeric(&values, AggrOp::Min), Value::Double(2.0));
    }

    #[test]
    fn null_equality_is_reflexive_only() {
        assert!(value_eq(&Value::Null, &Value::Null, true));
        assert!(!value_eq(&Value::Null, &Value::Int(0), true));
    }

    #[test]
    fn ordering_comparisons_reject_nan_and_null() {
        for op in [ExprCmpOp::Lt, ExprCmpOp::Le, ExprCmpOp::Gt, ExprCmpOp::Ge] {
            assert!(!pair_matches(op, true, &Value::Double(f64::NAN), &Value::Double(1.0)));
            assert!(!pair_matches(op, true, &Value::Null, &Value::Int(1)));
        }
    }

    #[test]
    fn numeric_promotion_compares_across_widths() {
        assert!(pair_matches(ExprCmpOp::Eq, true, &Value::Int(3), &Value::Double(3.0)));
        assert!(pair_matches(ExprCmpOp::Lt, true, &Value::Float(2.5), &Value::Int(3)));
    }
}
