//! Conjunction execution: the `find_first` loop over clusters and the
//! cost-adaptive aggregate driver.

use crate::error::Error;
use crate::key::{DataType, ObjKey};
use crate::obs::sink::{self, MetricsEvent};
use crate::query::compile;
use crate::query::node::{ConditionNode, NOT_FOUND};
use crate::query::view::ResultView;
use crate::query::{AggregateOp, AggregateSpec, ExecContext, Query};
use crate::store::{Cluster, Store};
use crate::value::{float_total_cmp, Value};
use std::cmp::Ordering;

/// Matches gathered per driver cycle before costs are re-evaluated.
const FINDLOCALS: usize = 64;

/// Row span probed per driver cycle.
const BEST_DIST: usize = 512;

///
/// QueryState
///
/// Fold target for confirmed matches, specialised per action. The
/// dispatch is keyed on the action and the aggregate column type rather
/// than node internals.
///

pub(crate) enum QueryState {
    Count(usize),
    FindAll(Vec<ObjKey>),
    FindFirst(Option<ObjKey>),
    Aggregate(AggregateState),
}

pub(crate) struct AggregateState {
    op: AggregateOp,
    spec: AggregateSpec,
    min_max: Option<Value>,
    sum_int: i64,
    sum_double: f64,
    saw_double: bool,
    non_null_rows: u64,
}

impl QueryState {
    /// Fold one confirmed row; returns false to stop the scan early.
    fn match_row(&mut self, cx: &ExecContext<'_>, cluster: &Cluster, row: usize) -> bool {
        match self {
            Self::Count(count) => {
                *count += 1;
                true
            }
            Self::FindAll(keys) => {
                keys.push(cluster.get_real_key(row));
                true
            }
            Self::FindFirst(slot) => {
                *slot = Some(cluster.get_real_key(row));
                false
            }
            Self::Aggregate(state) => {
                state.fold(cx, cluster, row);
                true
            }
        }
    }
}

impl AggregateState {
    fn new(spec: AggregateSpec) -> Self {
        Self {
            op: spec.op,
            spec,
            min_max: None,
            sum_int: 0,
            sum_double: 0.0,
            saw_double: false,
            non_null_rows: 0,
        }
    }

    #[expect(clippy::cast_precision_loss)]
    fn fold(&mut self, cx: &ExecContext<'_>, cluster: &Cluster, row: usize) {
        let value = cluster
            .leaf(self.spec.col)
            .value_at(row, cx.table.interner(self.spec.col));
        if value.is_null() {
            return;
        }
        self.non_null_rows += 1;

        match self.op {
            AggregateOp::Min | AggregateOp::Max => {
                let replace = self.min_max.as_ref().is_none_or(|current| {
                    let cmp = aggregate_cmp(&value, current);
                    if self.op == AggregateOp::Min {
                        cmp == Ordering::Less
                    } else {
                        cmp == Ordering::Greater
                    }
                });
                if replace {
                    self.min_max = Some(value);
                }
            }
            AggregateOp::Sum | AggregateOp::Avg => match value {
                // Wrap-around addition; overflow never raises.
                Value::Int(v) => {
                    self.sum_int = self.sum_int.wrapping_add(v);
                    self.sum_double += v as f64;
                }
                Value::Float(v) => {
                    self.saw_double = true;
                    self.sum_double += f64::from(v);
                }
                Value::Double(v) => {
                    self.saw_double = true;
                    self.sum_double += v;
                }
                _ => {}
            },
        }
    }

    #[expect(clippy::cast_precision_loss)]
    fn finish(self) -> Value {
        match self.op {
            AggregateOp::Min | AggregateOp::Max => self.min_max.unwrap_or(Value::Null),
            AggregateOp::Sum => {
                if self.saw_double {
                    Value::Double(self.sum_double)
                } else {
                    Value::Int(self.sum_int)
                }
            }
            AggregateOp::Avg => {
                if self.non_null_rows == 0 {
                    Value::Null
                } else {
                    Value::Double(self.sum_double / self.non_null_rows as f64)
                }
            }
        }
    }
}

// Aggregation compares NaN below non-NaN so min/max stay total.
fn aggregate_cmp(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => float_total_cmp(a, b),
            _ => Ordering::Equal,
        },
    }
}

///
/// PUBLIC DRIVERS
///

pub(crate) fn count(query: &Query, store: &Store) -> Result<usize, Error> {
    let mut state = QueryState::Count(0);
    execute(query, store, &mut state)?;
    match state {
        QueryState::Count(count) => Ok(count),
        _ => unreachable!("state variant is fixed per driver"),
    }
}

pub(crate) fn find_first(query: &Query, store: &Store) -> Result<Option<ObjKey>, Error> {
    let mut state = QueryState::FindFirst(None);
    execute(query, store, &mut state)?;
    match state {
        QueryState::FindFirst(key) => Ok(key),
        _ => unreachable!("state variant is fixed per driver"),
    }
}

pub(crate) fn find_all(query: &Query, store: &Store) -> Result<ResultView, Error> {
    let mut state = QueryState::FindAll(Vec::new());
    execute(query, store, &mut state)?;
    let QueryState::FindAll(keys) = state else {
        unreachable!("state variant is fixed per driver");
    };
    ResultView::from_query(query.clone(), store, keys)
}

pub(crate) fn aggregate(
    query: &Query,
    store: &Store,
    spec: AggregateSpec,
) -> Result<Value, Error> {
    validate_aggregate(spec)?;
    let mut state = QueryState::Aggregate(AggregateState::new(spec));
    execute(query, store, &mut state)?;
    let QueryState::Aggregate(state) = state else {
        unreachable!("state variant is fixed per driver");
    };
    Ok(state.finish())
}

fn validate_aggregate(spec: AggregateSpec) -> Result<(), Error> {
    let data_type = spec.col.data_type();
    let ok = match spec.op {
        AggregateOp::Min | AggregateOp::Max => matches!(
            data_type,
            DataType::Int | DataType::Float | DataType::Double | DataType::Timestamp
        ),
        AggregateOp::Sum | AggregateOp::Avg => {
            matches!(data_type, DataType::Int | DataType::Float | DataType::Double)
        }
    };
    if ok {
        Ok(())
    } else {
        Err(Error::unsupported(format!(
            "cannot aggregate over a column of type '{data_type}'"
        )))
    }
}

///
/// EXECUTION
///

fn execute(query: &Query, store: &Store, state: &mut QueryState) -> Result<(), Error> {
    let table = store.table_or_stale(query.table_key())?;
    let cx = ExecContext { store, table };

    sink::record(MetricsEvent::QueryStart);
    tracing::debug!(table = table.name(), "executing query");

    let mut nodes = compile::compile(&cx, query.root())?;
    for node in &mut nodes {
        node.table_changed(&cx)?;
    }
    for node in &mut nodes {
        node.init(&cx, true)?;
    }

    let mut rows_scanned = 0_u64;
    let matches_before = state_matches(state);
    for cluster in &table.clusters {
        if cluster.is_empty() {
            continue;
        }
        for node in &mut nodes {
            node.cluster_changed(&cx, cluster)?;
        }
        rows_scanned += cluster.size() as u64;
        if !scan_cluster(&mut nodes, &cx, cluster, state)? {
            break;
        }
    }

    sink::record(MetricsEvent::QueryFinish {
        rows_scanned,
        matches: state_matches(state).saturating_sub(matches_before),
    });
    Ok(())
}

fn state_matches(state: &QueryState) -> u64 {
    match state {
        QueryState::Count(count) => *count as u64,
        QueryState::FindAll(keys) => keys.len() as u64,
        QueryState::FindFirst(key) => u64::from(key.is_some()),
        QueryState::Aggregate(state) => state.non_null_rows,
    }
}

/// Scan one cluster; returns false when the state called off the scan.
fn scan_cluster(
    nodes: &mut [ConditionNode],
    cx: &ExecContext<'_>,
    cluster: &Cluster,
    state: &mut QueryState,
) -> Result<bool, Error> {
    let end = cluster.size();

    if nodes.len() == 1 {
        // Single condition: drive it in a tight loop.
        let mut start = 0;
        while start < end {
            let row = nodes[0].find_first_local(cx, cluster, start, end)?;
            if row == NOT_FOUND {
                break;
            }
            if !state.match_row(cx, cluster, row) {
                return Ok(false);
            }
            start = row + 1;
        }
        return Ok(true);
    }

    // Conjunction: re-pick the cheapest driver per cycle; the driver
    // gathers candidates, the remaining conditions verify them.
    let mut start = 0;
    while start < end {
        let best = find_best_node(nodes);
        if best != 0 {
            nodes.swap(0, best);
            sink::record(MetricsEvent::NodeRescheduled);
        }
        let chunk_end = end.min(start + BEST_DIST);
        let (next, keep_going) =
            aggregate_local(nodes, cx, cluster, state, start, chunk_end, FINDLOCALS)?;
        if !keep_going {
            return Ok(false);
        }
        start = if next > start { next } else { chunk_end };
    }
    Ok(true)
}

fn find_best_node(nodes: &[ConditionNode]) -> usize {
    let mut best = 0;
    let mut best_cost = nodes[0].stats.cost();
    for (index, node) in nodes.iter().enumerate().skip(1) {
        let cost = node.stats.cost();
        if cost < best_cost {
            best = index;
            best_cost = cost;
        }
    }
    best
}

/// Drive `nodes[0]` for up to `local_limit` of its own matches, verify
/// each candidate against the rest, and fold confirmed rows into the
/// state. Returns the next unscanned row and whether to continue.
fn aggregate_local(
    nodes: &mut [ConditionNode],
    cx: &ExecContext<'_>,
    cluster: &Cluster,
    state: &mut QueryState,
    start: usize,
    end: usize,
    local_limit: usize,
) -> Result<(usize, bool), Error> {
    let mut local_matches = 0_usize;
    let mut next = start;
    let mut last_match = start;

    loop {
        if local_matches == local_limit {
            let scanned = last_match.saturating_sub(start);
            nodes[0].stats.dd = scanned as f64 / (local_matches as f64 + 1.1);
            return Ok((next, true));
        }

        let (driver, rest) = nodes.split_first_mut().expect("conjunction is non-empty");
        let r = driver.find_first_local(cx, cluster, next, end)?;
        if r == NOT_FOUND {
            let scanned = next.saturating_sub(start);
            driver.stats.dd = scanned as f64 / (local_matches as f64 + 1.1);
            return Ok((end, true));
        }
        local_matches += 1;
        last_match = r;

        // Candidate confirmed only when every other condition matches at
        // exactly this row.
        let mut confirmed = true;
        for node in rest.iter_mut() {
            if node.find_first_local(cx, cluster, r, r + 1)? != r {
                confirmed = false;
                break;
            }
        }
        if confirmed && !state.match_row(cx, cluster, r) {
            return Ok((r + 1, false));
        }
        next = r + 1;
    }
}
