mod binary;
mod count;
mod not;
mod or_node;
mod rel;
mod string;

use crate::error::Error;
use crate::key::TableKey;
use crate::query::expr::CompareExpr;
use crate::query::ExecContext;
use crate::store::Cluster;

// re-exports
pub(crate) use binary::{BinMatchOp, BinaryMatchNode};
pub(crate) use count::{CountNode, CountSource};
pub(crate) use not::NotNode;
pub(crate) use or_node::OrNode;
pub(crate) use rel::{BetweenNode, RelNode, RelOp};
pub(crate) use string::{StrMatchOp, StringEqualInsNode, StringEqualNode, StringMatchNode};

/// Distinguished sentinel row: no match in the probed range.
pub(crate) const NOT_FOUND: usize = usize::MAX;

///
/// NodeStats
///
/// Tunable cost statistics per node. `dt` estimates cost per probe, `dd`
/// the expected distance between successive matches; the executor orders
/// conjunctions by the derived cost, re-chosen per cycle.
///

#[derive(Clone, Debug)]
pub(crate) struct NodeStats {
    pub dt: f64,
    pub dd: f64,
    pub probes: u64,
    pub matches: u64,
}

impl Default for NodeStats {
    fn default() -> Self {
        Self {
            dt: 1.0,
            dd: 100.0,
            probes: 0,
            matches: 0,
        }
    }
}

impl NodeStats {
    pub(crate) fn cost(&self) -> f64 {
        8.0 * 64.0 / self.dd + self.dt
    }
}

///
/// ExpressionNode
///
/// Wraps a general comparison expression tree as a condition node.
///

#[derive(Clone, Debug)]
pub(crate) struct ExpressionNode {
    pub cmp: CompareExpr,
}

///
/// NodeKind
///
/// Closed-world condition set; dispatch is exhaustive matching, cloning
/// is structural and therefore deep.
///

#[derive(Clone, Debug)]
pub(crate) enum NodeKind {
    /// TRUEPREDICATE / FALSEPREDICATE.
    Literal(bool),
    Rel(RelNode),
    Between(BetweenNode),
    StringEqual(StringEqualNode),
    StringEqualIns(StringEqualInsNode),
    StringMatch(StringMatchNode),
    BinaryMatch(BinaryMatchNode),
    Count(CountNode),
    Expression(ExpressionNode),
    Not(NotNode),
    Or(OrNode),
}

///
/// ConditionNode
///

#[derive(Clone, Debug)]
pub(crate) struct ConditionNode {
    pub stats: NodeStats,
    pub kind: NodeKind,
}

impl ConditionNode {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            stats: NodeStats::default(),
            kind,
        }
    }

    /// Bind to the queried table; cascades into nested trees.
    pub(crate) fn table_changed(&mut self, cx: &ExecContext<'_>) -> Result<(), Error> {
        match &mut self.kind {
            NodeKind::Not(node) => node.table_changed(cx),
            NodeKind::Or(node) => node.table_changed(cx),
            _ => Ok(()),
        }
    }

    /// Choose the cost tier and materialise index state.
    pub(crate) fn init(&mut self, cx: &ExecContext<'_>, will_query_ranges: bool) -> Result<(), Error> {
        match &mut self.kind {
            NodeKind::Literal(_) => {
                self.stats.dt = 0.0;
            }
            NodeKind::Rel(node) => {
                self.stats.dt = node.cost_tier();
            }
            NodeKind::Between(node) => {
                self.stats.dt = node.cost_tier();
            }
            NodeKind::StringEqual(node) => {
                self.stats.dt = node.init(cx, will_query_ranges);
            }
            NodeKind::StringEqualIns(node) => {
                self.stats.dt = node.init(cx, will_query_ranges);
            }
            NodeKind::StringMatch(_) | NodeKind::BinaryMatch(_) => {
                self.stats.dt = 10.0;
            }
            NodeKind::Count(_) => {
                self.stats.dt = 2.0;
            }
            NodeKind::Expression(node) => {
                self.stats.dt = node.cmp.init(cx)?;
            }
            NodeKind::Not(node) => {
                node.init(cx, will_query_ranges)?;
                self.stats.dt = 50.0;
            }
            NodeKind::Or(node) => {
                node.init(cx, will_query_ranges)?;
                self.stats.dt = 50.0;
            }
        }
        Ok(())
    }

    /// Bind to one cluster; nodes drop per-cluster cursors here.
    pub(crate) fn cluster_changed(
        &mut self,
        cx: &ExecContext<'_>,
        cluster: &Cluster,
    ) -> Result<(), Error> {
        match &mut self.kind {
            NodeKind::Not(node) => node.cluster_changed(cx, cluster),
            NodeKind::Or(node) => node.cluster_changed(cx, cluster),
            _ => Ok(()),
        }
    }

    /// First matching row in `[start, end)`, or `NOT_FOUND`.
    pub(crate) fn find_first_local(
        &mut self,
        cx: &ExecContext<'_>,
        cluster: &Cluster,
        start: usize,
        end: usize,
    ) -> Result<usize, Error> {
        self.stats.probes += 1;
        let found = match &mut self.kind {
            NodeKind::Literal(true) => {
                if start < end {
                    start
                } else {
                    NOT_FOUND
                }
            }
            NodeKind::Literal(false) => NOT_FOUND,
            NodeKind::Rel(node) => node.find_first_local(cx, cluster, start, end),
            NodeKind::Between(node) => node.find_first_local(cx, cluster, start, end),
            NodeKind::StringEqual(node) => node.find_first_local(cx, cluster, start, end),
            NodeKind::StringEqualIns(node) => node.find_first_local(cx, cluster, start, end),
            NodeKind::StringMatch(node) => node.find_first_local(cx, cluster, start, end),
            NodeKind::BinaryMatch(node) => node.find_first_local(cx, cluster, start, end),
            NodeKind::Count(node) => node.find_first_local(cx, cluster, start, end),
            NodeKind::Expression(node) => {
                let mut row = start;
                loop {
                    if row >= end {
                        break NOT_FOUND;
                    }
                    if node.cmp.matches(cx, cluster, row)? {
                        break row;
                    }
                    row += 1;
                }
            }
            NodeKind::Not(node) => node.find_first_local(cx, cluster, start, end)?,
            NodeKind::Or(node) => node.find_first_local(cx, cluster, start, end)?,
        };
        if found != NOT_FOUND {
            self.stats.matches += 1;
        }
        Ok(found)
    }

    pub(crate) fn collect_dependencies(&self, cx: &ExecContext<'_>, tables: &mut Vec<TableKey>) {
        match &self.kind {
            NodeKind::Expression(node) => node.cmp.collect_dependencies(cx, tables),
            NodeKind::Not(node) => {
                for child in &node.cond {
                    child.collect_dependencies(cx, tables);
                }
            }
            NodeKind::Or(node) => {
                for alternative in &node.alternatives {
                    for child in alternative {
                        child.collect_dependencies(cx, tables);
                    }
                }
            }
            _ => {}
        }
    }
}

///
/// Conjunction short-circuit over a node chain.
///
/// Round-robins the conditions, restarting the verification count every
/// time one of them advances `start`; satisfied predicates are not
/// recomputed for an unmoved candidate row.
///
pub(crate) fn chain_find_first(
    nodes: &mut [ConditionNode],
    cx: &ExecContext<'_>,
    cluster: &Cluster,
    mut start: usize,
    end: usize,
) -> Result<usize, Error> {
    let count = nodes.len();
    if count == 0 {
        return Ok(if start < end { start } else { NOT_FOUND });
    }

    let mut current = 0;
    let mut remaining = count;
    while start < end {
        let m = nodes[current].find_first_local(cx, cluster, start, end)?;
        if m == NOT_FOUND {
            return Ok(NOT_FOUND);
        }
        if m != start {
            // Candidate advanced: every other condition must re-verify.
            remaining = count;
            start = m;
        }
        remaining -= 1;
        if remaining == 0 {
            return Ok(m);
        }
        current += 1;
        if current == count {
            current = 0;
        }
    }
    Ok(NOT_FOUND)
}
