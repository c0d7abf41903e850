//! Lowering from the build-time query tree to executable node chains.
//!
//! Passes applied here, in order: constant folding of literal booleans,
//! multi-needle `IN` fusion across disjunction alternatives, range
//! coalescing of chained same-column inequalities, and hoisting of
//! index-backed equality to the head of conjunctions (cost adaptation
//! takes over from there at run time).

use crate::error::Error;
use crate::query::node::{
    BetweenNode, ConditionNode, NodeKind, NotNode, OrNode, RelOp,
};
use crate::query::{ExecContext, QueryExpr};

pub(crate) fn compile(
    cx: &ExecContext<'_>,
    expr: &QueryExpr,
) -> Result<Vec<ConditionNode>, Error> {
    let chain = compile_expr(cx, expr)?;
    Ok(chain)
}

fn compile_expr(cx: &ExecContext<'_>, expr: &QueryExpr) -> Result<Vec<ConditionNode>, Error> {
    match expr {
        QueryExpr::True => Ok(vec![ConditionNode::new(NodeKind::Literal(true))]),
        QueryExpr::False => Ok(vec![ConditionNode::new(NodeKind::Literal(false))]),
        QueryExpr::Node(node) => Ok(vec![node.as_ref().clone()]),
        QueryExpr::Not(inner) => {
            let chain = compile_expr(cx, inner)?;
            Ok(vec![ConditionNode::new(NodeKind::Not(NotNode::new(chain)))])
        }
        QueryExpr::And(children) => compile_and(cx, children),
        QueryExpr::Or(children) => compile_or(cx, children),
    }
}

fn compile_and(
    cx: &ExecContext<'_>,
    children: &[QueryExpr],
) -> Result<Vec<ConditionNode>, Error> {
    let mut chain = Vec::new();
    for child in children {
        let child_chain = compile_expr(cx, child)?;
        for node in child_chain {
            match node.kind {
                // Constant folding: truth is dropped from conjunctions,
                // falsity collapses them.
                NodeKind::Literal(true) => {}
                NodeKind::Literal(false) => {
                    return Ok(vec![ConditionNode::new(NodeKind::Literal(false))]);
                }
                _ => chain.push(node),
            }
        }
    }
    if chain.is_empty() {
        return Ok(vec![ConditionNode::new(NodeKind::Literal(true))]);
    }

    coalesce_ranges(&mut chain);
    hoist_indexed_equality(cx, &mut chain);
    Ok(chain)
}

fn compile_or(cx: &ExecContext<'_>, children: &[QueryExpr]) -> Result<Vec<ConditionNode>, Error> {
    let mut alternatives: Vec<Vec<ConditionNode>> = Vec::new();
    for child in children {
        let chain = compile_expr(cx, child)?;
        if chain.len() == 1 {
            match &chain[0].kind {
                NodeKind::Literal(true) => {
                    return Ok(vec![ConditionNode::new(NodeKind::Literal(true))]);
                }
                NodeKind::Literal(false) => continue,
                NodeKind::StringEqual(_) => {
                    if fuse_into_existing(&mut alternatives, &chain[0]) {
                        continue;
                    }
                }
                _ => {}
            }
        }
        alternatives.push(chain);
    }

    match alternatives.len() {
        0 => Ok(vec![ConditionNode::new(NodeKind::Literal(false))]),
        1 => Ok(alternatives.pop().expect("length checked")),
        _ => Ok(vec![ConditionNode::new(NodeKind::Or(OrNode::new(
            alternatives,
        )))]),
    }
}

/// Multi-needle `IN` fusion: adjacent equality conditions on the same
/// string column collapse into one needle-set node. Mutation happens at
/// build time only, before the first evaluation.
fn fuse_into_existing(
    alternatives: &mut [Vec<ConditionNode>],
    candidate: &ConditionNode,
) -> bool {
    let NodeKind::StringEqual(candidate) = &candidate.kind else {
        return false;
    };
    for alternative in alternatives.iter_mut() {
        if alternative.len() != 1 {
            continue;
        }
        if let NodeKind::StringEqual(existing) = &mut alternative[0].kind {
            if existing.consume_condition(candidate) {
                return true;
            }
        }
    }
    false
}

/// Fold one `>`/`>=` and one `<`/`<=` on the same column into a single
/// range scan.
fn coalesce_ranges(chain: &mut Vec<ConditionNode>) {
    let mut index = 0;
    while index < chain.len() {
        let Some((col, op)) = rel_bounds(&chain[index]) else {
            index += 1;
            continue;
        };
        let wants_upper = matches!(op, RelOp::Greater | RelOp::GreaterEqual);
        let partner = chain.iter().enumerate().skip(index + 1).find_map(|(i, node)| {
            let (other_col, other_op) = rel_bounds(node)?;
            if other_col != col {
                return None;
            }
            let is_upper = matches!(other_op, RelOp::Less | RelOp::LessEqual);
            (is_upper == wants_upper).then_some(i)
        });
        let Some(partner) = partner else {
            index += 1;
            continue;
        };

        let second = chain.remove(partner);
        let first = chain.remove(index);
        let (NodeKind::Rel(first), NodeKind::Rel(second)) = (first.kind, second.kind) else {
            unreachable!("rel_bounds only accepts relational nodes");
        };
        let (lower, upper) = if wants_upper {
            (first, second)
        } else {
            (second, first)
        };
        chain.insert(
            index,
            ConditionNode::new(NodeKind::Between(BetweenNode {
                col,
                lower_op: lower.op,
                lower: lower.value,
                upper_op: upper.op,
                upper: upper.value,
            })),
        );
        index += 1;
    }
}

fn rel_bounds(node: &ConditionNode) -> Option<(crate::key::ColKey, RelOp)> {
    let NodeKind::Rel(rel) = &node.kind else {
        return None;
    };
    if !rel.op.is_ordering() || rel.value.is_null() {
        return None;
    }
    Some((rel.col, rel.op))
}

/// Indexed equality runs first until run-time cost adaptation reorders.
fn hoist_indexed_equality(cx: &ExecContext<'_>, chain: &mut [ConditionNode]) {
    chain.sort_by_key(|node| match &node.kind {
        NodeKind::StringEqual(node) => {
            let indexed = cx.table.search_index(node.col).is_some() && !node.is_fused();
            u8::from(!indexed)
        }
        _ => 1,
    });
}
