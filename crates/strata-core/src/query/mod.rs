//! The query evaluation pipeline: condition nodes over clustered leaves,
//! short-circuit conjunction execution with cost-adaptive scheduling,
//! expression and link traversal, descriptor ordering, the textual
//! predicate parser, and materialised result views.

mod compile;
mod exec;
mod expr;
mod link_map;
mod node;
mod ordering;
mod parse;
mod view;

#[cfg(test)]
mod tests;

use crate::error::Error;
use crate::key::{ColKey, DataType, ObjKey, TableKey};
use crate::store::{Store, Table};
use crate::value::Value;
use std::ops::{BitAnd, BitOr};

// re-exports
pub use ordering::{
    DescriptorOrdering, DistinctDescriptor, IncludeDescriptor, SortDescriptor,
};
pub use parse::{
    parse_include_path, parse_query, parse_query_mapped, KeyPathMapping, ParsedStatement,
};
pub use view::ResultView;

use node::{
    BinMatchOp, BinaryMatchNode, ConditionNode, NodeKind, RelNode, RelOp, StrMatchOp,
    StringEqualInsNode, StringEqualNode, StringMatchNode,
};

///
/// ExecContext
///
/// Explicit execution context threaded through evaluation; there is no
/// process-wide state behind it.
///

#[derive(Clone, Copy)]
pub(crate) struct ExecContext<'a> {
    pub store: &'a Store,
    pub table: &'a Table,
}

///
/// QueryExpr
///
/// Build-time shape of a query: a tree, never a DAG. Compilation lowers
/// it to condition-node chains per conjunction.
///

#[derive(Clone, Debug)]
pub(crate) enum QueryExpr {
    True,
    False,
    And(Vec<Self>),
    Or(Vec<Self>),
    Not(Box<Self>),
    Node(Box<ConditionNode>),
}

///
/// AggregateOp / AggregateSpec
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AggregateOp {
    Min,
    Max,
    Sum,
    Avg,
}

#[derive(Clone, Copy, Debug)]
pub struct AggregateSpec {
    pub op: AggregateOp,
    pub col: ColKey,
}

///
/// Query
///
/// A conjunction tree of condition nodes bound to one table. Queries are
/// cheap to clone (cloning is deep and structural) and read-only over a
/// storage snapshot; node statistics live only for the duration of one
/// execution.
///

#[derive(Clone, Debug)]
pub struct Query {
    table: TableKey,
    root: QueryExpr,
}

impl Query {
    #[must_use]
    pub fn new(table: TableKey) -> Self {
        Self {
            table,
            root: QueryExpr::True,
        }
    }

    pub(crate) fn from_expr(table: TableKey, root: QueryExpr) -> Self {
        Self { table, root }
    }

    #[must_use]
    pub fn table_key(&self) -> TableKey {
        self.table
    }

    pub(crate) fn root(&self) -> &QueryExpr {
        &self.root
    }

    fn and_expr(mut self, expr: QueryExpr) -> Self {
        self.root = match self.root {
            QueryExpr::True => expr,
            QueryExpr::And(mut children) => {
                children.push(expr);
                QueryExpr::And(children)
            }
            other => QueryExpr::And(vec![other, expr]),
        };
        self
    }

    fn and_node(self, node: ConditionNode) -> Self {
        self.and_expr(QueryExpr::Node(Box::new(node)))
    }

    ///
    /// CONDITIONS
    ///

    #[must_use]
    pub fn equal(self, col: ColKey, value: impl Into<Value>) -> Self {
        let node = cmp_node(col, RelOp::Equal, value.into(), true);
        self.and_node(node)
    }

    #[must_use]
    pub fn not_equal(self, col: ColKey, value: impl Into<Value>) -> Self {
        let node = cmp_node(col, RelOp::NotEqual, value.into(), true);
        self.and_node(node)
    }

    #[must_use]
    pub fn greater(self, col: ColKey, value: impl Into<Value>) -> Self {
        let node = cmp_node(col, RelOp::Greater, value.into(), true);
        self.and_node(node)
    }

    #[must_use]
    pub fn greater_equal(self, col: ColKey, value: impl Into<Value>) -> Self {
        let node = cmp_node(col, RelOp::GreaterEqual, value.into(), true);
        self.and_node(node)
    }

    #[must_use]
    pub fn less(self, col: ColKey, value: impl Into<Value>) -> Self {
        let node = cmp_node(col, RelOp::Less, value.into(), true);
        self.and_node(node)
    }

    #[must_use]
    pub fn less_equal(self, col: ColKey, value: impl Into<Value>) -> Self {
        let node = cmp_node(col, RelOp::LessEqual, value.into(), true);
        self.and_node(node)
    }

    /// String equality with an explicit case mode.
    #[must_use]
    pub fn equal_string(self, col: ColKey, value: Option<&str>, case_sensitive: bool) -> Self {
        let value = value.map(ToString::to_string);
        let node = if case_sensitive {
            ConditionNode::new(NodeKind::StringEqual(StringEqualNode::new(col, value)))
        } else {
            ConditionNode::new(NodeKind::StringEqualIns(StringEqualInsNode::new(col, value)))
        };
        self.and_node(node)
    }

    #[must_use]
    pub fn contains(self, col: ColKey, value: impl Into<Value>, case_sensitive: bool) -> Self {
        let node = match_node(col, StrMatchOp::Contains, value.into(), case_sensitive);
        self.and_node(node)
    }

    #[must_use]
    pub fn begins_with(self, col: ColKey, value: impl Into<Value>, case_sensitive: bool) -> Self {
        let node = match_node(col, StrMatchOp::BeginsWith, value.into(), case_sensitive);
        self.and_node(node)
    }

    #[must_use]
    pub fn ends_with(self, col: ColKey, value: impl Into<Value>, case_sensitive: bool) -> Self {
        let node = match_node(col, StrMatchOp::EndsWith, value.into(), case_sensitive);
        self.and_node(node)
    }

    #[must_use]
    pub fn like(self, col: ColKey, value: impl Into<Value>, case_sensitive: bool) -> Self {
        let node = match_node(col, StrMatchOp::Like, value.into(), case_sensitive);
        self.and_node(node)
    }

    /// Forward-link equality.
    #[must_use]
    pub fn links_to(self, col: ColKey, target: ObjKey) -> Self {
        let node = cmp_node(col, RelOp::Equal, Value::Link(target), true);
        self.and_node(node)
    }

    /// Negate the whole query built so far.
    #[must_use]
    pub fn negate(mut self) -> Self {
        self.root = QueryExpr::Not(Box::new(self.root));
        self
    }

    ///
    /// EXECUTION
    ///

    pub fn count(&self, store: &Store) -> Result<usize, Error> {
        exec::count(self, store)
    }

    pub fn find_first(&self, store: &Store) -> Result<Option<ObjKey>, Error> {
        exec::find_first(self, store)
    }

    pub fn find_all(&self, store: &Store) -> Result<ResultView, Error> {
        exec::find_all(self, store)
    }

    pub fn aggregate(&self, store: &Store, spec: AggregateSpec) -> Result<Value, Error> {
        exec::aggregate(self, store, spec)
    }

    /// Serialise the compiled query through the textual predicate
    /// grammar. The result parses back to an equivalent query.
    pub fn get_description(&self, store: &Store) -> Result<String, Error> {
        parse::describe_query(self, store)
    }

    /// Tables this query reads, with the versions currently observed.
    pub(crate) fn dependency_versions(&self, store: &Store) -> Result<Vec<(TableKey, u64)>, Error> {
        let table = store.table_or_stale(self.table)?;
        let cx = ExecContext { store, table };
        let mut tables = vec![self.table];
        let nodes = compile::compile(&cx, &self.root)?;
        for node in &nodes {
            node.collect_dependencies(&cx, &mut tables);
        }
        let mut versions = Vec::with_capacity(tables.len());
        for key in tables {
            versions.push((key, store.table_or_stale(key)?.storage_version()));
        }
        Ok(versions)
    }
}

impl BitAnd for Query {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        debug_assert_eq!(self.table, rhs.table);
        self.and_expr(rhs.root)
    }
}

impl BitOr for Query {
    type Output = Self;

    fn bitor(mut self, rhs: Self) -> Self::Output {
        debug_assert_eq!(self.table, rhs.table);
        self.root = match self.root {
            QueryExpr::Or(mut children) => {
                children.push(rhs.root);
                QueryExpr::Or(children)
            }
            other => QueryExpr::Or(vec![other, rhs.root]),
        };
        self
    }
}

// Typed leaf-condition constructors shared by the fluent API and the
// query builder.
fn cmp_node(col: ColKey, op: RelOp, value: Value, case_sensitive: bool) -> ConditionNode {
    match col.data_type() {
        DataType::String => {
            let needle = match value {
                Value::String(s) => Some(s),
                _ => None,
            };
            match op {
                RelOp::Equal if case_sensitive => {
                    ConditionNode::new(NodeKind::StringEqual(StringEqualNode::new(col, needle)))
                }
                RelOp::Equal => ConditionNode::new(NodeKind::StringEqualIns(
                    StringEqualInsNode::new(col, needle),
                )),
                RelOp::NotEqual => ConditionNode::new(NodeKind::StringMatch(StringMatchNode {
                    col,
                    op: StrMatchOp::NotEqual,
                    case_sensitive,
                    value: needle,
                })),
                // Ordering over strings is rejected by the builder; the
                // fallback node simply never matches.
                op => ConditionNode::new(NodeKind::Rel(RelNode {
                    col,
                    op,
                    value: needle.map_or(Value::Null, Value::String),
                })),
            }
        }
        DataType::Binary => {
            let needle = match value {
                Value::Binary(b) => Some(b),
                Value::String(s) => Some(s.into_bytes()),
                _ => None,
            };
            let op = match op {
                RelOp::NotEqual => BinMatchOp::NotEqual,
                _ => BinMatchOp::Equal,
            };
            ConditionNode::new(NodeKind::BinaryMatch(BinaryMatchNode {
                col,
                op,
                case_sensitive,
                value: needle,
            }))
        }
        _ => ConditionNode::new(NodeKind::Rel(RelNode { col, op, value })),
    }
}

fn match_node(col: ColKey, op: StrMatchOp, value: Value, case_sensitive: bool) -> ConditionNode {
    if col.data_type() == DataType::Binary {
        let needle = match value {
            Value::Binary(b) => Some(b),
            Value::String(s) => Some(s.into_bytes()),
            _ => None,
        };
        let op = match op {
            StrMatchOp::NotEqual => BinMatchOp::NotEqual,
            StrMatchOp::Contains => BinMatchOp::Contains,
            StrMatchOp::BeginsWith => BinMatchOp::BeginsWith,
            StrMatchOp::EndsWith => BinMatchOp::EndsWith,
            StrMatchOp::Like => BinMatchOp::Like,
        };
        return ConditionNode::new(NodeKind::BinaryMatch(BinaryMatchNode {
            col,
            op,
            case_sensitive,
            value: needle,
        }));
    }
    let needle = match value {
        Value::String(s) => Some(s),
        _ => None,
    };
    ConditionNode::new(NodeKind::StringMatch(StringMatchNode {
        col,
        op,
        case_sensitive,
        value: needle,
    }))
}
