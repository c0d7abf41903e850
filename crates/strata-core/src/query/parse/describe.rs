//! Query serialisation back through the textual predicate grammar.
//! Descriptions are produced from the compiled node chain so lowering
//! results (needle fusion, range coalescing) are visible and stable
//! under re-parsing.

use crate::error::Error;
use crate::key::{ColKey, TableKey};
use crate::query::compile;
use crate::query::expr::{AggrOp, CompareExpr, Expr};
use crate::query::link_map::{LinkKind, LinkMap};
use crate::query::node::{ConditionNode, CountSource, NodeKind};
use crate::query::{ExecContext, Query};
use crate::store::Store;
use crate::value::Value;
use base64::Engine;

pub(crate) fn describe_query(query: &Query, store: &Store) -> Result<String, Error> {
    let table = store.table_or_stale(query.table_key())?;
    let cx = ExecContext { store, table };
    let nodes = compile::compile(&cx, query.root())?;
    let state = DescribeState {
        store,
        table: table.key(),
        var_prefix: None,
    };
    Ok(describe_chain(&state, &nodes))
}

///
/// DescribeState
///
/// Column-name resolution context; subqueries push their variable as the
/// display prefix of the nested scope.
///

#[derive(Clone, Copy)]
struct DescribeState<'a> {
    store: &'a Store,
    table: TableKey,
    var_prefix: Option<&'a str>,
}

impl DescribeState<'_> {
    fn column_name(&self, table: TableKey, col: ColKey) -> String {
        self.store
            .table(table)
            .map(|t| t.column_name(col).to_string())
            .unwrap_or_default()
    }

    fn prefixed(&self, path: String) -> String {
        match self.var_prefix {
            Some(prefix) if path.is_empty() => prefix.to_string(),
            Some(prefix) => format!("{prefix}.{path}"),
            None => path,
        }
    }
}

fn describe_chain(state: &DescribeState<'_>, nodes: &[ConditionNode]) -> String {
    let parts: Vec<String> = nodes.iter().map(|node| describe_node(state, node)).collect();
    parts.join(" and ")
}

fn describe_node(state: &DescribeState<'_>, node: &ConditionNode) -> String {
    match &node.kind {
        NodeKind::Literal(true) => "TRUEPREDICATE".to_string(),
        NodeKind::Literal(false) => "FALSEPREDICATE".to_string(),
        NodeKind::Rel(rel) => {
            let col = state.prefixed(state.column_name(state.table, rel.col));
            format!("{col} {} {}", rel.op.token(), print_value(&rel.value))
        }
        NodeKind::Between(between) => {
            let col = state.prefixed(state.column_name(state.table, between.col));
            format!(
                "{col} {} {} and {col} {} {}",
                between.lower_op.token(),
                print_value(&between.lower),
                between.upper_op.token(),
                print_value(&between.upper),
            )
        }
        NodeKind::StringEqual(node) => {
            let col = state.prefixed(state.column_name(state.table, node.col));
            if node.is_fused() {
                let mut needles: Vec<String> = Vec::new();
                if node.has_null_needle {
                    needles.push("NULL".to_string());
                }
                needles.extend(node.needles.iter().map(|n| print_string(n)));
                format!("{col} IN {{{}}}", needles.join(", "))
            } else {
                format!("{col} == {}", print_opt_string(node.value.as_deref()))
            }
        }
        NodeKind::StringEqualIns(node) => {
            let col = state.prefixed(state.column_name(state.table, node.col));
            format!("{col} ==[c] {}", print_opt_string(node.value.as_deref()))
        }
        NodeKind::StringMatch(node) => {
            let col = state.prefixed(state.column_name(state.table, node.col));
            let flag = if node.case_sensitive { "" } else { "[c]" };
            format!(
                "{col} {}{flag} {}",
                node.op.token(),
                print_opt_string(node.value.as_deref())
            )
        }
        NodeKind::BinaryMatch(node) => {
            let col = state.prefixed(state.column_name(state.table, node.col));
            let flag = if node.case_sensitive { "" } else { "[c]" };
            let value = node
                .value
                .as_deref()
                .map_or_else(|| "NULL".to_string(), print_binary);
            format!("{col} {}{flag} {value}", node.op.token())
        }
        NodeKind::Count(count) => {
            let path = match count.source {
                CountSource::ValueList(col) | CountSource::LinkList(col) => {
                    state.prefixed(state.column_name(state.table, col))
                }
                CountSource::Backlink(col) => {
                    state.prefixed(backlink_display(state, state.table, col))
                }
                CountSource::AllBacklinks => state.prefixed("@links".to_string()),
            };
            format!("{path}.@count {} {}", count.op.token(), count.value)
        }
        NodeKind::Expression(node) => describe_compare(state, &node.cmp),
        NodeKind::Not(node) => {
            format!("!({})", describe_chain(state, &node.cond))
        }
        NodeKind::Or(node) => {
            let parts: Vec<String> = node
                .alternatives
                .iter()
                .map(|alternative| describe_chain(state, alternative))
                .collect();
            format!("({})", parts.join(" or "))
        }
    }
}

fn describe_compare(state: &DescribeState<'_>, cmp: &CompareExpr) -> String {
    let flag = if cmp.case_sensitive { "" } else { "[c]" };
    format!(
        "{} {}{flag} {}",
        describe_expr(state, &cmp.left),
        cmp.op.token(),
        describe_expr(state, &cmp.right),
    )
}

fn describe_expr(state: &DescribeState<'_>, expr: &Expr) -> String {
    match expr {
        Expr::Literal(value) => print_value(value),
        Expr::Column { link_map, col } => {
            state.prefixed(path_display(state, link_map, Some(*col)))
        }
        Expr::SelfKey { link_map } => state.prefixed(path_display(state, link_map, None)),
        Expr::Aggregate { link_map, col, op } => {
            let base = path_display(state, link_map, None);
            let text = match (op, col) {
                (AggrOp::BacklinkCount, _) => join_path(&base, "@links.@count"),
                (AggrOp::Count | AggrOp::Size, None) => join_path(&base, op.token()),
                (AggrOp::Count | AggrOp::Size, Some(col)) => {
                    let col_name = terminal_column_name(state, link_map, *col);
                    join_path(&join_path(&base, &col_name), op.token())
                }
                (_, Some(col)) => {
                    let col_name = terminal_column_name(state, link_map, *col);
                    join_path(&join_path(&base, op.token()), &col_name)
                }
                (_, None) => join_path(&base, op.token()),
            };
            state.prefixed(text)
        }
        Expr::SubQueryCount(subquery) => {
            let list = state.prefixed(path_display(state, &subquery.link_map, None));
            let inner_state = DescribeState {
                store: state.store,
                table: subquery.target_table,
                var_prefix: Some(&subquery.var),
            };
            format!(
                "SUBQUERY({list}, {}, {}).@count",
                subquery.var,
                describe_chain(&inner_state, &subquery.nodes),
            )
        }
    }
}

fn join_path(base: &str, next: &str) -> String {
    if base.is_empty() {
        next.to_string()
    } else {
        format!("{base}.{next}")
    }
}

fn path_display(state: &DescribeState<'_>, link_map: &LinkMap, col: Option<ColKey>) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut table = state.table;
    for hop in link_map.hops() {
        match hop.kind {
            LinkKind::Backlink => {
                parts.push(backlink_display(state, hop.origin_table, hop.col));
            }
            _ => parts.push(state.column_name(hop.origin_table, hop.col)),
        }
        if let Some(next) = state
            .store
            .table(hop.origin_table)
            .and_then(|t| t.get_link_target(hop.col))
        {
            table = next;
        }
    }
    if let Some(col) = col {
        parts.push(state.column_name(table, col));
    }
    parts.join(".")
}

fn terminal_column_name(state: &DescribeState<'_>, link_map: &LinkMap, col: ColKey) -> String {
    let table = link_map.target_table(
        state.store,
        state.table,
    );
    state.column_name(table, col)
}

fn backlink_display(state: &DescribeState<'_>, table: TableKey, backlink_col: ColKey) -> String {
    let Some(holder) = state.store.table(table) else {
        return String::new();
    };
    let origin = holder
        .get_link_target(backlink_col)
        .and_then(|key| state.store.table(key));
    let origin_col = holder.get_origin_column(backlink_col);
    match (origin, origin_col) {
        (Some(origin), Some(origin_col)) => format!(
            "@links.{}.{}",
            origin.name(),
            origin.column_name(origin_col)
        ),
        _ => "@links".to_string(),
    }
}

///
/// VALUE PRINTING
///

/// Characters allowed in a raw quoted string. Quotes are deliberately
/// absent: any quote forces the base64 form.
fn contains_invalids(data: &str) -> bool {
    const WHITELIST: &str = " {|}~:;<=>?@!#$%&()*+,-./[]^_`";
    data.chars()
        .any(|c| !c.is_ascii_alphanumeric() && !WHITELIST.contains(c))
}

pub(crate) fn print_string(data: &str) -> String {
    if contains_invalids(data) {
        let encoded = base64::engine::general_purpose::STANDARD.encode(data.as_bytes());
        format!("B64\"{encoded}\"")
    } else {
        format!("\"{data}\"")
    }
}

fn print_opt_string(data: Option<&str>) -> String {
    data.map_or_else(|| "NULL".to_string(), print_string)
}

pub(crate) fn print_binary(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(text) if !contains_invalids(text) => format!("\"{text}\""),
        _ => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(data);
            format!("B64\"{encoded}\"")
        }
    }
}

pub(crate) fn print_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Int(v) => v.to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::String(s) => print_string(s),
        Value::Binary(b) => print_binary(b),
        Value::Timestamp(t) => t.to_string(),
        Value::Link(k) => format!("O{}", k.0),
        Value::List(items) => {
            let parts: Vec<String> = items.iter().map(print_value).collect();
            format!("{{{}}}", parts.join(", "))
        }
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::{print_binary, print_string, print_value};
    use crate::value::{Timestamp, Value};

    #[test]
    fn plain_strings_print_quoted() {
        assert_eq!(print_string("Bones"), "\"Bones\"");
        assert_eq!(print_string("with space!"), "\"with space!\"");
    }

    #[test]
    fn quotes_and_control_bytes_force_base64() {
        assert!(print_string("say \"hi\"").starts_with("B64\""));
        assert!(print_string("tab\there").starts_with("B64\""));
        assert!(print_string("naïve").starts_with("B64\""));
    }

    #[test]
    fn base64_output_is_padded() {
        let printed = print_binary(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(printed, "B64\"3q2+7w==\"");
    }

    #[test]
    fn timestamps_print_internal_form() {
        assert_eq!(
            print_value(&Value::Timestamp(Timestamp::new(-1, -1).unwrap())),
            "T-1:-1"
        );
    }
}
