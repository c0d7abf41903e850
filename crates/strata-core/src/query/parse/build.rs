//! Lowering from the surface AST into a typed query: key-path
//! resolution with aliases, argument substitution, `ALL`/`NONE`
//! subquery rewriting, `IN` handling, null-comparison rules, and the
//! descriptor ordering.

use crate::error::Error;
use crate::key::{ColKey, DataType, TableKey};
use crate::query::expr::{AggrOp, CompareExpr, Expr, ExprCmpOp, SubQueryExpr};
use crate::query::link_map::{LinkHop, LinkKind, LinkMap};
use crate::query::node::{
    ConditionNode, CountNode, CountSource, NodeKind, RelOp, StrMatchOp, StringEqualInsNode,
    StringEqualNode,
};
use crate::query::ordering::{
    DescriptorOrdering, DistinctDescriptor, IncludeDescriptor, IncludePath, ResolvedKeyPath,
    SortDescriptor,
};
use crate::query::parse::ast::{
    self, CompareAst, DescriptorAst, ExprAst, OperAst, PredAst, Quantifier, TimestampAst,
};
use crate::query::parse::keypath::{KeyPathMapping, PathElement};
use crate::query::{compile, ExecContext, Query, QueryExpr};
use crate::store::{Store, Table};
use crate::value::{Timestamp, TimestampError, Value};

///
/// ParsedStatement
///

#[derive(Clone, Debug)]
pub struct ParsedStatement {
    pub query: Query,
    pub ordering: DescriptorOrdering,
}

/// Parse query text against a table with positional arguments.
pub fn parse_query(
    store: &Store,
    table: TableKey,
    text: &str,
    args: &[Value],
) -> Result<ParsedStatement, Error> {
    parse_query_mapped(store, table, text, args, &KeyPathMapping::new())
}

/// Parse with an explicit key-path mapping.
pub fn parse_query_mapped(
    store: &Store,
    table: TableKey,
    text: &str,
    args: &[Value],
    mapping: &KeyPathMapping,
) -> Result<ParsedStatement, Error> {
    let parsed = ast::parse_text(text)?;
    let base = store.table_or_stale(table)?;
    let mut bx = BuildContext {
        store,
        mapping,
        args,
        vars: Vec::new(),
    };

    let root = build_pred(&mut bx, base, &parsed.predicate)?;
    let ordering = build_ordering(&bx, base, &parsed.descriptors)?;
    Ok(ParsedStatement {
        query: Query::from_expr(table, root),
        ordering,
    })
}

struct BuildContext<'a> {
    store: &'a Store,
    mapping: &'a KeyPathMapping,
    args: &'a [Value],
    /// Active subquery variables, innermost last.
    vars: Vec<(String, TableKey)>,
}

impl BuildContext<'_> {
    fn argument(&self, index: usize) -> Result<Value, Error> {
        self.args
            .get(index)
            .cloned()
            .ok_or_else(|| Error::missing_argument(index, self.args.len()))
    }

    fn var_table(&self, name: &str) -> Option<TableKey> {
        self.vars
            .iter()
            .rev()
            .find(|(var, _)| var == name)
            .map(|(_, table)| *table)
    }
}

///
/// PREDICATES
///

fn build_pred(
    bx: &mut BuildContext<'_>,
    table: &Table,
    pred: &PredAst,
) -> Result<QueryExpr, Error> {
    match pred {
        PredAst::True => Ok(QueryExpr::True),
        PredAst::False => Ok(QueryExpr::False),
        PredAst::And(children) => {
            let children = children
                .iter()
                .map(|child| build_pred(bx, table, child))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(QueryExpr::And(children))
        }
        PredAst::Or(children) => {
            let children = children
                .iter()
                .map(|child| build_pred(bx, table, child))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(QueryExpr::Or(children))
        }
        PredAst::Not(inner) => Ok(QueryExpr::Not(Box::new(build_pred(bx, table, inner)?))),
        PredAst::Compare(cmp) => build_compare(bx, table, cmp),
    }
}

///
/// RESOLVED PATHS
///

#[derive(Clone, Debug)]
struct ResolvedPath {
    hops: Vec<LinkHop>,
    /// Table the terminal column lives on (the last hop's target).
    target_table: TableKey,
    col: Option<ColKey>,
    agg: Option<AggrOp>,
    list_count: usize,
}

impl ResolvedPath {
    fn is_list_valued(&self) -> bool {
        self.list_count > 0
    }

    fn terminal_is_list(&self) -> bool {
        self.col.is_some_and(ColKey::is_list)
    }
}

const AGG_TOKENS: &[(&str, AggrOp)] = &[
    ("@min", AggrOp::Min),
    ("@max", AggrOp::Max),
    ("@sum", AggrOp::Sum),
    ("@avg", AggrOp::Avg),
    ("@count", AggrOp::Count),
    ("@size", AggrOp::Size),
];

fn aggregate_token(segment: &str) -> Option<AggrOp> {
    let lowered = segment.to_ascii_lowercase();
    AGG_TOKENS
        .iter()
        .find(|(token, _)| *token == lowered)
        .map(|(_, op)| *op)
}

fn resolve_path(
    bx: &BuildContext<'_>,
    base: &Table,
    segments: &[String],
) -> Result<ResolvedPath, Error> {
    let mut segments = segments.to_vec();
    let mut table = base;

    // A leading subquery variable rebases the path on the element table.
    if let Some(first) = segments.first() {
        if let Some(var_table) = bx.var_table(first) {
            segments.remove(0);
            table = bx.store.table_or_stale(var_table)?;
            if segments.is_empty() {
                // The variable itself: the element's self-key.
                return Ok(ResolvedPath {
                    hops: Vec::new(),
                    target_table: table.key(),
                    col: None,
                    agg: None,
                    list_count: 0,
                });
            }
        }
    }

    let mut elements: Vec<PathElement> = Vec::new();
    let mut index = 0;
    while index < segments.len() && aggregate_token(&segments[index]).is_none() {
        let element =
            bx.mapping
                .process_next_path(bx.store, table, &mut segments, &mut index, false)?;
        let advance = match &element {
            PathElement::Column { col, .. } if col.data_type() == DataType::Link => {
                table.get_link_target(*col)
            }
            PathElement::Backlink { origin_table, .. } => Some(*origin_table),
            _ => None,
        };
        let terminal = index >= segments.len()
            || aggregate_token(&segments[index]).is_some();
        if let Some(next) = advance {
            table = bx.store.table_or_stale(next)?;
        } else if !terminal && !matches!(element, PathElement::AllBacklinks { .. }) {
            let PathElement::Column { col, .. } = &element else {
                unreachable!("non-column elements always advance");
            };
            return Err(Error::invalid_query(format!(
                "Property '{}' is not a link; key path '{}' cannot be followed",
                bx.store
                    .table_or_stale(element_table(&element))?
                    .column_name(*col),
                segments.join(".")
            )));
        }
        elements.push(element);
        if matches!(elements.last(), Some(PathElement::AllBacklinks { .. })) {
            break;
        }
    }

    // Aggregate operator plus optional suffix property.
    let mut agg = None;
    let mut suffix_col = None;
    if index < segments.len() {
        if let Some(op) = aggregate_token(&segments[index]) {
            agg = Some(op);
            index += 1;
            if index < segments.len() {
                if matches!(op, AggrOp::Count | AggrOp::Size) {
                    return Err(Error::invalid_query(format!(
                        "'{}' must terminate the key path",
                        op.token()
                    )));
                }
                let name = &segments[index];
                let col = table.get_column_key(name).ok_or_else(|| {
                    Error::invalid_query(format!(
                        "No property '{name}' on object of type '{}'",
                        table.name()
                    ))
                })?;
                suffix_col = Some(col);
                index += 1;
            }
            if index < segments.len() {
                return Err(Error::invalid_query(format!(
                    "unexpected key path after aggregate '{}'",
                    segments[index]
                )));
            }
        }
    }

    // Split elements into traversal hops and the terminal column.
    let mut hops = Vec::new();
    let mut col = suffix_col;
    let mut target_table = table.key();
    let mut all_backlinks = false;
    for (position, element) in elements.iter().enumerate() {
        let last = position + 1 == elements.len();
        match element {
            PathElement::AllBacklinks { .. } => {
                all_backlinks = true;
            }
            PathElement::Column { col: element_col, .. }
                if last && agg.is_none() && element_col.data_type() != DataType::Link =>
            {
                col = Some(*element_col);
                target_table = element_table(element);
            }
            PathElement::Column { col: element_col, .. }
                if last
                    && element_col.data_type() != DataType::Link
                    && agg.is_some()
                    && suffix_col.is_none() =>
            {
                // Aggregate over a scalar/list column (`name.@size`,
                // `scores.@sum`).
                col = Some(*element_col);
                target_table = element_table(element);
            }
            PathElement::Column { col: element_col, .. }
                if last && agg.is_none() && element_col.data_type() == DataType::Link =>
            {
                // Terminal link column used as a value (`discount == NULL`,
                // `items` on the right of IN).
                col = Some(*element_col);
                target_table = element_table(element);
            }
            _ => {
                let hop = element.as_hop().ok_or_else(|| {
                    Error::invalid_query("key path traverses a non-link property")
                })?;
                hops.push(hop);
            }
        }
    }

    if all_backlinks {
        match agg {
            Some(AggrOp::Count | AggrOp::Size) => agg = Some(AggrOp::BacklinkCount),
            _ => {
                return Err(Error::invalid_query(
                    "'@links' must be proceeded by type name and a property name",
                ));
            }
        }
    }

    if agg.is_some()
        && !matches!(agg, Some(AggrOp::BacklinkCount))
        && hops.is_empty()
        && col.is_none()
    {
        return Err(Error::invalid_query(
            "an aggregate operator requires a preceding list or property",
        ));
    }

    let list_count = hops.iter().filter(|hop| hop.kind != LinkKind::Single).count()
        + usize::from(col.is_some_and(ColKey::is_list));

    Ok(ResolvedPath {
        hops,
        target_table,
        col,
        agg,
        list_count,
    })
}

fn element_table(element: &PathElement) -> TableKey {
    match element {
        PathElement::Column { table, .. }
        | PathElement::Backlink { table, .. }
        | PathElement::AllBacklinks { table } => *table,
    }
}

///
/// COMPARISON SIDES
///

enum Side {
    Value(Value),
    List(Vec<Value>),
    Path(ResolvedPath),
    SubQuery(Box<SubQueryExpr>),
}

fn resolve_side(
    bx: &mut BuildContext<'_>,
    table: &Table,
    expr: &ExprAst,
) -> Result<Side, Error> {
    match expr {
        ExprAst::String(s) => Ok(Side::Value(Value::String(s.clone()))),
        ExprAst::Int(v) => Ok(Side::Value(Value::Int(*v))),
        ExprAst::Double(v) => Ok(Side::Value(Value::Double(*v))),
        ExprAst::True => Ok(Side::Value(Value::Bool(true))),
        ExprAst::False => Ok(Side::Value(Value::Bool(false))),
        ExprAst::Null => Ok(Side::Value(Value::Null)),
        ExprAst::Base64(bytes) => Ok(Side::Value(Value::Binary(bytes.clone()))),
        ExprAst::Timestamp(ts) => Ok(Side::Value(Value::Timestamp(timestamp_value(ts)?))),
        ExprAst::Argument(index) => Ok(Side::Value(bx.argument(*index)?)),
        ExprAst::ObjKeyLit(raw) => Ok(Side::Value(Value::Link(crate::key::ObjKey(*raw)))),
        ExprAst::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match resolve_side(bx, table, item)? {
                    Side::Value(value) => values.push(value),
                    _ => {
                        return Err(Error::invalid_query(
                            "a braced list may contain only literal values",
                        ))
                    }
                }
            }
            Ok(Side::List(values))
        }
        ExprAst::KeyPath(segments) => Ok(Side::Path(resolve_path(bx, table, segments)?)),
        ExprAst::SubQuery { path, var, pred } => {
            let subquery = build_subquery(bx, table, path, var, pred)?;
            Ok(Side::SubQuery(Box::new(subquery)))
        }
    }
}

fn build_subquery(
    bx: &mut BuildContext<'_>,
    table: &Table,
    path: &[String],
    var: &str,
    pred: &PredAst,
) -> Result<SubQueryExpr, Error> {
    if bx.vars.iter().any(|(existing, _)| existing == var) {
        return Err(Error::invalid_query(format!(
            "Subquery variable '{var}' is already in use"
        )));
    }
    let list = resolve_path(bx, table, path)?;
    if list.col.is_some() || list.hops.is_empty() {
        return Err(Error::invalid_query(
            "A subquery must operate on a list of objects",
        ));
    }
    let target_table = list.target_table;

    bx.vars.push((var.to_string(), target_table));
    let element_table = bx.store.table_or_stale(target_table)?;
    let inner = build_pred(bx, element_table, pred);
    bx.vars.pop();
    let inner = inner?;

    let inner_cx = ExecContext {
        store: bx.store,
        table: element_table,
    };
    let nodes = compile::compile(&inner_cx, &inner)?;
    Ok(SubQueryExpr::new(
        LinkMap::new(list.hops),
        var.to_string(),
        target_table,
        nodes,
    ))
}

fn timestamp_value(ts: &TimestampAst) -> Result<Timestamp, Error> {
    match ts {
        TimestampAst::Internal {
            seconds,
            nanoseconds,
        } => {
            let nanoseconds = i32::try_from(*nanoseconds)
                .map_err(|_| Error::out_of_range("Invalid timestamp format"))?;
            Timestamp::new(*seconds, nanoseconds)
                .map_err(|_| Error::out_of_range("Invalid timestamp format"))
        }
        TimestampAst::Readable {
            year,
            month,
            day,
            hour,
            minute,
            second,
            nanoseconds,
        } => {
            if *year < 1900 {
                return Err(Error::invalid_query(
                    "Conversion of dates before 1900 is not supported.",
                ));
            }
            if !(1..=12).contains(month) || !(1..=31).contains(day) {
                return Err(Error::out_of_range("Invalid timestamp format"));
            }
            let days = days_from_civil(*year, *month, *day);
            let seconds = days * 86_400 + hour * 3_600 + minute * 60 + second;
            let mut nanos = match nanoseconds {
                Some(nanos) => {
                    if *nanos < 0 {
                        return Err(Error::out_of_range(
                            TimestampError::NegativeNanoseconds {
                                seconds,
                                nanoseconds: 0,
                            }
                            .to_string(),
                        ));
                    }
                    i32::try_from(*nanos)
                        .map_err(|_| Error::out_of_range("Invalid timestamp format"))?
                }
                None => 0,
            };
            if seconds < 0 {
                // The seconds determine the sign of the nanosecond part.
                nanos = -nanos;
            }
            Timestamp::new(seconds, nanos)
                .map_err(|_| Error::out_of_range("Invalid timestamp format"))
        }
    }
}

// Days from the civil epoch (1970-01-01), Gregorian calendar.
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = year.div_euclid(400);
    let yoe = year - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

///
/// COMPARISONS
///

fn quantifier_name(quantifier: Quantifier) -> &'static str {
    match quantifier {
        Quantifier::Any => "'ANY' or 'SOME'",
        Quantifier::All => "'ALL'",
        Quantifier::None => "'NONE'",
        Quantifier::Unspecified => "",
    }
}

fn build_compare(
    bx: &mut BuildContext<'_>,
    table: &Table,
    cmp: &CompareAst,
) -> Result<QueryExpr, Error> {
    if cmp.op == OperAst::Between {
        return Err(Error::invalid_query(
            "The 'between' operator is not supported yet, please rewrite the expression using \
             '>' and '<'.",
        ));
    }

    let left = resolve_side(bx, table, &cmp.left)?;
    let right = resolve_side(bx, table, &cmp.right)?;

    if cmp.quantifier != Quantifier::Unspecified {
        return build_quantified(bx, table, cmp, left, right);
    }
    if cmp.op == OperAst::In {
        return build_in(bx, table, cmp, left, right);
    }

    match (left, right) {
        (Side::Value(left), Side::Value(right)) => {
            if left.is_null() || right.is_null() {
                return Err(Error::invalid_query(
                    "Unsupported query comparing 'null' and a literal. A comparison must \
                     include at least one keypath.",
                ));
            }
            Err(Error::invalid_query(
                "Predicate expressions must compare a keypath and another keypath or a \
                 constant value",
            ))
        }
        (Side::Path(path), Side::Value(value)) => {
            build_path_vs_value(bx, table, cmp, path, value, false)
        }
        (Side::Value(value), Side::Path(path)) => {
            build_path_vs_value(bx, table, cmp, path, value, true)
        }
        (Side::Path(left), Side::Path(right)) => build_path_vs_path(bx, table, cmp, left, right),
        (Side::SubQuery(subquery), Side::Value(value)) => {
            build_subquery_vs_value(cmp, *subquery, value, false)
        }
        (Side::Value(value), Side::SubQuery(subquery)) => {
            build_subquery_vs_value(cmp, *subquery, value, true)
        }
        (Side::SubQuery(subquery), Side::Path(path)) => {
            let op = expr_cmp_op(cmp.op)?;
            Ok(expression_node(
                op,
                !cmp.case_insensitive,
                Expr::SubQueryCount(subquery),
                path_expr(&path),
            ))
        }
        (Side::Path(path), Side::SubQuery(subquery)) => {
            let op = expr_cmp_op(cmp.op)?;
            Ok(expression_node(
                op,
                !cmp.case_insensitive,
                path_expr(&path),
                Expr::SubQueryCount(subquery),
            ))
        }
        (Side::SubQuery(left), Side::SubQuery(right)) => {
            let op = expr_cmp_op(cmp.op)?;
            Ok(expression_node(
                op,
                !cmp.case_insensitive,
                Expr::SubQueryCount(left),
                Expr::SubQueryCount(right),
            ))
        }
        (Side::List(_), _) | (_, Side::List(_)) => Err(Error::invalid_query(
            "a braced value list is only valid on the right of 'IN'",
        )),
    }
}

/// ANY falls through to exists semantics; ALL and NONE are compiled as a
/// subquery plus an emptiness test because they cannot reference the
/// outer row.
fn build_quantified(
    bx: &mut BuildContext<'_>,
    table: &Table,
    cmp: &CompareAst,
    left: Side,
    right: Side,
) -> Result<QueryExpr, Error> {
    let name = quantifier_name(cmp.quantifier);
    let Side::Path(path) = left else {
        return Err(Error::invalid_query(format!(
            "The expression after {name} must be a keypath containing a list"
        )));
    };
    let link_lists = path
        .hops
        .iter()
        .filter(|hop| hop.kind != LinkKind::Single)
        .count()
        + usize::from(path.col.is_some_and(|col| col.is_list() && col.data_type() == DataType::Link));
    if link_lists == 0 {
        return Err(Error::invalid_query(format!(
            "The keypath following {name} must contain a list"
        )));
    }
    if link_lists > 1 {
        return Err(Error::invalid_query(format!(
            "The keypath following {name} must contain only one list"
        )));
    }

    if cmp.quantifier == Quantifier::Any {
        // Exists semantics is the engine default for list-valued paths.
        return build_path_vs_side(bx, table, cmp, path, right);
    }

    let Side::Value(value) = right else {
        return Err(Error::invalid_query(format!(
            "The comparison in an {name} clause must be between a keypath and a value"
        )));
    };

    // Split the path at its single list hop.
    let mut prefix = Vec::new();
    let mut suffix = Vec::new();
    let mut seen_list = false;
    for hop in &path.hops {
        if seen_list {
            suffix.push(hop.clone());
        } else {
            let is_list = hop.kind != LinkKind::Single;
            prefix.push(hop.clone());
            seen_list = is_list;
        }
    }
    let mut suffix_col = path.col;
    if !seen_list {
        // The terminal link-list column itself is the list.
        let col = path.col.expect("list count included the terminal column");
        prefix.push(LinkHop {
            origin_table: path.target_table,
            col,
            kind: LinkKind::List,
        });
        suffix_col = None;
    }

    let list_map = LinkMap::new(prefix);
    let element_table = list_map.target_table(bx.store, table.key());
    let element = bx.store.table_or_stale(element_table)?;

    let inner_left = match suffix_col {
        Some(col) => Expr::Column {
            link_map: LinkMap::new(suffix),
            col,
        },
        None => Expr::SelfKey {
            link_map: LinkMap::new(suffix),
        },
    };
    let coerced = coerce_for_expr(element, suffix_col, &value)?;
    let inner = expression_node(
        expr_cmp_op(cmp.op)?,
        !cmp.case_insensitive,
        inner_left,
        Expr::Literal(coerced),
    );
    let inner_cx = ExecContext {
        store: bx.store,
        table: element,
    };
    let nodes = compile::compile(&inner_cx, &inner)?;
    let subquery = SubQueryExpr::new(
        list_map.clone(),
        fresh_var_name(bx),
        element_table,
        nodes,
    );

    let right = if cmp.quantifier == Quantifier::All {
        Expr::Aggregate {
            link_map: list_map,
            col: None,
            op: AggrOp::Count,
        }
    } else {
        Expr::Literal(Value::Int(0))
    };
    Ok(expression_node(
        ExprCmpOp::Eq,
        true,
        Expr::SubQueryCount(Box::new(subquery)),
        right,
    ))
}

fn fresh_var_name(bx: &BuildContext<'_>) -> String {
    let mut candidate = "$x".to_string();
    let mut letter = b'x';
    while bx.vars.iter().any(|(var, _)| *var == candidate) {
        letter = if letter == b'z' { b'a' } else { letter + 1 };
        candidate = format!("${}", char::from(letter));
    }
    candidate
}

fn build_in(
    bx: &mut BuildContext<'_>,
    table: &Table,
    cmp: &CompareAst,
    left: Side,
    right: Side,
) -> Result<QueryExpr, Error> {
    match right {
        // Literal needle set: lowered to a disjunction of equalities,
        // which the compiler fuses into one multi-needle node.
        Side::List(values) => {
            let Side::Path(path) = left else {
                return Err(Error::invalid_query(
                    "The expression preceding 'IN' must be a keypath",
                ));
            };
            if values.is_empty() {
                return Ok(QueryExpr::False);
            }
            let eq = CompareAst {
                quantifier: Quantifier::Unspecified,
                op: OperAst::Eq,
                case_insensitive: cmp.case_insensitive,
                left: cmp.left.clone(),
                right: cmp.right.clone(),
            };
            let mut children = Vec::with_capacity(values.len());
            for value in values {
                children.push(build_path_vs_value(
                    bx,
                    table,
                    &eq,
                    path.clone(),
                    value,
                    false,
                )?);
            }
            Ok(QueryExpr::Or(children))
        }
        Side::Path(path) => {
            if let Side::Path(left_path) = &left {
                if left_path.is_list_valued() {
                    return Err(Error::invalid_query(
                        "The keypath preceeding 'IN' must not contain a list, list vs list \
                         comparisons are not currently supported",
                    ));
                }
            }
            if path.list_count == 0 {
                return Err(Error::invalid_query(
                    "The keypath following 'IN' must contain a list",
                ));
            }
            if path.list_count > 1 {
                return Err(Error::invalid_query(
                    "The keypath following 'IN' must contain only one list",
                ));
            }
            let eq = CompareAst {
                quantifier: Quantifier::Unspecified,
                op: OperAst::Eq,
                case_insensitive: cmp.case_insensitive,
                left: cmp.left.clone(),
                right: cmp.right.clone(),
            };
            match left {
                Side::Value(value) => build_path_vs_value(bx, table, &eq, path, value, true),
                Side::Path(left_path) => build_path_vs_path(bx, table, &eq, left_path, path),
                _ => Err(Error::invalid_query(
                    "The expression preceding 'IN' must be a keypath or a value",
                )),
            }
        }
        _ => Err(Error::invalid_query(
            "The expression following 'IN' must be a keypath to a list",
        )),
    }
}

fn build_path_vs_side(
    bx: &mut BuildContext<'_>,
    table: &Table,
    cmp: &CompareAst,
    path: ResolvedPath,
    side: Side,
) -> Result<QueryExpr, Error> {
    match side {
        Side::Value(value) => build_path_vs_value(bx, table, cmp, path, value, false),
        Side::Path(right) => build_path_vs_path(bx, table, cmp, path, right),
        Side::SubQuery(subquery) => Ok(expression_node(
            expr_cmp_op(cmp.op)?,
            !cmp.case_insensitive,
            path_expr(&path),
            Expr::SubQueryCount(subquery),
        )),
        Side::List(_) => Err(Error::invalid_query(
            "a braced value list is only valid on the right of 'IN'",
        )),
    }
}

fn build_path_vs_value(
    bx: &mut BuildContext<'_>,
    table: &Table,
    cmp: &CompareAst,
    path: ResolvedPath,
    value: Value,
    value_on_left: bool,
) -> Result<QueryExpr, Error> {
    let case_sensitive = !cmp.case_insensitive;

    // Aggregates compare as expressions after their own validation.
    if let Some(op) = path.agg {
        validate_aggregate_path(bx, &path, op)?;
        if value.is_null() {
            if matches!(op, AggrOp::Count | AggrOp::Size | AggrOp::BacklinkCount) {
                return Err(Error::invalid_query(
                    "comparison between 'null' and @size or @count",
                ));
            }
        }
        if let Some(node) = count_fast_path(&path, op, &value, cmp, value_on_left)? {
            return Ok(node);
        }
        let (op_mapped, left, right) = orient(
            expr_cmp_op(cmp.op)?,
            path_expr(&path),
            Expr::Literal(value),
            value_on_left,
        )?;
        return Ok(expression_node(op_mapped, case_sensitive, left, right));
    }

    if value.is_null() {
        return build_null_comparison(bx, table, cmp, path);
    }

    let target = bx.store.table_or_stale(path.target_table)?;
    let Some(col) = path.col else {
        // Self-key comparison (subquery variables): `$x == $0`.
        let coerced = value
            .coerce_to(DataType::Link)
            .ok_or_else(|| object_comparison_error(cmp.op))?;
        let (op_mapped, left, right) = orient(
            expr_cmp_op(cmp.op)?,
            Expr::SelfKey {
                link_map: LinkMap::new(path.hops),
            },
            Expr::Literal(coerced),
            value_on_left,
        )?;
        return Ok(expression_node(op_mapped, case_sensitive, left, right));
    };

    // Type check with literal coercion toward the column type.
    let coerced = coerce_for_expr(target, Some(col), &value)?;

    if col.data_type() == DataType::Link && !matches!(cmp.op, OperAst::Eq | OperAst::Ne) {
        return Err(object_comparison_error(cmp.op));
    }

    if path.hops.is_empty() && !col.is_list() {
        // Direct leaf node fast path.
        if col.data_type() == DataType::String {
            return string_node(col, cmp.op, case_sensitive, coerced, value_on_left);
        }
        if col.data_type() == DataType::Binary {
            return binary_node(col, cmp.op, case_sensitive, coerced, value_on_left);
        }
        validate_symbolic_op(col, cmp.op, target)?;
        let op = rel_op(cmp.op)?;
        let op = if value_on_left { op.mirrored() } else { op };
        return Ok(QueryExpr::Node(Box::new(super::super::cmp_node(
            col, op, coerced, case_sensitive,
        ))));
    }

    // Link traversal or list column: general expression.
    validate_symbolic_op_for_expr(col, cmp.op, target)?;
    let (op_mapped, left, right) = orient(
        expr_cmp_op(cmp.op)?,
        path_expr(&path),
        Expr::Literal(coerced),
        value_on_left,
    )?;
    Ok(expression_node(op_mapped, case_sensitive, left, right))
}

fn build_path_vs_path(
    bx: &mut BuildContext<'_>,
    _table: &Table,
    cmp: &CompareAst,
    left: ResolvedPath,
    right: ResolvedPath,
) -> Result<QueryExpr, Error> {
    if let Some(op) = left.agg {
        validate_aggregate_path(bx, &left, op)?;
    }
    if let Some(op) = right.agg {
        validate_aggregate_path(bx, &right, op)?;
    }
    if left.is_list_valued() && right.is_list_valued() && left.agg.is_none() && right.agg.is_none()
    {
        return Err(Error::unsupported(
            "list vs list comparisons are not currently supported",
        ));
    }
    Ok(expression_node(
        expr_cmp_op(cmp.op)?,
        !cmp.case_insensitive,
        path_expr(&left),
        path_expr(&right),
    ))
}

fn build_subquery_vs_value(
    cmp: &CompareAst,
    subquery: SubQueryExpr,
    value: Value,
    value_on_left: bool,
) -> Result<QueryExpr, Error> {
    if value.is_null() {
        return Err(Error::invalid_query(
            "comparison between 'null' and @size or @count",
        ));
    }
    let (op, left, right) = orient(
        expr_cmp_op(cmp.op)?,
        Expr::SubQueryCount(Box::new(subquery)),
        Expr::Literal(value),
        value_on_left,
    )?;
    Ok(expression_node(op, true, left, right))
}

fn build_null_comparison(
    _bx: &mut BuildContext<'_>,
    _table: &Table,
    cmp: &CompareAst,
    path: ResolvedPath,
) -> Result<QueryExpr, Error> {
    if !matches!(cmp.op, OperAst::Eq | OperAst::Ne | OperAst::In) {
        return Err(Error::invalid_query(
            "Only 'equal' and 'not equal' operators supported when comparing against 'null'.",
        ));
    }
    let Some(col) = path.col else {
        // Whole-object comparison is supported against null only.
        if path.is_list_valued() {
            return Err(Error::invalid_query(
                "Comparing a list property to 'null' is not supported",
            ));
        }
        let expr_op = if cmp.op == OperAst::Ne {
            ExprCmpOp::Ne
        } else {
            ExprCmpOp::Eq
        };
        return Ok(expression_node(
            expr_op,
            true,
            Expr::SelfKey {
                link_map: LinkMap::new(path.hops),
            },
            Expr::Literal(Value::Null),
        ));
    };
    if path.terminal_is_list() || col.data_type() == DataType::Backlink {
        return Err(Error::invalid_query(
            "Comparing a list property to 'null' is not supported",
        ));
    }
    let op = if cmp.op == OperAst::Ne {
        RelOp::NotEqual
    } else {
        RelOp::Equal
    };

    if path.hops.is_empty() {
        return Ok(QueryExpr::Node(Box::new(super::super::cmp_node(
            col,
            op,
            Value::Null,
            !cmp.case_insensitive,
        ))));
    }
    let expr_op = if op == RelOp::NotEqual {
        ExprCmpOp::Ne
    } else {
        ExprCmpOp::Eq
    };
    Ok(expression_node(
        expr_op,
        true,
        path_expr(&path),
        Expr::Literal(Value::Null),
    ))
}

///
/// NODE CONSTRUCTION HELPERS
///

fn path_expr(path: &ResolvedPath) -> Expr {
    let link_map = LinkMap::new(path.hops.clone());
    match (path.agg, path.col) {
        (Some(op), col) => Expr::Aggregate { link_map, col, op },
        (None, Some(col)) => Expr::Column { link_map, col },
        (None, None) => Expr::SelfKey { link_map },
    }
}

fn expression_node(op: ExprCmpOp, case_sensitive: bool, left: Expr, right: Expr) -> QueryExpr {
    QueryExpr::Node(Box::new(ConditionNode::new(NodeKind::Expression(
        crate::query::node::ExpressionNode {
            cmp: CompareExpr {
                op,
                case_sensitive,
                left,
                right,
            },
        },
    ))))
}

/// Swap operands so the column side leads; string match operators do not
/// commute and are rejected with the value on the left.
fn orient(
    op: ExprCmpOp,
    path_side: Expr,
    value_side: Expr,
    value_on_left: bool,
) -> Result<(ExprCmpOp, Expr, Expr), Error> {
    if !value_on_left {
        return Ok((op, path_side, value_side));
    }
    let mirrored = match op {
        ExprCmpOp::Eq => ExprCmpOp::Eq,
        ExprCmpOp::Ne => ExprCmpOp::Ne,
        ExprCmpOp::Lt => ExprCmpOp::Gt,
        ExprCmpOp::Le => ExprCmpOp::Ge,
        ExprCmpOp::Gt => ExprCmpOp::Lt,
        ExprCmpOp::Ge => ExprCmpOp::Le,
        ExprCmpOp::Contains | ExprCmpOp::BeginsWith | ExprCmpOp::EndsWith | ExprCmpOp::Like => {
            return Err(Error::unsupported(
                "Unsupported operator for keypath substring queries.",
            ));
        }
    };
    Ok((mirrored, path_side, value_side))
}

fn string_node(
    col: ColKey,
    op: OperAst,
    case_sensitive: bool,
    value: Value,
    value_on_left: bool,
) -> Result<QueryExpr, Error> {
    let needle = match value {
        Value::String(s) => Some(s),
        Value::Null => None,
        _ => unreachable!("string literals were coerced"),
    };
    if value_on_left && !matches!(op, OperAst::Eq | OperAst::Ne) {
        return Err(Error::unsupported(
            "Unsupported operator for keypath substring queries.",
        ));
    }
    let node = match op {
        OperAst::Eq => {
            if case_sensitive {
                ConditionNode::new(NodeKind::StringEqual(StringEqualNode::new(col, needle)))
            } else {
                ConditionNode::new(NodeKind::StringEqualIns(StringEqualInsNode::new(col, needle)))
            }
        }
        OperAst::Ne => ConditionNode::new(NodeKind::StringMatch(
            crate::query::node::StringMatchNode {
                col,
                op: StrMatchOp::NotEqual,
                case_sensitive,
                value: needle,
            },
        )),
        OperAst::Contains | OperAst::BeginsWith | OperAst::EndsWith | OperAst::Like => {
            let match_op = match op {
                OperAst::Contains => StrMatchOp::Contains,
                OperAst::BeginsWith => StrMatchOp::BeginsWith,
                OperAst::EndsWith => StrMatchOp::EndsWith,
                _ => StrMatchOp::Like,
            };
            ConditionNode::new(NodeKind::StringMatch(crate::query::node::StringMatchNode {
                col,
                op: match_op,
                case_sensitive,
                value: needle,
            }))
        }
        _ => {
            return Err(Error::unsupported(
                "Unsupported operator for string queries.",
            ))
        }
    };
    Ok(QueryExpr::Node(Box::new(node)))
}

fn binary_node(
    col: ColKey,
    op: OperAst,
    case_sensitive: bool,
    value: Value,
    value_on_left: bool,
) -> Result<QueryExpr, Error> {
    use crate::query::node::{BinMatchOp, BinaryMatchNode};
    let needle = match value {
        Value::Binary(b) => Some(b),
        Value::Null => None,
        _ => unreachable!("binary literals were coerced"),
    };
    if value_on_left && !matches!(op, OperAst::Eq | OperAst::Ne) {
        return Err(Error::unsupported(
            "Substring comparison not supported for keypath substrings.",
        ));
    }
    let bin_op = match op {
        OperAst::Eq => BinMatchOp::Equal,
        OperAst::Ne => BinMatchOp::NotEqual,
        OperAst::Contains => BinMatchOp::Contains,
        OperAst::BeginsWith => BinMatchOp::BeginsWith,
        OperAst::EndsWith => BinMatchOp::EndsWith,
        OperAst::Like => BinMatchOp::Like,
        _ => {
            return Err(Error::unsupported(
                "Unsupported operator for binary queries.",
            ))
        }
    };
    Ok(QueryExpr::Node(Box::new(ConditionNode::new(
        NodeKind::BinaryMatch(BinaryMatchNode {
            col,
            op: bin_op,
            case_sensitive,
            value: needle,
        }),
    ))))
}

fn validate_symbolic_op(col: ColKey, op: OperAst, table: &Table) -> Result<(), Error> {
    if string_match_op(op).is_some() {
        return Err(Error::unsupported(format!(
            "Unsupported operator for property '{}' of type '{}'",
            table.column_name(col),
            col.data_type()
        )));
    }
    if col.data_type() == DataType::Bool && !matches!(op, OperAst::Eq | OperAst::Ne) {
        return Err(Error::unsupported(
            "Unsupported operator for numeric queries.",
        ));
    }
    if col.data_type() == DataType::Link && !matches!(op, OperAst::Eq | OperAst::Ne) {
        return Err(object_comparison_error(op));
    }
    Ok(())
}

fn validate_symbolic_op_for_expr(col: ColKey, op: OperAst, table: &Table) -> Result<(), Error> {
    if string_match_op(op).is_some()
        && !matches!(col.data_type(), DataType::String | DataType::Binary)
    {
        return Err(Error::unsupported(format!(
            "Unsupported operator for property '{}' of type '{}'",
            table.column_name(col),
            col.data_type()
        )));
    }
    validate_symbolic_op_ordering(col, op)
}

fn validate_symbolic_op_ordering(col: ColKey, op: OperAst) -> Result<(), Error> {
    let ordering = matches!(op, OperAst::Lt | OperAst::Le | OperAst::Gt | OperAst::Ge);
    if ordering
        && matches!(
            col.data_type(),
            DataType::Bool | DataType::Link | DataType::Backlink
        )
    {
        return Err(object_comparison_error(op));
    }
    Ok(())
}

fn object_comparison_error(_op: OperAst) -> Error {
    Error::unsupported("Only 'equal' and 'not equal' operators supported for object comparison.")
}

fn string_match_op(op: OperAst) -> Option<ExprCmpOp> {
    match op {
        OperAst::Contains => Some(ExprCmpOp::Contains),
        OperAst::BeginsWith => Some(ExprCmpOp::BeginsWith),
        OperAst::EndsWith => Some(ExprCmpOp::EndsWith),
        OperAst::Like => Some(ExprCmpOp::Like),
        _ => None,
    }
}

fn rel_op(op: OperAst) -> Result<RelOp, Error> {
    match op {
        OperAst::Eq | OperAst::In => Ok(RelOp::Equal),
        OperAst::Ne => Ok(RelOp::NotEqual),
        OperAst::Lt => Ok(RelOp::Less),
        OperAst::Le => Ok(RelOp::LessEqual),
        OperAst::Gt => Ok(RelOp::Greater),
        OperAst::Ge => Ok(RelOp::GreaterEqual),
        _ => Err(Error::unsupported(
            "Unsupported operator for numeric queries.",
        )),
    }
}

fn expr_cmp_op(op: OperAst) -> Result<ExprCmpOp, Error> {
    match op {
        OperAst::Eq | OperAst::In => Ok(ExprCmpOp::Eq),
        OperAst::Ne => Ok(ExprCmpOp::Ne),
        OperAst::Lt => Ok(ExprCmpOp::Lt),
        OperAst::Le => Ok(ExprCmpOp::Le),
        OperAst::Gt => Ok(ExprCmpOp::Gt),
        OperAst::Ge => Ok(ExprCmpOp::Ge),
        OperAst::Contains => Ok(ExprCmpOp::Contains),
        OperAst::BeginsWith => Ok(ExprCmpOp::BeginsWith),
        OperAst::EndsWith => Ok(ExprCmpOp::EndsWith),
        OperAst::Like => Ok(ExprCmpOp::Like),
        OperAst::Between => Err(Error::invalid_query(
            "The 'between' operator is not supported yet, please rewrite the expression using \
             '>' and '<'.",
        )),
    }
}

fn coerce_for_expr(
    table: &Table,
    col: Option<ColKey>,
    value: &Value,
) -> Result<Value, Error> {
    let Some(col) = col else {
        return Ok(value.clone());
    };
    value.coerce_to(col.data_type()).ok_or_else(|| {
        Error::invalid_query(format!(
            "Unsupported comparison between property '{}' of type '{}' and value {value:?}",
            table.column_name(col),
            col.data_type()
        ))
    })
}

fn validate_aggregate_path(
    bx: &BuildContext<'_>,
    path: &ResolvedPath,
    op: AggrOp,
) -> Result<(), Error> {
    match op {
        AggrOp::Count | AggrOp::Size | AggrOp::BacklinkCount => Ok(()),
        AggrOp::Min | AggrOp::Max | AggrOp::Sum | AggrOp::Avg => {
            let Some(col) = path.col else {
                return Err(Error::unsupported(format!(
                    "'{}' requires a property to aggregate over",
                    op.token()
                )));
            };
            let numeric = matches!(
                col.data_type(),
                DataType::Int | DataType::Float | DataType::Double
            );
            let timestamp_ok = matches!(op, AggrOp::Min | AggrOp::Max)
                && col.data_type() == DataType::Timestamp;
            if numeric || timestamp_ok {
                Ok(())
            } else {
                let table = bx.store.table_or_stale(path.target_table)?;
                Err(Error::unsupported(format!(
                    "Cannot use aggregate '{}' on property '{}' of type '{}'",
                    op.token(),
                    table.column_name(col),
                    col.data_type()
                )))
            }
        }
    }
}

/// `.@count` / `.@size` against a scalar over at most one hop lowers to
/// a dedicated count node.
fn count_fast_path(
    path: &ResolvedPath,
    op: AggrOp,
    value: &Value,
    cmp: &CompareAst,
    value_on_left: bool,
) -> Result<Option<QueryExpr>, Error> {
    if !matches!(op, AggrOp::Count | AggrOp::Size | AggrOp::BacklinkCount) {
        return Ok(None);
    }
    let Value::Int(count) = value else {
        return Ok(None);
    };
    let Ok(rel) = rel_op(cmp.op) else {
        return Ok(None);
    };
    let rel = if value_on_left { rel.mirrored() } else { rel };

    let source = match (op, path.hops.as_slice(), path.col) {
        (AggrOp::BacklinkCount, [], None) => CountSource::AllBacklinks,
        (AggrOp::Count | AggrOp::Size, [], Some(col)) if col.is_list() => {
            if col.data_type() == DataType::Link {
                CountSource::LinkList(col)
            } else {
                CountSource::ValueList(col)
            }
        }
        (AggrOp::Count | AggrOp::Size, [hop], None) => match hop.kind {
            LinkKind::List => CountSource::LinkList(hop.col),
            LinkKind::Backlink => CountSource::Backlink(hop.col),
            LinkKind::Single => return Ok(None),
        },
        _ => return Ok(None),
    };
    Ok(Some(QueryExpr::Node(Box::new(ConditionNode::new(
        NodeKind::Count(CountNode {
            source,
            op: rel,
            value: *count,
        }),
    )))))
}

///
/// DESCRIPTORS
///

fn build_ordering(
    bx: &BuildContext<'_>,
    table: &Table,
    descriptors: &[DescriptorAst],
) -> Result<DescriptorOrdering, Error> {
    let mut ordering = DescriptorOrdering::new();
    for descriptor in descriptors {
        match descriptor {
            DescriptorAst::Sort(params) => {
                let mut keypaths = Vec::with_capacity(params.len());
                let mut ascending = Vec::with_capacity(params.len());
                for (path, asc) in params {
                    keypaths.push(ResolvedKeyPath::resolve(bx.store, table, path, "sort")?);
                    ascending.push(*asc);
                }
                ordering.append_sort(SortDescriptor::new(keypaths, ascending));
            }
            DescriptorAst::Distinct(paths) => {
                let mut keypaths = Vec::with_capacity(paths.len());
                for path in paths {
                    keypaths.push(ResolvedKeyPath::resolve(bx.store, table, path, "distinct")?);
                }
                ordering.append_distinct(DistinctDescriptor::new(keypaths));
            }
            DescriptorAst::Limit(limit) => {
                if *limit < 0 {
                    return Err(Error::out_of_range(
                        "'LIMIT' accepts a positive integer parameter eg: 'LIMIT(10)'",
                    ));
                }
                #[expect(clippy::cast_sign_loss)]
                ordering.append_limit(*limit as usize);
            }
            DescriptorAst::Include(paths) => {
                let mut include_paths = Vec::with_capacity(paths.len());
                for path in paths {
                    include_paths.push(resolve_include_path(bx, table, path)?);
                }
                ordering.append_include(IncludeDescriptor::from_paths(include_paths));
            }
        }
    }
    Ok(ordering)
}

/// Parse a standalone INCLUDE path (the form accepted by view-layer
/// consumers that attach inclusions after the query was built).
pub fn parse_include_path(
    store: &Store,
    table: TableKey,
    mapping: &KeyPathMapping,
    path: &str,
) -> Result<IncludeDescriptor, Error> {
    let segments = ast::parse_path_text(path)?;
    let base = store.table_or_stale(table)?;
    let bx = BuildContext {
        store,
        mapping,
        args: &[],
        vars: Vec::new(),
    };
    let resolved = resolve_include_path(&bx, base, &segments)?;
    Ok(IncludeDescriptor::from_paths(vec![resolved]))
}

/// Resolve one INCLUDE path. Backlinks are allowed here even when the
/// mapping disables them elsewhere; included paths are backlinks by
/// definition.
fn resolve_include_path(
    bx: &BuildContext<'_>,
    table: &Table,
    path: &[String],
) -> Result<IncludePath, Error> {
    let mut segments = path.to_vec();
    let mut current = table;
    let mut index = 0;
    let mut hops = Vec::new();
    let mut display_parts: Vec<String> = Vec::new();

    while index < segments.len() {
        let element =
            bx.mapping
                .process_next_path(bx.store, current, &mut segments, &mut index, true)?;
        match &element {
            PathElement::Column { col, .. } if col.data_type() == DataType::Link => {
                display_parts.push(current.column_name(*col).to_string());
                let target = current
                    .get_link_target(*col)
                    .ok_or_else(|| Error::stale_accessor("link column lost its target"))?;
                hops.push(element.as_hop().expect("link columns are hops"));
                current = bx.store.table_or_stale(target)?;
            }
            PathElement::Backlink {
                origin_table,
                origin_col,
                ..
            } => {
                let origin = bx.store.table_or_stale(*origin_table)?;
                display_parts.push(format!(
                    "@links.{}.{}",
                    origin.name(),
                    origin.column_name(*origin_col)
                ));
                hops.push(element.as_hop().expect("backlinks are hops"));
                current = origin;
            }
            PathElement::Column { col, .. } => {
                return Err(Error::invalid_query(format!(
                    "Property '{}' is not a link in object of type '{}' in 'INCLUDE' clause",
                    current.column_name(*col),
                    current.name()
                )));
            }
            PathElement::AllBacklinks { .. } => {
                return Err(Error::invalid_query(
                    "Invalid syntax encountered while parsing key path for 'INCLUDE'.",
                ));
            }
        }
    }

    IncludePath::new(hops, display_parts.join("."))
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::days_from_civil;

    #[test]
    fn civil_day_arithmetic_matches_known_instants() {
        assert_eq!(days_from_civil(1970, 1, 1), 0);
        assert_eq!(days_from_civil(1970, 1, 2), 1);
        assert_eq!(days_from_civil(1969, 12, 31), -1);
        assert_eq!(days_from_civil(2000, 3, 1), 11_017);
        assert_eq!(days_from_civil(1900, 1, 1), -25_567);
    }
}
