//! Surface AST and the lowering from the pest parse tree. This layer is
//! schema-agnostic: key paths are still name sequences and literals are
//! still unvalidated; interpretation happens in `build`.

use crate::error::Error;
use base64::Engine;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "query/parse/strata.pest"]
pub(crate) struct PredicateParser;

///
/// OperAst
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum OperAst {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Contains,
    BeginsWith,
    EndsWith,
    Like,
    Between,
}

///
/// Quantifier
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Quantifier {
    Unspecified,
    Any,
    All,
    None,
}

///
/// TimestampAst
///

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TimestampAst {
    Internal {
        seconds: i64,
        nanoseconds: i64,
    },
    Readable {
        year: i64,
        month: i64,
        day: i64,
        hour: i64,
        minute: i64,
        second: i64,
        nanoseconds: Option<i64>,
    },
}

///
/// ExprAst
///

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ExprAst {
    String(String),
    Int(i64),
    Double(f64),
    True,
    False,
    Null,
    Timestamp(TimestampAst),
    Base64(Vec<u8>),
    Argument(usize),
    ObjKeyLit(i64),
    KeyPath(Vec<String>),
    List(Vec<Self>),
    SubQuery {
        path: Vec<String>,
        var: String,
        pred: Box<PredAst>,
    },
}

///
/// CompareAst
///

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct CompareAst {
    pub quantifier: Quantifier,
    pub op: OperAst,
    pub case_insensitive: bool,
    pub left: ExprAst,
    pub right: ExprAst,
}

///
/// PredAst
///

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum PredAst {
    True,
    False,
    And(Vec<Self>),
    Or(Vec<Self>),
    Not(Box<Self>),
    Compare(Box<CompareAst>),
}

///
/// DescriptorAst
///

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum DescriptorAst {
    Sort(Vec<(Vec<String>, bool)>),
    Distinct(Vec<Vec<String>>),
    Limit(i64),
    Include(Vec<Vec<String>>),
}

///
/// ParsedAst
///

#[derive(Clone, Debug)]
pub(crate) struct ParsedAst {
    pub predicate: PredAst,
    pub descriptors: Vec<DescriptorAst>,
}

/// Parse query text into the surface AST.
pub(crate) fn parse_text(text: &str) -> Result<ParsedAst, Error> {
    let mut pairs = PredicateParser::parse(Rule::query, text)
        .map_err(|e| Error::invalid_query(e.to_string().replace('\n', " ")))?;
    let query = pairs.next().expect("query rule always produces one pair");

    let mut descriptors = Vec::new();
    let mut predicate = None;
    for pair in query.into_inner() {
        if pair.as_rule() == Rule::pred {
            predicate = Some(lower_pred(pair, &mut descriptors)?);
        }
    }
    Ok(ParsedAst {
        predicate: predicate.expect("query rule contains a predicate"),
        descriptors,
    })
}

/// Parse a bare key path (the INCLUDE form accepted by the view layer).
pub(crate) fn parse_path_text(text: &str) -> Result<Vec<String>, Error> {
    let mut pairs = PredicateParser::parse(Rule::include_path_only, text).map_err(|_| {
        Error::invalid_query("Invalid syntax encountered while parsing key path for 'INCLUDE'.")
    })?;
    let outer = pairs.next().expect("rule produces one pair");
    for pair in outer.into_inner() {
        if pair.as_rule() == Rule::key_path {
            return Ok(split_key_path(pair.as_str()));
        }
    }
    Err(Error::invalid_query(
        "Invalid syntax encountered while parsing key path for 'INCLUDE'.",
    ))
}

fn lower_pred(
    pair: Pair<'_, Rule>,
    descriptors: &mut Vec<DescriptorAst>,
) -> Result<PredAst, Error> {
    debug_assert_eq!(pair.as_rule(), Rule::pred);
    let mut children = Vec::new();
    for inner in pair.into_inner() {
        if inner.as_rule() == Rule::and_pred {
            children.push(lower_and(inner, descriptors)?);
        }
    }
    Ok(if children.len() == 1 {
        children.pop().expect("length checked")
    } else {
        PredAst::Or(children)
    })
}

fn lower_and(
    pair: Pair<'_, Rule>,
    descriptors: &mut Vec<DescriptorAst>,
) -> Result<PredAst, Error> {
    debug_assert_eq!(pair.as_rule(), Rule::and_pred);
    let mut children = Vec::new();
    for inner in pair.into_inner() {
        if inner.as_rule() == Rule::atom_pred {
            children.push(lower_atom(inner, descriptors)?);
        }
    }
    Ok(if children.len() == 1 {
        children.pop().expect("length checked")
    } else {
        PredAst::And(children)
    })
}

fn lower_atom(
    pair: Pair<'_, Rule>,
    descriptors: &mut Vec<DescriptorAst>,
) -> Result<PredAst, Error> {
    debug_assert_eq!(pair.as_rule(), Rule::atom_pred);
    let mut negations = 0_usize;
    let mut base = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::not_op => negations += 1,
            Rule::base_pred => base = Some(lower_base(inner, descriptors)?),
            Rule::suffix_modifier => lower_suffix(inner, descriptors)?,
            _ => {}
        }
    }
    let mut pred = base.expect("atom contains a base predicate");
    for _ in 0..negations {
        pred = PredAst::Not(Box::new(pred));
    }
    Ok(pred)
}

fn lower_base(
    pair: Pair<'_, Rule>,
    descriptors: &mut Vec<DescriptorAst>,
) -> Result<PredAst, Error> {
    let inner = pair.into_inner().next().expect("base_pred has one child");
    match inner.as_rule() {
        Rule::group_pred => {
            let pred = inner.into_inner().next().expect("group contains a pred");
            lower_pred(pred, descriptors)
        }
        Rule::true_pred => Ok(PredAst::True),
        Rule::false_pred => Ok(PredAst::False),
        Rule::agg_pred => lower_agg(inner, descriptors),
        Rule::comparison_pred => lower_comparison(inner, Quantifier::Unspecified, descriptors),
        rule => unreachable!("unexpected base predicate rule {rule:?}"),
    }
}

fn lower_agg(
    pair: Pair<'_, Rule>,
    descriptors: &mut Vec<DescriptorAst>,
) -> Result<PredAst, Error> {
    let mut quantifier = Quantifier::Any;
    let mut target = None;
    let mut oper = None;
    let mut rhs = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::agg_kind => {
                quantifier = match inner.as_str().to_ascii_lowercase().as_str() {
                    "all" => Quantifier::All,
                    "none" => Quantifier::None,
                    _ => Quantifier::Any, // any / some
                };
            }
            Rule::key_path => target = Some(split_key_path(inner.as_str())),
            Rule::oper => oper = Some(lower_oper(&inner)),
            Rule::expr => rhs = Some(lower_expr(inner, descriptors)?),
            _ => {}
        }
    }
    let (op, case_insensitive) = oper.expect("aggregate predicate has an operator");
    Ok(PredAst::Compare(Box::new(CompareAst {
        quantifier,
        op,
        case_insensitive,
        left: ExprAst::KeyPath(target.expect("aggregate predicate has a key path")),
        right: rhs.expect("aggregate predicate has a right-hand side"),
    })))
}

fn lower_comparison(
    pair: Pair<'_, Rule>,
    quantifier: Quantifier,
    descriptors: &mut Vec<DescriptorAst>,
) -> Result<PredAst, Error> {
    let mut exprs = Vec::new();
    let mut oper = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::expr => exprs.push(lower_expr(inner, descriptors)?),
            Rule::oper => oper = Some(lower_oper(&inner)),
            _ => {}
        }
    }
    let (op, case_insensitive) = oper.expect("comparison has an operator");
    let right = exprs.pop().expect("comparison has two expressions");
    let left = exprs.pop().expect("comparison has two expressions");
    Ok(PredAst::Compare(Box::new(CompareAst {
        quantifier,
        op,
        case_insensitive,
        left,
        right,
    })))
}

fn lower_oper(pair: &Pair<'_, Rule>) -> (OperAst, bool) {
    let text = pair.as_str();
    let ci = text.to_ascii_lowercase().contains("[c]");
    let inner = pair
        .clone()
        .into_inner()
        .next()
        .expect("oper has one child");
    let op = match inner.as_rule() {
        Rule::string_oper => {
            let name = inner
                .clone()
                .into_inner()
                .next()
                .expect("string oper has a name");
            match name.as_str().to_ascii_lowercase().as_str() {
                "contains" => OperAst::Contains,
                "beginswith" => OperAst::BeginsWith,
                "endswith" => OperAst::EndsWith,
                _ => OperAst::Like,
            }
        }
        Rule::symbolic_oper => {
            let sym = inner
                .clone()
                .into_inner()
                .next()
                .expect("symbolic oper has a child");
            match sym.as_rule() {
                Rule::ne_oper => OperAst::Ne,
                Rule::le_oper => OperAst::Le,
                Rule::ge_oper => OperAst::Ge,
                Rule::lt_oper => OperAst::Lt,
                Rule::gt_oper => OperAst::Gt,
                Rule::eq_oper => OperAst::Eq,
                Rule::in_oper => OperAst::In,
                Rule::between_oper => OperAst::Between,
                rule => unreachable!("unexpected symbolic operator {rule:?}"),
            }
        }
        rule => unreachable!("unexpected operator rule {rule:?}"),
    };
    (op, ci)
}

fn lower_expr(
    pair: Pair<'_, Rule>,
    descriptors: &mut Vec<DescriptorAst>,
) -> Result<ExprAst, Error> {
    let inner = pair.into_inner().next().expect("expr has one child");
    match inner.as_rule() {
        Rule::string => parse_string_literal(inner.as_str()).map(ExprAst::String),
        Rule::base64 => parse_base64_literal(inner.as_str()).map(ExprAst::Base64),
        Rule::timestamp => parse_timestamp_literal(inner.as_str()),
        Rule::number => parse_number_literal(inner.as_str()),
        Rule::argument => {
            let index: usize = inner.as_str()[1..]
                .parse()
                .map_err(|_| Error::invalid_query("argument index out of range"))?;
            Ok(ExprAst::Argument(index))
        }
        Rule::true_lit => Ok(ExprAst::True),
        Rule::false_lit => Ok(ExprAst::False),
        Rule::null_lit => Ok(ExprAst::Null),
        Rule::obj_key => {
            let value: i64 = inner.as_str()[1..]
                .parse()
                .map_err(|_| Error::invalid_query("object key literal out of range"))?;
            Ok(ExprAst::ObjKeyLit(value))
        }
        Rule::value_list => {
            let mut items = Vec::new();
            for item in inner.into_inner() {
                if item.as_rule() == Rule::expr {
                    items.push(lower_expr(item, descriptors)?);
                }
            }
            Ok(ExprAst::List(items))
        }
        Rule::key_path => Ok(ExprAst::KeyPath(split_key_path(inner.as_str()))),
        Rule::subquery => {
            let mut path = None;
            let mut var = None;
            let mut pred = None;
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::key_path => path = Some(split_key_path(part.as_str())),
                    Rule::sub_var => var = Some(part.as_str().to_string()),
                    Rule::pred => pred = Some(lower_pred(part, descriptors)?),
                    _ => {}
                }
            }
            Ok(ExprAst::SubQuery {
                path: path.expect("subquery has a list path"),
                var: var.expect("subquery has a variable"),
                pred: Box::new(pred.expect("subquery has a predicate")),
            })
        }
        rule => unreachable!("unexpected expression rule {rule:?}"),
    }
}

fn lower_suffix(
    pair: Pair<'_, Rule>,
    descriptors: &mut Vec<DescriptorAst>,
) -> Result<(), Error> {
    let inner = pair.into_inner().next().expect("suffix has one child");
    match inner.as_rule() {
        Rule::sort_suffix => {
            let mut params = Vec::new();
            for param in inner.into_inner() {
                if param.as_rule() == Rule::sort_param {
                    let mut path = None;
                    let mut ascending = true;
                    for part in param.into_inner() {
                        match part.as_rule() {
                            Rule::key_path => path = Some(split_key_path(part.as_str())),
                            Rule::direction => {
                                let text = part.as_str().to_ascii_lowercase();
                                ascending = text.starts_with("asc");
                            }
                            _ => {}
                        }
                    }
                    params.push((path.expect("sort param has a key path"), ascending));
                }
            }
            descriptors.push(DescriptorAst::Sort(params));
        }
        Rule::distinct_suffix => {
            let paths = collect_key_paths(inner);
            descriptors.push(DescriptorAst::Distinct(paths));
        }
        Rule::limit_suffix => {
            let param = inner
                .into_inner()
                .find(|p| p.as_rule() == Rule::limit_param)
                .expect("limit has a parameter");
            let limit: i64 = param.as_str().parse().map_err(|_| {
                Error::out_of_range(
                    "'LIMIT' accepts a positive integer parameter eg: 'LIMIT(10)'",
                )
            })?;
            descriptors.push(DescriptorAst::Limit(limit));
        }
        Rule::include_suffix => {
            let paths = collect_key_paths(inner);
            descriptors.push(DescriptorAst::Include(paths));
        }
        rule => unreachable!("unexpected suffix rule {rule:?}"),
    }
    Ok(())
}

fn collect_key_paths(pair: Pair<'_, Rule>) -> Vec<Vec<String>> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::key_path)
        .map(|p| split_key_path(p.as_str()))
        .collect()
}

pub(crate) fn split_key_path(path: &str) -> Vec<String> {
    path.split('.').map(ToString::to_string).collect()
}

///
/// LITERALS
///

/// Strip quotes and resolve C-style escapes plus `\uXXXX`.
fn parse_string_literal(raw: &str) -> Result<String, Error> {
    let body = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let escape = chars
            .next()
            .ok_or_else(|| Error::invalid_query("Invalid characters in string constant."))?;
        match escape {
            '"' => out.push('"'),
            '\'' => out.push('\''),
            '\\' => out.push('\\'),
            '/' => out.push('/'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            '0' => out.push('\0'),
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16)
                    .map_err(|_| Error::invalid_query("Invalid characters in string constant."))?;
                let decoded = char::from_u32(code)
                    .ok_or_else(|| Error::invalid_query("Invalid characters in string constant."))?;
                out.push(decoded);
            }
            _ => return Err(Error::invalid_query("Invalid characters in string constant.")),
        }
    }
    Ok(out)
}

fn parse_base64_literal(raw: &str) -> Result<Vec<u8>, Error> {
    // expects wrapper tokens B64"..."
    let body = &raw[4..raw.len() - 1];
    base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|_| Error::invalid_query("Invalid base64 value"))
}

fn parse_number_literal(raw: &str) -> Result<ExprAst, Error> {
    let (negative, body) = raw
        .strip_prefix('-')
        .map_or((false, raw), |rest| (true, rest));

    if let Some(hex) = body
        .strip_prefix("0x")
        .or_else(|| body.strip_prefix("0X"))
    {
        let value = i64::from_str_radix(hex, 16)
            .map_err(|_| Error::invalid_query(format!("invalid hexadecimal literal '{raw}'")))?;
        return Ok(ExprAst::Int(if negative { -value } else { value }));
    }
    if body.contains('.') {
        let value: f64 = raw
            .parse()
            .map_err(|_| Error::invalid_query(format!("invalid number literal '{raw}'")))?;
        return Ok(ExprAst::Double(value));
    }
    let value: i64 = raw
        .parse()
        .map_err(|_| Error::invalid_query(format!("invalid number literal '{raw}'")))?;
    Ok(ExprAst::Int(value))
}

fn parse_timestamp_literal(raw: &str) -> Result<ExprAst, Error> {
    let numbers: Vec<i64> = if let Some(body) = raw.strip_prefix('T') {
        body.split(':')
            .map(|part| {
                part.parse()
                    .map_err(|_| Error::invalid_query(format!("invalid timestamp '{raw}'")))
            })
            .collect::<Result<_, _>>()?
    } else {
        raw.split(['-', '@', 'T', ':'])
            .map(|part| {
                part.parse()
                    .map_err(|_| Error::invalid_query(format!("invalid timestamp '{raw}'")))
            })
            .collect::<Result<_, _>>()?
    };

    match numbers.len() {
        2 => Ok(ExprAst::Timestamp(TimestampAst::Internal {
            seconds: numbers[0],
            nanoseconds: numbers[1],
        })),
        6 | 7 => Ok(ExprAst::Timestamp(TimestampAst::Readable {
            year: numbers[0],
            month: numbers[1],
            day: numbers[2],
            hour: numbers[3],
            minute: numbers[4],
            second: numbers[5],
            nanoseconds: numbers.get(6).copied(),
        })),
        _ => Err(Error::invalid_query(format!(
            "Unexpected timestamp format '{raw}'"
        ))),
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::{parse_text, DescriptorAst, ExprAst, OperAst, PredAst, TimestampAst};

    fn compare_of(pred: &PredAst) -> &super::CompareAst {
        match pred {
            PredAst::Compare(cmp) => cmp,
            other => panic!("expected a comparison, got {other:?}"),
        }
    }

    #[test]
    fn parses_symbolic_operator_aliases() {
        for (text, op) in [
            ("a == 1", OperAst::Eq),
            ("a = 1", OperAst::Eq),
            ("a != 1", OperAst::Ne),
            ("a <> 1", OperAst::Ne),
            ("a =< 1", OperAst::Le),
            ("a => 1", OperAst::Ge),
        ] {
            let parsed = parse_text(text).unwrap();
            assert_eq!(compare_of(&parsed.predicate).op, op, "operator in {text}");
        }
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let parsed = parse_text("a == 1 || b == 2 && c == 3").unwrap();
        match parsed.predicate {
            PredAst::Or(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(children[1], PredAst::And(_)));
            }
            other => panic!("expected OR at the root, got {other:?}"),
        }
    }

    #[test]
    fn parses_string_escapes_and_unicode() {
        let parsed = parse_text(r#"name == "a\tbA""#).unwrap();
        let cmp = compare_of(&parsed.predicate);
        assert_eq!(cmp.right, ExprAst::String("a\tbA".to_string()));
    }

    #[test]
    fn parses_hex_and_float_literals() {
        let parsed = parse_text("a == 0x1f || b == -2.5 || c == .5").unwrap();
        let PredAst::Or(children) = parsed.predicate else {
            panic!("expected OR");
        };
        assert_eq!(compare_of(&children[0]).right, ExprAst::Int(31));
        assert_eq!(compare_of(&children[1]).right, ExprAst::Double(-2.5));
        assert_eq!(compare_of(&children[2]).right, ExprAst::Double(0.5));
    }

    #[test]
    fn parses_both_timestamp_forms() {
        let parsed = parse_text("t == T-1:-1 && t < 1970-1-1@0:0:0:1").unwrap();
        let PredAst::And(children) = parsed.predicate else {
            panic!("expected AND");
        };
        assert_eq!(
            compare_of(&children[0]).right,
            ExprAst::Timestamp(TimestampAst::Internal {
                seconds: -1,
                nanoseconds: -1
            })
        );
        assert!(matches!(
            compare_of(&children[1]).right,
            ExprAst::Timestamp(TimestampAst::Readable { nanoseconds: Some(1), .. })
        ));
    }

    #[test]
    fn descriptors_are_collected_in_written_order() {
        let parsed =
            parse_text("TRUEPREDICATE SORT(name ASC) DISTINCT(age) LIMIT(2)").unwrap();
        assert_eq!(parsed.predicate, PredAst::True);
        assert!(matches!(parsed.descriptors[0], DescriptorAst::Sort(_)));
        assert!(matches!(parsed.descriptors[1], DescriptorAst::Distinct(_)));
        assert_eq!(parsed.descriptors[2], DescriptorAst::Limit(2));
    }

    #[test]
    fn parses_subquery_with_count_suffix() {
        let parsed =
            parse_text("SUBQUERY(items, $x, $x.price > 5 && $x.name CONTAINS 'a').@count > 1")
                .unwrap();
        let cmp = compare_of(&parsed.predicate);
        match &cmp.left {
            ExprAst::SubQuery { path, var, .. } => {
                assert_eq!(path, &vec!["items".to_string()]);
                assert_eq!(var, "$x");
            }
            other => panic!("expected a subquery, got {other:?}"),
        }
    }

    #[test]
    fn parses_in_with_braced_list() {
        let parsed = parse_text(r#"a IN {"0", "1", "2"}"#).unwrap();
        let cmp = compare_of(&parsed.predicate);
        assert_eq!(cmp.op, OperAst::In);
        assert!(matches!(&cmp.right, ExprAst::List(items) if items.len() == 3));
    }

    #[test]
    fn backlink_key_paths_keep_at_tokens() {
        let parsed = parse_text("@links.Person.items.@count > 0").unwrap();
        let cmp = compare_of(&parsed.predicate);
        assert_eq!(
            cmp.left,
            ExprAst::KeyPath(vec![
                "@links".to_string(),
                "Person".to_string(),
                "items".to_string(),
                "@count".to_string(),
            ])
        );
    }

    #[test]
    fn negative_limit_survives_to_the_builder() {
        // The grammar admits the sign; range validation is the
        // builder's job so the error can be categorised.
        let parsed = parse_text("TRUEPREDICATE LIMIT(-1)").unwrap();
        assert_eq!(parsed.descriptors[0], DescriptorAst::Limit(-1));
    }

    #[test]
    fn not_prefixes_accumulate() {
        let parsed = parse_text("!!a == 1").unwrap();
        assert!(matches!(
            parsed.predicate,
            PredAst::Not(ref inner) if matches!(**inner, PredAst::Not(_))
        ));
    }
}
