use regex::RegexBuilder;
use serde_json::Value as Json;

use super::compile::CompiledFilter;
use super::expr::{FilterExpr, FilterValue, GroupOp, Op};

/// Evaluates a compiled filter against an in-memory JSON document. Must
/// produce the same inclusion decision as the store-side predicate
/// compiled from the same `CompiledFilter` tree (§4.C, §8).
pub fn evaluate(filter: &CompiledFilter, doc: &Json) -> bool {
    eval_expr(&filter.0, doc)
}

fn eval_expr(expr: &FilterExpr, doc: &Json) -> bool {
    match expr {
        FilterExpr::Leaf { field, op } => eval_leaf(field, op, doc),
        FilterExpr::Group { op: GroupOp::And, children } => children.iter().all(|c| eval_expr(c, doc)),
        FilterExpr::Group { op: GroupOp::Or, children } => children.iter().any(|c| eval_expr(c, doc)),
        FilterExpr::Group { op: GroupOp::Not, children } => !children.iter().all(|c| eval_expr(c, doc)),
    }
}

/// Walks dot-notation path segments through nested objects. A missing
/// intermediate key yields `None`, which every operator except
/// `IS_NULL`/`IS_NOT_NULL` treats as `false`.
fn resolve_path<'a>(doc: &'a Json, field: &str) -> Option<&'a Json> {
    let mut current = doc;
    for segment in FilterExpr::split_path(field) {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn eval_leaf(field: &str, op: &Op, doc: &Json) -> bool {
    let resolved = resolve_path(doc, field);

    match op {
        Op::IsNull => resolved.map(Json::is_null).unwrap_or(true),
        Op::IsNotNull => resolved.map(|v| !v.is_null()).unwrap_or(false),
        _ => {
            let Some(json_val) = resolved.filter(|v| !v.is_null()) else { return false };
            eval_value_op(json_val, op)
        }
    }
}

fn eval_value_op(json_val: &Json, op: &Op) -> bool {
    match op {
        Op::Eq(v) => json_eq(json_val, v),
        Op::Neq(v) => !json_eq(json_val, v),
        Op::Lt(v) => compare(json_val, v).map(|o| o.is_lt()).unwrap_or(false),
        Op::Lte(v) => compare(json_val, v).map(|o| o.is_le()).unwrap_or(false),
        Op::Gt(v) => compare(json_val, v).map(|o| o.is_gt()).unwrap_or(false),
        Op::Gte(v) => compare(json_val, v).map(|o| o.is_ge()).unwrap_or(false),
        Op::Between(lo, hi) => {
            compare(json_val, lo).map(|o| o.is_ge()).unwrap_or(false)
                && compare(json_val, hi).map(|o| o.is_le()).unwrap_or(false)
        }
        Op::In(vs) => vs.iter().any(|v| json_eq(json_val, v)),
        Op::NotIn(vs) => !vs.iter().any(|v| json_eq(json_val, v)),
        Op::AnyOf(vs) => json_array(json_val).is_some_and(|arr| arr.iter().any(|e| vs.iter().any(|v| json_eq(e, v)))),
        Op::AllOf(vs) => json_array(json_val).is_some_and(|arr| vs.iter().all(|v| arr.iter().any(|e| json_eq(e, v)))),
        Op::NoneOf(vs) => json_array(json_val).is_some_and(|arr| !arr.iter().any(|e| vs.iter().any(|v| json_eq(e, v)))),
        Op::Contains { needle, case_sensitive } => text_match(json_val, *case_sensitive, |h, n| h.contains(n), needle),
        Op::StartsWith { prefix, case_sensitive } => text_match(json_val, *case_sensitive, |h, n| h.starts_with(n), prefix),
        Op::EndsWith { suffix, case_sensitive } => text_match(json_val, *case_sensitive, |h, n| h.ends_with(n), suffix),
        Op::Regex { pattern, case_sensitive } => {
            let Some(s) = json_val.as_str() else { return false };
            RegexBuilder::new(pattern)
                .case_insensitive(!case_sensitive)
                .build()
                .map(|re| re.is_match(s))
                .unwrap_or(false)
        }
        Op::IsNull | Op::IsNotNull => unreachable!("handled in eval_leaf"),
        Op::TimeWindow(_) => unreachable!("rewritten away at compile time"),
    }
}

fn text_match(json_val: &Json, case_sensitive: bool, f: impl Fn(&str, &str) -> bool, needle: &str) -> bool {
    let Some(s) = json_val.as_str() else { return false };
    if case_sensitive {
        f(s, needle)
    } else {
        f(&s.to_lowercase(), &needle.to_lowercase())
    }
}

fn json_array(json_val: &Json) -> Option<&Vec<Json>> {
    json_val.as_array()
}

fn json_eq(json_val: &Json, v: &FilterValue) -> bool {
    match v {
        FilterValue::String(s) => json_val.as_str().map(|j| j == s).unwrap_or(false),
        FilterValue::Number(n) => json_val.as_f64().map(|j| (j - n).abs() < f64::EPSILON).unwrap_or(false),
        FilterValue::Bool(b) => json_val.as_bool().map(|j| j == *b).unwrap_or(false),
        FilterValue::Timestamp(t) => json_val
            .as_str()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|j| j.with_timezone(&chrono::Utc) == *t)
            .unwrap_or(false),
        FilterValue::Array(items) => json_array(json_val)
            .map(|arr| arr.len() == items.len() && arr.iter().zip(items).all(|(a, b)| json_eq(a, b)))
            .unwrap_or(false),
        FilterValue::Null => json_val.is_null(),
    }
}

fn compare(json_val: &Json, v: &FilterValue) -> Option<std::cmp::Ordering> {
    match v {
        FilterValue::Number(n) => json_val.as_f64().and_then(|j| j.partial_cmp(n)),
        FilterValue::String(s) => json_val.as_str().map(|j| j.cmp(s.as_str())),
        FilterValue::Timestamp(t) => json_val
            .as_str()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|j| j.with_timezone(&chrono::Utc).cmp(t)),
        _ => None,
    }
}
