use rusqlite::types::Value as SqlValue;

use super::compile::CompiledFilter;
use super::expr::{FilterExpr, FilterValue, GroupOp, Op};

/// Lowers a compiled filter into a parameterized SQLite `WHERE` fragment
/// plus bound values, per §4.C ("a parameterized WHERE clause with bound
/// values"). Every leaf field is resolved via `json_extract` against the
/// `fields` column, matching [`crate::filter::eval::evaluate`] exactly —
/// that function only ever sees a record's `fields` document, never the
/// store's other columns, so the SQL side must reach into the same place
/// or the two paths could disagree on which rows match.
pub fn to_sql(filter: &CompiledFilter) -> (String, Vec<SqlValue>) {
    let mut params = Vec::new();
    let clause = render(&filter.0, &mut params);
    (clause, params)
}

fn column_ref(field: &str) -> String {
    let path = field.replace('\'', "''");
    format!("json_extract(fields, '$.{path}')")
}

fn render(expr: &FilterExpr, params: &mut Vec<SqlValue>) -> String {
    match expr {
        FilterExpr::Leaf { field, op } => render_leaf(field, op, params),
        FilterExpr::Group { op: GroupOp::And, children } => join_children(children, "AND", params),
        FilterExpr::Group { op: GroupOp::Or, children } => join_children(children, "OR", params),
        FilterExpr::Group { op: GroupOp::Not, children } => {
            format!("NOT ({})", render(&children[0], params))
        }
    }
}

fn join_children(children: &[FilterExpr], glue: &str, params: &mut Vec<SqlValue>) -> String {
    if children.is_empty() {
        return "1".to_string();
    }
    let parts: Vec<String> = children.iter().map(|c| format!("({})", render(c, params))).collect();
    parts.join(&format!(" {glue} "))
}

fn bind(v: &FilterValue, params: &mut Vec<SqlValue>) -> String {
    params.push(to_sql_value(v));
    "?".to_string()
}

fn to_sql_value(v: &FilterValue) -> SqlValue {
    match v {
        FilterValue::String(s) => SqlValue::Text(s.clone()),
        FilterValue::Number(n) => SqlValue::Real(*n),
        FilterValue::Bool(b) => SqlValue::Integer(if *b { 1 } else { 0 }),
        FilterValue::Timestamp(t) => SqlValue::Text(t.to_rfc3339()),
        FilterValue::Array(_) => SqlValue::Null,
        FilterValue::Null => SqlValue::Null,
    }
}

fn render_leaf(field: &str, op: &Op, params: &mut Vec<SqlValue>) -> String {
    let col = column_ref(field);
    match op {
        Op::Eq(v) => format!("{col} = {}", bind(v, params)),
        Op::Neq(v) => format!("{col} != {}", bind(v, params)),
        Op::Lt(v) => format!("{col} < {}", bind(v, params)),
        Op::Lte(v) => format!("{col} <= {}", bind(v, params)),
        Op::Gt(v) => format!("{col} > {}", bind(v, params)),
        Op::Gte(v) => format!("{col} >= {}", bind(v, params)),
        Op::Between(lo, hi) => format!("{col} BETWEEN {} AND {}", bind(lo, params), bind(hi, params)),
        Op::In(vs) => membership_clause(&col, vs, params, false),
        Op::NotIn(vs) => membership_clause(&col, vs, params, true),
        // Set operators are pushed down as a substring match over the
        // JSON-array-serialized column; the in-memory evaluator is the
        // source of truth and the store predicate is a pre-filter only.
        Op::AnyOf(vs) => any_of_clause(&col, vs, params),
        Op::AllOf(vs) => all_of_clause(&col, vs, params),
        Op::NoneOf(vs) => format!("NOT ({})", any_of_clause(&col, vs, params)),
        Op::Contains { needle, case_sensitive } => like_clause(&col, needle, *case_sensitive, "%{}%"),
        Op::StartsWith { prefix, case_sensitive } => like_clause(&col, prefix, *case_sensitive, "{}%"),
        Op::EndsWith { suffix, case_sensitive } => like_clause(&col, suffix, *case_sensitive, "%{}"),
        Op::Regex { pattern, .. } => format!("{col} REGEXP '{}'", pattern.replace('\'', "''")),
        Op::IsNull => format!("{col} IS NULL"),
        Op::IsNotNull => format!("{col} IS NOT NULL"),
        Op::TimeWindow(_) => unreachable!("rewritten away before SQL lowering"),
    }
}

fn membership_clause(col: &str, vs: &[FilterValue], params: &mut Vec<SqlValue>, negate: bool) -> String {
    if vs.is_empty() {
        return if negate { "1".to_string() } else { "0".to_string() };
    }
    let placeholders: Vec<String> = vs.iter().map(|v| bind(v, params)).collect();
    let op = if negate { "NOT IN" } else { "IN" };
    format!("{col} {op} ({})", placeholders.join(", "))
}

fn any_of_clause(col: &str, vs: &[FilterValue], params: &mut Vec<SqlValue>) -> String {
    join_like_any(col, vs, params)
}

fn all_of_clause(col: &str, vs: &[FilterValue], params: &mut Vec<SqlValue>) -> String {
    let parts: Vec<String> = vs
        .iter()
        .map(|v| {
            let needle = literal_string(v);
            params.push(SqlValue::Text(format!("%{needle}%")));
            format!("{col} LIKE ?")
        })
        .collect();
    if parts.is_empty() {
        "1".to_string()
    } else {
        parts.join(" AND ")
    }
}

fn join_like_any(col: &str, vs: &[FilterValue], params: &mut Vec<SqlValue>) -> String {
    let parts: Vec<String> = vs
        .iter()
        .map(|v| {
            let needle = literal_string(v);
            params.push(SqlValue::Text(format!("%{needle}%")));
            format!("{col} LIKE ?")
        })
        .collect();
    if parts.is_empty() {
        "0".to_string()
    } else {
        format!("({})", parts.join(" OR "))
    }
}

fn literal_string(v: &FilterValue) -> String {
    match v {
        FilterValue::String(s) => s.clone(),
        FilterValue::Number(n) => n.to_string(),
        FilterValue::Bool(b) => b.to_string(),
        FilterValue::Timestamp(t) => t.to_rfc3339(),
        FilterValue::Array(_) | FilterValue::Null => String::new(),
    }
}

fn like_clause(col: &str, needle: &str, case_sensitive: bool, template: &str) -> String {
    let pattern = template.replace("{}", &needle.replace('%', "\\%").replace('_', "\\_"));
    if case_sensitive {
        format!("{col} LIKE '{pattern}' ESCAPE '\\'")
    } else {
        format!("LOWER({col}) LIKE LOWER('{pattern}') ESCAPE '\\'")
    }
}
