use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;

use crate::error::{MemoryError, Result};

use super::expr::{FieldType, FilterExpr, FilterValue, GroupOp, Op};

/// Declares the known scalar type per field path, and which fields carry
/// an index (used to bound unindexed regex width). Paths under
/// `metadata.*` are intentionally left undeclared: their values are
/// duck-typed per §9 and skip compile-time type checking.
#[derive(Debug, Clone, Default)]
pub struct FieldTypeRegistry {
    types: HashMap<String, FieldType>,
    indexed: HashSet<String>,
}

impl FieldTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(mut self, field: impl Into<String>, ty: FieldType, indexed: bool) -> Self {
        let field = field.into();
        if indexed {
            self.indexed.insert(field.clone());
        }
        self.types.insert(field, ty);
        self
    }

    fn type_of(&self, field: &str) -> Option<FieldType> {
        if field.starts_with("metadata.") {
            return None;
        }
        self.types.get(field).copied()
    }

    fn is_indexed(&self, field: &str) -> bool {
        self.indexed.contains(field)
    }
}

/// A filter tree that has passed normalization and type-checking.
/// Both the store-side predicate compiler and the in-memory evaluator
/// read this same tree, which is what guarantees they agree.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CompiledFilter(pub(crate) FilterExpr);

const MAX_UNINDEXED_REGEX_LEN: usize = 64;

pub fn compile(expr: FilterExpr, registry: &FieldTypeRegistry) -> Result<CompiledFilter> {
    let rewritten = rewrite(expr)?;
    let normalized = normalize(rewritten);
    type_check(&normalized, registry)?;
    Ok(CompiledFilter(normalized))
}

/// Rewrites `Between` and `TimeWindow` sugar away (steps 2-3 of §4.C).
fn rewrite(expr: FilterExpr) -> Result<FilterExpr> {
    match expr {
        FilterExpr::Leaf { field, op } => match op {
            Op::Between(lo, hi) => Ok(FilterExpr::Group {
                op: GroupOp::And,
                children: vec![
                    FilterExpr::Leaf { field: field.clone(), op: Op::Gte(lo) },
                    FilterExpr::Leaf { field, op: Op::Lte(hi) },
                ],
            }),
            Op::TimeWindow(duration) => {
                let cutoff = Utc::now() - to_chrono_duration(duration);
                Ok(FilterExpr::Leaf { field, op: Op::Gte(FilterValue::Timestamp(cutoff)) })
            }
            other => Ok(FilterExpr::Leaf { field, op: other }),
        },
        FilterExpr::Group { op, children } => {
            let children = children.into_iter().map(rewrite).collect::<Result<Vec<_>>>()?;
            Ok(FilterExpr::Group { op, children })
        }
    }
}

fn to_chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}

/// Collapses single-child groups and flattens nested same-operator groups (step 1).
fn normalize(expr: FilterExpr) -> FilterExpr {
    match expr {
        FilterExpr::Leaf { .. } => expr,
        FilterExpr::Group { op, children } => {
            let mut flattened = Vec::with_capacity(children.len());
            for child in children {
                let child = normalize(child);
                match &child {
                    FilterExpr::Group { op: child_op, children: grandchildren } if *child_op == op && op != GroupOp::Not => {
                        flattened.extend(grandchildren.clone());
                    }
                    _ => flattened.push(child),
                }
            }
            if flattened.len() == 1 && op != GroupOp::Not {
                flattened.into_iter().next().unwrap()
            } else {
                FilterExpr::Group { op, children: flattened }
            }
        }
    }
}

fn type_check(expr: &FilterExpr, registry: &FieldTypeRegistry) -> Result<()> {
    match expr {
        FilterExpr::Leaf { field, op } => {
            check_regex_width(field, op, registry)?;
            let Some(declared) = registry.type_of(field) else { return Ok(()) };
            for value in op_values(op) {
                if !value.matches_type(declared) && !matches!(value, FilterValue::Null) {
                    return Err(MemoryError::FilterTypeError(format!(
                        "field '{field}' expects {declared:?}, got value of a different type"
                    )));
                }
            }
            Ok(())
        }
        FilterExpr::Group { children, .. } => {
            for child in children {
                type_check(child, registry)?;
            }
            Ok(())
        }
    }
}

fn check_regex_width(field: &str, op: &Op, registry: &FieldTypeRegistry) -> Result<()> {
    if let Op::Regex { pattern, .. } = op {
        if !registry.is_indexed(field) && pattern.len() > MAX_UNINDEXED_REGEX_LEN {
            return Err(MemoryError::FilterTypeError(format!(
                "regex on unindexed field '{field}' exceeds the unbounded-width limit"
            )));
        }
    }
    Ok(())
}

fn op_values(op: &Op) -> Vec<&FilterValue> {
    match op {
        Op::Eq(v) | Op::Neq(v) | Op::Lt(v) | Op::Lte(v) | Op::Gt(v) | Op::Gte(v) => vec![v],
        Op::Between(a, b) => vec![a, b],
        Op::In(vs) | Op::NotIn(vs) | Op::AnyOf(vs) | Op::AllOf(vs) | Op::NoneOf(vs) => vs.iter().collect(),
        Op::Contains { .. }
        | Op::StartsWith { .. }
        | Op::EndsWith { .. }
        | Op::Regex { .. }
        | Op::IsNull
        | Op::IsNotNull
        | Op::TimeWindow(_) => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> FieldTypeRegistry {
        FieldTypeRegistry::new()
            .declare("category", FieldType::String, true)
            .declare("importance", FieldType::Number, true)
            .declare("tags", FieldType::Array, true)
            .declare("created_at", FieldType::Timestamp, true)
    }

    #[test]
    fn between_is_rewritten_to_gte_and_lte() {
        let expr = FilterExpr::leaf("importance", Op::Between(FilterValue::Number(0.2), FilterValue::Number(0.8)));
        let compiled = compile(expr, &registry()).unwrap();
        match compiled.0 {
            FilterExpr::Group { op: GroupOp::And, children } => assert_eq!(children.len(), 2),
            other => panic!("expected AND group, got {other:?}"),
        }
    }

    #[test]
    fn single_child_and_collapses() {
        let expr = FilterExpr::and(vec![FilterExpr::leaf("category", Op::Eq(FilterValue::String("knowledge".into())))]);
        let compiled = compile(expr, &registry()).unwrap();
        assert!(matches!(compiled.0, FilterExpr::Leaf { .. }));
    }

    #[test]
    fn nested_same_op_group_flattens() {
        let inner = FilterExpr::and(vec![
            FilterExpr::leaf("category", Op::Eq(FilterValue::String("knowledge".into()))),
            FilterExpr::leaf("importance", Op::Gt(FilterValue::Number(0.5))),
        ]);
        let outer = FilterExpr::and(vec![inner, FilterExpr::leaf("created_at", Op::IsNotNull)]);
        let compiled = compile(outer, &registry()).unwrap();
        match compiled.0 {
            FilterExpr::Group { op: GroupOp::And, children } => assert_eq!(children.len(), 3),
            other => panic!("expected flattened AND of 3, got {other:?}"),
        }
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let expr = FilterExpr::leaf("importance", Op::Eq(FilterValue::String("high".into())));
        assert!(matches!(compile(expr, &registry()), Err(MemoryError::FilterTypeError(_))));
    }

    #[test]
    fn metadata_paths_skip_type_check() {
        let expr = FilterExpr::leaf("metadata.project.status", Op::Eq(FilterValue::String("active".into())));
        assert!(compile(expr, &registry()).is_ok());
    }

    #[test]
    fn unbounded_regex_on_unindexed_field_is_rejected() {
        let registry = FieldTypeRegistry::new();
        let pattern = "a".repeat(100);
        let expr = FilterExpr::leaf("content", Op::Regex { pattern, case_sensitive: false });
        assert!(matches!(compile(expr, &registry), Err(MemoryError::FilterTypeError(_))));
    }

    #[test]
    fn time_window_rewrites_to_gte_timestamp() {
        let expr = FilterExpr::leaf("created_at", Op::TimeWindow(Duration::from_secs(7 * 86400)));
        let compiled = compile(expr, &registry()).unwrap();
        assert!(matches!(compiled.0, FilterExpr::Leaf { op: Op::Gte(FilterValue::Timestamp(_)), .. }));
    }
}
