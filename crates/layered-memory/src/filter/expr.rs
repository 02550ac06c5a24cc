use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterValue {
    String(String),
    Number(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Array(Vec<FilterValue>),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Number,
    Bool,
    Timestamp,
    Array,
}

impl FilterValue {
    pub fn matches_type(&self, ty: FieldType) -> bool {
        matches!(
            (self, ty),
            (FilterValue::String(_), FieldType::String)
                | (FilterValue::Number(_), FieldType::Number)
                | (FilterValue::Bool(_), FieldType::Bool)
                | (FilterValue::Timestamp(_), FieldType::Timestamp)
                | (FilterValue::Array(_), FieldType::Array)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    Eq(FilterValue),
    Neq(FilterValue),
    Lt(FilterValue),
    Lte(FilterValue),
    Gt(FilterValue),
    Gte(FilterValue),
    Between(FilterValue, FilterValue),
    In(Vec<FilterValue>),
    NotIn(Vec<FilterValue>),
    AnyOf(Vec<FilterValue>),
    AllOf(Vec<FilterValue>),
    NoneOf(Vec<FilterValue>),
    Contains { needle: String, case_sensitive: bool },
    StartsWith { prefix: String, case_sensitive: bool },
    EndsWith { suffix: String, case_sensitive: bool },
    Regex { pattern: String, case_sensitive: bool },
    IsNull,
    IsNotNull,
    /// Sugar, rewritten at compile time into `Gte(now() - duration)`.
    TimeWindow(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupOp {
    And,
    Or,
    Not,
}

/// A filter tree value (§4.C). Ephemeral, never persisted directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterExpr {
    Leaf { field: String, op: Op },
    Group { op: GroupOp, children: Vec<FilterExpr> },
}

impl FilterExpr {
    pub fn leaf(field: impl Into<String>, op: Op) -> Self {
        FilterExpr::Leaf { field: field.into(), op }
    }

    pub fn and(children: Vec<FilterExpr>) -> Self {
        FilterExpr::Group { op: GroupOp::And, children }
    }

    pub fn or(children: Vec<FilterExpr>) -> Self {
        FilterExpr::Group { op: GroupOp::Or, children }
    }

    pub fn not(child: FilterExpr) -> Self {
        FilterExpr::Group { op: GroupOp::Not, children: vec![child] }
    }

    /// `field.path` -> `["field", "path"]`, per the dot-notation field path rule.
    pub fn split_path(field: &str) -> Vec<&str> {
        field.split('.').collect()
    }
}
