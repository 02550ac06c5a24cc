//! Filter Algebra (§4.C): a tree of leaf/group nodes compiled once per
//! query into a normalized [`CompiledFilter`], then either lowered to a
//! SQL predicate or evaluated directly against an in-memory document.
//! Both paths consume the same compiled tree so they cannot drift apart.

pub mod compile;
pub mod eval;
pub mod expr;
pub mod sql;

pub use compile::{compile, CompiledFilter, FieldTypeRegistry};
pub use eval::evaluate;
pub use expr::{FieldType, FilterExpr, FilterValue, GroupOp, Op};
pub use sql::to_sql;
