//! Query construction: operator table, clause IR, compiler, and fluent façade

pub mod builder;
pub mod clause;
pub mod compiler;
pub mod operator;

pub use builder::{QueryBuilder, SortDirection, WhereGroup};
pub use clause::{Join, WhereClause, WhereKind};
pub use compiler::{compile_wheres, DEFAULT_ID_FIELD};
pub use operator::{like_to_regex, Operator};
