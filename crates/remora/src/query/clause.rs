//! Where-clause intermediate representation
//!
//! Fluent builder calls append [`WhereClause`] nodes; the compiler consumes
//! the list once and produces a single filter document. Nodes are never
//! mutated after compilation.

use bson::{Bson, Document as BsonDocument};

use super::operator::Operator;

/// Boolean connective joining a clause to the clauses before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Join {
    And,
    Or,
}

/// The shape of a single where-clause node.
#[derive(Debug, Clone)]
pub enum WhereKind {
    /// column <operator> value
    Basic {
        column: String,
        operator: Operator,
        value: Bson,
    },
    /// column IN (values)
    In { column: String, values: Vec<Bson> },
    /// column NOT IN (values)
    NotIn { column: String, values: Vec<Bson> },
    /// column IS NULL
    Null { column: String },
    /// column IS NOT NULL
    NotNull { column: String },
    /// column BETWEEN low AND high (negatable)
    Between {
        column: String,
        low: Bson,
        high: Bson,
        negated: bool,
    },
    /// A grouped sub-list, compiled recursively and spliced at this position
    Nested { clauses: Vec<WhereClause> },
    /// A raw filter document passed through untouched (id fields still coerced)
    Raw { filter: BsonDocument },
}

/// One node in the ordered where-clause list.
#[derive(Debug, Clone)]
pub struct WhereClause {
    pub kind: WhereKind,
    pub join: Join,
}

impl WhereClause {
    pub fn new(kind: WhereKind, join: Join) -> Self {
        WhereClause { kind, join }
    }

    /// Convenience constructor for an and-joined basic clause
    pub fn basic(column: impl Into<String>, operator: Operator, value: impl Into<Bson>) -> Self {
        WhereClause::new(
            WhereKind::Basic {
                column: column.into(),
                operator,
                value: value.into(),
            },
            Join::And,
        )
    }

    /// Returns the same clause tagged with an or-join
    pub fn or(mut self) -> Self {
        self.join = Join::Or;
        self
    }
}
