//! Predicate compiler: where-clause nodes → one MongoDB filter document
//!
//! And-joined clauses merge by recursive deep union, so two clauses on the
//! same field combine into one multi-operator clause instead of clobbering
//! each other. Or-joined clauses collect into a `$or` array of independently
//! compiled sub-documents. Values compared against the primary-key field are
//! coerced to `ObjectId` when they are lexically valid 24-character hex
//! strings.

use bson::{doc, oid::ObjectId, Bson, Document as BsonDocument};
use remora_common::{RemoraError, Result};

use super::clause::{Join, WhereClause, WhereKind};
use super::operator::{like_to_regex, Operator};

/// The default primary-key field name
pub const DEFAULT_ID_FIELD: &str = "_id";

/// Compiles an ordered where-clause list into a single filter document.
///
/// The first clause of a multi-clause list adopts the join tag of the second
/// clause when it is tagged `And`: the first clause has no preceding boolean,
/// so `where(a).or_where(b)` reads as `a OR b` rather than `a AND (OR b)`.
/// This tie-break is required behavior, covered by tests.
///
/// Nesting depth is not bounded; self-referential input is the caller's
/// responsibility.
pub fn compile_wheres(clauses: &[WhereClause], id_field: &str) -> Result<BsonDocument> {
    let mut filter = BsonDocument::new();

    for (i, clause) in clauses.iter().enumerate() {
        let join = if i == 0 && clauses.len() > 1 && clause.join == Join::And {
            clauses[1].join
        } else {
            clause.join
        };

        let compiled = compile_clause(&clause.kind, id_field)?;
        let positioned = match join {
            Join::And => compiled,
            Join::Or => doc! { "$or": [compiled] },
        };
        deep_union(&mut filter, positioned);
    }

    Ok(filter)
}

/// Compiles one clause node into its filter fragment.
fn compile_clause(kind: &WhereKind, id_field: &str) -> Result<BsonDocument> {
    match kind {
        WhereKind::Basic {
            column,
            operator,
            value,
        } => compile_basic(column, *operator, value, id_field),
        WhereKind::In { column, values } => {
            let values = coerce_values(column, values, id_field);
            Ok(doc! { column.as_str(): { "$in": values } })
        }
        WhereKind::NotIn { column, values } => {
            let values = coerce_values(column, values, id_field);
            Ok(doc! { column.as_str(): { "$nin": values } })
        }
        WhereKind::Null { column } => Ok(doc! { column.as_str(): Bson::Null }),
        WhereKind::NotNull { column } => Ok(doc! { column.as_str(): { "$ne": Bson::Null } }),
        WhereKind::Between {
            column,
            low,
            high,
            negated,
        } => {
            let low = coerce_value(column, low, id_field);
            let high = coerce_value(column, high, id_field);
            if *negated {
                Ok(doc! {
                    "$or": [
                        { column.as_str(): { "$lte": low } },
                        { column.as_str(): { "$gte": high } },
                    ]
                })
            } else {
                Ok(doc! { column.as_str(): { "$gte": low, "$lte": high } })
            }
        }
        WhereKind::Nested { clauses } => compile_wheres(clauses, id_field),
        WhereKind::Raw { filter } => Ok(coerce_raw(filter, id_field)),
    }
}

fn compile_basic(
    column: &str,
    operator: Operator,
    value: &Bson,
    id_field: &str,
) -> Result<BsonDocument> {
    match operator {
        Operator::Eq => {
            let value = coerce_value(column, value, id_field);
            Ok(doc! { column: value })
        }
        Operator::Like | Operator::ILike => {
            let pattern = pattern_string(column, operator, value)?;
            Ok(doc! { column: like_to_regex(&pattern, operator == Operator::ILike) })
        }
        Operator::NotLike => {
            let pattern = pattern_string(column, operator, value)?;
            Ok(doc! { column: { "$not": like_to_regex(&pattern, false) } })
        }
        Operator::Regex => Ok(doc! { column: { "$regex": as_regex(value) } }),
        Operator::NotRegex => Ok(doc! { column: { "$not": as_regex(value) } }),
        Operator::Exists => {
            let exists = value.as_bool().unwrap_or(true);
            Ok(doc! { column: { "$exists": exists } })
        }
        _ => {
            // table-driven: one symbol, one operand
            let symbol = operator.mongo_symbol().ok_or_else(|| {
                RemoraError::Query(format!("operator {} has no filter symbol", operator))
            })?;
            let operand = if operator.takes_list() {
                match value {
                    Bson::Array(items) => Bson::Array(coerce_values(column, items, id_field)),
                    other => {
                        return Err(RemoraError::Query(format!(
                            "operator {} on column {} requires an array operand, got {:?}",
                            operator, column, other
                        )))
                    }
                }
            } else {
                coerce_value(column, value, id_field)
            };
            Ok(doc! { column: { symbol: operand } })
        }
    }
}

fn pattern_string(column: &str, operator: Operator, value: &Bson) -> Result<String> {
    match value {
        Bson::String(s) => Ok(s.clone()),
        other => Err(RemoraError::Query(format!(
            "operator {} on column {} requires a string pattern, got {:?}",
            operator, column, other
        ))),
    }
}

/// `$not` rejects plain strings, so string operands become regex values here.
fn as_regex(value: &Bson) -> Bson {
    match value {
        Bson::String(s) => Bson::RegularExpression(bson::Regex {
            pattern: s.clone(),
            options: String::new(),
        }),
        other => other.clone(),
    }
}

/// Converts a primary-key comparison value into an `ObjectId` when it is a
/// lexically valid 24-character hex string; anything else passes through.
pub fn coerce_value(column: &str, value: &Bson, id_field: &str) -> Bson {
    if column != id_field {
        return value.clone();
    }
    coerce_id(value)
}

fn coerce_values(column: &str, values: &[Bson], id_field: &str) -> Vec<Bson> {
    values
        .iter()
        .map(|v| coerce_value(column, v, id_field))
        .collect()
}

/// Coerces a lexically valid 24-character hex string (or each element of an
/// array of them) into an `ObjectId`; anything else passes through.
pub fn coerce_id(value: &Bson) -> Bson {
    match value {
        Bson::String(s) if is_object_id_string(s) => match ObjectId::parse_str(s) {
            Ok(oid) => Bson::ObjectId(oid),
            Err(_) => value.clone(),
        },
        Bson::Array(items) => Bson::Array(items.iter().map(coerce_id).collect()),
        _ => value.clone(),
    }
}

/// Fixed-width hex check for the store's native identifier format
fn is_object_id_string(value: &str) -> bool {
    value.len() == 24 && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Walks a raw filter document, coercing any values compared against the
/// primary-key field, including inside `$in` / `$nin` lists and nested
/// boolean arrays.
pub fn coerce_raw(filter: &BsonDocument, id_field: &str) -> BsonDocument {
    let mut out = BsonDocument::new();
    for (key, value) in filter {
        if key == id_field {
            let coerced = match value {
                Bson::Document(operators) => {
                    let mut sub = BsonDocument::new();
                    for (op, operand) in operators {
                        sub.insert(op.clone(), coerce_id(operand));
                    }
                    Bson::Document(sub)
                }
                other => coerce_id(other),
            };
            out.insert(key.clone(), coerced);
        } else {
            let walked = match value {
                Bson::Document(sub) => Bson::Document(coerce_raw(sub, id_field)),
                Bson::Array(items) => Bson::Array(
                    items
                        .iter()
                        .map(|item| match item {
                            Bson::Document(sub) => Bson::Document(coerce_raw(sub, id_field)),
                            other => other.clone(),
                        })
                        .collect(),
                ),
                other => other.clone(),
            };
            out.insert(key.clone(), walked);
        }
    }
    out
}

/// Merges `addition` into `target` by recursive deep union.
///
/// Colliding keys combine: two operator sub-documents merge field-wise, two
/// arrays (`$or`, `$and`) concatenate, and a scalar-vs-scalar collision hoists
/// both clauses into a top-level `$and` array since a document cannot hold the
/// same key twice.
fn deep_union(target: &mut BsonDocument, addition: BsonDocument) {
    for (key, value) in addition {
        match target.remove(&key) {
            None => {
                target.insert(key, value);
            }
            Some(existing) => match (existing, value) {
                (Bson::Document(mut a), Bson::Document(b)) => {
                    deep_union(&mut a, b);
                    target.insert(key, Bson::Document(a));
                }
                (Bson::Array(mut a), Bson::Array(b)) => {
                    a.extend(b);
                    target.insert(key, Bson::Array(a));
                }
                (existing, value) => {
                    let mut hoisted = vec![
                        Bson::Document(doc! { key.clone(): existing }),
                        Bson::Document(doc! { key.clone(): value }),
                    ];
                    if let Some(Bson::Array(mut and)) = target.remove("$and") {
                        and.append(&mut hoisted);
                        target.insert("$and", Bson::Array(and));
                    } else {
                        target.insert("$and", Bson::Array(hoisted));
                    }
                }
            },
        }
    }
}
