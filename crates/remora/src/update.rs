//! Write-operation compiler: update intents → update-operator documents
//!
//! Collects `$set` / `$inc` / `$push` / `$addToSet` / `$pull` / `$pullAll` /
//! `$unset` assignments into one update document, enforcing that each field
//! appears under exactly one operator per update, and carries the execution
//! options (multi-document by default, upsert off by default).

use bson::{doc, Bson, Document as BsonDocument};
use remora_common::{RemoraError, Result};

/// Execution options for a compiled update.
///
/// `multi` defaults to true: an update affects every matched document unless
/// the caller explicitly restricts it to one.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    pub multi: bool,
    pub upsert: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            multi: true,
            upsert: false,
        }
    }
}

impl WriteOptions {
    /// Restricts the update to the first matched document
    pub fn just_one() -> Self {
        WriteOptions {
            multi: false,
            upsert: false,
        }
    }

    /// Inserts the update as a new document when nothing matches
    pub fn upsert() -> Self {
        WriteOptions {
            multi: true,
            upsert: true,
        }
    }
}

/// Accumulates update intents and compiles them into one update document.
#[derive(Debug, Clone, Default)]
pub struct UpdateSpec {
    operators: BsonDocument,
}

impl UpdateSpec {
    pub fn new() -> Self {
        UpdateSpec::default()
    }

    /// Wraps a field→value mapping in `$set`.
    ///
    /// Values that are already update-operator documents (all keys
    /// `$`-prefixed) pass through at the top level instead, so callers can mix
    /// plain assignments with explicit operators the way a raw update would.
    pub fn set(mut self, values: BsonDocument) -> Result<Self> {
        for (field, value) in values {
            if field.starts_with('$') {
                let operand = match value {
                    Bson::Document(d) => d,
                    other => {
                        return Err(RemoraError::Query(format!(
                            "update operator {} requires a document operand, got {:?}",
                            field, other
                        )))
                    }
                };
                for (inner_field, inner_value) in operand {
                    self.insert(&field, &inner_field, inner_value)?;
                }
            } else {
                self.insert("$set", &field, value)?;
            }
        }
        Ok(self)
    }

    /// Adds an `$inc` on `column`. Decrement is an increment with the sign
    /// flipped; see [`UpdateSpec::decrement`].
    ///
    /// Absent fields are treated as zero: `$inc` creates the field holding the
    /// amount, with no pre-read existence guard.
    pub fn increment(mut self, column: &str, amount: i64) -> Result<Self> {
        self.insert("$inc", column, Bson::Int64(amount))?;
        Ok(self)
    }

    pub fn decrement(self, column: &str, amount: i64) -> Result<Self> {
        self.increment(column, -amount)
    }

    /// Appends one value to an array field. With `unique`, compiles to
    /// `$addToSet` so an already-present value is not duplicated.
    pub fn push(mut self, column: &str, value: Bson, unique: bool) -> Result<Self> {
        let operator = if unique { "$addToSet" } else { "$push" };
        self.insert(operator, column, value)?;
        Ok(self)
    }

    /// Appends a batch of values via `$each` (or `$addToSet` + `$each` when
    /// uniqueness is requested).
    pub fn push_all(mut self, column: &str, values: Vec<Bson>, unique: bool) -> Result<Self> {
        let operator = if unique { "$addToSet" } else { "$push" };
        self.insert(operator, column, Bson::Document(doc! { "$each": values }))?;
        Ok(self)
    }

    /// Removes array elements equal to `value` (or matching it, when `value`
    /// is a condition document).
    pub fn pull(mut self, column: &str, value: Bson) -> Result<Self> {
        self.insert("$pull", column, value)?;
        Ok(self)
    }

    /// Removes every listed value from an array field.
    pub fn pull_all(mut self, column: &str, values: Vec<Bson>) -> Result<Self> {
        self.insert("$pullAll", column, Bson::Array(values))?;
        Ok(self)
    }

    /// Removes fields. Each column compiles to `column: 1` under `$unset`.
    pub fn unset(mut self, columns: &[&str]) -> Result<Self> {
        for column in columns {
            self.insert("$unset", column, Bson::Int32(1))?;
        }
        Ok(self)
    }

    /// Returns the compiled update-operator document.
    ///
    /// # Errors
    /// An empty update is a usage error: MongoDB rejects update documents
    /// with no operators.
    pub fn compile(self) -> Result<BsonDocument> {
        if self.operators.is_empty() {
            return Err(RemoraError::Query(
                "update contains no operations".to_string(),
            ));
        }
        Ok(self.operators)
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    fn insert(&mut self, operator: &str, field: &str, value: Bson) -> Result<()> {
        // one operator per field per update
        for (existing_op, operand) in self.operators.iter() {
            if existing_op == operator {
                continue;
            }
            if let Bson::Document(fields) = operand {
                if fields.contains_key(field) {
                    return Err(RemoraError::Query(format!(
                        "field {} already assigned under {}, cannot also use {}",
                        field, existing_op, operator
                    )));
                }
            }
        }

        match self.operators.get_mut(operator) {
            Some(Bson::Document(fields)) => {
                fields.insert(field.to_string(), value);
            }
            _ => {
                self.operators
                    .insert(operator.to_string(), doc! { field: value });
            }
        }
        Ok(())
    }
}
