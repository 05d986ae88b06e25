//! Input validation for collection names, field names, and raw filters
//!
//! Filters compiled by the query builder are constructed from typed parts and
//! need no screening; raw documents supplied by callers do. Validation blocks
//! server-side JavaScript operators and reserved names before anything reaches
//! the wire.

use bson::Bson;
use remora_common::{RemoraError, Result};
use tracing::warn;

/// MongoDB's own limit is 255 bytes including the namespace prefix
const MAX_COLLECTION_NAME_LENGTH: usize = 120;

const MAX_FIELD_NAME_LENGTH: usize = 1024;

/// Operators that execute server-side JavaScript
const DANGEROUS_OPERATORS: &[&str] = &["$where", "$function", "$accumulator"];

/// A collection name that passed validation.
///
/// Rejects empty names, names over 120 characters, null bytes, the
/// `system.` prefix, and `$` characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCollectionName {
    name: String,
}

impl ValidatedCollectionName {
    /// # Errors
    /// Returns [`RemoraError::Validation`] naming the violated rule.
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(RemoraError::Validation(
                "collection name cannot be empty".to_string(),
            ));
        }
        if name.len() > MAX_COLLECTION_NAME_LENGTH {
            return Err(RemoraError::Validation(format!(
                "collection name exceeds maximum length of {} characters: '{}'",
                MAX_COLLECTION_NAME_LENGTH, name
            )));
        }
        if name.contains('\0') {
            return Err(RemoraError::Validation(
                "collection name cannot contain null bytes".to_string(),
            ));
        }
        if name.starts_with("system.") {
            return Err(RemoraError::Validation(format!(
                "collection name cannot start with 'system.' (reserved): '{}'",
                name
            )));
        }
        if name.contains('$') {
            return Err(RemoraError::Validation(format!(
                "collection name cannot contain '$': '{}'",
                name
            )));
        }
        if name.contains("..") || name.contains("//") {
            warn!(collection = name, "collection name contains suspicious pattern");
        }

        Ok(ValidatedCollectionName {
            name: name.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn into_string(self) -> String {
        self.name
    }
}

impl AsRef<str> for ValidatedCollectionName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ValidatedCollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A field name that passed validation.
///
/// `$`-prefixed names are rejected unless the caller explicitly allows
/// operators, as in raw update documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFieldName {
    name: String,
}

impl ValidatedFieldName {
    /// # Arguments
    /// * `name` - The field name to validate
    /// * `allow_operators` - Permit a `$` prefix for update operators
    ///
    /// # Errors
    /// Returns [`RemoraError::Validation`] naming the violated rule.
    pub fn new(name: &str, allow_operators: bool) -> Result<Self> {
        if name.is_empty() {
            return Err(RemoraError::Validation(
                "field name cannot be empty".to_string(),
            ));
        }
        if name.len() > MAX_FIELD_NAME_LENGTH {
            return Err(RemoraError::Validation(format!(
                "field name exceeds maximum length of {} characters",
                MAX_FIELD_NAME_LENGTH
            )));
        }
        if name.contains('\0') {
            return Err(RemoraError::Validation(
                "field name cannot contain null bytes".to_string(),
            ));
        }
        if name.starts_with('$') {
            if !allow_operators {
                return Err(RemoraError::Validation(format!(
                    "field name cannot start with '$' (reserved for operators): '{}'",
                    name
                )));
            }
            if DANGEROUS_OPERATORS.contains(&name) {
                return Err(RemoraError::Validation(format!(
                    "operator '{}' is not allowed",
                    name
                )));
            }
        }

        Ok(ValidatedFieldName {
            name: name.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn into_string(self) -> String {
        self.name
    }
}

impl AsRef<str> for ValidatedFieldName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ValidatedFieldName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Screens a caller-supplied filter or update for JavaScript-executing
/// operators, recursing through sub-documents and arrays.
///
/// # Errors
/// Returns [`RemoraError::Validation`] on the first dangerous operator found.
pub fn screen_raw(value: &Bson) -> Result<()> {
    match value {
        Bson::Document(doc) => {
            for (key, inner) in doc.iter() {
                if DANGEROUS_OPERATORS.contains(&key.as_str()) {
                    return Err(RemoraError::Validation(format!(
                        "operator '{}' is not allowed in raw documents",
                        key
                    )));
                }
                screen_raw(inner)?;
            }
            Ok(())
        }
        Bson::Array(items) => {
            for item in items {
                screen_raw(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
