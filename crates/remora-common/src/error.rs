//! Error types for remora

use thiserror::Error;

/// Result type alias for remora operations
pub type Result<T> = std::result::Result<T, RemoraError>;

/// Unified error type for all remora operations
#[derive(Error, Debug, Clone)]
pub enum RemoraError {
    #[error("MongoDB error: {0}")]
    MongoDB(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Relation error: {0}")]
    Relation(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RemoraError {
    /// Returns true if this error was raised locally, before any store call
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            RemoraError::Query(_) | RemoraError::Validation(_) | RemoraError::Relation(_)
        )
    }
}

impl From<serde_json::Error> for RemoraError {
    fn from(err: serde_json::Error) -> Self {
        RemoraError::Serialization(err.to_string())
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for RemoraError {
    fn from(err: mongodb::error::Error) -> Self {
        RemoraError::MongoDB(err.to_string())
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for RemoraError {
    fn from(err: bson::ser::Error) -> Self {
        RemoraError::Serialization(format!("BSON serialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for RemoraError {
    fn from(err: bson::de::Error) -> Self {
        RemoraError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::oid::Error> for RemoraError {
    fn from(err: bson::oid::Error) -> Self {
        RemoraError::Validation(format!("ObjectId error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_mongodb() {
        let err = RemoraError::MongoDB("connection refused".to_string());
        assert_eq!(err.to_string(), "MongoDB error: connection refused");
    }

    #[test]
    fn test_error_display_query() {
        let err = RemoraError::Query("unknown operator: ~=".to_string());
        assert_eq!(err.to_string(), "Query error: unknown operator: ~=");
    }

    #[test]
    fn test_error_display_validation() {
        let err = RemoraError::Validation("field required".to_string());
        assert_eq!(err.to_string(), "Validation error: field required");
    }

    #[test]
    fn test_error_display_relation() {
        let err = RemoraError::Relation("duplicate embedded id".to_string());
        assert_eq!(err.to_string(), "Relation error: duplicate embedded id");
    }

    #[test]
    fn test_error_display_lock() {
        let err = RemoraError::Lock("missing owner".to_string());
        assert_eq!(err.to_string(), "Lock error: missing owner");
    }

    #[test]
    fn test_is_usage_error() {
        assert!(RemoraError::Query("test".to_string()).is_usage_error());
        assert!(RemoraError::Validation("test".to_string()).is_usage_error());
        assert!(RemoraError::Relation("test".to_string()).is_usage_error());
        assert!(!RemoraError::MongoDB("test".to_string()).is_usage_error());
        assert!(!RemoraError::Connection("test".to_string()).is_usage_error());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: RemoraError = json_err.into();
        assert!(matches!(err, RemoraError::Serialization(_)));
    }

    #[test]
    fn test_result_type_err() {
        let result: Result<i32> = Err(RemoraError::Query("failed".to_string()));
        assert!(result.is_err());
    }
}
