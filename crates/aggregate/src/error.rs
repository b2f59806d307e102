//! Error types for the aggregate persistence layer
//!
//! Registration-time schema problems are reported through [`SchemaError`];
//! everything that can go wrong while a request runs is a [`ModelError`].

use std::fmt;

/// Result type alias for graph operations
pub type ModelResult<T> = Result<T, ModelError>;

/// ORM error type alias
pub type OrmError = ModelError;

/// ORM result type alias
pub type OrmResult<T> = ModelResult<T>;

/// Error types for graph operations
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Store failure (constraint violation, connection loss, timeout)
    Database(String),
    /// Referenced row does not exist
    NotFound(String),
    /// An entity had no identity where one was required
    Identity(String),
    /// Relationship schema was missing or inconsistent at request time
    Schema(String),
    /// Row could not be converted to or from an entity
    Serialization(String),
    /// Configuration error
    Configuration(String),
}

impl ModelError {
    /// True for failures reported by the store itself
    pub fn is_store_error(&self) -> bool {
        matches!(self, ModelError::Database(_))
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Database(msg) => write!(f, "Database error: {}", msg),
            ModelError::NotFound(what) => write!(f, "Record not found: {}", what),
            ModelError::Identity(msg) => write!(f, "Identity error: {}", msg),
            ModelError::Schema(msg) => write!(f, "Schema error: {}", msg),
            ModelError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ModelError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ModelError {}

// Convert from sqlx errors
impl From<sqlx::Error> for ModelError {
    fn from(err: sqlx::Error) -> Self {
        ModelError::Database(err.to_string())
    }
}

// Convert from serde_json errors
impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

/// Relationship schema registration errors.
///
/// These are developer errors: a process that gets one back from
/// [`SchemaBuilder::build`](crate::schema::SchemaBuilder::build) should refuse to start.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("Entity type '{0}' is registered more than once")]
    DuplicateEntity(String),

    #[error("Field '{entity}.{field}' holds an entity but carries no relationship declaration")]
    MissingDeclaration { entity: String, field: String },

    #[error("Field '{entity}.{field}' is declared twice")]
    DuplicateDeclaration { entity: String, field: String },

    #[error("Field '{entity}.{field}' is declared but is not a nested entity field")]
    UnknownField { entity: String, field: String },

    #[error("Field '{entity}.{field}' targets unregistered entity type '{target}'")]
    UnknownTarget { entity: String, field: String, target: String },

    #[error("Many-to-many field '{entity}.{field}' has no link table name")]
    MissingLinkTable { entity: String, field: String },

    #[error("Field '{entity}.{field}' needs a foreign key column on the target table")]
    MissingForeignKey { entity: String, field: String },

    #[error("Link table '{table}' for '{entity}.{field}' resolves both sides to column '{column}'")]
    AmbiguousLinkColumns { entity: String, field: String, table: String, column: String },

    #[error("Field '{entity}.{field}': {reason}")]
    InvalidShape { entity: String, field: String, reason: String },

    #[error("Relationship schema is already installed")]
    AlreadyInstalled,
}

impl From<SchemaError> for ModelError {
    fn from(err: SchemaError) -> Self {
        ModelError::Schema(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            ModelError::NotFound("walkers 42".to_string()).to_string(),
            "Record not found: walkers 42"
        );
        assert_eq!(
            ModelError::Database("connection reset".to_string()).to_string(),
            "Database error: connection reset"
        );
    }

    #[test]
    fn test_schema_error_conversion() {
        let err: ModelError = SchemaError::MissingLinkTable {
            entity: "Owner".to_string(),
            field: "clubs".to_string(),
        }
        .into();

        match err {
            ModelError::Schema(msg) => assert!(msg.contains("Owner.clubs")),
            other => panic!("Expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_store_error_detection() {
        assert!(ModelError::Database("boom".to_string()).is_store_error());
        assert!(!ModelError::Identity("no id".to_string()).is_store_error());
    }
}
