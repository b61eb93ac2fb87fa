//! Error types for schema import and export

use thiserror::Error;

/// Result type for import operations
pub type Result<T> = std::result::Result<T, ImportError>;

/// Batch-fatal import errors.
///
/// Per-schema problems that still allow the schema to be committed are not
/// errors; they are reported as [`crate::schema::SchemaIssue`] values.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Cannot load schema {message_id}")]
    SchemaLoad { message_id: String },

    #[error("There is circular dependency in schema: {iri}")]
    CircularDependency { iri: String },

    #[error("Schema identifier already exist")]
    IdentifierExists { iri: String },

    #[error("Message log error: {0}")]
    MessageLog(String),

    #[error("Document store error: {0}")]
    Store(String),

    #[error("Cannot resolve account: {0}")]
    Account(String),

    #[error("Invalid schema format: {0}")]
    InvalidFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_match_caller_contract() {
        let err = ImportError::IdentifierExists { iri: "#u1".into() };
        assert_eq!(err.to_string(), "Schema identifier already exist");

        let err = ImportError::CircularDependency { iri: "#a".into() };
        assert_eq!(err.to_string(), "There is circular dependency in schema: #a");

        let err = ImportError::SchemaLoad { message_id: "1.2".into() };
        assert_eq!(err.to_string(), "Cannot load schema 1.2");
    }

    #[test]
    fn test_io_and_json_errors_convert() {
        let err: ImportError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, ImportError::Io(_)));
        let err: ImportError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(err.to_string().starts_with("JSON error: "));
    }
}
