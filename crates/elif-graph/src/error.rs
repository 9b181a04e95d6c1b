//! Error types for the entity graph
//!
//! Covers schema construction, relationship resolution, the draft/resolve
//! pipeline and provider failures.

use thiserror::Error;

/// Result type alias for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Errors that can occur while building or resolving an entity graph
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    /// Schema definition is invalid (undeclared type, malformed field, bad union)
    #[error("Schema error in {entity}.{field}: {message}")]
    Schema {
        entity: String,
        field: String,
        message: String,
    },

    /// Entity type is not declared in the schema
    #[error("Unknown entity type '{0}'")]
    UnknownEntity(String),

    /// Field is not declared on the entity
    #[error("Unknown field '{field}' on entity '{entity}'")]
    UnknownField { entity: String, field: String },

    /// Record is not in the lifecycle phase the operation requires
    #[error("Invalid phase: expected '{expected}', found '{found}'")]
    InvalidPhase { expected: String, found: String },

    /// A relationship field could not be resolved
    #[error("Failed to resolve {entity}.{field}: {message}")]
    Resolution {
        entity: String,
        field: String,
        message: String,
    },

    /// The provider does not implement an optional capability
    #[error("Unsupported provider capability: {0}")]
    Unsupported(String),

    /// Record lookup failed
    #[error("Record not found: {entity}({id})")]
    NotFound { entity: String, id: String },

    /// Storage backend failure
    #[error("Provider error: {0}")]
    Provider(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// YAML schema parsing error
    #[error("YAML error: {0}")]
    Yaml(String),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl GraphError {
    /// Create a schema error for an entity field
    pub fn schema<E: ToString, F: ToString, M: ToString>(entity: E, field: F, message: M) -> Self {
        Self::Schema {
            entity: entity.to_string(),
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a resolution error for an entity field
    pub fn resolution<E: ToString, F: ToString, M: ToString>(
        entity: E,
        field: F,
        message: M,
    ) -> Self {
        Self::Resolution {
            entity: entity.to_string(),
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a provider error
    pub fn provider<T: ToString>(msg: T) -> Self {
        Self::Provider(msg.to_string())
    }

    /// Returns true if the error reports a missing provider capability
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        GraphError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for GraphError {
    fn from(err: serde_yaml::Error) -> Self {
        GraphError::Yaml(err.to_string())
    }
}

/// Configuration loading and validation errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: '{value}', expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Configuration validation failed: {message}")]
    ValidationFailed { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_names_entity_field_and_type() {
        let err = GraphError::schema("Post", "author", "references undeclared type 'Writer'");
        let msg = err.to_string();
        assert!(msg.contains("Post.author"));
        assert!(msg.contains("Writer"));
    }

    #[test]
    fn test_config_error_is_transparent() {
        let err: GraphError = ConfigError::ValidationFailed {
            message: "threshold out of range".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Configuration validation failed: threshold out of range"
        );
    }

    #[test]
    fn test_unsupported_detection() {
        assert!(GraphError::Unsupported("semantic search".into()).is_unsupported());
        assert!(!GraphError::provider("boom").is_unsupported());
    }
}
