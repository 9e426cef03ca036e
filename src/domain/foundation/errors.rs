//! Error types for the domain layer.

use thiserror::Error;

/// Rejected identifiers, routing keys, channel bindings and state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    EmptyField { field: String },

    #[error("{field} is invalid: {reason}")]
    InvalidFormat { field: String, reason: String },
}

impl ValidationError {
    pub fn empty_field(field: impl Into<String>) -> Self {
        ValidationError::EmptyField { field: field.into() }
    }

    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Name of the offending field.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::EmptyField { field } | ValidationError::InvalidFormat { field, .. } => {
                field
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_field_names_the_field() {
        let err = ValidationError::empty_field("user_id");
        assert_eq!(err.to_string(), "user_id must not be empty");
        assert_eq!(err.field(), "user_id");
    }

    #[test]
    fn invalid_format_carries_reason() {
        let err = ValidationError::invalid_format("routing_key", "empty segment");
        assert_eq!(err.to_string(), "routing_key is invalid: empty segment");
        assert_eq!(err.field(), "routing_key");
    }
}
