//! Error types for ModGate

use serde::Serialize;
use thiserror::Error;

/// ModGate error type
///
/// Three categories, matching what callers can do about them:
/// caller-caused (`User`), absent entity (`NotFound`), and
/// collaborator failures passed through unchanged (`Internal`).
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Caller-caused: duplicate insert, bad version, unsatisfied dependencies
    #[error("{0}")]
    User(String),

    /// Tenant, module or job absent
    #[error("{0}")]
    NotFound(String),

    /// Store or proxy failure propagated unchanged
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    /// Caller-caused error
    pub fn user(msg: impl Into<String>) -> Self {
        Self::User(msg.into())
    }

    /// Absent entity error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Collaborator failure
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable error category name
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::User(_) => "USER",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Structured form surfaced to API callers
    pub fn to_wire(&self) -> ErrorBody {
        ErrorBody {
            error_type: self.error_type().to_string(),
            message: self.to_string(),
        }
    }
}

/// Wire shape of a lifecycle failure: `{type, message}`
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Error category
    #[serde(rename = "type")]
    pub error_type: String,
    /// Human-readable message
    pub message: String,
}

/// Result type for ModGate
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_types() {
        assert_eq!(GatewayError::user("x").error_type(), "USER");
        assert_eq!(GatewayError::not_found("x").error_type(), "NOT_FOUND");
        assert_eq!(GatewayError::internal("x").error_type(), "INTERNAL");
    }

    #[test]
    fn test_wire_shape() {
        let body = GatewayError::user("tenant diku already exists").to_wire();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "USER");
        assert_eq!(json["message"], "tenant diku already exists");
    }
}
