//! API error responses.
//!
//! Wraps the domain error taxonomy into stable JSON error bodies with
//! request tracking. The aggregator callback never uses these; it has its own
//! envelope contract.

use crate::errors::CashdeskError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level API error response with request tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable error code (NOT_FOUND, INSUFFICIENT_FUNDS, ...).
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    NotFound(String),
    BadRequest(String),
    /// Balance below the requested debit; a client error, not a fault.
    InsufficientFunds(String),
    /// Optimistic-lock conflict that survived the internal retries.
    Conflict(String),
    Unauthorized(String),
    InternalError(String),
}

impl ApiError {
    pub fn not_found(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::NotFound(message.into()),
            request_id: request_id.into(),
        }
    }

    pub fn bad_request(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::BadRequest(message.into()),
            request_id: request_id.into(),
        }
    }

    pub fn unauthorized(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Unauthorized(message.into()),
            request_id: request_id.into(),
        }
    }

    pub fn internal_error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::InternalError(message.into()),
            request_id: request_id.into(),
        }
    }

    /// Map a domain error onto the HTTP taxonomy.
    pub fn from_domain(request_id: impl Into<String>, err: CashdeskError) -> Self {
        let kind = match &err {
            CashdeskError::NotFound { .. } => ApiErrorKind::NotFound(err.to_string()),
            CashdeskError::Validation(_) => ApiErrorKind::BadRequest(err.to_string()),
            CashdeskError::InsufficientFunds { .. } => {
                ApiErrorKind::InsufficientFunds(err.to_string())
            }
            CashdeskError::Conflict { .. } => ApiErrorKind::Conflict(err.to_string()),
            // Infrastructure details stay out of client responses.
            _ => ApiErrorKind::InternalError("internal error".to_string()),
        };
        if matches!(kind, ApiErrorKind::InternalError(_)) {
            tracing::error!(error = %err, "Internal error surfaced to API");
        }
        Self {
            kind,
            request_id: request_id.into(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ApiErrorKind::NotFound(msg) => write!(f, "[{}] Not Found: {}", self.request_id, msg),
            ApiErrorKind::BadRequest(msg) => {
                write!(f, "[{}] Bad Request: {}", self.request_id, msg)
            }
            ApiErrorKind::InsufficientFunds(msg) => {
                write!(f, "[{}] Insufficient Funds: {}", self.request_id, msg)
            }
            ApiErrorKind::Conflict(msg) => write!(f, "[{}] Conflict: {}", self.request_id, msg),
            ApiErrorKind::Unauthorized(msg) => {
                write!(f, "[{}] Unauthorized: {}", self.request_id, msg)
            }
            ApiErrorKind::InternalError(msg) => {
                write!(f, "[{}] Internal Error: {}", self.request_id, msg)
            }
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self.kind {
            ApiErrorKind::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiErrorKind::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiErrorKind::InsufficientFunds(msg) => (
                StatusCode::PAYMENT_REQUIRED,
                "INSUFFICIENT_FUNDS",
                msg.clone(),
            ),
            ApiErrorKind::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            ApiErrorKind::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
            }
            ApiErrorKind::InternalError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        let body = Json(ErrorResponse {
            request_id: self.request_id.clone(),
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::Currency;
    use rust_decimal_macros::dec;

    #[test]
    fn test_domain_mapping_covers_client_errors() {
        let err = ApiError::from_domain(
            "req-1",
            CashdeskError::InsufficientFunds {
                currency: Currency::USD,
                balance: dec!(1),
                requested: dec!(5),
            },
        );
        assert!(matches!(err.kind, ApiErrorKind::InsufficientFunds(_)));

        let err = ApiError::from_domain("req-2", CashdeskError::not_found("wallet", "u1"));
        assert!(matches!(err.kind, ApiErrorKind::NotFound(_)));

        let err = ApiError::from_domain("req-3", CashdeskError::conflict("wallet", "u1"));
        assert!(matches!(err.kind, ApiErrorKind::Conflict(_)));
    }

    #[test]
    fn test_infrastructure_details_are_not_leaked() {
        let err = ApiError::from_domain(
            "req-4",
            CashdeskError::Serialization("secret internals".to_string()),
        );
        match err.kind {
            ApiErrorKind::InternalError(msg) => assert_eq!(msg, "internal error"),
            other => panic!("unexpected kind: {:?}", other),
        }
    }
}
