//! Error types shared across the settlement system.

use crate::currency::Currency;
use rust_decimal::Decimal;
use thiserror::Error;

/// Root error type for all cashdesk operations.
#[derive(Debug, Error)]
pub enum CashdeskError {
    /// Malformed input, rejected before any mutation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Balance below the requested debit. An expected business outcome,
    /// not a system fault; the gateway answers it as a rejected bet.
    #[error("Insufficient funds: balance {balance} {currency}, requested {requested}")]
    InsufficientFunds {
        currency: Currency,
        balance: Decimal,
        requested: Decimal,
    },

    /// Optimistic version mismatch; the caller retries from a fresh read.
    #[error("Concurrent modification of {entity} {key}")]
    Conflict { entity: &'static str, key: String },

    /// Unknown session/user/game/jackpot.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// Payload failed to decrypt or decode.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Unexpected response shape from the aggregator on the outbound path.
    #[error("Upstream protocol error: {0}")]
    UpstreamProtocol(String),

    /// Storage system errors.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Row or payload encode/decode failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Storage system errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database open failed: {0}")]
    DatabaseOpenFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),
}

impl CashdeskError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CashdeskError::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        CashdeskError::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn conflict(entity: &'static str, key: impl Into<String>) -> Self {
        CashdeskError::Conflict {
            entity,
            key: key.into(),
        }
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        CashdeskError::Crypto(msg.into())
    }

    /// True for errors the caller may retry against fresh state.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CashdeskError::Conflict { .. })
    }
}

impl From<rocksdb::Error> for CashdeskError {
    fn from(e: rocksdb::Error) -> Self {
        CashdeskError::Storage(StorageError::WriteFailed(e.to_string()))
    }
}

impl From<serde_json::Error> for CashdeskError {
    fn from(e: serde_json::Error) -> Self {
        CashdeskError::Serialization(e.to_string())
    }
}

impl From<crate::currency::UnknownCurrency> for CashdeskError {
    fn from(e: crate::currency::UnknownCurrency) -> Self {
        CashdeskError::Validation(e.to_string())
    }
}

/// Convenience type alias for Results.
pub type CashdeskResult<T> = Result<T, CashdeskError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_display() {
        let err = CashdeskError::InsufficientFunds {
            currency: Currency::USD,
            balance: dec!(1.00),
            requested: dec!(5.00),
        };
        let msg = err.to_string();
        assert!(msg.contains("Insufficient funds"));
        assert!(msg.contains("1.00 USD"));
        assert!(msg.contains("5.00"));
    }

    #[test]
    fn test_storage_error_conversion() {
        let storage = StorageError::CorruptedData("bad row".to_string());
        let err: CashdeskError = storage.into();
        assert!(matches!(err, CashdeskError::Storage(_)));
        assert!(err.to_string().contains("bad row"));
    }

    #[test]
    fn test_conflict_is_retryable() {
        let err = CashdeskError::conflict("wallet", "user-1");
        assert!(err.is_conflict());
        assert!(!CashdeskError::validation("nope").is_conflict());
    }

    #[test]
    fn test_not_found_names_entity() {
        let err = CashdeskError::not_found("game", "slot-777");
        assert_eq!(err.to_string(), "game not found: slot-777");
    }
}
