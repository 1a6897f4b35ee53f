//! Error taxonomy for the connector.
//!
//! Parsing problems (`MalformedAmount`) stay local to the component that hit
//! them: the offending entry is logged and dropped. Order-lifecycle problems
//! surface to the caller as [`OrderError`], which always names the client
//! order id and, once known, the composite exchange order id.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    #[error("malformed amount '{value}': {reason}")]
    MalformedAmount { value: String, reason: String },

    #[error("Market {0} not found in markets list")]
    UnknownTradingPair(String),

    #[error("{0}")]
    SigningOrBuildFailure(String),

    #[error("{0}")]
    VerificationFailure(String),

    #[error("transaction for order {client_order_id} ({exchange_order_id}) rejected by ledger with engine result {code}")]
    EngineRejection {
        client_order_id: String,
        exchange_order_id: String,
        code: String,
    },

    #[error("account info for issuer {issuer} unavailable: {reason}")]
    IssuerInfoUnavailable { issuer: String, reason: String },

    #[error("unexpected ledger response: {0}")]
    UnexpectedResponse(String),
}

impl ConnectorError {
    pub fn malformed(value: impl Into<String>, reason: impl Into<String>) -> Self {
        ConnectorError::MalformedAmount {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Failure of a client order operation, reported to the strategy layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("Order {} ({client_order_id}) creation failed: {reason}", .exchange_order_id.as_deref().unwrap_or("None"))]
    CreationFailed {
        client_order_id: String,
        exchange_order_id: Option<String>,
        reason: ConnectorError,
    },

    #[error("Order {client_order_id} is not tracked")]
    UnknownOrder { client_order_id: String },

    #[error("Order {client_order_id}: sequence {sequence} already belongs to order {owner}")]
    DuplicateSequence {
        client_order_id: String,
        sequence: u32,
        owner: String,
    },
}

impl OrderError {
    pub fn creation_failed(
        client_order_id: &str,
        exchange_order_id: Option<String>,
        reason: ConnectorError,
    ) -> Self {
        OrderError::CreationFailed {
            client_order_id: client_order_id.to_string(),
            exchange_order_id,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation_failed_message_without_exchange_id() {
        let err = OrderError::creation_failed(
            "test_order",
            None,
            ConnectorError::SigningOrBuildFailure("Test exception during autofill".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "Order None (test_order) creation failed: Test exception during autofill"
        );
    }

    #[test]
    fn test_creation_failed_message_with_exchange_id() {
        let err = OrderError::creation_failed(
            "hbot",
            Some("1-1".to_string()),
            ConnectorError::VerificationFailure("Failed to place order hbot (1-1)".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "Order 1-1 (hbot) creation failed: Failed to place order hbot (1-1)"
        );
    }
}
