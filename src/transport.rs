//! The narrow seams between the engine and the outside world.
//!
//! The engine never opens sockets or touches keys itself: it asks a
//! [`LedgerTransport`] for ledger data, hands signed blobs back to it, and
//! asks a [`TransactionSigner`] for identity and signatures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::{Currency, SignedTransaction, Transaction};

/// Ledger queries the engine issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerRequest {
    AccountInfo { account: String },
    AccountObjects { account: String },
    BookOffers { taker_gets: Currency, taker_pays: Currency, limit: u32 },
    Tx { hash: String },
    Fee,
    LedgerCurrent,
    LedgerValidated,
}

fn book_currency(currency: &Currency) -> Value {
    match currency {
        Currency::Native => json!({ "currency": "XRP" }),
        Currency::Issued { code, issuer } => json!({ "currency": code, "issuer": issuer }),
    }
}

impl LedgerRequest {
    pub fn method(&self) -> &'static str {
        match self {
            LedgerRequest::AccountInfo { .. } => "account_info",
            LedgerRequest::AccountObjects { .. } => "account_objects",
            LedgerRequest::BookOffers { .. } => "book_offers",
            LedgerRequest::Tx { .. } => "tx",
            LedgerRequest::Fee => "fee",
            LedgerRequest::LedgerCurrent => "ledger_current",
            LedgerRequest::LedgerValidated => "ledger",
        }
    }

    /// JSON-RPC `params[0]` for this request.
    pub fn params(&self) -> Value {
        match self {
            LedgerRequest::AccountInfo { account } => json!({
                "account": account,
                "ledger_index": "validated",
            }),
            LedgerRequest::AccountObjects { account } => json!({
                "account": account,
                "ledger_index": "validated",
            }),
            LedgerRequest::BookOffers { taker_gets, taker_pays, limit } => json!({
                "taker_gets": book_currency(taker_gets),
                "taker_pays": book_currency(taker_pays),
                "limit": limit,
                "ledger_index": "validated",
            }),
            LedgerRequest::Tx { hash } => json!({ "transaction": hash, "binary": false }),
            LedgerRequest::Fee | LedgerRequest::LedgerCurrent => json!({}),
            LedgerRequest::LedgerValidated => json!({ "ledger_index": "validated" }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// A node's answer: status plus the untyped `result` body. Callers decode the
/// body into typed records immediately.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerResponse {
    pub status: ResponseStatus,
    pub result: Value,
}

impl LedgerResponse {
    pub fn success(result: Value) -> Self {
        Self {
            status: ResponseStatus::Success,
            result,
        }
    }

    pub fn error(code: &str) -> Self {
        Self {
            status: ResponseStatus::Error,
            result: json!({ "error": code }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// The node's error code, e.g. `txnNotFound` or `actNotFound`.
    pub fn error_code(&self) -> Option<&str> {
        self.result.get("error").and_then(Value::as_str)
    }

    /// Preliminary engine result of a `submit` response.
    pub fn engine_result(&self) -> Option<&str> {
        self.result.get("engine_result").and_then(Value::as_str)
    }
}

#[async_trait]
pub trait LedgerTransport: Send + Sync {
    async fn request(&self, request: &LedgerRequest) -> anyhow::Result<LedgerResponse>;

    /// Submit a signed blob. Implementations must not retry: a resubmission
    /// with the same sequence is indistinguishable from a new attempt.
    async fn submit(&self, tx_blob: &str) -> anyhow::Result<LedgerResponse>;
}

pub trait TransactionSigner: Send + Sync {
    fn account_id(&self) -> String;

    fn sign(&self, transaction: &Transaction) -> anyhow::Result<SignedTransaction>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_offers_params() {
        let solo = Currency::issued("SOLO", "rsoLo2S1kiGeCcn6hCUXVrCpGMWLrRrLZz").unwrap();
        let request = LedgerRequest::BookOffers {
            taker_gets: solo,
            taker_pays: Currency::Native,
            limit: 50,
        };
        let params = request.params();
        assert_eq!(request.method(), "book_offers");
        assert_eq!(params["taker_gets"]["currency"], "534F4C4F00000000000000000000000000000000");
        assert_eq!(params["taker_pays"], json!({ "currency": "XRP" }));
        assert_eq!(params["limit"], 50);
    }

    #[test]
    fn test_response_accessors() {
        let response = LedgerResponse::error("txnNotFound");
        assert!(!response.is_success());
        assert_eq!(response.error_code(), Some("txnNotFound"));

        let submit = LedgerResponse::success(json!({ "engine_result": "tesSUCCESS" }));
        assert_eq!(submit.engine_result(), Some("tesSUCCESS"));
    }
}
