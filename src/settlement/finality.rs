//! Finality of a submitted transaction.
//!
//! The poll is a small state machine driven by observations of the ledger.
//! [`FinalityPoll::observe`] is pure; [`wait_for_final_outcome`] feeds it from
//! a transport and sleeps between attempts. Expiry is bounded by the
//! transaction's `LastLedgerSequence`, not by wall-clock time.

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::error::ConnectorError;
use crate::models::{SignedTransaction, TransactionOutcome};
use crate::transport::{LedgerRequest, LedgerTransport};

/// What a `tx` lookup said about the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxLookup {
    NotFound,
    Pending,
    Validated(TransactionOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollObservation {
    /// Index of the newest validated ledger, read before the lookup.
    pub latest_validated: u32,
    pub lookup: TxLookup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep {
    Continue,
    Validated(TransactionOutcome),
    Expired { last_ledger_sequence: u32, latest_validated: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalityPoll {
    pub hash: String,
    pub last_ledger_sequence: u32,
    pub attempts: u32,
}

impl FinalityPoll {
    pub fn new(hash: &str, last_ledger_sequence: u32) -> Self {
        Self {
            hash: hash.to_string(),
            last_ledger_sequence,
            attempts: 0,
        }
    }

    /// Advance the poll. A validated lookup wins even when the watermark has
    /// already passed: the transaction made it in before expiring.
    pub fn observe(&mut self, observation: PollObservation) -> PollStep {
        self.attempts += 1;
        match observation.lookup {
            TxLookup::Validated(outcome) => PollStep::Validated(outcome),
            TxLookup::NotFound | TxLookup::Pending => {
                if observation.latest_validated > self.last_ledger_sequence {
                    PollStep::Expired {
                        last_ledger_sequence: self.last_ledger_sequence,
                        latest_validated: observation.latest_validated,
                    }
                } else {
                    PollStep::Continue
                }
            }
        }
    }
}

async fn latest_validated_index(transport: &dyn LedgerTransport) -> Result<u32> {
    let response = transport.request(&LedgerRequest::LedgerValidated).await?;
    if !response.is_success() {
        return Err(anyhow!(
            "ledger request failed: {}",
            response.error_code().unwrap_or("unknown error")
        ));
    }
    ledger_index_of(&response.result).ok_or_else(|| anyhow!("ledger response has no ledger_index"))
}

async fn lookup_transaction(transport: &dyn LedgerTransport, hash: &str) -> Result<TxLookup> {
    let response = transport
        .request(&LedgerRequest::Tx {
            hash: hash.to_string(),
        })
        .await?;
    if !response.is_success() {
        return match response.error_code() {
            Some("txnNotFound") => Ok(TxLookup::NotFound),
            other => Err(anyhow!("tx lookup failed: {}", other.unwrap_or("unknown error"))),
        };
    }
    let outcome = TransactionOutcome::from_tx_result(&response.result)?;
    if outcome.validated {
        Ok(TxLookup::Validated(outcome))
    } else {
        Ok(TxLookup::Pending)
    }
}

/// Poll until the transaction is validated or its watermark passes.
pub async fn wait_for_final_outcome(
    transport: &dyn LedgerTransport,
    mut poll: FinalityPoll,
    poll_interval: Duration,
) -> Result<PollStep> {
    loop {
        let latest_validated = latest_validated_index(transport).await?;
        let lookup = lookup_transaction(transport, &poll.hash).await?;
        match poll.observe(PollObservation {
            latest_validated,
            lookup,
        }) {
            PollStep::Continue => {
                tracing::trace!(hash = %poll.hash, attempt = poll.attempts, latest_validated, "transaction not final yet");
                tokio::time::sleep(poll_interval).await;
            }
            step => return Ok(step),
        }
    }
}

/// Result of verifying a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Validated(TransactionOutcome),
    Expired { last_ledger_sequence: u32 },
    /// Nothing to verify, or the ledger could not be asked.
    Failed,
}

/// Verify a submitted transaction. Every failure is logged here and comes
/// back as a value; nothing propagates.
pub async fn verify_transaction(
    transport: &dyn LedgerTransport,
    transaction: Option<&SignedTransaction>,
    prelim_result: Option<&str>,
    poll_interval: Duration,
) -> Verification {
    let Some(transaction) = transaction else {
        tracing::error!("Failed to verify transaction result, transaction is None");
        return Verification::Failed;
    };
    let Some(prelim_result) = prelim_result else {
        tracing::error!("Failed to verify transaction result, prelim_result is None");
        return Verification::Failed;
    };
    if !prelim_result.starts_with("tes") {
        tracing::warn!(
            hash = %transaction.hash,
            prelim_result,
            "preliminary result is not a success, waiting for the validated outcome"
        );
    }
    let Some(last_ledger_sequence) = transaction.last_ledger_sequence() else {
        tracing::error!(hash = %transaction.hash, "Failed to verify transaction result, no LastLedgerSequence");
        return Verification::Failed;
    };

    let poll = FinalityPoll::new(&transaction.hash, last_ledger_sequence);
    match wait_for_final_outcome(transport, poll, poll_interval).await {
        Ok(PollStep::Validated(outcome)) => Verification::Validated(outcome),
        Ok(PollStep::Expired {
            last_ledger_sequence,
            latest_validated,
        }) => {
            tracing::warn!(
                hash = %transaction.hash,
                last_ledger_sequence,
                latest_validated,
                "transaction expired without validation"
            );
            Verification::Expired { last_ledger_sequence }
        }
        Ok(PollStep::Continue) => Verification::Failed,
        Err(e) => {
            tracing::error!("Submitted transaction failed: {}", e);
            Verification::Failed
        }
    }
}

/// Map a verification onto success or the error that fails the order.
pub fn classify(
    verification: Verification,
    client_order_id: &str,
    exchange_order_id: &str,
) -> Result<TransactionOutcome, ConnectorError> {
    match verification {
        Verification::Validated(outcome) if outcome.is_success() => Ok(outcome),
        Verification::Validated(outcome) => Err(ConnectorError::EngineRejection {
            client_order_id: client_order_id.to_string(),
            exchange_order_id: exchange_order_id.to_string(),
            code: outcome.engine_result,
        }),
        Verification::Expired { .. } => Err(ConnectorError::VerificationFailure(format!(
            "Failed to verify transaction result for order {} ({})",
            client_order_id, exchange_order_id
        ))),
        Verification::Failed => Err(ConnectorError::VerificationFailure(format!(
            "Failed to place order {} ({})",
            client_order_id, exchange_order_id
        ))),
    }
}

/// Ledger index of a `tx` or stream payload, tolerating string encodings.
pub fn ledger_index_of(value: &Value) -> Option<u32> {
    value
        .get("ledger_index")
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .and_then(|i| u32::try_from(i).ok())
}
