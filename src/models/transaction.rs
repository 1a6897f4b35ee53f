use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;
use crate::models::{CurrencyAmount, IssuedAmount, RawAmount};

pub const TES_SUCCESS: &str = "tesSUCCESS";

/// OfferCreate flags.
pub const TF_PASSIVE: u32 = 0x0001_0000;
pub const TF_IMMEDIATE_OR_CANCEL: u32 = 0x0004_0000;
pub const TF_SELL: u32 = 0x0008_0000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Memo {
    #[serde(rename = "MemoData")]
    pub memo_data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoWrapper {
    #[serde(rename = "Memo")]
    pub memo: Memo,
}

impl MemoWrapper {
    pub fn from_text(text: &str) -> Self {
        Self {
            memo: Memo {
                memo_data: hex::encode_upper(text.as_bytes()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "TransactionType")]
pub enum TransactionKind {
    OfferCreate {
        #[serde(rename = "TakerGets")]
        taker_gets: RawAmount,
        #[serde(rename = "TakerPays")]
        taker_pays: RawAmount,
        #[serde(rename = "Flags", default)]
        flags: u32,
    },
    OfferCancel {
        #[serde(rename = "OfferSequence")]
        offer_sequence: u32,
    },
}

/// An unsigned transaction. `sequence`, `fee` and `last_ledger_sequence` are
/// left empty by the builder and filled in by autofill just before signing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    #[serde(rename = "Account")]
    pub account: String,
    #[serde(flatten)]
    pub kind: TransactionKind,
    #[serde(rename = "Sequence", default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u32>,
    #[serde(rename = "Fee", default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<String>,
    #[serde(rename = "LastLedgerSequence", default, skip_serializing_if = "Option::is_none")]
    pub last_ledger_sequence: Option<u32>,
    #[serde(rename = "Memos", default, skip_serializing_if = "Vec::is_empty")]
    pub memos: Vec<MemoWrapper>,
}

impl Transaction {
    pub fn new(account: &str, kind: TransactionKind) -> Self {
        Self {
            account: account.to_string(),
            kind,
            sequence: None,
            fee: None,
            last_ledger_sequence: None,
            memos: Vec::new(),
        }
    }

    pub fn with_memo(mut self, text: &str) -> Self {
        self.memos.push(MemoWrapper::from_text(text));
        self
    }
}

/// A transaction after signing: the original fields, the serialized blob and
/// the hash the ledger will know it by.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub tx_blob: String,
    pub hash: String,
}

impl SignedTransaction {
    pub fn sequence(&self) -> Option<u32> {
        self.transaction.sequence
    }

    pub fn last_ledger_sequence(&self) -> Option<u32> {
        self.transaction.last_ledger_sequence
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LedgerEntryType {
    Offer,
    AccountRoot,
    RippleState,
    #[serde(other)]
    Other,
}

/// The subset of ledger-object fields the engine reads from metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeFields {
    #[serde(rename = "Account", default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(rename = "Sequence", default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u32>,
    #[serde(rename = "TakerGets", default, skip_serializing_if = "Option::is_none")]
    pub taker_gets: Option<RawAmount>,
    #[serde(rename = "TakerPays", default, skip_serializing_if = "Option::is_none")]
    pub taker_pays: Option<RawAmount>,
    #[serde(rename = "Balance", default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<RawAmount>,
    #[serde(rename = "HighLimit", default, skip_serializing_if = "Option::is_none")]
    pub high_limit: Option<IssuedAmount>,
    #[serde(rename = "LowLimit", default, skip_serializing_if = "Option::is_none")]
    pub low_limit: Option<IssuedAmount>,
    #[serde(rename = "OwnerCount", default, skip_serializing_if = "Option::is_none")]
    pub owner_count: Option<u32>,
    #[serde(rename = "Flags", default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawNodeBody {
    #[serde(rename = "LedgerEntryType")]
    ledger_entry_type: LedgerEntryType,
    #[serde(rename = "LedgerIndex", default)]
    ledger_index: String,
    #[serde(rename = "PreviousFields", default)]
    previous_fields: Option<NodeFields>,
    #[serde(rename = "FinalFields", default)]
    final_fields: Option<NodeFields>,
    #[serde(rename = "NewFields", default)]
    new_fields: Option<NodeFields>,
}

#[derive(Debug, Clone, Deserialize)]
enum RawAffectedNode {
    CreatedNode(RawNodeBody),
    ModifiedNode(RawNodeBody),
    DeletedNode(RawNodeBody),
}

/// One before/after entry of a transaction's metadata.
///
/// `final_fields` holds `NewFields` for created nodes, so callers read the
/// post-transaction state from one place regardless of node kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "RawAffectedNode")]
pub struct AffectedNode {
    pub kind: NodeKind,
    pub ledger_entry_type: LedgerEntryType,
    pub ledger_index: String,
    pub previous_fields: NodeFields,
    pub final_fields: NodeFields,
}

impl From<RawAffectedNode> for AffectedNode {
    fn from(raw: RawAffectedNode) -> Self {
        let (kind, body) = match raw {
            RawAffectedNode::CreatedNode(b) => (NodeKind::Created, b),
            RawAffectedNode::ModifiedNode(b) => (NodeKind::Modified, b),
            RawAffectedNode::DeletedNode(b) => (NodeKind::Deleted, b),
        };
        AffectedNode {
            kind,
            ledger_entry_type: body.ledger_entry_type,
            ledger_index: body.ledger_index,
            previous_fields: body.previous_fields.unwrap_or_default(),
            final_fields: body
                .final_fields
                .or(body.new_fields)
                .unwrap_or_default(),
        }
    }
}

impl AffectedNode {
    pub fn is_offer(&self) -> bool {
        self.ledger_entry_type == LedgerEntryType::Offer
    }

    pub fn account(&self) -> Option<&str> {
        self.final_fields
            .account
            .as_deref()
            .or(self.previous_fields.account.as_deref())
    }

    pub fn sequence(&self) -> Option<u32> {
        self.final_fields.sequence.or(self.previous_fields.sequence)
    }

    /// Offer legs consumed by this transaction, `previous - final` for
    /// `TakerGets` and `TakerPays`.
    ///
    /// `None` when the transaction did not change the offer's size: created
    /// offers, and deleted offers without previous fields (cancelled, expired
    /// or unfunded offers are removed untouched).
    pub fn offer_delta(&self) -> Result<Option<(CurrencyAmount, CurrencyAmount)>, ConnectorError> {
        if self.kind == NodeKind::Created {
            return Ok(None);
        }
        let prev_gets = match &self.previous_fields.taker_gets {
            Some(raw) => raw.normalize()?,
            None => return Ok(None),
        };
        let prev_pays = match self
            .previous_fields
            .taker_pays
            .as_ref()
            .or(self.final_fields.taker_pays.as_ref())
        {
            Some(raw) => raw.normalize()?,
            None => return Ok(None),
        };
        let final_gets = leg_or_zero(self.final_fields.taker_gets.as_ref(), &prev_gets)?;
        let final_pays = leg_or_zero(self.final_fields.taker_pays.as_ref(), &prev_pays)?;
        Ok(Some((
            CurrencyAmount {
                value: prev_gets.value - final_gets,
                currency: prev_gets.currency,
            },
            CurrencyAmount {
                value: prev_pays.value - final_pays,
                currency: prev_pays.currency,
            },
        )))
    }

    /// Post-transaction legs of an offer; a deleted offer has nothing left.
    pub fn offer_remaining(&self) -> Result<Option<(CurrencyAmount, CurrencyAmount)>, ConnectorError> {
        let (gets, pays) = match (&self.final_fields.taker_gets, &self.final_fields.taker_pays) {
            (Some(gets), Some(pays)) => (gets.normalize()?, pays.normalize()?),
            _ => return Ok(None),
        };
        if self.kind == NodeKind::Deleted {
            return Ok(Some((
                CurrencyAmount { value: Decimal::ZERO, currency: gets.currency },
                CurrencyAmount { value: Decimal::ZERO, currency: pays.currency },
            )));
        }
        Ok(Some((gets, pays)))
    }
}

fn leg_or_zero(raw: Option<&RawAmount>, previous: &CurrencyAmount) -> Result<Decimal, ConnectorError> {
    match raw {
        Some(raw) => {
            let amount = raw.normalize()?;
            if !amount.currency.same_as(&previous.currency) {
                return Err(ConnectorError::UnexpectedResponse(format!(
                    "offer leg changed currency from {} to {}",
                    previous.currency, amount.currency
                )));
            }
            Ok(amount.value)
        }
        None => Ok(Decimal::ZERO),
    }
}

/// The fields of the transaction itself that the engine correlates on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxFields {
    #[serde(rename = "Account")]
    pub account: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Sequence", default)]
    pub sequence: u32,
    #[serde(rename = "LastLedgerSequence", default, skip_serializing_if = "Option::is_none")]
    pub last_ledger_sequence: Option<u32>,
    #[serde(rename = "Fee", default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<String>,
    #[serde(rename = "Flags", default)]
    pub flags: u32,
    #[serde(rename = "TakerGets", default, skip_serializing_if = "Option::is_none")]
    pub taker_gets: Option<RawAmount>,
    #[serde(rename = "TakerPays", default, skip_serializing_if = "Option::is_none")]
    pub taker_pays: Option<RawAmount>,
    #[serde(rename = "OfferSequence", default, skip_serializing_if = "Option::is_none")]
    pub offer_sequence: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct TxMeta {
    #[serde(rename = "AffectedNodes", default)]
    affected_nodes: Vec<AffectedNode>,
    #[serde(rename = "TransactionResult", default)]
    transaction_result: String,
}

fn validated_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct StreamEvent {
    transaction: TxFields,
    meta: TxMeta,
    hash: String,
    #[serde(default)]
    ledger_index: Option<u32>,
    #[serde(default)]
    date: Option<u64>,
    #[serde(default = "validated_by_default")]
    validated: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct TxLookup {
    #[serde(flatten)]
    transaction: TxFields,
    hash: String,
    #[serde(default)]
    ledger_index: Option<u32>,
    #[serde(default)]
    date: Option<u64>,
    #[serde(default)]
    meta: Option<TxMeta>,
    #[serde(default)]
    validated: bool,
}

/// A transaction together with the ledger's verdict on it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TransactionOutcome {
    pub hash: String,
    pub transaction: TxFields,
    pub engine_result: String,
    pub affected_nodes: Vec<AffectedNode>,
    pub ledger_index: Option<u32>,
    pub validated: bool,
    /// Close time of the including ledger, seconds since the Ripple epoch.
    pub date: Option<u64>,
}

impl TransactionOutcome {
    /// Decode one message of the account transaction stream.
    ///
    /// Stream messages only carry transactions from closed ledgers, so a
    /// missing `validated` flag is read as validated.
    pub fn from_stream_event(event: &serde_json::Value) -> Result<Self, ConnectorError> {
        let raw: StreamEvent = serde_json::from_value(event.clone())
            .map_err(|e| ConnectorError::UnexpectedResponse(format!("transaction event: {}", e)))?;
        Ok(Self {
            hash: raw.hash,
            transaction: raw.transaction,
            engine_result: raw.meta.transaction_result,
            affected_nodes: raw.meta.affected_nodes,
            ledger_index: raw.ledger_index,
            validated: raw.validated,
            date: raw.date,
        })
    }

    /// Decode the result of a `tx` lookup. Not-yet-validated transactions come
    /// back without metadata and with an empty engine result.
    pub fn from_tx_result(result: &serde_json::Value) -> Result<Self, ConnectorError> {
        let raw: TxLookup = serde_json::from_value(result.clone())
            .map_err(|e| ConnectorError::UnexpectedResponse(format!("tx result: {}", e)))?;
        let (engine_result, affected_nodes) = match raw.meta {
            Some(meta) => (meta.transaction_result, meta.affected_nodes),
            None => (String::new(), Vec::new()),
        };
        Ok(Self {
            hash: raw.hash,
            transaction: raw.transaction,
            engine_result,
            affected_nodes,
            ledger_index: raw.ledger_index,
            validated: raw.validated,
            date: raw.date,
        })
    }

    pub fn is_success(&self) -> bool {
        self.engine_result == TES_SUCCESS
    }

    pub fn offer_nodes(&self) -> impl Iterator<Item = &AffectedNode> {
        self.affected_nodes.iter().filter(|n| n.is_offer())
    }
}
