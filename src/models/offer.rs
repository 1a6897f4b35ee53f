use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::RawAmount;

/// Offer flag: the offer was placed passively (does not consume crossing offers).
pub const LSF_PASSIVE: u32 = 0x0001_0000;
/// Offer flag: the offer was placed with `tfSell`.
pub const LSF_SELL: u32 = 0x0002_0000;

/// Identity of an offer on ledger. The sequence is fixed for the offer's
/// lifetime, so `(account, sequence)` is the only stable handle on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OfferId {
    pub account: String,
    pub sequence: u32,
}

impl OfferId {
    pub fn new(account: &str, sequence: u32) -> Self {
        Self {
            account: account.to_string(),
            sequence,
        }
    }
}

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.account, self.sequence)
    }
}

/// A resting offer as returned by `book_offers`.
///
/// Side is not stored: it falls out of which leg carries the market's base
/// currency (see [`crate::book::BookProjector`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Offer {
    #[serde(rename = "Account")]
    pub account: String,
    #[serde(rename = "Sequence")]
    pub sequence: u32,
    #[serde(rename = "TakerGets")]
    pub taker_gets: RawAmount,
    #[serde(rename = "TakerPays")]
    pub taker_pays: RawAmount,
    #[serde(rename = "BookDirectory", default)]
    pub book_directory: String,
    #[serde(rename = "Flags", default)]
    pub flags: u32,
    #[serde(rename = "Expiration", default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<u64>,
    /// Balance the owner holds of the `TakerGets` currency, in that currency's
    /// wire units. Absent for offers not fetched through `book_offers`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_funds: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
}

impl Offer {
    pub fn id(&self) -> OfferId {
        OfferId::new(&self.account, self.sequence)
    }

    pub fn is_sell(&self) -> bool {
        self.flags & LSF_SELL != 0
    }
}
