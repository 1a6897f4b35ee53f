use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::error::ConnectorError;
use crate::models::{
    checked_product, checked_ratio, normalize, parse_issued_value, AffectedNode, BookEntry, BookSide, BookTrade,
    BookUpdate, Currency, CurrencyAmount, LevelUpdate, Market, Offer, OfferId, OrderBook, RawAmount, DROPS_PER_XRP,
};

/// Projects ledger offers of one market onto its base/quote axis.
#[derive(Debug, Clone)]
pub struct BookProjector {
    market: Market,
}

/// Base size an owner's balance can actually deliver, per capped offer.
pub type FundedSizes = HashMap<OfferId, Decimal>;

/// Value in the units the ledger itself compares: drops for the native leg.
fn wire_units(amount: &CurrencyAmount) -> Result<Decimal, ConnectorError> {
    if amount.currency.is_native() {
        checked_product(amount.value, Decimal::from(DROPS_PER_XRP))
    } else {
        Ok(amount.value)
    }
}

fn quality_of(gets: &CurrencyAmount, pays: &CurrencyAmount) -> Result<Decimal, ConnectorError> {
    checked_ratio(wire_units(pays)?, wire_units(gets)?)
}

fn parse_owner_funds(funds: &str, currency: &Currency) -> Result<Decimal, ConnectorError> {
    if currency.is_native() {
        Ok(normalize(&RawAmount::Drops(funds.to_string()))?.value)
    } else {
        parse_issued_value(funds)
    }
}

struct Projected {
    side: BookSide,
    entry: BookEntry,
    capped: bool,
}

impl BookProjector {
    pub fn new(market: Market) -> Self {
        Self { market }
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    /// Asks offer base and want quote; bids offer quote and want base.
    pub fn classify(&self, gets: &Currency, pays: &Currency) -> Option<BookSide> {
        if gets.same_as(&self.market.base) && pays.same_as(&self.market.quote) {
            Some(BookSide::Ask)
        } else if gets.same_as(&self.market.quote) && pays.same_as(&self.market.base) {
            Some(BookSide::Bid)
        } else {
            None
        }
    }

    /// `(base, quote)` legs of an offer on the given side.
    fn legs<'a>(side: BookSide, gets: &'a CurrencyAmount, pays: &'a CurrencyAmount) -> (&'a CurrencyAmount, &'a CurrencyAmount) {
        match side {
            BookSide::Ask => (gets, pays),
            BookSide::Bid => (pays, gets),
        }
    }

    /// `(base, quote)` values of an offer's legs, or `None` outside this market.
    pub fn base_quote(&self, gets: &CurrencyAmount, pays: &CurrencyAmount) -> Option<(Decimal, Decimal)> {
        let side = self.classify(&gets.currency, &pays.currency)?;
        let (base, quote) = Self::legs(side, gets, pays);
        Some((base.value, quote.value))
    }

    /// Project one resting offer. `Ok(None)` for offers outside this market
    /// and for offers with nothing left to take.
    pub fn project_offer(&self, offer: &Offer) -> Result<Option<(BookSide, BookEntry)>, ConnectorError> {
        Ok(self.project(offer)?.map(|p| (p.side, p.entry)))
    }

    fn project(&self, offer: &Offer) -> Result<Option<Projected>, ConnectorError> {
        let mut gets = offer.taker_gets.normalize()?;
        let mut pays = offer.taker_pays.normalize()?;
        let side = match self.classify(&gets.currency, &pays.currency) {
            Some(side) => side,
            None => return Ok(None),
        };
        if gets.value <= Decimal::ZERO || pays.value <= Decimal::ZERO {
            return Ok(None);
        }
        let quality = quality_of(&gets, &pays)?;

        // An offer can promise more than its owner holds; only the funded part
        // is takeable. No funds figure means no cap.
        let mut capped = false;
        if let Some(funds) = offer.owner_funds.as_deref() {
            let funds = parse_owner_funds(funds, &gets.currency)?.max(Decimal::ZERO);
            if funds < gets.value {
                let ratio = checked_ratio(funds, gets.value)?;
                gets.value = funds;
                pays.value = checked_product(pays.value, ratio)?;
                capped = true;
            }
        }

        let (base, quote) = Self::legs(side, &gets, &pays);
        if base.value <= Decimal::ZERO {
            return Ok(None);
        }
        Ok(Some(Projected {
            side,
            entry: BookEntry {
                offer: offer.id(),
                price: checked_ratio(quote.value, base.value)?,
                amount: base.value,
                quality,
            },
            capped,
        }))
    }

    /// Build a full book from raw offers. Offers that fail to parse or belong
    /// to another market are logged and skipped.
    pub fn snapshot(&self, offers: &[Offer]) -> OrderBook {
        self.snapshot_funded(offers).0
    }

    /// [`snapshot`](Self::snapshot), plus the funded size of every entry
    /// that its owner's balance cut short.
    pub fn snapshot_funded(&self, offers: &[Offer]) -> (OrderBook, FundedSizes) {
        let mut bids = Vec::new();
        let mut asks = Vec::new();
        let mut funded = FundedSizes::new();
        for offer in offers {
            match self.project(offer) {
                Ok(Some(projected)) => {
                    if projected.capped {
                        funded.insert(projected.entry.offer.clone(), projected.entry.amount);
                    }
                    match projected.side {
                        BookSide::Bid => bids.push(projected.entry),
                        BookSide::Ask => asks.push(projected.entry),
                    }
                }
                Ok(None) => {
                    if self
                        .classify(&offer.taker_gets.currency(), &offer.taker_pays.currency())
                        .is_none()
                    {
                        tracing::warn!(
                            trading_pair = %self.market.trading_pair,
                            offer = %offer.id(),
                            "offer legs match neither side of the market, dropping"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        trading_pair = %self.market.trading_pair,
                        offer = %offer.id(),
                        error = %e,
                        "unparseable offer, dropping"
                    );
                }
            }
        }
        (OrderBook::from_entries(&self.market.trading_pair, bids, asks), funded)
    }

    /// Turn a transaction's affected nodes into book updates, in ledger order.
    ///
    /// Every consumed offer yields a trade sized by what was taken, followed by
    /// a level update carrying what remains (zero once the offer is gone).
    pub fn apply_diff(&self, nodes: &[AffectedNode]) -> Vec<BookUpdate> {
        let mut updates = Vec::new();
        for node in nodes.iter().filter(|n| n.is_offer()) {
            match self.project_node(node) {
                Ok(node_updates) => updates.extend(node_updates),
                Err(e) => tracing::warn!(
                    trading_pair = %self.market.trading_pair,
                    ledger_index = %node.ledger_index,
                    error = %e,
                    "skipping unparseable offer node"
                ),
            }
        }
        updates
    }

    fn project_node(&self, node: &AffectedNode) -> Result<Vec<BookUpdate>, ConnectorError> {
        let offer = match (node.account(), node.sequence()) {
            (Some(account), Some(sequence)) => OfferId::new(account, sequence),
            _ => return Ok(Vec::new()),
        };
        let (gets, pays) = match node.offer_remaining()? {
            Some(legs) => legs,
            None => return Ok(Vec::new()),
        };
        let side = match self.classify(&gets.currency, &pays.currency) {
            Some(side) => side,
            None => return Ok(Vec::new()),
        };

        let mut updates = Vec::with_capacity(2);
        let mut last_price = Decimal::ZERO;
        let mut last_quality = Decimal::ZERO;

        if let Some((taken_gets, taken_pays)) = node.offer_delta()? {
            let (base, quote) = Self::legs(side, &taken_gets, &taken_pays);
            if base.value > Decimal::ZERO {
                last_price = checked_ratio(quote.value, base.value)?;
                if taken_gets.value > Decimal::ZERO {
                    last_quality = quality_of(&taken_gets, &taken_pays)?;
                }
                updates.push(BookUpdate::Trade(BookTrade {
                    offer: offer.clone(),
                    maker_side: side,
                    price: last_price,
                    amount: base.value,
                }));
            }
        }

        let (base, quote) = Self::legs(side, &gets, &pays);
        let (price, quality) = if base.value > Decimal::ZERO && gets.value > Decimal::ZERO {
            (checked_ratio(quote.value, base.value)?, quality_of(&gets, &pays)?)
        } else {
            (last_price, last_quality)
        };
        updates.push(BookUpdate::Level(LevelUpdate {
            side,
            entry: BookEntry {
                offer,
                price,
                amount: base.value.max(Decimal::ZERO),
                quality,
            },
        }));
        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{default_markets, IssuedAmount};
    use rust_decimal_macros::dec;
    use serde_json::json;

    const SOLO: &str = "534F4C4F00000000000000000000000000000000";
    const SOLO_ISSUER: &str = "rsoLo2S1kiGeCcn6hCUXVrCpGMWLrRrLZz";

    fn solo(value: &str) -> RawAmount {
        RawAmount::Issued(IssuedAmount {
            currency: SOLO.to_string(),
            issuer: SOLO_ISSUER.to_string(),
            value: value.to_string(),
        })
    }

    fn projector() -> BookProjector {
        BookProjector::new(Market::from_config("SOLO-XRP", &default_markets()["SOLO-XRP"]).unwrap())
    }

    fn offer(seq: u32, gets: RawAmount, pays: RawAmount, funds: Option<&str>) -> Offer {
        Offer {
            account: "rOwner".to_string(),
            sequence: seq,
            taker_gets: gets,
            taker_pays: pays,
            book_directory: String::new(),
            flags: 0,
            expiration: None,
            owner_funds: funds.map(str::to_string),
            quality: None,
        }
    }

    #[test]
    fn test_owner_funds_cap_displayed_size() {
        // Offers 100 SOLO for 22 XRP but only holds 40 SOLO.
        let p = projector();
        let (side, entry) = p
            .project_offer(&offer(1, solo("100"), RawAmount::Drops("22000000".into()), Some("40")))
            .unwrap()
            .unwrap();
        assert_eq!(side, BookSide::Ask);
        assert_eq!(entry.amount, dec!(40));
        assert_eq!(entry.price, dec!(0.22));
    }

    #[test]
    fn test_missing_owner_funds_means_no_cap() {
        let p = projector();
        let (side, entry) = p
            .project_offer(&offer(2, RawAmount::Drops("22000000".into()), solo("100"), None))
            .unwrap()
            .unwrap();
        assert_eq!(side, BookSide::Bid);
        assert_eq!(entry.amount, dec!(100));
        assert_eq!(entry.price, dec!(0.22));
    }

    #[test]
    fn test_foreign_and_malformed_offers_are_dropped() {
        let usd = RawAmount::Issued(IssuedAmount {
            currency: "USD".into(),
            issuer: "rhub8VRN55s94qWKDv6jmDy1pUykJzF3wq".into(),
            value: "5".into(),
        });
        let offers = vec![
            offer(1, usd, RawAmount::Drops("1000000".into()), None),
            offer(2, solo("abc"), RawAmount::Drops("1000000".into()), None),
            offer(3, solo("10"), RawAmount::Drops("2000000".into()), None),
        ];
        let book = projector().snapshot(&offers);
        assert!(book.bids.is_empty());
        assert_eq!(book.asks.len(), 1);
        assert_eq!(book.asks[0].offer.sequence, 3);
    }

    #[test]
    fn test_unfunded_offer_is_skipped() {
        let p = projector();
        assert!(p
            .project_offer(&offer(1, solo("10"), RawAmount::Drops("2000000".into()), Some("0")))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_dust_offer_out_of_range_is_dropped() {
        // 1e-25 SOLO for 10,000 XRP: price and quality exceed what a Decimal holds
        let offers = vec![
            offer(1, solo("1e-25"), RawAmount::Drops("10000000000".into()), None),
            offer(2, solo("10"), RawAmount::Drops("2000000".into()), None),
        ];
        let book = projector().snapshot(&offers);
        assert_eq!(book.asks.len(), 1);
        assert_eq!(book.asks[0].offer.sequence, 2);
        assert_eq!(book.asks[0].price, dec!(0.2));
    }

    #[test]
    fn test_capped_offers_reported_with_funded_size() {
        let offers = vec![
            offer(1, solo("100"), RawAmount::Drops("22000000".into()), Some("40")),
            offer(2, solo("10"), RawAmount::Drops("2300000".into()), Some("500")),
        ];
        let (book, funded) = projector().snapshot_funded(&offers);
        assert_eq!(book.asks.len(), 2);
        assert_eq!(funded.len(), 1);
        assert_eq!(funded[&OfferId::new("rOwner", 1)], dec!(40));
    }

    fn ledger_nodes(nodes: serde_json::Value) -> Vec<AffectedNode> {
        serde_json::from_value(nodes).unwrap()
    }

    #[test]
    fn test_diff_emits_trades_and_levels_in_ledger_order() {
        let nodes = ledger_nodes(json!([
            {"ModifiedNode": {
                "LedgerEntryType": "Offer",
                "LedgerIndex": "A1",
                "FinalFields": {
                    "Account": "rMakerA", "Sequence": 1,
                    "TakerGets": {"currency": SOLO, "issuer": SOLO_ISSUER, "value": "90"},
                    "TakerPays": "19800000"
                },
                "PreviousFields": {
                    "TakerGets": {"currency": SOLO, "issuer": SOLO_ISSUER, "value": "100"},
                    "TakerPays": "22000000"
                }
            }},
            {"ModifiedNode": {
                "LedgerEntryType": "DirectoryNode",
                "LedgerIndex": "D1",
                "FinalFields": {"Flags": 0}
            }},
            {"DeletedNode": {
                "LedgerEntryType": "Offer",
                "LedgerIndex": "B2",
                "FinalFields": {
                    "Account": "rMakerB", "Sequence": 2,
                    "TakerGets": {"currency": SOLO, "issuer": SOLO_ISSUER, "value": "0"},
                    "TakerPays": "0"
                },
                "PreviousFields": {
                    "TakerGets": {"currency": SOLO, "issuer": SOLO_ISSUER, "value": "5"},
                    "TakerPays": "1150000"
                }
            }},
            {"CreatedNode": {
                "LedgerEntryType": "Offer",
                "LedgerIndex": "C3",
                "NewFields": {
                    "Account": "rTaker", "Sequence": 3,
                    "TakerGets": "2100000",
                    "TakerPays": {"currency": SOLO, "issuer": SOLO_ISSUER, "value": "10"}
                }
            }}
        ]));
        let updates = projector().apply_diff(&nodes);
        assert_eq!(updates.len(), 5);

        match &updates[0] {
            BookUpdate::Trade(t) => {
                assert_eq!(t.offer, OfferId::new("rMakerA", 1));
                assert_eq!(t.maker_side, BookSide::Ask);
                assert_eq!(t.amount, dec!(10));
                assert_eq!(t.price, dec!(0.22));
            }
            other => panic!("expected trade, got {:?}", other),
        }
        match &updates[1] {
            BookUpdate::Level(l) => {
                assert_eq!(l.side, BookSide::Ask);
                assert_eq!(l.entry.offer, OfferId::new("rMakerA", 1));
                assert_eq!(l.entry.amount, dec!(90));
                assert_eq!(l.entry.price, dec!(0.22));
            }
            other => panic!("expected level, got {:?}", other),
        }
        match &updates[2] {
            BookUpdate::Trade(t) => {
                assert_eq!(t.offer, OfferId::new("rMakerB", 2));
                assert_eq!(t.amount, dec!(5));
                assert_eq!(t.price, dec!(0.23));
            }
            other => panic!("expected trade, got {:?}", other),
        }
        match &updates[3] {
            BookUpdate::Level(l) => {
                assert_eq!(l.entry.offer, OfferId::new("rMakerB", 2));
                assert!(l.entry.amount.is_zero());
            }
            other => panic!("expected level, got {:?}", other),
        }
        match &updates[4] {
            BookUpdate::Level(l) => {
                assert_eq!(l.side, BookSide::Bid);
                assert_eq!(l.entry.offer, OfferId::new("rTaker", 3));
                assert_eq!(l.entry.amount, dec!(10));
                assert_eq!(l.entry.price, dec!(0.21));
            }
            other => panic!("expected level, got {:?}", other),
        }

        // the deletion takes the offer out of a book that held it
        let mut held = offer(2, solo("5"), RawAmount::Drops("1150000".into()), None);
        held.account = "rMakerB".to_string();
        let mut book = projector().snapshot(&[held]);
        assert!(book.entry(&OfferId::new("rMakerB", 2)).is_some());
        book.apply(&updates);
        assert!(book.entry(&OfferId::new("rMakerB", 2)).is_none());
        assert_eq!(book.best_bid().map(|e| e.amount), Some(dec!(10)));
    }

    #[test]
    fn test_dust_node_skipped_without_dropping_others() {
        let nodes = ledger_nodes(json!([
            {"CreatedNode": {
                "LedgerEntryType": "Offer",
                "LedgerIndex": "E1",
                "NewFields": {
                    "Account": "rDust", "Sequence": 9,
                    "TakerGets": {"currency": SOLO, "issuer": SOLO_ISSUER, "value": "1e-25"},
                    "TakerPays": "10000000000"
                }
            }},
            {"CreatedNode": {
                "LedgerEntryType": "Offer",
                "LedgerIndex": "E2",
                "NewFields": {
                    "Account": "rMakerA", "Sequence": 4,
                    "TakerGets": {"currency": SOLO, "issuer": SOLO_ISSUER, "value": "10"},
                    "TakerPays": "2000000"
                }
            }}
        ]));
        let updates = projector().apply_diff(&nodes);
        assert_eq!(updates.len(), 1);
        match &updates[0] {
            BookUpdate::Level(l) => assert_eq!(l.entry.offer, OfferId::new("rMakerA", 4)),
            other => panic!("expected level, got {:?}", other),
        }
    }
}
