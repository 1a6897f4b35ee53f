use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::book::projector::{BookProjector, FundedSizes};
use crate::models::{BookUpdate, Market, Offer, OrderBook, TransactionOutcome};
use crate::transport::{LedgerRequest, LedgerTransport};

/// Offers on both sides of a market, plus the validated ledger they were read from.
#[derive(Debug, Clone, Default)]
pub struct OfferSnapshot {
    pub offers: Vec<Offer>,
    pub ledger_index: Option<u32>,
}

fn decode_offers(result: &Value, trading_pair: &str, out: &mut Vec<Offer>) {
    let Some(raw) = result.get("offers").and_then(Value::as_array) else {
        return;
    };
    for value in raw {
        match serde_json::from_value::<Offer>(value.clone()) {
            Ok(offer) => out.push(offer),
            Err(e) => tracing::warn!(trading_pair, error = %e, "undecodable book_offers entry, dropping"),
        }
    }
}

/// Query `book_offers` in both directions for `market`.
pub async fn fetch_offers(transport: &dyn LedgerTransport, market: &Market, limit: u32) -> Result<OfferSnapshot> {
    let mut snapshot = OfferSnapshot::default();
    let directions = [
        (market.base.clone(), market.quote.clone()),
        (market.quote.clone(), market.base.clone()),
    ];
    for (taker_gets, taker_pays) in directions {
        let request = LedgerRequest::BookOffers {
            taker_gets,
            taker_pays,
            limit,
        };
        let response = transport.request(&request).await?;
        if !response.is_success() {
            return Err(anyhow!(
                "book_offers for {} failed: {}",
                market.trading_pair,
                response.error_code().unwrap_or("unknown error")
            ));
        }
        decode_offers(&response.result, &market.trading_pair, &mut snapshot.offers);
        let index = response
            .result
            .get("ledger_index")
            .or_else(|| response.result.get("ledger_current_index"))
            .and_then(Value::as_u64)
            .and_then(|i| u32::try_from(i).ok());
        snapshot.ledger_index = snapshot.ledger_index.max(index);
    }
    Ok(snapshot)
}

/// Live book for one market: a periodic full snapshot patched by each
/// validated transaction in between.
pub struct OrderBookTracker {
    projector: BookProjector,
    book: OrderBook,
    funded: FundedSizes,
    reset_interval: Duration,
    last_reset: Option<Instant>,
    snapshot_ledger: Option<u32>,
}

impl OrderBookTracker {
    pub fn new(market: Market, reset_interval: Duration) -> Self {
        let book = OrderBook::new(&market.trading_pair);
        Self {
            projector: BookProjector::new(market),
            book,
            funded: FundedSizes::new(),
            reset_interval,
            last_reset: None,
            snapshot_ledger: None,
        }
    }

    pub fn market(&self) -> &Market {
        self.projector.market()
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn is_reset_due(&self, now: Instant) -> bool {
        match self.last_reset {
            None => true,
            Some(at) => now.duration_since(at) >= self.reset_interval,
        }
    }

    /// Discard the current book and rebuild it from `snapshot`.
    pub fn reset(&mut self, snapshot: &OfferSnapshot, now: Instant) {
        let (mut book, funded) = self.projector.snapshot_funded(&snapshot.offers);
        book.ledger_index = snapshot.ledger_index;
        tracing::debug!(
            trading_pair = %book.trading_pair,
            bids = book.bids.len(),
            asks = book.asks.len(),
            capped = funded.len(),
            ledger_index = ?snapshot.ledger_index,
            "order book reset"
        );
        self.book = book;
        self.funded = funded;
        self.snapshot_ledger = snapshot.ledger_index;
        self.last_reset = Some(now);
    }

    /// Patch the book with a validated transaction. Transactions already
    /// contained in the current snapshot are ignored.
    pub fn apply_transaction(&mut self, outcome: &TransactionOutcome) -> Vec<BookUpdate> {
        if !outcome.validated || !outcome.is_success() {
            return Vec::new();
        }
        if let (Some(snapshot), Some(index)) = (self.snapshot_ledger, outcome.ledger_index) {
            if index <= snapshot {
                return Vec::new();
            }
        }
        let mut updates = self.projector.apply_diff(&outcome.affected_nodes);
        self.hold_funding_caps(&mut updates);
        if !updates.is_empty() {
            self.book.apply(&updates);
            self.book.ledger_index = outcome.ledger_index.or(self.book.ledger_index);
        }
        updates
    }

    /// Keep underfunded offers at their funded size. Each fill spends the
    /// owner's balance by what was taken, so the cap shrinks with it.
    fn hold_funding_caps(&mut self, updates: &mut [BookUpdate]) {
        for update in updates.iter_mut() {
            match update {
                BookUpdate::Trade(trade) => {
                    if let Some(funded) = self.funded.get_mut(&trade.offer) {
                        *funded = (*funded - trade.amount).max(Decimal::ZERO);
                    }
                }
                BookUpdate::Level(level) => {
                    let Some(funded) = self.funded.get(&level.entry.offer).copied() else {
                        continue;
                    };
                    if level.entry.amount > funded {
                        level.entry.amount = funded;
                    }
                    if level.entry.amount.is_zero() {
                        self.funded.remove(&level.entry.offer);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{default_markets, OfferId};
    use rust_decimal_macros::dec;
    use serde_json::json;

    const SOLO: &str = "534F4C4F00000000000000000000000000000000";
    const SOLO_ISSUER: &str = "rsoLo2S1kiGeCcn6hCUXVrCpGMWLrRrLZz";
    const MAKER: &str = "rhqTdSsJAaEReRsR27YzddqyGoWTNMhEvC";

    fn tracker() -> OrderBookTracker {
        let market = Market::from_config("SOLO-XRP", &default_markets()["SOLO-XRP"]).unwrap();
        OrderBookTracker::new(market, Duration::from_secs(60))
    }

    fn snapshot(ledger_index: u32) -> OfferSnapshot {
        funded_snapshot(ledger_index, None)
    }

    fn funded_snapshot(ledger_index: u32, owner_funds: Option<&str>) -> OfferSnapshot {
        let offer: Offer = serde_json::from_value(json!({
            "Account": MAKER,
            "Sequence": 71762948,
            "TakerGets": {"currency": SOLO, "issuer": SOLO_ISSUER, "value": "44.756352009"},
            "TakerPays": "10000000",
            "Flags": 0,
            "owner_funds": owner_funds
        }))
        .unwrap();
        OfferSnapshot {
            offers: vec![offer],
            ledger_index: Some(ledger_index),
        }
    }

    fn partial_take(ledger_index: u32, validated: bool) -> TransactionOutcome {
        TransactionOutcome::from_stream_event(&json!({
            "transaction": {"Account": "r2XdzWFVoHGfGVmXugtKhxMu3bqhsYiWK", "TransactionType": "OfferCreate", "Sequence": 84437780},
            "meta": {
                "AffectedNodes": [{"ModifiedNode": {
                    "LedgerEntryType": "Offer",
                    "LedgerIndex": "3ABFC9B192B73ECE8FB6E2C46E49B57D4FBC4DE8806B79D913C877C44E73549E",
                    "FinalFields": {
                        "Account": MAKER,
                        "Sequence": 71762948,
                        "TakerGets": {"currency": SOLO, "issuer": SOLO_ISSUER, "value": "42.50531785780174"},
                        "TakerPays": "9497047"
                    },
                    "PreviousFields": {
                        "TakerGets": {"currency": SOLO, "issuer": SOLO_ISSUER, "value": "44.756352009"},
                        "TakerPays": "10000000"
                    }
                }}],
                "TransactionResult": "tesSUCCESS"
            },
            "hash": "86440061A351FF77F21A24ED045EE958F6256697F2628C3555AEBF29A887518C",
            "ledger_index": ledger_index,
            "validated": validated
        }))
        .unwrap()
    }

    fn maker_amount(tracker: &OrderBookTracker) -> Decimal {
        tracker
            .book()
            .entry(&OfferId::new(MAKER, 71762948))
            .map(|(_, e)| e.amount)
            .unwrap_or_default()
    }

    #[test]
    fn test_reset_due_after_interval() {
        let mut t = tracker();
        let now = Instant::now();
        assert!(t.is_reset_due(now));
        t.reset(&snapshot(100), now);
        assert!(!t.is_reset_due(now + Duration::from_secs(59)));
        assert!(t.is_reset_due(now + Duration::from_secs(60)));
        assert_eq!(t.book().ledger_index, Some(100));
    }

    #[test]
    fn test_newer_transaction_patches_book() {
        let mut t = tracker();
        t.reset(&snapshot(100), Instant::now());
        let updates = t.apply_transaction(&partial_take(101, true));
        assert_eq!(updates.len(), 2);
        assert_eq!(maker_amount(&t), dec!(42.50531785780174));
        assert_eq!(t.book().ledger_index, Some(101));
    }

    #[test]
    fn test_snapshot_ledger_and_unvalidated_ignored() {
        let mut t = tracker();
        t.reset(&snapshot(100), Instant::now());
        assert!(t.apply_transaction(&partial_take(100, true)).is_empty());
        assert!(t.apply_transaction(&partial_take(101, false)).is_empty());
        assert_eq!(maker_amount(&t), dec!(44.756352009));
    }

    #[test]
    fn test_funding_cap_survives_partial_take() {
        let mut t = tracker();
        t.reset(&funded_snapshot(100, Some("20")), Instant::now());
        assert_eq!(maker_amount(&t), dec!(20));

        let updates = t.apply_transaction(&partial_take(101, true));
        match &updates[0] {
            BookUpdate::Trade(trade) => assert_eq!(trade.amount, dec!(2.25103415119826)),
            other => panic!("expected trade, got {:?}", other),
        }
        // 20 funded minus 2.25103415119826 taken, below the 42.5 still on the offer
        match &updates[1] {
            BookUpdate::Level(level) => assert_eq!(level.entry.amount, dec!(17.74896584880174)),
            other => panic!("expected level, got {:?}", other),
        }
        assert_eq!(maker_amount(&t), dec!(17.74896584880174));
    }

    #[test]
    fn test_uncapped_offer_follows_ledger_remaining() {
        let mut t = tracker();
        t.reset(&funded_snapshot(100, Some("1000")), Instant::now());
        t.apply_transaction(&partial_take(101, true));
        assert_eq!(maker_amount(&t), dec!(42.50531785780174));
    }
}
