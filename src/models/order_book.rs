use std::cmp::Ordering;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::OfferId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    Bid,
    Ask,
}

/// One resting offer projected onto the pair's base/quote axis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookEntry {
    pub offer: OfferId,
    /// Quote units per base unit.
    pub price: Decimal,
    /// Base units on offer, capped by the owner's funds.
    pub amount: Decimal,
    /// The ledger's own ordering key: `TakerPays / TakerGets` in wire units
    /// (drops for the native leg).
    pub quality: Decimal,
}

/// Bid and ask entries for one trading pair, best price first on each side.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderBook {
    pub trading_pair: String,
    pub bids: Vec<BookEntry>,
    pub asks: Vec<BookEntry>,
    /// Ledger index of the last applied snapshot or diff.
    pub ledger_index: Option<u32>,
}

/// A fill observed against a resting offer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookTrade {
    pub offer: OfferId,
    /// Side of the consumed offer; the taker traded the other way.
    pub maker_side: BookSide,
    pub price: Decimal,
    pub amount: Decimal,
}

/// The new resting size of an offer. `amount == 0` removes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelUpdate {
    pub side: BookSide,
    pub entry: BookEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum BookUpdate {
    Trade(BookTrade),
    Level(LevelUpdate),
}

fn ask_order(a: &BookEntry, b: &BookEntry) -> Ordering {
    a.price.cmp(&b.price).then_with(|| a.offer.cmp(&b.offer))
}

fn bid_order(a: &BookEntry, b: &BookEntry) -> Ordering {
    b.price.cmp(&a.price).then_with(|| a.offer.cmp(&b.offer))
}

impl OrderBook {
    pub fn new(trading_pair: &str) -> Self {
        Self {
            trading_pair: trading_pair.to_string(),
            ..Default::default()
        }
    }

    pub fn from_entries(trading_pair: &str, bids: Vec<BookEntry>, asks: Vec<BookEntry>) -> Self {
        let mut book = Self {
            trading_pair: trading_pair.to_string(),
            bids,
            asks,
            ledger_index: None,
        };
        book.bids.sort_by(bid_order);
        book.asks.sort_by(ask_order);
        book
    }

    pub fn best_bid(&self) -> Option<&BookEntry> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&BookEntry> {
        self.asks.first()
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price.checked_add(ask.price).map(|sum| sum / Decimal::TWO),
            _ => None,
        }
    }

    pub fn entry(&self, offer: &OfferId) -> Option<(BookSide, &BookEntry)> {
        if let Some(e) = self.bids.iter().find(|e| &e.offer == offer) {
            return Some((BookSide::Bid, e));
        }
        self.asks
            .iter()
            .find(|e| &e.offer == offer)
            .map(|e| (BookSide::Ask, e))
    }

    /// Replace, insert or remove the entry for one offer, keeping the side sorted.
    pub fn apply_level(&mut self, update: &LevelUpdate) {
        let (entries, order): (&mut Vec<BookEntry>, fn(&BookEntry, &BookEntry) -> Ordering) =
            match update.side {
                BookSide::Bid => (&mut self.bids, bid_order),
                BookSide::Ask => (&mut self.asks, ask_order),
            };
        entries.retain(|e| e.offer != update.entry.offer);
        if update.entry.amount > Decimal::ZERO {
            let at = entries
                .binary_search_by(|probe| order(probe, &update.entry))
                .unwrap_or_else(|i| i);
            entries.insert(at, update.entry.clone());
        }
    }

    /// Apply updates in order; trades carry no book state of their own.
    pub fn apply(&mut self, updates: &[BookUpdate]) {
        for update in updates {
            if let BookUpdate::Level(level) = update {
                self.apply_level(level);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(seq: u32, price: Decimal, amount: Decimal) -> BookEntry {
        BookEntry {
            offer: OfferId::new("rA", seq),
            price,
            amount,
            quality: price,
        }
    }

    #[test]
    fn test_sides_sorted_best_first() {
        let book = OrderBook::from_entries(
            "SOLO-XRP",
            vec![entry(1, dec!(0.20), dec!(1)), entry(2, dec!(0.22), dec!(1))],
            vec![entry(3, dec!(0.25), dec!(1)), entry(4, dec!(0.23), dec!(1))],
        );
        assert_eq!(book.best_bid().unwrap().price, dec!(0.22));
        assert_eq!(book.best_ask().unwrap().price, dec!(0.23));
        assert_eq!(book.mid_price(), Some(dec!(0.225)));
    }

    #[test]
    fn test_level_update_replaces_and_removes() {
        let mut book = OrderBook::from_entries("SOLO-XRP", vec![], vec![entry(3, dec!(0.25), dec!(1))]);
        book.apply_level(&LevelUpdate {
            side: BookSide::Ask,
            entry: entry(4, dec!(0.24), dec!(2)),
        });
        assert_eq!(book.best_ask().unwrap().offer.sequence, 4);

        book.apply_level(&LevelUpdate {
            side: BookSide::Ask,
            entry: entry(4, dec!(0.24), dec!(0.5)),
        });
        assert_eq!(book.asks.len(), 2);
        assert_eq!(book.best_ask().unwrap().amount, dec!(0.5));

        book.apply_level(&LevelUpdate {
            side: BookSide::Ask,
            entry: entry(4, dec!(0.24), Decimal::ZERO),
        });
        assert_eq!(book.asks.len(), 1);
        assert!(book.entry(&OfferId::new("rA", 4)).is_none());
    }
}
