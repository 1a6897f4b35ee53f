//! Order-book projection: ledger offers in, normalized bids/asks out.

pub mod projector;
pub mod tracker;

pub use projector::BookProjector;
pub use tracker::{fetch_offers, OfferSnapshot, OrderBookTracker};
