//! # xrpl-dex-rs
//!
//! A Rust library mapping the XRP Ledger's native DEX onto a normalized
//! exchange connector: a price-sorted order book per trading pair and a
//! lifecycle of client orders driven by validated ledger transactions.
//!
//! ## Components
//!
//! | Module | Role | Input | Output |
//! |--------|------|-------|--------|
//! | `models::amount` | Amount normalizer | drops / issued triples | `CurrencyAmount` |
//! | `book` | Order book projector | `book_offers`, affected nodes | `OrderBook`, `BookUpdate` |
//! | `rules` | Trading rules deriver | issuer `account_info` | `TradingRule`, `FeeRule` |
//! | `resolver` | Sequence-to-order resolver | account / offer sequence | `TrackedOrder` |
//! | `settlement` | Settlement reconciler | submit + `tx` polling | `OrderUpdate`, `TradeUpdate` |
//! | `exchange` | Connector façade | all of the above | strategy-facing API |
//!
//! The network and the keys stay outside: the engine talks to the ledger
//! through [`LedgerTransport`] and signs through [`TransactionSigner`].
//! [`XrplRpc`] is a JSON-RPC transport for read access.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use xrpl_dex_rs::{book::fetch_offers, book::BookProjector, ConnectorConfig, XrplRpc};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectorConfig::default();
//!     let rpc = XrplRpc::new(&config.rpc_url)?;
//!     let market = config.market("SOLO-XRP")?;
//!
//!     let snapshot = fetch_offers(&rpc, &market, config.book_offers_limit).await?;
//!     let book = BookProjector::new(market).snapshot(&snapshot.offers);
//!
//!     if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
//!         println!("{}: {} / {}", book.trading_pair, bid.price, ask.price);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! # Order book for a pair
//! cargo run --release -- book SOLO-XRP
//!
//! # Trading and fee rules for every configured pair
//! cargo run --release -- --config connector.json rules
//!
//! # Balances of an account, written to a file
//! cargo run --release -- --export balances.json balances r2XdzWFVoHGfGVmXugtKhxMu3bqhsYiWK
//! ```

pub mod balances;
pub mod book;
pub mod config;
pub mod error;
pub mod exchange;
pub mod models;
pub mod resolver;
pub mod rpc;
pub mod rules;
pub mod settlement;
pub mod telemetry;
pub mod transport;
pub mod utils;

pub use config::{load_from_file, save_to_file, ConnectorConfig};
pub use error::{ConnectorError, OrderError};
pub use exchange::XrplExchange;
pub use models::{
    Balances, CurrencyAmount, MarketState, OrderBook, OrderEvent, OrderState, OrderType, TrackedOrder, TradeType,
    TradingRule,
};
pub use resolver::OrderTracker;
pub use rpc::XrplRpc;
pub use transport::{LedgerRequest, LedgerResponse, LedgerTransport, TransactionSigner};
