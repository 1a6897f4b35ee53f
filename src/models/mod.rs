pub mod amount;
pub mod market;
pub mod offer;
pub mod order;
pub mod order_book;
pub mod trading_rule;
pub mod transaction;

pub use amount::{
    checked_product, checked_ratio, normalize, parse_issued_value, round_significant, Currency, CurrencyAmount,
    IssuedAmount, RawAmount, DROPS_PER_XRP, ISSUED_PRECISION, NATIVE_SYMBOL,
};
pub use market::{default_markets, Balances, Market, MarketConfig, MarketState};
pub use offer::{Offer, OfferId};
pub use order::{
    ExchangeOrderId, OrderEvent, OrderState, OrderType, OrderUpdate, TrackedOrder, TradeFee, TradeType, TradeUpdate,
};
pub use order_book::{BookEntry, BookSide, BookTrade, BookUpdate, LevelUpdate, OrderBook};
pub use trading_rule::{FeeRule, RuleHints, TradingRule, TradingRuleInfo};
pub use transaction::{
    AffectedNode, LedgerEntryType, MemoWrapper, NodeFields, NodeKind, SignedTransaction, Transaction, TransactionKind,
    TransactionOutcome, TxFields, TES_SUCCESS,
};
