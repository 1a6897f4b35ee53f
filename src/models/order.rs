use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    PendingCreate,
    Open,
    PartiallyFilled,
    PendingCancel,
    Filled,
    Canceled,
    Failed,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderState::Filled | OrderState::Canceled | OrderState::Failed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Terminal states are final; nothing returns to `PendingCreate`; a cancel
    /// can only be in flight for an order the ledger already knows about.
    pub fn can_transition_to(self, next: OrderState) -> bool {
        match (self, next) {
            (current, _) if current.is_terminal() => false,
            (_, OrderState::PendingCreate) => false,
            (OrderState::PendingCreate, OrderState::PendingCancel) => false,
            _ => true,
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderState::PendingCreate => "PENDING_CREATE",
            OrderState::Open => "OPEN",
            OrderState::PartiallyFilled => "PARTIALLY_FILLED",
            OrderState::PendingCancel => "PENDING_CANCEL",
            OrderState::Filled => "FILLED",
            OrderState::Canceled => "CANCELED",
            OrderState::Failed => "FAILED",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeType {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    LimitMaker,
}

/// `<sequence>-<ledger index>`: the originating account sequence of the
/// OfferCreate plus the `LastLedgerSequence` it was submitted with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ExchangeOrderId {
    pub sequence: u32,
    pub ledger_index: u32,
}

impl ExchangeOrderId {
    pub fn new(sequence: u32, ledger_index: u32) -> Self {
        Self {
            sequence,
            ledger_index,
        }
    }
}

impl fmt::Display for ExchangeOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.sequence, self.ledger_index)
    }
}

impl FromStr for ExchangeOrderId {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ConnectorError::UnexpectedResponse(format!("malformed exchange order id '{}'", s));
        let (sequence, ledger_index) = s.split_once('-').ok_or_else(bad)?;
        Ok(Self {
            sequence: sequence.parse().map_err(|_| bad())?,
            ledger_index: ledger_index.parse().map_err(|_| bad())?,
        })
    }
}

/// Client-side record of an order and everything the ledger told us about it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackedOrder {
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub trading_pair: String,
    pub trade_type: TradeType,
    pub order_type: OrderType,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub state: OrderState,
    pub executed_amount_base: Decimal,
    pub executed_amount_quote: Decimal,
    pub creation_timestamp: u64,
    #[serde(default)]
    pub applied_tx_hashes: HashSet<String>,
}

impl TrackedOrder {
    pub fn new(
        client_order_id: &str,
        trading_pair: &str,
        trade_type: TradeType,
        order_type: OrderType,
        amount: Decimal,
        price: Option<Decimal>,
        creation_timestamp: u64,
    ) -> Self {
        Self {
            client_order_id: client_order_id.to_string(),
            exchange_order_id: None,
            trading_pair: trading_pair.to_string(),
            trade_type,
            order_type,
            amount,
            price,
            state: OrderState::PendingCreate,
            executed_amount_base: Decimal::ZERO,
            executed_amount_quote: Decimal::ZERO,
            creation_timestamp,
            applied_tx_hashes: HashSet::new(),
        }
    }

    pub fn with_exchange_order_id(mut self, id: &str) -> Self {
        self.exchange_order_id = Some(id.to_string());
        self
    }

    pub fn with_state(mut self, state: OrderState) -> Self {
        self.state = state;
        self
    }

    /// The sequence component of the exchange order id, if one is assigned
    /// and well formed.
    pub fn exchange_sequence(&self) -> Option<u32> {
        self.exchange_order_id
            .as_deref()
            .and_then(|id| id.parse::<ExchangeOrderId>().ok())
            .map(|id| id.sequence)
    }

    pub fn is_fillable(&self) -> bool {
        !self.state.is_terminal()
    }

    pub fn is_fully_executed(&self) -> bool {
        self.executed_amount_base >= self.amount
    }

    /// Advance the fill accumulators. Returns `false` without touching them if
    /// this transaction was already applied to the order.
    pub fn apply_fill(&mut self, tx_hash: &str, base: Decimal, quote: Decimal) -> bool {
        if !self.applied_tx_hashes.insert(tx_hash.to_string()) {
            return false;
        }
        self.executed_amount_base += base;
        self.executed_amount_quote += quote;
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderUpdate {
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub trading_pair: String,
    pub new_state: OrderState,
    pub update_timestamp: u64,
}

/// Fee taken from the token received in a fill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TradeFee {
    pub token: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TradeUpdate {
    pub trade_id: String,
    pub client_order_id: String,
    pub exchange_order_id: String,
    pub trading_pair: String,
    pub price: Decimal,
    pub amount: Decimal,
    pub quote_amount: Decimal,
    pub fee: TradeFee,
    pub fill_timestamp: u64,
}

/// What the engine hands to the host's order tracker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderEvent {
    Order(OrderUpdate),
    Trade(TradeUpdate),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_exchange_order_id_parse() {
        let id: ExchangeOrderId = "84437895-88954510".parse().unwrap();
        assert_eq!(id, ExchangeOrderId::new(84437895, 88954510));
        assert_eq!(id.to_string(), "84437895-88954510");
        assert!("84437895".parse::<ExchangeOrderId>().is_err());
        assert!("a-1".parse::<ExchangeOrderId>().is_err());
    }

    #[test]
    fn test_terminal_states_do_not_move() {
        for terminal in [OrderState::Filled, OrderState::Canceled, OrderState::Failed] {
            assert!(!terminal.can_transition_to(OrderState::Open));
            assert!(!terminal.can_transition_to(OrderState::PartiallyFilled));
        }
        assert!(OrderState::PendingCreate.can_transition_to(OrderState::Open));
        assert!(OrderState::Open.can_transition_to(OrderState::PendingCancel));
        assert!(OrderState::PartiallyFilled.can_transition_to(OrderState::Open));
        assert!(!OrderState::PendingCreate.can_transition_to(OrderState::PendingCancel));
        assert!(!OrderState::Open.can_transition_to(OrderState::PendingCreate));
    }

    #[test]
    fn test_fill_accumulator_is_idempotent_per_hash() {
        let mut order = TrackedOrder::new(
            "hbot",
            "SOLO-XRP",
            TradeType::Buy,
            OrderType::Limit,
            dec!(2),
            Some(dec!(0.22)),
            1,
        );
        assert!(order.apply_fill("AA", dec!(1.5), dec!(0.33)));
        assert!(!order.apply_fill("AA", dec!(1.5), dec!(0.33)));
        assert_eq!(order.executed_amount_base, dec!(1.5));
        assert!(!order.is_fully_executed());
    }

    #[test]
    fn test_exchange_sequence_requires_assigned_id() {
        let order = TrackedOrder::new("x", "SOLO-XRP", TradeType::Buy, OrderType::Limit, dec!(1), None, 1);
        assert_eq!(order.exchange_sequence(), None);
        let order = order.with_exchange_order_id("1234-4321");
        assert_eq!(order.exchange_sequence(), Some(1234));
    }
}
