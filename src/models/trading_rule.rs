use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{Currency, TradeFee, TradeType};

/// Optional per-pair overrides read from configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_tick_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_tick_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_order_size: Option<Decimal>,
}

/// Everything known about a pair after consulting the issuers, before it is
/// turned into the normalized [`TradingRule`] and [`FeeRule`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TradingRuleInfo {
    pub trading_pair: String,
    pub base_currency: Currency,
    pub quote_currency: Currency,
    pub base_tick_size: u32,
    pub quote_tick_size: u32,
    pub base_transfer_rate: Decimal,
    pub quote_transfer_rate: Decimal,
    pub minimum_order_size: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TradingRule {
    pub trading_pair: String,
    pub min_order_size: Decimal,
    pub min_price_increment: Decimal,
    pub min_quote_amount_increment: Decimal,
    pub min_base_amount_increment: Decimal,
    pub min_notional_size: Decimal,
}

fn floor_to(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    // A quotient too large to hold means `value` already has no digits finer than `step`.
    match value.checked_div(step).and_then(|units| units.floor().checked_mul(step)) {
        Some(floored) => floored.normalize(),
        None => value,
    }
}

impl TradingRule {
    pub fn quantize_amount(&self, amount: Decimal) -> Decimal {
        floor_to(amount, self.min_base_amount_increment)
    }

    pub fn quantize_price(&self, price: Decimal) -> Decimal {
        floor_to(price, self.min_price_increment)
    }
}

/// Transfer-rate fees an issuer levies on each side of a pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeeRule {
    pub trading_pair: String,
    pub base_token: String,
    pub quote_token: String,
    pub base_transfer_rate: Decimal,
    pub quote_transfer_rate: Decimal,
}

impl FeeRule {
    /// Fee charged on what the order receives: base for a buy, quote for a sell.
    pub fn trade_fee(&self, trade_type: TradeType, base_amount: Decimal, quote_amount: Decimal) -> TradeFee {
        match trade_type {
            TradeType::Buy => TradeFee {
                token: self.base_token.clone(),
                amount: base_amount * self.base_transfer_rate,
            },
            TradeType::Sell => TradeFee {
                token: self.quote_token.clone(),
                amount: quote_amount * self.quote_transfer_rate,
            },
        }
    }
}
