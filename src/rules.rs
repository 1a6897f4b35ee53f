//! Trading and fee rules derived from issuer account metadata.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::ConnectorError;
use crate::models::{Currency, FeeRule, Market, RuleHints, TradingRule, TradingRuleInfo};
use crate::transport::{LedgerRequest, LedgerTransport};

/// `TransferRate` value meaning "no fee" (a rate of 1.0 in billionths).
pub const TRANSFER_RATE_UNIT: u64 = 1_000_000_000;
/// Decimal places of the native currency (one drop).
pub const NATIVE_TICK_SIZE: u32 = 6;
/// Significant digits of an issued currency when the issuer sets no `TickSize`.
pub const DEFAULT_ISSUED_TICK_SIZE: u32 = 15;

/// Proportional fee for an issuer's `TransferRate` field.
pub fn transfer_rate(raw: Option<u64>) -> Decimal {
    match raw {
        None | Some(0) | Some(TRANSFER_RATE_UNIT) => Decimal::ZERO,
        Some(rate) => Decimal::from(rate) / Decimal::from(TRANSFER_RATE_UNIT) - Decimal::ONE,
    }
}

fn tick_size(currency: &Currency, issuer_info: Option<&Value>) -> u32 {
    match currency {
        Currency::Native => NATIVE_TICK_SIZE,
        Currency::Issued { .. } => issuer_info
            .and_then(|info| info.get("TickSize"))
            .and_then(Value::as_u64)
            .and_then(|t| u32::try_from(t).ok())
            .unwrap_or(DEFAULT_ISSUED_TICK_SIZE),
    }
}

fn issuer_transfer_rate(currency: &Currency, issuer_info: Option<&Value>) -> Decimal {
    match currency {
        Currency::Native => Decimal::ZERO,
        Currency::Issued { .. } => {
            transfer_rate(issuer_info.and_then(|info| info.get("TransferRate")).and_then(Value::as_u64))
        }
    }
}

/// `10^-places`, clamped to what a `Decimal` can represent.
pub fn increment(places: u32) -> Decimal {
    Decimal::new(1, places.min(28))
}

/// Combine issuer metadata and hints for one pair. Issuer info is `None`
/// for the native side.
pub fn derive_rule_info(
    market: &Market,
    base_issuer_info: Option<&Value>,
    quote_issuer_info: Option<&Value>,
    hints: Option<&RuleHints>,
) -> TradingRuleInfo {
    let hints = hints.cloned().unwrap_or_default();
    let base_tick_size = hints
        .base_tick_size
        .unwrap_or_else(|| tick_size(&market.base, base_issuer_info));
    let quote_tick_size = hints
        .quote_tick_size
        .unwrap_or_else(|| tick_size(&market.quote, quote_issuer_info));
    let minimum_order_size = hints
        .minimum_order_size
        .unwrap_or_else(|| increment(base_tick_size.min(quote_tick_size)));

    TradingRuleInfo {
        trading_pair: market.trading_pair.clone(),
        base_currency: market.base.clone(),
        quote_currency: market.quote.clone(),
        base_tick_size,
        quote_tick_size,
        base_transfer_rate: issuer_transfer_rate(&market.base, base_issuer_info),
        quote_transfer_rate: issuer_transfer_rate(&market.quote, quote_issuer_info),
        minimum_order_size,
    }
}

/// Fetch `account_data` for an issuer account.
pub async fn fetch_issuer_info(transport: &dyn LedgerTransport, issuer: &str) -> Result<Value, ConnectorError> {
    let unavailable = |reason: String| ConnectorError::IssuerInfoUnavailable {
        issuer: issuer.to_string(),
        reason,
    };
    let response = transport
        .request(&LedgerRequest::AccountInfo {
            account: issuer.to_string(),
        })
        .await
        .map_err(|e| unavailable(e.to_string()))?;
    if !response.is_success() {
        return Err(unavailable(response.error_code().unwrap_or("error response").to_string()));
    }
    response
        .result
        .get("account_data")
        .cloned()
        .ok_or_else(|| unavailable("response has no account_data".to_string()))
}

/// Derive rule info for every market. A pair whose issuer metadata cannot be
/// fetched is left out rather than given fabricated defaults.
pub async fn derive_trading_rules(
    transport: &dyn LedgerTransport,
    markets: &[Market],
    hints: &HashMap<String, RuleHints>,
) -> HashMap<String, TradingRuleInfo> {
    let mut issuers: HashMap<String, Result<Value, ConnectorError>> = HashMap::new();
    let mut rules = HashMap::new();

    for market in markets {
        let mut infos: [Option<Value>; 2] = [None, None];
        let mut failure = None;
        for (slot, currency) in [&market.base, &market.quote].into_iter().enumerate() {
            let Some(issuer) = currency.issuer() else {
                continue;
            };
            if !issuers.contains_key(issuer) {
                let fetched = fetch_issuer_info(transport, issuer).await;
                issuers.insert(issuer.to_string(), fetched);
            }
            match &issuers[issuer] {
                Ok(info) => infos[slot] = Some(info.clone()),
                Err(e) => failure = Some(e.clone()),
            }
        }
        if let Some(err) = failure {
            tracing::error!(trading_pair = %market.trading_pair, error = %err, "excluding pair from trading rules");
            continue;
        }
        let info = derive_rule_info(
            market,
            infos[0].as_ref(),
            infos[1].as_ref(),
            hints.get(&market.trading_pair),
        );
        rules.insert(market.trading_pair.clone(), info);
    }
    rules
}

pub fn format_trading_rules(infos: &[TradingRuleInfo]) -> Vec<TradingRule> {
    infos
        .iter()
        .map(|info| TradingRule {
            trading_pair: info.trading_pair.clone(),
            min_order_size: info.minimum_order_size,
            min_price_increment: increment(info.quote_tick_size),
            min_quote_amount_increment: increment(info.quote_tick_size),
            min_base_amount_increment: increment(info.base_tick_size),
            min_notional_size: increment(info.quote_tick_size),
        })
        .collect()
}

pub fn format_fee_rules(infos: &[TradingRuleInfo]) -> Vec<FeeRule> {
    infos
        .iter()
        .map(|info| FeeRule {
            trading_pair: info.trading_pair.clone(),
            base_token: info.base_currency.symbol(),
            quote_token: info.quote_currency.symbol(),
            base_transfer_rate: info.base_transfer_rate,
            quote_transfer_rate: info.quote_transfer_rate,
        })
        .collect()
}
