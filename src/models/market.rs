use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;
use crate::models::{Currency, FeeRule, TradingRule, NATIVE_SYMBOL};

/// How a market is written in configuration: symbols plus issuers, with the
/// native currency carrying no issuer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarketConfig {
    pub base: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_issuer: Option<String>,
    pub quote: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_issuer: Option<String>,
}

/// A trading pair resolved to ledger currency identities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Market {
    pub trading_pair: String,
    pub base: Currency,
    pub quote: Currency,
}

fn resolve_currency(symbol: &str, issuer: Option<&str>) -> Result<Currency, ConnectorError> {
    match issuer {
        None if symbol.eq_ignore_ascii_case(NATIVE_SYMBOL) => Ok(Currency::Native),
        None => Err(ConnectorError::UnexpectedResponse(format!(
            "issued currency {} configured without an issuer",
            symbol
        ))),
        Some(issuer) => Currency::issued(symbol, issuer),
    }
}

impl Market {
    pub fn from_config(trading_pair: &str, config: &MarketConfig) -> Result<Self, ConnectorError> {
        Ok(Self {
            trading_pair: trading_pair.to_string(),
            base: resolve_currency(&config.base, config.base_issuer.as_deref())?,
            quote: resolve_currency(&config.quote, config.quote_issuer.as_deref())?,
        })
    }
}

/// Markets available without any configuration.
pub fn default_markets() -> HashMap<String, MarketConfig> {
    let mut markets = HashMap::new();
    markets.insert(
        "SOLO-XRP".to_string(),
        MarketConfig {
            base: "SOLO".to_string(),
            base_issuer: Some("rsoLo2S1kiGeCcn6hCUXVrCpGMWLrRrLZz".to_string()),
            quote: "XRP".to_string(),
            quote_issuer: None,
        },
    );
    markets.insert(
        "SOLO-USD".to_string(),
        MarketConfig {
            base: "SOLO".to_string(),
            base_issuer: Some("rsoLo2S1kiGeCcn6hCUXVrCpGMWLrRrLZz".to_string()),
            quote: "USD".to_string(),
            quote_issuer: Some("rhub8VRN55s94qWKDv6jmDy1pUykJzF3wq".to_string()),
        },
    );
    markets
}

/// Account balances keyed by display symbol.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Balances {
    pub total: BTreeMap<String, Decimal>,
    pub available: BTreeMap<String, Decimal>,
}

impl Balances {
    pub fn total(&self, symbol: &str) -> Decimal {
        self.total.get(symbol).copied().unwrap_or_default()
    }

    pub fn available(&self, symbol: &str) -> Decimal {
        self.available.get(symbol).copied().unwrap_or_default()
    }
}

/// Connector-wide state derived from the ledger. Built as a whole and swapped
/// in as a whole; readers hold an `Arc` to one consistent version.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarketState {
    pub trading_rules: HashMap<String, TradingRule>,
    pub fee_rules: HashMap<String, FeeRule>,
    pub balances: Balances,
    pub refreshed_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_markets_resolve() {
        let markets = default_markets();
        let solo_xrp = Market::from_config("SOLO-XRP", &markets["SOLO-XRP"]).unwrap();
        assert!(solo_xrp.quote.is_native());
        assert_eq!(solo_xrp.base.symbol(), "SOLO");

        let solo_usd = Market::from_config("SOLO-USD", &markets["SOLO-USD"]).unwrap();
        assert_eq!(solo_usd.quote.issuer(), Some("rhub8VRN55s94qWKDv6jmDy1pUykJzF3wq"));
    }

    #[test]
    fn test_issued_currency_requires_issuer() {
        let config = MarketConfig {
            base: "SOLO".to_string(),
            base_issuer: None,
            quote: "XRP".to_string(),
            quote_issuer: None,
        };
        assert!(Market::from_config("SOLO-XRP", &config).is_err());
    }
}
