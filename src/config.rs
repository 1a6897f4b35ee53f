use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::time::Duration;

use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::ConnectorError;
use crate::models::{default_markets, Market, MarketConfig, RuleHints};

pub const DEFAULT_RPC_URL: &str = "https://s1.ripple.com:51234";
pub const RPC_URL_ENV: &str = "XRPL_RPC_URL";

/// Base and per-object account reserves, in XRP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReserveSchedule {
    pub base: Decimal,
    pub owner_increment: Decimal,
}

impl Default for ReserveSchedule {
    fn default() -> Self {
        Self {
            base: Decimal::from(10),
            owner_increment: Decimal::from(2),
        }
    }
}

impl ReserveSchedule {
    pub fn required(&self, owner_count: u32) -> Decimal {
        self.base + self.owner_increment * Decimal::from(owner_count)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectorConfig {
    pub rpc_url: String,
    /// Attempts per RPC call before giving up.
    pub rpc_retries: u32,
    /// Trading account; the signer's account wins when both are set.
    pub account: Option<String>,
    pub markets: HashMap<String, MarketConfig>,
    /// Pairs the connector serves. Empty means every configured market.
    pub trading_pairs: Vec<String>,
    pub rule_hints: HashMap<String, RuleHints>,
    /// Seconds between full order-book rebuilds.
    pub order_book_reset_interval_secs: u64,
    pub poll_interval_ms: u64,
    /// Ledgers a submitted transaction stays eligible for.
    pub last_ledger_offset: u32,
    pub book_offers_limit: u32,
    pub reserve: ReserveSchedule,
    /// Price buffer applied to market orders (0.001 = 0.1%).
    pub market_order_slippage: Decimal,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            rpc_retries: 5,
            account: None,
            markets: default_markets(),
            trading_pairs: Vec::new(),
            rule_hints: HashMap::new(),
            order_book_reset_interval_secs: 60,
            poll_interval_ms: 1_000,
            last_ledger_offset: 20,
            book_offers_limit: 100,
            reserve: ReserveSchedule::default(),
            market_order_slippage: Decimal::new(1, 3),
        }
    }
}

impl ConnectorConfig {
    pub fn load(path: &str) -> Result<Self> {
        let mut config: Self = load_from_file(path)?;
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(RPC_URL_ENV) {
            if !url.trim().is_empty() {
                self.rpc_url = url;
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn order_book_reset_interval(&self) -> Duration {
        Duration::from_secs(self.order_book_reset_interval_secs)
    }

    pub fn market(&self, trading_pair: &str) -> Result<Market, ConnectorError> {
        let config = self
            .markets
            .get(trading_pair)
            .ok_or_else(|| ConnectorError::UnknownTradingPair(trading_pair.to_string()))?;
        Market::from_config(trading_pair, config)
    }

    /// The pairs in service, sorted for stable iteration.
    pub fn active_pairs(&self) -> Vec<String> {
        let mut pairs: Vec<String> = if self.trading_pairs.is_empty() {
            self.markets.keys().cloned().collect()
        } else {
            self.trading_pairs.clone()
        };
        pairs.sort();
        pairs.dedup();
        pairs
    }
}

/// Save a serializable object to a JSON file.
pub fn save_to_file<T: Serialize>(data: &T, path: &str) -> Result<()> {
    let file = File::create(path).map_err(|e| anyhow!("Failed to create file {}: {}", path, e))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, data).map_err(|e| anyhow!("Failed to write {}: {}", path, e))?;
    Ok(())
}

/// Load a deserializable object from a JSON file.
pub fn load_from_file<T: DeserializeOwned>(path: &str) -> Result<T> {
    let file = File::open(path).map_err(|e| anyhow!("Failed to open file {}: {}", path, e))?;
    let reader = BufReader::new(file);
    let data = serde_json::from_reader(reader).map_err(|e| anyhow!("Failed to parse file {}: {}", path, e))?;
    Ok(data)
}
