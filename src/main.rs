use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;

use xrpl_dex_rs::balances::derive_balances;
use xrpl_dex_rs::book::{fetch_offers, BookProjector};
use xrpl_dex_rs::models::{FeeRule, Market, OrderBook, TradingRule};
use xrpl_dex_rs::rules::{derive_trading_rules, format_fee_rules, format_trading_rules};
use xrpl_dex_rs::telemetry::init_tracing;
use xrpl_dex_rs::{save_to_file, ConnectorConfig, LedgerRequest, LedgerTransport, XrplRpc};

const CONCURRENCY: usize = 5;

#[derive(Serialize)]
struct RulesExport {
    trading_rules: Vec<TradingRule>,
    fee_rules: Vec<FeeRule>,
}

fn print_usage(bin: &str) {
    eprintln!("Usage:");
    eprintln!("  {} [--config <file>] [--export <file>] <command>", bin);
    eprintln!();
    eprintln!("  Commands:");
    eprintln!("    book [pair]          → order book for one pair, or every configured pair");
    eprintln!("    rules                → trading and fee rules for every configured pair");
    eprintln!("    balances <account>   → total and available balances");
    eprintln!();
    eprintln!("  --config   JSON connector config (default: built-in SOLO-XRP / SOLO-USD)");
    eprintln!("  --export   write the JSON output to a file instead of stdout");
    eprintln!("  XRPL_RPC_URL overrides the node URL.");
    eprintln!("  Example:");
    eprintln!("    cargo run --release -- book SOLO-XRP");
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");
    let raw_args: Vec<String> = std::env::args().collect();

    let mut config_path: Option<String> = None;
    let mut export_path: Option<String> = None;
    let mut positional: Vec<String> = Vec::new();
    let mut i = 1;
    while i < raw_args.len() {
        match raw_args[i].as_str() {
            flag @ ("--config" | "--export") => {
                i += 1;
                if i >= raw_args.len() {
                    eprintln!("{} requires a value", flag);
                    std::process::exit(1);
                }
                if flag == "--config" {
                    config_path = Some(raw_args[i].clone());
                } else {
                    export_path = Some(raw_args[i].clone());
                }
            }
            _ => positional.push(raw_args[i].clone()),
        }
        i += 1;
    }

    let config = match &config_path {
        Some(path) => ConnectorConfig::load(path)?,
        None => {
            let mut config = ConnectorConfig::default();
            config.apply_env();
            config
        }
    };
    let rpc = Arc::new(XrplRpc::new(&config.rpc_url)?.with_retries(config.rpc_retries));

    let output: Value = match positional.first().map(String::as_str) {
        Some("book") => match positional.get(1) {
            Some(pair) => serde_json::to_value(fetch_book(rpc.as_ref(), &config.market(pair)?, &config).await?)?,
            None => serde_json::to_value(fetch_all_books(rpc, &config).await?)?,
        },
        Some("rules") => {
            let markets = config
                .active_pairs()
                .iter()
                .map(|pair| config.market(pair))
                .collect::<Result<Vec<Market>, _>>()?;
            let mut infos: Vec<_> = derive_trading_rules(rpc.as_ref(), &markets, &config.rule_hints)
                .await
                .into_values()
                .collect();
            infos.sort_by(|a, b| a.trading_pair.cmp(&b.trading_pair));
            serde_json::to_value(RulesExport {
                trading_rules: format_trading_rules(&infos),
                fee_rules: format_fee_rules(&infos),
            })?
        }
        Some("balances") => {
            let Some(account) = positional.get(1).or(config.account.as_ref()) else {
                print_usage(&raw_args[0]);
                std::process::exit(1);
            };
            let info = query(rpc.as_ref(), LedgerRequest::AccountInfo { account: account.clone() }).await?;
            let objects = query(rpc.as_ref(), LedgerRequest::AccountObjects { account: account.clone() }).await?;
            serde_json::to_value(derive_balances(account, &info, &objects, &config.reserve)?)?
        }
        _ => {
            print_usage(&raw_args[0]);
            std::process::exit(1);
        }
    };

    match export_path {
        Some(path) => {
            save_to_file(&output, &path)?;
            eprintln!("Exported to {}", path);
        }
        None => println!("{}", serde_json::to_string_pretty(&output)?),
    }
    Ok(())
}

async fn query(rpc: &dyn LedgerTransport, request: LedgerRequest) -> Result<Value> {
    let method = request.method();
    let response = rpc.request(&request).await?;
    if !response.is_success() {
        return Err(anyhow!(
            "{} failed: {}",
            method,
            response.error_code().unwrap_or("unknown error")
        ));
    }
    Ok(response.result)
}

async fn fetch_book(rpc: &dyn LedgerTransport, market: &Market, config: &ConnectorConfig) -> Result<OrderBook> {
    eprintln!("Querying offers for {}...", market.trading_pair);
    let snapshot = fetch_offers(rpc, market, config.book_offers_limit).await?;
    let mut book = BookProjector::new(market.clone()).snapshot(&snapshot.offers);
    book.ledger_index = snapshot.ledger_index;
    eprintln!(
        "{}: {} bid(s), {} ask(s)",
        market.trading_pair,
        book.bids.len(),
        book.asks.len()
    );
    Ok(book)
}

async fn fetch_all_books(rpc: Arc<XrplRpc>, config: &ConnectorConfig) -> Result<Vec<OrderBook>> {
    let markets = config
        .active_pairs()
        .iter()
        .map(|pair| config.market(pair))
        .collect::<Result<Vec<Market>, _>>()?;
    let total = markets.len();
    let semaphore = Arc::new(Semaphore::new(CONCURRENCY));
    let done = Arc::new(AtomicUsize::new(0));
    let config = Arc::new(config.clone());
    let mut handles = Vec::with_capacity(total);

    for market in markets {
        let rpc = Arc::clone(&rpc);
        let sem = Arc::clone(&semaphore);
        let done = Arc::clone(&done);
        let config = Arc::clone(&config);

        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire().await.ok()?;
            let result = match fetch_book(rpc.as_ref(), &market, &config).await {
                Ok(book) => Some(book),
                Err(e) => {
                    eprintln!("[error] {}: {}", market.trading_pair, e);
                    None
                }
            };
            let d = done.fetch_add(1, Ordering::Relaxed) + 1;
            eprintln!("[{}/{}] {}", d, total, market.trading_pair);
            result
        }));
    }

    let mut books = Vec::with_capacity(total);
    for handle in handles {
        if let Ok(Some(book)) = handle.await {
            books.push(book);
        }
    }
    books.sort_by(|a, b| a.trading_pair.cmp(&b.trading_pair));
    Ok(books)
}
