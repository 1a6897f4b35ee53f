//! The connector façade: what a trading client talks to.
//!
//! [`XrplExchange`] owns the order tracker, the live books and the current
//! [`MarketState`]. Each lives behind its own `parking_lot` lock, and no guard
//! is ever held across an `.await`: every async step works on values copied
//! out first and commits its result afterwards. Order and trade events go out
//! on an unbounded channel handed back by [`XrplExchange::new`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::balances::derive_balances;
use crate::book::{fetch_offers, OrderBookTracker};
use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, OrderError};
use crate::models::{
    Balances, ExchangeOrderId, LedgerEntryType, Market, MarketState, OrderBook, OrderEvent, OrderState, OrderType,
    OrderUpdate, SignedTransaction, TrackedOrder, TradeType, TradingRuleInfo, Transaction, TransactionOutcome,
};
use crate::resolver::OrderTracker;
use crate::rules::{self, format_fee_rules, format_trading_rules};
use crate::settlement::{
    autofill, build_offer_cancel, build_offer_create, classify, process_transaction, verify_transaction, FillContext,
    OrderIntent,
};
use crate::transport::{LedgerRequest, LedgerTransport, TransactionSigner};
use crate::utils::unix_now;

/// Puts an order back in its pre-cancel state when dropped armed: on a
/// failed cancel, and when the cancelling future is dropped mid-poll.
struct CancelGuard<'a> {
    exchange: &'a XrplExchange,
    client_order_id: &'a str,
    previous: OrderState,
    armed: bool,
}

impl CancelGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.exchange.restore_after_cancel(self.client_order_id, self.previous);
        }
    }
}

pub struct XrplExchange {
    transport: Arc<dyn LedgerTransport>,
    signer: Arc<dyn TransactionSigner>,
    config: ConnectorConfig,
    markets: HashMap<String, Market>,
    state: RwLock<Arc<MarketState>>,
    orders: Mutex<OrderTracker>,
    books: Mutex<HashMap<String, OrderBookTracker>>,
    events: mpsc::UnboundedSender<OrderEvent>,
}

impl XrplExchange {
    /// Build the connector. Every configured market must resolve; a market
    /// with an issued currency and no issuer is a configuration error.
    pub fn new(
        transport: Arc<dyn LedgerTransport>,
        signer: Arc<dyn TransactionSigner>,
        config: ConnectorConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<OrderEvent>), ConnectorError> {
        let markets = config
            .markets
            .keys()
            .map(|pair| config.market(pair).map(|m| (pair.clone(), m)))
            .collect::<Result<HashMap<_, _>, _>>()?;
        let (events, receiver) = mpsc::unbounded_channel();
        let exchange = Self {
            transport,
            signer,
            config,
            markets,
            state: RwLock::new(Arc::new(MarketState::default())),
            orders: Mutex::new(OrderTracker::new()),
            books: Mutex::new(HashMap::new()),
            events,
        };
        Ok((exchange, receiver))
    }

    pub fn account(&self) -> String {
        self.signer.account_id()
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn market(&self, trading_pair: &str) -> Result<Market, ConnectorError> {
        self.markets
            .get(trading_pair)
            .cloned()
            .ok_or_else(|| ConnectorError::UnknownTradingPair(trading_pair.to_string()))
    }

    fn active_markets(&self) -> Vec<Market> {
        self.config
            .active_pairs()
            .iter()
            .filter_map(|pair| self.markets.get(pair).cloned())
            .collect()
    }

    /// The state version current at the time of the call.
    pub fn market_state(&self) -> Arc<MarketState> {
        self.state.read().clone()
    }

    pub fn start_tracking(&self, order: TrackedOrder) {
        self.orders.lock().start_tracking(order);
    }

    pub fn stop_tracking(&self, client_order_id: &str) -> Option<TrackedOrder> {
        self.orders.lock().stop_tracking(client_order_id)
    }

    pub fn tracked_order(&self, client_order_id: &str) -> Option<TrackedOrder> {
        self.orders.lock().get(client_order_id).cloned()
    }

    pub fn resolve_order_by_sequence(&self, sequence: u32) -> Option<TrackedOrder> {
        self.orders.lock().resolve_order_by_sequence(sequence).cloned()
    }

    fn emit(&self, event: OrderEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("order event receiver dropped");
        }
    }

    fn emit_all(&self, events: Vec<OrderEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    /// Transition an order and report it if the state actually changed.
    fn set_state(&self, client_order_id: &str, state: OrderState) -> bool {
        let update = {
            let mut orders = self.orders.lock();
            if !orders.transition(client_order_id, state) {
                return false;
            }
            orders.get(client_order_id).map(|o| OrderUpdate {
                client_order_id: o.client_order_id.clone(),
                exchange_order_id: o.exchange_order_id.clone(),
                trading_pair: o.trading_pair.clone(),
                new_state: o.state,
                update_timestamp: unix_now(),
            })
        };
        if let Some(update) = update {
            self.emit(OrderEvent::Order(update));
        }
        true
    }

    fn fail_order(&self, client_order_id: &str, exchange_order_id: Option<String>, reason: ConnectorError) -> OrderError {
        let err = OrderError::creation_failed(client_order_id, exchange_order_id, reason);
        tracing::error!(client_order_id, "{}", err);
        self.set_state(client_order_id, OrderState::Failed);
        err
    }

    // ---- order book ----

    /// Current book for `trading_pair`, rebuilt from a fresh snapshot when
    /// none exists yet or the reset interval has elapsed.
    pub async fn get_order_book_snapshot(&self, trading_pair: &str) -> Result<OrderBook> {
        let market = self.market(trading_pair)?;
        let due = self
            .books
            .lock()
            .get(trading_pair)
            .map(|t| t.is_reset_due(Instant::now()))
            .unwrap_or(true);
        if due {
            let snapshot = fetch_offers(self.transport.as_ref(), &market, self.config.book_offers_limit).await?;
            let mut books = self.books.lock();
            let tracker = books
                .entry(trading_pair.to_string())
                .or_insert_with(|| OrderBookTracker::new(market, self.config.order_book_reset_interval()));
            tracker.reset(&snapshot, Instant::now());
        }
        self.books
            .lock()
            .get(trading_pair)
            .map(|t| t.book().clone())
            .ok_or_else(|| anyhow!("no order book for {}", trading_pair))
    }

    /// Patch every live book with one validated transaction.
    pub fn apply_book_event(&self, outcome: &TransactionOutcome) {
        let mut books = self.books.lock();
        for tracker in books.values_mut() {
            let updates = tracker.apply_transaction(outcome);
            if !updates.is_empty() {
                tracing::trace!(
                    trading_pair = %tracker.market().trading_pair,
                    updates = updates.len(),
                    hash = %outcome.hash,
                    "order book patched"
                );
            }
        }
    }

    // ---- orders ----

    async fn reference_price(&self, trading_pair: &str, trade_type: TradeType) -> Result<Decimal, ConnectorError> {
        let book = self
            .get_order_book_snapshot(trading_pair)
            .await
            .map_err(|e| ConnectorError::SigningOrBuildFailure(e.to_string()))?;
        let best = match trade_type {
            TradeType::Buy => book.best_ask(),
            TradeType::Sell => book.best_bid(),
        };
        best.map(|entry| entry.price).ok_or_else(|| {
            ConnectorError::SigningOrBuildFailure(format!("no liquidity on {} to price a market order", trading_pair))
        })
    }

    /// Autofill and sign. Every failure here is a build failure.
    async fn prepare(&self, tx: Transaction) -> Result<SignedTransaction, ConnectorError> {
        let tx = autofill(self.transport.as_ref(), tx, self.config.last_ledger_offset)
            .await
            .map_err(|e| ConnectorError::SigningOrBuildFailure(e.to_string()))?;
        self.signer
            .sign(&tx)
            .map_err(|e| ConnectorError::SigningOrBuildFailure(e.to_string()))
    }

    /// Submit once. A transport error or an error response leaves no
    /// preliminary result.
    async fn submit(&self, signed: &SignedTransaction) -> Option<String> {
        match self.transport.submit(&signed.tx_blob).await {
            Ok(response) if response.is_success() => response.engine_result().map(str::to_string),
            Ok(response) => {
                tracing::error!(
                    hash = %signed.hash,
                    error = response.error_code().unwrap_or("unknown"),
                    engine_result = response.engine_result().unwrap_or("none"),
                    "submit returned an error"
                );
                None
            }
            Err(e) => {
                tracing::error!(hash = %signed.hash, error = %e, "submit failed");
                None
            }
        }
    }

    fn apply_fills(&self, outcome: &TransactionOutcome) {
        let state = self.market_state();
        let account = self.account();
        let ctx = FillContext {
            account: &account,
            markets: &self.markets,
            fee_rules: &state.fee_rules,
        };
        let events = process_transaction(outcome, &ctx, &mut self.orders.lock());
        self.emit_all(events);
    }

    /// Place an order and wait for the ledger's verdict. Returns the
    /// exchange order id `<Sequence>-<LastLedgerSequence>`.
    pub async fn place_order(
        &self,
        client_order_id: &str,
        trading_pair: &str,
        amount: Decimal,
        trade_type: TradeType,
        order_type: OrderType,
        price: Option<Decimal>,
    ) -> Result<String, OrderError> {
        self.start_tracking(TrackedOrder::new(
            client_order_id,
            trading_pair,
            trade_type,
            order_type,
            amount,
            price,
            unix_now(),
        ));

        let market = self
            .market(trading_pair)
            .map_err(|e| self.fail_order(client_order_id, None, e))?;
        let price = match (price, order_type) {
            (Some(price), _) => price,
            (None, OrderType::Market) => self
                .reference_price(trading_pair, trade_type)
                .await
                .map_err(|e| self.fail_order(client_order_id, None, e))?,
            (None, _) => {
                let reason = ConnectorError::SigningOrBuildFailure(format!(
                    "{:?} order {} has no price",
                    order_type, client_order_id
                ));
                return Err(self.fail_order(client_order_id, None, reason));
            }
        };

        let state = self.market_state();
        let intent = OrderIntent {
            client_order_id,
            market: &market,
            trade_type,
            order_type,
            amount,
            price,
        };
        let tx = build_offer_create(
            &self.account(),
            &intent,
            state.trading_rules.get(trading_pair),
            self.config.market_order_slippage,
        )
        .map_err(|e| self.fail_order(client_order_id, None, e))?;
        let signed = self
            .prepare(tx)
            .await
            .map_err(|e| self.fail_order(client_order_id, None, e))?;

        let (Some(sequence), Some(last_ledger_sequence)) = (signed.sequence(), signed.last_ledger_sequence()) else {
            let reason = ConnectorError::SigningOrBuildFailure(
                "signed transaction has no Sequence or LastLedgerSequence".to_string(),
            );
            return Err(self.fail_order(client_order_id, None, reason));
        };
        let exchange_order_id = ExchangeOrderId::new(sequence, last_ledger_sequence);
        let xid = exchange_order_id.to_string();
        // Assigned before submission so stream events can find the order.
        let assigned = self
            .orders
            .lock()
            .assign_exchange_order_id(client_order_id, exchange_order_id);
        if let Err(e) = assigned {
            tracing::error!(client_order_id, "{}", e);
            self.set_state(client_order_id, OrderState::Failed);
            return Err(e);
        }

        let prelim = self.submit(&signed).await;
        tracing::info!(
            client_order_id,
            exchange_order_id = %xid,
            hash = %signed.hash,
            prelim_result = prelim.as_deref().unwrap_or("none"),
            "order submitted"
        );
        let verification = verify_transaction(
            self.transport.as_ref(),
            Some(&signed),
            prelim.as_deref(),
            self.config.poll_interval(),
        )
        .await;
        let outcome = classify(verification, client_order_id, &xid)
            .map_err(|e| self.fail_order(client_order_id, Some(xid.clone()), e))?;

        self.apply_fills(&outcome);
        let pending = self
            .tracked_order(client_order_id)
            .map(|o| o.state == OrderState::PendingCreate)
            .unwrap_or(false);
        if pending {
            self.set_state(client_order_id, OrderState::Open);
        }
        Ok(xid)
    }

    /// Cancel a resting order. `true` once the cancel is validated; on any
    /// failure the order returns to the state it was in.
    pub async fn cancel_order(&self, client_order_id: &str, tracked_order: &TrackedOrder) -> bool {
        let Some(offer_sequence) = tracked_order.exchange_sequence() else {
            tracing::warn!(client_order_id, "cannot cancel an order without exchange order id");
            return false;
        };
        let xid = tracked_order.exchange_order_id.clone().unwrap_or_default();
        let previous = {
            let mut orders = self.orders.lock();
            if orders.get(client_order_id).is_none() {
                orders.start_tracking(tracked_order.clone());
            }
            orders.get(client_order_id).map(|o| o.state).unwrap_or(tracked_order.state)
        };
        self.set_state(client_order_id, OrderState::PendingCancel);
        let guard = CancelGuard {
            exchange: self,
            client_order_id,
            previous,
            armed: true,
        };

        let tx = build_offer_cancel(&self.account(), offer_sequence, client_order_id);
        let result = match self.prepare(tx).await {
            Ok(signed) => {
                let prelim = self.submit(&signed).await;
                let verification = verify_transaction(
                    self.transport.as_ref(),
                    Some(&signed),
                    prelim.as_deref(),
                    self.config.poll_interval(),
                )
                .await;
                classify(verification, client_order_id, &xid)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => {
                guard.disarm();
                self.apply_fills(&outcome);
                self.set_state(client_order_id, OrderState::Canceled);
                tracing::info!(client_order_id, exchange_order_id = %xid, "order canceled");
                true
            }
            Err(e) => {
                tracing::error!(client_order_id, exchange_order_id = %xid, error = %e, "cancel failed");
                drop(guard);
                false
            }
        }
    }

    /// Undo `PENDING_CANCEL` unless something else moved the order meanwhile.
    fn restore_after_cancel(&self, client_order_id: &str, previous: OrderState) {
        let still_pending = self
            .tracked_order(client_order_id)
            .map(|o| o.state == OrderState::PendingCancel)
            .unwrap_or(false);
        if still_pending {
            self.set_state(client_order_id, previous);
        }
    }

    // ---- market state ----

    pub async fn derive_trading_rules(&self) -> HashMap<String, TradingRuleInfo> {
        rules::derive_trading_rules(self.transport.as_ref(), &self.active_markets(), &self.config.rule_hints).await
    }

    async fn fetch_account_result(&self, request: LedgerRequest) -> Result<Value> {
        let method = request.method();
        let response = self.transport.request(&request).await?;
        if !response.is_success() {
            return Err(anyhow!(
                "{} failed: {}",
                method,
                response.error_code().unwrap_or("unknown error")
            ));
        }
        Ok(response.result)
    }

    async fn fetch_balances(&self) -> Result<Balances> {
        let account = self.account();
        let info = self
            .fetch_account_result(LedgerRequest::AccountInfo {
                account: account.clone(),
            })
            .await?;
        let objects = self
            .fetch_account_result(LedgerRequest::AccountObjects {
                account: account.clone(),
            })
            .await?;
        Ok(derive_balances(&account, &info, &objects, &self.config.reserve)?)
    }

    /// Re-read balances and swap them into the current state.
    pub async fn update_balances(&self) -> Result<Balances> {
        let balances = self.fetch_balances().await?;
        let mut state = self.state.write();
        let mut next = MarketState::clone(&state);
        next.balances = balances.clone();
        next.refreshed_at = unix_now();
        *state = Arc::new(next);
        Ok(balances)
    }

    /// Rebuild rules, fee rules and balances, then publish them together.
    pub async fn refresh_market_state(&self) -> Result<Arc<MarketState>> {
        let mut infos: Vec<TradingRuleInfo> = self.derive_trading_rules().await.into_values().collect();
        infos.sort_by(|a, b| a.trading_pair.cmp(&b.trading_pair));
        let balances = self.fetch_balances().await?;

        let next = Arc::new(MarketState {
            trading_rules: format_trading_rules(&infos)
                .into_iter()
                .map(|r| (r.trading_pair.clone(), r))
                .collect(),
            fee_rules: format_fee_rules(&infos)
                .into_iter()
                .map(|r| (r.trading_pair.clone(), r))
                .collect(),
            balances,
            refreshed_at: unix_now(),
        });
        *self.state.write() = next.clone();
        tracing::info!(
            trading_rules = next.trading_rules.len(),
            balances = next.balances.total.len(),
            "market state refreshed"
        );
        Ok(next)
    }

    // ---- streams ----

    fn touches_account(outcome: &TransactionOutcome, account: &str) -> bool {
        outcome.transaction.account == account
            || outcome.affected_nodes.iter().any(|node| {
                node.account() == Some(account)
                    || (node.ledger_entry_type == LedgerEntryType::RippleState
                        && [&node.final_fields, &node.previous_fields].iter().any(|f| {
                            f.high_limit.as_ref().map(|l| l.issuer.as_str()) == Some(account)
                                || f.low_limit.as_ref().map(|l| l.issuer.as_str()) == Some(account)
                        }))
            })
    }

    /// Handle one message of the account transaction stream.
    pub async fn process_user_event(&self, event: &Value) {
        let outcome = match TransactionOutcome::from_stream_event(event) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable account stream message");
                return;
            }
        };
        self.apply_book_event(&outcome);
        self.apply_fills(&outcome);
        if Self::touches_account(&outcome, &self.account()) {
            if let Err(e) = self.update_balances().await {
                tracing::warn!(error = %e, "balance refresh after account event failed");
            }
        }
    }

    /// Handle one message of a book subscription.
    pub fn process_book_event(&self, event: &Value) {
        match TransactionOutcome::from_stream_event(event) {
            Ok(outcome) => self.apply_book_event(&outcome),
            Err(e) => tracing::warn!(error = %e, "undecodable book stream message"),
        }
    }

    /// Drain the account stream until the sender side closes.
    pub async fn run_user_stream(&self, mut messages: mpsc::Receiver<Value>) {
        while let Some(event) = messages.recv().await {
            self.process_user_event(&event).await;
        }
        tracing::info!("account stream closed");
    }

    pub async fn run_book_stream(&self, mut messages: mpsc::Receiver<Value>) {
        while let Some(event) = messages.recv().await {
            self.process_book_event(&event);
        }
        tracing::info!("book stream closed");
    }
}
