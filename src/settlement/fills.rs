//! Order updates and trades derived from validated transactions.
//!
//! A transaction touches a tracked order in one of two ways. As taker, it is
//! our own OfferCreate: the order is found by the transaction's `Sequence`
//! and its fill is whatever foreign offers it consumed in the order's market.
//! As maker, one of our resting offers shows up in someone's metadata: the
//! order is found by the offer's `Sequence` and the fill is the offer's own
//! delta. Both paths go through the per-order applied-hash set, so replaying
//! a transaction changes nothing.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::book::BookProjector;
use crate::models::{
    checked_ratio, FeeRule, Market, NodeKind, OrderEvent, OrderState, OrderUpdate, TradeFee, TradeType, TradeUpdate,
    TrackedOrder, TransactionOutcome,
};
use crate::resolver::OrderTracker;
use crate::utils::{ripple_time_to_unix, unix_now};

/// What fill processing needs to know besides the transaction itself.
#[derive(Debug, Clone, Copy)]
pub struct FillContext<'a> {
    pub account: &'a str,
    pub markets: &'a HashMap<String, Market>,
    pub fee_rules: &'a HashMap<String, FeeRule>,
}

/// Apply one transaction to the tracked orders and return the resulting
/// events in the order they happened.
pub fn process_transaction(
    outcome: &TransactionOutcome,
    ctx: &FillContext<'_>,
    tracker: &mut OrderTracker,
) -> Vec<OrderEvent> {
    let mut events = Vec::new();
    if !outcome.validated {
        tracing::debug!(hash = %outcome.hash, "skipping unvalidated transaction");
        return events;
    }
    let timestamp = outcome.date.map(ripple_time_to_unix).unwrap_or_else(unix_now);

    if outcome.transaction.account == ctx.account {
        match outcome.transaction.transaction_type.as_str() {
            "OfferCreate" => process_own_offer_create(outcome, ctx, tracker, timestamp, &mut events),
            "OfferCancel" => process_own_offer_cancel(outcome, tracker, timestamp, &mut events),
            _ => {}
        }
    }
    process_maker_fills(outcome, ctx, tracker, timestamp, &mut events);
    events
}

fn process_own_offer_create(
    outcome: &TransactionOutcome,
    ctx: &FillContext<'_>,
    tracker: &mut OrderTracker,
    timestamp: u64,
    events: &mut Vec<OrderEvent>,
) {
    let sequence = outcome.transaction.sequence;
    let Some(cid) = tracker
        .resolve_order_by_sequence(sequence)
        .map(|o| o.client_order_id.clone())
    else {
        return;
    };

    if !outcome.is_success() {
        tracing::warn!(
            client_order_id = %cid,
            hash = %outcome.hash,
            engine_result = %outcome.engine_result,
            "order transaction failed on ledger"
        );
        report_state(tracker, &cid, OrderState::Failed, false, timestamp, events);
        return;
    }
    if outcome.affected_nodes.is_empty() {
        return;
    }

    let Some(market) = order_market(tracker.get(&cid), ctx) else {
        return;
    };
    let projector = BookProjector::new(market.clone());
    let mut base = Decimal::ZERO;
    let mut quote = Decimal::ZERO;
    let mut resting = false;
    for node in outcome.offer_nodes() {
        if node.account() == Some(ctx.account) {
            if node.sequence() == Some(sequence) && node.kind == NodeKind::Created {
                resting = true;
            }
            continue;
        }
        match node.offer_delta() {
            Ok(Some((gets, pays))) => {
                if let Some((b, q)) = projector.base_quote(&gets, &pays) {
                    base += b;
                    quote += q;
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(hash = %outcome.hash, ledger_index = %node.ledger_index, error = %e, "skipping unparseable offer node"),
        }
    }

    let Some(order) = tracker.get_mut(&cid) else {
        return;
    };
    if !record_trade(order, &market, ctx, outcome, sequence, base, quote, timestamp, events) {
        return;
    }
    let filled = base > Decimal::ZERO;
    let state = match (resting, filled) {
        (true, true) => OrderState::PartiallyFilled,
        (true, false) => OrderState::Open,
        (false, true) => OrderState::Filled,
        // Nothing crossed and nothing rests: killed immediate-or-cancel.
        (false, false) => OrderState::Canceled,
    };
    report_state(tracker, &cid, state, filled, timestamp, events);
}

fn process_own_offer_cancel(
    outcome: &TransactionOutcome,
    tracker: &mut OrderTracker,
    timestamp: u64,
    events: &mut Vec<OrderEvent>,
) {
    let Some(offer_sequence) = outcome.transaction.offer_sequence else {
        return;
    };
    let Some(cid) = tracker
        .resolve_order_by_sequence(offer_sequence)
        .map(|o| o.client_order_id.clone())
    else {
        return;
    };
    if !outcome.is_success() {
        tracing::warn!(client_order_id = %cid, engine_result = %outcome.engine_result, "cancel rejected on ledger");
        return;
    }
    report_state(tracker, &cid, OrderState::Canceled, false, timestamp, events);
}

fn process_maker_fills(
    outcome: &TransactionOutcome,
    ctx: &FillContext<'_>,
    tracker: &mut OrderTracker,
    timestamp: u64,
    events: &mut Vec<OrderEvent>,
) {
    if !outcome.is_success() {
        return;
    }
    for node in outcome.offer_nodes() {
        if node.account() != Some(ctx.account) || node.kind == NodeKind::Created {
            continue;
        }
        let Some(sequence) = node.sequence() else {
            continue;
        };
        let Some(cid) = tracker
            .resolve_order_by_sequence(sequence)
            .map(|o| o.client_order_id.clone())
        else {
            continue;
        };
        let delta = match node.offer_delta() {
            Ok(delta) => delta,
            Err(e) => {
                tracing::warn!(client_order_id = %cid, hash = %outcome.hash, error = %e, "unparseable own offer node");
                continue;
            }
        };

        let Some((gets, pays)) = delta else {
            if node.kind == NodeKind::Deleted {
                // Removed without being taken: cancelled, expired or unfunded.
                report_state(tracker, &cid, OrderState::Canceled, false, timestamp, events);
            }
            continue;
        };
        let Some(market) = order_market(tracker.get(&cid), ctx) else {
            continue;
        };
        let Some((base, quote)) = BookProjector::new(market.clone()).base_quote(&gets, &pays) else {
            tracing::warn!(client_order_id = %cid, "own offer legs do not match the order's market");
            continue;
        };
        let Some(order) = tracker.get_mut(&cid) else {
            continue;
        };
        if !record_trade(order, &market, ctx, outcome, sequence, base, quote, timestamp, events) {
            continue;
        }
        let state = if node.kind == NodeKind::Deleted || order.is_fully_executed() {
            OrderState::Filled
        } else {
            OrderState::PartiallyFilled
        };
        report_state(tracker, &cid, state, base > Decimal::ZERO, timestamp, events);
    }
}

fn order_market(order: Option<&TrackedOrder>, ctx: &FillContext<'_>) -> Option<Market> {
    let order = order?;
    let market = ctx.markets.get(&order.trading_pair).cloned();
    if market.is_none() {
        tracing::warn!(
            client_order_id = %order.client_order_id,
            trading_pair = %order.trading_pair,
            "tracked order references an unknown market"
        );
    }
    market
}

/// Advance the accumulator and emit a trade for a positive fill. `false`
/// when this transaction was already applied to the order.
#[allow(clippy::too_many_arguments)]
fn record_trade(
    order: &mut TrackedOrder,
    market: &Market,
    ctx: &FillContext<'_>,
    outcome: &TransactionOutcome,
    sequence: u32,
    base: Decimal,
    quote: Decimal,
    timestamp: u64,
    events: &mut Vec<OrderEvent>,
) -> bool {
    if !order.apply_fill(&outcome.hash, base, quote) {
        tracing::debug!(client_order_id = %order.client_order_id, hash = %outcome.hash, "transaction already applied");
        return false;
    }
    if base <= Decimal::ZERO {
        return true;
    }
    let price = match checked_ratio(quote, base) {
        Ok(price) => price,
        Err(e) => {
            tracing::warn!(client_order_id = %order.client_order_id, hash = %outcome.hash, error = %e, "fill price out of range, no trade emitted");
            return true;
        }
    };
    let fee = match ctx.fee_rules.get(&order.trading_pair) {
        Some(rule) => rule.trade_fee(order.trade_type, base, quote),
        None => TradeFee {
            token: match order.trade_type {
                TradeType::Buy => market.base.symbol(),
                TradeType::Sell => market.quote.symbol(),
            },
            amount: Decimal::ZERO,
        },
    };
    tracing::info!(
        client_order_id = %order.client_order_id,
        hash = %outcome.hash,
        %base,
        %quote,
        "fill"
    );
    events.push(OrderEvent::Trade(TradeUpdate {
        trade_id: format!("{}-{}", outcome.hash, sequence),
        client_order_id: order.client_order_id.clone(),
        exchange_order_id: order.exchange_order_id.clone().unwrap_or_default(),
        trading_pair: order.trading_pair.clone(),
        price,
        amount: base,
        quote_amount: quote,
        fee,
        fill_timestamp: timestamp,
    }));
    true
}

/// Move the order and emit an update when the state changed, or when a new
/// fill arrived without changing it.
fn report_state(
    tracker: &mut OrderTracker,
    cid: &str,
    state: OrderState,
    filled: bool,
    timestamp: u64,
    events: &mut Vec<OrderEvent>,
) {
    let changed = tracker.transition(cid, state);
    let Some(order) = tracker.get(cid) else {
        return;
    };
    if changed || (filled && order.state == state) {
        events.push(OrderEvent::Order(OrderUpdate {
            client_order_id: order.client_order_id.clone(),
            exchange_order_id: order.exchange_order_id.clone(),
            trading_pair: order.trading_pair.clone(),
            new_state: order.state,
            update_timestamp: timestamp,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{default_markets, OrderType};
    use rust_decimal_macros::dec;
    use serde_json::json;

    const ACCOUNT: &str = "r2XdzWFVoHGfGVmXugtKhxMu3bqhsYiWK";
    const SOLO: &str = "534F4C4F00000000000000000000000000000000";
    const SOLO_ISSUER: &str = "rsoLo2S1kiGeCcn6hCUXVrCpGMWLrRrLZz";

    fn markets() -> HashMap<String, Market> {
        default_markets()
            .iter()
            .map(|(pair, config)| (pair.clone(), Market::from_config(pair, config).unwrap()))
            .collect()
    }

    fn tracked(cid: &str, xid: &str, amount: Decimal) -> TrackedOrder {
        TrackedOrder::new(cid, "SOLO-XRP", TradeType::Buy, OrderType::Limit, amount, Some(dec!(0.2245)), 1)
            .with_exchange_order_id(xid)
            .with_state(OrderState::Open)
    }

    fn own_offer_node(kind: &str, previous: Option<(&str, &str)>, final_: (&str, &str)) -> serde_json::Value {
        let mut body = json!({
            "LedgerEntryType": "Offer",
            "LedgerIndex": "F91E",
            "FinalFields": {
                "Account": ACCOUNT,
                "Sequence": 100,
                "TakerGets": final_.0,
                "TakerPays": {"currency": SOLO, "issuer": SOLO_ISSUER, "value": final_.1}
            }
        });
        if let Some((gets, pays)) = previous {
            body["PreviousFields"] = json!({
                "TakerGets": gets,
                "TakerPays": {"currency": SOLO, "issuer": SOLO_ISSUER, "value": pays}
            });
        }
        json!({ kind: body })
    }

    fn foreign_event(hash: &str, nodes: Vec<serde_json::Value>) -> TransactionOutcome {
        TransactionOutcome::from_stream_event(&json!({
            "transaction": {
                "Account": "rapido5rxPmP4YkMZZEeXSHqWefxHEkqv6",
                "TransactionType": "OfferCreate",
                "Sequence": 5
            },
            "meta": {"AffectedNodes": nodes, "TransactionResult": "tesSUCCESS"},
            "hash": hash,
            "ledger_index": 10,
            "date": 772789130
        }))
        .unwrap()
    }

    fn run(outcome: &TransactionOutcome, tracker: &mut OrderTracker) -> Vec<OrderEvent> {
        let markets = markets();
        let fee_rules = HashMap::new();
        let ctx = FillContext {
            account: ACCOUNT,
            markets: &markets,
            fee_rules: &fee_rules,
        };
        process_transaction(outcome, &ctx, tracker)
    }

    fn last_state(events: &[OrderEvent]) -> Option<OrderState> {
        events.iter().rev().find_map(|e| match e {
            OrderEvent::Order(u) => Some(u.new_state),
            _ => None,
        })
    }

    #[test]
    fn test_maker_partial_then_full_fill() {
        let mut tracker = OrderTracker::new();
        tracker.start_tracking(tracked("hbot", "100-200", dec!(10)));

        let partial = foreign_event("AA", vec![own_offer_node("ModifiedNode", Some(("2000000", "10")), ("1000000", "5"))]);
        let events = run(&partial, &mut tracker);
        assert_eq!(last_state(&events), Some(OrderState::PartiallyFilled));
        match &events[0] {
            OrderEvent::Trade(t) => {
                assert_eq!(t.amount, dec!(5));
                assert_eq!(t.quote_amount, dec!(1));
                assert_eq!(t.price, dec!(0.2));
                assert_eq!(t.trade_id, "AA-100");
                assert_eq!(t.fee.token, "SOLO");
                assert_eq!(t.fill_timestamp, 1719473930);
            }
            other => panic!("expected trade, got {:?}", other),
        }

        let rest = foreign_event("BB", vec![own_offer_node("DeletedNode", Some(("1000000", "5")), ("0", "0"))]);
        let events = run(&rest, &mut tracker);
        assert_eq!(last_state(&events), Some(OrderState::Filled));
        assert_eq!(tracker.get("hbot").unwrap().executed_amount_base, dec!(10));
    }

    #[test]
    fn test_replayed_transaction_is_ignored() {
        let mut tracker = OrderTracker::new();
        tracker.start_tracking(tracked("hbot", "100-200", dec!(10)));
        let partial = foreign_event("AA", vec![own_offer_node("ModifiedNode", Some(("2000000", "10")), ("1000000", "5"))]);
        assert!(!run(&partial, &mut tracker).is_empty());
        assert!(run(&partial, &mut tracker).is_empty());
        assert_eq!(tracker.get("hbot").unwrap().executed_amount_base, dec!(5));
    }

    #[test]
    fn test_deleted_offer_without_consumption_is_canceled() {
        let mut tracker = OrderTracker::new();
        tracker.start_tracking(tracked("hbot", "100-200", dec!(10)));
        let removed = foreign_event("CC", vec![own_offer_node("DeletedNode", None, ("2000000", "10"))]);
        let events = run(&removed, &mut tracker);
        assert_eq!(events.len(), 1);
        assert_eq!(last_state(&events), Some(OrderState::Canceled));
    }

    #[test]
    fn test_unvalidated_transaction_changes_nothing() {
        let mut tracker = OrderTracker::new();
        tracker.start_tracking(tracked("hbot", "100-200", dec!(10)));
        let mut partial =
            foreign_event("AA", vec![own_offer_node("ModifiedNode", Some(("2000000", "10")), ("1000000", "5"))]);
        partial.validated = false;
        assert!(run(&partial, &mut tracker).is_empty());
        assert!(tracker.get("hbot").unwrap().executed_amount_base.is_zero());
    }

    #[test]
    fn test_own_create_that_rests_untouched_is_open() {
        let mut tracker = OrderTracker::new();
        tracker.start_tracking(tracked("hbot", "7-20", dec!(10)).with_state(OrderState::PendingCreate));
        let outcome = TransactionOutcome::from_stream_event(&json!({
            "transaction": {"Account": ACCOUNT, "TransactionType": "OfferCreate", "Sequence": 7},
            "meta": {"AffectedNodes": [{"CreatedNode": {
                "LedgerEntryType": "Offer",
                "LedgerIndex": "AB",
                "NewFields": {
                    "Account": ACCOUNT,
                    "Sequence": 7,
                    "TakerGets": "2245000",
                    "TakerPays": {"currency": SOLO, "issuer": SOLO_ISSUER, "value": "10"}
                }
            }}], "TransactionResult": "tesSUCCESS"},
            "hash": "DD",
            "ledger_index": 11
        }))
        .unwrap();
        let events = run(&outcome, &mut tracker);
        assert_eq!(events.len(), 1);
        assert_eq!(last_state(&events), Some(OrderState::Open));
    }

    #[test]
    fn test_dust_fill_advances_order_without_trade() {
        let mut tracker = OrderTracker::new();
        tracker.start_tracking(tracked("hbot", "100-200", dec!(10)));
        // 1e-25 SOLO against 10,000 XRP has no representable price
        let dust = foreign_event(
            "EE",
            vec![own_offer_node(
                "ModifiedNode",
                Some(("20000000000", "0.0000000000000000000000002")),
                ("10000000000", "0.0000000000000000000000001"),
            )],
        );
        let events = run(&dust, &mut tracker);
        assert!(events.iter().all(|e| matches!(e, OrderEvent::Order(_))));
        assert_eq!(last_state(&events), Some(OrderState::PartiallyFilled));
        assert_eq!(
            tracker.get("hbot").unwrap().executed_amount_base,
            dec!(0.0000000000000000000000001)
        );
    }
}
